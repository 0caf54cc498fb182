use crate::error::{ConsultError, Result};
use crate::shutdown::ShutdownCause;
use chrono::{DateTime, Duration, Utc};
use consult_types::EndReason;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use tokio::sync::Mutex;

/// How many ended session ids are remembered for idempotent ends.
const TOMBSTONE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Created,
    Active,
    Ending,
    Ended,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Created, Active) | (Created, Ending) | (Active, Ending) | (Ending, Ended)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Active => "active",
            SessionState::Ending => "ending",
            SessionState::Ended => "ended",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every path that can take a session from ACTIVE to ENDING.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    ClientStop,
    PageUnload,
    ClientTimeout,
    WatchdogTimeout,
    Shutdown,
    UsageLimit,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::ClientStop => "client_stop",
            TerminationReason::PageUnload => "page_unload",
            TerminationReason::ClientTimeout => "client_timeout",
            TerminationReason::WatchdogTimeout => "watchdog_timeout",
            TerminationReason::Shutdown => "shutdown",
            TerminationReason::UsageLimit => "usage_limit",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<EndReason> for TerminationReason {
    fn from(reason: EndReason) -> Self {
        match reason {
            EndReason::Stop => TerminationReason::ClientStop,
            EndReason::Unload => TerminationReason::PageUnload,
            EndReason::Timeout => TerminationReason::ClientTimeout,
        }
    }
}

impl From<ShutdownCause> for TerminationReason {
    fn from(cause: ShutdownCause) -> Self {
        match cause {
            ShutdownCause::UsageLimit => TerminationReason::UsageLimit,
            _ => TerminationReason::Shutdown,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    session_id: String,
    created_at: DateTime<Utc>,
    client_address: String,
    session_token: String,
    state: SessionState,
}

impl SessionRecord {
    pub fn new(session_id: &str, client_address: &str, session_token: &str) -> Self {
        Self::created_at(session_id, client_address, session_token, Utc::now())
    }

    pub fn created_at(
        session_id: &str,
        client_address: &str,
        session_token: &str,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            created_at,
            client_address: client_address.to_string(),
            session_token: session_token.to_string(),
            state: SessionState::Created,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn client_address(&self) -> &str {
        &self.client_address
    }

    pub fn session_token(&self) -> &str {
        &self.session_token
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }

    pub fn age_minutes(&self, now: DateTime<Utc>) -> f64 {
        self.age(now).num_milliseconds() as f64 / 60_000.0
    }
}

/// Result of trying to move a session into ENDING.
#[derive(Debug, Clone, PartialEq)]
pub enum EndClaim {
    /// The caller now owns the termination of this session.
    Claimed(SessionRecord),
    /// Another caller is already terminating it.
    AlreadyEnding,
    /// Ended recently.
    Tombstoned,
    Unknown,
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<String, SessionRecord>,
    tombstones: HashSet<String>,
    tombstone_order: VecDeque<String>,
}

impl Registry {
    fn bury(&mut self, session_id: &str) {
        if !self.tombstones.insert(session_id.to_string()) {
            return;
        }
        self.tombstone_order.push_back(session_id.to_string());
        while self.tombstone_order.len() > TOMBSTONE_CAPACITY {
            if let Some(oldest) = self.tombstone_order.pop_front() {
                self.tombstones.remove(&oldest);
            }
        }
    }
}

/// Registry of sessions that have a live counterpart on the avatar platform.
#[derive(Default)]
pub struct SessionStore {
    registry: Mutex<Registry>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: SessionRecord) {
        let mut registry = self.registry.lock().await;
        registry.tombstones.remove(record.session_id());
        registry
            .sessions
            .insert(record.session_id().to_string(), record);
    }

    /// Moves a session to `next`, rejecting transitions the state machine forbids.
    pub async fn transition(&self, session_id: &str, next: SessionState) -> Result<SessionState> {
        let mut registry = self.registry.lock().await;
        let record = registry
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| ConsultError::NotFound(format!("session {session_id}")))?;

        let from = record.state;
        if !from.can_transition_to(next) {
            return Err(ConsultError::InvalidTransition {
                session_id: session_id.to_string(),
                from,
                to: next,
            });
        }
        record.state = next;
        tracing::debug!(session_id = %session_id, %from, to = %next, "session transition");
        Ok(from)
    }

    /// Atomically marks the session ENDING if nobody else has.
    pub async fn claim_for_ending(&self, session_id: &str) -> EndClaim {
        let mut registry = self.registry.lock().await;
        if registry.tombstones.contains(session_id) {
            return EndClaim::Tombstoned;
        }
        match registry.sessions.get_mut(session_id) {
            Some(record) if record.state == SessionState::Ending => EndClaim::AlreadyEnding,
            Some(record) if record.state.can_transition_to(SessionState::Ending) => {
                record.state = SessionState::Ending;
                EndClaim::Claimed(record.clone())
            }
            Some(_) => EndClaim::Tombstoned,
            None => EndClaim::Unknown,
        }
    }

    /// Marks the session ENDED, removes it and remembers its id.
    pub async fn finish(&self, session_id: &str) -> Option<SessionRecord> {
        let mut registry = self.registry.lock().await;
        let removed = registry.sessions.remove(session_id).map(|mut record| {
            record.state = SessionState::Ended;
            record
        });
        registry.bury(session_id);
        removed
    }

    /// Remembers an id that was never registered so repeated ends stay local.
    pub async fn remember_ended(&self, session_id: &str) {
        self.registry.lock().await.bury(session_id);
    }

    pub async fn get(&self, session_id: &str) -> Option<SessionRecord> {
        self.registry.lock().await.sessions.get(session_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.registry.lock().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn is_tombstoned(&self, session_id: &str) -> bool {
        self.registry.lock().await.tombstones.contains(session_id)
    }

    /// All registered sessions, oldest first.
    pub async fn snapshot(&self) -> Vec<SessionRecord> {
        let registry = self.registry.lock().await;
        let mut records: Vec<SessionRecord> = registry.sessions.values().cloned().collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    /// Ids of sessions whose age exceeds `timeout` at `now`.
    pub async fn expired(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<String> {
        self.snapshot()
            .await
            .into_iter()
            .filter(|r| r.state != SessionState::Ending && r.age(now) > timeout)
            .map(|r| r.session_id)
            .collect()
    }
}
