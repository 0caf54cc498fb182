use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

pub const VISION_STALENESS: Duration = Duration::from_secs(120);

/// Marker the analyzer uses when it could not look at a frame.
const ANALYZER_FAILURE_MARKER: &str = "having trouble";

#[derive(Debug, Clone, PartialEq)]
pub struct VisionContext {
    text: String,
    timestamp: DateTime<Utc>,
}

impl VisionContext {
    pub fn new(text: &str) -> Self {
        Self::at(text, Utc::now())
    }

    pub fn at(text: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            text: text.to_string(),
            timestamp,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, staleness: Duration) -> bool {
        match chrono::Duration::from_std(staleness) {
            Ok(limit) => now - self.timestamp <= limit,
            Err(_) => true,
        }
    }

    /// Worth putting in front of the chat model.
    pub fn is_usable(&self, now: DateTime<Utc>, staleness: Duration) -> bool {
        !self.text.trim().is_empty()
            && !self.text.contains(ANALYZER_FAILURE_MARKER)
            && self.is_fresh(now, staleness)
    }
}

#[derive(Default)]
struct Contexts {
    latest: Option<VisionContext>,
    by_session: HashMap<String, VisionContext>,
}

/// Latest room analysis, kept process-wide and per session.
pub struct ContextStore {
    contexts: RwLock<Contexts>,
    staleness: Duration,
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new(VISION_STALENESS)
    }
}

impl ContextStore {
    pub fn new(staleness: Duration) -> Self {
        Self {
            contexts: RwLock::new(Contexts::default()),
            staleness,
        }
    }

    /// Last write wins, both globally and for `session_id` when given.
    pub async fn record(&self, session_id: Option<&str>, context: VisionContext) {
        let mut contexts = self.contexts.write().await;
        if let Some(id) = session_id {
            contexts.by_session.insert(id.to_string(), context.clone());
        }
        contexts.latest = Some(context);
    }

    /// A session sees only its own context; anonymous callers see the latest one.
    pub async fn lookup(&self, session_id: Option<&str>) -> Option<VisionContext> {
        let contexts = self.contexts.read().await;
        match session_id {
            Some(id) => contexts.by_session.get(id).cloned(),
            None => contexts.latest.clone(),
        }
    }

    /// The context to embed in a prompt at `now`, if any.
    pub async fn usable(&self, session_id: Option<&str>, now: DateTime<Utc>) -> Option<VisionContext> {
        self.lookup(session_id)
            .await
            .filter(|c| c.is_usable(now, self.staleness))
    }

    pub async fn clear_session(&self, session_id: &str) {
        self.contexts.write().await.by_session.remove(session_id);
    }
}
