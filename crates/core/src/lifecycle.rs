use crate::context_store::ContextStore;
use crate::error::Result;
use crate::session_store::{EndClaim, SessionRecord, SessionState, SessionStore, TerminationReason};
use crate::shutdown::{ShutdownCause, ShutdownSignal};
use crate::usage::{UsageLevel, UsageMeter, UsageReport, UsageThresholds};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use consult_types::{PersonaConfig, SessionGrant, SessionTokenResponse};
#[cfg(test)]
use mockall::automock;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const WATCHDOG_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const STOP_ATTEMPTS: u32 = 3;
pub const STOP_RETRY_DELAY: Duration = Duration::from_millis(500);
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// The remote avatar-session platform, as the lifecycle manager sees it.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AvatarPlatform: Send + Sync {
    async fn create_session(&self, persona: &PersonaConfig) -> Result<SessionGrant>;

    async fn stop_session(&self, session_id: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub session_timeout: Duration,
    pub watchdog_interval: Duration,
    pub stop_attempts: u32,
    pub stop_retry_delay: Duration,
    pub shutdown_grace: Duration,
    pub usage: UsageThresholds,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            session_timeout: SESSION_TIMEOUT,
            watchdog_interval: WATCHDOG_INTERVAL,
            stop_attempts: STOP_ATTEMPTS,
            stop_retry_delay: STOP_RETRY_DELAY,
            shutdown_grace: SHUTDOWN_GRACE,
            usage: UsageThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOutcome {
    /// This call terminated the session.
    Ended,
    /// Already ended or being ended by someone else; nothing was sent upstream.
    AlreadyEnded,
    /// Not in the registry; a best-effort stop was sent anyway.
    Unknown,
}

/// Owns every avatar session this process has opened and makes sure each one
/// is stopped on the platform, whichever way it ends.
pub struct SessionLifecycle {
    platform: Arc<dyn AvatarPlatform>,
    store: Arc<SessionStore>,
    usage: Arc<UsageMeter>,
    shutdown: ShutdownSignal,
    config: LifecycleConfig,
    context: Option<Arc<ContextStore>>,
}

impl SessionLifecycle {
    pub fn new(
        platform: Arc<dyn AvatarPlatform>,
        store: Arc<SessionStore>,
        shutdown: ShutdownSignal,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            platform,
            store,
            usage: Arc::new(UsageMeter::new(config.usage)),
            shutdown,
            config,
            context: None,
        }
    }

    /// Per-session vision context is dropped whenever a session ends.
    pub fn with_context(mut self, context: Arc<ContextStore>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn usage(&self) -> &Arc<UsageMeter> {
        &self.usage
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Opens an avatar session and registers it as ACTIVE.
    pub async fn create_session(
        &self,
        persona: &PersonaConfig,
        client_address: &str,
    ) -> Result<SessionTokenResponse> {
        let grant = self.platform.create_session(persona).await.inspect_err(|e| {
            tracing::error!(client = %client_address, error = %e, "failed to create avatar session");
        })?;

        let session_id = match grant.session_id() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                let local = format!("local-{}", uuid::Uuid::new_v4());
                tracing::warn!(session_id = %local, "platform returned no session id, tracking under a local id");
                local
            }
        };

        self.store
            .insert(SessionRecord::new(&session_id, client_address, grant.session_token()))
            .await;
        tracing::info!(session_id = %session_id, client = %client_address, "session created");
        self.store.transition(&session_id, SessionState::Active).await?;
        let active = self.store.len().await;
        tracing::info!(session_id = %session_id, active_sessions = active, "session active");

        Ok(SessionTokenResponse {
            session_token: grant.session_token().to_string(),
            session_id,
        })
    }

    /// Ends a session. Safe to call any number of times for the same id.
    pub async fn end_session(&self, session_id: &str, reason: TerminationReason) -> EndOutcome {
        match self.store.claim_for_ending(session_id).await {
            EndClaim::Claimed(record) => {
                tracing::info!(
                    session_id = %session_id,
                    %reason,
                    age_minutes = %format!("{:.1}", record.age_minutes(Utc::now())),
                    "session ending"
                );
                let confirmed = self.stop_with_retry(session_id).await;
                self.store.finish(session_id).await;
                self.forget_context(session_id).await;
                if confirmed {
                    let remaining = self.store.len().await;
                    tracing::info!(session_id = %session_id, remaining, "session ended");
                } else {
                    tracing::error!(
                        session_id = %session_id,
                        attempts = self.config.stop_attempts,
                        "could not confirm upstream stop, marking session ended"
                    );
                }
                EndOutcome::Ended
            }
            EndClaim::AlreadyEnding | EndClaim::Tombstoned => {
                tracing::debug!(session_id = %session_id, %reason, "session already ended");
                EndOutcome::AlreadyEnded
            }
            EndClaim::Unknown => {
                tracing::info!(session_id = %session_id, %reason, "ending unregistered session");
                if let Err(e) = self.platform.stop_session(session_id).await {
                    tracing::debug!(session_id = %session_id, error = %e, "best-effort stop failed");
                }
                self.store.remember_ended(session_id).await;
                self.forget_context(session_id).await;
                EndOutcome::Unknown
            }
        }
    }

    async fn forget_context(&self, session_id: &str) {
        if let Some(context) = &self.context {
            context.clear_session(session_id).await;
        }
    }

    async fn stop_with_retry(&self, session_id: &str) -> bool {
        let attempts = self.config.stop_attempts.max(1);
        for attempt in 1..=attempts {
            match self.platform.stop_session(session_id).await {
                Ok(()) => return true,
                Err(e) => {
                    tracing::warn!(session_id = %session_id, attempt, error = %e, "stop attempt failed");
                    if attempt < attempts {
                        tokio::time::sleep(self.config.stop_retry_delay).await;
                    }
                }
            }
        }
        false
    }

    /// Force-ends every session older than the timeout at `now`.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Vec<String> {
        let timeout = chrono::Duration::from_std(self.config.session_timeout)
            .unwrap_or_else(|_| chrono::Duration::minutes(30));
        let expired = self.store.expired(now, timeout).await;
        let registered = self.store.len().await;

        tracing::debug!(registered, expired = expired.len(), "watchdog sweep");
        for session_id in &expired {
            tracing::warn!(session_id = %session_id, "session exceeded timeout");
            self.end_session(session_id, TerminationReason::WatchdogTimeout)
                .await;
        }
        expired
    }

    /// Charges one watchdog interval of usage and trips the breaker past the hard limit.
    pub async fn usage_tick(&self) -> UsageReport {
        let active = self.store.len().await;
        let report = self.usage.record(active, self.config.watchdog_interval).await;
        let total = format!("{:.1}", report.total_minutes);

        match report.level {
            UsageLevel::Normal => {
                tracing::info!(active_sessions = active, total_minutes = %total, "usage report");
            }
            UsageLevel::Warning => {
                tracing::warn!(
                    active_sessions = active,
                    total_minutes = %total,
                    limit = self.usage.thresholds().critical_minutes,
                    "approaching usage limit"
                );
            }
            UsageLevel::Critical => {
                tracing::error!(
                    active_sessions = active,
                    total_minutes = %total,
                    "usage limit exceeded, shutting down"
                );
                self.shutdown.trigger(ShutdownCause::UsageLimit);
            }
        }
        report
    }

    /// Ends every registered session concurrently, bounded by the shutdown grace.
    /// Sessions are recorded as ended for the same reason the process stopped.
    pub async fn flush_all(&self, cause: ShutdownCause) -> usize {
        let ids: Vec<String> = self
            .store
            .snapshot()
            .await
            .into_iter()
            .map(|r| r.session_id().to_string())
            .collect();
        if ids.is_empty() {
            return 0;
        }

        let reason = TerminationReason::from(cause);
        tracing::info!(sessions = ids.len(), %reason, "terminating registered sessions");
        let total = ids.len();
        let ends = ids.iter().map(|id| self.end_session(id, reason));

        match tokio::time::timeout(self.config.shutdown_grace, futures::future::join_all(ends)).await
        {
            Ok(outcomes) => outcomes
                .into_iter()
                .filter(|o| *o == EndOutcome::Ended)
                .count(),
            Err(_) => {
                let left = self.store.len().await;
                tracing::error!(left, "shutdown grace elapsed before every session ended");
                total.saturating_sub(left)
            }
        }
    }

    /// Periodic sweep plus usage accounting until shutdown.
    pub fn spawn_watchdog(self: &Arc<Self>) -> JoinHandle<()> {
        let lifecycle = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(lifecycle.config.watchdog_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        lifecycle.sweep(Utc::now()).await;
                        lifecycle.usage_tick().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || shutdown.borrow().is_some() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("watchdog stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context_store::VisionContext;
    use crate::error::ConsultError;
    use consult_types::PersonaConfigBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn lifecycle_with(platform: MockAvatarPlatform) -> (Arc<SessionLifecycle>, ShutdownSignal) {
        lifecycle_with_config(platform, LifecycleConfig::default())
    }

    fn lifecycle_with_config(
        platform: MockAvatarPlatform,
        config: LifecycleConfig,
    ) -> (Arc<SessionLifecycle>, ShutdownSignal) {
        let shutdown = ShutdownSignal::new();
        let lifecycle = SessionLifecycle::new(
            Arc::new(platform),
            Arc::new(SessionStore::new()),
            shutdown.clone(),
            config,
        );
        (Arc::new(lifecycle), shutdown)
    }

    fn granting(platform: &mut MockAvatarPlatform, session_id: &'static str) {
        platform
            .expect_create_session()
            .returning(move |_| Ok(SessionGrant::new("tok", Some(session_id))));
    }

    #[tokio::test]
    async fn create_registers_active_session() {
        let mut platform = MockAvatarPlatform::new();
        granting(&mut platform, "s-1");
        let (lifecycle, _) = lifecycle_with(platform);

        let response = lifecycle
            .create_session(&PersonaConfigBuilder::new().build(), "10.0.0.1")
            .await
            .unwrap();

        assert_eq!(response.session_id, "s-1");
        assert_eq!(response.session_token, "tok");
        let record = lifecycle.store().get("s-1").await.unwrap();
        assert_eq!(record.state(), SessionState::Active);
        assert_eq!(record.client_address(), "10.0.0.1");
    }

    #[tokio::test]
    async fn rejected_create_registers_nothing() {
        let mut platform = MockAvatarPlatform::new();
        platform.expect_create_session().returning(|_| {
            Err(ConsultError::Upstream {
                service: "avatar platform",
                status: 401,
                body: "unauthorized".into(),
            })
        });
        let (lifecycle, _) = lifecycle_with(platform);

        let err = lifecycle
            .create_session(&PersonaConfigBuilder::new().build(), "10.0.0.1")
            .await
            .unwrap_err();
        assert!(err.is_upstream());
        assert!(lifecycle.store().is_empty().await);
    }

    #[tokio::test]
    async fn ending_twice_contacts_upstream_once() {
        let mut platform = MockAvatarPlatform::new();
        granting(&mut platform, "s-1");
        platform
            .expect_stop_session()
            .withf(|id| id == "s-1")
            .times(1)
            .returning(|_| Ok(()));
        let (lifecycle, _) = lifecycle_with(platform);
        lifecycle
            .create_session(&PersonaConfigBuilder::new().build(), "10.0.0.1")
            .await
            .unwrap();

        let first = lifecycle.end_session("s-1", TerminationReason::ClientStop).await;
        let second = lifecycle.end_session("s-1", TerminationReason::PageUnload).await;

        assert_eq!(first, EndOutcome::Ended);
        assert_eq!(second, EndOutcome::AlreadyEnded);
        assert!(lifecycle.store().is_empty().await);
    }

    #[tokio::test]
    async fn unknown_session_gets_one_best_effort_stop() {
        let mut platform = MockAvatarPlatform::new();
        platform.expect_stop_session().times(1).returning(|_| {
            Err(ConsultError::Upstream {
                service: "avatar platform",
                status: 404,
                body: String::new(),
            })
        });
        let (lifecycle, _) = lifecycle_with(platform);

        assert_eq!(
            lifecycle.end_session("ghost", TerminationReason::ClientStop).await,
            EndOutcome::Unknown
        );
        assert_eq!(
            lifecycle.end_session("ghost", TerminationReason::ClientStop).await,
            EndOutcome::AlreadyEnded
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_retried_then_session_is_dropped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut platform = MockAvatarPlatform::new();
        granting(&mut platform, "s-1");
        let counter = Arc::clone(&calls);
        platform.expect_stop_session().returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ConsultError::Transport {
                service: "avatar platform",
                message: "connection refused".into(),
            })
        });
        let (lifecycle, _) = lifecycle_with(platform);
        lifecycle
            .create_session(&PersonaConfigBuilder::new().build(), "10.0.0.1")
            .await
            .unwrap();

        let started = tokio::time::Instant::now();
        let outcome = lifecycle.end_session("s-1", TerminationReason::ClientStop).await;

        assert_eq!(outcome, EndOutcome::Ended);
        assert_eq!(calls.load(Ordering::SeqCst), STOP_ATTEMPTS as usize);
        assert_eq!(started.elapsed(), STOP_RETRY_DELAY * (STOP_ATTEMPTS - 1));
        assert!(lifecycle.store().is_empty().await);
        assert!(lifecycle.store().is_tombstoned("s-1").await);
    }

    #[tokio::test]
    async fn sweep_ends_sessions_past_the_timeout() {
        let mut platform = MockAvatarPlatform::new();
        granting(&mut platform, "s-1");
        platform
            .expect_stop_session()
            .times(1)
            .returning(|_| Ok(()));
        let (lifecycle, _) = lifecycle_with(platform);
        lifecycle
            .create_session(&PersonaConfigBuilder::new().build(), "10.0.0.1")
            .await
            .unwrap();

        assert!(lifecycle.sweep(Utc::now()).await.is_empty());

        let at_next_tick = Utc::now() + chrono::Duration::minutes(31);
        assert_eq!(lifecycle.sweep(at_next_tick).await, vec!["s-1".to_string()]);
        assert!(lifecycle.store().is_empty().await);
    }

    #[tokio::test]
    async fn every_way_of_ending_drops_the_session_context() {
        let mut platform = MockAvatarPlatform::new();
        let ids = Arc::new(AtomicUsize::new(0));
        let next = Arc::clone(&ids);
        platform.expect_create_session().returning(move |_| {
            let n = next.fetch_add(1, Ordering::SeqCst);
            Ok(SessionGrant::new("tok", Some(format!("s-{n}").as_str())))
        });
        platform.expect_stop_session().returning(|_| Ok(()));
        let context = Arc::new(ContextStore::default());
        let lifecycle = Arc::new(
            SessionLifecycle::new(
                Arc::new(platform),
                Arc::new(SessionStore::new()),
                ShutdownSignal::new(),
                LifecycleConfig::default(),
            )
            .with_context(Arc::clone(&context)),
        );
        for _ in 0..3 {
            lifecycle
                .create_session(&PersonaConfigBuilder::new().build(), "10.0.0.1")
                .await
                .unwrap();
        }
        for id in ["s-0", "s-1", "s-2", "ghost"] {
            context.record(Some(id), VisionContext::new("a piano")).await;
        }

        lifecycle.end_session("s-0", TerminationReason::ClientStop).await;
        lifecycle.end_session("ghost", TerminationReason::ClientStop).await;
        assert!(context.lookup(Some("s-0")).await.is_none());
        assert!(context.lookup(Some("ghost")).await.is_none());
        assert!(context.lookup(Some("s-1")).await.is_some());

        let swept = lifecycle.sweep(Utc::now() + chrono::Duration::minutes(31)).await;
        assert_eq!(swept.len(), 2);
        assert!(context.lookup(Some("s-1")).await.is_none());
        assert!(context.lookup(Some("s-2")).await.is_none());
        assert_eq!(context.lookup(None).await.unwrap().text(), "a piano");
    }

    #[tokio::test]
    async fn lifecycle_futures_can_be_spawned() {
        let mut platform = MockAvatarPlatform::new();
        granting(&mut platform, "s-1");
        platform.expect_stop_session().returning(|_| Ok(()));
        let (lifecycle, _) = lifecycle_with(platform);

        let spawned = Arc::clone(&lifecycle);
        let created = tokio::spawn(async move {
            spawned
                .create_session(&PersonaConfigBuilder::new().build(), "10.0.0.1")
                .await
                .map(|r| r.session_id)
        });
        assert_eq!(created.await.unwrap().unwrap(), "s-1");

        let spawned = Arc::clone(&lifecycle);
        let swept = tokio::spawn(async move { spawned.sweep(Utc::now()).await });
        assert!(swept.await.unwrap().is_empty());

        let spawned = Arc::clone(&lifecycle);
        let ended = tokio::spawn(async move {
            spawned.end_session("s-1", TerminationReason::ClientStop).await
        });
        assert_eq!(ended.await.unwrap(), EndOutcome::Ended);

        let spawned = Arc::clone(&lifecycle);
        let flushed =
            tokio::spawn(async move { spawned.flush_all(ShutdownCause::Terminate).await });
        assert_eq!(flushed.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn usage_breaker_triggers_shutdown() {
        let mut platform = MockAvatarPlatform::new();
        granting(&mut platform, "s-1");
        let config = LifecycleConfig {
            usage: UsageThresholds {
                warning_minutes: 4.0,
                critical_minutes: 8.0,
            },
            ..LifecycleConfig::default()
        };
        let (lifecycle, shutdown) = lifecycle_with_config(platform, config);
        lifecycle
            .create_session(&PersonaConfigBuilder::new().build(), "10.0.0.1")
            .await
            .unwrap();

        assert_eq!(lifecycle.usage_tick().await.level, UsageLevel::Warning);
        assert!(shutdown.cause().is_none());
        assert_eq!(lifecycle.usage_tick().await.level, UsageLevel::Critical);
        assert_eq!(shutdown.cause(), Some(ShutdownCause::UsageLimit));
    }

    #[tokio::test]
    async fn flush_ends_every_registered_session() {
        let mut platform = MockAvatarPlatform::new();
        let ids = Arc::new(AtomicUsize::new(0));
        let next = Arc::clone(&ids);
        platform.expect_create_session().returning(move |_| {
            let n = next.fetch_add(1, Ordering::SeqCst);
            Ok(SessionGrant::new("tok", Some(format!("s-{n}").as_str())))
        });
        platform.expect_stop_session().times(3).returning(|_| Ok(()));
        let (lifecycle, _) = lifecycle_with(platform);
        for _ in 0..3 {
            lifecycle
                .create_session(&PersonaConfigBuilder::new().build(), "10.0.0.1")
                .await
                .unwrap();
        }

        assert_eq!(lifecycle.flush_all(ShutdownCause::UsageLimit).await, 3);
        assert!(lifecycle.store().is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_stops_on_shutdown() {
        let platform = MockAvatarPlatform::new();
        let (lifecycle, shutdown) = lifecycle_with(platform);

        let handle = lifecycle.spawn_watchdog();
        tokio::time::sleep(WATCHDOG_INTERVAL * 2).await;
        assert_eq!(lifecycle.usage().total_minutes().await, 0.0);

        shutdown.trigger(ShutdownCause::Interrupt);
        handle.await.unwrap();
    }
}
