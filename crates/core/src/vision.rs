use crate::context_store::{ContextStore, VisionContext};
use crate::error::{ConsultError, Result};
use crate::openai::VisionAnalysis;
use crate::prompts::Prompts;
use crate::session_store::{SessionState, SessionStore};
use async_trait::async_trait;
use consult_types::ImageData;
#[cfg(test)]
use mockall::automock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const VISION_INTERVAL: Duration = Duration::from_secs(10);

/// A camera, or anything pretending to be one.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// `None` while the source has no usable frame yet.
    async fn capture_frame(&self) -> Option<ImageData>;
}

/// Where frames go to be analysed.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VisionSubmitter: Send + Sync {
    async fn submit(&self, image: ImageData, session_id: Option<String>) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    NotReady,
    Updated,
    Failed,
}

/// Periodically captures a frame and keeps the latest analysis in a [`ContextStore`].
pub struct VisionPoller {
    source: Arc<dyn FrameSource>,
    submitter: Arc<dyn VisionSubmitter>,
    context: Arc<ContextStore>,
    session_id: Option<String>,
    interval: Duration,
}

impl VisionPoller {
    pub fn new(
        source: Arc<dyn FrameSource>,
        submitter: Arc<dyn VisionSubmitter>,
        context: Arc<ContextStore>,
        session_id: Option<String>,
    ) -> Self {
        Self {
            source,
            submitter,
            context,
            session_id,
            interval: VISION_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// One capture-and-analyse cycle. Failures are logged and not retried.
    pub async fn tick(&self) -> TickOutcome {
        let Some(frame) = self.source.capture_frame().await else {
            tracing::trace!("no frame yet, skipping vision tick");
            return TickOutcome::NotReady;
        };

        match self.submitter.submit(frame, self.session_id.clone()).await {
            Ok(analysis) => {
                self.context
                    .record(self.session_id.as_deref(), VisionContext::new(&analysis))
                    .await;
                tracing::debug!(chars = analysis.len(), "vision context updated");
                TickOutcome::Updated
            }
            Err(e) => {
                tracing::warn!(error = %e, "vision analysis failed");
                TickOutcome::Failed
            }
        }
    }

    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("vision poller stopped");
        })
    }
}

/// Server side of vision: validates frames, runs the analyzer and records the result.
pub struct VisionService {
    analyzer: Arc<dyn VisionAnalysis>,
    prompts: Arc<Prompts>,
    context: Arc<ContextStore>,
    sessions: Option<Arc<SessionStore>>,
}

impl VisionService {
    pub fn new(
        analyzer: Arc<dyn VisionAnalysis>,
        prompts: Arc<Prompts>,
        context: Arc<ContextStore>,
    ) -> Self {
        Self {
            analyzer,
            prompts,
            context,
            sessions: None,
        }
    }

    /// Only sessions active in `sessions` get a context of their own.
    pub fn with_sessions(mut self, sessions: Arc<SessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    async fn registered<'a>(&self, session_id: Option<&'a str>) -> Option<&'a str> {
        let (Some(id), Some(sessions)) = (session_id, &self.sessions) else {
            return session_id;
        };
        match sessions.get(id).await {
            Some(record) if record.state() == SessionState::Active => Some(id),
            _ => {
                tracing::debug!(session_id = %id, "analysis for an inactive session, not kept per session");
                None
            }
        }
    }

    fn validate(raw: Option<&str>) -> Result<ImageData> {
        ImageData::from_raw(raw).ok_or_else(|| ConsultError::validation("No image data provided"))
    }

    /// Background analysis; the result becomes the current vision context.
    pub async fn analyze_and_record(
        &self,
        raw_image: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<String> {
        let image = Self::validate(raw_image)?;
        let analysis = self.analyzer.analyze_image(self.prompts.vision(), &image).await?;

        if analysis.trim().is_empty() {
            tracing::debug!("empty analysis, keeping previous vision context");
        } else {
            let session_id = self.registered(session_id).await;
            self.context
                .record(session_id, VisionContext::new(&analysis))
                .await;
        }
        Ok(analysis)
    }

    /// User-triggered analysis for the admin catalog. Does not touch the vision context.
    pub async fn analyze_for_admin(&self, raw_image: Option<&str>) -> Result<(ImageData, String)> {
        let image = Self::validate(raw_image)?;
        let analysis = self
            .analyzer
            .analyze_image(self.prompts.admin_vision(), &image)
            .await?;
        Ok((image, analysis))
    }
}

#[async_trait]
impl VisionSubmitter for VisionService {
    async fn submit(&self, image: ImageData, session_id: Option<String>) -> Result<String> {
        let data_url = image.data_url();
        self.analyze_and_record(Some(&data_url), session_id.as_deref())
            .await
    }
}
