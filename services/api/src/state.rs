use crate::rate_limit::RateLimits;
use consult_core::context_store::ContextStore;
use consult_core::items::ItemCatalog;
use consult_core::openai::{ChatCompletion, VisionAnalysis};
use consult_core::prompts::Prompts;
use consult_core::relay::ChatRelay;
use consult_core::session_store::SessionStore;
use consult_core::vision::VisionService;
use consult_core::{AvatarPlatform, LifecycleConfig, SessionLifecycle, ShutdownSignal};
use consult_types::PersonaConfig;
use std::sync::Arc;
use std::time::Duration;

/// Remote services the server talks to.
pub struct Collaborators {
    pub platform: Arc<dyn AvatarPlatform>,
    pub completion: Arc<dyn ChatCompletion>,
    pub analyzer: Arc<dyn VisionAnalysis>,
}

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<SessionLifecycle>,
    pub relay: Arc<ChatRelay>,
    pub vision: Arc<VisionService>,
    pub catalog: Arc<ItemCatalog>,
    pub context: Arc<ContextStore>,
    pub persona: Arc<PersonaConfig>,
    pub limits: Arc<RateLimits>,
}

impl AppState {
    pub fn new(
        collaborators: Collaborators,
        prompts: Prompts,
        persona: PersonaConfig,
        lifecycle_config: LifecycleConfig,
        vision_staleness: Duration,
        shutdown: ShutdownSignal,
    ) -> Self {
        let prompts = Arc::new(prompts);
        let context = Arc::new(ContextStore::new(vision_staleness));
        let sessions = Arc::new(SessionStore::new());
        let lifecycle = SessionLifecycle::new(
            collaborators.platform,
            sessions.clone(),
            shutdown,
            lifecycle_config,
        )
        .with_context(context.clone());

        Self {
            lifecycle: Arc::new(lifecycle),
            relay: Arc::new(ChatRelay::new(
                collaborators.completion,
                prompts.clone(),
                context.clone(),
            )),
            vision: Arc::new(
                VisionService::new(collaborators.analyzer, prompts, context.clone())
                    .with_sessions(sessions),
            ),
            catalog: Arc::new(ItemCatalog::new()),
            context,
            persona: Arc::new(persona),
            limits: Arc::new(RateLimits::default()),
        }
    }

    pub fn with_limits(mut self, limits: RateLimits) -> Self {
        self.limits = Arc::new(limits);
        self
    }
}
