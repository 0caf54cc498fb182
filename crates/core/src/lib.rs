pub mod context_store;
pub mod error;
pub mod items;
pub mod lifecycle;
pub mod openai;
pub mod platform;
pub mod prompts;
pub mod relay;
pub mod session_store;
pub mod shutdown;
pub mod speech;
pub mod turn;
pub mod usage;
pub mod vision;

pub use error::{ConsultError, MediaError, RecognitionError, Result};
pub use lifecycle::{AvatarPlatform, EndOutcome, LifecycleConfig, SessionLifecycle};
pub use session_store::{SessionState, SessionStore, TerminationReason};
pub use shutdown::{ShutdownCause, ShutdownSignal};
