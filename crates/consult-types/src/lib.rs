//now people using the types library can use these types
pub mod completion;
pub mod health;
pub mod items;
pub mod persona;
pub mod session;
pub mod stream;
pub mod vision;
mod content;

//re-export types for easier access
pub use completion::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse};
pub use content::message::*;
pub use content::parts::{ContentPart, ImageUrl};
pub use items::{AdminReport, CapturedItem, ItemStatus, Note, Priority};
pub use persona::{PersonaConfig, PersonaConfigBuilder};
pub use session::{EndReason, EndSessionRequest, EndSessionResponse, SessionGrant, SessionTokenResponse};
pub use stream::{ChatStreamRequest, ReplyChunk};
pub use vision::ImageData;
