mod client;
mod error;

pub use consult_types as types;
pub use client::config::{Config, ConfigBuilder};
pub use client::consts;
pub use client::stats::Stats;
pub use client::{Client, StopOutcome};
pub use error::{Error, Result};
