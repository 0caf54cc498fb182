use consult_core::LifecycleConfig;
use consult_core::usage::UsageThresholds;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub avatar_api_key: String,
    pub avatar_base_url: Option<String>,
    pub avatar_id: Option<String>,
    pub voice_id: Option<String>,
    pub persona_llm: Option<String>,
    pub openai_api_key: String,
    pub openai_base_url: Option<String>,
    pub chat_model: String,
    pub vision_model: String,
    pub transcription_model: String,
    pub prompts_dir: PathBuf,
    pub lifecycle: LifecycleConfig,
    pub vision_staleness: Duration,
    pub log_level: Level,
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required(name: &str) -> Result<String, ConfigError> {
    optional(name).ok_or_else(|| ConfigError::MissingVar(name.to_string()))
}

fn parsed<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        None => Ok(default),
    }
}

impl Config {
    /// Loads configuration from the environment (and `.env`, if present).
    ///
    /// `AVATAR_API_KEY` and `OPENAI_API_KEY` are required; everything else
    /// has a default.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let bind_address = parsed(
            "BIND_ADDRESS",
            SocketAddr::from(([0, 0, 0, 0], 3000)),
        )?;

        let defaults = LifecycleConfig::default();
        let thresholds = UsageThresholds::default();
        let timeout_minutes: u64 = parsed(
            "SESSION_TIMEOUT_MINUTES",
            defaults.session_timeout.as_secs() / 60,
        )?;
        let watchdog_secs: u64 = parsed(
            "WATCHDOG_INTERVAL_SECS",
            defaults.watchdog_interval.as_secs(),
        )?;
        if watchdog_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "WATCHDOG_INTERVAL_SECS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        let lifecycle = LifecycleConfig {
            session_timeout: Duration::from_secs(timeout_minutes * 60),
            watchdog_interval: Duration::from_secs(watchdog_secs),
            usage: UsageThresholds {
                warning_minutes: parsed("USAGE_WARNING_MINUTES", thresholds.warning_minutes)?,
                critical_minutes: parsed("USAGE_CRITICAL_MINUTES", thresholds.critical_minutes)?,
            },
            ..defaults
        };

        let vision_staleness = Duration::from_secs(parsed(
            "VISION_STALE_SECS",
            consult_core::context_store::VISION_STALENESS.as_secs(),
        )?);

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            avatar_api_key: required("AVATAR_API_KEY")?,
            avatar_base_url: optional("AVATAR_API_BASE_URL"),
            avatar_id: optional("AVATAR_ID"),
            voice_id: optional("VOICE_ID"),
            persona_llm: optional("PERSONA_LLM"),
            openai_api_key: required("OPENAI_API_KEY")?,
            openai_base_url: optional("OPENAI_BASE_URL"),
            chat_model: optional("CHAT_MODEL")
                .unwrap_or_else(|| consult_core::openai::DEFAULT_CHAT_MODEL.to_string()),
            vision_model: optional("VISION_MODEL")
                .unwrap_or_else(|| consult_core::openai::DEFAULT_VISION_MODEL.to_string()),
            transcription_model: optional("TRANSCRIPTION_MODEL")
                .unwrap_or_else(|| consult_core::openai::DEFAULT_TRANSCRIPTION_MODEL.to_string()),
            prompts_dir: PathBuf::from(optional("PROMPTS_DIR").unwrap_or_else(|| "prompts".to_string())),
            lifecycle,
            vision_staleness,
            log_level,
        })
    }
}
