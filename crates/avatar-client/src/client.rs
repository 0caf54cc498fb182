use crate::client::stats::Stats;
use crate::error::{Error, Result};
use crate::types::{PersonaConfig, SessionGrant};
use secrecy::ExposeSecret;
use std::sync::{Arc, Mutex};

pub mod config;
pub mod consts;
pub mod stats;

/// Result of asking the platform to stop a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    /// The platform no longer knows the session; treated as already stopped.
    NotFound,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionTokenRequest<'a> {
    persona_config: &'a PersonaConfig,
}

#[derive(serde::Serialize)]
struct StopSessionRequest<'a> {
    session_id: &'a str,
}

/// HTTP client for the avatar-session platform.
///
/// Every call is a single authenticated request; retries are the caller's
/// business.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    config: Arc<config::Config>,
    stats: Arc<Mutex<Stats>>,
}

impl Client {
    pub fn new(config: config::Config) -> Self {
        Self::with_http(reqwest::Client::new(), config)
    }

    pub fn with_http(http: reqwest::Client, config: config::Config) -> Self {
        Self {
            http,
            config: Arc::new(config),
            stats: Arc::new(Mutex::new(Stats::new())),
        }
    }

    /// Issue a session token for the given persona.
    pub async fn create_session_token(&self, persona: &PersonaConfig) -> Result<SessionGrant> {
        let url = self.config.url(consts::SESSION_TOKEN_PATH);
        tracing::debug!(persona = %persona.name(), "requesting avatar session token");

        let response = self
            .http
            .post(&url)
            .bearer_auth(self.config.api_key().expose_secret())
            .json(&SessionTokenRequest {
                persona_config: persona,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), %body, "session token request rejected");
            return Err(Error::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let payload: serde_json::Value = response.json().await?;
        if payload
            .get("sessionToken")
            .and_then(|t| t.as_str())
            .is_none_or(str::is_empty)
        {
            return Err(Error::MissingField("sessionToken"));
        }
        let grant: SessionGrant =
            serde_json::from_value(payload).map_err(|_| Error::MissingField("sessionToken"))?;

        self.update_stats(|stats| stats.record_token());
        Ok(grant)
    }

    /// Ask the platform to terminate a session.
    pub async fn stop_session(&self, session_id: &str) -> Result<StopOutcome> {
        let url = self.config.url(consts::STOP_SESSION_PATH);

        let result = self
            .http
            .post(&url)
            .bearer_auth(self.config.api_key().expose_secret())
            .json(&StopSessionRequest { session_id })
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.update_stats(|stats| stats.record_stop(false));
                return Err(e.into());
            }
        };

        let status = response.status();
        if status.is_success() {
            self.update_stats(|stats| stats.record_stop(true));
            tracing::info!(session_id = %session_id, "avatar session stopped");
            return Ok(StopOutcome::Stopped);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            self.update_stats(|stats| stats.record_stop(true));
            tracing::info!(session_id = %session_id, "avatar session already gone");
            return Ok(StopOutcome::NotFound);
        }

        self.update_stats(|stats| stats.record_stop(false));
        let body = response.text().await.unwrap_or_default();
        Err(Error::Upstream {
            status: status.as_u16(),
            body,
        })
    }

    // Return a snapshot of the stats.
    pub fn stats(&self) -> Stats {
        match self.stats.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn update_stats(&self, f: impl FnOnce(&mut Stats)) {
        if let Ok(mut guard) = self.stats.lock() {
            f(&mut guard);
        } else {
            tracing::error!("failed to update stats");
        }
    }
}
