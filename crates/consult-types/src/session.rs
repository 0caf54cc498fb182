use chrono::{DateTime, Utc};

/// What the avatar platform returns from `POST /auth/session-token`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct SessionGrant {
    #[serde(rename = "sessionToken")]
    session_token: String,

    /// Needed to stop the session later. Older platform versions omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
}

impl SessionGrant {
    pub fn new(session_token: &str, session_id: Option<&str>) -> Self {
        Self {
            session_token: session_token.to_string(),
            session_id: session_id.map(String::from),
        }
    }

    pub fn session_token(&self) -> &str {
        &self.session_token
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }
}

/// `POST /api/session-token` response.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct SessionTokenResponse {
    #[serde(rename = "sessionToken")]
    pub session_token: String,
    pub session_id: String,
}

/// Why a client asked for its session to end.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The stop button.
    #[default]
    Stop,
    /// Page-unload beacon.
    Unload,
    /// The client's own session timer fired.
    Timeout,
}

/// `POST /api/end-session` body. The id is optional so a missing field is
/// reported as a validation error instead of a body rejection.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct EndSessionRequest {
    pub session_id: Option<String>,
    #[serde(default)]
    pub reason: Option<EndReason>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct EndSessionResponse {
    pub success: bool,
    pub message: String,
}

/// One row of `GET /api/admin/sessions`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub age_minutes: String,
    pub client_ip: String,
    pub state: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionListing {
    pub total_active: usize,
    pub total_minutes_used: String,
    pub sessions: Vec<SessionSummary>,
}
