use crate::error::Result;
use crate::lifecycle::AvatarPlatform;
use async_trait::async_trait;
use avatar_client::StopOutcome;
use consult_types::{PersonaConfig, SessionGrant};

/// Implements the lifecycle's platform seam over the avatar HTTP client.
pub struct AvatarPlatformAdapter {
    client: avatar_client::Client,
}

impl AvatarPlatformAdapter {
    pub fn new(client: avatar_client::Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &avatar_client::Client {
        &self.client
    }
}

#[async_trait]
impl AvatarPlatform for AvatarPlatformAdapter {
    async fn create_session(&self, persona: &PersonaConfig) -> Result<SessionGrant> {
        Ok(self.client.create_session_token(persona).await?)
    }

    async fn stop_session(&self, session_id: &str) -> Result<()> {
        match self.client.stop_session(session_id).await? {
            StopOutcome::Stopped => Ok(()),
            StopOutcome::NotFound => {
                tracing::debug!(session_id = %session_id, "platform had already released the session");
                Ok(())
            }
        }
    }
}
