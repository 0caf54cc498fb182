use crate::session_store::SessionState;

/// Errors produced by the consultation core.
#[derive(Debug, thiserror::Error)]
pub enum ConsultError {
    /// A collaborator answered with a non-success status.
    #[error("{service} returned {status}: {body}")]
    Upstream {
        service: &'static str,
        status: u16,
        body: String,
    },

    /// A collaborator could not be reached at all.
    #[error("{service} unreachable: {message}")]
    Transport {
        service: &'static str,
        message: String,
    },

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Recognition(#[from] RecognitionError),

    #[error("a reply is still in progress")]
    TurnInProgress,

    #[error("the assistant produced no reply")]
    EmptyReply,

    #[error("session {session_id} cannot move from {from} to {to}")]
    InvalidTransition {
        session_id: String,
        from: SessionState,
        to: SessionState,
    },

    #[error("{0} not found")]
    NotFound(String),
}

impl ConsultError {
    pub fn validation(message: impl Into<String>) -> Self {
        ConsultError::Validation(message.into())
    }

    pub(crate) fn transport(service: &'static str, error: impl std::fmt::Display) -> Self {
        ConsultError::Transport {
            service,
            message: error.to_string(),
        }
    }

    /// Upstream and transport failures; callers report these generically.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            ConsultError::Upstream { .. } | ConsultError::Transport { .. } | ConsultError::EmptyReply
        )
    }
}

const AVATAR_PLATFORM: &str = "avatar platform";

impl From<avatar_client::Error> for ConsultError {
    fn from(error: avatar_client::Error) -> Self {
        match error {
            avatar_client::Error::Upstream { status, body } => ConsultError::Upstream {
                service: AVATAR_PLATFORM,
                status,
                body,
            },
            avatar_client::Error::Transport(e) => ConsultError::transport(AVATAR_PLATFORM, e),
            avatar_client::Error::MissingField(field) => ConsultError::Upstream {
                service: AVATAR_PLATFORM,
                status: 200,
                body: format!("response is missing '{field}'"),
            },
        }
    }
}

/// Camera or microphone acquisition failures. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    #[error("access to the {0} was denied")]
    PermissionDenied(String),
    #[error("the {0} is in use by another application")]
    DeviceBusy(String),
    #[error("no {0} was found")]
    NotFound(String),
}

impl MediaError {
    /// What the user can do about it.
    pub fn guidance(&self) -> &'static str {
        match self {
            MediaError::PermissionDenied(_) => {
                "Allow camera and microphone access in your browser settings, then reload."
            }
            MediaError::DeviceBusy(_) => {
                "Close other applications using the camera or microphone and try again."
            }
            MediaError::NotFound(_) => "Connect a camera and microphone, then try again.",
        }
    }
}

/// Speech recognizer termination causes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecognitionError {
    #[error("no speech detected")]
    NoSpeech,
    #[error("recognition aborted")]
    Aborted,
    #[error("recognition not allowed")]
    NotAllowed,
    #[error("recognition network failure: {0}")]
    Network(String),
    #[error("recognition failed: {0}")]
    Other(String),
}

impl RecognitionError {
    /// Maps recognizer error codes such as `no-speech`.
    pub fn from_code(code: &str) -> Self {
        match code {
            "no-speech" => RecognitionError::NoSpeech,
            "aborted" => RecognitionError::Aborted,
            "not-allowed" | "service-not-allowed" => RecognitionError::NotAllowed,
            "network" => RecognitionError::Network(code.to_string()),
            other => RecognitionError::Other(other.to_string()),
        }
    }

    /// Silence and deliberate aborts are routine; recognition just restarts.
    pub fn is_benign(&self) -> bool {
        matches!(self, RecognitionError::NoSpeech | RecognitionError::Aborted)
    }
}

pub type Result<T> = std::result::Result<T, ConsultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizer_codes_map_to_benign_errors() {
        assert!(RecognitionError::from_code("no-speech").is_benign());
        assert!(RecognitionError::from_code("aborted").is_benign());
        assert!(!RecognitionError::from_code("network").is_benign());
        assert_eq!(
            RecognitionError::from_code("audio-capture"),
            RecognitionError::Other("audio-capture".into())
        );
    }

    #[test]
    fn avatar_errors_keep_status_and_body() {
        let err: ConsultError = avatar_client::Error::Upstream {
            status: 401,
            body: "nope".into(),
        }
        .into();
        assert!(err.is_upstream());
        assert_eq!(err.to_string(), "avatar platform returned 401: nope");
    }

    #[test]
    fn media_errors_carry_guidance() {
        let err = MediaError::PermissionDenied("microphone".into());
        assert!(err.guidance().contains("Allow"));
        assert_eq!(err.to_string(), "access to the microphone was denied");
    }
}
