/// Failures talking to the avatar platform.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The platform answered with a non-success status.
    #[error("avatar platform returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("avatar platform unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("avatar platform response is missing '{0}'")]
    MissingField(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
