use thiserror::Error;

/// Session-level failure.
///
/// Cloneable so the last error can live in the conversation and be handed to
/// the error callback at the same time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// Backend answered with a non-2xx status.
    #[error("HTTP error! status: {status}")]
    Http { status: u16 },

    /// Connection dropped or the body could not be read.
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend sent an error frame.
    #[error("{0}")]
    Backend(String),

    /// The request could not be built or sent.
    #[error("request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            ChatError::Http {
                status: status.as_u16(),
            }
        } else if err.is_builder() {
            ChatError::Request(err.to_string())
        } else {
            ChatError::Transport(err.to_string())
        }
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed,
    Failed(ChatError),
    /// User-initiated stop. Never an error.
    Cancelled,
}
