use thiserror::Error;

pub type Result<T> = std::result::Result<T, SlackError>;

#[derive(Debug, Error)]
pub enum SlackError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("slack {method} failed: {error}")]
    Api { method: String, error: String },

    #[error("unexpected response format: {0}")]
    ResponseFormat(String),

    #[error("socket mode error: {0}")]
    Socket(String),
}

impl From<reqwest::Error> for SlackError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

impl From<serde_json::Error> for SlackError {
    fn from(e: serde_json::Error) -> Self {
        Self::ResponseFormat(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SlackError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Socket(e.to_string())
    }
}
