use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Error)]
pub enum PromptwireError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("input too large: {bytes} bytes (max {max})")]
    InputTooLarge { bytes: usize, max: usize },

    #[error("model not found: {model}")]
    ModelNotFound {
        model: String,
        suggestions: Vec<String>,
    },

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Transport(Box<tungstenite::Error>),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

// tungstenite::Error carries a full HTTP response; boxed to keep Result small.
impl From<tungstenite::Error> for PromptwireError {
    fn from(e: tungstenite::Error) -> Self {
        Self::Transport(Box::new(e))
    }
}

impl PromptwireError {
    /// Produce a sanitized message suitable for a transient notification.
    /// Never includes the endpoint URL, whose query string carries the bearer token.
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidRequest(msg) => format!("invalid request: {msg}"),
            Self::InputTooLarge { max, .. } => {
                format!("Maximum input size reached ({}KB)", max / 1024)
            }
            Self::ModelNotFound { model, suggestions } => {
                if suggestions.is_empty() {
                    format!("model not found: {model}")
                } else {
                    format!(
                        "model not found: {model}. Did you mean: {}?",
                        suggestions.join(", ")
                    )
                }
            }
            Self::AuthFailed(_) => "authentication failed, please sign in again".to_string(),
            Self::Connect(_) => "could not connect to the streaming gateway".to_string(),
            Self::Transport(_) => "connection to the streaming gateway failed".to_string(),
            Self::Config(msg) => format!("configuration error: {msg}"),
            Self::Io(_) => "local i/o error".to_string(),
            Self::Json(_) => "failed to encode or decode a message".to_string(),
        }
    }

    /// True for failures that happen before any connection attempt.
    pub fn is_pre_connect(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest(_)
                | Self::InputTooLarge { .. }
                | Self::ModelNotFound { .. }
                | Self::AuthFailed(_)
        )
    }
}
