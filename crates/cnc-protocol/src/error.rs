//! Protocol decode errors.

use thiserror::Error;

/// Errors raised while decoding or encoding wire messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown match operator {0:?}")]
    UnknownOperator(String),

    #[error("invalid regex in matcher for {name:?}: {source}")]
    InvalidRegex {
        name: String,
        #[source]
        source: regex::Error,
    },
}
