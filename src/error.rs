use std::io;
use thiserror::Error;

/// Boxed failure reported by a data source.
pub type SourceError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Data source failed: {0}")]
    Upstream(#[source] SourceError),

    #[error("Write to output channel failed: {0}")]
    Downstream(#[source] io::Error),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to read configuration file {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse configuration file {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Bridge was dropped before the stream finished")]
    Detached,
}

/// An item that could not be turned into JSON bytes.
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Failed to encode item as JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Pre-encoded item is empty")]
    Empty,
}

impl BridgeError {
    /// Whether this error came from the client side of the connection.
    pub fn is_downstream(&self) -> bool {
        matches!(self, BridgeError::Downstream(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
