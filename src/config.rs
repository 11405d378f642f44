//! Bridge configuration.
//!
//! Values come from defaults, an optional TOML file and command-line
//! overrides, in that order.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Items requested from the source per batch when nothing else is set
pub const DEFAULT_BATCH_SIZE: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Unit of demand requested from the source, and the item count at
    /// which a flush is scheduled.
    pub batch_size: usize,

    /// Close the connection once the closing bracket was written.
    pub close_connection_after: bool,

    /// Put each item on its own line. Only the array punctuation changes.
    pub pretty_print_newlines: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            close_connection_after: false,
            pretty_print_newlines: false,
        }
    }
}

impl BridgeConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).map_err(|source| BridgeError::ConfigParse {
            path: "<inline>".to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let display = path.display().to_string();
        let contents = std::fs::read_to_string(path).map_err(|source| BridgeError::ConfigRead {
            path: display.clone(),
            source,
        })?;
        let config: Self = toml::from_str(&contents).map_err(|source| BridgeError::ConfigParse {
            path: display,
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(BridgeError::Config(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply the outcome of keep-alive negotiation.
    pub fn with_keep_alive(mut self, keep_alive: KeepAlive) -> Self {
        self.close_connection_after = keep_alive == KeepAlive::Close;
        self
    }
}

// =============================================================================
// Keep-alive negotiation
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAlive {
    KeepOpen,
    Close,
}

impl KeepAlive {
    /// Decide from the request's HTTP version and `Connection` header.
    ///
    /// HTTP/1.1 stays open unless the client sent `close`; HTTP/1.0 closes
    /// unless the client sent `keep-alive`.
    pub fn negotiate(version: HttpVersion, connection: Option<&str>) -> Self {
        let has_token = |token: &str| {
            connection.is_some_and(|value| {
                value
                    .split(',')
                    .any(|part| part.trim().eq_ignore_ascii_case(token))
            })
        };

        match version {
            HttpVersion::Http11 if has_token("close") => KeepAlive::Close,
            HttpVersion::Http11 => KeepAlive::KeepOpen,
            HttpVersion::Http10 if has_token("keep-alive") => KeepAlive::KeepOpen,
            HttpVersion::Http10 => KeepAlive::Close,
        }
    }
}
