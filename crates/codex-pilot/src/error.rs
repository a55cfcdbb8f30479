//! Client error types

use thiserror::Error;

/// Client error type
#[derive(Error, Debug)]
pub enum PilotError {
    /// Invalid server URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// URL parse error
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS setup or negotiation error
    #[error("TLS error: {0}")]
    Tls(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Config file could not be parsed
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    /// Config could not be written back
    #[error("Config write error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    /// No platform config directory
    #[error("Could not determine config directory")]
    NoConfigDir,

    /// The client runtime has shut down
    #[error("Client runtime is not running")]
    ChannelClosed,
}

/// Client result type
pub type Result<T> = std::result::Result<T, PilotError>;
