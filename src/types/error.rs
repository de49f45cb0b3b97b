//! Error types for vault-unsealer
//!
//! Crate-level failures (configuration, transport, decryption). Per-host unseal
//! failures live in [`crate::unseal::HostFailure`] so they can be reported
//! without aborting the run.

/// Main error type for vault-unsealer operations
#[derive(Debug, thiserror::Error)]
pub enum UnsealerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("TOML parse error: {0}")]
    Toml(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Vault returned {status}: {message}")]
    Vault { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Decryption failed: {0}")]
    Decrypt(String),
}

impl From<std::io::Error> for UnsealerError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<toml::de::Error> for UnsealerError {
    fn from(err: toml::de::Error) -> Self {
        Self::Toml(err.to_string())
    }
}

impl From<serde_json::Error> for UnsealerError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidResponse(format!("JSON error: {}", err))
    }
}

impl From<reqwest::Error> for UnsealerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Http(err.to_string())
        }
    }
}

impl From<base64::DecodeError> for UnsealerError {
    fn from(err: base64::DecodeError) -> Self {
        Self::Decrypt(format!("invalid base64 payload: {}", err))
    }
}

/// Result type alias for vault-unsealer operations
pub type Result<T> = std::result::Result<T, UnsealerError>;
