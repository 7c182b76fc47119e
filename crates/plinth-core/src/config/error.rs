//! Errors raised while reading or writing configuration documents.
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown or unsupported config format for path: {}", path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("Failed to deserialize from {format}: {message}")]
    Deserialize { format: &'static str, message: String },

    #[error("Failed to serialize to {format}: {message}")]
    Serialize { format: &'static str, message: String },

    #[error("I/O error reading config '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
