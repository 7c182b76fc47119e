//! # Plinth Core Package System Errors
//!
//! [`PackageSystemError`] covers everything that can go wrong between
//! noticing a package on disk (or at a URL) and handing its plugin list to the
//! plugin registry: manifest parsing, I/O, remote fetches, dev builds and
//! plugin-name collisions between packages.
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PackageSystemError {
    #[error("Package manifest error for '{location}': {message}")]
    ManifestError { location: String, message: String },

    #[error("I/O error during '{operation}' on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to fetch '{url}': {message}")]
    FetchError { url: String, message: String },

    #[error("No package definition found for '{location}'{detail}")]
    NoDefinition { location: String, detail: String },

    #[error("Build failed for '{location}': {output}")]
    BuildFailed { location: String, output: String },

    #[error("Plugin '{plugin}' is already provided by package '{owner}'")]
    DuplicatePluginName { plugin: String, owner: String },

    #[error("Watch error on '{}': {message}", path.display())]
    WatchError { path: PathBuf, message: String },

    #[error("Unknown package '{0}'")]
    UnknownPackage(String),
}

impl PackageSystemError {
    pub fn io(source: std::io::Error, operation: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        PackageSystemError::Io { path: path.into(), operation: operation.into(), source }
    }

    pub fn manifest(location: impl ToString, message: impl Into<String>) -> Self {
        PackageSystemError::ManifestError { location: location.to_string(), message: message.into() }
    }
}
