//! # Plinth Core Configuration
//!
//! Configuration values used across the runtime:
//!
//! - **[`data`]**: [`ConfigData`], the opaque key/value map used for plugin
//!   default configuration, external overrides and the server section, plus
//!   [`ConfigFormat`] for reading JSON, YAML and TOML documents.
//! - **[`runtime`]**: [`RuntimeConfig`], the package-source configuration the
//!   composition root is built from.
//! - **[`error`]**: [`ConfigError`].
pub mod data;
pub mod error;
pub mod runtime;

pub use data::{ConfigData, ConfigFormat};
pub use error::ConfigError;
pub use runtime::{PackageSource, RuntimeConfig};
