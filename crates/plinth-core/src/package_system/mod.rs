//! # Plinth Core Package System
//!
//! Everything between a directory (or URL) and a list of plugin declarations.
//!
//! - **[`watcher`]**: observes configured roots and reports packages as
//!   discovered, changed or removed.
//! - **[`build`]**: debounced, per-package serialized dev builds.
//! - **[`definition`]**: the chain of definition builders that turn a
//!   location into a [`PackageManifest`].
//! - **[`registry`]**: the package state machine that diffs manifests and
//!   drives the plugin registry.
pub mod build;
pub mod definition;
pub mod error;
pub mod location;
pub mod manifest;
pub mod registry;
pub mod watcher;

pub use build::{BuildExecutor, BuildOrchestrator, BuildOutcome, ShellBuildExecutor};
pub use definition::{DefinitionBuilderChain, DefinitionHints, LocalManifestBuilder, PackageDefinitionBuilder, RemoteDescriptorBuilder};
pub use error::PackageSystemError;
pub use location::PackageLocation;
pub use manifest::{PackageManifest, PluginDeclaration};
pub use registry::{ManifestDiff, PackageSnapshot, PackageStatus, PluginPackageRegistry};
pub use watcher::{ChangeKind, PackageWatcher, WatchEvent, WatchRoot, WatcherSettings};

#[cfg(test)]
mod tests;
