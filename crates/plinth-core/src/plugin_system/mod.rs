//! # Plinth Core Plugin System
//!
//! Plugin-level state and lifecycle.
//!
//! - **[`PluginRegistry`]**: plugin table, dependency-ordered loading with
//!   parking of plugins whose dependencies are missing, cascading unloads and
//!   hot replacement.
//! - **[`dependency`]**: the `requires` graph; load waves, unload order and
//!   cycle paths.
//! - **[`LoaderDispatcher`]** and the [`Loader`] trait: per-type loaders,
//!   isolated so that a failing or panicking loader only affects its plugin.
//! - **[`BootstrapLoader`]**: a loader over named bootstrap functions that
//!   keeps one replaceable [`Capability`] per plugin.
//! - **[`PluginContextHolder`]**: context handed to loaders and plugins.
//! - **[`PluginService`]**: read-only facade with one-shot lifecycle listeners.
pub mod bootstrap;
pub mod context;
pub mod dependency;
pub mod error;
pub mod loader;
pub mod plugin;
pub mod registry;
pub mod service;

pub use bootstrap::{BootstrapLoader, Capability};
pub use context::{PluginContextHolder, PluginLogger, ServerInfo};
pub use dependency::{DependencyError, DependencyGraph};
pub use error::PluginSystemError;
pub use loader::{BoxError, Loader, LoaderDispatcher, LoaderInfo};
pub use plugin::{PluginInfo, PluginSnapshot, PluginStatus};
pub use registry::{LoadReport, PluginRegistry};
pub use service::PluginService;
