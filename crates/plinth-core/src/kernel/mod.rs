//! # Plinth Core Kernel
//!
//! The composition root of the runtime.
//!
//! - **[`Runtime`](bootstrap::Runtime)**: wires the configuration, package
//!   watcher, build orchestrator, definition builders, package registry,
//!   plugin registry and loader dispatcher together and owns the event loop.
//!   Built through [`RuntimeBuilder`](bootstrap::RuntimeBuilder).
//! - **[`KernelComponent`](component::KernelComponent)**: the
//!   initialize/start/stop lifecycle the runtime implements.
//! - **Constants** and the aggregated [`Error`](error::Error) type.
pub mod bootstrap;
pub mod component;
pub mod constants;
pub mod error;

pub use bootstrap::{Runtime, RuntimeBuilder};
pub use component::KernelComponent;
pub use error::{Error, Result};

#[cfg(test)]
mod tests;
