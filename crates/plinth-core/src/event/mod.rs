//! # Plinth Core Event System
//!
//! Events are the only cross-component notification in the runtime. The
//! plugin registry emits [`PluginEvent`]s and the package registry emits
//! [`PackageEvent`]s, each through its own typed [`EventDispatcher`].
//!
//! Two kinds of listeners exist:
//!
//! - persistent handlers registered with [`EventDispatcher::subscribe`] or
//!   [`EventDispatcher::subscribe_all`], removed with
//!   [`EventDispatcher::unsubscribe`];
//! - one-shot listeners registered with [`EventDispatcher::once`], keyed by
//!   event kind and subject, which fire on the next matching event only.
//!
//! Every handler runs isolated: a panicking handler is logged and the
//! remaining handlers still run.
pub mod dispatcher;
pub mod types;

use std::borrow::Cow;
use std::fmt;

/// Type for handler identifiers
pub type EventId = u64;

/// Core event trait
pub trait Event: Clone + fmt::Debug + Send + Sync + 'static {
    /// Stable kind tag, e.g. `plugin.loaded`
    fn kind(&self) -> &'static str;

    /// The entity this event is about; one-shot listeners are keyed by it
    fn subject(&self) -> Cow<'_, str>;
}

pub use dispatcher::EventDispatcher;
pub use types::{PackageEvent, PackageEventKind, PluginEvent, PluginEventKind};
