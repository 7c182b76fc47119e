use std::borrow::Cow;

use serde::Serialize;

use crate::event::Event;
use crate::package_system::location::PackageLocation;

/// What happened to a plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginEventKind {
    Loaded,
    Unloaded,
}

impl PluginEventKind {
    pub const LOADED: &'static str = "plugin.loaded";
    pub const UNLOADED: &'static str = "plugin.unloaded";

    pub fn as_str(&self) -> &'static str {
        match self {
            PluginEventKind::Loaded => Self::LOADED,
            PluginEventKind::Unloaded => Self::UNLOADED,
        }
    }
}

/// Emitted by the plugin registry after a loader call succeeded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginEvent {
    pub kind: PluginEventKind,
    pub plugin_name: String,
}

impl PluginEvent {
    pub fn loaded(plugin_name: impl Into<String>) -> Self {
        Self { kind: PluginEventKind::Loaded, plugin_name: plugin_name.into() }
    }

    pub fn unloaded(plugin_name: impl Into<String>) -> Self {
        Self { kind: PluginEventKind::Unloaded, plugin_name: plugin_name.into() }
    }
}

impl Event for PluginEvent {
    fn kind(&self) -> &'static str {
        self.kind.as_str()
    }

    fn subject(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.plugin_name)
    }
}

/// What happened to a package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageEventKind {
    Ready,
    Error,
    Removed,
}

impl PackageEventKind {
    pub const READY: &'static str = "package.ready";
    pub const ERROR: &'static str = "package.error";
    pub const REMOVED: &'static str = "package.removed";

    pub fn as_str(&self) -> &'static str {
        match self {
            PackageEventKind::Ready => Self::READY,
            PackageEventKind::Error => Self::ERROR,
            PackageEventKind::Removed => Self::REMOVED,
        }
    }
}

/// Emitted by the package registry on every terminal package transition.
///
/// `added`/`updated`/`removed` carry the plugin-name diff of a `ready`
/// resolution and the removed plugin names of a package removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageEvent {
    pub kind: PackageEventKind,
    pub location: PackageLocation,
    pub package_name: Option<String>,
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
    pub error_message: Option<String>,
}

impl PackageEvent {
    pub fn ready(
        location: PackageLocation,
        package_name: String,
        added: Vec<String>,
        updated: Vec<String>,
        removed: Vec<String>,
    ) -> Self {
        Self {
            kind: PackageEventKind::Ready,
            location,
            package_name: Some(package_name),
            added,
            updated,
            removed,
            error_message: None,
        }
    }

    pub fn error(location: PackageLocation, package_name: Option<String>, message: String) -> Self {
        Self {
            kind: PackageEventKind::Error,
            location,
            package_name,
            added: Vec::new(),
            updated: Vec::new(),
            removed: Vec::new(),
            error_message: Some(message),
        }
    }

    pub fn removed(location: PackageLocation, package_name: Option<String>, removed: Vec<String>) -> Self {
        Self {
            kind: PackageEventKind::Removed,
            location,
            package_name,
            added: Vec::new(),
            updated: Vec::new(),
            removed,
            error_message: None,
        }
    }
}

impl Event for PackageEvent {
    fn kind(&self) -> &'static str {
        self.kind.as_str()
    }

    fn subject(&self) -> Cow<'_, str> {
        Cow::Owned(self.location.to_string())
    }
}
