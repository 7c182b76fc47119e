use std::fmt;
use std::time::SystemTime;

use serde::Serialize;

use crate::config::ConfigData;
use crate::package_system::location::PackageLocation;
use crate::package_system::manifest::PluginDeclaration;

/// Plugin lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    Pending,
    Loaded,
    Error,
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PluginStatus::Pending => "pending",
            PluginStatus::Loaded => "loaded",
            PluginStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// What a loader gets to see about the plugin it loads
#[derive(Debug, Clone, PartialEq)]
pub struct PluginInfo {
    /// Instance id; changes when the plugin is re-created
    pub id: u64,
    pub name: String,
    pub package: PackageLocation,
    pub declaration: PluginDeclaration,
}

impl PluginInfo {
    pub fn plugin_type(&self) -> &str {
        &self.declaration.plugin_type
    }
}

/// Point-in-time view of a registered plugin
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginSnapshot {
    pub id: u64,
    pub name: String,
    pub plugin_type: String,
    pub package: PackageLocation,
    pub status: PluginStatus,
    pub requires: Vec<String>,
    /// Configuration resolved for the last load attempt
    pub config: ConfigData,
    pub last_reload: Option<SystemTime>,
    pub error_message: Option<String>,
    /// Dependencies this plugin is parked on while pending
    pub waiting_on: Vec<String>,
}

/// Registry-internal record of one plugin
#[derive(Debug, Clone)]
pub(crate) struct PluginEntry {
    pub id: u64,
    pub package: PackageLocation,
    pub declaration: PluginDeclaration,
    pub config: ConfigData,
    pub status: PluginStatus,
    pub last_reload: Option<SystemTime>,
    pub error_message: Option<String>,
}

impl PluginEntry {
    pub fn new(id: u64, package: PackageLocation, declaration: PluginDeclaration) -> Self {
        Self {
            id,
            package,
            declaration,
            config: ConfigData::new(),
            status: PluginStatus::Pending,
            last_reload: None,
            error_message: None,
        }
    }

    pub fn info(&self) -> PluginInfo {
        PluginInfo {
            id: self.id,
            name: self.declaration.name.clone(),
            package: self.package.clone(),
            declaration: self.declaration.clone(),
        }
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.status = PluginStatus::Error;
        self.error_message = Some(message.into());
    }

    pub fn snapshot(&self, waiting_on: Vec<String>) -> PluginSnapshot {
        PluginSnapshot {
            id: self.id,
            name: self.declaration.name.clone(),
            plugin_type: self.declaration.plugin_type.clone(),
            package: self.package.clone(),
            status: self.status,
            requires: self.declaration.requires.clone(),
            config: self.config.clone(),
            last_reload: self.last_reload,
            error_message: self.error_message.clone(),
            waiting_on,
        }
    }
}
