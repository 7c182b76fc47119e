use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::data::{ConfigData, ConfigFormat};
use crate::config::error::ConfigError;
use crate::kernel::constants;
use crate::package_system::location::PackageLocation;
use crate::utils::fs::absolutize;

/// One configured package-source root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageSource {
    /// Local directory or `http(s)://` URL
    pub location: String,
    /// Keep observing the root after the initial scan
    #[serde(default)]
    pub watch: bool,
    /// Rebuild packages under this root when their files change
    #[serde(default)]
    pub dev_mode: bool,
}

impl PackageSource {
    pub fn new(location: impl Into<String>) -> Self {
        Self { location: location.into(), watch: false, dev_mode: false }
    }

    pub fn watched(mut self) -> Self {
        self.watch = true;
        self
    }

    pub fn dev(mut self) -> Self {
        self.dev_mode = true;
        self
    }

    /// Parse the configured location; relative local paths resolve against `base`
    pub fn package_location(&self, base: &Path) -> PackageLocation {
        match PackageLocation::parse(&self.location) {
            PackageLocation::Local(path) => PackageLocation::Local(absolutize(base, &path)),
            remote => remote,
        }
    }
}

fn default_debounce_ms() -> u64 {
    constants::DEFAULT_DEBOUNCE_MS
}

fn default_poll_interval_ms() -> u64 {
    constants::DEFAULT_POLL_INTERVAL_MS
}

fn default_build_runner() -> String {
    constants::DEFAULT_BUILD_RUNNER.to_string()
}

fn default_watch_ignore() -> Vec<String> {
    constants::DEFAULT_WATCH_IGNORE.iter().map(|s| s.to_string()).collect()
}

/// Runtime configuration consumed by the composition root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// Ordered package-source roots
    #[serde(default)]
    pub packages: Vec<PackageSource>,
    /// Plugins that are never scheduled for load
    #[serde(default)]
    pub ignore_plugins: Vec<String>,
    /// Debounce window for file events and dev builds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Reconcile interval for local roots and poll interval for remote roots
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Command prefix used to run a package's dev build script
    #[serde(default = "default_build_runner")]
    pub build_runner: String,
    /// Directory names whose changes never count as package changes.
    /// Must include the output directory of every dev build script.
    #[serde(default = "default_watch_ignore")]
    pub watch_ignore: Vec<String>,
    /// Per-plugin configuration overrides, keyed by plugin name
    #[serde(default)]
    pub plugins: HashMap<String, ConfigData>,
    /// Opaque server section exposed to plugins through their context
    #[serde(default)]
    pub server: ConfigData,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            packages: Vec::new(),
            ignore_plugins: Vec::new(),
            debounce_ms: default_debounce_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            build_runner: default_build_runner(),
            watch_ignore: default_watch_ignore(),
            plugins: HashMap::new(),
            server: ConfigData::new(),
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration document
    pub fn parse(data: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        format.parse(data)
    }

    /// Load a configuration file, picking the format from its extension.
    ///
    /// Relative local package locations are resolved against the file's directory.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let format = ConfigFormat::from_path(path)
            .ok_or_else(|| ConfigError::UnsupportedFormat { path: path.to_path_buf() })?;
        let data = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let mut config = Self::parse(&data, format)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_locations(base);
        Ok(config)
    }

    /// Rewrite relative local package locations to absolute paths below `base`
    pub fn resolve_locations(&mut self, base: &Path) {
        for source in &mut self.packages {
            source.location = source.package_location(base).to_string();
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Overrides configured for a plugin, empty when none are configured
    pub fn overrides_for(&self, plugin: &str) -> ConfigData {
        self.plugins.get(plugin).cloned().unwrap_or_default()
    }
}
