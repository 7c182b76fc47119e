use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};
use serde::Serialize;

use crate::event::{EventDispatcher, PackageEvent};
use crate::package_system::build::{BuildOrchestrator, BuildOutcome};
use crate::package_system::definition::{DefinitionBuilderChain, DefinitionHints};
use crate::package_system::error::PackageSystemError;
use crate::package_system::location::PackageLocation;
use crate::package_system::manifest::PackageManifest;
use crate::package_system::watcher::{ChangeKind, WatchEvent};
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::plugin::PluginStatus;
use crate::plugin_system::registry::PluginRegistry;

/// Package lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageStatus {
    Pending,
    Building,
    Ready,
    Error,
}

impl fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PackageStatus::Pending => "pending",
            PackageStatus::Building => "building",
            PackageStatus::Ready => "ready",
            PackageStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of a package
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackageSnapshot {
    pub location: PackageLocation,
    pub status: PackageStatus,
    pub manifest: Option<PackageManifest>,
    pub error_message: Option<String>,
    pub dev_mode: bool,
    /// Definition builder that produced the current manifest
    pub builder: Option<String>,
}

impl PackageSnapshot {
    pub fn name(&self) -> Option<&str> {
        self.manifest.as_ref().map(|m| m.name.as_str())
    }
}

/// Three-way diff of two plugin lists, by plugin name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestDiff {
    pub added: Vec<String>,
    /// Present in both with a different declaration
    pub updated: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: Vec<String>,
}

impl ManifestDiff {
    pub fn between(previous: Option<&PackageManifest>, next: &PackageManifest) -> Self {
        let mut diff = ManifestDiff::default();
        for declaration in &next.plugins {
            match previous.and_then(|p| p.plugin(&declaration.name)) {
                None => diff.added.push(declaration.name.clone()),
                Some(old) if old != declaration => diff.updated.push(declaration.name.clone()),
                Some(_) => diff.unchanged.push(declaration.name.clone()),
            }
        }
        if let Some(previous) = previous {
            diff.removed = previous
                .plugins
                .iter()
                .filter(|old| next.plugin(&old.name).is_none())
                .map(|old| old.name.clone())
                .collect();
        }
        diff
    }
}

#[derive(Debug, Clone)]
struct PackageEntry {
    status: PackageStatus,
    manifest: Option<PackageManifest>,
    error_message: Option<String>,
    dev_mode: bool,
    builder: Option<String>,
}

impl PackageEntry {
    fn new(dev_mode: bool) -> Self {
        Self { status: PackageStatus::Pending, manifest: None, error_message: None, dev_mode, builder: None }
    }

    fn snapshot(&self, location: &PackageLocation) -> PackageSnapshot {
        PackageSnapshot {
            location: location.clone(),
            status: self.status,
            manifest: self.manifest.clone(),
            error_message: self.error_message.clone(),
            dev_mode: self.dev_mode,
            builder: self.builder.clone(),
        }
    }
}

/// Package-level state machine.
///
/// Resolves packages through the definition builder chain, diffs their plugin
/// lists against the previous manifest and applies the result to the plugin
/// registry. Emits `ready`, `error` and `removed` package events.
pub struct PluginPackageRegistry {
    packages: Mutex<BTreeMap<PackageLocation, PackageEntry>>,
    plugins: Arc<PluginRegistry>,
    builders: DefinitionBuilderChain,
    builds: Option<BuildOrchestrator>,
    events: EventDispatcher<PackageEvent>,
}

impl fmt::Debug for PluginPackageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginPackageRegistry")
            .field("packages", &self.packages().keys().cloned().collect::<Vec<_>>())
            .field("builders", &self.builders)
            .finish_non_exhaustive()
    }
}

impl PluginPackageRegistry {
    pub fn new(plugins: Arc<PluginRegistry>, builders: DefinitionBuilderChain, builds: Option<BuildOrchestrator>) -> Self {
        Self { packages: Mutex::new(BTreeMap::new()), plugins, builders, builds, events: EventDispatcher::new() }
    }

    fn packages(&self) -> MutexGuard<'_, BTreeMap<PackageLocation, PackageEntry>> {
        self.packages.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn events(&self) -> &EventDispatcher<PackageEvent> {
        &self.events
    }

    pub fn plugins(&self) -> &Arc<PluginRegistry> {
        &self.plugins
    }

    pub fn list(&self) -> Vec<PackageSnapshot> {
        self.packages().iter().map(|(location, entry)| entry.snapshot(location)).collect()
    }

    pub fn get(&self, location: &PackageLocation) -> Option<PackageSnapshot> {
        self.packages().get(location).map(|entry| entry.snapshot(location))
    }

    pub fn status(&self, location: &PackageLocation) -> Option<PackageStatus> {
        self.packages().get(location).map(|entry| entry.status)
    }

    /// Register a package explicitly and resolve it
    pub async fn register_package(&self, location: PackageLocation, dev_mode: bool) -> Option<PackageSnapshot> {
        self.discover(location.clone(), dev_mode).await;
        self.get(&location)
    }

    /// Remove a package and destroy its plugins
    pub async fn unregister_package(&self, location: &PackageLocation) -> Result<Vec<String>, PackageSystemError> {
        if !self.packages().contains_key(location) {
            return Err(PackageSystemError::UnknownPackage(location.to_string()));
        }
        Ok(self.remove_package(location).await)
    }

    /// Apply one watcher event
    pub async fn handle_watch_event(&self, event: WatchEvent) {
        debug!("Package event {:?} for '{}'", event.kind, event.location);
        match event.kind {
            ChangeKind::Discovered => self.discover(event.location, event.dev_mode).await,
            ChangeKind::Changed => self.changed(event.location, event.dev_mode).await,
            ChangeKind::Removed => {
                self.remove_package(&event.location).await;
            }
        }
    }

    /// Apply the outcome of a dev build
    pub async fn handle_build_outcome(&self, outcome: BuildOutcome) {
        if !self.packages().contains_key(&outcome.location) {
            debug!("Ignoring build outcome for unknown package '{}'", outcome.location);
            return;
        }
        if outcome.success {
            self.resolve(&outcome.location).await;
        } else {
            let error = PackageSystemError::BuildFailed { location: outcome.location.to_string(), output: outcome.output };
            self.fail(&outcome.location, error.to_string());
        }
    }

    async fn discover(&self, location: PackageLocation, dev_mode: bool) {
        {
            let mut packages = self.packages();
            let entry = packages.entry(location.clone()).or_insert_with(|| PackageEntry::new(dev_mode));
            entry.dev_mode = dev_mode;
            entry.status = PackageStatus::Pending;
        }
        self.resolve(&location).await;
    }

    async fn changed(&self, location: PackageLocation, dev_mode: bool) {
        let build = {
            let mut packages = self.packages();
            let entry = packages.entry(location.clone()).or_insert_with(|| PackageEntry::new(dev_mode));
            entry.dev_mode = dev_mode;
            let script = entry.manifest.as_ref().and_then(|m| m.dev_build_script.clone());
            match (dev_mode, script, location.local_path(), &self.builds) {
                (true, Some(script), Some(dir), Some(builds)) => {
                    entry.status = PackageStatus::Building;
                    Some((builds.clone(), dir.to_path_buf(), script))
                }
                _ => None,
            }
        };
        match build {
            Some((builds, dir, script)) => builds.request_build(dir, script),
            None => self.resolve(&location).await,
        }
    }

    /// Run the definition builder chain and apply the result
    pub async fn resolve(&self, location: &PackageLocation) {
        let hints = {
            let packages = self.packages();
            DefinitionHints { dev_mode: packages.get(location).is_some_and(|e| e.dev_mode) }
        };
        match self.builders.resolve(location, &hints).await {
            Ok((builder, manifest)) => {
                if let Err(e) = self.apply_manifest(location, builder, manifest).await {
                    self.fail(location, e.to_string());
                }
            }
            Err(e) => self.fail(location, e.to_string()),
        }
    }

    async fn apply_manifest(
        &self,
        location: &PackageLocation,
        builder: String,
        manifest: PackageManifest,
    ) -> Result<(), PackageSystemError> {
        for declaration in &manifest.plugins {
            if let Some(owner) = self.plugins.owner_of(&declaration.name) {
                if &owner != location {
                    return Err(PackageSystemError::DuplicatePluginName {
                        plugin: declaration.name.clone(),
                        owner: owner.to_string(),
                    });
                }
            }
        }

        let previous = self.packages().get(location).and_then(|e| e.manifest.clone());
        let diff = ManifestDiff::between(previous.as_ref(), &manifest);

        self.plugins.remove_plugins(&diff.removed).await;

        let mut to_load = Vec::new();
        let mut replaced = Vec::new();
        for name in diff.updated.iter().chain(&diff.added) {
            let Some(declaration) = manifest.plugin(name).cloned() else { continue };
            if self.plugins.contains(name) {
                // Updated, or added but left behind by an earlier resolution that failed midway.
                replaced.push(declaration);
            } else {
                self.plugins.register(location.clone(), declaration).map_err(|e| registration_error(location, e))?;
                to_load.push(name.clone());
            }
        }
        if !replaced.is_empty() {
            match self.plugins.update_plugins(replaced).await {
                Ok(report) => debug!("Updated plugins of '{}': {:?}", manifest.name, report),
                Err(e) => warn!("Updating plugins of '{}' failed: {}", manifest.name, e),
            }
        }
        // Unchanged plugins that are not loaded get another attempt.
        to_load.extend(
            diff.unchanged
                .iter()
                .filter(|name| self.plugins.status(name) != Some(PluginStatus::Loaded))
                .cloned(),
        );
        let report = self.plugins.load_plugins(to_load).await;
        if !report.is_clean() {
            debug!("Package '{}' load report: {:?}", manifest.name, report);
        }

        info!(
            "Package '{}' {} ready from '{}' (+{} ~{} -{})",
            manifest.name,
            manifest.version,
            location,
            diff.added.len(),
            diff.updated.len(),
            diff.removed.len()
        );
        let package_name = manifest.name.clone();
        {
            let mut packages = self.packages();
            let entry = packages.entry(location.clone()).or_insert_with(|| PackageEntry::new(false));
            entry.status = PackageStatus::Ready;
            entry.manifest = Some(manifest);
            entry.error_message = None;
            entry.builder = Some(builder);
        }
        self.events.emit(&PackageEvent::ready(location.clone(), package_name, diff.added, diff.updated, diff.removed));
        Ok(())
    }

    /// Put a package into error; the previous manifest is kept
    fn fail(&self, location: &PackageLocation, message: String) {
        warn!("Package '{}' failed: {}", location, message);
        let package_name = {
            let mut packages = self.packages();
            let entry = packages.entry(location.clone()).or_insert_with(|| PackageEntry::new(false));
            entry.status = PackageStatus::Error;
            entry.error_message = Some(message.clone());
            entry.manifest.as_ref().map(|m| m.name.clone())
        };
        self.events.emit(&PackageEvent::error(location.clone(), package_name, message));
    }

    /// Delete a package, unloading and destroying every plugin it owns
    async fn remove_package(&self, location: &PackageLocation) -> Vec<String> {
        let Some(entry) = self.packages().remove(location) else {
            debug!("Removal of unknown package '{}' ignored", location);
            return Vec::new();
        };
        let owned = self.plugins.plugins_of(location);
        let unloaded = self.plugins.remove_plugins(&owned).await;
        info!("Package '{}' removed ({} plugin(s) destroyed, {} unloaded)", location, owned.len(), unloaded.len());
        let package_name = entry.manifest.map(|m| m.name);
        self.events.emit(&PackageEvent::removed(location.clone(), package_name, owned.clone()));
        owned
    }
}

fn registration_error(location: &PackageLocation, error: PluginSystemError) -> PackageSystemError {
    match error {
        PluginSystemError::DuplicatePlugin { name, owner } => PackageSystemError::DuplicatePluginName { plugin: name, owner },
        other => PackageSystemError::manifest(location, other.to_string()),
    }
}
