use std::sync::Arc;

use crate::event::{EventId, PackageEvent, PluginEvent, PluginEventKind};
use crate::package_system::location::PackageLocation;
use crate::package_system::registry::{PackageSnapshot, PluginPackageRegistry};
use crate::plugin_system::loader::LoaderInfo;
use crate::plugin_system::plugin::PluginSnapshot;
use crate::plugin_system::registry::PluginRegistry;

/// Read-only facade over the runtime for capabilities and admin tooling
#[derive(Clone)]
pub struct PluginService {
    plugins: Arc<PluginRegistry>,
    packages: Arc<PluginPackageRegistry>,
}

impl std::fmt::Debug for PluginService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginService").finish_non_exhaustive()
    }
}

impl PluginService {
    pub fn new(packages: Arc<PluginPackageRegistry>) -> Self {
        Self { plugins: Arc::clone(packages.plugins()), packages }
    }

    pub fn list_plugins(&self) -> Vec<PluginSnapshot> {
        self.plugins.snapshots()
    }

    pub fn list_packages(&self) -> Vec<PackageSnapshot> {
        self.packages.list()
    }

    pub fn list_loaders(&self) -> Vec<LoaderInfo> {
        self.plugins.loaders().list_loaders()
    }

    pub fn plugin(&self, name: &str) -> Option<PluginSnapshot> {
        self.plugins.snapshot(name)
    }

    pub fn package(&self, location: &PackageLocation) -> Option<PackageSnapshot> {
        self.packages.get(location)
    }

    /// Run `callback` the next time `plugin_name` is loaded
    pub fn on_loaded_once<F>(&self, plugin_name: &str, callback: F)
    where
        F: FnOnce(&PluginEvent) + Send + 'static,
    {
        self.plugins.events().once(PluginEventKind::LOADED, plugin_name, callback);
    }

    /// Run `callback` the next time `plugin_name` is unloaded
    pub fn on_unload_once<F>(&self, plugin_name: &str, callback: F)
    where
        F: FnOnce(&PluginEvent) + Send + 'static,
    {
        self.plugins.events().once(PluginEventKind::UNLOADED, plugin_name, callback);
    }

    pub fn subscribe_plugins<F>(&self, handler: F) -> EventId
    where
        F: Fn(&PluginEvent) + Send + Sync + 'static,
    {
        self.plugins.events().subscribe_all(handler)
    }

    pub fn unsubscribe_plugins(&self, id: EventId) -> bool {
        self.plugins.events().unsubscribe(id)
    }

    pub fn subscribe_packages<F>(&self, handler: F) -> EventId
    where
        F: Fn(&PackageEvent) + Send + Sync + 'static,
    {
        self.packages.events().subscribe_all(handler)
    }

    pub fn unsubscribe_packages(&self, id: EventId) -> bool {
        self.packages.events().unsubscribe(id)
    }
}
