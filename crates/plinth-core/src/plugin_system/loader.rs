use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures::FutureExt;
use log::{debug, info, warn};
use serde::Serialize;

use crate::config::ConfigData;
use crate::package_system::manifest::PluginDeclaration;
use crate::plugin_system::context::PluginContextHolder;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::plugin::PluginInfo;
use crate::utils::panic_message;

/// Error type loaders report failures with
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Brings plugins of one type to life and tears them down again.
///
/// Loaders own whatever instance state they create; the runtime only tracks
/// plugin status.
#[async_trait]
pub trait Loader: Send + Sync {
    fn name(&self) -> &str;

    /// Baseline configuration, overridden by declaration defaults and external overrides
    fn generate_minimum_config(&self, _declaration: &PluginDeclaration) -> ConfigData {
        ConfigData::new()
    }

    async fn load(&self, plugin: &PluginInfo, config: &ConfigData, context: &PluginContextHolder) -> Result<(), BoxError>;

    async fn unload(&self, plugin: &PluginInfo) -> Result<(), BoxError>;
}

/// A registered loader as shown to admin tooling
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoaderInfo {
    pub plugin_type: String,
    pub name: String,
}

/// Routes plugin loads and unloads to the loader registered for the plugin's type.
///
/// Loader errors and panics come back as [`PluginSystemError::LoaderFailed`].
pub struct LoaderDispatcher {
    loaders: RwLock<HashMap<String, Arc<dyn Loader>>>,
    context: PluginContextHolder,
}

impl std::fmt::Debug for LoaderDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderDispatcher").field("loaders", &self.loader_types()).finish_non_exhaustive()
    }
}

impl LoaderDispatcher {
    pub fn new(context: PluginContextHolder) -> Self {
        Self { loaders: RwLock::new(HashMap::new()), context }
    }

    pub fn context(&self) -> &PluginContextHolder {
        &self.context
    }

    /// Register the loader for `plugin_type`, returning the one it replaced
    pub fn register_loader(&self, plugin_type: impl Into<String>, loader: Arc<dyn Loader>) -> Option<Arc<dyn Loader>> {
        let plugin_type = plugin_type.into();
        info!("Registering loader '{}' for plugin type '{}'", loader.name(), plugin_type);
        let mut loaders = self.loaders.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        loaders.insert(plugin_type, loader)
    }

    pub fn unregister_loader(&self, plugin_type: &str) -> bool {
        let mut loaders = self.loaders.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        loaders.remove(plugin_type).is_some()
    }

    pub fn has_loader(&self, plugin_type: &str) -> bool {
        self.loader_for(plugin_type).is_some()
    }

    pub fn loader_types(&self) -> Vec<String> {
        let loaders = self.loaders.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut types: Vec<String> = loaders.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn list_loaders(&self) -> Vec<LoaderInfo> {
        let loaders = self.loaders.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut list: Vec<LoaderInfo> = loaders
            .iter()
            .map(|(plugin_type, loader)| LoaderInfo { plugin_type: plugin_type.clone(), name: loader.name().to_string() })
            .collect();
        list.sort_by(|a, b| a.plugin_type.cmp(&b.plugin_type));
        list
    }

    fn loader_for(&self, plugin_type: &str) -> Option<Arc<dyn Loader>> {
        let loaders = self.loaders.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        loaders.get(plugin_type).cloned()
    }

    fn require_loader(&self, plugin: &str, plugin_type: &str) -> Result<Arc<dyn Loader>, PluginSystemError> {
        self.loader_for(plugin_type).ok_or_else(|| PluginSystemError::NoLoader {
            plugin: plugin.to_string(),
            plugin_type: plugin_type.to_string(),
        })
    }

    /// Minimum configuration the loader for `declaration`'s type asks for
    pub fn minimum_config(&self, declaration: &PluginDeclaration) -> Result<ConfigData, PluginSystemError> {
        let loader = self.require_loader(&declaration.name, &declaration.plugin_type)?;
        catch_unwind(AssertUnwindSafe(|| loader.generate_minimum_config(declaration))).map_err(|payload| {
            PluginSystemError::LoaderFailed {
                plugin: declaration.name.clone(),
                loader: loader.name().to_string(),
                operation: "configure".to_string(),
                message: format!("panicked: {}", panic_message(&*payload)),
            }
        })
    }

    pub async fn load(&self, plugin: &PluginInfo, config: &ConfigData) -> Result<(), PluginSystemError> {
        let loader = self.require_loader(&plugin.name, plugin.plugin_type())?;
        debug!("Loader '{}' loading plugin '{}' (instance {})", loader.name(), plugin.name, plugin.id);
        let result = AssertUnwindSafe(loader.load(plugin, config, &self.context)).catch_unwind().await;
        Self::check(loader.as_ref(), plugin, "load", result)
    }

    pub async fn unload(&self, plugin: &PluginInfo) -> Result<(), PluginSystemError> {
        let loader = self.require_loader(&plugin.name, plugin.plugin_type())?;
        debug!("Loader '{}' unloading plugin '{}' (instance {})", loader.name(), plugin.name, plugin.id);
        let result = AssertUnwindSafe(loader.unload(plugin)).catch_unwind().await;
        Self::check(loader.as_ref(), plugin, "unload", result)
    }

    fn check(
        loader: &dyn Loader,
        plugin: &PluginInfo,
        operation: &str,
        result: std::thread::Result<Result<(), BoxError>>,
    ) -> Result<(), PluginSystemError> {
        let message = match result {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e.to_string(),
            Err(payload) => format!("panicked: {}", panic_message(&*payload)),
        };
        warn!("Loader '{}' failed to {} plugin '{}': {}", loader.name(), operation, plugin.name, message);
        Err(PluginSystemError::LoaderFailed {
            plugin: plugin.name.clone(),
            loader: loader.name().to_string(),
            operation: operation.to_string(),
            message,
        })
    }
}
