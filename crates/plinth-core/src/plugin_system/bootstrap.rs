use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use async_trait::async_trait;
use log::{debug, warn};

use crate::config::ConfigData;
use crate::plugin_system::context::PluginContextHolder;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::loader::{BoxError, Loader};
use crate::plugin_system::plugin::PluginInfo;

/// A live plugin instance created by a bootstrap function
#[async_trait]
pub trait Capability: Send + Sync {
    /// Release resources held by the instance; called when it is unloaded or replaced
    async fn shutdown(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

pub type BootstrapFuture = Pin<Box<dyn Future<Output = Result<Arc<dyn Capability>, BoxError>> + Send>>;

/// `(plugin_name, resolved_config, context) -> capability instance`
pub type BootstrapFn = Arc<dyn Fn(String, ConfigData, PluginContextHolder) -> BootstrapFuture + Send + Sync>;

/// Loader backed by a table of named bootstrap functions.
///
/// The function is picked by the declaration's `bootstrap` reference, falling
/// back to the plugin name. One instance is kept per plugin name; loading
/// again replaces it and shuts the previous one down.
pub struct BootstrapLoader {
    name: String,
    functions: RwLock<HashMap<String, BootstrapFn>>,
    instances: Mutex<HashMap<String, Arc<dyn Capability>>>,
}

impl std::fmt::Debug for BootstrapLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapLoader")
            .field("name", &self.name)
            .field("instances", &self.instance_names())
            .finish_non_exhaustive()
    }
}

impl BootstrapLoader {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), functions: RwLock::new(HashMap::new()), instances: Mutex::new(HashMap::new()) }
    }

    /// Register a bootstrap function under `reference`
    pub fn register<F, Fut>(&self, reference: impl Into<String>, function: F)
    where
        F: Fn(String, ConfigData, PluginContextHolder) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn Capability>, BoxError>> + Send + 'static,
    {
        let function: BootstrapFn = Arc::new(move |name: String, config: ConfigData, context: PluginContextHolder| {
            Box::pin(function(name, config, context)) as BootstrapFuture
        });
        let mut functions = self.functions.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        functions.insert(reference.into(), function);
    }

    fn instances(&self) -> MutexGuard<'_, HashMap<String, Arc<dyn Capability>>> {
        self.instances.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The live instance for `plugin_name`, if loaded
    pub fn instance(&self, plugin_name: &str) -> Option<Arc<dyn Capability>> {
        self.instances().get(plugin_name).cloned()
    }

    pub fn instance_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.instances().keys().cloned().collect();
        names.sort();
        names
    }

    fn function_for(&self, plugin: &PluginInfo) -> Result<BootstrapFn, PluginSystemError> {
        let reference = plugin.declaration.bootstrap.as_deref().unwrap_or(&plugin.name);
        let functions = self.functions.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        functions.get(reference).cloned().ok_or_else(|| PluginSystemError::BootstrapError {
            plugin: plugin.name.clone(),
            message: format!("unknown bootstrap function '{}'", reference),
        })
    }
}

#[async_trait]
impl Loader for BootstrapLoader {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self, plugin: &PluginInfo, config: &ConfigData, context: &PluginContextHolder) -> Result<(), BoxError> {
        let function = self.function_for(plugin)?;
        let instance = function(plugin.name.clone(), config.clone(), context.clone()).await?;
        let previous = self.instances().insert(plugin.name.clone(), instance);
        if let Some(previous) = previous {
            debug!("Replacing instance of plugin '{}'", plugin.name);
            if let Err(e) = previous.shutdown().await {
                warn!("Shutting down replaced instance of '{}' failed: {}", plugin.name, e);
            }
        }
        Ok(())
    }

    async fn unload(&self, plugin: &PluginInfo) -> Result<(), BoxError> {
        let instance = self.instances().remove(&plugin.name);
        match instance {
            Some(instance) => instance.shutdown().await,
            None => Ok(()),
        }
    }
}
