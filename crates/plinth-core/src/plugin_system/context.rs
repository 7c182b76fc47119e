use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use serde::Serialize;

use crate::config::ConfigData;
use crate::kernel::constants::{APP_NAME, APP_VERSION};

/// Snapshot of the hosting server handed to every plugin
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub started_at: SystemTime,
}

impl ServerInfo {
    /// Build from the opaque server configuration; `name` falls back to the application name
    pub fn from_config(server: &ConfigData) -> Self {
        Self {
            name: server.get::<String>("name").unwrap_or_else(|| APP_NAME.to_string()),
            version: APP_VERSION.to_string(),
            started_at: SystemTime::now(),
        }
    }
}

/// Logger handed to plugins; records go to the `log` facade under `plugin::<name>`
#[derive(Debug, Clone)]
pub struct PluginLogger {
    target: String,
}

impl PluginLogger {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn debug(&self, message: &str) {
        log::debug!(target: self.target.as_str(), "{}", message);
    }

    pub fn info(&self, message: &str) {
        log::info!(target: self.target.as_str(), "{}", message);
    }

    pub fn warn(&self, message: &str) {
        log::warn!(target: self.target.as_str(), "{}", message);
    }

    pub fn error(&self, message: &str) {
        log::error!(target: self.target.as_str(), "{}", message);
    }
}

type ServiceMap = HashMap<String, Arc<dyn Any + Send + Sync>>;

struct ContextInner {
    server_info: ServerInfo,
    server_config: ConfigData,
    services: RwLock<ServiceMap>,
}

/// Shared context passed to loaders and bootstrap functions.
///
/// Cheap to clone; every clone sees the same service map.
#[derive(Clone)]
pub struct PluginContextHolder {
    inner: Arc<ContextInner>,
}

impl std::fmt::Debug for PluginContextHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContextHolder")
            .field("server_info", &self.inner.server_info)
            .field("services", &self.service_names())
            .finish()
    }
}

impl Default for PluginContextHolder {
    fn default() -> Self {
        Self::new(ConfigData::new())
    }
}

impl PluginContextHolder {
    pub fn new(server_config: ConfigData) -> Self {
        let server_info = ServerInfo::from_config(&server_config);
        Self {
            inner: Arc::new(ContextInner { server_info, server_config, services: RwLock::new(HashMap::new()) }),
        }
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.inner.server_info
    }

    pub fn server_config(&self) -> &ConfigData {
        &self.inner.server_config
    }

    pub fn logger(&self, plugin_name: &str) -> PluginLogger {
        PluginLogger { target: format!("plugin::{}", plugin_name) }
    }

    /// Publish a service under `key`, returning whether one was replaced
    pub fn provide_service<T: Any + Send + Sync>(&self, key: impl Into<String>, service: Arc<T>) -> bool {
        let mut services = self.inner.services.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        services.insert(key.into(), service).is_some()
    }

    /// Look up a service by key and concrete type
    pub fn service<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let services = self.inner.services.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        services.get(key).cloned().and_then(|service| service.downcast::<T>().ok())
    }

    pub fn remove_service(&self, key: &str) -> bool {
        let mut services = self.inner.services.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        services.remove(key).is_some()
    }

    pub fn service_names(&self) -> Vec<String> {
        let services = self.inner.services.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut names: Vec<String> = services.keys().cloned().collect();
        names.sort();
        names
    }
}
