use async_trait::async_trait;

use plinth_core::config::ConfigData;
use plinth_core::plugin_system::{BoxError, Loader, PluginContextHolder, PluginInfo};

/// Stand-in loader that accepts every plugin of its type and holds no state.
///
/// Lets the command line exercise discovery, ordering and reloads without any
/// real plugin runtime behind it.
#[derive(Debug)]
pub struct InertLoader {
    name: String,
}

impl InertLoader {
    pub fn new(plugin_type: &str) -> Self {
        Self { name: format!("inert:{}", plugin_type) }
    }
}

#[async_trait]
impl Loader for InertLoader {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self, plugin: &PluginInfo, config: &ConfigData, context: &PluginContextHolder) -> Result<(), BoxError> {
        context.logger(&plugin.name).info(&format!("loaded with {} config key(s)", config.len()));
        Ok(())
    }

    async fn unload(&self, plugin: &PluginInfo) -> Result<(), BoxError> {
        log::debug!("{} unloading '{}'", self.name, plugin.name);
        Ok(())
    }
}
