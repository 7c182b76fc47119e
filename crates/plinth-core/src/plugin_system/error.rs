//! # Plinth Core Plugin System Errors
//!
//! [`PluginSystemError`] is returned by the plugin registry, the loader
//! dispatcher and the bootstrap loader. Errors raised while loading a plugin
//! are also recorded on the plugin itself as its error message.

#[derive(Debug, thiserror::Error)]
pub enum PluginSystemError {
    #[error("Plugin '{name}' is already registered by package '{owner}'")]
    DuplicatePlugin { name: String, owner: String },

    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    #[error("no loader for type {plugin_type}")]
    NoLoader { plugin: String, plugin_type: String },

    #[error("Loader '{loader}' failed to {operation} plugin '{plugin}': {message}")]
    LoaderFailed {
        plugin: String,
        loader: String,
        operation: String,
        message: String,
    },

    #[error("Bootstrap error for plugin '{plugin}': {message}")]
    BootstrapError { plugin: String, message: String },
}
