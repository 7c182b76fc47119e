pub mod config;
pub mod event;
pub mod kernel;
pub mod package_system;
pub mod plugin_system;
pub mod utils;

// Re-export the types embedders and loaders reach for most
pub use config::{ConfigData, ConfigFormat, PackageSource, RuntimeConfig};
pub use event::{Event, EventDispatcher, PackageEvent, PluginEvent};
pub use kernel::error::Error as KernelError;
pub use kernel::{KernelComponent, Runtime, RuntimeBuilder};
pub use package_system::{PackageLocation, PackageManifest, PackageStatus, PluginDeclaration, PluginPackageRegistry};
pub use plugin_system::{
    BootstrapLoader, BoxError, Capability, Loader, PluginContextHolder, PluginInfo, PluginRegistry, PluginService,
    PluginStatus,
};
