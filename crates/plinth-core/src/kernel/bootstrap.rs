use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;

use crate::config::{ConfigData, PackageSource, RuntimeConfig};
use crate::kernel::component::KernelComponent;
use crate::kernel::constants;
use crate::kernel::error::{Error, KernelLifecyclePhase, Result};
use crate::package_system::build::{BuildExecutor, BuildOrchestrator, BuildOutcome, ShellBuildExecutor};
use crate::package_system::definition::{DefinitionBuilderChain, PackageDefinitionBuilder};
use crate::package_system::location::PackageLocation;
use crate::package_system::registry::{PackageSnapshot, PluginPackageRegistry};
use crate::package_system::watcher::{PackageWatcher, WatchRoot, WatcherSettings};
use crate::plugin_system::context::PluginContextHolder;
use crate::plugin_system::loader::{Loader, LoaderDispatcher};
use crate::plugin_system::registry::{LoadReport, PluginRegistry};
use crate::plugin_system::service::PluginService;

/// Assembles a [`Runtime`] from configuration and externally supplied parts
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    base_dir: PathBuf,
    loaders: Vec<(String, Arc<dyn Loader>)>,
    builders: Vec<Arc<dyn PackageDefinitionBuilder>>,
    prepended_builders: Vec<Arc<dyn PackageDefinitionBuilder>>,
    executor: Option<Arc<dyn BuildExecutor>>,
    client: Option<reqwest::Client>,
}

impl std::fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let loader_types: Vec<&str> = self.loaders.iter().map(|(plugin_type, _)| plugin_type.as_str()).collect();
        f.debug_struct("RuntimeBuilder")
            .field("config", &self.config)
            .field("base_dir", &self.base_dir)
            .field("loaders", &loader_types)
            .field("builders", &self.builders.len())
            .field("prepended_builders", &self.prepended_builders.len())
            .finish_non_exhaustive()
    }
}

impl RuntimeBuilder {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            base_dir: PathBuf::from("."),
            loaders: Vec::new(),
            builders: Vec::new(),
            prepended_builders: Vec::new(),
            executor: None,
            client: None,
        }
    }

    /// Directory relative local package locations are resolved against
    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    /// Append package sources to the configured ones
    pub fn add_sources(mut self, sources: impl IntoIterator<Item = PackageSource>) -> Self {
        self.config.packages.extend(sources);
        self
    }

    pub fn loader(mut self, plugin_type: impl Into<String>, loader: Arc<dyn Loader>) -> Self {
        self.loaders.push((plugin_type.into(), loader));
        self
    }

    /// Add a definition builder consulted after the builtin ones
    pub fn definition_builder(mut self, builder: Arc<dyn PackageDefinitionBuilder>) -> Self {
        self.builders.push(builder);
        self
    }

    /// Add a definition builder consulted before the builtin ones
    pub fn prepend_definition_builder(mut self, builder: Arc<dyn PackageDefinitionBuilder>) -> Self {
        self.prepended_builders.push(builder);
        self
    }

    /// Replace the shell build executor
    pub fn build_executor(mut self, executor: Arc<dyn BuildExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn build(self) -> Result<Runtime> {
        log::info!("Initializing {} v{}", constants::APP_NAME, constants::APP_VERSION);
        let config = self.config;
        let client = self.client.unwrap_or_default();

        let context = PluginContextHolder::new(config.server.clone());
        let loaders = Arc::new(LoaderDispatcher::new(context.clone()));
        for (plugin_type, loader) in self.loaders {
            loaders.register_loader(plugin_type, loader);
        }

        let plugins = Arc::new(
            PluginRegistry::new(Arc::clone(&loaders))
                .with_ignored(config.ignore_plugins.iter().cloned())
                .with_overrides(config.plugins.clone()),
        );

        let mut chain = DefinitionBuilderChain::with_builtin(client.clone());
        for builder in self.builders {
            chain.register(builder);
        }
        for builder in self.prepended_builders.into_iter().rev() {
            chain.prepend(builder);
        }
        log::debug!("Definition builders: {:?}", chain.names());

        let executor = self.executor.unwrap_or_else(|| Arc::new(ShellBuildExecutor::new(config.build_runner.clone())));
        let (builds, outcomes) = BuildOrchestrator::new(executor, config.debounce());

        let packages = Arc::new(PluginPackageRegistry::new(Arc::clone(&plugins), chain, Some(builds)));

        let roots: Vec<WatchRoot> =
            config.packages.iter().map(|source| WatchRoot::from_source(source, &self.base_dir)).collect();
        if roots.is_empty() {
            log::warn!("No package sources configured");
        }
        let watcher = Arc::new(PackageWatcher::new(roots, WatcherSettings::from(&config), client));

        Ok(Runtime {
            config,
            context,
            loaders,
            plugins,
            packages,
            watcher,
            outcomes: Mutex::new(Some(outcomes)),
            event_loop: Mutex::new(None),
            initialized: AtomicBool::new(false),
        })
    }
}

/// The composition root: owns every subsystem and the event loop
pub struct Runtime {
    config: RuntimeConfig,
    context: PluginContextHolder,
    loaders: Arc<LoaderDispatcher>,
    plugins: Arc<PluginRegistry>,
    packages: Arc<PluginPackageRegistry>,
    watcher: Arc<PackageWatcher>,
    outcomes: Mutex<Option<UnboundedReceiver<BuildOutcome>>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
    initialized: AtomicBool,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("watcher", &self.watcher)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

impl Runtime {
    pub fn builder(config: RuntimeConfig) -> RuntimeBuilder {
        RuntimeBuilder::new(config)
    }

    /// Load a configuration file and prepare a builder whose relative
    /// locations resolve against the file's directory
    pub fn from_config_file(path: &Path) -> Result<RuntimeBuilder> {
        let config = RuntimeConfig::from_file(path)?;
        let base = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
        Ok(RuntimeBuilder::new(config).base_dir(base))
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn context(&self) -> &PluginContextHolder {
        &self.context
    }

    pub fn loaders(&self) -> &Arc<LoaderDispatcher> {
        &self.loaders
    }

    pub fn plugins(&self) -> &Arc<PluginRegistry> {
        &self.plugins
    }

    pub fn packages(&self) -> &Arc<PluginPackageRegistry> {
        &self.packages
    }

    pub fn service(&self) -> PluginService {
        PluginService::new(Arc::clone(&self.packages))
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        let event_loop = self.event_loop.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        event_loop.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Hot-replace a plugin's external configuration
    pub async fn update_plugin_config(&self, plugin_name: &str, overrides: ConfigData) -> Result<LoadReport> {
        Ok(self.plugins.set_overrides(plugin_name, overrides).await?)
    }

    pub async fn register_package(&self, location: PackageLocation, dev_mode: bool) -> Option<PackageSnapshot> {
        self.packages.register_package(location, dev_mode).await
    }

    pub async fn unregister_package(&self, location: &PackageLocation) -> Result<Vec<String>> {
        Ok(self.packages.unregister_package(location).await?)
    }

    /// Stop watching, unload every plugin and end the event loop
    pub async fn shutdown(&self) -> Result<()> {
        self.stop().await
    }
}

#[async_trait]
impl KernelComponent for Runtime {
    fn name(&self) -> &'static str {
        "PluginRuntime"
    }

    /// Scan every root once and resolve what was found
    async fn initialize(&self) -> Result<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Err(Error::lifecycle(KernelLifecyclePhase::Initialize, "runtime already initialized"));
        }
        let events = self.watcher.scan().await;
        for event in events {
            self.packages.handle_watch_event(event).await;
        }
        let ready = self.packages.list().iter().filter(|p| p.manifest.is_some()).count();
        log::info!("Runtime initialized: {} package(s), {} plugin(s)", ready, self.plugins.names().len());
        Ok(())
    }

    /// Spawn the event loop that applies watcher events and build outcomes in order
    async fn start(&self) -> Result<()> {
        if !self.is_initialized() {
            return Err(Error::lifecycle(KernelLifecyclePhase::Start, "runtime not initialized"));
        }
        let mut outcomes = {
            let mut slot = self.outcomes.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            slot.take().ok_or_else(|| Error::lifecycle(KernelLifecyclePhase::Start, "runtime already started"))?
        };
        let mut changes = self.watcher.start();
        let packages = Arc::clone(&self.packages);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(event) = changes.next() => packages.handle_watch_event(event).await,
                    Some(outcome) = outcomes.recv() => packages.handle_build_outcome(outcome).await,
                    else => break,
                }
            }
            log::debug!("Runtime event loop finished");
        });
        *self.event_loop.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);
        log::info!("Runtime started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.watcher.stop();
        let handle = self.event_loop.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        if let Some(handle) = handle {
            handle.abort();
        }
        let unloaded = self.plugins.unload_all().await;
        log::info!("Runtime stopped; {} plugin(s) unloaded", unloaded.len());
        Ok(())
    }
}
