//! Fixtures shared by the unit tests of several modules.
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::task::JoinHandle;

use crate::config::ConfigData;
use crate::package_system::build::BuildOrchestrator;
use crate::package_system::definition::{DefinitionBuilderChain, DefinitionHints, PackageDefinitionBuilder};
use crate::package_system::error::PackageSystemError;
use crate::package_system::location::PackageLocation;
use crate::package_system::manifest::{PackageManifest, PluginDeclaration};
use crate::package_system::registry::PluginPackageRegistry;
use crate::plugin_system::context::PluginContextHolder;
use crate::plugin_system::loader::{BoxError, Loader, LoaderDispatcher};
use crate::plugin_system::plugin::PluginInfo;
use crate::plugin_system::registry::PluginRegistry;

pub const TEST_TYPE: &str = "test";

#[derive(Default)]
struct Behaviour {
    failing_loads: HashSet<String>,
    failing_unloads: HashSet<String>,
    panicking_loads: HashSet<String>,
    load_delay: Option<Duration>,
}

/// Loader that records every call as `"load:<name>"` / `"unload:<name>"`
/// and can be told to fail or panic for given plugins.
#[derive(Default)]
pub struct RecordingLoader {
    calls: Mutex<Vec<String>>,
    configs: Mutex<HashMap<String, ConfigData>>,
    behaviour: Mutex<Behaviour>,
    minimum: Mutex<ConfigData>,
    /// plugin name -> loader calls currently running for it
    in_flight: Mutex<HashMap<String, usize>>,
    overlapped: Mutex<HashSet<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RecordingLoader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_load(&self, name: &str) {
        lock(&self.behaviour).failing_loads.insert(name.to_string());
    }

    pub fn fail_unload(&self, name: &str) {
        lock(&self.behaviour).failing_unloads.insert(name.to_string());
    }

    pub fn panic_on_load(&self, name: &str) {
        lock(&self.behaviour).panicking_loads.insert(name.to_string());
    }

    pub fn heal(&self) {
        let mut behaviour = lock(&self.behaviour);
        behaviour.failing_loads.clear();
        behaviour.failing_unloads.clear();
        behaviour.panicking_loads.clear();
    }

    pub fn set_load_delay(&self, delay: Duration) {
        lock(&self.behaviour).load_delay = Some(delay);
    }

    pub fn set_minimum(&self, config: ConfigData) {
        *lock(&self.minimum) = config;
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    pub fn count(&self, call: &str) -> usize {
        lock(&self.calls).iter().filter(|c| c.as_str() == call).count()
    }

    /// Position of `call` in the call log
    pub fn position(&self, call: &str) -> Option<usize> {
        lock(&self.calls).iter().position(|c| c == call)
    }

    pub fn config_of(&self, name: &str) -> Option<ConfigData> {
        lock(&self.configs).get(name).cloned()
    }

    /// Whether two loader calls for `name` ever ran at the same time
    pub fn overlapped(&self, name: &str) -> bool {
        lock(&self.overlapped).contains(name)
    }

    fn enter(&self, name: &str) {
        let mut in_flight = lock(&self.in_flight);
        let running = in_flight.entry(name.to_string()).or_default();
        *running += 1;
        if *running > 1 {
            lock(&self.overlapped).insert(name.to_string());
        }
    }

    fn leave(&self, name: &str) {
        if let Some(running) = lock(&self.in_flight).get_mut(name) {
            *running = running.saturating_sub(1);
        }
    }
}

#[async_trait]
impl Loader for RecordingLoader {
    fn name(&self) -> &str {
        "recording"
    }

    fn generate_minimum_config(&self, _declaration: &PluginDeclaration) -> ConfigData {
        lock(&self.minimum).clone()
    }

    async fn load(&self, plugin: &PluginInfo, config: &ConfigData, _context: &PluginContextHolder) -> Result<(), BoxError> {
        let (fails, panics, delay) = {
            let behaviour = lock(&self.behaviour);
            (
                behaviour.failing_loads.contains(&plugin.name),
                behaviour.panicking_loads.contains(&plugin.name),
                behaviour.load_delay,
            )
        };
        lock(&self.calls).push(format!("load:{}", plugin.name));
        self.enter(&plugin.name);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.leave(&plugin.name);
        if panics {
            panic!("loader exploded on {}", plugin.name);
        }
        if fails {
            return Err(format!("cannot load {}", plugin.name).into());
        }
        lock(&self.configs).insert(plugin.name.clone(), config.clone());
        Ok(())
    }

    async fn unload(&self, plugin: &PluginInfo) -> Result<(), BoxError> {
        lock(&self.calls).push(format!("unload:{}", plugin.name));
        self.enter(&plugin.name);
        tokio::task::yield_now().await;
        self.leave(&plugin.name);
        if lock(&self.behaviour).failing_unloads.contains(&plugin.name) {
            return Err(format!("cannot unload {}", plugin.name).into());
        }
        Ok(())
    }
}

/// A plugin registry whose `test` type is served by a fresh recording loader
pub fn recording_registry() -> (Arc<PluginRegistry>, Arc<RecordingLoader>) {
    let loader = RecordingLoader::new();
    let dispatcher = Arc::new(LoaderDispatcher::new(PluginContextHolder::default()));
    dispatcher.register_loader(TEST_TYPE, loader.clone());
    (Arc::new(PluginRegistry::new(dispatcher)), loader)
}

pub fn local(name: &str) -> PackageLocation {
    PackageLocation::Local(PathBuf::from("/packages").join(name))
}

/// Write `plinth.json` into `dir`, creating it if needed
pub fn write_manifest(dir: &Path, body: &str) {
    fs::create_dir_all(dir).expect("create package dir");
    fs::write(dir.join("plinth.json"), body).expect("write manifest");
}

/// A JSON manifest with `test`-typed plugins given as `(name, requires)`
pub fn manifest_json(package: &str, version: &str, plugins: &[(&str, &[&str])]) -> String {
    let plugins: Vec<serde_json::Value> = plugins
        .iter()
        .map(|(name, requires)| serde_json::json!({ "name": name, "type": TEST_TYPE, "requires": requires }))
        .collect();
    serde_json::json!({ "name": package, "version": version, "plugins": plugins }).to_string()
}

/// Poll `condition` until it holds or two seconds pass
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// A manifest for `location` with `test`-typed plugins given as `(name, requires)`
pub fn manifest(package: &str, location: &PackageLocation, plugins: &[(&str, &[&str])]) -> PackageManifest {
    PackageManifest {
        name: package.to_string(),
        version: semver::Version::new(1, 0, 0),
        homepage: None,
        author: None,
        license: None,
        description: None,
        location: location.clone(),
        dev_build_script: None,
        plugins: plugins
            .iter()
            .map(|(name, requires)| PluginDeclaration::new(*name, TEST_TYPE).requiring(requires.iter().copied()))
            .collect(),
    }
}

/// Definition builder answering from an in-memory table
#[derive(Default)]
pub struct StaticDefinitions {
    table: Mutex<HashMap<PackageLocation, Result<PackageManifest, String>>>,
    calls: Mutex<usize>,
}

impl StaticDefinitions {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, manifest: PackageManifest) {
        lock(&self.table).insert(manifest.location.clone(), Ok(manifest));
    }

    pub fn fail(&self, location: &PackageLocation, message: &str) {
        lock(&self.table).insert(location.clone(), Err(message.to_string()));
    }

    pub fn remove(&self, location: &PackageLocation) {
        lock(&self.table).remove(location);
    }

    pub fn calls(&self) -> usize {
        *lock(&self.calls)
    }
}

#[async_trait]
impl PackageDefinitionBuilder for StaticDefinitions {
    fn name(&self) -> &str {
        "static"
    }

    async fn build_definition(
        &self,
        location: &PackageLocation,
        _hints: &DefinitionHints,
    ) -> Result<Option<PackageManifest>, PackageSystemError> {
        *lock(&self.calls) += 1;
        match lock(&self.table).get(location) {
            Some(Ok(manifest)) => Ok(Some(manifest.clone())),
            Some(Err(message)) => Err(PackageSystemError::manifest(location, message.clone())),
            None => Ok(None),
        }
    }
}

/// A package registry over a recording plugin registry and a static definition table
pub fn package_registry(
    builds: Option<BuildOrchestrator>,
) -> (Arc<PluginPackageRegistry>, Arc<StaticDefinitions>, Arc<RecordingLoader>) {
    let (plugins, loader) = recording_registry();
    let definitions = StaticDefinitions::new();
    let mut chain = DefinitionBuilderChain::new();
    chain.register(definitions.clone());
    (Arc::new(PluginPackageRegistry::new(plugins, chain, builds)), definitions, loader)
}

type SharedBody = Arc<Mutex<Option<String>>>;

/// Local HTTP server publishing one package document at `/package.json`.
///
/// Answers 404 until a body is set, and again after it is cleared.
pub struct DescriptorServer {
    body: SharedBody,
    url: String,
    task: JoinHandle<()>,
}

impl DescriptorServer {
    pub async fn start() -> Self {
        let body: SharedBody = Arc::new(Mutex::new(None));
        let app = Router::new().route("/package.json", get(serve_descriptor)).with_state(body.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind descriptor server");
        let url = format!("http://{}/package.json", listener.local_addr().expect("server address"));
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self { body, url, task }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn location(&self) -> PackageLocation {
        PackageLocation::Remote(self.url.clone())
    }

    pub fn publish(&self, body: impl Into<String>) {
        *lock(&self.body) = Some(body.into());
    }

    pub fn withdraw(&self) {
        *lock(&self.body) = None;
    }
}

impl Drop for DescriptorServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_descriptor(State(body): State<SharedBody>) -> Response {
    let current = lock(&body).clone();
    match current {
        Some(body) => body.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
