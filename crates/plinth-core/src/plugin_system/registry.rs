use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use futures::future::join_all;
use log::{debug, info, warn};
use serde::Serialize;

use crate::config::ConfigData;
use crate::event::{EventDispatcher, PluginEvent};
use crate::package_system::location::PackageLocation;
use crate::package_system::manifest::PluginDeclaration;
use crate::plugin_system::dependency::{DependencyError, DependencyGraph};
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::loader::LoaderDispatcher;
use crate::plugin_system::plugin::{PluginEntry, PluginInfo, PluginSnapshot, PluginStatus};

type Result<T> = std::result::Result<T, PluginSystemError>;

/// What happened to the plugins of one load batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// Loaded in this batch, in load order
    pub loaded: Vec<String>,
    /// Still pending, parked on dependencies that are not loaded
    pub parked: Vec<String>,
    /// `(plugin, error message)`
    pub failed: Vec<(String, String)>,
    /// Skipped because they are on the ignore list
    pub ignored: Vec<String>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.parked.is_empty()
    }
}

enum LoadOutcome {
    /// Loaded; carries the pending plugins that were parked on it
    Loaded(Vec<String>),
    Parked,
    Failed(String),
    Skipped,
}

#[derive(Debug, Default)]
struct RegistryState {
    plugins: BTreeMap<String, PluginEntry>,
    /// dependency name -> pending plugins parked on it
    waiting: BTreeMap<String, BTreeSet<String>>,
    /// external configuration overrides by plugin name
    overrides: HashMap<String, ConfigData>,
    /// loaded, but the `loaded` event is still being emitted
    announcing: HashSet<String>,
}

impl RegistryState {
    fn graph(&self) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for (name, entry) in &self.plugins {
            graph.add(name, &entry.declaration.requires);
        }
        graph
    }

    fn unpark(&mut self, name: &str) {
        for waiters in self.waiting.values_mut() {
            waiters.remove(name);
        }
        self.waiting.retain(|_, waiters| !waiters.is_empty());
    }

    fn park(&mut self, name: &str, on: &str) {
        self.waiting.entry(on.to_string()).or_default().insert(name.to_string());
    }

    fn waiting_on(&self, name: &str) -> Vec<String> {
        self.waiting
            .iter()
            .filter(|(_, waiters)| waiters.contains(name))
            .map(|(dependency, _)| dependency.clone())
            .collect()
    }

    fn is_loaded(&self, name: &str) -> bool {
        self.plugins.get(name).is_some_and(|entry| entry.status == PluginStatus::Loaded)
    }

    /// Loaded and announced; only then may dependents load on top of it
    fn can_depend_on(&self, name: &str) -> bool {
        self.is_loaded(name) && !self.announcing.contains(name)
    }
}

/// Tracks every plugin by name and drives its lifecycle through the loader dispatcher.
///
/// Loads respect `requires`: a plugin whose dependencies are not loaded is
/// parked on them and retried once they load. Unloading a plugin first unloads
/// its loaded dependents, which are parked on it in turn. Transitions of one
/// plugin name are serialized; different names proceed concurrently.
pub struct PluginRegistry {
    state: Mutex<RegistryState>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    loaders: Arc<LoaderDispatcher>,
    events: EventDispatcher<PluginEvent>,
    ignored: HashSet<String>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names())
            .field("ignored", &self.ignored)
            .finish_non_exhaustive()
    }
}

impl PluginRegistry {
    pub fn new(loaders: Arc<LoaderDispatcher>) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            locks: Mutex::new(HashMap::new()),
            loaders,
            events: EventDispatcher::new(),
            ignored: HashSet::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Plugins with these names are never scheduled for load
    pub fn with_ignored<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored.extend(names.into_iter().map(Into::into));
        self
    }

    /// Preset external configuration overrides
    pub fn with_overrides(self, overrides: HashMap<String, ConfigData>) -> Self {
        self.lock_state().overrides.extend(overrides);
        self
    }

    fn lock_state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn name_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(name.to_string()).or_default())
    }

    fn fresh_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn events(&self) -> &EventDispatcher<PluginEvent> {
        &self.events
    }

    pub fn loaders(&self) -> &Arc<LoaderDispatcher> {
        &self.loaders
    }

    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignored.contains(name)
    }

    // --- Queries ---

    pub fn names(&self) -> Vec<String> {
        self.lock_state().plugins.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock_state().plugins.contains_key(name)
    }

    pub fn status(&self, name: &str) -> Option<PluginStatus> {
        self.lock_state().plugins.get(name).map(|entry| entry.status)
    }

    pub fn owner_of(&self, name: &str) -> Option<PackageLocation> {
        self.lock_state().plugins.get(name).map(|entry| entry.package.clone())
    }

    /// Names of the plugins registered by `package`
    pub fn plugins_of(&self, package: &PackageLocation) -> Vec<String> {
        self.lock_state()
            .plugins
            .iter()
            .filter(|(_, entry)| &entry.package == package)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn snapshot(&self, name: &str) -> Option<PluginSnapshot> {
        let state = self.lock_state();
        state.plugins.get(name).map(|entry| entry.snapshot(state.waiting_on(name)))
    }

    pub fn snapshots(&self) -> Vec<PluginSnapshot> {
        let state = self.lock_state();
        state.plugins.iter().map(|(name, entry)| entry.snapshot(state.waiting_on(name))).collect()
    }

    /// Pending plugins parked on `dependency`
    pub fn parked_on(&self, dependency: &str) -> Vec<String> {
        self.lock_state()
            .waiting
            .get(dependency)
            .map(|waiters| waiters.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn overrides_for(&self, name: &str) -> ConfigData {
        self.lock_state().overrides.get(name).cloned().unwrap_or_default()
    }

    // --- Registration ---

    /// Add a pending plugin owned by `package`; names are unique across the registry
    pub fn register(&self, package: PackageLocation, declaration: PluginDeclaration) -> Result<u64> {
        let mut state = self.lock_state();
        if let Some(existing) = state.plugins.get(&declaration.name) {
            return Err(PluginSystemError::DuplicatePlugin {
                name: declaration.name.clone(),
                owner: existing.package.to_string(),
            });
        }
        let id = self.fresh_id();
        debug!("Registering plugin '{}' (type '{}') from '{}'", declaration.name, declaration.plugin_type, package);
        state.plugins.insert(declaration.name.clone(), PluginEntry::new(id, package, declaration));
        Ok(id)
    }

    // --- Loading ---

    /// Load a batch of plugins in dependency order.
    ///
    /// Cycle members go to error. Plugins whose dependencies are not loaded
    /// stay pending and are parked. Plugins released by a load in this batch
    /// are retried before returning.
    pub async fn load_plugins<I, S>(&self, names: I) -> LoadReport
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut report = LoadReport::default();
        let mut batch = BTreeSet::new();
        for name in names.into_iter().map(Into::into) {
            if self.ignored.contains(&name) {
                debug!("Plugin '{}' is ignored; not scheduling", name);
                report.ignored.push(name);
            } else {
                batch.insert(name);
            }
        }

        while !batch.is_empty() {
            let (plan, cycles) = {
                let mut state = self.lock_state();
                batch.retain(|name| state.plugins.get(name).is_some_and(|e| e.status != PluginStatus::Loaded));
                let graph = state.graph();
                let mut cycles = BTreeMap::new();
                for name in &batch {
                    let Some(path) = graph.cycle_path(name) else { continue };
                    for member in &path {
                        if cycles.contains_key(member) {
                            continue;
                        }
                        if let Some(member_path) = graph.cycle_path(member) {
                            cycles.insert(member.clone(), DependencyError::CyclicDependency(member_path).to_string());
                        }
                    }
                }
                for (name, message) in &cycles {
                    if let Some(entry) = state.plugins.get_mut(name) {
                        entry.set_error(message.clone());
                    }
                    state.unpark(name);
                }
                batch.retain(|name| !cycles.contains_key(name));
                (graph.load_waves(&batch), cycles)
            };
            for (name, message) in cycles {
                warn!("Plugin '{}' not loaded: {}", name, message);
                report.failed.push((name, message));
            }

            let mut released = BTreeSet::new();
            for wave in plan.waves.into_iter().chain(std::iter::once(plan.blocked)) {
                if wave.is_empty() {
                    continue;
                }
                let outcomes = join_all(wave.iter().map(|name| self.load_one(name))).await;
                for (name, outcome) in wave.into_iter().zip(outcomes) {
                    match outcome {
                        LoadOutcome::Loaded(waiters) => {
                            released.extend(waiters);
                            report.loaded.push(name);
                        }
                        LoadOutcome::Parked => report.parked.push(name),
                        LoadOutcome::Failed(message) => report.failed.push((name, message)),
                        LoadOutcome::Skipped => {}
                    }
                }
            }
            batch = released;
        }

        // A parked plugin may have loaded later in the same call.
        let state = self.lock_state();
        report.parked.retain(|name| !state.is_loaded(name));
        report.parked.sort();
        report.parked.dedup();
        report
    }

    async fn load_one(&self, name: &str) -> LoadOutcome {
        let lock = self.name_lock(name);
        let _guard = lock.lock().await;

        let (info, defaults, overrides) = {
            let mut state = self.lock_state();
            let Some(entry) = state.plugins.get(name) else {
                return LoadOutcome::Skipped;
            };
            if entry.status == PluginStatus::Loaded {
                return LoadOutcome::Skipped;
            }
            let requires = entry.declaration.requires.clone();
            let missing: Vec<String> = requires.into_iter().filter(|dep| !state.can_depend_on(dep)).collect();
            state.unpark(name);
            if !missing.is_empty() {
                for dependency in &missing {
                    state.park(name, dependency);
                }
                if let Some(entry) = state.plugins.get_mut(name) {
                    entry.status = PluginStatus::Pending;
                    entry.error_message = None;
                }
                debug!("Plugin '{}' parked on {:?}", name, missing);
                return LoadOutcome::Parked;
            }
            let overrides = state.overrides.get(name).cloned().unwrap_or_default();
            let Some(entry) = state.plugins.get(name) else {
                return LoadOutcome::Skipped;
            };
            (entry.info(), entry.declaration.default_config.clone(), overrides)
        };

        let result = match self.loaders.minimum_config(&info.declaration) {
            Ok(minimum) => {
                let config = minimum.merged(&defaults).merged(&overrides);
                self.loaders.load(&info, &config).await.map(|_| config)
            }
            Err(e) => Err(e),
        };

        let outcome = {
            let mut state = self.lock_state();
            let Some(entry) = state.plugins.get_mut(name).filter(|entry| entry.id == info.id) else {
                // Removed or re-created while the loader ran.
                return LoadOutcome::Skipped;
            };
            match result {
                Ok(config) => {
                    entry.status = PluginStatus::Loaded;
                    entry.config = config;
                    entry.error_message = None;
                    entry.last_reload = Some(SystemTime::now());
                    state.announcing.insert(name.to_string());
                    LoadOutcome::Loaded(Vec::new())
                }
                Err(e) => {
                    let message = e.to_string();
                    entry.set_error(message.clone());
                    LoadOutcome::Failed(message)
                }
            }
        };

        match outcome {
            LoadOutcome::Loaded(_) => {
                info!("Plugin '{}' loaded", name);
                self.events.emit(&PluginEvent::loaded(name));
                // Dependents that checked in while the event was out parked on us.
                let mut state = self.lock_state();
                state.announcing.remove(name);
                let waiters = state.waiting.remove(name).unwrap_or_default();
                LoadOutcome::Loaded(waiters.into_iter().collect())
            }
            LoadOutcome::Failed(message) => {
                warn!("Plugin '{}' failed to load: {}", name, message);
                LoadOutcome::Failed(message)
            }
            other => other,
        }
    }

    // --- Unloading ---

    /// Unload `name` after unloading every loaded plugin that transitively
    /// requires it, dependents first. Those dependents are parked on `name`.
    ///
    /// Returns the names that were unloaded, `name` last.
    pub async fn unload_plugin(&self, name: &str) -> Result<Vec<String>> {
        let dependents = {
            let state = self.lock_state();
            if !state.plugins.contains_key(name) {
                return Err(PluginSystemError::PluginNotFound(name.to_string()));
            }
            let graph = state.graph();
            graph
                .transitive_dependents(name)
                .into_iter()
                .filter(|dependent| state.is_loaded(dependent))
                .collect::<Vec<_>>()
        };

        let mut unloaded = Vec::new();
        for dependent in dependents {
            if self.unload_one(&dependent).await? {
                unloaded.push(dependent.clone());
            }
            self.lock_state().park(&dependent, name);
        }
        if self.unload_one(name).await? {
            unloaded.push(name.to_string());
        }
        Ok(unloaded)
    }

    /// Unload a single plugin; `Ok(false)` when it was not loaded
    async fn unload_one(&self, name: &str) -> Result<bool> {
        let lock = self.name_lock(name);
        let _guard = lock.lock().await;

        let info = {
            let state = self.lock_state();
            match state.plugins.get(name) {
                Some(entry) if entry.status == PluginStatus::Loaded => entry.info(),
                Some(_) => return Ok(false),
                None => return Err(PluginSystemError::PluginNotFound(name.to_string())),
            }
        };

        let result = self.loaders.unload(&info).await;
        {
            let mut state = self.lock_state();
            if let Some(entry) = state.plugins.get_mut(name).filter(|entry| entry.id == info.id) {
                match &result {
                    Ok(()) => {
                        entry.status = PluginStatus::Pending;
                        entry.error_message = None;
                    }
                    Err(e) => entry.set_error(e.to_string()),
                }
            }
        }

        match result {
            Ok(()) => {
                info!("Plugin '{}' unloaded", name);
                self.events.emit(&PluginEvent::unloaded(name));
                Ok(true)
            }
            Err(e) => {
                warn!("Plugin '{}' failed to unload: {}", name, e);
                Ok(false)
            }
        }
    }

    /// Unload every loaded plugin, dependents before their dependencies
    pub async fn unload_all(&self) -> Vec<String> {
        let order = {
            let state = self.lock_state();
            let loaded: BTreeSet<String> =
                state.plugins.iter().filter(|(_, e)| e.status == PluginStatus::Loaded).map(|(n, _)| n.clone()).collect();
            state.graph().unload_order(&loaded)
        };
        let mut unloaded = Vec::new();
        for name in order {
            match self.unload_one(&name).await {
                Ok(true) => unloaded.push(name),
                Ok(false) => {}
                Err(e) => warn!("Skipping '{}' during shutdown: {}", name, e),
            }
        }
        info!("Unloaded {} plugin(s)", unloaded.len());
        unloaded
    }

    // --- Removal and updates ---

    /// Unload (cascading) and destroy a plugin
    pub async fn remove_plugin(&self, name: &str) -> Result<Vec<String>> {
        let unloaded = self.unload_plugin(name).await?;
        let mut state = self.lock_state();
        state.plugins.remove(name);
        state.unpark(name);
        debug!("Plugin '{}' removed", name);
        Ok(unloaded)
    }

    /// Remove several plugins, each after the plugins among them that depend on it
    pub async fn remove_plugins(&self, names: &[String]) -> Vec<String> {
        let order = {
            let set: BTreeSet<String> = names.iter().cloned().collect();
            self.lock_state().graph().unload_order(&set)
        };
        let mut unloaded = Vec::new();
        for name in order {
            match self.remove_plugin(&name).await {
                Ok(names) => unloaded.extend(names),
                Err(e) => debug!("Removing '{}': {}", name, e),
            }
        }
        unloaded
    }

    /// Apply a changed declaration; see [`update_plugins`](Self::update_plugins)
    pub async fn update_plugin(&self, declaration: PluginDeclaration) -> Result<LoadReport> {
        self.update_plugins(vec![declaration]).await
    }

    /// Apply several changed declarations as one transition.
    ///
    /// Every loaded plugin among them goes down together with its loaded
    /// dependents, dependents first. The new declarations are then swapped in
    /// and everything that went down is loaded in one batch, so a dependent
    /// changed alongside its dependency is unloaded and loaded exactly once.
    /// A changed type re-creates the plugin under a new instance id. A plugin
    /// whose unload fails stays in error and is not loaded again.
    ///
    /// Fails without touching anything if one of the names is not registered.
    pub async fn update_plugins(&self, declarations: Vec<PluginDeclaration>) -> Result<LoadReport> {
        let (changed, order) = {
            let state = self.lock_state();
            let mut changed = Vec::new();
            for declaration in declarations {
                let entry = state
                    .plugins
                    .get(&declaration.name)
                    .ok_or_else(|| PluginSystemError::PluginNotFound(declaration.name.clone()))?;
                if entry.declaration == declaration && entry.status == PluginStatus::Loaded {
                    continue;
                }
                let type_changed = entry.declaration.plugin_type != declaration.plugin_type;
                changed.push((declaration, type_changed));
            }

            let graph = state.graph();
            let mut affected = BTreeSet::new();
            for (declaration, _) in &changed {
                affected.extend(graph.transitive_dependents(&declaration.name));
                affected.insert(declaration.name.clone());
            }
            affected.retain(|name| state.is_loaded(name));
            (changed, graph.unload_order(&affected))
        };
        if changed.is_empty() {
            return Ok(LoadReport::default());
        }

        let mut unloaded = BTreeSet::new();
        let mut unload_failed = BTreeSet::new();
        for name in order {
            if self.unload_one(&name).await? {
                unloaded.insert(name);
            } else {
                unload_failed.insert(name);
            }
        }

        let mut to_load = unloaded;
        let mut failed = Vec::new();
        {
            let mut state = self.lock_state();
            for (declaration, type_changed) in changed {
                let name = declaration.name.clone();
                let fresh_id = if type_changed { Some(self.fresh_id()) } else { None };
                let Some(entry) = state.plugins.get_mut(&name) else { continue };
                entry.declaration = declaration;
                if let Some(id) = fresh_id {
                    debug!("Plugin '{}' changed type; re-created as instance {}", name, id);
                    entry.id = id;
                    entry.config = ConfigData::new();
                    entry.last_reload = None;
                }
                if unload_failed.contains(&name) {
                    failed.push((name, entry.error_message.clone().unwrap_or_default()));
                } else {
                    entry.status = PluginStatus::Pending;
                    entry.error_message = None;
                    to_load.insert(name);
                }
            }
        }

        let mut report = self.load_plugins(to_load).await;
        failed.append(&mut report.failed);
        report.failed = failed;
        Ok(report)
    }

    fn error_of(&self, name: &str) -> String {
        self.lock_state().plugins.get(name).and_then(|e| e.error_message.clone()).unwrap_or_default()
    }

    /// Replace the external configuration overrides of `name`.
    ///
    /// A loaded plugin whose resolved configuration changes is hot-replaced:
    /// exactly one unload followed by one load.
    pub async fn set_overrides(&self, name: &str, overrides: ConfigData) -> Result<LoadReport> {
        let reload = {
            let mut state = self.lock_state();
            let previous = state.overrides.insert(name.to_string(), overrides.clone()).unwrap_or_default();
            state.is_loaded(name) && previous != overrides
        };
        if !reload {
            return Ok(LoadReport::default());
        }
        info!("Configuration of plugin '{}' changed; reloading", name);
        let unloaded = self.unload_plugin(name).await?;
        if !unloaded.iter().any(|n| n == name) {
            return Ok(LoadReport { failed: vec![(name.to_string(), self.error_of(name))], ..LoadReport::default() });
        }
        Ok(self.load_plugins([name.to_string()]).await)
    }

    /// Loader-facing view of a plugin
    pub fn info(&self, name: &str) -> Option<PluginInfo> {
        self.lock_state().plugins.get(name).map(PluginEntry::info)
    }
}
