use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info, warn};
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{DebouncedEvent, Debouncer, new_debouncer};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::config::{PackageSource, RuntimeConfig};
use crate::package_system::definition::fetch_body;
use crate::package_system::location::PackageLocation;
use crate::package_system::manifest::has_manifest;
use crate::utils::fs::{child_dirs, is_ignored_path, top_level_child};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Discovered,
    Changed,
    Removed,
}

/// A package-level change noticed by the watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub location: PackageLocation,
    pub kind: ChangeKind,
    pub dev_mode: bool,
}

impl WatchEvent {
    fn new(location: PackageLocation, kind: ChangeKind, dev_mode: bool) -> Self {
        Self { location, kind, dev_mode }
    }
}

/// One configured root handed to the watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRoot {
    pub location: PackageLocation,
    pub watch: bool,
    pub dev_mode: bool,
}

impl WatchRoot {
    pub fn from_source(source: &PackageSource, base: &Path) -> Self {
        Self { location: source.package_location(base), watch: source.watch, dev_mode: source.dev_mode }
    }
}

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    /// Coalescing window for native file events
    pub debounce: Duration,
    /// Reconcile interval for local roots, poll interval for remote roots
    pub poll_interval: Duration,
    /// Directory names that never count as package changes
    pub ignore: Vec<String>,
}

impl From<&RuntimeConfig> for WatcherSettings {
    fn from(config: &RuntimeConfig) -> Self {
        Self { debounce: config.debounce(), poll_interval: config.poll_interval(), ignore: config.watch_ignore.clone() }
    }
}

#[derive(Debug, Default)]
struct KnownState {
    /// local root -> package directories below it
    local: HashMap<PathBuf, BTreeSet<PathBuf>>,
    /// remote url -> digest of the last body seen
    remote: HashMap<String, u64>,
    /// local roots whose last listing failed
    unreadable: HashSet<PathBuf>,
}

struct Shared {
    settings: WatcherSettings,
    client: reqwest::Client,
    known: Mutex<KnownState>,
}

impl Shared {
    fn known(&self) -> MutexGuard<'_, KnownState> {
        self.known.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_package_dir(&self, root: &Path, dir: &Path) -> bool {
        !is_ignored_path(root, dir, &self.settings.ignore) && has_manifest(dir)
    }

    /// Package directories currently on disk below `root`
    fn discover_local(&self, root: &Path) -> BTreeSet<PathBuf> {
        if has_manifest(root) {
            self.note_readable(root);
            return BTreeSet::from([root.to_path_buf()]);
        }
        match child_dirs(root) {
            Ok(dirs) => {
                self.note_readable(root);
                dirs.into_iter().filter(|dir| self.is_package_dir(root, dir)).collect()
            }
            Err(e) => {
                self.note_unreadable(root, &e);
                BTreeSet::new()
            }
        }
    }

    /// Record a failed listing; warns only when `root` was readable before
    fn note_unreadable(&self, root: &Path, error: &io::Error) -> bool {
        let first = self.known().unreadable.insert(root.to_path_buf());
        if first {
            warn!("Failed to list package root '{}': {}", root.display(), error);
        } else {
            debug!("Package root '{}' still unreadable: {}", root.display(), error);
        }
        first
    }

    fn note_readable(&self, root: &Path) {
        if self.known().unreadable.remove(root) {
            info!("Package root '{}' is readable again", root.display());
        }
    }

    /// Diff disk against the known package set of `root`
    fn reconcile_local(&self, root: &Path, dev_mode: bool) -> Vec<WatchEvent> {
        let current = self.discover_local(root);
        let mut known = self.known();
        let previous = known.local.insert(root.to_path_buf(), current.clone()).unwrap_or_default();

        let removed = previous
            .difference(&current)
            .map(|dir| WatchEvent::new(dir.clone().into(), ChangeKind::Removed, dev_mode));
        let discovered = current
            .difference(&previous)
            .map(|dir| WatchEvent::new(dir.clone().into(), ChangeKind::Discovered, dev_mode));
        removed.chain(discovered).collect()
    }

    /// Map a batch of touched paths to package-level events, one per package
    fn touch_local(&self, root: &Path, dev_mode: bool, paths: Vec<PathBuf>) -> Vec<WatchEvent> {
        let root_is_package = self.known().local.get(root).is_some_and(|dirs| dirs.contains(root));

        let mut candidates = BTreeSet::new();
        for path in paths {
            if is_ignored_path(root, &path, &self.settings.ignore) {
                continue;
            }
            let candidate = if root_is_package { Some(root.to_path_buf()) } else { top_level_child(root, &path) };
            if let Some(candidate) = candidate {
                candidates.insert(candidate);
            }
        }

        let mut events = Vec::new();
        let mut known = self.known();
        let dirs = known.local.entry(root.to_path_buf()).or_default();
        for candidate in candidates {
            let present = has_manifest(&candidate);
            let was_known = dirs.contains(&candidate);
            let kind = match (present, was_known) {
                (true, true) => ChangeKind::Changed,
                (true, false) => {
                    dirs.insert(candidate.clone());
                    ChangeKind::Discovered
                }
                (false, true) => {
                    dirs.remove(&candidate);
                    ChangeKind::Removed
                }
                (false, false) => continue,
            };
            events.push(WatchEvent::new(candidate.into(), kind, dev_mode));
        }
        events
    }

    async fn poll_remote(&self, url: &str, dev_mode: bool) -> Option<WatchEvent> {
        let location = PackageLocation::Remote(url.to_string());
        match fetch_body(&self.client, url).await {
            Ok(Some(body)) => {
                let mut hasher = DefaultHasher::new();
                body.hash(&mut hasher);
                let digest = hasher.finish();
                let previous = self.known().remote.insert(url.to_string(), digest);
                match previous {
                    None => Some(WatchEvent::new(location, ChangeKind::Discovered, dev_mode)),
                    Some(old) if old != digest => Some(WatchEvent::new(location, ChangeKind::Changed, dev_mode)),
                    Some(_) => None,
                }
            }
            Ok(None) => self
                .known()
                .remote
                .remove(url)
                .map(|_| WatchEvent::new(location, ChangeKind::Removed, dev_mode)),
            Err(e) => {
                warn!("Polling remote package '{}' failed: {}", url, e);
                None
            }
        }
    }
}

/// Observes configured package roots and reports package-level changes.
///
/// Never parses manifests; a directory counts as a package when it holds a
/// manifest file.
pub struct PackageWatcher {
    roots: Vec<WatchRoot>,
    shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for PackageWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageWatcher")
            .field("roots", &self.roots)
            .field("settings", &self.shared.settings)
            .finish_non_exhaustive()
    }
}

impl PackageWatcher {
    pub fn new(roots: Vec<WatchRoot>, settings: WatcherSettings, client: reqwest::Client) -> Self {
        Self {
            roots,
            shared: Arc::new(Shared { settings, client, known: Mutex::new(KnownState::default()) }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn roots(&self) -> &[WatchRoot] {
        &self.roots
    }

    /// One-shot discovery pass over every root.
    ///
    /// Seeds the known state, so a later [`start`](Self::start) only reports
    /// what changed afterwards.
    pub async fn scan(&self) -> Vec<WatchEvent> {
        let mut events = Vec::new();
        for root in &self.roots {
            match &root.location {
                PackageLocation::Local(path) => events.extend(self.shared.reconcile_local(path, root.dev_mode)),
                PackageLocation::Remote(url) => events.extend(self.shared.poll_remote(url, root.dev_mode).await),
            }
        }
        info!("Initial scan found {} package(s) in {} root(s)", events.len(), self.roots.len());
        events
    }

    /// Start observing every root with `watch` enabled.
    ///
    /// Calling `start` again replaces the previous observation tasks.
    pub fn start(&self) -> UnboundedReceiverStream<WatchEvent> {
        self.stop();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        for root in self.roots.iter().filter(|root| root.watch) {
            let shared = Arc::clone(&self.shared);
            let tx = tx.clone();
            let dev_mode = root.dev_mode;
            let handle = match &root.location {
                PackageLocation::Local(path) => tokio::spawn(watch_local(shared, path.clone(), dev_mode, tx)),
                PackageLocation::Remote(url) => tokio::spawn(poll_remote_loop(shared, url.clone(), dev_mode, tx)),
            };
            tasks.push(handle);
        }
        UnboundedReceiverStream::new(rx)
    }

    pub fn stop(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        for task in tasks.drain(..) {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        let tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        tasks.iter().any(|task| !task.is_finished())
    }

    /// Classify a batch of touched paths under a local root, as a native event batch would be
    #[cfg(test)]
    pub(crate) fn touch(&self, root: &Path, dev_mode: bool, paths: Vec<PathBuf>) -> Vec<WatchEvent> {
        self.shared.touch_local(root, dev_mode, paths)
    }

    /// Report a failed listing of `root`; true when it was logged as a warning
    #[cfg(test)]
    pub(crate) fn listing_failed(&self, root: &Path, error: io::Error) -> bool {
        self.shared.note_unreadable(root, &error)
    }

    /// Re-diff a local root against disk, as a reconcile tick would
    #[cfg(test)]
    pub(crate) fn reconcile(&self, root: &Path, dev_mode: bool) -> Vec<WatchEvent> {
        self.shared.reconcile_local(root, dev_mode)
    }
}

impl Drop for PackageWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn attach(root: &Path, debounce: Duration, batch_tx: UnboundedSender<Vec<PathBuf>>) -> Option<Debouncer<RecommendedWatcher>> {
    let root_display = root.display().to_string();
    let debouncer = new_debouncer(debounce, move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
        Ok(events) => {
            let paths = events.into_iter().map(|event| event.path).collect();
            // The receiving task is gone once the watcher stops.
            let _ = batch_tx.send(paths);
        }
        Err(e) => warn!("File watcher error under '{}': {}", root_display, e),
    });
    let mut debouncer = match debouncer {
        Ok(debouncer) => debouncer,
        Err(e) => {
            warn!("Failed to create file watcher for '{}': {}", root.display(), e);
            return None;
        }
    };
    if let Err(e) = debouncer.watcher().watch(root, RecursiveMode::Recursive) {
        warn!("Failed to watch '{}': {}", root.display(), e);
        return None;
    }
    info!("Watching package root '{}'", root.display());
    Some(debouncer)
}

async fn watch_local(shared: Arc<Shared>, root: PathBuf, dev_mode: bool, tx: UnboundedSender<WatchEvent>) {
    let (batch_tx, mut batch_rx) = mpsc::unbounded_channel::<Vec<PathBuf>>();
    let mut debouncer: Option<Debouncer<RecommendedWatcher>> = None;
    let mut ticker = tokio::time::interval(shared.settings.poll_interval.max(MIN_POLL_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let events = tokio::select! {
            Some(paths) = batch_rx.recv() => shared.touch_local(&root, dev_mode, paths),
            _ = ticker.tick() => {
                let events = shared.reconcile_local(&root, dev_mode);
                if root.is_dir() {
                    if debouncer.is_none() {
                        debouncer = attach(&root, shared.settings.debounce, batch_tx.clone());
                    }
                } else if debouncer.take().is_some() {
                    debug!("Package root '{}' disappeared; detaching file watcher", root.display());
                }
                events
            }
        };
        for event in events {
            if tx.send(event).is_err() {
                return;
            }
        }
    }
}

async fn poll_remote_loop(shared: Arc<Shared>, url: String, dev_mode: bool, tx: UnboundedSender<WatchEvent>) {
    let mut ticker = tokio::time::interval(shared.settings.poll_interval.max(MIN_POLL_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Some(event) = shared.poll_remote(&url, dev_mode).await {
            if tx.send(event).is_err() {
                return;
            }
        }
    }
}
