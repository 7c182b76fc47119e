use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use log::{debug, info, warn};
use tokio::process::Command;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::kernel::constants::DEFAULT_BUILD_RUNNER;
use crate::package_system::location::PackageLocation;
use crate::utils::panic_message;

/// Result of running one build step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRun {
    pub success: bool,
    /// Captured stdout followed by stderr
    pub output: String,
}

/// Runs a package's dev build script
#[async_trait]
pub trait BuildExecutor: Send + Sync {
    async fn run(&self, dir: &Path, script: &str) -> BuildRun;
}

/// Runs `<runner> <script>` through the platform shell inside the package directory
#[derive(Debug, Clone)]
pub struct ShellBuildExecutor {
    runner: String,
}

impl ShellBuildExecutor {
    pub fn new(runner: impl Into<String>) -> Self {
        Self { runner: runner.into() }
    }

    fn command(&self, dir: &Path, script: &str) -> Command {
        let line = format!("{} {}", self.runner, script);
        let mut command = if cfg!(windows) {
            let mut command = Command::new("cmd");
            command.arg("/C").arg(line);
            command
        } else {
            let mut command = Command::new("sh");
            command.arg("-c").arg(line);
            command
        };
        command.current_dir(dir).kill_on_drop(true);
        command
    }
}

impl Default for ShellBuildExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_BUILD_RUNNER)
    }
}

#[async_trait]
impl BuildExecutor for ShellBuildExecutor {
    async fn run(&self, dir: &Path, script: &str) -> BuildRun {
        debug!("Running '{} {}' in '{}'", self.runner, script, dir.display());
        match self.command(dir, script).output().await {
            Ok(output) => {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                BuildRun { success: output.status.success(), output: text }
            }
            Err(e) => BuildRun { success: false, output: format!("failed to spawn build: {}", e) },
        }
    }
}

/// Delivered to the runtime once a build finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    pub location: PackageLocation,
    pub success: bool,
    pub output: String,
}

#[derive(Debug, Default)]
struct BuildSlot {
    /// Bumped on every request; a debounced request only runs if it is still the latest
    generation: u64,
    running: bool,
    /// Script to run once the in-flight build finishes
    pending: Option<String>,
}

struct Inner {
    executor: Arc<dyn BuildExecutor>,
    debounce: Duration,
    slots: Mutex<HashMap<PathBuf, BuildSlot>>,
    outcomes: UnboundedSender<BuildOutcome>,
}

impl Inner {
    fn slots(&self) -> MutexGuard<'_, HashMap<PathBuf, BuildSlot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Debounces and serializes dev builds per package directory.
///
/// Requests within the debounce window collapse into one build. While a
/// build runs, later requests queue at most one follow-up build. Different
/// packages build concurrently.
#[derive(Clone)]
pub struct BuildOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for BuildOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildOrchestrator").field("debounce", &self.inner.debounce).finish_non_exhaustive()
    }
}

impl BuildOrchestrator {
    /// Create an orchestrator together with the receiver its outcomes arrive on
    pub fn new(executor: Arc<dyn BuildExecutor>, debounce: Duration) -> (Self, UnboundedReceiver<BuildOutcome>) {
        let (outcomes, rx) = mpsc::unbounded_channel();
        let inner = Inner { executor, debounce, slots: Mutex::new(HashMap::new()), outcomes };
        (Self { inner: Arc::new(inner) }, rx)
    }

    pub fn is_building(&self, dir: &Path) -> bool {
        self.inner.slots().get(dir).is_some_and(|slot| slot.running)
    }

    /// Request a build of `script` in `dir`; must be called inside a Tokio runtime
    pub fn request_build(&self, dir: PathBuf, script: String) {
        let generation = {
            let mut slots = self.inner.slots();
            let slot = slots.entry(dir.clone()).or_default();
            slot.generation += 1;
            slot.generation
        };
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            {
                let mut slots = inner.slots();
                let slot = slots.entry(dir.clone()).or_default();
                if slot.generation != generation {
                    debug!("Build request for '{}' superseded", dir.display());
                    return;
                }
                if slot.running {
                    debug!("Build already running for '{}'; queueing one more", dir.display());
                    slot.pending = Some(script);
                    return;
                }
                slot.running = true;
            }
            run_builds(inner, dir, script).await;
        });
    }
}

async fn run_builds(inner: Arc<Inner>, dir: PathBuf, mut script: String) {
    loop {
        info!("Building package '{}' with script '{}'", dir.display(), script);
        let run = match AssertUnwindSafe(inner.executor.run(&dir, &script)).catch_unwind().await {
            Ok(run) => run,
            Err(payload) => BuildRun { success: false, output: format!("build executor panicked: {}", panic_message(&*payload)) },
        };
        if run.success {
            info!("Build succeeded for '{}'", dir.display());
        } else {
            warn!("Build failed for '{}'", dir.display());
        }
        let outcome = BuildOutcome { location: PackageLocation::Local(dir.clone()), success: run.success, output: run.output };
        if inner.outcomes.send(outcome).is_err() {
            debug!("Build outcome receiver dropped");
        }

        let next = {
            let mut slots = inner.slots();
            let slot = slots.entry(dir.clone()).or_default();
            let next = slot.pending.take();
            slot.running = next.is_some();
            next
        };
        match next {
            Some(next) => script = next,
            None => return,
        }
    }
}
