/// Application name
pub const APP_NAME: &str = "Plinth";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Manifest file names looked up in a package directory, in precedence order
pub const MANIFEST_FILE_NAMES: &[&str] = &["plinth.json", "plinth.yaml", "plinth.yml", "plinth.toml"];

/// Key of the plugin section inside an npm-style remote descriptor
pub const DESCRIPTOR_SECTION: &str = "plinth";

/// Default debounce window for file events and dev builds
pub const DEFAULT_DEBOUNCE_MS: u64 = 250;

/// Default reconcile/poll interval
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// Default command prefix for dev build scripts
pub const DEFAULT_BUILD_RUNNER: &str = "npm run";

/// Directory names ignored by the package watcher.
///
/// A dev build that writes its output anywhere else inside the package
/// directory must have that directory added to `watch_ignore`, or every
/// build reports a change and schedules the next one.
pub const DEFAULT_WATCH_IGNORE: &[&str] = &[".git", "node_modules", "target", "dist", "build"];
