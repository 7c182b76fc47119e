use std::fs;
use std::path::Path;
use std::time::Duration;

use tempfile::tempdir;
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::package_system::location::PackageLocation;
use crate::package_system::watcher::{ChangeKind, PackageWatcher, WatchEvent, WatchRoot, WatcherSettings};
use crate::utils::testing::{DescriptorServer, manifest_json, write_manifest};

fn settings(poll_interval: Duration) -> WatcherSettings {
    WatcherSettings {
        debounce: Duration::from_millis(20),
        poll_interval,
        ignore: vec!["node_modules".into(), ".git".into()],
    }
}

fn watcher_for(root: &Path, watch: bool, poll_interval: Duration) -> PackageWatcher {
    let root = WatchRoot { location: root.into(), watch, dev_mode: true };
    PackageWatcher::new(vec![root], settings(poll_interval), reqwest::Client::new())
}

fn package(root: &Path, name: &str) {
    write_manifest(&root.join(name), &manifest_json(name, "1.0.0", &[]));
}

/// Next event of `kind`, skipping any others
async fn next_of(changes: &mut UnboundedReceiverStream<WatchEvent>, kind: ChangeKind) -> WatchEvent {
    timeout(Duration::from_secs(5), async {
        loop {
            let event = changes.next().await.expect("watcher stream open");
            if event.kind == kind {
                return event;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {:?} event", kind))
}

fn remote_watcher(server: &DescriptorServer, watch: bool, poll_interval: Duration) -> PackageWatcher {
    let root = WatchRoot { location: server.location(), watch, dev_mode: false };
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    PackageWatcher::new(vec![root], settings(poll_interval), client)
}

fn kinds(events: &[WatchEvent]) -> Vec<(String, ChangeKind)> {
    events
        .iter()
        .map(|event| {
            let name = event.location.local_path().and_then(Path::file_name).unwrap_or_default();
            (name.to_string_lossy().into_owned(), event.kind)
        })
        .collect()
}

#[tokio::test]
async fn test_scan_finds_child_packages() {
    let root = tempdir().unwrap();
    package(root.path(), "alpha");
    package(root.path(), "beta");
    package(root.path(), "node_modules");
    fs::create_dir(root.path().join("no-manifest")).unwrap();
    fs::write(root.path().join("stray.json"), "{}").unwrap();

    let watcher = watcher_for(root.path(), false, Duration::from_secs(1));
    let events = watcher.scan().await;

    assert_eq!(
        kinds(&events),
        vec![("alpha".to_string(), ChangeKind::Discovered), ("beta".to_string(), ChangeKind::Discovered)]
    );
    assert!(events.iter().all(|event| event.dev_mode));

    // A second pass has nothing new to say
    assert!(watcher.scan().await.is_empty());
}

#[tokio::test]
async fn test_root_with_manifest_is_one_package() {
    let root = tempdir().unwrap();
    write_manifest(root.path(), &manifest_json("solo", "1.0.0", &[]));
    package(root.path(), "nested");

    let watcher = watcher_for(root.path(), false, Duration::from_secs(1));
    let events = watcher.scan().await;

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].location, PackageLocation::from(root.path()));

    let touched = watcher.touch(root.path(), true, vec![root.path().join("nested").join("index.js")]);
    assert_eq!(touched.len(), 1);
    assert_eq!(touched[0].location, PackageLocation::from(root.path()));
    assert_eq!(touched[0].kind, ChangeKind::Changed);
}

#[tokio::test]
async fn test_missing_root_yields_nothing() {
    let root = tempdir().unwrap();
    let watcher = watcher_for(&root.path().join("not-yet"), false, Duration::from_secs(1));
    assert!(watcher.scan().await.is_empty());
}

#[tokio::test]
async fn test_reconcile_reports_additions_and_removals() {
    let root = tempdir().unwrap();
    package(root.path(), "old");
    let watcher = watcher_for(root.path(), false, Duration::from_secs(1));
    watcher.scan().await;

    fs::remove_dir_all(root.path().join("old")).unwrap();
    package(root.path(), "new");

    let events = watcher.reconcile(root.path(), true);
    assert_eq!(
        kinds(&events),
        vec![("old".to_string(), ChangeKind::Removed), ("new".to_string(), ChangeKind::Discovered)]
    );
    assert!(watcher.reconcile(root.path(), true).is_empty());
}

#[tokio::test]
async fn test_touched_paths_become_package_events() {
    let root = tempdir().unwrap();
    package(root.path(), "app");
    package(root.path(), "gone");
    let watcher = watcher_for(root.path(), false, Duration::from_secs(1));
    watcher.scan().await;

    package(root.path(), "fresh");
    fs::remove_dir_all(root.path().join("gone")).unwrap();
    fs::create_dir_all(root.path().join("app").join("node_modules")).unwrap();

    let events = watcher.touch(
        root.path(),
        true,
        vec![
            root.path().join("app").join("src").join("main.js"),
            root.path().join("app").join("plinth.json"),
            root.path().join("app").join("node_modules").join("dep.js"),
            root.path().join("fresh").join("plinth.json"),
            root.path().join("gone"),
            root.path().join("scratch").join("notes.txt"),
        ],
    );

    assert_eq!(
        kinds(&events),
        vec![
            ("app".to_string(), ChangeKind::Changed),
            ("fresh".to_string(), ChangeKind::Discovered),
            ("gone".to_string(), ChangeKind::Removed),
        ]
    );

    // Only ignored paths: nothing to report
    let ignored = watcher.touch(root.path(), true, vec![root.path().join("app").join("node_modules").join("x.js")]);
    assert!(ignored.is_empty());
}

#[tokio::test]
async fn test_started_watcher_reports_new_package() {
    let root = tempdir().unwrap();
    package(root.path(), "first");
    let watcher = watcher_for(root.path(), true, Duration::from_millis(30));
    watcher.scan().await;

    let mut changes = watcher.start();
    assert!(watcher.is_running());
    package(root.path(), "second");

    let event = timeout(Duration::from_secs(5), async {
        loop {
            let event = changes.next().await.expect("watcher stream open");
            if event.kind == ChangeKind::Discovered {
                return event;
            }
        }
    })
    .await
    .expect("new package noticed");
    assert_eq!(event.location, PackageLocation::from(root.path().join("second")));

    watcher.stop();
    assert!(!watcher.is_running());
}

#[tokio::test]
async fn test_unwatched_roots_are_not_started() {
    let root = tempdir().unwrap();
    let watcher = watcher_for(root.path(), false, Duration::from_millis(10));

    let mut changes = watcher.start();

    assert!(!watcher.is_running());
    assert_eq!(timeout(Duration::from_millis(200), changes.next()).await.ok().flatten(), None);
}

#[tokio::test]
async fn test_unreachable_remote_root_reports_nothing() {
    let root = WatchRoot { location: PackageLocation::parse("http://127.0.0.1:9/package.json"), watch: false, dev_mode: false };
    let watcher = PackageWatcher::new(vec![root], settings(Duration::from_secs(1)), reqwest::Client::new());

    assert!(watcher.scan().await.is_empty());
}

#[tokio::test]
async fn test_deleted_root_is_rediscovered_when_recreated() {
    let parent = tempdir().unwrap();
    let root = parent.path().join("plugins");
    package(&root, "app");
    let watcher = watcher_for(&root, false, Duration::from_secs(1));
    assert_eq!(kinds(&watcher.scan().await), vec![("app".to_string(), ChangeKind::Discovered)]);

    fs::remove_dir_all(&root).unwrap();
    assert_eq!(kinds(&watcher.reconcile(&root, true)), vec![("app".to_string(), ChangeKind::Removed)]);
    assert!(watcher.reconcile(&root, true).is_empty());

    package(&root, "app");
    assert_eq!(kinds(&watcher.reconcile(&root, true)), vec![("app".to_string(), ChangeKind::Discovered)]);
}

#[tokio::test]
async fn test_started_watcher_reattaches_to_recreated_root() {
    let parent = tempdir().unwrap();
    let root = parent.path().join("plugins");
    package(&root, "app");
    let watcher = watcher_for(&root, true, Duration::from_millis(30));
    watcher.scan().await;
    let mut changes = watcher.start();
    let app = PackageLocation::from(root.join("app"));

    fs::remove_dir_all(&root).unwrap();
    assert_eq!(next_of(&mut changes, ChangeKind::Removed).await.location, app);
    tokio::time::sleep(Duration::from_millis(100)).await;

    package(&root, "app");
    assert_eq!(next_of(&mut changes, ChangeKind::Discovered).await.location, app);
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Only file events from a re-attached watcher report edits
    write_manifest(&root.join("app"), &manifest_json("app", "1.0.1", &[]));
    assert_eq!(next_of(&mut changes, ChangeKind::Changed).await.location, app);
    watcher.stop();
}

#[tokio::test]
async fn test_unreadable_root_warns_once_per_transition() {
    let root = tempdir().unwrap();
    package(root.path(), "app");
    let watcher = watcher_for(root.path(), false, Duration::from_secs(1));
    let denied = || std::io::Error::from(std::io::ErrorKind::PermissionDenied);

    assert!(watcher.listing_failed(root.path(), denied()));
    assert!(!watcher.listing_failed(root.path(), denied()));

    // A successful listing resets it
    watcher.reconcile(root.path(), true);
    assert!(watcher.listing_failed(root.path(), denied()));
}

#[tokio::test]
async fn test_ignored_build_output_does_not_report_changes() {
    let root = tempdir().unwrap();
    package(root.path(), "app");
    let mut with_output = settings(Duration::from_secs(1));
    with_output.ignore.push("lib".into());
    let location = WatchRoot { location: root.path().into(), watch: false, dev_mode: true };
    let watcher = PackageWatcher::new(vec![location], with_output, reqwest::Client::new());
    watcher.scan().await;

    let output = root.path().join("app").join("lib").join("out.js");
    assert!(watcher.touch(root.path(), true, vec![output]).is_empty());

    let source = root.path().join("app").join("src").join("index.js");
    assert_eq!(kinds(&watcher.touch(root.path(), true, vec![source])), vec![("app".to_string(), ChangeKind::Changed)]);
}

#[tokio::test]
async fn test_remote_root_reports_discovery_change_and_removal() {
    let server = DescriptorServer::start().await;
    let watcher = remote_watcher(&server, false, Duration::from_secs(1));
    let kinds_of = |events: Vec<WatchEvent>| events.into_iter().map(|event| event.kind).collect::<Vec<_>>();

    // Not published yet and never seen: nothing to remove
    assert!(watcher.scan().await.is_empty());

    server.publish(manifest_json("remote", "1.0.0", &[]));
    assert_eq!(kinds_of(watcher.scan().await), vec![ChangeKind::Discovered]);
    assert!(watcher.scan().await.is_empty(), "same body, no event");

    server.publish(manifest_json("remote", "1.1.0", &[]));
    assert_eq!(kinds_of(watcher.scan().await), vec![ChangeKind::Changed]);

    server.withdraw();
    assert_eq!(kinds_of(watcher.scan().await), vec![ChangeKind::Removed]);
    assert!(watcher.scan().await.is_empty());
}

#[tokio::test]
async fn test_started_remote_poller_reports_changes() {
    let server = DescriptorServer::start().await;
    server.publish(manifest_json("remote", "1.0.0", &[]));
    let watcher = remote_watcher(&server, true, Duration::from_millis(30));
    watcher.scan().await;

    let mut changes = watcher.start();
    server.publish(manifest_json("remote", "2.0.0", &[]));
    let changed = next_of(&mut changes, ChangeKind::Changed).await;
    assert_eq!(changed.location, server.location());

    server.withdraw();
    next_of(&mut changes, ChangeKind::Removed).await;
    watcher.stop();
}
