use std::fs;
use std::path::Path;
use std::time::Duration;

use tempfile::tempdir;

use crate::config::{ConfigData, PackageSource, RuntimeConfig};
use crate::kernel::bootstrap::Runtime;
use crate::kernel::component::KernelComponent;
use crate::kernel::error::{Error, KernelLifecyclePhase};
use crate::package_system::location::PackageLocation;
use crate::package_system::registry::PackageStatus;
use crate::plugin_system::plugin::PluginStatus;
use crate::utils::testing::{RecordingLoader, TEST_TYPE, eventually, manifest_json, write_manifest};

fn config_for(root: &Path, watch: bool) -> RuntimeConfig {
    let mut source = PackageSource::new(root.to_string_lossy());
    if watch {
        source = source.watched();
    }
    RuntimeConfig { packages: vec![source], debounce_ms: 20, poll_interval_ms: 50, ..RuntimeConfig::default() }
}

fn runtime_for(root: &Path, watch: bool) -> (Runtime, std::sync::Arc<RecordingLoader>) {
    let loader = RecordingLoader::new();
    let runtime = Runtime::builder(config_for(root, watch)).loader(TEST_TYPE, loader.clone()).build().unwrap();
    (runtime, loader)
}

fn lifecycle_phase(error: Error) -> Option<KernelLifecyclePhase> {
    match error {
        Error::KernelLifecycleError { phase, .. } => Some(phase),
        _ => None,
    }
}

#[tokio::test]
async fn test_build_does_not_touch_packages() {
    let root = tempdir().unwrap();
    write_manifest(&root.path().join("app"), &manifest_json("app", "1.0.0", &[("a", &[])]));

    let (runtime, loader) = runtime_for(root.path(), false);

    assert!(!runtime.is_initialized());
    assert!(!runtime.is_running());
    assert!(runtime.packages().list().is_empty());
    assert!(loader.calls().is_empty());
    assert_eq!(runtime.name(), "PluginRuntime");
}

#[tokio::test]
async fn test_initialize_loads_packages_in_dependency_order() {
    let root = tempdir().unwrap();
    write_manifest(&root.path().join("core"), &manifest_json("core", "1.0.0", &[("base", &[])]));
    write_manifest(&root.path().join("addons"), &manifest_json("addons", "0.3.0", &[("extra", &["base"])]));

    let (runtime, loader) = runtime_for(root.path(), false);
    runtime.initialize().await.unwrap();

    assert!(runtime.is_initialized());
    let packages = runtime.packages().list();
    assert_eq!(packages.len(), 2);
    assert!(packages.iter().all(|p| p.status == PackageStatus::Ready));
    assert_eq!(runtime.plugins().status("extra"), Some(PluginStatus::Loaded));
    // addons sorts first on disk, so extra waits for base
    assert!(loader.position("load:base") < loader.position("load:extra"));

    let service = runtime.service();
    assert_eq!(service.list_plugins().len(), 2);
}

#[tokio::test]
async fn test_lifecycle_order_is_enforced() {
    let root = tempdir().unwrap();
    let (runtime, _) = runtime_for(root.path(), false);

    let err = runtime.start().await.unwrap_err();
    assert_eq!(lifecycle_phase(err), Some(KernelLifecyclePhase::Start));

    runtime.initialize().await.unwrap();
    let err = runtime.initialize().await.unwrap_err();
    assert_eq!(lifecycle_phase(err), Some(KernelLifecyclePhase::Initialize));

    runtime.start().await.unwrap();
    let err = runtime.start().await.unwrap_err();
    assert!(err.to_string().contains("already started"));
    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn test_started_runtime_picks_up_new_packages() {
    let root = tempdir().unwrap();
    write_manifest(&root.path().join("first"), &manifest_json("first", "1.0.0", &[("one", &[])]));

    let (runtime, _) = runtime_for(root.path(), true);
    runtime.initialize().await.unwrap();
    runtime.start().await.unwrap();
    assert!(runtime.is_running());

    write_manifest(&root.path().join("second"), &manifest_json("second", "1.0.0", &[("two", &["one"])]));
    let plugins = runtime.plugins().clone();
    assert!(eventually(|| plugins.status("two") == Some(PluginStatus::Loaded)).await);

    fs::remove_dir_all(root.path().join("second")).unwrap();
    assert!(eventually(|| !plugins.contains("two")).await);

    runtime.stop().await.unwrap();
    assert!(!runtime.is_running());
}

#[tokio::test]
async fn test_update_plugin_config_reloads_once() {
    let root = tempdir().unwrap();
    write_manifest(&root.path().join("app"), &manifest_json("app", "1.0.0", &[("svc", &[])]));
    let (runtime, loader) = runtime_for(root.path(), false);
    runtime.initialize().await.unwrap();
    loader.clear_calls();

    let mut overrides = ConfigData::new();
    overrides.set("workers", 4).unwrap();
    let report = runtime.update_plugin_config("svc", overrides).await.unwrap();

    assert_eq!(report.loaded, vec!["svc"]);
    assert_eq!(loader.calls(), vec!["unload:svc", "load:svc"]);
    assert_eq!(loader.config_of("svc").unwrap().get::<i64>("workers"), Some(4));
}

#[tokio::test]
async fn test_configured_overrides_reach_the_loader() {
    let root = tempdir().unwrap();
    write_manifest(&root.path().join("app"), &manifest_json("app", "1.0.0", &[("svc", &[])]));
    let mut config = config_for(root.path(), false);
    let mut overrides = ConfigData::new();
    overrides.set("mode", "strict").unwrap();
    config.plugins.insert("svc".into(), overrides);
    config.ignore_plugins.push("never".into());

    let loader = RecordingLoader::new();
    let runtime = Runtime::builder(config).loader(TEST_TYPE, loader.clone()).build().unwrap();
    runtime.initialize().await.unwrap();

    assert_eq!(loader.config_of("svc").unwrap().get::<String>("mode").as_deref(), Some("strict"));
    assert!(runtime.plugins().is_ignored("never"));
}

#[tokio::test]
async fn test_stop_unloads_dependents_first() {
    let root = tempdir().unwrap();
    write_manifest(&root.path().join("app"), &manifest_json("app", "1.0.0", &[("lower", &[]), ("upper", &["lower"])]));
    let (runtime, loader) = runtime_for(root.path(), false);
    runtime.initialize().await.unwrap();
    loader.clear_calls();

    runtime.shutdown().await.unwrap();

    assert_eq!(loader.calls(), vec!["unload:upper", "unload:lower"]);
    assert!(runtime.plugins().snapshots().iter().all(|p| p.status == PluginStatus::Pending));
}

#[tokio::test]
async fn test_register_and_unregister_package_explicitly() {
    let root = tempdir().unwrap();
    let extra = tempdir().unwrap();
    write_manifest(extra.path(), &manifest_json("extra", "2.0.0", &[("bonus", &[])]));
    let (runtime, loader) = runtime_for(root.path(), false);
    runtime.initialize().await.unwrap();

    let location = PackageLocation::from(extra.path());
    let snapshot = runtime.register_package(location.clone(), false).await.unwrap();
    assert_eq!(snapshot.status, PackageStatus::Ready);
    assert_eq!(loader.count("load:bonus"), 1);

    let destroyed = runtime.unregister_package(&location).await.unwrap();
    assert_eq!(destroyed, vec!["bonus"]);
    assert!(!runtime.plugins().contains("bonus"));

    let err = runtime.unregister_package(&location).await.unwrap_err();
    assert!(matches!(err, Error::PackageSystem(_)));
}

#[tokio::test]
async fn test_from_config_file_resolves_relative_roots() {
    let root = tempdir().unwrap();
    write_manifest(&root.path().join("plugins").join("app"), &manifest_json("app", "1.0.0", &[("svc", &[])]));
    let config_path = root.path().join("runtime.json");
    fs::write(&config_path, r#"{ "packages": [ { "location": "plugins" } ], "debounceMs": 5 }"#).unwrap();

    let loader = RecordingLoader::new();
    let runtime = Runtime::from_config_file(&config_path).unwrap().loader(TEST_TYPE, loader.clone()).build().unwrap();
    assert_eq!(runtime.config().debounce(), Duration::from_millis(5));

    runtime.initialize().await.unwrap();
    assert_eq!(runtime.plugins().status("svc"), Some(PluginStatus::Loaded));

    let missing = Runtime::from_config_file(&root.path().join("absent.json"));
    assert!(matches!(missing, Err(Error::Config(_))));
    let builder = Runtime::from_config_file(&config_path).unwrap().loader(TEST_TYPE, loader);
    assert!(format!("{:?}", builder).contains("RuntimeBuilder"));
}
