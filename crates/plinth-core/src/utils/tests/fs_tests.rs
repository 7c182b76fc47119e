use std::fs::{self, File};
use std::path::Path;
use tempfile::tempdir;

use crate::utils::fs::{absolutize, child_dirs, first_existing_file, is_ignored_path, top_level_child};

#[test]
fn test_first_existing_file_respects_order() {
    let temp_dir = tempdir().unwrap();
    let base_path = temp_dir.path();

    assert!(first_existing_file(base_path, &["a.json", "a.toml"]).is_none());

    File::create(base_path.join("a.toml")).unwrap();
    assert_eq!(first_existing_file(base_path, &["a.json", "a.toml"]), Some(base_path.join("a.toml")));

    File::create(base_path.join("a.json")).unwrap();
    assert_eq!(first_existing_file(base_path, &["a.json", "a.toml"]), Some(base_path.join("a.json")));

    // A directory with a matching name is not a file
    fs::create_dir(base_path.join("b.json")).unwrap();
    assert!(first_existing_file(base_path, &["b.json"]).is_none());
}

#[test]
fn test_child_dirs_sorted_and_missing_root() {
    let temp_dir = tempdir().unwrap();
    let base_path = temp_dir.path();

    fs::create_dir(base_path.join("zeta")).unwrap();
    fs::create_dir(base_path.join("alpha")).unwrap();
    File::create(base_path.join("file.txt")).unwrap();

    let dirs = child_dirs(base_path).unwrap();
    assert_eq!(dirs, vec![base_path.join("alpha"), base_path.join("zeta")]);

    let missing = child_dirs(base_path.join("does-not-exist")).unwrap();
    assert!(missing.is_empty());
}

#[test]
fn test_is_ignored_path() {
    let root = Path::new("/packages");
    let ignored = vec!["node_modules".to_string(), "dist".to_string()];

    assert!(is_ignored_path(root, Path::new("/packages/a/node_modules/x.js"), &ignored));
    assert!(is_ignored_path(root, Path::new("/packages/a/dist/bundle.js"), &ignored));
    assert!(!is_ignored_path(root, Path::new("/packages/a/src/index.js"), &ignored));
    // Only components below the root count
    assert!(!is_ignored_path(Path::new("/dist"), Path::new("/dist/a/src/x.js"), &ignored));
}

#[test]
fn test_top_level_child() {
    let root = Path::new("/packages");
    assert_eq!(top_level_child(root, Path::new("/packages/a/src/x.js")), Some(root.join("a")));
    assert_eq!(top_level_child(root, Path::new("/packages/b")), Some(root.join("b")));
    assert_eq!(top_level_child(root, Path::new("/packages")), None);
    assert_eq!(top_level_child(root, Path::new("/elsewhere/a")), None);
}

#[test]
fn test_absolutize_relative_and_absolute() {
    let temp_dir = tempdir().unwrap();
    let base_path = fs::canonicalize(temp_dir.path()).unwrap();
    fs::create_dir(base_path.join("pkgs")).unwrap();

    assert_eq!(absolutize(&base_path, Path::new("pkgs")), base_path.join("pkgs"));
    // Missing targets are joined but not canonicalized
    assert_eq!(absolutize(&base_path, Path::new("missing")), base_path.join("missing"));
    assert_eq!(absolutize(Path::new("/ignored"), &base_path.join("pkgs")), base_path.join("pkgs"));
}
