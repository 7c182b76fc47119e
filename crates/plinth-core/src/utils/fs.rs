use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Return the first file in `dir` whose name appears in `names`, in `names` order.
pub fn first_existing_file<P: AsRef<Path>>(dir: P, names: &[&str]) -> Option<PathBuf> {
    names
        .iter()
        .map(|name| dir.as_ref().join(name))
        .find(|candidate| candidate.is_file())
}

/// List the immediate child directories of `path`, sorted by path.
///
/// A missing directory yields an empty list rather than an error.
pub fn child_dirs<P: AsRef<Path>>(path: P) -> io::Result<Vec<PathBuf>> {
    let path = path.as_ref();
    if !path.is_dir() {
        return Ok(Vec::new());
    }

    let mut result = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry_path = entry?.path();
        if entry_path.is_dir() {
            result.push(entry_path);
        }
    }
    result.sort();
    Ok(result)
}

/// Check whether any component of `path` below `root` is one of the ignored directory names.
pub fn is_ignored_path(root: &Path, path: &Path, ignored: &[String]) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.components().any(|component| match component {
        Component::Normal(name) => ignored.iter().any(|ignored| name == ignored.as_str()),
        _ => false,
    })
}

/// Map a path somewhere below `root` to the immediate child directory of `root` containing it.
///
/// Returns `None` for `root` itself or for paths outside of `root`.
pub fn top_level_child(root: &Path, path: &Path) -> Option<PathBuf> {
    let relative = path.strip_prefix(root).ok()?;
    match relative.components().next()? {
        Component::Normal(name) => Some(root.join(name)),
        _ => None,
    }
}

/// Make `path` absolute relative to `base`, canonicalizing when the target exists.
pub fn absolutize(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() { path.to_path_buf() } else { base.join(path) };
    fs::canonicalize(&joined).unwrap_or(joined)
}
