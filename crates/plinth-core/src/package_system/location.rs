use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Serialize, Serializer};

/// Identity of a package: a local directory or a remote `http(s)` URL
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PackageLocation {
    Local(PathBuf),
    Remote(String),
}

impl PackageLocation {
    /// Classify a configured location string. Anything that is not an
    /// `http://` or `https://` URL is treated as a filesystem path.
    pub fn parse(location: &str) -> Self {
        let lower = location.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            PackageLocation::Remote(location.to_string())
        } else {
            PackageLocation::Local(PathBuf::from(location))
        }
    }

    pub fn local_path(&self) -> Option<&Path> {
        match self {
            PackageLocation::Local(path) => Some(path),
            PackageLocation::Remote(_) => None,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            PackageLocation::Remote(url) => Some(url),
            PackageLocation::Local(_) => None,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, PackageLocation::Remote(_))
    }
}

impl fmt::Display for PackageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageLocation::Local(path) => write!(f, "{}", path.display()),
            PackageLocation::Remote(url) => f.write_str(url),
        }
    }
}

impl From<PathBuf> for PackageLocation {
    fn from(path: PathBuf) -> Self {
        PackageLocation::Local(path)
    }
}

impl From<&Path> for PackageLocation {
    fn from(path: &Path) -> Self {
        PackageLocation::Local(path.to_path_buf())
    }
}

impl Serialize for PackageLocation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
