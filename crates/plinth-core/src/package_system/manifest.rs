use std::collections::HashSet;
use std::path::{Path, PathBuf};

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::config::{ConfigData, ConfigFormat};
use crate::kernel::constants::MANIFEST_FILE_NAMES;
use crate::package_system::error::PackageSystemError;
use crate::package_system::location::PackageLocation;
use crate::utils::fs::first_existing_file;

/// One plugin declared by a package manifest
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginDeclaration {
    pub name: String,
    /// Open type tag used to pick a loader
    #[serde(rename = "type")]
    pub plugin_type: String,
    /// Names of plugins that must be loaded first
    pub requires: Vec<String>,
    /// Bootstrap entry-point reference, interpreted by the loader
    pub bootstrap: Option<String>,
    pub default_config: ConfigData,
    pub description: Option<String>,
    pub tags: Vec<String>,
}

impl PluginDeclaration {
    pub fn new(name: impl Into<String>, plugin_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plugin_type: plugin_type.into(),
            requires: Vec::new(),
            bootstrap: None,
            default_config: ConfigData::new(),
            description: None,
            tags: Vec::new(),
        }
    }

    pub fn requiring<I, S>(mut self, requires: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires = requires.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_default_config(mut self, config: ConfigData) -> Self {
        self.default_config = config;
        self
    }
}

/// Resolved, immutable description of a package
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackageManifest {
    pub name: String,
    #[serde(serialize_with = "serialize_version")]
    pub version: Version,
    pub homepage: Option<String>,
    pub author: Option<String>,
    pub license: Option<String>,
    pub description: Option<String>,
    pub location: PackageLocation,
    pub dev_build_script: Option<String>,
    pub plugins: Vec<PluginDeclaration>,
}

fn serialize_version<S: serde::Serializer>(version: &Version, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(version)
}

impl PackageManifest {
    pub fn plugin(&self, name: &str) -> Option<&PluginDeclaration> {
        self.plugins.iter().find(|p| p.name == name)
    }

    pub fn plugin_names(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.name.clone()).collect()
    }
}

// --- Intermediate structs for deserialization ---

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawPluginDeclaration {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub plugin_type: String,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub bootstrap: Option<String>,
    #[serde(default, alias = "config")]
    pub default_config: ConfigData,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawPackageManifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub dev_build_script: Option<String>,
    #[serde(default)]
    pub plugins: Vec<RawPluginDeclaration>,
}

// --- End Intermediate structs ---

impl RawPackageManifest {
    /// Validate and convert into a [`PackageManifest`] anchored at `location`
    pub(crate) fn into_manifest(self, location: PackageLocation) -> Result<PackageManifest, PackageSystemError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(PackageSystemError::manifest(&location, "package name must not be empty"));
        }
        let version = Version::parse(self.version.trim()).map_err(|e| {
            PackageSystemError::manifest(&location, format!("invalid version '{}': {}", self.version, e))
        })?;

        let mut seen = HashSet::new();
        let mut plugins = Vec::with_capacity(self.plugins.len());
        for raw in self.plugins {
            let plugin_name = raw
                .name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| name.clone());
            if raw.plugin_type.trim().is_empty() {
                return Err(PackageSystemError::manifest(
                    &location,
                    format!("plugin '{}' has an empty type", plugin_name),
                ));
            }
            if !seen.insert(plugin_name.clone()) {
                return Err(PackageSystemError::manifest(
                    &location,
                    format!("plugin name '{}' is declared more than once", plugin_name),
                ));
            }
            plugins.push(PluginDeclaration {
                name: plugin_name,
                plugin_type: raw.plugin_type.trim().to_string(),
                requires: raw.requires,
                bootstrap: raw.bootstrap,
                default_config: raw.default_config,
                description: raw.description,
                tags: raw.tags,
            });
        }

        Ok(PackageManifest {
            name,
            version,
            homepage: self.homepage,
            author: self.author,
            license: self.license,
            description: self.description,
            location,
            dev_build_script: self.dev_build_script.filter(|s| !s.trim().is_empty()),
            plugins,
        })
    }
}

/// Parse a manifest document in the given format
pub fn parse_str(
    data: &str,
    format: ConfigFormat,
    location: PackageLocation,
) -> Result<PackageManifest, PackageSystemError> {
    let raw: RawPackageManifest =
        format.parse(data).map_err(|e| PackageSystemError::manifest(&location, e.to_string()))?;
    raw.into_manifest(location)
}

/// Locate the manifest file inside a package directory
pub fn find_manifest(dir: &Path) -> Option<PathBuf> {
    first_existing_file(dir, MANIFEST_FILE_NAMES)
}

/// Whether `dir` holds a manifest file
pub fn has_manifest(dir: &Path) -> bool {
    find_manifest(dir).is_some()
}

/// Read and parse the manifest in `dir`; `Ok(None)` when there is none
pub async fn load_from_dir(dir: &Path) -> Result<Option<PackageManifest>, PackageSystemError> {
    let Some(path) = find_manifest(dir) else {
        return Ok(None);
    };
    let format = ConfigFormat::from_path(&path)
        .ok_or_else(|| PackageSystemError::manifest(path.display(), "unsupported manifest format"))?;
    let data = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| PackageSystemError::io(e, "read manifest", &path))?;
    parse_str(&data, format, PackageLocation::Local(dir.to_path_buf())).map(Some)
}
