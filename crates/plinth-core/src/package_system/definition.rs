use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use serde_json::Value;

use crate::kernel::constants::DESCRIPTOR_SECTION;
use crate::package_system::error::PackageSystemError;
use crate::package_system::location::PackageLocation;
use crate::package_system::manifest::{self, PackageManifest, RawPackageManifest, RawPluginDeclaration};

/// Extra information a builder may use when resolving a package
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DefinitionHints {
    pub dev_mode: bool,
}

/// Turns a package location into a manifest.
///
/// Returning `Ok(None)` means "not mine"; the next builder in the chain is asked.
#[async_trait]
pub trait PackageDefinitionBuilder: Send + Sync {
    fn name(&self) -> &str;

    async fn build_definition(
        &self,
        location: &PackageLocation,
        hints: &DefinitionHints,
    ) -> Result<Option<PackageManifest>, PackageSystemError>;
}

/// Reads `plinth.{json,yaml,yml,toml}` from a local package directory
#[derive(Debug, Default)]
pub struct LocalManifestBuilder;

#[async_trait]
impl PackageDefinitionBuilder for LocalManifestBuilder {
    fn name(&self) -> &str {
        "local-manifest"
    }

    async fn build_definition(
        &self,
        location: &PackageLocation,
        _hints: &DefinitionHints,
    ) -> Result<Option<PackageManifest>, PackageSystemError> {
        match location.local_path() {
            Some(dir) => manifest::load_from_dir(dir).await,
            None => Ok(None),
        }
    }
}

/// Fetch `url`, mapping HTTP 404 to `Ok(None)`
pub(crate) async fn fetch_body(client: &reqwest::Client, url: &str) -> Result<Option<String>, PackageSystemError> {
    let fetch_error = |e: reqwest::Error| PackageSystemError::FetchError { url: url.to_string(), message: e.to_string() };

    let response = client.get(url).send().await.map_err(fetch_error)?;
    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Ok(None);
    }
    let response = response.error_for_status().map_err(fetch_error)?;
    response.text().await.map(Some).map_err(fetch_error)
}

/// Fetches a remote package document over HTTP.
///
/// Accepts either a manifest document or an npm-style descriptor whose
/// `plinth` section carries the plugin list and dev build script.
#[derive(Debug, Clone, Default)]
pub struct RemoteDescriptorBuilder {
    client: reqwest::Client,
}

impl RemoteDescriptorBuilder {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Translate a fetched JSON document into a manifest
    pub fn translate(document: Value, location: PackageLocation) -> Result<PackageManifest, PackageSystemError> {
        let raw = match document.get(DESCRIPTOR_SECTION) {
            Some(section) => Self::from_descriptor(&document, section, &location)?,
            None => serde_json::from_value::<RawPackageManifest>(document)
                .map_err(|e| PackageSystemError::manifest(&location, e.to_string()))?,
        };
        raw.into_manifest(location)
    }

    fn from_descriptor(
        document: &Value,
        section: &Value,
        location: &PackageLocation,
    ) -> Result<RawPackageManifest, PackageSystemError> {
        let text = |value: &Value, key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);

        let plugins = match section.get("plugins") {
            Some(plugins) => serde_json::from_value::<Vec<RawPluginDeclaration>>(plugins.clone())
                .map_err(|e| PackageSystemError::manifest(location, format!("invalid '{}.plugins': {}", DESCRIPTOR_SECTION, e)))?,
            None => Vec::new(),
        };
        // npm allows `author` as a string or as `{ name, email, url }`
        let author = match document.get("author") {
            Some(Value::String(author)) => Some(author.clone()),
            Some(object @ Value::Object(_)) => text(object, "name"),
            _ => None,
        };

        Ok(RawPackageManifest {
            name: text(document, "name").unwrap_or_default(),
            version: text(document, "version").unwrap_or_default(),
            homepage: text(document, "homepage"),
            author,
            license: text(document, "license"),
            description: text(document, "description"),
            dev_build_script: text(section, "devBuildScript"),
            plugins,
        })
    }
}

#[async_trait]
impl PackageDefinitionBuilder for RemoteDescriptorBuilder {
    fn name(&self) -> &str {
        "remote-descriptor"
    }

    async fn build_definition(
        &self,
        location: &PackageLocation,
        _hints: &DefinitionHints,
    ) -> Result<Option<PackageManifest>, PackageSystemError> {
        let Some(url) = location.url() else {
            return Ok(None);
        };
        let Some(body) = fetch_body(&self.client, url).await? else {
            debug!("Remote package '{}' returned 404", url);
            return Ok(None);
        };
        let document: Value = serde_json::from_str(&body)
            .map_err(|e| PackageSystemError::manifest(location, format!("invalid JSON: {}", e)))?;
        Self::translate(document, location.clone()).map(Some)
    }
}

/// Ordered chain of definition builders; the first manifest wins
#[derive(Clone, Default)]
pub struct DefinitionBuilderChain {
    builders: Vec<Arc<dyn PackageDefinitionBuilder>>,
}

impl std::fmt::Debug for DefinitionBuilderChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefinitionBuilderChain").field("builders", &self.names()).finish()
    }
}

impl DefinitionBuilderChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain holding the local manifest builder followed by the remote descriptor builder
    pub fn with_builtin(client: reqwest::Client) -> Self {
        let mut chain = Self::new();
        chain.register(Arc::new(LocalManifestBuilder));
        chain.register(Arc::new(RemoteDescriptorBuilder::new(client)));
        chain
    }

    /// Append a builder; it is consulted after every builder registered before it
    pub fn register(&mut self, builder: Arc<dyn PackageDefinitionBuilder>) {
        self.builders.push(builder);
    }

    /// Insert a builder ahead of all others
    pub fn prepend(&mut self, builder: Arc<dyn PackageDefinitionBuilder>) {
        self.builders.insert(0, builder);
    }

    pub fn names(&self) -> Vec<String> {
        self.builders.iter().map(|b| b.name().to_string()).collect()
    }

    /// Ask each builder in order; returns the winning builder's name with the manifest.
    ///
    /// Builder errors are logged and skipped. When nobody yields a manifest the
    /// collected errors end up in [`PackageSystemError::NoDefinition`].
    pub async fn resolve(
        &self,
        location: &PackageLocation,
        hints: &DefinitionHints,
    ) -> Result<(String, PackageManifest), PackageSystemError> {
        let mut errors = Vec::new();
        for builder in &self.builders {
            match builder.build_definition(location, hints).await {
                Ok(Some(manifest)) => {
                    debug!("Builder '{}' resolved package '{}' at '{}'", builder.name(), manifest.name, location);
                    return Ok((builder.name().to_string(), manifest));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Definition builder '{}' failed for '{}': {}", builder.name(), location, e);
                    errors.push(e.to_string());
                }
            }
        }
        let detail = if errors.is_empty() { String::new() } else { format!(": {}", errors.join("; ")) };
        Err(PackageSystemError::NoDefinition { location: location.to_string(), detail })
    }
}
