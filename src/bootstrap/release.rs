//! Release binaries for pd-server and tikv-server
//!
//! Tarballs are fetched from a URL template and the server binary is
//! unpacked into `<cache>/<version>/`. A binary already present in the cache
//! is never downloaded again.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Deployable server component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Pd,
    Tikv,
}

impl Component {
    /// Name used in release archive URLs
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Pd => "pd",
            Component::Tikv => "tikv",
        }
    }

    /// Server binary inside the archive
    pub fn binary_name(&self) -> &'static str {
        match self {
            Component::Pd => "pd-server",
            Component::Tikv => "tikv-server",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Makes component binaries available locally
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Local path of the component's binary for a version
    async fn fetch(&self, component: Component, version: &str) -> Result<PathBuf>;
}

/// Downloads release tarballs over HTTP
pub struct HttpReleaseSource {
    client: reqwest::Client,
    url_template: String,
    cache_dir: PathBuf,
}

impl HttpReleaseSource {
    pub fn new(url_template: impl Into<String>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url_template: url_template.into(),
            cache_dir: cache_dir.into(),
        }
    }

    /// Where a component binary is cached
    pub fn cached_path(&self, component: Component, version: &str) -> PathBuf {
        self.cache_dir.join(version).join(component.binary_name())
    }

    pub fn release_url(&self, component: Component, version: &str) -> Result<url::Url> {
        let raw = self
            .url_template
            .replace("{component}", component.as_str())
            .replace("{version}", version);
        url::Url::parse(&raw).with_context(|| format!("Invalid release URL: {}", raw))
    }
}

#[async_trait]
impl ReleaseSource for HttpReleaseSource {
    async fn fetch(&self, component: Component, version: &str) -> Result<PathBuf> {
        let target = self.cached_path(component, version);
        if target.exists() {
            tracing::debug!("Using cached {} {} at {:?}", component, version, target);
            return Ok(target);
        }

        let url = self.release_url(component, version)?;
        tracing::info!("Downloading {} {} from {}", component, version, url);

        let archive = self
            .client
            .get(url.clone())
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .with_context(|| format!("Failed to download {}", url))?
            .bytes()
            .await
            .with_context(|| format!("Failed to read body of {}", url))?;

        let dest = target.clone();
        tokio::task::spawn_blocking(move || unpack_binary(&archive, component.binary_name(), &dest))
            .await
            .context("Release unpack task failed")??;

        tracing::info!("Cached {} {} at {:?}", component, version, target);
        Ok(target)
    }
}

/// Extract one binary, found by file name anywhere in a `.tar.gz`, to `dest`
pub fn unpack_binary(archive: &[u8], binary_name: &str, dest: &Path) -> Result<()> {
    let decoder = flate2::read::GzDecoder::new(archive);
    let mut tarball = tar::Archive::new(decoder);

    for entry in tarball.entries().context("Corrupt release archive")? {
        let mut entry = entry.context("Corrupt release archive entry")?;
        let is_binary = entry
            .path()
            .ok()
            .and_then(|path| path.file_name().map(|name| name == binary_name))
            .unwrap_or(false);
        if !is_binary || !entry.header().entry_type().is_file() {
            continue;
        }

        let mut contents = Vec::new();
        entry
            .read_to_end(&mut contents)
            .with_context(|| format!("Failed to read {} from archive", binary_name))?;

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        // Write under a temporary name so a partial write never looks cached
        let partial = dest.with_extension("partial");
        std::fs::write(&partial, &contents)
            .with_context(|| format!("Failed to write {}", partial.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&partial, std::fs::Permissions::from_mode(0o755))?;
        }
        std::fs::rename(&partial, dest)
            .with_context(|| format!("Failed to move binary to {}", dest.display()))?;
        return Ok(());
    }

    Err(anyhow::anyhow!("{} not found in release archive", binary_name))
}
