//! Plugin loader
//!
//! Scans the plugins directory for `<name>/plugin.yaml` manifests. Malformed
//! manifests are logged and skipped so they never hide sibling plugins.

use super::manifest::{MANIFEST_FILE, MANIFEST_FILE_ALT, PluginManifest};
use super::validator::PluginValidator;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Plugin loader
pub struct PluginLoader {
    plugins_dir: PathBuf,
}

impl PluginLoader {
    /// Create a plugin loader for a plugins directory
    pub fn with_dir(plugins_dir: PathBuf) -> Self {
        Self { plugins_dir }
    }

    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    /// Create the plugins directory if it does not exist yet
    pub fn ensure_dir(&self) -> Result<()> {
        if !self.plugins_dir.exists() {
            tracing::info!("Creating plugins directory: {:?}", self.plugins_dir);
            std::fs::create_dir_all(&self.plugins_dir).with_context(|| {
                format!("Failed to create plugins directory: {:?}", self.plugins_dir)
            })?;
        }
        Ok(())
    }

    /// Discover all manifests in immediate subdirectories of the plugins directory
    pub fn discover(&self) -> Result<Vec<PluginManifest>> {
        tracing::debug!("Discovering plugins in: {:?}", self.plugins_dir);

        if !self.plugins_dir.exists() {
            tracing::info!("Plugins directory does not exist: {:?}", self.plugins_dir);
            return Ok(vec![]);
        }

        let mut entries: Vec<PathBuf> = std::fs::read_dir(&self.plugins_dir)
            .context("Failed to read plugins directory")?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_dir())
            .collect();
        // read_dir order is platform dependent
        entries.sort();

        let mut manifests = Vec::new();
        let mut seen = HashSet::new();
        let mut errors = 0usize;

        for dir in entries {
            let Some(manifest_path) = Self::manifest_in(&dir) else {
                tracing::debug!("Skipping {:?}: no manifest", dir);
                continue;
            };

            match Self::load_manifest(&manifest_path) {
                Ok(manifest) => {
                    if !seen.insert(manifest.name.clone()) {
                        tracing::warn!(
                            "Duplicate plugin name '{}' in {:?}, skipping",
                            manifest.name,
                            manifest_path
                        );
                        errors += 1;
                        continue;
                    }
                    tracing::info!("Discovered plugin: {} v{}", manifest.name, manifest.version);
                    manifests.push(manifest);
                }
                Err(e) => {
                    tracing::warn!("Failed to load plugin manifest {:?}: {:#}", manifest_path, e);
                    errors += 1;
                }
            }
        }

        if errors > 0 {
            tracing::warn!(
                "Discovered {} plugins with {} errors",
                manifests.len(),
                errors
            );
        } else {
            tracing::debug!("Discovered {} plugins", manifests.len());
        }

        Ok(manifests)
    }

    /// Read and check a single manifest file
    pub fn load_manifest(path: &Path) -> Result<PluginManifest> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plugin manifest: {:?}", path))?;

        let manifest = PluginManifest::from_yaml(&content)
            .with_context(|| format!("Failed to parse plugin YAML: {:?}", path))?;

        PluginValidator::validate_fields(&manifest)
            .with_context(|| format!("Plugin manifest validation failed: {:?}", path))?;

        Ok(manifest)
    }

    /// Manifest file inside a plugin directory, if any
    pub fn manifest_in(dir: &Path) -> Option<PathBuf> {
        [MANIFEST_FILE, MANIFEST_FILE_ALT]
            .iter()
            .map(|file| dir.join(file))
            .find(|path| path.is_file())
    }

    /// Order manifests so every plugin comes after the plugins it depends on
    ///
    /// Plugins whose dependencies are unknown or cyclic are placed last, in
    /// discovery order; loading them reports the unmet dependency.
    pub fn dependency_order(manifests: &[PluginManifest]) -> Vec<PluginManifest> {
        let mut placed: HashSet<&str> = HashSet::new();
        let mut ordered = Vec::with_capacity(manifests.len());

        loop {
            let mut progressed = false;
            for manifest in manifests {
                if placed.contains(manifest.name.as_str()) {
                    continue;
                }
                let ready = manifest
                    .dependencies
                    .iter()
                    .all(|dep| placed.contains(dep.as_str()));
                if ready {
                    placed.insert(manifest.name.as_str());
                    ordered.push(manifest.clone());
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }

        for manifest in manifests {
            if !placed.contains(manifest.name.as_str()) {
                ordered.push(manifest.clone());
            }
        }

        ordered
    }
}
