//! Configuration loading and merging logic
//!
//! Precedence order (highest to lowest):
//! 1. Environment variable overrides
//! 2. Configuration file
//! 3. Built-in defaults

use super::{defaults, paths, schema::Config};
use anyhow::{Context, Result};
use std::path::Path;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with all layers merged
    ///
    /// `path` overrides the root config file location. An explicitly named
    /// file must exist; the root file is optional.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let mut config = Self::load_defaults();

        match path {
            Some(path) => config = Self::load_file(path)?,
            None => {
                let root = paths::root_config_path();
                if root.exists() {
                    config = Self::load_file(&root)?;
                } else {
                    tracing::debug!("No config file at {}, using defaults", root.display());
                }
            }
        }

        let config = Self::apply_env_overrides(config);
        Self::check_durations(&config)?;
        Ok(config)
    }

    /// Every timeout must be a positive number of seconds
    fn check_durations(config: &Config) -> Result<()> {
        let timeouts = &config.timeouts;
        for (key, secs) in [
            ("timeouts.initSecs", timeouts.init_secs),
            ("timeouts.validateSecs", timeouts.validate_secs),
            ("timeouts.cleanupSecs", timeouts.cleanup_secs),
            ("timeouts.executeSecs", timeouts.execute_secs),
            ("timeouts.lifecycleSecs", timeouts.lifecycle_secs),
            (
                "bootstrap.ssh.connectTimeoutSecs",
                config.bootstrap.ssh.connect_timeout_secs,
            ),
        ] {
            if secs == 0 {
                return Err(anyhow::anyhow!("{} must be greater than zero", key));
            }
        }
        Ok(())
    }

    /// Load configuration from a file
    pub fn load_file(path: &Path) -> Result<Config> {
        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load configuration and check value ranges
    pub fn validate(path: Option<&Path>) -> Result<Config> {
        let config = Self::load(path).context("Failed to load configuration")?;

        let release_url = &config.bootstrap.release_url;
        if !release_url.contains("{component}") {
            return Err(anyhow::anyhow!(
                "bootstrap.releaseUrl must contain a {{component}} placeholder"
            ));
        }
        url::Url::parse(
            &release_url
                .replace("{component}", "pd")
                .replace("{version}", &config.bootstrap.version),
        )
        .context("bootstrap.releaseUrl is not a valid URL")?;

        Ok(config)
    }

    /// Load default configuration
    pub fn load_defaults() -> Config {
        defaults::default_config()
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(mut config: Config) -> Config {
        if let Ok(dir) = std::env::var("CLUSTERPLUG_PLUGINS_DIR") {
            config.plugins_dir = Some(dir);
        }

        if let Ok(version) = std::env::var("CLUSTERPLUG_BOOTSTRAP_VERSION") {
            config.bootstrap.version = version;
        }

        if let Ok(user) = std::env::var("CLUSTERPLUG_SSH_USER") {
            config.bootstrap.ssh.user = user;
        }

        config
    }

    /// Save configuration to a file
    pub fn save(config: &Config, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            paths::ensure_dir(parent)?;
        }

        let yaml =
            serde_yaml::to_string(config).context("Failed to serialize configuration to YAML")?;

        std::fs::write(path, yaml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_explicit_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(&path, "timeouts:\n  initSecs: 5\n").unwrap();

        let config = ConfigLoader::load(Some(&path)).unwrap();
        assert_eq!(config.timeouts.init_secs, 5);
        assert_eq!(config.timeouts.cleanup_secs, 10);
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let temp = TempDir::new().unwrap();
        let err = ConfigLoader::load(Some(&temp.path().join("absent.yaml"))).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_save_then_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.yaml");
        let mut config = Config::default();
        config.bootstrap.version = "v8.1.0".to_string();
        ConfigLoader::save(&config, &path).unwrap();

        let loaded = ConfigLoader::load_file(&path).unwrap();
        assert_eq!(loaded.bootstrap.version, "v8.1.0");
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(&path, "timeouts:\n  executeSecs: 0\n").unwrap();
        let err = ConfigLoader::validate(Some(&path)).unwrap_err();
        assert!(format!("{:#}", err).contains("executeSecs"));
    }

    #[test]
    fn test_load_rejects_zero_timeout() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(&path, "timeouts:\n  lifecycleSecs: 0\n").unwrap();
        let err = ConfigLoader::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("timeouts.lifecycleSecs"));

        std::fs::write(&path, "bootstrap:\n  ssh:\n    connectTimeoutSecs: 0\n").unwrap();
        let err = ConfigLoader::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("connectTimeoutSecs"));
    }

    #[test]
    fn test_env_overrides() {
        // SAFETY: set_var is unsafe in Rust 2024; this test owns the variable.
        unsafe {
            std::env::set_var("CLUSTERPLUG_PLUGINS_DIR", "/tmp/env-plugins");
        }

        let config = ConfigLoader::apply_env_overrides(Config::default());
        assert_eq!(config.plugins_dir.as_deref(), Some("/tmp/env-plugins"));

        // SAFETY: as above.
        unsafe {
            std::env::remove_var("CLUSTERPLUG_PLUGINS_DIR");
        }
    }
}
