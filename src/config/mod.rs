//! Configuration system for clusterplug
//!
//! One YAML file merged over built-in defaults, with environment overrides on
//! top. Plugin option maps are kept as JSON values and handed to plugins at
//! init.

mod defaults;
pub mod loader;
pub mod paths;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::{BootstrapConfig, Config, SshConfig, TimeoutConfig};

/// Get a configuration value by key (dot notation)
pub fn get_config_value(config: &Config, key: &str) -> anyhow::Result<String> {
    match key {
        "pluginsDir" => Ok(config.plugins_dir().display().to_string()),
        "timeouts.initSecs" => Ok(config.timeouts.init_secs.to_string()),
        "timeouts.validateSecs" => Ok(config.timeouts.validate_secs.to_string()),
        "timeouts.cleanupSecs" => Ok(config.timeouts.cleanup_secs.to_string()),
        "timeouts.executeSecs" => Ok(config.timeouts.execute_secs.to_string()),
        "timeouts.lifecycleSecs" => Ok(config.timeouts.lifecycle_secs.to_string()),
        "bootstrap.version" => Ok(config.bootstrap.version.clone()),
        "bootstrap.releaseUrl" => Ok(config.bootstrap.release_url.clone()),
        "bootstrap.cacheDir" => Ok(config.bootstrap.cache_dir().display().to_string()),
        "bootstrap.dataBase" => Ok(config.bootstrap.data_base.clone()),
        "bootstrap.logBase" => Ok(config.bootstrap.log_base.clone()),
        "bootstrap.deployBase" => Ok(config.bootstrap.deploy_base.clone()),
        "bootstrap.storageEngine" => Ok(config.bootstrap.storage_engine.clone()),
        "bootstrap.ssh.user" => Ok(config.bootstrap.ssh.user.clone()),
        "bootstrap.ssh.port" => Ok(config.bootstrap.ssh.port.to_string()),
        "bootstrap.ssh.identityFile" => {
            Ok(config.bootstrap.ssh.identity_file.clone().unwrap_or_default())
        }
        "bootstrap.ssh.connectTimeoutSecs" => Ok(config.bootstrap.ssh.connect_timeout_secs.to_string()),
        _ => Err(anyhow::anyhow!("Unknown configuration key: {}", key)),
    }
}

/// Set a configuration value by key (dot notation)
pub fn set_config_value(config: &mut Config, key: &str, value: &str) -> anyhow::Result<()> {
    use anyhow::Context;
    match key {
        "pluginsDir" => config.plugins_dir = Some(value.to_string()),
        "timeouts.initSecs" => config.timeouts.init_secs = seconds(key, value)?,
        "timeouts.validateSecs" => config.timeouts.validate_secs = seconds(key, value)?,
        "timeouts.cleanupSecs" => config.timeouts.cleanup_secs = seconds(key, value)?,
        "timeouts.executeSecs" => config.timeouts.execute_secs = seconds(key, value)?,
        "timeouts.lifecycleSecs" => config.timeouts.lifecycle_secs = seconds(key, value)?,
        "bootstrap.version" => config.bootstrap.version = value.to_string(),
        "bootstrap.releaseUrl" => config.bootstrap.release_url = value.to_string(),
        "bootstrap.cacheDir" => {
            config.bootstrap.cache_dir = (!value.is_empty()).then(|| value.to_string());
        }
        "bootstrap.dataBase" => config.bootstrap.data_base = value.to_string(),
        "bootstrap.logBase" => config.bootstrap.log_base = value.to_string(),
        "bootstrap.deployBase" => config.bootstrap.deploy_base = value.to_string(),
        "bootstrap.storageEngine" => config.bootstrap.storage_engine = value.to_string(),
        "bootstrap.ssh.user" => config.bootstrap.ssh.user = value.to_string(),
        "bootstrap.ssh.port" => {
            config.bootstrap.ssh.port = value.parse().context("bootstrap.ssh.port must be a port number")?;
        }
        "bootstrap.ssh.identityFile" => {
            config.bootstrap.ssh.identity_file = (!value.is_empty()).then(|| value.to_string());
        }
        "bootstrap.ssh.connectTimeoutSecs" => {
            config.bootstrap.ssh.connect_timeout_secs = seconds(key, value)?;
        }
        _ => return Err(anyhow::anyhow!("Unknown configuration key: {}", key)),
    }

    Ok(())
}

/// Positive number of seconds
fn seconds(key: &str, value: &str) -> anyhow::Result<u64> {
    let secs: u64 = value
        .parse()
        .map_err(|_| anyhow::anyhow!("{} must be a number of seconds", key))?;
    if secs == 0 {
        return Err(anyhow::anyhow!("{} must be greater than zero", key));
    }
    Ok(secs)
}
