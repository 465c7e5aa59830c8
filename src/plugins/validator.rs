//! Plugin manifest validation
//!
//! Checks manifests and binaries before a plugin is loaded, and validates
//! per-plugin configuration against the manifest's config schema.

use super::manifest::{ConfigSchema, PluginManifest};
use super::{PluginError, PluginResult};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;

/// Plugin manifest validator
pub struct PluginValidator;

impl PluginValidator {
    /// Validate a manifest and its binary under `plugins_dir`
    ///
    /// Succeeds iff name, version and binary are non-empty and the binary
    /// exists at `<plugins_dir>/<name>/<binary>` with an executable bit set.
    pub fn validate(manifest: &PluginManifest, plugins_dir: &Path) -> PluginResult<()> {
        Self::validate_fields(manifest)?;
        Self::validate_binary(&manifest.binary_path(plugins_dir))
    }

    /// Check the required manifest fields
    pub fn validate_fields(manifest: &PluginManifest) -> PluginResult<()> {
        if manifest.name.trim().is_empty() {
            return Err(PluginError::Manifest(
                "Plugin name cannot be empty".to_string(),
            ));
        }
        if manifest.version.trim().is_empty() {
            return Err(PluginError::Manifest(format!(
                "Plugin '{}' has an empty version",
                manifest.name
            )));
        }
        if manifest.binary.trim().is_empty() {
            return Err(PluginError::Manifest(format!(
                "Plugin '{}' has an empty binary path",
                manifest.name
            )));
        }
        Ok(())
    }

    /// Check that the binary exists and is executable
    pub fn validate_binary(path: &Path) -> PluginResult<()> {
        let metadata = std::fs::metadata(path).map_err(|e| PluginError::Binary {
            path: path.to_path_buf(),
            reason: format!("not found ({})", e),
        })?;

        if !metadata.is_file() {
            return Err(PluginError::Binary {
                path: path.to_path_buf(),
                reason: "not a regular file".to_string(),
            });
        }

        if !is_executable(&metadata) {
            return Err(PluginError::Binary {
                path: path.to_path_buf(),
                reason: "not executable".to_string(),
            });
        }

        Ok(())
    }

    /// Verify checksum and platform restrictions declared by the manifest
    pub fn verify_integrity(
        manifest: &PluginManifest,
        plugins_dir: &Path,
        os: &str,
        arch: &str,
    ) -> PluginResult<()> {
        if !manifest.supports_platform(os, arch) {
            return Err(PluginError::Load {
                name: manifest.name.clone(),
                reason: format!("platform {}/{} is not supported", os, arch),
            });
        }

        if let Some(expected) = &manifest.checksum {
            let path = manifest.binary_path(plugins_dir);
            let actual = sha256_file(&path)?;
            let expected = expected
                .strip_prefix("sha256:")
                .unwrap_or(expected)
                .to_ascii_lowercase();
            if actual != expected {
                return Err(PluginError::Binary {
                    path,
                    reason: format!("checksum mismatch: expected {}, got {}", expected, actual),
                });
            }
        }

        Ok(())
    }

    /// Validate plugin configuration values against a schema
    ///
    /// Returns the configuration with defaults filled in for absent options.
    pub fn validate_config(
        plugin: &str,
        schema: &ConfigSchema,
        values: &HashMap<String, serde_json::Value>,
    ) -> PluginResult<HashMap<String, serde_json::Value>> {
        let mut resolved = values.clone();

        for option in schema.options() {
            let required = option.required || schema.required.iter().any(|r| r.name == option.name);

            match values.get(&option.name) {
                Some(value) => {
                    if !option.option_type.matches(value) {
                        return Err(PluginError::Validation(format!(
                            "Plugin '{}' option '{}' must be of type {}",
                            plugin, option.name, option.option_type
                        )));
                    }
                    if !option.allowed_values.is_empty() && !option.allowed_values.contains(value)
                    {
                        return Err(PluginError::Validation(format!(
                            "Plugin '{}' option '{}' has value {} outside the allowed set",
                            plugin, option.name, value
                        )));
                    }
                }
                None => match &option.default {
                    Some(default) => {
                        resolved.insert(option.name.clone(), default.clone());
                    }
                    None if required => {
                        return Err(PluginError::Validation(format!(
                            "Plugin '{}' is missing required option '{}'",
                            plugin, option.name
                        )));
                    }
                    None => {}
                },
            }
        }

        Ok(resolved)
    }
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    true
}

fn sha256_file(path: &Path) -> PluginResult<String> {
    let bytes = std::fs::read(path).map_err(|e| PluginError::Binary {
        path: path.to_path_buf(),
        reason: format!("unreadable ({})", e),
    })?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::manifest::{ConfigOption, OptionType, Platform};
    use serde_json::json;
    use tempfile::TempDir;

    fn manifest(name: &str, version: &str, binary: &str) -> PluginManifest {
        PluginManifest {
            name: name.to_string(),
            version: version.to_string(),
            description: String::new(),
            author: String::new(),
            binary: binary.to_string(),
            checksum: None,
            dependencies: vec![],
            platforms: vec![],
            config: ConfigSchema::default(),
        }
    }

    fn write_binary(dir: &Path, name: &str, binary: &str, mode: u32) {
        let plugin_dir = dir.join(name);
        std::fs::create_dir_all(&plugin_dir).unwrap();
        let path = plugin_dir.join(binary);
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
        }
        #[cfg(not(unix))]
        let _ = mode;
    }

    #[test]
    fn test_empty_fields_rejected() {
        let dir = TempDir::new().unwrap();
        for m in [
            manifest("", "1.0", "run"),
            manifest("p", "", "run"),
            manifest("p", "1.0", ""),
        ] {
            let err = PluginValidator::validate(&m, dir.path()).unwrap_err();
            assert!(matches!(err, PluginError::Manifest(_)), "{:?}", err);
        }
    }

    #[test]
    fn test_missing_binary_rejected() {
        let dir = TempDir::new().unwrap();
        let err = PluginValidator::validate(&manifest("p", "1.0", "run"), dir.path()).unwrap_err();
        assert!(matches!(err, PluginError::Binary { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_executable_binary_rejected() {
        let dir = TempDir::new().unwrap();
        write_binary(dir.path(), "p", "run", 0o644);
        let err = PluginValidator::validate(&manifest("p", "1.0", "run"), dir.path()).unwrap_err();
        assert!(err.to_string().contains("not executable"));
    }

    #[test]
    fn test_executable_binary_accepted() {
        let dir = TempDir::new().unwrap();
        write_binary(dir.path(), "p", "run", 0o755);
        assert!(PluginValidator::validate(&manifest("p", "1.0", "run"), dir.path()).is_ok());
    }

    #[test]
    fn test_checksum_verification() {
        let dir = TempDir::new().unwrap();
        write_binary(dir.path(), "p", "run", 0o755);
        let digest = format!("{:x}", Sha256::digest(b"#!/bin/sh\nexit 0\n"));

        let mut m = manifest("p", "1.0", "run");
        m.checksum = Some(format!("sha256:{}", digest));
        assert!(PluginValidator::verify_integrity(&m, dir.path(), "linux", "x86_64").is_ok());

        m.checksum = Some("sha256:00".to_string());
        let err = PluginValidator::verify_integrity(&m, dir.path(), "linux", "x86_64").unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn test_platform_mismatch_is_load_error() {
        let dir = TempDir::new().unwrap();
        let mut m = manifest("p", "1.0", "run");
        m.platforms = vec![Platform {
            os: "linux".to_string(),
            arch: "aarch64".to_string(),
        }];
        let err = PluginValidator::verify_integrity(&m, dir.path(), "linux", "x86_64").unwrap_err();
        assert!(matches!(err, PluginError::Load { .. }));
    }

    fn option(name: &str, option_type: OptionType, required: bool) -> ConfigOption {
        ConfigOption {
            name: name.to_string(),
            option_type,
            description: String::new(),
            default: None,
            required,
            allowed_values: vec![],
        }
    }

    #[test]
    fn test_config_required_and_defaults() {
        let mut engine = option("engine", OptionType::String, false);
        engine.default = Some(json!("raft-kv"));
        engine.allowed_values = vec![json!("raft-kv"), json!("partitioned-raft-kv")];
        let schema = ConfigSchema {
            required: vec![option("version", OptionType::String, false)],
            optional: vec![engine],
        };

        let err = PluginValidator::validate_config("p", &schema, &HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("missing required option 'version'"));

        let values = HashMap::from([("version".to_string(), json!("v7.5.0"))]);
        let resolved = PluginValidator::validate_config("p", &schema, &values).unwrap();
        assert_eq!(resolved["engine"], json!("raft-kv"));

        let values = HashMap::from([
            ("version".to_string(), json!("v7.5.0")),
            ("engine".to_string(), json!("rocks")),
        ]);
        assert!(PluginValidator::validate_config("p", &schema, &values).is_err());
    }

    #[test]
    fn test_config_type_mismatch() {
        let schema = ConfigSchema {
            required: vec![],
            optional: vec![option("replicas", OptionType::Int, false)],
        };
        let values = HashMap::from([("replicas".to_string(), json!("three"))]);
        let err = PluginValidator::validate_config("p", &schema, &values).unwrap_err();
        assert!(err.to_string().contains("type int"));
    }
}
