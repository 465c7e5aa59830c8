//! Where clusterplug keeps its configuration, plugins and release cache
//!
//! XDG base directories on Unix, known folders on Windows; both overridable
//! through environment variables.

use std::path::{Path, PathBuf};

const APP_NAME: &str = "clusterplug";

/// Configuration directory
///
/// `CLUSTERPLUG_CONFIG_DIR`, else `$XDG_CONFIG_HOME/clusterplug` or
/// `~/.config/clusterplug` (Windows: `%APPDATA%\clusterplug\config`).
pub fn config_dir() -> PathBuf {
    resolve("CLUSTERPLUG_CONFIG_DIR", Kind::Config)
}

/// Data directory holding plugins and downloaded releases
///
/// `CLUSTERPLUG_DATA_DIR`, else `$XDG_DATA_HOME/clusterplug` or
/// `~/.local/share/clusterplug`.
pub fn data_dir() -> PathBuf {
    resolve("CLUSTERPLUG_DATA_DIR", Kind::Data)
}

#[derive(Clone, Copy)]
enum Kind {
    Config,
    Data,
}

impl Kind {
    #[cfg(not(windows))]
    fn xdg_var(self) -> &'static str {
        match self {
            Kind::Config => "XDG_CONFIG_HOME",
            Kind::Data => "XDG_DATA_HOME",
        }
    }

    /// Location relative to the home directory
    fn home_relative(self) -> PathBuf {
        match self {
            Kind::Config => PathBuf::from(".config"),
            Kind::Data => Path::new(".local").join("share"),
        }
    }
}

fn resolve(override_var: &str, kind: Kind) -> PathBuf {
    if let Ok(dir) = std::env::var(override_var) {
        return PathBuf::from(dir);
    }

    #[cfg(windows)]
    {
        let dirs = directories::ProjectDirs::from("", "", APP_NAME);
        let dir = dirs.map(|dirs| match kind {
            Kind::Config => dirs.config_dir().to_path_buf(),
            Kind::Data => dirs.data_dir().to_path_buf(),
        });
        dir.unwrap_or_else(|| Path::new(".").join(kind.home_relative()).join(APP_NAME))
    }

    #[cfg(not(windows))]
    {
        let base = std::env::var(kind.xdg_var()).map(PathBuf::from).unwrap_or_else(|_| {
            directories::BaseDirs::new()
                .map(|dirs| dirs.home_dir().to_path_buf())
                .unwrap_or_else(|| PathBuf::from("."))
                .join(kind.home_relative())
        });
        base.join(APP_NAME)
    }
}

/// Get the root configuration file path
pub fn root_config_path() -> PathBuf {
    config_dir().join("config.yaml")
}

/// Plugins directory used when the configuration names none
pub fn default_plugins_dir() -> PathBuf {
    data_dir().join("plugins")
}

/// Downloaded release binaries, one sub-directory per version
pub fn release_cache_dir() -> PathBuf {
    data_dir().join("releases")
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir() {
        let dir = config_dir();
        assert!(
            dir.to_string_lossy().contains(APP_NAME)
                || std::env::var("CLUSTERPLUG_CONFIG_DIR").is_ok()
        );
    }

    #[test]
    fn test_derived_paths() {
        assert!(root_config_path().ends_with("config.yaml"));
        assert!(default_plugins_dir().ends_with("plugins"));
        assert!(release_cache_dir().ends_with("releases"));
    }

    #[test]
    fn test_ensure_dir_creates_nested() {
        let temp = tempfile::TempDir::new().unwrap();
        let nested = temp.path().join("a").join("b");
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
        ensure_dir(&nested).unwrap();
    }
}
