//! TOML-based persistence for the bridge configuration and zone definitions.
//!
//! Two files live in the platform config directory:
//! - `config.toml` — runtime settings ([`BridgeConfig`])
//! - `zones.toml`  — zone definitions ([`ZonesFile`])
//!
//! Platform directories:
//! - Windows:  `%APPDATA%\PresenceBridge\`
//! - Linux:    `$XDG_CONFIG_HOME/presence-bridge/` (or `~/.config/...`)
//! - macOS:    `~/Library/Application Support/PresenceBridge/`
//!
//! A missing file yields defaults, so first run needs no setup; every field
//! carries a serde default, so files written by older versions keep working.

use std::path::PathBuf;

use thiserror::Error;
use tracing::info;

use crate::domain::config::{BridgeConfig, ZonesFile};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The value could not be serialized to TOML.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Resolves the directory holding both files.
pub fn config_dir() -> Result<PathBuf, StorageError> {
    platform_config_dir().ok_or(StorageError::NoPlatformConfigDir)
}

pub fn config_file_path() -> Result<PathBuf, StorageError> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn zones_file_path() -> Result<PathBuf, StorageError> {
    Ok(config_dir()?.join("zones.toml"))
}

/// Loads the bridge configuration, falling back to defaults when the file
/// does not exist yet.
pub fn load_config() -> Result<BridgeConfig, StorageError> {
    load_toml(config_file_path()?)
}

/// Persists the bridge configuration, creating the directory if needed.
pub fn save_config(config: &BridgeConfig) -> Result<(), StorageError> {
    save_toml(config_file_path()?, config)
}

/// Loads the zone definitions, falling back to defaults when the file does
/// not exist yet.
pub fn load_zones() -> Result<ZonesFile, StorageError> {
    load_toml(zones_file_path()?)
}

/// Persists the zone definitions, creating the directory if needed.
pub fn save_zones(zones: &ZonesFile) -> Result<(), StorageError> {
    save_toml(zones_file_path()?, zones)
}

// ── Generic helpers ───────────────────────────────────────────────────────────

fn load_toml<T>(path: PathBuf) -> Result<T, StorageError>
where
    T: serde::de::DeserializeOwned + Default,
{
    match std::fs::read_to_string(&path) {
        Ok(content) => {
            let value = toml::from_str(&content)?;
            info!("loaded {}", path.display());
            Ok(value)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("{} not found, using defaults", path.display());
            Ok(T::default())
        }
        Err(source) => Err(StorageError::Io { path, source }),
    }
}

fn save_toml<T>(path: PathBuf, value: &T) -> Result<(), StorageError>
where
    T: serde::Serialize,
{
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| StorageError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let content = toml::to_string_pretty(value)?;
    std::fs::write(&path, content).map_err(|source| StorageError::Io {
        path: path.clone(),
        source,
    })?;
    info!("saved {}", path.display());
    Ok(())
}

/// Resolves the platform-appropriate config directory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("PresenceBridge"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("presence-bridge"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("PresenceBridge")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
