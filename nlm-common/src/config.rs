//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "nlm.db";

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV: &str = "NLM_ROOT_FOLDER";

/// Per-module TOML configuration
///
/// Every field is optional; missing fields fall through to the next tier
/// (database settings or compiled defaults).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub batch_size: Option<usize>,
    pub processing_interval_ms: Option<u64>,
    pub shutdown_timeout_ms: Option<u64>,
    /// Form keys registered at startup when they do not exist yet
    #[serde(default)]
    pub forms: Vec<String>,
}

impl TomlConfig {
    /// Parse a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Invalid TOML in {}: {}", path.display(), e)))
    }

    /// Load `<config dir>/nlm/<module>.toml`, or defaults when no file exists
    pub fn load_for_module(module_name: &str) -> Result<Self> {
        match config_file_path(module_name) {
            Some(path) => {
                info!("Loading config file: {}", path.display());
                Self::load(&path)
            }
            None => {
                debug!("No config file for {}, using defaults", module_name);
                Ok(Self::default())
            }
        }
    }
}

/// Locate the config file for a module
///
/// Checks the user config directory first, then `/etc/nlm` on Linux.
pub fn config_file_path(module_name: &str) -> Option<PathBuf> {
    let file_name = format!("{}.toml", module_name);

    if let Some(path) = dirs::config_dir().map(|d| d.join("nlm").join(&file_name)) {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system = PathBuf::from("/etc/nlm").join(&file_name);
        if system.exists() {
            return Some(system);
        }
    }

    None
}

/// Root folder resolution, highest priority first:
/// 1. Command-line argument
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default
pub fn resolve_root_folder(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml_config: &TomlConfig,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &toml_config.root_folder {
        return path.clone();
    }

    default_root_folder()
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/nlm (or /var/lib/nlm for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("nlm"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/nlm"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("nlm"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/nlm"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("nlm"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\nlm"))
    } else {
        PathBuf::from("./nlm_data")
    }
}

/// Create the root folder if missing
pub fn ensure_root_folder(root_folder: &Path) -> Result<()> {
    if !root_folder.exists() {
        std::fs::create_dir_all(root_folder)?;
        info!("Created root folder: {}", root_folder.display());
    }
    Ok(())
}

/// Database path inside the root folder
pub fn database_path(root_folder: &Path) -> PathBuf {
    root_folder.join(DATABASE_FILE)
}
