//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Service configuration loaded from a TOML file
///
/// API keys may also arrive via environment variables; see
/// [`resolve_api_key`]. Missing keys are not an error at load time:
/// the geocoder and the remote LLM method degrade gracefully without them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root data folder (database lives under it)
    pub root_folder: Option<String>,
    /// API key for the HTTP geocoder
    pub geocoder_api_key: Option<String>,
    /// API key for the remote LLM sentiment method
    pub llm_api_key: Option<String>,
    /// Completion endpoint for the remote LLM sentiment method
    pub llm_endpoint: Option<String>,
}

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&str>, env_var_name: &str) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Ok(config) = load_toml_config() {
        if let Some(root_folder) = config.root_folder {
            return PathBuf::from(root_folder);
        }
    }

    // Priority 4: OS-dependent compiled default
    default_root_folder()
}

/// Default configuration file path for the platform
pub fn config_file_path() -> Result<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("ura").join("config.toml"));

    if let Some(path) = user_config {
        return Ok(path);
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/ura/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
    }

    Err(Error::Config(
        "Could not determine config directory".to_string(),
    ))
}

/// Load the TOML config from the platform config path
pub fn load_toml_config() -> Result<TomlConfig> {
    let path = config_file_path()?;
    if !path.exists() {
        return Err(Error::Config(format!(
            "Config file not found: {}",
            path.display()
        )));
    }
    let content = std::fs::read_to_string(&path)?;
    toml::from_str(&content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
}

/// Write the TOML config (best-effort atomic: temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Resolve an API key with ENV taking priority over the TOML config
///
/// Returns `None` when neither source carries a usable (non-blank) value.
pub fn resolve_api_key(env_var_name: &str, toml_value: Option<&str>) -> Option<String> {
    if let Ok(key) = std::env::var(env_var_name) {
        if is_valid_key(&key) {
            return Some(key);
        }
    }
    toml_value.filter(|k| is_valid_key(k)).map(|k| k.to_string())
}

/// Validate an API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("ura"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\ura"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("ura"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/ura"))
    } else {
        dirs::data_local_dir()
            .map(|d| d.join("ura"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/ura"))
    }
}

/// Database path under a root folder
pub fn database_path(root_folder: &Path) -> PathBuf {
    root_folder.join("ura.db")
}
