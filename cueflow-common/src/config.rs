//! Configuration loading and root folder resolution

use crate::{Error, Result};
use std::path::PathBuf;

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&str>, env_var_name: &str) -> Result<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Ok(PathBuf::from(path));
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        return Ok(PathBuf::from(path));
    }

    // Priority 3: TOML config file
    if let Ok(config_path) = locate_config_file() {
        if let Ok(toml_content) = std::fs::read_to_string(&config_path) {
            if let Ok(config) = toml::from_str::<toml::Value>(&toml_content) {
                if let Some(root_folder) = config.get("root_folder").and_then(|v| v.as_str()) {
                    return Ok(PathBuf::from(root_folder));
                }
            }
        }
    }

    // Priority 4: OS-dependent compiled default
    Ok(default_root_folder())
}

/// Database file path inside the root folder
pub fn database_path(root_folder: &std::path::Path) -> PathBuf {
    root_folder.join("cueflow.db")
}

/// Locate the configuration file for the platform
fn locate_config_file() -> Result<PathBuf> {
    if cfg!(target_os = "linux") {
        // Try ~/.config/cueflow/config.toml first, then /etc/cueflow/config.toml
        if let Some(path) = dirs::config_dir().map(|d| d.join("cueflow").join("config.toml")) {
            if path.exists() {
                return Ok(path);
            }
        }
        let system_config = PathBuf::from("/etc/cueflow/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
        return Err(Error::Config("No config file found".to_string()));
    }

    let path = dirs::config_dir()
        .map(|d| d.join("cueflow").join("config.toml"))
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;

    if path.exists() {
        Ok(path)
    } else {
        Err(Error::Config(format!("Config file not found: {:?}", path)))
    }
}

/// OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("cueflow"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/cueflow"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("cueflow"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/cueflow"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("cueflow"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\cueflow"))
    } else {
        PathBuf::from("./cueflow_data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_arg_wins() {
        let path = resolve_root_folder(Some("/tmp/cueflow-test"), "CUEFLOW_TEST_UNSET").unwrap();
        assert_eq!(path, PathBuf::from("/tmp/cueflow-test"));
    }

    #[test]
    fn test_env_var_used_when_no_cli_arg() {
        std::env::set_var("CUEFLOW_TEST_ROOT", "/tmp/cueflow-env");
        let path = resolve_root_folder(None, "CUEFLOW_TEST_ROOT").unwrap();
        assert_eq!(path, PathBuf::from("/tmp/cueflow-env"));
        std::env::remove_var("CUEFLOW_TEST_ROOT");
    }

    #[test]
    fn test_database_path() {
        let path = database_path(std::path::Path::new("/data"));
        assert_eq!(path, PathBuf::from("/data/cueflow.db"));
    }
}
