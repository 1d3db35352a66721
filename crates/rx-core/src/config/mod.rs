//! Configuration management for remexec

mod client;
mod server;

pub use client::ClientConfig;
pub use server::{ServerConfig, ShellConfig, DEFAULT_PORT};

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("remexec")
}

/// Get the default server configuration file path
pub fn default_server_config_path() -> PathBuf {
    default_config_dir().join("server.toml")
}

/// Get the default client configuration file path
pub fn default_client_config_path() -> PathBuf {
    default_config_dir().join("client.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Load configuration, falling back to defaults when the file does not exist
pub fn load_config_or_default<T>(path: &Path) -> Result<T, ConfigError>
where
    T: serde::de::DeserializeOwned + Default,
{
    match load_config(path) {
        Err(ConfigError::NotFound(_)) => {
            tracing::debug!("No config at {:?}, using defaults", path);
            Ok(T::default())
        }
        other => other,
    }
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf").join("server.toml");

        let config = ServerConfig {
            bind_address: "127.0.0.1:1".into(),
            ..Default::default()
        };
        save_config(&path, &config).unwrap();

        let loaded: ServerConfig = load_config(&path).unwrap();
        assert_eq!(loaded.bind_address, "127.0.0.1:1");
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.toml");

        assert!(matches!(
            load_config::<ClientConfig>(&path),
            Err(ConfigError::NotFound(_))
        ));
        let fallback: ClientConfig = load_config_or_default(&path).unwrap();
        assert_eq!(fallback.executor, "exec");
    }

    #[test]
    fn test_invalid_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "graceful_timeout = \"soon\"").unwrap();

        assert!(matches!(
            load_config::<ServerConfig>(&path),
            Err(ConfigError::Parse(_))
        ));
    }
}
