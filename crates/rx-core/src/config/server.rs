//! Server configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Default listen port
pub const DEFAULT_PORT: u16 = 62677;

/// Configuration for the execution server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to
    pub bind_address: String,

    /// Path to the server key pair (PKCS#8 PEM)
    pub key_path: PathBuf,

    /// Path to the trusted client keys file
    pub allowed_keys_path: PathBuf,

    /// How long to wait for in-flight requests on shutdown
    #[serde(with = "seconds")]
    pub graceful_timeout: Duration,

    /// Sessions unused for this long are dropped
    #[serde(with = "seconds")]
    pub session_idle_timeout: Duration,

    /// Maximum accepted difference between a token request timestamp and
    /// the server clock
    #[serde(with = "seconds")]
    pub max_clock_skew: Duration,

    /// Capacity of the per-process output channel, in lines
    pub output_buffer_lines: usize,

    /// Additional shell executors by name
    pub shells: BTreeMap<String, ShellConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let config_dir = super::default_config_dir();

        Self {
            bind_address: format!("0.0.0.0:{}", DEFAULT_PORT),
            key_path: config_dir.join("server.pem"),
            allowed_keys_path: config_dir.join("allowed_keys"),
            graceful_timeout: Duration::from_secs(30),
            session_idle_timeout: Duration::from_secs(3600),
            max_clock_skew: Duration::from_secs(300),
            output_buffer_lines: 256,
            shells: BTreeMap::new(),
        }
    }
}

impl ServerConfig {
    /// Reject values the server cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_address.is_empty() {
            return Err(ConfigError::MissingField("bind_address".into()));
        }
        if self.output_buffer_lines == 0 {
            return Err(ConfigError::Invalid(
                "output_buffer_lines must be at least 1".into(),
            ));
        }
        if self.graceful_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "graceful_timeout must be greater than zero".into(),
            ));
        }
        for (name, shell) in &self.shells {
            if shell.program.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "shell '{}' has no program",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Durations are written as whole seconds
mod seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

/// A shell executor: commands run as `<program> <flag> "<joined command>"`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellConfig {
    /// Shell binary, e.g. `bash`
    pub program: String,
    /// Flag that takes the command string, e.g. `-c`
    pub flag: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address, "0.0.0.0:62677");
        assert_eq!(config.graceful_timeout, Duration::from_secs(30));
        assert_eq!(config.session_idle_timeout, Duration::from_secs(3600));
        assert_eq!(config.max_clock_skew, Duration::from_secs(300));
        assert_eq!(config.output_buffer_lines, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml = r#"
            bind_address = "127.0.0.1:9000"
            graceful_timeout = 5

            [shells.bash]
            program = "bash"
            flag = "-c"
        "#;
        let config: ServerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert_eq!(config.graceful_timeout, Duration::from_secs(5));
        assert_eq!(config.output_buffer_lines, 256);
        assert_eq!(
            config.shells.get("bash"),
            Some(&ShellConfig {
                program: "bash".into(),
                flag: "-c".into()
            })
        );
    }

    #[test]
    fn test_durations_are_seconds() {
        let config: ServerConfig = toml::from_str(
            r#"
            graceful_timeout = 5
            session_idle_timeout = 90
            max_clock_skew = 60
        "#,
        )
        .unwrap();
        assert_eq!(config.graceful_timeout, Duration::from_secs(5));
        assert_eq!(config.session_idle_timeout, Duration::from_secs(90));
        assert_eq!(config.max_clock_skew, Duration::from_secs(60));

        let written = toml::to_string(&config).unwrap();
        assert!(written.contains("graceful_timeout = 5\n"));
        assert!(written.contains("max_clock_skew = 60\n"));

        let reparsed: ServerConfig = toml::from_str(&written).unwrap();
        assert_eq!(reparsed.graceful_timeout, Duration::from_secs(5));
        assert_eq!(reparsed.max_clock_skew, Duration::from_secs(60));
    }

    #[test]
    fn test_duration_rejects_text() {
        assert!(toml::from_str::<ServerConfig>("max_clock_skew = \"1m\"").is_err());
    }

    #[test]
    fn test_validate_rejects_zero_buffer() {
        let config = ServerConfig {
            output_buffer_lines: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
