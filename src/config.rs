//! Layered configuration.
//!
//! Priority, highest first:
//! 1. Environment variables (`SITEKEEPER_*`, nested with `__`, e.g.
//!    `SITEKEEPER_DOCKER__CALL_TIMEOUT_SECS`)
//! 2. TOML file, when a path is given
//! 3. Compiled defaults

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

const ENV_PREFIX: &str = "SITEKEEPER_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("configuration file not found: {0}")]
    MissingFile(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub docker: DockerConfig,
    pub queue: QueueConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Daemon socket path, with or without a `unix://` prefix.
    pub socket_path: String,

    /// Upper bound for every single runtime call.
    pub call_timeout_secs: u64,

    /// Upper bound for an image pull, which streams for much longer than
    /// other calls.
    pub pull_timeout_secs: u64,

    /// Domain used for workload aliases: `<workload>.pod.<pod_domain>`.
    pub pod_domain: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueConfig {
    /// `None` (or 0) keeps the task queue unbounded.
    pub capacity: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` wins when set.
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket_path: "/var/run/docker.sock".to_string(),
            call_timeout_secs: 120,
            pull_timeout_secs: 900,
            pod_domain: "sitekeeper.local".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Loads defaults, then `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(AppConfig::default()));

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::MissingFile(path.display().to_string()));
            }
            info!("Loading configuration from file: {}", path.display());
            figment = figment.merge(Toml::file(path));
        }

        let config: AppConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::Invalid("server.host must not be empty".to_string()));
        }
        if self.docker.call_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "docker.call_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.docker.pull_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "docker.pull_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.docker.pod_domain.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "docker.pod_domain must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue.capacity, None);
        assert_eq!(config.docker.pod_domain, "sitekeeper.local");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn file_then_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "sitekeeper.toml",
                r#"
                [server]
                port = 9000

                [docker]
                pod_domain = "example.internal"
                call_timeout_secs = 30
                "#,
            )?;
            jail.set_env("SITEKEEPER_DOCKER__CALL_TIMEOUT_SECS", "45");
            jail.set_env("SITEKEEPER_QUEUE__CAPACITY", "16");

            let config = AppConfig::load(Some(Path::new("sitekeeper.toml")))
                .map_err(|e| e.to_string())?;

            assert_eq!(config.server.port, 9000);
            assert_eq!(config.server.host, "127.0.0.1");
            assert_eq!(config.docker.pod_domain, "example.internal");
            assert_eq!(config.docker.call_timeout_secs, 45);
            assert_eq!(config.queue.capacity, Some(16));
            Ok(())
        });
    }

    #[test]
    fn missing_file_is_reported() {
        let err = AppConfig::load(Some(Path::new("/nonexistent/sitekeeper.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::MissingFile(_)));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("SITEKEEPER_DOCKER__CALL_TIMEOUT_SECS", "0");
            let err = AppConfig::load(None).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)));
            Ok(())
        });
    }
}
