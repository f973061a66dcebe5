//! Server configuration module.
//!
//! Handles loading configuration from environment variables with sensible defaults.

use anyhow::{Context, Result};
use shared::config::TelemetryConfig;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Server configuration.
///
/// Configuration values can be set via environment variables:
/// - `TIMBERTRACE_HOST`: The host address to bind to (default: "0.0.0.0")
/// - `TIMBERTRACE_PORT`: The port to listen on (default: 8080)
/// - `TIMBERTRACE_CONFIG`: Path to the JSON pipeline configuration (default: built-in defaults)
#[derive(Debug, Clone)]
pub struct Config {
    /// The host address to bind to.
    pub host: String,
    /// The port to listen on.
    pub port: u16,
    /// Path to the pipeline configuration file.
    pub telemetry_config: Option<PathBuf>,
}

impl Config {
    /// Creates a new configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `TIMBERTRACE_PORT` is set but is not a valid port number.
    pub fn from_env() -> Result<Self> {
        let host = std::env::var("TIMBERTRACE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = std::env::var("TIMBERTRACE_PORT")
            .ok()
            .map(|p| p.parse::<u16>())
            .transpose()
            .context("TIMBERTRACE_PORT is not a valid port")?
            .unwrap_or(8080);

        let telemetry_config = std::env::var_os("TIMBERTRACE_CONFIG").map(PathBuf::from);

        Ok(Self {
            host,
            port,
            telemetry_config,
        })
    }

    /// Returns the socket address for binding.
    ///
    /// # Errors
    ///
    /// Returns an error if the host and port do not form a valid socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid socket address {}:{}", self.host, self.port))
    }

    /// Loads the pipeline configuration, falling back to defaults when no
    /// file is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load_telemetry_config(&self) -> Result<TelemetryConfig> {
        match &self.telemetry_config {
            Some(path) => TelemetryConfig::load(path)
                .with_context(|| format!("Failed to load {}", path.display())),
            None => Ok(TelemetryConfig::default()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            telemetry_config: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert!(config.telemetry_config.is_none());
    }

    #[test]
    fn test_config_socket_addr() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 3000,
            telemetry_config: None,
        };
        assert_eq!(config.socket_addr().unwrap().to_string(), "127.0.0.1:3000");
    }

    #[test]
    fn test_invalid_host_is_an_error() {
        let config = Config {
            host: "not a host".to_string(),
            ..Config::default()
        };
        assert!(config.socket_addr().is_err());
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let config = Config {
            telemetry_config: Some(PathBuf::from("/nonexistent/timbertrace.json")),
            ..Config::default()
        };
        assert!(config.load_telemetry_config().is_err());
        assert!(Config::default().load_telemetry_config().is_ok());
    }
}
