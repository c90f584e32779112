//! Configuration management for the REST server
//!
//! Supports configuration via, in increasing order of precedence:
//! - Built-in defaults
//! - Optional TOML config file
//! - Environment variables
//! - Command-line flags

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::errors::{RestError, Result};

/// Command-line flags
#[derive(Debug, Default, Parser)]
#[command(name = "rest-server", version, about = "REST backend for deduplicating backups")]
pub struct Cli {
    /// Listen address, e.g. ":8000" or "127.0.0.1:8000"
    #[arg(long)]
    pub listen: Option<String>,

    /// Repository root directory
    #[arg(long)]
    pub path: Option<PathBuf>,

    /// Turn on TLS support
    #[arg(long)]
    pub tls: bool,

    /// TLS certificate (PEM), defaults to <path>/public_key
    #[arg(long)]
    pub tls_cert: Option<PathBuf>,

    /// TLS private key (PEM), defaults to <path>/private_key
    #[arg(long)]
    pub tls_key: Option<PathBuf>,

    /// htpasswd file, defaults to <path>/.htpasswd
    #[arg(long)]
    pub htpasswd_file: Option<PathBuf>,

    /// Expose Prometheus metrics at /metrics
    #[arg(long)]
    pub metrics: bool,

    /// Per-request timeout in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Log level when RUST_LOG is unset
    #[arg(long)]
    pub log_level: Option<String>,

    /// Optional TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// TLS configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Certificate chain in PEM format
    #[serde(default)]
    pub cert: Option<PathBuf>,

    /// Private key in PEM format
    #[serde(default)]
    pub key: Option<PathBuf>,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (default: 0.0.0.0:8000)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Request timeout in seconds (default: none)
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub tls: TlsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            timeout_secs: None,
            tls: TlsConfig::default(),
        }
    }
}

/// Repository configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Repository root (default: /tmp/restic)
    #[serde(default = "default_repository_path")]
    pub path: PathBuf,

    /// Credential file; defaults to `.htpasswd` in the repository root
    #[serde(default)]
    pub htpasswd_file: Option<PathBuf>,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            path: default_repository_path(),
            htpasswd_file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

fn default_repository_path() -> PathBuf {
    PathBuf::from("/tmp/restic")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub repository: RepositoryConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Log level (default: info)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            repository: RepositoryConfig::default(),
            metrics: MetricsConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load(cli: &Cli) -> Result<Self> {
        let config_file = cli
            .config
            .clone()
            .or_else(|| std::env::var("REST_SERVER_CONFIG_FILE").ok().map(PathBuf::from));
        let mut config = match &config_file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.apply_cli(cli)?;
        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RestError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| RestError::Config(e.to_string()))
    }

    /// Override with environment variables
    ///
    /// Environment variables:
    /// - REST_SERVER_LISTEN: bind address (":8000" binds all interfaces)
    /// - REST_SERVER_PATH: repository root
    /// - REST_SERVER_TLS: true|false
    /// - REST_SERVER_TLS_CERT / REST_SERVER_TLS_KEY: PEM files
    /// - REST_SERVER_HTPASSWD_FILE: credential file
    /// - REST_SERVER_TIMEOUT_SECS: per-request timeout
    /// - REST_SERVER_METRICS: true|false
    /// - REST_SERVER_LOG_LEVEL: log level
    fn apply_env<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(listen) = var("REST_SERVER_LISTEN") {
            self.server.bind_address = parse_listen(&listen)?;
        }

        if let Some(path) = var("REST_SERVER_PATH") {
            self.repository.path = PathBuf::from(path);
        }

        if let Some(tls) = var("REST_SERVER_TLS") {
            self.server.tls.enabled = parse_bool("REST_SERVER_TLS", &tls)?;
        }

        if let Some(cert) = var("REST_SERVER_TLS_CERT") {
            self.server.tls.cert = Some(PathBuf::from(cert));
        }

        if let Some(key) = var("REST_SERVER_TLS_KEY") {
            self.server.tls.key = Some(PathBuf::from(key));
        }

        if let Some(file) = var("REST_SERVER_HTPASSWD_FILE") {
            self.repository.htpasswd_file = Some(PathBuf::from(file));
        }

        if let Some(timeout) = var("REST_SERVER_TIMEOUT_SECS") {
            let secs = timeout.parse().map_err(|_| {
                RestError::Config(format!("REST_SERVER_TIMEOUT_SECS: invalid number {:?}", timeout))
            })?;
            self.server.timeout_secs = Some(secs);
        }

        if let Some(metrics) = var("REST_SERVER_METRICS") {
            self.metrics.enabled = parse_bool("REST_SERVER_METRICS", &metrics)?;
        }

        if let Some(level) = var("REST_SERVER_LOG_LEVEL") {
            self.log_level = level;
        }

        Ok(())
    }

    fn apply_cli(&mut self, cli: &Cli) -> Result<()> {
        if let Some(listen) = &cli.listen {
            self.server.bind_address = parse_listen(listen)?;
        }
        if let Some(path) = &cli.path {
            self.repository.path = path.clone();
        }
        if cli.tls {
            self.server.tls.enabled = true;
        }
        if let Some(cert) = &cli.tls_cert {
            self.server.tls.cert = Some(cert.clone());
        }
        if let Some(key) = &cli.tls_key {
            self.server.tls.key = Some(key.clone());
        }
        if let Some(file) = &cli.htpasswd_file {
            self.repository.htpasswd_file = Some(file.clone());
        }
        if cli.metrics {
            self.metrics.enabled = true;
        }
        if let Some(secs) = cli.timeout_secs {
            self.server.timeout_secs = Some(secs);
        }
        if let Some(level) = &cli.log_level {
            self.log_level = level.clone();
        }
        Ok(())
    }

    pub fn htpasswd_path(&self) -> PathBuf {
        self.repository
            .htpasswd_file
            .clone()
            .unwrap_or_else(|| self.repository.path.join(".htpasswd"))
    }

    pub fn tls_cert_path(&self) -> PathBuf {
        self.server
            .tls
            .cert
            .clone()
            .unwrap_or_else(|| self.repository.path.join("public_key"))
    }

    pub fn tls_key_path(&self) -> PathBuf {
        self.server
            .tls
            .key
            .clone()
            .unwrap_or_else(|| self.repository.path.join("private_key"))
    }
}

/// Parse a listen address, accepting the ":PORT" shorthand for all interfaces
pub fn parse_listen(listen: &str) -> Result<SocketAddr> {
    let full = if listen.starts_with(':') {
        format!("0.0.0.0{}", listen)
    } else {
        listen.to_string()
    };
    full.parse()
        .map_err(|_| RestError::Config(format!("invalid listen address {:?}", listen)))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(RestError::Config(format!("{}: invalid boolean {:?}", name, value))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.bind_address, "0.0.0.0:8000".parse().unwrap());
        assert_eq!(config.repository.path, PathBuf::from("/tmp/restic"));
        assert!(!config.server.tls.enabled);
        assert!(!config.metrics.enabled);
        assert_eq!(config.htpasswd_path(), PathBuf::from("/tmp/restic/.htpasswd"));
        assert_eq!(config.tls_cert_path(), PathBuf::from("/tmp/restic/public_key"));
        assert_eq!(config.tls_key_path(), PathBuf::from("/tmp/restic/private_key"));
    }

    #[test]
    fn test_listen_shorthand() {
        assert_eq!(parse_listen(":9000").unwrap(), "0.0.0.0:9000".parse().unwrap());
        assert_eq!(parse_listen("127.0.0.1:80").unwrap(), "127.0.0.1:80".parse().unwrap());
        assert!(matches!(parse_listen("nowhere"), Err(RestError::Config(_))));
    }

    #[test]
    fn test_from_toml_partial() {
        let config = Config::from_toml(
            r#"
            log_level = "debug"

            [server]
            bind_address = "127.0.0.1:8443"

            [server.tls]
            enabled = true
            cert = "/etc/rest/cert.pem"

            [repository]
            path = "/srv/backups"
            "#,
        )
        .unwrap();
        assert_eq!(config.log_level, "debug");
        assert!(config.server.tls.enabled);
        assert_eq!(config.tls_cert_path(), PathBuf::from("/etc/rest/cert.pem"));
        assert_eq!(config.tls_key_path(), PathBuf::from("/srv/backups/private_key"));
        assert!(config.server.timeout_secs.is_none());
    }

    #[test]
    fn test_env_then_cli_precedence() {
        let env: HashMap<&str, &str> = [
            ("REST_SERVER_LISTEN", ":7000"),
            ("REST_SERVER_PATH", "/env/repo"),
            ("REST_SERVER_METRICS", "true"),
            ("REST_SERVER_TIMEOUT_SECS", "30"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config
            .apply_env(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0:7000".parse().unwrap());
        assert!(config.metrics.enabled);
        assert_eq!(config.server.timeout_secs, Some(30));

        let cli = Cli::parse_from(["rest-server", "--path", "/cli/repo", "--tls"]);
        config.apply_cli(&cli).unwrap();
        assert_eq!(config.repository.path, PathBuf::from("/cli/repo"));
        assert!(config.server.tls.enabled);
        assert_eq!(config.server.bind_address, "0.0.0.0:7000".parse().unwrap());
    }

    #[test]
    fn test_invalid_env_values() {
        let mut config = Config::default();
        let result = config.apply_env(|name| {
            (name == "REST_SERVER_TLS").then(|| "maybe".to_string())
        });
        assert!(matches!(result, Err(RestError::Config(_))));
    }
}
