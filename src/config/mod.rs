//! Configuration module for Tsubame Uploadr
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation. When no file is present
//! the same structure can be assembled from the process environment.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// # Examples
///
/// ```ignore
/// std::env::set_var("MY_VAR", "value");
/// let result = expand_env_vars("prefix-${MY_VAR}-suffix");
/// assert_eq!(result, "prefix-value-suffix");
///
/// let result = expand_env_vars("${MISSING:-default}");
/// assert_eq!(result, "default");
/// ```
fn expand_env_vars(s: &str) -> String {
    let re = env_var_pattern();
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in re.captures_iter(s) {
        let Some(full_match) = cap.get(0) else {
            continue;
        };
        let var_name = &cap[1];

        result.push_str(&s[last_match..full_match.start()]);

        let value = match std::env::var(var_name) {
            Ok(val) => val,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                // No env var and no default. Keep the original placeholder.
                None => full_match.as_str().to_string(),
            },
        };
        result.push_str(&value);

        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);

    result
}

fn env_var_pattern() -> &'static regex_lite::Regex {
    static PATTERN: std::sync::OnceLock<regex_lite::Regex> = std::sync::OnceLock::new();
    PATTERN.get_or_init(|| {
        regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]+))?\}")
            .expect("env var pattern is a valid regex")
    })
}

/// True if the string still contains an unresolved `${VAR}` placeholder
fn has_placeholder(s: &str) -> bool {
    env_var_pattern().is_match(s)
}

/// String field with environment variable expansion
fn deserialize_with_env<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(expand_env_vars(&s))
}

/// Optional string field with environment variable expansion.
///
/// Empty values and placeholders that could not be resolved become `None`,
/// so `access_key: "${AWS_ACCESS_KEY_ID}"` means "absent" when the variable
/// is not set.
fn deserialize_optional_with_env<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?;
    Ok(s.map(|v| expand_env_vars(&v))
        .filter(|v| !v.trim().is_empty() && !has_placeholder(v)))
}

// ============================================================================
// Validation Helpers
// ============================================================================

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Build configuration from environment variables only.
    ///
    /// Reads `AWS_REGION`, `AWS_S3_BUCKET_NAME`, `AWS_ACCESS_KEY_ID`,
    /// `AWS_SECRET_ACCESS_KEY`, `AWS_ENDPOINT_URL`, `TSUBAME_ADDRESS` and
    /// `TSUBAME_ISSUER_URL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        let mut config = Config {
            server: ServerConfig::default(),
            storage: StorageConfig {
                bucket: var("AWS_S3_BUCKET_NAME"),
                region: var("AWS_REGION").unwrap_or_else(default_region),
                endpoint: var("AWS_ENDPOINT_URL"),
                access_key: var("AWS_ACCESS_KEY_ID"),
                secret_key: var("AWS_SECRET_ACCESS_KEY"),
            },
            client: ClientConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        };

        if let Some(address) = var("TSUBAME_ADDRESS") {
            config.server.address = address;
        }
        if let Some(issuer_url) = var("TSUBAME_ISSUER_URL") {
            config.client.issuer_url = issuer_url;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// A missing bucket or missing credentials are not validation errors:
    /// they surface when an upload URL is requested.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.address.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "server.address cannot be empty".into(),
            ));
        }

        if self.storage.region.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "storage.region cannot be empty".into(),
            ));
        }

        if let Some(ref endpoint) = self.storage.endpoint {
            if !is_valid_http_url(endpoint) {
                return Err(ConfigError::ValidationError(
                    "Invalid storage endpoint: must start with http:// or https://".into(),
                ));
            }
        }

        if !is_valid_http_url(&self.client.issuer_url) {
            return Err(ConfigError::ValidationError(
                "Invalid client.issuer_url: must start with http:// or https://".into(),
            ));
        }

        if self.client.request_timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "client.request_timeout_seconds must be greater than 0".into(),
            ));
        }

        match self.logging.format.as_str() {
            "json" | "pretty" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid logging format '{}': must be 'json' or 'pretty'",
                    other
                )))
            }
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(
        default = "default_server_address",
        deserialize_with = "deserialize_with_env"
    )]
    pub address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_server_address(),
        }
    }
}

fn default_server_address() -> String {
    "0.0.0.0:3000".to_string()
}

/// Object storage configuration
///
/// # Example
///
/// ```yaml
/// storage:
///   bucket: "${AWS_S3_BUCKET_NAME}"
///   region: "${AWS_REGION:-us-east-1}"
///   access_key: "${AWS_ACCESS_KEY_ID}"
///   secret_key: "${AWS_SECRET_ACCESS_KEY}"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default, deserialize_with = "deserialize_optional_with_env")]
    pub bucket: Option<String>,
    #[serde(default = "default_region", deserialize_with = "deserialize_with_env")]
    pub region: String,
    /// S3-compatible endpoint (MinIO, RustFS, ...); enables path-style addressing
    #[serde(default, deserialize_with = "deserialize_optional_with_env")]
    pub endpoint: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_with_env")]
    pub access_key: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_with_env")]
    pub secret_key: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: None,
            region: default_region(),
            endpoint: None,
            access_key: None,
            secret_key: None,
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Upload client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the issuance server
    #[serde(
        default = "default_issuer_url",
        deserialize_with = "deserialize_with_env"
    )]
    pub issuer_url: String,
    /// Timeout for the issuance round trip. The storage PUT is not bounded.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            issuer_url: default_issuer_url(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

fn default_issuer_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `json` or `pretty`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}
