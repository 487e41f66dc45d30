//! Configuration loading.
//!
//! Settings come from a YAML file, then `${VAR}` placeholders are expanded and
//! a fixed set of environment variables override individual keys. Validation
//! runs last and reports every missing required key at once.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("missing required config keys: {}", .0.join(", "))]
    MissingKeys(Vec<&'static str>),

    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub minio: MinioConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// SQLite database location. `:memory:` is accepted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub path: String,
}

/// S3-compatible object store settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MinioConfig {
    /// `host:port`, without scheme.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub use_ssl: bool,
    #[serde(default = "default_region")]
    pub region: String,
    /// Upper bound for a single object store operation, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for MinioConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            access_key: String::new(),
            secret_key: String::new(),
            bucket: String::new(),
            use_ssl: false,
            region: default_region(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Maximum accepted file size in bytes.
    #[serde(default = "default_max_size")]
    pub max_size: u64,
    /// Allowed extensions including the leading dot, e.g. `.png`.
    #[serde(default = "default_allowed_types")]
    pub allowed_types: Vec<String>,
    /// Directory for temporary upload spool files. System temp dir if unset.
    #[serde(default)]
    pub spool_dir: Option<PathBuf>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            allowed_types: default_allowed_types(),
            spool_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_chat_url")]
    pub service_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            service_url: default_chat_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// text or json.
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

// -- Defaults ----------------------------------------------------------------

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_size() -> u64 {
    10 * 1024 * 1024
}

fn default_allowed_types() -> Vec<String> {
    [".jpg", ".jpeg", ".png", ".gif", ".mp4", ".txt", ".pdf"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_chat_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load configuration from the YAML file at `path`, layered with the process
/// environment, and validate it.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let lookup = |key: &str| std::env::var(key).ok();
    let expanded = expand_env(&contents, lookup);
    let mut config: Config = serde_yaml::from_str(&expanded)?;
    apply_env_overrides(&mut config, lookup)?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Fail if any required key is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required: [(&'static str, &str); 5] = [
            ("DATABASE_PATH", &self.database.path),
            ("MINIO_ENDPOINT", &self.minio.endpoint),
            ("MINIO_ACCESS_KEY", &self.minio.access_key),
            ("MINIO_SECRET_KEY", &self.minio.secret_key),
            ("MINIO_BUCKET", &self.minio.bucket),
        ];
        let missing: Vec<&'static str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(key, _)| *key)
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::MissingKeys(missing));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Replace `${NAME}` placeholders using `lookup`. Unset names become empty.
pub fn expand_env<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                out.push_str(&lookup(name).unwrap_or_default());
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Apply the supported environment overrides on top of file values.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

    if let Some(v) = get("SERVER_HOST") {
        config.server.host = v;
    }
    if let Some(v) = get("SERVER_PORT") {
        config.server.port = v.parse().map_err(|_| ConfigError::Invalid {
            key: "SERVER_PORT",
            value: v.clone(),
        })?;
    }
    if let Some(v) = get("DATABASE_PATH") {
        config.database.path = v;
    }
    if let Some(v) = get("MINIO_ENDPOINT") {
        config.minio.endpoint = v;
    }
    if let Some(v) = get("MINIO_ACCESS_KEY") {
        config.minio.access_key = v;
    }
    if let Some(v) = get("MINIO_SECRET_KEY") {
        config.minio.secret_key = v;
    }
    if let Some(v) = get("MINIO_BUCKET") {
        config.minio.bucket = v;
    }
    if let Some(v) = get("MINIO_USE_SSL") {
        config.minio.use_ssl = match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            _ => {
                return Err(ConfigError::Invalid {
                    key: "MINIO_USE_SSL",
                    value: v,
                })
            }
        };
    }
    if let Some(v) = get("MCP_SERVICE_URL") {
        config.chat.service_url = v;
    }
    if let Some(v) = get("LOG_LEVEL") {
        config.logging.level = v;
    }
    if let Some(v) = get("LOG_FORMAT") {
        config.logging.format = v;
    }
    Ok(())
}
