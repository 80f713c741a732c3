//! Configuration loading and resolution
//!
//! Every setting resolves in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`KOTOBA_*`)
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing or unparseable TOML file never aborts startup; it is logged and
//! the remaining tiers apply.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default maximum upload size (50 MiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

/// Default access token lifetime
pub const DEFAULT_TOKEN_EXPIRY_HOURS: i64 = 24;

/// Origins the development frontend is served from
pub const DEFAULT_CORS_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://127.0.0.1:3000",
    "http://localhost:8080",
];

/// Logging section of the TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `kotoba_server=debug`
    pub level: Option<String>,
}

/// On-disk TOML configuration; every field optional
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TomlConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub data_dir: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
    pub upload_dir: Option<PathBuf>,
    pub static_dir: Option<PathBuf>,
    pub token_secret: Option<String>,
    pub token_expiry_hours: Option<i64>,
    pub max_upload_bytes: Option<u64>,
    pub frontend_url: Option<String>,
    pub cors_origins: Vec<String>,
    pub logging: LoggingConfig,
}

impl TomlConfig {
    /// Parse TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Load a TOML file, falling back to an empty config when it is missing or invalid
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            info!("No config file found, using environment and compiled defaults");
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(content) => match Self::from_toml_str(&content) {
                Ok(config) => {
                    info!("Loaded config file: {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("Ignoring config file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Could not read config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}

/// OS-dependent compiled defaults
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub static_dir: PathBuf,
    pub log_level: String,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            data_dir: default_data_dir(),
            static_dir: PathBuf::from("frontend/static"),
            log_level: "kotoba_server=info,kotoba_common=info,tower_http=info".to_string(),
        }
    }
}

/// Get OS-dependent default data folder
fn default_data_dir() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/kotoba (or /var/lib/kotoba for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("kotoba"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/kotoba"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("kotoba"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/kotoba"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("kotoba"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\kotoba"))
    } else {
        PathBuf::from("./kotoba_data")
    }
}

/// Locate the TOML config file
///
/// An explicit path (from `--config` or `KOTOBA_CONFIG`) wins when it exists.
/// Otherwise `~/.config/kotoba/config.toml`, then `/etc/kotoba/config.toml` on Linux.
pub fn locate_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Some(path.to_path_buf());
        }
        warn!("Config file {} does not exist", path.display());
        return None;
    }

    let user_config = dirs::config_dir().map(|d| d.join("kotoba").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/kotoba/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Command-line overrides (tier 1); `None` means "not given"
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub data_dir: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
    pub upload_dir: Option<PathBuf>,
    pub static_dir: Option<PathBuf>,
    pub log_level: Option<String>,
}

/// Fully resolved service configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub upload_dir: PathBuf,
    pub static_dir: PathBuf,
    /// `None` means "generate and persist one in the settings table"
    pub token_secret: Option<String>,
    pub token_expiry_hours: i64,
    pub max_upload_bytes: u64,
    pub frontend_url: Option<String>,
    pub cors_origins: Vec<String>,
    pub log_level: String,
}

impl ServerConfig {
    /// Resolve every setting across CLI, environment, TOML and defaults
    pub fn resolve(cli: &ConfigOverrides, file: &TomlConfig) -> Result<Self> {
        let defaults = CompiledDefaults::for_current_platform();

        let host = cli
            .host
            .clone()
            .or_else(|| env_string("KOTOBA_HOST"))
            .or_else(|| file.host.clone())
            .unwrap_or(defaults.host);

        let port = match cli.port {
            Some(port) => port,
            None => match env_parse::<u16>("KOTOBA_PORT")? {
                Some(port) => port,
                None => file.port.unwrap_or(defaults.port),
            },
        };

        let data_dir = cli
            .data_dir
            .clone()
            .or_else(|| env_path("KOTOBA_DATA_DIR"))
            .or_else(|| file.data_dir.clone())
            .unwrap_or(defaults.data_dir);

        let database_path = cli
            .database_path
            .clone()
            .or_else(|| env_path("KOTOBA_DATABASE_PATH"))
            .or_else(|| file.database_path.clone())
            .unwrap_or_else(|| data_dir.join("kotoba.db"));

        let upload_dir = cli
            .upload_dir
            .clone()
            .or_else(|| env_path("KOTOBA_UPLOAD_DIR"))
            .or_else(|| file.upload_dir.clone())
            .unwrap_or_else(|| data_dir.join("uploads"));

        let static_dir = cli
            .static_dir
            .clone()
            .or_else(|| env_path("KOTOBA_STATIC_DIR"))
            .or_else(|| file.static_dir.clone())
            .unwrap_or(defaults.static_dir);

        let token_secret = env_string("KOTOBA_TOKEN_SECRET")
            .or_else(|| file.token_secret.clone())
            .filter(|s| !s.trim().is_empty());

        let token_expiry_hours = match env_parse::<i64>("KOTOBA_TOKEN_EXPIRY_HOURS")? {
            Some(hours) => hours,
            None => file.token_expiry_hours.unwrap_or(DEFAULT_TOKEN_EXPIRY_HOURS),
        };
        if token_expiry_hours <= 0 {
            return Err(Error::Config(format!(
                "token_expiry_hours must be positive, got {}",
                token_expiry_hours
            )));
        }

        let max_upload_bytes = match env_parse::<u64>("KOTOBA_MAX_UPLOAD_BYTES")? {
            Some(bytes) => bytes,
            None => file.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
        };
        if max_upload_bytes == 0 {
            return Err(Error::Config("max_upload_bytes must be positive".to_string()));
        }

        let frontend_url = env_string("KOTOBA_FRONTEND_URL").or_else(|| file.frontend_url.clone());

        let mut cors_origins: Vec<String> =
            DEFAULT_CORS_ORIGINS.iter().map(|s| s.to_string()).collect();
        let extra = env_string("KOTOBA_CORS_ORIGINS")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect::<Vec<_>>())
            .unwrap_or_else(|| file.cors_origins.clone());
        for origin in extra.into_iter().chain(frontend_url.clone()) {
            if !origin.is_empty() && !cors_origins.contains(&origin) {
                cors_origins.push(origin);
            }
        }

        let log_level = cli
            .log_level
            .clone()
            .or_else(|| env_string("KOTOBA_LOG_LEVEL"))
            .or_else(|| file.logging.level.clone())
            .unwrap_or(defaults.log_level);

        Ok(Self {
            host,
            port,
            data_dir,
            database_path,
            upload_dir,
            static_dir,
            token_secret,
            token_expiry_hours,
            max_upload_bytes,
            frontend_url,
            cors_origins,
            log_level,
        })
    }

    /// `host:port` string for binding the listener
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Create data and upload directories if missing
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(&self.upload_dir)?;
        if let Some(parent) = self.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_path(name: &str) -> Option<PathBuf> {
    env_string(name).map(PathBuf::from)
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env_string(name) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::Config(format!("{}={}: {}", name, raw, e))),
        None => Ok(None),
    }
}
