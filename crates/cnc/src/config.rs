//! Layered configuration: built-in defaults, a TOML file, then `CNC__*`
//! environment variables.

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::hub::DeliveryPolicy;

pub const APP_NAME: &str = "cnc";

pub const DEFAULT_PORT: u16 = 8333;
pub const DEFAULT_EVENT_BUFFER: usize = 64;
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub hub: HubConfig,
    pub rules: RulesConfig,
    pub ui: UiConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level used when `RUST_LOG` is unset and no verbosity flag is given.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Capacity of the hub's inbound event queue.
    pub event_buffer: usize,
    /// Capacity of each session's outbound queue.
    pub outbound_buffer: usize,
    pub delivery: DeliveryPolicy,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            event_buffer: DEFAULT_EVENT_BUFFER,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            delivery: DeliveryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// JSON array of rules loaded into the store at startup.
    pub seed_file: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    /// Directory served under `/ui`.
    pub static_dir: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_file: PathBuf,
}

impl AppPaths {
    /// Resolve the config file. A directory override means `<dir>/config.toml`.
    pub fn discover(override_path: Option<PathBuf>) -> Result<Self> {
        let config_file = match override_path {
            Some(path) => {
                let expanded = expand_path(path)?;
                if expanded.is_dir() {
                    expanded.join("config.toml")
                } else {
                    expanded
                }
            }
            None => default_config_dir()?.join("config.toml"),
        };

        if config_file.parent().is_none() {
            return Err(anyhow!("invalid config file path: {config_file:?}"));
        }

        Ok(Self { config_file })
    }
}

impl fmt::Display for AppPaths {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config: {}", self.config_file.display())
    }
}

/// What [`load_or_init_config`] did about a missing config file.
///
/// Config is read before logging is set up, so the caller reports this once
/// the subscriber exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigInit {
    Existing,
    Created,
    /// Missing, left alone because of `--dry-run`.
    WouldCreate,
}

/// Load the config, writing a default file first if none exists.
pub fn load_or_init_config(paths: &AppPaths, dry_run: bool) -> Result<(AppConfig, ConfigInit)> {
    let init = init_config_file(&paths.config_file, dry_run)?;
    let config = load_config(&paths.config_file, environment())?;
    Ok((config, init))
}

fn init_config_file(path: &Path, dry_run: bool) -> Result<ConfigInit> {
    if path.exists() {
        Ok(ConfigInit::Existing)
    } else if dry_run {
        Ok(ConfigInit::WouldCreate)
    } else {
        write_default_config(path)?;
        Ok(ConfigInit::Created)
    }
}

/// Merge defaults, the TOML file at `path` (if any) and `env`.
pub fn load_config(path: &Path, env: Environment) -> Result<AppConfig> {
    let built = Config::builder()
        .set_default("logging.level", "info")?
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", i64::from(DEFAULT_PORT))?
        .set_default("hub.event_buffer", DEFAULT_EVENT_BUFFER as i64)?
        .set_default("hub.outbound_buffer", DEFAULT_OUTBOUND_BUFFER as i64)?
        .set_default("hub.delivery", "block")?
        .add_source(File::from(path).format(FileFormat::Toml).required(false))
        .add_source(env)
        .build()
        .with_context(|| format!("reading config from {}", path.display()))?;

    let config: AppConfig = built
        .try_deserialize()
        .context("invalid configuration")?;
    if config.hub.event_buffer == 0 || config.hub.outbound_buffer == 0 {
        return Err(anyhow!("hub buffers must hold at least one message"));
    }
    Ok(config)
}

/// `CNC__SECTION__KEY` environment overrides.
pub fn environment() -> Environment {
    Environment::with_prefix(&env_prefix())
        .separator("__")
        .try_parsing(true)
}

pub fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let toml =
        toml::to_string_pretty(&AppConfig::default()).context("serializing default config to TOML")?;
    let mut body = format!("# Configuration for {APP_NAME}\n# File: {}\n\n", path.display());
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

pub fn expand_path(path: PathBuf) -> Result<PathBuf> {
    if let Some(text) = path.to_str() {
        expand_str_path(text)
    } else {
        Ok(path)
    }
}

pub fn expand_str_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).context("expanding path")?;
    Ok(PathBuf::from(expanded.to_string()))
}

fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(dir) = dirs::config_dir() {
        return Ok(dir.join(APP_NAME));
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
