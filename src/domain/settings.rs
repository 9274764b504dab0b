use btleplug::api::BDAddr;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::domain::models::ActuatorKind;

/// File looked up in the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No configuration file found (tried {0})")]
    NotFound(String),

    #[error("Failed reading {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid {kind} address \"{value}\"")]
    InvalidAddress { kind: ActuatorKind, value: String },

    #[error("Gate and garage share the address {0}")]
    DuplicateAddress(BDAddr),

    #[error("TLS is enabled but {0} is not set")]
    MissingTlsFile(&'static str),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "bot_gateway".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Hardware addresses of the two bots, as written in the file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotsConfig {
    #[serde(default)]
    pub gate: String,
    #[serde(default)]
    pub garage: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub address: String,
    #[serde(default, rename = "useTLS")]
    pub use_tls: bool,
    #[serde(default)]
    pub certificate: String,
    #[serde(default)]
    pub private_key: String,
    /// Secret path segment in front of every WebSocket route
    #[serde(default)]
    pub auth_token: String,
    /// Browser clients served to plain GET requests
    #[serde(default = "default_static_dir")]
    pub static_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_listen_address(),
            use_tls: false,
            certificate: String::new(),
            private_key: String::new(),
            auth_token: String::new(),
            static_dir: default_static_dir(),
        }
    }
}

fn default_listen_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_static_dir() -> String {
    "static".to_string()
}

/// Retry budgets and timers of a link. Zero retry budgets mean "use default".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkSettings {
    #[serde(default)]
    pub connect_tries: u32,
    #[serde(default)]
    pub discover_service_tries: u32,
    #[serde(default)]
    pub discover_characteristics_tries: u32,
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    #[serde(default = "default_press_timeout_ms")]
    pub press_timeout_ms: u64,
    /// 0 disables keep-alive
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            connect_tries: 0,
            discover_service_tries: 0,
            discover_characteristics_tries: 0,
            grace_period_secs: default_grace_period_secs(),
            press_timeout_ms: default_press_timeout_ms(),
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

fn default_grace_period_secs() -> u64 {
    15
}
fn default_press_timeout_ms() -> u64 {
    10_000
}
fn default_keep_alive_secs() -> u64 {
    90
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettings {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
        }
    }
}

impl SessionSettings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }
}

fn default_heartbeat_interval_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub bots: BotsConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub link: LinkSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Settings {
    /// Parses the configured address of `kind`
    pub fn address(&self, kind: ActuatorKind) -> Result<BDAddr, ConfigError> {
        let value = match kind {
            ActuatorKind::Gate => &self.bots.gate,
            ActuatorKind::Garage => &self.bots.garage,
        };
        BDAddr::from_str(value.trim()).map_err(|_| ConfigError::InvalidAddress {
            kind,
            value: value.clone(),
        })
    }

    /// Checks everything that must hold before the gateway can start.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let gate = self.address(ActuatorKind::Gate)?;
        let garage = self.address(ActuatorKind::Garage)?;
        if gate == garage {
            return Err(ConfigError::DuplicateAddress(gate));
        }
        if self.server.use_tls {
            if self.server.certificate.is_empty() {
                return Err(ConfigError::MissingTlsFile("certificate"));
            }
            if self.server.private_key.is_empty() {
                return Err(ConfigError::MissingTlsFile("privateKey"));
            }
        }
        Ok(())
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Loads and validates the configuration.
    ///
    /// Without an explicit path, `./config.json` is tried first and then
    /// `bot-gateway/config.json` inside the platform config directory.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let settings_path = match explicit {
            Some(path) => path.to_path_buf(),
            None => Self::find_settings_path()?,
        };
        let settings = Self::load_from_file(&settings_path)?;
        settings.validate()?;

        Ok(Self {
            settings,
            settings_path,
        })
    }

    fn find_settings_path() -> Result<PathBuf, ConfigError> {
        let mut candidates = vec![PathBuf::from(DEFAULT_CONFIG_FILE)];
        if let Some(mut path) = dirs::config_dir() {
            path.push("bot-gateway");
            path.push(DEFAULT_CONFIG_FILE);
            candidates.push(path);
        }

        candidates
            .iter()
            .find(|path| path.is_file())
            .cloned()
            .ok_or_else(|| {
                let tried: Vec<String> = candidates.iter().map(|p| p.display().to_string()).collect();
                ConfigError::NotFound(tried.join(", "))
            })
    }

    fn load_from_file(path: &Path) -> Result<Settings, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }
}
