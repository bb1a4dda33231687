use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE_NAME: &str = "config.json";
const CONFIG_ENV_VAR: &str = "TASKLANE_CONFIG_PATH";

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 20;
pub const DEFAULT_DELIVERY_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    #[default]
    Desktop,
    Log,
    None,
}

impl NotifierKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match canonical_name(raw)?.as_str() {
            "desktop" | "system" | "native" => Some(Self::Desktop),
            "log" | "console" | "stderr" => Some(Self::Log),
            "none" | "off" | "silent" => Some(Self::None),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub poll_interval_secs: u64,
    pub notifications_enabled: bool,
    pub notifier: NotifierKind,
    pub delivery_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            notifications_enabled: true,
            notifier: NotifierKind::Desktop,
            delivery_timeout_secs: DEFAULT_DELIVERY_TIMEOUT_SECS,
        }
    }
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }
}

#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: Config,
    pub error: Option<AppError>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub poll_interval_secs: Option<u64>,
    pub notifications_enabled: Option<bool>,
    pub notifier: Option<NotifierKind>,
    pub delivery_timeout_secs: Option<u64>,
}

impl ConfigOverrides {
    /// Parses one `KEY=VALUE` override. Keys are matched case- and
    /// punctuation-insensitively, so `Poll-Interval` finds `poll_interval`.
    pub fn push(&mut self, raw: &str) -> Result<(), AppError> {
        let (key_raw, value_raw) = raw
            .trim()
            .split_once('=')
            .ok_or_else(|| AppError::invalid_input("override must be in KEY=VALUE format"))?;
        let key = canonical_name(key_raw)
            .ok_or_else(|| AppError::invalid_input("override key cannot be empty"))?;
        let value = value_raw.trim();

        match key.as_str() {
            "poll_interval" | "poll_interval_secs" => {
                self.poll_interval_secs = Some(parse_secs(&key, value)?);
            }
            "notifications" | "notifications_enabled" => {
                self.notifications_enabled = Some(parse_flag(&key, value)?);
            }
            "notifier" => {
                let kind = NotifierKind::parse(value).ok_or_else(|| {
                    AppError::invalid_input(format!("unknown notifier '{value}'"))
                })?;
                self.notifier = Some(kind);
            }
            "delivery_timeout" | "delivery_timeout_secs" => {
                self.delivery_timeout_secs = Some(parse_secs(&key, value)?);
            }
            other => {
                return Err(AppError::invalid_input(format!(
                    "unknown config field '{other}'"
                )));
            }
        }

        Ok(())
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64, AppError> {
    value
        .parse::<u64>()
        .map_err(|_| AppError::invalid_input(format!("{key} must be a whole number of seconds")))
}

fn parse_flag(key: &str, value: &str) -> Result<bool, AppError> {
    match canonical_name(value).as_deref() {
        Some("true" | "on" | "yes" | "1") => Ok(true),
        Some("false" | "off" | "no" | "0") => Ok(false),
        _ => Err(AppError::invalid_input(format!("{key} must be true or false"))),
    }
}

fn canonical_name(raw: &str) -> Option<String> {
    let mut cleaned = String::new();
    let mut previous_underscore = false;

    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            cleaned.push(ch.to_ascii_lowercase());
            previous_underscore = false;
        } else if !previous_underscore && !cleaned.is_empty() {
            cleaned.push('_');
            previous_underscore = true;
        }
    }

    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn config_path() -> Result<PathBuf, AppError> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR)
        && !path.trim().is_empty()
    {
        return Ok(PathBuf::from(path));
    }

    if cfg!(windows) {
        let appdata =
            std::env::var("APPDATA").map_err(|_| AppError::invalid_data("APPDATA is not set"))?;
        Ok(PathBuf::from(appdata)
            .join("tasklane")
            .join(CONFIG_FILE_NAME))
    } else {
        let home = std::env::var("HOME").map_err(|_| AppError::invalid_data("HOME is not set"))?;
        Ok(PathBuf::from(home)
            .join(".config")
            .join("tasklane")
            .join(CONFIG_FILE_NAME))
    }
}

pub fn load_config_with_fallback() -> ConfigLoad {
    match config_path() {
        Ok(path) => load_config_with_fallback_from_path(&path),
        Err(err) => ConfigLoad {
            config: Config::default(),
            error: Some(err),
        },
    }
}

fn load_config_with_fallback_from_path(path: &Path) -> ConfigLoad {
    if !path.exists() {
        return ConfigLoad {
            config: Config::default(),
            error: None,
        };
    }

    match load_config_from_path(path) {
        Ok(config) => ConfigLoad {
            config,
            error: None,
        },
        Err(err) => ConfigLoad {
            config: Config::default(),
            error: Some(err),
        },
    }
}

fn load_config_from_path(path: &Path) -> Result<Config, AppError> {
    let content = std::fs::read_to_string(path).map_err(|err| AppError::io_at(path, err))?;
    serde_json::from_str(&content).map_err(|err| {
        AppError::invalid_data(format!("invalid JSON in {}: {}", path.display(), err))
    })
}

pub fn merge_overrides(base: &Config, overrides: &ConfigOverrides) -> Config {
    let mut merged = base.clone();
    if let Some(secs) = overrides.poll_interval_secs {
        merged.poll_interval_secs = secs;
    }
    if let Some(enabled) = overrides.notifications_enabled {
        merged.notifications_enabled = enabled;
    }
    if let Some(kind) = overrides.notifier {
        merged.notifier = kind;
    }
    if let Some(secs) = overrides.delivery_timeout_secs {
        merged.delivery_timeout_secs = secs;
    }
    merged
}
