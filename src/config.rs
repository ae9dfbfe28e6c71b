//! Console configuration, read from a TOML file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Environment variable that overrides `api_url`.
pub const API_URL_ENV: &str = "FLEET_API_URL";

const DEFAULT_API_URL: &str = "http://localhost:5000";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// No timeout is applied to outbound requests unless this is set.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub actions: ActionConfig,
    #[serde(default)]
    pub logs: LogConfig,
    #[serde(default = "default_quick_edits")]
    pub quick_edits: Vec<QuickEdit>,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            request_timeout_secs: None,
            polling: PollingConfig::default(),
            actions: ActionConfig::default(),
            logs: LogConfig::default(),
            quick_edits: default_quick_edits(),
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Quick-edit bindings offered for one document.
    pub fn quick_edits_for<'a>(&'a self, document: &'a str) -> impl Iterator<Item = &'a QuickEdit> {
        self.quick_edits
            .iter()
            .filter(move |edit| edit.document == document)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            let url = url.trim();
            if !url.is_empty() {
                self.api_url = url.to_string();
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub fleet_interval_ms: u64,
    pub download_interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            fleet_interval_ms: 2000,
            download_interval_ms: 1000,
        }
    }
}

impl PollingConfig {
    pub fn fleet_interval(&self) -> Duration {
        Duration::from_millis(self.fleet_interval_ms.max(1))
    }

    pub fn download_interval(&self) -> Duration {
        Duration::from_millis(self.download_interval_ms.max(1))
    }
}

/// Which actions share a lock slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockScope {
    /// One in-flight action per target; different targets proceed concurrently.
    #[default]
    PerTarget,
    /// One in-flight action across the whole console.
    Global,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionConfig {
    /// Delay before the follow-up poll after a successful command.
    pub settle_delay_ms: u64,
    /// Extra polls while the target has not reached its expected state.
    pub convergence_retries: u32,
    /// Upper bound for the doubling delay between convergence polls.
    pub max_backoff_ms: u64,
    pub lock_scope: LockScope,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 500,
            convergence_retries: 0,
            max_backoff_ms: 4000,
            lock_scope: LockScope::PerTarget,
        }
    }
}

impl ActionConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Longest a caller waits for an action to settle: the settle delay plus
    /// one capped backoff per poll. Saturates for extreme settings.
    pub fn settle_window(&self) -> Duration {
        let polls = self.convergence_retries.saturating_add(1);
        self.settle_delay()
            .saturating_add(self.max_backoff().saturating_mul(polls))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub interval_ms: u64,
    pub default_lines: u32,
    pub line_options: Vec<u32>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            default_lines: 500,
            line_options: vec![100, 500, 1000, 5000],
        }
    }
}

impl LogConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn allows(&self, lines: u32) -> bool {
        self.line_options.contains(&lines)
    }
}

/// Single-field edit offered next to a document, e.g. a shared secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickEdit {
    pub document: String,
    pub field_path: String,
    pub label: String,
}

fn default_quick_edits() -> Vec<QuickEdit> {
    vec![
        QuickEdit {
            document: "settings.yml".to_string(),
            field_path: "infoForwarding.secret".to_string(),
            label: "Forwarding secret".to_string(),
        },
        QuickEdit {
            document: "resources.json".to_string(),
            field_path: "velocity-secret".to_string(),
            label: "Velocity secret".to_string(),
        },
    ]
}

/// Documents the control API serves under `/api/config/{name}`.
pub const KNOWN_DOCUMENTS: [&str; 4] = [
    "settings.yml",
    "velocity.toml",
    "resources.json",
    "forwarding.secret",
];

/// Default config file location (`<config dir>/fleet-console/config.toml`).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("fleet-console").join("config.toml"))
}

/// Parse a config file. A missing file yields the defaults.
pub fn load_config_from(path: &Path) -> Result<ClientConfig> {
    if !path.exists() {
        log::debug!("No config file at {}, using defaults", path.display());
        return Ok(ClientConfig::default());
    }
    let content = fs::read_to_string(path)
        .map_err(|e| AppError::config(format!("Failed to read {}: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| AppError::config(format!("Invalid config {}: {}", path.display(), e)))
}

/// Load the config from `path` (or the default location), then apply
/// environment overrides.
pub fn load_config(path: Option<&Path>) -> Result<ClientConfig> {
    let mut config = match path {
        Some(path) => load_config_from(path)?,
        None => match default_config_path() {
            Some(path) => load_config_from(&path)?,
            None => ClientConfig::default(),
        },
    };
    config.apply_env_overrides();
    Ok(config)
}
