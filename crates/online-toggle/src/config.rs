//! Configuration types and loading logic.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;
use toggle_tracing::TracingConfig;

use crate::mode::ToggleMode;

/// Written to disk on first start when no config file exists.
pub const DEFAULT_CONFIG_TOML: &str = r#"# Whether online-toggle manages the server at all.
enabled = true

# ON, OFF or DYNAMIC. Rewritten whenever the mode is toggled.
toggle-mode = "ON"

# Seconds between DYNAMIC re-checks.
delay = 60

[status]
url = "http://status.mojang.com"
timeout_secs = 10

[host]
properties_path = "server.properties"
# reload_command = ["systemctl", "reload", "minecraft"]

[server]
listen_address = "127.0.0.1:3090"

# [[operators]]
# name = "console"
# token = "change-me"
# permissions = ["togglemode.toggle", "togglemode.check"]
"#;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ToggleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(rename = "toggle-mode", alias = "toggle_mode", default = "default_toggle_mode")]
    pub toggle_mode: ToggleMode,

    /// Re-check interval for DYNAMIC, in seconds.
    #[serde(default = "default_delay")]
    pub delay: u64,

    #[serde(default)]
    pub status: StatusConfig,

    #[serde(default)]
    pub host: HostConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub operators: Vec<OperatorConfig>,

    #[serde(default)]
    pub tracing: TracingConfig,
}

/// The part of the config the engine owns: loaded once, `toggle_mode`
/// rewritten on every policy change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistedConfig {
    pub enabled: bool,
    pub toggle_mode: ToggleMode,
    pub delay: u64,
}

impl PersistedConfig {
    /// Scheduler period. A zero delay is clamped to one second.
    pub fn interval(&self) -> Duration {
        if self.delay == 0 {
            tracing::warn!("delay = 0 is not a usable re-check interval, using 1 second");
            return Duration::from_secs(1);
        }
        Duration::from_secs(self.delay)
    }
}

/// Status endpoint probed in DYNAMIC mode.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusConfig {
    #[serde(default = "default_status_url")]
    pub url: String,

    #[serde(default = "default_status_timeout")]
    pub timeout_secs: u64,
}

/// Where the managed server keeps its settings and how to reload it.
#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_properties_path")]
    pub properties_path: PathBuf,

    /// argv of the command that makes the server re-read its settings.
    #[serde(default)]
    pub reload_command: Option<Vec<String>>,
}

/// Admin API listen configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
}

/// A sender allowed to use the admin API.
#[derive(Debug, Clone, Deserialize)]
pub struct OperatorConfig {
    pub name: String,
    pub token: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_toggle_mode() -> ToggleMode {
    ToggleMode::On
}

fn default_delay() -> u64 {
    60
}

fn default_status_url() -> String {
    "http://status.mojang.com".to_string()
}

fn default_status_timeout() -> u64 {
    10
}

fn default_properties_path() -> PathBuf {
    PathBuf::from("server.properties")
}

fn default_listen_address() -> String {
    "127.0.0.1:3090".to_string()
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            url: default_status_url(),
            timeout_secs: default_status_timeout(),
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            properties_path: default_properties_path(),
            reload_command: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
        }
    }
}

impl ToggleConfig {
    /// Load configuration from a TOML file and environment variables.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (TOGGLE_ prefix, __ for nesting)
    /// 2. TOML config file
    /// 3. Defaults
    pub fn load(config_path: &Path) -> anyhow::Result<Self> {
        let config: ToggleConfig = Figment::new()
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("TOGGLE_").split("__"))
            .extract()?;

        Ok(config)
    }

    pub fn persisted(&self) -> PersistedConfig {
        PersistedConfig {
            enabled: self.enabled,
            toggle_mode: self.toggle_mode,
            delay: self.delay,
        }
    }
}
