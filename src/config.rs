use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Top-level configuration, loaded once at startup from a YAML file.
///
/// The file path comes from the `DEVGATE_CONFIG` environment variable and
/// defaults to `devgate.yaml` in the working directory.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub static_files: StaticFilesConfig,
    #[serde(default)]
    pub proxy: Vec<RuleConfig>,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StaticFilesConfig {
    #[serde(default = "default_static_root")]
    pub root: PathBuf,
    #[serde(default = "default_index")]
    pub index: String,
}

/// One proxy rule as written in the config file.
///
/// Exactly one of `context` (glob-context matcher, e.g.
/// `/Alchemy/IAlchemyApi/**`) or `path` (path-prefix key, e.g.
/// `/IAlchemyApi/**`) must be present. Validation happens when the
/// rule set is built, before the server starts accepting connections.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleConfig {
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    pub target: String,
    #[serde(default)]
    pub change_origin: bool,
}

/// Outbound timeout bounds. Defaults apply when the section is omitted,
/// so forwarding is never silently unbounded.
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_connect_secs")]
    pub connect_secs: u64,
    #[serde(default = "default_request_secs")]
    pub request_secs: u64,
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_static_root() -> PathBuf {
    PathBuf::from("./public")
}

fn default_index() -> String {
    "index.html".to_string()
}

fn default_connect_secs() -> u64 {
    5
}

fn default_request_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

impl Default for StaticFilesConfig {
    fn default() -> Self {
        Self {
            root: default_static_root(),
            index: default_index(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_secs(),
            request_secs: default_request_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }
}

impl Config {
    /// Loads configuration from the path named by `DEVGATE_CONFIG`,
    /// falling back to `devgate.yaml`.
    pub fn load() -> Result<Self> {
        let path = std::env::var("DEVGATE_CONFIG")
            .unwrap_or_else(|_| "devgate.yaml".to_string());

        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {path}"))?;

        Self::from_yaml(&contents)
            .with_context(|| format!("Invalid config file {path}"))
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents).context("Failed to parse YAML config")
    }
}
