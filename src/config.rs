use anyhow::Result;
use clap::Parser;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::model::LendingPolicy;

#[derive(Parser, Debug)]
#[command(name = "librarian")]
#[command(about = "Interactive book catalog with borrow and return tracking", long_about = None)]
pub struct Cli {
    #[arg(short = 'c', long = "config")]
    pub config_path: Option<String>,
}

pub fn default_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".librarian")
}

pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.yaml")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Deserialize, Clone)]
pub struct App {
    #[serde(default = "default_database")]
    database: String,
    #[serde(default)]
    pub turso_url: Option<String>,
    #[serde(default)]
    pub turso_auth_token: Option<String>,
    #[serde(default = "default_sync_interval")]
    pub sync_interval_seconds: u64,
    #[serde(default = "default_store_timeout")]
    pub store_timeout_ms: u64,
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
    #[serde(default = "default_connect_backoff")]
    pub connect_backoff_ms: u64,
    #[serde(default)]
    pub lending_policy: LendingPolicy,
    #[serde(default = "default_seed")]
    pub seed_sample_books: bool,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_database() -> String {
    "library.db".to_string()
}

fn default_sync_interval() -> u64 {
    60
}

fn default_store_timeout() -> u64 {
    5000
}

fn default_connect_retries() -> u32 {
    3
}

fn default_connect_backoff() -> u64 {
    250
}

fn default_seed() -> bool {
    true
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for App {
    fn default() -> Self {
        App {
            database: default_database(),
            turso_url: None,
            turso_auth_token: None,
            sync_interval_seconds: default_sync_interval(),
            store_timeout_ms: default_store_timeout(),
            connect_retries: default_connect_retries(),
            connect_backoff_ms: default_connect_backoff(),
            lending_policy: LendingPolicy::default(),
            seed_sample_books: default_seed(),
            log_format: LogFormat::default(),
            log_level: default_log_level(),
        }
    }
}

impl App {
    pub fn get_db(&self) -> &str {
        &self.database
    }

    pub fn with_db(mut self, database: &str) -> Self {
        self.database = database.to_string();
        self
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn connect_backoff(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_ms)
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub app: App,
    /// Set when no file was found and the built-in defaults are in use.
    #[serde(skip)]
    pub defaulted: bool,
    /// `${VAR}` references that had neither a value nor a default. Loading
    /// happens before logging is set up, so these are reported by the caller.
    #[serde(skip)]
    pub missing_env_vars: Vec<String>,
}

impl Config {
    pub fn new(path: &str) -> Result<Self> {
        let cfg = Config::load_config(path)?;
        Ok(cfg)
    }

    /// Loads `path` when it exists. A missing file only falls back to
    /// defaults when it is the default location.
    pub fn load_or_default(path: &Path, explicit: bool) -> Result<Self> {
        if !explicit && !path.exists() {
            return Ok(Config {
                defaulted: true,
                ..Config::default()
            });
        }
        let path = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("config path is not valid UTF-8: {:?}", path))?;
        Config::new(path)
    }

    fn load_config(path: &str) -> Result<Config> {
        let yaml_str = fs::read_to_string(path)?;
        Config::from_yaml(&yaml_str)
    }

    pub fn from_yaml(yaml_str: &str) -> Result<Config> {
        let (yaml_with_env, missing_env_vars) = Config::substitute_env_vars(yaml_str);
        let mut config: Config = serde_yaml::from_str(&yaml_with_env)?;
        config.missing_env_vars = missing_env_vars;
        Ok(config)
    }

    fn substitute_env_vars(yaml_str: &str) -> (String, Vec<String>) {
        let mut result = yaml_str.to_string();
        let mut missing = Vec::new();
        let mut offset = 0;

        while let Some(start) = result[offset..].find("${") {
            let actual_start = offset + start;
            let Some(end) = result[actual_start..].find('}') else {
                break;
            };
            let var_name = &result[actual_start + 2..actual_start + end];

            // ${VAR:-default}
            let env_value = match var_name.split_once(":-") {
                Some((actual_var, default_val)) => {
                    env::var(actual_var).unwrap_or_else(|_| default_val.to_string())
                }
                None => env::var(var_name).unwrap_or_else(|_| {
                    missing.push(var_name.to_string());
                    String::new()
                }),
            };

            result.replace_range(actual_start..actual_start + end + 1, &env_value);
            offset = actual_start + env_value.len();
        }

        (result, missing)
    }
}
