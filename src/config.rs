//! Runtime configuration.
//!
//! A [`Config`] is built once at startup (defaults, then an optional YAML or
//! JSON file, then CLI overrides) and handed to every component. API keys are
//! never written in the file itself: each endpoint names the environment
//! variable that holds its key, and [`Config::resolve_credentials`] reads them
//! exactly once.
//!
//! ```yaml
//! database_path: data/transactions.db
//! batch_size: 20
//! explorer:
//!   api_key_env: ETHERSCAN_API_KEY
//! deepseek:
//!   base_url: https://api.deepseek.com/v1
//!   model: deepseek-chat
//!   api_key_env: DEEPSEEK_API_KEY
//! ```
//!
//! An LLM endpoint section replaces the built-in one entirely, so all three
//! of its fields are required.

use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_result_path")]
    pub result_path: PathBuf,
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Number of most recent transactions fed to the analysis stages.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_parse_timeout")]
    pub parse_timeout_secs: u64,
    #[serde(default = "default_analysis_timeout")]
    pub analysis_timeout_secs: u64,
    #[serde(default)]
    pub explorer: ExplorerConfig,
    #[serde(default = "LlmEndpointConfig::deepseek")]
    pub deepseek: LlmEndpointConfig,
    #[serde(default = "LlmEndpointConfig::anthropic")]
    pub anthropic: LlmEndpointConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExplorerConfig {
    #[serde(default = "default_explorer_url")]
    pub base_url: String,
    #[serde(default = "default_explorer_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_parse_timeout")]
    pub timeout_secs: u64,
    #[serde(skip)]
    pub api_key: Option<SecretString>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LlmEndpointConfig {
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    #[serde(skip)]
    pub api_key: Option<SecretString>,
}

impl LlmEndpointConfig {
    pub fn deepseek() -> Self {
        Self {
            base_url: "https://api.deepseek.com/v1".into(),
            model: "deepseek-chat".into(),
            api_key_env: "DEEPSEEK_API_KEY".into(),
            api_key: None,
        }
    }

    pub fn anthropic() -> Self {
        Self {
            base_url: "https://api.anthropic.com/v1".into(),
            model: "claude-3-5-sonnet-latest".into(),
            api_key_env: "ANTHROPIC_API_KEY".into(),
            api_key: None,
        }
    }

    pub fn has_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Copy of the key for a client that owns its own credential.
    pub fn key(&self) -> Option<SecretString> {
        self.api_key
            .as_ref()
            .map(|k| SecretString::from(k.expose_secret().to_owned()))
    }
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            base_url: default_explorer_url(),
            api_key_env: default_explorer_key_env(),
            timeout_secs: default_parse_timeout(),
            api_key: None,
        }
    }
}

impl ExplorerConfig {
    pub fn key(&self) -> Option<SecretString> {
        self.api_key
            .as_ref()
            .map(|k| SecretString::from(k.expose_secret().to_owned()))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            result_path: default_result_path(),
            listen: default_listen(),
            batch_size: default_batch_size(),
            parse_timeout_secs: default_parse_timeout(),
            analysis_timeout_secs: default_analysis_timeout(),
            explorer: ExplorerConfig::default(),
            deepseek: LlmEndpointConfig::deepseek(),
            anthropic: LlmEndpointConfig::anthropic(),
        }
    }
}

impl Config {
    /// Load from an optional file, then pull API keys from the process
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => load_config(p)?,
            None => Self::default(),
        };
        config.resolve_credentials(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Fill every endpoint's key from `lookup(api_key_env)`. Placeholder
    /// values (blank, or containing `...`) are treated as absent.
    pub fn resolve_credentials<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        self.explorer.api_key = lookup(&self.explorer.api_key_env)
            .filter(|k| valid_api_key(k))
            .map(SecretString::from);
        self.deepseek.api_key = lookup(&self.deepseek.api_key_env)
            .filter(|k| valid_api_key(k))
            .map(SecretString::from);
        self.anthropic.api_key = lookup(&self.anthropic.api_key_env)
            .filter(|k| valid_api_key(k))
            .map(SecretString::from);
    }

    pub fn with_explorer_key(mut self, key: impl Into<String>) -> Self {
        self.explorer.api_key = Some(SecretString::from(key.into()));
        self
    }

    pub fn with_deepseek_key(mut self, key: impl Into<String>) -> Self {
        self.deepseek.api_key = Some(SecretString::from(key.into()));
        self
    }

    pub fn with_anthropic_key(mut self, key: impl Into<String>) -> Self {
        self.anthropic.api_key = Some(SecretString::from(key.into()));
        self
    }
}

pub fn valid_api_key(key: &str) -> bool {
    let trimmed = key.trim();
    !trimmed.is_empty() && !trimmed.contains("...")
}

pub fn load_config(path: &Path) -> Result<Config> {
    let raw = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;

    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
        .unwrap_or(false);

    let config: Config = if is_yaml {
        serde_yaml::from_str(&raw)
            .map_err(|e| Error::Config(format!("invalid YAML config {}: {}", path.display(), e)))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("invalid JSON config {}: {}", path.display(), e)))?
    };

    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<()> {
    if config.batch_size == 0 {
        return Err(Error::Config("batch_size must be at least 1".into()));
    }
    if config.parse_timeout_secs == 0 || config.analysis_timeout_secs == 0 {
        return Err(Error::Config("timeouts must be at least 1 second".into()));
    }
    for (name, url) in [
        ("explorer", &config.explorer.base_url),
        ("deepseek", &config.deepseek.base_url),
        ("anthropic", &config.anthropic.base_url),
    ] {
        if reqwest::Url::parse(url).is_err() {
            return Err(Error::Config(format!("{name}.base_url is not a valid URL: {url}")));
        }
    }
    Ok(())
}

fn default_database_path() -> PathBuf {
    PathBuf::from("transactions.db")
}

fn default_result_path() -> PathBuf {
    PathBuf::from("analysis_demo/result.json")
}

fn default_listen() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_batch_size() -> usize {
    20
}

fn default_parse_timeout() -> u64 {
    30
}

fn default_analysis_timeout() -> u64 {
    60
}

fn default_explorer_url() -> String {
    "https://api.etherscan.io/api".to_string()
}

fn default_explorer_key_env() -> String {
    "ETHERSCAN_API_KEY".to_string()
}
