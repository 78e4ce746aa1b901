//! Pipeline configuration loaded from `config.toml`.
//!
//! Only `[limits]` is required. Every other section falls back to defaults
//! so a minimal file is just the two budget numbers.

use econbrief_core::guard::GuardLimits;
use econbrief_core::sources::SourceSettings;
use econbrief_core::Market;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from loading or validating configuration. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    pub limits: LimitsConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

/// `[limits]` — the execution guard's budgets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LimitsConfig {
    pub daily_token_budget: u64,
    pub execution_window_minutes: u64,
    /// Count tokens spent by earlier runs the same day against the budget.
    #[serde(default = "default_true")]
    pub carry_over_daily_usage: bool,
}

impl LimitsConfig {
    pub fn guard_limits(&self) -> GuardLimits {
        GuardLimits {
            daily_token_budget: self.daily_token_budget,
            execution_window_minutes: self.execution_window_minutes,
        }
    }
}

/// Which [`LlmClient`](crate::llm::LlmClient) backs the reasoning steps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Offline deterministic responses; no network, no key.
    #[default]
    Placeholder,
    /// OpenAI-compatible chat completions endpoint.
    #[serde(rename = "openai")]
    OpenAi,
}

/// `[api]` — model parameters for the LLM steps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    pub provider: LlmProvider,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub base_url: String,
    /// Environment variable holding the API key. The key itself never goes
    /// in the config file.
    pub api_key_env: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Placeholder,
            model: "gpt-4o-mini".into(),
            temperature: 0.2,
            max_tokens: 2000,
            base_url: "https://api.openai.com/v1".into(),
            api_key_env: "OPENAI_API_KEY".into(),
        }
    }
}

impl ApiConfig {
    /// The API key from the configured environment variable, if set and non-empty.
    pub fn api_key(&self) -> Option<String> {
        read_env_key(&self.api_key_env)
    }
}

/// `[paths]` — where artifacts and prompts live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    pub prompts_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            prompts_dir: PathBuf::from("prompts"),
        }
    }
}

impl PathsConfig {
    /// `{data_dir}/market_calendars`, one subdirectory per market.
    pub fn calendars_dir(&self) -> PathBuf {
        self.data_dir.join("market_calendars")
    }

    /// `{data_dir}/events` — raw and normalized events per run date.
    pub fn events_dir(&self) -> PathBuf {
        self.data_dir.join("events")
    }

    /// `{data_dir}/archive` — analysis and validation reports.
    pub fn archive_dir(&self) -> PathBuf {
        self.data_dir.join("archive")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("state").join("token_ledger.json")
    }

    pub fn default_manual_file(&self) -> PathBuf {
        self.data_dir.join("sources").join("market_calendars.yaml")
    }
}

/// `[sources]` — calendar source settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourcesConfig {
    pub finnhub_api_key_env: String,
    /// Defaults to `{data_dir}/sources/market_calendars.yaml`.
    pub manual_file: Option<PathBuf>,
    /// Days past the run date included in the fetch stage.
    pub lookahead_days: u32,
    /// Market name → tickers for per-symbol endpoints.
    pub watchlist: BTreeMap<String, Vec<String>>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            finnhub_api_key_env: "FINNHUB_API_KEY".into(),
            manual_file: None,
            lookahead_days: 7,
            watchlist: BTreeMap::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn read_env_key(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

impl PipelineConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults for everything plus the given limits.
    pub fn with_limits(limits: LimitsConfig) -> Self {
        Self {
            limits,
            api: ApiConfig::default(),
            paths: PathsConfig::default(),
            sources: SourcesConfig::default(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.daily_token_budget == 0 {
            return Err(ConfigError::Invalid(
                "limits.daily_token_budget must be positive".into(),
            ));
        }
        if self.limits.execution_window_minutes == 0 {
            return Err(ConfigError::Invalid(
                "limits.execution_window_minutes must be positive".into(),
            ));
        }
        for name in self.sources.watchlist.keys() {
            name.parse::<Market>()
                .map_err(|e| ConfigError::Invalid(format!("sources.watchlist: {e}")))?;
        }
        Ok(())
    }

    /// Resolve source settings, reading the Finnhub key from the environment.
    pub fn source_settings(&self) -> Result<SourceSettings, ConfigError> {
        let mut watchlist = BTreeMap::new();
        for (name, tickers) in &self.sources.watchlist {
            let market = name
                .parse::<Market>()
                .map_err(|e| ConfigError::Invalid(format!("sources.watchlist: {e}")))?;
            let tickers = tickers
                .iter()
                .map(|t| t.trim().to_uppercase())
                .filter(|t| !t.is_empty())
                .collect();
            watchlist.insert(market, tickers);
        }
        Ok(SourceSettings {
            finnhub_api_key: read_env_key(&self.sources.finnhub_api_key_env),
            watchlist,
            manual_file: self
                .sources
                .manual_file
                .clone()
                .unwrap_or_else(|| self.paths.default_manual_file()),
        })
    }
}
