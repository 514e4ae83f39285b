use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::session::MAX_IDLE_EXPIRY_SECS;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub suggestions: SuggestionsConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    5
}
fn default_busy_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_chunk_timeout_secs")]
    pub chunk_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            temperature: default_temperature(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            chunk_timeout_secs: default_chunk_timeout_secs(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_secs(self.chunk_timeout_secs)
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    1.0
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_chunk_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionsConfig {
    #[serde(default = "default_idle_expiry_secs")]
    pub idle_expiry_secs: u64,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_expiry_secs: default_idle_expiry_secs(),
            capacity: default_capacity(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_idle_expiry_secs() -> u64 {
    30 * 60
}
fn default_capacity() -> usize {
    10_000
}
fn default_sweep_interval_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct SuggestionsConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_progress_every")]
    pub progress_every: usize,
}

impl Default for SuggestionsConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            progress_every: default_progress_every(),
        }
    }
}

fn default_max_chars() -> usize {
    brainstormer_core::filter::MAX_SUGGESTION_CHARS
}
fn default_progress_every() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    /// Stream requests allowed per caller per minute; `0` disables throttling.
    #[serde(default = "default_search_per_minute")]
    pub search_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            search_per_minute: default_search_per_minute(),
        }
    }
}

fn default_search_per_minute() -> u32 {
    20
}

impl Config {
    /// In-memory defaults for tests and in-process runs.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/brainstormer.sqlite"),
                max_connections: default_max_connections(),
                busy_timeout_ms: default_busy_timeout_ms(),
            },
            server: ServerConfig {
                bind: "127.0.0.1:8000".to_string(),
            },
            llm: LlmConfig::default(),
            sessions: SessionsConfig::default(),
            suggestions: SuggestionsConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.db.max_connections == 0 {
        anyhow::bail!("db.max_connections must be >= 1");
    }

    match config.llm.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if !(0.0..=2.0).contains(&config.llm.temperature) {
        anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
    }
    if config.llm.chunk_timeout_secs == 0 || config.llm.timeout_secs == 0 {
        anyhow::bail!("llm.timeout_secs and llm.chunk_timeout_secs must be > 0");
    }

    if config.sessions.idle_expiry_secs == 0 {
        anyhow::bail!("sessions.idle_expiry_secs must be > 0");
    }
    if config.sessions.idle_expiry_secs > MAX_IDLE_EXPIRY_SECS {
        anyhow::bail!(
            "sessions.idle_expiry_secs must be <= {} (seven days)",
            MAX_IDLE_EXPIRY_SECS
        );
    }
    if config.sessions.capacity == 0 {
        anyhow::bail!("sessions.capacity must be >= 1");
    }
    if config.sessions.sweep_interval_secs == 0 {
        anyhow::bail!("sessions.sweep_interval_secs must be > 0");
    }

    if config.suggestions.max_chars == 0 {
        anyhow::bail!("suggestions.max_chars must be > 0");
    }
    if config.suggestions.progress_every == 0 {
        anyhow::bail!("suggestions.progress_every must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
[db]
path = "./data/b.sqlite"

[server]
bind = "127.0.0.1:8000"
"#;

    fn parse(extra: &str) -> Result<Config> {
        let config: Config = toml::from_str(&format!("{}{}", BASE, extra))?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_defaults() {
        let cfg = parse("").unwrap();
        assert_eq!(cfg.db.max_connections, 5);
        assert_eq!(cfg.db.busy_timeout_ms, 5_000);
        assert_eq!(cfg.llm.provider, "disabled");
        assert!(!cfg.llm.is_enabled());
        assert_eq!(cfg.llm.model, "gpt-4o-mini");
        assert_eq!(cfg.sessions.idle_expiry_secs, 1800);
        assert_eq!(cfg.suggestions.max_chars, 100);
        assert_eq!(cfg.suggestions.progress_every, 10);
        assert_eq!(cfg.rate_limit.search_per_minute, 20);
    }

    #[test]
    fn test_overrides() {
        let cfg = parse(
            r#"
[llm]
provider = "openai"
temperature = 0.7
chunk_timeout_secs = 5

[sessions]
capacity = 3
"#,
        )
        .unwrap();
        assert!(cfg.llm.is_enabled());
        assert_eq!(cfg.llm.chunk_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.sessions.capacity, 3);
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let err = parse("[llm]\nprovider = \"llama\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown llm provider"));
    }

    #[test]
    fn test_rejects_zero_values() {
        assert!(parse("[sessions]\ncapacity = 0\n").is_err());
        assert!(parse("[suggestions]\nprogress_every = 0\n").is_err());
        assert!(parse("[llm]\ntemperature = 3.5\n").is_err());
    }

    #[test]
    fn test_rejects_unbounded_idle_expiry() {
        let err = parse("[sessions]\nidle_expiry_secs = 9223372036854775807\n").unwrap_err();
        assert!(err.to_string().contains("idle_expiry_secs"), "{}", err);
        assert!(parse("[sessions]\nidle_expiry_secs = 604800\n").is_ok());
        assert!(parse("[sessions]\nidle_expiry_secs = 604801\n").is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brainstormer.toml");
        std::fs::write(&path, BASE).unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:8000");
        assert!(load_config(&dir.path().join("missing.toml")).is_err());
    }
}
