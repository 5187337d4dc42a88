/*!
common/src/lib.rs

Shared configuration types and DB helper functions for Herald.

This crate holds nothing that encodes pipeline behavior — it is the
ambient layer the `herald` crate builds on:
- Config data structures (deserialized from TOML)
- An async loader for a TOML config file, with default+override merging
- Helpers to initialize and migrate the SQLite database pool
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

/// Database configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the sqlite database file (e.g. "data/herald.db")
    pub path: String,
}

/// Poller configuration: fixed-interval cycle driver (spec.md §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default = "default_cycle_timeout_seconds")]
    pub cycle_timeout_seconds: u64,
}

fn default_interval_seconds() -> u64 {
    300
}

fn default_cycle_timeout_seconds() -> u64 {
    300
}

impl Default for PollConfig {
    fn default() -> Self {
        PollConfig {
            interval_seconds: default_interval_seconds(),
            cycle_timeout_seconds: default_cycle_timeout_seconds(),
        }
    }
}

/// Ollama (local model host) connection defaults (spec.md §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,
    #[serde(default = "default_security_model")]
    pub security_model: String,
    #[serde(default = "default_curation_model")]
    pub curation_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_fetch_timeout_secs")]
    pub request_timeout_seconds: u64,
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_security_model() -> String {
    "gemma3:4b".to_string()
}

fn default_curation_model() -> String {
    "llama3".to_string()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

impl Default for OllamaConfig {
    fn default() -> Self {
        OllamaConfig {
            base_url: default_ollama_base_url(),
            security_model: default_security_model(),
            curation_model: default_curation_model(),
            embedding_model: default_embedding_model(),
            request_timeout_seconds: default_fetch_timeout_secs(),
        }
    }
}

/// Process-wide scoring threshold defaults (spec.md §4.8/§4.9). Per-user
/// `UserPreference` rows overlay these at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdsConfig {
    #[serde(default = "default_interest_threshold")]
    pub interest_threshold: f64,
    #[serde(default = "default_security_threshold")]
    pub security_threshold: f64,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

fn default_interest_threshold() -> f64 {
    8.0
}
fn default_security_threshold() -> f64 {
    7.0
}
fn default_similarity_threshold() -> f64 {
    0.75
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        ThresholdsConfig {
            interest_threshold: default_interest_threshold(),
            security_threshold: default_security_threshold(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

/// Config-layer prompt override (PromptLoader tier 2, spec.md §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptOverride {
    pub template: Option<String>,
    pub temperature: Option<f32>,
}

/// Named prompt-kind overlay map. Never permits a `security` key — the
/// security prompt is always the embedded default (I7).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PromptsConfig {
    pub curation: Option<PromptOverride>,
    pub summarization: Option<PromptOverride>,
    pub group_summary: Option<PromptOverride>,
    pub related_groups: Option<PromptOverride>,
}

/// Read-only mode: no Fetcher, no LLM client instantiated (spec.md §4.8).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReadOnlyConfig {
    #[serde(default)]
    pub enabled: bool,
}

/// Top-level application configuration (deserialized from config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub thresholds: ThresholdsConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
    #[serde(default)]
    pub read_only: ReadOnlyConfig,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(
        default_path: Option<&Path>,
        override_path: Option<&Path>,
    ) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        if let Some(path) = default_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read default config: {}", path.display()))?;
                let val: toml::Value =
                    toml::from_str(&data).context("Failed to parse default configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        if let Some(path) = override_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read override config: {}", path.display()))?;
                let val: toml::Value =
                    toml::from_str(&data).context("Failed to parse override configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        if config_value
            .get("prompts")
            .and_then(|p| p.get("security"))
            .is_some()
        {
            anyhow::bail!("'security' is not a configurable prompt kind (I7)");
        }

        let cfg: Config = config_value
            .try_into()
            .context("Failed to parse merged configuration")?;

        Ok(cfg)
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Initialize an SQLite connection pool, creating the parent directory and
/// database file if necessary. Schema creation/migration is the caller's
/// responsibility (see `herald::store::Store::open`), mirroring the
/// teacher's split between pool bootstrap (here) and schema ensure (caller).
pub async fn init_db_pool(path: &str) -> Result<SqlitePool> {
    if path != ":memory:" {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.with_context(|| {
                    format!("Failed to create DB parent directory: {}", parent.display())
                })?;
            }
        }
    }

    let options = if path == ":memory:" {
        SqliteConnectOptions::from_str("sqlite::memory:")?
    } else {
        SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to sqlite database at path: {}", path))?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn config_from_string_and_db_pool() {
        let toml = r#"
            [database]
            path = "data/test.db"

            [poll]
            interval_seconds = 120
        "#;

        let cfg: Config = toml::from_str(toml).expect("parse config");
        assert_eq!(cfg.poll.interval_seconds, 120);
        assert_eq!(cfg.thresholds.interest_threshold, 8.0);

        let pool = init_db_pool(":memory:").await.expect("init pool");
        let conn = pool.acquire().await.expect("acquire conn");
        drop(conn);
    }

    #[tokio::test]
    async fn load_with_defaults_merges_override_over_default() {
        let dir = tempfile::tempdir().unwrap();
        let default_path = dir.path().join("config.default.toml");
        let override_path = dir.path().join("config.toml");

        tokio::fs::write(
            &default_path,
            r#"
            [database]
            path = "data/default.db"
            [thresholds]
            interest_threshold = 8.0
            "#,
        )
        .await
        .unwrap();

        tokio::fs::write(
            &override_path,
            r#"
            [database]
            path = "data/override.db"
            "#,
        )
        .await
        .unwrap();

        let cfg = Config::load_with_defaults(Some(&default_path), Some(&override_path))
            .await
            .unwrap();

        assert_eq!(cfg.database.path, "data/override.db");
        assert_eq!(cfg.thresholds.interest_threshold, 8.0);
    }

    #[tokio::test]
    async fn rejects_security_prompt_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(
            &path,
            r#"
            [database]
            path = "data/test.db"
            [prompts.security]
            template = "sneaky override"
            "#,
        )
        .await
        .unwrap();

        let err = Config::load_with_defaults(Some(&path), None).await.unwrap_err();
        assert!(err.to_string().contains("security"));
    }
}
