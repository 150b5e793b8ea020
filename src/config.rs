/// Configuration module.
///
/// Handles loading, validating, and providing default configuration values.
/// Paths and language selection are plain values; nothing here reads the
/// environment.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::DistanceMetric;
use crate::indexer::chunk_id::IdStrategy;
use crate::indexer::chunk_log;
use crate::indexer::languages::LanguageConfig;

// ── Default value functions ──────────────────────────────────────────

fn default_chunks_dir() -> PathBuf {
    PathBuf::from("./resources/chunks")
}

fn default_vector_db_dir() -> PathBuf {
    PathBuf::from("./resources/vector_db")
}

fn default_batch_size() -> usize {
    1
}

fn default_search_top_k() -> usize {
    5
}

fn default_language() -> String {
    "cpp".to_string()
}

fn default_model_name() -> String {
    "Salesforce/codet5p-110m-embedding".to_string()
}

fn default_model_dir() -> PathBuf {
    PathBuf::from("./resources/models/codet5p-110m-embedding")
}

fn default_dimensions() -> usize {
    256
}

fn default_max_length() -> usize {
    512
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Known codebases by name.
    #[serde(default)]
    pub codebases: BTreeMap<String, CodebaseConfig>,

    /// Where intermediate chunk logs are written.
    #[serde(default = "default_chunks_dir")]
    pub chunks_dir: PathBuf,

    /// Parent directory of the per-codebase vector indexes.
    #[serde(default = "default_vector_db_dir")]
    pub vector_db_dir: PathBuf,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_search_top_k")]
    pub search_top_k: usize,

    #[serde(default)]
    pub id_strategy: IdStrategy,

    #[serde(default)]
    pub distance: DistanceMetric,

    #[serde(default)]
    pub model: ModelConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CodebaseConfig {
    pub path: PathBuf,

    #[serde(default = "default_language")]
    pub language: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_model_name")]
    pub name: String,

    #[serde(default = "default_model_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Token window; longer input is truncated.
    #[serde(default = "default_max_length")]
    pub max_length: usize,

    #[serde(default)]
    pub token_type_ids: bool,

    /// Index with hash-based mock vectors instead of the model. Only for
    /// trying the pipeline out; such an index must not be reused later.
    #[serde(default)]
    pub mock: bool,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            codebases: BTreeMap::new(),
            chunks_dir: default_chunks_dir(),
            vector_db_dir: default_vector_db_dir(),
            batch_size: default_batch_size(),
            search_top_k: default_search_top_k(),
            id_strategy: IdStrategy::default(),
            distance: DistanceMetric::default(),
            model: ModelConfig::default(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            dir: default_model_dir(),
            dimensions: default_dimensions(),
            max_length: default_max_length(),
            token_type_ids: false,
            mock: false,
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// If `config_path` is empty, defaults to `"config.json"`.
    /// If the file does not exist, returns a default config and generates a
    /// template when the default path is used.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            "config.json"
        } else {
            config_path
        };

        if !Path::new(path).exists() {
            info!("{path} not found, using defaults");
            let cfg = Self::default();

            if path == "config.json" {
                match cfg.save(path) {
                    Ok(()) => info!("Generated config template: {path}"),
                    Err(e) => warn!("Failed to generate config template: {e}"),
                }
            }

            return Ok(cfg);
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;
        let cfg: Config =
            serde_json::from_str(&data).with_context(|| format!("invalid JSON in {path}"))?;

        info!(
            "Loaded configuration from {path} ({} codebases)",
            cfg.codebases.len()
        );
        Ok(cfg)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.batch_size > 0, "batch_size must be positive");
        anyhow::ensure!(self.search_top_k > 0, "search_top_k must be positive");
        anyhow::ensure!(
            self.model.dimensions > 0,
            "model.dimensions must be positive"
        );
        anyhow::ensure!(
            self.model.max_length > 0,
            "model.max_length must be positive"
        );

        for (name, codebase) in &self.codebases {
            anyhow::ensure!(
                !name.is_empty()
                    && name
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
                "codebase name '{name}' may only contain letters, digits, '_' and '-'"
            );
            anyhow::ensure!(
                LanguageConfig::get_by_name(&codebase.language).is_some(),
                "codebase '{name}' uses unsupported language '{}' (expected one of {:?})",
                codebase.language,
                LanguageConfig::names()
            );
        }
        Ok(())
    }

    #[must_use]
    pub fn codebase(&self, name: &str) -> Option<&CodebaseConfig> {
        self.codebases.get(name)
    }

    /// Collection holding a codebase's chunks.
    #[must_use]
    pub fn collection_name(codebase: &str) -> String {
        format!("{codebase}_chunks")
    }

    /// Directory of a codebase's vector index.
    #[must_use]
    pub fn vector_db_path(&self, codebase: &str) -> PathBuf {
        self.vector_db_dir.join(codebase)
    }

    /// Intermediate chunk log for a codebase.
    #[must_use]
    pub fn chunk_log_path(&self, codebase: &str, language: &str) -> PathBuf {
        chunk_log::log_path(&self.chunks_dir, codebase, language)
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.search_top_k, 5);
        assert_eq!(config.model.dimensions, 256);
        assert_eq!(config.model.max_length, 512);
        assert_eq!(config.id_strategy, IdStrategy::Content);
        assert_eq!(config.distance, DistanceMetric::Cosine);
        assert!(!config.model.mock);
        assert!(config.codebases.is_empty());
    }

    #[test]
    fn test_load_from_json() {
        let json = r#"{
            "codebases": {"clickhouse": {"path": "./resources/codebases/ClickHouse"}},
            "batch_size": 16,
            "id_strategy": "ordinal",
            "distance": "l2"
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.batch_size, 16);
        assert_eq!(config.id_strategy, IdStrategy::Ordinal);
        assert_eq!(config.distance, DistanceMetric::L2);

        let codebase = config.codebase("clickhouse").unwrap();
        assert_eq!(codebase.language, "cpp");
        assert_eq!(
            codebase.path,
            PathBuf::from("./resources/codebases/ClickHouse")
        );
        assert_eq!(config.search_top_k, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_bad_batch_size() {
        let mut config = Config::default();
        config.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_unknown_language() {
        let mut config = Config::default();
        config.codebases.insert(
            "legacy".to_string(),
            CodebaseConfig {
                path: PathBuf::from("."),
                language: "fortran".to_string(),
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bad_codebase_name() {
        let mut config = Config::default();
        config.codebases.insert(
            "../up".to_string(),
            CodebaseConfig {
                path: PathBuf::from("."),
                language: "cpp".to_string(),
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_derived_paths() {
        let config = Config::default();
        assert_eq!(Config::collection_name("clickhouse"), "clickhouse_chunks");
        assert_eq!(
            config.vector_db_path("clickhouse"),
            PathBuf::from("./resources/vector_db/clickhouse")
        );
        assert_eq!(
            config.chunk_log_path("clickhouse", "cpp"),
            PathBuf::from("./resources/chunks/clickhouse/cpp_functions.jsonl")
        );
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let path = path.to_str().unwrap();

        let mut config = Config::default();
        config.batch_size = 8;
        config.save(path).unwrap();

        let loaded = Config::load(path).unwrap();
        assert_eq!(loaded.batch_size, 8);
        assert_eq!(loaded.model.name, config.model.name);
    }

    #[test]
    fn test_invalid_json_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(Config::load(path.to_str().unwrap()).is_err());
    }
}
