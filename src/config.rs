//! Runtime settings: worker pool size, oracle endpoint, pricing, cache TTL.
//!
//! Settings come from environment variables with compiled defaults, optionally
//! overridden by a TOML file. Nothing here touches the filesystem except the
//! explicit `load_file` path.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// Per-model pricing in USD per 1M tokens: (input, output).
pub type ModelPrice = (f64, f64);

/// Engine-wide settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Worker pool size for concurrent jobs.
    pub max_workers: usize,
    /// Oracle endpoint (OpenAI-compatible chat completions).
    pub oracle_base_url: String,
    /// API key sent as a bearer token. Empty string sends no auth header.
    pub oracle_api_key: String,
    /// Model name used for both ontology and triple extraction.
    pub oracle_model: String,
    /// Oracle request timeout in seconds.
    pub oracle_timeout_secs: u64,
    /// Pricing table: model name -> USD per 1M tokens (input, output).
    pub pricing: BTreeMap<String, ModelPrice>,
    /// Cache entry time-to-live in seconds.
    pub cache_ttl_secs: u64,
    /// Target chunk size in characters.
    pub chunk_size: usize,
    /// Chunk overlap in characters.
    pub chunk_overlap: usize,
    /// Entity resolution similarity threshold (0-100).
    pub resolve_threshold: u32,
}

impl Default for Settings {
    fn default() -> Self {
        let mut pricing = BTreeMap::new();
        pricing.insert("gpt-4o-mini".to_string(), (0.15, 0.60));
        pricing.insert("gpt-4o".to_string(), (2.50, 10.00));
        pricing.insert("o1-mini".to_string(), (3.00, 12.00));

        Self {
            max_workers: 1,
            oracle_base_url: "https://api.openai.com/v1".into(),
            oracle_api_key: String::new(),
            oracle_model: "gpt-4o-mini".into(),
            oracle_timeout_secs: 120,
            pricing,
            cache_ttl_secs: 604_800, // 7 days
            chunk_size: 4_000,
            chunk_overlap: 400,
            resolve_threshold: 85,
        }
    }
}

/// Partial overrides read from an optional TOML file.
#[derive(Debug, Default, Deserialize)]
struct FileOverrides {
    max_workers: Option<usize>,
    oracle_base_url: Option<String>,
    oracle_api_key: Option<String>,
    oracle_model: Option<String>,
    oracle_timeout_secs: Option<u64>,
    cache_ttl_secs: Option<u64>,
    chunk_size: Option<usize>,
    chunk_overlap: Option<usize>,
    resolve_threshold: Option<u32>,
}

impl Settings {
    /// Build settings from environment variables on top of defaults.
    ///
    /// Recognized variables: `GRAFO_MAX_WORKERS`, `GRAFO_ORACLE_BASE_URL`,
    /// `GRAFO_ORACLE_API_KEY` (falls back to `OPENAI_API_KEY`),
    /// `GRAFO_ORACLE_MODEL`, `GRAFO_ORACLE_TIMEOUT_SECS`, `GRAFO_CACHE_TTL_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        if let Ok(v) = std::env::var("GRAFO_MAX_WORKERS") {
            settings.max_workers = v.parse().map_err(|_| ConfigError::Invalid {
                message: format!("GRAFO_MAX_WORKERS must be a positive integer, got \"{v}\""),
            })?;
        }
        if let Ok(v) = std::env::var("GRAFO_ORACLE_BASE_URL") {
            settings.oracle_base_url = v;
        }
        if let Ok(v) = std::env::var("GRAFO_ORACLE_API_KEY") {
            settings.oracle_api_key = v;
        } else if let Ok(v) = std::env::var("OPENAI_API_KEY") {
            settings.oracle_api_key = v;
        }
        if let Ok(v) = std::env::var("GRAFO_ORACLE_MODEL") {
            settings.oracle_model = v;
        }
        if let Ok(v) = std::env::var("GRAFO_ORACLE_TIMEOUT_SECS") {
            settings.oracle_timeout_secs = v.parse().map_err(|_| ConfigError::Invalid {
                message: format!("GRAFO_ORACLE_TIMEOUT_SECS must be an integer, got \"{v}\""),
            })?;
        }
        if let Ok(v) = std::env::var("GRAFO_CACHE_TTL_SECS") {
            settings.cache_ttl_secs = v.parse().map_err(|_| ConfigError::Invalid {
                message: format!("GRAFO_CACHE_TTL_SECS must be an integer, got \"{v}\""),
            })?;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Apply overrides from a TOML file on top of the current settings.
    pub fn load_file(mut self, path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let overrides: FileOverrides = toml::from_str(&raw).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;

        if let Some(v) = overrides.max_workers {
            self.max_workers = v;
        }
        if let Some(v) = overrides.oracle_base_url {
            self.oracle_base_url = v;
        }
        if let Some(v) = overrides.oracle_api_key {
            self.oracle_api_key = v;
        }
        if let Some(v) = overrides.oracle_model {
            self.oracle_model = v;
        }
        if let Some(v) = overrides.oracle_timeout_secs {
            self.oracle_timeout_secs = v;
        }
        if let Some(v) = overrides.cache_ttl_secs {
            self.cache_ttl_secs = v;
        }
        if let Some(v) = overrides.chunk_size {
            self.chunk_size = v;
        }
        if let Some(v) = overrides.chunk_overlap {
            self.chunk_overlap = v;
        }
        if let Some(v) = overrides.resolve_threshold {
            self.resolve_threshold = v;
        }

        self.validate()?;
        Ok(self)
    }

    /// Price for a model; unknown models cost nothing.
    pub fn price_for(&self, model: &str) -> ModelPrice {
        self.pricing.get(model).copied().unwrap_or((0.0, 0.0))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid {
                message: "max_workers must be at least 1".into(),
            });
        }
        if self.resolve_threshold > 100 {
            return Err(ConfigError::Invalid {
                message: "resolve_threshold must be in 0..=100".into(),
            });
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::Invalid {
                message: "chunk_overlap must be smaller than chunk_size".into(),
            });
        }
        Ok(())
    }
}
