//! Configuration loading: defaults, `config.toml`, then environment overrides.
//!
//! Follows the layered approach the `config`/`envy` crates are built for: a
//! base set of defaults, an optional TOML file, then environment variables
//! taking final precedence.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level runtime configuration for the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory PDFs are written under (`<pdfs_root>/<dataset_id>/...`).
    pub pdfs_root: PathBuf,
    /// Path to the SQLite database file backing the unified store.
    pub db_path: PathBuf,
    /// Path to the sled tree backing the tier-1 cache. Defaults alongside `db_path`.
    pub cache_path: PathBuf,
    /// Optional NCBI API key, raises PMID-metadata/elink rate limits from 3/s to 10/s.
    pub ncbi_api_key: Option<String>,
    /// Required to enable the Unpaywall source (their API mandates a contact email).
    pub unpaywall_email: Option<String>,
    /// Optional institutional proxy base URL, used in "proxy rewrite" mode.
    pub institutional_proxy_url: Option<String>,
    /// Disables TLS certificate verification. Development only.
    pub disable_tls_verify: bool,
    /// Number of publications processed concurrently by the coordinator.
    pub max_parallel_publications: usize,
    /// Per-stage deadlines and outbound-call timeouts.
    pub timeouts: TimeoutSettings,
    /// Retry/backoff tuning shared by L2 and the source clients.
    pub retry: RetrySettings,
    /// Content-extraction quality-score weights (must sum close to 1.0).
    pub extraction_weights: ExtractionWeights,
    /// Upper bound on pages fetched per seed by a paged citation source
    /// (OpenAlex, Semantic Scholar, Europe PMC). Guards against a
    /// pathologically highly-cited seed turning one P1 round into an
    /// unbounded crawl.
    pub citation_pagination_max_pages: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub citation_discovery_secs: u64,
    pub url_collection_secs: u64,
    pub pdf_acquisition_secs: u64,
    pub content_extraction_secs: u64,
    pub source_call_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            citation_discovery_secs: 30,
            url_collection_secs: 30,
            pdf_acquisition_secs: 120,
            content_extraction_secs: 60,
            source_call_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: f64,
    pub max_attempts_per_publication: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: 0.2,
            max_attempts_per_publication: 10,
        }
    }
}

/// Weights for the four quality signals in spec.md §4.8: section coverage,
/// extracted-character-to-page-count density against a target band,
/// reference presence, and parser reliability. Must sum to roughly 1.0 for
/// the score to stay in `[0, 1]` by construction (the scorer also clamps).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionWeights {
    pub section_coverage: f64,
    pub char_density: f64,
    pub reference_presence: f64,
    pub parse_reliability: f64,
}

impl Default for ExtractionWeights {
    fn default() -> Self {
        Self {
            section_coverage: 0.4,
            char_density: 0.2,
            reference_presence: 0.2,
            parse_reliability: 0.2,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("genomics-corpus");
        Self {
            pdfs_root: data_dir.join("pdfs"),
            db_path: data_dir.join("corpus.sqlite3"),
            cache_path: data_dir.join("cache.sled"),
            ncbi_api_key: None,
            unpaywall_email: None,
            institutional_proxy_url: None,
            disable_tls_verify: false,
            max_parallel_publications: 3,
            timeouts: TimeoutSettings::default(),
            retry: RetrySettings::default(),
            extraction_weights: ExtractionWeights::default(),
            citation_pagination_max_pages: 5,
        }
    }
}

/// Overrides layered on top of [`Config::default`] and any config file found.
/// Mirrors the environment-variable names spec'd for this pipeline.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigOverrides {
    pub pdfs_root: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub ncbi_api_key: Option<String>,
    pub unpaywall_email: Option<String>,
    pub institutional_proxy_url: Option<String>,
    pub disable_tls_verify: Option<bool>,
    pub max_parallel_publications: Option<usize>,
}

impl Config {
    /// Load configuration: start from defaults, merge an optional
    /// `config.toml` at `config_path`, then apply environment-variable
    /// overrides (`PDFS_ROOT`, `DB_PATH`, `NCBI_API_KEY`, `UNPAYWALL_EMAIL`,
    /// `INSTITUTIONAL_PROXY_URL`, `DISABLE_TLS_VERIFY`,
    /// `MAX_PARALLEL_PUBLICATIONS`).
    pub fn load(config_path: Option<&std::path::Path>) -> Result<Self> {
        let mut cfg = Config::default();

        if let Some(path) = config_path {
            if path.exists() {
                let text = std::fs::read_to_string(path)?;
                let file_cfg: Config = toml::from_str(&text)
                    .map_err(|e| Error::InvalidInput {
                        field: "config_path".to_string(),
                        reason: format!("invalid config.toml: {e}"),
                    })?;
                cfg = file_cfg;
            }
        }

        let overrides: ConfigOverrides = envy::from_env().map_err(|e| Error::InvalidInput {
            field: "environment".to_string(),
            reason: format!("failed to parse environment overrides: {e}"),
        })?;
        cfg.apply_overrides(overrides);
        Ok(cfg)
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(v) = overrides.pdfs_root {
            self.pdfs_root = v;
        }
        if let Some(v) = overrides.db_path {
            self.db_path = v;
        }
        if let Some(v) = overrides.ncbi_api_key {
            self.ncbi_api_key = Some(v);
        }
        if let Some(v) = overrides.unpaywall_email {
            self.unpaywall_email = Some(v);
        }
        if let Some(v) = overrides.institutional_proxy_url {
            self.institutional_proxy_url = Some(v);
        }
        if let Some(v) = overrides.disable_tls_verify {
            self.disable_tls_verify = v;
        }
        if let Some(v) = overrides.max_parallel_publications {
            self.max_parallel_publications = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_bounds() {
        let cfg = Config::default();
        assert!(cfg.max_parallel_publications >= 1);
        assert!(cfg.retry.max_attempts >= 1);
    }

    #[test]
    fn overrides_only_touch_provided_fields() {
        let mut cfg = Config::default();
        let original_db_path = cfg.db_path.clone();
        cfg.apply_overrides(ConfigOverrides {
            ncbi_api_key: Some("key123".to_string()),
            ..Default::default()
        });
        assert_eq!(cfg.ncbi_api_key.as_deref(), Some("key123"));
        assert_eq!(cfg.db_path, original_db_path);
    }

    #[test]
    fn extraction_weights_sum_close_to_one() {
        let w = ExtractionWeights::default();
        let sum = w.section_coverage + w.char_density + w.reference_presence + w.parse_reliability;
        assert!((sum - 1.0).abs() < 1e-9);
    }
}
