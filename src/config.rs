//! TOML configuration for signalfuse.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! runnable setup. The file is located through [`Config::resolve`] and
//! checked with [`Config::validate`] before anything is started.

use crate::analysis::{EvidenceWeights, RouterSettings};
use crate::enrich::coordinator::EnrichmentSettings;
use crate::enrich::{AnomalyScorer, ScanOrder};
use crate::fusion::FusionWeights;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_ENV: &str = "SIGNALFUSE_CONFIG";

/// Config file looked up in the working directory as a last resort.
pub const LOCAL_CONFIG: &str = "signalfuse.toml";

/// Upper bound for the confidence threshold while deep analysis is on. Deep
/// analysis caps confidence at 0.95, so a higher threshold could leave an
/// incident worse off after investigation.
const MAX_THRESHOLD_WITH_DEEP: f64 = 95.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub correlation: CorrelationConfig,
    #[serde(default)]
    pub anomaly: AnomalyConfig,
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Locate and load the configuration, in order:
    /// 1. `explicit` (the `--config` flag),
    /// 2. the path in `SIGNALFUSE_CONFIG`,
    /// 3. `./signalfuse.toml`,
    /// 4. compiled defaults.
    ///
    /// A file that was named but cannot be read or parsed is an error; only a
    /// missing `./signalfuse.toml` falls through to the defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            if !path.is_empty() {
                return Self::load(Path::new(&path));
            }
        }
        let local = Path::new(LOCAL_CONFIG);
        if local.exists() {
            return Self::load(local);
        }
        debug!("no configuration file found, using defaults");
        Ok(Self::default())
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.path.trim().is_empty() {
            return Err(ConfigError::invalid("storage.path", "must not be empty"));
        }
        if self.api.bind.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::invalid("api.bind", format!("'{}' is not a socket address", self.api.bind)));
        }

        positive("correlation.window_minutes", self.correlation.window_minutes)?;

        positive("anomaly.history_limit", self.anomaly.history_limit as u64)?;
        if self.anomaly.min_history > self.anomaly.history_limit {
            return Err(ConfigError::invalid(
                "anomaly.min_history",
                format!(
                    "{} exceeds anomaly.history_limit {}",
                    self.anomaly.min_history, self.anomaly.history_limit
                ),
            ));
        }
        let sim = self.anomaly.similarity_threshold;
        if !sim.is_finite() || !(0.0..=1.0).contains(&sim) {
            return Err(ConfigError::invalid("anomaly.similarity_threshold", format!("{sim} is outside [0, 1]")));
        }

        let f = &self.fusion;
        non_negative("fusion.temporal_weight", f.temporal_weight)?;
        non_negative("fusion.semantic_weight", f.semantic_weight)?;
        non_negative("fusion.causal_weight", f.causal_weight)?;
        if f.weights().sum() <= 0.0 {
            return Err(ConfigError::invalid("fusion", "weights must have a positive sum"));
        }
        if let Some(minutes) = f.lookback_minutes {
            positive("fusion.lookback_minutes", minutes)?;
        }

        let a = &self.analysis;
        let threshold = a.confidence_threshold;
        if !threshold.is_finite() || !(0.0..=100.0).contains(&threshold) {
            return Err(ConfigError::invalid(
                "analysis.confidence_threshold",
                format!("{threshold} is outside [0, 100]"),
            ));
        }
        if a.deep_analysis_enabled && threshold > MAX_THRESHOLD_WITH_DEEP {
            return Err(ConfigError::invalid(
                "analysis.confidence_threshold",
                format!("{threshold} exceeds {MAX_THRESHOLD_WITH_DEEP} while deep analysis is enabled"),
            ));
        }
        positive("analysis.pattern_top_k", a.pattern_top_k as u64)?;
        positive("analysis.call_timeout_secs", a.call_timeout_secs)?;
        for (name, weight) in a.evidence.all() {
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::invalid(
                    "analysis.evidence",
                    format!("{name} weight {weight} must be finite and >= 0"),
                ));
            }
        }
        for inv in &a.investigators {
            if inv.name.trim().is_empty() {
                return Err(ConfigError::invalid("analysis.investigators", "investigator name must not be empty"));
            }
            if !(inv.url.starts_with("http://") || inv.url.starts_with("https://")) {
                return Err(ConfigError::invalid(
                    "analysis.investigators",
                    format!("{}: '{}' is not an http(s) url", inv.name, inv.url),
                ));
            }
        }

        let p = &self.pipeline;
        positive("pipeline.interval_secs", p.interval_secs)?;
        positive("pipeline.enrichment_batch", p.enrichment_batch as u64)?;
        positive("pipeline.fusion_batch", p.fusion_batch as u64)?;
        positive("pipeline.analysis_batch", p.analysis_batch as u64)?;
        Ok(())
    }

    pub fn enrichment_settings(&self) -> EnrichmentSettings {
        EnrichmentSettings {
            window: chrono::Duration::minutes(self.correlation.window_minutes as i64),
            history_limit: self.anomaly.history_limit,
            batch_limit: self.pipeline.enrichment_batch,
            lookback: None,
        }
    }

    pub fn anomaly_scorer(&self) -> AnomalyScorer {
        AnomalyScorer::new(self.anomaly.min_history, self.anomaly.similarity_threshold)
    }

    pub fn fusion_lookback(&self) -> Option<chrono::Duration> {
        self.fusion.lookback_minutes.map(|m| chrono::Duration::minutes(m as i64))
    }

    pub fn router_settings(&self) -> RouterSettings {
        RouterSettings {
            confidence_threshold: self.analysis.confidence_threshold,
            deep_analysis_enabled: self.analysis.deep_analysis_enabled,
            top_k: self.analysis.pattern_top_k,
            call_timeout: self.analysis.call_timeout(),
            evidence: self.analysis.evidence,
        }
    }
}

fn positive(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::invalid(field, "must be greater than zero"));
    }
    Ok(())
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::invalid(field, format!("{value} must be finite and >= 0")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file; parent directories are created on open.
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "data/signalfuse.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Half-width of the correlation window.
    pub window_minutes: u64,
    pub scan_order: ScanOrder,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            window_minutes: 5,
            scan_order: ScanOrder::Chronological,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub history_limit: usize,
    pub min_history: usize,
    pub similarity_threshold: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            history_limit: 100,
            min_history: 10,
            similarity_threshold: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub temporal_weight: f64,
    pub semantic_weight: f64,
    pub causal_weight: f64,
    /// Ignore group members older than this many minutes.
    pub lookback_minutes: Option<u64>,
}

impl Default for FusionConfig {
    fn default() -> Self {
        let w = FusionWeights::default();
        Self {
            temporal_weight: w.temporal,
            semantic_weight: w.semantic,
            causal_weight: w.causal,
            lookback_minutes: None,
        }
    }
}

impl FusionConfig {
    pub fn weights(&self) -> FusionWeights {
        FusionWeights {
            temporal: self.temporal_weight,
            semantic: self.semantic_weight,
            causal: self.causal_weight,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Percentage (0-100) an explanation must reach to be accepted outright.
    pub confidence_threshold: f64,
    pub deep_analysis_enabled: bool,
    pub pattern_top_k: usize,
    pub call_timeout_secs: u64,
    pub evidence: EvidenceWeights,
    pub investigators: Vec<InvestigatorConfig>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 80.0,
            deep_analysis_enabled: true,
            pattern_top_k: 3,
            call_timeout_secs: 30,
            evidence: EvidenceWeights::default(),
            investigators: Vec::new(),
        }
    }
}

impl AnalysisConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// An HTTP investigator endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvestigatorConfig {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub interval_secs: u64,
    pub enrichment_batch: usize,
    pub fusion_batch: usize,
    pub analysis_batch: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            enrichment_batch: 100,
            fusion_batch: 50,
            analysis_batch: 20,
        }
    }
}

impl PipelineConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
