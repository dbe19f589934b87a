//! Ingested telemetry signals.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of telemetry a signal carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Event,
    Trace,
    Metric,
    Log,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Event => "event",
            SignalKind::Trace => "trace",
            SignalKind::Metric => "metric",
            SignalKind::Log => "log",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "event" => Ok(SignalKind::Event),
            "trace" => Ok(SignalKind::Trace),
            "metric" => Ok(SignalKind::Metric),
            "log" => Ok(SignalKind::Log),
            other => Err(format!("unknown signal kind '{}'", other)),
        }
    }
}

/// Severity levels, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

/// Coarse severity grouping used for correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeverityBand {
    /// critical / high
    Elevated,
    /// medium / low / info
    Routine,
}

impl Severity {
    pub fn band(&self) -> SeverityBand {
        match self {
            Severity::Critical | Severity::High => SeverityBand::Elevated,
            Severity::Medium | Severity::Low | Severity::Info => SeverityBand::Routine,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Severity::Info),
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A stored, immutable telemetry signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: i64,
    pub kind: SignalKind,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// A signal as it arrives at the ingestion boundary, before it has an id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSignal {
    pub kind: SignalKind,
    pub source: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_severity")]
    pub severity: Severity,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub payload: serde_json::Value,
}

fn default_severity() -> Severity {
    Severity::Info
}

impl NewSignal {
    pub fn new(kind: SignalKind, source: &str, timestamp: DateTime<Utc>, severity: Severity, message: &str) -> Self {
        Self {
            kind,
            source: source.to_string(),
            timestamp,
            severity,
            message: message.to_string(),
            metadata: Metadata::new(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// True when the timestamp leaves a week of representable time on
    /// either side, which the enrichment windows need.
    pub fn has_usable_timestamp(&self) -> bool {
        let margin = Duration::weeks(1);
        self.timestamp.checked_sub_signed(margin).is_some() && self.timestamp.checked_add_signed(margin).is_some()
    }
}
