//! Signal enrichment: correlation ids, anomaly scores and derived context.

pub mod anomaly;
pub mod context;
pub mod coordinator;
pub mod correlator;

use crate::signal::{Severity, Signal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use self::anomaly::{AnomalyOutcome, AnomalyScorer};
pub use self::coordinator::EnrichmentCoordinator;
pub use self::correlator::{Correlator, FirstMatchCorrelator, ScanOrder};

/// A signal plus everything enrichment derived for it. One per signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedSignal {
    pub signal: Signal,
    pub correlation_id: String,
    pub anomaly_score: f64,
    pub context: ContextData,
}

/// Derived statistics attached to an enriched signal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextData {
    pub frequency: FrequencyCounts,
    pub related_sources: Vec<String>,
    pub time: TimeContext,
    pub severity: SeverityContext,
}

/// Prior signals with the same source and kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequencyCounts {
    pub last_hour: usize,
    pub last_day: usize,
    pub last_week: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeContext {
    pub hour_of_day: u32,
    /// Monday = 0.
    pub day_of_week: u32,
    pub is_business_hours: bool,
    pub is_weekend: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityContext {
    pub recent_distribution: BTreeMap<Severity, usize>,
    pub is_escalation: bool,
}
