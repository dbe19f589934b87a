//! Multi-context fusion: turns one correlation group into an incident with
//! temporal, semantic and causal summaries and a single fusion score.

pub mod causal;
pub mod engine;
pub mod score;
pub mod semantic;
pub mod temporal;

use crate::enrich::EnrichedSignal;
use crate::signal::{Severity, SignalKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use self::engine::FusionEngine;
pub use self::score::FusionWeights;

/// One fused correlation group. `incident_id` equals the correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub incident_id: String,
    pub temporal: TemporalContext,
    pub semantic: SemanticContext,
    pub causal: CausalContext,
    pub fusion_score: f64,
    pub signal_count: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalContext {
    pub event_count: usize,
    pub duration_seconds: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub average_interval_seconds: f64,
    /// Hour of day (UTC) to member count.
    pub hourly_distribution: BTreeMap<u32, usize>,
    pub is_burst_pattern: bool,
    /// Members per minute, with the duration floored at one minute.
    pub temporal_intensity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentCategory {
    Performance,
    Connectivity,
    Application,
}

impl IncidentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentCategory::Performance => "performance",
            IncidentCategory::Connectivity => "connectivity",
            IncidentCategory::Application => "application",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticContext {
    pub event_types: BTreeMap<SignalKind, usize>,
    pub sources: BTreeMap<String, usize>,
    pub severities: BTreeMap<Severity, usize>,
    pub common_keywords: Vec<String>,
    pub type_diversity: usize,
    pub source_diversity: usize,
    pub incident_category: IncidentCategory,
    pub is_multi_service: bool,
    pub max_severity: Severity,
}

/// Minimal view of a member signal used inside causal summaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRef {
    pub signal_id: i64,
    pub source: String,
    pub message: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalEdge {
    pub cause: SignalRef,
    pub effect: SignalRef,
    pub time_diff_seconds: f64,
    pub causal_likelihood: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyTrend {
    Increasing,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyProgression {
    pub average: f64,
    pub max: f64,
    pub min: f64,
    pub trend: AnomalyTrend,
    pub high_anomaly_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootCauseReason {
    FirstAnomalousEvent,
    HighAnomalyScore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootCauseCandidate {
    pub source: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub confidence: f64,
    pub reason: RootCauseReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalContext {
    pub causal_chains: Vec<CausalEdge>,
    pub anomaly_progression: AnomalyProgression,
    pub potential_root_causes: Vec<RootCauseCandidate>,
    pub causal_strength: f64,
    pub has_clear_progression: bool,
    pub root_cause_confidence: f64,
}

/// Members sorted by parent timestamp, ties by signal id.
pub(crate) fn chronological(group: &[EnrichedSignal]) -> Vec<&EnrichedSignal> {
    let mut members: Vec<&EnrichedSignal> = group.iter().collect();
    members.sort_by(|a, b| {
        a.signal
            .timestamp
            .cmp(&b.signal.timestamp)
            .then(a.signal.id.cmp(&b.signal.id))
    });
    members
}

/// Build the incident for a non-empty correlation group.
pub fn fuse(
    correlation_id: &str,
    group: &[EnrichedSignal],
    weights: &FusionWeights,
    now: DateTime<Utc>,
) -> Option<Incident> {
    let members = chronological(group);
    let temporal = temporal::summarize(&members)?;
    let semantic = semantic::summarize(&members)?;
    let causal = causal::summarize(&members)?;
    let fusion_score = score::fusion_score(&temporal, &semantic, &causal, weights);

    Some(Incident {
        incident_id: correlation_id.to_string(),
        temporal,
        semantic,
        causal,
        fusion_score,
        signal_count: members.len(),
        created_at: now,
    })
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn empty_group_fuses_to_nothing() {
        assert!(fuse("g", &[], &FusionWeights::default(), base_time()).is_none());
    }

    #[test]
    fn incident_id_is_the_correlation_id() {
        let group = vec![
            member(1, "web-1", SignalKind::Log, Severity::Critical, 0, "upstream timeout", 0.9),
            member(2, "db-1", SignalKind::Metric, Severity::High, 20, "slow query timeout", 0.6),
        ];
        let incident = fuse("corr-42", &group, &FusionWeights::default(), base_time()).unwrap();
        assert_eq!(incident.incident_id, "corr-42");
        assert_eq!(incident.signal_count, 2);
        assert!((0.0..=1.0).contains(&incident.fusion_score));
    }
}
