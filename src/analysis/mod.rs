//! Confidence-gated root-cause analysis: result types, the collaborator
//! traits (Explainer, PatternMatcher, Investigator) and the router that
//! moves incidents through the analysis state machine.

pub mod evidence;
pub mod explain;
pub mod investigate;
pub mod locks;
pub mod patterns;
pub mod router;

use crate::fusion::Incident;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

pub use self::evidence::EvidenceWeights;
pub use self::locks::IncidentLocks;
pub use self::router::{AnalysisRouter, RouterSettings};

/// Fix text stored while an incident waits for deep analysis.
pub const DEEP_ANALYSIS_PLACEHOLDER_FIX: &str = "Requires deeper analysis with external tools";
/// Confidence assigned when the Explainer fails.
pub const GENERATION_FAILED_CONFIDENCE: f64 = 0.1;
/// Replacement for an out-of-range Explainer confidence.
pub const FALLBACK_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("explainer failed: {0}")]
    Explainer(String),
    #[error("pattern lookup failed: {0}")]
    Patterns(String),
    #[error("investigator {tool} failed: {reason}")]
    Investigator { tool: String, reason: String },
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Analysis state of one incident. An incident without a stored result is
/// `Unanalyzed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisState {
    Unanalyzed,
    Analyzed,
    PendingDeep,
    AnalyzedLowConfidence,
    DeepAnalyzed,
}

impl AnalysisState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisState::Unanalyzed => "unanalyzed",
            AnalysisState::Analyzed => "analyzed",
            AnalysisState::PendingDeep => "pending_deep",
            AnalysisState::AnalyzedLowConfidence => "analyzed_low_confidence",
            AnalysisState::DeepAnalyzed => "deep_analyzed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AnalysisState::Analyzed | AnalysisState::AnalyzedLowConfidence | AnalysisState::DeepAnalyzed
        )
    }
}

impl std::fmt::Display for AnalysisState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AnalysisState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unanalyzed" => Ok(AnalysisState::Unanalyzed),
            "analyzed" => Ok(AnalysisState::Analyzed),
            "pending_deep" => Ok(AnalysisState::PendingDeep),
            "analyzed_low_confidence" => Ok(AnalysisState::AnalyzedLowConfidence),
            "deep_analyzed" => Ok(AnalysisState::DeepAnalyzed),
            other => Err(format!("unknown analysis state: {other}")),
        }
    }
}

/// One ranked historical match returned by a [`PatternMatcher`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub similarity: f64,
    pub text: String,
    #[serde(default)]
    pub suggested_steps: Vec<String>,
}

/// What an [`Explainer`] produces for an incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub root_cause: String,
    pub confidence: f64,
    pub suggested_fix: String,
    pub reasoning: String,
}

impl Explanation {
    /// Replace a non-finite or out-of-range confidence with
    /// [`FALLBACK_CONFIDENCE`].
    pub fn sanitized(mut self) -> Self {
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            self.confidence = FALLBACK_CONFIDENCE;
        }
        self
    }
}

/// Result of asking the Explainer, with failures made explicit.
#[derive(Debug, Clone, PartialEq)]
pub enum ExplainOutcome {
    Explained(Explanation),
    GenerationFailed(String),
}

impl ExplainOutcome {
    pub fn from_result(result: Result<Explanation, GenerationError>) -> Self {
        match result {
            Ok(explanation) => ExplainOutcome::Explained(explanation.sanitized()),
            Err(e) => ExplainOutcome::GenerationFailed(e.to_string()),
        }
    }

    /// The explanation to record. Failures become a minimal low-confidence
    /// placeholder.
    pub fn into_explanation(self) -> Explanation {
        match self {
            ExplainOutcome::Explained(explanation) => explanation,
            ExplainOutcome::GenerationFailed(reason) => Explanation {
                root_cause: "Unable to determine root cause: explanation generation failed".to_string(),
                confidence: GENERATION_FAILED_CONFIDENCE,
                suggested_fix: "Manual investigation required".to_string(),
                reasoning: format!("Explainer error: {reason}"),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub incident_id: String,
    pub root_cause: String,
    pub confidence_score: f64,
    pub suggested_fix: String,
    pub state: AnalysisState,
    pub reasoning: String,
    pub pattern_matches: Vec<PatternMatch>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Kinds of structured evidence an [`Investigator`] can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    MonitoringAnomaly,
    ServiceDown,
    RecentDeploy,
    RelatedIssue,
    RiskyCodeChange,
    UpstreamProviderIncident,
    DegradedDependency,
}

impl FindingKind {
    /// Remediation used when a finding carries none of its own.
    pub fn default_action(&self) -> Option<&'static str> {
        match self {
            FindingKind::ServiceDown => Some("Restart failed services"),
            FindingKind::RecentDeploy => Some("Review recent deployment changes and consider rollback if issues persist"),
            FindingKind::DegradedDependency => Some("Monitor dependency recovery and add circuit breakers if needed"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

impl Finding {
    pub fn new(kind: FindingKind, summary: impl Into<String>) -> Self {
        Self {
            kind,
            summary: summary.into(),
            remediation: None,
        }
    }
}

/// Append-only log entry for one deep-analysis attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestigationRecord {
    pub incident_id: String,
    pub tools_used: Vec<String>,
    pub findings: Vec<Finding>,
    pub confidence_before: f64,
    pub confidence_after: f64,
    pub duration_seconds: f64,
    pub created_at: DateTime<Utc>,
}

impl InvestigationRecord {
    pub fn confidence_delta(&self) -> f64 {
        self.confidence_after - self.confidence_before
    }
}

/// Totals over the investigation log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvestigationStats {
    pub total: u64,
    pub average_duration_seconds: f64,
    pub average_confidence_improvement: f64,
    /// Investigations each tool contributed findings to.
    pub tool_usage: BTreeMap<String, u64>,
}

/// Turns a fused incident and its historical matches into an explanation.
#[async_trait]
pub trait Explainer: Send + Sync {
    async fn explain(&self, incident: &Incident, matches: &[PatternMatch]) -> Result<Explanation, GenerationError>;
}

/// Ranks historical patterns by similarity to an incident.
#[async_trait]
pub trait PatternMatcher: Send + Sync {
    async fn top_k(&self, incident: &Incident, k: usize) -> Result<Vec<PatternMatch>, GenerationError>;
}

/// External tool gathering evidence for a low-confidence incident.
/// `Ok(None)` means the tool had nothing to report.
#[async_trait]
pub trait Investigator: Send + Sync {
    fn name(&self) -> &str;

    async fn investigate(&self, incident_id: &str) -> Result<Option<Vec<Finding>>, GenerationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn explanation(confidence: f64) -> Explanation {
        Explanation {
            root_cause: "disk full".into(),
            confidence,
            suggested_fix: "free space".into(),
            reasoning: "".into(),
        }
    }

    #[test]
    fn out_of_range_confidence_is_replaced() {
        assert_eq!(explanation(1.7).sanitized().confidence, FALLBACK_CONFIDENCE);
        assert_eq!(explanation(-0.1).sanitized().confidence, FALLBACK_CONFIDENCE);
        assert_eq!(explanation(f64::NAN).sanitized().confidence, FALLBACK_CONFIDENCE);
        assert_eq!(explanation(0.42).sanitized().confidence, 0.42);
    }

    #[test]
    fn generation_failure_becomes_placeholder() {
        let outcome = ExplainOutcome::from_result(Err(GenerationError::Timeout(Duration::from_secs(30))));
        assert!(matches!(outcome, ExplainOutcome::GenerationFailed(_)));
        let e = outcome.into_explanation();
        assert_eq!(e.confidence, GENERATION_FAILED_CONFIDENCE);
        assert!(e.reasoning.contains("timed out"));
    }

    #[test]
    fn state_round_trips_through_text() {
        for state in [
            AnalysisState::Unanalyzed,
            AnalysisState::Analyzed,
            AnalysisState::PendingDeep,
            AnalysisState::AnalyzedLowConfidence,
            AnalysisState::DeepAnalyzed,
        ] {
            assert_eq!(state.as_str().parse::<AnalysisState>().unwrap(), state);
        }
        assert!(!AnalysisState::PendingDeep.is_terminal());
        assert!(AnalysisState::DeepAnalyzed.is_terminal());
    }
}
