//! Deep-analysis synthesis: merges investigator findings into an existing
//! analysis result and recomputes its confidence.

use crate::analysis::{AnalysisResult, Finding, FindingKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ceiling for the summed evidence boost.
pub const MAX_EVIDENCE_BOOST: f64 = 0.3;
/// Ceiling for any deep-analysis confidence.
pub const MAX_DEEP_CONFIDENCE: f64 = 0.95;
pub const FALLBACK_BOOST: f64 = 0.1;
pub const FALLBACK_CEILING: f64 = 0.85;

/// Confidence contributed by each finding kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceWeights {
    pub monitoring_anomaly: f64,
    pub service_down: f64,
    pub recent_deploy: f64,
    pub related_issue: f64,
    pub risky_code_change: f64,
    pub upstream_provider_incident: f64,
    pub degraded_dependency: f64,
}

impl Default for EvidenceWeights {
    fn default() -> Self {
        Self {
            monitoring_anomaly: 0.2,
            service_down: 0.3,
            recent_deploy: 0.25,
            related_issue: 0.2,
            risky_code_change: 0.15,
            upstream_provider_incident: 0.1,
            degraded_dependency: 0.15,
        }
    }
}

impl EvidenceWeights {
    pub fn weight(&self, kind: FindingKind) -> f64 {
        match kind {
            FindingKind::MonitoringAnomaly => self.monitoring_anomaly,
            FindingKind::ServiceDown => self.service_down,
            FindingKind::RecentDeploy => self.recent_deploy,
            FindingKind::RelatedIssue => self.related_issue,
            FindingKind::RiskyCodeChange => self.risky_code_change,
            FindingKind::UpstreamProviderIncident => self.upstream_provider_incident,
            FindingKind::DegradedDependency => self.degraded_dependency,
        }
    }

    pub fn all(&self) -> [(&'static str, f64); 7] {
        [
            ("monitoring_anomaly", self.monitoring_anomaly),
            ("service_down", self.service_down),
            ("recent_deploy", self.recent_deploy),
            ("related_issue", self.related_issue),
            ("risky_code_change", self.risky_code_change),
            ("upstream_provider_incident", self.upstream_provider_incident),
            ("degraded_dependency", self.degraded_dependency),
        ]
    }
}

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("evidence weight for {0:?} is not a finite non-negative number")]
    InvalidWeight(FindingKind),
    #[error("original confidence {0} is not finite")]
    InvalidConfidence(f64),
}

/// Updated fields for a deep-analysed result.
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub root_cause: String,
    pub confidence: f64,
    pub suggested_fix: String,
    pub reasoning: String,
}

/// Merge `findings` into `original`.
///
/// The new confidence is `min(0.95, c + min(0.3, sum of weights))` and never
/// drops below the original `c`.
pub fn synthesize(original: &AnalysisResult, findings: &[Finding], weights: &EvidenceWeights) -> Result<Synthesis, SynthesisError> {
    let before = original.confidence_score;
    if !before.is_finite() {
        return Err(SynthesisError::InvalidConfidence(before));
    }

    let mut factors = Vec::with_capacity(findings.len());
    for f in findings {
        let w = weights.weight(f.kind);
        if !w.is_finite() || w < 0.0 {
            return Err(SynthesisError::InvalidWeight(f.kind));
        }
        factors.push(w);
    }

    let boost = factors.iter().sum::<f64>().min(MAX_EVIDENCE_BOOST);
    let confidence = (before + boost).min(MAX_DEEP_CONFIDENCE).max(before);

    let mut root_cause = original.root_cause.clone();
    if !findings.is_empty() {
        root_cause.push_str("\n\nAdditional findings from deep analysis:");
        for f in findings {
            root_cause.push_str("\n• ");
            root_cause.push_str(&f.summary);
        }
    }

    let mut reasoning = format!("Deep analysis with {} finding(s).\n\nOriginal analysis:\n{}", findings.len(), original.reasoning);
    if !findings.is_empty() {
        reasoning.push_str("\n\nFindings:");
        for (f, w) in findings.iter().zip(&factors) {
            reasoning.push_str(&format!("\n• {} (+{:.2})", f.summary, w));
        }
    }
    reasoning.push_str(&format!("\n\nConfidence changed from {:.2} to {:.2}.", before, confidence));

    Ok(Synthesis {
        root_cause,
        confidence,
        suggested_fix: enhanced_fix(&original.suggested_fix, findings),
        reasoning,
    })
}

/// Result used when synthesis fails: the original analysis, annotated, with
/// a small confidence bump capped at [`FALLBACK_CEILING`].
pub fn fallback(original: &AnalysisResult, error: &SynthesisError) -> Synthesis {
    let before = original.confidence_score;
    let confidence = if before.is_finite() {
        (before + FALLBACK_BOOST).min(FALLBACK_CEILING).max(before)
    } else {
        FALLBACK_BOOST
    };
    Synthesis {
        root_cause: format!("{}\n\n[Deep analysis completed with partial results]", original.root_cause),
        confidence,
        suggested_fix: original.suggested_fix.clone(),
        reasoning: format!("{}\n\n[Deep analysis error: {}]", original.reasoning, error),
    }
}

fn enhanced_fix(original: &str, findings: &[Finding]) -> String {
    let mut actions: Vec<&str> = Vec::new();
    for f in findings {
        let action = f.remediation.as_deref().or_else(|| f.kind.default_action());
        if let Some(a) = action {
            if !actions.contains(&a) {
                actions.push(a);
            }
        }
    }
    if actions.is_empty() {
        return original.to_string();
    }
    let mut fix = format!("{original}\n\nRecommended actions:");
    for a in actions {
        fix.push_str("\n• ");
        fix.push_str(a);
    }
    fix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AnalysisState, DEEP_ANALYSIS_PLACEHOLDER_FIX};
    use chrono::Utc;

    fn pending(confidence: f64) -> AnalysisResult {
        AnalysisResult {
            incident_id: "inc-1".into(),
            root_cause: "database saturation".into(),
            confidence_score: confidence,
            suggested_fix: DEEP_ANALYSIS_PLACEHOLDER_FIX.into(),
            state: AnalysisState::PendingDeep,
            reasoning: "pool exhausted".into(),
            pattern_matches: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn boost_is_capped_at_point_three() {
        let findings = vec![
            Finding::new(FindingKind::ServiceDown, "db-1 down"),
            Finding::new(FindingKind::RecentDeploy, "api v2.3 deployed"),
        ];
        let s = synthesize(&pending(0.55), &findings, &EvidenceWeights::default()).unwrap();
        assert!((s.confidence - 0.85).abs() < 1e-12);
        assert!(s.root_cause.contains("db-1 down"));
        assert!(s.suggested_fix.starts_with(DEEP_ANALYSIS_PLACEHOLDER_FIX));
        assert!(s.suggested_fix.contains("Restart failed services"));
        assert!(s.reasoning.contains("from 0.55 to 0.85"));
    }

    #[test]
    fn confidence_never_exceeds_ceiling() {
        let findings = vec![Finding::new(FindingKind::ServiceDown, "down")];
        let s = synthesize(&pending(0.9), &findings, &EvidenceWeights::default()).unwrap();
        assert_eq!(s.confidence, MAX_DEEP_CONFIDENCE);
    }

    #[test]
    fn no_findings_keeps_confidence() {
        let s = synthesize(&pending(0.4), &[], &EvidenceWeights::default()).unwrap();
        assert_eq!(s.confidence, 0.4);
        assert_eq!(s.root_cause, "database saturation");
        assert_eq!(s.suggested_fix, DEEP_ANALYSIS_PLACEHOLDER_FIX);
    }

    #[test]
    fn finding_remediation_wins_and_duplicates_collapse() {
        let mut custom = Finding::new(FindingKind::ServiceDown, "cache down");
        custom.remediation = Some("Fail over to replica cache".into());
        let findings = vec![
            custom,
            Finding::new(FindingKind::DegradedDependency, "dns slow"),
            Finding::new(FindingKind::DegradedDependency, "cdn slow"),
        ];
        let s = synthesize(&pending(0.3), &findings, &EvidenceWeights::default()).unwrap();
        assert!(s.suggested_fix.contains("Fail over to replica cache"));
        assert!(!s.suggested_fix.contains("Restart failed services"));
        assert_eq!(s.suggested_fix.matches("circuit breakers").count(), 1);
    }

    #[test]
    fn invalid_weight_fails_and_fallback_bumps_modestly() {
        let weights = EvidenceWeights {
            service_down: f64::NAN,
            ..EvidenceWeights::default()
        };
        let original = pending(0.5);
        let err = synthesize(&original, &[Finding::new(FindingKind::ServiceDown, "x")], &weights).unwrap_err();
        let fb = fallback(&original, &err);
        assert!((fb.confidence - 0.6).abs() < 1e-12);
        assert!(fb.reasoning.contains("Deep analysis error"));

        let high = pending(0.9);
        assert_eq!(fallback(&high, &err).confidence, 0.9);
    }
}
