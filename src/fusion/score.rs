use crate::fusion::{CausalContext, SemanticContext, TemporalContext};
use crate::signal::Severity;
use serde::{Deserialize, Serialize};

/// Relative weights of the three sub-scores. They need not sum to one;
/// [`fusion_score`] divides by their sum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    pub temporal: f64,
    pub semantic: f64,
    pub causal: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            temporal: 0.3,
            semantic: 0.4,
            causal: 0.3,
        }
    }
}

impl FusionWeights {
    pub fn sum(&self) -> f64 {
        self.temporal + self.semantic + self.causal
    }
}

pub fn temporal_score(t: &TemporalContext) -> f64 {
    let burst = if t.is_burst_pattern { 0.2 } else { 0.0 };
    (t.temporal_intensity / 10.0).min(1.0) + burst
}

pub fn semantic_score(s: &SemanticContext) -> f64 {
    let severity_bonus = match s.max_severity {
        Severity::Critical => 0.4,
        Severity::High => 0.3,
        _ => 0.0,
    };
    let multi = if s.is_multi_service { 0.3 } else { 0.0 };
    severity_bonus + multi + (s.type_diversity as f64 / 10.0).min(0.3)
}

/// `causal_strength` already carries the increasing-trend boost.
pub fn causal_score(c: &CausalContext) -> f64 {
    0.6 * c.causal_strength + 0.4 * c.root_cause_confidence
}

/// Weighted mean of the sub-scores, clamped to `[0, 1]`.
pub fn fusion_score(t: &TemporalContext, s: &SemanticContext, c: &CausalContext, weights: &FusionWeights) -> f64 {
    let total = weights.sum();
    if !total.is_finite() || total <= 0.0 {
        return 0.0;
    }
    let weighted = weights.temporal * temporal_score(t) + weights.semantic * semantic_score(s) + weights.causal * causal_score(c);
    let score = weighted / total;
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}
