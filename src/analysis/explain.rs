//! Built-in rule-based Explainer.

use crate::analysis::{Explainer, Explanation, GenerationError, PatternMatch};
use crate::fusion::{Incident, IncidentCategory};
use async_trait::async_trait;

const MAX_HEURISTIC_CONFIDENCE: f64 = 0.9;

/// Derives an explanation from the fused context alone. Confidence grows
/// with root-cause evidence, causal strength and the best pattern match.
#[derive(Debug, Default, Clone)]
pub struct HeuristicExplainer;

fn default_steps(category: IncidentCategory) -> &'static [&'static str] {
    match category {
        IncidentCategory::Performance => &[
            "Check resource utilization (CPU, memory, disk)",
            "Review recent configuration changes",
            "Scale resources if saturation persists",
        ],
        IncidentCategory::Connectivity => &[
            "Verify network reachability and DNS resolution between the affected services",
            "Check connection pool limits and firewall rules",
            "Fail over to healthy endpoints if available",
        ],
        IncidentCategory::Application => &[
            "Inspect recent error logs and stack traces of the affected services",
            "Roll back recent releases if errors started after a deploy",
            "Restart crashed components and monitor for recurrence",
        ],
    }
}

fn numbered<S: AsRef<str>>(steps: &[S]) -> String {
    steps
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {}", i + 1, s.as_ref()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn explain_incident(incident: &Incident, matches: &[PatternMatch]) -> Explanation {
    let semantic = &incident.semantic;
    let causal = &incident.causal;
    let category = semantic.incident_category.as_str();
    let best = matches.iter().max_by(|a, b| a.similarity.total_cmp(&b.similarity));

    let root_cause = match causal.potential_root_causes.first() {
        Some(rc) => format!("{category} incident likely originating from {}: {}", rc.source, rc.message),
        None => format!(
            "{category} incident across {} source(s) with {} severity",
            semantic.source_diversity, semantic.max_severity
        ),
    };

    let similarity = best.map(|m| m.similarity).unwrap_or(0.0);
    let confidence = (0.2 + 0.4 * causal.root_cause_confidence + 0.2 * causal.causal_strength + 0.2 * similarity)
        .clamp(0.0, MAX_HEURISTIC_CONFIDENCE);

    let suggested_fix = match best {
        Some(m) if !m.suggested_steps.is_empty() => numbered(&m.suggested_steps),
        _ => numbered(default_steps(semantic.incident_category)),
    };

    let mut reasoning = format!(
        "{} signal(s) over {:.0}s ({:.1}/min{}); max severity {}; sources: {}.",
        incident.temporal.event_count,
        incident.temporal.duration_seconds,
        incident.temporal.temporal_intensity,
        if incident.temporal.is_burst_pattern { ", burst" } else { "" },
        semantic.max_severity,
        semantic.sources.keys().cloned().collect::<Vec<_>>().join(", "),
    );
    if !semantic.common_keywords.is_empty() {
        reasoning.push_str(&format!(" Keywords: {}.", semantic.common_keywords.join(", ")));
    }
    reasoning.push_str(&format!(
        " Causal strength {:.2}, root-cause confidence {:.2}.",
        causal.causal_strength, causal.root_cause_confidence
    ));
    if let Some(m) = best {
        reasoning.push_str(&format!(" Closest historical pattern ({:.2}): {}.", m.similarity, m.text));
    }

    Explanation {
        root_cause,
        confidence,
        suggested_fix,
        reasoning,
    }
}

#[async_trait]
impl Explainer for HeuristicExplainer {
    async fn explain(&self, incident: &Incident, matches: &[PatternMatch]) -> Result<Explanation, GenerationError> {
        Ok(explain_incident(incident, matches))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::testing::{base_time, member};
    use crate::fusion::{fuse, FusionWeights};
    use crate::signal::{Severity, SignalKind};

    fn incident() -> Incident {
        let group = vec![
            member(1, "db-1", SignalKind::Log, Severity::Critical, 0, "connection pool exhausted", 0.9),
            member(2, "web-1", SignalKind::Log, Severity::High, 20, "connection refused", 0.6),
        ];
        fuse("inc", &group, &FusionWeights::default(), base_time()).unwrap()
    }

    #[test]
    fn names_the_strongest_root_cause() {
        let e = explain_incident(&incident(), &[]);
        assert!(e.root_cause.contains("db-1"));
        assert!(e.root_cause.starts_with("connectivity"));
        assert!((0.0..=MAX_HEURISTIC_CONFIDENCE).contains(&e.confidence));
        assert!(e.suggested_fix.starts_with("1. Verify network"));
    }

    #[test]
    fn pattern_steps_become_the_fix_and_raise_confidence() {
        let inc = incident();
        let plain = explain_incident(&inc, &[]);
        let matched = explain_incident(
            &inc,
            &[PatternMatch {
                similarity: 0.8,
                text: "db pool exhaustion".into(),
                suggested_steps: vec!["Raise pool size".into(), "Restart web tier".into()],
            }],
        );
        assert!(matched.confidence > plain.confidence);
        assert_eq!(matched.suggested_fix, "1. Raise pool size\n2. Restart web tier");
        assert!(matched.reasoning.contains("db pool exhaustion"));
    }
}
