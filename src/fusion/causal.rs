use crate::enrich::EnrichedSignal;
use crate::fusion::temporal::seconds_between;
use crate::fusion::{
    AnomalyProgression, AnomalyTrend, CausalContext, CausalEdge, RootCauseCandidate, RootCauseReason, SignalRef,
};
use std::collections::HashSet;

/// Adjacent members further apart than this are not linked.
pub const CAUSAL_WINDOW_SECS: f64 = 300.0;
const FIRST_EVENT_MIN_SCORE: f64 = 0.5;
const HIGH_SCORE: f64 = 0.8;
const HIGH_ANOMALY_COUNT_SCORE: f64 = 0.7;
const MAX_ROOT_CAUSES: usize = 3;
const TREND_BOOST: f64 = 0.2;

/// Summarise causal structure of `members` (already in chronological order).
pub fn summarize(members: &[&EnrichedSignal]) -> Option<CausalContext> {
    let anomaly_progression = progression(members)?;
    let causal_chains = chains(members);
    let potential_root_causes = root_causes(members);

    let causal_strength = if causal_chains.is_empty() {
        0.0
    } else {
        let mean = causal_chains.iter().map(|e| e.causal_likelihood).sum::<f64>() / causal_chains.len() as f64;
        let boost = match anomaly_progression.trend {
            AnomalyTrend::Increasing => TREND_BOOST,
            AnomalyTrend::Stable => 0.0,
        };
        (mean + boost).min(1.0)
    };
    let root_cause_confidence = potential_root_causes
        .iter()
        .map(|c| c.confidence)
        .fold(0.0, f64::max);

    Some(CausalContext {
        has_clear_progression: !causal_chains.is_empty(),
        causal_chains,
        anomaly_progression,
        potential_root_causes,
        causal_strength,
        root_cause_confidence,
    })
}

fn signal_ref(m: &EnrichedSignal) -> SignalRef {
    SignalRef {
        signal_id: m.signal.id,
        source: m.signal.source.clone(),
        message: m.signal.message.clone(),
        severity: m.signal.severity,
    }
}

pub fn chains(members: &[&EnrichedSignal]) -> Vec<CausalEdge> {
    members
        .windows(2)
        .filter_map(|pair| {
            let diff = seconds_between(pair[0].signal.timestamp, pair[1].signal.timestamp);
            (diff <= CAUSAL_WINDOW_SECS).then(|| CausalEdge {
                cause: signal_ref(pair[0]),
                effect: signal_ref(pair[1]),
                time_diff_seconds: diff,
                causal_likelihood: (1.0 - diff / CAUSAL_WINDOW_SECS).max(0.0),
            })
        })
        .collect()
}

fn progression(members: &[&EnrichedSignal]) -> Option<AnomalyProgression> {
    let scores: Vec<f64> = members.iter().map(|m| m.anomaly_score).collect();
    let first = *scores.first()?;
    let last = *scores.last()?;

    Some(AnomalyProgression {
        average: scores.iter().sum::<f64>() / scores.len() as f64,
        max: scores.iter().copied().fold(f64::MIN, f64::max),
        min: scores.iter().copied().fold(f64::MAX, f64::min),
        trend: if scores.len() > 1 && last > first {
            AnomalyTrend::Increasing
        } else {
            AnomalyTrend::Stable
        },
        high_anomaly_count: scores.iter().filter(|s| **s > HIGH_ANOMALY_COUNT_SCORE).count(),
    })
}

/// The earliest member if notably anomalous, plus any highly anomalous
/// member; unique by (source, message), most confident first, at most three.
pub fn root_causes(members: &[&EnrichedSignal]) -> Vec<RootCauseCandidate> {
    let candidate = |m: &EnrichedSignal, reason| RootCauseCandidate {
        source: m.signal.source.clone(),
        message: m.signal.message.clone(),
        timestamp: m.signal.timestamp,
        confidence: m.anomaly_score,
        reason,
    };

    let mut raw = Vec::new();
    if let Some(first) = members.first() {
        if first.anomaly_score > FIRST_EVENT_MIN_SCORE {
            raw.push(candidate(first, RootCauseReason::FirstAnomalousEvent));
        }
    }
    for m in members {
        if m.anomaly_score > HIGH_SCORE {
            raw.push(candidate(m, RootCauseReason::HighAnomalyScore));
        }
    }

    let mut seen = HashSet::new();
    let mut unique: Vec<RootCauseCandidate> = raw
        .into_iter()
        .filter(|c| seen.insert((c.source.clone(), c.message.clone())))
        .collect();
    unique.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    unique.truncate(MAX_ROOT_CAUSES);
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::chronological;
    use crate::fusion::testing::member;
    use crate::signal::{Severity, SignalKind};

    #[test]
    fn edges_only_within_five_minutes() {
        let group = vec![
            member(1, "a", SignalKind::Event, Severity::High, 0, "one", 0.2),
            member(2, "b", SignalKind::Event, Severity::High, 60, "two", 0.3),
            member(3, "c", SignalKind::Event, Severity::High, 600, "three", 0.4),
        ];
        let edges = chains(&chronological(&group));
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].cause.signal_id, 1);
        assert_eq!(edges[0].time_diff_seconds, 60.0);
        assert!((edges[0].causal_likelihood - 0.8).abs() < 1e-12);
    }

    #[test]
    fn increasing_trend_boosts_strength() {
        let group = vec![
            member(1, "a", SignalKind::Event, Severity::High, 0, "one", 0.2),
            member(2, "b", SignalKind::Event, Severity::High, 150, "two", 0.4),
        ];
        let ctx = summarize(&chronological(&group)).unwrap();
        assert_eq!(ctx.anomaly_progression.trend, AnomalyTrend::Increasing);
        assert!((ctx.causal_strength - 0.7).abs() < 1e-12);
        assert!(ctx.has_clear_progression);
        assert!(ctx.potential_root_causes.is_empty());
        assert_eq!(ctx.root_cause_confidence, 0.0);
    }

    #[test]
    fn root_causes_deduplicate_and_cap() {
        let group = vec![
            member(1, "db", SignalKind::Log, Severity::Critical, 0, "disk full", 0.9),
            member(2, "db", SignalKind::Log, Severity::Critical, 1, "disk full", 0.95),
            member(3, "api", SignalKind::Log, Severity::High, 2, "5xx spike", 0.85),
            member(4, "lb", SignalKind::Log, Severity::High, 3, "backend down", 0.99),
            member(5, "cdn", SignalKind::Log, Severity::High, 4, "origin errors", 0.81),
        ];
        let causes = root_causes(&chronological(&group));
        assert_eq!(causes.len(), 3);
        assert_eq!(causes[0].source, "lb");
        // first occurrence of (db, disk full) is kept, with its own score
        assert_eq!(causes[1].source, "db");
        assert_eq!(causes[1].confidence, 0.9);
        assert_eq!(causes[1].reason, RootCauseReason::FirstAnomalousEvent);
        assert_eq!(causes[2].source, "api");

        let ctx = summarize(&chronological(&group)).unwrap();
        assert_eq!(ctx.root_cause_confidence, 0.99);
        assert_eq!(ctx.anomaly_progression.high_anomaly_count, 5);
    }

    #[test]
    fn stable_when_last_not_above_first() {
        let group = vec![
            member(1, "a", SignalKind::Event, Severity::High, 0, "one", 0.6),
            member(2, "a", SignalKind::Event, Severity::High, 10, "two", 0.6),
        ];
        let ctx = summarize(&chronological(&group)).unwrap();
        assert_eq!(ctx.anomaly_progression.trend, AnomalyTrend::Stable);
        assert_eq!(ctx.potential_root_causes.len(), 1);
        assert_eq!(ctx.potential_root_causes[0].reason, RootCauseReason::FirstAnomalousEvent);
    }
}
