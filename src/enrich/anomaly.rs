use crate::signal::Signal;
use crate::text;
use serde::Serialize;

/// Score returned when the history is too short to judge.
pub const NEUTRAL_SCORE: f64 = 0.5;

/// Result of scoring one signal against its history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum AnomalyOutcome {
    Scored(f64),
    InsufficientData { needed: usize, have: usize },
}

impl AnomalyOutcome {
    /// The stored score: the computed value, or the neutral default.
    pub fn score(&self) -> f64 {
        match self {
            AnomalyOutcome::Scored(s) => *s,
            AnomalyOutcome::InsufficientData { .. } => NEUTRAL_SCORE,
        }
    }
}

/// Frequency-inverse anomaly heuristic: messages that rarely appeared in
/// the source's recent history score higher.
#[derive(Debug, Clone)]
pub struct AnomalyScorer {
    min_history: usize,
    similarity_threshold: f64,
}

impl Default for AnomalyScorer {
    fn default() -> Self {
        Self {
            min_history: 10,
            similarity_threshold: 0.7,
        }
    }
}

impl AnomalyScorer {
    pub fn new(min_history: usize, similarity_threshold: f64) -> Self {
        Self {
            min_history,
            similarity_threshold,
        }
    }

    /// Score `signal` against `history` (prior signals of the same source
    /// and kind, newest first).
    pub fn score(&self, signal: &Signal, history: &[Signal]) -> AnomalyOutcome {
        if history.len() < self.min_history {
            return AnomalyOutcome::InsufficientData {
                needed: self.min_history,
                have: history.len(),
            };
        }

        let current = text::word_set(&signal.message);
        let similar = history
            .iter()
            .filter(|h| text::jaccard_sets(&current, &text::word_set(&h.message)) > self.similarity_threshold)
            .count();

        let frequency = similar as f64 / history.len() as f64;
        AnomalyOutcome::Scored((1.0 - frequency * 2.0).clamp(0.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{Metadata, Severity, SignalKind};
    use chrono::{Duration, TimeZone, Utc};

    fn sig(id: i64, message: &str) -> Signal {
        Signal {
            id,
            kind: SignalKind::Log,
            source: "api".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + Duration::seconds(id),
            severity: Severity::Medium,
            message: message.to_string(),
            metadata: Metadata::new(),
            payload: serde_json::Value::Null,
        }
    }

    #[test]
    fn short_history_is_neutral() {
        let history: Vec<Signal> = (0..5).map(|i| sig(i, "request served")).collect();
        let outcome = AnomalyScorer::default().score(&sig(99, "request served"), &history);
        assert_eq!(outcome, AnomalyOutcome::InsufficientData { needed: 10, have: 5 });
        assert_eq!(outcome.score(), 0.5);
    }

    #[test]
    fn common_message_scores_zero() {
        let history: Vec<Signal> = (0..20).map(|i| sig(i, "request served")).collect();
        let outcome = AnomalyScorer::default().score(&sig(99, "Request served."), &history);
        assert_eq!(outcome, AnomalyOutcome::Scored(0.0));
    }

    #[test]
    fn novel_message_scores_one() {
        let history: Vec<Signal> = (0..20).map(|i| sig(i, "request served")).collect();
        let outcome = AnomalyScorer::default().score(&sig(99, "kernel panic on node7"), &history);
        assert_eq!(outcome.score(), 1.0);
    }

    #[test]
    fn partial_frequency_is_linear() {
        // 2 of 10 similar -> frequency 0.2 -> 1 - 0.4
        let mut history: Vec<Signal> = (0..8).map(|i| sig(i, "cache warmed")).collect();
        history.push(sig(8, "disk latency high"));
        history.push(sig(9, "disk latency high"));
        let outcome = AnomalyScorer::default().score(&sig(99, "disk latency high"), &history);
        let score = outcome.score();
        assert!((score - 0.6).abs() < 1e-12, "got {}", score);
        assert!((0.0..=1.0).contains(&score));
    }
}
