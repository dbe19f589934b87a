//! Correlation id assignment.
//!
//! Relatedness is checked pairwise against each candidate in scan order and
//! the first related candidate donates its id. It is neither transitive nor
//! checked against the whole window, so the resulting groups depend on the
//! order candidates are scanned in. [`ScanOrder`] makes that order explicit.

use crate::enrich::EnrichedSignal;
use crate::signal::Signal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order in which the candidate window is scanned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOrder {
    /// Oldest parent timestamp first, ties by signal id.
    #[default]
    Chronological,
    /// Ingestion order (signal id).
    Arrival,
}

/// Strategy that maps a new signal onto a correlation group.
pub trait Correlator: Send + Sync {
    /// Return the correlation id for `signal` given the enriched signals whose
    /// timestamps fall inside its window.
    fn assign(&self, signal: &Signal, window: &[&EnrichedSignal]) -> String;
}

/// Returns the id of the first related candidate, or mints a fresh one.
#[derive(Debug, Clone, Default)]
pub struct FirstMatchCorrelator {
    order: ScanOrder,
}

impl FirstMatchCorrelator {
    pub fn new(order: ScanOrder) -> Self {
        Self { order }
    }
}

impl Correlator for FirstMatchCorrelator {
    fn assign(&self, signal: &Signal, window: &[&EnrichedSignal]) -> String {
        let mut candidates: Vec<&EnrichedSignal> = window
            .iter()
            .copied()
            .filter(|c| c.signal.id != signal.id)
            .collect();

        match self.order {
            ScanOrder::Chronological => candidates.sort_by(|a, b| {
                a.signal
                    .timestamp
                    .cmp(&b.signal.timestamp)
                    .then(a.signal.id.cmp(&b.signal.id))
            }),
            ScanOrder::Arrival => candidates.sort_by_key(|c| c.signal.id),
        }

        candidates
            .into_iter()
            .find(|c| related(signal, &c.signal))
            .map(|c| c.correlation_id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }
}

/// Two signals are related when they share a source, fall in the same
/// severity band, or share at least two metadata keys.
pub fn related(a: &Signal, b: &Signal) -> bool {
    if a.source == b.source {
        return true;
    }
    if a.severity.band() == b.severity.band() {
        return true;
    }
    let shared = a.metadata.keys().filter(|k| b.metadata.contains_key(*k)).count();
    shared >= 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::ContextData;
    use crate::signal::{Metadata, Severity, SignalKind};
    use chrono::{Duration, TimeZone, Utc};

    fn signal(id: i64, source: &str, severity: Severity, minute: i64) -> Signal {
        Signal {
            id,
            kind: SignalKind::Event,
            source: source.to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap() + Duration::minutes(minute),
            severity,
            message: String::new(),
            metadata: Metadata::new(),
            payload: serde_json::Value::Null,
        }
    }

    fn enriched(signal: Signal, correlation_id: &str) -> EnrichedSignal {
        EnrichedSignal {
            signal,
            correlation_id: correlation_id.to_string(),
            anomaly_score: 0.5,
            context: ContextData::default(),
        }
    }

    #[test]
    fn critical_and_high_share_a_group() {
        let prior = enriched(signal(1, "web-1", Severity::Critical, 0), "group-a");
        let next = signal(2, "web-1", Severity::High, 3);
        let correlator = FirstMatchCorrelator::default();
        assert_eq!(correlator.assign(&next, &[&prior]), "group-a");
    }

    #[test]
    fn severity_band_alone_relates_different_sources() {
        let a = signal(1, "db-1", Severity::Critical, 0);
        let b = signal(2, "web-1", Severity::High, 0);
        let c = signal(3, "cache", Severity::Low, 0);
        assert!(related(&a, &b));
        assert!(!related(&a, &c));
    }

    #[test]
    fn metadata_overlap_needs_two_keys() {
        let mut a = signal(1, "db-1", Severity::Critical, 0);
        let mut b = signal(2, "web-1", Severity::Info, 0);
        a.metadata.insert("region".into(), "eu".into());
        b.metadata.insert("region".into(), "us".into());
        assert!(!related(&a, &b));
        a.metadata.insert("cluster".into(), "c1".into());
        b.metadata.insert("cluster".into(), "c2".into());
        assert!(related(&a, &b));
    }

    #[test]
    fn unrelated_window_mints_fresh_id() {
        let prior = enriched(signal(1, "db-1", Severity::Info, 0), "group-a");
        let next = signal(2, "web-1", Severity::Critical, 1);
        let id = FirstMatchCorrelator::default().assign(&next, &[&prior]);
        assert_ne!(id, "group-a");
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn scan_order_decides_between_groups() {
        // Signal 5 is older but arrived later.
        let late_arrival = enriched(signal(5, "web-1", Severity::High, 0), "older");
        let early_arrival = enriched(signal(4, "web-1", Severity::High, 2), "newer");
        let next = signal(6, "web-1", Severity::High, 3);
        let window = [&early_arrival, &late_arrival];

        let chrono = FirstMatchCorrelator::new(ScanOrder::Chronological);
        assert_eq!(chrono.assign(&next, &window), "older");
        let arrival = FirstMatchCorrelator::new(ScanOrder::Arrival);
        assert_eq!(arrival.assign(&next, &window), "newer");
    }

    #[test]
    fn skips_itself() {
        let me = enriched(signal(1, "web-1", Severity::High, 0), "self");
        let id = FirstMatchCorrelator::default().assign(&me.signal, &[&me]);
        assert_ne!(id, "self");
    }
}
