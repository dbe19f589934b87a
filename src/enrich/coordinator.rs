//! Drives correlation, anomaly scoring and context derivation over the
//! signals that have no enriched record yet.

use crate::enrich::{context, AnomalyOutcome, AnomalyScorer, Correlator, EnrichedSignal, FrequencyCounts};
use crate::signal::Signal;
use crate::storage::{EnrichedSignalRepository, SignalRepository, StoreError};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct EnrichmentSettings {
    /// Half-width of the correlation window.
    pub window: Duration,
    pub history_limit: usize,
    pub batch_limit: usize,
    /// Ignore signals older than this.
    pub lookback: Option<Duration>,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            window: Duration::minutes(5),
            history_limit: 100,
            batch_limit: 100,
            lookback: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichmentReport {
    pub enriched: usize,
    /// Signals enriched concurrently by another run.
    pub skipped: usize,
    pub insufficient_history: usize,
    pub new_groups: usize,
}

pub struct EnrichmentCoordinator<S> {
    store: Arc<S>,
    correlator: Box<dyn Correlator>,
    scorer: AnomalyScorer,
    settings: EnrichmentSettings,
}

impl<S> EnrichmentCoordinator<S>
where
    S: SignalRepository + EnrichedSignalRepository,
{
    pub fn new(store: Arc<S>, correlator: Box<dyn Correlator>, scorer: AnomalyScorer, settings: EnrichmentSettings) -> Self {
        Self {
            store,
            correlator,
            scorer,
            settings,
        }
    }

    /// Enrich one batch of unprocessed signals, oldest first, and persist it
    /// atomically. Signals enriched earlier in the batch are visible to the
    /// correlation window of later ones.
    pub fn run_batch(&self) -> Result<EnrichmentReport, StoreError> {
        let cursor = self.settings.lookback.map(|d| earlier(Utc::now(), d));
        let pending = self.store.unprocessed_since(cursor, self.settings.batch_limit)?;
        if pending.is_empty() {
            return Ok(EnrichmentReport::default());
        }

        let mut report = EnrichmentReport::default();
        let mut batch: Vec<EnrichedSignal> = Vec::with_capacity(pending.len());
        let mut seen_groups: HashSet<String> = HashSet::new();

        for signal in pending {
            let (enriched, outcome, fresh) = self.enrich_one(signal, &batch)?;
            if let AnomalyOutcome::InsufficientData { needed, have } = outcome {
                debug!(signal_id = enriched.signal.id, needed, have, "insufficient history; neutral anomaly score");
                report.insufficient_history += 1;
            }
            if fresh && seen_groups.insert(enriched.correlation_id.clone()) {
                report.new_groups += 1;
            }
            batch.push(enriched);
        }

        let outcome = self.store.save_enriched(&batch)?;
        report.enriched = outcome.saved.len();
        report.skipped = outcome.skipped.len();
        info!(
            enriched = report.enriched,
            skipped = report.skipped,
            new_groups = report.new_groups,
            "enrichment batch saved"
        );
        Ok(report)
    }

    /// Enrich a single signal. `in_flight` holds enriched signals not yet
    /// persisted. Also reports whether the correlation id was newly minted.
    pub fn enrich_one(&self, signal: Signal, in_flight: &[EnrichedSignal]) -> Result<(EnrichedSignal, AnomalyOutcome, bool), StoreError> {
        let ts = signal.timestamp;
        let (from, to) = (earlier(ts, self.settings.window), later(ts, self.settings.window));

        let stored = self.store.enriched_between(from, to)?;
        let window: Vec<&EnrichedSignal> = stored
            .iter()
            .chain(in_flight.iter().filter(|e| e.signal.timestamp >= from && e.signal.timestamp <= to))
            .collect();
        let correlation_id = self.correlator.assign(&signal, &window);
        let fresh = !window.iter().any(|w| w.correlation_id == correlation_id);

        let history = self
            .store
            .history_for(&signal.source, signal.kind, ts, self.settings.history_limit)?;
        let outcome = self.scorer.score(&signal, &history);

        let frequency = FrequencyCounts {
            last_hour: self.store.count_for(&signal.source, signal.kind, earlier(ts, Duration::hours(1)), ts)?,
            last_day: self.store.count_for(&signal.source, signal.kind, earlier(ts, Duration::days(1)), ts)?,
            last_week: self.store.count_for(&signal.source, signal.kind, earlier(ts, Duration::weeks(1)), ts)?,
        };
        let window_sources: Vec<String> = self
            .store
            .signals_between(from, ts)?
            .into_iter()
            .map(|s| s.source)
            .collect();
        let recent = self.store.signals_between(earlier(ts, Duration::hours(1)), ts)?;
        let context = context::build(&signal, frequency, &window_sources, &recent);

        let enriched = EnrichedSignal {
            signal,
            correlation_id,
            anomaly_score: outcome.score(),
            context,
        };
        Ok((enriched, outcome, fresh))
    }
}

/// `ts - span`, clamped to the earliest representable instant.
fn earlier(ts: DateTime<Utc>, span: Duration) -> DateTime<Utc> {
    ts.checked_sub_signed(span).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// `ts + span`, clamped to the latest representable instant.
fn later(ts: DateTime<Utc>, span: Duration) -> DateTime<Utc> {
    ts.checked_add_signed(span).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
