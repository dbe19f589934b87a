//! Fusion stage: turns unfused correlation groups into incidents.

use crate::fusion::{fuse, FusionWeights, Incident};
use crate::storage::{EnrichedSignalRepository, IncidentRepository, StoreError};
use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FusionReport {
    pub fused: usize,
    /// Groups that already had an incident.
    pub skipped: usize,
}

pub struct FusionEngine<S> {
    store: Arc<S>,
    weights: FusionWeights,
    batch_limit: usize,
    lookback: Option<Duration>,
}

impl<S> FusionEngine<S>
where
    S: EnrichedSignalRepository + IncidentRepository,
{
    pub fn new(store: Arc<S>, weights: FusionWeights, batch_limit: usize, lookback: Option<Duration>) -> Self {
        Self {
            store,
            weights,
            batch_limit,
            lookback,
        }
    }

    pub fn weights(&self) -> &FusionWeights {
        &self.weights
    }

    /// Fuse up to `batch_limit` unfused groups and save the incidents in one
    /// transaction. Groups whose id already has an incident are left alone.
    pub fn run_batch(&self) -> Result<FusionReport, StoreError> {
        let since = self.lookback.map(|d| Utc::now() - d);
        let groups = self.store.unfused_grouped_by_correlation(since, self.batch_limit)?;
        if groups.is_empty() {
            return Ok(FusionReport::default());
        }

        let now = Utc::now();
        let mut report = FusionReport::default();
        let mut incidents: Vec<Incident> = Vec::with_capacity(groups.len());
        for (correlation_id, members) in &groups {
            if self.store.exists_by_id(correlation_id)? {
                debug!(%correlation_id, "incident already exists; skipping group");
                report.skipped += 1;
                continue;
            }
            match fuse(correlation_id, members, &self.weights, now) {
                Some(incident) => incidents.push(incident),
                None => warn!(%correlation_id, "empty correlation group"),
            }
        }

        let outcome = self.store.save_incidents(&incidents)?;
        for id in &outcome.skipped {
            warn!(incident_id = %id, "duplicate incident id; record skipped");
        }
        report.fused = outcome.saved.len();
        report.skipped += outcome.skipped.len();
        info!(fused = report.fused, skipped = report.skipped, "fusion batch saved");
        Ok(report)
    }
}
