//! Pipeline counters.
//!
//! Created once at process start and handed to the pipeline and API through
//! an `Arc`; there is no global instance.

use crate::pipeline::CycleReport;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub struct PipelineMetrics {
    started_at: DateTime<Utc>,
    cycles: AtomicU64,
    enriched: AtomicU64,
    fused: AtomicU64,
    analyzed: AtomicU64,
    deep_analyzed: AtomicU64,
    generation_failures: AtomicU64,
    stage_failures: AtomicU64,
    last_cycle: Mutex<Option<CycleReport>>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            cycles: AtomicU64::new(0),
            enriched: AtomicU64::new(0),
            fused: AtomicU64::new(0),
            analyzed: AtomicU64::new(0),
            deep_analyzed: AtomicU64::new(0),
            generation_failures: AtomicU64::new(0),
            stage_failures: AtomicU64::new(0),
            last_cycle: Mutex::new(None),
        }
    }

    pub fn record_cycle(&self, report: &CycleReport) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.record_stages(report);

        let mut last = self.last_cycle.lock().unwrap_or_else(|e| e.into_inner());
        *last = Some(report.clone());
    }

    /// Add a report's counts without counting it as a full cycle.
    pub fn record_stages(&self, report: &CycleReport) {
        self.enriched.fetch_add(report.enrichment.enriched as u64, Ordering::Relaxed);
        self.fused.fetch_add(report.fusion.fused as u64, Ordering::Relaxed);
        self.analyzed.fetch_add(report.analysis.total() as u64, Ordering::Relaxed);
        self.deep_analyzed.fetch_add(report.deep.deep_analyzed as u64, Ordering::Relaxed);
        self.generation_failures
            .fetch_add(report.analysis.generation_failures as u64, Ordering::Relaxed);
        self.stage_failures.fetch_add(report.failed_stages.len() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = Utc::now();
        MetricsSnapshot {
            started_at: self.started_at,
            uptime_seconds: (now - self.started_at).num_seconds().max(0) as u64,
            cycles: self.cycles.load(Ordering::Relaxed),
            enriched: self.enriched.load(Ordering::Relaxed),
            fused: self.fused.load(Ordering::Relaxed),
            analyzed: self.analyzed.load(Ordering::Relaxed),
            deep_analyzed: self.deep_analyzed.load(Ordering::Relaxed),
            generation_failures: self.generation_failures.load(Ordering::Relaxed),
            stage_failures: self.stage_failures.load(Ordering::Relaxed),
            last_cycle: self.last_cycle.lock().unwrap_or_else(|e| e.into_inner()).clone(),
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub cycles: u64,
    pub enriched: u64,
    pub fused: u64,
    pub analyzed: u64,
    pub deep_analyzed: u64,
    pub generation_failures: u64,
    pub stage_failures: u64,
    pub last_cycle: Option<CycleReport>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycles_accumulate() {
        let metrics = PipelineMetrics::new();
        let mut report = CycleReport::default();
        report.enrichment.enriched = 4;
        report.fusion.fused = 1;
        report.analysis.pending_deep = 1;
        report.deep.deep_analyzed = 1;
        report.failed_stages.push("analysis".into());

        metrics.record_cycle(&report);
        metrics.record_cycle(&report);

        let snap = metrics.snapshot();
        assert_eq!(snap.cycles, 2);
        assert_eq!(snap.enriched, 8);
        assert_eq!(snap.analyzed, 2);
        assert_eq!(snap.deep_analyzed, 2);
        assert_eq!(snap.stage_failures, 2);
        assert_eq!(snap.last_cycle.map(|c| c.enrichment.enriched), Some(4));
    }

    #[test]
    fn single_stage_runs_are_not_cycles() {
        let metrics = PipelineMetrics::new();
        let mut report = CycleReport::default();
        report.fusion.fused = 3;
        metrics.record_stages(&report);

        let snap = metrics.snapshot();
        assert_eq!(snap.cycles, 0);
        assert_eq!(snap.fused, 3);
        assert!(snap.last_cycle.is_none());
    }
}
