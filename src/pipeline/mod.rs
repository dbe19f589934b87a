//! One processing cycle: Enrichment, then Fusion, then Analysis.
//!
//! Each stage reads only records without output of its own, so a cycle can
//! be repeated after a partial failure without producing duplicates.

pub mod driver;

use crate::analysis::explain::HeuristicExplainer;
use crate::analysis::investigate::HttpInvestigator;
use crate::analysis::patterns::StoredPatternMatcher;
use crate::analysis::router::{AnalysisReport, DeepReport};
use crate::analysis::{AnalysisRouter, Investigator};
use crate::config::Config;
use crate::enrich::coordinator::EnrichmentReport;
use crate::enrich::{EnrichmentCoordinator, FirstMatchCorrelator};
use crate::error::{Error, Result};
use crate::fusion::engine::FusionReport;
use crate::fusion::FusionEngine;
use crate::metrics::PipelineMetrics;
use crate::signal::{NewSignal, Signal};
use crate::storage::{Store, StoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{error, info};

/// Outcome of one cycle. A stage that failed keeps its default counts and is
/// listed in `failed_stages`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub enrichment: EnrichmentReport,
    pub fusion: FusionReport,
    pub analysis: AnalysisReport,
    pub deep: DeepReport,
    pub failed_stages: Vec<String>,
    pub elapsed_ms: u64,
}

impl CycleReport {
    pub fn is_clean(&self) -> bool {
        self.failed_stages.is_empty()
    }
}

/// A pipeline stage that can be run on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Enrichment,
    Fusion,
    /// First analysis pass followed by deep analysis of pending incidents.
    Analysis,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Enrichment, Stage::Fusion, Stage::Analysis];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Enrichment => "enrichment",
            Stage::Fusion => "fusion",
            Stage::Analysis => "analysis",
        }
    }
}

pub struct Pipeline<S> {
    store: Arc<S>,
    enrichment: Arc<EnrichmentCoordinator<S>>,
    fusion: Arc<FusionEngine<S>>,
    router: AnalysisRouter<S>,
    analysis_batch: usize,
    metrics: Arc<PipelineMetrics>,
    cycle: Mutex<()>,
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> std::result::Result<T, StoreError> + Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await??)
}

impl<S: Store + 'static> Pipeline<S> {
    pub fn new(
        store: Arc<S>,
        enrichment: EnrichmentCoordinator<S>,
        fusion: FusionEngine<S>,
        router: AnalysisRouter<S>,
        analysis_batch: usize,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            store,
            enrichment: Arc::new(enrichment),
            fusion: Arc::new(fusion),
            router,
            analysis_batch,
            metrics,
            cycle: Mutex::new(()),
        }
    }

    /// Wire the built-in collaborators from configuration: the heuristic
    /// explainer, the stored-pattern matcher and one HTTP investigator per
    /// configured endpoint.
    pub fn from_config(store: Arc<S>, config: &Config, metrics: Arc<PipelineMetrics>) -> Result<Self> {
        let enrichment = EnrichmentCoordinator::new(
            store.clone(),
            Box::new(FirstMatchCorrelator::new(config.correlation.scan_order)),
            config.anomaly_scorer(),
            config.enrichment_settings(),
        );
        let fusion = FusionEngine::new(
            store.clone(),
            config.fusion.weights(),
            config.pipeline.fusion_batch,
            config.fusion_lookback(),
        );

        let mut investigators: Vec<Arc<dyn Investigator>> = Vec::new();
        for inv in &config.analysis.investigators {
            investigators.push(Arc::new(HttpInvestigator::new(&inv.name, &inv.url, config.analysis.call_timeout())?));
        }
        let router = AnalysisRouter::new(
            store.clone(),
            Arc::new(HeuristicExplainer),
            Arc::new(StoredPatternMatcher::new(store.clone())),
            investigators,
            config.router_settings(),
        );

        Ok(Self::new(store, enrichment, fusion, router, config.pipeline.analysis_batch, metrics))
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn router(&self) -> &AnalysisRouter<S> {
        &self.router
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Store incoming signals. Signals without a source are rejected before
    /// anything is written.
    pub async fn ingest(&self, signals: Vec<NewSignal>) -> Result<Vec<Signal>> {
        if let Some(pos) = signals.iter().position(|s| s.source.trim().is_empty()) {
            return Err(Error::InvalidInput(format!("signal {pos} has an empty source")));
        }
        if let Some(pos) = signals.iter().position(|s| !s.has_usable_timestamp()) {
            return Err(Error::InvalidInput(format!(
                "signal {pos} has an out-of-range timestamp {}",
                signals[pos].timestamp
            )));
        }
        let store = self.store.clone();
        let stored = run_blocking(move || {
            signals
                .iter()
                .map(|s| store.insert_signal(s))
                .collect::<std::result::Result<Vec<_>, _>>()
        })
        .await?;
        info!(count = stored.len(), "signals ingested");
        Ok(stored)
    }

    /// Run every stage once. Only one cycle runs at a time; a caller that
    /// arrives mid-cycle waits for it to finish and then runs its own.
    pub async fn run_cycle(&self) -> CycleReport {
        let _guard = self.cycle.lock().await;
        let started = Instant::now();
        let mut report = CycleReport::default();
        for stage in Stage::ALL {
            self.execute(stage, &mut report).await;
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            enriched = report.enrichment.enriched,
            fused = report.fusion.fused,
            analyzed = report.analysis.total(),
            pending_deep = report.analysis.pending_deep,
            deep_analyzed = report.deep.deep_analyzed,
            failed_stages = report.failed_stages.len(),
            elapsed_ms = report.elapsed_ms,
            "pipeline cycle complete"
        );
        self.metrics.record_cycle(&report);
        report
    }

    /// Run a single stage under the cycle lock. Counts of the other stages
    /// stay at their defaults.
    pub async fn run_stage(&self, stage: Stage) -> CycleReport {
        let _guard = self.cycle.lock().await;
        let started = Instant::now();
        let mut report = CycleReport::default();
        self.execute(stage, &mut report).await;

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            stage = stage.as_str(),
            failed = !report.is_clean(),
            elapsed_ms = report.elapsed_ms,
            "pipeline stage run"
        );
        self.metrics.record_stages(&report);
        report
    }

    async fn execute(&self, stage: Stage, report: &mut CycleReport) {
        match stage {
            Stage::Enrichment => {
                let enrichment = self.enrichment.clone();
                match run_blocking(move || enrichment.run_batch()).await {
                    Ok(r) => report.enrichment = r,
                    Err(e) => stage_failed(report, "enrichment", &e),
                }
            }
            Stage::Fusion => {
                let fusion = self.fusion.clone();
                match run_blocking(move || fusion.run_batch()).await {
                    Ok(r) => report.fusion = r,
                    Err(e) => stage_failed(report, "fusion", &e),
                }
            }
            Stage::Analysis => {
                match self.router.analyze_pending(self.analysis_batch).await {
                    Ok(r) => report.analysis = r,
                    Err(e) => stage_failed(report, "analysis", &e),
                }
                match self.router.deepen_pending(self.analysis_batch).await {
                    Ok(r) => report.deep = r,
                    Err(e) => stage_failed(report, "deep_analysis", &e),
                }
            }
        }
    }

    pub async fn reanalyze(&self, incident_id: &str) -> Result<bool> {
        self.router.reanalyze(incident_id).await
    }
}

fn stage_failed(report: &mut CycleReport, stage: &str, e: &Error) {
    error!(stage, code = e.code(), error = %e, "pipeline stage failed; inputs stay pending");
    report.failed_stages.push(stage.to_string());
}
