//! The analysis state machine.
//!
//! ```text
//! unanalyzed --explain--> analyzed                 (confidence >= threshold)
//!            --explain--> pending_deep             (below threshold, deep analysis on)
//!            --explain--> analyzed_low_confidence  (below threshold, deep analysis off)
//! pending_deep --investigate--> deep_analyzed
//! ```
//!
//! Every transition for an incident runs under that incident's lock, and the
//! storage layer backs this up with a claim insert and a conditional update.

use crate::analysis::evidence::{self, EvidenceWeights};
use crate::analysis::{
    AnalysisResult, AnalysisState, ExplainOutcome, Explainer, Finding, GenerationError, IncidentLocks,
    InvestigationRecord, Investigator, PatternMatch, PatternMatcher, DEEP_ANALYSIS_PLACEHOLDER_FIX,
};
use crate::error::{Error, Result};
use crate::fusion::Incident;
use crate::storage::{Store, StoreError};
use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct RouterSettings {
    /// 0-100 scale.
    pub confidence_threshold: f64,
    pub deep_analysis_enabled: bool,
    pub top_k: usize,
    pub call_timeout: Duration,
    pub evidence: EvidenceWeights,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 80.0,
            deep_analysis_enabled: true,
            top_k: 3,
            call_timeout: Duration::from_secs(30),
            evidence: EvidenceWeights::default(),
        }
    }
}

/// Counts from one pass over unanalysed incidents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnalysisReport {
    pub analyzed: usize,
    pub pending_deep: usize,
    pub low_confidence: usize,
    pub generation_failures: usize,
    /// Already claimed by a concurrent run.
    pub skipped: usize,
    pub failed: usize,
}

impl AnalysisReport {
    pub fn total(&self) -> usize {
        self.analyzed + self.pending_deep + self.low_confidence
    }
}

/// Counts from one pass over pending deep analyses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeepReport {
    pub deep_analyzed: usize,
    pub synthesis_fallbacks: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct AnalysisRouter<S> {
    store: Arc<S>,
    explainer: Arc<dyn Explainer>,
    matcher: Arc<dyn PatternMatcher>,
    investigators: Vec<Arc<dyn Investigator>>,
    locks: IncidentLocks,
    settings: RouterSettings,
}

impl<S: Store + 'static> AnalysisRouter<S> {
    pub fn new(
        store: Arc<S>,
        explainer: Arc<dyn Explainer>,
        matcher: Arc<dyn PatternMatcher>,
        investigators: Vec<Arc<dyn Investigator>>,
        settings: RouterSettings,
    ) -> Self {
        Self {
            store,
            explainer,
            matcher,
            investigators,
            locks: IncidentLocks::new(),
            settings,
        }
    }

    pub fn locks(&self) -> &IncidentLocks {
        &self.locks
    }

    pub fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&S) -> std::result::Result<T, StoreError> + Send + 'static,
    {
        let store = self.store.clone();
        Ok(tokio::task::spawn_blocking(move || f(&store)).await??)
    }

    /// Target state for a fresh explanation with this confidence.
    pub fn gate(&self, confidence: f64) -> AnalysisState {
        if confidence >= self.settings.confidence_threshold / 100.0 {
            AnalysisState::Analyzed
        } else if self.settings.deep_analysis_enabled {
            AnalysisState::PendingDeep
        } else {
            AnalysisState::AnalyzedLowConfidence
        }
    }

    /// Explain up to `limit` incidents that have no analysis result yet.
    /// One incident failing does not stop the rest.
    pub async fn analyze_pending(&self, limit: usize) -> Result<AnalysisReport> {
        let incidents = self.blocking(move |s| s.unanalyzed(limit)).await?;
        let mut report = AnalysisReport::default();

        for incident in &incidents {
            match self.analyze_incident(incident).await {
                Ok(Some((state, generated))) => {
                    if !generated {
                        report.generation_failures += 1;
                    }
                    match state {
                        AnalysisState::Analyzed => report.analyzed += 1,
                        AnalysisState::PendingDeep => report.pending_deep += 1,
                        _ => report.low_confidence += 1,
                    }
                }
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    warn!(incident_id = %incident.incident_id, error = %e, "analysis failed; retrying next cycle");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn pattern_matches(&self, incident: &Incident) -> Vec<PatternMatch> {
        let call = self.matcher.top_k(incident, self.settings.top_k);
        match tokio::time::timeout(self.settings.call_timeout, call).await {
            Ok(Ok(matches)) => matches,
            Ok(Err(e)) => {
                warn!(incident_id = %incident.incident_id, error = %e, "pattern lookup failed; continuing without matches");
                Vec::new()
            }
            Err(_) => {
                warn!(incident_id = %incident.incident_id, "pattern lookup timed out; continuing without matches");
                Vec::new()
            }
        }
    }

    async fn explain(&self, incident: &Incident, matches: &[PatternMatch]) -> ExplainOutcome {
        let call = self.explainer.explain(incident, matches);
        let result = match tokio::time::timeout(self.settings.call_timeout, call).await {
            Ok(r) => r,
            Err(_) => Err(GenerationError::Timeout(self.settings.call_timeout)),
        };
        ExplainOutcome::from_result(result)
    }

    /// Run the first transition for one incident. Returns the new state and
    /// whether the Explainer succeeded, or `None` if the incident already had
    /// a result.
    pub async fn analyze_incident(&self, incident: &Incident) -> Result<Option<(AnalysisState, bool)>> {
        let _guard = self.locks.lock(&incident.incident_id).await;

        let id = incident.incident_id.clone();
        if self.blocking(move |s| s.by_incident_id(&id)).await?.is_some() {
            return Ok(None);
        }

        let matches = self.pattern_matches(incident).await;
        let outcome = self.explain(incident, &matches).await;
        let generated = matches!(outcome, ExplainOutcome::Explained(_));
        if let ExplainOutcome::GenerationFailed(reason) = &outcome {
            warn!(incident_id = %incident.incident_id, %reason, "explainer failed; recording placeholder");
        }
        let explanation = outcome.into_explanation();

        let state = self.gate(explanation.confidence);
        let suggested_fix = if state == AnalysisState::PendingDeep {
            DEEP_ANALYSIS_PLACEHOLDER_FIX.to_string()
        } else {
            explanation.suggested_fix
        };

        let now = Utc::now();
        let result = AnalysisResult {
            incident_id: incident.incident_id.clone(),
            root_cause: explanation.root_cause,
            confidence_score: explanation.confidence,
            suggested_fix,
            state,
            reasoning: explanation.reasoning,
            pattern_matches: matches,
            created_at: now,
            updated_at: now,
        };
        let confidence = result.confidence_score;

        match self.blocking(move |s| s.insert_result(&result)).await {
            Ok(()) => {}
            Err(Error::DataIntegrity(StoreError::Duplicate { .. })) => return Ok(None),
            Err(e) => return Err(e),
        }

        info!(incident_id = %incident.incident_id, confidence, state = %state, "incident analyzed");
        Ok(Some((state, generated)))
    }

    /// Deep-analyse up to `limit` pending incidents.
    pub async fn deepen_pending(&self, limit: usize) -> Result<DeepReport> {
        let pending = self.blocking(move |s| s.in_state(AnalysisState::PendingDeep, limit)).await?;
        let mut report = DeepReport::default();

        for result in &pending {
            match self.deepen_incident(&result.incident_id).await {
                Ok(Some(fell_back)) => {
                    report.deep_analyzed += 1;
                    if fell_back {
                        report.synthesis_fallbacks += 1;
                    }
                }
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    warn!(incident_id = %result.incident_id, error = %e, "deep analysis failed; retrying next cycle");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Consult every investigator concurrently. Returns the names of tools
    /// that reported something and the merged findings.
    async fn investigate(&self, incident_id: &str) -> (Vec<String>, Vec<Finding>) {
        let timeout = self.settings.call_timeout;
        let calls = self.investigators.iter().map(|inv| async move {
            let outcome = match tokio::time::timeout(timeout, inv.investigate(incident_id)).await {
                Ok(r) => r,
                Err(_) => Err(GenerationError::Timeout(timeout)),
            };
            (inv.name().to_string(), outcome)
        });

        let mut tools = Vec::new();
        let mut findings = Vec::new();
        for (name, outcome) in join_all(calls).await {
            match outcome {
                Ok(Some(found)) => {
                    debug!(%incident_id, tool = %name, count = found.len(), "investigator reported");
                    tools.push(name);
                    findings.extend(found);
                }
                Ok(None) => debug!(%incident_id, tool = %name, "investigator had nothing"),
                Err(e) => warn!(%incident_id, tool = %name, error = %e, "investigator failed"),
            }
        }
        (tools, findings)
    }

    /// Move one `PendingDeep` incident to `DeepAnalyzed`. Returns whether the
    /// synthesis fallback was used, or `None` if it was no longer pending.
    pub async fn deepen_incident(&self, incident_id: &str) -> Result<Option<bool>> {
        let _guard = self.locks.lock(incident_id).await;

        let id = incident_id.to_string();
        let original = match self.blocking(move |s| s.by_incident_id(&id)).await? {
            Some(r) if r.state == AnalysisState::PendingDeep => r,
            _ => return Ok(None),
        };

        let started = Instant::now();
        let (tools_used, findings) = self.investigate(incident_id).await;

        // Settings reach the router without passing config validation, so a
        // bad evidence weight is possible here.
        let (synthesis, fell_back) = match evidence::synthesize(&original, &findings, &self.settings.evidence) {
            Ok(s) => (s, false),
            Err(e) => {
                warn!(%incident_id, error = %e, "synthesis failed; using fallback");
                (evidence::fallback(&original, &e), true)
            }
        };

        let now = Utc::now();
        let record = InvestigationRecord {
            incident_id: incident_id.to_string(),
            tools_used,
            findings,
            confidence_before: original.confidence_score,
            confidence_after: synthesis.confidence,
            duration_seconds: started.elapsed().as_secs_f64(),
            created_at: now,
        };
        let updated = AnalysisResult {
            root_cause: synthesis.root_cause,
            confidence_score: synthesis.confidence,
            suggested_fix: synthesis.suggested_fix,
            state: AnalysisState::DeepAnalyzed,
            reasoning: synthesis.reasoning,
            updated_at: now,
            ..original
        };

        let delta = record.confidence_delta();
        let tools = record.tools_used.len();
        let completed = self
            .blocking(move |s| s.complete_deep_analysis(&updated, &record))
            .await?;
        if !completed {
            return Ok(None);
        }

        info!(%incident_id, confidence_delta = delta, tools, "deep analysis complete");
        Ok(Some(fell_back))
    }

    /// Discard the analysis result of `incident_id` so the next cycle starts
    /// it again from `Unanalyzed`. Returns whether a result existed.
    pub async fn reanalyze(&self, incident_id: &str) -> Result<bool> {
        let _guard = self.locks.lock(incident_id).await;

        let id = incident_id.to_string();
        if !self.blocking(move |s| s.exists_by_id(&id)).await? {
            return Err(Error::not_found("incident", incident_id));
        }
        let id = incident_id.to_string();
        let deleted = self.blocking(move |s| s.delete_for_incident(&id)).await?;
        info!(%incident_id, deleted, "reanalysis requested");
        Ok(deleted)
    }
}
