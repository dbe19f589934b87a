//! Historical incident patterns and the built-in matcher over them.

use crate::analysis::{GenerationError, PatternMatch, PatternMatcher};
use crate::fusion::Incident;
use crate::storage::PatternRepository;
use crate::text;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalPattern {
    pub id: i64,
    pub description: String,
    pub resolution_steps: Vec<String>,
    pub success_rate: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPattern {
    pub description: String,
    #[serde(default)]
    pub resolution_steps: Vec<String>,
    #[serde(default)]
    pub success_rate: Option<f64>,
}

/// Text describing an incident for similarity search: category, severity,
/// keywords, sources and root-cause candidate messages.
pub fn incident_signature(incident: &Incident) -> String {
    let mut parts = vec![
        incident.semantic.incident_category.as_str().to_string(),
        incident.semantic.max_severity.as_str().to_string(),
    ];
    parts.extend(incident.semantic.common_keywords.iter().cloned());
    parts.extend(incident.semantic.sources.keys().cloned());
    parts.extend(incident.causal.potential_root_causes.iter().map(|c| c.message.clone()));
    parts.join(" ")
}

/// Ranks stored patterns by token Jaccard similarity between the incident
/// signature and each pattern description.
pub struct StoredPatternMatcher<S> {
    store: Arc<S>,
}

impl<S> StoredPatternMatcher<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

pub fn rank(signature: &str, patterns: Vec<HistoricalPattern>, k: usize) -> Vec<PatternMatch> {
    let sig = text::word_set(signature);
    let mut matches: Vec<PatternMatch> = patterns
        .into_iter()
        .filter_map(|p| {
            let similarity = text::jaccard_sets(&sig, &text::word_set(&p.description));
            (similarity > 0.0).then(|| PatternMatch {
                similarity,
                text: p.description,
                suggested_steps: p.resolution_steps,
            })
        })
        .collect();
    matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    matches.truncate(k);
    matches
}

#[async_trait]
impl<S> PatternMatcher for StoredPatternMatcher<S>
where
    S: PatternRepository + 'static,
{
    async fn top_k(&self, incident: &Incident, k: usize) -> Result<Vec<PatternMatch>, GenerationError> {
        let store = self.store.clone();
        let patterns = tokio::task::spawn_blocking(move || store.patterns())
            .await
            .map_err(|e| GenerationError::Patterns(e.to_string()))?
            .map_err(|e| GenerationError::Patterns(e.to_string()))?;
        Ok(rank(&incident_signature(incident), patterns, k))
    }
}
