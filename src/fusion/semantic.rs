use crate::enrich::EnrichedSignal;
use crate::fusion::{IncidentCategory, SemanticContext};
use crate::text;
use std::collections::BTreeMap;

const PERFORMANCE_TERMS: &[&str] = &["timeout", "slow", "latency", "response", "cpu", "memory", "disk"];
const CONNECTIVITY_TERMS: &[&str] = &["connection", "network", "dns", "unreachable", "refused"];
const APPLICATION_TERMS: &[&str] = &["error", "exception", "failed", "crash", "restart"];

const KEYWORD_MIN_MESSAGES: usize = 2;
const KEYWORD_LIMIT: usize = 10;

pub fn summarize(members: &[&EnrichedSignal]) -> Option<SemanticContext> {
    let max_severity = members.iter().map(|m| m.signal.severity).max()?;

    let mut event_types = BTreeMap::new();
    let mut sources = BTreeMap::new();
    let mut severities = BTreeMap::new();
    for m in members {
        *event_types.entry(m.signal.kind).or_insert(0) += 1;
        *sources.entry(m.signal.source.clone()).or_insert(0) += 1;
        *severities.entry(m.signal.severity).or_insert(0) += 1;
    }

    let common_keywords = text::common_keywords(
        members.iter().map(|m| m.signal.message.as_str()),
        KEYWORD_MIN_MESSAGES,
        KEYWORD_LIMIT,
    );
    let incident_category = categorize(&common_keywords);

    Some(SemanticContext {
        type_diversity: event_types.len(),
        source_diversity: sources.len(),
        is_multi_service: sources.len() > 1,
        event_types,
        sources,
        severities,
        common_keywords,
        incident_category,
        max_severity,
    })
}

/// Score keywords against each vocabulary by substring match. Performance
/// wins ties, then connectivity.
pub fn categorize(keywords: &[String]) -> IncidentCategory {
    let hits = |terms: &[&str]| {
        keywords
            .iter()
            .filter(|k| terms.iter().any(|t| k.contains(t)))
            .count()
    };
    let perf = hits(PERFORMANCE_TERMS);
    let conn = hits(CONNECTIVITY_TERMS);
    let app = hits(APPLICATION_TERMS);

    if perf >= conn && perf >= app {
        IncidentCategory::Performance
    } else if conn >= app {
        IncidentCategory::Connectivity
    } else {
        IncidentCategory::Application
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::chronological;
    use crate::fusion::testing::member;
    use crate::signal::{Severity, SignalKind};

    fn words(ws: &[&str]) -> Vec<String> {
        ws.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn categories_follow_vocabulary() {
        assert_eq!(categorize(&words(&["connection", "refused"])), IncidentCategory::Connectivity);
        assert_eq!(categorize(&words(&["exception", "crashed"])), IncidentCategory::Application);
        assert_eq!(categorize(&words(&["timeouts", "error"])), IncidentCategory::Performance);
        assert_eq!(categorize(&[]), IncidentCategory::Performance);
    }

    #[test]
    fn connectivity_beats_application_on_tie() {
        assert_eq!(categorize(&words(&["dns", "failed"])), IncidentCategory::Connectivity);
    }

    #[test]
    fn summarises_multi_service_group() {
        let group = vec![
            member(1, "web-1", SignalKind::Log, Severity::Medium, 0, "Connection refused by db", 0.4),
            member(2, "db-1", SignalKind::Metric, Severity::Critical, 5, "connection pool exhausted", 0.9),
            member(3, "web-1", SignalKind::Log, Severity::High, 9, "connection reset by peer", 0.7),
        ];
        let ctx = summarize(&chronological(&group)).unwrap();
        assert_eq!(ctx.max_severity, Severity::Critical);
        assert!(ctx.is_multi_service);
        assert_eq!(ctx.source_diversity, 2);
        assert_eq!(ctx.type_diversity, 2);
        assert_eq!(ctx.sources.get("web-1"), Some(&2));
        assert_eq!(ctx.common_keywords, vec!["connection".to_string()]);
        assert_eq!(ctx.incident_category, IncidentCategory::Connectivity);
    }
}
