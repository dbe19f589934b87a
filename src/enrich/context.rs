//! Derived per-signal context: time-of-day flags, related sources and
//! severity escalation.

use crate::enrich::{ContextData, FrequencyCounts, SeverityContext, TimeContext};
use crate::signal::Signal;
use chrono::{DateTime, Datelike, Timelike, Utc};
use std::collections::{BTreeMap, BTreeSet};

pub fn build(signal: &Signal, frequency: FrequencyCounts, window_sources: &[String], recent: &[Signal]) -> ContextData {
    ContextData {
        frequency,
        related_sources: related_sources(signal, window_sources),
        time: time_context(signal.timestamp),
        severity: severity_context(signal, recent),
    }
}

pub fn time_context(ts: DateTime<Utc>) -> TimeContext {
    let hour = ts.hour();
    let weekday = ts.weekday().num_days_from_monday();
    TimeContext {
        hour_of_day: hour,
        day_of_week: weekday,
        is_business_hours: (9..=17).contains(&hour),
        is_weekend: weekday >= 5,
    }
}

/// Distinct sources other than the signal's own, sorted.
pub fn related_sources(signal: &Signal, sources: &[String]) -> Vec<String> {
    sources
        .iter()
        .filter(|s| **s != signal.source)
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Severity histogram of `recent` and whether `signal` escalates past an
/// earlier same-source signal.
pub fn severity_context(signal: &Signal, recent: &[Signal]) -> SeverityContext {
    let mut distribution = BTreeMap::new();
    for s in recent {
        *distribution.entry(s.severity).or_insert(0) += 1;
    }
    let is_escalation = recent
        .iter()
        .any(|s| s.id != signal.id && s.source == signal.source && signal.severity > s.severity);

    SeverityContext {
        recent_distribution: distribution,
        is_escalation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{Metadata, Severity, SignalKind};
    use chrono::TimeZone;

    fn sig(id: i64, source: &str, severity: Severity) -> Signal {
        Signal {
            id,
            kind: SignalKind::Event,
            source: source.to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 13, 10, 30, 0).unwrap(),
            severity,
            message: String::new(),
            metadata: Metadata::new(),
            payload: serde_json::Value::Null,
        }
    }

    #[test]
    fn saturday_morning_flags() {
        // 2024-01-13 is a Saturday.
        let t = time_context(Utc.with_ymd_and_hms(2024, 1, 13, 10, 30, 0).unwrap());
        assert_eq!(t.day_of_week, 5);
        assert!(t.is_weekend);
        assert!(t.is_business_hours);

        let late = time_context(Utc.with_ymd_and_hms(2024, 1, 15, 18, 0, 0).unwrap());
        assert!(!late.is_business_hours);
        assert!(!late.is_weekend);
    }

    #[test]
    fn escalation_compares_same_source_only() {
        let current = sig(10, "web-1", Severity::High);
        let recent = vec![sig(1, "db-1", Severity::Info), sig(2, "web-1", Severity::High)];
        let ctx = severity_context(&current, &recent);
        assert!(!ctx.is_escalation);
        assert_eq!(ctx.recent_distribution.get(&Severity::High), Some(&1));

        let recent = vec![sig(3, "web-1", Severity::Low)];
        assert!(severity_context(&current, &recent).is_escalation);
    }

    #[test]
    fn related_sources_are_deduplicated() {
        let current = sig(10, "web-1", Severity::High);
        let sources = vec!["db".to_string(), "web-1".to_string(), "cache".to_string(), "db".to_string()];
        assert_eq!(related_sources(&current, &sources), vec!["cache", "db"]);
    }
}
