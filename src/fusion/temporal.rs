use crate::enrich::EnrichedSignal;
use crate::fusion::TemporalContext;
use chrono::Timelike;
use std::collections::BTreeMap;

/// Bursts need more than this many members...
const BURST_MIN_COUNT: usize = 3;
/// ...arriving on average faster than this.
const BURST_MAX_INTERVAL_SECS: f64 = 60.0;

/// Summarise timing of `members` (already in chronological order).
pub fn summarize(members: &[&EnrichedSignal]) -> Option<TemporalContext> {
    let first = members.first()?;
    let last = members.last()?;
    let start_time = first.signal.timestamp;
    let end_time = last.signal.timestamp;
    let duration_seconds = seconds_between(start_time, end_time);

    let intervals: Vec<f64> = members
        .windows(2)
        .map(|w| seconds_between(w[0].signal.timestamp, w[1].signal.timestamp))
        .collect();
    let average_interval_seconds = if intervals.is_empty() {
        0.0
    } else {
        intervals.iter().sum::<f64>() / intervals.len() as f64
    };

    let mut hourly_distribution = BTreeMap::new();
    for m in members {
        *hourly_distribution.entry(m.signal.timestamp.hour()).or_insert(0) += 1;
    }

    let count = members.len();
    Some(TemporalContext {
        event_count: count,
        duration_seconds,
        start_time,
        end_time,
        average_interval_seconds,
        hourly_distribution,
        is_burst_pattern: average_interval_seconds < BURST_MAX_INTERVAL_SECS && count > BURST_MIN_COUNT,
        temporal_intensity: count as f64 / (duration_seconds / 60.0).max(1.0),
    })
}

pub(crate) fn seconds_between(a: chrono::DateTime<chrono::Utc>, b: chrono::DateTime<chrono::Utc>) -> f64 {
    (b - a).num_milliseconds() as f64 / 1000.0
}
