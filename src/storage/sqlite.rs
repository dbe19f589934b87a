//! SQLite-backed implementation of every repository trait.

use super::{
    is_constraint_violation, open_pool, AnalysisResultRepository, BatchOutcome, EnrichedSignalRepository,
    IncidentRepository, PatternRepository, Pool, SignalRepository, Store, StoreCounts, StoreError,
};
use crate::analysis::patterns::{HistoricalPattern, NewPattern};
use crate::analysis::{AnalysisResult, AnalysisState, InvestigationRecord, InvestigationStats};
use crate::enrich::EnrichedSignal;
use crate::fusion::Incident;
use crate::signal::{NewSignal, Signal, SignalKind};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::collections::BTreeMap;
use tracing::warn;

const SIGNAL_COLUMNS: &str = "s.id, s.kind, s.source, s.ts_ms, s.severity, s.message, s.metadata_json, s.payload_json";
const INCIDENT_COLUMNS: &str =
    "i.incident_id, i.temporal_json, i.semantic_json, i.causal_json, i.fusion_score, i.signal_count, i.created_at";
const RESULT_COLUMNS: &str = "a.incident_id, a.root_cause, a.confidence_score, a.suggested_fix, a.analysis_state, \
     a.reasoning, a.pattern_matches_json, a.created_at, a.updated_at";

#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        Ok(Self { pool: open_pool(path)? })
    }

    pub fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

fn corrupt(table: &'static str, id: impl ToString, reason: impl ToString) -> StoreError {
    StoreError::Corrupt {
        table,
        id: id.to_string(),
        reason: reason.to_string(),
    }
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

fn millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(table: &'static str, id: impl ToString, ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| corrupt(table, id, format!("timestamp {ms} out of range")))
}

/// RFC 3339, or SQLite's `datetime('now')` format.
fn parse_ts(table: &'static str, id: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|n| n.and_utc())
        .map_err(|e| corrupt(table, id, format!("bad timestamp '{raw}': {e}")))
}

fn decode<T: serde::de::DeserializeOwned>(table: &'static str, id: &str, column: &str, raw: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| corrupt(table, id, format!("{column}: {e}")))
}

struct SignalRow {
    id: i64,
    kind: String,
    source: String,
    ts_ms: i64,
    severity: String,
    message: String,
    metadata_json: String,
    payload_json: String,
}

impl SignalRow {
    /// Reads the eight signal columns starting at `offset`.
    fn read(row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(offset)?,
            kind: row.get(offset + 1)?,
            source: row.get(offset + 2)?,
            ts_ms: row.get(offset + 3)?,
            severity: row.get(offset + 4)?,
            message: row.get(offset + 5)?,
            metadata_json: row.get(offset + 6)?,
            payload_json: row.get(offset + 7)?,
        })
    }

    fn into_signal(self) -> Result<Signal, StoreError> {
        let id = self.id.to_string();
        Ok(Signal {
            id: self.id,
            kind: self.kind.parse().map_err(|e: String| corrupt("signals", &id, e))?,
            source: self.source,
            timestamp: from_millis("signals", &id, self.ts_ms)?,
            severity: self.severity.parse().map_err(|e: String| corrupt("signals", &id, e))?,
            message: self.message,
            metadata: decode("signals", &id, "metadata_json", &self.metadata_json)?,
            payload: decode("signals", &id, "payload_json", &self.payload_json)?,
        })
    }
}

struct EnrichedRow {
    signal: SignalRow,
    correlation_id: String,
    anomaly_score: f64,
    context_json: String,
}

impl EnrichedRow {
    const SELECT: &'static str = "SELECT s.id, s.kind, s.source, s.ts_ms, s.severity, s.message, s.metadata_json, \
         s.payload_json, e.correlation_id, e.anomaly_score, e.context_json \
         FROM enriched_signals e JOIN signals s ON s.id = e.signal_id";

    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            signal: SignalRow::read(row, 0)?,
            correlation_id: row.get(8)?,
            anomaly_score: row.get(9)?,
            context_json: row.get(10)?,
        })
    }

    fn into_enriched(self) -> Result<EnrichedSignal, StoreError> {
        let id = self.signal.id.to_string();
        let context = decode("enriched_signals", &id, "context_json", &self.context_json)?;
        Ok(EnrichedSignal {
            signal: self.signal.into_signal()?,
            correlation_id: self.correlation_id,
            anomaly_score: self.anomaly_score,
            context,
        })
    }
}

struct IncidentRow {
    incident_id: String,
    temporal_json: String,
    semantic_json: String,
    causal_json: String,
    fusion_score: f64,
    signal_count: i64,
    created_at: String,
}

impl IncidentRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            incident_id: row.get(0)?,
            temporal_json: row.get(1)?,
            semantic_json: row.get(2)?,
            causal_json: row.get(3)?,
            fusion_score: row.get(4)?,
            signal_count: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_incident(self) -> Result<Incident, StoreError> {
        let id = self.incident_id.as_str();
        Ok(Incident {
            temporal: decode("incidents", id, "temporal_json", &self.temporal_json)?,
            semantic: decode("incidents", id, "semantic_json", &self.semantic_json)?,
            causal: decode("incidents", id, "causal_json", &self.causal_json)?,
            fusion_score: self.fusion_score,
            signal_count: usize::try_from(self.signal_count).map_err(|e| corrupt("incidents", id, e))?,
            created_at: parse_ts("incidents", id, &self.created_at)?,
            incident_id: self.incident_id,
        })
    }
}

struct ResultRow {
    incident_id: String,
    root_cause: String,
    confidence_score: f64,
    suggested_fix: String,
    state: String,
    reasoning: String,
    pattern_matches_json: String,
    created_at: String,
    updated_at: String,
}

impl ResultRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            incident_id: row.get(0)?,
            root_cause: row.get(1)?,
            confidence_score: row.get(2)?,
            suggested_fix: row.get(3)?,
            state: row.get(4)?,
            reasoning: row.get(5)?,
            pattern_matches_json: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_result(self) -> Result<AnalysisResult, StoreError> {
        let id = self.incident_id.as_str();
        Ok(AnalysisResult {
            root_cause: self.root_cause,
            confidence_score: self.confidence_score,
            suggested_fix: self.suggested_fix,
            state: self
                .state
                .parse::<AnalysisState>()
                .map_err(|e| corrupt("analysis_results", id, e))?,
            reasoning: self.reasoning,
            pattern_matches: decode("analysis_results", id, "pattern_matches_json", &self.pattern_matches_json)?,
            created_at: parse_ts("analysis_results", id, &self.created_at)?,
            updated_at: parse_ts("analysis_results", id, &self.updated_at)?,
            incident_id: self.incident_id,
        })
    }
}

/// Convert every row of a list query. A row that cannot be decoded is logged
/// and left out so the rest of the list is still served; single-record reads
/// stay strict.
fn collect<R, T>(
    table: &'static str,
    rows: impl Iterator<Item = rusqlite::Result<R>>,
    convert: impl Fn(R) -> Result<T, StoreError>,
) -> Result<Vec<T>, StoreError> {
    let mut out = Vec::new();
    for row in rows {
        let row = match row {
            Ok(row) => row,
            Err(e @ (rusqlite::Error::InvalidColumnType(..) | rusqlite::Error::FromSqlConversionFailure(..))) => {
                warn!(table, error = %e, "skipping unreadable row");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        match convert(row) {
            Ok(item) => out.push(item),
            Err(e) if e.is_integrity() => warn!(table, error = %e, "skipping undecodable row"),
            Err(e) => return Err(e),
        }
    }
    Ok(out)
}

impl SignalRepository for SqliteStore {
    fn insert_signal(&self, signal: &NewSignal) -> Result<Signal, StoreError> {
        let conn = self.pool.get()?;
        let ts_ms = millis(signal.timestamp);
        conn.execute(
            "INSERT INTO signals (kind, source, ts_ms, severity, message, metadata_json, payload_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                signal.kind.as_str(),
                signal.source,
                ts_ms,
                signal.severity.as_str(),
                signal.message,
                serde_json::to_string(&signal.metadata)?,
                serde_json::to_string(&signal.payload)?,
            ],
        )?;
        let id = conn.last_insert_rowid();

        Ok(Signal {
            id,
            kind: signal.kind,
            source: signal.source.clone(),
            timestamp: from_millis("signals", id, ts_ms)?,
            severity: signal.severity,
            message: signal.message.clone(),
            metadata: signal.metadata.clone(),
            payload: signal.payload.clone(),
        })
    }

    fn unprocessed_since(&self, cursor: Option<DateTime<Utc>>, limit: usize) -> Result<Vec<Signal>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SIGNAL_COLUMNS} FROM signals s
             LEFT JOIN enriched_signals e ON e.signal_id = s.id
             WHERE e.id IS NULL AND s.ts_ms >= ?1
             ORDER BY s.ts_ms, s.id
             LIMIT ?2"
        ))?;
        let from = cursor.map(millis).unwrap_or(i64::MIN);
        let rows = stmt.query_map(params![from, limit as i64], |r| SignalRow::read(r, 0))?;
        collect("signals", rows, SignalRow::into_signal)
    }

    fn history_for(&self, source: &str, kind: SignalKind, before: DateTime<Utc>, limit: usize) -> Result<Vec<Signal>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SIGNAL_COLUMNS} FROM signals s
             WHERE s.source = ?1 AND s.kind = ?2 AND s.ts_ms < ?3
             ORDER BY s.ts_ms DESC, s.id DESC
             LIMIT ?4"
        ))?;
        let rows = stmt.query_map(
            params![source, kind.as_str(), millis(before), limit as i64],
            |r| SignalRow::read(r, 0),
        )?;
        collect("signals", rows, SignalRow::into_signal)
    }

    fn count_for(&self, source: &str, kind: SignalKind, from: DateTime<Utc>, before: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = self.pool.get()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM signals WHERE source = ?1 AND kind = ?2 AND ts_ms >= ?3 AND ts_ms < ?4",
            params![source, kind.as_str(), millis(from), millis(before)],
            |r| r.get(0),
        )?;
        Ok(n.max(0) as usize)
    }

    fn signals_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Signal>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SIGNAL_COLUMNS} FROM signals s
             WHERE s.ts_ms BETWEEN ?1 AND ?2
             ORDER BY s.ts_ms, s.id"
        ))?;
        let rows = stmt.query_map(params![millis(from), millis(to)], |r| SignalRow::read(r, 0))?;
        collect("signals", rows, SignalRow::into_signal)
    }

    fn recent_signals(&self, limit: usize, kind: Option<SignalKind>) -> Result<Vec<Signal>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SIGNAL_COLUMNS} FROM signals s
             WHERE (?1 IS NULL OR s.kind = ?1)
             ORDER BY s.ts_ms DESC, s.id DESC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![kind.map(|k| k.as_str()), limit as i64], |r| SignalRow::read(r, 0))?;
        collect("signals", rows, SignalRow::into_signal)
    }
}

impl EnrichedSignalRepository for SqliteStore {
    fn save_enriched(&self, batch: &[EnrichedSignal]) -> Result<BatchOutcome<i64>, StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let mut outcome = BatchOutcome::default();
        let now = Utc::now().to_rfc3339();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO enriched_signals (signal_id, correlation_id, anomaly_score, context_json, enriched_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for e in batch {
                let context = serde_json::to_string(&e.context)?;
                match stmt.execute(params![e.signal.id, e.correlation_id, e.anomaly_score, context, now]) {
                    Ok(_) => outcome.saved.push(e.signal.id),
                    Err(err) if is_constraint_violation(&err) => outcome.skipped.push(e.signal.id),
                    Err(err) => return Err(err.into()),
                }
            }
        }
        tx.commit()?;
        Ok(outcome)
    }

    fn enriched_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<EnrichedSignal>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE s.ts_ms BETWEEN ?1 AND ?2 ORDER BY s.ts_ms, s.id",
            EnrichedRow::SELECT
        ))?;
        let rows = stmt.query_map(params![millis(from), millis(to)], EnrichedRow::read)?;
        collect("enriched_signals", rows, EnrichedRow::into_enriched)
    }

    fn unfused_grouped_by_correlation(
        &self,
        since: Option<DateTime<Utc>>,
        max_groups: usize,
    ) -> Result<BTreeMap<String, Vec<EnrichedSignal>>, StoreError> {
        let conn = self.pool.get()?;
        let from = since.map(millis).unwrap_or(i64::MIN);

        let ids: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT e.correlation_id, MIN(s.ts_ms) AS first_ts
                 FROM enriched_signals e
                 JOIN signals s ON s.id = e.signal_id
                 LEFT JOIN incidents i ON i.incident_id = e.correlation_id
                 WHERE i.id IS NULL AND s.ts_ms >= ?1
                 GROUP BY e.correlation_id
                 ORDER BY first_ts, e.correlation_id
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![from, max_groups as i64], |r| r.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let mut stmt = conn.prepare(&format!(
            "{} WHERE e.correlation_id = ?1 AND s.ts_ms >= ?2 ORDER BY s.ts_ms, s.id",
            EnrichedRow::SELECT
        ))?;
        let mut groups = BTreeMap::new();
        for id in ids {
            let rows = stmt.query_map(params![id, from], EnrichedRow::read)?;
            let members = collect("enriched_signals", rows, EnrichedRow::into_enriched)?;
            if !members.is_empty() {
                groups.insert(id, members);
            }
        }
        Ok(groups)
    }
}

impl IncidentRepository for SqliteStore {
    fn save_incidents(&self, batch: &[Incident]) -> Result<BatchOutcome<String>, StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let mut outcome = BatchOutcome::default();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO incidents
                   (incident_id, temporal_json, semantic_json, causal_json, fusion_score, signal_count, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for inc in batch {
                let result = stmt.execute(params![
                    inc.incident_id,
                    serde_json::to_string(&inc.temporal)?,
                    serde_json::to_string(&inc.semantic)?,
                    serde_json::to_string(&inc.causal)?,
                    inc.fusion_score,
                    inc.signal_count as i64,
                    inc.created_at.to_rfc3339(),
                ]);
                match result {
                    Ok(_) => outcome.saved.push(inc.incident_id.clone()),
                    Err(err) if is_constraint_violation(&err) => outcome.skipped.push(inc.incident_id.clone()),
                    Err(err) => return Err(err.into()),
                }
            }
        }
        tx.commit()?;
        Ok(outcome)
    }

    fn exists_by_id(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.pool.get()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM incidents WHERE incident_id = ?1)",
            [id],
            |r| r.get(0),
        )?;
        Ok(exists)
    }

    fn unanalyzed(&self, limit: usize) -> Result<Vec<Incident>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {INCIDENT_COLUMNS} FROM incidents i
             LEFT JOIN analysis_results a ON a.incident_id = i.incident_id
             WHERE a.id IS NULL
             ORDER BY i.id
             LIMIT ?1"
        ))?;
        let rows = stmt.query_map([limit as i64], IncidentRow::read)?;
        collect("incidents", rows, IncidentRow::into_incident)
    }

    fn incident(&self, id: &str) -> Result<Option<Incident>, StoreError> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                &format!("SELECT {INCIDENT_COLUMNS} FROM incidents i WHERE i.incident_id = ?1"),
                [id],
                IncidentRow::read,
            )
            .optional()?;
        row.map(IncidentRow::into_incident).transpose()
    }

    fn recent_incidents(&self, limit: usize) -> Result<Vec<Incident>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {INCIDENT_COLUMNS} FROM incidents i ORDER BY i.id DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map([limit as i64], IncidentRow::read)?;
        collect("incidents", rows, IncidentRow::into_incident)
    }
}

impl AnalysisResultRepository for SqliteStore {
    fn insert_result(&self, result: &AnalysisResult) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        let inserted = conn.execute(
            "INSERT INTO analysis_results
               (incident_id, root_cause, confidence_score, suggested_fix, analysis_state, reasoning,
                pattern_matches_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                result.incident_id,
                result.root_cause,
                result.confidence_score,
                result.suggested_fix,
                result.state.as_str(),
                result.reasoning,
                serde_json::to_string(&result.pattern_matches)?,
                result.created_at.to_rfc3339(),
                result.updated_at.to_rfc3339(),
            ],
        );
        match inserted {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::Duplicate {
                what: "analysis result",
                id: result.incident_id.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn by_incident_id(&self, id: &str) -> Result<Option<AnalysisResult>, StoreError> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                &format!("SELECT {RESULT_COLUMNS} FROM analysis_results a WHERE a.incident_id = ?1"),
                [id],
                ResultRow::read,
            )
            .optional()?;
        row.map(ResultRow::into_result).transpose()
    }

    fn in_state(&self, state: AnalysisState, limit: usize) -> Result<Vec<AnalysisResult>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RESULT_COLUMNS} FROM analysis_results a
             WHERE a.analysis_state = ?1
             ORDER BY a.id
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![state.as_str(), limit as i64], ResultRow::read)?;
        collect("analysis_results", rows, ResultRow::into_result)
    }

    fn complete_deep_analysis(&self, result: &AnalysisResult, record: &InvestigationRecord) -> Result<bool, StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE analysis_results
             SET root_cause = ?1, confidence_score = ?2, suggested_fix = ?3, analysis_state = ?4,
                 reasoning = ?5, updated_at = ?6
             WHERE incident_id = ?7 AND analysis_state = ?8",
            params![
                result.root_cause,
                result.confidence_score,
                result.suggested_fix,
                result.state.as_str(),
                result.reasoning,
                result.updated_at.to_rfc3339(),
                result.incident_id,
                AnalysisState::PendingDeep.as_str(),
            ],
        )?;
        if changed == 0 {
            return Ok(false);
        }

        tx.execute(
            "INSERT INTO investigations
               (incident_id, tools_json, findings_json, confidence_before, confidence_after, duration_seconds, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.incident_id,
                serde_json::to_string(&record.tools_used)?,
                serde_json::to_string(&record.findings)?,
                record.confidence_before,
                record.confidence_after,
                record.duration_seconds,
                record.created_at.to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn delete_for_incident(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.pool.get()?;
        let n = conn.execute("DELETE FROM analysis_results WHERE incident_id = ?1", [id])?;
        Ok(n > 0)
    }

    fn investigations_for(&self, id: &str) -> Result<Vec<InvestigationRecord>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT incident_id, tools_json, findings_json, confidence_before, confidence_after,
                    duration_seconds, created_at
             FROM investigations WHERE incident_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, f64>(3)?,
                r.get::<_, f64>(4)?,
                r.get::<_, f64>(5)?,
                r.get::<_, String>(6)?,
            ))
        })?;
        collect("investigations", rows, |(incident_id, tools, findings, before, after, duration, created)| {
            Ok(InvestigationRecord {
                tools_used: decode("investigations", &incident_id, "tools_json", &tools)?,
                findings: decode("investigations", &incident_id, "findings_json", &findings)?,
                confidence_before: before,
                confidence_after: after,
                duration_seconds: duration,
                created_at: parse_ts("investigations", &incident_id, &created)?,
                incident_id,
            })
        })
    }

    fn recent_results(&self, limit: usize, state: Option<AnalysisState>) -> Result<Vec<AnalysisResult>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RESULT_COLUMNS} FROM analysis_results a
             WHERE (?1 IS NULL OR a.analysis_state = ?1)
             ORDER BY a.id DESC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![state.map(|s| s.as_str()), limit as i64], ResultRow::read)?;
        collect("analysis_results", rows, ResultRow::into_result)
    }

    fn investigation_stats(&self) -> Result<InvestigationStats, StoreError> {
        let conn = self.pool.get()?;
        let (total, avg_duration, avg_improvement): (i64, f64, f64) = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(AVG(duration_seconds), 0.0),
                    COALESCE(AVG(confidence_after - confidence_before), 0.0)
             FROM investigations",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )?;

        let mut tool_usage = BTreeMap::new();
        let mut stmt = conn.prepare(
            "SELECT t.value, COUNT(*)
             FROM investigations i, json_each(i.tools_json) t
             GROUP BY t.value",
        )?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
        for row in rows {
            let (tool, n) = row?;
            tool_usage.insert(tool, n.max(0) as u64);
        }

        Ok(InvestigationStats {
            total: total.max(0) as u64,
            average_duration_seconds: avg_duration,
            average_confidence_improvement: avg_improvement,
            tool_usage,
        })
    }
}

impl PatternRepository for SqliteStore {
    fn add_pattern(&self, pattern: &NewPattern) -> Result<i64, StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO historical_patterns (description, resolution_steps_json, success_rate, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                pattern.description,
                serde_json::to_string(&pattern.resolution_steps)?,
                pattern.success_rate,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn patterns(&self) -> Result<Vec<HistoricalPattern>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, description, resolution_steps_json, success_rate, created_at
             FROM historical_patterns ORDER BY id",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, Option<f64>>(3)?,
                r.get::<_, String>(4)?,
            ))
        })?;
        collect("historical_patterns", rows, |(id, description, steps, success_rate, created)| {
            let key = id.to_string();
            Ok(HistoricalPattern {
                id,
                description,
                resolution_steps: decode("historical_patterns", &key, "resolution_steps_json", &steps)?,
                success_rate,
                created_at: parse_ts("historical_patterns", &key, &created)?,
            })
        })
    }
}

impl Store for SqliteStore {
    fn counts(&self) -> Result<StoreCounts, StoreError> {
        let conn = self.pool.get()?;
        let count = |table: &str| -> Result<u64, StoreError> {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?;
            Ok(n.max(0) as u64)
        };

        let mut counts = StoreCounts {
            signals: count("signals")?,
            enriched: count("enriched_signals")?,
            incidents: count("incidents")?,
            analysis_results: count("analysis_results")?,
            investigations: count("investigations")?,
            by_state: BTreeMap::new(),
        };

        let mut stmt = conn.prepare("SELECT analysis_state, COUNT(*) FROM analysis_results GROUP BY analysis_state")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
        for row in rows {
            let (state, n) = row?;
            counts.by_state.insert(state, n.max(0) as u64);
        }
        let unanalyzed = counts.incidents.saturating_sub(counts.analysis_results);
        if unanalyzed > 0 {
            counts.by_state.insert(AnalysisState::Unanalyzed.as_str().to_string(), unanalyzed);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Finding, FindingKind};
    use crate::enrich::ContextData;
    use crate::fusion::{fuse, FusionWeights};
    use crate::signal::Severity;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn store() -> (TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let store = SqliteStore::open(path.to_str().unwrap()).unwrap();
        (dir, store)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap()
    }

    fn ingest(store: &SqliteStore, source: &str, offset_secs: i64, message: &str) -> Signal {
        let s = NewSignal::new(SignalKind::Log, source, t0() + Duration::seconds(offset_secs), Severity::High, message)
            .with_metadata("region", serde_json::json!("eu-1"));
        store.insert_signal(&s).unwrap()
    }

    fn enriched(signal: Signal, correlation_id: &str) -> EnrichedSignal {
        EnrichedSignal {
            signal,
            correlation_id: correlation_id.to_string(),
            anomaly_score: 0.7,
            context: ContextData::default(),
        }
    }

    fn result(incident_id: &str, state: AnalysisState) -> AnalysisResult {
        AnalysisResult {
            incident_id: incident_id.to_string(),
            root_cause: "pool exhausted".into(),
            confidence_score: 0.5,
            suggested_fix: "raise pool".into(),
            state,
            reasoning: "r".into(),
            pattern_matches: vec![],
            created_at: t0(),
            updated_at: t0(),
        }
    }

    #[test]
    fn signals_round_trip_with_metadata() {
        let (_dir, store) = store();
        let stored = ingest(&store, "web-1", 0, "boom");
        let recent = store.recent_signals(10, None).unwrap();
        assert_eq!(recent, vec![stored.clone()]);
        assert_eq!(recent[0].metadata.get("region"), Some(&serde_json::json!("eu-1")));
        assert!(store.recent_signals(10, Some(SignalKind::Metric)).unwrap().is_empty());
    }

    #[test]
    fn history_is_strictly_before_and_newest_first() {
        let (_dir, store) = store();
        for i in 0..5 {
            ingest(&store, "web-1", i * 10, "x");
        }
        ingest(&store, "db-1", 5, "x");
        let history = store
            .history_for("web-1", SignalKind::Log, t0() + Duration::seconds(40), 10)
            .unwrap();
        assert_eq!(history.len(), 4);
        assert!(history[0].timestamp > history[3].timestamp);
        assert_eq!(
            store.count_for("web-1", SignalKind::Log, t0(), t0() + Duration::seconds(40)).unwrap(),
            4
        );
    }

    #[test]
    fn enrichment_is_saved_once_per_signal() {
        let (_dir, store) = store();
        let a = ingest(&store, "web-1", 0, "x");
        let b = ingest(&store, "web-1", 10, "y");
        assert_eq!(store.unprocessed_since(None, 10).unwrap().len(), 2);

        let first = store.save_enriched(&[enriched(a.clone(), "g1")]).unwrap();
        assert_eq!(first.saved, vec![a.id]);

        let second = store.save_enriched(&[enriched(a.clone(), "g1"), enriched(b.clone(), "g1")]).unwrap();
        assert_eq!(second.saved, vec![b.id]);
        assert_eq!(second.skipped, vec![a.id]);

        assert!(store.unprocessed_since(None, 10).unwrap().is_empty());
        assert_eq!(store.enriched_between(t0(), t0() + Duration::seconds(5)).unwrap().len(), 1);
    }

    #[test]
    fn unfused_groups_exclude_fused_ids() {
        let (_dir, store) = store();
        let a = ingest(&store, "web-1", 0, "x");
        let b = ingest(&store, "db-1", 10, "y");
        let c = ingest(&store, "db-1", 20, "z");
        store
            .save_enriched(&[enriched(a.clone(), "g1"), enriched(b, "g2"), enriched(c, "g2")])
            .unwrap();

        let groups = store.unfused_grouped_by_correlation(None, 10).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["g2"].len(), 2);

        let incident = fuse("g1", &groups["g1"], &FusionWeights::default(), t0()).unwrap();
        let saved = store.save_incidents(&[incident.clone()]).unwrap();
        assert_eq!(saved.saved, vec!["g1".to_string()]);
        assert_eq!(store.save_incidents(&[incident.clone()]).unwrap().skipped, vec!["g1".to_string()]);

        let groups = store.unfused_grouped_by_correlation(None, 10).unwrap();
        assert_eq!(groups.keys().collect::<Vec<_>>(), vec!["g2"]);
        assert_eq!(store.incident("g1").unwrap(), Some(incident));
        assert!(store.exists_by_id("g1").unwrap());
        assert_eq!(store.unanalyzed(10).unwrap().len(), 1);
    }

    #[test]
    fn analysis_result_claim_and_deep_completion() {
        let (_dir, store) = store();
        let a = ingest(&store, "web-1", 0, "x");
        store.save_enriched(&[enriched(a, "g1")]).unwrap();
        let groups = store.unfused_grouped_by_correlation(None, 10).unwrap();
        store
            .save_incidents(&[fuse("g1", &groups["g1"], &FusionWeights::default(), t0()).unwrap()])
            .unwrap();

        store.insert_result(&result("g1", AnalysisState::PendingDeep)).unwrap();
        let dup = store.insert_result(&result("g1", AnalysisState::Analyzed)).unwrap_err();
        assert!(matches!(dup, StoreError::Duplicate { .. }));
        assert!(store.unanalyzed(10).unwrap().is_empty());
        assert_eq!(store.in_state(AnalysisState::PendingDeep, 10).unwrap().len(), 1);

        let mut deep = result("g1", AnalysisState::DeepAnalyzed);
        deep.confidence_score = 0.8;
        let record = InvestigationRecord {
            incident_id: "g1".into(),
            tools_used: vec!["monitoring".into()],
            findings: vec![Finding::new(FindingKind::MonitoringAnomaly, "cpu high")],
            confidence_before: 0.5,
            confidence_after: 0.8,
            duration_seconds: 0.2,
            created_at: t0(),
        };
        assert!(store.complete_deep_analysis(&deep, &record).unwrap());
        // no longer pending: second completion is refused and logs nothing
        assert!(!store.complete_deep_analysis(&deep, &record).unwrap());
        assert_eq!(store.investigations_for("g1").unwrap(), vec![record]);

        let stored = store.by_incident_id("g1").unwrap().unwrap();
        assert_eq!(stored.state, AnalysisState::DeepAnalyzed);
        assert_eq!(stored.confidence_score, 0.8);

        let counts = store.counts().unwrap();
        assert_eq!(counts.incidents, 1);
        assert_eq!(counts.by_state.get("deep_analyzed"), Some(&1));

        assert!(store.delete_for_incident("g1").unwrap());
        assert!(!store.delete_for_incident("g1").unwrap());
        assert_eq!(store.unanalyzed(10).unwrap().len(), 1);
    }

    #[test]
    fn patterns_round_trip() {
        let (_dir, store) = store();
        let id = store
            .add_pattern(&NewPattern {
                description: "redis eviction storm".into(),
                resolution_steps: vec!["raise maxmemory".into()],
                success_rate: Some(0.8),
            })
            .unwrap();
        let patterns = store.patterns().unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].id, id);
        assert_eq!(patterns[0].resolution_steps, vec!["raise maxmemory".to_string()]);
    }

    #[test]
    fn undecodable_rows_are_left_out_of_lists() {
        let (_dir, store) = store();
        let bad = ingest(&store, "web-1", 0, "x");
        let good = ingest(&store, "web-1", 10, "y");
        store
            .pool()
            .get()
            .unwrap()
            .execute("UPDATE signals SET severity = 'apocalyptic' WHERE id = ?1", [bad.id])
            .unwrap();

        assert_eq!(store.unprocessed_since(None, 10).unwrap(), vec![good.clone()]);
        assert_eq!(store.recent_signals(10, None).unwrap(), vec![good.clone()]);
        assert_eq!(store.signals_between(t0(), t0() + Duration::seconds(10)).unwrap(), vec![good]);
    }

    #[test]
    fn corrupt_incident_does_not_hide_the_others() {
        let (_dir, store) = store();
        let a = ingest(&store, "web-1", 0, "x");
        let b = ingest(&store, "db-1", 600, "y");
        store.save_enriched(&[enriched(a, "g1"), enriched(b, "g2")]).unwrap();
        let groups = store.unfused_grouped_by_correlation(None, 10).unwrap();
        let incidents: Vec<Incident> = groups
            .iter()
            .map(|(id, members)| fuse(id, members, &FusionWeights::default(), t0()).unwrap())
            .collect();
        store.save_incidents(&incidents).unwrap();
        store
            .pool()
            .get()
            .unwrap()
            .execute("UPDATE incidents SET semantic_json = '{' WHERE incident_id = 'g1'", [])
            .unwrap();

        let pending = store.unanalyzed(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].incident_id, "g2");

        // a direct read of the broken record still reports it
        let err = store.incident("g1").unwrap_err();
        assert!(err.is_integrity());
    }

    #[test]
    fn group_with_only_undecodable_members_is_not_offered() {
        let (_dir, store) = store();
        let a = ingest(&store, "web-1", 0, "x");
        let b = ingest(&store, "db-1", 600, "y");
        let a_id = a.id;
        store.save_enriched(&[enriched(a, "g1"), enriched(b, "g2")]).unwrap();
        store
            .pool()
            .get()
            .unwrap()
            .execute("UPDATE enriched_signals SET context_json = 'nope' WHERE signal_id = ?1", [a_id])
            .unwrap();

        let groups = store.unfused_grouped_by_correlation(None, 10).unwrap();
        assert_eq!(groups.keys().collect::<Vec<_>>(), vec!["g2"]);
    }

    #[test]
    fn open_reports_an_unusable_directory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let err = SqliteStore::open(blocker.join("nested").join("x.db").to_str().unwrap())
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::Io(_)), "{err}");
        assert!(!err.is_integrity());
    }

    #[test]
    fn results_listing_and_investigation_stats() {
        let (_dir, store) = store();
        let a = ingest(&store, "web-1", 0, "x");
        let b = ingest(&store, "db-1", 600, "y");
        store.save_enriched(&[enriched(a, "g1"), enriched(b, "g2")]).unwrap();
        let groups = store.unfused_grouped_by_correlation(None, 10).unwrap();
        let incidents: Vec<Incident> = groups
            .iter()
            .map(|(id, members)| fuse(id, members, &FusionWeights::default(), t0()).unwrap())
            .collect();
        store.save_incidents(&incidents).unwrap();

        assert_eq!(store.investigation_stats().unwrap(), InvestigationStats::default());

        store.insert_result(&result("g1", AnalysisState::PendingDeep)).unwrap();
        store.insert_result(&result("g2", AnalysisState::Analyzed)).unwrap();
        let listed = store.recent_results(10, None).unwrap();
        assert_eq!(listed.iter().map(|r| r.incident_id.as_str()).collect::<Vec<_>>(), vec!["g2", "g1"]);
        assert_eq!(store.recent_results(1, None).unwrap().len(), 1);
        let pending = store.recent_results(10, Some(AnalysisState::PendingDeep)).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].incident_id, "g1");

        let record = InvestigationRecord {
            incident_id: "g1".into(),
            tools_used: vec!["monitoring".into(), "deploys".into()],
            findings: vec![],
            confidence_before: 0.5,
            confidence_after: 0.8,
            duration_seconds: 2.0,
            created_at: t0(),
        };
        let mut deep = result("g1", AnalysisState::DeepAnalyzed);
        deep.confidence_score = 0.8;
        assert!(store.complete_deep_analysis(&deep, &record).unwrap());

        let stats = store.investigation_stats().unwrap();
        assert_eq!(stats.total, 1);
        assert!((stats.average_confidence_improvement - 0.3).abs() < 1e-9);
        assert_eq!(stats.average_duration_seconds, 2.0);
        assert_eq!(stats.tool_usage.get("monitoring"), Some(&1));
        assert_eq!(stats.tool_usage.get("deploys"), Some(&1));
    }
}
