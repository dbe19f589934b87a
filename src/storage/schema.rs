//! Database schema and migrations.

use rusqlite::Connection;

pub const SCHEMA_VERSION: i64 = 1;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS signals (
            id INTEGER PRIMARY KEY,
            kind TEXT NOT NULL,
            source TEXT NOT NULL,
            ts_ms INTEGER NOT NULL,
            severity TEXT NOT NULL,
            message TEXT NOT NULL DEFAULT '',
            metadata_json TEXT NOT NULL DEFAULT '{}',
            payload_json TEXT NOT NULL DEFAULT 'null',
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS enriched_signals (
            id INTEGER PRIMARY KEY,
            signal_id INTEGER NOT NULL UNIQUE,
            correlation_id TEXT NOT NULL,
            anomaly_score REAL NOT NULL,
            context_json TEXT NOT NULL,
            enriched_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (signal_id) REFERENCES signals(id)
        );

        CREATE TABLE IF NOT EXISTS incidents (
            id INTEGER PRIMARY KEY,
            incident_id TEXT NOT NULL UNIQUE,
            temporal_json TEXT NOT NULL,
            semantic_json TEXT NOT NULL,
            causal_json TEXT NOT NULL,
            fusion_score REAL NOT NULL,
            signal_count INTEGER NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS analysis_results (
            id INTEGER PRIMARY KEY,
            incident_id TEXT NOT NULL UNIQUE,
            root_cause TEXT NOT NULL,
            confidence_score REAL NOT NULL,
            suggested_fix TEXT NOT NULL,
            analysis_state TEXT NOT NULL,
            reasoning TEXT NOT NULL,
            pattern_matches_json TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (incident_id) REFERENCES incidents(incident_id)
        );

        CREATE TABLE IF NOT EXISTS investigations (
            id INTEGER PRIMARY KEY,
            incident_id TEXT NOT NULL,
            tools_json TEXT NOT NULL,
            findings_json TEXT NOT NULL,
            confidence_before REAL NOT NULL,
            confidence_after REAL NOT NULL,
            duration_seconds REAL NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS historical_patterns (
            id INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            resolution_steps_json TEXT NOT NULL DEFAULT '[]',
            success_rate REAL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_signals_ts ON signals(ts_ms);
        CREATE INDEX IF NOT EXISTS idx_signals_source_kind_ts ON signals(source, kind, ts_ms);
        CREATE INDEX IF NOT EXISTS idx_enriched_correlation ON enriched_signals(correlation_id);
        CREATE INDEX IF NOT EXISTS idx_analysis_state ON analysis_results(analysis_state);
        CREATE INDEX IF NOT EXISTS idx_investigations_incident ON investigations(incident_id);",
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [SCHEMA_VERSION],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        for table in ["signals", "enriched_signals", "incidents", "analysis_results", "investigations"] {
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
                .unwrap();
            assert_eq!(count, 0, "{} should start empty", table);
        }
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap(); // Should not error

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }
}
