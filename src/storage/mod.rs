//! SQLite storage layer -- repository contracts, schema and queries.

pub mod schema;
pub mod sqlite;

use crate::analysis::patterns::{HistoricalPattern, NewPattern};
use crate::analysis::{AnalysisResult, AnalysisState, InvestigationRecord, InvestigationStats};
use crate::enrich::EnrichedSignal;
use crate::fusion::Incident;
use crate::signal::{NewSignal, Signal, SignalKind};
use chrono::{DateTime, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

pub use self::sqlite::SqliteStore;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("duplicate {what}: {id}")]
    Duplicate { what: &'static str, id: String },
    #[error("corrupt {table} row {id}: {reason}")]
    Corrupt {
        table: &'static str,
        id: String,
        reason: String,
    },
}

impl StoreError {
    /// True for errors caused by the data itself rather than the medium.
    pub fn is_integrity(&self) -> bool {
        match self {
            StoreError::Duplicate { .. } | StoreError::Corrupt { .. } | StoreError::Serde(_) => true,
            StoreError::Sqlite(e) => is_constraint_violation(e),
            StoreError::Pool(_) | StoreError::Io(_) => false,
        }
    }
}

pub(crate) fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _) if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Per-record result of a batch write: duplicates are skipped, not fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchOutcome<K> {
    pub saved: Vec<K>,
    pub skipped: Vec<K>,
}

impl<K> Default for BatchOutcome<K> {
    fn default() -> Self {
        Self {
            saved: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

/// Row counts used by the status surface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub signals: u64,
    pub enriched: u64,
    pub incidents: u64,
    pub analysis_results: u64,
    pub investigations: u64,
    pub by_state: BTreeMap<String, u64>,
}

pub trait SignalRepository: Send + Sync {
    fn insert_signal(&self, signal: &NewSignal) -> Result<Signal, StoreError>;

    /// Signals without an enriched record, oldest first. `cursor` bounds
    /// the parent timestamp from below.
    fn unprocessed_since(&self, cursor: Option<DateTime<Utc>>, limit: usize) -> Result<Vec<Signal>, StoreError>;

    /// Up to `limit` signals with this source and kind strictly before
    /// `before`, newest first.
    fn history_for(&self, source: &str, kind: SignalKind, before: DateTime<Utc>, limit: usize) -> Result<Vec<Signal>, StoreError>;

    /// Number of signals with this source and kind in `[from, before)`.
    fn count_for(&self, source: &str, kind: SignalKind, from: DateTime<Utc>, before: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Signals with timestamps in `[from, to]`, oldest first.
    fn signals_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Signal>, StoreError>;

    fn recent_signals(&self, limit: usize, kind: Option<SignalKind>) -> Result<Vec<Signal>, StoreError>;
}

pub trait EnrichedSignalRepository: Send + Sync {
    /// Persist a batch atomically; signals that already have an enriched
    /// record are skipped.
    fn save_enriched(&self, batch: &[EnrichedSignal]) -> Result<BatchOutcome<i64>, StoreError>;

    /// Enriched signals whose parent timestamp lies in `[from, to]`.
    fn enriched_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<EnrichedSignal>, StoreError>;

    /// Enriched signals whose correlation id has no incident yet, grouped by
    /// correlation id, members oldest first. At most `max_groups` groups,
    /// oldest group first.
    fn unfused_grouped_by_correlation(
        &self,
        since: Option<DateTime<Utc>>,
        max_groups: usize,
    ) -> Result<BTreeMap<String, Vec<EnrichedSignal>>, StoreError>;
}

pub trait IncidentRepository: Send + Sync {
    /// Persist a batch atomically; ids that already exist are skipped.
    fn save_incidents(&self, batch: &[Incident]) -> Result<BatchOutcome<String>, StoreError>;

    fn exists_by_id(&self, id: &str) -> Result<bool, StoreError>;

    /// Incidents without an analysis result, oldest first.
    fn unanalyzed(&self, limit: usize) -> Result<Vec<Incident>, StoreError>;

    fn incident(&self, id: &str) -> Result<Option<Incident>, StoreError>;

    fn recent_incidents(&self, limit: usize) -> Result<Vec<Incident>, StoreError>;
}

pub trait AnalysisResultRepository: Send + Sync {
    /// Claim the incident by inserting its result. Fails with
    /// [`StoreError::Duplicate`] if a result already exists.
    fn insert_result(&self, result: &AnalysisResult) -> Result<(), StoreError>;

    fn by_incident_id(&self, id: &str) -> Result<Option<AnalysisResult>, StoreError>;

    fn in_state(&self, state: AnalysisState, limit: usize) -> Result<Vec<AnalysisResult>, StoreError>;

    /// Replace a `PendingDeep` result and append the investigation record in
    /// one transaction. Returns false if the result was no longer pending.
    fn complete_deep_analysis(&self, result: &AnalysisResult, record: &InvestigationRecord) -> Result<bool, StoreError>;

    fn delete_for_incident(&self, id: &str) -> Result<bool, StoreError>;

    fn investigations_for(&self, id: &str) -> Result<Vec<InvestigationRecord>, StoreError>;

    /// Most recently created results first, optionally only those in `state`.
    fn recent_results(&self, limit: usize, state: Option<AnalysisState>) -> Result<Vec<AnalysisResult>, StoreError>;

    /// Aggregates over every recorded deep analysis.
    fn investigation_stats(&self) -> Result<InvestigationStats, StoreError>;
}

pub trait PatternRepository: Send + Sync {
    fn add_pattern(&self, pattern: &NewPattern) -> Result<i64, StoreError>;

    fn patterns(&self) -> Result<Vec<HistoricalPattern>, StoreError>;
}

/// Everything the pipeline needs from persistence.
pub trait Store:
    SignalRepository + EnrichedSignalRepository + IncidentRepository + AnalysisResultRepository + PatternRepository
{
    fn counts(&self) -> Result<StoreCounts, StoreError>;
}

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool, StoreError> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}
