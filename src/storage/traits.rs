//! Storage traits and error types
//!
//! This module defines the interfaces the pipeline needs from durable storage
//! and the associated error types.

use crate::state::{CrawlState, FrontierEntry, MonitoringUpdate, SourceMonitoringRecord};
use crate::storage::{RunRecord, RunStatus};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Corrupt crawl state for {source_id}: {reason}")]
    Corrupt { source_id: String, reason: String },

    #[error("Run {run_id} is still in progress (last heartbeat {heartbeat_at})")]
    RunInProgress { run_id: i64, heartbeat_at: String },

    #[error("Storage lock poisoned")]
    Poisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Registry of monitored sources
///
/// The pipeline treats this as synchronous key-value storage: records are read
/// at run start and written back field by field as each source is processed.
pub trait SourceRegistry {
    /// Registers a source; returns false if one with the same id already exists
    fn add_source(&mut self, record: &SourceMonitoringRecord) -> StorageResult<bool>;

    /// Looks up a source by id
    fn get_source(&self, source_id: &str) -> StorageResult<Option<SourceMonitoringRecord>>;

    /// Lists every registered source
    fn list_sources(&self) -> StorageResult<Vec<SourceMonitoringRecord>>;

    /// Sources for which no content has ever been recorded
    fn list_sources_pending_initial(&self) -> StorageResult<Vec<SourceMonitoringRecord>>;

    /// Already acquired sources whose next check is at or before `now`
    fn list_sources_due(&self, now: DateTime<Utc>) -> StorageResult<Vec<SourceMonitoringRecord>>;

    /// Sources that need an acquisition: pending initial or flagged as changed
    fn list_sources_pending_acquisition(&self) -> StorageResult<Vec<SourceMonitoringRecord>>;

    /// Writes the fields set in `update`
    ///
    /// # Errors
    ///
    /// `StorageError::SourceNotFound` if no source has this id.
    fn update_monitoring_metadata(
        &mut self,
        source_id: &str,
        update: &MonitoringUpdate,
    ) -> StorageResult<()>;
}

/// Overflow segment of a crawl frontier
pub trait SpillStore {
    /// Stores `entry` at position `seq`, replacing any leftover row there
    fn spill_write(&mut self, state_id: &str, seq: u64, entry: &FrontierEntry)
        -> StorageResult<()>;

    /// Reads entries with `from_seq <= seq < to_seq` in sequence order
    fn spill_read(
        &mut self,
        state_id: &str,
        from_seq: u64,
        to_seq: u64,
    ) -> StorageResult<Vec<FrontierEntry>>;
}

/// Persistence of per-source crawl progress
pub trait CrawlStateStore: SpillStore {
    /// Loads the crawl state for a source
    ///
    /// # Errors
    ///
    /// `StorageError::Corrupt` when the persisted rows cannot be interpreted.
    fn load_crawl_state(
        &mut self,
        source_id: &str,
        memory_cap: usize,
    ) -> StorageResult<Option<CrawlState>>;

    /// Persists one unit of progress atomically
    ///
    /// Writes the state row, the in-memory frontier tier and the visits made
    /// since the last save in one transaction, and drops spill rows that
    /// have already been drained.
    fn save_crawl_state(&mut self, state: &CrawlState) -> StorageResult<()>;

    /// Removes every trace of a source's crawl
    fn delete_crawl_state(&mut self, source_id: &str) -> StorageResult<()>;
}

/// Run bookkeeping and the single-writer lock
pub trait RunStore {
    /// Starts a run, failing if another live run holds the lock
    ///
    /// Runs still marked running whose heartbeat is older than `lease` are
    /// considered dead and marked interrupted.
    fn begin_run(
        &mut self,
        mode: &str,
        config_hash: &str,
        lease: chrono::Duration,
    ) -> StorageResult<i64>;

    /// Refreshes the run's heartbeat
    fn heartbeat(&mut self, run_id: i64) -> StorageResult<()>;

    /// Records the final status and summary of a run
    fn finish_run(&mut self, run_id: i64, status: RunStatus, summary: &str) -> StorageResult<()>;

    /// Gets a run by id
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Most recent runs, newest first
    fn recent_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>>;
}
