//! Storage module for durable pipeline state
//!
//! This module handles all database operations, including:
//! - SQLite database initialization and schema management
//! - The source registry and its monitoring metadata
//! - Crawl state, frontier and spill persistence
//! - Run tracking and the single-writer run lock

mod schema;
mod sqlite;
mod traits;

pub use sqlite::{RegistryStats, SqliteStorage};
pub use traits::{
    CrawlStateStore, RunStore, SourceRegistry, SpillStore, StorageError, StorageResult,
};

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Storage shared between the workers of one run
pub type SharedStorage = Arc<Mutex<SqliteStorage>>;

/// Locks shared storage for one short, synchronous section
///
/// The guard must be dropped before the next `.await`.
pub fn lock_storage(storage: &SharedStorage) -> StorageResult<MutexGuard<'_, SqliteStorage>> {
    storage.lock().map_err(|_| StorageError::Poisoned)
}

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(StorageError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    SqliteStorage::new(path)
}

/// Represents a pipeline run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub mode: String,
    pub started_at: String,
    pub heartbeat_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
    /// JSON-encoded run result, once finished
    pub summary: Option<String>,
}

/// Status of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
