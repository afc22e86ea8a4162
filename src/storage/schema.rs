//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the pipeline database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Pipeline runs; a row in status 'running' with a fresh heartbeat holds the run lock
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    mode TEXT NOT NULL,
    started_at TEXT NOT NULL,
    heartbeat_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    summary TEXT
);

CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status);

-- Registered sources and their monitoring metadata
CREATE TABLE IF NOT EXISTS sources (
    id TEXT PRIMARY KEY,
    url TEXT NOT NULL UNIQUE,
    crawl_enabled INTEGER NOT NULL DEFAULT 1,
    scope TEXT NOT NULL,
    max_pages INTEGER NOT NULL,
    max_depth INTEGER NOT NULL,
    frequency TEXT NOT NULL,
    last_content_hash TEXT,
    last_etag TEXT,
    last_modified TEXT,
    last_checked TEXT,
    check_failures INTEGER NOT NULL DEFAULT 0,
    next_check_after TEXT,
    degraded INTEGER NOT NULL DEFAULT 0,
    acquisition_pending INTEGER NOT NULL DEFAULT 0,
    added_at TEXT NOT NULL
);

-- One row per crawlable source with counters and the live spill range
CREATE TABLE IF NOT EXISTS crawl_states (
    source_id TEXT PRIMARY KEY,
    source_url TEXT NOT NULL,
    scope TEXT NOT NULL,
    status TEXT NOT NULL,
    max_pages INTEGER NOT NULL,
    max_depth INTEGER NOT NULL,
    visited_count INTEGER NOT NULL DEFAULT 0,
    discovered_count INTEGER NOT NULL DEFAULT 0,
    in_scope_count INTEGER NOT NULL DEFAULT 0,
    out_of_scope_count INTEGER NOT NULL DEFAULT 0,
    failed_count INTEGER NOT NULL DEFAULT 0,
    skipped_count INTEGER NOT NULL DEFAULT 0,
    spill_head INTEGER NOT NULL DEFAULT 0,
    spill_tail INTEGER NOT NULL DEFAULT 0,
    started_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- In-memory tier of each frontier, rewritten with every saved unit of work
CREATE TABLE IF NOT EXISTS crawl_frontier (
    source_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    url TEXT NOT NULL,
    depth INTEGER NOT NULL,
    fingerprint TEXT NOT NULL,
    PRIMARY KEY (source_id, position)
);

-- Overflow tier, addressed by sequence number
CREATE TABLE IF NOT EXISTS crawl_spill (
    source_id TEXT NOT NULL,
    seq INTEGER NOT NULL,
    url TEXT NOT NULL,
    depth INTEGER NOT NULL,
    fingerprint TEXT NOT NULL,
    PRIMARY KEY (source_id, seq)
);

-- Settled URLs; checksum is set only for successfully fetched pages
CREATE TABLE IF NOT EXISTS crawl_visited (
    source_id TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    checksum TEXT,
    PRIMARY KEY (source_id, fingerprint)
);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
