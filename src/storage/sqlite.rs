//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the storage traits.

use crate::state::{
    CrawlCounters, CrawlState, CrawlStatus, Frontier, FrontierEntry, MonitoringUpdate,
    SourceMonitoringRecord, UpdateFrequency,
};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{
    CrawlStateStore, RunStore, SourceRegistry, SpillStore, StorageError, StorageResult,
};
use crate::storage::{RunRecord, RunStatus};
use crate::url::{Fingerprint, ScopeKind};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

const SOURCE_COLUMNS: &str = "id, url, crawl_enabled, scope, max_pages, max_depth, frequency, \
     last_content_hash, last_etag, last_modified, last_checked, check_failures, \
     next_check_after, degraded, acquisition_pending";

const RUN_COLUMNS: &str =
    "id, mode, started_at, heartbeat_at, finished_at, config_hash, status, summary";

/// Aggregate view of the registry for the `stats` command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub total_sources: u64,
    pub pending_initial: u64,
    pub pending_acquisition: u64,
    pub due: u64,
    pub degraded: u64,
    pub crawls_in_progress: u64,
    pub crawls_completed: u64,
}

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;
        // Another process holding the write lock briefly is not an error
        conn.busy_timeout(Duration::from_secs(5))?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Counts sources and crawls by state
    pub fn registry_stats(&self, now: DateTime<Utc>) -> StorageResult<RegistryStats> {
        let count = |sql: &str| -> StorageResult<u64> {
            let n: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n.max(0) as u64)
        };

        Ok(RegistryStats {
            total_sources: count("SELECT COUNT(*) FROM sources")?,
            pending_initial: count("SELECT COUNT(*) FROM sources WHERE last_content_hash IS NULL")?,
            pending_acquisition: count(
                "SELECT COUNT(*) FROM sources WHERE last_content_hash IS NULL OR acquisition_pending = 1",
            )?,
            due: self.list_sources_due(now)?.len() as u64,
            degraded: count("SELECT COUNT(*) FROM sources WHERE degraded = 1")?,
            crawls_in_progress: count(
                "SELECT COUNT(*) FROM crawl_states WHERE status IN ('pending', 'crawling', 'paused')",
            )?,
            crawls_completed: count("SELECT COUNT(*) FROM crawl_states WHERE status = 'completed'")?,
        })
    }

    fn query_sources(
        &self,
        where_clause: &str,
    ) -> StorageResult<Vec<SourceMonitoringRecord>> {
        let sql = format!(
            "SELECT {} FROM sources {} ORDER BY added_at, id",
            SOURCE_COLUMNS, where_clause
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], SourceRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(SourceRow::into_record).collect()
    }
}

/// Raw column values of a `sources` row
struct SourceRow {
    id: String,
    url: String,
    crawl_enabled: bool,
    scope: String,
    max_pages: i64,
    max_depth: i64,
    frequency: String,
    last_content_hash: Option<String>,
    last_etag: Option<String>,
    last_modified: Option<String>,
    last_checked: Option<String>,
    check_failures: i64,
    next_check_after: Option<String>,
    degraded: bool,
    acquisition_pending: bool,
}

impl SourceRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            url: row.get(1)?,
            crawl_enabled: row.get(2)?,
            scope: row.get(3)?,
            max_pages: row.get(4)?,
            max_depth: row.get(5)?,
            frequency: row.get(6)?,
            last_content_hash: row.get(7)?,
            last_etag: row.get(8)?,
            last_modified: row.get(9)?,
            last_checked: row.get(10)?,
            check_failures: row.get(11)?,
            next_check_after: row.get(12)?,
            degraded: row.get(13)?,
            acquisition_pending: row.get(14)?,
        })
    }

    /// Validates the raw values into a typed record
    fn into_record(self) -> StorageResult<SourceMonitoringRecord> {
        let invalid = |what: &str, value: &str| {
            StorageError::Database(format!("source {} has invalid {}: {}", self.id, what, value))
        };

        let scope = ScopeKind::from_db_str(&self.scope).ok_or_else(|| invalid("scope", &self.scope))?;
        let last_checked = parse_optional_time(self.last_checked.as_deref())
            .map_err(|v| invalid("last_checked", &v))?;
        let next_check_after = parse_optional_time(self.next_check_after.as_deref())
            .map_err(|v| invalid("next_check_after", &v))?;

        Ok(SourceMonitoringRecord {
            url: self.url.clone(),
            crawl_enabled: self.crawl_enabled,
            scope,
            max_pages: clamp_u32(self.max_pages),
            max_depth: clamp_u32(self.max_depth),
            frequency: UpdateFrequency::from_db_str(&self.frequency),
            last_content_hash: self.last_content_hash.clone(),
            last_etag: self.last_etag.clone(),
            last_modified: self.last_modified.clone(),
            last_checked,
            check_failures: clamp_u32(self.check_failures),
            next_check_after,
            degraded: self.degraded,
            acquisition_pending: self.acquisition_pending,
            id: self.id,
        })
    }
}

fn clamp_u32(value: i64) -> u32 {
    value.clamp(0, u32::MAX as i64) as u32
}

fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn parse_optional_time(value: Option<&str>) -> Result<Option<DateTime<Utc>>, String> {
    match value {
        None => Ok(None),
        Some(v) => parse_time(v).map(Some).ok_or_else(|| v.to_string()),
    }
}

fn row_to_run(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        mode: row.get(1)?,
        started_at: row.get(2)?,
        heartbeat_at: row.get(3)?,
        finished_at: row.get(4)?,
        config_hash: row.get(5)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(6)?)
            .unwrap_or(RunStatus::Failed),
        summary: row.get(7)?,
    })
}

impl SourceRegistry for SqliteStorage {
    fn add_source(&mut self, record: &SourceMonitoringRecord) -> StorageResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO sources
             (id, url, crawl_enabled, scope, max_pages, max_depth, frequency, added_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.id,
                record.url,
                record.crawl_enabled,
                record.scope.to_db_str(),
                record.max_pages,
                record.max_depth,
                record.frequency.to_db_str(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(inserted == 1)
    }

    fn get_source(&self, source_id: &str) -> StorageResult<Option<SourceMonitoringRecord>> {
        let sql = format!("SELECT {} FROM sources WHERE id = ?1", SOURCE_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![source_id], SourceRow::from_row)
            .optional()?;
        row.map(SourceRow::into_record).transpose()
    }

    fn list_sources(&self) -> StorageResult<Vec<SourceMonitoringRecord>> {
        self.query_sources("")
    }

    fn list_sources_pending_initial(&self) -> StorageResult<Vec<SourceMonitoringRecord>> {
        self.query_sources("WHERE last_content_hash IS NULL")
    }

    fn list_sources_due(&self, now: DateTime<Utc>) -> StorageResult<Vec<SourceMonitoringRecord>> {
        Ok(self
            .query_sources("WHERE last_content_hash IS NOT NULL")?
            .into_iter()
            .filter(|s| s.is_due(now))
            .collect())
    }

    fn list_sources_pending_acquisition(&self) -> StorageResult<Vec<SourceMonitoringRecord>> {
        self.query_sources("WHERE last_content_hash IS NULL OR acquisition_pending = 1")
    }

    fn update_monitoring_metadata(
        &mut self,
        source_id: &str,
        update: &MonitoringUpdate,
    ) -> StorageResult<()> {
        let mut record = self
            .get_source(source_id)?
            .ok_or_else(|| StorageError::SourceNotFound(source_id.to_string()))?;
        update.apply(&mut record);

        self.conn.execute(
            "UPDATE sources SET
                last_content_hash = ?1, last_etag = ?2, last_modified = ?3, last_checked = ?4,
                check_failures = ?5, next_check_after = ?6, degraded = ?7, acquisition_pending = ?8
             WHERE id = ?9",
            params![
                record.last_content_hash,
                record.last_etag,
                record.last_modified,
                record.last_checked.map(|t| t.to_rfc3339()),
                record.check_failures,
                record.next_check_after.map(|t| t.to_rfc3339()),
                record.degraded,
                record.acquisition_pending,
                source_id,
            ],
        )?;
        Ok(())
    }
}

impl SpillStore for SqliteStorage {
    fn spill_write(
        &mut self,
        state_id: &str,
        seq: u64,
        entry: &FrontierEntry,
    ) -> StorageResult<()> {
        // Rows left behind by a crashed run may occupy this position
        self.conn.execute(
            "INSERT OR REPLACE INTO crawl_spill (source_id, seq, url, depth, fingerprint)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                state_id,
                seq as i64,
                entry.url,
                entry.depth,
                entry.fingerprint.to_hex()
            ],
        )?;
        Ok(())
    }

    fn spill_read(
        &mut self,
        state_id: &str,
        from_seq: u64,
        to_seq: u64,
    ) -> StorageResult<Vec<FrontierEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT url, depth, fingerprint FROM crawl_spill
             WHERE source_id = ?1 AND seq >= ?2 AND seq < ?3 ORDER BY seq",
        )?;
        let rows = stmt
            .query_map(params![state_id, from_seq as i64, to_seq as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(url, depth, fp)| entry_from_parts(state_id, url, depth, &fp))
            .collect()
    }
}

fn corrupt(source_id: &str, reason: impl Into<String>) -> StorageError {
    StorageError::Corrupt {
        source_id: source_id.to_string(),
        reason: reason.into(),
    }
}

fn parse_fingerprint(source_id: &str, hex: &str) -> StorageResult<Fingerprint> {
    Fingerprint::from_hex(hex).ok_or_else(|| corrupt(source_id, format!("bad fingerprint {}", hex)))
}

fn entry_from_parts(
    source_id: &str,
    url: String,
    depth: i64,
    fingerprint: &str,
) -> StorageResult<FrontierEntry> {
    let depth = u32::try_from(depth).map_err(|_| corrupt(source_id, "negative depth"))?;
    Ok(FrontierEntry {
        url,
        depth,
        fingerprint: parse_fingerprint(source_id, fingerprint)?,
    })
}

fn counter(source_id: &str, name: &str, value: i64) -> StorageResult<u32> {
    u32::try_from(value).map_err(|_| corrupt(source_id, format!("{} out of range: {}", name, value)))
}

/// Raw column values of a `crawl_states` row
struct StateRow {
    source_url: String,
    scope: String,
    status: String,
    max_pages: i64,
    max_depth: i64,
    counters: [i64; 6],
    spill_head: i64,
    spill_tail: i64,
    started_at: String,
    updated_at: String,
}

impl CrawlStateStore for SqliteStorage {
    fn load_crawl_state(
        &mut self,
        source_id: &str,
        memory_cap: usize,
    ) -> StorageResult<Option<CrawlState>> {
        let row = self
            .conn
            .query_row(
                "SELECT source_url, scope, status, max_pages, max_depth,
                        visited_count, discovered_count, in_scope_count, out_of_scope_count,
                        failed_count, skipped_count, spill_head, spill_tail, started_at, updated_at
                 FROM crawl_states WHERE source_id = ?1",
                params![source_id],
                |row| {
                    Ok(StateRow {
                        source_url: row.get(0)?,
                        scope: row.get(1)?,
                        status: row.get(2)?,
                        max_pages: row.get(3)?,
                        max_depth: row.get(4)?,
                        counters: [
                            row.get(5)?,
                            row.get(6)?,
                            row.get(7)?,
                            row.get(8)?,
                            row.get(9)?,
                            row.get(10)?,
                        ],
                        spill_head: row.get(11)?,
                        spill_tail: row.get(12)?,
                        started_at: row.get(13)?,
                        updated_at: row.get(14)?,
                    })
                },
            )
            .optional()?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status = CrawlStatus::from_db_str(&row.status)
            .ok_or_else(|| corrupt(source_id, format!("unknown status {}", row.status)))?;
        let scope = ScopeKind::from_db_str(&row.scope)
            .ok_or_else(|| corrupt(source_id, format!("unknown scope {}", row.scope)))?;
        let started_at = parse_time(&row.started_at)
            .ok_or_else(|| corrupt(source_id, "bad started_at"))?;
        let updated_at = parse_time(&row.updated_at)
            .ok_or_else(|| corrupt(source_id, "bad updated_at"))?;
        if row.spill_head < 0 || row.spill_tail < row.spill_head {
            return Err(corrupt(
                source_id,
                format!("bad spill range {}..{}", row.spill_head, row.spill_tail),
            ));
        }
        let [visited, discovered, in_scope, out_of_scope, failed, skipped] = row.counters;
        let counters = CrawlCounters {
            visited: counter(source_id, "visited", visited)?,
            discovered: counter(source_id, "discovered", discovered)?,
            in_scope: counter(source_id, "in_scope", in_scope)?,
            out_of_scope: counter(source_id, "out_of_scope", out_of_scope)?,
            failed: counter(source_id, "failed", failed)?,
            skipped: counter(source_id, "skipped", skipped)?,
        };

        // Spill rows outside the persisted range were written after the last save
        self.conn.execute(
            "DELETE FROM crawl_spill WHERE source_id = ?1 AND (seq < ?2 OR seq >= ?3)",
            params![source_id, row.spill_head, row.spill_tail],
        )?;

        let memory = {
            let mut stmt = self.conn.prepare(
                "SELECT url, depth, fingerprint FROM crawl_frontier
                 WHERE source_id = ?1 ORDER BY position",
            )?;
            let rows = stmt
                .query_map(params![source_id], |r| {
                    Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?, r.get::<_, String>(2)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|(url, depth, fp)| entry_from_parts(source_id, url, depth, &fp))
                .collect::<StorageResult<Vec<_>>>()?
        };

        let spilled = {
            let mut stmt = self.conn.prepare(
                "SELECT fingerprint FROM crawl_spill WHERE source_id = ?1 ORDER BY seq",
            )?;
            let rows = stmt
                .query_map(params![source_id], |r| r.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            rows.iter()
                .map(|fp| parse_fingerprint(source_id, fp))
                .collect::<StorageResult<Vec<_>>>()?
        };
        let expected_spill = (row.spill_tail - row.spill_head) as usize;
        if spilled.len() != expected_spill {
            return Err(corrupt(
                source_id,
                format!(
                    "spill segment has {} rows, expected {}",
                    spilled.len(),
                    expected_spill
                ),
            ));
        }

        let visited_rows = {
            let mut stmt = self.conn.prepare(
                "SELECT fingerprint, checksum FROM crawl_visited WHERE source_id = ?1",
            )?;
            let rows = stmt
                .query_map(params![source_id], |r| {
                    Ok((r.get::<_, String>(0)?, r.get::<_, Option<String>>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|(fp, checksum)| Ok((parse_fingerprint(source_id, &fp)?, checksum)))
                .collect::<StorageResult<Vec<_>>>()?
        };

        let frontier = Frontier::restore(
            source_id,
            memory_cap,
            memory,
            (row.spill_head as u64, row.spill_tail as u64),
            spilled,
        );

        Ok(Some(CrawlState::restore(
            source_id.to_string(),
            row.source_url,
            scope,
            status,
            clamp_u32(row.max_pages),
            clamp_u32(row.max_depth),
            counters,
            frontier,
            started_at,
            updated_at,
            visited_rows,
        )))
    }

    fn save_crawl_state(&mut self, state: &CrawlState) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        let (spill_head, spill_tail) = state.frontier.spill_range();
        let c = &state.counters;

        tx.execute(
            "INSERT OR REPLACE INTO crawl_states
             (source_id, source_url, scope, status, max_pages, max_depth,
              visited_count, discovered_count, in_scope_count, out_of_scope_count,
              failed_count, skipped_count, spill_head, spill_tail, started_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                state.source_id,
                state.source_url,
                state.scope.to_db_str(),
                state.status.to_db_str(),
                state.max_pages,
                state.max_depth,
                c.visited,
                c.discovered,
                c.in_scope,
                c.out_of_scope,
                c.failed,
                c.skipped,
                spill_head as i64,
                spill_tail as i64,
                state.started_at.to_rfc3339(),
                state.updated_at.to_rfc3339(),
            ],
        )?;

        tx.execute(
            "DELETE FROM crawl_frontier WHERE source_id = ?1",
            params![state.source_id],
        )?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO crawl_frontier (source_id, position, url, depth, fingerprint)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (position, entry) in state.frontier.memory_entries().enumerate() {
                insert.execute(params![
                    state.source_id,
                    position as i64,
                    entry.url,
                    entry.depth,
                    entry.fingerprint.to_hex()
                ])?;
            }

            let mut visit = tx.prepare(
                "INSERT OR REPLACE INTO crawl_visited (source_id, fingerprint, checksum)
                 VALUES (?1, ?2, ?3)",
            )?;
            for (fingerprint, checksum) in state.unsaved_visits() {
                visit.execute(params![state.source_id, fingerprint.to_hex(), checksum])?;
            }
        }

        tx.execute(
            "DELETE FROM crawl_spill WHERE source_id = ?1 AND seq < ?2",
            params![state.source_id, spill_head as i64],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn delete_crawl_state(&mut self, source_id: &str) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        for table in ["crawl_states", "crawl_frontier", "crawl_spill", "crawl_visited"] {
            tx.execute(
                &format!("DELETE FROM {} WHERE source_id = ?1", table),
                params![source_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

impl RunStore for SqliteStorage {
    fn begin_run(
        &mut self,
        mode: &str,
        config_hash: &str,
        lease: chrono::Duration,
    ) -> StorageResult<i64> {
        let now = Utc::now();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let running: Vec<(i64, String)> = {
            let mut stmt = tx.prepare("SELECT id, heartbeat_at FROM runs WHERE status = ?1")?;
            let rows = stmt
                .query_map(params![RunStatus::Running.to_db_string()], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        for (run_id, heartbeat_at) in running {
            let alive = parse_time(&heartbeat_at).is_some_and(|hb| hb + lease > now);
            if alive {
                return Err(StorageError::RunInProgress {
                    run_id,
                    heartbeat_at,
                });
            }
            tracing::warn!("Marking stale run {} as interrupted", run_id);
            tx.execute(
                "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
                params![
                    RunStatus::Interrupted.to_db_string(),
                    now.to_rfc3339(),
                    run_id
                ],
            )?;
        }

        tx.execute(
            "INSERT INTO runs (mode, started_at, heartbeat_at, config_hash, status)
             VALUES (?1, ?2, ?2, ?3, ?4)",
            params![
                mode,
                now.to_rfc3339(),
                config_hash,
                RunStatus::Running.to_db_string()
            ],
        )?;
        let run_id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(run_id)
    }

    fn heartbeat(&mut self, run_id: i64) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE runs SET heartbeat_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), run_id],
        )?;
        Ok(())
    }

    fn finish_run(&mut self, run_id: i64, status: RunStatus, summary: &str) -> StorageResult<()> {
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2, summary = ?3 WHERE id = ?4",
            params![
                status.to_db_string(),
                Utc::now().to_rfc3339(),
                summary,
                run_id
            ],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        let sql = format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS);
        self.conn
            .query_row(&sql, params![run_id], row_to_run)
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn recent_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>> {
        let sql = format!("SELECT {} FROM runs ORDER BY id DESC LIMIT ?1", RUN_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let runs = stmt
            .query_map(params![limit as i64], row_to_run)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url::normalize_url;
    use chrono::Duration as ChronoDuration;

    fn source(url: &str) -> SourceMonitoringRecord {
        SourceMonitoringRecord::new(url, ScopeKind::Path, UpdateFrequency::Daily, 50, 3).unwrap()
    }

    #[test]
    fn test_create_in_memory() {
        assert!(SqliteStorage::new_in_memory().is_ok());
    }

    #[test]
    fn test_add_source_is_idempotent() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let record = source("https://example.com/docs/");
        assert!(storage.add_source(&record).unwrap());
        assert!(!storage.add_source(&record).unwrap());

        let loaded = storage.get_source(&record.id).unwrap().unwrap();
        assert_eq!(loaded, record);
        assert!(storage.get_source("missing").unwrap().is_none());
    }

    #[test]
    fn test_pending_and_due_lists() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let fresh = source("https://a.example.com/");
        let due = source("https://b.example.com/");
        let later = source("https://c.example.com/");
        for r in [&fresh, &due, &later] {
            storage.add_source(r).unwrap();
        }

        let now = Utc::now();
        storage
            .update_monitoring_metadata(
                &due.id,
                &MonitoringUpdate {
                    last_content_hash: Some("h1".to_string()),
                    next_check_after: Some(now - ChronoDuration::hours(1)),
                    ..Default::default()
                },
            )
            .unwrap();
        storage
            .update_monitoring_metadata(
                &later.id,
                &MonitoringUpdate {
                    last_content_hash: Some("h2".to_string()),
                    next_check_after: Some(now + ChronoDuration::hours(1)),
                    acquisition_pending: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();

        let pending: Vec<String> = storage
            .list_sources_pending_initial()
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(pending, vec![fresh.id.clone()]);

        let due_ids: Vec<String> = storage
            .list_sources_due(now)
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(due_ids, vec![due.id.clone()]);

        let acquisition: Vec<String> = storage
            .list_sources_pending_acquisition()
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert!(acquisition.contains(&fresh.id));
        assert!(acquisition.contains(&later.id));
        assert!(!acquisition.contains(&due.id));
    }

    #[test]
    fn test_update_unknown_source() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let result = storage.update_monitoring_metadata("nope", &MonitoringUpdate::default());
        assert!(matches!(result, Err(StorageError::SourceNotFound(_))));
    }

    #[test]
    fn test_crawl_state_roundtrip_with_spill() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let record = source("https://example.com/docs/");
        let mut state = CrawlState::new(&record, 2).unwrap();

        let seed = state.next_entry(&mut storage).unwrap().unwrap();
        state.record_visit(seed.fingerprint, "seed-checksum".to_string());
        for i in 0..5 {
            let url = normalize_url(&format!("https://example.com/docs/p{}", i)).unwrap();
            state.enqueue(&url, 1, &mut storage).unwrap();
        }
        state.counters.discovered = 5;
        state.counters.in_scope = 5;
        state.status = CrawlStatus::Paused;
        storage.save_crawl_state(&state).unwrap();
        state.mark_saved();

        let mut loaded = storage.load_crawl_state(&record.id, 2).unwrap().unwrap();
        assert_eq!(loaded.status, CrawlStatus::Paused);
        assert_eq!(loaded.counters, state.counters);
        assert_eq!(loaded.frontier.len(), 5);
        assert!(loaded.is_visited(&seed.fingerprint));
        assert_eq!(loaded.aggregate_hash(), state.aggregate_hash());

        let mut urls = Vec::new();
        while let Some(e) = loaded.next_entry(&mut storage).unwrap() {
            urls.push(e.url);
        }
        let expected: Vec<String> = (0..5)
            .map(|i| format!("https://example.com/docs/p{}", i))
            .collect();
        assert_eq!(urls, expected);
    }

    #[test]
    fn test_unsaved_spill_rows_are_discarded_on_load() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let record = source("https://example.com/docs/");
        let mut state = CrawlState::new(&record, 1).unwrap();
        storage.save_crawl_state(&state).unwrap();

        // Spill written after the last save, as if the process died mid-unit
        let url = normalize_url("https://example.com/docs/orphan").unwrap();
        state.enqueue(&url, 1, &mut storage).unwrap();

        let loaded = storage.load_crawl_state(&record.id, 1).unwrap().unwrap();
        assert_eq!(loaded.frontier.len(), 1);
        let orphans: i64 = storage
            .conn
            .query_row("SELECT COUNT(*) FROM crawl_spill", [], |r| r.get(0))
            .unwrap();
        assert_eq!(orphans, 0);
    }

    #[test]
    fn test_corrupt_state_is_reported() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let record = source("https://example.com/docs/");
        let state = CrawlState::new(&record, 10).unwrap();
        storage.save_crawl_state(&state).unwrap();
        storage
            .conn
            .execute("UPDATE crawl_states SET status = 'exploded'", [])
            .unwrap();

        let result = storage.load_crawl_state(&record.id, 10);
        assert!(matches!(result, Err(StorageError::Corrupt { .. })));

        storage.delete_crawl_state(&record.id).unwrap();
        assert!(storage.load_crawl_state(&record.id, 10).unwrap().is_none());
    }

    #[test]
    fn test_run_lock() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let lease = ChronoDuration::minutes(15);
        let first = storage.begin_run("check", "hash", lease).unwrap();

        let second = storage.begin_run("check", "hash", lease);
        assert!(matches!(second, Err(StorageError::RunInProgress { run_id, .. }) if run_id == first));

        storage.finish_run(first, RunStatus::Completed, "{}").unwrap();
        let third = storage.begin_run("full", "hash", lease).unwrap();
        assert_ne!(first, third);
        assert_eq!(storage.get_run(first).unwrap().status, RunStatus::Completed);
    }

    #[test]
    fn test_stale_run_is_marked_interrupted() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let first = storage
            .begin_run("acquire", "hash", ChronoDuration::minutes(15))
            .unwrap();

        let second = storage
            .begin_run("acquire", "hash", ChronoDuration::zero())
            .unwrap();
        assert_eq!(
            storage.get_run(first).unwrap().status,
            RunStatus::Interrupted
        );
        assert_eq!(storage.recent_runs(1).unwrap()[0].id, second);
    }

    #[test]
    fn test_registry_stats() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage.add_source(&source("https://a.example.com/")).unwrap();
        storage.add_source(&source("https://b.example.com/")).unwrap();

        let stats = storage.registry_stats(Utc::now()).unwrap();
        assert_eq!(stats.total_sources, 2);
        assert_eq!(stats.pending_initial, 2);
        assert_eq!(stats.due, 0);
    }
}
