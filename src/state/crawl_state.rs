use crate::state::frontier::{Frontier, FrontierEntry};
use crate::state::source::SourceMonitoringRecord;
use crate::storage::{SpillStore, StorageResult};
use crate::url::{normalize_url, Fingerprint, ScopeKind};
use crate::UrlResult;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use url::Url;

/// Lifecycle of a crawl
///
/// `Pending` → `Crawling` → `Paused` (resumable next run) | `Completed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlStatus {
    Pending,
    Crawling,
    Paused,
    Completed,
}

impl CrawlStatus {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Crawling => "crawling",
            Self::Paused => "paused",
            Self::Completed => "completed",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "crawling" => Some(Self::Crawling),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    /// A crawl in this status will continue when next scheduled
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Pending | Self::Crawling | Self::Paused)
    }
}

/// Running tallies for one crawl
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlCounters {
    /// Pages fetched successfully
    pub visited: u32,
    /// Links seen on fetched pages
    pub discovered: u32,
    /// Links accepted into the frontier
    pub in_scope: u32,
    /// Links or entries rejected by scope or depth
    pub out_of_scope: u32,
    /// Fetches that failed
    pub failed: u32,
    /// Entries skipped by robots policy
    pub skipped: u32,
}

/// What happened to a URL offered to the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    AlreadyVisited,
    AlreadyQueued,
    TooDeep,
}

/// Durable progress of a multi-page crawl for one source
///
/// Visits made since the last save are tracked separately so that persisting
/// a unit of work writes only what changed.
#[derive(Debug, Clone)]
pub struct CrawlState {
    /// Same key as the source record
    pub source_id: String,
    pub source_url: String,
    pub scope: ScopeKind,
    pub status: CrawlStatus,
    pub max_pages: u32,
    pub max_depth: u32,
    pub counters: CrawlCounters,
    pub frontier: Frontier,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    visited: HashSet<Fingerprint>,
    page_checksums: HashMap<Fingerprint, String>,
    unsaved_visits: Vec<(Fingerprint, Option<String>)>,
}

impl CrawlState {
    /// Creates a fresh crawl seeded with the source URL at depth 0
    pub fn new(source: &SourceMonitoringRecord, memory_cap: usize) -> UrlResult<Self> {
        let seed = normalize_url(&source.url)?;
        let now = Utc::now();
        let mut frontier = Frontier::new(&source.id, memory_cap);
        frontier.push_front(FrontierEntry::new(&seed, 0));

        Ok(Self {
            source_id: source.id.clone(),
            source_url: seed.to_string(),
            scope: source.scope,
            status: CrawlStatus::Pending,
            max_pages: source.max_pages,
            max_depth: source.max_depth,
            counters: CrawlCounters::default(),
            frontier,
            started_at: now,
            updated_at: now,
            visited: HashSet::new(),
            page_checksums: HashMap::new(),
            unsaved_visits: Vec::new(),
        })
    }

    /// Reassembles a state loaded from storage
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        source_id: String,
        source_url: String,
        scope: ScopeKind,
        status: CrawlStatus,
        max_pages: u32,
        max_depth: u32,
        counters: CrawlCounters,
        frontier: Frontier,
        started_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        visited: Vec<(Fingerprint, Option<String>)>,
    ) -> Self {
        let mut page_checksums = HashMap::new();
        let mut visited_set = HashSet::with_capacity(visited.len());
        for (fp, checksum) in visited {
            visited_set.insert(fp);
            if let Some(c) = checksum {
                page_checksums.insert(fp, c);
            }
        }
        Self {
            source_id,
            source_url,
            scope,
            status,
            max_pages,
            max_depth,
            counters,
            frontier,
            started_at,
            updated_at,
            visited: visited_set,
            page_checksums,
            unsaved_visits: Vec::new(),
        }
    }

    /// Parsed source URL, the anchor for scope checks
    pub fn source(&self) -> UrlResult<Url> {
        normalize_url(&self.source_url)
    }

    pub fn is_visited(&self, fingerprint: &Fingerprint) -> bool {
        self.visited.contains(fingerprint)
    }

    pub fn visited_len(&self) -> usize {
        self.visited.len()
    }

    /// Offers a normalized URL to the frontier
    ///
    /// Visited or already queued URLs are ignored, and so are URLs deeper than
    /// `max_depth`, so no frontier entry ever exceeds the depth cap.
    pub fn enqueue<S: SpillStore + ?Sized>(
        &mut self,
        url: &Url,
        depth: u32,
        store: &mut S,
    ) -> StorageResult<EnqueueOutcome> {
        if depth > self.max_depth {
            return Ok(EnqueueOutcome::TooDeep);
        }
        let entry = FrontierEntry::new(url, depth);
        if self.visited.contains(&entry.fingerprint) {
            return Ok(EnqueueOutcome::AlreadyVisited);
        }
        if self.frontier.push(entry, store)? {
            Ok(EnqueueOutcome::Enqueued)
        } else {
            Ok(EnqueueOutcome::AlreadyQueued)
        }
    }

    /// Pops the next frontier entry, skipping any that were visited meanwhile
    pub fn next_entry<S: SpillStore + ?Sized>(
        &mut self,
        store: &mut S,
    ) -> StorageResult<Option<FrontierEntry>> {
        while let Some(entry) = self.frontier.pop(store)? {
            if !self.visited.contains(&entry.fingerprint) {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Records a successfully fetched page
    pub fn record_visit(&mut self, fingerprint: Fingerprint, checksum: String) {
        if self.visited.insert(fingerprint) {
            self.counters.visited += 1;
            self.page_checksums.insert(fingerprint, checksum.clone());
            self.unsaved_visits.push((fingerprint, Some(checksum)));
        }
    }

    /// Marks a URL as settled without counting it as a visit
    ///
    /// Used for robots-skipped and failed entries so they are not retried
    /// within this crawl.
    pub fn record_settled(&mut self, fingerprint: Fingerprint) {
        if self.visited.insert(fingerprint) {
            self.unsaved_visits.push((fingerprint, None));
        }
    }

    /// Puts an entry that was popped but not processed back at the head
    pub fn requeue(&mut self, entry: FrontierEntry) {
        self.frontier.push_front(entry);
    }

    /// Checksum recorded for a fetched page of this crawl
    pub fn page_checksum(&self, fingerprint: &Fingerprint) -> Option<&str> {
        self.page_checksums.get(fingerprint).map(String::as_str)
    }

    /// Visits recorded since the last successful save
    pub fn unsaved_visits(&self) -> &[(Fingerprint, Option<String>)] {
        &self.unsaved_visits
    }

    /// Called once the state has been persisted
    pub fn mark_saved(&mut self) {
        self.unsaved_visits.clear();
    }

    /// Number of pages fetched successfully so far
    pub fn visited_count(&self) -> u32 {
        self.counters.visited
    }

    pub fn page_cap_reached(&self) -> bool {
        self.counters.visited >= self.max_pages
    }

    /// Combined fingerprint of every page fetched by this crawl
    ///
    /// SHA-256 over the sorted page checksums, so the value does not depend on
    /// the order pages were visited in. `None` before any page was fetched.
    pub fn aggregate_hash(&self) -> Option<String> {
        if self.page_checksums.is_empty() {
            return None;
        }
        let mut sorted: Vec<&String> = self.page_checksums.values().collect();
        sorted.sort();
        let mut hasher = Sha256::new();
        for checksum in &sorted {
            hasher.update(checksum.as_bytes());
        }
        Some(hex::encode(hasher.finalize()))
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
