//! Multi-page crawl of one source
//!
//! A session drives one `CrawlState` forward until its frontier is empty, its
//! page cap is hit, the run's page budget for it is spent, or shutdown is
//! requested. Each popped entry is one unit of work and the state is saved
//! after every unit, so an interruption loses at most the fetch in flight.
//! Saving a unit also refreshes the run's heartbeat, keeping the run lock
//! alive through crawls longer than the lease.

use crate::crawler::{extract_links, is_html, FetchedPage, Fetcher};
use crate::pipeline::ContentParser;
use crate::robots::RobotsGate;
use crate::scheduler::SchedulerHandle;
use crate::state::{CrawlState, CrawlStatus, EnqueueOutcome, FrontierEntry};
use crate::storage::{lock_storage, CrawlStateStore, RunStore, SharedStorage, StorageResult};
use crate::url::{domain_key, is_in_scope, normalize_url};
use tokio::sync::watch;
use url::Url;

/// Why a session stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    FrontierEmpty,
    PageCapReached,
    PageBudgetSpent,
    RequestBudgetSpent,
    Shutdown,
}

impl StopReason {
    /// Status the crawl state is left in
    pub fn status(&self) -> CrawlStatus {
        match self {
            Self::FrontierEmpty | Self::PageCapReached => CrawlStatus::Completed,
            _ => CrawlStatus::Paused,
        }
    }
}

/// Validators from the seed page, when it was fetched in this session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedValidators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// Tallies for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub stop: StopReason,
    /// Pages fetched successfully
    pub pages_fetched: u32,
    /// Fetch attempts that failed
    pub failures: u32,
    /// Entries skipped by robots policy
    pub skipped: u32,
    pub seed: Option<SeedValidators>,
}

impl SessionReport {
    pub fn status(&self) -> CrawlStatus {
        self.stop.status()
    }
}

/// Collaborators shared by every session of a run
pub struct CrawlSession<'a> {
    pub fetcher: &'a Fetcher,
    pub robots: &'a RobotsGate,
    pub scheduler: &'a SchedulerHandle,
    pub parser: &'a dyn ContentParser,
    pub storage: &'a SharedStorage,
    pub shutdown: &'a watch::Receiver<bool>,
    /// Fetch attempts allowed for this source in this run
    pub page_budget: u32,
    /// Run whose heartbeat is refreshed with every saved unit
    pub run_id: Option<i64>,
}

impl<'a> CrawlSession<'a> {
    /// Runs the crawl until it completes or pauses
    ///
    /// # Returns
    ///
    /// * `Ok(SessionReport)` - The session stopped normally; the state has
    ///   been saved with its final status
    /// * `Err(StorageError)` - Progress could not be persisted; the session
    ///   stops at the last saved unit
    pub async fn run(&self, state: &mut CrawlState) -> StorageResult<SessionReport> {
        let source_url = match state.source() {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("Crawl state {} has an invalid source URL: {}", state.source_id, e);
                return self.finish(state, StopReason::FrontierEmpty, 0, 0, 0, None);
            }
        };

        state.status = CrawlStatus::Crawling;
        let mut attempts = 0u32;
        let mut pages_fetched = 0u32;
        let mut failures = 0u32;
        let mut skipped = 0u32;
        let mut seed: Option<SeedValidators> = None;

        let stop = loop {
            if *self.shutdown.borrow() {
                break StopReason::Shutdown;
            }
            if state.page_cap_reached() {
                break StopReason::PageCapReached;
            }
            if attempts >= self.page_budget {
                break StopReason::PageBudgetSpent;
            }

            let entry = {
                let mut storage = lock_storage(self.storage)?;
                state.next_entry(&mut *storage)?
            };
            let Some(entry) = entry else {
                break StopReason::FrontierEmpty;
            };

            let url = match normalize_url(&entry.url) {
                Ok(url) if is_in_scope(&url, &source_url, state.scope) => url,
                _ => {
                    tracing::debug!("Dropping out-of-scope frontier entry {}", entry.url);
                    state.counters.out_of_scope += 1;
                    state.record_settled(entry.fingerprint);
                    self.persist(state)?;
                    continue;
                }
            };

            if !self.robots.allowed(&url, self.scheduler).await {
                state.counters.skipped += 1;
                skipped += 1;
                state.record_settled(entry.fingerprint);
                self.persist(state)?;
                continue;
            }

            if self.scheduler.acquire(&domain_key(&url)).await.is_err() {
                state.requeue(entry);
                break StopReason::RequestBudgetSpent;
            }

            attempts += 1;
            match self.fetcher.fetch(&url).await {
                Ok(page) => match self.parser.parse(&page.body, page.content_type.as_deref(), &url) {
                    Ok(parsed) => {
                        state.record_visit(entry.fingerprint, parsed.checksum);
                        pages_fetched += 1;
                        if entry.depth == 0 {
                            seed = Some(SeedValidators {
                                etag: page.etag.clone(),
                                last_modified: page.last_modified.clone(),
                            });
                        }
                        self.discover(state, &source_url, &entry, &page)?;
                    }
                    Err(reason) => {
                        tracing::warn!("Content parser rejected {}: {}", url, reason);
                        state.counters.failed += 1;
                        failures += 1;
                        state.record_settled(entry.fingerprint);
                    }
                },
                Err(failure) => {
                    tracing::warn!("Failed to fetch {}: {}", url, failure);
                    state.counters.failed += 1;
                    failures += 1;
                    state.record_settled(entry.fingerprint);
                }
            }

            self.persist(state)?;
        };

        tracing::info!(
            "Crawl {} stopped ({:?}): {} fetched this run, {} total, {} queued",
            state.source_id,
            stop,
            pages_fetched,
            state.visited_count(),
            state.frontier.len()
        );
        self.finish(state, stop, pages_fetched, failures, skipped, seed)
    }

    /// Enqueues in-scope links of a fetched page at depth + 1
    fn discover(
        &self,
        state: &mut CrawlState,
        source_url: &Url,
        entry: &FrontierEntry,
        page: &FetchedPage,
    ) -> StorageResult<()> {
        if !is_html(page.content_type.as_deref()) {
            return Ok(());
        }

        let links = extract_links(&page.body, &page.final_url);
        let mut storage = lock_storage(self.storage)?;
        for link in links {
            state.counters.discovered += 1;
            let Ok(url) = normalize_url(&link) else {
                continue;
            };
            if !is_in_scope(&url, source_url, state.scope) {
                state.counters.out_of_scope += 1;
                continue;
            }
            match state.enqueue(&url, entry.depth + 1, &mut *storage)? {
                EnqueueOutcome::Enqueued => state.counters.in_scope += 1,
                EnqueueOutcome::TooDeep => state.counters.out_of_scope += 1,
                EnqueueOutcome::AlreadyVisited | EnqueueOutcome::AlreadyQueued => {}
            }
        }
        Ok(())
    }

    fn persist(&self, state: &mut CrawlState) -> StorageResult<()> {
        state.touch();
        let mut storage = lock_storage(self.storage)?;
        storage.save_crawl_state(state)?;
        if let Some(run_id) = self.run_id {
            storage.heartbeat(run_id)?;
        }
        state.mark_saved();
        Ok(())
    }

    fn finish(
        &self,
        state: &mut CrawlState,
        stop: StopReason,
        pages_fetched: u32,
        failures: u32,
        skipped: u32,
        seed: Option<SeedValidators>,
    ) -> StorageResult<SessionReport> {
        state.status = stop.status();
        self.persist(state)?;
        Ok(SessionReport {
            stop,
            pages_fetched,
            failures,
            skipped,
            seed,
        })
    }
}
