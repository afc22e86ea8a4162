//! Per-source processing
//!
//! A `Worker` holds everything one run shares between its domain lanes. Each
//! lane walks its sources serially; within a source the work is detection,
//! acquisition, or detection followed by acquisition, and the outcome is
//! written back to the registry before the next source starts.

use crate::config::CrawlConfig;
use crate::crawler::{CrawlSession, FetchedPage, Fetcher, SeedValidators};
use crate::detector::{ChangeDetector, DetectionOutcome};
use crate::pipeline::result::RunTally;
use crate::pipeline::{ContentParser, RunMode};
use crate::robots::RobotsGate;
use crate::scheduler::{is_degraded, jitter, next_check_after, DomainLane, SchedulerHandle, WorkItem, WorkKind};
use crate::state::{CrawlState, CrawlStatus, MonitoringUpdate, SourceMonitoringRecord};
use crate::storage::{
    lock_storage, CrawlStateStore, RunStore, SharedStorage, SourceRegistry, StorageError,
};
use crate::url::{domain_key, normalize_url, Fingerprint};
use crate::Result;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use url::Url;

pub(crate) struct Worker {
    pub fetcher: Fetcher,
    pub robots: RobotsGate,
    pub scheduler: SchedulerHandle,
    pub parser: Arc<dyn ContentParser>,
    pub storage: SharedStorage,
    pub shutdown: watch::Receiver<bool>,
    pub mode: RunMode,
    pub dry_run: bool,
    pub run_id: Option<i64>,
    pub crawl: CrawlConfig,
    pub allow_body_fetch: bool,
    pub jitter_minutes: u32,
}

impl Worker {
    /// Processes a domain's sources in order, isolating per-source failures
    pub async fn run_lane(&self, lane: DomainLane) -> RunTally {
        let mut tally = RunTally::default();
        let total = lane.items.len();

        for (done, item) in lane.items.into_iter().enumerate() {
            if *self.shutdown.borrow() {
                tracing::info!(
                    "Shutdown requested, leaving {} sources of {} for a later run",
                    total - done,
                    lane.domain
                );
                break;
            }

            let source_id = item.source.id.clone();
            match self.process(item).await {
                Ok(source_tally) => tally.merge(&source_tally),
                Err(e) => {
                    tracing::error!("Processing source {} failed: {}", source_id, e);
                    tally.failures += 1;
                }
            }
            self.heartbeat();
        }

        tally
    }

    async fn process(&self, item: WorkItem) -> Result<RunTally> {
        tracing::debug!("Processing {} ({:?})", item.source.url, item.kind);
        match item.kind {
            WorkKind::Check => self.check(&item.source).await,
            WorkKind::Initial | WorkKind::Acquire => self.acquire(&item.source, None).await,
        }
    }

    /// Runs change detection and records its outcome
    async fn check(&self, source: &SourceMonitoringRecord) -> Result<RunTally> {
        let mut tally = RunTally {
            sources_checked: 1,
            ..Default::default()
        };

        let baseline = if self.dry_run {
            None
        } else {
            self.seed_checksum(source)?
        };
        let detector = ChangeDetector::new(
            &self.fetcher,
            &self.scheduler,
            self.parser.as_ref(),
            self.allow_body_fetch && !self.dry_run,
        );
        let detection = detector.detect(source, baseline.as_deref()).await;
        if detection.page.is_some() {
            tally.pages_fetched += 1;
        }

        let result = detection.result;
        let method = result.method.map(|m| m.as_str()).unwrap_or("none");
        match result.outcome {
            DetectionOutcome::Unchanged => {
                tracing::info!("{} unchanged ({})", source.url, method);
                tally.unchanged += 1;
                let mut update = self.success_update(source, None, result.etag, result.last_modified);
                // An unchanged source keeps whatever acquisition it still owes
                update.acquisition_pending = None;
                self.write_metadata(source, &update)?;
            }
            DetectionOutcome::Changed => {
                tracing::info!("{} changed ({})", source.url, method);
                tally.changes_detected += 1;
                if self.mode == RunMode::Full {
                    let acquired = self.acquire(source, detection.page).await?;
                    tally.merge(&acquired);
                } else {
                    let now = Utc::now();
                    let update = MonitoringUpdate {
                        last_checked: Some(now),
                        check_failures: Some(0),
                        degraded: Some(false),
                        next_check_after: Some(self.next_check(source, now, 0)),
                        acquisition_pending: Some(true),
                        ..Default::default()
                    };
                    self.write_metadata(source, &update)?;
                }
            }
            DetectionOutcome::Unknown => {
                tracing::info!("{} not checked this run", source.url);
                tally.deferred += 1;
            }
            DetectionOutcome::Error => {
                tally.failures += 1;
                self.record_failure(source)?;
            }
        }

        Ok(tally)
    }

    /// Stored checksum of a crawled source's own page
    ///
    /// Crawled sources store an aggregate hash over all pages, which a single
    /// page retrieval cannot reproduce; the seed page's checksum is the
    /// comparable value.
    fn seed_checksum(&self, source: &SourceMonitoringRecord) -> Result<Option<String>> {
        if !source.crawl_enabled {
            return Ok(None);
        }
        let loaded = {
            let mut storage = lock_storage(&self.storage)?;
            storage.load_crawl_state(&source.id, self.crawl.frontier_memory_cap)
        };
        let state = match loaded {
            Ok(state) => state,
            Err(StorageError::Corrupt { reason, .. }) => {
                tracing::warn!("Ignoring corrupt crawl state of {}: {}", source.id, reason);
                None
            }
            Err(e) => return Err(e.into()),
        };
        let seed = Fingerprint::of_url(&normalize_url(&source.url)?);
        Ok(state.and_then(|s| s.page_checksum(&seed).map(str::to_string)))
    }

    /// Retrieves a source, crawling it when crawling is enabled
    ///
    /// `prefetched` is a page already retrieved by change detection.
    async fn acquire(
        &self,
        source: &SourceMonitoringRecord,
        prefetched: Option<FetchedPage>,
    ) -> Result<RunTally> {
        let url = normalize_url(&source.url)?;

        if self.dry_run {
            let mut tally = RunTally::default();
            let allowed = self.robots.allowed(&url, &self.scheduler).await;
            tracing::info!(
                "[dry run] would {} {}{}",
                if source.crawl_enabled { "crawl" } else { "fetch" },
                url,
                if allowed { "" } else { " (disallowed by robots.txt)" }
            );
            if !allowed {
                tally.skipped += 1;
            }
            return Ok(tally);
        }

        if source.crawl_enabled {
            self.crawl(source).await
        } else {
            self.fetch_single(source, &url, prefetched).await
        }
    }

    async fn fetch_single(
        &self,
        source: &SourceMonitoringRecord,
        url: &Url,
        prefetched: Option<FetchedPage>,
    ) -> Result<RunTally> {
        let mut tally = RunTally::default();

        if !self.robots.allowed(url, &self.scheduler).await {
            tally.skipped += 1;
            return Ok(tally);
        }

        let page = match prefetched {
            Some(page) => page,
            None => {
                if self.scheduler.acquire(&domain_key(url)).await.is_err() {
                    tally.deferred += 1;
                    return Ok(tally);
                }
                match self.fetcher.fetch(url).await {
                    Ok(page) => {
                        tally.pages_fetched += 1;
                        page
                    }
                    Err(failure) => {
                        tracing::warn!("Failed to fetch {}: {}", url, failure);
                        tally.pages_failed += 1;
                        tally.failures += 1;
                        self.record_failure(source)?;
                        return Ok(tally);
                    }
                }
            }
        };

        match self
            .parser
            .parse(&page.body, page.content_type.as_deref(), &page.final_url)
        {
            Ok(parsed) => {
                let update =
                    self.success_update(source, Some(parsed.checksum), page.etag, page.last_modified);
                self.write_metadata(source, &update)?;
                self.count_acquisition(source, &mut tally);
            }
            Err(reason) => {
                tracing::warn!("Content parser rejected {}: {}", url, reason);
                tally.failures += 1;
                self.record_failure(source)?;
            }
        }
        Ok(tally)
    }

    /// Loads, resumes or restarts the source's crawl and runs one session
    async fn crawl(&self, source: &SourceMonitoringRecord) -> Result<RunTally> {
        let mut tally = RunTally::default();
        let mut state = self.crawl_state_for(source)?;

        let session = CrawlSession {
            fetcher: &self.fetcher,
            robots: &self.robots,
            scheduler: &self.scheduler,
            parser: self.parser.as_ref(),
            storage: &self.storage,
            shutdown: &self.shutdown,
            page_budget: self.crawl.pages_per_run,
            run_id: self.run_id,
        };
        let report = session.run(&mut state).await?;

        tally.pages_fetched += report.pages_fetched;
        tally.pages_failed += report.failures;
        tally.skipped += report.skipped;

        match report.status() {
            CrawlStatus::Completed => match state.aggregate_hash() {
                Some(hash) => {
                    let SeedValidators {
                        etag,
                        last_modified,
                    } = report.seed.unwrap_or_default();
                    let update = self.success_update(source, Some(hash), etag, last_modified);
                    self.write_metadata(source, &update)?;
                    self.count_acquisition(source, &mut tally);
                }
                None if report.failures > 0 => {
                    tally.failures += 1;
                    self.record_failure(source)?;
                }
                None => {
                    tracing::info!("Crawl of {} completed without any fetchable page", source.url);
                }
            },
            _ if report.pages_fetched == 0 && report.failures > 0 => {
                tally.failures += 1;
                self.record_failure(source)?;
            }
            _ => {
                let mut update = MonitoringUpdate {
                    acquisition_pending: Some(true),
                    ..Default::default()
                };
                if report.pages_fetched > 0 {
                    update.check_failures = Some(0);
                    update.degraded = Some(false);
                }
                self.write_metadata(source, &update)?;
                tally.deferred += 1;
            }
        }

        Ok(tally)
    }

    /// Picks the crawl state to work on
    ///
    /// Unfinished crawls resume. A completed crawl is started over, since
    /// the source is only acquired again after a change. Unreadable state is
    /// discarded and replaced with a fresh crawl.
    fn crawl_state_for(&self, source: &SourceMonitoringRecord) -> Result<CrawlState> {
        let cap = self.crawl.frontier_memory_cap;
        let mut storage = lock_storage(&self.storage)?;

        let existing = match storage.load_crawl_state(&source.id, cap) {
            Ok(existing) => existing,
            Err(StorageError::Corrupt { reason, .. }) => {
                tracing::error!(
                    "Crawl state of {} is corrupt ({}); starting a fresh crawl",
                    source.id,
                    reason
                );
                storage.delete_crawl_state(&source.id)?;
                None
            }
            Err(e) => return Err(e.into()),
        };

        match existing {
            Some(state) if state.status.is_resumable() => {
                tracing::info!(
                    "Resuming crawl of {} ({} visited, {} queued)",
                    source.url,
                    state.visited_count(),
                    state.frontier.len()
                );
                Ok(state)
            }
            Some(_) => {
                tracing::info!("Restarting completed crawl of {}", source.url);
                storage.delete_crawl_state(&source.id)?;
                Ok(CrawlState::new(source, cap)?)
            }
            None => Ok(CrawlState::new(source, cap)?),
        }
    }

    fn count_acquisition(&self, source: &SourceMonitoringRecord, tally: &mut RunTally) {
        tally.acquisitions += 1;
        if source.is_pending_initial() {
            tally.initial_acquisitions += 1;
        }
    }

    fn success_update(
        &self,
        source: &SourceMonitoringRecord,
        content_hash: Option<String>,
        etag: Option<String>,
        last_modified: Option<String>,
    ) -> MonitoringUpdate {
        let now = Utc::now();
        MonitoringUpdate {
            last_content_hash: content_hash,
            last_etag: etag,
            last_modified,
            last_checked: Some(now),
            check_failures: Some(0),
            next_check_after: Some(self.next_check(source, now, 0)),
            degraded: Some(false),
            acquisition_pending: Some(false),
        }
    }

    /// Counts a failed check or acquisition and backs the source off
    fn record_failure(&self, source: &SourceMonitoringRecord) -> Result<()> {
        let now = Utc::now();
        let failures = source.check_failures.saturating_add(1);
        let degraded = is_degraded(failures);
        if degraded && !source.degraded {
            tracing::warn!("{} marked degraded after {} consecutive failures", source.url, failures);
        }
        let next = self.next_check(source, now, failures);
        tracing::info!("Backing off {} until {} ({} failures)", source.url, next, failures);

        let update = MonitoringUpdate {
            last_checked: Some(now),
            check_failures: Some(failures),
            next_check_after: Some(next),
            degraded: Some(degraded),
            ..Default::default()
        };
        self.write_metadata(source, &update)
    }

    fn next_check(
        &self,
        source: &SourceMonitoringRecord,
        now: chrono::DateTime<Utc>,
        failures: u32,
    ) -> chrono::DateTime<Utc> {
        let offset = jitter(&mut rand::rng(), self.jitter_minutes);
        next_check_after(now, source.frequency.base_interval(), failures, offset)
    }

    fn write_metadata(&self, source: &SourceMonitoringRecord, update: &MonitoringUpdate) -> Result<()> {
        if self.dry_run {
            tracing::debug!("[dry run] not writing metadata for {}: {:?}", source.id, update);
            return Ok(());
        }
        lock_storage(&self.storage)?.update_monitoring_metadata(&source.id, update)?;
        Ok(())
    }

    fn heartbeat(&self) {
        let Some(run_id) = self.run_id else {
            return;
        };
        let result = lock_storage(&self.storage).and_then(|mut s| s.heartbeat(run_id));
        if let Err(e) = result {
            tracing::warn!("Failed to refresh heartbeat of run {}: {}", run_id, e);
        }
    }
}
