//! Top-level run control
//!
//! The runner takes the run lock, collects candidate sources from the
//! registry, plans a domain-fair work order, and dispatches one task per
//! domain lane with at most `politeness.workers` lanes active at once.

use crate::config::Config;
use crate::crawler::Fetcher;
use crate::pipeline::result::RunTally;
use crate::pipeline::worker::Worker;
use crate::pipeline::{ChecksumParser, ContentParser, PipelineRunResult, RunMode, RunOptions};
use crate::robots::RobotsGate;
use crate::scheduler::{into_lanes, plan_work, SchedulerContext, SchedulerHandle, WorkItem, WorkKind};
use crate::state::SourceMonitoringRecord;
use crate::storage::{lock_storage, RunStatus, RunStore, SharedStorage, SourceRegistry, SqliteStorage};
use crate::{Result, SentinelError};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

/// How long a run may go without a heartbeat before its lock is considered stale
const RUN_LEASE_MINUTES: i64 = 15;

/// Composes scheduling, detection and crawling into runs
pub struct PipelineRunner {
    config: Config,
    config_hash: String,
    storage: SharedStorage,
    fetcher: Fetcher,
    parser: Arc<dyn ContentParser>,
    shutdown: watch::Receiver<bool>,
}

impl PipelineRunner {
    /// Creates a runner over an opened storage
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration
    /// * `config_hash` - Recorded on every run row
    /// * `storage` - Registry and crawl state store
    ///
    /// # Returns
    ///
    /// * `Ok(PipelineRunner)` - Ready to run
    /// * `Err(SentinelError)` - The HTTP client could not be built
    pub fn new(config: Config, config_hash: String, storage: SqliteStorage) -> Result<Self> {
        let fetcher = Fetcher::new(&config.user_agent, &config.fetcher)?;
        let (_, shutdown) = watch::channel(false);
        Ok(Self {
            config,
            config_hash,
            storage: Arc::new(Mutex::new(storage)),
            fetcher,
            parser: Arc::new(ChecksumParser),
            shutdown,
        })
    }

    /// Replaces the default checksum-only content parser
    pub fn with_parser(mut self, parser: Arc<dyn ContentParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Stops dispatching new sources once the channel carries `true`
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Storage handle, for inspection between runs
    pub fn storage(&self) -> SharedStorage {
        Arc::clone(&self.storage)
    }

    /// Checks due sources for changes without acquiring them
    pub async fn check(&self, max_sources: Option<usize>) -> Result<PipelineRunResult> {
        let options = RunOptions {
            max_sources,
            ..Default::default()
        };
        self.execute(RunMode::Check, options, None).await
    }

    /// Acquires sources that are new or flagged as changed
    ///
    /// With `source_id`, only that source is acquired, regardless of its
    /// flags or backoff.
    pub async fn acquire(
        &self,
        max_sources: Option<usize>,
        source_id: Option<&str>,
    ) -> Result<PipelineRunResult> {
        let options = RunOptions {
            max_sources,
            ..Default::default()
        };
        self.execute(RunMode::Acquire, options, source_id).await
    }

    /// Full run: initial acquisitions, checks of due sources, and
    /// acquisition of whatever changed
    pub async fn run(&self, options: RunOptions) -> Result<PipelineRunResult> {
        self.execute(RunMode::Full, options, None).await
    }

    async fn execute(
        &self,
        mode: RunMode,
        options: RunOptions,
        only: Option<&str>,
    ) -> Result<PipelineRunResult> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let dry_run = options.dry_run;

        let run_id = if dry_run {
            None
        } else {
            let lease = chrono::Duration::minutes(RUN_LEASE_MINUTES);
            Some(lock_storage(&self.storage)?.begin_run(mode.as_str(), &self.config_hash, lease)?)
        };
        tracing::info!(
            "Starting {} run{}{}",
            mode,
            run_id.map(|id| format!(" {}", id)).unwrap_or_default(),
            if dry_run { " (dry run)" } else { "" }
        );

        let dispatched = self.dispatch(mode, &options, only, run_id).await;
        let (tally, interrupted) = match dispatched {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Some(id) = run_id {
                    let finished = lock_storage(&self.storage)
                        .and_then(|mut s| s.finish_run(id, RunStatus::Failed, &e.to_string()));
                    if let Err(finish_err) = finished {
                        tracing::error!("Failed to close run {}: {}", id, finish_err);
                    }
                }
                return Err(e);
            }
        };

        let result = PipelineRunResult::from_tally(
            run_id,
            mode,
            dry_run,
            started_at,
            tally,
            interrupted,
            clock.elapsed(),
        );

        if let Some(id) = run_id {
            let summary = serde_json::to_string(&result)
                .map_err(|e| SentinelError::Internal(format!("cannot encode run summary: {}", e)))?;
            let status = if interrupted {
                RunStatus::Interrupted
            } else {
                RunStatus::Completed
            };
            lock_storage(&self.storage)?.finish_run(id, status, &summary)?;
        }

        tracing::info!(
            "Finished {} run: {} checked, {} changed, {} acquired, {} pages, {} failures in {:?}",
            mode,
            result.sources_checked,
            result.changes_detected,
            result.acquisitions,
            result.pages_fetched,
            result.failures,
            result.elapsed()
        );
        Ok(result)
    }

    async fn dispatch(
        &self,
        mode: RunMode,
        options: &RunOptions,
        only: Option<&str>,
        run_id: Option<i64>,
    ) -> Result<(RunTally, bool)> {
        let now = Utc::now();
        let politeness = &self.config.politeness;
        let max_sources = options.max_sources.unwrap_or(politeness.max_sources_per_run);
        let max_per_domain = options
            .max_per_domain
            .unwrap_or(politeness.max_domain_requests_per_run);
        let min_interval = options
            .min_interval
            .unwrap_or(Duration::from_millis(politeness.min_domain_interval_ms));

        let candidates = self.candidates(mode, only, now)?;
        let planned = plan_work(candidates, now, max_sources, max_per_domain as usize);
        let lanes = into_lanes(planned);
        let mut tally = RunTally {
            planned: lanes.iter().map(|l| l.items.len() as u32).sum(),
            ..Default::default()
        };
        tracing::info!(
            "Planned {} sources across {} domains",
            tally.planned,
            lanes.len()
        );

        let scheduler = SchedulerHandle::new(SchedulerContext::with_limits(
            min_interval,
            max_per_domain,
            politeness.max_total_requests_per_run,
            politeness.respect_robots_crawl_delay,
        ));
        let worker = Arc::new(Worker {
            fetcher: self.fetcher.clone(),
            robots: RobotsGate::new(
                self.fetcher.clone(),
                self.config.user_agent.crawler_name.clone(),
            ),
            scheduler,
            parser: Arc::clone(&self.parser),
            storage: Arc::clone(&self.storage),
            shutdown: self.shutdown.clone(),
            mode,
            dry_run: options.dry_run,
            run_id,
            crawl: self.config.crawl.clone(),
            allow_body_fetch: self.config.detection.allow_body_fetch,
            jitter_minutes: politeness.check_jitter_minutes,
        });

        let workers = Arc::new(Semaphore::new(politeness.workers.max(1)));
        let mut tasks = JoinSet::new();
        for lane in lanes {
            let worker = Arc::clone(&worker);
            let workers = Arc::clone(&workers);
            tasks.spawn(async move {
                // The semaphore is never closed
                let _permit = workers.acquire_owned().await;
                worker.run_lane(lane).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(lane_tally) => tally.merge(&lane_tally),
                Err(e) => {
                    tracing::error!("Domain lane task failed: {}", e);
                    tally.failures += 1;
                }
            }
        }

        let interrupted = *self.shutdown.borrow();
        Ok((tally, interrupted))
    }

    /// Collects the sources a run of `mode` may work on
    fn candidates(
        &self,
        mode: RunMode,
        only: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<WorkItem>> {
        let storage = lock_storage(&self.storage)?;

        if let Some(source_id) = only {
            let source = storage
                .get_source(source_id)?
                .ok_or_else(|| SentinelError::UnknownSource(source_id.to_string()))?;
            return Ok(vec![acquisition_item(source)]);
        }

        let mut items = Vec::new();
        if mode != RunMode::Check {
            for source in storage.list_sources_pending_acquisition()? {
                if in_backoff(&source, now) {
                    tracing::debug!("{} is backing off until {:?}", source.url, source.next_check_after);
                    continue;
                }
                items.push(acquisition_item(source));
            }
        }
        if mode != RunMode::Acquire {
            let queued: HashSet<String> = items.iter().map(|i| i.source.id.clone()).collect();
            for source in storage.list_sources_due(now)? {
                if !queued.contains(&source.id) {
                    items.push(WorkItem::new(source, WorkKind::Check));
                }
            }
        }
        Ok(items)
    }
}

fn acquisition_item(source: SourceMonitoringRecord) -> WorkItem {
    let kind = if source.is_pending_initial() {
        WorkKind::Initial
    } else {
        WorkKind::Acquire
    };
    WorkItem::new(source, kind)
}

/// A failed acquisition waits out its backoff before being retried
fn in_backoff(source: &SourceMonitoringRecord, now: DateTime<Utc>) -> bool {
    source.check_failures > 0 && source.next_check_after.is_some_and(|next| next > now)
}
