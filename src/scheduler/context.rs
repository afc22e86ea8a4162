//! Per-run politeness bookkeeping
//!
//! A `SchedulerContext` is created by one pipeline invocation, consulted
//! before every request, and dropped when the run ends. Nothing here
//! survives across runs.

use crate::config::PolitenessConfig;
use crate::state::DomainState;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Longest Crawl-delay honored; one paced request must fit well inside a run lease
pub const MAX_CRAWL_DELAY: Duration = Duration::from_secs(300);

/// Which budget refused a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetLimit {
    /// The domain used up `max_domain_requests_per_run`
    Domain,
    /// The run used up `max_total_requests_per_run`
    Run,
}

/// Answer to a request for a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// A slot was booked; the caller must wait this long before sending
    Granted { wait: Duration },
    Exhausted(BudgetLimit),
}

/// Politeness limits and per-domain counters for one run
#[derive(Debug)]
pub struct SchedulerContext {
    min_interval: Duration,
    max_domain_requests: u32,
    max_total_requests: u32,
    respect_crawl_delay: bool,
    domains: HashMap<String, DomainState>,
    total_requests: u32,
}

impl SchedulerContext {
    /// Creates a context from the politeness configuration
    pub fn new(politeness: &PolitenessConfig) -> Self {
        Self::with_limits(
            Duration::from_millis(politeness.min_domain_interval_ms),
            politeness.max_domain_requests_per_run,
            politeness.max_total_requests_per_run,
            politeness.respect_robots_crawl_delay,
        )
    }

    /// Creates a context with explicit limits
    ///
    /// # Arguments
    ///
    /// * `min_interval` - Minimum gap between two requests to one domain
    /// * `max_domain_requests` - Counted requests allowed per domain
    /// * `max_total_requests` - Counted requests allowed for the whole run
    /// * `respect_crawl_delay` - Whether robots.txt Crawl-delay may widen the gap
    pub fn with_limits(
        min_interval: Duration,
        max_domain_requests: u32,
        max_total_requests: u32,
        respect_crawl_delay: bool,
    ) -> Self {
        Self {
            min_interval,
            max_domain_requests,
            max_total_requests,
            respect_crawl_delay,
            domains: HashMap::new(),
            total_requests: 0,
        }
    }

    /// Books the next request slot for `domain`
    ///
    /// Slots are booked, not merely checked, so two callers reserving for the
    /// same domain receive slots at least one interval apart even when both
    /// ask at the same instant.
    pub fn reserve(&mut self, domain: &str, now: Instant) -> Reservation {
        if self.total_requests >= self.max_total_requests {
            return Reservation::Exhausted(BudgetLimit::Run);
        }

        let state = self.domains.entry(domain.to_string()).or_default();
        if !state.has_budget(self.max_domain_requests) {
            return Reservation::Exhausted(BudgetLimit::Domain);
        }

        let interval = state.interval(self.min_interval, self.respect_crawl_delay);
        let slot = state.next_slot(interval, now);
        state.record_request(slot, true);
        self.total_requests += 1;

        Reservation::Granted { wait: slot - now }
    }

    /// Books a paced slot that is not charged to any budget
    pub fn reserve_uncounted(&mut self, domain: &str, now: Instant) -> Duration {
        let state = self.domains.entry(domain.to_string()).or_default();
        let interval = state.interval(self.min_interval, self.respect_crawl_delay);
        let slot = state.next_slot(interval, now);
        state.record_request(slot, false);
        slot - now
    }

    /// Records a Crawl-delay for a domain, keeping the largest one seen
    ///
    /// Delays above `MAX_CRAWL_DELAY` are clamped to it.
    pub fn set_crawl_delay(&mut self, domain: &str, delay: Duration) {
        let delay = delay.min(MAX_CRAWL_DELAY);
        let state = self.domains.entry(domain.to_string()).or_default();
        state.crawl_delay = Some(state.crawl_delay.map_or(delay, |d| d.max(delay)));
    }

    /// Whether a counted request to `domain` could still be granted
    pub fn has_budget(&self, domain: &str) -> bool {
        self.total_requests < self.max_total_requests
            && self
                .domains
                .get(domain)
                .map_or(self.max_domain_requests > 0, |s| {
                    s.has_budget(self.max_domain_requests)
                })
    }

    pub fn total_requests(&self) -> u32 {
        self.total_requests
    }

    pub fn domain_requests(&self, domain: &str) -> u32 {
        self.domains.get(domain).map_or(0, |s| s.request_count)
    }
}

/// Shared handle to a run's scheduler context
///
/// Lock sections only book slots; all waiting happens after the lock is
/// released.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    inner: Arc<Mutex<SchedulerContext>>,
}

impl SchedulerHandle {
    pub fn new(context: SchedulerContext) -> Self {
        Self {
            inner: Arc::new(Mutex::new(context)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerContext> {
        // Booking never leaves the context half-updated
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Waits for a counted request slot for `domain`
    ///
    /// Returns the exhausted budget instead of waiting when no slot is left.
    pub async fn acquire(&self, domain: &str) -> Result<(), BudgetLimit> {
        let reservation = self.lock().reserve(domain, Instant::now());
        match reservation {
            Reservation::Granted { wait } => {
                if !wait.is_zero() {
                    tracing::trace!("Waiting {:?} before next request to {}", wait, domain);
                    tokio::time::sleep(wait).await;
                }
                Ok(())
            }
            Reservation::Exhausted(limit) => {
                tracing::debug!("Request budget exhausted for {} ({:?})", domain, limit);
                Err(limit)
            }
        }
    }

    /// Waits for an uncounted, paced slot for `domain`
    pub async fn pace(&self, domain: &str) {
        let wait = self.lock().reserve_uncounted(domain, Instant::now());
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    pub fn set_crawl_delay(&self, domain: &str, delay: Duration) {
        self.lock().set_crawl_delay(domain, delay);
    }

    pub fn has_budget(&self, domain: &str) -> bool {
        self.lock().has_budget(domain)
    }

    pub fn total_requests(&self) -> u32 {
        self.lock().total_requests()
    }
}
