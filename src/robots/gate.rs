//! Per-session robots.txt cache
//!
//! The first request to an origin fetches its robots.txt; every later check
//! against that origin is answered from memory for the rest of the run.

use crate::crawler::{FetchFailure, Fetcher};
use crate::robots::RobotsRuleSet;
use crate::scheduler::{SchedulerHandle, MAX_CRAWL_DELAY};
use crate::url::domain_key;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

/// Answers allow/deny for URLs, fetching robots.txt once per origin
#[derive(Debug)]
pub struct RobotsGate {
    fetcher: Fetcher,
    /// Product token used for group selection
    agent: String,
    cache: Mutex<HashMap<String, Arc<RobotsRuleSet>>>,
}

impl RobotsGate {
    /// Creates a gate
    ///
    /// # Arguments
    ///
    /// * `fetcher` - Fetcher used for robots.txt retrievals
    /// * `agent` - Product token matched against `User-agent` lines
    pub fn new(fetcher: Fetcher, agent: impl Into<String>) -> Self {
        Self {
            fetcher,
            agent: agent.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the rule set for the URL's origin, fetching it on first use
    ///
    /// The fetch is paced through the scheduler like any other request but
    /// is not charged to the request budget. A missing or unreachable
    /// robots.txt yields a rule set that allows everything.
    pub async fn rules_for(&self, url: &Url, scheduler: &SchedulerHandle) -> Arc<RobotsRuleSet> {
        let origin = url.origin().ascii_serialization();
        if let Some(rules) = self.cached(&origin) {
            return rules;
        }

        let domain = domain_key(url);
        let rules = match url.join("/robots.txt") {
            Ok(robots_url) => {
                scheduler.pace(&domain).await;
                Arc::new(self.fetch_rules(&robots_url).await)
            }
            Err(e) => {
                tracing::debug!("Cannot build robots.txt URL for {}: {}", url, e);
                Arc::new(RobotsRuleSet::allow_all())
            }
        };

        if let Some(delay) = rules.crawl_delay() {
            tracing::debug!("{} advertises Crawl-delay {}s", origin, delay);
            let delay = Duration::from_secs_f64(delay.min(MAX_CRAWL_DELAY.as_secs_f64()));
            scheduler.set_crawl_delay(&domain, delay);
        }

        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(origin, Arc::clone(&rules));
        rules
    }

    /// Checks a normalized URL against its origin's robots.txt
    pub async fn allowed(&self, url: &Url, scheduler: &SchedulerHandle) -> bool {
        let allowed = self.rules_for(url, scheduler).await.allowed(url);
        if !allowed {
            tracing::info!("Robots.txt disallows {}", url);
        }
        allowed
    }

    /// Rule set already fetched for an origin in this session
    pub fn cached(&self, origin: &str) -> Option<Arc<RobotsRuleSet>> {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(origin)
            .cloned()
    }

    async fn fetch_rules(&self, robots_url: &Url) -> RobotsRuleSet {
        match self.fetcher.fetch_text(robots_url).await {
            Ok(content) => RobotsRuleSet::parse(&content, &self.agent),
            Err(FetchFailure::Status(code)) => {
                tracing::debug!("No robots.txt at {} (HTTP {})", robots_url, code);
                RobotsRuleSet::allow_all()
            }
            Err(e) => {
                tracing::warn!("Failed to fetch {}: {}; allowing all", robots_url, e);
                RobotsRuleSet::allow_all()
            }
        }
    }
}
