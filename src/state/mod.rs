//! Durable and per-run state
//!
//! - `source`: registry-owned monitoring records for each source
//! - `crawl_state` / `frontier`: resumable progress of multi-page crawls
//! - `domain_state`: per-domain politeness bookkeeping for the current run

mod crawl_state;
mod domain_state;
mod frontier;
mod source;

pub use crawl_state::{CrawlCounters, CrawlState, CrawlStatus, EnqueueOutcome};
pub use domain_state::DomainState;
pub use frontier::{Frontier, FrontierEntry};
pub use source::{MonitoringUpdate, SourceMonitoringRecord, UpdateFrequency};
