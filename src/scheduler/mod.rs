//! Domain scheduler
//!
//! This module decides what a run works on and when each request may go out:
//! - `plan`: domain-fair, capped work order over candidate sources
//! - `context`: per-run politeness budgets and request slot booking
//! - `backoff`: next-eligible times with failure backoff and jitter

mod backoff;
mod context;
mod plan;

pub use backoff::{
    backoff_interval, is_degraded, jitter, max_backoff, next_check_after, DEGRADED_THRESHOLD,
};
pub use context::{BudgetLimit, Reservation, MAX_CRAWL_DELAY, SchedulerContext, SchedulerHandle};
pub use plan::{into_lanes, plan_work, DomainLane, WorkItem, WorkKind};
