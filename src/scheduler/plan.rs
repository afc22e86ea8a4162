//! Work ordering across domains
//!
//! Candidates are grouped by domain, ordered within each domain, and then
//! taken one per domain per round so a domain with many due sources cannot
//! crowd out the others.

use crate::state::SourceMonitoringRecord;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// What the runner should do with a planned source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkKind {
    /// Never acquired: fetch without detection
    Initial,
    /// Flagged as changed by an earlier check
    Acquire,
    /// Already acquired and due for a freshness check
    Check,
}

/// One source in the run's work order
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub source: SourceMonitoringRecord,
    pub domain: String,
    pub kind: WorkKind,
}

impl WorkItem {
    pub fn new(source: SourceMonitoringRecord, kind: WorkKind) -> Self {
        Self {
            domain: source.domain_key(),
            source,
            kind,
        }
    }
}

/// Sources of one domain, processed serially by a single worker
#[derive(Debug, Clone)]
pub struct DomainLane {
    pub domain: String,
    pub items: Vec<WorkItem>,
}

/// Orders candidates within a domain: initial acquisitions first, then most overdue
fn priority_order(a: &WorkItem, b: &WorkItem, now: DateTime<Utc>) -> std::cmp::Ordering {
    let rank = |item: &WorkItem| match item.kind {
        WorkKind::Initial => 0,
        WorkKind::Acquire => 1,
        WorkKind::Check => 2,
    };
    rank(a)
        .cmp(&rank(b))
        .then_with(|| b.source.overdue_by(now).cmp(&a.source.overdue_by(now)))
        .then_with(|| a.source.id.cmp(&b.source.id))
}

/// Produces a capped, domain-fair work order
///
/// # Arguments
///
/// * `candidates` - Every source eligible for work this run
/// * `now` - Reference time for overdue ordering
/// * `max_sources` - Cap on the total number of planned sources
/// * `max_per_domain` - Cap on planned sources sharing one domain
///
/// # Returns
///
/// The planned items in round-robin order: the first round holds the top
/// item of every domain, the second round the next one, and so on.
pub fn plan_work(
    candidates: Vec<WorkItem>,
    now: DateTime<Utc>,
    max_sources: usize,
    max_per_domain: usize,
) -> Vec<WorkItem> {
    let mut by_domain: HashMap<String, Vec<WorkItem>> = HashMap::new();
    for item in candidates {
        by_domain.entry(item.domain.clone()).or_default().push(item);
    }

    let mut queues: Vec<std::vec::IntoIter<WorkItem>> = Vec::with_capacity(by_domain.len());
    let mut groups: Vec<Vec<WorkItem>> = by_domain.into_values().collect();
    for group in &mut groups {
        group.sort_by(|a, b| priority_order(a, b, now));
    }
    // Domains whose best item ranks highest go first in every round
    groups.sort_by(|a, b| priority_order(&a[0], &b[0], now));
    for group in groups {
        queues.push(group.into_iter());
    }

    let mut planned = Vec::new();
    let mut round = 0;
    while planned.len() < max_sources && round < max_per_domain {
        let mut progressed = false;
        for queue in &mut queues {
            if planned.len() >= max_sources {
                break;
            }
            if let Some(item) = queue.next() {
                planned.push(item);
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
        round += 1;
    }

    tracing::debug!(
        "Planned {} sources across {} domains",
        planned.len(),
        queues.len()
    );
    planned
}

/// Splits a work order into per-domain lanes, keeping plan order
pub fn into_lanes(items: Vec<WorkItem>) -> Vec<DomainLane> {
    let mut lanes: Vec<DomainLane> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for item in items {
        match index.get(&item.domain) {
            Some(&i) => lanes[i].items.push(item),
            None => {
                index.insert(item.domain.clone(), lanes.len());
                lanes.push(DomainLane {
                    domain: item.domain.clone(),
                    items: vec![item],
                });
            }
        }
    }
    lanes
}
