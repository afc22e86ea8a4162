use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Which stages a run performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Change detection only
    Check,
    /// Retrieval of sources already flagged as pending
    Acquire,
    /// Detection followed by retrieval of whatever changed
    Full,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Check => "check",
            Self::Acquire => "acquire",
            Self::Full => "full",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-invocation overrides of the politeness configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub max_sources: Option<usize>,
    pub max_per_domain: Option<u32>,
    pub min_interval: Option<Duration>,
    /// Decide and log everything, but write nothing and fetch only robots.txt and headers
    pub dry_run: bool,
}

/// Counters accumulated while a run progresses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RunTally {
    pub planned: u32,
    pub sources_checked: u32,
    pub initial_acquisitions: u32,
    pub acquisitions: u32,
    pub changes_detected: u32,
    pub unchanged: u32,
    pub pages_fetched: u32,
    pub pages_failed: u32,
    pub failures: u32,
    pub skipped: u32,
    pub deferred: u32,
}

impl RunTally {
    pub fn merge(&mut self, other: &RunTally) {
        self.planned += other.planned;
        self.sources_checked += other.sources_checked;
        self.initial_acquisitions += other.initial_acquisitions;
        self.acquisitions += other.acquisitions;
        self.changes_detected += other.changes_detected;
        self.unchanged += other.unchanged;
        self.pages_fetched += other.pages_fetched;
        self.pages_failed += other.pages_failed;
        self.failures += other.failures;
        self.skipped += other.skipped;
        self.deferred += other.deferred;
    }
}

/// Outcome of one pipeline invocation
///
/// Produced once, when the run ends, and returned even when individual
/// sources failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineRunResult {
    /// Id of the run row; `None` for dry runs
    pub run_id: Option<i64>,
    pub mode: RunMode,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub sources_planned: u32,
    /// Sources that went through change detection
    pub sources_checked: u32,
    /// Sources acquired for the first time
    pub initial_acquisitions: u32,
    /// All completed acquisitions, initial ones included
    pub acquisitions: u32,
    pub changes_detected: u32,
    pub unchanged: u32,
    pub pages_fetched: u32,
    pub pages_failed: u32,
    /// Sources whose check or acquisition failed
    pub failures: u32,
    /// Sources or pages skipped by robots policy
    pub skipped: u32,
    /// Sources left for a later run because a budget ran out
    pub deferred: u32,
    /// A shutdown signal stopped the run early
    pub interrupted: bool,
    pub elapsed_ms: u64,
}

impl PipelineRunResult {
    pub(crate) fn from_tally(
        run_id: Option<i64>,
        mode: RunMode,
        dry_run: bool,
        started_at: DateTime<Utc>,
        tally: RunTally,
        interrupted: bool,
        elapsed: Duration,
    ) -> Self {
        Self {
            run_id,
            mode,
            dry_run,
            started_at,
            sources_planned: tally.planned,
            sources_checked: tally.sources_checked,
            initial_acquisitions: tally.initial_acquisitions,
            acquisitions: tally.acquisitions,
            changes_detected: tally.changes_detected,
            unchanged: tally.unchanged,
            pages_fetched: tally.pages_fetched,
            pages_failed: tally.pages_failed,
            failures: tally.failures,
            skipped: tally.skipped,
            deferred: tally.deferred,
            interrupted,
            elapsed_ms: elapsed.as_millis().min(u64::MAX as u128) as u64,
        }
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }
}

impl fmt::Display for PipelineRunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} run{}{}",
            self.mode,
            self.run_id.map(|id| format!(" #{}", id)).unwrap_or_default(),
            if self.dry_run { " (dry run)" } else { "" }
        )?;
        writeln!(f, "  Sources planned:      {}", self.sources_planned)?;
        writeln!(f, "  Sources checked:      {}", self.sources_checked)?;
        writeln!(f, "  Changes detected:     {}", self.changes_detected)?;
        writeln!(f, "  Unchanged:            {}", self.unchanged)?;
        writeln!(f, "  Initial acquisitions: {}", self.initial_acquisitions)?;
        writeln!(f, "  Acquisitions:         {}", self.acquisitions)?;
        writeln!(f, "  Pages fetched:        {}", self.pages_fetched)?;
        writeln!(f, "  Pages failed:         {}", self.pages_failed)?;
        writeln!(f, "  Failures:             {}", self.failures)?;
        writeln!(f, "  Skipped:              {}", self.skipped)?;
        writeln!(f, "  Deferred:             {}", self.deferred)?;
        if self.interrupted {
            writeln!(f, "  Interrupted before all sources were processed")?;
        }
        write!(f, "  Elapsed:              {:.1}s", self.elapsed().as_secs_f64())
    }
}
