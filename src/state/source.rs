use crate::url::{domain_key, normalize_url, source_key, ScopeKind};
use crate::UrlResult;
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::str::FromStr;

/// Declared update cadence of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateFrequency {
    Frequent,
    Daily,
    Weekly,
    Monthly,
    Unknown,
}

impl UpdateFrequency {
    /// Base interval between two checks before backoff and jitter
    pub fn base_interval(&self) -> Duration {
        match self {
            Self::Frequent => Duration::hours(6),
            Self::Daily => Duration::hours(24),
            Self::Weekly => Duration::days(7),
            Self::Monthly => Duration::days(30),
            Self::Unknown => Duration::hours(24),
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            Self::Frequent => "frequent",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Unknown => "unknown",
        }
    }

    /// Unrecognised values map to `Unknown`
    pub fn from_db_str(s: &str) -> Self {
        match s {
            "frequent" => Self::Frequent,
            "daily" => Self::Daily,
            "weekly" => Self::Weekly,
            "monthly" => Self::Monthly,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for UpdateFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

impl FromStr for UpdateFrequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match UpdateFrequency::from_db_str(&s.to_ascii_lowercase()) {
            Self::Unknown if !s.eq_ignore_ascii_case("unknown") => Err(format!(
                "unknown frequency '{}', expected frequent, daily, weekly, monthly or unknown",
                s
            )),
            freq => Ok(freq),
        }
    }
}

/// Monitoring metadata for one registered source
///
/// The registry owns these records; the pipeline reads them at run start and
/// writes changes back through
/// [`SourceRegistry::update_monitoring_metadata`](crate::storage::SourceRegistry::update_monitoring_metadata).
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMonitoringRecord {
    /// Stable key derived from the URL
    pub id: String,
    /// Normalized source URL
    pub url: String,
    /// Whether links beyond the source page are followed
    pub crawl_enabled: bool,
    pub scope: ScopeKind,
    pub max_pages: u32,
    pub max_depth: u32,
    pub frequency: UpdateFrequency,
    /// Content fingerprint from the last successful retrieval
    pub last_content_hash: Option<String>,
    pub last_etag: Option<String>,
    pub last_modified: Option<String>,
    pub last_checked: Option<DateTime<Utc>>,
    /// Consecutive failed checks or acquisitions
    pub check_failures: u32,
    /// The source is not due before this instant
    pub next_check_after: Option<DateTime<Utc>>,
    /// Set once the failure threshold is reached; cleared by a success
    pub degraded: bool,
    /// A change was detected and has not been fully acquired yet
    pub acquisition_pending: bool,
}

impl SourceMonitoringRecord {
    /// Creates a record for a new source
    ///
    /// The URL is normalized and the id derived from the normalized form, so
    /// registering two spellings of one address yields the same id.
    pub fn new(
        url: &str,
        scope: ScopeKind,
        frequency: UpdateFrequency,
        max_pages: u32,
        max_depth: u32,
    ) -> UrlResult<Self> {
        let normalized = normalize_url(url)?;
        Ok(Self {
            id: source_key(normalized.as_str()),
            url: normalized.to_string(),
            crawl_enabled: true,
            scope,
            max_pages,
            max_depth,
            frequency,
            last_content_hash: None,
            last_etag: None,
            last_modified: None,
            last_checked: None,
            check_failures: 0,
            next_check_after: None,
            degraded: false,
            acquisition_pending: false,
        })
    }

    /// No content has ever been recorded for this source
    pub fn is_pending_initial(&self) -> bool {
        self.last_content_hash.is_none()
    }

    /// Already acquired once and eligible for a freshness check at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.is_pending_initial() && self.next_check_after.map_or(true, |next| next <= now)
    }

    /// How long past its eligibility the source is; zero when never scheduled
    pub fn overdue_by(&self, now: DateTime<Utc>) -> Duration {
        self.next_check_after
            .map(|next| now - next)
            .unwrap_or_else(Duration::zero)
    }

    /// Politeness grouping key of the source URL
    pub fn domain_key(&self) -> String {
        normalize_url(&self.url)
            .map(|u| domain_key(&u))
            .unwrap_or_default()
    }
}

/// Partial update of a source's monitoring fields
///
/// Only fields that are `Some` are written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitoringUpdate {
    pub last_content_hash: Option<String>,
    pub last_etag: Option<String>,
    pub last_modified: Option<String>,
    pub last_checked: Option<DateTime<Utc>>,
    pub check_failures: Option<u32>,
    pub next_check_after: Option<DateTime<Utc>>,
    pub degraded: Option<bool>,
    pub acquisition_pending: Option<bool>,
}

impl MonitoringUpdate {
    /// True when the update would not change anything
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Applies the update to an in-memory record
    pub fn apply(&self, record: &mut SourceMonitoringRecord) {
        if let Some(hash) = &self.last_content_hash {
            record.last_content_hash = Some(hash.clone());
        }
        if let Some(etag) = &self.last_etag {
            record.last_etag = Some(etag.clone());
        }
        if let Some(modified) = &self.last_modified {
            record.last_modified = Some(modified.clone());
        }
        if let Some(checked) = self.last_checked {
            record.last_checked = Some(checked);
        }
        if let Some(failures) = self.check_failures {
            record.check_failures = failures;
        }
        if let Some(next) = self.next_check_after {
            record.next_check_after = Some(next);
        }
        if let Some(degraded) = self.degraded {
            record.degraded = degraded;
        }
        if let Some(pending) = self.acquisition_pending {
            record.acquisition_pending = pending;
        }
    }
}
