//! Change detection for already-known sources
//!
//! Detection escalates through three tiers and stops at the first conclusive
//! one:
//! 1. ETag comparison from a HEAD probe
//! 2. Last-Modified comparison from the same probe
//! 3. Full retrieval and content fingerprint comparison
//!
//! A network or protocol failure at any tier yields `Error`, never `Changed`.

mod tiers;

pub use tiers::{parse_http_date, ChangeDetector, Detection};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Verdict of a freshness check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionOutcome {
    Unchanged,
    Changed,
    /// Every tier was skipped by policy or budget
    Unknown,
    Error,
}

/// Tier that produced a conclusive answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionMethod {
    Etag,
    LastModified,
    Hash,
}

impl DetectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Etag => "etag",
            Self::LastModified => "last-modified",
            Self::Hash => "hash",
        }
    }
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of checking one source
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeDetectionResult {
    pub source_id: String,
    pub outcome: DetectionOutcome,
    pub method: Option<DetectionMethod>,
    /// Fingerprint observed by a tier-3 retrieval
    pub content_hash: Option<String>,
    /// Validators observed during the check
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub checked_at: DateTime<Utc>,
    /// Failure reason when `outcome` is `Error`
    pub error: Option<String>,
}

impl ChangeDetectionResult {
    pub(crate) fn new(source_id: &str, outcome: DetectionOutcome) -> Self {
        Self {
            source_id: source_id.to_string(),
            outcome,
            method: None,
            content_hash: None,
            etag: None,
            last_modified: None,
            checked_at: Utc::now(),
            error: None,
        }
    }
}
