use crate::crawler::{FetchFailure, FetchedPage, Fetcher, HeaderProbe, ProbeOutcome};
use crate::detector::{ChangeDetectionResult, DetectionMethod, DetectionOutcome};
use crate::pipeline::ContentParser;
use crate::scheduler::SchedulerHandle;
use crate::state::SourceMonitoringRecord;
use crate::url::{domain_key, normalize_url};
use chrono::{DateTime, Utc};
use url::Url;

/// A detection result plus the page retrieved by tier 3, if any
///
/// Callers that go on to acquire the source can reuse the page instead of
/// fetching it again.
#[derive(Debug, Clone)]
pub struct Detection {
    pub result: ChangeDetectionResult,
    pub page: Option<FetchedPage>,
}

impl Detection {
    fn without_page(result: ChangeDetectionResult) -> Self {
        Self { result, page: None }
    }
}

/// Parses an HTTP date (RFC 7231 IMF-fixdate, which is RFC 2822 compatible)
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Compares two entity tags, ignoring the weak-validator prefix
fn etags_match(a: &str, b: &str) -> bool {
    fn strip(tag: &str) -> &str {
        let tag = tag.trim();
        tag.strip_prefix("W/").unwrap_or(tag)
    }
    strip(a) == strip(b)
}

/// Runs the tiered freshness check for one source at a time
pub struct ChangeDetector<'a> {
    fetcher: &'a Fetcher,
    scheduler: &'a SchedulerHandle,
    parser: &'a dyn ContentParser,
    allow_body_fetch: bool,
}

impl<'a> ChangeDetector<'a> {
    /// Creates a detector
    ///
    /// # Arguments
    ///
    /// * `fetcher` - Performs the probes and retrievals
    /// * `scheduler` - Every request is paced and charged through it
    /// * `parser` - Produces the tier-3 content fingerprint
    /// * `allow_body_fetch` - When false, tier 3 is skipped
    pub fn new(
        fetcher: &'a Fetcher,
        scheduler: &'a SchedulerHandle,
        parser: &'a dyn ContentParser,
        allow_body_fetch: bool,
    ) -> Self {
        Self {
            fetcher,
            scheduler,
            parser,
            allow_body_fetch,
        }
    }

    /// Checks whether a source changed since its last recorded state
    ///
    /// # Arguments
    ///
    /// * `source` - The source and its stored validators
    /// * `baseline` - Fingerprint to compare a tier-3 retrieval against;
    ///   defaults to the source's last content hash
    pub async fn detect(&self, source: &SourceMonitoringRecord, baseline: Option<&str>) -> Detection {
        let url = match normalize_url(&source.url) {
            Ok(url) => url,
            Err(e) => return Detection::without_page(self.error(source, e.to_string())),
        };
        let domain = domain_key(&url);

        if source.last_etag.is_some() || source.last_modified.is_some() {
            if self.scheduler.acquire(&domain).await.is_err() {
                return Detection::without_page(self.budget_exhausted(source));
            }
            match self.fetcher.probe(&url).await {
                Ok(ProbeOutcome::Headers(headers)) => {
                    if let Some(result) = self.compare_headers(source, &headers) {
                        return Detection::without_page(result);
                    }
                    tracing::debug!("Header validators inconclusive for {}", url);
                }
                Ok(ProbeOutcome::Unsupported) => {
                    tracing::debug!("{} does not support HEAD, falling through", url);
                }
                Err(failure) => {
                    return Detection::without_page(self.error(source, failure.to_string()));
                }
            }
        }

        self.compare_content(source, &url, &domain, baseline).await
    }

    /// Tiers 1 and 2, answered from a single probe
    fn compare_headers(
        &self,
        source: &SourceMonitoringRecord,
        headers: &HeaderProbe,
    ) -> Option<ChangeDetectionResult> {
        let verdict = |outcome, method| {
            let mut result = ChangeDetectionResult::new(&source.id, outcome);
            result.method = Some(method);
            result.etag = headers.etag.clone();
            result.last_modified = headers.last_modified.clone();
            result
        };

        if let (Some(old), Some(new)) = (&source.last_etag, &headers.etag) {
            let outcome = if etags_match(old, new) {
                DetectionOutcome::Unchanged
            } else {
                DetectionOutcome::Changed
            };
            tracing::debug!("{}: ETag {} -> {} ({:?})", source.id, old, new, outcome);
            return Some(verdict(outcome, DetectionMethod::Etag));
        }

        if let (Some(old), Some(new)) = (&source.last_modified, &headers.last_modified) {
            if let (Some(old_time), Some(new_time)) = (parse_http_date(old), parse_http_date(new)) {
                let outcome = if new_time > old_time {
                    DetectionOutcome::Changed
                } else {
                    DetectionOutcome::Unchanged
                };
                tracing::debug!("{}: Last-Modified {} -> {} ({:?})", source.id, old, new, outcome);
                return Some(verdict(outcome, DetectionMethod::LastModified));
            }
        }

        None
    }

    /// Tier 3: full retrieval and fingerprint comparison
    async fn compare_content(
        &self,
        source: &SourceMonitoringRecord,
        url: &Url,
        domain: &str,
        baseline: Option<&str>,
    ) -> Detection {
        if !self.allow_body_fetch {
            tracing::debug!("{}: body fetch disabled, outcome unknown", source.id);
            return Detection::without_page(ChangeDetectionResult::new(
                &source.id,
                DetectionOutcome::Unknown,
            ));
        }
        if self.scheduler.acquire(domain).await.is_err() {
            return Detection::without_page(self.budget_exhausted(source));
        }

        let page = match self.fetcher.fetch(url).await {
            Ok(page) => page,
            Err(failure) => return Detection::without_page(self.fetch_error(source, failure)),
        };
        let fingerprint = match self
            .parser
            .parse(&page.body, page.content_type.as_deref(), &page.final_url)
        {
            Ok(parsed) => parsed.checksum,
            Err(reason) => {
                return Detection::without_page(
                    self.error(source, format!("content parser failed: {}", reason)),
                )
            }
        };

        let previous = baseline.or(source.last_content_hash.as_deref());
        let outcome = if previous == Some(fingerprint.as_str()) {
            DetectionOutcome::Unchanged
        } else {
            DetectionOutcome::Changed
        };
        tracing::debug!("{}: content hash comparison {:?}", source.id, outcome);

        let mut result = ChangeDetectionResult::new(&source.id, outcome);
        result.method = Some(DetectionMethod::Hash);
        result.content_hash = Some(fingerprint);
        result.etag = page.etag.clone();
        result.last_modified = page.last_modified.clone();
        Detection {
            result,
            page: Some(page),
        }
    }

    fn fetch_error(&self, source: &SourceMonitoringRecord, failure: FetchFailure) -> ChangeDetectionResult {
        self.error(source, failure.to_string())
    }

    fn error(&self, source: &SourceMonitoringRecord, reason: String) -> ChangeDetectionResult {
        tracing::warn!("Change detection failed for {}: {}", source.url, reason);
        let mut result = ChangeDetectionResult::new(&source.id, DetectionOutcome::Error);
        result.error = Some(reason);
        result
    }

    fn budget_exhausted(&self, source: &SourceMonitoringRecord) -> ChangeDetectionResult {
        tracing::debug!("{}: request budget exhausted before check", source.id);
        ChangeDetectionResult::new(&source.id, DetectionOutcome::Unknown)
    }
}
