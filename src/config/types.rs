use serde::Deserialize;

/// Main configuration structure
///
/// Every section is optional in the TOML file; missing sections and fields
/// fall back to the defaults documented on each field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(rename = "user-agent", default)]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub politeness: PolitenessConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UserAgentConfig {
    /// Product token sent in the User-Agent header and matched against robots.txt groups
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Renders the full header value: `Name/Version (+url; email)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            crawler_name: "SourceSentinel".to_string(),
            crawler_version: env!("CARGO_PKG_VERSION").to_string(),
            contact_url: "https://example.org/source-sentinel".to_string(),
            contact_email: "crawler@example.org".to_string(),
        }
    }
}

/// Rate and volume limits protecting origin servers
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolitenessConfig {
    /// Minimum time between two requests to the same domain (milliseconds)
    #[serde(rename = "min-domain-interval-ms")]
    pub min_domain_interval_ms: u64,

    /// Maximum requests issued to one domain in a single run
    #[serde(rename = "max-domain-requests-per-run")]
    pub max_domain_requests_per_run: u32,

    /// Maximum sources processed in a single run
    #[serde(rename = "max-sources-per-run")]
    pub max_sources_per_run: usize,

    /// Maximum requests issued in a single run across all domains
    #[serde(rename = "max-total-requests-per-run")]
    pub max_total_requests_per_run: u32,

    /// Upper bound of the random offset added to each next-check time (minutes)
    #[serde(rename = "check-jitter-minutes")]
    pub check_jitter_minutes: u32,

    /// Whether a robots.txt Crawl-delay may widen the per-domain interval
    #[serde(rename = "respect-robots-crawl-delay")]
    pub respect_robots_crawl_delay: bool,

    /// Number of domains processed concurrently
    pub workers: usize,
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            min_domain_interval_ms: 2000,
            max_domain_requests_per_run: 10,
            max_sources_per_run: 20,
            max_total_requests_per_run: 100,
            check_jitter_minutes: 60,
            respect_robots_crawl_delay: true,
            workers: 4,
        }
    }
}

/// HTTP fetcher configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    /// Total request timeout (seconds)
    #[serde(rename = "timeout-secs")]
    pub timeout_secs: u64,

    /// Connection establishment timeout (seconds)
    #[serde(rename = "connect-timeout-secs")]
    pub connect_timeout_secs: u64,

    /// Content-Type prefixes accepted for retrieval
    #[serde(rename = "accepted-content-types")]
    pub accepted_content_types: Vec<String>,

    /// Bodies larger than this are rejected
    #[serde(rename = "max-body-bytes")]
    pub max_body_bytes: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            connect_timeout_secs: 10,
            accepted_content_types: vec![
                "text/".to_string(),
                "application/xhtml+xml".to_string(),
                "application/xml".to_string(),
                "application/pdf".to_string(),
            ],
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Multi-page crawl configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Frontier entries kept in memory before spilling to storage
    #[serde(rename = "frontier-memory-cap")]
    pub frontier_memory_cap: usize,

    /// Pages fetched per source per run before the crawl is paused
    #[serde(rename = "pages-per-run")]
    pub pages_per_run: u32,

    /// Page cap for sources that do not declare one
    #[serde(rename = "default-max-pages")]
    pub default_max_pages: u32,

    /// Depth cap for sources that do not declare one
    #[serde(rename = "default-max-depth")]
    pub default_max_depth: u32,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            frontier_memory_cap: 1000,
            pages_per_run: 10,
            default_max_pages: 10_000,
            default_max_depth: 10,
        }
    }
}

/// Change detection policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Whether the content-hash tier may download the full body
    #[serde(rename = "allow-body-fetch")]
    pub allow_body_fetch: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            allow_body_fetch: true,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: "sentinel.db".to_string(),
        }
    }
}
