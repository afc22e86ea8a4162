//! Source Sentinel: a polite content pipeline for monitored web sources
//!
//! This crate keeps a local mirror of external sources fresh. It decides which
//! sources are due, checks them for changes with as little bandwidth as
//! possible, and crawls new or changed sources while respecting robots.txt,
//! per-domain politeness limits and per-run budgets. Crawl progress is
//! persisted after every page so an interrupted run can be resumed.

pub mod config;
pub mod crawler;
pub mod detector;
pub mod pipeline;
pub mod robots;
pub mod scheduler;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for pipeline operations
#[derive(Debug, Error)]
pub enum SentinelError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, SentinelError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use detector::{ChangeDetectionResult, DetectionMethod, DetectionOutcome};
pub use pipeline::{PipelineRunResult, PipelineRunner, RunMode, RunOptions};
pub use state::{CrawlState, CrawlStatus, SourceMonitoringRecord, UpdateFrequency};
pub use url::{normalize_url, Fingerprint, ScopeKind};
