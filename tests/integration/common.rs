use source_sentinel::config::Config;
use source_sentinel::state::MonitoringUpdate;
use source_sentinel::storage::{lock_storage, SourceRegistry, SqliteStorage};
use source_sentinel::{PipelineRunner, ScopeKind, SourceMonitoringRecord, UpdateFrequency};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Configuration with politeness delays and jitter switched off
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.politeness.min_domain_interval_ms = 0;
    config.politeness.check_jitter_minutes = 0;
    config.politeness.max_domain_requests_per_run = 1000;
    config.politeness.max_total_requests_per_run = 1000;
    config.politeness.max_sources_per_run = 100;
    config.fetcher.timeout_secs = 5;
    config.crawl.pages_per_run = 100;
    config
}

/// A database file in a directory that lives as long as the returned guard
pub fn temp_database() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("sentinel.db");
    (dir, path)
}

/// Registers a source and returns its record
pub fn register(
    database: &Path,
    url: &str,
    scope: ScopeKind,
    crawl_enabled: bool,
) -> SourceMonitoringRecord {
    let mut record = SourceMonitoringRecord::new(url, scope, UpdateFrequency::Daily, 100, 3)
        .expect("Failed to build source record");
    record.crawl_enabled = crawl_enabled;
    let mut storage = SqliteStorage::new(database).expect("Failed to open storage");
    assert!(storage.add_source(&record).unwrap());
    record
}

/// Marks a source as already acquired with the given fingerprint and validators
pub fn mark_acquired(database: &Path, source_id: &str, hash: &str, etag: Option<&str>) {
    let mut storage = SqliteStorage::new(database).expect("Failed to open storage");
    storage
        .update_monitoring_metadata(
            source_id,
            &MonitoringUpdate {
                last_content_hash: Some(hash.to_string()),
                last_etag: etag.map(str::to_string),
                acquisition_pending: Some(false),
                ..Default::default()
            },
        )
        .unwrap();
}

pub fn runner(config: Config, database: &Path) -> PipelineRunner {
    let storage = SqliteStorage::new(database).expect("Failed to open storage");
    PipelineRunner::new(config, "test".to_string(), storage).expect("Failed to build runner")
}

pub fn source(runner: &PipelineRunner, source_id: &str) -> SourceMonitoringRecord {
    lock_storage(&runner.storage())
        .unwrap()
        .get_source(source_id)
        .unwrap()
        .expect("Source should exist")
}

/// robots.txt that allows everything
pub async fn mount_open_robots(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nAllow: /\n"))
        .mount(server)
        .await;
}

pub fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(
        format!("<html><body>{}</body></html>", body).into_bytes(),
        "text/html",
    )
}
