//! Multi-page crawls: scope, robots, and resumption across runs

use crate::common::{html, mount_open_robots, register, runner, source, temp_database, test_config};
use chrono::{DateTime, Utc};
use source_sentinel::pipeline::{ChecksumParser, ContentParser, ParsedContent};
use source_sentinel::storage::{lock_storage, CrawlStateStore, RunStore, SqliteStorage};
use source_sentinel::{CrawlStatus, RunOptions, ScopeKind};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Parser that notes the live run's heartbeat each time it is called
struct HeartbeatRecorder {
    database: PathBuf,
    seen: Mutex<Vec<DateTime<Utc>>>,
}

impl ContentParser for HeartbeatRecorder {
    fn parse(
        &self,
        body: &[u8],
        content_type: Option<&str>,
        source_url: &Url,
    ) -> Result<ParsedContent, String> {
        let storage = SqliteStorage::new(&self.database).map_err(|e| e.to_string())?;
        let run = storage
            .recent_runs(1)
            .map_err(|e| e.to_string())?
            .pop()
            .ok_or("no run recorded")?;
        let heartbeat = DateTime::parse_from_rfc3339(&run.heartbeat_at).map_err(|e| e.to_string())?;
        self.seen.lock().unwrap().push(heartbeat.with_timezone(&Utc));
        ChecksumParser.parse(body, content_type, source_url)
    }
}

#[tokio::test]
async fn test_path_scope_limits_crawl() {
    let server = MockServer::start().await;
    let base = server.uri();
    let (_dir, db) = temp_database();
    let record = register(&db, &format!("{}/docs/", base), ScopeKind::Path, true);
    mount_open_robots(&server).await;

    Mock::given(method("GET"))
        .and(path("/docs/"))
        .respond_with(html(&format!(
            r#"<a href="{base}/docs/guide">Guide</a>
               <a href="/blog/post">Blog</a>
               <a href="mailto:docs@example.com">Mail</a>"#
        )))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/docs/guide"))
        .respond_with(html(r#"<a href="/docs/">Back</a>"#))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/blog/post"))
        .respond_with(html("off topic"))
        .expect(0)
        .mount(&server)
        .await;

    let runner = runner(test_config(), &db);
    let result = runner.run(RunOptions::default()).await.unwrap();

    assert_eq!(result.initial_acquisitions, 1);
    assert_eq!(result.pages_fetched, 2);
    assert_eq!(result.failures, 0);

    let state = lock_storage(&runner.storage())
        .unwrap()
        .load_crawl_state(&record.id, 1000)
        .unwrap()
        .expect("Crawl state should be saved");
    assert_eq!(state.status, CrawlStatus::Completed);
    assert_eq!(state.visited_count(), 2);
    assert_eq!(state.counters.out_of_scope, 1);
    assert_eq!(state.aggregate_hash(), source(&runner, &record.id).last_content_hash);
}

#[tokio::test]
async fn test_robots_disallowed_pages_are_skipped() {
    let server = MockServer::start().await;
    let base = server.uri();
    let (_dir, db) = temp_database();
    let record = register(&db, &format!("{}/", base), ScopeKind::Host, true);

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "User-agent: *\nDisallow: /private/\n",
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(r#"<a href="/private/data">Private</a><a href="/public">Public</a>"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/public"))
        .respond_with(html("public"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/private/data"))
        .respond_with(html("secret"))
        .expect(0)
        .mount(&server)
        .await;

    let runner = runner(test_config(), &db);
    let result = runner.run(RunOptions::default()).await.unwrap();

    assert_eq!(result.pages_fetched, 2);
    assert_eq!(result.skipped, 1);
    assert_eq!(result.acquisitions, 1);
    assert!(source(&runner, &record.id).last_content_hash.is_some());
}

#[tokio::test]
async fn test_disallowed_single_page_source_is_not_fetched() {
    let server = MockServer::start().await;
    let (_dir, db) = temp_database();
    let record = register(&db, &format!("{}/private/report", server.uri()), ScopeKind::Path, false);

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "User-agent: SourceSentinel\nDisallow: /private/\n",
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/private/report"))
        .respond_with(html("report"))
        .expect(0)
        .mount(&server)
        .await;

    let runner = runner(test_config(), &db);
    let result = runner.acquire(None, None).await.unwrap();

    assert_eq!(result.skipped, 1);
    assert_eq!(result.acquisitions, 0);
    let after = source(&runner, &record.id);
    assert!(after.is_pending_initial());
    assert_eq!(after.check_failures, 0);
}

#[tokio::test]
async fn test_crawl_resumes_across_runs_without_refetching() {
    let server = MockServer::start().await;
    let base = server.uri();
    let (_dir, db) = temp_database();
    let record = register(&db, &format!("{}/", base), ScopeKind::Host, true);
    mount_open_robots(&server).await;

    let links: String = (0..39)
        .map(|i| format!(r#"<a href="/p/{}">Page {}</a>"#, i, i))
        .collect();
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(&links))
        .expect(1)
        .mount(&server)
        .await;
    for i in 0..39 {
        Mock::given(method("GET"))
            .and(path(format!("/p/{}", i)))
            .respond_with(html(&format!("page {}", i)))
            .expect(1)
            .mount(&server)
            .await;
    }

    let mut config = test_config();
    config.crawl.pages_per_run = 10;
    config.crawl.frontier_memory_cap = 5;
    let runner = runner(config, &db);

    let mut fetched = 0;
    for run in 0..4 {
        let result = runner.run(RunOptions::default()).await.unwrap();
        assert_eq!(result.pages_fetched, 10, "run {}", run);
        assert_eq!(result.acquisitions, 0, "run {}", run);
        assert_eq!(result.deferred, 1, "run {}", run);
        fetched += result.pages_fetched;

        let paused = source(&runner, &record.id);
        assert!(paused.is_pending_initial());
        assert!(paused.acquisition_pending);
    }
    assert_eq!(fetched, 40);

    // The frontier is drained; this run only closes the crawl
    let last = runner.run(RunOptions::default()).await.unwrap();
    assert_eq!(last.pages_fetched, 0);
    assert_eq!(last.acquisitions, 1);
    assert_eq!(last.initial_acquisitions, 1);

    let done = source(&runner, &record.id);
    assert!(done.last_content_hash.is_some());
    assert!(!done.acquisition_pending);

    let state = lock_storage(&runner.storage())
        .unwrap()
        .load_crawl_state(&record.id, 5)
        .unwrap()
        .unwrap();
    assert_eq!(state.status, CrawlStatus::Completed);
    assert_eq!(state.visited_count(), 40);
    assert!(state.frontier.is_empty());
}

#[tokio::test]
async fn test_heartbeat_is_refreshed_within_a_crawl() {
    let server = MockServer::start().await;
    let base = server.uri();
    let (_dir, db) = temp_database();
    register(&db, &format!("{}/", base), ScopeKind::Host, true);
    mount_open_robots(&server).await;

    let links: String = (0..5).map(|i| format!(r#"<a href="/p/{}">{}</a>"#, i, i)).collect();
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(&links))
        .mount(&server)
        .await;
    for i in 0..5 {
        Mock::given(method("GET"))
            .and(path(format!("/p/{}", i)))
            .respond_with(html("leaf"))
            .mount(&server)
            .await;
    }

    let recorder = Arc::new(HeartbeatRecorder {
        database: db.clone(),
        seen: Mutex::new(Vec::new()),
    });
    let runner = runner(test_config(), &db).with_parser(recorder.clone());
    let result = runner.run(RunOptions::default()).await.unwrap();
    assert_eq!(result.pages_fetched, 6);

    // Every page after the first sees a heartbeat written by the unit before it
    let seen = recorder.seen.lock().unwrap();
    assert_eq!(seen.len(), 6);
    for pair in seen.windows(2) {
        assert!(pair[1] > pair[0], "heartbeat not refreshed: {:?}", pair);
    }
}

#[tokio::test]
async fn test_corrupt_crawl_state_restarts_fresh() {
    let server = MockServer::start().await;
    let base = server.uri();
    let (_dir, db) = temp_database();
    let record = register(&db, &format!("{}/", base), ScopeKind::Host, true);
    mount_open_robots(&server).await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(r#"<a href="/a">A</a><a href="/b">B</a>"#))
        .expect(2)
        .mount(&server)
        .await;
    for leaf in ["/a", "/b"] {
        Mock::given(method("GET"))
            .and(path(leaf))
            .respond_with(html("leaf"))
            .mount(&server)
            .await;
    }

    // One page per run leaves a paused, resumable state behind
    let mut config = test_config();
    config.crawl.pages_per_run = 1;
    let paused = runner(config, &db).acquire(None, None).await.unwrap();
    assert_eq!(paused.pages_fetched, 1);

    let conn = rusqlite::Connection::open(&db).unwrap();
    conn.execute(
        "UPDATE crawl_states SET status = 'garbage' WHERE source_id = ?1",
        [&record.id],
    )
    .unwrap();
    drop(conn);

    let runner = runner(test_config(), &db);
    let result = runner.acquire(None, None).await.unwrap();
    assert_eq!(result.pages_fetched, 3);
    assert_eq!(result.acquisitions, 1);
    assert_eq!(result.failures, 0);

    let state = lock_storage(&runner.storage())
        .unwrap()
        .load_crawl_state(&record.id, 1000)
        .unwrap()
        .unwrap();
    assert_eq!(state.status, CrawlStatus::Completed);
    assert_eq!(state.visited_count(), 3);
    assert!(source(&runner, &record.id).last_content_hash.is_some());
}
