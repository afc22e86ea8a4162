//! Change detection against a mock origin

use crate::common::{html, mark_acquired, mount_open_robots, register, runner, source, temp_database, test_config};
use chrono::Utc;
use source_sentinel::state::MonitoringUpdate;
use source_sentinel::storage::{lock_storage, SourceRegistry, SqliteStorage};
use source_sentinel::url::content_checksum;
use source_sentinel::ScopeKind;
use std::path::Path;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_matching_etag_needs_only_a_head_request() {
    let server = MockServer::start().await;
    let (_dir, db) = temp_database();
    let record = register(&db, &format!("{}/", server.uri()), ScopeKind::Host, false);
    mark_acquired(&db, &record.id, "stored-hash", Some("\"v1\""));

    Mock::given(method("HEAD"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).insert_header("etag", "W/\"v1\""))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html("unused"))
        .expect(0)
        .mount(&server)
        .await;

    let runner = runner(test_config(), &db);
    let result = runner.check(None).await.unwrap();

    assert_eq!(result.sources_checked, 1);
    assert_eq!(result.unchanged, 1);
    assert_eq!(result.changes_detected, 0);
    assert_eq!(result.pages_fetched, 0);

    let after = source(&runner, &record.id);
    assert_eq!(after.last_content_hash.as_deref(), Some("stored-hash"));
    assert!(after.next_check_after.unwrap() > Utc::now());
    assert!(after.last_checked.is_some());
    assert!(!after.acquisition_pending);
}

#[tokio::test]
async fn test_changed_etag_flags_source_for_acquisition() {
    let server = MockServer::start().await;
    let (_dir, db) = temp_database();
    let record = register(&db, &format!("{}/", server.uri()), ScopeKind::Host, false);
    mark_acquired(&db, &record.id, "stored-hash", Some("\"v1\""));

    Mock::given(method("HEAD"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).insert_header("etag", "\"v2\""))
        .mount(&server)
        .await;

    let runner = runner(test_config(), &db);
    let result = runner.check(None).await.unwrap();

    assert_eq!(result.changes_detected, 1);
    assert_eq!(result.acquisitions, 0);
    let after = source(&runner, &record.id);
    assert!(after.acquisition_pending);
    // Validators are only replaced once the new content is acquired
    assert_eq!(after.last_etag.as_deref(), Some("\"v1\""));
}

#[tokio::test]
async fn test_content_hash_fallback_then_acquire() {
    let server = MockServer::start().await;
    let (_dir, db) = temp_database();
    let record = register(&db, &format!("{}/", server.uri()), ScopeKind::Host, false);
    mark_acquired(&db, &record.id, "outdated-hash", None);
    mount_open_robots(&server).await;

    let body = "<html><body>Release notes</body></html>";
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(405))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/html"))
        .expect(2)
        .mount(&server)
        .await;

    let runner = runner(test_config(), &db);
    let checked = runner.check(None).await.unwrap();
    assert_eq!(checked.changes_detected, 1);
    assert!(source(&runner, &record.id).acquisition_pending);

    let acquired = runner.acquire(None, None).await.unwrap();
    assert_eq!(acquired.acquisitions, 1);
    assert_eq!(acquired.initial_acquisitions, 0);

    let after = source(&runner, &record.id);
    assert_eq!(
        after.last_content_hash.as_deref(),
        Some(content_checksum(body.as_bytes()).as_str())
    );
    assert!(!after.acquisition_pending);
    assert_eq!(after.check_failures, 0);
}

#[tokio::test]
async fn test_failed_check_backs_off() {
    let server = MockServer::start().await;
    let (_dir, db) = temp_database();
    let record = register(&db, &format!("{}/", server.uri()), ScopeKind::Host, false);
    mark_acquired(&db, &record.id, "stored-hash", Some("\"v1\""));

    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let runner = runner(test_config(), &db);
    let result = runner.check(None).await.unwrap();
    assert_eq!(result.failures, 1);

    let after = source(&runner, &record.id);
    assert_eq!(after.check_failures, 1);
    assert!(!after.degraded);
    // Daily base interval doubled by one failure
    let wait = after.next_check_after.unwrap() - Utc::now();
    assert!(wait > chrono::Duration::hours(47));
    assert!(wait <= chrono::Duration::hours(48));

    // Not due again within this test, so a second check plans nothing
    let again = runner.check(None).await.unwrap();
    assert_eq!(again.sources_planned, 0);
}

fn seed_metadata(database: &Path, source_id: &str, update: MonitoringUpdate) {
    let mut storage = SqliteStorage::new(database).unwrap();
    storage.update_monitoring_metadata(source_id, &update).unwrap();
}

#[tokio::test]
async fn test_last_modified_decides_when_no_etag() {
    let server = MockServer::start().await;
    let (_dir, db) = temp_database();
    let stored = "Tue, 21 Oct 2025 07:28:00 GMT";
    let same = register(&db, &format!("{}/same", server.uri()), ScopeKind::Path, false);
    let newer = register(&db, &format!("{}/newer", server.uri()), ScopeKind::Path, false);
    for record in [&same, &newer] {
        mark_acquired(&db, &record.id, "stored-hash", None);
        seed_metadata(
            &db,
            &record.id,
            MonitoringUpdate {
                last_modified: Some(stored.to_string()),
                ..Default::default()
            },
        );
    }

    Mock::given(method("HEAD"))
        .and(path("/same"))
        .respond_with(ResponseTemplate::new(200).insert_header("last-modified", stored))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/newer"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("last-modified", "Wed, 22 Oct 2025 07:28:00 GMT"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(html("unused"))
        .expect(0)
        .mount(&server)
        .await;

    let runner = runner(test_config(), &db);
    let result = runner.check(None).await.unwrap();
    assert_eq!(result.sources_checked, 2);
    assert_eq!(result.unchanged, 1);
    assert_eq!(result.changes_detected, 1);

    assert!(!source(&runner, &same.id).acquisition_pending);
    let changed = source(&runner, &newer.id);
    assert!(changed.acquisition_pending);
    assert_eq!(changed.last_modified.as_deref(), Some(stored));
}

#[tokio::test]
async fn test_fifth_failure_degrades_but_keeps_source_scheduled() {
    let server = MockServer::start().await;
    let (_dir, db) = temp_database();
    let record = register(&db, &format!("{}/", server.uri()), ScopeKind::Host, false);
    mark_acquired(&db, &record.id, "stored-hash", Some("\"v1\""));
    seed_metadata(
        &db,
        &record.id,
        MonitoringUpdate {
            check_failures: Some(4),
            ..Default::default()
        },
    );

    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let runner = runner(test_config(), &db);
    let result = runner.check(None).await.unwrap();
    assert_eq!(result.failures, 1);

    let after = source(&runner, &record.id);
    assert_eq!(after.check_failures, 5);
    assert!(after.degraded);
    let wait = after.next_check_after.unwrap() - Utc::now();
    assert!(wait > chrono::Duration::days(7) - chrono::Duration::minutes(1));
    assert!(wait <= chrono::Duration::days(7));

    // Degraded sources stay registered and come due again after the cap
    let due = lock_storage(&runner.storage())
        .unwrap()
        .list_sources_due(Utc::now() + chrono::Duration::days(8))
        .unwrap();
    assert!(due.iter().any(|s| s.id == record.id));
}
