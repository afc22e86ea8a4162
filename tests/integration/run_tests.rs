//! Run control: locking, dry runs, explicit acquisition and shutdown

use crate::common::{html, mount_open_robots, register, runner, source, temp_database, test_config};
use source_sentinel::storage::{lock_storage, RunStatus, RunStore, SqliteStorage, StorageError};
use source_sentinel::{RunMode, RunOptions, ScopeKind, SentinelError};
use tokio::sync::watch;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer};

#[tokio::test]
async fn test_second_run_is_refused_while_one_is_live() {
    let (_dir, db) = temp_database();
    let mut other = SqliteStorage::new(&db).unwrap();
    let live = other
        .begin_run("full", "other", chrono::Duration::minutes(15))
        .unwrap();

    let runner = runner(test_config(), &db);
    let refused = runner.check(None).await;
    assert!(matches!(
        refused,
        Err(SentinelError::Storage(StorageError::RunInProgress { run_id, .. })) if run_id == live
    ));

    other.finish_run(live, RunStatus::Completed, "{}").unwrap();
    let result = runner.check(None).await.unwrap();
    let run_id = result.run_id.expect("Run should be recorded");

    let recorded = lock_storage(&runner.storage()).unwrap().get_run(run_id).unwrap();
    assert_eq!(recorded.status, RunStatus::Completed);
    assert_eq!(recorded.mode, "check");
    let summary: serde_json::Value =
        serde_json::from_str(recorded.summary.as_deref().unwrap()).unwrap();
    assert_eq!(summary["mode"], "check");
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let server = MockServer::start().await;
    let (_dir, db) = temp_database();
    let record = register(&db, &format!("{}/", server.uri()), ScopeKind::Host, true);
    mount_open_robots(&server).await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html("home"))
        .expect(0)
        .mount(&server)
        .await;

    let runner = runner(test_config(), &db);
    let result = runner
        .run(RunOptions {
            dry_run: true,
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(result.dry_run);
    assert_eq!(result.run_id, None);
    assert_eq!(result.mode, RunMode::Full);
    assert_eq!(result.sources_planned, 1);
    assert_eq!(result.pages_fetched, 0);

    let after = source(&runner, &record.id);
    assert_eq!(after, record);
    let binding = runner.storage();
    let storage = lock_storage(&binding).unwrap();
    assert!(storage.recent_runs(10).unwrap().is_empty());
}

#[tokio::test]
async fn test_explicit_source_acquisition() {
    let server = MockServer::start().await;
    let (_dir, db) = temp_database();
    let wanted = register(&db, &format!("{}/wanted", server.uri()), ScopeKind::Path, false);
    let other = register(&db, &format!("{}/other", server.uri()), ScopeKind::Path, false);
    mount_open_robots(&server).await;
    Mock::given(method("GET"))
        .and(path("/wanted"))
        .respond_with(html("wanted"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/other"))
        .respond_with(html("other"))
        .expect(0)
        .mount(&server)
        .await;

    let runner = runner(test_config(), &db);
    let result = runner.acquire(None, Some(&wanted.id)).await.unwrap();
    assert_eq!(result.acquisitions, 1);
    assert!(source(&runner, &wanted.id).last_content_hash.is_some());
    assert!(source(&runner, &other.id).is_pending_initial());

    let missing = runner.acquire(None, Some("no-such-source")).await;
    assert!(matches!(missing, Err(SentinelError::UnknownSource(_))));
}

#[tokio::test]
async fn test_shutdown_before_start_marks_run_interrupted() {
    let server = MockServer::start().await;
    let (_dir, db) = temp_database();
    register(&db, &format!("{}/", server.uri()), ScopeKind::Host, true);
    Mock::given(method("GET"))
        .respond_with(html("never"))
        .expect(0)
        .mount(&server)
        .await;

    let (stop, shutdown) = watch::channel(false);
    let runner = runner(test_config(), &db).with_shutdown(shutdown);
    stop.send(true).unwrap();

    let result = runner.run(RunOptions::default()).await.unwrap();
    assert!(result.interrupted);
    assert_eq!(result.pages_fetched, 0);

    let run_id = result.run_id.unwrap();
    let recorded = lock_storage(&runner.storage()).unwrap().get_run(run_id).unwrap();
    assert_eq!(recorded.status, RunStatus::Interrupted);
}

#[tokio::test]
async fn test_failed_run_releases_the_lock() {
    let (_dir, db) = temp_database();
    let runner = runner(test_config(), &db);

    assert!(runner.acquire(None, Some("missing")).await.is_err());
    let runs = lock_storage(&runner.storage()).unwrap().recent_runs(1).unwrap();
    assert_eq!(runs[0].status, RunStatus::Failed);

    // The failed run no longer holds the lock
    assert!(runner.check(None).await.is_ok());
}
