//! Integration tests running the session pool over real SQLite connections.
//!
//! Every physical connection of the "default" section points at the same
//! temporary database file, so a statement committed on one connection is
//! visible on every other.

use db_session_pool::db::{ConnectionProvider, SessionPool, SqlxProvider};
use db_session_pool::models::{ConnectParams, Driver, Section, SessionId};
use db_session_pool::DbError;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

async fn setup(connections: u32) -> (SessionPool, Arc<SqlxProvider>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pool.db");
    let params = ConnectParams {
        database: path.to_str().unwrap().to_string(),
        ..ConnectParams::default()
    };
    let section = Section::new("default", Driver::Sqlite, connections, params).unwrap();
    let sections = HashMap::from([("default".to_string(), section)]);

    let provider = Arc::new(SqlxProvider::new());
    let pool = SessionPool::connect(sections, provider.clone()).await.unwrap();

    let setup_session = SessionId::new("setup").unwrap();
    let conn = pool.get_connection("default", &setup_session).await.unwrap();
    provider
        .execute(
            conn.alias(),
            "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
        )
        .await
        .unwrap();
    pool.release_connections(&setup_session).await.unwrap();

    // Keep the directory alive for the duration of the test
    (pool, provider, dir)
}

/// Rows matched by an UPDATE that changes nothing, seen from a fresh session.
async fn visible(pool: &SessionPool, provider: &SqlxProvider, id: i64) -> u64 {
    let observer = SessionId::new("observer").unwrap();
    let conn = pool.get_connection("default", &observer).await.unwrap();
    let rows = provider
        .execute(
            conn.alias(),
            &format!("UPDATE items SET name = name WHERE id = {id}"),
        )
        .await
        .unwrap();
    pool.release_connections(&observer).await.unwrap();
    rows
}

#[tokio::test]
async fn test_bootstrap_opens_sqlite_connections() {
    let (pool, provider, _dir) = setup(2).await;
    let snapshot = pool.snapshot().await;
    assert_eq!(snapshot.idle_count("default"), 2);

    for info in &snapshot.idle["default"] {
        let stats = provider.stats(&info.alias).await.unwrap();
        assert_eq!(stats.open_connections, 1);
        assert_eq!(provider.pool(&info.alias).await.unwrap().driver(), Driver::Sqlite);
    }
}

#[tokio::test]
async fn test_commit_persists_and_keeps_lease() {
    let (pool, provider, _dir) = setup(2).await;
    let s1 = SessionId::new("s1").unwrap();

    let txn = pool.begin_transaction(&s1).await.unwrap();
    let rows = provider
        .execute(txn.alias(), "INSERT INTO items (id, name) VALUES (1, 'widget')")
        .await
        .unwrap();
    assert_eq!(rows, 1);

    // statements routed through the session land in the same transaction
    let routed = pool.get_connection("default", &s1).await.unwrap();
    provider
        .execute(routed.alias(), "INSERT INTO items (id, name) VALUES (2, 'gadget')")
        .await
        .unwrap();

    pool.commit(&s1).await.unwrap();
    assert_eq!(pool.snapshot().await.leased_count("s1", "default"), 1);

    pool.release_connections(&s1).await.unwrap();
    assert_eq!(visible(&pool, &provider, 1).await, 1);
    assert_eq!(visible(&pool, &provider, 2).await, 1);
}

#[tokio::test]
async fn test_rollback_discards_changes() {
    let (pool, provider, _dir) = setup(2).await;
    let s1 = SessionId::new("s1").unwrap();

    let txn = pool.begin_transaction(&s1).await.unwrap();
    provider
        .execute(txn.alias(), "INSERT INTO items (id, name) VALUES (7, 'ghost')")
        .await
        .unwrap();
    pool.rollback(&s1).await.unwrap();
    pool.release_connections(&s1).await.unwrap();

    assert_eq!(visible(&pool, &provider, 7).await, 0);
}

#[tokio::test]
async fn test_master_window_then_transaction_share_connection() {
    let (pool, provider, _dir) = setup(1).await;
    let s1 = SessionId::new("s1").unwrap();

    pool.begin_master_window(&s1).await.unwrap();
    let master = pool.get_connection("default", &s1).await.unwrap();
    let txn = pool.begin_transaction(&s1).await.unwrap();
    assert_eq!(master.alias(), txn.alias());

    provider
        .execute(txn.alias(), "INSERT INTO items (id, name) VALUES (3, 'pinned')")
        .await
        .unwrap();
    pool.commit(&s1).await.unwrap();
    pool.end_master_window(&s1).await.unwrap();
    pool.release_connections(&s1).await.unwrap();

    assert_eq!(visible(&pool, &provider, 3).await, 1);
}

#[tokio::test]
async fn test_ping_and_close() {
    let (pool, provider, _dir) = setup(1).await;
    let s1 = SessionId::new("s1").unwrap();
    let conn = pool.get_connection("default", &s1).await.unwrap();

    conn.ping().await.unwrap();
    assert_eq!(conn.open_connections().await.unwrap(), 1);

    conn.close().await.unwrap();
    assert!(conn.is_closed());
    assert!(conn.ping().await.is_err());
    assert!(matches!(
        provider.execute(conn.alias(), "SELECT 1").await,
        Err(DbError::Driver { .. })
    ));
}

#[tokio::test]
async fn test_unreachable_database_is_provision_error() {
    let params = ConnectParams {
        database: "/nonexistent-dir/for/sure/pool.db".to_string(),
        ..ConnectParams::default()
    };
    let section = Section::new("default", Driver::Sqlite, 1, params).unwrap();
    let sections = HashMap::from([("default".to_string(), section)]);

    let result = SessionPool::connect(sections, Arc::new(SqlxProvider::new())).await;
    match result {
        Err(DbError::Provision { section, .. }) => assert_eq!(section, "default"),
        other => panic!("expected a provision error, got {other:?}"),
    }
}

fn sqlite_section(name: &str, path: &str) -> Section {
    let params = ConnectParams {
        database: path.to_string(),
        ..ConnectParams::default()
    };
    Section::new(name, Driver::Sqlite, 1, params).unwrap()
}

#[tokio::test]
async fn test_connect_retry_after_partial_failure() {
    let dir = tempfile::tempdir().unwrap();
    let default_db = dir.path().join("default.db");
    let slave_db = dir.path().join("slave.db");
    let sections = |slave_path: &str| {
        HashMap::from([
            (
                "default".to_string(),
                sqlite_section("default", default_db.to_str().unwrap()),
            ),
            ("slave".to_string(), sqlite_section("slave", slave_path)),
        ])
    };
    let provider = Arc::new(SqlxProvider::new());

    let broken = sections("/nonexistent-dir/for/sure/slave.db");
    match SessionPool::connect(broken, provider.clone()).await {
        Err(DbError::Provision { section, .. }) => assert_eq!(section, "slave"),
        other => panic!("expected a provision error, got {other:?}"),
    }
    assert!(provider.ping("default").await.is_err());

    // same provider, slave path fixed
    let fixed = sections(slave_db.to_str().unwrap());
    let pool = SessionPool::connect(fixed, provider.clone()).await.unwrap();
    let snapshot = pool.snapshot().await;
    assert!(snapshot.idle["default"].iter().any(|c| c.alias == "default"));
    assert_eq!(snapshot.idle_count("slave"), 1);
    provider.ping("default").await.unwrap();
}
