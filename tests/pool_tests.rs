//! Integration tests for the connection pool and its dispatcher.
//!
//! Each test runs against its own tempfile database so reads and writes go
//! through a real SQLite session.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use sqlx::Row;
use sqlx_sqlite_task_pool::{Config, Database, Error};
use tokio::time::timeout;

struct TestDb {
   db: Database,
   _temp_dir: tempfile::TempDir,
}

fn setup_test_db(pool_size: usize) -> TestDb {
   let temp_dir = tempfile::tempdir().expect("temp dir");
   let db = Database::connect(
      temp_dir.path().join("pool.db"),
      Some(Config {
         pool_size,
         ..Default::default()
      }),
   );

   TestDb {
      db,
      _temp_dir: temp_dir,
   }
}

async fn create_names_table(db: &Database) {
   let outcome = db
      .execute("CREATE TABLE names (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL)")
      .await
      .unwrap();
   assert!(outcome.is_success(), "{outcome:?}");
}

async fn fetch_names(db: &Database) -> Vec<String> {
   let (tx, rx) = tokio::sync::oneshot::channel();
   db.query(
      "SELECT name FROM names ORDER BY id",
      move |mut cursor| async move {
         let mut names = Vec::new();
         while let Some(row) = cursor.next().await {
            names.push(row.try_get::<String, _>(0)?);
         }
         let _ = tx.send(names);
         Ok(())
      },
   )
   .await
   .unwrap();

   rx.await.expect("consumer ran")
}

// ============================================================================
// Assignment & Completion
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_load_loses_no_tasks() {
   let test_db = setup_test_db(4);
   create_names_table(&test_db.db).await;

   let mut handles = Vec::new();
   for i in 0..48 {
      let db = test_db.db.clone();
      handles.push(tokio::spawn(async move {
         db.execute(format!("INSERT INTO names (name) VALUES ('user {i}')"))
            .await
      }));
   }

   // Busy connections never exceed the pool capacity while work is in flight
   for _ in 0..20 {
      assert!(test_db.db.busy_connections() <= 4);
      tokio::time::sleep(Duration::from_millis(2)).await;
   }

   for handle in handles {
      let outcome = handle.await.unwrap().unwrap();
      assert!(outcome.is_success(), "{outcome:?}");
   }

   assert_eq!(fetch_names(&test_db.db).await.len(), 48);
}

#[tokio::test]
async fn test_single_connection_runs_tasks_sequentially() {
   let test_db = setup_test_db(1);
   create_names_table(&test_db.db).await;

   // join! polls in declaration order, so the three tasks are enqueued
   // A, B, C; with one connection they must also execute in that order.
   let (a, b, c) = tokio::join!(
      test_db.db.execute("INSERT INTO names (name) VALUES ('A')"),
      test_db.db.execute("INSERT INTO names (name) VALUES ('B')"),
      test_db.db.execute("INSERT INTO names (name) VALUES ('C')"),
   );
   assert!(a.unwrap().is_success());
   assert!(b.unwrap().is_success());
   assert!(c.unwrap().is_success());

   assert_eq!(fetch_names(&test_db.db).await, vec!["A", "B", "C"]);
}

// ============================================================================
// Result Consumers
// ============================================================================

#[tokio::test]
async fn test_zero_row_query_invokes_consumer_exactly_once() {
   let test_db = setup_test_db(2);
   create_names_table(&test_db.db).await;

   let calls = Arc::new(AtomicUsize::new(0));
   let rows = Arc::new(AtomicUsize::new(0));
   let (calls_in, rows_in) = (Arc::clone(&calls), Arc::clone(&rows));

   let outcome = test_db
      .db
      .query("SELECT * FROM names WHERE 1 = 0", move |mut cursor| {
         async move {
            calls_in.fetch_add(1, Ordering::SeqCst);
            while cursor.next().await.is_some() {
               rows_in.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
         }
      })
      .await
      .unwrap();

   assert!(outcome.is_success(), "{outcome:?}");
   assert_eq!(calls.load(Ordering::SeqCst), 1);
   assert_eq!(rows.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_query_failure_resolves_with_recorded_error() {
   let test_db = setup_test_db(2);

   let calls = Arc::new(AtomicUsize::new(0));
   let calls_in = Arc::clone(&calls);
   let outcome = test_db
      .db
      .query("SELECT * FROM missing_table", move |mut cursor| async move {
         calls_in.fetch_add(1, Ordering::SeqCst);
         while cursor.next().await.is_some() {}
         Ok(())
      })
      .await
      .unwrap();

   // The awaited call resolves; the failure is a diagnostic, not an error
   assert!(outcome.last_error.is_some());
   assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Empty Commands
// ============================================================================

#[tokio::test]
async fn test_empty_command_is_a_noop() {
   let test_db = setup_test_db(2);

   let outcome = test_db.db.execute("").await.unwrap();
   assert!(outcome.is_success());

   let outcome = test_db.db.execute("   \n").await.unwrap();
   assert!(outcome.is_success());
}

#[tokio::test]
async fn test_empty_command_resolves_before_pool_is_up() {
   // Unreachable database location keeps initialization retrying forever;
   // an empty command must still return immediately since it never
   // enqueues anything.
   let temp_dir = tempfile::tempdir().unwrap();
   let db = Database::connect(
      temp_dir.path().join("missing").join("pool.db"),
      Some(Config {
         pool_size: 1,
         init_retry_delay: Duration::from_secs(60),
         ..Default::default()
      }),
   );

   let outcome = timeout(Duration::from_millis(100), db.execute(""))
      .await
      .expect("no-op must not wait for the pool")
      .unwrap();
   assert!(outcome.is_success());

   db.close().await.unwrap();
}

// ============================================================================
// Initialization
// ============================================================================

#[tokio::test]
async fn test_initialization_retries_until_database_is_reachable() {
   let temp_dir = tempfile::tempdir().unwrap();
   let db_dir = temp_dir.path().join("late");
   let db = Database::connect(
      db_dir.join("pool.db"),
      Some(Config {
         pool_size: 2,
         init_retry_delay: Duration::from_millis(50),
         ..Default::default()
      }),
   );

   // Work submitted while initialization is failing stays queued
   let pending = {
      let db = db.clone();
      tokio::spawn(async move { db.execute("CREATE TABLE t (id INTEGER)").await })
   };

   tokio::time::sleep(Duration::from_millis(150)).await;
   std::fs::create_dir_all(&db_dir).unwrap();

   let outcome = timeout(Duration::from_secs(5), pending)
      .await
      .expect("pool should come up once the directory exists")
      .unwrap()
      .unwrap();
   assert!(outcome.is_success(), "{outcome:?}");

   db.close().await.unwrap();
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test]
async fn test_close_is_idempotent() {
   let test_db = setup_test_db(3);
   create_names_table(&test_db.db).await;

   test_db.db.close().await.unwrap();
   test_db.db.close().await.unwrap();
   assert!(test_db.db.is_closed());

   let err = test_db.db.execute("INSERT INTO names (name) VALUES ('late')").await;
   assert!(matches!(err, Err(Error::DatabaseClosed)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_close_fails_queued_tasks_and_finishes_inflight_work() {
   let test_db = setup_test_db(1);
   create_names_table(&test_db.db).await;

   // Occupy the only connection long enough for close to land first
   let inflight = {
      let db = test_db.db.clone();
      tokio::spawn(async move {
         db.query("SELECT 1", |mut cursor| async move {
            while cursor.next().await.is_some() {}
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
         })
         .await
      })
   };

   tokio::time::sleep(Duration::from_millis(50)).await;
   let queued = {
      let db = test_db.db.clone();
      tokio::spawn(async move { db.execute("INSERT INTO names (name) VALUES ('queued')").await })
   };
   tokio::time::sleep(Duration::from_millis(50)).await;

   test_db.db.close().await.unwrap();

   // The task holding the connection ran to completion
   assert!(inflight.await.unwrap().unwrap().is_success());

   // The queued task was abandoned with a closed error instead of hanging
   assert!(matches!(
      queued.await.unwrap(),
      Err(Error::DatabaseClosed)
   ));
}
