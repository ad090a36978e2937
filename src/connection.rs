//! Pooled connections: one live SQLite session executing one task at a time

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use sqlx::Connection as _;
use sqlx::ConnectOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use tracing::{debug, warn};

use crate::cursor::RowCursor;
use crate::error::{Error, Result};
use crate::task::{Task, TaskOutcome};

/// One live database session managed by the pool.
///
/// The dispatcher moves a connection out of the idle channel for the whole
/// duration of a task, so a connection never sees two tasks concurrently.
/// The busy flag mirrors that ownership for diagnostics: set before the
/// session is touched, cleared only after the task is marked finished.
pub(crate) struct Connection {
   options: Arc<SqliteConnectOptions>,
   /// Live session handle; `None` after a session-level failure, reopened
   /// lazily on the next attempt
   session: Option<SqliteConnection>,
   busy: Arc<AtomicBool>,
   max_attempts: u32,
   retry_backoff: Duration,
   /// Forces the next N attempts to fail with a transient error
   #[cfg(test)]
   pub(crate) inject_transient: u32,
}

impl Connection {
   /// Opens the underlying session eagerly, as pool initialization does for
   /// the whole batch.
   pub(crate) async fn open(
      options: Arc<SqliteConnectOptions>,
      busy: Arc<AtomicBool>,
      max_attempts: u32,
      retry_backoff: Duration,
   ) -> sqlx::Result<Self> {
      let session = options.as_ref().connect().await?;
      Ok(Self {
         options,
         session: Some(session),
         busy,
         max_attempts,
         retry_backoff,
         #[cfg(test)]
         inject_transient: 0,
      })
   }

   /// Executes one task to completion.
   ///
   /// Transient session-level failures discard the session handle and retry
   /// the same task up to `max_attempts` times; every other failure is
   /// logged and recorded on the outcome. On all exit paths the task is
   /// marked finished and the busy flag is cleared, so neither a bad query
   /// nor a lost session can wedge the pool.
   pub(crate) async fn run(&mut self, mut task: Task) {
      self.busy.store(true, Ordering::SeqCst);

      let had_consumer = task.consumer.is_some();
      let mut outcome = TaskOutcome::default();
      let mut attempt: u32 = 0;
      loop {
         attempt += 1;
         match self.attempt(&task.command, &mut task.consumer).await {
            Ok(()) => {
               outcome.last_error = None;
               break;
            }
            Err(err) => {
               outcome.last_error = Some(err.to_string());
               let transient = is_transient(&err);
               if transient {
                  // Session is unusable; reopen lazily on the next use
                  self.session = None;
               }

               // A consumer is single-shot: once it has run, the task
               // cannot be replayed even for a transient failure.
               let replayable = task.consumer.is_some() || !had_consumer;
               if transient && replayable && attempt < self.max_attempts {
                  warn!(
                     command = %task.command,
                     error = %err,
                     attempt,
                     "transient failure, retrying task"
                  );
                  tokio::time::sleep(self.retry_backoff * attempt).await;
                  continue;
               }

               warn!(command = %task.command, error = %err, "task failed");
               break;
            }
         }
      }

      task.finish(outcome);
      self.busy.store(false, Ordering::SeqCst);
   }

   /// One execution attempt against the live session.
   async fn attempt(
      &mut self,
      command: &str,
      consumer: &mut Option<crate::cursor::RowConsumer>,
   ) -> Result<()> {
      #[cfg(test)]
      if self.inject_transient > 0 {
         self.inject_transient -= 1;
         return Err(Error::Sqlx(sqlx::Error::Io(std::io::Error::other(
            "injected transient failure",
         ))));
      }

      if self.session.is_none() {
         debug!("reopening dropped session");
         self.session = Some(self.options.as_ref().connect().await?);
      }
      let session = self.session.as_mut().expect("session was just opened");

      match consumer.take() {
         // Fire-and-forget: no rows expected (inserts, updates, DDL)
         None => {
            sqlx::query(command).execute(&mut *session).await?;
            Ok(())
         }
         Some(consumer) => {
            let (rows_tx, cursor) = RowCursor::channel();
            let consumer_fut = consumer(cursor);

            // Pump the row stream into the cursor while the consumer
            // drains it. Dropping the sender ends the cursor, so the
            // consumer always observes end-of-rows, even on failure.
            let pump = async move {
               let mut stream = sqlx::query(command).fetch(&mut *session);
               let mut stream_err = None;
               while let Some(next) = stream.next().await {
                  match next {
                     Ok(row) => {
                        if rows_tx.send(row).await.is_err() {
                           // Consumer stopped reading early
                           break;
                        }
                     }
                     Err(err) => {
                        stream_err = Some(err);
                        break;
                     }
                  }
               }
               stream_err
            };

            let (stream_err, consumer_result) = futures::join!(pump, consumer_fut);
            if let Some(err) = stream_err {
               return Err(err.into());
            }
            consumer_result
         }
      }
   }

   /// Closes and releases the session. Safe when the session was never
   /// opened or already lost.
   pub(crate) async fn close(mut self) {
      if let Some(session) = self.session.take()
         && let Err(err) = session.close().await
      {
         warn!(error = %err, "error closing pooled connection");
      }
   }
}

/// Whether an error means the session itself is unusable (as opposed to the
/// statement being at fault).
fn is_transient(err: &Error) -> bool {
   match err {
      Error::Io(_) => true,
      Error::Sqlx(err) => matches!(
         err,
         sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::WorkerCrashed
      ),
      _ => false,
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::cursor::row_consumer;
   use std::sync::atomic::AtomicUsize;

   async fn open_test_connection(max_attempts: u32) -> (Connection, tempfile::TempDir) {
      let dir = tempfile::tempdir().expect("temp dir");
      let options = SqliteConnectOptions::new()
         .filename(dir.path().join("conn.db"))
         .create_if_missing(true);
      let conn = Connection::open(
         Arc::new(options),
         Arc::new(AtomicBool::new(false)),
         max_attempts,
         Duration::from_millis(1),
      )
      .await
      .expect("open connection");

      (conn, dir)
   }

   #[tokio::test]
   async fn transient_failure_is_retried_to_success() {
      let (mut conn, _dir) = open_test_connection(3).await;
      conn.inject_transient = 1;

      let (task, rx) = Task::new("CREATE TABLE t (id INTEGER)".into(), None);
      conn.run(task).await;

      let outcome = rx.await.expect("task completed");
      assert!(outcome.is_success(), "retry should recover: {outcome:?}");
   }

   #[tokio::test]
   async fn retries_are_bounded() {
      let (mut conn, _dir) = open_test_connection(3).await;
      conn.inject_transient = 10;

      let (task, rx) = Task::new("CREATE TABLE t (id INTEGER)".into(), None);
      conn.run(task).await;

      // Task still finishes; the failure is recorded, not surfaced
      let outcome = rx.await.expect("task completed");
      assert!(outcome.last_error.is_some());
      assert_eq!(conn.inject_transient, 10 - 3, "exactly three attempts");
   }

   #[tokio::test]
   async fn query_failure_is_swallowed_and_recorded() {
      let (mut conn, _dir) = open_test_connection(3).await;

      let (task, rx) = Task::new("INSERT INTO missing_table VALUES (1)".into(), None);
      conn.run(task).await;

      let outcome = rx.await.expect("task completed");
      assert!(outcome.last_error.is_some());
      assert!(!conn.busy.load(Ordering::SeqCst), "busy cleared on failure");
   }

   #[tokio::test]
   async fn consumer_runs_exactly_once_with_zero_rows() {
      let (mut conn, _dir) = open_test_connection(3).await;

      let (task, rx) = Task::new("CREATE TABLE t (id INTEGER)".into(), None);
      conn.run(task).await;
      rx.await.expect("table created");

      let calls = Arc::new(AtomicUsize::new(0));
      let rows_seen = Arc::new(AtomicUsize::new(0));
      let (calls_in, rows_in) = (Arc::clone(&calls), Arc::clone(&rows_seen));
      let (task, rx) = Task::new(
         "SELECT * FROM t WHERE 1 = 0".into(),
         Some(row_consumer(move |mut cursor| async move {
            calls_in.fetch_add(1, Ordering::SeqCst);
            while cursor.next().await.is_some() {
               rows_in.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
         })),
      );
      conn.run(task).await;

      let outcome = rx.await.expect("query completed");
      assert!(outcome.is_success(), "{outcome:?}");
      assert_eq!(calls.load(Ordering::SeqCst), 1);
      assert_eq!(rows_seen.load(Ordering::SeqCst), 0);
   }
}
