//! Database facade: the public entry point over the pool dispatcher

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use sqlx::sqlite::SqliteConnectOptions;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::config::Config;
use crate::cursor::{RowConsumer, RowCursor, row_consumer};
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::task::{Task, TaskOutcome};

/// SQLite database handle backed by a fixed-size connection pool and a
/// background task dispatcher.
///
/// Every call turns into a task on a FIFO queue; the dispatcher assigns each
/// task to the first idle connection and the call resolves when the task is
/// marked finished. Callers never touch the queue or the connections
/// directly.
///
/// Cloning is cheap and every clone drives the same pool.
#[derive(Clone, Debug)]
pub struct Database {
   inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
   queue: mpsc::UnboundedSender<Task>,
   busy_flags: Vec<Arc<AtomicBool>>,
   closed: AtomicBool,
   shutdown: watch::Sender<bool>,
   dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Database {
   /// Opens a pool against the database file at `path`, creating the file
   /// if missing.
   ///
   /// Returns immediately; the connections are opened by the dispatcher in
   /// the background, retrying at
   /// [`init_retry_delay`](Config::init_retry_delay) until the database is
   /// reachable. Work submitted in the meantime simply stays queued.
   ///
   /// Must be called from within a Tokio runtime.
   pub fn connect(path: impl AsRef<Path>, config: Option<Config>) -> Self {
      let options = SqliteConnectOptions::new()
         .filename(path.as_ref())
         .create_if_missing(true);
      Self::connect_with_options(options, config.unwrap_or_default())
   }

   /// Opens a pool using explicit SQLx connect options.
   pub fn connect_with_options(options: SqliteConnectOptions, config: Config) -> Self {
      // A zero-sized pool could never assign anything
      let pool_size = config.pool_size.max(1);
      let config = Config { pool_size, ..config };

      let busy_flags: Vec<_> = (0..pool_size)
         .map(|_| Arc::new(AtomicBool::new(false)))
         .collect();
      let (queue_tx, queue_rx) = mpsc::unbounded_channel();
      let (shutdown_tx, shutdown_rx) = watch::channel(false);

      let dispatcher = Dispatcher::new(
         queue_rx,
         shutdown_rx,
         Arc::new(options),
         config,
         busy_flags.clone(),
      );
      let handle = tokio::spawn(dispatcher.run());

      Self {
         inner: Arc::new(Inner {
            queue: queue_tx,
            busy_flags,
            closed: AtomicBool::new(false),
            shutdown: shutdown_tx,
            dispatcher: Mutex::new(Some(handle)),
         }),
      }
   }

   /// Executes a command that produces no rows (INSERT, UPDATE, DDL) and
   /// waits for it to finish.
   ///
   /// Execution failures do not fail the returned future; they are logged
   /// and recorded on the [`TaskOutcome`]. An empty command is a no-op that
   /// resolves immediately without enqueuing anything.
   pub async fn execute(&self, command: impl Into<String>) -> Result<TaskOutcome> {
      self.submit(command.into(), None).await
   }

   /// Executes a query and hands its rows to `consumer` through a
   /// [`RowCursor`].
   ///
   /// The consumer is invoked exactly once, even when the query produces no
   /// rows, and the call resolves once both the query and the consumer have
   /// finished. Failure handling matches [`execute`](Self::execute).
   pub async fn query<F, Fut>(&self, command: impl Into<String>, consumer: F) -> Result<TaskOutcome>
   where
      F: FnOnce(RowCursor) -> Fut + Send + 'static,
      Fut: Future<Output = Result<()>> + Send + 'static,
   {
      self
         .submit(command.into(), Some(row_consumer(consumer)))
         .await
   }

   /// Enqueues a task and awaits its completion signal.
   async fn submit(&self, command: String, consumer: Option<RowConsumer>) -> Result<TaskOutcome> {
      if self.inner.closed.load(Ordering::SeqCst) {
         return Err(Error::DatabaseClosed);
      }
      if command.trim().is_empty() {
         return Ok(TaskOutcome::default());
      }

      let (task, done) = Task::new(command, consumer);
      self
         .inner
         .queue
         .send(task)
         .map_err(|_| Error::DatabaseClosed)?;

      // The sender is dropped without completing only when the pool shuts
      // down while the task is still queued.
      done.await.map_err(|_| Error::DatabaseClosed)
   }

   /// Number of connections currently executing a task.
   ///
   /// Diagnostic snapshot; never exceeds [`pool_size`](Self::pool_size).
   pub fn busy_connections(&self) -> usize {
      self
         .inner
         .busy_flags
         .iter()
         .filter(|flag| flag.load(Ordering::SeqCst))
         .count()
   }

   /// Configured pool capacity.
   pub fn pool_size(&self) -> usize {
      self.inner.busy_flags.len()
   }

   /// Whether [`close`](Self::close) has been called.
   pub fn is_closed(&self) -> bool {
      self.inner.closed.load(Ordering::SeqCst)
   }

   /// Stops the dispatcher and closes every connection.
   ///
   /// Idempotent: closing twice is fine and does not reopen anything.
   /// In-flight tasks run to completion; tasks still queued are abandoned
   /// and their callers observe [`Error::DatabaseClosed`]. Subsequent
   /// `execute`/`query` calls fail the same way.
   pub async fn close(&self) -> Result<()> {
      if self.inner.closed.swap(true, Ordering::SeqCst) {
         return Ok(());
      }

      let _ = self.inner.shutdown.send(true);
      let handle = self.inner.dispatcher.lock().await.take();
      if let Some(handle) = handle
         && let Err(err) = handle.await
      {
         warn!(error = %err, "dispatcher task failed during shutdown");
      }
      Ok(())
   }
}
