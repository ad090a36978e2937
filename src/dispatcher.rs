//! Background scheduler assigning queued tasks to idle connections

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use sqlx::sqlite::SqliteConnectOptions;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::config::Config;
use crate::connection::Connection;
use crate::task::Task;

/// The pool dispatcher: drains the task queue and hands each task to the
/// first idle connection.
///
/// Idle connections live in a channel sized to the pool. Assigning a task
/// moves the connection out of the channel, which makes double-assignment
/// unrepresentable; the connection is pushed back once the task finishes.
/// Waiting on the two channels replaces the scan-and-sleep polling the
/// design inherits from, with the same FIFO assignment guarantee: tasks are
/// dequeued strictly in enqueue order and each one is assigned before the
/// next is dequeued.
pub(crate) struct Dispatcher {
   queue: mpsc::UnboundedReceiver<Task>,
   shutdown: watch::Receiver<bool>,
   options: Arc<SqliteConnectOptions>,
   config: Config,
   busy_flags: Vec<Arc<AtomicBool>>,
}

impl Dispatcher {
   pub(crate) fn new(
      queue: mpsc::UnboundedReceiver<Task>,
      shutdown: watch::Receiver<bool>,
      options: Arc<SqliteConnectOptions>,
      config: Config,
      busy_flags: Vec<Arc<AtomicBool>>,
   ) -> Self {
      Self {
         queue,
         shutdown,
         options,
         config,
         busy_flags,
      }
   }

   /// Dispatcher lifecycle: initialize the pool, run the assignment loop,
   /// then tear everything down.
   ///
   /// Queued tasks still pending at shutdown are dropped; their awaiting
   /// callers observe [`Error::DatabaseClosed`](crate::Error::DatabaseClosed)
   /// rather than hanging. In-flight tasks run to completion before their
   /// connections are closed.
   pub(crate) async fn run(mut self) {
      let Some(connections) = self.init_connections().await else {
         // Shut down before the pool ever came up; pending tasks are
         // dropped along with the queue receiver.
         debug!("pool dispatcher stopped before initialization completed");
         return;
      };

      let capacity = connections.len();
      let (idle_tx, mut idle_rx) = mpsc::channel::<Connection>(capacity);
      for connection in connections {
         idle_tx
            .try_send(connection)
            .unwrap_or_else(|_| unreachable!("idle channel sized to the pool"));
      }

      loop {
         // FIFO dequeue: the next task is picked before any connection is
         // awaited, so assignment order follows enqueue order.
         let task = tokio::select! {
            _ = self.shutdown.changed() => break,
            task = self.queue.recv() => match task {
               Some(task) => task,
               // Every facade handle is gone; nothing can enqueue anymore
               None => break,
            },
         };

         let mut connection = tokio::select! {
            // Dropping the task here completes its caller with a closed error
            _ = self.shutdown.changed() => break,
            connection = idle_rx.recv() => {
               connection.expect("dispatcher holds an idle sender")
            }
         };

         // Execution runs concurrently with the dispatch loop; the
         // connection returns to the idle channel when the task finishes.
         let idle = idle_tx.clone();
         tokio::spawn(async move {
            connection.run(task).await;
            let _ = idle.send(connection).await;
         });
      }

      // Fail any still-queued tasks, then collect every connection back
      // from the idle channel (waiting out in-flight work) and close it.
      self.queue.close();
      while self.queue.try_recv().is_ok() {}
      for _ in 0..capacity {
         match idle_rx.recv().await {
            Some(connection) => connection.close().await,
            None => break,
         }
      }
      debug!("pool dispatcher stopped");
   }

   /// Opens the initial connection batch, retrying the whole batch at a
   /// fixed delay until it succeeds.
   ///
   /// This is the one place where retry-until-success is correct: no task
   /// has been assigned yet, so nothing can be abandoned by waiting.
   /// Returns `None` when shutdown is requested before the pool is up.
   async fn init_connections(&mut self) -> Option<Vec<Connection>> {
      loop {
         match self.open_batch().await {
            Ok(connections) => {
               debug!(pool_size = connections.len(), "pool connections opened");
               return Some(connections);
            }
            Err(err) => {
               warn!(
                  error = %err,
                  retry_in = ?self.config.init_retry_delay,
                  "could not initialize pool connections"
               );
            }
         }

         tokio::select! {
            _ = self.shutdown.changed() => return None,
            _ = tokio::time::sleep(self.config.init_retry_delay) => {}
         }
      }
   }

   /// Opens one connection per busy flag; on any failure the partial batch
   /// is closed and the whole batch is reported failed.
   async fn open_batch(&self) -> crate::Result<Vec<Connection>> {
      let mut connections = Vec::with_capacity(self.busy_flags.len());
      for busy in &self.busy_flags {
         match Connection::open(
            Arc::clone(&self.options),
            Arc::clone(busy),
            self.config.max_task_attempts,
            self.config.retry_backoff,
         )
         .await
         {
            Ok(connection) => connections.push(connection),
            Err(err) => {
               for connection in connections {
                  connection.close().await;
               }
               return Err(err.into());
            }
         }
      }
      Ok(connections)
   }
}
