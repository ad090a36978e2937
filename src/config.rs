//! Configuration for the connection pool and its dispatcher

use std::time::Duration;

/// Configuration for a [`Database`](crate::Database) connection pool
///
/// # Examples
///
/// ```
/// use sqlx_sqlite_task_pool::Config;
/// use std::time::Duration;
///
/// // Use defaults
/// let config = Config::default();
///
/// // Override just one field
/// let config = Config {
///     pool_size: 2,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct Config {
   /// Number of live connections held by the pool
   ///
   /// The dispatcher never opens more sessions than this and never assigns
   /// more than one task to a connection at a time.
   ///
   /// Default: 5
   pub pool_size: usize,

   /// Delay between attempts to open the initial connection batch
   ///
   /// When the database is unreachable at startup, the dispatcher retries
   /// the whole batch at this interval until it succeeds or the pool is
   /// closed. No task is lost while initialization is retrying; work stays
   /// queued.
   ///
   /// Default: 2 seconds
   pub init_retry_delay: Duration,

   /// Maximum execution attempts for a single task
   ///
   /// Only transient session-level failures (lost or unusable connection)
   /// count toward this limit; query errors never retry.
   ///
   /// Default: 3
   pub max_task_attempts: u32,

   /// Base backoff between retry attempts of a failed task
   ///
   /// The actual delay grows linearly with the attempt number.
   ///
   /// Default: 50 milliseconds
   pub retry_backoff: Duration,
}

impl Default for Config {
   fn default() -> Self {
      Self {
         pool_size: 5,
         init_retry_delay: Duration::from_secs(2),
         max_task_attempts: 3,
         retry_backoff: Duration::from_millis(50),
      }
   }
}
