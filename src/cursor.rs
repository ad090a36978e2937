//! Row cursors handed to caller-supplied result consumers

use std::future::Future;

use futures::future::BoxFuture;
use sqlx::sqlite::SqliteRow;
use tokio::sync::mpsc;

use crate::Result;

/// Number of rows buffered between the executing connection and the consumer
pub(crate) const ROW_BUFFER: usize = 32;

/// Async cursor over the rows produced by a query task.
///
/// The executing connection feeds rows into the cursor while the consumer
/// drains it, so large result sets never need to be collected up front.
pub struct RowCursor {
   rows: mpsc::Receiver<SqliteRow>,
}

impl RowCursor {
   pub(crate) fn channel() -> (mpsc::Sender<SqliteRow>, Self) {
      let (tx, rx) = mpsc::channel(ROW_BUFFER);
      (tx, Self { rows: rx })
   }

   /// Returns the next row, or `None` once the result set is exhausted.
   ///
   /// A stream-level failure also ends the cursor; the error is recorded on
   /// the task outcome rather than surfaced here.
   pub async fn next(&mut self) -> Option<SqliteRow> {
      self.rows.recv().await
   }
}

/// Boxed result consumer carried by a query task.
///
/// Invoked exactly once with the task's row cursor, even when the query
/// produces zero rows. Errors returned by the consumer are logged and
/// recorded on the task outcome, never propagated to the awaiting caller.
pub type RowConsumer = Box<dyn FnOnce(RowCursor) -> BoxFuture<'static, Result<()>> + Send>;

/// Wraps a plain async closure into a [`RowConsumer`].
pub fn row_consumer<F, Fut>(f: F) -> RowConsumer
where
   F: FnOnce(RowCursor) -> Fut + Send + 'static,
   Fut: Future<Output = Result<()>> + Send + 'static,
{
   Box::new(move |cursor| Box::pin(f(cursor)))
}
