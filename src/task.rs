//! Task descriptors and completion signaling

use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::sync::oneshot;

use crate::cursor::RowConsumer;

/// Result of one completed unit of SQL work.
///
/// Completion is the only signal the awaiting caller receives; execution
/// failures are logged and recorded here instead of being propagated, so a
/// failed task and a successful one both resolve the awaited call.
#[derive(Debug, Default, Clone, Serialize)]
pub struct TaskOutcome {
   /// Diagnostic from the last execution failure, if the task did not
   /// succeed cleanly
   pub last_error: Option<String>,
}

impl TaskOutcome {
   /// Whether the task executed without recording any failure
   pub fn is_success(&self) -> bool {
      self.last_error.is_none()
   }
}

/// One unit of enqueued SQL work.
///
/// Created by the facade on each `execute`/`query` call, assigned to exactly
/// one connection by the dispatcher, and completed exactly once. Never
/// reused.
pub(crate) struct Task {
   pub(crate) command: String,
   pub(crate) consumer: Option<RowConsumer>,
   finished: AtomicBool,
   done: oneshot::Sender<TaskOutcome>,
}

impl Task {
   pub(crate) fn new(
      command: String,
      consumer: Option<RowConsumer>,
   ) -> (Self, oneshot::Receiver<TaskOutcome>) {
      let (done, rx) = oneshot::channel();
      let task = Self {
         command,
         consumer,
         finished: AtomicBool::new(false),
         done,
      };
      (task, rx)
   }

   /// Marks the task finished and wakes the awaiting caller.
   ///
   /// Consuming `self` makes completing twice unrepresentable. The receiver
   /// may already be gone (caller dropped its future); that is fine, the
   /// work itself still ran.
   pub(crate) fn finish(self, outcome: TaskOutcome) {
      let already = self.finished.swap(true, Ordering::SeqCst);
      debug_assert!(!already, "task completed twice");
      let _ = self.done.send(outcome);
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[tokio::test]
   async fn finish_wakes_the_awaiting_side() {
      let (task, rx) = Task::new("SELECT 1".into(), None);
      task.finish(TaskOutcome::default());

      let outcome = rx.await.expect("sender completed");
      assert!(outcome.is_success());
   }

   #[tokio::test]
   async fn dropped_task_fails_the_awaiting_side() {
      let (task, rx) = Task::new("SELECT 1".into(), None);
      drop(task);

      assert!(rx.await.is_err());
   }

   #[test]
   fn outcome_records_failures() {
      let outcome = TaskOutcome {
         last_error: Some("no such table: t".into()),
      };
      assert!(!outcome.is_success());
   }
}
