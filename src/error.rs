//! Error types for sqlx-sqlite-task-pool

use thiserror::Error;

/// Errors that may occur when working with sqlx-sqlite-task-pool
#[derive(Error, Debug)]
pub enum Error {
   /// IO error when accessing database files. Standard library IO errors
   /// are converted to this variant.
   #[error("IO error: {0}")]
   Io(#[from] std::io::Error),

   /// Error from the sqlx library. Standard sqlx errors are converted to this variant
   #[error("Sqlx error: {0}")]
   Sqlx(#[from] sqlx::Error),

   /// Database has been closed and cannot be used
   #[error("Database has been closed")]
   DatabaseClosed,

   /// Table lookup by primary key was attempted on a schema without one
   #[error("Table {table} has no primary key column")]
   NoPrimaryKey {
      /// Name of the table that was queried
      table: String,
   },

   /// A table was declared with zero columns
   #[error("Table {table} has no columns")]
   EmptySchema {
      /// Name of the table that was declared
      table: String,
   },
}

/// A type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;
