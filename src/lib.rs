//! # sqlx-sqlite-task-pool
//!
//! A fixed-size SQLite connection pool with a background task dispatcher and
//! a typed table layer, built on SQLx.
//!
//! ## Core Types
//!
//! - **[`Database`]**: Facade over the pool; `execute`/`query` enqueue a task
//!   and resolve when it finishes
//! - **[`Config`]**: Pool size, initialization backoff, and retry policy
//! - **[`RowCursor`]**: Async cursor handed to caller-supplied result
//!   consumers
//! - **[`TaskOutcome`]**: Completion record carrying the last execution
//!   failure, if any
//! - **[`Table`] / [`Record`]**: Typed table access with generated DDL and
//!   literal serialization
//! - **[`Error`]**: Error type for pool operations
//!
//! ## Architecture
//!
//! - **Single dispatcher**: One background task drains a FIFO queue and
//!   assigns each unit of work to the first idle connection
//! - **Ownership-based assignment**: Idle connections live in a channel;
//!   assignment moves the connection out, so a connection never runs two
//!   tasks at once
//! - **Bounded retry**: A task hit by a transient session failure is retried
//!   on a reopened session, at most three attempts by default
//! - **Failures are diagnostics**: Query errors are logged and recorded on
//!   the outcome; the awaited call always resolves
//!
//! ## Example
//!
//! ```no_run
//! use sqlx_sqlite_task_pool::Database;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!    let db = Database::connect("app.db", None);
//!
//!    db.execute("CREATE TABLE IF NOT EXISTS users (id INTEGER PRIMARY KEY, name TEXT)")
//!       .await?;
//!    db.execute("INSERT INTO users (name) VALUES ('Alice')").await?;
//!
//!    db.query("SELECT name FROM users", |mut cursor| async move {
//!       while let Some(row) = cursor.next().await {
//!          let name: String = sqlx::Row::try_get(&row, 0)?;
//!          println!("{name}");
//!       }
//!       Ok(())
//!    })
//!    .await?;
//!
//!    db.close().await?;
//!    Ok(())
//! }
//! ```

mod config;
mod connection;
mod cursor;
mod database;
mod dispatcher;
mod error;
mod schema;
mod table;
mod task;

pub use config::Config;
pub use cursor::{RowConsumer, RowCursor, row_consumer};
pub use database::Database;
pub use error::{Error, Result};
pub use schema::{Column, ColumnType, SqlValue, TableSchema, datetime_from_unix_ms, sanitize};
pub use table::{Record, Table};
pub use task::TaskOutcome;
