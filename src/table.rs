//! Typed table access layered over the task pool

use std::marker::PhantomData;

use sqlx::sqlite::SqliteRow;
use tokio::sync::oneshot;
use tracing::warn;

use crate::database::Database;
use crate::error::{Error, Result};
use crate::schema::{SqlValue, TableSchema};
use crate::task::TaskOutcome;

/// A record type stored in one table.
///
/// Implementors register their column layout once through
/// [`schema`](Record::schema); [`values`](Record::values) and
/// [`from_row`](Record::from_row) must produce and consume values in that
/// same column order.
pub trait Record: Sized + Send + 'static {
   /// Column layout of this record's table
   fn schema() -> TableSchema;

   /// Field values in schema order, one per column
   fn values(&self) -> Vec<SqlValue>;

   /// Rebuilds a record from a result row, reading columns by ordinal
   fn from_row(row: &SqliteRow) -> Result<Self>;
}

/// Typed handle to one table, created together with its `CREATE TABLE`
/// statement.
#[derive(Debug)]
pub struct Table<T: Record> {
   name: String,
   db: Database,
   schema: TableSchema,
   _record: PhantomData<fn() -> T>,
}

impl<T: Record> Table<T> {
   /// Declares the table and executes its `CREATE TABLE IF NOT EXISTS`
   /// statement through the pool.
   pub async fn create(db: Database, name: impl Into<String>) -> Result<Self> {
      let name = name.into();
      let schema = T::schema();
      if schema.columns().is_empty() {
         return Err(Error::EmptySchema { table: name });
      }

      let outcome = db.execute(schema.create_table_sql(&name)).await?;
      if let Some(error) = &outcome.last_error {
         warn!(table = %name, error = %error, "create table statement failed");
      }

      Ok(Self {
         name,
         db,
         schema,
         _record: PhantomData,
      })
   }

   /// Inserts records in one multi-row `INSERT` statement.
   ///
   /// An empty slice is a no-op.
   pub async fn insert(&self, values: &[T]) -> Result<TaskOutcome> {
      self.write(values, false).await
   }

   /// Like [`insert`](Self::insert), but `INSERT OR REPLACE`, overwriting
   /// rows with a matching primary key.
   pub async fn replace(&self, values: &[T]) -> Result<TaskOutcome> {
      self.write(values, true).await
   }

   async fn write(&self, values: &[T], replace: bool) -> Result<TaskOutcome> {
      if values.is_empty() {
         return Ok(TaskOutcome::default());
      }

      let verb = if replace { "INSERT OR REPLACE" } else { "INSERT" };
      let mut sql = format!("{verb} INTO \"{}\" VALUES ", self.name);
      for (index, value) in values.iter().enumerate() {
         if index > 0 {
            sql.push_str(", ");
         }
         sql.push_str(&self.row_literal(value));
      }
      self.db.execute(sql).await
   }

   /// Renders one VALUES tuple; auto-increment columns always pass `null`
   /// so the database assigns them.
   fn row_literal(&self, value: &T) -> String {
      let values = value.values();
      debug_assert_eq!(
         values.len(),
         self.schema.columns().len(),
         "record values must match the schema column count"
      );

      let mut tuple = String::from("(");
      for (index, (column, value)) in self.schema.columns().iter().zip(values).enumerate() {
         if index > 0 {
            tuple.push(',');
         }
         if column.is_auto_increment() {
            tuple.push_str("null");
         } else {
            tuple.push_str(&value.to_literal());
         }
      }
      tuple.push(')');
      tuple
   }

   /// Fetches all records, optionally filtered.
   ///
   /// `where_clause` is appended verbatim after `WHERE` — sanitize any user
   /// input going into it (see [`sanitize`](crate::sanitize)). `alias`
   /// aliases the table name for use inside the clause.
   ///
   /// A row that fails to decode truncates the result at that point; the
   /// failure is logged, matching the pool's swallow-and-log policy.
   pub async fn all(&self, where_clause: Option<&str>, alias: Option<&str>) -> Result<Vec<T>> {
      let mut sql = format!("SELECT * FROM \"{}\"", self.name);
      if let Some(alias) = alias {
         sql.push_str(" AS ");
         sql.push_str(alias);
      }
      if let Some(clause) = where_clause {
         sql.push_str(" WHERE ");
         sql.push_str(clause);
      }

      let (rows_tx, rows_rx) = oneshot::channel();
      self
         .db
         .query(sql, move |mut cursor| async move {
            let mut records = Vec::new();
            while let Some(row) = cursor.next().await {
               match T::from_row(&row) {
                  Ok(record) => records.push(record),
                  Err(err) => {
                     warn!(error = %err, "failed to decode row, truncating result");
                     break;
                  }
               }
            }
            let _ = rows_tx.send(records);
            Ok(())
         })
         .await?;

      // The consumer never ran only if the query failed before producing a
      // cursor; the swallow policy turns that into an empty result.
      Ok(rows_rx.await.unwrap_or_default())
   }

   /// Fetches records whose primary key equals `id`.
   pub async fn get_by_id(&self, id: impl Into<SqlValue>) -> Result<Vec<T>> {
      let Some(index) = self.schema.primary_key_index() else {
         return Err(Error::NoPrimaryKey {
            table: self.name.clone(),
         });
      };

      let column = self.schema.columns()[index].name();
      let filter = format!("{column} = {}", id.into().to_literal());
      self.all(Some(&filter), None).await
   }

   pub fn name(&self) -> &str {
      &self.name
   }
}
