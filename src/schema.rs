//! Schema descriptors, DDL generation, and SQL value serialization
//!
//! Column metadata is registered at construction time through [`Column`] and
//! [`TableSchema`] rather than discovered at runtime, and [`SqlValue`]
//! renders typed values as SQL literals for the generated statements.

use std::fmt::Write as _;

use time::OffsetDateTime;

/// Characters stripped from string values before they are quoted
const ILLEGAL_CHARS: [char; 3] = ['<', '>', '\''];

/// SQL storage type of a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
   /// 32-bit integer (`INTEGER`)
   Integer,
   /// 64-bit integer (`BIGINT`)
   BigInt,
   /// Unsigned 64-bit integer (`BIGINT UNSIGNED`)
   UnsignedBigInt,
   /// Floating point (`REAL`)
   Real,
   /// Boolean, stored as 0/1 (`BOOLEAN`)
   Boolean,
   /// Unbounded text (`TEXT`)
   Text,
   /// Bounded text (`VARCHAR(n)`)
   VarChar(u32),
   /// Raw bytes (`BLOB`)
   Blob,
   /// Datetime stored as unix milliseconds (`BIGINT`)
   TimestampMs,
}

impl ColumnType {
   /// The type name used in generated DDL.
   pub fn sql_type(&self) -> String {
      match self {
         Self::Integer => "INTEGER".into(),
         Self::BigInt => "BIGINT".into(),
         Self::UnsignedBigInt => "BIGINT UNSIGNED".into(),
         Self::Real => "REAL".into(),
         Self::Boolean => "BOOLEAN".into(),
         Self::Text => "TEXT".into(),
         Self::VarChar(length) => format!("VARCHAR({length})"),
         Self::Blob => "BLOB".into(),
         Self::TimestampMs => "BIGINT".into(),
      }
   }
}

/// One column of a table schema.
#[derive(Debug, Clone)]
pub struct Column {
   name: String,
   column_type: ColumnType,
   primary_key: bool,
   not_null: bool,
   auto_increment: bool,
}

impl Column {
   pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
      Self {
         name: name.into(),
         column_type,
         primary_key: false,
         not_null: false,
         auto_increment: false,
      }
   }

   /// Marks this column as the table's primary key
   pub fn primary_key(mut self) -> Self {
      self.primary_key = true;
      self
   }

   /// Adds a NOT NULL constraint
   pub fn not_null(mut self) -> Self {
      self.not_null = true;
      self
   }

   /// Lets the database assign the value; inserts pass `null` for this
   /// column. Only meaningful on an integer primary key.
   pub fn auto_increment(mut self) -> Self {
      self.auto_increment = true;
      self
   }

   pub fn name(&self) -> &str {
      &self.name
   }

   pub fn column_type(&self) -> &ColumnType {
      &self.column_type
   }

   pub fn is_primary_key(&self) -> bool {
      self.primary_key
   }

   pub fn is_auto_increment(&self) -> bool {
      self.auto_increment
   }
}

/// Ordered column list describing one table.
#[derive(Debug, Clone)]
pub struct TableSchema {
   columns: Vec<Column>,
}

impl TableSchema {
   pub fn new(columns: Vec<Column>) -> Self {
      Self { columns }
   }

   pub fn columns(&self) -> &[Column] {
      &self.columns
   }

   /// Index of the primary-key column, if one was declared.
   pub fn primary_key_index(&self) -> Option<usize> {
      self.columns.iter().position(Column::is_primary_key)
   }

   /// Renders the `CREATE TABLE IF NOT EXISTS` statement for this schema.
   pub fn create_table_sql(&self, table: &str) -> String {
      let mut sql = format!("CREATE TABLE IF NOT EXISTS \"{table}\" (");
      for (index, column) in self.columns.iter().enumerate() {
         if index > 0 {
            sql.push_str(", ");
         }
         let _ = write!(sql, "{} {}", column.name, column.column_type.sql_type());
         if column.primary_key {
            sql.push_str(" PRIMARY KEY");
         }
         if column.auto_increment {
            sql.push_str(" AUTOINCREMENT");
         }
         if column.not_null {
            sql.push_str(" NOT NULL");
         }
      }
      sql.push(')');
      sql
   }
}

/// A typed value on its way into a SQL statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
   Null,
   Integer(i64),
   Real(f64),
   Bool(bool),
   Text(String),
   Blob(Vec<u8>),
}

impl SqlValue {
   /// Renders the value as a SQL literal. Strings are sanitized and
   /// single-quoted; booleans render as 0/1; blobs as `X'..'` hex.
   pub fn to_literal(&self) -> String {
      match self {
         Self::Null => "null".into(),
         Self::Integer(value) => value.to_string(),
         Self::Real(value) => value.to_string(),
         Self::Bool(value) => (if *value { "1" } else { "0" }).into(),
         Self::Text(value) => format!("'{}'", sanitize(value)),
         Self::Blob(bytes) => {
            let mut literal = String::with_capacity(bytes.len() * 2 + 3);
            literal.push_str("X'");
            for byte in bytes {
               let _ = write!(literal, "{byte:02X}");
            }
            literal.push('\'');
            literal
         }
      }
   }
}

/// Strips characters that must never reach a quoted literal (`<`, `>`, `'`).
pub fn sanitize(input: &str) -> String {
   input.chars().filter(|c| !ILLEGAL_CHARS.contains(c)).collect()
}

/// Converts a stored unix-millisecond timestamp back to a datetime.
///
/// Out-of-range values clamp to the unix epoch.
pub fn datetime_from_unix_ms(millis: i64) -> OffsetDateTime {
   OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
      .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

impl From<i64> for SqlValue {
   fn from(value: i64) -> Self {
      Self::Integer(value)
   }
}

impl From<i32> for SqlValue {
   fn from(value: i32) -> Self {
      Self::Integer(i64::from(value))
   }
}

impl From<u32> for SqlValue {
   fn from(value: u32) -> Self {
      Self::Integer(i64::from(value))
   }
}

impl From<f64> for SqlValue {
   fn from(value: f64) -> Self {
      Self::Real(value)
   }
}

impl From<bool> for SqlValue {
   fn from(value: bool) -> Self {
      Self::Bool(value)
   }
}

impl From<String> for SqlValue {
   fn from(value: String) -> Self {
      Self::Text(value)
   }
}

impl From<&str> for SqlValue {
   fn from(value: &str) -> Self {
      Self::Text(value.to_owned())
   }
}

impl From<Vec<u8>> for SqlValue {
   fn from(value: Vec<u8>) -> Self {
      Self::Blob(value)
   }
}

/// Datetimes are stored as unix milliseconds.
impl From<OffsetDateTime> for SqlValue {
   fn from(value: OffsetDateTime) -> Self {
      Self::Integer((value.unix_timestamp_nanos() / 1_000_000) as i64)
   }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
   fn from(value: Option<T>) -> Self {
      match value {
         Some(inner) => inner.into(),
         None => Self::Null,
      }
   }
}
