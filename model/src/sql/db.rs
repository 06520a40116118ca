//! Abstract interface to a SQL database.

use crate::pagination::Page;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use derive_more::{Display, From};
use futures::{Stream, StreamExt, TryStreamExt};
use std::fmt::Display;

pub mod mock;
pub mod postgres;

/// Errors returned by the database.
pub trait Error: Sized + Send + Sync + std::error::Error + 'static {
    /// Wrap a custom message into this error type.
    fn custom(msg: impl Display) -> Self;

    /// An error indicating that a query returned more than the `expected` number of rows.
    fn too_many_rows(expected: usize) -> Self {
        Self::custom(format!(
            "query result has more rows than the expected {expected}"
        ))
    }

    /// An error indicating that a query which was expected to return some rows did not.
    fn empty_rows() -> Self {
        Self::custom("query result is empty")
    }
}

/// A column in a list of columns selected from a query.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SelectColumn<'a> {
    /// A named column
    #[display(fmt = "{}", _0)]
    Col(&'a str),
    /// Select all columns.
    #[display(fmt = "*")]
    All,
}

/// Select every column of a table.
pub const ALL: &[SelectColumn<'static>] = &[SelectColumn::All];

/// The type of a column in a table schema.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum Type {
    #[display(fmt = "int4")]
    Int4,
    #[display(fmt = "int8")]
    Int8,
    #[display(fmt = "text")]
    Text,
    #[display(fmt = "timestamptz")]
    Timestamp,
}

/// What happens to a referencing row when the row it references is deleted.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum OnDelete {
    #[display(fmt = "SET NULL")]
    SetNull,
    #[display(fmt = "CASCADE")]
    Cascade,
}

/// A column in a table schema.
///
/// Every table also has an implicit auto-incrementing `id` primary key, which is not listed among
/// its schema columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SchemaColumn {
    name: &'static str,
    ty: Type,
    nullable: bool,
    unique: bool,
    references: Option<(&'static str, OnDelete)>,
}

impl SchemaColumn {
    /// A required column.
    pub const fn new(name: &'static str, ty: Type) -> Self {
        Self {
            name,
            ty,
            nullable: false,
            unique: false,
            references: None,
        }
    }

    /// Allow `NULL` in this column.
    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Require values in this column to be distinct.
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Make this column a foreign key to the `id` of `table`.
    pub const fn references(mut self, table: &'static str, on_delete: OnDelete) -> Self {
        self.references = Some((table, on_delete));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn ty(&self) -> Type {
        self.ty
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn foreign_key(&self) -> Option<(&'static str, OnDelete)> {
        self.references
    }
}

/// Column assignments for an `INSERT` or `UPDATE` statement.
pub type Assignments = Vec<(&'static str, Value)>;

/// A connection to the database.
#[async_trait]
pub trait Connection: Clone + Send + Sync + 'static {
    /// Errors returned from queries.
    type Error: Error;

    /// A `SELECT` query which can be executed against the database.
    type Select<'a>: Select<Error = Self::Error>
    where
        Self: 'a;

    /// Create a table if it does not exist already.
    async fn create_table(
        &self,
        table: &'static str,
        columns: &'static [SchemaColumn],
    ) -> Result<(), Self::Error>;

    /// Start a `SELECT` query.
    ///
    /// `columns` indicates the columns to include in the query results. The resulting [`Select`]
    /// represents a statement of the form `SELECT columns FROM table`. The query can be refined,
    /// for example by adding a `WHERE` clause, using the approriate methods on the [`Select`] object
    /// before running it.
    fn select<'a>(&'a self, columns: &'a [SelectColumn<'a>], table: &'a str) -> Self::Select<'a>;

    /// Insert a single row and return its newly assigned `id`.
    ///
    /// Columns which are not assigned are set to `NULL`.
    async fn insert(&self, table: &'static str, values: Assignments) -> Result<i32, Self::Error>;

    /// Assign `values` to the row of `table` with the given `id`.
    ///
    /// Returns `false` if there is no such row.
    async fn update(
        &self,
        table: &'static str,
        id: i32,
        values: Assignments,
    ) -> Result<bool, Self::Error>;

    /// Delete the row of `table` with the given `id`.
    ///
    /// Returns `false` if there is no such row.
    async fn delete(&self, table: &'static str, id: i32) -> Result<bool, Self::Error>;
}

/// A primitive value supported by a SQL database.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, From)]
pub enum Value {
    /// A text string.
    Text(String),
    /// A 4-byte signed integer.
    Int4(i32),
    /// An 8-byte signed integer.
    Int8(i64),
    /// A point in time.
    Timestamp(DateTime<Utc>),
    /// The absence of a value.
    ///
    /// This sorts after every other value, like `NULL` in PostgreSQL.
    #[from(ignore)]
    Null,
}

impl Value {
    /// The SQL type of this value.
    pub fn ty(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Int4(_) => "int4",
            Self::Int8(_) => "int8",
            Self::Timestamp(_) => "timestamptz",
            Self::Null => "null",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.into())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Types which can be decoded from a [`Value`].
pub trait FromValue: Sized {
    /// Decode `value`, or return [`None`] if it has the wrong type.
    fn from_value(value: Value) -> Option<Self>;
}

impl FromValue for Value {
    fn from_value(value: Value) -> Option<Self> {
        Some(value)
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Int4(x) => Some(x),
            Value::Int8(x) => x.try_into().ok(),
            _ => None,
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Int4(x) => Some(x.into()),
            Value::Int8(x) => Some(x),
            _ => None,
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Timestamp(t) => Some(t),
            _ => None,
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            value => T::from_value(value).map(Some),
        }
    }
}

/// A comparison operator in a `WHERE` clause.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum Op {
    #[display(fmt = "=")]
    Eq,
    #[display(fmt = "!=")]
    Ne,
    #[display(fmt = "<")]
    Lt,
    #[display(fmt = "<=")]
    Le,
    #[display(fmt = ">")]
    Gt,
    #[display(fmt = ">=")]
    Ge,
    /// Case-insensitive pattern match, where `%` matches any sequence of characters and `_` matches
    /// any single character. Either can be escaped with `\`.
    #[display(fmt = "ILIKE")]
    ILike,
}

/// A clause modifying a SQL statement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Clause {
    /// A `WHERE` clause.
    Where {
        /// The column to filter.
        column: String,
        /// The operation used to filter values of `column`.
        op: Op,
        /// Parameter to `op`.
        param: Value,
    },
    /// A `WHERE column IS [NOT] NULL` clause.
    IsNull { column: String, null: bool },
    /// An `ORDER BY` clause.
    OrderBy { column: String, descending: bool },
    /// Return at most this many rows.
    Limit(usize),
    /// Skip this many rows.
    Offset(usize),
}

/// Escape `%`, `_` and `\` in `s` so that it matches literally in an [`Op::ILike`] pattern.
pub fn escape_like(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// A `SELECT` query which can be executed against the database.
pub trait Select: Send {
    /// Errors returned by this query.
    type Error: Error;
    /// Rows returned by this query.
    type Row: Row<Error = Self::Error>;
    /// An asynchronous stream of rows.
    type Stream: Stream<Item = Result<Self::Row, Self::Error>> + Unpin + Send;

    /// Add a clause to the query.
    fn clause(self, clause: Clause) -> Self;

    /// Run the query and get a stream of results.
    fn stream(self) -> Self::Stream;
}

/// An extension trait for [`Select`] that provides some higher-level functions.
#[async_trait]
pub trait SelectExt: Select {
    /// Add a `WHERE` clause to the query.
    fn filter(self, column: impl Into<String>, op: Op, param: impl Into<Value>) -> Self;

    /// Only include rows where `column` is `NULL`.
    fn is_null(self, column: impl Into<String>) -> Self;

    /// Only include rows where `column` is not `NULL`.
    fn not_null(self, column: impl Into<String>) -> Self;

    /// Order the results by `column`, largest first.
    fn newest_first(self, column: impl Into<String>) -> Self;

    /// Only return the rows in the window of `page`, with `size` rows per page.
    fn page(self, page: Page, size: usize) -> Self;

    /// Run a query which is expected to return a single row.
    ///
    /// # Errors
    ///
    /// This method will fail if the query does not return exactly one row.
    async fn one(self) -> Result<Self::Row, Self::Error>;

    /// Run a query and collect the results.
    async fn many(self) -> Result<Vec<Self::Row>, Self::Error>;

    /// Run a query which is expected to return either 0 or 1 rows.
    ///
    /// # Errors
    ///
    /// This method will fail if the query does not return exactly 0 or 1 rows.
    async fn opt(self) -> Result<Option<Self::Row>, Self::Error>;
}

#[async_trait]
impl<T: Select> SelectExt for T {
    fn filter(self, column: impl Into<String>, op: Op, param: impl Into<Value>) -> Self {
        self.clause(Clause::Where {
            column: column.into(),
            op,
            param: param.into(),
        })
    }

    fn is_null(self, column: impl Into<String>) -> Self {
        self.clause(Clause::IsNull {
            column: column.into(),
            null: true,
        })
    }

    fn not_null(self, column: impl Into<String>) -> Self {
        self.clause(Clause::IsNull {
            column: column.into(),
            null: false,
        })
    }

    fn newest_first(self, column: impl Into<String>) -> Self {
        self.clause(Clause::OrderBy {
            column: column.into(),
            descending: true,
        })
    }

    fn page(self, page: Page, size: usize) -> Self {
        self.clause(Clause::Limit(size))
            .clause(Clause::Offset(page.offset(size)))
    }

    async fn opt(self) -> Result<Option<Self::Row>, Self::Error> {
        let mut rows = self.stream();
        let Some(row) = rows.next().await else { return Ok(None); };
        if rows.next().await.is_some() {
            return Err(Self::Error::too_many_rows(1));
        }
        row.map(Some)
    }

    async fn one(self) -> Result<Self::Row, Self::Error> {
        self.opt().await?.ok_or_else(Self::Error::empty_rows)
    }

    async fn many(self) -> Result<Vec<Self::Row>, Self::Error> {
        self.stream().try_collect().await
    }
}

/// A row in a database table.
pub trait Row: Sized + Send {
    /// Errors returned by row operations.
    type Error: Error;

    /// Get the value of `column` in this row.
    ///
    /// # Errors
    ///
    /// This method will fail if the specified column does not exist.
    fn column(&self, column: &str) -> Result<Value, Self::Error>;
}

/// An extension trait for [`Row`] that decodes columns into Rust types.
pub trait RowExt: Row {
    /// Get the value of `column`, decoded as a `T`.
    fn get<T: FromValue>(&self, column: &str) -> Result<T, Self::Error>;
}

impl<R: Row> RowExt for R {
    fn get<T: FromValue>(&self, column: &str) -> Result<T, Self::Error> {
        let value = self.column(column)?;
        let ty = value.ty();
        T::from_value(value).ok_or_else(|| {
            Self::Error::custom(format!(
                "column {column} has unexpected type {ty} (expected {})",
                std::any::type_name::<T>()
            ))
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn escape_like_patterns() {
        assert_eq!(escape_like("50% off_now\\"), "50\\% off\\_now\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn decode_values() {
        assert_eq!(i32::from_value(Value::Int8(7)), Some(7));
        assert_eq!(i32::from_value(Value::Int8(i64::MAX)), None);
        assert_eq!(Option::<String>::from_value(Value::Null), Some(None));
        assert_eq!(String::from_value(Value::Null), None);
        assert_eq!(
            Option::<i32>::from_value(Value::Int4(3)),
            Some(Some(3))
        );
    }

    #[test]
    fn null_sorts_last() {
        assert!(Value::Int4(i32::MAX) < Value::Null);
        assert!(Value::Timestamp(Utc::now()) < Value::Null);
        assert_eq!(Value::from(None::<i32>), Value::Null);
    }
}
