//! Mock instantiation of the abstract [`db`](super) interface for PostgreSQL.
//!
//! This instantiation is built on a simple in-memory database. It is useful for testing in
//! isolation from an actual database.
#![cfg(any(test, feature = "mocks"))]

use super::{Assignments, Clause, OnDelete, Op, SchemaColumn, SelectColumn, Value};
use async_std::sync::{Arc, RwLock};
use async_trait::async_trait;
use derive_more::From;
use futures::{
    stream::{self, BoxStream},
    StreamExt, TryFutureExt,
};
use snafu::Snafu;
use std::cmp::Ordering;
use std::collections::hash_map::{Entry, HashMap};
use std::fmt::Display;

/// Errors returned by the in-memory database.
#[derive(Debug, Snafu, From)]
#[snafu(display("mock DB error: {}", message))]
pub struct Error {
    message: String,
}

impl super::Error for Error {
    fn custom(msg: impl Display) -> Self {
        Self {
            message: msg.to_string(),
        }
    }
}

/// The in-memory database.
#[derive(Debug, Default)]
struct Db {
    tables: HashMap<String, Table>,
}

impl Db {
    fn table(&self, name: &str) -> Result<&Table, Error> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::from(format!("no such table {name}")))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table, Error> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| Error::from(format!("no such table {name}")))
    }

    /// Delete a row and apply the `ON DELETE` actions of foreign keys referencing it.
    fn delete(&mut self, table: &str, id: i32) -> Result<bool, Error> {
        let mut pending = vec![(table.to_string(), id)];
        let mut found = false;
        while let Some((table, id)) = pending.pop() {
            let rows = &mut self.table_mut(&table)?.rows;
            let before = rows.len();
            rows.retain(|row| row.id() != Some(id));
            if rows.len() == before {
                continue;
            }
            found = true;

            for referencing in self.tables.values_mut() {
                for (column, target, on_delete) in &referencing.foreign_keys {
                    if *target != table {
                        continue;
                    }
                    for row in &mut referencing.rows {
                        if row.columns.get(*column) != Some(&Value::Int4(id)) {
                            continue;
                        }
                        match on_delete {
                            OnDelete::SetNull => {
                                row.columns.insert(column.to_string(), Value::Null);
                            }
                            OnDelete::Cascade => {
                                if let Some(id) = row.id() {
                                    pending.push((referencing.name.clone(), id));
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(found)
    }
}

/// An in-memory table.
#[derive(Debug)]
struct Table {
    name: String,
    schema: Vec<String>,
    foreign_keys: Vec<(&'static str, &'static str, OnDelete)>,
    unique: Vec<&'static str>,
    rows: Vec<Row>,
    next_id: i32,
}

impl Table {
    fn new(name: String, columns: &[SchemaColumn]) -> Self {
        Self {
            name,
            schema: std::iter::once("id")
                .chain(columns.iter().map(|col| col.name()))
                .map(String::from)
                .collect(),
            foreign_keys: columns
                .iter()
                .filter_map(|col| {
                    let (table, on_delete) = col.foreign_key()?;
                    Some((col.name(), table, on_delete))
                })
                .collect(),
            unique: columns
                .iter()
                .filter(|col| col.is_unique())
                .map(|col| col.name())
                .collect(),
            rows: vec![],
            next_id: 1,
        }
    }

    fn check_columns<'a>(&self, columns: impl IntoIterator<Item = &'a str>) -> Result<(), Error> {
        for col in columns {
            if !self.schema.iter().any(|name| name == col) {
                return Err(Error::from(format!(
                    "table {} has no column {col}",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// Fail if `values` would repeat a non-`NULL` value of a unique column in a row other than
    /// `id`.
    fn check_unique(&self, id: Option<i32>, values: &Assignments) -> Result<(), Error> {
        for (col, val) in values {
            if *val == Value::Null || !self.unique.contains(col) {
                continue;
            }
            if self
                .rows
                .iter()
                .any(|row| row.id() != id && row.columns.get(*col) == Some(val))
            {
                return Err(Error::from(format!(
                    "duplicate key value violates unique constraint on {}.{col}",
                    self.name
                )));
            }
        }
        Ok(())
    }

    fn find_mut(&mut self, id: i32) -> Option<&mut Row> {
        self.rows.iter_mut().find(|row| row.id() == Some(id))
    }
}

/// A connection to the in-memory database.
#[derive(Clone, Debug)]
pub struct Connection(Arc<RwLock<Db>>);

impl Connection {
    /// Create a new database and connect to it.
    ///
    /// This will create a connection to a fresh, empty database. It will not be connected or
    /// related to any previous connection or database. Once the database is created, this
    /// connection can be [cloned](Clone) in order to create multiple simultaneous connections to
    /// the same database.
    pub fn create() -> Self {
        Self(Default::default())
    }
}

#[async_trait]
impl super::Connection for Connection {
    type Error = Error;
    type Select<'a> = Select<'a>;

    async fn create_table(
        &self,
        table: &'static str,
        columns: &'static [SchemaColumn],
    ) -> Result<(), Error> {
        let mut db = self.0.write().await;
        if let Entry::Vacant(e) = db.tables.entry(table.into()) {
            e.insert(Table::new(table.into(), columns));
        }
        Ok(())
    }

    fn select<'a>(&'a self, columns: &'a [SelectColumn<'a>], table: &'a str) -> Self::Select<'a> {
        Select {
            db: &self.0,
            columns,
            table,
            clauses: vec![],
        }
    }

    async fn insert(&self, table: &'static str, values: Assignments) -> Result<i32, Error> {
        let mut db = self.0.write().await;
        let table = db.table_mut(table)?;
        table.check_columns(values.iter().map(|(col, _)| *col))?;
        table.check_unique(None, &values)?;

        let id = table.next_id;
        table.next_id += 1;
        let mut row = Row::new(table.schema.iter().map(|col| (col.clone(), Value::Null)));
        row.columns.insert("id".into(), Value::Int4(id));
        row.assign(values);
        table.rows.push(row);
        Ok(id)
    }

    async fn update(&self, table: &'static str, id: i32, values: Assignments) -> Result<bool, Error> {
        let mut db = self.0.write().await;
        let table = db.table_mut(table)?;
        table.check_columns(values.iter().map(|(col, _)| *col))?;
        table.check_unique(Some(id), &values)?;
        match table.find_mut(id) {
            Some(row) => {
                row.assign(values);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, table: &'static str, id: i32) -> Result<bool, Error> {
        self.0.write().await.delete(table, id)
    }
}

/// A query against an in-memory database.
pub struct Select<'a> {
    db: &'a RwLock<Db>,
    columns: &'a [SelectColumn<'a>],
    table: &'a str,
    clauses: Vec<Clause>,
}

impl<'a> super::Select for Select<'a> {
    type Error = Error;
    type Row = Row;
    type Stream = BoxStream<'a, Result<Self::Row, Self::Error>>;

    fn clause(mut self, clause: Clause) -> Self {
        self.clauses.push(clause);
        self
    }

    fn stream(self) -> Self::Stream {
        async move {
            let db = self.db.read().await;
            let table = db.table(self.table)?;
            table.check_columns(self.clauses.iter().filter_map(|clause| match clause {
                Clause::Where { column, .. }
                | Clause::IsNull { column, .. }
                | Clause::OrderBy { column, .. } => Some(column.as_str()),
                _ => None,
            }))?;
            table.check_columns(self.columns.iter().filter_map(|col| match col {
                SelectColumn::Col(name) => Some(*name),
                SelectColumn::All => None,
            }))?;

            let mut rows = table
                .rows
                .iter()
                .filter(|row| self.clauses.iter().all(|clause| row.test(clause)))
                .cloned()
                .collect::<Vec<_>>();

            // Apply ordering before windowing, like SQL does. Later `ORDER BY` clauses break ties
            // in earlier ones.
            let order = self
                .clauses
                .iter()
                .filter_map(|clause| match clause {
                    Clause::OrderBy { column, descending } => Some((column.as_str(), *descending)),
                    _ => None,
                })
                .collect::<Vec<_>>();
            if !order.is_empty() {
                rows.sort_by(|l, r| {
                    order
                        .iter()
                        .map(|(col, descending)| {
                            let ord = l.columns.get(*col).cmp(&r.columns.get(*col));
                            if *descending {
                                ord.reverse()
                            } else {
                                ord
                            }
                        })
                        .find(|ord| *ord != Ordering::Equal)
                        .unwrap_or(Ordering::Equal)
                });
            }

            let mut offset = 0;
            let mut limit = usize::MAX;
            for clause in &self.clauses {
                match clause {
                    Clause::Offset(n) => offset = *n,
                    Clause::Limit(n) => limit = *n,
                    _ => {}
                }
            }
            let rows = rows
                .into_iter()
                .skip(offset)
                .take(limit)
                .map(|row| Ok(row.project(self.columns)))
                .collect::<Vec<_>>();
            Ok(stream::iter(rows))
        }
        .try_flatten_stream()
        .boxed()
    }
}

/// A row in an in-memory table.
#[derive(Clone, Debug, Default)]
pub struct Row {
    columns: HashMap<String, Value>,
}

impl Row {
    /// Create a row with the given entries.
    fn new(entries: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            columns: entries.into_iter().collect(),
        }
    }

    fn id(&self) -> Option<i32> {
        match self.columns.get("id") {
            Some(Value::Int4(id)) => Some(*id),
            _ => None,
        }
    }

    /// Keep only the selected columns.
    fn project(self, columns: &[SelectColumn]) -> Self {
        if columns.contains(&SelectColumn::All) {
            return self;
        }
        Self::new(columns.iter().filter_map(|col| match col {
            SelectColumn::Col(name) => {
                let value = self.columns.get(*name)?.clone();
                Some((name.to_string(), value))
            }
            SelectColumn::All => None,
        }))
    }

    fn assign(&mut self, values: Assignments) {
        for (col, val) in values {
            self.columns.insert(col.into(), val);
        }
    }

    /// Test if this row should be included based on the given [`Clause`].
    fn test(&self, clause: &Clause) -> bool {
        match clause {
            Clause::Where { column, op, param } => match self.columns.get(column) {
                Some(col) => compare(col, *op, param),
                None => false,
            },
            Clause::IsNull { column, null } => {
                self.columns.get(column).map_or(true, Value::is_null) == *null
            }
            _ => true,
        }
    }
}

/// Evaluate `l op r` with SQL semantics: any comparison involving `NULL` is false.
fn compare(l: &Value, op: Op, r: &Value) -> bool {
    if l.is_null() || r.is_null() {
        return false;
    }
    if let Op::ILike = op {
        return match (l, r) {
            (Value::Text(l), Value::Text(r)) => like(&l.to_lowercase(), &r.to_lowercase()),
            (l, r) => panic!("type mismatch for ILIKE: {l:?}, {r:?}"),
        };
    }
    let ord = match (l, r) {
        (Value::Int4(l), Value::Int8(r)) => i64::from(*l).cmp(r),
        (Value::Int8(l), Value::Int4(r)) => l.cmp(&i64::from(*r)),
        (l, r) if std::mem::discriminant(l) == std::mem::discriminant(r) => l.cmp(r),
        (l, r) => panic!("type mismatch for op {op}: {l:?}, {r:?}"),
    };
    match op {
        Op::Eq => ord == Ordering::Equal,
        Op::Ne => ord != Ordering::Equal,
        Op::Lt => ord == Ordering::Less,
        Op::Le => ord != Ordering::Greater,
        Op::Gt => ord == Ordering::Greater,
        Op::Ge => ord != Ordering::Less,
        Op::ILike => unreachable!(),
    }
}

/// Match `s` against a `LIKE` pattern.
fn like(s: &str, pattern: &str) -> bool {
    let s = s.chars().collect::<Vec<_>>();

    // Tokenize the pattern, resolving escapes.
    enum Token {
        Any,
        One,
        Lit(char),
    }
    let mut tokens = vec![];
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '%' => Token::Any,
            '_' => Token::One,
            '\\' => Token::Lit(chars.next().unwrap_or('\\')),
            c => Token::Lit(c),
        });
    }

    // `matches[j]` is true if the first `i` characters of `s` match the first `j` tokens.
    let mut matches = vec![false; tokens.len() + 1];
    matches[0] = true;
    for (j, token) in tokens.iter().enumerate() {
        matches[j + 1] = matches[j] && matches!(token, Token::Any);
    }
    for c in &s {
        let mut next = vec![false; tokens.len() + 1];
        for (j, token) in tokens.iter().enumerate() {
            next[j + 1] = match token {
                Token::Any => next[j] || matches[j + 1],
                Token::One => matches[j],
                Token::Lit(l) => matches[j] && l == c,
            };
        }
        matches = next;
    }
    matches[tokens.len()]
}

impl super::Row for Row {
    type Error = Error;

    fn column(&self, column: &str) -> Result<Value, Self::Error> {
        self.columns
            .get(column)
            .cloned()
            .ok_or_else(|| format!("no such column {column}").into())
    }
}
