//! Instantiation of the abstract [`db`](super) interface for PostgreSQL.
//!
//! This instantiation is built on [`async-postgres`].

use super::{Assignments, Clause, SchemaColumn, SelectColumn, Value};
use async_std::{sync::Arc, task::spawn};
use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, Utc};
use derive_more::From;
use futures::{stream::BoxStream, StreamExt, TryFutureExt, TryStreamExt};
use itertools::Itertools;
use snafu::Snafu;
use std::fmt::{Debug, Display};
use tokio_postgres::types::{accepts, to_sql_checked, FromSql, IsNull, ToSql, Type};

pub use async_postgres::{Config, Row};

/// Errors returned by a PostgreSQL database.
#[derive(Debug, Snafu, From)]
pub enum Error {
    #[from]
    Sql {
        source: async_postgres::Error,
    },
    Connect {
        source: std::io::Error,
    },
    UnsupportedType {
        ty: Type,
    },
    Custom {
        message: String,
    },
}

impl super::Error for Error {
    fn custom(msg: impl Display) -> Self {
        Self::Custom {
            message: msg.to_string(),
        }
    }
}

/// A connection to a PostgreSQL databsae.
#[derive(Clone)]
pub struct Connection(Arc<tokio_postgres::Client>);

impl Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Connection").finish()
    }
}

impl Connection {
    /// Establish a new connection with the given [`Config`].
    pub async fn new(config: Config) -> Result<Self, Error> {
        let (client, conn) = async_postgres::connect(config)
            .await
            .map_err(|source| Error::Connect { source })?;
        spawn(async move {
            if let Err(err) = conn.await {
                tracing::error!("postgres connection closed: {err}");
            }
        });
        Ok(Self(Arc::new(client)))
    }

    async fn query<'a, I>(
        &self,
        statement: &str,
        params: I,
    ) -> Result<BoxStream<'static, Result<Row, Error>>, Error>
    where
        I: Debug + IntoIterator<Item = &'a Value>,
        I::IntoIter: ExactSizeIterator,
    {
        tracing::debug!(?params, "{}", statement);
        let params = params.into_iter().map(|param| {
            let param: &dyn ToSql = param;
            param
        });
        let stream = self
            .0
            .query_raw(statement, params)
            .await
            .map_err(Error::from)?;
        Ok(stream.map_err(Error::from).boxed())
    }

    /// Run a statement of the form `... RETURNING id` and get the returned ID, if any.
    async fn returning_id(&self, statement: &str, params: &[Value]) -> Result<Option<i32>, Error> {
        let mut rows = self.query(statement, params).await?;
        match rows.next().await {
            Some(row) => Ok(Some(row?.try_get("id")?)),
            None => Ok(None),
        }
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
    ) -> Result<(), Self::Error> {
        let columns = std::iter::once("id serial PRIMARY KEY".to_string())
            .chain(columns.iter().map(|col| {
                let mut def = format!("{} {}", col.name(), col.ty());
                if !col.is_nullable() {
                    def.push_str(" NOT NULL");
                }
                if col.is_unique() {
                    def.push_str(" UNIQUE");
                }
                if let Some((table, on_delete)) = col.foreign_key() {
                    def.push_str(&format!(" REFERENCES {table} (id) ON DELETE {on_delete}"));
                }
                def
            }))
            .join(", ");
        self.query(
            format!("CREATE TABLE IF NOT EXISTS {table} ({columns})").as_str(),
            [],
        )
        .await?;
        Ok(())
    }

    fn select<'a>(&'a self, select: &'a [SelectColumn<'a>], table: &'a str) -> Self::Select<'a> {
        Select::new(self, select, table)
    }

    async fn insert(&self, table: &'static str, values: Assignments) -> Result<i32, Self::Error> {
        let (columns, params): (Vec<_>, Vec<_>) = values.into_iter().unzip();
        // In the query itself, just reference a parameter by number. We will pass the value itself
        // into the query as a parameter to prevent SQL injection.
        let placeholders = (1..=params.len()).map(|i| format!("${i}")).join(",");
        let statement = format!(
            "INSERT INTO {table} ({}) VALUES ({placeholders}) RETURNING id",
            columns.iter().join(",")
        );
        self.returning_id(&statement, &params)
            .await?
            .ok_or_else(|| <Error as super::Error>::empty_rows())
    }

    async fn update(
        &self,
        table: &'static str,
        id: i32,
        values: Assignments,
    ) -> Result<bool, Self::Error> {
        let (columns, mut params): (Vec<_>, Vec<_>) = values.into_iter().unzip();
        let assignments = columns
            .iter()
            .enumerate()
            .map(|(i, col)| format!("{col} = ${}", i + 1))
            .join(", ");
        params.push(Value::Int4(id));
        let statement = format!(
            "UPDATE {table} SET {assignments} WHERE id = ${} RETURNING id",
            params.len()
        );
        Ok(self.returning_id(&statement, &params).await?.is_some())
    }

    async fn delete(&self, table: &'static str, id: i32) -> Result<bool, Self::Error> {
        let statement = format!("DELETE FROM {table} WHERE id = $1 RETURNING id");
        Ok(self
            .returning_id(&statement, &[Value::Int4(id)])
            .await?
            .is_some())
    }
}

/// A query against a PostgreSQL database.
pub struct Select<'a> {
    conn: &'a Connection,
    select: &'a [SelectColumn<'a>],
    table: &'a str,
    conditions: Vec<String>,
    order: Vec<String>,
    limit: Option<usize>,
    offset: Option<usize>,
    params: Vec<Value>,
}

impl<'a> Select<'a> {
    fn new(conn: &'a Connection, select: &'a [SelectColumn<'a>], table: &'a str) -> Self {
        Self {
            conn,
            select,
            table,
            conditions: Default::default(),
            order: Default::default(),
            limit: None,
            offset: None,
            params: Default::default(),
        }
    }
}

impl<'a> super::Select for Select<'a> {
    type Error = Error;
    type Row = Row;
    type Stream = BoxStream<'a, Result<Self::Row, Self::Error>>;

    fn clause(mut self, clause: Clause) -> Self {
        match clause {
            Clause::Where { column, op, param } => {
                self.params.push(param);
                self.conditions
                    .push(format!("{column} {op} ${}", self.params.len()));
            }
            Clause::IsNull { column, null } => {
                let not = if null { "" } else { "NOT " };
                self.conditions.push(format!("{column} IS {not}NULL"));
            }
            Clause::OrderBy { column, descending } => {
                let dir = if descending { "DESC" } else { "ASC" };
                self.order.push(format!("{column} {dir}"));
            }
            Clause::Limit(n) => self.limit = Some(n),
            Clause::Offset(n) => self.offset = Some(n),
        }
        self
    }

    fn stream(self) -> Self::Stream {
        // Format the `SELECT` part of the query.
        let columns = self.select.iter().map(|col| col.to_string()).join(", ");
        let mut statement = format!("SELECT {columns} FROM {}", self.table);

        // Format the `WHERE` clause if there is one.
        if !self.conditions.is_empty() {
            statement.push_str(&format!(
                " WHERE {}",
                self.conditions.iter().join(" AND ")
            ));
        }
        if !self.order.is_empty() {
            statement.push_str(&format!(" ORDER BY {}", self.order.iter().join(", ")));
        }
        if let Some(limit) = self.limit {
            statement.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = self.offset {
            statement.push_str(&format!(" OFFSET {offset}"));
        }

        // The async block is necessary to move data owned by `self` into the future, so we can
        // return the future without returning a reference to the local `self`.
        let conn = self.conn;
        let params = self.params;
        async move {
            let rows = conn.query(statement.as_str(), &params).await?;
            Ok(rows)
        }
        .try_flatten_stream()
        .boxed()
    }
}

impl super::Row for Row {
    type Error = Error;

    fn column(&self, column: &str) -> Result<Value, Self::Error> {
        Ok(self.try_get(column)?)
    }
}

impl ToSql for Value {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>
    where
        Self: Sized,
    {
        match self {
            Self::Text(x) => x.to_sql(ty, out),
            Self::Int4(x) => x.to_sql(ty, out),
            Self::Int8(x) => x.to_sql(ty, out),
            Self::Timestamp(x) => x.to_sql(ty, out),
            Self::Null => Ok(IsNull::Yes),
        }
    }

    accepts!(INT4, INT8, TEXT, VARCHAR, TIMESTAMPTZ);
    to_sql_checked!();
}

impl<'a> FromSql<'a> for Value {
    fn from_sql(
        ty: &Type,
        raw: &'a [u8],
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync + 'static>> {
        match ty {
            &Type::INT4 => Ok(Self::Int4(i32::from_sql(ty, raw)?)),
            &Type::INT8 => Ok(Self::Int8(i64::from_sql(ty, raw)?)),
            &Type::TEXT | &Type::VARCHAR => Ok(Self::Text(String::from_sql(ty, raw)?)),
            &Type::TIMESTAMPTZ => Ok(Self::Timestamp(DateTime::<Utc>::from_sql(ty, raw)?)),
            ty => Err(Box::new(Error::UnsupportedType { ty: ty.clone() })),
        }
    }

    fn from_sql_null(
        _ty: &Type,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync + 'static>> {
        Ok(Self::Null)
    }

    accepts!(INT4, INT8, TEXT, VARCHAR, TIMESTAMPTZ);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        init_logging,
        sql::db::{Connection as _, Op, RowExt, SelectExt, Type as ColumnType, ALL},
    };
    use rand::RngCore;
    use std::env;
    use std::process::Command;
    use std::str;

    struct Db {
        name: String,
        port: u16,
    }

    impl Db {
        fn create() -> Option<Self> {
            if env::var("POSTGRES_TESTS").is_err() {
                tracing::warn!("skipping postgres test since POSTGRES_TESTS are not enabled");
                return None;
            }

            let name = format!("db{}", rand::thread_rng().next_u64());
            let port = env::var("POSTGRES_TESTS_PORT")
                .map(|port| port.parse().unwrap())
                .unwrap_or(5432);

            tracing::info!("Creating test DB {name} on port {port}");
            let output = Command::new("createdb")
                .arg("-p")
                .arg(&port.to_string())
                .arg(&name)
                .output()
                .unwrap();
            if !output.status.success() {
                panic!(
                    "createdb failed: {}",
                    str::from_utf8(&output.stderr).unwrap()
                );
            }

            Some(Self { name, port })
        }

        async fn connect(&self) -> Connection {
            let mut config = Config::default();
            config
                .dbname(&self.name)
                .user("test")
                .host("localhost")
                .port(self.port);
            Connection::new(config).await.unwrap()
        }
    }

    impl Drop for Db {
        fn drop(&mut self) {
            tracing::info!("Dropping test DB {}", self.name);
            let output = Command::new("dropdb")
                .arg("-p")
                .arg(&self.port.to_string())
                .arg(&self.name)
                .output()
                .unwrap();
            if !output.status.success() {
                tracing::error!("dropdb failed: {}", str::from_utf8(&output.stderr).unwrap());
            }
        }
    }

    macro_rules! postgres_test {
        () => {
            match Db::create() {
                Some(db) => db,
                None => return,
            }
        };
    }

    const PARCELS: &[SchemaColumn] = &[
        SchemaColumn::new("product", ColumnType::Text),
        SchemaColumn::new("shipped_at", ColumnType::Timestamp).nullable(),
    ];

    #[async_std::test]
    async fn test_postgres_round_trip() {
        init_logging();
        let db = postgres_test!();
        let conn = db.connect().await;
        conn.create_table("parcels", PARCELS).await.unwrap();
        // Creating a table is idempotent.
        conn.create_table("parcels", PARCELS).await.unwrap();

        let now = Utc::now();
        let first = conn
            .insert("parcels", vec![("product", "Lamp".into()), ("shipped_at", now.into())])
            .await
            .unwrap();
        let second = conn
            .insert("parcels", vec![("product", "Desk".into())])
            .await
            .unwrap();
        assert_ne!(first, second);

        let rows = conn
            .select(ALL, "parcels")
            .filter("product", Op::ILike, "%a%")
            .newest_first("id")
            .many()
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(RowExt::get::<String>(&rows[0], "product").unwrap(), "Lamp");

        let row = conn
            .select(ALL, "parcels")
            .is_null("shipped_at")
            .one()
            .await
            .unwrap();
        assert_eq!(RowExt::get::<i32>(&row, "id").unwrap(), second);
        assert_eq!(
            RowExt::get::<Option<DateTime<Utc>>>(&row, "shipped_at").unwrap(),
            None
        );

        assert!(conn
            .update("parcels", second, vec![("product", "Chair".into())])
            .await
            .unwrap());
        assert!(conn.delete("parcels", first).await.unwrap());
        assert!(!conn.delete("parcels", first).await.unwrap());
    }
}
