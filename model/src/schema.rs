//! The entities stored by the delivery backend and the tables that hold them.

use crate::{
    error::{DbResultExt, Error},
    sql::db::{
        Assignments, Connection, OnDelete, Op, Row, RowExt, SchemaColumn, SelectExt, Type, Value,
        ALL,
    },
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A row type stored in its own table.
pub trait Entity: Sized + Send {
    /// The table holding rows of this type.
    const TABLE: &'static str;

    /// Columns of [`Self::TABLE`], apart from the implicit `id`.
    const COLUMNS: &'static [SchemaColumn];

    /// Decode an entity from a row of [`Self::TABLE`].
    fn from_row<R: Row>(row: &R) -> Result<Self, R::Error>;
}

/// Timestamps maintained on every table.
const CREATED_AT: SchemaColumn = SchemaColumn::new("created_at", Type::Timestamp);
const UPDATED_AT: SchemaColumn = SchemaColumn::new("updated_at", Type::Timestamp);

/// An administrator of the delivery business.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i32,
    pub name: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
}

impl Entity for User {
    const TABLE: &'static str = "users";
    const COLUMNS: &'static [SchemaColumn] = &[
        SchemaColumn::new("name", Type::Text),
        SchemaColumn::new("email", Type::Text).unique(),
        SchemaColumn::new("password_hash", Type::Text),
        CREATED_AT,
        UPDATED_AT,
    ];

    fn from_row<R: Row>(row: &R) -> Result<Self, R::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            email: row.get("email")?,
            password_hash: row.get("password_hash")?,
        })
    }
}

/// An uploaded file: a courier avatar or a recipient's signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub id: i32,
    /// The name of the file on the uploader's machine.
    pub name: String,
    /// The name under which the file is stored.
    pub path: String,
}

impl Entity for File {
    const TABLE: &'static str = "files";
    const COLUMNS: &'static [SchemaColumn] = &[
        SchemaColumn::new("name", Type::Text),
        SchemaColumn::new("path", Type::Text),
        CREATED_AT,
        UPDATED_AT,
    ];

    fn from_row<R: Row>(row: &R) -> Result<Self, R::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            path: row.get("path")?,
        })
    }
}

/// The addressee of a delivery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: i32,
    pub name: String,
    pub street: String,
    pub number: String,
    pub complement: Option<String>,
    pub city: String,
    pub state: String,
    pub zipcode: String,
}

impl Entity for Recipient {
    const TABLE: &'static str = "recipients";
    const COLUMNS: &'static [SchemaColumn] = &[
        SchemaColumn::new("name", Type::Text),
        SchemaColumn::new("street", Type::Text),
        SchemaColumn::new("number", Type::Text),
        SchemaColumn::new("complement", Type::Text).nullable(),
        SchemaColumn::new("city", Type::Text),
        SchemaColumn::new("state", Type::Text),
        SchemaColumn::new("zipcode", Type::Text),
        CREATED_AT,
        UPDATED_AT,
    ];

    fn from_row<R: Row>(row: &R) -> Result<Self, R::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            street: row.get("street")?,
            number: row.get("number")?,
            complement: row.get("complement")?,
            city: row.get("city")?,
            state: row.get("state")?,
            zipcode: row.get("zipcode")?,
        })
    }
}

/// A delivery man.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Courier {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub avatar_id: Option<i32>,
}

impl Entity for Courier {
    const TABLE: &'static str = "deliverymen";
    const COLUMNS: &'static [SchemaColumn] = &[
        SchemaColumn::new("name", Type::Text),
        SchemaColumn::new("email", Type::Text).unique(),
        SchemaColumn::new("avatar_id", Type::Int4)
            .nullable()
            .references(File::TABLE, OnDelete::SetNull),
        CREATED_AT,
        UPDATED_AT,
    ];

    fn from_row<R: Row>(row: &R) -> Result<Self, R::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            email: row.get("email")?,
            avatar_id: row.get("avatar_id")?,
        })
    }
}

/// A package to be taken to a recipient by a courier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Delivery {
    pub id: i32,
    pub recipient_id: Option<i32>,
    pub deliveryman_id: Option<i32>,
    pub signature_id: Option<i32>,
    pub product: String,
    pub canceled_at: Option<DateTime<Utc>>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
}

impl Entity for Delivery {
    const TABLE: &'static str = "deliveries";
    const COLUMNS: &'static [SchemaColumn] = &[
        SchemaColumn::new("recipient_id", Type::Int4)
            .nullable()
            .references(Recipient::TABLE, OnDelete::SetNull),
        SchemaColumn::new("deliveryman_id", Type::Int4)
            .nullable()
            .references(Courier::TABLE, OnDelete::SetNull),
        SchemaColumn::new("signature_id", Type::Int4)
            .nullable()
            .references(File::TABLE, OnDelete::SetNull),
        SchemaColumn::new("product", Type::Text),
        SchemaColumn::new("canceled_at", Type::Timestamp).nullable(),
        SchemaColumn::new("start_date", Type::Timestamp).nullable(),
        SchemaColumn::new("end_date", Type::Timestamp).nullable(),
        CREATED_AT,
        UPDATED_AT,
    ];

    fn from_row<R: Row>(row: &R) -> Result<Self, R::Error> {
        Ok(Self {
            id: row.get("id")?,
            recipient_id: row.get("recipient_id")?,
            deliveryman_id: row.get("deliveryman_id")?,
            signature_id: row.get("signature_id")?,
            product: row.get("product")?,
            canceled_at: row.get("canceled_at")?,
            start_date: row.get("start_date")?,
            end_date: row.get("end_date")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// A problem reported with a delivery, which may lead to its cancellation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub id: i32,
    pub delivery_id: i32,
    pub description: String,
}

impl Entity for Problem {
    const TABLE: &'static str = "delivery_problems";
    const COLUMNS: &'static [SchemaColumn] = &[
        SchemaColumn::new("delivery_id", Type::Int4)
            .references(Delivery::TABLE, OnDelete::Cascade),
        SchemaColumn::new("description", Type::Text),
        CREATED_AT,
        UPDATED_AT,
    ];

    fn from_row<R: Row>(row: &R) -> Result<Self, R::Error> {
        Ok(Self {
            id: row.get("id")?,
            delivery_id: row.get("delivery_id")?,
            description: row.get("description")?,
        })
    }
}

/// Create every table, in dependency order.
pub async fn create_tables<C: Connection>(conn: &C) -> Result<(), Error> {
    conn.create_table(User::TABLE, User::COLUMNS).await.db()?;
    conn.create_table(File::TABLE, File::COLUMNS).await.db()?;
    conn.create_table(Recipient::TABLE, Recipient::COLUMNS)
        .await
        .db()?;
    conn.create_table(Courier::TABLE, Courier::COLUMNS).await.db()?;
    conn.create_table(Delivery::TABLE, Delivery::COLUMNS)
        .await
        .db()?;
    conn.create_table(Problem::TABLE, Problem::COLUMNS).await.db()?;
    Ok(())
}

/// Decode a list of rows.
pub fn decode<T: Entity, R: Row>(rows: Vec<R>) -> Result<Vec<T>, Error> {
    rows.iter().map(T::from_row).collect::<Result<_, _>>().db()
}

/// Look up an entity by its primary key.
pub async fn find<T: Entity, C: Connection>(conn: &C, id: i32) -> Result<Option<T>, Error> {
    conn.select(ALL, T::TABLE)
        .filter("id", Op::Eq, id)
        .opt()
        .await
        .db()?
        .map(|row| T::from_row(&row))
        .transpose()
        .db()
}

/// Look up an entity by the value of a unique column.
pub async fn find_by<T: Entity, C: Connection>(
    conn: &C,
    column: &str,
    value: impl Into<Value> + Send,
) -> Result<Option<T>, Error> {
    conn.select(ALL, T::TABLE)
        .filter(column, Op::Eq, value)
        .opt()
        .await
        .db()?
        .map(|row| T::from_row(&row))
        .transpose()
        .db()
}

/// Look up an entity which is required to exist, failing with `not_found` otherwise.
pub async fn require<T: Entity, C: Connection>(
    conn: &C,
    id: i32,
    not_found: &str,
) -> Result<T, Error> {
    find(conn, id).await?.ok_or_else(|| Error::not_found(not_found))
}

/// Look up an entity which is referenced by an optional foreign key.
pub async fn find_opt<T: Entity, C: Connection>(
    conn: &C,
    id: Option<i32>,
) -> Result<Option<T>, Error> {
    match id {
        Some(id) => find(conn, id).await,
        None => Ok(None),
    }
}

/// All entities of a table, largest `id` first.
pub async fn all<T: Entity, C: Connection>(conn: &C) -> Result<Vec<T>, Error> {
    decode(conn.select(ALL, T::TABLE).newest_first("id").many().await.db()?)
}

/// Insert a row, setting its timestamps, and read it back.
pub async fn create<T: Entity, C: Connection>(
    conn: &C,
    mut values: Assignments,
) -> Result<T, Error> {
    let now = Utc::now();
    values.push(("created_at", now.into()));
    values.push(("updated_at", now.into()));
    let id = conn.insert(T::TABLE, values).await.db()?;
    find(conn, id).await?.ok_or_else(|| Error::Database {
        message: format!("row {id} of {} vanished after insertion", T::TABLE),
    })
}

/// Assign `values` to a row, bumping its `updated_at` timestamp, and read it back.
///
/// Returns [`None`] if the row does not exist.
pub async fn update<T: Entity, C: Connection>(
    conn: &C,
    id: i32,
    mut values: Assignments,
) -> Result<Option<T>, Error> {
    values.push(("updated_at", Utc::now().into()));
    if !conn.update(T::TABLE, id, values).await.db()? {
        return Ok(None);
    }
    find(conn, id).await
}

/// Delete a row, returning whether it existed.
pub async fn delete<T: Entity, C: Connection>(conn: &C, id: i32) -> Result<bool, Error> {
    conn.delete(T::TABLE, id).await.db()
}
