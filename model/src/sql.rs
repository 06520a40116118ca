//! Relational storage for the delivery data model.
//!
//! The [`db`] module defines an abstract interface to a SQL database, with one instantiation for
//! PostgreSQL and an in-memory mock for testing. Everything above this layer is generic over
//! [`db::Connection`].

pub mod db;

pub use db::{Connection, Row, RowExt, Select, SelectExt, Value};
