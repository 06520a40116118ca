//! Data model and operations for a package-delivery business.
//!
//! The backend keeps track of recipients, couriers (delivery men), the deliveries assigned to
//! them and the problems reported along the way, and emails couriers when a delivery is assigned
//! to them or canceled.

pub mod auth;
pub mod context;
pub mod couriers;
pub mod db;
pub mod deliveries;
pub mod error;
pub mod files;
pub mod jobs;
pub mod mail;
pub mod pagination;
pub mod problems;
pub mod recipients;
pub mod schema;
pub mod sql;
pub mod status;
pub mod users;
pub mod validate;

pub use context::Context;
pub use error::Error;

use tracing_subscriber::EnvFilter;

/// Install a global `tracing` subscriber configured by `RUST_LOG`.
///
/// Does nothing if a subscriber has already been installed, so tests can call it freely.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .try_init();
}

#[cfg(any(test, feature = "mocks"))]
pub mod testing;
