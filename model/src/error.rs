//! Errors reported by the delivery operations.

use crate::sql::db;
use snafu::Snafu;

/// An error from one of the delivery operations.
///
/// Every variant carries a message which is safe to show to API clients, except for the internal
/// failures ([`Database`](Self::Database), [`Storage`](Self::Storage), [`Queue`](Self::Queue) and
/// [`Password`](Self::Password)), whose details should only be logged.
#[derive(Clone, Debug, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// The request is malformed.
    #[snafu(display("{message}"))]
    Validation { message: String },
    /// A row the request refers to does not exist.
    #[snafu(display("{message}"))]
    NotFound { message: String },
    /// The request would violate a uniqueness constraint.
    #[snafu(display("{message}"))]
    Conflict { message: String },
    /// A business rule forbids the requested change.
    #[snafu(display("{message}"))]
    Forbidden { message: String },
    /// The caller could not be authenticated.
    #[snafu(display("{message}"))]
    Unauthorized { message: String },
    #[snafu(display("database error: {message}"))]
    Database { message: String },
    #[snafu(display("file storage error: {message}"))]
    Storage { message: String },
    #[snafu(display("job queue error: {message}"))]
    Queue { message: String },
    #[snafu(display("password hashing error: {message}"))]
    Password { message: String },
}

impl Error {
    /// The generic message for requests which fail validation.
    pub fn validation_fails() -> Self {
        Self::validation("Validation fails")
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Whether this error is caused by the server rather than the request.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::Database { .. }
                | Self::Storage { .. }
                | Self::Queue { .. }
                | Self::Password { .. }
        )
    }
}

/// Convert errors from the SQL layer into [`Error`].
pub trait DbResultExt<T> {
    fn db(self) -> Result<T, Error>;
}

impl<T, E: db::Error> DbResultExt<T> for Result<T, E> {
    fn db(self) -> Result<T, Error> {
        self.map_err(|err| Error::Database {
            message: err.to_string(),
        })
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Storage {
            message: err.to_string(),
        }
    }
}
