//! Everything an operation needs besides its own arguments.

use crate::{auth::Keys, error::Error, files::Storage, jobs::Queue, sql::db::Connection};
use async_std::sync::{Arc, Mutex};
use chrono::{DateTime, FixedOffset, Utc};

/// Shared state of the delivery backend.
///
/// Generic over the database [`Connection`], so the same operations run against PostgreSQL in
/// production and against the in-memory database in tests.
#[derive(Clone)]
pub struct Context<C> {
    pub conn: C,
    pub storage: Storage,
    pub keys: Keys,
    pub queue: Queue,
    /// The time zone of the business, in which working hours and calendar days are reckoned.
    pub zone: FixedOffset,
    /// Held while a rule which depends on other rows is checked and its change written, so that
    /// concurrent requests cannot both pass the check.
    pub(crate) rules: Arc<Mutex<()>>,
}

impl<C: Connection> Context<C> {
    pub fn new(conn: C, storage: Storage, keys: Keys, queue: Queue, zone: FixedOffset) -> Self {
        Self {
            conn,
            storage,
            keys,
            queue,
            zone,
            rules: Default::default(),
        }
    }

    /// Convert a UTC time to the business time zone.
    pub fn local(&self, time: DateTime<Utc>) -> DateTime<FixedOffset> {
        time.with_timezone(&self.zone)
    }
}

/// The time zone `hours` east of UTC.
pub fn zone(hours: i32) -> Result<FixedOffset, Error> {
    hours
        .checked_mul(3600)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| Error::validation(format!("invalid UTC offset {hours}")))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_zone() {
        assert_eq!(zone(-3).unwrap().local_minus_utc(), -3 * 3600);
        assert_eq!(zone(0).unwrap().local_minus_utc(), 0);
        zone(30).unwrap_err();
    }
}
