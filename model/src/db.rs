//! The Postgres database used by the delivery backend.

use crate::schema;
use anyhow::Error;
use clap::Args;
use surf::Url;

pub use crate::sql::db::postgres::Connection;

/// Database connection options.
#[derive(Clone, Debug, Args)]
pub struct Options {
    /// URL for connecting to the Postgres database.
    #[clap(long, env = "COURIER_DB_URL", default_value = "http://localhost:5432")]
    pub db_url: Url,

    /// User as which to connect to the database.
    #[clap(long, env = "COURIER_DB_USER", default_value = "postgres")]
    pub db_user: String,

    /// Password for connecting to the Postgres database.
    #[clap(long, env = "COURIER_DB_PASSWORD", default_value = "password")]
    pub db_password: String,

    /// Name of the database.
    #[clap(long, env = "COURIER_DB_NAME", default_value = "fastfeet")]
    pub db_name: String,
}

impl Options {
    /// Connect to the database.
    pub async fn connect(&self) -> Result<Connection, Error> {
        let mut config = crate::sql::db::postgres::Config::default();
        let host = self
            .db_url
            .host()
            .ok_or_else(|| Error::msg(format!("URL {} has no hostname", self.db_url)))?
            .to_string();
        config
            .user(&self.db_user)
            .password(&self.db_password)
            .dbname(&self.db_name)
            .host(&host);
        if let Some(port) = self.db_url.port() {
            config.port(port);
        }
        tracing::info!(%host, db = %self.db_name, "connecting to database");
        Ok(Connection::new(config).await?)
    }
}

/// Perform one-time setup of the database, creating the tables.
pub async fn setup(conn: &Connection) -> Result<(), Error> {
    schema::create_tables(conn).await?;
    tracing::info!("database initialized");
    Ok(())
}
