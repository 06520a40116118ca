use clap::Parser;
use courier_model::{auth, context, db, files, init_logging, jobs::Queue, mail, Context};

mod handlers;
mod middleware;
mod response;
mod routes;

mod test_runner;

/// Start the delivery backend server.
#[derive(Clone, Debug, Parser)]
struct Options {
    /// The port where the app should be served.
    #[clap(short, long, env = "COURIER_PORT", default_value = "3333")]
    port: u16,

    /// Offset of the business time zone from UTC, in hours.
    ///
    /// Working hours, the daily delivery limit and the dates in emails are reckoned in this zone.
    #[clap(
        long,
        env = "COURIER_UTC_OFFSET_HOURS",
        default_value = "0",
        allow_negative_numbers = true
    )]
    utc_offset_hours: i32,

    #[clap(flatten)]
    db: db::Options,

    #[clap(flatten)]
    auth: auth::Options,

    #[clap(flatten)]
    files: files::Options,

    #[clap(flatten)]
    mail: mail::Options,
}

impl Options {
    async fn serve(&self) -> anyhow::Result<()> {
        let conn = self.db.connect().await?;
        db::setup(&conn).await?;

        let zone = context::zone(self.utc_offset_hours)?;
        let ctx = Context::new(
            conn,
            self.files.storage().await?,
            self.auth.keys()?,
            Queue::start(self.mail.mailer(), zone),
            zone,
        );
        tracing::info!(port = self.port, "starting server");
        routes::serve(ctx, self.port).await?;
        Ok(())
    }
}

#[async_std::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    Options::parse().serve().await
}
