use clap::Parser;
use courier_model::{db, init_logging};

/// Manage the delivery database.
#[derive(Parser)]
enum Command {
    /// Perform one-time setup of the database.
    Init {
        #[clap(flatten)]
        db: db::Options,
    },
}

#[async_std::main]
async fn main() -> Result<(), anyhow::Error> {
    init_logging();

    match Command::parse() {
        Command::Init { db } => {
            let conn = db.connect().await?;
            db::setup(&conn).await?;
        }
    }

    Ok(())
}
