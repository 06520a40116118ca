//! Helpers for testing against the in-memory database.

use crate::{
    auth::{self, Keys},
    files::Storage,
    jobs::Queue,
    mail::MockMailer,
    schema::{self, Courier, Delivery, Recipient, User},
    sql::db::mock,
    Context,
};
use chrono::{Duration, FixedOffset};
use std::sync::Arc;
use tempfile::TempDir;

/// A [`Context`] backed by an empty in-memory database, a temporary upload directory and a
/// recording mailer.
pub struct Harness {
    pub ctx: Context<mock::Connection>,
    pub mailer: MockMailer,
    _uploads: TempDir,
}

impl Harness {
    /// A harness whose business time zone is UTC.
    pub async fn new() -> Self {
        Self::with_zone(FixedOffset::east_opt(0).unwrap()).await
    }

    pub async fn with_zone(zone: FixedOffset) -> Self {
        crate::init_logging();
        let conn = mock::Connection::create();
        schema::create_tables(&conn).await.unwrap();
        let uploads = TempDir::new().unwrap();
        let storage = Storage::open(uploads.path(), "http://localhost:3333")
            .await
            .unwrap();
        let mailer = MockMailer::default();
        let queue = Queue::start(Arc::new(mailer.clone()), zone);
        let keys = Keys::new(b"test secret", Duration::days(7));
        Self {
            ctx: Context::new(conn, storage, keys, queue, zone),
            mailer,
            _uploads: uploads,
        }
    }

    /// Insert an administrator with the given password.
    pub async fn user(&self, name: &str, email: &str, password: &str) -> User {
        schema::create(
            &self.ctx.conn,
            vec![
                ("name", name.into()),
                ("email", email.into()),
                ("password_hash", auth::hash_password(password).unwrap().into()),
            ],
        )
        .await
        .unwrap()
    }

    pub async fn recipient(&self, name: &str) -> Recipient {
        schema::create(
            &self.ctx.conn,
            vec![
                ("name", name.into()),
                ("street", "Rua Guilherme Gembala".into()),
                ("number", "260".into()),
                ("complement", None::<String>.into()),
                ("city", "Rio do Sul".into()),
                ("state", "SC".into()),
                ("zipcode", "89160-000".into()),
            ],
        )
        .await
        .unwrap()
    }

    pub async fn courier(&self, name: &str, email: &str) -> Courier {
        schema::create(
            &self.ctx.conn,
            vec![
                ("name", name.into()),
                ("email", email.into()),
                ("avatar_id", None::<i32>.into()),
            ],
        )
        .await
        .unwrap()
    }

    /// Insert a delivery directly, without notifying the courier.
    pub async fn delivery(
        &self,
        product: &str,
        recipient: &Recipient,
        courier: &Courier,
    ) -> Delivery {
        schema::create(
            &self.ctx.conn,
            vec![
                ("product", product.into()),
                ("recipient_id", recipient.id.into()),
                ("deliveryman_id", courier.id.into()),
            ],
        )
        .await
        .unwrap()
    }
}
