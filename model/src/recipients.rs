//! The addressees of deliveries.

use crate::{
    error::Error,
    schema::{self, Recipient},
    sql::db::{Assignments, Connection},
    validate::{self, Numeric},
    Context,
};
use serde::Deserialize;

const NOT_FOUND: &str = "Recipient not found!";
const ZIPCODE_LEN: usize = 9;

/// The fields of a recipient, all optional so that creation and partial updates share one shape.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RecipientFields {
    pub name: Option<String>,
    pub street: Option<String>,
    pub number: Option<Numeric>,
    pub complement: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zipcode: Option<String>,
}

impl RecipientFields {
    /// Validate whichever fields are present, as assignments to the corresponding columns.
    fn assignments(self) -> Result<Assignments, Error> {
        let mut values: Assignments = vec![];
        let texts = [
            ("name", self.name),
            ("street", self.street),
            ("city", self.city),
            ("state", self.state),
        ];
        for (column, value) in texts {
            if let Some(value) = value {
                values.push((column, validate::text(value)?.into()));
            }
        }
        if let Some(number) = self.number {
            values.push(("number", number.into_text()?.into()));
        }
        if let Some(complement) = self.complement {
            values.push(("complement", complement.into()));
        }
        if let Some(zipcode) = self.zipcode {
            values.push(("zipcode", validate::exact_len(zipcode, ZIPCODE_LEN)?.into()));
        }
        Ok(values)
    }

    fn is_complete(&self) -> bool {
        self.name.is_some()
            && self.street.is_some()
            && self.number.is_some()
            && self.city.is_some()
            && self.state.is_some()
            && self.zipcode.is_some()
    }
}

/// All recipients, newest first.
pub async fn list<C: Connection>(ctx: &Context<C>) -> Result<Vec<Recipient>, Error> {
    schema::all(&ctx.conn).await
}

pub async fn get<C: Connection>(ctx: &Context<C>, id: i32) -> Result<Recipient, Error> {
    schema::require(&ctx.conn, id, NOT_FOUND).await
}

/// Register a recipient. Every field except `complement` is required.
pub async fn create<C: Connection>(
    ctx: &Context<C>,
    req: RecipientFields,
) -> Result<Recipient, Error> {
    if !req.is_complete() {
        return Err(Error::validation_fails());
    }
    let mut values = req.assignments()?;
    if !values.iter().any(|(column, _)| *column == "complement") {
        values.push(("complement", None::<String>.into()));
    }
    let recipient: Recipient = schema::create(&ctx.conn, values).await?;
    tracing::info!(recipient = recipient.id, "created recipient");
    Ok(recipient)
}

pub async fn update<C: Connection>(
    ctx: &Context<C>,
    id: i32,
    req: RecipientFields,
) -> Result<Recipient, Error> {
    let values = req.assignments()?;
    schema::update(&ctx.conn, id, values)
        .await?
        .ok_or_else(|| Error::not_found(NOT_FOUND))
}

/// Delete a recipient, returning the remaining recipients.
///
/// Deliveries addressed to the recipient are kept, without a recipient.
pub async fn delete<C: Connection>(ctx: &Context<C>, id: i32) -> Result<Vec<Recipient>, Error> {
    if !schema::delete::<Recipient, _>(&ctx.conn, id).await? {
        return Err(Error::not_found(NOT_FOUND));
    }
    tracing::info!(recipient = id, "deleted recipient");
    list(ctx).await
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::Harness;

    fn fields() -> RecipientFields {
        serde_json::from_value(serde_json::json!({
            "name": "Maria",
            "street": "Rua Beira Rio",
            "number": 1010,
            "city": "Blumenau",
            "state": "SC",
            "zipcode": "89010-000",
        }))
        .unwrap()
    }

    #[async_std::test]
    async fn test_create() {
        let h = Harness::new().await;
        let recipient = create(&h.ctx, fields()).await.unwrap();
        assert_eq!(recipient.name, "Maria");
        assert_eq!(recipient.number, "1010");
        assert_eq!(recipient.complement, None);
        assert_eq!(recipient.zipcode, "89010-000");
        assert_eq!(get(&h.ctx, recipient.id).await.unwrap(), recipient);

        let with_complement = create(
            &h.ctx,
            RecipientFields {
                complement: Some("Apto 12".into()),
                number: Some(Numeric::Text("22".into())),
                ..fields()
            },
        )
        .await
        .unwrap();
        assert_eq!(with_complement.complement.as_deref(), Some("Apto 12"));
        assert_eq!(with_complement.number, "22");
    }

    #[async_std::test]
    async fn test_create_validation() {
        let h = Harness::new().await;
        let invalid = [
            RecipientFields {
                zipcode: Some("89010000".into()),
                ..fields()
            },
            RecipientFields {
                number: Some(Numeric::Text("S/N".into())),
                ..fields()
            },
            RecipientFields {
                city: None,
                ..fields()
            },
            RecipientFields {
                name: Some(" ".into()),
                ..fields()
            },
        ];
        for req in invalid {
            assert_eq!(
                create(&h.ctx, req).await.unwrap_err(),
                Error::validation_fails()
            );
        }
        assert_eq!(list(&h.ctx).await.unwrap(), vec![]);
    }

    #[async_std::test]
    async fn test_update() {
        let h = Harness::new().await;
        let recipient = create(&h.ctx, fields()).await.unwrap();
        let updated = update(
            &h.ctx,
            recipient.id,
            RecipientFields {
                city: Some("Joinville".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(
            updated,
            Recipient {
                city: "Joinville".into(),
                ..recipient.clone()
            }
        );

        assert_eq!(
            update(
                &h.ctx,
                recipient.id,
                RecipientFields {
                    zipcode: Some("1".into()),
                    ..Default::default()
                }
            )
            .await
            .unwrap_err(),
            Error::validation_fails()
        );
        assert_eq!(
            update(&h.ctx, recipient.id + 1, Default::default())
                .await
                .unwrap_err(),
            Error::not_found("Recipient not found!")
        );
    }

    #[async_std::test]
    async fn test_delete_keeps_deliveries() {
        let h = Harness::new().await;
        let a = create(&h.ctx, fields()).await.unwrap();
        let b = create(&h.ctx, fields()).await.unwrap();
        let courier = h.courier("João", "joao@fastfeet.com").await;
        let delivery = h.delivery("Livro", &a, &courier).await;

        assert_eq!(delete(&h.ctx, a.id).await.unwrap(), vec![b]);
        let delivery: crate::schema::Delivery = schema::find(&h.ctx.conn, delivery.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.recipient_id, None);
        assert_eq!(
            get(&h.ctx, a.id).await.unwrap_err(),
            Error::not_found("Recipient not found!")
        );
    }
}
