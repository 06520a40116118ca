//! Couriers (delivery men), who take deliveries to recipients.

use crate::{
    error::Error,
    files::Avatar,
    schema::{self, Courier, File},
    sql::db::{Assignments, Connection},
    validate, Context,
};
use serde::{Deserialize, Serialize};

const NOT_FOUND: &str = "Deliveryman not found";
const EMAIL_TAKEN: &str = "The email provided is already being used";

/// A courier together with their avatar.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CourierView {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub avatar_id: Option<i32>,
    pub avatar: Option<Avatar>,
}

impl CourierView {
    pub(crate) async fn load<C: Connection>(
        ctx: &Context<C>,
        courier: Courier,
    ) -> Result<Self, Error> {
        let avatar = schema::find_opt::<File, _>(&ctx.conn, courier.avatar_id)
            .await?
            .map(|file| Avatar::new(file, &ctx.storage));
        Ok(Self {
            id: courier.id,
            name: courier.name,
            email: courier.email,
            avatar_id: courier.avatar_id,
            avatar,
        })
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct CourierFields {
    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar_id: Option<i32>,
}

async fn email_taken<C: Connection>(ctx: &Context<C>, email: &str) -> Result<bool, Error> {
    Ok(schema::find_by::<Courier, _>(&ctx.conn, "email", email)
        .await?
        .is_some())
}

/// Register a courier.
pub async fn create<C: Connection>(
    ctx: &Context<C>,
    req: CourierFields,
) -> Result<Courier, Error> {
    let name = validate::required_text(req.name)?;
    let email = validate::email(validate::required(req.email)?)?;

    if let Some(avatar) = req.avatar_id {
        schema::require::<File, _>(&ctx.conn, avatar, "File not found!").await?;
    }
    if email_taken(ctx, &email).await? {
        return Err(Error::conflict("User already exists"));
    }

    let courier: Courier = schema::create(
        &ctx.conn,
        vec![
            ("name", name.into()),
            ("email", email.into()),
            ("avatar_id", req.avatar_id.into()),
        ],
    )
    .await?;
    tracing::info!(courier = courier.id, "created courier");
    Ok(courier)
}

pub async fn update<C: Connection>(
    ctx: &Context<C>,
    id: i32,
    req: CourierFields,
) -> Result<Courier, Error> {
    let name = validate::optional_text(req.name)?;
    let email = req.email.map(validate::email).transpose()?;

    let courier: Courier = schema::require(&ctx.conn, id, NOT_FOUND).await?;
    if let Some(email) = &email {
        if *email != courier.email && email_taken(ctx, email).await? {
            return Err(Error::conflict(EMAIL_TAKEN));
        }
    }
    if let Some(avatar) = req.avatar_id {
        schema::require::<File, _>(&ctx.conn, avatar, "Avatar file not found!").await?;
    }

    let mut values: Assignments = vec![];
    if let Some(name) = name {
        values.push(("name", name.into()));
    }
    if let Some(email) = email {
        values.push(("email", email.into()));
    }
    if let Some(avatar) = req.avatar_id {
        values.push(("avatar_id", avatar.into()));
    }
    schema::update(&ctx.conn, id, values)
        .await?
        .ok_or_else(|| Error::not_found(NOT_FOUND))
}

/// All couriers with their avatars, newest first.
pub async fn list<C: Connection>(ctx: &Context<C>) -> Result<Vec<CourierView>, Error> {
    let mut views = vec![];
    for courier in schema::all(&ctx.conn).await? {
        views.push(CourierView::load(ctx, courier).await?);
    }
    Ok(views)
}

pub async fn get<C: Connection>(ctx: &Context<C>, id: i32) -> Result<CourierView, Error> {
    let courier = schema::require(&ctx.conn, id, NOT_FOUND).await?;
    CourierView::load(ctx, courier).await
}

/// Delete a courier, returning the remaining couriers.
///
/// Deliveries assigned to the courier are kept, unassigned.
pub async fn delete<C: Connection>(ctx: &Context<C>, id: i32) -> Result<Vec<Courier>, Error> {
    if !schema::delete::<Courier, _>(&ctx.conn, id).await? {
        return Err(Error::not_found(NOT_FOUND));
    }
    tracing::info!(courier = id, "deleted courier");
    schema::all(&ctx.conn).await
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{files, testing::Harness};

    fn fields(name: &str, email: &str) -> CourierFields {
        CourierFields {
            name: Some(name.into()),
            email: Some(email.into()),
            avatar_id: None,
        }
    }

    #[async_std::test]
    async fn test_create() {
        let h = Harness::new().await;
        let avatar = files::upload(&h.ctx, Some("me.jpg".into()), b"jpeg")
            .await
            .unwrap();

        let courier = create(
            &h.ctx,
            CourierFields {
                avatar_id: Some(avatar.id),
                ..fields("João", "joao@fastfeet.com")
            },
        )
        .await
        .unwrap();
        assert_eq!(courier.avatar_id, Some(avatar.id));

        let view = get(&h.ctx, courier.id).await.unwrap();
        assert_eq!(
            view.avatar,
            Some(Avatar {
                name: "me.jpg".into(),
                path: avatar.path.clone(),
                url: avatar.url.clone(),
            })
        );

        assert_eq!(
            create(&h.ctx, fields("Outro João", "joao@fastfeet.com"))
                .await
                .unwrap_err(),
            Error::conflict("User already exists")
        );
        assert_eq!(
            create(
                &h.ctx,
                CourierFields {
                    avatar_id: Some(avatar.id + 100),
                    ..fields("Ana", "ana@fastfeet.com")
                }
            )
            .await
            .unwrap_err(),
            Error::not_found("File not found!")
        );
        assert_eq!(
            create(&h.ctx, fields("Ana", "ana at fastfeet"))
                .await
                .unwrap_err(),
            Error::validation_fails()
        );
    }

    #[async_std::test]
    async fn test_update() {
        let h = Harness::new().await;
        let joao = h.courier("João", "joao@fastfeet.com").await;
        h.courier("Ana", "ana@fastfeet.com").await;

        // Keeping one's own email is not a conflict.
        let updated = update(&h.ctx, joao.id, fields("João Silva", "joao@fastfeet.com"))
            .await
            .unwrap();
        assert_eq!(updated.name, "João Silva");

        assert_eq!(
            update(
                &h.ctx,
                joao.id,
                CourierFields {
                    email: Some("ana@fastfeet.com".into()),
                    ..Default::default()
                }
            )
            .await
            .unwrap_err(),
            Error::conflict("The email provided is already being used")
        );
        assert_eq!(
            update(
                &h.ctx,
                joao.id,
                CourierFields {
                    avatar_id: Some(42),
                    ..Default::default()
                }
            )
            .await
            .unwrap_err(),
            Error::not_found("Avatar file not found!")
        );
        assert_eq!(
            update(&h.ctx, joao.id + 100, Default::default())
                .await
                .unwrap_err(),
            Error::not_found("Deliveryman not found")
        );
    }

    #[async_std::test]
    async fn test_list_and_delete() {
        let h = Harness::new().await;
        let a = h.courier("A", "a@fastfeet.com").await;
        let b = h.courier("B", "b@fastfeet.com").await;

        let listed = list(&h.ctx).await.unwrap();
        assert_eq!(
            listed.iter().map(|c| c.id).collect::<Vec<_>>(),
            vec![b.id, a.id]
        );
        assert!(listed.iter().all(|c| c.avatar.is_none()));

        let recipient = h.recipient("Maria").await;
        let delivery = h.delivery("Livro", &recipient, &a).await;
        assert_eq!(delete(&h.ctx, a.id).await.unwrap(), vec![b]);
        let delivery: schema::Delivery = schema::find(&h.ctx.conn, delivery.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.deliveryman_id, None);
        assert_eq!(
            get(&h.ctx, a.id).await.unwrap_err(),
            Error::not_found("Deliveryman not found")
        );
    }
}
