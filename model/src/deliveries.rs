//! Management of deliveries by administrators.

use crate::{
    couriers::CourierView,
    error::{DbResultExt, Error},
    files::FileView,
    jobs::Job,
    pagination::Page,
    schema::{self, Courier, Delivery, Entity, File, Recipient},
    sql::db::{escape_like, Assignments, Connection, Op, SelectExt, ALL},
    validate, Context,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const NOT_FOUND: &str = "Delivery not found!";

/// Deliveries per page of [`list`].
pub const PAGE_SIZE: usize = 20;

/// A delivery together with the rows it refers to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeliveryDetails {
    pub id: i32,
    pub product: String,
    pub canceled_at: Option<DateTime<Utc>>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub signature: Option<FileView>,
    pub recipient: Option<Recipient>,
    pub deliveryman: Option<CourierView>,
}

impl DeliveryDetails {
    pub(crate) async fn load<C: Connection>(
        ctx: &Context<C>,
        delivery: Delivery,
    ) -> Result<Self, Error> {
        let signature = schema::find_opt::<File, _>(&ctx.conn, delivery.signature_id)
            .await?
            .map(|file| FileView::new(file, &ctx.storage));
        let recipient = schema::find_opt(&ctx.conn, delivery.recipient_id).await?;
        let deliveryman = match schema::find_opt::<Courier, _>(&ctx.conn, delivery.deliveryman_id)
            .await?
        {
            Some(courier) => Some(CourierView::load(ctx, courier).await?),
            None => None,
        };
        Ok(Self {
            id: delivery.id,
            product: delivery.product,
            canceled_at: delivery.canceled_at,
            start_date: delivery.start_date,
            end_date: delivery.end_date,
            signature,
            recipient,
            deliveryman,
        })
    }

    pub(crate) async fn load_all<C: Connection>(
        ctx: &Context<C>,
        deliveries: Vec<Delivery>,
    ) -> Result<Vec<Self>, Error> {
        let mut details = Vec::with_capacity(deliveries.len());
        for delivery in deliveries {
            details.push(Self::load(ctx, delivery).await?);
        }
        Ok(details)
    }
}

/// Deliveries, newest first.
///
/// With a search term `q`, returns every delivery whose product contains `q`, ignoring case.
/// Otherwise returns the requested page.
pub async fn list<C: Connection>(
    ctx: &Context<C>,
    page: Page,
    q: Option<String>,
) -> Result<Vec<DeliveryDetails>, Error> {
    let select = ctx.conn.select(ALL, Delivery::TABLE).newest_first("id");
    let rows = match q.filter(|q| !q.is_empty()) {
        Some(q) => {
            select
                .filter("product", Op::ILike, format!("%{}%", escape_like(&q)))
                .many()
                .await
        }
        None => select.page(page, PAGE_SIZE).many().await,
    }
    .db()?;
    DeliveryDetails::load_all(ctx, schema::decode(rows)?).await
}

pub async fn get<C: Connection>(ctx: &Context<C>, id: i32) -> Result<DeliveryDetails, Error> {
    let delivery = schema::require(&ctx.conn, id, NOT_FOUND).await?;
    DeliveryDetails::load(ctx, delivery).await
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct NewDelivery {
    pub product: Option<String>,
    pub recipient_id: Option<i32>,
    pub deliveryman_id: Option<i32>,
    pub signature_id: Option<i32>,
}

/// A newly registered delivery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CreatedDelivery {
    pub id: i32,
    pub product: String,
    pub recipient: Recipient,
    pub deliveryman: CourierView,
}

/// Register a delivery and notify the courier it is assigned to.
pub async fn create<C: Connection>(
    ctx: &Context<C>,
    req: NewDelivery,
) -> Result<CreatedDelivery, Error> {
    let product = validate::required_text(req.product)?;
    let recipient_id = validate::required(req.recipient_id)?;
    let deliveryman_id = validate::required(req.deliveryman_id)?;

    let recipient: Recipient =
        schema::require(&ctx.conn, recipient_id, "Recipient not found!").await?;
    let courier: Courier =
        schema::require(&ctx.conn, deliveryman_id, "Deliveryman not found!").await?;
    if let Some(signature) = req.signature_id {
        schema::require::<File, _>(&ctx.conn, signature, "Signature not found!").await?;
    }

    let delivery: Delivery = schema::create(
        &ctx.conn,
        vec![
            ("product", product.into()),
            ("recipient_id", recipient_id.into()),
            ("deliveryman_id", deliveryman_id.into()),
            ("signature_id", req.signature_id.into()),
        ],
    )
    .await?;
    tracing::info!(
        delivery = delivery.id,
        courier = courier.id,
        "created delivery"
    );

    let created = CreatedDelivery {
        id: delivery.id,
        product: delivery.product.clone(),
        recipient,
        deliveryman: CourierView::load(ctx, courier.clone()).await?,
    };
    ctx.queue.add(Job::NewDeliveryMail { delivery, courier })?;
    Ok(created)
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DeliveryUpdate {
    pub recipient_id: Option<i32>,
    pub deliveryman_id: Option<i32>,
    pub signature_id: Option<i32>,
    pub product: Option<String>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

/// Change any of the fields of a delivery. Every row referred to must exist.
pub async fn update<C: Connection>(
    ctx: &Context<C>,
    id: i32,
    req: DeliveryUpdate,
) -> Result<Delivery, Error> {
    let product = validate::optional_text(req.product)?;
    schema::require::<Delivery, _>(&ctx.conn, id, NOT_FOUND).await?;

    let mut values: Assignments = vec![];
    if let Some(recipient) = req.recipient_id {
        schema::require::<Recipient, _>(&ctx.conn, recipient, "Recipient not found!").await?;
        values.push(("recipient_id", recipient.into()));
    }
    if let Some(courier) = req.deliveryman_id {
        schema::require::<Courier, _>(&ctx.conn, courier, "Deliveryman not found!").await?;
        values.push(("deliveryman_id", courier.into()));
    }
    if let Some(signature) = req.signature_id {
        schema::require::<File, _>(&ctx.conn, signature, "Signature not found!").await?;
        values.push(("signature_id", signature.into()));
    }
    if let Some(product) = product {
        values.push(("product", product.into()));
    }
    let dates = [
        ("canceled_at", req.canceled_at),
        ("start_date", req.start_date),
        ("end_date", req.end_date),
    ];
    for (column, date) in dates {
        if let Some(date) = date {
            values.push((column, date.into()));
        }
    }

    schema::update(&ctx.conn, id, values)
        .await?
        .ok_or_else(|| Error::not_found(NOT_FOUND))
}

/// Delete a delivery along with its reported problems, returning the remaining deliveries.
pub async fn delete<C: Connection>(
    ctx: &Context<C>,
    id: i32,
) -> Result<Vec<DeliveryDetails>, Error> {
    if !schema::delete::<Delivery, _>(&ctx.conn, id).await? {
        return Err(Error::not_found(NOT_FOUND));
    }
    tracing::info!(delivery = id, "deleted delivery");
    DeliveryDetails::load_all(ctx, schema::all(&ctx.conn).await?).await
}
