//! Courier self-service: listing one's deliveries and recording pickups and drop-offs.
//!
//! A courier may start at most [`DAILY_LIMIT`] deliveries per calendar day, and only during
//! [`WORKING_HOURS`]. Both are reckoned in the business time zone of the [`Context`].

use crate::{
    deliveries::DeliveryDetails,
    error::{DbResultExt, Error},
    pagination::Page,
    schema::{self, Courier, Delivery, Entity, File},
    sql::db::{Connection, Op, SelectColumn, SelectExt, ALL},
    Context,
};
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Deliveries per page of [`list`].
pub const PAGE_SIZE: usize = 10;

/// The most deliveries a courier may start in one day.
pub const DAILY_LIMIT: usize = 5;

/// The local hours at which deliveries may be started.
pub const WORKING_HOURS: Range<u32> = 8..18;

const COURIER_NOT_FOUND: &str = "Deliveryman not found!";

/// A page of a courier's deliveries, newest first, excluding canceled ones.
///
/// If `finished`, lists the deliveries the courier has completed, otherwise the ones still pending.
pub async fn list<C: Connection>(
    ctx: &Context<C>,
    courier: i32,
    page: Page,
    finished: bool,
) -> Result<Vec<DeliveryDetails>, Error> {
    schema::require::<Courier, _>(&ctx.conn, courier, COURIER_NOT_FOUND).await?;

    let select = ctx
        .conn
        .select(ALL, Delivery::TABLE)
        .filter("deliveryman_id", Op::Eq, courier)
        .is_null("canceled_at");
    let select = if finished {
        select.not_null("end_date")
    } else {
        select.is_null("end_date")
    };
    let rows = select
        .newest_first("id")
        .page(page, PAGE_SIZE)
        .many()
        .await
        .db()?;
    DeliveryDetails::load_all(ctx, schema::decode(rows)?).await
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct StatusUpdate {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    /// A previously uploaded picture of the recipient's signature, required to finish a delivery.
    pub signature_id: Option<i32>,
}

/// The outcome of a status update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StatusChange {
    Started {
        product: String,
        recipient_id: Option<i32>,
        canceled_at: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
        start_date: DateTime<Utc>,
    },
    Finished {
        id: i32,
        product: String,
        recipient_id: Option<i32>,
        signature_id: i32,
        end_date: DateTime<Utc>,
    },
}

/// Record that `courier` picked up (`start_date`) or dropped off (`end_date`) a delivery.
///
/// If both dates are given, only the pickup is recorded.
pub async fn update<C: Connection>(
    ctx: &Context<C>,
    courier: i32,
    delivery: i32,
    req: StatusUpdate,
) -> Result<StatusChange, Error> {
    let _rules = ctx.rules.lock().await;
    schema::require::<Courier, _>(&ctx.conn, courier, COURIER_NOT_FOUND).await?;
    let delivery: Delivery =
        schema::require(&ctx.conn, delivery, "Delivery does not exists!").await?;
    if delivery.deliveryman_id != Some(courier) {
        return Err(Error::forbidden(
            "Deliveryman not authorized to take this package",
        ));
    }
    if delivery.canceled_at.is_some() {
        return Err(Error::validation("Delivery was canceled"));
    }

    if let Some(start) = req.start_date {
        return start_delivery(ctx, courier, delivery, start).await;
    }
    let Some(end) = req.end_date else {
        return Err(Error::validation("No params are declared."));
    };
    let signature = req
        .signature_id
        .ok_or_else(|| Error::validation("You need to upload a file to end this delivery."))?;
    schema::require::<File, _>(&ctx.conn, signature, "Signature not found!").await?;

    let delivery: Delivery = schema::update(
        &ctx.conn,
        delivery.id,
        vec![("end_date", end.into()), ("signature_id", signature.into())],
    )
    .await?
    .ok_or_else(|| Error::not_found("Delivery does not exists!"))?;
    tracing::info!(delivery = delivery.id, courier, "delivery finished");
    Ok(StatusChange::Finished {
        id: delivery.id,
        product: delivery.product,
        recipient_id: delivery.recipient_id,
        signature_id: signature,
        end_date: end,
    })
}

async fn start_delivery<C: Connection>(
    ctx: &Context<C>,
    courier: i32,
    delivery: Delivery,
    start: DateTime<Utc>,
) -> Result<StatusChange, Error> {
    let day = local_day(ctx, start)?;
    let started_today = ctx
        .conn
        .select(&[SelectColumn::Col("id")], Delivery::TABLE)
        .filter("deliveryman_id", Op::Eq, courier)
        .filter("start_date", Op::Ge, day.start)
        .filter("start_date", Op::Lt, day.end)
        .many()
        .await
        .db()?
        .len();
    if started_today >= DAILY_LIMIT {
        return Err(Error::forbidden("Maximum daily number of deliveries reached"));
    }
    if !WORKING_HOURS.contains(&ctx.local(start).hour()) {
        return Err(Error::forbidden("Outside working hours"));
    }

    let delivery: Delivery =
        schema::update(&ctx.conn, delivery.id, vec![("start_date", start.into())])
            .await?
            .ok_or_else(|| Error::not_found("Delivery does not exists!"))?;
    tracing::info!(delivery = delivery.id, courier, "delivery started");
    Ok(StatusChange::Started {
        product: delivery.product,
        recipient_id: delivery.recipient_id,
        canceled_at: delivery.canceled_at,
        end_date: delivery.end_date,
        start_date: start,
    })
}

/// The local calendar day containing `time`, as a range of UTC times.
fn local_day<C>(ctx: &Context<C>, time: DateTime<Utc>) -> Result<Range<DateTime<Utc>>, Error> {
    let midnight = time
        .with_timezone(&ctx.zone)
        .date_naive()
        .and_time(NaiveTime::MIN);
    let start = ctx
        .zone
        .from_local_datetime(&midnight)
        .single()
        .ok_or_else(Error::validation_fails)?
        .with_timezone(&Utc);
    Ok(start..start + Duration::days(1))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{files, testing::Harness};
    use chrono::FixedOffset;
    use futures::future::join_all;

    struct Fixture {
        h: Harness,
        courier: Courier,
        deliveries: Vec<Delivery>,
    }

    async fn fixture(zone: FixedOffset, deliveries: usize) -> Fixture {
        let h = Harness::with_zone(zone).await;
        let recipient = h.recipient("Maria").await;
        let courier = h.courier("João", "joao@fastfeet.com").await;
        let mut created = vec![];
        for i in 0..deliveries {
            created.push(h.delivery(&format!("Produto {i}"), &recipient, &courier).await);
        }
        Fixture {
            h,
            courier,
            deliveries: created,
        }
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 3, 5, hour, 30, 0).unwrap()
    }

    fn start(time: DateTime<Utc>) -> StatusUpdate {
        StatusUpdate {
            start_date: Some(time),
            ..Default::default()
        }
    }

    #[async_std::test]
    async fn test_start() {
        let f = fixture(utc(), 1).await;
        let delivery = &f.deliveries[0];
        let change = update(&f.h.ctx, f.courier.id, delivery.id, start(at(9)))
            .await
            .unwrap();
        assert_eq!(
            change,
            StatusChange::Started {
                product: "Produto 0".into(),
                recipient_id: delivery.recipient_id,
                canceled_at: None,
                end_date: None,
                start_date: at(9),
            }
        );
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["product"], "Produto 0");
        assert!(json.get("id").is_none());
    }

    #[async_std::test]
    async fn test_working_hours() {
        let f = fixture(utc(), 1).await;
        let id = f.deliveries[0].id;
        for hour in [0, 7, 18, 23] {
            assert_eq!(
                update(&f.h.ctx, f.courier.id, id, start(at(hour)))
                    .await
                    .unwrap_err(),
                Error::forbidden("Outside working hours")
            );
        }
        update(&f.h.ctx, f.courier.id, id, start(at(8))).await.unwrap();
        update(&f.h.ctx, f.courier.id, id, start(at(17))).await.unwrap();
    }

    #[async_std::test]
    async fn test_working_hours_are_local() {
        // 11:30 UTC is 8:30 in UTC-3, but 07:30 UTC is 04:30.
        let f = fixture(FixedOffset::west_opt(3 * 3600).unwrap(), 1).await;
        let id = f.deliveries[0].id;
        update(&f.h.ctx, f.courier.id, id, start(at(11))).await.unwrap();
        assert_eq!(
            update(&f.h.ctx, f.courier.id, id, start(at(7)))
                .await
                .unwrap_err(),
            Error::forbidden("Outside working hours")
        );
    }

    #[async_std::test]
    async fn test_daily_limit() {
        let f = fixture(utc(), 7).await;
        for delivery in &f.deliveries[..5] {
            update(&f.h.ctx, f.courier.id, delivery.id, start(at(10)))
                .await
                .unwrap();
        }
        assert_eq!(
            update(&f.h.ctx, f.courier.id, f.deliveries[5].id, start(at(11)))
                .await
                .unwrap_err(),
            Error::forbidden("Maximum daily number of deliveries reached")
        );

        // The next day starts afresh.
        let tomorrow = at(10) + Duration::days(1);
        update(&f.h.ctx, f.courier.id, f.deliveries[5].id, start(tomorrow))
            .await
            .unwrap();
    }

    #[async_std::test]
    async fn test_daily_limit_holds_for_concurrent_starts() {
        let f = fixture(utc(), 8).await;
        let results = join_all(f.deliveries.iter().map(|delivery| {
            let ctx = f.h.ctx.clone();
            let (courier, delivery) = (f.courier.id, delivery.id);
            async_std::task::spawn(async move {
                update(&ctx, courier, delivery, start(at(10))).await
            })
        }))
        .await;
        assert_eq!(results.iter().filter(|res| res.is_ok()).count(), DAILY_LIMIT);
        for err in results.into_iter().filter_map(Result::err) {
            assert_eq!(
                err,
                Error::forbidden("Maximum daily number of deliveries reached")
            );
        }
    }

    #[async_std::test]
    async fn test_daily_limit_uses_local_days() {
        // In UTC-3, 02:30 UTC on the 6th is still the 5th.
        let f = fixture(FixedOffset::west_opt(3 * 3600).unwrap(), 6).await;
        for delivery in &f.deliveries[..5] {
            update(&f.h.ctx, f.courier.id, delivery.id, start(at(13)))
                .await
                .unwrap();
        }
        let late = Utc.with_ymd_and_hms(2020, 3, 6, 2, 30, 0).unwrap();
        let day = local_day(&f.h.ctx, late).unwrap();
        assert!(day.contains(&at(13)));
        assert_eq!(
            update(&f.h.ctx, f.courier.id, f.deliveries[5].id, start(at(14)))
                .await
                .unwrap_err(),
            Error::forbidden("Maximum daily number of deliveries reached")
        );
    }

    #[async_std::test]
    async fn test_finish() {
        let f = fixture(utc(), 1).await;
        let delivery = &f.deliveries[0];
        let end = at(15);

        assert_eq!(
            update(
                &f.h.ctx,
                f.courier.id,
                delivery.id,
                StatusUpdate {
                    end_date: Some(end),
                    ..Default::default()
                }
            )
            .await
            .unwrap_err(),
            Error::validation("You need to upload a file to end this delivery.")
        );
        assert_eq!(
            update(
                &f.h.ctx,
                f.courier.id,
                delivery.id,
                StatusUpdate {
                    end_date: Some(end),
                    signature_id: Some(99),
                    ..Default::default()
                }
            )
            .await
            .unwrap_err(),
            Error::not_found("Signature not found!")
        );

        let signature = files::upload(&f.h.ctx, Some("sig.png".into()), b"png")
            .await
            .unwrap();
        let change = update(
            &f.h.ctx,
            f.courier.id,
            delivery.id,
            StatusUpdate {
                end_date: Some(end),
                signature_id: Some(signature.id),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(
            change,
            StatusChange::Finished {
                id: delivery.id,
                product: "Produto 0".into(),
                recipient_id: delivery.recipient_id,
                signature_id: signature.id,
                end_date: end,
            }
        );
    }

    #[async_std::test]
    async fn test_update_checks() {
        let f = fixture(utc(), 1).await;
        let delivery = &f.deliveries[0];
        let other = f.h.courier("Ana", "ana@fastfeet.com").await;

        assert_eq!(
            update(&f.h.ctx, other.id + 1, delivery.id, start(at(9)))
                .await
                .unwrap_err(),
            Error::not_found("Deliveryman not found!")
        );
        assert_eq!(
            update(&f.h.ctx, f.courier.id, delivery.id + 1, start(at(9)))
                .await
                .unwrap_err(),
            Error::not_found("Delivery does not exists!")
        );
        assert_eq!(
            update(&f.h.ctx, other.id, delivery.id, start(at(9)))
                .await
                .unwrap_err(),
            Error::forbidden("Deliveryman not authorized to take this package")
        );
        assert_eq!(
            update(&f.h.ctx, f.courier.id, delivery.id, Default::default())
                .await
                .unwrap_err(),
            Error::validation("No params are declared.")
        );

        schema::update::<Delivery, _>(
            &f.h.ctx.conn,
            delivery.id,
            vec![("canceled_at", Utc::now().into())],
        )
        .await
        .unwrap();
        assert_eq!(
            update(&f.h.ctx, f.courier.id, delivery.id, start(at(9)))
                .await
                .unwrap_err(),
            Error::validation("Delivery was canceled")
        );
    }

    #[async_std::test]
    async fn test_list() {
        let f = fixture(utc(), 14).await;
        let signature = files::upload(&f.h.ctx, Some("sig.png".into()), b"png")
            .await
            .unwrap();
        let ids = |deliveries: &[DeliveryDetails]| {
            deliveries.iter().map(|d| d.id).collect::<Vec<_>>()
        };

        // Finish the first two and cancel the third.
        for delivery in &f.deliveries[..2] {
            update(
                &f.h.ctx,
                f.courier.id,
                delivery.id,
                StatusUpdate {
                    end_date: Some(at(16)),
                    signature_id: Some(signature.id),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        }
        schema::update::<Delivery, _>(
            &f.h.ctx.conn,
            f.deliveries[2].id,
            vec![("canceled_at", Utc::now().into())],
        )
        .await
        .unwrap();

        let finished = list(&f.h.ctx, f.courier.id, Page::FIRST, true)
            .await
            .unwrap();
        assert_eq!(
            ids(&finished),
            vec![f.deliveries[1].id, f.deliveries[0].id]
        );

        let mut pending: Vec<i32> = f.deliveries[3..].iter().map(|d| d.id).collect();
        pending.reverse();
        let first = list(&f.h.ctx, f.courier.id, Page::FIRST, false)
            .await
            .unwrap();
        let second = list(&f.h.ctx, f.courier.id, Page::new(Some(2)), false)
            .await
            .unwrap();
        assert_eq!(ids(&first), pending[..10].to_vec());
        assert_eq!(ids(&second), pending[10..].to_vec());
        assert_eq!(
            first[0].deliveryman.as_ref().unwrap().id,
            f.courier.id
        );

        assert_eq!(
            list(&f.h.ctx, f.courier.id + 1, Page::FIRST, false)
                .await
                .unwrap_err(),
            Error::not_found("Deliveryman not found!")
        );
    }
}
