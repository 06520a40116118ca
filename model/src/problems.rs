//! Problems reported with deliveries, and cancellation of the deliveries they affect.

use crate::{
    deliveries::DeliveryDetails,
    error::{DbResultExt, Error},
    jobs::Job,
    pagination::Page,
    schema::{self, Courier, Delivery, Entity, Problem},
    sql::db::{Connection, Op, SelectExt, ALL},
    validate, Context,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Problems per page of [`list`].
pub const PAGE_SIZE: usize = 10;

const DELIVERY_NOT_FOUND: &str = "Delivery not found!";

/// A problem together with the delivery it concerns.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProblemWithDelivery {
    pub id: i32,
    pub delivery_id: i32,
    pub description: String,
    pub delivery: Option<Delivery>,
}

/// A page of problems with their deliveries, most recent deliveries first.
pub async fn list<C: Connection>(
    ctx: &Context<C>,
    page: Page,
) -> Result<Vec<ProblemWithDelivery>, Error> {
    let rows = ctx
        .conn
        .select(ALL, Problem::TABLE)
        .newest_first("delivery_id")
        .newest_first("id")
        .page(page, PAGE_SIZE)
        .many()
        .await
        .db()?;
    let mut problems = vec![];
    for problem in schema::decode::<Problem, _>(rows)? {
        problems.push(ProblemWithDelivery {
            delivery: schema::find(&ctx.conn, problem.delivery_id).await?,
            id: problem.id,
            delivery_id: problem.delivery_id,
            description: problem.description,
        });
    }
    Ok(problems)
}

/// The problems reported with one delivery.
pub async fn for_delivery<C: Connection>(
    ctx: &Context<C>,
    delivery: i32,
) -> Result<Vec<Problem>, Error> {
    schema::require::<Delivery, _>(&ctx.conn, delivery, DELIVERY_NOT_FOUND).await?;
    let rows = ctx
        .conn
        .select(ALL, Problem::TABLE)
        .filter("delivery_id", Op::Eq, delivery)
        .newest_first("id")
        .many()
        .await
        .db()?;
    schema::decode(rows)
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct NewProblem {
    pub description: Option<String>,
}

/// Report a problem with a delivery.
pub async fn create<C: Connection>(
    ctx: &Context<C>,
    delivery: i32,
    req: NewProblem,
) -> Result<Problem, Error> {
    let description = validate::required_text(req.description)?;
    schema::require::<Delivery, _>(&ctx.conn, delivery, DELIVERY_NOT_FOUND).await?;
    let problem: Problem = schema::create(
        &ctx.conn,
        vec![
            ("delivery_id", delivery.into()),
            ("description", description.into()),
        ],
    )
    .await?;
    tracing::info!(problem = problem.id, delivery, "problem reported");
    Ok(problem)
}

/// Cancel the delivery affected by a problem and notify its courier.
pub async fn cancel<C: Connection>(
    ctx: &Context<C>,
    problem: i32,
) -> Result<DeliveryDetails, Error> {
    let _rules = ctx.rules.lock().await;
    let not_found = || Error::not_found("Delivery with problem not found!");
    let problem: Problem = schema::find(&ctx.conn, problem)
        .await?
        .ok_or_else(not_found)?;
    let delivery: Delivery = schema::find(&ctx.conn, problem.delivery_id)
        .await?
        .ok_or_else(not_found)?;
    if delivery.canceled_at.is_some() {
        return Err(Error::validation("Delivery already canceled"));
    }

    let delivery: Delivery = schema::update(
        &ctx.conn,
        delivery.id,
        vec![("canceled_at", Utc::now().into())],
    )
    .await?
    .ok_or_else(not_found)?;
    tracing::info!(delivery = delivery.id, problem = problem.id, "delivery canceled");

    let courier = schema::find_opt::<Courier, _>(&ctx.conn, delivery.deliveryman_id).await?;
    if let Some(courier) = courier {
        ctx.queue.add(Job::CancellationDeliveryMail {
            delivery: delivery.clone(),
            courier,
        })?;
    }
    DeliveryDetails::load(ctx, delivery).await
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{couriers, deliveries, mail::Template, testing::Harness};
    use futures::future::join_all;

    fn report(description: &str) -> NewProblem {
        NewProblem {
            description: Some(description.into()),
        }
    }

    #[async_std::test]
    async fn test_report_and_list() {
        let h = Harness::new().await;
        let recipient = h.recipient("Maria").await;
        let courier = h.courier("João", "joao@fastfeet.com").await;
        let a = h.delivery("A", &recipient, &courier).await;
        let b = h.delivery("B", &recipient, &courier).await;

        let p1 = create(&h.ctx, a.id, report("Destinatário ausente"))
            .await
            .unwrap();
        let p2 = create(&h.ctx, b.id, report("Endereço não encontrado"))
            .await
            .unwrap();
        let p3 = create(&h.ctx, a.id, report("Destinatário ausente de novo"))
            .await
            .unwrap();
        assert_eq!(p1.delivery_id, a.id);

        assert_eq!(
            for_delivery(&h.ctx, a.id).await.unwrap(),
            vec![p3.clone(), p1.clone()]
        );
        assert_eq!(for_delivery(&h.ctx, b.id).await.unwrap(), vec![p2.clone()]);

        let all = list(&h.ctx, Page::FIRST).await.unwrap();
        assert_eq!(
            all.iter().map(|p| p.id).collect::<Vec<_>>(),
            vec![p2.id, p3.id, p1.id]
        );
        assert_eq!(all[0].delivery.as_ref().unwrap().product, "B");
        assert!(list(&h.ctx, Page::new(Some(2))).await.unwrap().is_empty());
    }

    #[async_std::test]
    async fn test_missing_delivery() {
        let h = Harness::new().await;
        assert_eq!(
            create(&h.ctx, 1, report("?")).await.unwrap_err(),
            Error::not_found("Delivery not found!")
        );
        assert_eq!(
            for_delivery(&h.ctx, 1).await.unwrap_err(),
            Error::not_found("Delivery not found!")
        );
        assert_eq!(
            create(&h.ctx, 1, NewProblem::default()).await.unwrap_err(),
            Error::validation_fails()
        );
    }

    #[async_std::test]
    async fn test_cancel() {
        let h = Harness::new().await;
        let recipient = h.recipient("Maria").await;
        let courier = h.courier("João", "joao@fastfeet.com").await;
        let delivery = h.delivery("Livro", &recipient, &courier).await;
        let problem = create(&h.ctx, delivery.id, report("Caixa danificada"))
            .await
            .unwrap();

        let canceled = cancel(&h.ctx, problem.id).await.unwrap();
        assert_eq!(canceled.id, delivery.id);
        assert!(canceled.canceled_at.is_some());
        assert_eq!(canceled.deliveryman.unwrap().id, courier.id);

        let sent = h.mailer.wait_for(1).await;
        assert_eq!(sent[0].subject, "Encomenda Cancelada");
        assert_eq!(sent[0].template, Template::CancellationDelivery);
        assert_eq!(sent[0].to, "João <joao@fastfeet.com>");

        assert_eq!(
            cancel(&h.ctx, problem.id).await.unwrap_err(),
            Error::validation("Delivery already canceled")
        );
        assert_eq!(
            cancel(&h.ctx, problem.id + 1).await.unwrap_err(),
            Error::not_found("Delivery with problem not found!")
        );
    }

    #[async_std::test]
    async fn test_cancel_without_courier() {
        let h = Harness::new().await;
        let recipient = h.recipient("Maria").await;
        let gone = h.courier("João", "joao@fastfeet.com").await;
        let other = h.courier("Ana", "ana@fastfeet.com").await;
        let orphan = h.delivery("Livro", &recipient, &gone).await;
        let assigned = h.delivery("Mesa", &recipient, &other).await;
        let orphan_problem = create(&h.ctx, orphan.id, report("Extraviado"))
            .await
            .unwrap();
        let problem = create(&h.ctx, assigned.id, report("Caixa danificada"))
            .await
            .unwrap();

        couriers::delete(&h.ctx, gone.id).await.unwrap();
        let canceled = cancel(&h.ctx, orphan_problem.id).await.unwrap();
        assert!(canceled.canceled_at.is_some());
        assert_eq!(canceled.deliveryman, None);

        // Mail is sent in order, so once the second cancellation's mail arrives, a mail for the
        // first would have too.
        cancel(&h.ctx, problem.id).await.unwrap();
        let sent = h.mailer.wait_for(1).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "Ana <ana@fastfeet.com>");
    }

    #[async_std::test]
    async fn test_concurrent_cancels() {
        let h = Harness::new().await;
        let recipient = h.recipient("Maria").await;
        let courier = h.courier("João", "joao@fastfeet.com").await;
        let delivery = h.delivery("Livro", &recipient, &courier).await;
        let problem = create(&h.ctx, delivery.id, report("Caixa danificada"))
            .await
            .unwrap();

        let id = problem.id;
        let results = join_all((0..4).map(|_| {
            let ctx = h.ctx.clone();
            async_std::task::spawn(async move { cancel(&ctx, id).await })
        }))
        .await;
        assert_eq!(results.iter().filter(|res| res.is_ok()).count(), 1);
        for err in results.into_iter().filter_map(Result::err) {
            assert_eq!(err, Error::validation("Delivery already canceled"));
        }

        // A later cancellation of another delivery is the second and last mail.
        let other = h.delivery("Mesa", &recipient, &courier).await;
        let problem = create(&h.ctx, other.id, report("Endereço não encontrado"))
            .await
            .unwrap();
        cancel(&h.ctx, problem.id).await.unwrap();
        let sent = h.mailer.wait_for(2).await;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].context.product, "Mesa");
    }

    #[async_std::test]
    async fn test_problems_go_with_their_delivery() {
        let h = Harness::new().await;
        let recipient = h.recipient("Maria").await;
        let courier = h.courier("João", "joao@fastfeet.com").await;
        let delivery = h.delivery("Livro", &recipient, &courier).await;
        let problem = create(&h.ctx, delivery.id, report("Extraviado"))
            .await
            .unwrap();

        deliveries::delete(&h.ctx, delivery.id).await.unwrap();
        assert!(list(&h.ctx, Page::FIRST).await.unwrap().is_empty());
        assert_eq!(
            cancel(&h.ctx, problem.id).await.unwrap_err(),
            Error::not_found("Delivery with problem not found!")
        );
    }
}
