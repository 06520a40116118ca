//! Request handlers.
//!
//! Each handler extracts the parameters of one model operation from the request and runs it.
//! Malformed parameters and bodies are reported as failed validation.

use crate::{middleware::CurrentUser, response};
use courier_model::{
    couriers::{self, CourierFields, CourierView},
    deliveries::{self, CreatedDelivery, DeliveryDetails, DeliveryUpdate, NewDelivery},
    files::{self, FileView},
    pagination::Page,
    problems::{self, NewProblem, ProblemWithDelivery},
    recipients::{self, RecipientFields},
    schema::{Courier, Delivery, Problem, Recipient, User},
    sql::db::Connection,
    status::{self, StatusChange, StatusUpdate},
    users::{self, Login, NewUser, Session, UserUpdate},
    Context, Error,
};
use serde::{de::DeserializeOwned, Deserialize};
use tide::{Body, Request, Response, StatusCode};

type Req<C> = Request<Context<C>>;

fn param<C>(req: &Req<C>, name: &str) -> Result<i32, Error> {
    req.param(name)
        .ok()
        .and_then(|param| param.parse().ok())
        .ok_or_else(Error::validation_fails)
}

fn query<C, T: DeserializeOwned>(req: &Req<C>) -> Result<T, Error> {
    req.query().map_err(|_| Error::validation_fails())
}

async fn body<C, T: DeserializeOwned>(req: &mut Req<C>) -> Result<T, Error> {
    req.body_json().await.map_err(|_| Error::validation_fails())
}

fn current_user<C>(req: &Req<C>) -> Result<i32, Error> {
    req.ext::<CurrentUser>()
        .map(|user| user.0)
        .ok_or_else(|| Error::unauthorized("Token not provided"))
}

#[derive(Debug, Default, Deserialize)]
struct PageQuery {
    page: Option<Page>,
}

// Sessions and users.

pub async fn login<C: Connection>(mut req: Req<C>) -> Result<Session, Error> {
    let login: Login = body(&mut req).await?;
    users::login(req.state(), login).await
}

pub async fn list_users<C: Connection>(req: Req<C>) -> Result<Vec<User>, Error> {
    users::list(req.state()).await
}

pub async fn get_user<C: Connection>(req: Req<C>) -> Result<User, Error> {
    users::get(req.state(), param(&req, "id")?).await
}

pub async fn create_user<C: Connection>(mut req: Req<C>) -> Result<User, Error> {
    let user: NewUser = body(&mut req).await?;
    users::create(req.state(), user).await
}

pub async fn update_current_user<C: Connection>(mut req: Req<C>) -> Result<User, Error> {
    let id = current_user(&req)?;
    let update: UserUpdate = body(&mut req).await?;
    users::update(req.state(), id, update).await
}

pub async fn delete_user<C: Connection>(req: Req<C>) -> Result<Vec<User>, Error> {
    users::delete(req.state(), param(&req, "id")?).await
}

// Files.

#[derive(Debug, Default, Deserialize)]
struct UploadQuery {
    name: Option<String>,
}

pub async fn upload_file<C: Connection>(mut req: Req<C>) -> Result<FileView, Error> {
    let UploadQuery { name } = query(&req)?;
    let contents = req
        .body_bytes()
        .await
        .map_err(|_| Error::validation_fails())?;
    files::upload(req.state(), name, &contents).await
}

/// Serve the contents of a stored file.
pub async fn download_file<C: Connection>(req: Req<C>) -> tide::Result {
    let path = req.param("path").unwrap_or_default();
    let location = match files::locate(req.state(), path).await {
        Ok(location) => location,
        Err(err) => return Ok(response::error(err)),
    };
    let mut res = Response::new(StatusCode::Ok);
    res.set_body(Body::from_file(location).await?);
    Ok(res)
}

// Recipients.

pub async fn list_recipients<C: Connection>(req: Req<C>) -> Result<Vec<Recipient>, Error> {
    recipients::list(req.state()).await
}

pub async fn get_recipient<C: Connection>(req: Req<C>) -> Result<Recipient, Error> {
    recipients::get(req.state(), param(&req, "id")?).await
}

pub async fn create_recipient<C: Connection>(mut req: Req<C>) -> Result<Recipient, Error> {
    let fields: RecipientFields = body(&mut req).await?;
    recipients::create(req.state(), fields).await
}

pub async fn update_recipient<C: Connection>(mut req: Req<C>) -> Result<Recipient, Error> {
    let id = param(&req, "id")?;
    let fields: RecipientFields = body(&mut req).await?;
    recipients::update(req.state(), id, fields).await
}

pub async fn delete_recipient<C: Connection>(req: Req<C>) -> Result<Vec<Recipient>, Error> {
    recipients::delete(req.state(), param(&req, "id")?).await
}

// Couriers.

pub async fn list_couriers<C: Connection>(req: Req<C>) -> Result<Vec<CourierView>, Error> {
    couriers::list(req.state()).await
}

pub async fn get_courier<C: Connection>(req: Req<C>) -> Result<CourierView, Error> {
    couriers::get(req.state(), param(&req, "id")?).await
}

pub async fn create_courier<C: Connection>(mut req: Req<C>) -> Result<Courier, Error> {
    let fields: CourierFields = body(&mut req).await?;
    couriers::create(req.state(), fields).await
}

pub async fn update_courier<C: Connection>(mut req: Req<C>) -> Result<Courier, Error> {
    let id = param(&req, "id")?;
    let fields: CourierFields = body(&mut req).await?;
    couriers::update(req.state(), id, fields).await
}

pub async fn delete_courier<C: Connection>(req: Req<C>) -> Result<Vec<Courier>, Error> {
    couriers::delete(req.state(), param(&req, "id")?).await
}

// Deliveries.

#[derive(Debug, Default, Deserialize)]
struct DeliverySearch {
    page: Option<Page>,
    q: Option<String>,
}

pub async fn list_deliveries<C: Connection>(req: Req<C>) -> Result<Vec<DeliveryDetails>, Error> {
    let DeliverySearch { page, q } = query(&req)?;
    deliveries::list(req.state(), page.unwrap_or_default(), q).await
}

pub async fn get_delivery<C: Connection>(req: Req<C>) -> Result<DeliveryDetails, Error> {
    deliveries::get(req.state(), param(&req, "id")?).await
}

pub async fn create_delivery<C: Connection>(mut req: Req<C>) -> Result<CreatedDelivery, Error> {
    let delivery: NewDelivery = body(&mut req).await?;
    deliveries::create(req.state(), delivery).await
}

pub async fn update_delivery<C: Connection>(mut req: Req<C>) -> Result<Delivery, Error> {
    let id = param(&req, "id")?;
    let update: DeliveryUpdate = body(&mut req).await?;
    deliveries::update(req.state(), id, update).await
}

pub async fn delete_delivery<C: Connection>(req: Req<C>) -> Result<Vec<DeliveryDetails>, Error> {
    deliveries::delete(req.state(), param(&req, "id")?).await
}

// Courier self-service.

#[derive(Debug, Default, Deserialize)]
struct CourierDeliveriesQuery {
    page: Option<Page>,
    finished: Option<String>,
}

/// A boolean query flag: any value other than empty, `0` or `false` sets it.
fn flag(value: Option<&str>) -> bool {
    !matches!(value, None | Some("" | "0" | "false"))
}

pub async fn list_courier_deliveries<C: Connection>(
    req: Req<C>,
) -> Result<Vec<DeliveryDetails>, Error> {
    let courier = param(&req, "id")?;
    let CourierDeliveriesQuery { page, finished } = query(&req)?;
    status::list(
        req.state(),
        courier,
        page.unwrap_or_default(),
        flag(finished.as_deref()),
    )
    .await
}

pub async fn update_delivery_status<C: Connection>(mut req: Req<C>) -> Result<StatusChange, Error> {
    let courier = param(&req, "deliverymanId")?;
    let delivery = param(&req, "deliveryId")?;
    let update: StatusUpdate = body(&mut req).await?;
    status::update(req.state(), courier, delivery, update).await
}

// Problems.

pub async fn list_problems<C: Connection>(req: Req<C>) -> Result<Vec<ProblemWithDelivery>, Error> {
    let PageQuery { page } = query(&req)?;
    problems::list(req.state(), page.unwrap_or_default()).await
}

pub async fn list_delivery_problems<C: Connection>(req: Req<C>) -> Result<Vec<Problem>, Error> {
    problems::for_delivery(req.state(), param(&req, "id")?).await
}

pub async fn create_problem<C: Connection>(mut req: Req<C>) -> Result<Problem, Error> {
    let delivery = param(&req, "id")?;
    let problem: NewProblem = body(&mut req).await?;
    problems::create(req.state(), delivery, problem).await
}

pub async fn cancel_delivery<C: Connection>(req: Req<C>) -> Result<DeliveryDetails, Error> {
    problems::cancel(req.state(), param(&req, "id")?).await
}
