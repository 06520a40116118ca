use crate::response;
use courier_model::{sql::db::Connection, Context, Error};
use std::time::Instant;
use tide::{utils::async_trait, Middleware, Next, Request};

/// The administrator making an authenticated request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CurrentUser(pub i32);

/// Require a valid `Authorization: Bearer <token>` header.
#[derive(Clone, Copy, Debug, Default)]
pub struct Authenticate;

#[async_trait]
impl<C: Connection> Middleware<Context<C>> for Authenticate {
    async fn handle(
        &self,
        mut req: Request<Context<C>>,
        next: Next<'_, Context<C>>,
    ) -> tide::Result {
        let Some(header) = req.header("Authorization") else {
            return Ok(response::error(Error::unauthorized("Token not provided")));
        };
        let header = header.last().as_str();
        let token = header.strip_prefix("Bearer ").unwrap_or(header).trim().to_string();
        match req.state().keys.verify(&token) {
            Ok(claims) => {
                req.set_ext(CurrentUser(claims.id));
                Ok(next.run(req).await)
            }
            Err(err) => Ok(response::error(err)),
        }
    }
}

/// Log each request with its outcome.
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestLog;

#[async_trait]
impl<State: Clone + Send + Sync + 'static> Middleware<State> for RequestLog {
    async fn handle(&self, req: Request<State>, next: Next<'_, State>) -> tide::Result {
        let method = req.method();
        let path = req.url().path().to_string();
        let start = Instant::now();
        let res = next.run(req).await;
        let status = res.status();
        let elapsed = start.elapsed();
        if status.is_server_error() {
            tracing::error!(%method, %path, status = %status, ?elapsed, "request failed");
        } else {
            tracing::info!(%method, %path, status = %status, ?elapsed, "request");
        }
        Ok(res)
    }
}
