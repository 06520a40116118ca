//! Rendering results of the model operations as HTTP responses.

use courier_model::Error;
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use tide::{Body, Endpoint, Request, Response, StatusCode};

/// The status with which an error is reported.
pub fn status(err: &Error) -> StatusCode {
    match err {
        Error::Validation { .. } | Error::Conflict { .. } => StatusCode::BadRequest,
        Error::NotFound { .. } => StatusCode::NotFound,
        Error::Forbidden { .. } => StatusCode::Forbidden,
        Error::Unauthorized { .. } => StatusCode::Unauthorized,
        Error::Database { .. }
        | Error::Storage { .. }
        | Error::Queue { .. }
        | Error::Password { .. } => StatusCode::InternalServerError,
    }
}

/// An error response with a body of the form `{"error": message}`.
///
/// Internal errors are logged, and clients only see a generic message.
pub fn error(err: Error) -> Response {
    let message = if err.is_internal() {
        tracing::error!("{err}");
        "Internal server error".to_string()
    } else {
        err.to_string()
    };
    let mut res = Response::new(status(&err));
    res.set_body(json!({ "error": message }));
    res
}

pub fn respond<T: Serialize>(result: Result<T, Error>) -> tide::Result {
    match result {
        Ok(value) => {
            let mut res = Response::new(StatusCode::Ok);
            res.set_body(Body::from_json(&value)?);
            Ok(res)
        }
        Err(err) => Ok(error(err)),
    }
}

/// Turn a handler returning a model result into an endpoint returning JSON.
pub fn json<State, F, Fut, T>(handler: F) -> impl Endpoint<State>
where
    State: Clone + Send + Sync + 'static,
    F: Fn(Request<State>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, Error>> + Send + 'static,
    T: Serialize + Send + 'static,
{
    move |req| {
        let fut = handler(req);
        async move { respond(fut.await) }
    }
}
