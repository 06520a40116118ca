//! The HTTP API.
//!
//! Everything except logging in, the courier self-service routes and file downloads requires an
//! administrator's session token.

use crate::{
    handlers,
    middleware::{Authenticate, RequestLog},
    response::json,
};
use courier_model::{sql::db::Connection, Context};
use tide::{Route, Server};

/// A route which requires authentication.
fn private<'a, C: Connection>(
    app: &'a mut Server<Context<C>>,
    path: &str,
) -> Route<'a, Context<C>> {
    let mut route = app.at(path);
    route.with(Authenticate);
    route
}

pub fn app<C: Connection>(ctx: Context<C>) -> Server<Context<C>> {
    let mut app = tide::with_state(ctx);
    app.with(RequestLog);

    // Public routes.
    app.at("/login").post(json(handlers::login::<C>));
    app.at("/deliveryman/:id/deliveries")
        .get(json(handlers::list_courier_deliveries::<C>));
    app.at("/deliveryman/:deliverymanId/deliveries/:deliveryId")
        .put(json(handlers::update_delivery_status::<C>));
    app.at("/files/:path").get(handlers::download_file::<C>);

    private(&mut app, "/users")
        .get(json(handlers::list_users::<C>))
        .post(json(handlers::create_user::<C>));
    private(&mut app, "/users/:id")
        .get(json(handlers::get_user::<C>))
        .delete(json(handlers::delete_user::<C>));
    private(&mut app, "/user").put(json(handlers::update_current_user::<C>));

    private(&mut app, "/files").post(json(handlers::upload_file::<C>));

    private(&mut app, "/recipients")
        .get(json(handlers::list_recipients::<C>))
        .post(json(handlers::create_recipient::<C>));
    private(&mut app, "/recipients/:id")
        .get(json(handlers::get_recipient::<C>))
        .put(json(handlers::update_recipient::<C>))
        .delete(json(handlers::delete_recipient::<C>));

    private(&mut app, "/deliveryman")
        .get(json(handlers::list_couriers::<C>))
        .post(json(handlers::create_courier::<C>));
    private(&mut app, "/deliveryman/:id")
        .get(json(handlers::get_courier::<C>))
        .put(json(handlers::update_courier::<C>))
        .delete(json(handlers::delete_courier::<C>));

    private(&mut app, "/deliveries")
        .get(json(handlers::list_deliveries::<C>))
        .post(json(handlers::create_delivery::<C>));
    private(&mut app, "/deliveries/:id")
        .get(json(handlers::get_delivery::<C>))
        .put(json(handlers::update_delivery::<C>))
        .delete(json(handlers::delete_delivery::<C>));

    private(&mut app, "/delivery/problems").get(json(handlers::list_problems::<C>));
    private(&mut app, "/delivery/:id/problems")
        .get(json(handlers::list_delivery_problems::<C>))
        .post(json(handlers::create_problem::<C>));
    private(&mut app, "/problem/:id/cancel-delivery")
        .delete(json(handlers::cancel_delivery::<C>));

    app
}

/// Serve the API on `port` until the server fails.
pub async fn serve<C: Connection>(ctx: Context<C>, port: u16) -> std::io::Result<()> {
    app(ctx).listen(format!("0.0.0.0:{port}")).await
}
