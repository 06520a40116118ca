#![cfg(test)]

//! End-to-end tests of the HTTP API.
//!
//! Each test starts a server on an unused port, backed by the in-memory database and a recording
//! mailer, and drives it with an HTTP client.

use crate::routes;
use anyhow::Error;
use async_std::task::{sleep, spawn};
use courier_model::{mail::Template, testing::Harness};
use futures::future::join_all;
use portpicker::pick_unused_port;
use serde_json::{json, Value};
use std::time::Duration;
use surf::{http::Method, Client, StatusCode};

struct TestServer {
    client: Client,
    harness: Harness,
}

impl TestServer {
    async fn start() -> Self {
        let harness = Harness::new().await;
        let port = pick_unused_port().unwrap();
        let ctx = harness.ctx.clone();
        spawn(async move {
            routes::serve(ctx, port).await.unwrap();
            tracing::warn!("server exited");
        });

        let client: Client = surf::Config::default()
            .set_base_url(format!("http://localhost:{port}").parse().unwrap())
            .try_into()
            .unwrap();
        wait_for_server(&client).await.unwrap();
        Self { client, harness }
    }

    /// Create an administrator and log in as them.
    async fn admin(&self) -> String {
        self.harness
            .user("Distribuidora FastFeet", "admin@fastfeet.com", "123456")
            .await;
        let (status, body) = self
            .call(
                Method::Post,
                "/login",
                None,
                Some(json!({ "email": "admin@fastfeet.com", "password": "123456" })),
            )
            .await;
        assert_eq!(status, StatusCode::Ok, "{body}");
        body["token"].as_str().unwrap().to_string()
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = self.client.request(method, path);
        if let Some(token) = token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        if let Some(body) = body {
            req = req.body_json(&body).unwrap();
        }
        let mut res = req.await.unwrap();
        let status = res.status();
        let body = res.body_json().await.unwrap_or(Value::Null);
        (status, body)
    }

    async fn get(&self, path: &str, token: &str) -> (StatusCode, Value) {
        self.call(Method::Get, path, Some(token), None).await
    }

    async fn post(&self, path: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::Post, path, Some(token), Some(body)).await
    }

    async fn put(&self, path: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.call(Method::Put, path, token, Some(body)).await
    }

    async fn delete(&self, path: &str, token: &str) -> (StatusCode, Value) {
        self.call(Method::Delete, path, Some(token), None).await
    }

    async fn upload(&self, token: &str, name: &str, contents: &[u8]) -> Value {
        let mut res = self
            .client
            .post(format!("/files?name={name}"))
            .header("Authorization", format!("Bearer {token}"))
            .body_bytes(contents)
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::Ok);
        res.body_json().await.unwrap()
    }
}

async fn wait_for_server(client: &Client) -> Result<(), Error> {
    const MAX_CONNECT_RETRIES: usize = 60;

    for _ in 0..MAX_CONNECT_RETRIES {
        match client.connect("/").await {
            Ok(_) => return Ok(()),
            Err(err) => {
                tracing::warn!("waiting for server to start: {err}");
                sleep(Duration::from_secs(1)).await;
            }
        }
    }

    Err(Error::msg("timed out waiting for server"))
}

fn error(message: &str) -> Value {
    json!({ "error": message })
}

#[async_std::test]
async fn test_authentication() {
    let server = TestServer::start().await;
    let token = server.admin().await;

    let (status, body) = server.call(Method::Get, "/recipients", None, None).await;
    assert_eq!(status, StatusCode::Unauthorized);
    assert_eq!(body, error("Token not provided"));

    let (status, body) = server.get("/recipients", "not-a-token").await;
    assert_eq!(status, StatusCode::Unauthorized);
    assert_eq!(body, error("Token invalid"));

    let (status, body) = server.get("/recipients", &token).await;
    assert_eq!(status, StatusCode::Ok);
    assert_eq!(body, json!([]));

    let (status, body) = server
        .call(
            Method::Post,
            "/login",
            None,
            Some(json!({ "email": "admin@fastfeet.com", "password": "wrong!" })),
        )
        .await;
    assert_eq!(status, StatusCode::Unauthorized);
    assert_eq!(body, error("Password does not match"));

    let (status, body) = server
        .call(Method::Post, "/login", None, Some(json!({ "email": "admin" })))
        .await;
    assert_eq!(status, StatusCode::BadRequest);
    assert_eq!(body, error("Validation fails"));
}

#[async_std::test]
async fn test_users() {
    let server = TestServer::start().await;
    let token = server.admin().await;

    let (status, created) = server
        .post(
            "/users",
            &token,
            json!({ "name": "Diego", "email": "diego@fastfeet.com", "password": "abcdef" }),
        )
        .await;
    assert_eq!(status, StatusCode::Ok);
    assert_eq!(created["email"], "diego@fastfeet.com");
    assert!(created.get("password_hash").is_none());

    let (status, body) = server
        .post(
            "/users",
            &token,
            json!({ "name": "Diego", "email": "diego@fastfeet.com", "password": "abcdef" }),
        )
        .await;
    assert_eq!(status, StatusCode::BadRequest);
    assert_eq!(body, error("User already exists"));

    let (status, me) = server
        .put("/user", Some(&token), json!({ "name": "FastFeet" }))
        .await;
    assert_eq!(status, StatusCode::Ok);
    assert_eq!(me["name"], "FastFeet");
    assert_eq!(me["email"], "admin@fastfeet.com");

    let (status, users) = server.get("/users", &token).await;
    assert_eq!(status, StatusCode::Ok);
    assert_eq!(users.as_array().unwrap().len(), 2);
    assert_eq!(users[0]["id"], created["id"]);

    let (status, body) = server.get("/users/999", &token).await;
    assert_eq!(status, StatusCode::NotFound);
    assert_eq!(body, error("User not found!"));
}

#[async_std::test]
async fn test_delivery_lifecycle() {
    let server = TestServer::start().await;
    let token = server.admin().await;

    // Register a recipient and a courier with an avatar.
    let (status, recipient) = server
        .post(
            "/recipients",
            &token,
            json!({
                "name": "Maria",
                "street": "Rua Beira Rio",
                "number": "1010",
                "city": "Blumenau",
                "state": "SC",
                "zipcode": "89010-000",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::Ok, "{recipient}");
    assert_eq!(recipient["complement"], Value::Null);

    let avatar = server.upload(&token, "joao.jpg", b"jpeg bytes").await;
    let (status, courier) = server
        .post(
            "/deliveryman",
            &token,
            json!({ "name": "João", "email": "joao@fastfeet.com", "avatar_id": avatar["id"] }),
        )
        .await;
    assert_eq!(status, StatusCode::Ok, "{courier}");
    let (_, couriers) = server.get("/deliveryman", &token).await;
    assert_eq!(couriers[0]["avatar"]["url"], avatar["url"]);

    // Avatars are served publicly.
    let path = avatar["path"].as_str().unwrap();
    let mut res = server.client.get(format!("/files/{path}")).await.unwrap();
    assert_eq!(res.status(), StatusCode::Ok);
    assert_eq!(res.body_bytes().await.unwrap(), b"jpeg bytes".to_vec());

    // Assign a delivery, which notifies the courier.
    let (status, delivery) = server
        .post(
            "/deliveries",
            &token,
            json!({
                "product": "Livro",
                "recipient_id": recipient["id"],
                "deliveryman_id": courier["id"],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::Ok, "{delivery}");
    assert_eq!(delivery["recipient"]["name"], "Maria");
    assert_eq!(delivery["deliveryman"]["name"], "João");
    let sent = server.harness.mailer.wait_for(1).await;
    assert_eq!(sent[0].template, Template::NewDelivery);

    let courier_id = courier["id"].as_i64().unwrap();
    let delivery_id = delivery["id"].as_i64().unwrap();
    let status_path = format!("/deliveryman/{courier_id}/deliveries/{delivery_id}");

    // The courier picks it up, without a session.
    let (_, pending) = server
        .call(
            Method::Get,
            &format!("/deliveryman/{courier_id}/deliveries"),
            None,
            None,
        )
        .await;
    assert_eq!(pending.as_array().unwrap().len(), 1);

    let (status, body) = server
        .put(&status_path, None, json!({ "start_date": "2020-03-05T07:00:00Z" }))
        .await;
    assert_eq!(status, StatusCode::Forbidden);
    assert_eq!(body, error("Outside working hours"));

    let (status, started) = server
        .put(&status_path, None, json!({ "start_date": "2020-03-05T10:00:00Z" }))
        .await;
    assert_eq!(status, StatusCode::Ok, "{started}");
    assert_eq!(started["product"], "Livro");

    // And drops it off, with a signature.
    let (status, body) = server
        .put(&status_path, None, json!({ "end_date": "2020-03-05T11:00:00Z" }))
        .await;
    assert_eq!(status, StatusCode::BadRequest);
    assert_eq!(body, error("You need to upload a file to end this delivery."));

    let signature = server.upload(&token, "assinatura.png", b"png bytes").await;
    let (status, finished) = server
        .put(
            &status_path,
            None,
            json!({ "end_date": "2020-03-05T11:00:00Z", "signature_id": signature["id"] }),
        )
        .await;
    assert_eq!(status, StatusCode::Ok, "{finished}");
    assert_eq!(finished["signature_id"], signature["id"]);

    let (_, done) = server
        .call(
            Method::Get,
            &format!("/deliveryman/{courier_id}/deliveries?finished=true"),
            None,
            None,
        )
        .await;
    assert_eq!(done[0]["id"], delivery["id"]);
    assert_eq!(done[0]["signature"]["url"], signature["url"]);
    for (query, expected) in [("finished=1", done.clone()), ("finished", json!([]))] {
        let (status, listed) = server
            .call(
                Method::Get,
                &format!("/deliveryman/{courier_id}/deliveries?{query}"),
                None,
                None,
            )
            .await;
        assert_eq!(status, StatusCode::Ok, "{listed}");
        assert_eq!(listed, expected, "{query}");
    }

    // Search by product.
    let (_, found) = server.get("/deliveries?q=livr", &token).await;
    assert_eq!(found.as_array().unwrap().len(), 1);
    let (_, found) = server.get("/deliveries?q=cadeira", &token).await;
    assert_eq!(found, json!([]));
}

#[async_std::test]
async fn test_problems_and_cancellation() {
    let server = TestServer::start().await;
    let token = server.admin().await;
    let recipient = server.harness.recipient("Maria").await;
    let courier = server.harness.courier("João", "joao@fastfeet.com").await;
    let delivery = server.harness.delivery("Livro", &recipient, &courier).await;

    let (status, problem) = server
        .post(
            &format!("/delivery/{}/problems", delivery.id),
            &token,
            json!({ "description": "Caixa danificada" }),
        )
        .await;
    assert_eq!(status, StatusCode::Ok, "{problem}");

    let (status, problems) = server.get("/delivery/problems", &token).await;
    assert_eq!(status, StatusCode::Ok);
    assert_eq!(problems[0]["delivery"]["product"], "Livro");
    let (_, problems) = server
        .get(&format!("/delivery/{}/problems", delivery.id), &token)
        .await;
    assert_eq!(problems, json!([problem.clone()]));
    let (status, _) = server.get("/delivery/999/problems", &token).await;
    assert_eq!(status, StatusCode::NotFound);

    // Cancel the delivery. Later attempts fail, even concurrent ones.
    let cancel = format!("/problem/{}/cancel-delivery", problem["id"]);
    let (status, canceled) = server.delete(&cancel, &token).await;
    assert_eq!(status, StatusCode::Ok, "{canceled}");
    assert!(canceled["canceled_at"].is_string());
    let results = join_all((0..2).map(|_| server.delete(&cancel, &token))).await;
    for (status, body) in results {
        assert_eq!(status, StatusCode::BadRequest);
        assert_eq!(body, error("Delivery already canceled"));
    }

    let sent = server.harness.mailer.wait_for(1).await;
    assert_eq!(sent[0].template, Template::CancellationDelivery);
    assert_eq!(sent[0].subject, "Encomenda Cancelada");

    // Canceled deliveries cannot be picked up.
    let (status, body) = server
        .put(
            &format!("/deliveryman/{}/deliveries/{}", courier.id, delivery.id),
            None,
            json!({ "start_date": "2020-03-05T10:00:00Z" }),
        )
        .await;
    assert_eq!(status, StatusCode::BadRequest);
    assert_eq!(body, error("Delivery was canceled"));
}
