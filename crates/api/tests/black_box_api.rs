use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use printforge_auth::{JwtClaims, Role};
use printforge_core::UserId;
use printforge_infra::config::AppConfig;
use reqwest::StatusCode;
use serde_json::json;

const JWT_SECRET: &str = "test-secret";
const WORKER_KEY: &str = "worker-key";

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let config = AppConfig {
            jwt_secret: JWT_SECRET.to_string(),
            worker_api_key: Some(WORKER_KEY.to_string()),
            ..AppConfig::default()
        };

        // Same router as prod, bound to an ephemeral port.
        let app = printforge_api::app::build_app(config)
            .await
            .expect("failed to build app");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn mint_jwt(user: UserId, roles: Vec<Role>) -> String {
    let now = Utc::now();
    let claims = JwtClaims {
        sub: user,
        roles,
        issued_at: now,
        expires_at: now + ChronoDuration::minutes(10),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

fn order_body() -> serde_json::Value {
    json!({
        "items": [{
            "product_name": "Articulated dragon",
            "quantity": 1,
            "unit_price": "24.90",
            "on_demand": { "settings": { "material": "pla", "infill": 20 } }
        }],
        "payment_method": "card"
    })
}

async fn place_order(
    client: &reqwest::Client,
    srv: &TestServer,
    token: &str,
) -> serde_json::Value {
    let res = client
        .post(srv.url("/orders"))
        .bearer_auth(token)
        .json(&order_body())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    res.json().await.unwrap()
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn().await;

    let client = reqwest::Client::new();
    let res = client.get(srv.url("/whoami")).send().await.unwrap();

    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn identity_is_derived_from_token() {
    let srv = TestServer::spawn().await;

    let user = UserId::new();
    let token = mint_jwt(user, vec![Role::OPERATOR]);

    let client = reqwest::Client::new();
    let res = client
        .get(srv.url("/whoami"))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["user_id"].as_str().unwrap(), user.to_string());
    assert!(body["roles"].as_array().unwrap().iter().any(|r| r == "operator"));
}

#[tokio::test]
async fn checkout_creates_jobs_and_process_tokens() {
    let srv = TestServer::spawn().await;
    let customer = mint_jwt(UserId::new(), vec![Role::CUSTOMER]);
    let client = reqwest::Client::new();

    let body = place_order(&client, &srv, &customer).await;

    assert_eq!(body["order"]["status"], "pending");
    assert_eq!(body["order"]["payment_status"], "pending");
    assert_eq!(body["jobs"].as_array().unwrap().len(), 1);
    assert_eq!(body["aggregate_status"], "pending");
    assert_eq!(body["process_tokens"]["order"].as_str().unwrap().len(), 32);
    assert_eq!(
        body["process_tokens"]["jobs"].as_object().unwrap().len(),
        1
    );
}

#[tokio::test]
async fn checkout_amounts_are_rounded_and_range_checked() {
    let srv = TestServer::spawn().await;
    let customer = mint_jwt(UserId::new(), vec![Role::CUSTOMER]);
    let client = reqwest::Client::new();

    let line = |price: &str, quantity: u32| {
        json!({
            "items": [{ "product_name": "Spool holder", "quantity": quantity, "unit_price": price }],
            "payment_method": "card"
        })
    };

    let res = client
        .post(srv.url("/orders"))
        .bearer_auth(&customer)
        .json(&line("12.34567", 1))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["order"]["subtotal"], "12.35");
    assert_eq!(body["order"]["total"], "12.35");

    let res = client
        .post(srv.url("/orders"))
        .bearer_auth(&customer)
        .json(&line("79228162514264337593543950335", 2))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn status_polling_is_owner_only_and_rate_limited() {
    let srv = TestServer::spawn().await;
    let owner = mint_jwt(UserId::new(), vec![Role::CUSTOMER]);
    let stranger = mint_jwt(UserId::new(), vec![Role::CUSTOMER]);
    let client = reqwest::Client::new();

    let body = place_order(&client, &srv, &owner).await;
    let process_token = body["process_tokens"]["order"].as_str().unwrap().to_string();

    let res = client
        .get(srv.url("/api/status"))
        .query(&[("process_token", process_token.as_str())])
        .bearer_auth(&stranger)
        .header("x-forwarded-for", "203.0.113.9")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = client
        .get(srv.url("/api/status"))
        .query(&[("process_token", "not-a-token")])
        .bearer_auth(&stranger)
        .header("x-forwarded-for", "203.0.113.10")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    for _ in 0..10 {
        let res = client
            .get(srv.url("/api/status"))
            .query(&[("process_token", process_token.as_str())])
            .bearer_auth(&owner)
            .header("x-forwarded-for", "198.51.100.7")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let status: serde_json::Value = res.json().await.unwrap();
        assert_eq!(status["status"], "pending");
    }

    let res = client
        .get(srv.url("/api/status"))
        .query(&[("process_token", process_token.as_str())])
        .bearer_auth(&owner)
        .header("x-forwarded-for", "198.51.100.7")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(res.headers().contains_key("retry-after"));

    // A new forwarded address does not open a fresh window for the same user.
    let res = client
        .get(srv.url("/api/status"))
        .query(&[("process_token", process_token.as_str())])
        .bearer_auth(&owner)
        .header("x-forwarded-for", "192.0.2.44")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn post_status_requires_csrf_token() {
    let srv = TestServer::spawn().await;
    let owner = mint_jwt(UserId::new(), vec![Role::CUSTOMER]);
    let client = reqwest::Client::new();

    let body = place_order(&client, &srv, &owner).await;
    let process_token = body["process_tokens"]["order"].as_str().unwrap().to_string();

    let res = client
        .post(srv.url("/api/status"))
        .bearer_auth(&owner)
        .json(&json!({ "process_token": process_token }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let csrf: serde_json::Value = client
        .get(srv.url("/csrf-token"))
        .bearer_auth(&owner)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let res = client
        .post(srv.url("/api/status"))
        .bearer_auth(&owner)
        .header("x-csrf-token", csrf["csrf_token"].as_str().unwrap())
        .json(&json!({ "process_token": process_token }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn customers_cannot_run_the_print_floor() {
    let srv = TestServer::spawn().await;
    let customer = mint_jwt(UserId::new(), vec![Role::CUSTOMER]);
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/printers"))
        .bearer_auth(&customer)
        .json(&json!({
            "name": "P1",
            "model": "MK4",
            "materials": ["pla"],
            "build_volume": { "x_mm": 250.0, "y_mm": 210.0, "z_mm": 220.0 }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn paid_order_flows_to_printer_and_back() {
    let srv = TestServer::spawn().await;
    let customer = mint_jwt(UserId::new(), vec![Role::CUSTOMER]);
    let operator = mint_jwt(UserId::new(), vec![Role::OPERATOR]);
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/printers"))
        .bearer_auth(&operator)
        .json(&json!({
            "name": "P1",
            "model": "MK4",
            "materials": ["pla", "petg"],
            "build_volume": { "x_mm": 250.0, "y_mm": 210.0, "z_mm": 220.0 }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let body = place_order(&client, &srv, &customer).await;
    let order_id = body["order"]["id"].as_str().unwrap().to_string();
    let job_id = body["jobs"][0]["id"].as_str().unwrap().to_string();

    let res = client
        .post(srv.url(&format!("/orders/{order_id}/payment")))
        .bearer_auth(&operator)
        .json(&json!({ "status": "approved" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let order: serde_json::Value = res.json().await.unwrap();
    assert_eq!(order["payment_status"], "confirmed");

    let res = client
        .post(srv.url(&format!("/jobs/{job_id}/assign")))
        .bearer_auth(&operator)
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let assigned: serde_json::Value = res.json().await.unwrap();
    assert!(assigned["printer_id"].is_string());

    let res = client
        .post(srv.url(&format!("/jobs/{job_id}/schedule")))
        .bearer_auth(&operator)
        .json(&json!({ "start": "2030-01-01T09:00:00Z" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let job: serde_json::Value = res.json().await.unwrap();
    assert!(job["scheduled_start_time"].is_string());

    for status in ["preparing", "printing", "completed"] {
        let res = client
            .post(srv.url(&format!("/device/jobs/{job_id}/status")))
            .header("x-api-key", WORKER_KEY)
            .json(&json!({ "status": status }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK, "transition to {status}");
    }

    let res = client
        .get(srv.url(&format!("/orders/{order_id}")))
        .bearer_auth(&customer)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let view: serde_json::Value = res.json().await.unwrap();
    assert_eq!(view["order"]["status"], "completed");

    let res = client
        .post(srv.url(&format!("/jobs/{job_id}/material")))
        .bearer_auth(&operator)
        .json(&json!({ "grams": 37.5 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let job: serde_json::Value = res.json().await.unwrap();
    assert_eq!(job["material_used_grams"], 37.5);

    let res = client
        .get(srv.url(&format!("/orders/{order_id}/timeline")))
        .bearer_auth(&customer)
        .send()
        .await
        .unwrap();
    let timeline: serde_json::Value = res.json().await.unwrap();
    assert!(timeline["items"].as_array().unwrap().len() >= 6);

    // Terminal transitions are not reversible.
    let res = client
        .post(srv.url(&format!("/device/jobs/{job_id}/status")))
        .header("x-api-key", WORKER_KEY)
        .json(&json!({ "status": "printing" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn worker_notifications_land_in_the_customers_inbox() {
    let srv = TestServer::spawn().await;
    let user = UserId::new();
    let customer = mint_jwt(user, vec![Role::CUSTOMER]);
    let client = reqwest::Client::new();

    let body = place_order(&client, &srv, &customer).await;
    let process_token = body["process_tokens"]["order"].as_str().unwrap().to_string();

    let res = client
        .post(srv.url("/api/notify/status-change"))
        .json(&json!({
            "process_token": process_token,
            "user_id": user,
            "old_status": "pending",
            "new_status": "failed",
            "context": { "error": "payment declined" }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .post(srv.url("/api/notify/status-change"))
        .header("x-api-key", WORKER_KEY)
        .json(&json!({
            "process_token": process_token,
            "user_id": user,
            "old_status": "pending",
            "new_status": "failed",
            "context": { "error": "payment declined" }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = client
        .get(srv.url("/api/notifications"))
        .query(&[("process_token", process_token.as_str())])
        .bearer_auth(&customer)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let page: serde_json::Value = res.json().await.unwrap();
    assert_eq!(page["total"], 1);
    assert_eq!(page["notifications"][0]["notification_type"], "process_failed");

    let res = client
        .post(srv.url("/api/notifications/read-all"))
        .bearer_auth(&customer)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let marked: serde_json::Value = res.json().await.unwrap();
    assert_eq!(marked["marked"], 1);
}
