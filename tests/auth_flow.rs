//! End-to-end tests for the account/session flow and VM routes.
//!
//! Drives an in-process router with oneshot requests against a temporary
//! SQLite database and the mock hypervisor, mirroring the tiering the
//! server binary assembles.

use axum::{
    body::Body,
    extract::connect_info::ConnectInfo,
    http::{Request, StatusCode},
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tower::ServiceExt;

use vmforge_backend::{
    api::routes::{self, AppState},
    auth::{
        api as auth_api, auth_middleware, db::open_auth_db, AuthState, SessionStore, TokenSigner,
        UserStore,
    },
    hypervisor::MockHypervisor,
    middleware::{rate_limit_middleware, RateLimitConfig, RateLimiter},
};

struct TestApp {
    router: Router,
    _db_file: NamedTempFile,
}

/// Router with the same tiering as the server binary, minus the rate
/// limiter so request counts never interfere with the flow under test.
fn test_app() -> TestApp {
    let db_file = NamedTempFile::new().unwrap();
    let db = open_auth_db(db_file.path().to_str().unwrap()).unwrap();
    let auth_state = AuthState::new(
        UserStore::new(db.clone()),
        SessionStore::new(db),
        Arc::new(TokenSigner::new(
            "test-secret-key-12345".to_string(),
            7 * 24 * 3600,
        )),
    );

    let app_state = AppState {
        hypervisor: Arc::new(MockHypervisor::new()),
    };

    let auth_routes = Router::new()
        .route("/api/signup", post(auth_api::signup))
        .route("/api/login", post(auth_api::login))
        .route("/api/logout", post(auth_api::logout))
        .route("/api/verify-session", get(auth_api::verify_session))
        .with_state(auth_state.clone());

    let account_routes = Router::new()
        .route("/api/users/me", get(auth_api::me))
        .route_layer(axum_middleware::from_fn_with_state(
            auth_state.clone(),
            auth_middleware,
        ));

    let vm_routes = routes::vm_router(app_state).route_layer(
        axum_middleware::from_fn_with_state(auth_state, auth_middleware),
    );

    let router = Router::new()
        .route("/api/health", get(routes::health_check))
        .merge(auth_routes)
        .merge(account_routes)
        .merge(vm_routes);

    TestApp {
        router,
        _db_file: db_file,
    }
}

async fn send(
    router: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    bearer: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }

    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };

    (status, value)
}

fn signup_body() -> Value {
    json!({"name": "A", "email": "a@x.com", "password": "abcdef"})
}

#[tokio::test]
async fn test_signup_login_logout_flow() {
    let app = test_app();

    // Signup succeeds and returns a non-empty token
    let (status, body) = send(&app.router, "POST", "/api/signup", Some(signup_body()), None).await;
    assert_eq!(status, StatusCode::OK);
    let signup_token = body["token"].as_str().unwrap().to_string();
    assert!(!signup_token.is_empty());
    assert_eq!(body["email"], "a@x.com");

    // Repeating the same signup fails without creating anything
    let (status, body) = send(&app.router, "POST", "/api/signup", Some(signup_body()), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("already registered"));

    // Wrong password is unauthorized
    let (status, _) = send(
        &app.router,
        "POST",
        "/api/login",
        Some(json!({"email": "a@x.com", "password": "wrong!"})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Correct password returns a fresh token and an updated last_login
    let (status, body) = send(
        &app.router,
        "POST",
        "/api/login",
        Some(json!({"email": "a@x.com", "password": "abcdef"})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let login_token = body["token"].as_str().unwrap().to_string();
    assert!(!login_token.is_empty());
    assert_ne!(login_token, signup_token);
    assert!(body["user"]["last_login"].is_string());

    // The session checks out while live
    let (status, body) = send(
        &app.router,
        "GET",
        &format!("/api/verify-session?token={}", login_token),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["user"]["email"], "a@x.com");

    // Logout always succeeds
    let (status, body) = send(
        &app.router,
        "POST",
        "/api/logout",
        Some(json!({"token": login_token})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    // The revoked token no longer verifies
    let (status, _) = send(
        &app.router,
        "GET",
        &format!("/api/verify-session?token={}", login_token),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_short_password_rejected_at_signup() {
    let app = test_app();

    let (status, body) = send(
        &app.router,
        "POST",
        "/api/signup",
        Some(json!({"name": "A", "email": "short@x.com", "password": "abcde"})),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("at least 6"));
}

#[tokio::test]
async fn test_me_requires_and_uses_bearer_token() {
    let app = test_app();

    // Unauthenticated
    let (status, _) = send(&app.router, "GET", "/api/users/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, body) = send(&app.router, "POST", "/api/signup", Some(signup_body()), None).await;
    let token = body["token"].as_str().unwrap().to_string();

    let (status, body) = send(&app.router, "GET", "/api/users/me", None, Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "a@x.com");
    assert_eq!(body["name"], "A");
    // Hash never leaves the server
    assert!(body.get("password_hash").is_none());
}

#[tokio::test]
async fn test_vm_routes_are_guarded_and_pass_through() {
    let app = test_app();

    // No token: rejected before the handler runs
    let (status, _) = send(&app.router, "GET", "/api/vm-list", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, body) = send(&app.router, "POST", "/api/signup", Some(signup_body()), None).await;
    let token = body["token"].as_str().unwrap().to_string();

    // Create + start
    let (status, body) = send(
        &app.router,
        "POST",
        "/api/create-vm",
        Some(json!({
            "name": "web-1", "vmid": 100, "memory": 2048, "cores": 2,
            "storage": "local-lvm", "iso": "debian-12.iso", "network": "vmbr0",
            "payment_info": {"upi_id": "user@bank", "amount": 499.0}
        })),
        Some(&token),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["vm_status"]["status"], "running");
    assert_eq!(body["payment_processed"], true);

    // Status and listing
    let (status, body) = send(&app.router, "GET", "/api/vm-status/100", None, Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["vmid"], 100);

    let (status, body) = send(&app.router, "GET", "/api/vm-list", None, Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);

    // Delete, then the VM is gone
    let (status, body) = send(
        &app.router,
        "DELETE",
        "/api/delete-vm/100",
        Some(json!({"upi_id": "user@bank", "amount": 99.0})),
        Some(&token),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");

    let (status, _) = send(&app.router, "GET", "/api/vm-status/100", None, Some(&token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rate_limit_throttles_eleventh_request() {
    // Minimal router with only the rate limiter in front of health
    let limiter = RateLimiter::new(RateLimitConfig::default());
    let router = Router::new()
        .route("/api/health", get(routes::health_check))
        .layer(axum_middleware::from_fn_with_state(
            limiter,
            rate_limit_middleware,
        ));

    let addr = SocketAddr::from(([127, 0, 0, 1], 40001));

    for _ in 0..10 {
        let mut request = Request::builder()
            .uri("/api/health")
            .body(Body::empty())
            .unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));

        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let mut request = Request::builder()
        .uri("/api/health")
        .body(Body::empty())
        .unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));

    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("Retry-After"));
}

#[tokio::test]
async fn test_health_reports_status_and_message() {
    let app = test_app();

    let (status, body) = send(&app.router, "GET", "/api/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert!(body["message"].as_str().unwrap().contains("running"));
}
