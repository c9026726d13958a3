//! Login pages and the external session they maintain.

mod common;

use axum::http::{HeaderValue, StatusCode, header};
use common::*;

#[tokio::test]
async fn test_login_page_renders_return_url() {
    let app = spawn_app().await;

    let response = app
        .server
        .get("/Account/Login")
        .add_query_param("returnUrl", "/connect/authorize?client_id=bwa-client")
        .add_query_param("error", "Invalid login or password.")
        .await;
    response.assert_status_ok();
    let html = response.text();
    assert!(html.contains("/Account/DoLogin"));
    assert!(html.contains("Invalid login or password."));
    assert!(html.contains("client_id=bwa-client"));
}

#[tokio::test]
async fn test_login_redirects_to_return_url() {
    let app = spawn_app().await;

    let response = app
        .server
        .post("/Account/DoLogin")
        .form(&[
            ("login", USER_EMAIL),
            ("password", USER_PASSWORD),
            ("returnUrl", "/connect/authorize?client_id=bwa-client"),
        ])
        .await;
    response.assert_status(StatusCode::SEE_OTHER);
    assert_eq!(
        response.header(header::LOCATION),
        "/connect/authorize?client_id=bwa-client"
    );
    let cookie = response.cookie(&app.config.external_session.cookie_name);
    assert_eq!(cookie.http_only(), Some(true));
}

#[tokio::test]
async fn test_login_refuses_foreign_return_url() {
    let app = spawn_app().await;

    let response = app
        .server
        .post("/Account/DoLogin")
        .form(&[
            ("login", USER_EMAIL),
            ("password", USER_PASSWORD),
            ("returnUrl", "https://evil.example/steal"),
        ])
        .await;
    response.assert_status(StatusCode::SEE_OTHER);
    assert_eq!(response.header(header::LOCATION), "/");
}

#[tokio::test]
async fn test_login_failure_returns_to_form() {
    let app = spawn_app().await;

    let response = app
        .server
        .post("/Account/DoLogin")
        .form(&[
            ("login", USER_EMAIL),
            ("password", "nope"),
            ("returnUrl", "/connect/authorize?client_id=bwa-client"),
        ])
        .await;
    response.assert_status(StatusCode::SEE_OTHER);

    let target = location(&response);
    assert_eq!(target.path(), "/Account/Login");
    assert_eq!(
        query_param(&target, "error").as_deref(),
        Some("Invalid login or password.")
    );
    assert_eq!(
        query_param(&target, "returnUrl").as_deref(),
        Some("/connect/authorize?client_id=bwa-client")
    );
}

#[tokio::test]
async fn test_login_lockout_message() {
    let app = spawn_app().await;

    for _ in 0..app.config.lockout.max_failed_attempts {
        app.server
            .post("/Account/DoLogin")
            .form(&[("login", USER_EMAIL), ("password", "nope")])
            .await;
    }

    let response = app
        .server
        .post("/Account/DoLogin")
        .form(&[("login", USER_EMAIL), ("password", USER_PASSWORD)])
        .await;
    let target = location(&response);
    assert_eq!(
        query_param(&target, "error").as_deref(),
        Some("This account is temporarily locked. Try again later.")
    );

    // Without the right password the lockout is not disclosed
    let response = app
        .server
        .post("/Account/DoLogin")
        .form(&[("login", USER_EMAIL), ("password", "nope")])
        .await;
    let target = location(&response);
    assert_eq!(
        query_param(&target, "error").as_deref(),
        Some("Invalid login or password.")
    );
}

#[tokio::test]
async fn test_current_user_reflects_session() {
    let app = spawn_app().await;

    let anonymous: serde_json::Value = app.server.get("/Account/User").await.json();
    assert_eq!(anonymous["isAuthenticated"], false);

    let cookie = login(&app).await;
    let response = app
        .server
        .get("/Account/User")
        .add_header(header::COOKIE, HeaderValue::from_str(&cookie).unwrap())
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["isAuthenticated"], true);
    assert_eq!(body["userId"], app.user_id.as_str());
    assert_eq!(body["email"], USER_EMAIL);
    assert_eq!(body["roles"], serde_json::json!(["Agent"]));
}

#[tokio::test]
async fn test_session_of_deleted_user_is_ignored() {
    let app = spawn_app().await;
    let cookie = login(&app).await;
    app.users().delete_user(&app.user_id).await.unwrap();

    let body: serde_json::Value = app
        .server
        .get("/Account/User")
        .add_header(header::COOKIE, HeaderValue::from_str(&cookie).unwrap())
        .await
        .json();
    assert_eq!(body["isAuthenticated"], false);
}

#[tokio::test]
async fn test_logout_clears_cookie() {
    let app = spawn_app().await;
    let cookie = login(&app).await;

    let response = app
        .server
        .post("/Account/Logout")
        .add_header(header::COOKIE, HeaderValue::from_str(&cookie).unwrap())
        .await;
    response.assert_status(StatusCode::NO_CONTENT);

    let removal = response.cookie(&app.config.external_session.cookie_name);
    assert_eq!(removal.value(), "");
}

#[tokio::test]
async fn test_login_accepts_email_field() {
    let app = spawn_app().await;

    let response = app
        .server
        .post("/Account/DoLogin")
        .form(&[("email", USER_EMAIL), ("password", USER_PASSWORD)])
        .await;
    response.assert_status(StatusCode::SEE_OTHER);
    assert_eq!(response.header(header::LOCATION), "/");
}

#[tokio::test]
async fn test_login_drops_return_url_with_control_characters() {
    let app = spawn_app().await;

    for return_url in ["/\t/evil.example/steal", "/next\nline"] {
        let response = app
            .server
            .post("/Account/DoLogin")
            .form(&[
                ("login", USER_EMAIL),
                ("password", USER_PASSWORD),
                ("returnUrl", return_url),
            ])
            .await;
        response.assert_status(StatusCode::SEE_OTHER);
        assert_eq!(response.header(header::LOCATION), "/");
    }
}
