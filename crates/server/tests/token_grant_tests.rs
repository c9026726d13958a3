//! Password, client credentials and refresh token grants.

mod common;

use axum::http::{StatusCode, header};
use common::*;
use helpdesk_auth::oauth2::{
    Permission,
    permission::Endpoint,
    registry::{ClientDescriptor, ClientType},
};

const REPORTING_CLIENT: &str = "reporting-service";
const REPORTING_SECRET: &str = "reporting-secret-for-tests";

fn reporting_client() -> ClientDescriptor {
    ClientDescriptor {
        client_id: REPORTING_CLIENT.to_string(),
        client_type: ClientType::Confidential,
        client_secret: Some(REPORTING_SECRET.to_string()),
        display_name: "Reporting Service".to_string(),
        permissions: vec![
            Permission::Endpoint(Endpoint::Token),
            Permission::grant_type("client_credentials"),
            Permission::grant_type("refresh_token"),
            Permission::scope("api"),
        ],
        redirect_uris: vec![],
        post_logout_redirect_uris: vec![],
        requires_pkce: false,
    }
}

async fn password_grant(app: &TestApp, password: &str) -> axum_test::TestResponse {
    app.server
        .post("/connect/token")
        .form(&[
            ("grant_type", "password"),
            ("client_id", "mobile-client"),
            ("username", USER_EMAIL),
            ("password", password),
            ("scope", "openid email api"),
        ])
        .await
}

#[tokio::test]
async fn test_password_grant_issues_tokens() {
    let app = spawn_app().await;

    let response = password_grant(&app, USER_PASSWORD).await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    assert!(body["refresh_token"].is_string());
    let identity = jwt_payload(body["id_token"].as_str().unwrap());
    assert_eq!(identity["email"], USER_EMAIL);
    assert_eq!(identity["aud"], "mobile-client");

    let user = app.users().find_by_id(&app.user_id).await.unwrap().unwrap();
    assert!(user.last_login_at.is_some());
}

#[tokio::test]
async fn test_password_grant_accepts_user_name() {
    let app = spawn_app().await;

    let response = app
        .server
        .post("/connect/token")
        .form(&[
            ("grant_type", "password"),
            ("client_id", "mobile-client"),
            ("username", USER_NAME),
            ("password", USER_PASSWORD),
        ])
        .await;
    response.assert_status_ok();
}

#[tokio::test]
async fn test_password_grant_wrong_password() {
    let app = spawn_app().await;

    let response = password_grant(&app, "wrong-password").await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_grant");
    assert_eq!(
        body["error_description"],
        "The username/password couple is invalid."
    );
}

#[tokio::test]
async fn test_password_grant_unknown_user_looks_like_wrong_password() {
    let app = spawn_app().await;

    let wrong_password: serde_json::Value = password_grant(&app, "wrong-password").await.json();
    let response = app
        .server
        .post("/connect/token")
        .form(&[
            ("grant_type", "password"),
            ("client_id", "mobile-client"),
            ("username", "nobody@example.test"),
            ("password", "wrong-password"),
            ("scope", "openid email api"),
        ])
        .await;
    response.assert_status_bad_request();
    let unknown_user: serde_json::Value = response.json();
    assert_eq!(unknown_user, wrong_password);
}

#[tokio::test]
async fn test_password_grant_lockout_looks_like_bad_credentials() {
    let app = spawn_app().await;

    for _ in 0..app.config.lockout.max_failed_attempts {
        password_grant(&app, "wrong-password")
            .await
            .assert_status_bad_request();
    }

    // The right password no longer helps while the account is locked
    let response = password_grant(&app, USER_PASSWORD).await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(
        body["error_description"],
        "The username/password couple is invalid."
    );
}

#[tokio::test]
async fn test_spa_client_cannot_use_password_grant() {
    let app = spawn_app().await;

    let response = app
        .server
        .post("/connect/token")
        .form(&[
            ("grant_type", "password"),
            ("client_id", "bwa-client"),
            ("username", USER_EMAIL),
            ("password", USER_PASSWORD),
        ])
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "unauthorized_client");
}

#[tokio::test]
async fn test_refresh_token_rotation() {
    let app = spawn_app().await;
    let first: serde_json::Value = password_grant(&app, USER_PASSWORD).await.json();
    let refresh = first["refresh_token"].as_str().unwrap().to_string();

    let response = app
        .server
        .post("/connect/token")
        .form(&[
            ("grant_type", "refresh_token"),
            ("client_id", "mobile-client"),
            ("refresh_token", refresh.as_str()),
        ])
        .await;
    response.assert_status_ok();
    let second: serde_json::Value = response.json();
    assert_ne!(second["refresh_token"], first["refresh_token"]);
    assert_eq!(second["scope"], "openid email api");

    // The old refresh token was consumed
    let response = app
        .server
        .post("/connect/token")
        .form(&[
            ("grant_type", "refresh_token"),
            ("client_id", "mobile-client"),
            ("refresh_token", refresh.as_str()),
        ])
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_grant");
}

#[tokio::test]
async fn test_refresh_can_narrow_but_not_widen_scope() {
    let app = spawn_app().await;
    let first: serde_json::Value = password_grant(&app, USER_PASSWORD).await.json();

    let response = app
        .server
        .post("/connect/token")
        .form(&[
            ("grant_type", "refresh_token"),
            ("client_id", "mobile-client"),
            ("refresh_token", first["refresh_token"].as_str().unwrap()),
            ("scope", "openid roles"),
        ])
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_scope");
}

#[tokio::test]
async fn test_refresh_for_deleted_user_fails() {
    let app = spawn_app().await;
    let first: serde_json::Value = password_grant(&app, USER_PASSWORD).await.json();

    app.users().delete_user(&app.user_id).await.unwrap();

    let response = app
        .server
        .post("/connect/token")
        .form(&[
            ("grant_type", "refresh_token"),
            ("client_id", "mobile-client"),
            ("refresh_token", first["refresh_token"].as_str().unwrap()),
        ])
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_grant");
    assert_eq!(body["error_description"], "The user no longer exists.");
}

#[tokio::test]
async fn test_rejected_refresh_keeps_token_usable() {
    let app = spawn_app().await;
    let first: serde_json::Value = password_grant(&app, USER_PASSWORD).await.json();
    let refresh = first["refresh_token"].as_str().unwrap();

    let widened = app
        .server
        .post("/connect/token")
        .form(&[
            ("grant_type", "refresh_token"),
            ("client_id", "mobile-client"),
            ("refresh_token", refresh),
            ("scope", "openid roles"),
        ])
        .await;
    widened.assert_status_bad_request();

    let response = app
        .server
        .post("/connect/token")
        .form(&[
            ("grant_type", "refresh_token"),
            ("client_id", "mobile-client"),
            ("refresh_token", refresh),
        ])
        .await;
    response.assert_status_ok();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_refresh_has_one_winner() {
    let app = spawn_pooled_app().await;
    let first: serde_json::Value = password_grant(&app, USER_PASSWORD).await.json();
    let refresh = first["refresh_token"].as_str().unwrap();

    let form = [
        ("grant_type", "refresh_token"),
        ("client_id", "mobile-client"),
        ("refresh_token", refresh),
    ];
    let rotate = || async { app.server.post("/connect/token").form(&form).await };
    let (a, b) = tokio::join!(rotate(), rotate());

    let mut statuses = [a.status_code(), b.status_code()];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::OK, StatusCode::BAD_REQUEST]);

    // Exactly one replacement pair was persisted next to the original
    let winner: serde_json::Value = if a.status_code() == StatusCode::OK {
        a.json()
    } else {
        b.json()
    };
    let response = app
        .server
        .post("/connect/token")
        .form(&[
            ("grant_type", "refresh_token"),
            ("client_id", "mobile-client"),
            ("refresh_token", winner["refresh_token"].as_str().unwrap()),
        ])
        .await;
    response.assert_status_ok();
}

#[tokio::test]
async fn test_refresh_token_bound_to_client() {
    let app = spawn_app_with_clients(vec![reporting_client()]).await;
    let first: serde_json::Value = password_grant(&app, USER_PASSWORD).await.json();

    let response = app
        .server
        .post("/connect/token")
        .add_header(
            header::AUTHORIZATION,
            basic_auth(REPORTING_CLIENT, REPORTING_SECRET),
        )
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", first["refresh_token"].as_str().unwrap()),
        ])
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_grant");
}

#[tokio::test]
async fn test_client_credentials_grant() {
    let app = spawn_app_with_clients(vec![reporting_client()]).await;

    let response = app
        .server
        .post("/connect/token")
        .add_header(
            header::AUTHORIZATION,
            basic_auth(REPORTING_CLIENT, REPORTING_SECRET),
        )
        .form(&[("grant_type", "client_credentials"), ("scope", "api")])
        .await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    assert!(body.get("refresh_token").is_none());
    assert!(body.get("id_token").is_none());
    let access = jwt_payload(body["access_token"].as_str().unwrap());
    assert_eq!(access["sub"], REPORTING_CLIENT);
    assert_eq!(access["aud"], "helpdesk_api");
}

#[tokio::test]
async fn test_client_credentials_wrong_secret() {
    let app = spawn_app_with_clients(vec![reporting_client()]).await;

    let response = app
        .server
        .post("/connect/token")
        .form(&[
            ("grant_type", "client_credentials"),
            ("client_id", REPORTING_CLIENT),
            ("client_secret", "not-the-secret"),
        ])
        .await;
    response.assert_status_unauthorized();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_client");
}

#[tokio::test]
async fn test_public_client_sending_secret_is_rejected() {
    let app = spawn_app().await;

    let response = app
        .server
        .post("/connect/token")
        .form(&[
            ("grant_type", "password"),
            ("client_id", "mobile-client"),
            ("client_secret", "anything"),
            ("username", USER_EMAIL),
            ("password", USER_PASSWORD),
        ])
        .await;
    response.assert_status_unauthorized();
}

#[tokio::test]
async fn test_unknown_grant_type() {
    let app = spawn_app().await;

    let response = app
        .server
        .post("/connect/token")
        .form(&[("grant_type", "implicit"), ("client_id", "mobile-client")])
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "unsupported_grant_type");
}

#[tokio::test]
async fn test_recognised_grant_without_handler() {
    let app = spawn_app().await;

    let response = app
        .server
        .post("/connect/token")
        .form(&[
            ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
            ("client_id", "mobile-client"),
        ])
        .await;
    response.assert_status(StatusCode::NOT_IMPLEMENTED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "not_implemented");
}

#[tokio::test]
async fn test_missing_grant_type() {
    let app = spawn_app().await;

    let response = app
        .server
        .post("/connect/token")
        .form(&[("client_id", "mobile-client")])
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_request");
}
