//! Shared setup for the integration tests.

#![allow(dead_code)]

use axum_test::TestServer;
use config::{Config, File, FileFormat};
use helpdesk_auth::{
    AppResources, api,
    config::AppConfig,
    oauth2::{
        registry::{self, ClientDescriptor},
        users::UserStore,
    },
};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::path::PathBuf;
use std::sync::Arc;

pub const ISSUER: &str = "https://auth.example.test";
pub const SPA_REDIRECT: &str = "https://localhost:7274/authentication/login-callback";
pub const INTROSPECTION_SECRET: &str = "introspection-secret-for-tests";
pub const USER_EMAIL: &str = "alice@example.test";
pub const USER_NAME: &str = "alice";
pub const USER_PASSWORD: &str = "Correct-Horse-1";

const CONFIG: &str = r#"
database_url: "sqlite::memory:"
issuer_url: "https://auth.example.test/"
run_migrations: true
oauth2:
  signing_secret: "test-signing-secret-0123456789abcdef"
external_session:
  secret: "test-session-secret-0123456789abcdef"
  secure: false
lockout:
  max_failed_attempts: 3
  duration: 300
clients:
  introspection_secret: "introspection-secret-for-tests"
"#;

pub fn test_config() -> AppConfig {
    let config: AppConfig = Config::builder()
        .add_source(File::from_str(CONFIG, FileFormat::Yaml))
        .build()
        .expect("build config")
        .try_deserialize()
        .expect("deserialize config");
    config.validate().expect("valid config");
    config
}

pub struct TestApp {
    pub server: TestServer,
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub user_id: String,
    _db_file: Option<DbFile>,
}

/// SQLite database file removed when the test finishes.
struct DbFile(PathBuf);

impl Drop for DbFile {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm", "-journal"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", self.0.display()));
        }
    }
}

impl TestApp {
    pub fn users(&self) -> UserStore {
        UserStore::new(self.db.clone(), self.config.lockout.clone())
    }
}

/// Migrated in-memory database with the default registry and no users.
pub async fn test_db() -> Arc<DatabaseConnection> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    // One connection keeps every query on the same in-memory database.
    options.max_connections(1).sqlx_logging(false);
    let db = Database::connect(options).await.expect("connect");
    Migrator::up(&db, None).await.expect("migrate");
    Arc::new(db)
}

/// Migrated database in a temporary file, served by a pool of several connections.
async fn pooled_test_db() -> (Arc<DatabaseConnection>, DbFile) {
    let path = std::env::temp_dir().join(format!("helpdesk-auth-{}.db", uuid::Uuid::new_v4()));
    let mut options = ConnectOptions::new(format!("sqlite://{}?mode=rwc", path.display()));
    options.max_connections(4).sqlx_logging(false);
    let db = Database::connect(options).await.expect("connect");
    Migrator::up(&db, None).await.expect("migrate");
    (Arc::new(db), DbFile(path))
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with_clients(Vec::new()).await
}

/// Like [`spawn_app`], with extra client descriptors registered next to the default ones.
pub async fn spawn_app_with_clients(extra: Vec<ClientDescriptor>) -> TestApp {
    spawn_app_on(test_db().await, None, extra).await
}

/// Like [`spawn_app`], but requests can hit the database concurrently.
pub async fn spawn_pooled_app() -> TestApp {
    let (db, file) = pooled_test_db().await;
    spawn_app_on(db, Some(file), Vec::new()).await
}

async fn spawn_app_on(
    db: Arc<DatabaseConnection>,
    db_file: Option<DbFile>,
    extra: Vec<ClientDescriptor>,
) -> TestApp {
    let config = Arc::new(test_config());

    let mut clients = registry::default_clients(&config.clients);
    clients.extend(extra);
    registry::bootstrap(db.as_ref(), &registry::default_scopes(), &clients)
        .await
        .expect("bootstrap registry");

    let users = UserStore::new(db.clone(), config.lockout.clone());
    let user = users
        .create_user(USER_EMAIL, USER_NAME, USER_PASSWORD, &["Agent"])
        .await
        .expect("create user");

    let server = TestServer::new(api::app(AppResources {
        db: db.clone(),
        config: config.clone(),
    }))
    .expect("create test server");

    TestApp {
        server,
        db,
        config,
        user_id: user.id,
        _db_file: db_file,
    }
}

/// Decode a JWT payload without verifying it.
pub fn jwt_payload(token: &str) -> serde_json::Value {
    use base64::Engine;
    let payload = token.split('.').nth(1).expect("jwt payload");
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .expect("base64 payload");
    serde_json::from_slice(&bytes).expect("json payload")
}

/// Absolute URL of a `Location` header.
pub fn location(response: &axum_test::TestResponse) -> url::Url {
    let value = response.header("location");
    let value = value.to_str().expect("ascii location");
    url::Url::parse("http://localhost")
        .and_then(|base| base.join(value))
        .expect("location url")
}

pub fn query_param(url: &url::Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

/// Sign in through the login form and return the session cookie as a `Cookie` header value.
pub async fn login(app: &TestApp) -> String {
    let response = app
        .server
        .post("/Account/DoLogin")
        .form(&[
            ("login", USER_EMAIL),
            ("password", USER_PASSWORD),
            ("returnUrl", "/"),
        ])
        .await;
    response.assert_status(axum::http::StatusCode::SEE_OTHER);
    let cookie = response.cookie(&app.config.external_session.cookie_name);
    format!("{}={}", cookie.name(), cookie.value())
}

/// A code issued to the SPA client, along with the verifier that redeems it.
pub struct IssuedCode {
    pub code: String,
    pub state: String,
    pub verifier: String,
}

/// Drive the authorize endpoint for the SPA client with a signed-in browser.
pub async fn authorize_spa(app: &TestApp, session_cookie: &str, scope: &str) -> IssuedCode {
    use helpdesk_auth::oauth2::pkce::{self, AuthorizationUrlParams, MemoryPkceStore, PkceStore};

    let store = MemoryPkceStore::default();
    let endpoint = format!("{ISSUER}/connect/authorize");
    let (url, state) = pkce::begin_login(
        &store,
        &AuthorizationUrlParams {
            authorization_endpoint: &endpoint,
            client_id: "bwa-client",
            redirect_uri: SPA_REDIRECT,
            scope,
        },
    )
    .expect("begin login");
    let params: Vec<(String, String)> = url.query_pairs().into_owned().collect();

    let response = app
        .server
        .get("/connect/authorize")
        .add_query_params(&params)
        .add_header(
            axum::http::header::COOKIE,
            axum::http::HeaderValue::from_str(session_cookie).expect("cookie header"),
        )
        .await;
    response.assert_status(axum::http::StatusCode::FOUND);

    let redirect = location(&response);
    assert_eq!(redirect.as_str().split('?').next(), Some(SPA_REDIRECT));
    assert_eq!(query_param(&redirect, "state").as_deref(), Some(state.as_str()));

    IssuedCode {
        code: query_param(&redirect, "code").expect("code in redirect"),
        verifier: store.take(&state).expect("pending verifier"),
        state,
    }
}

pub fn basic_auth(client_id: &str, secret: &str) -> axum::http::HeaderValue {
    use base64::Engine;
    let encoded =
        base64::engine::general_purpose::STANDARD.encode(format!("{client_id}:{secret}"));
    axum::http::HeaderValue::from_str(&format!("Basic {encoded}")).expect("basic header")
}
