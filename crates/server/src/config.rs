use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration build error: {0}")]
    Build(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Public base URL of this service, used as the `iss` of every token.
    pub issuer_url: String,
    #[serde(default = "default_true")]
    pub run_migrations: bool,
    pub oauth2: OAuth2Config,
    pub external_session: ExternalSessionConfig,
    #[serde(default)]
    pub lockout: LockoutConfig,
    #[serde(default)]
    pub clients: ClientsConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct OAuth2Config {
    /// HS256 key shared by access and identity tokens.
    pub signing_secret: String,
    #[serde(default = "default_access_token_lifetime")]
    pub access_token_lifetime: i64,
    #[serde(default = "default_identity_token_lifetime")]
    pub identity_token_lifetime: i64,
    #[serde(default = "default_refresh_token_lifetime")]
    pub refresh_token_lifetime: i64,
    #[serde(default = "default_authorization_code_lifetime")]
    pub authorization_code_lifetime: i64,
}

/// Settings for the browser login session that the authorize endpoint bridges from.
#[derive(Clone, Debug, Deserialize)]
pub struct ExternalSessionConfig {
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    pub secret: String,
    /// Session lifetime in seconds.
    #[serde(default = "default_session_lifetime")]
    pub lifetime: i64,
    #[serde(default = "default_true")]
    pub secure: bool,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    /// Absolute origins (scheme://host[:port]) a `returnUrl` may point at.
    #[serde(default)]
    pub allowed_return_origins: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LockoutConfig {
    #[serde(default = "default_max_failed_attempts")]
    pub max_failed_attempts: i32,
    /// Lockout duration in seconds.
    #[serde(default = "default_lockout_duration")]
    pub duration: i64,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: default_max_failed_attempts(),
            duration: default_lockout_duration(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ClientsConfig {
    #[serde(default = "default_spa_redirect_uris")]
    pub spa_redirect_uris: Vec<String>,
    #[serde(default = "default_spa_post_logout_redirect_uris")]
    pub spa_post_logout_redirect_uris: Vec<String>,
    /// Secret of the confidential introspection client. Bootstrap fails without it.
    #[serde(default)]
    pub introspection_secret: Option<String>,
}

impl Default for ClientsConfig {
    fn default() -> Self {
        Self {
            spa_redirect_uris: default_spa_redirect_uris(),
            spa_post_logout_redirect_uris: default_spa_post_logout_redirect_uris(),
            introspection_secret: None,
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_true() -> bool {
    true
}

fn default_access_token_lifetime() -> i64 {
    3600
}

fn default_identity_token_lifetime() -> i64 {
    1200
}

fn default_refresh_token_lifetime() -> i64 {
    14 * 86400
}

fn default_authorization_code_lifetime() -> i64 {
    300
}

fn default_cookie_name() -> String {
    "helpdesk.external".to_string()
}

fn default_session_lifetime() -> i64 {
    30 * 60
}

fn default_login_path() -> String {
    "/Account/Login".to_string()
}

fn default_max_failed_attempts() -> i32 {
    5
}

fn default_lockout_duration() -> i64 {
    5 * 60
}

fn default_spa_redirect_uris() -> Vec<String> {
    vec!["https://localhost:7274/authentication/login-callback".to_string()]
}

fn default_spa_post_logout_redirect_uris() -> Vec<String> {
    vec!["https://localhost:7274/authentication/logout-callback".to_string()]
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.oauth2.signing_secret.len() < 32 {
            return Err(ConfigError::Validation(
                "oauth2.signing_secret must be at least 32 characters".into(),
            ));
        }
        if self.external_session.secret.len() < 32 {
            return Err(ConfigError::Validation(
                "external_session.secret must be at least 32 characters".into(),
            ));
        }
        if url::Url::parse(&self.issuer_url).is_err() {
            return Err(ConfigError::Validation(
                "issuer_url must be an absolute URL".into(),
            ));
        }
        for (name, value) in [
            ("oauth2.access_token_lifetime", self.oauth2.access_token_lifetime),
            ("oauth2.identity_token_lifetime", self.oauth2.identity_token_lifetime),
            ("oauth2.refresh_token_lifetime", self.oauth2.refresh_token_lifetime),
            (
                "oauth2.authorization_code_lifetime",
                self.oauth2.authorization_code_lifetime,
            ),
            ("external_session.lifetime", self.external_session.lifetime),
            ("lockout.duration", self.lockout.duration),
        ] {
            if value <= 0 {
                return Err(ConfigError::Validation(format!("{name} must be > 0")));
            }
        }
        if self.lockout.max_failed_attempts <= 0 {
            return Err(ConfigError::Validation(
                "lockout.max_failed_attempts must be > 0".into(),
            ));
        }
        if !self.external_session.login_path.starts_with('/') {
            return Err(ConfigError::Validation(
                "external_session.login_path must be an absolute path".into(),
            ));
        }
        Ok(())
    }

    /// Issuer without a trailing slash, as it appears in `iss` and discovery.
    pub fn issuer(&self) -> &str {
        self.issuer_url.trim_end_matches('/')
    }
}

/// Load application configuration from `config.yaml` + environment overrides.
///
/// Environment variables override file values by key path separated with double
/// underscores (e.g. `OAUTH2__SIGNING_SECRET`). The file is optional so that
/// container deployments can be configured from the environment alone.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    use config::{Config, Environment, File};
    let cfg = Config::builder()
        .add_source(File::with_name("config.yaml").required(false))
        .add_source(Environment::default().separator("__"))
        .build()?;

    let app: AppConfig = cfg.try_deserialize()?;
    app.validate()?;

    Ok(app)
}
