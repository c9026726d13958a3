//! External session bridge.
//!
//! The login form issues its own cookie, independent from anything the
//! authorization server keeps. The authorize endpoint only ever asks this
//! module two questions: who is logged in (if anyone), and where to send the
//! browser when nobody is.

use crate::config::ExternalSessionConfig;
use crate::entity::app_user;
use crate::oauth2::users::UserStore;
use axum::response::Response;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sea_orm::DbErr;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Audience of session cookies, so an access token can never be replayed as one.
const SESSION_AUDIENCE: &str = "helpdesk-auth/external-session";

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    sub: String,
    aud: String,
    iat: i64,
    exp: i64,
}

/// Signed-cookie store for the external login session.
#[derive(Clone)]
pub struct ExternalSessions {
    cookie_name: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    lifetime: i64,
    secure: bool,
    login_path: String,
}

impl ExternalSessions {
    pub fn new(config: &ExternalSessionConfig) -> Self {
        Self {
            cookie_name: config.cookie_name.clone(),
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            lifetime: config.lifetime,
            secure: config.secure,
            login_path: config.login_path.clone(),
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Issue the session cookie for `user_id`.
    pub fn sign_in(
        &self,
        jar: CookieJar,
        user_id: &str,
    ) -> Result<CookieJar, jsonwebtoken::errors::Error> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = SessionClaims {
            sub: user_id.to_string(),
            aud: SESSION_AUDIENCE.to_string(),
            iat: now,
            exp: now + self.lifetime,
        };
        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;

        let mut cookie = Cookie::new(self.cookie_name.clone(), token);
        cookie.set_http_only(true);
        cookie.set_secure(self.secure);
        cookie.set_same_site(SameSite::Lax);
        cookie.set_path("/");
        cookie.set_max_age(time::Duration::seconds(self.lifetime));
        Ok(jar.add(cookie))
    }

    /// Subject of a valid session cookie, if present.
    pub fn authenticate(&self, jar: &CookieJar) -> Option<String> {
        let cookie = jar.get(&self.cookie_name)?;
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[SESSION_AUDIENCE]);
        validation.leeway = 0;

        match jsonwebtoken::decode::<SessionClaims>(cookie.value(), &self.decoding_key, &validation)
        {
            Ok(data) => Some(data.claims.sub),
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring invalid external session cookie");
                None
            }
        }
    }

    pub fn sign_out(&self, jar: CookieJar) -> CookieJar {
        let mut cookie = Cookie::from(self.cookie_name.clone());
        cookie.set_path("/");
        jar.remove(cookie)
    }

    /// Send the browser to the login surface, coming back to `return_to` afterwards.
    pub fn challenge(&self, return_to: &str) -> Response {
        let location = format!(
            "{}?returnUrl={}",
            self.login_path,
            urlencoding::encode(return_to)
        );
        super::found(&location)
    }
}

/// Resolve the external session to a user that may receive tokens.
///
/// A session whose user has since been deleted or deactivated counts as no session.
pub async fn resolve_external_user(
    sessions: &ExternalSessions,
    users: &UserStore,
    jar: &CookieJar,
) -> Result<Option<app_user::Model>, DbErr> {
    let Some(subject) = sessions.authenticate(jar) else {
        return Ok(None);
    };
    let user = users.find_active(&subject).await?;
    if user.is_none() {
        tracing::info!(subject = %subject, "External session refers to an unknown or inactive user");
    }
    Ok(user)
}
