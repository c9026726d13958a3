//! Account endpoints backing the external login session.
//!
//! These pages are what the authorization endpoint challenges to. They only
//! ever set or clear the external session cookie; tokens are minted elsewhere.

use crate::oauth2::bridge::resolve_external_user;
use crate::oauth2::state::OAuth2State;
use crate::oauth2::users::CredentialCheck;
use askama::Template;
use axum::{
    Form, Json,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub const ACCOUNT_TAG: &str = "Account";

const LOGIN_PATH: &str = "/Account/Login";

#[derive(Template)]
#[template(path = "login.html")]
struct LoginTemplate {
    return_url: String,
    login: String,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    #[serde(rename = "returnUrl")]
    pub return_url: Option<String>,
    pub error: Option<String>,
    pub login_hint: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginForm {
    /// Email address or user name.
    #[serde(alias = "email")]
    pub login: String,
    pub password: String,
    #[serde(rename = "returnUrl")]
    pub return_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LogoutQuery {
    #[serde(rename = "returnUrl")]
    pub return_url: Option<String>,
}

#[derive(Debug, Default, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccountUser {
    pub is_authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub roles: Vec<String>,
}

/// Display the login page.
#[tracing::instrument(skip(params))]
#[utoipa::path(
    get,
    path = "/Account/Login",
    tag = ACCOUNT_TAG,
    operation_id = "Account Login Page",
    summary = "Display the login form",
    description = "Renders the login form. The authorization endpoint redirects here when the browser has no \
                   login session, passing where to go afterwards in `returnUrl`.",
    params(
        ("returnUrl" = Option<String>, Query, description = "Where to continue after a successful login."),
        ("error" = Option<String>, Query, description = "Error message to display."),
        ("login_hint" = Option<String>, Query, description = "Login to pre-fill."),
    ),
    responses(
        (status = 200, description = "Login page HTML"),
        (status = 500, description = "Internal server error"),
    )
)]
pub async fn login_page(Query(params): Query<LoginQuery>) -> Response {
    let template = LoginTemplate {
        return_url: params.return_url.unwrap_or_else(|| "/".to_string()),
        login: params.login_hint.unwrap_or_default(),
        error: params.error,
    };

    match template.render() {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            tracing::error!("Failed to render login template: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}

/// Handle login form submission.
#[tracing::instrument(skip(state, jar, form), fields(login = %form.login))]
#[utoipa::path(
    post,
    path = "/Account/DoLogin",
    tag = ACCOUNT_TAG,
    operation_id = "Account Login Submit",
    summary = "Submit login credentials",
    description = "Checks the credentials and, on success, sets the login session cookie and redirects to \
                   `returnUrl`. Failures redirect back to the login page with a message.\n\n\
                   Repeated failures lock the account for a while.",
    request_body(
        content = LoginForm,
        content_type = "application/x-www-form-urlencoded",
        description = "Login credentials"
    ),
    responses(
        (status = 303, description = "Redirect to returnUrl, or back to the login page with an error"),
    )
)]
pub async fn do_login(
    State(state): State<OAuth2State>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Response {
    let return_url = safe_return_url(
        form.return_url.as_deref(),
        &state.config.external_session.allowed_return_origins,
    );

    if form.login.trim().is_empty() || form.password.is_empty() {
        return login_error(&return_url, &form.login, "Please enter your login and password.");
    }

    let user = match state.users.check_password(&form.login, &form.password).await {
        Ok(CredentialCheck::Success(user)) => user,
        Ok(CredentialCheck::LockedOut) => {
            return login_error(
                &return_url,
                &form.login,
                "This account is temporarily locked. Try again later.",
            );
        }
        Ok(CredentialCheck::RequiresTwoFactor) => {
            return login_error(
                &return_url,
                &form.login,
                "This account requires two-factor authentication, which is not available here.",
            );
        }
        Ok(CredentialCheck::NotAllowed) => {
            return login_error(&return_url, &form.login, "This account is not allowed to sign in.");
        }
        Ok(CredentialCheck::InvalidCredentials) => {
            return login_error(&return_url, &form.login, "Invalid login or password.");
        }
        Err(e) => {
            tracing::error!(error = %e, "Database error during login");
            return login_error(&return_url, &form.login, "An error occurred. Please try again.");
        }
    };

    if let Err(e) = state.users.update_last_login(&user.id).await {
        tracing::warn!(error = %e, user_id = %user.id, "Failed to record last login");
    }

    let jar = match state.sessions.sign_in(jar, &user.id) {
        Ok(jar) => jar,
        Err(e) => {
            tracing::error!(error = %e, "Failed to issue session cookie");
            return login_error(&return_url, &form.login, "An error occurred. Please try again.");
        }
    };

    tracing::info!(user_id = %user.id, "User signed in");
    (jar, Redirect::to(&return_url)).into_response()
}

/// Current login session.
#[tracing::instrument(skip(state, jar))]
#[utoipa::path(
    get,
    path = "/Account/User",
    tag = ACCOUNT_TAG,
    operation_id = "Account Current User",
    summary = "Describe the current login session",
    description = "Returns who is signed in through the login session cookie, if anyone.",
    responses(
        (status = 200, description = "Session description", body = AccountUser),
    )
)]
pub async fn current_user(State(state): State<OAuth2State>, jar: CookieJar) -> Response {
    let user = match resolve_external_user(&state.sessions, &state.users, &jar).await {
        Ok(Some(user)) => user,
        Ok(None) => return Json(AccountUser::default()).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to resolve session user");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match state.users.roles(&user.id).await {
        Ok(roles) => Json(AccountUser {
            is_authenticated: true,
            user_id: Some(user.id),
            user_name: Some(user.user_name),
            email: Some(user.email),
            roles,
        })
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to load roles");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// End the login session.
#[tracing::instrument(skip(state, jar, params))]
#[utoipa::path(
    post,
    path = "/Account/Logout",
    tag = ACCOUNT_TAG,
    operation_id = "Account Logout",
    summary = "End the login session",
    description = "Clears the login session cookie. Tokens already issued stay valid until they expire or \
                   are revoked.",
    params(
        ("returnUrl" = Option<String>, Query, description = "Where to go afterwards."),
    ),
    responses(
        (status = 303, description = "Redirect to returnUrl"),
        (status = 204, description = "Signed out"),
    )
)]
pub async fn logout(
    State(state): State<OAuth2State>,
    jar: CookieJar,
    Query(params): Query<LogoutQuery>,
) -> Response {
    let jar = state.sessions.sign_out(jar);
    match params.return_url.as_deref() {
        Some(_) => {
            let target = safe_return_url(
                params.return_url.as_deref(),
                &state.config.external_session.allowed_return_origins,
            );
            (jar, Redirect::to(&target)).into_response()
        }
        None => (jar, StatusCode::NO_CONTENT).into_response(),
    }
}

fn login_error(return_url: &str, login: &str, message: &str) -> Response {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("error", message)
        .append_pair("returnUrl", return_url)
        .append_pair("login_hint", login.trim())
        .finish();
    Redirect::to(&format!("{LOGIN_PATH}?{query}")).into_response()
}

/// Restrict post-login redirects to local paths and configured origins.
pub fn safe_return_url(requested: Option<&str>, allowed_origins: &[String]) -> String {
    let Some(requested) = requested.filter(|r| !r.is_empty()) else {
        return "/".to_string();
    };

    // Browsers drop tabs and newlines while parsing, so "/\t/host" would become "//host".
    if requested.chars().any(|c| c.is_control() || c.is_whitespace()) {
        tracing::warn!(
            return_url = %requested.escape_debug(),
            "Rejected return URL with control characters"
        );
        return "/".to_string();
    }

    if requested.starts_with('/') && !requested.starts_with("//") && !requested.starts_with("/\\") {
        return requested.to_string();
    }

    match url::Url::parse(requested) {
        Ok(parsed)
            if allowed_origins
                .iter()
                .any(|o| o.trim_end_matches('/') == parsed.origin().ascii_serialization()) =>
        {
            requested.to_string()
        }
        _ => {
            tracing::warn!(return_url = %requested, "Rejected non-local return URL");
            "/".to_string()
        }
    }
}
