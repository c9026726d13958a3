//! Authorization endpoint.
//!
//! Errors detected before the redirect URI has been validated are reported
//! to the browser as a JSON body. Everything after that is reported back to
//! the client's redirect URI, the way RFC 6749 section 4.1.2.1 requires.

use crate::entity::oauth2_client;
use crate::error::{ErrorResponse, OAuthError};
use crate::oauth2::bridge::resolve_external_user;
use crate::oauth2::claims::Principal;
use crate::oauth2::issuer::CodeBinding;
use crate::oauth2::permission::{Endpoint, Permission};
use crate::oauth2::{OAUTH2_TAG, found, parse_scope, pkce, state::OAuth2State};
use axum::{
    Form,
    extract::{OriginalUri, Query, State},
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;

pub const AUTHORIZE_PATH: &str = "/connect/authorize";

/// Parameters of an authorization request, from the query string or a form body.
#[derive(Debug, Default)]
pub struct AuthorizeRequest {
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub response_type: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub prompt: Option<String>,
}

impl AuthorizeRequest {
    /// Build the request from raw pairs. A parameter may appear at most once.
    pub fn from_pairs(pairs: &[(String, String)]) -> Result<Self, OAuthError> {
        let mut request = AuthorizeRequest::default();
        for (key, value) in pairs {
            let slot = match key.as_str() {
                "client_id" => &mut request.client_id,
                "redirect_uri" => &mut request.redirect_uri,
                "response_type" => &mut request.response_type,
                "scope" => &mut request.scope,
                "state" => &mut request.state,
                "nonce" => &mut request.nonce,
                "code_challenge" => &mut request.code_challenge,
                "code_challenge_method" => &mut request.code_challenge_method,
                "prompt" => &mut request.prompt,
                _ => continue,
            };
            if slot.is_some() {
                return Err(OAuthError::InvalidRequest(format!(
                    "The '{key}' parameter must not be included more than once."
                )));
            }
            *slot = Some(value.clone());
        }
        Ok(request)
    }
}

/// OAuth2 Authorization endpoint (query string).
#[tracing::instrument(skip(state, jar, params))]
#[utoipa::path(
    get,
    path = "/connect/authorize",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Authorize",
    summary = "Start the authorization code flow",
    description = "Validates the authorization request and, when the browser already has an external login \
                   session, redirects to `redirect_uri` with `code` and `state`. Without a session the browser \
                   is redirected to the login page and returns here afterwards.\n\n\
                   **PKCE:** clients that require PKCE must send `code_challenge` with \
                   `code_challenge_method=S256`.",
    params(
        ("client_id" = String, Query, description = "The client identifier."),
        ("redirect_uri" = String, Query, description = "Registered redirect URI of the client."),
        ("response_type" = String, Query, description = "Must be `code`."),
        ("scope" = Option<String>, Query, description = "Space-separated list of requested scopes."),
        ("state" = Option<String>, Query, description = "Opaque value echoed back in the redirect."),
        ("nonce" = Option<String>, Query, description = "Value copied into the identity token."),
        ("code_challenge" = Option<String>, Query, description = "Base64url-encoded SHA-256 of the code verifier."),
        ("code_challenge_method" = Option<String>, Query, description = "Must be `S256` when a challenge is sent."),
        ("prompt" = Option<String>, Query, description = "`none` to fail instead of showing the login page."),
    ),
    responses(
        (status = 302, description = "Redirect to the client with a code or an error, or to the login page"),
        (status = 400, description = "Unknown client or invalid redirect_uri", body = ErrorResponse),
    )
)]
pub async fn authorize_get(
    State(state): State<OAuth2State>,
    jar: CookieJar,
    OriginalUri(uri): OriginalUri,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    let return_to = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| AUTHORIZE_PATH.to_string());
    authorize(&state, &jar, &params, return_to).await
}

/// OAuth2 Authorization endpoint (form post).
#[tracing::instrument(skip(state, jar, params))]
#[utoipa::path(
    post,
    path = "/connect/authorize",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Authorize (form post)",
    summary = "Start the authorization code flow from a form",
    description = "Same as the GET variant with the parameters in an `application/x-www-form-urlencoded` body. \
                   When a login is needed, the parameters are carried to the login page as a query string.",
    responses(
        (status = 302, description = "Redirect to the client with a code or an error, or to the login page"),
        (status = 400, description = "Unknown client or invalid redirect_uri", body = ErrorResponse),
    )
)]
pub async fn authorize_post(
    State(state): State<OAuth2State>,
    jar: CookieJar,
    Form(params): Form<Vec<(String, String)>>,
) -> Response {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter())
        .finish();
    let return_to = format!("{AUTHORIZE_PATH}?{query}");
    authorize(&state, &jar, &params, return_to).await
}

async fn authorize(
    state: &OAuth2State,
    jar: &CookieJar,
    params: &[(String, String)],
    return_to: String,
) -> Response {
    let request = match AuthorizeRequest::from_pairs(params) {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };

    let (client, redirect_uri) = match validate_client(state, &request).await {
        Ok(v) => v,
        Err(e) => return e.into_response(),
    };
    let state_param = request.state.as_deref();

    let scopes = match validate_request(&client, &request) {
        Ok(scopes) => scopes,
        Err(e) => return error_redirect(&redirect_uri, state_param, &e),
    };

    let user = match resolve_external_user(&state.sessions, &state.users, jar).await {
        Ok(Some(user)) => user,
        Ok(None) if request.prompt.as_deref() == Some("none") => {
            return error_redirect(&redirect_uri, state_param, &OAuthError::LoginRequired);
        }
        Ok(None) => return state.sessions.challenge(&return_to),
        Err(e) => return error_redirect(&redirect_uri, state_param, &e.into()),
    };

    let roles = match state.users.roles(&user.id).await {
        Ok(roles) => roles,
        Err(e) => {
            // Never proceed with a partial principal.
            tracing::error!(error = %e, user_id = %user.id, "Failed to resolve roles");
            return state.sessions.challenge(&return_to);
        }
    };

    let principal = Principal::for_user(&user, &roles, scopes);
    let binding = CodeBinding {
        client_id: &client.id,
        redirect_uri: &redirect_uri,
        nonce: request.nonce.as_deref(),
        code_challenge: request.code_challenge.as_deref(),
        code_challenge_method: request.code_challenge.as_ref().map(|_| pkce::METHOD_S256),
    };

    let code = match state
        .issuer
        .issue_authorization_code(&principal, &binding)
        .await
    {
        Ok(code) => code,
        Err(e) => return error_redirect(&redirect_uri, state_param, &e),
    };

    tracing::info!(client_id = %client.id, user_id = %user.id, "Issued authorization code");

    let mut location = match url::Url::parse(&redirect_uri) {
        Ok(u) => u,
        Err(_) => {
            return OAuthError::InvalidRequest("The redirect_uri is invalid.".into())
                .into_response();
        }
    };
    location.query_pairs_mut().append_pair("code", &code);
    if let Some(s) = state_param {
        location.query_pairs_mut().append_pair("state", s);
    }
    found(location.as_str())
}

/// Checks that must pass before errors may be sent to the redirect URI.
async fn validate_client(
    state: &OAuth2State,
    request: &AuthorizeRequest,
) -> Result<(oauth2_client::Model, String), OAuthError> {
    let client_id = request
        .client_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| OAuthError::InvalidRequest("client_id is required".into()))?;

    let client = state
        .registry
        .find_client(client_id)
        .await?
        .ok_or_else(|| OAuthError::InvalidRequest("The specified client_id is invalid.".into()))?;

    if !client.has_permission(&Permission::Endpoint(Endpoint::Authorization)) {
        return Err(OAuthError::UnauthorizedClient(
            "This client is not allowed to use the authorization endpoint.".into(),
        ));
    }

    let redirect_uri = match request.redirect_uri.as_deref() {
        Some(uri) if client.is_redirect_uri_allowed(uri) => uri.to_string(),
        Some(_) => {
            return Err(OAuthError::InvalidRequest(
                "The specified redirect_uri is not valid for this client.".into(),
            ));
        }
        None => match client.redirect_uris_list().as_slice() {
            [only] => only.clone(),
            _ => {
                return Err(OAuthError::InvalidRequest("redirect_uri is required".into()));
            }
        },
    };

    Ok((client, redirect_uri))
}

/// Protocol checks on a request whose client and redirect URI are trusted. Returns the granted scopes.
fn validate_request(
    client: &oauth2_client::Model,
    request: &AuthorizeRequest,
) -> Result<Vec<String>, OAuthError> {
    match request.response_type.as_deref() {
        None | Some("") => {
            return Err(OAuthError::InvalidRequest("response_type is required".into()));
        }
        Some("code") => {}
        Some(_) => {
            return Err(OAuthError::UnsupportedResponseType(
                "Only the 'code' response type is supported.".into(),
            ));
        }
    }
    if !client.has_permission(&Permission::ResponseType("code".into())) {
        return Err(OAuthError::UnauthorizedClient(
            "This client is not allowed to use the 'code' response type.".into(),
        ));
    }

    let challenge = request.code_challenge.as_deref().filter(|c| !c.is_empty());
    match (challenge, request.code_challenge_method.as_deref()) {
        (None, _) if client.requires_pkce => {
            return Err(OAuthError::InvalidRequest(
                "The mandatory 'code_challenge' parameter is missing.".into(),
            ));
        }
        (None, Some(_)) => {
            return Err(OAuthError::InvalidRequest(
                "code_challenge_method requires a code_challenge.".into(),
            ));
        }
        (Some(_), method) if method != Some(pkce::METHOD_S256) => {
            return Err(OAuthError::InvalidRequest(
                "Only the 'S256' code_challenge_method is supported.".into(),
            ));
        }
        (Some(c), _) if c.len() != 43 => {
            return Err(OAuthError::InvalidRequest(
                "The code_challenge is malformed.".into(),
            ));
        }
        _ => {}
    }

    let scopes = parse_scope(request.scope.as_deref());
    let allowed = client.allowed_scopes();
    if let Some(denied) = scopes.iter().find(|s| !allowed.contains(s)) {
        return Err(OAuthError::InvalidScope(format!(
            "The scope '{denied}' is not allowed for this client."
        )));
    }
    Ok(scopes)
}

/// Report an error to the client's redirect URI.
fn error_redirect(redirect_uri: &str, state: Option<&str>, error: &OAuthError) -> Response {
    let mut redirect_url = match url::Url::parse(redirect_uri) {
        Ok(u) => u,
        Err(_) => {
            return OAuthError::InvalidRequest("The redirect_uri is invalid.".into())
                .into_response();
        }
    };

    if matches!(error, OAuthError::Server(_)) {
        tracing::error!(error = %error, "Authorization request failed");
    }

    redirect_url
        .query_pairs_mut()
        .append_pair("error", error.code());
    if let Some(desc) = error.description() {
        redirect_url
            .query_pairs_mut()
            .append_pair("error_description", &desc);
    }
    if let Some(s) = state {
        redirect_url.query_pairs_mut().append_pair("state", s);
    }

    found(redirect_url.as_str())
}
