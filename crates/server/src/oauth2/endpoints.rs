//! OAuth2 HTTP endpoints.
//!
//! Wires the authorization server together:
//! - Authorization endpoint
//! - Token endpoint
//! - Introspection and revocation
//! - Discovery document
//! - Account pages for the external login session

use crate::error::{ErrorResponse, OAuthError};
use crate::oauth2::claims::claim_types;
use crate::oauth2::permission::{Endpoint, Permission};
use crate::oauth2::registry::ClientCredentials;
use crate::oauth2::token::GrantType;
use crate::oauth2::{OAUTH2_TAG, account, authorize, introspect, state::OAuth2State, token};
use axum::{
    Form, Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// Creates the OAuth2 router.
pub fn router(state: OAuth2State) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(authorize::authorize_get, authorize::authorize_post))
        .routes(routes!(token::token))
        .routes(routes!(introspect::introspect))
        .routes(routes!(revoke))
        .routes(routes!(openid_configuration))
        .routes(routes!(account::login_page))
        .routes(routes!(account::do_login))
        .routes(routes!(account::current_user))
        .routes(routes!(account::logout))
        .with_state(state)
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RevokeRequest {
    pub token: Option<String>,
    /// Accepted and ignored; both token kinds are always tried.
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OpenIdConfiguration {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub introspection_endpoint: String,
    pub revocation_endpoint: String,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub subject_types_supported: Vec<String>,
    pub id_token_signing_alg_values_supported: Vec<String>,
    pub scopes_supported: Vec<String>,
    pub claims_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub introspection_endpoint_auth_methods_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
}

/// Token revocation endpoint (RFC 7009).
#[tracing::instrument(skip(state, headers, params))]
#[utoipa::path(
    post,
    path = "/connect/revoke",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Revoke Token",
    summary = "Revoke an access or refresh token",
    description = "Revokes an access token or refresh token, preventing further use. \
                   Implements RFC 7009 (OAuth 2.0 Token Revocation).\n\n\
                   **Behavior:**\n\
                   - Returns 200 OK even if the token was already revoked, doesn't exist, or belongs to another client\n\
                   - Access and refresh tokens issued together are revoked together",
    request_body(
        content = RevokeRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Token revocation request"
    ),
    responses(
        (status = 200, description = "Token revoked successfully (or was already invalid)"),
        (status = 400, description = "Missing token parameter or client not permitted", body = ErrorResponse),
        (status = 401, description = "Client authentication failed", body = ErrorResponse),
    )
)]
pub async fn revoke(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    Form(params): Form<RevokeRequest>,
) -> Response {
    let credentials = ClientCredentials::extract(
        &headers,
        params.client_id.as_deref(),
        params.client_secret.as_deref(),
    );
    let client = match state.registry.authenticate(&credentials).await {
        Ok(c) => c,
        Err(e) => return e.into_response(),
    };
    if !client.has_permission(&Permission::Endpoint(Endpoint::Revocation)) {
        return OAuthError::UnauthorizedClient(
            "This client is not allowed to use the revocation endpoint.".into(),
        )
        .into_response();
    }

    let Some(token) = params.token.as_deref().filter(|t| !t.is_empty()) else {
        return OAuthError::InvalidRequest("token is required".into()).into_response();
    };

    match state.issuer.revoke(&client, token).await {
        Ok(true) => tracing::info!(client_id = %client.id, "Token revoked"),
        Ok(false) => {}
        // Unknown and failed revocations look the same to the caller
        Err(e) => tracing::error!("Database error during token revocation: {}", e),
    }

    StatusCode::OK.into_response()
}

/// OpenID Connect Discovery document.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/.well-known/openid-configuration",
    tag = OAUTH2_TAG,
    operation_id = "OpenID Connect Discovery",
    summary = "OpenID Connect Discovery document",
    description = "Returns the OpenID Connect Discovery document containing metadata about the OAuth2/OIDC provider.\n\n\
                   This document provides:\n\
                   - Endpoint URLs (authorization, token, introspection, revocation)\n\
                   - Supported grant types and response types\n\
                   - Supported scopes and claims\n\
                   - Supported authentication methods\n\n\
                   Clients should use this endpoint to dynamically discover the provider's capabilities.",
    responses(
        (status = 200, description = "OpenID Connect configuration document", body = OpenIdConfiguration),
        (status = 500, description = "Registry unavailable", body = ErrorResponse),
    )
)]
pub async fn openid_configuration(State(state): State<OAuth2State>) -> Response {
    let scopes_supported = match state.registry.supported_scopes().await {
        Ok(s) => s,
        Err(e) => return OAuthError::from(e).into_response(),
    };

    let issuer = state.issuer.issuer();
    let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();

    Json(OpenIdConfiguration {
        issuer: issuer.to_string(),
        authorization_endpoint: format!("{issuer}/connect/authorize"),
        token_endpoint: format!("{issuer}/connect/token"),
        introspection_endpoint: format!("{issuer}/connect/introspect"),
        revocation_endpoint: format!("{issuer}/connect/revoke"),
        response_types_supported: strings(&["code"]),
        grant_types_supported: GrantType::HANDLED
            .iter()
            .map(|g| g.as_str().to_string())
            .collect(),
        subject_types_supported: strings(&["public"]),
        id_token_signing_alg_values_supported: strings(&["HS256"]),
        scopes_supported,
        claims_supported: strings(&[
            claim_types::SUBJECT,
            claim_types::NAME,
            claim_types::EMAIL,
            claim_types::PREFERRED_USERNAME,
            claim_types::ROLE,
        ]),
        token_endpoint_auth_methods_supported: strings(&[
            "client_secret_basic",
            "client_secret_post",
            "none",
        ]),
        introspection_endpoint_auth_methods_supported: strings(&[
            "client_secret_basic",
            "client_secret_post",
        ]),
        code_challenge_methods_supported: strings(&["S256"]),
    })
    .into_response()
}
