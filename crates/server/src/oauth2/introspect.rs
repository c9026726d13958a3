//! Token introspection (RFC 7662).

use crate::error::{ErrorResponse, OAuthError};
use crate::oauth2::issuer::AuthenticatedToken;
use crate::oauth2::permission::{Endpoint, Permission};
use crate::oauth2::registry::ClientCredentials;
use crate::oauth2::{OAUTH2_TAG, state::OAuth2State};
use axum::{
    Form, Json,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct IntrospectRequest {
    pub token: Option<String>,
    /// Accepted and ignored; both token kinds are always tried.
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

#[derive(Debug, Default, Serialize, ToSchema)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl IntrospectionResponse {
    pub fn inactive() -> Self {
        Self::default()
    }

    fn from_token(token: AuthenticatedToken, issuer: &str) -> Self {
        match token {
            AuthenticatedToken::Access { record, claims } => {
                let string = |key: &str| claims.get(key).and_then(Value::as_str).map(String::from);
                let aud = match claims.get("aud") {
                    Some(Value::String(s)) => Some(vec![s.clone()]),
                    Some(Value::Array(values)) => Some(
                        values
                            .iter()
                            .filter_map(Value::as_str)
                            .map(String::from)
                            .collect(),
                    ),
                    _ => None,
                };
                Self {
                    active: true,
                    token_type: Some("access_token".into()),
                    client_id: Some(record.client_id),
                    sub: string("sub"),
                    username: string("preferred_username").or_else(|| string("name")),
                    scope: string("scope"),
                    exp: claims.get("exp").and_then(Value::as_i64),
                    iat: claims.get("iat").and_then(Value::as_i64),
                    iss: string("iss"),
                    aud,
                    jti: Some(record.id),
                }
            }
            AuthenticatedToken::Refresh { record } => Self {
                active: true,
                token_type: Some("refresh_token".into()),
                sub: Some(record.subject),
                scope: Some(record.scope),
                exp: record.refresh_token_expires_at.map(|t| t.unix_timestamp()),
                iat: Some(record.created_at.unix_timestamp()),
                iss: Some(issuer.to_string()),
                client_id: Some(record.client_id),
                jti: Some(record.id),
                ..Self::default()
            },
        }
    }
}

/// OAuth2 Token Introspection endpoint.
#[tracing::instrument(skip(state, headers, params))]
#[utoipa::path(
    post,
    path = "/connect/introspect",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Introspect",
    summary = "Inspect a token",
    description = "Reports whether an access or refresh token is currently active and, if so, its claims. \
                   Implements RFC 7662.\n\n\
                   **Client authentication:** required. The caller must be registered with the \
                   introspection endpoint permission.\n\n\
                   Unknown, expired, revoked and malformed tokens all yield `{\"active\": false}`.",
    request_body(
        content = IntrospectRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Introspection request"
    ),
    responses(
        (status = 200, description = "Introspection result", body = IntrospectionResponse),
        (status = 400, description = "Missing token or client not permitted", body = ErrorResponse),
        (status = 401, description = "Client authentication failed", body = ErrorResponse),
    )
)]
pub async fn introspect(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    Form(params): Form<IntrospectRequest>,
) -> Response {
    match inspect(&state, &headers, params).await {
        Ok(body) => Json(body).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn inspect(
    state: &OAuth2State,
    headers: &HeaderMap,
    params: IntrospectRequest,
) -> Result<IntrospectionResponse, OAuthError> {
    let credentials = ClientCredentials::extract(
        headers,
        params.client_id.as_deref(),
        params.client_secret.as_deref(),
    );
    let client = state.registry.authenticate(&credentials).await?;
    if !client.has_permission(&Permission::Endpoint(Endpoint::Introspection)) {
        return Err(OAuthError::UnauthorizedClient(
            "This client is not allowed to use the introspection endpoint.".into(),
        ));
    }

    let token = params
        .token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| OAuthError::InvalidRequest("token is required".into()))?;

    match state.issuer.authenticate(token).await? {
        Some(authenticated) => {
            tracing::debug!(caller = %client.id, "Introspected an active token");
            Ok(IntrospectionResponse::from_token(
                authenticated,
                state.issuer.issuer(),
            ))
        }
        None => Ok(IntrospectionResponse::inactive()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactive_response_has_only_active_field() {
        let json = serde_json::to_value(IntrospectionResponse::inactive()).unwrap();
        assert_eq!(json, serde_json::json!({ "active": false }));
    }
}
