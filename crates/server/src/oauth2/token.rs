//! Token endpoint grant dispatcher.

use crate::entity::oauth2_client;
use crate::error::{ErrorResponse, OAuthError};
use crate::oauth2::claims::Principal;
use crate::oauth2::issuer::TokenResponse;
use crate::oauth2::permission::{Endpoint, Permission};
use crate::oauth2::registry::ClientCredentials;
use crate::oauth2::users::CredentialCheck;
use crate::oauth2::{OAUTH2_TAG, parse_scope, state::OAuth2State};
use axum::{
    Form, Json,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::str::FromStr;
use utoipa::ToSchema;

const GRANT_DEVICE_CODE: &str = "urn:ietf:params:oauth:grant-type:device_code";
const GRANT_TOKEN_EXCHANGE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GrantType {
    AuthorizationCode,
    Password,
    ClientCredentials,
    RefreshToken,
    DeviceCode,
    TokenExchange,
}

impl GrantType {
    pub fn as_str(self) -> &'static str {
        match self {
            GrantType::AuthorizationCode => "authorization_code",
            GrantType::Password => "password",
            GrantType::ClientCredentials => "client_credentials",
            GrantType::RefreshToken => "refresh_token",
            GrantType::DeviceCode => GRANT_DEVICE_CODE,
            GrantType::TokenExchange => GRANT_TOKEN_EXCHANGE,
        }
    }

    /// Grants the dispatcher has a handler for.
    pub const HANDLED: [GrantType; 4] = [
        GrantType::AuthorizationCode,
        GrantType::Password,
        GrantType::ClientCredentials,
        GrantType::RefreshToken,
    ];
}

impl FromStr for GrantType {
    type Err = OAuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authorization_code" => Ok(GrantType::AuthorizationCode),
            "password" => Ok(GrantType::Password),
            "client_credentials" => Ok(GrantType::ClientCredentials),
            "refresh_token" => Ok(GrantType::RefreshToken),
            GRANT_DEVICE_CODE => Ok(GrantType::DeviceCode),
            GRANT_TOKEN_EXCHANGE => Ok(GrantType::TokenExchange),
            other => Err(OAuthError::UnsupportedGrantType(format!(
                "The grant type '{other}' is not supported."
            ))),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub scope: Option<String>,
    // authorization_code
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    // password
    pub username: Option<String>,
    pub password: Option<String>,
    // refresh_token
    pub refresh_token: Option<String>,
}

/// OAuth2 Token endpoint.
#[tracing::instrument(skip(state, headers, params), fields(grant_type = ?params.grant_type))]
#[utoipa::path(
    post,
    path = "/connect/token",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Token",
    summary = "Exchange a grant for tokens",
    description = "Issues an access token (and, depending on the grant and client, a refresh token and an \
                   identity token).\n\n\
                   **Supported grant types:**\n\
                   - `authorization_code`: redeem a code issued by `/connect/authorize`; `code_verifier` is required when the code is PKCE-bound\n\
                   - `password`: resource owner password credentials\n\
                   - `client_credentials`: confidential clients acting on their own behalf\n\
                   - `refresh_token`: rotate a refresh token; the user must still exist\n\n\
                   **Client authentication:** HTTP Basic or `client_id`/`client_secret` in the body. \
                   Public clients send only `client_id`.",
    request_body(
        content = TokenRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Token request parameters"
    ),
    responses(
        (status = 200, description = "Tokens issued", body = TokenResponse),
        (status = 400, description = "Invalid request, grant, scope or unsupported grant type", body = ErrorResponse),
        (status = 401, description = "Client authentication failed", body = ErrorResponse),
        (status = 501, description = "Recognised grant type without a handler", body = ErrorResponse),
    )
)]
pub async fn token(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    Form(params): Form<TokenRequest>,
) -> Response {
    match exchange(&state, &headers, params).await {
        Ok(tokens) => (
            StatusCode::OK,
            [
                (header::CACHE_CONTROL, "no-store"),
                (header::PRAGMA, "no-cache"),
            ],
            Json(tokens),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn exchange(
    state: &OAuth2State,
    headers: &HeaderMap,
    params: TokenRequest,
) -> Result<TokenResponse, OAuthError> {
    let grant: GrantType = params
        .grant_type
        .as_deref()
        .ok_or_else(|| OAuthError::InvalidRequest("grant_type is required".into()))?
        .parse()?;

    if !GrantType::HANDLED.contains(&grant) {
        return Err(not_implemented(grant));
    }

    let credentials = ClientCredentials::extract(
        headers,
        params.client_id.as_deref(),
        params.client_secret.as_deref(),
    );
    let client = state.registry.authenticate(&credentials).await?;

    if !client.has_permission(&Permission::Endpoint(Endpoint::Token)) {
        return Err(OAuthError::UnauthorizedClient(
            "This client is not allowed to use the token endpoint.".into(),
        ));
    }
    if !client.has_permission(&Permission::grant_type(grant.as_str())) {
        return Err(OAuthError::UnauthorizedClient(
            "This client is not allowed to use the specified grant type.".into(),
        ));
    }

    let result = match grant {
        GrantType::AuthorizationCode => authorization_code_grant(state, &client, &params).await,
        GrantType::Password => password_grant(state, &client, &params).await,
        GrantType::ClientCredentials => client_credentials_grant(state, &client, &params).await,
        GrantType::RefreshToken => refresh_token_grant(state, &client, &params).await,
        GrantType::DeviceCode | GrantType::TokenExchange => Err(not_implemented(grant)),
    };

    result.map_err(|e| match e {
        OAuthError::Server(detail) => {
            tracing::error!(error = %detail, grant = grant.as_str(), "Grant failed on storage");
            OAuthError::InvalidGrant("The grant could not be processed.".into())
        }
        other => other,
    })
}

fn not_implemented(grant: GrantType) -> OAuthError {
    OAuthError::NotImplemented(format!(
        "The grant type '{}' is not implemented.",
        grant.as_str()
    ))
}

/// Requested scopes, all of which the client must be allowed to request.
fn requested_scopes(
    client: &oauth2_client::Model,
    scope: Option<&str>,
) -> Result<Vec<String>, OAuthError> {
    let requested = parse_scope(scope);
    let allowed = client.allowed_scopes();
    if let Some(denied) = requested.iter().find(|s| !allowed.contains(s)) {
        return Err(OAuthError::InvalidScope(format!(
            "The scope '{denied}' is not allowed for this client."
        )));
    }
    Ok(requested)
}

async fn authorization_code_grant(
    state: &OAuth2State,
    client: &oauth2_client::Model,
    params: &TokenRequest,
) -> Result<TokenResponse, OAuthError> {
    let code = params
        .code
        .as_deref()
        .ok_or_else(|| OAuthError::InvalidRequest("code is required".into()))?;

    let redeemed = state
        .issuer
        .redeem_authorization_code(
            client,
            code,
            params.redirect_uri.as_deref(),
            params.code_verifier.as_deref(),
        )
        .await?;

    let mut principal = redeemed.principal;
    let subject = principal.subject().unwrap_or_default().to_string();
    if state.users.find_active(&subject).await?.is_none() {
        tracing::info!(subject = %subject, "Authorization code redeemed for a missing user");
        return Err(OAuthError::InvalidGrant(
            "The authorization code is no longer valid.".into(),
        ));
    }

    principal.apply_destinations();
    state
        .issuer
        .sign_in(
            principal,
            client,
            GrantType::AuthorizationCode,
            redeemed.nonce.as_deref(),
        )
        .await
}

async fn password_grant(
    state: &OAuth2State,
    client: &oauth2_client::Model,
    params: &TokenRequest,
) -> Result<TokenResponse, OAuthError> {
    let (Some(username), Some(password)) = (params.username.as_deref(), params.password.as_deref())
    else {
        return Err(OAuthError::InvalidRequest(
            "username and password are required".into(),
        ));
    };
    let scopes = requested_scopes(client, params.scope.as_deref())?;

    let user = match state.users.check_password(username, password).await? {
        CredentialCheck::Success(user) => user,
        outcome => {
            tracing::info!(?outcome, "Password grant rejected");
            return Err(OAuthError::InvalidGrant(
                "The username/password couple is invalid.".into(),
            ));
        }
    };

    let roles = state.users.roles(&user.id).await?;
    state.users.update_last_login(&user.id).await?;

    let principal = Principal::for_user(&user, &roles, scopes);
    state
        .issuer
        .sign_in(principal, client, GrantType::Password, None)
        .await
}

async fn client_credentials_grant(
    state: &OAuth2State,
    client: &oauth2_client::Model,
    params: &TokenRequest,
) -> Result<TokenResponse, OAuthError> {
    if !client.is_confidential() {
        return Err(OAuthError::UnauthorizedClient(
            "Public clients cannot use the client_credentials grant.".into(),
        ));
    }
    let scopes = requested_scopes(client, params.scope.as_deref())?;

    let principal = Principal::for_client(&client.id, &client.display_name, scopes);
    state
        .issuer
        .sign_in(principal, client, GrantType::ClientCredentials, None)
        .await
}

async fn refresh_token_grant(
    state: &OAuth2State,
    client: &oauth2_client::Model,
    params: &TokenRequest,
) -> Result<TokenResponse, OAuthError> {
    let refresh_token = params
        .refresh_token
        .as_deref()
        .ok_or_else(|| OAuthError::InvalidRequest("refresh_token is required".into()))?;

    let mut grant = state
        .issuer
        .redeem_refresh_token(client, refresh_token)
        .await?;

    let subject = grant.principal.subject().unwrap_or_default().to_string();
    if state.users.find_active(&subject).await?.is_none() {
        tracing::info!(subject = %subject, "Refresh token presented for a missing user");
        return Err(OAuthError::InvalidGrant("The user no longer exists.".into()));
    }

    // A refresh may narrow the granted scopes, never widen them.
    if params.scope.is_some() {
        let requested = parse_scope(params.scope.as_deref());
        if let Some(extra) = requested.iter().find(|s| !grant.principal.has_scope(s)) {
            return Err(OAuthError::InvalidScope(format!(
                "The scope '{extra}' was not granted originally."
            )));
        }
        grant.principal.scopes = requested;
    }

    grant.principal.apply_destinations();
    state.issuer.rotate_refresh_token(grant, client).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_types_parse() {
        assert_eq!(
            "authorization_code".parse::<GrantType>().unwrap(),
            GrantType::AuthorizationCode
        );
        assert_eq!(
            "client_credentials".parse::<GrantType>().unwrap(),
            GrantType::ClientCredentials
        );
        assert_eq!(
            GRANT_DEVICE_CODE.parse::<GrantType>().unwrap(),
            GrantType::DeviceCode
        );
        assert!(matches!(
            "implicit".parse::<GrantType>(),
            Err(OAuthError::UnsupportedGrantType(_))
        ));
    }

    #[test]
    fn unhandled_grants_are_known_but_excluded() {
        assert!(!GrantType::HANDLED.contains(&GrantType::DeviceCode));
        assert!(!GrantType::HANDLED.contains(&GrantType::TokenExchange));
        for grant in GrantType::HANDLED {
            assert_eq!(grant.as_str().parse::<GrantType>().unwrap(), grant);
        }
    }
}
