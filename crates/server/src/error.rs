use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// OAuth2 error body (RFC 6749 section 5.2).
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

/// Protocol-level failures reported by the machine-facing endpoints.
#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("invalid_request: {0}")]
    InvalidRequest(String),
    #[error("invalid_client: {0}")]
    InvalidClient(String),
    #[error("unauthorized_client: {0}")]
    UnauthorizedClient(String),
    #[error("invalid_grant: {0}")]
    InvalidGrant(String),
    #[error("invalid_scope: {0}")]
    InvalidScope(String),
    #[error("unsupported_grant_type: {0}")]
    UnsupportedGrantType(String),
    #[error("unsupported_response_type: {0}")]
    UnsupportedResponseType(String),
    /// `prompt=none` was requested but the user has no session.
    #[error("login_required")]
    LoginRequired,
    /// A grant type this server recognises but has no handler for.
    #[error("not_implemented: {0}")]
    NotImplemented(String),
    #[error("server_error: {0}")]
    Server(String),
}

impl OAuthError {
    pub fn code(&self) -> &'static str {
        match self {
            OAuthError::InvalidRequest(_) => "invalid_request",
            OAuthError::InvalidClient(_) => "invalid_client",
            OAuthError::UnauthorizedClient(_) => "unauthorized_client",
            OAuthError::InvalidGrant(_) => "invalid_grant",
            OAuthError::InvalidScope(_) => "invalid_scope",
            OAuthError::UnsupportedGrantType(_) => "unsupported_grant_type",
            OAuthError::UnsupportedResponseType(_) => "unsupported_response_type",
            OAuthError::LoginRequired => "login_required",
            OAuthError::NotImplemented(_) => "not_implemented",
            OAuthError::Server(_) => "server_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            OAuthError::InvalidClient(_) => StatusCode::UNAUTHORIZED,
            OAuthError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            OAuthError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Human-readable description safe to return to the caller.
    pub fn description(&self) -> Option<String> {
        match self {
            OAuthError::Server(_) | OAuthError::LoginRequired => None,
            OAuthError::InvalidRequest(d)
            | OAuthError::InvalidClient(d)
            | OAuthError::UnauthorizedClient(d)
            | OAuthError::InvalidGrant(d)
            | OAuthError::InvalidScope(d)
            | OAuthError::UnsupportedGrantType(d)
            | OAuthError::UnsupportedResponseType(d)
            | OAuthError::NotImplemented(d) => Some(d.clone()),
        }
    }
}

impl From<sea_orm::DbErr> for OAuthError {
    fn from(e: sea_orm::DbErr) -> Self {
        OAuthError::Server(e.to_string())
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        match &self {
            OAuthError::Server(detail) => tracing::error!(error = %detail, "OAuth2 server error"),
            OAuthError::NotImplemented(detail) => {
                tracing::error!(error = %detail, "Unhandled grant type reached the dispatcher")
            }
            _ => tracing::debug!(error = %self, "OAuth2 request rejected"),
        }

        let mut response = (
            self.status(),
            Json(ErrorResponse {
                error: self.code().to_string(),
                error_description: self.description(),
            }),
        )
            .into_response();

        if matches!(self, OAuthError::InvalidClient(_)) {
            response.headers_mut().insert(
                axum::http::header::WWW_AUTHENTICATE,
                axum::http::HeaderValue::from_static("Basic realm=\"helpdesk-auth\""),
            );
        }
        response
    }
}

/// Failures while bootstrapping the client and scope registry. Always fatal at startup.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("Invalid client descriptor '{client_id}': {reason}")]
    InvalidDescriptor { client_id: String, reason: String },
    #[error("Failed to hash client secret: {0}")]
    Hash(String),
}

/// Failures while producing client-side PKCE material.
#[derive(Debug, Error)]
pub enum PkceError {
    #[error("Secure random number generator unavailable: {0}")]
    Random(#[from] getrandom::Error),
    #[error("Invalid length {0}: must be between 32 and 96 bytes")]
    InvalidLength(usize),
    #[error("Unknown or expired state")]
    UnknownState,
    #[error("Invalid authorization endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}
