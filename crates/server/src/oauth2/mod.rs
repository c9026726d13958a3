//! OAuth2 / OpenID Connect authorization server.
//!
//! ## Supported Flows
//!
//! - Authorization Code with PKCE (browser clients)
//! - Resource Owner Password (mobile client)
//! - Client Credentials (confidential clients)
//! - Refresh Token
//!
//! ## Endpoints
//!
//! - `GET|POST /connect/authorize` - Authorization endpoint
//! - `POST /connect/token` - Token endpoint
//! - `POST /connect/introspect` - Token introspection
//! - `POST /connect/revoke` - Token revocation
//! - `GET /.well-known/openid-configuration` - OpenID Connect Discovery
//! - `/Account/*` - Login pages behind the external session cookie

pub mod account;
pub mod authorize;
pub mod bridge;
pub mod claims;
pub mod endpoints;
pub mod introspect;
pub mod issuer;
pub mod password;
pub mod permission;
pub mod pkce;
pub mod registry;
mod state;
pub mod token;
pub mod users;

use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

pub use endpoints::router;
pub use permission::Permission;
pub use state::OAuth2State;

/// OpenAPI tag for OAuth2 endpoints
pub const OAUTH2_TAG: &str = "OAuth2";

/// `302 Found` to `location`.
pub(crate) fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// Split a space-delimited scope parameter, dropping duplicates.
pub(crate) fn parse_scope(scope: Option<&str>) -> Vec<String> {
    let mut scopes: Vec<String> = Vec::new();
    for s in scope.unwrap_or_default().split_whitespace() {
        if !scopes.iter().any(|existing| existing == s) {
            scopes.push(s.to_string());
        }
    }
    scopes
}
