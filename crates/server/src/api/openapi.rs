//! OpenAPI/Utoipa configuration.

use crate::api::health::MISC_TAG;
use crate::oauth2::OAUTH2_TAG;
use crate::oauth2::account::ACCOUNT_TAG;
use crate::oauth2::registry::default_scopes;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, OAuth2, Scopes, SecurityScheme},
};

/// Security addon for OpenAPI documentation.
pub struct SecurityAddon;

impl Modify for SecurityAddon {
    #[tracing::instrument(skip(self, openapi))]
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            // Client authentication at the token, introspection and revocation endpoints
            let basic = HttpBuilder::new()
                .scheme(HttpAuthScheme::Basic)
                .description(Some(
                    "Confidential clients authenticate with their client_id and client_secret.",
                ))
                .build();
            components.add_security_scheme("client_secret_basic", SecurityScheme::Http(basic));

            let mut scopes = vec![
                ("openid".to_string(), "OpenID Connect scope".to_string()),
                ("profile".to_string(), "Access to user profile".to_string()),
                ("email".to_string(), "Access to user email".to_string()),
            ];
            scopes.extend(
                default_scopes()
                    .into_iter()
                    .map(|s| (s.name, s.display_name)),
            );

            let oauth2 = OAuth2::new([utoipa::openapi::security::Flow::AuthorizationCode(
                utoipa::openapi::security::AuthorizationCode::new(
                    "/connect/authorize",
                    "/connect/token",
                    Scopes::from_iter(scopes),
                ),
            )]);
            components.add_security_scheme("OAuth2", SecurityScheme::OAuth2(oauth2));
        }
    }
}

/// OpenAPI documentation configuration.
#[derive(OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    info(
        title = "Helpdesk Authorization Server",
        version = "1.0.0",
        description = "OAuth2 / OpenID Connect authorization and token service for the helpdesk platform."
    ),
    tags(
        (name = MISC_TAG, description = "Miscellaneous endpoints"),
        (name = OAUTH2_TAG, description = "OAuth2 and OpenID Connect protocol endpoints"),
        (name = ACCOUNT_TAG, description = "Login pages behind the external session cookie")
    )
)]
pub struct ApiDoc;
