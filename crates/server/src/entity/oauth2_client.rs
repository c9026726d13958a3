//! OAuth2 Client entity.

use crate::oauth2::Permission;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub const CLIENT_TYPE_PUBLIC: &str = "public";
pub const CLIENT_TYPE_CONFIDENTIAL: &str = "confidential";

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "oauth2_client")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// `public` or `confidential`
    pub client_type: String,
    /// Argon2 PHC hash of the client secret (None for public clients)
    #[serde(skip_serializing)]
    pub secret_hash: Option<String>,
    pub display_name: String,
    /// JSON array of permission strings (`ept:token`, `gt:password`, `scp:api`, ...)
    pub permissions: String,
    /// JSON array of allowed redirect URIs
    pub redirect_uris: String,
    /// JSON array of allowed post-logout redirect URIs
    pub post_logout_redirect_uris: String,
    pub requires_pkce: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_confidential(&self) -> bool {
        self.client_type == CLIENT_TYPE_CONFIDENTIAL
    }

    /// Parse permissions from JSON string
    pub fn permissions_list(&self) -> Vec<String> {
        serde_json::from_str(&self.permissions).unwrap_or_default()
    }

    /// Parse redirect URIs from JSON string
    pub fn redirect_uris_list(&self) -> Vec<String> {
        serde_json::from_str(&self.redirect_uris).unwrap_or_default()
    }

    /// Check if a redirect URI is allowed for this client (exact match)
    pub fn is_redirect_uri_allowed(&self, uri: &str) -> bool {
        self.redirect_uris_list()
            .iter()
            .any(|allowed| allowed == uri)
    }

    pub fn has_permission(&self, permission: &Permission) -> bool {
        let wanted = permission.to_string();
        self.permissions_list().iter().any(|p| *p == wanted)
    }

    /// Scopes this client may request, taken from its `scp:` permissions.
    ///
    /// `openid` is implicitly allowed for every client.
    pub fn allowed_scopes(&self) -> Vec<String> {
        let mut scopes: Vec<String> = self
            .permissions_list()
            .iter()
            .filter_map(|p| p.strip_prefix(Permission::SCOPE_PREFIX))
            .map(String::from)
            .collect();
        if !scopes.iter().any(|s| s == "openid") {
            scopes.push("openid".to_string());
        }
        scopes
    }
}
