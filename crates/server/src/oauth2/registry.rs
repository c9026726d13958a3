//! Client and scope registry.
//!
//! The registry is bootstrapped once at startup from [`default_scopes`] and
//! [`default_clients`]. Scopes are created when missing and otherwise left
//! alone. Clients converge on their descriptor on every run: permissions and
//! redirect URIs are replaced wholesale.

use crate::config::ClientsConfig;
use crate::entity::{
    oauth2_client::{self, CLIENT_TYPE_CONFIDENTIAL, CLIENT_TYPE_PUBLIC},
    oauth2_scope,
};
use crate::error::{OAuthError, RegistryError};
use crate::oauth2::claims::scopes;
use crate::oauth2::password::{hash_password, verify_password};
use crate::oauth2::permission::{Endpoint, Permission};
use axum::http::HeaderMap;
use base64::Engine;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder,
};
use std::sync::Arc;
use time::OffsetDateTime;

/// Resource protected by the helpdesk API scopes.
pub const API_RESOURCE: &str = "helpdesk_api";

pub const SPA_CLIENT_ID: &str = "bwa-client";
pub const MOBILE_CLIENT_ID: &str = "mobile-client";
pub const INTROSPECTION_CLIENT_ID: &str = "introspection-client";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientType {
    Public,
    Confidential,
}

impl ClientType {
    fn as_str(self) -> &'static str {
        match self {
            ClientType::Public => CLIENT_TYPE_PUBLIC,
            ClientType::Confidential => CLIENT_TYPE_CONFIDENTIAL,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ScopeDescriptor {
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub resources: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct ClientDescriptor {
    pub client_id: String,
    pub client_type: ClientType,
    pub client_secret: Option<String>,
    pub display_name: String,
    pub permissions: Vec<Permission>,
    pub redirect_uris: Vec<String>,
    pub post_logout_redirect_uris: Vec<String>,
    pub requires_pkce: bool,
}

impl ClientDescriptor {
    fn validate(&self) -> Result<(), RegistryError> {
        let invalid = |reason: &str| RegistryError::InvalidDescriptor {
            client_id: self.client_id.clone(),
            reason: reason.to_string(),
        };
        match (self.client_type, self.client_secret.as_deref()) {
            (ClientType::Confidential, None | Some("")) => {
                return Err(invalid("confidential clients require a secret"));
            }
            (ClientType::Public, Some(_)) => {
                return Err(invalid("public clients must not have a secret"));
            }
            _ => {}
        }
        let uses_authorization = self
            .permissions
            .contains(&Permission::Endpoint(Endpoint::Authorization));
        if uses_authorization && self.redirect_uris.is_empty() {
            return Err(invalid("authorization endpoint access requires a redirect URI"));
        }
        for uri in self
            .redirect_uris
            .iter()
            .chain(&self.post_logout_redirect_uris)
        {
            if url::Url::parse(uri).is_err() {
                return Err(invalid(&format!("'{uri}' is not an absolute URI")));
            }
        }
        Ok(())
    }

    fn permission_strings(&self) -> Vec<String> {
        self.permissions.iter().map(ToString::to_string).collect()
    }
}

fn standard_scope_permissions() -> Vec<Permission> {
    [
        scopes::PROFILE,
        scopes::EMAIL,
        scopes::ADDRESS,
        scopes::PHONE,
        scopes::ROLES,
        "api",
        "chamados",
    ]
    .into_iter()
    .map(Permission::scope)
    .collect()
}

pub fn default_scopes() -> Vec<ScopeDescriptor> {
    vec![
        ScopeDescriptor {
            name: scopes::ROLES.to_string(),
            display_name: "Roles".to_string(),
            description: Some("Role memberships of the signed-in user".to_string()),
            resources: vec![API_RESOURCE.to_string()],
        },
        ScopeDescriptor {
            name: "api".to_string(),
            display_name: "Helpdesk API".to_string(),
            description: Some("Access to the helpdesk API".to_string()),
            resources: vec![API_RESOURCE.to_string()],
        },
        ScopeDescriptor {
            name: "chamados".to_string(),
            display_name: "Tickets".to_string(),
            description: Some("Read and manage helpdesk tickets".to_string()),
            resources: vec![API_RESOURCE.to_string()],
        },
    ]
}

/// The three well-known clients.
///
/// Without a configured introspection secret the introspection descriptor is
/// invalid and [`bootstrap`] fails.
pub fn default_clients(config: &ClientsConfig) -> Vec<ClientDescriptor> {
    let spa_permissions = [
        Permission::Endpoint(Endpoint::Authorization),
        Permission::Endpoint(Endpoint::Token),
        Permission::Endpoint(Endpoint::Revocation),
        Permission::grant_type("authorization_code"),
        Permission::grant_type("refresh_token"),
        Permission::ResponseType("code".to_string()),
    ]
    .into_iter()
    .chain(standard_scope_permissions())
    .collect();

    let mobile_permissions = [
        Permission::Endpoint(Endpoint::Token),
        Permission::grant_type("password"),
        Permission::grant_type("refresh_token"),
    ]
    .into_iter()
    .chain(standard_scope_permissions())
    .collect();

    vec![
        ClientDescriptor {
            client_id: SPA_CLIENT_ID.to_string(),
            client_type: ClientType::Public,
            client_secret: None,
            display_name: "Helpdesk Web Client".to_string(),
            permissions: spa_permissions,
            redirect_uris: config.spa_redirect_uris.clone(),
            post_logout_redirect_uris: config.spa_post_logout_redirect_uris.clone(),
            requires_pkce: true,
        },
        ClientDescriptor {
            client_id: MOBILE_CLIENT_ID.to_string(),
            client_type: ClientType::Public,
            client_secret: None,
            display_name: "Helpdesk Mobile Client".to_string(),
            permissions: mobile_permissions,
            redirect_uris: vec![],
            post_logout_redirect_uris: vec![],
            requires_pkce: false,
        },
        ClientDescriptor {
            client_id: INTROSPECTION_CLIENT_ID.to_string(),
            client_type: ClientType::Confidential,
            client_secret: config.introspection_secret.clone(),
            display_name: "Helpdesk Introspection Client".to_string(),
            permissions: vec![Permission::Endpoint(Endpoint::Introspection)],
            redirect_uris: vec![],
            post_logout_redirect_uris: vec![],
            requires_pkce: false,
        },
    ]
}

/// What a bootstrap run changed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub scopes_created: usize,
    pub clients_created: usize,
    pub clients_updated: usize,
}

/// Create missing scopes and create-or-replace every client descriptor.
///
/// All descriptors are validated before anything is written.
#[tracing::instrument(skip_all)]
pub async fn bootstrap(
    db: &DatabaseConnection,
    scopes: &[ScopeDescriptor],
    clients: &[ClientDescriptor],
) -> Result<BootstrapReport, RegistryError> {
    for client in clients {
        client.validate()?;
    }

    let mut report = BootstrapReport::default();
    let now = OffsetDateTime::now_utc();

    for scope in scopes {
        if oauth2_scope::Entity::find_by_id(&scope.name)
            .one(db)
            .await?
            .is_some()
        {
            continue;
        }
        oauth2_scope::ActiveModel {
            name: Set(scope.name.clone()),
            display_name: Set(scope.display_name.clone()),
            description: Set(scope.description.clone()),
            resources: Set(to_json(&scope.resources)),
            created_at: Set(now),
        }
        .insert(db)
        .await?;
        tracing::info!(scope = %scope.name, "Created OAuth2 scope");
        report.scopes_created += 1;
    }

    for descriptor in clients {
        let existing = oauth2_client::Entity::find_by_id(&descriptor.client_id)
            .one(db)
            .await?;

        let secret_hash = match (&descriptor.client_secret, &existing) {
            (None, _) => None,
            // Keep the stored hash while it still matches, so restarts do not churn it.
            (Some(secret), Some(current))
                if current
                    .secret_hash
                    .as_deref()
                    .is_some_and(|h| verify_password(secret, h)) =>
            {
                current.secret_hash.clone()
            }
            (Some(secret), _) => {
                Some(hash_password(secret).map_err(|e| RegistryError::Hash(e.to_string()))?)
            }
        };

        match existing {
            None => {
                oauth2_client::ActiveModel {
                    id: Set(descriptor.client_id.clone()),
                    client_type: Set(descriptor.client_type.as_str().to_string()),
                    secret_hash: Set(secret_hash),
                    display_name: Set(descriptor.display_name.clone()),
                    permissions: Set(to_json(&descriptor.permission_strings())),
                    redirect_uris: Set(to_json(&descriptor.redirect_uris)),
                    post_logout_redirect_uris: Set(to_json(&descriptor.post_logout_redirect_uris)),
                    requires_pkce: Set(descriptor.requires_pkce),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(db)
                .await?;
                tracing::info!(client_id = %descriptor.client_id, "Created OAuth2 client");
                report.clients_created += 1;
            }
            Some(current) => {
                let mut active: oauth2_client::ActiveModel = current.into();
                active.client_type = Set(descriptor.client_type.as_str().to_string());
                active.secret_hash = Set(secret_hash);
                active.display_name = Set(descriptor.display_name.clone());
                active.permissions = Set(to_json(&descriptor.permission_strings()));
                active.redirect_uris = Set(to_json(&descriptor.redirect_uris));
                active.post_logout_redirect_uris =
                    Set(to_json(&descriptor.post_logout_redirect_uris));
                active.requires_pkce = Set(descriptor.requires_pkce);
                active.updated_at = Set(now);
                active.update(db).await?;
                tracing::info!(client_id = %descriptor.client_id, "Updated OAuth2 client");
                report.clients_updated += 1;
            }
        }
    }

    Ok(report)
}

fn to_json(values: &[String]) -> String {
    serde_json::Value::from(values.to_vec()).to_string()
}

/// Client credentials presented at the token, introspection or revocation endpoint.
#[derive(Debug, Default)]
pub struct ClientCredentials {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl ClientCredentials {
    /// HTTP Basic authentication first, then the form body.
    pub fn extract(
        headers: &HeaderMap,
        form_client_id: Option<&str>,
        form_client_secret: Option<&str>,
    ) -> Self {
        if let Some(auth) = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Basic "))
            && let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(auth.trim())
            && let Ok(creds) = String::from_utf8(decoded)
            && let Some((id, secret)) = creds.split_once(':')
        {
            let id = urlencoding::decode(id).map(|s| s.into_owned());
            let secret = urlencoding::decode(secret).map(|s| s.into_owned());
            if let (Ok(id), Ok(secret)) = (id, secret) {
                return Self {
                    client_id: Some(id),
                    client_secret: Some(secret),
                };
            }
        }

        Self {
            client_id: form_client_id.map(String::from),
            client_secret: form_client_secret.map(String::from),
        }
    }
}

/// Read access to registered clients and scopes.
#[derive(Clone)]
pub struct ClientRegistry {
    db: Arc<DatabaseConnection>,
}

impl ClientRegistry {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_client(&self, client_id: &str) -> Result<Option<oauth2_client::Model>, DbErr> {
        oauth2_client::Entity::find_by_id(client_id)
            .one(self.db.as_ref())
            .await
    }

    /// Authenticate the calling client.
    ///
    /// Confidential clients must present their secret; public clients must not present one.
    pub async fn authenticate(
        &self,
        credentials: &ClientCredentials,
    ) -> Result<oauth2_client::Model, OAuthError> {
        let client_id = credentials
            .client_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| OAuthError::InvalidRequest("client_id is required".into()))?;

        let Some(client) = self.find_client(client_id).await? else {
            tracing::info!(client_id, "Unknown client");
            return Err(OAuthError::InvalidClient(
                "The specified client is invalid.".into(),
            ));
        };

        match (
            client.is_confidential(),
            client.secret_hash.as_deref(),
            credentials.client_secret.as_deref(),
        ) {
            (true, Some(hash), Some(secret)) if verify_password(secret, hash) => Ok(client),
            (true, _, _) => {
                tracing::warn!(client_id, "Client authentication failed");
                Err(OAuthError::InvalidClient(
                    "The specified client credentials are invalid.".into(),
                ))
            }
            (false, _, None) => Ok(client),
            (false, _, Some(_)) => Err(OAuthError::InvalidClient(
                "Public clients must not send a client secret.".into(),
            )),
        }
    }

    /// Union of the resources of `scopes`, in registry order.
    pub async fn resources_for(&self, scopes: &[String]) -> Result<Vec<String>, DbErr> {
        if scopes.is_empty() {
            return Ok(Vec::new());
        }
        let mut resources: Vec<String> = Vec::new();
        for scope in oauth2_scope::Entity::find()
            .filter(oauth2_scope::Column::Name.is_in(scopes.iter().cloned()))
            .order_by_asc(oauth2_scope::Column::Name)
            .all(self.db.as_ref())
            .await?
        {
            for resource in scope.resources_list() {
                if !resources.contains(&resource) {
                    resources.push(resource);
                }
            }
        }
        Ok(resources)
    }

    /// Every scope a client could be granted: the standard OpenID ones plus the registry.
    pub async fn supported_scopes(&self) -> Result<Vec<String>, DbErr> {
        let mut names: Vec<String> = [
            scopes::OPENID,
            scopes::PROFILE,
            scopes::EMAIL,
            scopes::ADDRESS,
            scopes::PHONE,
        ]
        .into_iter()
        .map(String::from)
        .collect();
        for scope in oauth2_scope::Entity::find()
            .order_by_asc(oauth2_scope::Column::Name)
            .all(self.db.as_ref())
            .await?
        {
            if !names.contains(&scope.name) {
                names.push(scope.name);
            }
        }
        Ok(names)
    }
}
