//! OAuth2 / OpenID Connect authorization and token service for the helpdesk platform.
//!
//! The service issues tokens to the browser SPA (authorization code with PKCE),
//! the mobile app (password grant) and confidential backends (client credentials),
//! and lets resource servers introspect what it issued.

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::config::AppConfig;

pub mod api;
pub mod config;
pub mod entity;
pub mod error;
pub mod oauth2;

#[derive(Clone, Debug)]
pub struct AppResources {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
}
