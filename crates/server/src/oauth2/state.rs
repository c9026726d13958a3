//! OAuth2 state management.
//!
//! Provides the state shared by every authorization server endpoint.

use crate::config::AppConfig;
use crate::oauth2::bridge::ExternalSessions;
use crate::oauth2::issuer::TokenIssuer;
use crate::oauth2::registry::ClientRegistry;
use crate::oauth2::users::UserStore;
use sea_orm::DatabaseConnection;
use std::sync::Arc;

/// OAuth2 state containing all components needed for the authorization server.
#[derive(Clone)]
pub struct OAuth2State {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub registry: ClientRegistry,
    pub users: UserStore,
    pub sessions: ExternalSessions,
    pub issuer: TokenIssuer,
}

impl OAuth2State {
    pub fn new(db: Arc<DatabaseConnection>, config: Arc<AppConfig>) -> Self {
        let registry = ClientRegistry::new(db.clone());
        Self {
            users: UserStore::new(db.clone(), config.lockout.clone()),
            sessions: ExternalSessions::new(&config.external_session),
            issuer: TokenIssuer::new(db.clone(), registry.clone(), &config),
            registry,
            db,
            config,
        }
    }
}
