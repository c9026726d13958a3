//! SeaORM entities for the authorization server.

pub mod app_user;
pub mod app_user_role;
pub mod oauth2_authorization;
pub mod oauth2_client;
pub mod oauth2_scope;
pub mod oauth2_token;
