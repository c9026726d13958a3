//! Claims, principals and the claims destination policy.
//!
//! Every claim carries the set of tokens it may appear in. That set is never
//! persisted: it is recomputed by [`destinations`] whenever a principal is
//! built or rehydrated, so every grant routes claims the same way.

use crate::entity::app_user;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

pub mod claim_types {
    pub const SUBJECT: &str = "sub";
    pub const NAME_IDENTIFIER: &str = "nameid";
    pub const NAME: &str = "name";
    pub const EMAIL: &str = "email";
    pub const PREFERRED_USERNAME: &str = "preferred_username";
    pub const ROLE: &str = "role";
    pub const TOKEN_ID: &str = "jti";
}

pub mod scopes {
    pub const OPENID: &str = "openid";
    pub const PROFILE: &str = "profile";
    pub const EMAIL: &str = "email";
    pub const ADDRESS: &str = "address";
    pub const PHONE: &str = "phone";
    pub const ROLES: &str = "roles";
    pub const OFFLINE_ACCESS: &str = "offline_access";
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Destination {
    AccessToken,
    IdentityToken,
}

/// Who a principal describes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    #[default]
    User,
    /// A client acting on its own behalf (client credentials).
    Client,
}

/// Which tokens a claim of `claim_type` may be written to, given who the
/// principal describes and the granted scopes.
pub fn destinations(
    subject: SubjectKind,
    claim_type: &str,
    granted: &[String],
) -> BTreeSet<Destination> {
    use claim_types::*;
    let has = |scope: &str| granted.iter().any(|s| s == scope);
    let both = || BTreeSet::from([Destination::AccessToken, Destination::IdentityToken]);

    match (subject, claim_type) {
        (_, SUBJECT | NAME_IDENTIFIER) => both(),
        (SubjectKind::Client, NAME) if has(scopes::PROFILE) => both(),
        (SubjectKind::User, NAME | EMAIL | PREFERRED_USERNAME)
            if has(scopes::PROFILE) || has(scopes::EMAIL) =>
        {
            both()
        }
        _ => BTreeSet::from([Destination::AccessToken]),
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
    #[serde(skip)]
    pub destinations: BTreeSet<Destination>,
}

impl Claim {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
            destinations: BTreeSet::new(),
        }
    }

    pub fn has_destination(&self, destination: Destination) -> bool {
        self.destinations.contains(&destination)
    }
}

/// The identity a token is issued for, with the scopes granted to it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    #[serde(default)]
    pub kind: SubjectKind,
    pub claims: Vec<Claim>,
    pub scopes: Vec<String>,
}

impl Principal {
    pub fn new(scopes: Vec<String>) -> Self {
        Self {
            kind: SubjectKind::User,
            claims: Vec::new(),
            scopes,
        }
    }

    /// Principal for an end user: subject, name identifier, email, names and one claim per role.
    pub fn for_user(user: &app_user::Model, roles: &[String], scopes: Vec<String>) -> Self {
        let mut principal = Self::new(scopes);
        principal.add_claim(claim_types::SUBJECT, &user.id);
        principal.add_claim(claim_types::NAME_IDENTIFIER, &user.id);
        principal.add_claim(claim_types::EMAIL, &user.email);
        principal.add_claim(claim_types::NAME, &user.user_name);
        principal.add_claim(claim_types::PREFERRED_USERNAME, &user.user_name);
        for role in roles {
            principal.add_claim(claim_types::ROLE, role);
        }
        principal.apply_destinations();
        principal
    }

    /// Principal for a client acting on its own behalf.
    pub fn for_client(client_id: &str, display_name: &str, scopes: Vec<String>) -> Self {
        let mut principal = Self {
            kind: SubjectKind::Client,
            ..Self::new(scopes)
        };
        principal.add_claim(claim_types::SUBJECT, client_id);
        principal.add_claim(claim_types::NAME, display_name);
        principal.apply_destinations();
        principal
    }

    pub fn add_claim(&mut self, kind: &str, value: &str) {
        self.claims.push(Claim::new(kind, value));
    }

    /// Replace every claim of `kind` with a single one.
    pub fn set_claim(&mut self, kind: &str, value: &str) {
        self.claims.retain(|c| c.kind != kind);
        self.add_claim(kind, value);
    }

    pub fn claim(&self, kind: &str) -> Option<&str> {
        self.claims
            .iter()
            .find(|c| c.kind == kind)
            .map(|c| c.value.as_str())
    }

    pub fn subject(&self) -> Option<&str> {
        self.claim(claim_types::SUBJECT)
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    /// Route every claim through [`destinations`], discarding previous annotations.
    pub fn apply_destinations(&mut self) {
        for claim in &mut self.claims {
            claim.destinations = destinations(self.kind, &claim.kind, &self.scopes);
        }
    }

    /// Claims destined for `destination`, as a JWT claim map.
    ///
    /// Repeated claim types (roles) become arrays.
    pub fn claims_for(&self, destination: Destination) -> Map<String, Value> {
        let mut map = Map::new();
        for claim in self
            .claims
            .iter()
            .filter(|c| c.has_destination(destination))
        {
            let value = Value::String(claim.value.clone());
            match map.get_mut(&claim.kind) {
                None => {
                    map.insert(claim.kind.clone(), value);
                }
                Some(Value::Array(values)) => values.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
            }
        }
        map
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Rehydrate a stored principal. Destinations are recomputed.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let mut principal: Principal = serde_json::from_str(json)?;
        principal.apply_destinations();
        Ok(principal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn granted(scopes: &[&str]) -> Vec<String> {
        scopes.iter().map(|s| s.to_string()).collect()
    }

    fn both() -> BTreeSet<Destination> {
        BTreeSet::from([Destination::AccessToken, Destination::IdentityToken])
    }

    fn access_only() -> BTreeSet<Destination> {
        BTreeSet::from([Destination::AccessToken])
    }

    fn user() -> app_user::Model {
        app_user::Model {
            id: "u1".to_string(),
            email: "alice@example.test".to_string(),
            user_name: "alice".to_string(),
            password_hash: None,
            is_active: true,
            two_factor_enabled: false,
            access_failed_count: 0,
            lockout_end: None,
            created_at: OffsetDateTime::now_utc(),
            last_login_at: None,
        }
    }

    #[test]
    fn test_destination_table() {
        use claim_types::*;
        let none = granted(&["openid"]);
        let profile = granted(&["openid", "profile"]);
        let email = granted(&["email"]);

        let user = SubjectKind::User;
        let client = SubjectKind::Client;

        for subject in [user, client] {
            assert_eq!(destinations(subject, SUBJECT, &none), both());
            assert_eq!(destinations(subject, NAME_IDENTIFIER, &none), both());
        }

        for kind in [NAME, EMAIL, PREFERRED_USERNAME] {
            assert_eq!(destinations(user, kind, &profile), both());
            assert_eq!(destinations(user, kind, &email), both());
            assert_eq!(destinations(user, kind, &none), access_only());
        }

        assert_eq!(destinations(client, NAME, &profile), both());
        assert_eq!(destinations(client, NAME, &email), access_only());
        assert_eq!(destinations(client, NAME, &none), access_only());

        assert_eq!(destinations(user, ROLE, &profile), access_only());
        assert_eq!(destinations(user, "department", &profile), access_only());
        assert_eq!(destinations(user, TOKEN_ID, &profile), access_only());
    }

    #[test]
    fn test_roles_never_reach_identity_token() {
        let roles = vec!["Admin".to_string(), "Agent".to_string()];
        for scopes in [
            granted(&[]),
            granted(&["openid", "profile", "email", "roles"]),
            granted(&["roles"]),
        ] {
            let principal = Principal::for_user(&user(), &roles, scopes);
            let role_claims: Vec<_> = principal
                .claims
                .iter()
                .filter(|c| c.kind == claim_types::ROLE)
                .collect();
            assert_eq!(role_claims.len(), 2);
            for claim in role_claims {
                assert_eq!(claim.destinations, access_only());
            }
            assert!(
                !principal
                    .claims_for(Destination::IdentityToken)
                    .contains_key(claim_types::ROLE)
            );
        }
    }

    #[test]
    fn test_rehydrated_principal_gets_destinations_again() {
        let principal = Principal::for_user(
            &user(),
            &["Admin".to_string()],
            granted(&["openid", "profile"]),
        );
        let json = principal.to_json().unwrap();
        assert!(!json.contains("AccessToken"));

        let restored = Principal::from_json(&json).unwrap();
        assert_eq!(restored, principal);
        assert_eq!(restored.subject(), Some("u1"));
    }

    #[test]
    fn test_claims_for_groups_repeated_types() {
        let roles = vec!["Admin".to_string(), "Agent".to_string()];
        let principal = Principal::for_user(&user(), &roles, granted(&["profile"]));

        let access = principal.claims_for(Destination::AccessToken);
        assert_eq!(access["role"], serde_json::json!(["Admin", "Agent"]));
        assert_eq!(access["sub"], "u1");

        let identity = principal.claims_for(Destination::IdentityToken);
        assert_eq!(identity["email"], "alice@example.test");
        assert_eq!(identity["preferred_username"], "alice");
    }

    #[test]
    fn test_client_principal_name_gated_on_profile() {
        let without = Principal::for_client("svc", "Service", granted(&["api"]));
        assert!(
            !without
                .claims_for(Destination::IdentityToken)
                .contains_key(claim_types::NAME)
        );

        let email_only = Principal::for_client("svc", "Service", granted(&["openid", "email"]));
        assert!(
            !email_only
                .claims_for(Destination::IdentityToken)
                .contains_key(claim_types::NAME)
        );

        let with = Principal::for_client("svc", "Service", granted(&["profile"]));
        assert_eq!(with.claims_for(Destination::IdentityToken)["name"], "Service");
        assert_eq!(with.subject(), Some("svc"));

        // The kind survives storage, so a rehydrated client keeps the client rules
        let restored = Principal::from_json(&email_only.to_json().unwrap()).unwrap();
        assert_eq!(restored.kind, SubjectKind::Client);
        assert_eq!(restored, email_only);
    }

    #[test]
    fn test_set_claim_replaces_existing() {
        let mut principal = Principal::new(vec![]);
        principal.add_claim(claim_types::TOKEN_ID, "a");
        principal.set_claim(claim_types::TOKEN_ID, "b");
        assert_eq!(principal.claim(claim_types::TOKEN_ID), Some("b"));
        assert_eq!(principal.claims.len(), 1);
    }
}
