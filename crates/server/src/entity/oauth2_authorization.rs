//! OAuth2 Authorization Code entity - single-use codes exchanged for tokens.

use crate::oauth2::pkce;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "oauth2_authorization")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub code: String,
    pub client_id: String,
    pub subject: String,
    pub redirect_uri: String,
    pub scope: String,
    /// JSON-serialized principal (claims and scopes, without destinations)
    pub principal: String,
    /// OpenID Connect nonce
    pub nonce: Option<String>,
    /// PKCE code challenge
    pub code_challenge: Option<String>,
    /// PKCE code challenge method (only S256 is issued)
    pub code_challenge_method: Option<String>,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Check if this authorization code has expired
    pub fn is_expired(&self) -> bool {
        self.expires_at < OffsetDateTime::now_utc()
    }

    /// Verify the PKCE code verifier supplied at redemption.
    ///
    /// A code bound to a challenge requires a matching verifier; a code issued
    /// without one must not be redeemed with a verifier either.
    pub fn verify_pkce(&self, code_verifier: Option<&str>) -> bool {
        match (
            self.code_challenge.as_deref(),
            self.code_challenge_method.as_deref(),
            code_verifier,
        ) {
            (Some(challenge), Some(pkce::METHOD_S256), Some(verifier)) => {
                pkce::verify(verifier, challenge)
            }
            (None, None, None) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code_with(challenge: Option<&str>) -> Model {
        let now = OffsetDateTime::now_utc();
        Model {
            code: "code".to_string(),
            client_id: "bwa-client".to_string(),
            subject: "u1".to_string(),
            redirect_uri: "https://localhost/cb".to_string(),
            scope: "openid".to_string(),
            principal: "{}".to_string(),
            nonce: None,
            code_challenge: challenge.map(String::from),
            code_challenge_method: challenge.map(|_| pkce::METHOD_S256.to_string()),
            expires_at: now + time::Duration::minutes(5),
            created_at: now,
        }
    }

    #[test]
    fn test_verify_pkce_requires_matching_verifier() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let challenge = pkce::derive_challenge(verifier);
        let code = code_with(Some(&challenge));

        assert!(code.verify_pkce(Some(verifier)));
        assert!(!code.verify_pkce(Some("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXl")));
        assert!(!code.verify_pkce(None));
    }

    #[test]
    fn test_verify_pkce_without_challenge() {
        let code = code_with(None);
        assert!(code.verify_pkce(None));
        assert!(!code.verify_pkce(Some("unexpected-verifier")));
    }
}
