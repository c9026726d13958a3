//! Code and token issuance.
//!
//! [`TokenIssuer::sign_in`] is the only place tokens are minted. The
//! authorize endpoint hands principals to [`TokenIssuer::issue_authorization_code`],
//! the grant handlers recover them through the `redeem_*` methods, and
//! introspection and revocation look tokens up through [`TokenIssuer::authenticate`].

use crate::config::AppConfig;
use crate::entity::{oauth2_authorization, oauth2_client, oauth2_token};
use crate::error::OAuthError;
use crate::oauth2::claims::{Destination, Principal, claim_types, scopes};
use crate::oauth2::password::generate_token;
use crate::oauth2::permission::Permission;
use crate::oauth2::registry::ClientRegistry;
use crate::oauth2::token::GrantType;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition, DatabaseConnection, DbErr,
    EntityTrait, QueryFilter, TransactionTrait,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use utoipa::ToSchema;

/// JOSE `typ` of access tokens, distinguishing them from identity tokens signed with the same key.
const ACCESS_TOKEN_TYPE: &str = "at+jwt";

#[derive(Debug, Serialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    pub scope: String,
}

/// Everything an authorization code is bound to besides the principal.
#[derive(Debug)]
pub struct CodeBinding<'a> {
    pub client_id: &'a str,
    pub redirect_uri: &'a str,
    pub nonce: Option<&'a str>,
    pub code_challenge: Option<&'a str>,
    pub code_challenge_method: Option<&'a str>,
}

/// A successfully redeemed authorization code.
#[derive(Debug)]
pub struct RedeemedCode {
    pub principal: Principal,
    pub nonce: Option<String>,
}

/// A refresh token that passed lookup and is ready to be rotated.
#[derive(Debug)]
pub struct RefreshGrant {
    token_id: String,
    pub principal: Principal,
}

/// A token that authenticated successfully, as seen by introspection.
#[derive(Debug)]
pub enum AuthenticatedToken {
    Access {
        record: oauth2_token::Model,
        claims: Map<String, Value>,
    },
    Refresh {
        record: oauth2_token::Model,
    },
}

impl AuthenticatedToken {
    pub fn record(&self) -> &oauth2_token::Model {
        match self {
            AuthenticatedToken::Access { record, .. } | AuthenticatedToken::Refresh { record } => {
                record
            }
        }
    }
}

#[derive(Clone)]
pub struct TokenIssuer {
    db: Arc<DatabaseConnection>,
    registry: ClientRegistry,
    issuer: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_lifetime: i64,
    identity_token_lifetime: i64,
    refresh_token_lifetime: i64,
    authorization_code_lifetime: i64,
}

impl TokenIssuer {
    pub fn new(db: Arc<DatabaseConnection>, registry: ClientRegistry, config: &AppConfig) -> Self {
        let secret = config.oauth2.signing_secret.as_bytes();
        Self {
            db,
            registry,
            issuer: config.issuer().to_string(),
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_token_lifetime: config.oauth2.access_token_lifetime,
            identity_token_lifetime: config.oauth2.identity_token_lifetime,
            refresh_token_lifetime: config.oauth2.refresh_token_lifetime,
            authorization_code_lifetime: config.oauth2.authorization_code_lifetime,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Persist a single-use code for `principal` and return it.
    #[tracing::instrument(skip(self, principal), fields(client_id = %binding.client_id))]
    pub async fn issue_authorization_code(
        &self,
        principal: &Principal,
        binding: &CodeBinding<'_>,
    ) -> Result<String, OAuthError> {
        let subject = principal
            .subject()
            .ok_or_else(|| OAuthError::Server("principal has no subject".into()))?;
        let code = generate_token().map_err(|e| OAuthError::Server(e.to_string()))?;
        let now = OffsetDateTime::now_utc();

        oauth2_authorization::ActiveModel {
            code: Set(code.clone()),
            client_id: Set(binding.client_id.to_string()),
            subject: Set(subject.to_string()),
            redirect_uri: Set(binding.redirect_uri.to_string()),
            scope: Set(principal.scopes.join(" ")),
            principal: Set(principal
                .to_json()
                .map_err(|e| OAuthError::Server(e.to_string()))?),
            nonce: Set(binding.nonce.map(String::from)),
            code_challenge: Set(binding.code_challenge.map(String::from)),
            code_challenge_method: Set(binding.code_challenge_method.map(String::from)),
            expires_at: Set(now + Duration::seconds(self.authorization_code_lifetime)),
            created_at: Set(now),
        }
        .insert(self.db.as_ref())
        .await?;

        Ok(code)
    }

    /// Consume an authorization code.
    ///
    /// The code row is deleted before anything else is checked, and only the
    /// caller whose delete removed it may proceed. A failed PKCE check therefore
    /// burns the code as well.
    #[tracing::instrument(skip_all, fields(client_id = %client.id))]
    pub async fn redeem_authorization_code(
        &self,
        client: &oauth2_client::Model,
        code: &str,
        redirect_uri: Option<&str>,
        code_verifier: Option<&str>,
    ) -> Result<RedeemedCode, OAuthError> {
        let invalid = || OAuthError::InvalidGrant("The authorization code is no longer valid.".into());

        let Some(authorization) = oauth2_authorization::Entity::find_by_id(code)
            .one(self.db.as_ref())
            .await?
        else {
            return Err(invalid());
        };

        let deleted = oauth2_authorization::Entity::delete_many()
            .filter(oauth2_authorization::Column::Code.eq(code))
            .exec(self.db.as_ref())
            .await?;
        if deleted.rows_affected != 1 {
            tracing::warn!("Authorization code redeemed concurrently");
            return Err(invalid());
        }

        if authorization.is_expired() {
            return Err(invalid());
        }
        if authorization.client_id != client.id {
            tracing::warn!(
                bound_client = %authorization.client_id,
                "Authorization code presented by another client"
            );
            return Err(invalid());
        }
        if redirect_uri.is_some_and(|uri| uri != authorization.redirect_uri) {
            return Err(OAuthError::InvalidGrant(
                "The redirect_uri does not match the one used at authorization.".into(),
            ));
        }
        if !authorization.verify_pkce(code_verifier) {
            tracing::warn!("PKCE verification failed");
            return Err(OAuthError::InvalidGrant(
                "The code_verifier is invalid.".into(),
            ));
        }

        let principal = Principal::from_json(&authorization.principal)
            .map_err(|e| OAuthError::Server(e.to_string()))?;
        Ok(RedeemedCode {
            principal,
            nonce: authorization.nonce,
        })
    }

    /// Look up a refresh token presented by `client` and recover its principal.
    ///
    /// Nothing is revoked here; [`TokenIssuer::rotate_refresh_token`] does that
    /// together with persisting the replacement.
    #[tracing::instrument(skip_all, fields(client_id = %client.id))]
    pub async fn redeem_refresh_token(
        &self,
        client: &oauth2_client::Model,
        refresh_token: &str,
    ) -> Result<RefreshGrant, OAuthError> {
        let invalid = || OAuthError::InvalidGrant("The refresh token is no longer valid.".into());

        let Some(record) = oauth2_token::Entity::find()
            .filter(oauth2_token::Column::RefreshToken.eq(refresh_token))
            .one(self.db.as_ref())
            .await?
        else {
            return Err(invalid());
        };

        if record.client_id != client.id {
            tracing::warn!(
                bound_client = %record.client_id,
                "Refresh token presented by another client"
            );
            return Err(invalid());
        }
        if record.is_revoked() {
            tracing::warn!(token_id = %record.id, "Revoked refresh token presented");
            return Err(invalid());
        }
        if record.is_refresh_token_expired() {
            return Err(invalid());
        }

        let principal = Principal::from_json(&record.principal)
            .map_err(|e| OAuthError::Server(e.to_string()))?;
        Ok(RefreshGrant {
            token_id: record.id,
            principal,
        })
    }

    /// Revoke the redeemed refresh token and persist its replacement in one transaction.
    ///
    /// Revocation is a conditional update, so concurrent use yields one winner.
    #[tracing::instrument(skip_all, fields(client_id = %client.id, token_id = %grant.token_id))]
    pub async fn rotate_refresh_token(
        &self,
        grant: RefreshGrant,
        client: &oauth2_client::Model,
    ) -> Result<TokenResponse, OAuthError> {
        let RefreshGrant {
            token_id,
            principal,
        } = grant;
        let (response, record) = self
            .mint(principal, client, GrantType::RefreshToken, None)
            .await?;

        let txn = self.db.begin().await?;
        let revoked = oauth2_token::Entity::update_many()
            .col_expr(
                oauth2_token::Column::RevokedAt,
                Expr::value(OffsetDateTime::now_utc()),
            )
            .filter(oauth2_token::Column::Id.eq(&token_id))
            .filter(oauth2_token::Column::RevokedAt.is_null())
            .exec(&txn)
            .await?;
        if revoked.rows_affected != 1 {
            txn.rollback().await?;
            tracing::warn!("Refresh token redeemed concurrently");
            return Err(OAuthError::InvalidGrant(
                "The refresh token is no longer valid.".into(),
            ));
        }
        record.insert(&txn).await?;
        txn.commit().await?;

        tracing::info!(scope = %response.scope, "Rotated refresh token");
        Ok(response)
    }

    /// Mint and persist tokens for `principal`.
    #[tracing::instrument(skip(self, principal, client, nonce), fields(client_id = %client.id))]
    pub async fn sign_in(
        &self,
        principal: Principal,
        client: &oauth2_client::Model,
        grant: GrantType,
        nonce: Option<&str>,
    ) -> Result<TokenResponse, OAuthError> {
        let (response, record) = self.mint(principal, client, grant, nonce).await?;
        record.insert(self.db.as_ref()).await?;

        tracing::info!(grant = grant.as_str(), scope = %response.scope, "Issued tokens");
        Ok(response)
    }

    /// Build the token response for `principal` and the record that backs it.
    ///
    /// Destinations are re-applied here regardless of what the caller did.
    async fn mint(
        &self,
        mut principal: Principal,
        client: &oauth2_client::Model,
        grant: GrantType,
        nonce: Option<&str>,
    ) -> Result<(TokenResponse, oauth2_token::ActiveModel), OAuthError> {
        let subject = principal
            .subject()
            .ok_or_else(|| OAuthError::Server("principal has no subject".into()))?
            .to_string();

        let token_id = uuid::Uuid::new_v4().to_string();
        principal.set_claim(claim_types::TOKEN_ID, &token_id);
        principal.apply_destinations();

        let now = OffsetDateTime::now_utc();
        let scope = principal.scopes.join(" ");
        let audiences = self.registry.resources_for(&principal.scopes).await?;

        let mut access_claims = principal.claims_for(Destination::AccessToken);
        access_claims.insert("iss".into(), self.issuer.clone().into());
        access_claims.insert("sub".into(), subject.clone().into());
        if let Some(aud) = audience_value(&audiences) {
            access_claims.insert("aud".into(), aud);
        }
        access_claims.insert("iat".into(), now.unix_timestamp().into());
        access_claims.insert(
            "exp".into(),
            (now.unix_timestamp() + self.access_token_lifetime).into(),
        );
        access_claims.insert("jti".into(), token_id.clone().into());
        access_claims.insert("client_id".into(), client.id.clone().into());
        access_claims.insert("scope".into(), scope.clone().into());

        let access_header = Header {
            typ: Some(ACCESS_TOKEN_TYPE.to_string()),
            ..Header::new(Algorithm::HS256)
        };
        let access_token = jsonwebtoken::encode(&access_header, &access_claims, &self.encoding_key)
            .map_err(|e| OAuthError::Server(e.to_string()))?;

        let id_token = if principal.has_scope(scopes::OPENID) {
            let mut id_claims = principal.claims_for(Destination::IdentityToken);
            id_claims.insert("iss".into(), self.issuer.clone().into());
            id_claims.insert("sub".into(), subject.clone().into());
            id_claims.insert("aud".into(), client.id.clone().into());
            id_claims.insert("azp".into(), client.id.clone().into());
            id_claims.insert("iat".into(), now.unix_timestamp().into());
            id_claims.insert(
                "exp".into(),
                (now.unix_timestamp() + self.identity_token_lifetime).into(),
            );
            if let Some(nonce) = nonce {
                id_claims.insert("nonce".into(), nonce.into());
            }
            Some(
                jsonwebtoken::encode(&Header::new(Algorithm::HS256), &id_claims, &self.encoding_key)
                    .map_err(|e| OAuthError::Server(e.to_string()))?,
            )
        } else {
            None
        };

        let issue_refresh = grant != GrantType::ClientCredentials
            && client.has_permission(&Permission::grant_type(GrantType::RefreshToken.as_str()));
        let refresh_token = if issue_refresh {
            Some(generate_token().map_err(|e| OAuthError::Server(e.to_string()))?)
        } else {
            None
        };

        let record = oauth2_token::ActiveModel {
            id: Set(token_id),
            refresh_token: Set(refresh_token.clone()),
            client_id: Set(client.id.clone()),
            subject: Set(subject),
            scope: Set(scope.clone()),
            principal: Set(principal
                .to_json()
                .map_err(|e| OAuthError::Server(e.to_string()))?),
            access_token_expires_at: Set(now + Duration::seconds(self.access_token_lifetime)),
            refresh_token_expires_at: Set(refresh_token
                .as_ref()
                .map(|_| now + Duration::seconds(self.refresh_token_lifetime))),
            created_at: Set(now),
            revoked_at: Set(None),
        };

        let response = TokenResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_token_lifetime,
            refresh_token,
            id_token,
            scope,
        };
        Ok((response, record))
    }

    /// Authenticate a presented token: a live access token or an unexpired refresh token.
    pub async fn authenticate(&self, token: &str) -> Result<Option<AuthenticatedToken>, DbErr> {
        if let Some(claims) = self.decode_access_token(token) {
            let Some(jti) = claims.get("jti").and_then(Value::as_str) else {
                return Ok(None);
            };
            let record = oauth2_token::Entity::find_by_id(jti)
                .one(self.db.as_ref())
                .await?;
            return Ok(record
                .filter(|r| r.is_valid())
                .map(|record| AuthenticatedToken::Access { record, claims }));
        }

        let record = oauth2_token::Entity::find()
            .filter(oauth2_token::Column::RefreshToken.eq(token))
            .one(self.db.as_ref())
            .await?;
        Ok(record
            .filter(|r| !r.is_revoked() && !r.is_refresh_token_expired())
            .map(|record| AuthenticatedToken::Refresh { record }))
    }

    fn decode_access_token(&self, token: &str) -> Option<Map<String, Value>> {
        let header = jsonwebtoken::decode_header(token).ok()?;
        if header.typ.as_deref() != Some(ACCESS_TOKEN_TYPE) {
            return None;
        }
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.validate_aud = false;
        validation.leeway = 0;
        jsonwebtoken::decode::<Map<String, Value>>(token, &self.decoding_key, &validation)
            .ok()
            .map(|data| data.claims)
    }

    /// Revoke the token record behind `token` if it belongs to `client`.
    ///
    /// Returns whether anything was revoked.
    pub async fn revoke(&self, client: &oauth2_client::Model, token: &str) -> Result<bool, DbErr> {
        let record = match self.decode_access_token(token) {
            Some(claims) => match claims.get("jti").and_then(Value::as_str) {
                Some(jti) => {
                    oauth2_token::Entity::find_by_id(jti)
                        .one(self.db.as_ref())
                        .await?
                }
                None => None,
            },
            None => {
                oauth2_token::Entity::find()
                    .filter(oauth2_token::Column::RefreshToken.eq(token))
                    .one(self.db.as_ref())
                    .await?
            }
        };

        let Some(record) = record else {
            return Ok(false);
        };
        if record.client_id != client.id {
            tracing::warn!(
                token_client = %record.client_id,
                "Client attempted to revoke another client's token"
            );
            return Ok(false);
        }

        let result = oauth2_token::Entity::update_many()
            .col_expr(
                oauth2_token::Column::RevokedAt,
                Expr::value(OffsetDateTime::now_utc()),
            )
            .filter(oauth2_token::Column::Id.eq(&record.id))
            .filter(oauth2_token::Column::RevokedAt.is_null())
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Delete expired codes and tokens that can no longer be used.
    pub async fn purge_expired(&self) -> Result<u64, DbErr> {
        let now = OffsetDateTime::now_utc();
        let codes = oauth2_authorization::Entity::delete_many()
            .filter(oauth2_authorization::Column::ExpiresAt.lt(now))
            .exec(self.db.as_ref())
            .await?;
        let tokens = oauth2_token::Entity::delete_many()
            .filter(oauth2_token::Column::AccessTokenExpiresAt.lt(now))
            .filter(
                Condition::any()
                    .add(oauth2_token::Column::RefreshTokenExpiresAt.is_null())
                    .add(oauth2_token::Column::RefreshTokenExpiresAt.lt(now)),
            )
            .exec(self.db.as_ref())
            .await?;
        Ok(codes.rows_affected + tokens.rows_affected)
    }
}

fn audience_value(audiences: &[String]) -> Option<Value> {
    match audiences {
        [] => None,
        [single] => Some(Value::String(single.clone())),
        many => Some(Value::from(many.to_vec())),
    }
}
