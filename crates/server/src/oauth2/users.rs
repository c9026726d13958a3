//! User credential store.
//!
//! Shared by the external login form and the password grant. Password checks
//! keep a failed-attempt counter per account and lock the account for a fixed
//! duration once the configured threshold is reached.

use crate::config::LockoutConfig;
use crate::entity::{app_user, app_user_role};
use crate::oauth2::password::{hash_password, verify_password};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition, DatabaseConnection, DbErr,
    EntityTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use std::sync::{Arc, LazyLock};
use thiserror::Error;
use time::{Duration, OffsetDateTime};

/// Hash verified against when the login matches no account.
static DUMMY_HASH: LazyLock<Option<String>> =
    LazyLock::new(|| hash_password("helpdesk-auth-unknown-login").ok());

#[derive(Debug, Error)]
pub enum UserError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
    #[error("Failed to hash password: {0}")]
    Hash(String),
}

/// Outcome of a password check.
#[derive(Debug)]
pub enum CredentialCheck {
    Success(app_user::Model),
    /// Unknown user or wrong password. Deliberately not distinguished.
    InvalidCredentials,
    /// Password was correct but the account is locked out.
    LockedOut,
    /// Password was correct but the account requires a second factor.
    RequiresTwoFactor,
    /// Password was correct but the account has been deactivated.
    NotAllowed,
}

#[derive(Clone)]
pub struct UserStore {
    db: Arc<DatabaseConnection>,
    lockout: LockoutConfig,
}

impl UserStore {
    pub fn new(db: Arc<DatabaseConnection>, lockout: LockoutConfig) -> Self {
        Self { db, lockout }
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<app_user::Model>, DbErr> {
        app_user::Entity::find_by_id(id).one(self.db.as_ref()).await
    }

    /// Resolve a user that may still receive tokens: it must exist and be active.
    pub async fn find_active(&self, id: &str) -> Result<Option<app_user::Model>, DbErr> {
        Ok(self.find_by_id(id).await?.filter(|u| u.is_active))
    }

    /// Find a user by email or user name (case-insensitive on email).
    pub async fn find_by_login(&self, login: &str) -> Result<Option<app_user::Model>, DbErr> {
        let login = login.trim();
        app_user::Entity::find()
            .filter(
                Condition::any()
                    .add(app_user::Column::Email.eq(login.to_lowercase()))
                    .add(app_user::Column::UserName.eq(login)),
            )
            .one(self.db.as_ref())
            .await
    }

    pub async fn roles(&self, user_id: &str) -> Result<Vec<String>, DbErr> {
        Ok(app_user_role::Entity::find()
            .filter(app_user_role::Column::UserId.eq(user_id))
            .order_by_asc(app_user_role::Column::Role)
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(|r| r.role)
            .collect())
    }

    /// Validate a login/password pair, updating lockout accounting.
    ///
    /// Account state (locked out, deactivated, second factor) is only reported
    /// once the password has verified; before that every failure is
    /// [`CredentialCheck::InvalidCredentials`].
    #[tracing::instrument(skip(self, password))]
    pub async fn check_password(
        &self,
        login: &str,
        password: &str,
    ) -> Result<CredentialCheck, DbErr> {
        let user = self.find_by_login(login).await?;

        // Unknown logins still pay for one Argon2 verification.
        let valid = match user.as_ref().and_then(|u| u.password_hash.as_deref()) {
            Some(hash) => verify_password(password, hash),
            None => {
                if let Some(hash) = DUMMY_HASH.as_deref() {
                    let _ = verify_password(password, hash);
                }
                false
            }
        };

        let Some(user) = user else {
            return Ok(CredentialCheck::InvalidCredentials);
        };

        if user.is_locked_out() {
            return Ok(if valid {
                CredentialCheck::LockedOut
            } else {
                CredentialCheck::InvalidCredentials
            });
        }
        if !valid {
            if user.is_active {
                self.record_failure(&user.id).await?;
            }
            return Ok(CredentialCheck::InvalidCredentials);
        }
        if !user.is_active {
            return Ok(CredentialCheck::NotAllowed);
        }

        let mut active: app_user::ActiveModel = user.clone().into();
        active.access_failed_count = Set(0);
        active.lockout_end = Set(None);
        let user = active.update(self.db.as_ref()).await?;

        if user.two_factor_enabled {
            return Ok(CredentialCheck::RequiresTwoFactor);
        }
        Ok(CredentialCheck::Success(user))
    }

    /// Count a failed attempt and lock the account once the threshold is reached.
    async fn record_failure(&self, user_id: &str) -> Result<(), DbErr> {
        app_user::Entity::update_many()
            .col_expr(
                app_user::Column::AccessFailedCount,
                Expr::col(app_user::Column::AccessFailedCount).add(1),
            )
            .filter(app_user::Column::Id.eq(user_id))
            .exec(self.db.as_ref())
            .await?;

        let Some(user) = self.find_by_id(user_id).await? else {
            return Ok(());
        };
        if user.access_failed_count < self.lockout.max_failed_attempts {
            return Ok(());
        }

        tracing::warn!(user_id, "Account locked out after repeated failed logins");
        let mut active: app_user::ActiveModel = user.into();
        active.access_failed_count = Set(0);
        active.lockout_end = Set(Some(
            OffsetDateTime::now_utc() + Duration::seconds(self.lockout.duration),
        ));
        active.update(self.db.as_ref()).await?;
        Ok(())
    }

    pub async fn update_last_login(&self, user_id: &str) -> Result<(), DbErr> {
        app_user::Entity::update_many()
            .col_expr(
                app_user::Column::LastLoginAt,
                Expr::value(OffsetDateTime::now_utc()),
            )
            .filter(app_user::Column::Id.eq(user_id))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    pub async fn create_user(
        &self,
        email: &str,
        user_name: &str,
        password: &str,
        roles: &[&str],
    ) -> Result<app_user::Model, UserError> {
        let password_hash = hash_password(password).map_err(|e| UserError::Hash(e.to_string()))?;
        let txn = self.db.begin().await?;

        let user = app_user::ActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            email: Set(email.trim().to_lowercase()),
            user_name: Set(user_name.to_string()),
            password_hash: Set(Some(password_hash)),
            is_active: Set(true),
            two_factor_enabled: Set(false),
            access_failed_count: Set(0),
            lockout_end: Set(None),
            created_at: Set(OffsetDateTime::now_utc()),
            last_login_at: Set(None),
        }
        .insert(&txn)
        .await?;

        for role in roles {
            app_user_role::ActiveModel {
                user_id: Set(user.id.clone()),
                role: Set(role.to_string()),
            }
            .insert(&txn)
            .await?;
        }

        txn.commit().await?;
        Ok(user)
    }

    pub async fn delete_user(&self, user_id: &str) -> Result<(), DbErr> {
        let txn = self.db.begin().await?;
        app_user_role::Entity::delete_many()
            .filter(app_user_role::Column::UserId.eq(user_id))
            .exec(&txn)
            .await?;
        app_user::Entity::delete_by_id(user_id).exec(&txn).await?;
        txn.commit().await
    }
}
