//! Migration to add the user credential store.
//!
//! Creates tables for:
//! - app_user: Accounts that can sign in through the login form or the password grant
//! - app_user_role: Role memberships, one row per (user, role)

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AppUser::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AppUser::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(AppUser::Email)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(AppUser::UserName).string().not_null())
                    .col(ColumnDef::new(AppUser::PasswordHash).string_len(255).null())
                    .col(
                        ColumnDef::new(AppUser::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(AppUser::TwoFactorEnabled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(AppUser::AccessFailedCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(AppUser::LockoutEnd)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(AppUser::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AppUser::LastLoginAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(AppUserRole::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(AppUserRole::UserId).string().not_null())
                    .col(ColumnDef::new(AppUserRole::Role).string().not_null())
                    .primary_key(
                        Index::create()
                            .col(AppUserRole::UserId)
                            .col(AppUserRole::Role),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_app_user_role_user_id")
                            .from(AppUserRole::Table, AppUserRole::UserId)
                            .to(AppUser::Table, AppUser::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AppUserRole::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AppUser::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum AppUser {
    Table,
    Id,
    Email,
    UserName,
    PasswordHash,
    IsActive,
    TwoFactorEnabled,
    AccessFailedCount,
    LockoutEnd,
    CreatedAt,
    LastLoginAt,
}

#[derive(DeriveIden)]
enum AppUserRole {
    Table,
    UserId,
    Role,
}
