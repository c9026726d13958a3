//! Migration to add the OAuth2 client and scope registry.
//!
//! Creates tables for:
//! - oauth2_client: Registered OAuth2 applications and their permissions
//! - oauth2_scope: Custom scopes and the resources they grant access to

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(OAuth2Client::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OAuth2Client::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(OAuth2Client::ClientType)
                            .string_len(16)
                            .not_null()
                            .default("public"),
                    )
                    .col(ColumnDef::new(OAuth2Client::SecretHash).string().null())
                    .col(ColumnDef::new(OAuth2Client::DisplayName).string().not_null())
                    .col(ColumnDef::new(OAuth2Client::Permissions).text().not_null())
                    .col(ColumnDef::new(OAuth2Client::RedirectUris).text().not_null())
                    .col(
                        ColumnDef::new(OAuth2Client::PostLogoutRedirectUris)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2Client::RequiresPkce)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(OAuth2Client::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2Client::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(OAuth2Scope::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OAuth2Scope::Name)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(OAuth2Scope::DisplayName).string().not_null())
                    .col(ColumnDef::new(OAuth2Scope::Description).text().null())
                    .col(ColumnDef::new(OAuth2Scope::Resources).text().not_null())
                    .col(
                        ColumnDef::new(OAuth2Scope::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(OAuth2Scope::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(OAuth2Client::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum OAuth2Client {
    #[sea_orm(iden = "oauth2_client")]
    Table,
    Id,
    ClientType,
    SecretHash,
    DisplayName,
    Permissions,
    RedirectUris,
    PostLogoutRedirectUris,
    RequiresPkce,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum OAuth2Scope {
    #[sea_orm(iden = "oauth2_scope")]
    Table,
    Name,
    DisplayName,
    Description,
    Resources,
    CreatedAt,
}
