//! Migration to create the directory_configs table.
//!
//! Each tenant holds at most one directory configuration: connection
//! parameters for the remote directory, the attribute mapping used when
//! mirroring entries, and the sync cadence. The bind password is stored as
//! AES-256-GCM ciphertext, never as plaintext.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DirectoryConfigs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DirectoryConfigs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(DirectoryConfigs::TenantId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DirectoryConfigs::Enabled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(DirectoryConfigs::ServerUrl).text().not_null())
                    .col(ColumnDef::new(DirectoryConfigs::BindDn).text().not_null())
                    .col(
                        ColumnDef::new(DirectoryConfigs::BindPasswordCiphertext)
                            .binary()
                            .not_null(),
                    )
                    .col(ColumnDef::new(DirectoryConfigs::BaseDn).text().not_null())
                    .col(ColumnDef::new(DirectoryConfigs::UserFilter).text().null())
                    .col(
                        ColumnDef::new(DirectoryConfigs::UserIdAttribute)
                            .text()
                            .not_null()
                            .default("uid"),
                    )
                    .col(
                        ColumnDef::new(DirectoryConfigs::UserEmailAttribute)
                            .text()
                            .not_null()
                            .default("mail"),
                    )
                    .col(
                        ColumnDef::new(DirectoryConfigs::UserNameAttribute)
                            .text()
                            .not_null()
                            .default("cn"),
                    )
                    .col(
                        ColumnDef::new(DirectoryConfigs::SyncInterval)
                            .integer()
                            .not_null()
                            .default(30),
                    )
                    .col(
                        ColumnDef::new(DirectoryConfigs::LastSyncAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(DirectoryConfigs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(DirectoryConfigs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_directory_configs_tenant_id")
                            .from(DirectoryConfigs::Table, DirectoryConfigs::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // One configuration per tenant
        manager
            .create_index(
                Index::create()
                    .name("idx_directory_configs_tenant_id")
                    .table(DirectoryConfigs::Table)
                    .col(DirectoryConfigs::TenantId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_directory_configs_tenant_id")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(DirectoryConfigs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum DirectoryConfigs {
    Table,
    Id,
    TenantId,
    Enabled,
    ServerUrl,
    BindDn,
    BindPasswordCiphertext,
    BaseDn,
    UserFilter,
    UserIdAttribute,
    UserEmailAttribute,
    UserNameAttribute,
    SyncInterval,
    LastSyncAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Tenants {
    Table,
    Id,
}
