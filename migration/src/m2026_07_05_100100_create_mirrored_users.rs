//! Migration to create the mirrored_users table.
//!
//! One row per (tenant, remote uid) pair. Rows are created and refreshed by
//! reconciliation and flipped to disabled when the uid disappears upstream;
//! they are never deleted by sync.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(MirroredUsers::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MirroredUsers::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(MirroredUsers::TenantId).uuid().not_null())
                    .col(ColumnDef::new(MirroredUsers::RemoteUid).text().not_null())
                    .col(ColumnDef::new(MirroredUsers::Email).text().not_null())
                    .col(ColumnDef::new(MirroredUsers::DisplayName).text().not_null())
                    .col(ColumnDef::new(MirroredUsers::RemoteDn).text().not_null())
                    .col(
                        ColumnDef::new(MirroredUsers::Enabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(MirroredUsers::AccountId).uuid().null())
                    .col(
                        ColumnDef::new(MirroredUsers::LastSyncAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(MirroredUsers::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(MirroredUsers::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_mirrored_users_tenant_id")
                            .from(MirroredUsers::Table, MirroredUsers::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Remote uid uniqueness is scoped per tenant, not global
        manager
            .create_index(
                Index::create()
                    .name("idx_mirrored_users_tenant_remote_uid")
                    .table(MirroredUsers::Table)
                    .col(MirroredUsers::TenantId)
                    .col(MirroredUsers::RemoteUid)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_mirrored_users_tenant_id")
                    .table(MirroredUsers::Table)
                    .col(MirroredUsers::TenantId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_mirrored_users_account_id")
                    .table(MirroredUsers::Table)
                    .col(MirroredUsers::AccountId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_mirrored_users_tenant_remote_uid")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(Index::drop().name("idx_mirrored_users_tenant_id").to_owned())
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_mirrored_users_account_id")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(MirroredUsers::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum MirroredUsers {
    Table,
    Id,
    TenantId,
    RemoteUid,
    Email,
    DisplayName,
    RemoteDn,
    Enabled,
    AccountId,
    LastSyncAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Tenants {
    Table,
    Id,
}
