//! Mirrored user repository
//!
//! Tenant-scoped access to the local directory mirror: listing with
//! page/limit pagination for the admin surface, the enabled-user lookup used
//! by authentication, the administrative enable/disable override, and
//! aggregate counts.

use anyhow::{Result, anyhow};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::mirrored_user::{self, Entity as MirroredUser};

/// Repository for mirrored user database operations
#[derive(Debug, Clone)]
pub struct MirroredUserRepository {
    pub db: Arc<DatabaseConnection>,
}

/// One page of mirrored users, 1-indexed.
#[derive(Debug, Serialize)]
pub struct MirroredUserPage {
    pub users: Vec<mirrored_user::Model>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub has_more: bool,
}

impl MirroredUserRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// All mirror rows for a tenant, enabled or not.
    pub async fn find_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<mirrored_user::Model>> {
        Ok(MirroredUser::find()
            .filter(mirrored_user::Column::TenantId.eq(tenant_id))
            .order_by_asc(mirrored_user::Column::CreatedAt)
            .order_by_asc(mirrored_user::Column::Id)
            .all(&*self.db)
            .await?)
    }

    /// Finds a mirror row by its per-tenant remote uid.
    pub async fn find_by_uid(
        &self,
        tenant_id: Uuid,
        remote_uid: &str,
    ) -> Result<Option<mirrored_user::Model>> {
        Ok(MirroredUser::find()
            .filter(mirrored_user::Column::TenantId.eq(tenant_id))
            .filter(mirrored_user::Column::RemoteUid.eq(remote_uid))
            .one(&*self.db)
            .await?)
    }

    /// Finds the enabled mirror row for a login email. When several enabled
    /// rows share an email the oldest wins, deterministically.
    pub async fn find_enabled_by_email(
        &self,
        tenant_id: Uuid,
        email: &str,
    ) -> Result<Option<mirrored_user::Model>> {
        Ok(MirroredUser::find()
            .filter(mirrored_user::Column::TenantId.eq(tenant_id))
            .filter(mirrored_user::Column::Email.eq(email))
            .filter(mirrored_user::Column::Enabled.eq(true))
            .order_by_asc(mirrored_user::Column::CreatedAt)
            .order_by_asc(mirrored_user::Column::Id)
            .one(&*self.db)
            .await?)
    }

    /// Lists mirrored users for a tenant with 1-indexed page/limit
    /// pagination, optionally restricted to enabled rows.
    pub async fn list(
        &self,
        tenant_id: Uuid,
        enabled_only: bool,
        page: u64,
        limit: u64,
    ) -> Result<MirroredUserPage> {
        let page = page.max(1);
        let limit = limit.max(1);

        let mut query = MirroredUser::find()
            .filter(mirrored_user::Column::TenantId.eq(tenant_id));
        if enabled_only {
            query = query.filter(mirrored_user::Column::Enabled.eq(true));
        }

        let paginator = query
            .order_by_asc(mirrored_user::Column::DisplayName)
            .order_by_asc(mirrored_user::Column::Id)
            .paginate(&*self.db, limit);

        let total = paginator.num_items().await?;
        let users = paginator.fetch_page(page - 1).await?;

        Ok(MirroredUserPage {
            users,
            total,
            page,
            limit,
            has_more: page * limit < total,
        })
    }

    /// Administrative override of one mirror row's enabled flag, independent
    /// of sync.
    pub async fn set_enabled(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        enabled: bool,
    ) -> Result<mirrored_user::Model> {
        let existing = MirroredUser::find_by_id(id)
            .filter(mirrored_user::Column::TenantId.eq(tenant_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| anyhow!("Mirrored user '{}' not found for tenant", id))?;

        let mut model: mirrored_user::ActiveModel = existing.into();
        model.enabled = Set(enabled);
        model.updated_at = Set(Utc::now().into());

        Ok(model.update(&*self.db).await?)
    }

    /// Returns `(total, enabled)` row counts for a tenant.
    pub async fn counts(&self, tenant_id: Uuid) -> Result<(u64, u64)> {
        let total = MirroredUser::find()
            .filter(mirrored_user::Column::TenantId.eq(tenant_id))
            .count(&*self.db)
            .await?;

        let enabled = MirroredUser::find()
            .filter(mirrored_user::Column::TenantId.eq(tenant_id))
            .filter(mirrored_user::Column::Enabled.eq(true))
            .count(&*self.db)
            .await?;

        Ok((total, enabled))
    }
}
