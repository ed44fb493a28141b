//! # Identity Bridge
//!
//! Bridges authenticated directory identities to local account records. A
//! login is verified by binding against the directory with the mirrored
//! user's stored distinguished name; the local account is then resolved by
//! link, by email, or provisioned first-time, all inside one transaction so
//! no half-linked state survives a failure.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::directory::DirectoryClient;
use crate::error::ServiceError;
use crate::models::account::{self, Entity as Account};
use crate::models::directory_config::{self, Entity as DirectoryConfig};
use crate::models::mirrored_user::{self, Entity as MirroredUser};
use crate::models::tenant_membership;
use crate::models::{ACCOUNT_STATUS_ACTIVE, MEMBERSHIP_ROLE_NORMAL};

/// Authenticates directory users and resolves their local accounts.
pub struct IdentityBridge {
    db: Arc<DatabaseConnection>,
    directory: Arc<dyn DirectoryClient>,
}

impl IdentityBridge {
    pub fn new(db: Arc<DatabaseConnection>, directory: Arc<dyn DirectoryClient>) -> Self {
        Self { db, directory }
    }

    /// Authenticate a directory user by email and password, returning the
    /// linked (or newly provisioned) local account.
    ///
    /// Disabled mirrored users cannot authenticate regardless of password
    /// correctness; they yield [`ServiceError::UserNotFound`].
    #[instrument(skip(self, password))]
    pub async fn authenticate(
        &self,
        tenant_id: Uuid,
        email: &str,
        password: &str,
    ) -> Result<account::Model, ServiceError> {
        let config = DirectoryConfig::find()
            .filter(directory_config::Column::TenantId.eq(tenant_id))
            .filter(directory_config::Column::Enabled.eq(true))
            .one(&*self.db)
            .await?
            .ok_or(ServiceError::ConfigNotFound { tenant_id })?;

        let user = MirroredUser::find()
            .filter(mirrored_user::Column::TenantId.eq(tenant_id))
            .filter(mirrored_user::Column::Email.eq(email))
            .filter(mirrored_user::Column::Enabled.eq(true))
            .order_by_asc(mirrored_user::Column::CreatedAt)
            .order_by_asc(mirrored_user::Column::Id)
            .one(&*self.db)
            .await?
            .ok_or(ServiceError::UserNotFound)?;

        // Verify the password with an end-user bind against the stored DN,
        // never with the tenant's admin credentials.
        if let Err(err) = self
            .directory
            .bind_as(&config.server_url, &user.remote_dn, password)
            .await
        {
            warn!(
                tenant_id = %tenant_id,
                email = %email,
                error = %err,
                "Directory bind rejected"
            );
            return Err(ServiceError::Auth);
        }

        self.resolve_account(&user).await
    }

    /// Resolve the local account for an authenticated mirrored user: existing
    /// link, email match, or first-time provisioning, in that order. All
    /// writes commit together.
    async fn resolve_account(
        &self,
        user: &mirrored_user::Model,
    ) -> Result<account::Model, ServiceError> {
        let now: DateTimeWithTimeZone = Utc::now().into();
        let txn = self.db.begin().await?;

        if let Some(account_id) = user.account_id {
            match Account::find_by_id(account_id).one(&txn).await? {
                Some(account) => {
                    txn.commit().await?;
                    return Ok(account);
                }
                None => {
                    // The linked account vanished; re-resolve instead of
                    // failing the login on a dangling reference.
                    warn!(
                        tenant_id = %user.tenant_id,
                        mirrored_user_id = %user.id,
                        account_id = %account_id,
                        "Linked account no longer exists, re-resolving"
                    );
                }
            }
        }

        if let Some(existing) = Account::find()
            .filter(account::Column::Email.eq(user.email.as_str()))
            .one(&txn)
            .await?
        {
            link_user(&txn, user, existing.id, now).await?;
            txn.commit().await?;
            info!(
                tenant_id = %user.tenant_id,
                mirrored_user_id = %user.id,
                account_id = %existing.id,
                "Linked mirrored user to existing account"
            );
            return Ok(existing);
        }

        // First-time provisioning: account, lowest-privilege membership, and
        // the mirror link land in the same transaction.
        let account_id = Uuid::new_v4();
        let account_model = account::ActiveModel {
            id: Set(account_id),
            name: Set(user.display_name.clone()),
            email: Set(user.email.clone()),
            status: Set(ACCOUNT_STATUS_ACTIVE.to_string()),
            initialized_at: Set(Some(now)),
            created_at: Set(now),
            updated_at: Set(now),
        };
        account_model.insert(&txn).await?;

        let membership = tenant_membership::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(user.tenant_id),
            account_id: Set(account_id),
            role: Set(MEMBERSHIP_ROLE_NORMAL.to_string()),
            created_at: Set(now),
        };
        membership.insert(&txn).await?;

        link_user(&txn, user, account_id, now).await?;

        let account = Account::find_by_id(account_id)
            .one(&txn)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound("account not persisted".to_string()))?;

        txn.commit().await?;

        info!(
            tenant_id = %user.tenant_id,
            mirrored_user_id = %user.id,
            account_id = %account_id,
            "Provisioned new account for directory user"
        );

        Ok(account)
    }
}

async fn link_user<C: ConnectionTrait>(
    conn: &C,
    user: &mirrored_user::Model,
    account_id: Uuid,
    now: DateTimeWithTimeZone,
) -> Result<(), DbErr> {
    let mut model: mirrored_user::ActiveModel = user.clone().into();
    model.account_id = Set(Some(account_id));
    model.updated_at = Set(now);
    model.update(conn).await?;
    Ok(())
}
