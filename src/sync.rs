//! # Reconciliation Engine
//!
//! Diffs a freshly fetched remote user set against the local mirror and
//! applies create/update/disable transitions for one tenant as a single
//! transaction. A fetch failure aborts the run with no mutation; a mid-apply
//! failure rolls everything back, so a run is all-or-nothing per tenant.
//!
//! Counting semantics: `updated` means "touched". Every existing row
//! refreshed by a fetch counts, including rows that were disabled and came
//! back; `created` and `disabled` only count actual transitions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use chrono::Utc;
use metrics::{counter, histogram};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    Set, TransactionTrait,
};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::crypto::CryptoKey;
use crate::directory::{ConnectionTest, DirectoryClient, RemoteUserRecord};
use crate::error::ServiceError;
use crate::models::directory_config::{self, Entity as DirectoryConfig};
use crate::models::mirrored_user::{self, Entity as MirroredUser};
use crate::repositories::DirectoryConfigRepository;

/// Counts from one reconciliation run. Transient, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    /// Valid records in the remote fetch
    pub total: u64,
    pub created: u64,
    pub updated: u64,
    pub disabled: u64,
}

/// Aggregate mirror statistics for the administrative surface.
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryStats {
    pub total_users: u64,
    pub enabled_users: u64,
    pub disabled_users: u64,
    pub last_sync_at: Option<DateTimeWithTimeZone>,
    pub sync_interval: i32,
}

/// Per-tenant serialization of reconciliation runs.
///
/// At most one reconciliation is in flight per tenant; different tenants
/// proceed concurrently. This is an in-process primitive; a multi-replica
/// deployment would key a database advisory lock by tenant id instead.
#[derive(Clone, Default)]
pub struct TenantLocks {
    inner: Arc<StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl TenantLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for and holds the tenant's lock until the guard drops.
    pub async fn acquire(&self, tenant_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().expect("tenant lock map poisoned");
            map.entry(tenant_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Reconciliation engine plus the sync-adjacent administrative operations
/// (connection test, aggregate stats).
pub struct SyncService {
    db: Arc<DatabaseConnection>,
    directory: Arc<dyn DirectoryClient>,
    configs: DirectoryConfigRepository,
    locks: TenantLocks,
}

impl SyncService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        directory: Arc<dyn DirectoryClient>,
        crypto_key: CryptoKey,
    ) -> Self {
        let configs = DirectoryConfigRepository::new(db.clone(), crypto_key);
        Self {
            db,
            directory,
            configs,
            locks: TenantLocks::new(),
        }
    }

    /// Reconcile one tenant's mirror against the remote directory.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, tenant_id: Uuid) -> Result<SyncStats, ServiceError> {
        let _guard = self.locks.acquire(tenant_id).await;
        let started = std::time::Instant::now();

        let config = self.load_enabled_config(tenant_id).await?;
        let params = self.configs.connection_params(&config)?;

        // A fetch failure aborts here, before any mirror mutation.
        let remote_users = self.directory.fetch_users(&params).await?;

        let stats = self.apply(&config, remote_users).await?;

        let elapsed = started.elapsed();
        let labels = vec![("tenant_id", tenant_id.to_string())];
        counter!("directory_sync_runs_total", &labels).increment(1);
        histogram!("directory_sync_duration_ms", &labels)
            .record(elapsed.as_secs_f64() * 1_000.0);

        info!(
            tenant_id = %tenant_id,
            total = stats.total,
            created = stats.created,
            updated = stats.updated,
            disabled = stats.disabled,
            elapsed_ms = elapsed.as_millis() as u64,
            "Directory sync completed"
        );

        Ok(stats)
    }

    /// Apply one fetched user set to the mirror in a single transaction.
    async fn apply(
        &self,
        config: &directory_config::Model,
        remote_users: Vec<RemoteUserRecord>,
    ) -> Result<SyncStats, ServiceError> {
        let tenant_id = config.tenant_id;
        let now: DateTimeWithTimeZone = Utc::now().into();

        let mut stats = SyncStats {
            total: remote_users.len() as u64,
            ..SyncStats::default()
        };

        let txn = self.db.begin().await?;

        let existing = MirroredUser::find()
            .filter(mirrored_user::Column::TenantId.eq(tenant_id))
            .all(&txn)
            .await?;
        let mut by_uid: HashMap<String, mirrored_user::Model> = existing
            .into_iter()
            .map(|user| (user.remote_uid.clone(), user))
            .collect();

        let mut seen_uids: HashSet<String> = HashSet::with_capacity(remote_users.len());

        for record in remote_users {
            if !seen_uids.insert(record.uid.clone()) {
                // uid is the sole identity key per tenant; a second entry for
                // the same uid in one fetch would violate the unique index.
                warn!(
                    tenant_id = %tenant_id,
                    uid = %record.uid,
                    "Duplicate uid in remote fetch, keeping first occurrence"
                );
                continue;
            }

            match by_uid.remove(&record.uid) {
                Some(current) => {
                    // Existing uid: overwrite content in place, even when the
                    // email changed, and re-enable if it was disabled.
                    let mut model: mirrored_user::ActiveModel = current.into();
                    model.email = Set(record.email);
                    model.display_name = Set(record.display_name);
                    model.remote_dn = Set(record.dn);
                    model.enabled = Set(true);
                    model.last_sync_at = Set(now);
                    model.updated_at = Set(now);
                    model.update(&txn).await?;
                    stats.updated += 1;
                }
                None => {
                    let model = mirrored_user::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        tenant_id: Set(tenant_id),
                        remote_uid: Set(record.uid),
                        email: Set(record.email),
                        display_name: Set(record.display_name),
                        remote_dn: Set(record.dn),
                        enabled: Set(true),
                        account_id: Set(None),
                        last_sync_at: Set(now),
                        created_at: Set(now),
                        updated_at: Set(now),
                    };
                    model.insert(&txn).await?;
                    stats.created += 1;
                }
            }
        }

        // Whatever is left in the map was absent upstream. Disable, never
        // delete; already-disabled rows are left untouched.
        for stale in by_uid.into_values() {
            if !stale.enabled {
                continue;
            }
            let mut model: mirrored_user::ActiveModel = stale.into();
            model.enabled = Set(false);
            model.updated_at = Set(now);
            model.update(&txn).await?;
            stats.disabled += 1;
        }

        let mut config_model: directory_config::ActiveModel = config.clone().into();
        config_model.last_sync_at = Set(Some(now));
        config_model.updated_at = Set(now);
        config_model.update(&txn).await?;

        txn.commit().await?;

        Ok(stats)
    }

    /// Attempt the admin bind for a tenant's config. Directory failures are
    /// reported in the result, not as errors.
    pub async fn test_connection(&self, tenant_id: Uuid) -> Result<ConnectionTest, ServiceError> {
        let config = self.load_enabled_config(tenant_id).await?;
        let params = self.configs.connection_params(&config)?;
        Ok(self.directory.test_connection(&params).await)
    }

    /// Aggregate mirror statistics for a tenant.
    pub async fn stats(&self, tenant_id: Uuid) -> Result<DirectoryStats, ServiceError> {
        let config = DirectoryConfig::find()
            .filter(directory_config::Column::TenantId.eq(tenant_id))
            .one(&*self.db)
            .await?
            .ok_or(ServiceError::ConfigNotFound { tenant_id })?;

        let total_users = MirroredUser::find()
            .filter(mirrored_user::Column::TenantId.eq(tenant_id))
            .count(&*self.db)
            .await?;
        let enabled_users = MirroredUser::find()
            .filter(mirrored_user::Column::TenantId.eq(tenant_id))
            .filter(mirrored_user::Column::Enabled.eq(true))
            .count(&*self.db)
            .await?;

        Ok(DirectoryStats {
            total_users,
            enabled_users,
            disabled_users: total_users - enabled_users,
            last_sync_at: config.last_sync_at,
            sync_interval: config.sync_interval,
        })
    }

    async fn load_enabled_config(
        &self,
        tenant_id: Uuid,
    ) -> Result<directory_config::Model, ServiceError> {
        DirectoryConfig::find()
            .filter(directory_config::Column::TenantId.eq(tenant_id))
            .filter(directory_config::Column::Enabled.eq(true))
            .one(&*self.db)
            .await?
            .ok_or(ServiceError::ConfigNotFound { tenant_id })
    }
}
