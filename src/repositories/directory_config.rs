//! Directory configuration repository
//!
//! Encapsulates reads and the administrative upsert for per-tenant directory
//! configurations. The repository owns the crypto key: bind passwords go in
//! encrypted and only come back out as [`ConnectionParams`] for the adapter.

use anyhow::{Result, anyhow};
use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::crypto::{CryptoError, CryptoKey, decrypt_bind_password, encrypt_bind_password};
use crate::directory::ConnectionParams;
use crate::models::directory_config::{self, Entity as DirectoryConfig};

/// Repository for directory configuration operations
#[derive(Debug, Clone)]
pub struct DirectoryConfigRepository {
    pub db: Arc<DatabaseConnection>,
    /// Crypto key for bind-password encryption
    pub crypto_key: CryptoKey,
}

/// Administrative create/update payload for a tenant's directory config.
///
/// `bind_password` may be omitted on update to keep the stored secret; it is
/// required when no config exists yet.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryConfigInput {
    pub enabled: bool,
    pub server_url: String,
    pub bind_dn: String,
    #[serde(default)]
    pub bind_password: Option<String>,
    pub base_dn: String,
    #[serde(default)]
    pub user_filter: Option<String>,
    #[serde(default)]
    pub user_id_attribute: Option<String>,
    #[serde(default)]
    pub user_email_attribute: Option<String>,
    #[serde(default)]
    pub user_name_attribute: Option<String>,
    #[serde(default)]
    pub sync_interval: Option<i32>,
}

/// Read model for the administrative surface. Deliberately carries no bind
/// password field in any form.
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryConfigView {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub enabled: bool,
    pub server_url: String,
    pub bind_dn: String,
    pub base_dn: String,
    pub user_filter: Option<String>,
    pub user_id_attribute: String,
    pub user_email_attribute: String,
    pub user_name_attribute: String,
    pub sync_interval: i32,
    pub last_sync_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

impl From<&directory_config::Model> for DirectoryConfigView {
    fn from(model: &directory_config::Model) -> Self {
        Self {
            id: model.id,
            tenant_id: model.tenant_id,
            enabled: model.enabled,
            server_url: model.server_url.clone(),
            bind_dn: model.bind_dn.clone(),
            base_dn: model.base_dn.clone(),
            user_filter: model.user_filter.clone(),
            user_id_attribute: model.user_id_attribute.clone(),
            user_email_attribute: model.user_email_attribute.clone(),
            user_name_attribute: model.user_name_attribute.clone(),
            sync_interval: model.sync_interval,
            last_sync_at: model.last_sync_at,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

impl DirectoryConfigRepository {
    pub fn new(db: Arc<DatabaseConnection>, crypto_key: CryptoKey) -> Self {
        Self { db, crypto_key }
    }

    /// Finds a tenant's config regardless of its enabled flag.
    pub async fn find_by_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<directory_config::Model>> {
        Ok(DirectoryConfig::find()
            .filter(directory_config::Column::TenantId.eq(tenant_id))
            .one(&*self.db)
            .await?)
    }

    /// Finds a tenant's enabled config. Absence means sync and auth are
    /// no-ops for the tenant.
    pub async fn find_enabled(&self, tenant_id: Uuid) -> Result<Option<directory_config::Model>> {
        Ok(DirectoryConfig::find()
            .filter(directory_config::Column::TenantId.eq(tenant_id))
            .filter(directory_config::Column::Enabled.eq(true))
            .one(&*self.db)
            .await?)
    }

    /// Lists all enabled configs across tenants, for the bulk sync loop.
    pub async fn find_all_enabled(&self) -> Result<Vec<directory_config::Model>> {
        Ok(DirectoryConfig::find()
            .filter(directory_config::Column::Enabled.eq(true))
            .all(&*self.db)
            .await?)
    }

    /// Creates or updates the tenant's single config row. Encrypts the bind
    /// password when one is supplied; on update, an omitted password keeps
    /// the stored ciphertext.
    pub async fn upsert(
        &self,
        tenant_id: Uuid,
        input: DirectoryConfigInput,
    ) -> Result<directory_config::Model> {
        url::Url::parse(&input.server_url)
            .map_err(|e| anyhow!("invalid server URL '{}': {}", input.server_url, e))?;

        let now: DateTimeWithTimeZone = Utc::now().into();
        let existing = self.find_by_tenant(tenant_id).await?;

        let id = match existing {
            Some(current) => {
                let mut model: directory_config::ActiveModel = current.into();
                model.enabled = Set(input.enabled);
                model.server_url = Set(input.server_url);
                model.bind_dn = Set(input.bind_dn);
                model.base_dn = Set(input.base_dn);
                model.user_filter = Set(input.user_filter);
                if let Some(password) = input.bind_password.as_deref() {
                    model.bind_password_ciphertext =
                        Set(encrypt_bind_password(&self.crypto_key, tenant_id, password)?);
                }
                if let Some(attr) = input.user_id_attribute {
                    model.user_id_attribute = Set(attr);
                }
                if let Some(attr) = input.user_email_attribute {
                    model.user_email_attribute = Set(attr);
                }
                if let Some(attr) = input.user_name_attribute {
                    model.user_name_attribute = Set(attr);
                }
                if let Some(interval) = input.sync_interval {
                    model.sync_interval = Set(interval);
                }
                model.updated_at = Set(now);

                let updated = model.update(&*self.db).await?;
                updated.id
            }
            None => {
                let password = input
                    .bind_password
                    .as_deref()
                    .ok_or_else(|| anyhow!("bind password is required for a new config"))?;

                let id = Uuid::new_v4();
                let model = directory_config::ActiveModel {
                    id: Set(id),
                    tenant_id: Set(tenant_id),
                    enabled: Set(input.enabled),
                    server_url: Set(input.server_url),
                    bind_dn: Set(input.bind_dn),
                    bind_password_ciphertext: Set(encrypt_bind_password(
                        &self.crypto_key,
                        tenant_id,
                        password,
                    )?),
                    base_dn: Set(input.base_dn),
                    user_filter: Set(input.user_filter),
                    user_id_attribute: Set(input
                        .user_id_attribute
                        .unwrap_or_else(|| "uid".to_string())),
                    user_email_attribute: Set(input
                        .user_email_attribute
                        .unwrap_or_else(|| "mail".to_string())),
                    user_name_attribute: Set(input
                        .user_name_attribute
                        .unwrap_or_else(|| "cn".to_string())),
                    sync_interval: Set(input.sync_interval.unwrap_or(30)),
                    last_sync_at: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                model.insert(&*self.db).await?;
                id
            }
        };

        // Query the record back so SQLite returns the same shape as Postgres
        let fetched = DirectoryConfig::find_by_id(id).one(&*self.db).await?;
        fetched.ok_or_else(|| anyhow!("directory config not persisted"))
    }

    /// Assembles adapter connection parameters, decrypting the bind password.
    pub fn connection_params(
        &self,
        config: &directory_config::Model,
    ) -> Result<ConnectionParams, CryptoError> {
        let bind_password = decrypt_bind_password(
            &self.crypto_key,
            config.tenant_id,
            &config.bind_password_ciphertext,
        )?;

        Ok(ConnectionParams {
            server_url: config.server_url.clone(),
            bind_dn: config.bind_dn.clone(),
            bind_password,
            base_dn: config.base_dn.clone(),
            user_filter: config.user_filter.clone(),
            user_id_attribute: config.user_id_attribute.clone(),
            user_email_attribute: config.user_email_attribute.clone(),
            user_name_attribute: config.user_name_attribute.clone(),
        })
    }
}
