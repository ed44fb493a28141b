//! Test utilities for database and directory-stub setup.
//!
//! Provides an in-memory SQLite database with migrations applied, fixture
//! helpers for tenants and mirror rows, and a configurable stub directory
//! client so engine tests run without a live LDAP server.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ActiveModelTrait, Database, DatabaseConnection, Set};
use uuid::Uuid;

use dirsync::crypto::CryptoKey;
use dirsync::directory::{
    ConnectionParams, ConnectionTest, DirectoryClient, DirectoryError, RemoteUserRecord,
};
use dirsync::models::{mirrored_user, tenant};
use dirsync::repositories::DirectoryConfigInput;

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<Arc<DatabaseConnection>> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(Arc::new(db))
}

/// Fixed 32-byte key shared by fixtures and assertions.
#[allow(dead_code)]
pub fn test_crypto_key() -> CryptoKey {
    CryptoKey::new(vec![5u8; 32]).unwrap()
}

/// Creates a tenant row and returns its id.
pub async fn create_test_tenant(db: &DatabaseConnection) -> Result<Uuid> {
    let id = Uuid::new_v4();
    tenant::ActiveModel {
        id: Set(id),
        name: Set(Some("Test Tenant".to_string())),
        created_at: Set(Utc::now().into()),
    }
    .insert(db)
    .await?;
    Ok(id)
}

/// A config input pointing at a nominal directory server.
#[allow(dead_code)]
pub fn directory_config_input() -> DirectoryConfigInput {
    DirectoryConfigInput {
        enabled: true,
        server_url: "ldap://directory.example.com:389".to_string(),
        bind_dn: "cn=admin,dc=example,dc=com".to_string(),
        bind_password: Some("admin-secret".to_string()),
        base_dn: "ou=people,dc=example,dc=com".to_string(),
        user_filter: None,
        user_id_attribute: None,
        user_email_attribute: None,
        user_name_attribute: None,
        sync_interval: None,
    }
}

/// Inserts a mirror row directly, bypassing the engine.
#[allow(dead_code)]
pub async fn insert_mirrored_user(
    db: &DatabaseConnection,
    tenant_id: Uuid,
    uid: &str,
    email: &str,
    enabled: bool,
    account_id: Option<Uuid>,
) -> Result<mirrored_user::Model> {
    let now = Utc::now();
    let model = mirrored_user::ActiveModel {
        id: Set(Uuid::new_v4()),
        tenant_id: Set(tenant_id),
        remote_uid: Set(uid.to_string()),
        email: Set(email.to_string()),
        display_name: Set(format!("User {uid}")),
        remote_dn: Set(format!("uid={uid},ou=people,dc=example,dc=com")),
        enabled: Set(enabled),
        account_id: Set(account_id),
        last_sync_at: Set(now.into()),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    };
    Ok(model.insert(db).await?)
}

/// Builds a remote record the way the LDAP adapter would.
#[allow(dead_code)]
pub fn remote_user(uid: &str, email: &str, name: &str) -> RemoteUserRecord {
    RemoteUserRecord {
        uid: uid.to_string(),
        email: email.to_string(),
        display_name: name.to_string(),
        dn: format!("uid={uid},ou=people,dc=example,dc=com"),
    }
}

/// Configurable stub directory client.
///
/// Returns the configured user set from `fetch_users` unless a fetch error is
/// armed, and accepts every bind unless a bind error is armed.
#[derive(Default)]
pub struct StubDirectory {
    users: Mutex<Vec<RemoteUserRecord>>,
    fetch_error: Mutex<Option<DirectoryError>>,
    bind_error: Mutex<Option<DirectoryError>>,
}

impl StubDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[allow(dead_code)]
    pub fn set_users(&self, users: Vec<RemoteUserRecord>) {
        *self.users.lock().unwrap() = users;
    }

    #[allow(dead_code)]
    pub fn fail_fetch_with(&self, err: DirectoryError) {
        *self.fetch_error.lock().unwrap() = Some(err);
    }

    #[allow(dead_code)]
    pub fn clear_fetch_error(&self) {
        *self.fetch_error.lock().unwrap() = None;
    }

    #[allow(dead_code)]
    pub fn reject_bind(&self) {
        *self.bind_error.lock().unwrap() = Some(DirectoryError::InvalidCredentials);
    }
}

#[async_trait]
impl DirectoryClient for StubDirectory {
    async fn fetch_users(
        &self,
        _params: &ConnectionParams,
    ) -> Result<Vec<RemoteUserRecord>, DirectoryError> {
        if let Some(err) = self.fetch_error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self.users.lock().unwrap().clone())
    }

    async fn test_connection(&self, _params: &ConnectionParams) -> ConnectionTest {
        ConnectionTest {
            success: true,
            message: "connection successful".to_string(),
        }
    }

    async fn bind_as(
        &self,
        _server_url: &str,
        _dn: &str,
        _password: &str,
    ) -> Result<(), DirectoryError> {
        match self.bind_error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
