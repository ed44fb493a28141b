//! Reconciliation engine integration tests against in-memory SQLite.

mod test_utils;

use std::sync::Arc;

use anyhow::Result;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

use dirsync::directory::DirectoryError;
use dirsync::error::ServiceError;
use dirsync::models::mirrored_user::{self, Entity as MirroredUser};
use dirsync::models::directory_config::Entity as DirectoryConfig;
use dirsync::repositories::DirectoryConfigRepository;
use dirsync::sync::SyncService;

use test_utils::{
    StubDirectory, create_test_tenant, directory_config_input, remote_user, setup_test_db,
    test_crypto_key,
};

struct Harness {
    db: Arc<sea_orm::DatabaseConnection>,
    directory: Arc<StubDirectory>,
    sync: SyncService,
    tenant_id: Uuid,
}

async fn harness() -> Result<Harness> {
    let db = setup_test_db().await?;
    let tenant_id = create_test_tenant(&db).await?;

    let repo = DirectoryConfigRepository::new(db.clone(), test_crypto_key());
    repo.upsert(tenant_id, directory_config_input()).await?;

    let directory = StubDirectory::new();
    let sync = SyncService::new(db.clone(), directory.clone(), test_crypto_key());

    Ok(Harness {
        db,
        directory,
        sync,
        tenant_id,
    })
}

async fn mirror_rows(h: &Harness) -> Result<Vec<mirrored_user::Model>> {
    let mut rows = MirroredUser::find()
        .filter(mirrored_user::Column::TenantId.eq(h.tenant_id))
        .all(&*h.db)
        .await?;
    rows.sort_by(|a, b| a.remote_uid.cmp(&b.remote_uid));
    Ok(rows)
}

#[tokio::test]
async fn initial_sync_creates_mirror_rows() -> Result<()> {
    let h = harness().await?;
    h.directory.set_users(vec![
        remote_user("jdoe", "jdoe@example.com", "Jane Doe"),
        remote_user("asmith", "asmith@example.com", "Alan Smith"),
    ]);

    let stats = h.sync.reconcile(h.tenant_id).await?;

    assert_eq!(stats.total, 2);
    assert_eq!(stats.created, 2);
    assert_eq!(stats.updated, 0);
    assert_eq!(stats.disabled, 0);

    let rows = mirror_rows(&h).await?;
    assert_eq!(rows.len(), 2);
    let jdoe = rows.iter().find(|u| u.remote_uid == "jdoe").unwrap();
    assert!(jdoe.enabled);
    assert_eq!(jdoe.email, "jdoe@example.com");
    assert_eq!(jdoe.display_name, "Jane Doe");
    assert_eq!(jdoe.remote_dn, "uid=jdoe,ou=people,dc=example,dc=com");
    assert!(jdoe.account_id.is_none());

    Ok(())
}

#[tokio::test]
async fn second_run_with_unchanged_remote_is_idempotent() -> Result<()> {
    let h = harness().await?;
    h.directory.set_users(vec![
        remote_user("jdoe", "jdoe@example.com", "Jane Doe"),
        remote_user("asmith", "asmith@example.com", "Alan Smith"),
    ]);

    h.sync.reconcile(h.tenant_id).await?;
    let stats = h.sync.reconcile(h.tenant_id).await?;

    // Existing rows are "touched", not recreated.
    assert_eq!(stats.created, 0);
    assert_eq!(stats.disabled, 0);
    assert_eq!(stats.updated, 2);
    assert_eq!(mirror_rows(&h).await?.len(), 2);

    Ok(())
}

#[tokio::test]
async fn vanished_uid_is_disabled_never_deleted() -> Result<()> {
    let h = harness().await?;
    h.directory.set_users(vec![
        remote_user("jdoe", "jdoe@example.com", "Jane Doe"),
        remote_user("asmith", "asmith@example.com", "Alan Smith"),
    ]);
    h.sync.reconcile(h.tenant_id).await?;

    // Simulate an existing account link that must survive the disable.
    let linked_account = Uuid::new_v4();
    let rows = mirror_rows(&h).await?;
    let jdoe = rows.iter().find(|u| u.remote_uid == "jdoe").unwrap().clone();
    let mut model: mirrored_user::ActiveModel = jdoe.into();
    model.account_id = sea_orm::Set(Some(linked_account));
    sea_orm::ActiveModelTrait::update(model, &*h.db).await?;

    h.directory
        .set_users(vec![remote_user("asmith", "asmith@example.com", "Alan Smith")]);
    let stats = h.sync.reconcile(h.tenant_id).await?;

    assert_eq!(stats.total, 1);
    assert_eq!(stats.disabled, 1);

    // The row count never decreases; the vanished row is disabled in place
    // with its account link intact.
    let rows = mirror_rows(&h).await?;
    assert_eq!(rows.len(), 2);
    let jdoe = rows.iter().find(|u| u.remote_uid == "jdoe").unwrap();
    assert!(!jdoe.enabled);
    assert_eq!(jdoe.account_id, Some(linked_account));

    Ok(())
}

#[tokio::test]
async fn already_disabled_uid_is_not_counted_again() -> Result<()> {
    let h = harness().await?;
    h.directory
        .set_users(vec![remote_user("jdoe", "jdoe@example.com", "Jane Doe")]);
    h.sync.reconcile(h.tenant_id).await?;

    h.directory.set_users(vec![]);
    let first = h.sync.reconcile(h.tenant_id).await?;
    assert_eq!(first.disabled, 1);

    let second = h.sync.reconcile(h.tenant_id).await?;
    assert_eq!(second.disabled, 0);

    Ok(())
}

#[tokio::test]
async fn reappearing_uid_is_reenabled_and_counted_as_updated() -> Result<()> {
    let h = harness().await?;
    h.directory
        .set_users(vec![remote_user("jdoe", "jdoe@example.com", "Jane Doe")]);
    h.sync.reconcile(h.tenant_id).await?;

    h.directory.set_users(vec![]);
    h.sync.reconcile(h.tenant_id).await?;

    h.directory
        .set_users(vec![remote_user("jdoe", "jdoe@example.com", "Jane Doe")]);
    let stats = h.sync.reconcile(h.tenant_id).await?;

    assert_eq!(stats.created, 0);
    assert_eq!(stats.updated, 1);

    let rows = mirror_rows(&h).await?;
    assert_eq!(rows.len(), 1);
    assert!(rows[0].enabled);

    Ok(())
}

#[tokio::test]
async fn email_change_updates_the_row_in_place() -> Result<()> {
    let h = harness().await?;
    h.directory
        .set_users(vec![remote_user("jdoe", "jdoe@example.com", "Jane Doe")]);
    h.sync.reconcile(h.tenant_id).await?;

    // uid is the identity key; a new email must not create a second row.
    h.directory
        .set_users(vec![remote_user("jdoe", "jane.doe@example.com", "Jane Doe")]);
    let stats = h.sync.reconcile(h.tenant_id).await?;

    assert_eq!(stats.created, 0);
    assert_eq!(stats.updated, 1);

    let rows = mirror_rows(&h).await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].email, "jane.doe@example.com");

    Ok(())
}

#[tokio::test]
async fn fetch_failure_aborts_without_touching_the_mirror() -> Result<()> {
    let h = harness().await?;
    h.directory.set_users(vec![
        remote_user("jdoe", "jdoe@example.com", "Jane Doe"),
        remote_user("asmith", "asmith@example.com", "Alan Smith"),
    ]);
    h.sync.reconcile(h.tenant_id).await?;
    let before = mirror_rows(&h).await?;

    h.directory.fail_fetch_with(DirectoryError::Connection {
        details: "connection reset".to_string(),
    });
    let err = h.sync.reconcile(h.tenant_id).await.unwrap_err();
    assert!(matches!(err, ServiceError::Connection(_)));

    let after = mirror_rows(&h).await?;
    assert_eq!(before, after);

    Ok(())
}

#[tokio::test]
async fn search_failure_propagates_as_search_error() -> Result<()> {
    let h = harness().await?;
    h.directory.fail_fetch_with(DirectoryError::Search {
        details: "bad filter".to_string(),
    });

    let err = h.sync.reconcile(h.tenant_id).await.unwrap_err();
    assert!(matches!(err, ServiceError::Search(_)));

    Ok(())
}

#[tokio::test]
async fn missing_config_yields_config_not_found() -> Result<()> {
    let db = setup_test_db().await?;
    let tenant_id = create_test_tenant(&db).await?;

    let sync = SyncService::new(db, StubDirectory::new(), test_crypto_key());
    let err = sync.reconcile(tenant_id).await.unwrap_err();
    assert!(matches!(err, ServiceError::ConfigNotFound { .. }));

    Ok(())
}

#[tokio::test]
async fn disabled_config_yields_config_not_found() -> Result<()> {
    let h = harness().await?;

    let mut input = directory_config_input();
    input.enabled = false;
    let repo = DirectoryConfigRepository::new(h.db.clone(), test_crypto_key());
    repo.upsert(h.tenant_id, input).await?;

    let err = h.sync.reconcile(h.tenant_id).await.unwrap_err();
    assert!(matches!(err, ServiceError::ConfigNotFound { .. }));

    Ok(())
}

#[tokio::test]
async fn duplicate_uid_in_one_fetch_keeps_the_first_occurrence() -> Result<()> {
    let h = harness().await?;
    h.directory.set_users(vec![
        remote_user("jdoe", "jdoe@example.com", "Jane Doe"),
        remote_user("jdoe", "other@example.com", "Impostor"),
    ]);

    let stats = h.sync.reconcile(h.tenant_id).await?;
    assert_eq!(stats.created, 1);

    let rows = mirror_rows(&h).await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].email, "jdoe@example.com");

    Ok(())
}

#[tokio::test]
async fn successful_run_stamps_config_last_sync_at() -> Result<()> {
    let h = harness().await?;
    h.directory
        .set_users(vec![remote_user("jdoe", "jdoe@example.com", "Jane Doe")]);

    let before = DirectoryConfig::find().one(&*h.db).await?.unwrap();
    assert!(before.last_sync_at.is_none());

    h.sync.reconcile(h.tenant_id).await?;

    let after = DirectoryConfig::find().one(&*h.db).await?.unwrap();
    assert!(after.last_sync_at.is_some());

    Ok(())
}
