//! # Sync Scheduler
//!
//! Background loop that reconciles every enabled tenant on its configured
//! interval. One tenant's failure never stops the loop: errors are counted,
//! logged, and put on an exponential backoff with jitter so a broken
//! directory does not get hammered every tick. Each tenant's sync runs under
//! a caller-side timeout; a timed-out tenant cannot stall the others.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, gauge, histogram};
use rand::Rng;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use tokio::time::{Duration as TokioDuration, Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::config::{AppConfig, SchedulerConfig};
use crate::error::ServiceError;
use crate::models::directory_config::{self, Entity as DirectoryConfig};
use crate::sync::SyncService;

/// Background scheduler service.
pub struct SyncScheduler {
    config: Arc<AppConfig>,
    db: Arc<DatabaseConnection>,
    sync: Arc<SyncService>,
    backoff: StdMutex<HashMap<Uuid, FailureState>>,
}

/// Per-run summary of one scheduler tick.
#[derive(Debug, Default)]
pub struct TickSummary {
    pub tenants_polled: u64,
    pub tenants_synced: u64,
    pub users_seen: u64,
    pub tenants_skipped_not_due: u64,
    pub tenants_in_backoff: u64,
    pub tenants_with_errors: u64,
}

#[derive(Debug, Clone)]
struct FailureState {
    failures: i32,
    retry_after: DateTime<Utc>,
}

impl SyncScheduler {
    /// Create a new scheduler instance.
    pub fn new(config: Arc<AppConfig>, db: Arc<DatabaseConnection>, sync: Arc<SyncService>) -> Self {
        Self {
            config,
            db,
            sync,
            backoff: StdMutex::new(HashMap::new()),
        }
    }

    /// Run the scheduler loop until the provided shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Starting directory sync scheduler");
        let tick_interval = TokioDuration::from_secs(self.config.scheduler.tick_interval_seconds);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Directory sync scheduler shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    let tick_started = Instant::now();
                    if let Err(err) = self.tick().await {
                        error!(error = ?err, "Scheduler tick failed");
                    }
                    let elapsed = tick_started.elapsed();
                    histogram!("directory_sync_tick_duration_ms")
                        .record(elapsed.as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Directory sync scheduler stopped");
    }

    /// One pass over all enabled tenant configs.
    pub async fn tick(&self) -> Result<TickSummary, ServiceError> {
        let now = Utc::now();
        let mut summary = TickSummary::default();

        let configs = DirectoryConfig::find()
            .filter(directory_config::Column::Enabled.eq(true))
            .all(&*self.db)
            .await?;

        gauge!("directory_sync_enabled_tenants").set(configs.len() as f64);

        let sync_timeout = TokioDuration::from_secs(self.config.scheduler.sync_timeout_seconds);

        for config in configs {
            summary.tenants_polled += 1;
            let tenant_id = config.tenant_id;

            if self.in_backoff(tenant_id, now) {
                summary.tenants_in_backoff += 1;
                debug!(tenant_id = %tenant_id, "Skipping tenant in failure backoff");
                continue;
            }

            if !is_due(&config, now) {
                summary.tenants_skipped_not_due += 1;
                continue;
            }

            match timeout(sync_timeout, self.sync.reconcile(tenant_id)).await {
                Ok(Ok(stats)) => {
                    self.clear_failure(tenant_id);
                    summary.tenants_synced += 1;
                    summary.users_seen += stats.total;
                }
                Ok(Err(err)) => {
                    summary.tenants_with_errors += 1;
                    let retry_after = self.record_failure(tenant_id, now);
                    let labels = vec![("tenant_id", tenant_id.to_string())];
                    counter!("directory_sync_errors_total", &labels).increment(1);
                    error!(
                        tenant_id = %tenant_id,
                        error = %err,
                        retry_after = %retry_after,
                        "Tenant sync failed, continuing with remaining tenants"
                    );
                }
                Err(_elapsed) => {
                    summary.tenants_with_errors += 1;
                    let retry_after = self.record_failure(tenant_id, now);
                    let labels = vec![("tenant_id", tenant_id.to_string())];
                    counter!("directory_sync_errors_total", &labels).increment(1);
                    error!(
                        tenant_id = %tenant_id,
                        timeout_seconds = self.config.scheduler.sync_timeout_seconds,
                        retry_after = %retry_after,
                        "Tenant sync timed out, continuing with remaining tenants"
                    );
                }
            }
        }

        info!(
            polled = summary.tenants_polled,
            synced = summary.tenants_synced,
            users = summary.users_seen,
            skipped_not_due = summary.tenants_skipped_not_due,
            in_backoff = summary.tenants_in_backoff,
            errors = summary.tenants_with_errors,
            "Directory sync tick completed"
        );

        Ok(summary)
    }

    fn in_backoff(&self, tenant_id: Uuid, now: DateTime<Utc>) -> bool {
        let map = self.backoff.lock().expect("backoff map poisoned");
        map.get(&tenant_id)
            .is_some_and(|state| now < state.retry_after)
    }

    fn clear_failure(&self, tenant_id: Uuid) {
        let mut map = self.backoff.lock().expect("backoff map poisoned");
        map.remove(&tenant_id);
    }

    /// Record a failed run and compute the next retry time with exponential
    /// backoff and jitter. Returns the retry time for logging.
    fn record_failure(&self, tenant_id: Uuid, now: DateTime<Utc>) -> DateTime<Utc> {
        let mut map = self.backoff.lock().expect("backoff map poisoned");
        let failures = map.get(&tenant_id).map_or(0, |state| state.failures) + 1;

        let backoff_seconds = compute_backoff_seconds(
            &self.config.scheduler,
            failures - 1,
            &mut rand::thread_rng(),
        );
        let retry_after = now + Duration::seconds(backoff_seconds as i64);

        map.insert(
            tenant_id,
            FailureState {
                failures,
                retry_after,
            },
        );

        retry_after
    }
}

/// A tenant is due when it has never synced or its interval has elapsed.
fn is_due(config: &directory_config::Model, now: DateTime<Utc>) -> bool {
    match config.last_sync_at {
        None => true,
        Some(last) => {
            let interval = Duration::seconds(i64::from(config.sync_interval.max(1)));
            last.with_timezone(&Utc) + interval <= now
        }
    }
}

fn compute_backoff_seconds<R: Rng + ?Sized>(
    config: &SchedulerConfig,
    prior_failures: i32,
    rng: &mut R,
) -> f64 {
    let base = config.backoff_base_seconds as f64;
    let max = config.backoff_max_seconds as f64;
    let backoff = (base * 2_f64.powi(prior_failures.max(0))).min(max);

    let jitter_bound = config.backoff_jitter_factor * backoff;
    let jitter = if jitter_bound > 0.0 {
        rng.gen_range(0.0..jitter_bound)
    } else {
        0.0
    };

    backoff + jitter
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::{ActiveModelTrait, Database, Set};

    use crate::crypto::CryptoKey;
    use crate::directory::{
        ConnectionParams, ConnectionTest, DirectoryClient, DirectoryError, RemoteUserRecord,
    };
    use crate::models::mirrored_user::{self, Entity as MirroredUser};
    use crate::models::tenant;
    use crate::repositories::{DirectoryConfigInput, DirectoryConfigRepository};

    /// Stub directory that fails for servers whose URL contains "broken" and
    /// returns one fixed user otherwise.
    struct StubDirectory;

    #[async_trait]
    impl DirectoryClient for StubDirectory {
        async fn fetch_users(
            &self,
            params: &ConnectionParams,
        ) -> Result<Vec<RemoteUserRecord>, DirectoryError> {
            if params.server_url.contains("broken") {
                return Err(DirectoryError::Connection {
                    details: "connection refused".to_string(),
                });
            }
            Ok(vec![RemoteUserRecord {
                uid: "jdoe".to_string(),
                email: "jdoe@example.com".to_string(),
                display_name: "Jane Doe".to_string(),
                dn: "uid=jdoe,ou=people,dc=example,dc=com".to_string(),
            }])
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
            Ok(())
        }
    }

    fn test_key() -> CryptoKey {
        CryptoKey::new(vec![9u8; 32]).unwrap()
    }

    fn config_input(server_url: &str) -> DirectoryConfigInput {
        DirectoryConfigInput {
            enabled: true,
            server_url: server_url.to_string(),
            bind_dn: "cn=admin,dc=example,dc=com".to_string(),
            bind_password: Some("secret".to_string()),
            base_dn: "ou=people,dc=example,dc=com".to_string(),
            user_filter: None,
            user_id_attribute: None,
            user_email_attribute: None,
            user_name_attribute: None,
            sync_interval: None,
        }
    }

    async fn setup() -> (Arc<DatabaseConnection>, SyncScheduler) {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        let db = Arc::new(db);

        let sync = Arc::new(SyncService::new(
            db.clone(),
            Arc::new(StubDirectory),
            test_key(),
        ));
        let scheduler = SyncScheduler::new(Arc::new(AppConfig::default()), db.clone(), sync);
        (db, scheduler)
    }

    async fn create_tenant(db: &DatabaseConnection) -> Uuid {
        let id = Uuid::new_v4();
        tenant::ActiveModel {
            id: Set(id),
            name: Set(Some("Test Tenant".to_string())),
            created_at: Set(Utc::now().into()),
        }
        .insert(db)
        .await
        .unwrap();
        id
    }

    #[tokio::test]
    async fn one_tenants_failure_does_not_stop_the_others() {
        let (db, scheduler) = setup().await;
        let repo = DirectoryConfigRepository::new(db.clone(), test_key());

        let tenant_ok = create_tenant(&db).await;
        let tenant_bad = create_tenant(&db).await;
        repo.upsert(tenant_ok, config_input("ldap://good.example.com:389"))
            .await
            .unwrap();
        repo.upsert(tenant_bad, config_input("ldap://broken.example.com:389"))
            .await
            .unwrap();

        let summary = scheduler.tick().await.unwrap();

        assert_eq!(summary.tenants_polled, 2);
        assert_eq!(summary.tenants_synced, 1);
        assert_eq!(summary.tenants_with_errors, 1);

        // The healthy tenant's mirror was populated, the broken one's wasn't.
        let ok_rows = MirroredUser::find()
            .filter(mirrored_user::Column::TenantId.eq(tenant_ok))
            .all(&*db)
            .await
            .unwrap();
        assert_eq!(ok_rows.len(), 1);

        let bad_rows = MirroredUser::find()
            .filter(mirrored_user::Column::TenantId.eq(tenant_bad))
            .all(&*db)
            .await
            .unwrap();
        assert!(bad_rows.is_empty());
    }

    #[tokio::test]
    async fn failed_tenant_enters_backoff() {
        let (db, scheduler) = setup().await;
        let repo = DirectoryConfigRepository::new(db.clone(), test_key());

        let tenant_bad = create_tenant(&db).await;
        repo.upsert(tenant_bad, config_input("ldap://broken.example.com:389"))
            .await
            .unwrap();

        let first = scheduler.tick().await.unwrap();
        assert_eq!(first.tenants_with_errors, 1);

        // Default backoff base is 5s, so an immediate second tick skips it.
        let second = scheduler.tick().await.unwrap();
        assert_eq!(second.tenants_in_backoff, 1);
        assert_eq!(second.tenants_with_errors, 0);
    }

    #[tokio::test]
    async fn synced_tenant_is_not_due_again_within_interval() {
        let (db, scheduler) = setup().await;
        let repo = DirectoryConfigRepository::new(db.clone(), test_key());

        let tenant_ok = create_tenant(&db).await;
        repo.upsert(tenant_ok, config_input("ldap://good.example.com:389"))
            .await
            .unwrap();

        let first = scheduler.tick().await.unwrap();
        assert_eq!(first.tenants_synced, 1);

        // The default 30s interval has not elapsed.
        let second = scheduler.tick().await.unwrap();
        assert_eq!(second.tenants_skipped_not_due, 1);
        assert_eq!(second.tenants_synced, 0);
    }

    #[test]
    fn never_synced_config_is_due() {
        let config = directory_config::Model {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            enabled: true,
            server_url: "ldap://directory.example.com:389".to_string(),
            bind_dn: "cn=admin,dc=example,dc=com".to_string(),
            bind_password_ciphertext: vec![1],
            base_dn: "dc=example,dc=com".to_string(),
            user_filter: None,
            user_id_attribute: "uid".to_string(),
            user_email_attribute: "mail".to_string(),
            user_name_attribute: "cn".to_string(),
            sync_interval: 30,
            last_sync_at: None,
            created_at: Utc::now().into(),
            updated_at: Utc::now().into(),
        };

        let now = Utc::now();
        assert!(is_due(&config, now));

        let recently_synced = directory_config::Model {
            last_sync_at: Some(now.into()),
            ..config.clone()
        };
        assert!(!is_due(&recently_synced, now));

        let long_ago = directory_config::Model {
            last_sync_at: Some((now - Duration::seconds(60)).into()),
            ..config
        };
        assert!(is_due(&long_ago, now));
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let config = SchedulerConfig {
            backoff_jitter_factor: 0.0,
            ..SchedulerConfig::default()
        };
        let mut rng = rand::thread_rng();

        assert_eq!(compute_backoff_seconds(&config, 0, &mut rng), 5.0);
        assert_eq!(compute_backoff_seconds(&config, 1, &mut rng), 10.0);
        assert_eq!(compute_backoff_seconds(&config, 2, &mut rng), 20.0);
        assert_eq!(compute_backoff_seconds(&config, 20, &mut rng), 900.0);
    }

    #[test]
    fn backoff_jitter_respects_bounds() {
        let config = SchedulerConfig::default();
        let mut rng = rand::thread_rng();

        for _ in 0..100 {
            let backoff = compute_backoff_seconds(&config, 1, &mut rng);
            assert!(backoff >= 10.0);
            assert!(backoff <= 10.0 + 10.0 * config.backoff_jitter_factor);
        }
    }
}
