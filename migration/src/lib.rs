//! Database migrations for the dirsync service.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2026_07_01_000001_create_tenants;
mod m2026_07_01_000002_create_accounts;
mod m2026_07_01_000003_create_tenant_memberships;
mod m2026_07_05_100000_create_directory_configs;
mod m2026_07_05_100100_create_mirrored_users;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_07_01_000001_create_tenants::Migration),
            Box::new(m2026_07_01_000002_create_accounts::Migration),
            Box::new(m2026_07_01_000003_create_tenant_memberships::Migration),
            Box::new(m2026_07_05_100000_create_directory_configs::Migration),
            Box::new(m2026_07_05_100100_create_mirrored_users::Migration),
        ]
    }
}
