//! Account repository for database operations

use anyhow::Result;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::account::{self, Entity as Account};

/// Read access to accounts. Creation happens only inside the identity
/// bridge's provisioning transaction.
#[derive(Debug, Clone)]
pub struct AccountRepository {
    pub db: Arc<DatabaseConnection>,
}

impl AccountRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<account::Model>> {
        Ok(Account::find_by_id(id).one(&*self.db).await?)
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<account::Model>> {
        Ok(Account::find()
            .filter(account::Column::Email.eq(email))
            .one(&*self.db)
            .await?)
    }
}
