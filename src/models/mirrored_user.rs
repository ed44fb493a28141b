//! Mirrored user entity model
//!
//! Local mirror of one remote directory entry, keyed by (tenant, remote uid).
//! Reconciliation creates, refreshes, and disables rows; it never deletes
//! them. `enabled = false` is the only representation of "no longer present
//! upstream". `account_id` is a weak reference set by the identity bridge and
//! never cleared automatically.

use super::account::Entity as Account;
use super::tenant::Entity as Tenant;
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "mirrored_users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: Uuid,

    /// Remote user id; unique per tenant, not globally
    pub remote_uid: String,

    pub email: String,

    pub display_name: String,

    /// Distinguished name of the remote entry, used for end-user binds
    pub remote_dn: String,

    /// True when present in the last successful remote fetch
    pub enabled: bool,

    /// Linked local account, if any
    pub account_id: Option<Uuid>,

    pub last_sync_at: DateTimeWithTimeZone,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "Tenant",
        from = "Column::TenantId",
        to = "super::tenant::Column::Id"
    )]
    Tenant,
    #[sea_orm(
        belongs_to = "Account",
        from = "Column::AccountId",
        to = "super::account::Column::Id"
    )]
    Account,
}

impl Related<Tenant> for Entity {
    fn to() -> RelationDef {
        Relation::Tenant.def()
    }
}

impl Related<Account> for Entity {
    fn to() -> RelationDef {
        Relation::Account.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
