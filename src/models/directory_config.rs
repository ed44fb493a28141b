//! Directory configuration entity model
//!
//! One row per tenant (unique constraint) holding the remote directory's
//! connection parameters, attribute mapping, and sync cadence. The bind
//! password column only ever holds AES-256-GCM ciphertext; use the config
//! repository to read it.

use super::tenant::Entity as Tenant;
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "directory_configs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning tenant; at most one config per tenant
    pub tenant_id: Uuid,

    /// Absent or disabled config means sync and auth are no-ops for the tenant
    pub enabled: bool,

    /// Directory server address, e.g. `ldap://directory.example.com:389`
    pub server_url: String,

    /// Admin bind DN used for search
    pub bind_dn: String,

    /// Encrypted admin bind password
    pub bind_password_ciphertext: Vec<u8>,

    /// Search base DN
    pub base_dn: String,

    /// Optional search filter; defaults to person-like entries when unset
    pub user_filter: Option<String>,

    /// Remote attribute supplying the stable user id
    pub user_id_attribute: String,

    /// Remote attribute supplying the email
    pub user_email_attribute: String,

    /// Remote attribute supplying the display name
    pub user_name_attribute: String,

    /// Seconds between scheduled syncs for this tenant
    pub sync_interval: i32,

    /// Completion time of the last successful reconciliation
    pub last_sync_at: Option<DateTimeWithTimeZone>,

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
}

impl Related<Tenant> for Entity {
    fn to() -> RelationDef {
        Relation::Tenant.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
