//! # Data Models
//!
//! SeaORM entity models for the dirsync service.

pub mod account;
pub mod directory_config;
pub mod mirrored_user;
pub mod tenant;
pub mod tenant_membership;

pub use account::Entity as Account;
pub use directory_config::Entity as DirectoryConfig;
pub use mirrored_user::Entity as MirroredUser;
pub use tenant::Entity as Tenant;
pub use tenant_membership::Entity as TenantMembership;

/// Account status value set on first-time provisioning.
pub const ACCOUNT_STATUS_ACTIVE: &str = "active";

/// Lowest-privilege tenant membership role, used for provisioned accounts.
pub const MEMBERSHIP_ROLE_NORMAL: &str = "normal";
