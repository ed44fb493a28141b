//! # Repository Layer
//!
//! Repositories encapsulate SeaORM operations for the service's entities,
//! providing tenant-aware data access for the administrative surface. The
//! reconciliation engine and identity bridge write through their own
//! transactions and only use repositories for reads outside them.

pub mod account;
pub mod directory_config;
pub mod mirrored_user;

pub use account::AccountRepository;
pub use directory_config::{DirectoryConfigInput, DirectoryConfigRepository, DirectoryConfigView};
pub use mirrored_user::{MirroredUserPage, MirroredUserRepository};
