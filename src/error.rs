//! # Error Handling
//!
//! Service-level error taxonomy shared by the reconciliation engine, the
//! identity bridge, and the administrative surface. Adapter-level directory
//! errors convert into this type without changing kind, so callers can always
//! tell a connection problem from a rejected search or a failed user bind.

use thiserror::Error;
use uuid::Uuid;

use crate::crypto::CryptoError;
use crate::directory::DirectoryError;

/// Errors surfaced by sync and authentication operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// No enabled directory configuration exists for the tenant. Terminal for
    /// the calling operation.
    #[error("no enabled directory configuration for tenant {tenant_id}")]
    ConfigNotFound { tenant_id: Uuid },

    /// The remote directory was unreachable or the admin bind failed.
    #[error("directory connection failed: {0}")]
    Connection(String),

    /// The directory rejected the search request.
    #[error("directory search failed: {0}")]
    Search(String),

    /// End-user bind failed. The message is deliberately generic; full detail
    /// is logged server-side and must not reach untrusted callers.
    #[error("directory authentication failed")]
    Auth,

    /// No enabled mirrored user matched the login. Distinct from [`Auth`] so
    /// trusted callers can tell "no such identity" from "wrong credentials".
    ///
    /// [`Auth`]: ServiceError::Auth
    #[error("directory user not found or disabled")]
    UserNotFound,

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl From<DirectoryError> for ServiceError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::Connection { details } => ServiceError::Connection(details),
            DirectoryError::Search { details } => ServiceError::Search(details),
            DirectoryError::InvalidCredentials => ServiceError::Auth,
        }
    }
}
