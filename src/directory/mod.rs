//! Directory client adapter
//!
//! Defines the interface the reconciliation engine and identity bridge use to
//! talk to a remote directory, decoupled from the wire protocol so tests can
//! substitute a stub. The production implementation lives in [`ldap`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod ldap;

pub use ldap::LdapDirectoryClient;

/// Search filter applied when a tenant has not configured one.
pub const DEFAULT_USER_FILTER: &str = "(objectClass=person)";

/// Adapter-level error taxonomy.
#[derive(Debug, Clone, Error)]
pub enum DirectoryError {
    /// Directory unreachable, or the admin bind was rejected.
    #[error("connection failed: {details}")]
    Connection { details: String },

    /// The directory rejected the search request.
    #[error("search failed: {details}")]
    Search { details: String },

    /// An end-user bind was rejected.
    #[error("invalid credentials")]
    InvalidCredentials,
}

/// One valid user entry from a remote fetch. Records missing a uid or email
/// never make it into this type; the adapter skips them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteUserRecord {
    pub uid: String,
    pub email: String,
    pub display_name: String,
    pub dn: String,
}

/// Plaintext connection parameters for one tenant's directory, assembled from
/// the stored config with the bind password already decrypted.
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    pub server_url: String,
    pub bind_dn: String,
    pub bind_password: String,
    pub base_dn: String,
    pub user_filter: Option<String>,
    pub user_id_attribute: String,
    pub user_email_attribute: String,
    pub user_name_attribute: String,
}

impl ConnectionParams {
    /// The search filter to use: the configured one, else the default.
    pub fn effective_filter(&self) -> &str {
        self.user_filter
            .as_deref()
            .filter(|f| !f.is_empty())
            .unwrap_or(DEFAULT_USER_FILTER)
    }
}

/// Outcome of a connection test. Never an error: failures are reported as
/// `success = false` with a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionTest {
    pub success: bool,
    pub message: String,
}

/// Stateless-per-call client for a remote directory.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Fetch the current user set. Opens a connection, binds with the admin
    /// credentials, searches under the base DN, and closes the connection on
    /// every exit path. Entries missing the uid or email attribute are
    /// logged and skipped, not surfaced as errors.
    async fn fetch_users(
        &self,
        params: &ConnectionParams,
    ) -> Result<Vec<RemoteUserRecord>, DirectoryError>;

    /// Attempt the admin bind only; never searches, never fails.
    async fn test_connection(&self, params: &ConnectionParams) -> ConnectionTest;

    /// Bind as an end user to verify their password. Never reuses the
    /// tenant's admin bind credentials.
    async fn bind_as(
        &self,
        server_url: &str,
        dn: &str,
        password: &str,
    ) -> Result<(), DirectoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params_with_filter(filter: Option<&str>) -> ConnectionParams {
        ConnectionParams {
            server_url: "ldap://directory.example.com:389".to_string(),
            bind_dn: "cn=admin,dc=example,dc=com".to_string(),
            bind_password: "secret".to_string(),
            base_dn: "ou=people,dc=example,dc=com".to_string(),
            user_filter: filter.map(|f| f.to_string()),
            user_id_attribute: "uid".to_string(),
            user_email_attribute: "mail".to_string(),
            user_name_attribute: "cn".to_string(),
        }
    }

    #[test]
    fn effective_filter_defaults_to_person_entries() {
        assert_eq!(
            params_with_filter(None).effective_filter(),
            "(objectClass=person)"
        );
        assert_eq!(
            params_with_filter(Some("")).effective_filter(),
            "(objectClass=person)"
        );
        assert_eq!(
            params_with_filter(Some("(objectClass=inetOrgPerson)")).effective_filter(),
            "(objectClass=inetOrgPerson)"
        );
    }
}
