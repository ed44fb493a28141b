//! LDAP implementation of the directory client.
//!
//! Connections are opened per call and unbound on every exit path; nothing is
//! cached between calls. Only the three mapped attributes are requested from
//! the server, and entries that lack a usable uid or email are skipped.

use std::time::Duration;

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use tracing::{debug, warn};

use super::{
    ConnectionParams, ConnectionTest, DirectoryClient, DirectoryError, RemoteUserRecord,
};

/// LDAP result code for invalid credentials (RFC 4511).
const RC_INVALID_CREDENTIALS: u32 = 49;

const DEFAULT_CONN_TIMEOUT: Duration = Duration::from_secs(10);

/// Directory client speaking LDAP v3 via the `ldap3` crate.
pub struct LdapDirectoryClient {
    conn_timeout: Duration,
}

impl LdapDirectoryClient {
    pub fn new() -> Self {
        Self {
            conn_timeout: DEFAULT_CONN_TIMEOUT,
        }
    }

    /// Override the TCP/TLS connect timeout.
    pub fn with_conn_timeout(mut self, timeout: Duration) -> Self {
        self.conn_timeout = timeout;
        self
    }

    /// Open a connection and spawn its driver task.
    async fn connect(&self, server_url: &str) -> Result<Ldap, DirectoryError> {
        debug!(url = %server_url, "Connecting to directory server");

        let settings = LdapConnSettings::new().set_conn_timeout(self.conn_timeout);

        let (conn, ldap) = LdapConnAsync::with_settings(settings, server_url)
            .await
            .map_err(|e| DirectoryError::Connection {
                details: format!("failed to connect to {server_url}: {e}"),
            })?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
        });

        Ok(ldap)
    }

    /// Open a connection and perform the admin bind from `params`.
    async fn connect_and_bind(&self, params: &ConnectionParams) -> Result<Ldap, DirectoryError> {
        let mut ldap = self.connect(&params.server_url).await?;

        let result = ldap
            .simple_bind(&params.bind_dn, &params.bind_password)
            .await
            .map_err(|e| DirectoryError::Connection {
                details: format!("bind failed for {}: {e}", params.bind_dn),
            })?;

        if result.rc != 0 {
            close(&mut ldap).await;
            return Err(DirectoryError::Connection {
                details: format!(
                    "bind rejected for {} with code {}: {}",
                    params.bind_dn, result.rc, result.text
                ),
            });
        }

        Ok(ldap)
    }
}

impl Default for LdapDirectoryClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DirectoryClient for LdapDirectoryClient {
    async fn fetch_users(
        &self,
        params: &ConnectionParams,
    ) -> Result<Vec<RemoteUserRecord>, DirectoryError> {
        let mut ldap = self.connect_and_bind(params).await?;

        let attrs = vec![
            params.user_id_attribute.as_str(),
            params.user_email_attribute.as_str(),
            params.user_name_attribute.as_str(),
        ];

        let search_result = ldap
            .search(
                &params.base_dn,
                Scope::Subtree,
                params.effective_filter(),
                attrs,
            )
            .await;

        // Unbind before inspecting the outcome so the connection is released
        // on the error paths too.
        close(&mut ldap).await;

        let (entries, _) = search_result
            .map_err(|e| DirectoryError::Search {
                details: e.to_string(),
            })?
            .success()
            .map_err(|e| DirectoryError::Search {
                details: e.to_string(),
            })?;

        let users = entries
            .into_iter()
            .map(SearchEntry::construct)
            .filter_map(|entry| parse_entry(entry, params))
            .collect();

        Ok(users)
    }

    async fn test_connection(&self, params: &ConnectionParams) -> ConnectionTest {
        match self.connect_and_bind(params).await {
            Ok(mut ldap) => {
                close(&mut ldap).await;
                ConnectionTest {
                    success: true,
                    message: "connection successful".to_string(),
                }
            }
            Err(e) => ConnectionTest {
                success: false,
                message: format!("connection failed: {e}"),
            },
        }
    }

    async fn bind_as(
        &self,
        server_url: &str,
        dn: &str,
        password: &str,
    ) -> Result<(), DirectoryError> {
        let mut ldap = self.connect(server_url).await?;

        let result =
            ldap.simple_bind(dn, password)
                .await
                .map_err(|e| DirectoryError::Connection {
                    details: format!("bind failed: {e}"),
                });

        close(&mut ldap).await;

        let result = result?;
        match result.rc {
            0 => Ok(()),
            RC_INVALID_CREDENTIALS => Err(DirectoryError::InvalidCredentials),
            rc => Err(DirectoryError::Connection {
                details: format!("bind rejected with code {rc}: {}", result.text),
            }),
        }
    }
}

async fn close(ldap: &mut Ldap) {
    if let Err(e) = ldap.unbind().await {
        warn!(error = %e, "Error during LDAP unbind");
    }
}

/// Convert one search entry into a user record. Entries without a non-empty
/// uid and email are skipped with a warning; they must not count toward the
/// fetch total.
fn parse_entry(entry: SearchEntry, params: &ConnectionParams) -> Option<RemoteUserRecord> {
    let uid = attr_value(&entry, &params.user_id_attribute);
    let email = attr_value(&entry, &params.user_email_attribute);
    let display_name = attr_value(&entry, &params.user_name_attribute);

    match (uid, email) {
        (Some(uid), Some(email)) => Some(RemoteUserRecord {
            uid,
            email,
            display_name: display_name.unwrap_or_default(),
            dn: entry.dn,
        }),
        _ => {
            warn!(dn = %entry.dn, "Skipping directory entry without uid or email");
            None
        }
    }
}

/// First non-empty value of the named attribute. LDAP attribute names are
/// case-insensitive and servers may answer in canonical case.
fn attr_value(entry: &SearchEntry, name: &str) -> Option<String> {
    let values = entry.attrs.get(name).or_else(|| {
        entry
            .attrs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values)
    })?;

    values
        .iter()
        .find(|v| !v.is_empty())
        .map(|v| v.to_string())
}
