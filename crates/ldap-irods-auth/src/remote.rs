//! Remote authentication seam
//!
//! The bridge never talks to iRODS directly; it goes through these traits so
//! that the wire client can be swapped out (and faked in tests).

use async_trait::async_trait;
use ldap_irods_core::Result;

/// Opens authenticated sessions against the remote system
#[async_trait]
pub trait RemoteAuthenticator: Send + Sync {
    /// Connect and authenticate as `username`.
    ///
    /// Wrong credentials yield `Error::InvalidCredentials`; an unreachable
    /// server or a broken handshake yields `Error::RemoteConnectivity`.
    async fn connect(&self, username: &str, password: &str) -> Result<Box<dyn RemoteSession>>;
}

/// One authenticated connection to the remote system
#[async_trait]
pub trait RemoteSession: Send {
    /// Names of the groups `username` belongs to
    async fn list_user_groups(&mut self, username: &str) -> Result<Vec<String>>;

    /// Close the connection
    async fn disconnect(self: Box<Self>);
}
