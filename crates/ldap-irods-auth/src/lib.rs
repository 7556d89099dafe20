//! Authentication for LDAP-iRODS-Auth
//!
//! Binds are checked against iRODS native authentication through the
//! [`RemoteAuthenticator`] seam; recent successes are kept in a
//! [`CredentialCache`] as verification tokens.

pub mod bridge;
pub mod cache;
pub mod irods;
pub mod remote;

pub use bridge::{AuthBridge, Authenticated, NameMapping};
pub use cache::{Clock, CredentialCache, SystemClock};
pub use irods::{IrodsAuthenticator, IrodsConfig, IrodsConnection};
pub use remote::{RemoteAuthenticator, RemoteSession};
