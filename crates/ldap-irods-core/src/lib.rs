//! LDAP-iRODS-Auth Core Library
//!
//! Configuration, error types and the DN/filter engine shared by the
//! LDAP-iRODS authentication bridge.

pub mod config;
pub mod dn;
pub mod error;
pub mod filter;

pub use config::Config;
pub use dn::{matches_base, DistinguishedName};
pub use error::{Error, ErrorKind, Result};
pub use filter::Filter;

/// LDAP-iRODS-Auth version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name reported to iRODS in the startup pack
pub const APPLICATION_NAME: &str = "ldap-irods-auth";

/// Organizational unit that synthesized user entries live under
pub const PEOPLE_OU: &str = "People";

/// Attribute carrying the user name in a DN
pub const UID_ATTRIBUTE: &str = "uid";
