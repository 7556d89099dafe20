//! LDAP server for LDAP-iRODS-Auth

pub mod directory;
pub mod handler;
pub mod metrics;
pub mod server;

pub use directory::{Entry, VirtualDirectory};
pub use handler::{HandlerOutcome, LdapHandler};
pub use metrics::MetricsRecorder;
pub use server::{LdapService, ServiceState};
