//! iRODS native authentication client
//!
//! Speaks just enough of the iRODS XML protocol to:
//! - open a connection (startup pack)
//! - log in with native (challenge/response) authentication
//! - list the groups of a user (GenQuery)
//! - disconnect

mod client;
mod types;

pub use client::{IrodsAuthenticator, IrodsConnection};
pub use types::*;
