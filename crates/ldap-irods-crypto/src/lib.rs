//! Cryptography utilities for LDAP-iRODS-Auth

pub mod hash;

pub use hash::*;
