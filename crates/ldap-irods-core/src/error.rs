//! Error types for LDAP-iRODS-Auth

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // Configuration Errors
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to parse YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // Authentication Errors
    #[error("Invalid credentials for user {0}")]
    InvalidCredentials(String),

    #[error("DN {0} is not under the configured base DN")]
    DnOutsideBase(String),

    #[error("No user name given")]
    MissingUsername,

    #[error("User '{user}' is not in a group '{group}'")]
    NotInGroup { user: String, group: String },

    // Remote Errors
    #[error("Failed to reach iRODS server: {0}")]
    RemoteConnectivity(String),

    #[error("iRODS protocol error: {0}")]
    RemoteProtocol(String),

    // Inter-process Errors
    #[error("Background process communication failed: {0}")]
    Ipc(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Coarse classification used when deciding how an error is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Authentication,
    RemoteConnectivity,
    Ipc,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) | Error::Yaml(_) => ErrorKind::Configuration,
            Error::InvalidCredentials(_)
            | Error::DnOutsideBase(_)
            | Error::MissingUsername
            | Error::NotInGroup { .. } => ErrorKind::Authentication,
            Error::RemoteConnectivity(_) | Error::RemoteProtocol(_) => {
                ErrorKind::RemoteConnectivity
            }
            Error::Ipc(_) => ErrorKind::Ipc,
            Error::Io(_) => ErrorKind::Internal,
        }
    }

    /// Whether a bind that failed with this error should be answered with
    /// invalidCredentials rather than a server fault.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Authentication | ErrorKind::RemoteConnectivity
        )
    }
}
