//! Configuration for LDAP-iRODS-Auth
//!
//! The configuration is read once at startup, from environment variables,
//! a YAML file or YAML piped on stdin, and is read-only afterwards. The
//! controller process hands it to the background process as YAML.

use crate::{DistinguishedName, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

pub const SERVICE_HOST_DEFAULT: &str = "";
pub const SERVICE_PORT_DEFAULT: u16 = 1389;
pub const IRODS_PORT_DEFAULT: u16 = 1247;
pub const IRODS_REQUEST_TIMEOUT_DEFAULT: u64 = 30;
pub const AUTH_CACHE_TIMEOUT_DEFAULT: u64 = 60 * 5;
pub const LDAP_BASE_DN_DEFAULT: &str = "dc=iplantcollaborative,dc=org";
pub const MAIL_DOMAIN_DEFAULT: &str = "cyverse.org";
pub const LOG_FILE_PATH_DEFAULT: &str = "/tmp/ldap-irods-auth.log";
pub const LOG_LEVEL_DEFAULT: &str = "info";
pub const HANDSHAKE_TIMEOUT_DEFAULT: u64 = 60;

/// Seed mixed into every credential verification token unless
/// `auth_hash_secret` is configured.
pub const HASH_SEED_DEFAULT: &str = "ldap-irods-auth-hash-seed1684165998778980816333407110267630157905106677102502820120929196213565346863704918937246704453519613";

/// Prefix of every environment variable read by [`Config::from_env`]
pub const ENV_PREFIX: &str = "LDAP_IRODS_AUTH_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the LDAP listener binds to (empty = all interfaces)
    pub service_host: String,
    /// LDAP listener port
    pub service_port: u16,

    /// iRODS server host name
    pub irods_host: String,
    /// iRODS server port
    pub irods_port: u16,
    /// iRODS zone users authenticate in
    pub irods_zone: String,
    /// Group a user must belong to in order to bind
    #[serde(skip_serializing_if = "Option::is_none")]
    pub irods_user_group: Option<String>,
    /// Timeout for one iRODS request (seconds)
    pub irods_request_timeout: u64,

    /// Lifetime of a cached successful authentication (seconds, 0 disables)
    pub auth_cache_timeout: u64,
    /// Secret mixed into credential verification tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_hash_secret: Option<String>,

    /// Base DN every bind DN must be under
    pub ldap_base_dn: String,
    /// Domain used for synthesized `mail` attributes
    pub mail_domain: String,

    /// Log file path (`-` or empty = console only)
    pub log_path: String,
    /// Default log level when RUST_LOG is not set
    pub log_level: String,

    /// How long the controller waits for the background process to report
    /// (seconds, 0 = wait forever)
    pub handshake_timeout: u64,
    /// Port of the Prometheus exporter, disabled when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_port: Option<u16>,

    pub foreground: bool,
    #[serde(rename = "childprocess")]
    pub child_process: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_host: SERVICE_HOST_DEFAULT.to_string(),
            service_port: SERVICE_PORT_DEFAULT,
            irods_host: String::new(),
            irods_port: IRODS_PORT_DEFAULT,
            irods_zone: String::new(),
            irods_user_group: None,
            irods_request_timeout: IRODS_REQUEST_TIMEOUT_DEFAULT,
            auth_cache_timeout: AUTH_CACHE_TIMEOUT_DEFAULT,
            auth_hash_secret: None,
            ldap_base_dn: LDAP_BASE_DN_DEFAULT.to_string(),
            mail_domain: MAIL_DOMAIN_DEFAULT.to_string(),
            log_path: LOG_FILE_PATH_DEFAULT.to_string(),
            log_level: LOG_LEVEL_DEFAULT.to_string(),
            handshake_timeout: HANDSHAKE_TIMEOUT_DEFAULT,
            metrics_port: None,
            foreground: false,
            child_process: false,
        }
    }
}

impl Config {
    pub fn from_yaml(yaml: &[u8]) -> Result<Self> {
        if yaml.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_slice(yaml)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path).map_err(|e| {
            Error::Config(format!("failed to access the yaml file {}: {}", path.display(), e))
        })?;
        if metadata.is_dir() {
            return Err(Error::Config(format!(
                "yaml file {} is not a file",
                path.display()
            )));
        }

        debug!(path = %path.display(), "Loading configuration file");
        let content = std::fs::read(path).map_err(|e| {
            Error::Config(format!("failed to read the yaml file {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source, starting from the
    /// defaults. Unset variables keep their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));
        let mut config = Self::default();

        if let Some(host) = var("SERVICE_HOST") {
            config.service_host = host;
        }
        if let Some(port) = var("SERVICE_PORT") {
            config.service_port = parse_var("SERVICE_PORT", &port)?;
        }
        if let Some(host) = var("IRODS_HOST") {
            config.irods_host = host;
        }
        if let Some(port) = var("IRODS_PORT") {
            config.irods_port = parse_var("IRODS_PORT", &port)?;
        }
        if let Some(zone) = var("IRODS_ZONE") {
            config.irods_zone = zone;
        }
        if let Some(group) = var("IRODS_USER_GROUP") {
            config.irods_user_group = Some(group);
        }
        if let Some(timeout) = var("IRODS_REQUEST_TIMEOUT") {
            config.irods_request_timeout = parse_var("IRODS_REQUEST_TIMEOUT", &timeout)?;
        }
        if let Some(timeout) = var("CACHE_TIMEOUT") {
            config.auth_cache_timeout = parse_var("CACHE_TIMEOUT", &timeout)?;
        }
        if let Some(secret) = var("HASH_SECRET") {
            config.auth_hash_secret = Some(secret);
        }
        if let Some(base_dn) = var("LDAP_BASE_DN") {
            config.ldap_base_dn = base_dn;
        }
        if let Some(domain) = var("MAIL_DOMAIN") {
            config.mail_domain = domain;
        }
        if let Some(path) = var("LOG_PATH") {
            config.log_path = path;
        }
        if let Some(level) = var("LOG_LEVEL") {
            config.log_level = level;
        }
        if let Some(timeout) = var("HANDSHAKE_TIMEOUT") {
            config.handshake_timeout = parse_var("HANDSHAKE_TIMEOUT", &timeout)?;
        }
        if let Some(port) = var("METRICS_PORT") {
            config.metrics_port = Some(parse_var("METRICS_PORT", &port)?);
        }

        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.service_port == 0 {
            return Err(Error::Config("Service port must be given".into()));
        }

        if self.irods_host.is_empty() {
            return Err(Error::Config("IRODS hostname must be given".into()));
        }

        if self.irods_port == 0 {
            return Err(Error::Config("IRODS port must be given".into()));
        }

        if self.irods_zone.is_empty() {
            return Err(Error::Config("IRODS zone must be given".into()));
        }

        if self.ldap_base_dn.trim().is_empty() {
            return Err(Error::Config("LDAP base DN must be given".into()));
        }

        // an empty base would accept every bind DN
        if DistinguishedName::parse(&self.ldap_base_dn).is_empty() {
            return Err(Error::Config(format!(
                "LDAP base DN '{}' has no key=value component",
                self.ldap_base_dn
            )));
        }

        if self.auth_cache_timeout == 0 {
            warn!("Authentication cache is disabled, every bind goes to iRODS");
        }

        Ok(())
    }

    /// Address for the LDAP listener
    pub fn service_address(&self) -> String {
        let host = if self.service_host.is_empty() {
            "0.0.0.0"
        } else {
            self.service_host.as_str()
        };
        format!("{}:{}", host, self.service_port)
    }

    /// Required group, ignoring an empty configured value
    pub fn required_group(&self) -> Option<&str> {
        self.irods_user_group
            .as_deref()
            .map(str::trim)
            .filter(|g| !g.is_empty())
    }

    pub fn hash_secret(&self) -> &str {
        self.auth_hash_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(HASH_SEED_DEFAULT)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.auth_cache_timeout)
    }

    pub fn irods_timeout(&self) -> Duration {
        Duration::from_secs(self.irods_request_timeout)
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        match self.handshake_timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Log file, or `None` when logging to the console only
    pub fn log_file(&self) -> Option<&str> {
        match self.log_path.as_str() {
            "" | "-" => None,
            path => Some(path),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| {
        Error::Config(format!("invalid value '{}' for {}{}: {}", value, ENV_PREFIX, name, e))
    })
}
