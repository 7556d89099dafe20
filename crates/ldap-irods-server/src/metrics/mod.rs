//! Prometheus metrics for LDAP-iRODS-Auth
//!
//! Counters are always recorded through the `metrics` facade; they are only
//! exported when a metrics port is configured.

use ldap_irods_core::{Error, Result};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;
use tracing::info;

pub use ldap_irods_auth::bridge::names as auth_names;

/// Metric names
pub mod names {
    // LDAP operation metrics
    pub const LDAP_BINDS_TOTAL: &str = "ldap_irods_auth_binds_total";
    pub const LDAP_SEARCHES_TOTAL: &str = "ldap_irods_auth_searches_total";
    pub const LDAP_SEARCH_ENTRIES_TOTAL: &str = "ldap_irods_auth_search_entries_total";
    pub const LDAP_UNSUPPORTED_OPERATIONS_TOTAL: &str = "ldap_irods_auth_unsupported_operations_total";

    // Connection metrics
    pub const LDAP_CONNECTIONS_TOTAL: &str = "ldap_irods_auth_connections_total";
    pub const LDAP_ACTIVE_CONNECTIONS: &str = "ldap_irods_auth_active_connections";

    // Cache metrics
    pub const CACHE_ENTRIES: &str = "ldap_irods_auth_cache_entries";
    pub const CACHE_PURGED_TOTAL: &str = "ldap_irods_auth_cache_purged_total";

    // System metrics
    pub const UPTIME_SECONDS: &str = "ldap_irods_auth_uptime_seconds";
    pub const INFO: &str = "ldap_irods_auth_info";
}

/// Outcome label of a bind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    Anonymous,
    Success,
    InvalidCredentials,
    Unreachable,
    Unsupported,
}

impl BindOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::Success => "success",
            Self::InvalidCredentials => "invalid_credentials",
            Self::Unreachable => "unreachable",
            Self::Unsupported => "unsupported",
        }
    }
}

/// Metrics recorder
#[derive(Clone)]
pub struct MetricsRecorder {
    start_time: Instant,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        gauge!(names::INFO, "version" => ldap_irods_core::VERSION).set(1.0);
        Self {
            start_time: Instant::now(),
        }
    }

    /// Install the Prometheus exporter, serving `/metrics` on `addr`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn install(addr: SocketAddr) -> Result<Self> {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .map_err(|e| Error::Config(format!("failed to install metrics exporter on {}: {}", addr, e)))?;

        info!(%addr, "Prometheus metrics exporter listening");
        Ok(Self::new())
    }

    pub fn record_bind(&self, outcome: BindOutcome) {
        counter!(names::LDAP_BINDS_TOTAL, "outcome" => outcome.as_str()).increment(1);
    }

    pub fn record_search(&self, entries: usize) {
        counter!(names::LDAP_SEARCHES_TOTAL).increment(1);
        counter!(names::LDAP_SEARCH_ENTRIES_TOTAL).increment(entries as u64);
    }

    pub fn record_unsupported(&self, operation: &'static str) {
        counter!(names::LDAP_UNSUPPORTED_OPERATIONS_TOTAL, "operation" => operation).increment(1);
    }

    pub fn connection_opened(&self) {
        counter!(names::LDAP_CONNECTIONS_TOTAL).increment(1);
        gauge!(names::LDAP_ACTIVE_CONNECTIONS).increment(1.0);
    }

    pub fn connection_closed(&self) {
        gauge!(names::LDAP_ACTIVE_CONNECTIONS).decrement(1.0);
    }

    pub fn record_cache_sweep(&self, purged: usize, remaining: usize) {
        counter!(names::CACHE_PURGED_TOTAL).increment(purged as u64);
        gauge!(names::CACHE_ENTRIES).set(remaining as f64);
        gauge!(names::UPTIME_SECONDS).set(self.start_time.elapsed().as_secs_f64());
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}
