//! LDAP listener and service lifecycle

use crate::directory::VirtualDirectory;
use crate::handler::{HandlerOutcome, LdapHandler};
use crate::metrics::MetricsRecorder;
use futures::{SinkExt, StreamExt};
use ldap3_proto::LdapCodec;
use ldap_irods_auth::{AuthBridge, CredentialCache};
use ldap_irods_core::{Config, Error, Result};
use parking_lot::Mutex;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

/// Lifecycle of an [`LdapService`]. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Running,
    Terminated,
}

struct Lifecycle {
    state: ServiceState,
    shutdown: CancellationToken,
}

/// LDAP service
pub struct LdapService {
    config: Config,
    cache: Arc<CredentialCache>,
    handler: Arc<LdapHandler>,
    metrics: MetricsRecorder,
    lifecycle: Mutex<Lifecycle>,
}

impl LdapService {
    /// Service authenticating against the configured iRODS zone
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let cache = Arc::new(CredentialCache::new(config.cache_ttl()));
        let bridge = AuthBridge::from_config(&config, cache.clone());
        Ok(Self::with_bridge(config, bridge, MetricsRecorder::new()))
    }

    /// Service around an existing bridge; the directory is fed from the
    /// bridge's cache
    pub fn with_bridge(config: Config, bridge: AuthBridge, metrics: MetricsRecorder) -> Self {
        let cache = bridge.cache().clone();
        let directory = Arc::new(VirtualDirectory::from_config(&config, cache.clone()));
        let handler = Arc::new(LdapHandler::new(
            Arc::new(bridge),
            directory,
            metrics.clone(),
        ));

        Self {
            config,
            cache,
            handler,
            metrics,
            lifecycle: Mutex::new(Lifecycle {
                state: ServiceState::Running,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &Arc<CredentialCache> {
        &self.cache
    }

    pub fn state(&self) -> ServiceState {
        self.lifecycle.lock().state
    }

    /// Token cancelled when the service is destroyed
    pub fn shutdown_token(&self) -> CancellationToken {
        self.lifecycle.lock().shutdown.clone()
    }

    /// Open the TCP listener on the configured address
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.service_address();
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            Error::Io(io::Error::new(
                e.kind(),
                format!("failed to listen on {}: {}", addr, e),
            ))
        })?;

        info!(addr = %listener.local_addr()?, "LDAP service listening");
        Ok(listener)
    }

    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept connections until the service is destroyed
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let shutdown = self.shutdown_token();
        if shutdown.is_cancelled() {
            return Ok(());
        }

        if self.cache.is_enabled() {
            tokio::spawn(sweep_cache(
                self.cache.clone(),
                self.metrics.clone(),
                shutdown.clone(),
            ));
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("LDAP listener stopped");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };

                    let handler = self.handler.clone();
                    let metrics = self.metrics.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(
                        handle_connection(stream, peer, handler, metrics, shutdown)
                            .instrument(info_span!("connection", %peer)),
                    );
                }
            }
        }

        Ok(())
    }

    /// Stop the service. Only the first call has any effect.
    pub fn destroy(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == ServiceState::Terminated {
            return;
        }

        info!("Stopping LDAP service");
        lifecycle.state = ServiceState::Terminated;
        lifecycle.shutdown.cancel();
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<LdapHandler>,
    metrics: MetricsRecorder,
    shutdown: CancellationToken,
) {
    debug!("Client connected");
    metrics.connection_opened();

    let (r, w) = stream.into_split();
    let mut requests = FramedRead::new(r, LdapCodec::default());
    let mut responses = FramedWrite::new(w, LdapCodec::default());

    loop {
        let msg = tokio::select! {
            _ = shutdown.cancelled() => break,
            msg = requests.next() => msg,
        };

        let msg = match msg {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!(error = ?e, "Failed to decode LDAP message");
                break;
            }
            None => break,
        };

        match handler.handle(msg).await {
            HandlerOutcome::Reply(replies) => {
                for reply in replies {
                    if let Err(e) = responses.send(reply).await {
                        debug!(error = ?e, "Failed to send LDAP response");
                        metrics.connection_closed();
                        return;
                    }
                }
            }
            HandlerOutcome::Close => break,
        }
    }

    metrics.connection_closed();
    debug!(%peer, "Client disconnected");
}

async fn sweep_cache(cache: Arc<CredentialCache>, metrics: MetricsRecorder, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(cache.ttl());
    // the first tick completes immediately
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let purged = cache.purge_expired();
                let remaining = cache.len();
                if purged > 0 {
                    debug!(purged, remaining, "Purged expired cache entries");
                }
                metrics.record_cache_sweep(purged, remaining);
            }
        }
    }
}
