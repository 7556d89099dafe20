//! Background process bootstrap
//!
//! The controller re-executes the binary with `-child_process`, feeds it the
//! configuration as YAML on stdin and waits for one of two sentinel lines on
//! its stdout. Every other line the child prints before the sentinel is
//! relayed to the controller's stderr.

use crate::logging::{self, Console, LogHandle};
use anyhow::Context;
use ldap_irods_core::{Config, Error, Result};
use ldap_irods_server::{LdapService, MetricsRecorder};
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::process::{Child, Command};
use tokio::signal;
use tracing::{debug, error, info, warn};

pub const SUCCESS_SENTINEL: &str = "<<COMMUNICATION_CLOSE_SUCCESS>>";
pub const ERROR_SENTINEL: &str = "<<COMMUNICATION_CLOSE_ERROR>>";
pub const CHILD_PROCESS_FLAG: &str = "-child_process";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Starting,
    Handshaking,
    Running,
    Failed,
}

/// Starts the service as a detached background process
#[derive(Debug)]
pub struct DaemonSupervisor {
    program: PathBuf,
    args: Vec<String>,
    handshake_timeout: Option<Duration>,
    state: SupervisorState,
}

impl DaemonSupervisor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: vec![CHILD_PROCESS_FLAG.to_string()],
            handshake_timeout: None,
            state: SupervisorState::Starting,
        }
    }

    /// Supervisor re-executing the running binary
    pub fn current_exe() -> Result<Self> {
        let exe = std::env::current_exe()
            .map_err(|e| Error::Ipc(format!("failed to locate the running executable: {}", e)))?;
        Ok(Self::new(exe))
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// `None` waits for the sentinel forever
    pub fn with_handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Start the background process and wait until it reports its status.
    /// Returns the child's process id on success.
    pub async fn spawn(&mut self, config: &Config) -> Result<Option<u32>> {
        self.state = SupervisorState::Starting;
        let result = self.start_and_handshake(config).await;
        self.state = match &result {
            Ok(_) => SupervisorState::Running,
            Err(_) => SupervisorState::Failed,
        };
        result
    }

    async fn start_and_handshake(&mut self, config: &Config) -> Result<Option<u32>> {
        let yaml = config.to_yaml()?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| {
            Error::Ipc(format!(
                "failed to start background process {}: {}",
                self.program.display(),
                e
            ))
        })?;
        let pid = child.id();
        info!(?pid, "Started background process");

        self.state = SupervisorState::Handshaking;

        if let Err(e) = self.handshake(&mut child, yaml).await {
            // the child is in its own process group and would outlive us
            if let Err(kill_err) = child.start_kill() {
                debug!(error = %kill_err, "Background process already exited");
            }
            match child.wait().await {
                Ok(status) => debug!(%status, "Reaped background process"),
                Err(wait_err) => warn!(error = %wait_err, "Failed to reap background process"),
            }
            return Err(e);
        }

        Ok(pid)
    }

    async fn handshake(&self, child: &mut Child, yaml: String) -> Result<()> {
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Ipc("no stdin pipe to background process".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Ipc("no stdout pipe from background process".into()))?;

        debug!("Sending configuration data");
        if let Err(e) = stdin.write_all(yaml.as_bytes()).await {
            // the child may already have reported a failure on stdout
            warn!(error = %e, "Failed to send configuration to background process");
        }
        drop(stdin);

        let handshake = await_sentinel(BufReader::new(stdout), std::io::stderr());
        match self.handshake_timeout {
            Some(limit) => tokio::time::timeout(limit, handshake).await.map_err(|_| {
                Error::Ipc(format!(
                    "background process did not report within {:?}",
                    limit
                ))
            })?,
            None => handshake.await,
        }
    }
}

/// Read lines until a sentinel, relaying everything else to `relay`
pub async fn await_sentinel<R, W>(reader: R, mut relay: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = reader.lines();
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| Error::Ipc(format!("failed to read from background process: {}", e)))?
    {
        match line.trim() {
            SUCCESS_SENTINEL => return Ok(()),
            ERROR_SENTINEL => return Err(Error::Ipc("background process failed to start".into())),
            other => {
                let _ = writeln!(relay, "{}", other);
            }
        }
    }

    Err(Error::Ipc(
        "background process exited without reporting its status".into(),
    ))
}

// =========================================================================
// Roles
// =========================================================================

/// Controller role: run in the foreground, or start the background process
pub async fn run_controller(config: Config) -> anyhow::Result<()> {
    config.validate()?;

    if config.foreground {
        let service = prepare_service(config)?;
        let listener = service.bind().await?;
        return serve_until_signal(service, listener).await;
    }

    info!("Running the process in the background mode");
    let mut supervisor =
        DaemonSupervisor::current_exe()?.with_handshake_timeout(config.handshake_timeout());
    match supervisor.spawn(&config).await {
        Ok(pid) => {
            info!(?pid, "Successfully started background process");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Failed to start background process");
            Err(e.into())
        }
    }
}

/// Background role: read the configuration from stdin and report through
/// the sentinels on stdout
pub async fn child_main() -> anyhow::Result<()> {
    let mut yaml = Vec::new();
    let config = match tokio::io::stdin().read_to_end(&mut yaml).await {
        Ok(_) => Config::from_yaml(&yaml).and_then(|c| c.validate().map(|_| c)),
        Err(e) => Err(Error::Ipc(format!("failed to read configuration: {}", e))),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            report_failure(&e.to_string());
            return Err(e.into());
        }
    };

    let log = match logging::init(&config.log_level, config.log_file(), Console::Stdout) {
        Ok(log) => log,
        Err(e) => {
            report_failure(&format!("{:#}", e));
            return Err(e);
        }
    };
    info!("Start background process");

    let started = async {
        let service = prepare_service(config)?;
        let listener = service.bind().await?;
        Ok::<_, Error>((service, listener))
    };
    let (service, listener) = match started.await {
        Ok(started) => started,
        Err(e) => {
            error!(error = %e, "Failed to start the service");
            report_failure(&e.to_string());
            return Err(e.into());
        }
    };

    report_success(&log);
    serve_until_signal(service, listener).await
}

fn prepare_service(config: Config) -> Result<Arc<LdapService>> {
    if let Some(port) = config.metrics_port {
        MetricsRecorder::install(SocketAddr::from(([0, 0, 0, 0], port)))?;
    }
    Ok(Arc::new(LdapService::new(config)?))
}

async fn serve_until_signal(service: Arc<LdapService>, listener: TcpListener) -> anyhow::Result<()> {
    let watcher = {
        let service = service.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            service.destroy();
        })
    };

    let served = service.serve(listener).await;
    watcher.abort();
    service.destroy();

    served.context("LDAP service failed")?;
    info!("Service stopped, terminating LDAP-iRODS-Auth");
    Ok(())
}

fn report_failure(message: &str) {
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "{}", message);
    let _ = writeln!(out, "{}", ERROR_SENTINEL);
    let _ = out.flush();
}

fn report_success(log: &LogHandle) {
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "{}", SUCCESS_SENTINEL);
    let _ = out.flush();
    drop(out);
    // the controller closes its end once it has read the sentinel
    log.detach();
}

/// Resolves on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, terminating LDAP-iRODS-Auth"),
        _ = terminate => info!("Received SIGTERM, terminating LDAP-iRODS-Auth"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            irods_host: "irods.example.org".to_string(),
            irods_zone: "tempZone".to_string(),
            ..Default::default()
        }
    }

    fn shell(script: &str) -> DaemonSupervisor {
        DaemonSupervisor::new("sh")
            .with_args(["-c", script])
            .with_handshake_timeout(Some(Duration::from_secs(5)))
    }

    #[tokio::test]
    async fn test_await_sentinel_success_relays_other_lines() {
        let input = b"starting up\n  <<COMMUNICATION_CLOSE_SUCCESS>>  \nlater\n";
        let mut relayed = Vec::new();

        await_sentinel(&input[..], &mut relayed).await.unwrap();
        assert_eq!(String::from_utf8(relayed).unwrap(), "starting up\n");
    }

    #[tokio::test]
    async fn test_await_sentinel_error() {
        let input = b"bad config\n<<COMMUNICATION_CLOSE_ERROR>>\n";
        let result = await_sentinel(&input[..], Vec::new()).await;
        assert!(matches!(result, Err(Error::Ipc(_))));
    }

    #[tokio::test]
    async fn test_await_sentinel_eof() {
        let result = await_sentinel(&b"partial output"[..], Vec::new()).await;
        assert!(matches!(result, Err(Error::Ipc(_))));
    }

    #[tokio::test]
    async fn test_child_failure_sentinel_fails_controller() {
        let mut supervisor = shell(
            "cat >/dev/null; echo 'invalid configuration'; echo '<<COMMUNICATION_CLOSE_ERROR>>'; exit 1",
        );
        assert_eq!(supervisor.state(), SupervisorState::Starting);

        let result = supervisor.spawn(&test_config()).await;
        assert!(matches!(result, Err(Error::Ipc(_))));
        assert_eq!(supervisor.state(), SupervisorState::Failed);
    }

    #[tokio::test]
    async fn test_child_success_sentinel() {
        let mut supervisor = shell(
            "grep -q 'irods_host: irods.example.org' && echo '<<COMMUNICATION_CLOSE_SUCCESS>>'",
        );

        let pid = supervisor.spawn(&test_config()).await.unwrap();
        assert!(pid.is_some());
        assert_eq!(supervisor.state(), SupervisorState::Running);
    }

    #[tokio::test]
    async fn test_child_exiting_silently_fails() {
        let mut supervisor = shell("cat >/dev/null; exit 0");
        assert!(supervisor.spawn(&test_config()).await.is_err());
        assert_eq!(supervisor.state(), SupervisorState::Failed);
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let mut supervisor = shell("cat >/dev/null; sleep 5")
            .with_handshake_timeout(Some(Duration::from_millis(100)));
        let result = supervisor.spawn(&test_config()).await;
        assert!(matches!(result, Err(Error::Ipc(msg)) if msg.contains("did not report within 100ms")));
    }

    fn is_alive(pid: &str) -> bool {
        std::process::Command::new("kill")
            .args(["-0", pid])
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn test_hung_child_is_killed_after_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("child.pid");
        let script = format!(
            "echo $$ > {}; cat >/dev/null; exec sleep 30",
            pid_file.display()
        );
        let mut supervisor =
            shell(&script).with_handshake_timeout(Some(Duration::from_millis(300)));

        assert!(supervisor.spawn(&test_config()).await.is_err());
        assert_eq!(supervisor.state(), SupervisorState::Failed);

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        assert!(!is_alive(pid.trim()));
    }

    #[tokio::test]
    async fn test_child_reporting_failure_is_reaped() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("child.pid");
        let script = format!(
            "echo $$ > {}; cat >/dev/null; echo '<<COMMUNICATION_CLOSE_ERROR>>'; exec sleep 30",
            pid_file.display()
        );
        let mut supervisor = shell(&script);

        assert!(supervisor.spawn(&test_config()).await.is_err());

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        assert!(!is_alive(pid.trim()));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let mut supervisor = DaemonSupervisor::new("/nonexistent/ldap-irods-auth");
        let result = supervisor.spawn(&test_config()).await;
        assert!(matches!(result, Err(Error::Ipc(_))));
        assert_eq!(supervisor.state(), SupervisorState::Failed);
    }
}
