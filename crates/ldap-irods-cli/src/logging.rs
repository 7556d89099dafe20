//! Logging setup
//!
//! Log lines go to a console stream and, when configured, to a log file that
//! rolls over daily and keeps the last few files. The console stream can be detached at runtime: the
//! background process logs to the handshake pipe until the controller has
//! read the success sentinel, and must stop writing there afterwards.

use anyhow::Context;
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Which standard stream the console output goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Console {
    Stdout,
    Stderr,
}

/// Console writer that can be switched off through a [`LogHandle`]
#[derive(Debug, Clone)]
pub struct DetachableWriter {
    console: Console,
    detached: Arc<AtomicBool>,
}

impl DetachableWriter {
    pub fn new(console: Console) -> (Self, LogHandle) {
        let detached = Arc::new(AtomicBool::new(false));
        let writer = Self {
            console,
            detached: detached.clone(),
        };
        (writer, LogHandle { detached })
    }
}

pub enum ConsoleWriter {
    Stdout(io::Stdout),
    Stderr(io::Stderr),
    Detached,
}

impl Write for ConsoleWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ConsoleWriter::Stdout(w) => w.write(buf),
            ConsoleWriter::Stderr(w) => w.write(buf),
            ConsoleWriter::Detached => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ConsoleWriter::Stdout(w) => w.flush(),
            ConsoleWriter::Stderr(w) => w.flush(),
            ConsoleWriter::Detached => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for DetachableWriter {
    type Writer = ConsoleWriter;

    fn make_writer(&'a self) -> Self::Writer {
        if self.detached.load(Ordering::Acquire) {
            return ConsoleWriter::Detached;
        }
        match self.console {
            Console::Stdout => ConsoleWriter::Stdout(io::stdout()),
            Console::Stderr => ConsoleWriter::Stderr(io::stderr()),
        }
    }
}

/// Rotated log files kept next to the active one
pub const MAX_LOG_FILES: usize = 3;

/// Daily rolling appender writing `<path>.<date>` files
pub fn rolling_file(path: &str) -> anyhow::Result<RollingFileAppender> {
    let path = Path::new(path);
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("log file path {} has no file name", path.display()))?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(file_name)
        .max_log_files(MAX_LOG_FILES)
        .build(dir)
        .with_context(|| format!("failed to open log file {}", path.display()))
}

/// Handle to the console side of the log output
#[derive(Debug, Clone)]
pub struct LogHandle {
    detached: Arc<AtomicBool>,
}

impl LogHandle {
    /// Stop writing log lines to the console. The log file is unaffected.
    pub fn detach(&self) {
        self.detached.store(true, Ordering::Release);
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `level`.
pub fn init(level: &str, log_file: Option<&str>, console: Console) -> anyhow::Result<LogHandle> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (console_writer, handle) = DetachableWriter::new(console);
    let console_layer = fmt::layer().with_target(true).with_writer(console_writer);

    let file_layer = match log_file {
        Some(path) => Some(
            fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(rolling_file(path)?),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("failed to install the log subscriber")?;

    if let Some(path) = log_file {
        tracing::info!(path, "Logging to file");
    }

    Ok(handle)
}
