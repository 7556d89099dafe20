//! Command-line arguments

use clap::Parser;
use ldap_irods_core::{Config, Result};
use serde::Serialize;
use std::ffi::OsString;
use std::io::Read;

/// Long flags that are also accepted with a single dash (`-config`)
const SINGLE_DASH_FLAGS: &[&str] = &["version", "help", "config", "log", "child_process"];

#[derive(Parser, Debug, Default)]
#[command(name = "ldap-irods-auth")]
#[command(author = "LDAP-iRODS-Auth Team")]
#[command(about = "LDAP service authenticating binds against iRODS", long_about = None)]
#[command(disable_version_flag = true)]
pub struct Args {
    /// Print version information
    #[arg(short = 'v', long)]
    pub version: bool,

    /// Configuration YAML file, or `-` to read it from stdin
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Run in foreground
    #[arg(short = 'f')]
    pub foreground: bool,

    /// Log file path, `-` for stderr only
    #[arg(long, value_name = "PATH")]
    pub log: Option<String>,

    #[arg(long = "child_process", hide = true)]
    pub child_process: bool,
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse_from(normalize(std::env::args_os()))
    }

    /// Load the configuration selected by `-config`, then apply the flag
    /// overrides. `stdin` is only read for `-config -`.
    pub fn load_config<R: Read>(&self, mut stdin: R) -> Result<Config> {
        let mut config = match self.config.as_deref() {
            None => Config::from_env()?,
            Some("-") => {
                let mut yaml = Vec::new();
                stdin.read_to_end(&mut yaml)?;
                Config::from_yaml(&yaml)?
            }
            Some(path) => Config::from_file(path)?,
        };

        if self.foreground {
            config.foreground = true;
        }
        if let Some(log) = &self.log {
            config.log_path = log.clone();
        }

        Ok(config)
    }
}

/// Rewrite `-config`-style flags to `--config` so clap accepts them
pub fn normalize<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let mut out = Vec::new();
    let mut passthrough = false;

    for arg in args {
        if passthrough {
            out.push(arg);
            continue;
        }

        let rewritten = arg.to_str().and_then(|s| {
            if s == "--" {
                return None;
            }
            let flag = s.strip_prefix('-').filter(|f| !f.starts_with('-'))?;
            let name = flag.split('=').next().unwrap_or(flag);
            SINGLE_DASH_FLAGS
                .contains(&name)
                .then(|| OsString::from(format!("-{}", s)))
        });

        if arg == "--" {
            passthrough = true;
        }
        out.push(rewritten.unwrap_or(arg));
    }

    out
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VersionInfo {
    package_name: &'static str,
    release_version: String,
}

pub fn version_json() -> serde_json::Result<String> {
    serde_json::to_string_pretty(&VersionInfo {
        package_name: ldap_irods_core::APPLICATION_NAME,
        release_version: format!("v{}", ldap_irods_core::VERSION),
    })
}
