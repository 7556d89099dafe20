//! LDAP-iRODS-Auth
//!
//! LDAP service that authenticates simple binds against an iRODS zone.

mod args;
mod daemon;
mod logging;

use args::Args;
use logging::Console;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse_args();

    if args.version {
        println!("{}", args::version_json()?);
        return Ok(());
    }

    if args.child_process {
        return daemon::child_main().await;
    }

    let config = args.load_config(std::io::stdin().lock())?;
    logging::init(&config.log_level, config.log_file(), Console::Stderr)?;
    info!(
        version = ldap_irods_core::VERSION,
        service = %config.service_address(),
        irods = %format!("{}:{}", config.irods_host, config.irods_port),
        zone = %config.irods_zone,
        "Starting LDAP-iRODS-Auth"
    );

    daemon::run_controller(config).await
}
