//! Keystone - Entry point
//!
//! Serves the built-in `/api` routes until a termination signal arrives.

use std::path::PathBuf;

use anyhow::Context;
use tracing::{error, info};

use keystone::config::{ConfigLoader, DEFAULT_ENV_PREFIX};
use keystone::server::Server;
use keystone::telemetry::init_logging;

/// Command-line arguments.
struct Args {
    /// Path to configuration file.
    config: Option<PathBuf>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => match args.next() {
                    Some(path) => config = Some(PathBuf::from(path)),
                    None => {
                        eprintln!("--config requires a path");
                        std::process::exit(1);
                    }
                },
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("keystone {}", keystone::VERSION);
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
        }

        Self { config }
    }
}

fn print_help() {
    println!(
        r"Keystone - HTTP server runtime

USAGE:
    keystone [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file (TOML or JSON)
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT VARIABLES:
    KEYSTONE__SERVER__HOST                   Bind address (default: 0.0.0.0)
    KEYSTONE__SERVER__PORT                   TCP port (default: 8080)
    KEYSTONE__SERVER__SOCKET_PATH            Unix socket path (empty disables it)
    KEYSTONE__SERVER__SHUTDOWN_TIMEOUT_SECS  Shutdown grace period (default: 30)
    KEYSTONE__SERVER__EXPOSE_ERROR_DETAILS   Send unclassified error details (default: true)
    KEYSTONE__SERVER__MAX_BODY_SIZE          Request body limit in bytes (default: 1048576)
    KEYSTONE__LOGGING__LEVEL                 Log filter (default: info)
    KEYSTONE__LOGGING__FORMAT                json, pretty or compact (default: json)
    RUST_LOG                                 Overrides the log filter

EXAMPLES:
    keystone --config /etc/keystone/keystone.toml
    KEYSTONE__SERVER__PORT=9000 keystone
"
    );
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader
            .with_file(path)
            .with_context(|| format!("cannot load {}", path.display()))?;
    }
    let config = loader
        .with_dotenv()?
        .with_env_prefix(DEFAULT_ENV_PREFIX)
        .load()
        .context("invalid configuration")?;

    init_logging(&config.log_config()).context("cannot initialize logging")?;

    info!(version = keystone::VERSION, "Starting Keystone");

    Server::builder()
        .config(config.server_config())
        .route(keystone::api_routes(keystone::VERSION))
        .build()
        .run()
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        let chain = format!("{e:#}");
        error!(error = %chain, "Keystone failed");
        // Logging may not be up yet if configuration failed.
        eprintln!("keystone: {chain}");
        std::process::exit(1);
    }
}
