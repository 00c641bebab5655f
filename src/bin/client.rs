//! rSSLCon Client Binary
//!
//! Command-line driver for one authentication attempt against an
//! AnyConnect-compatible gateway.

use clap::{Parser, Subcommand};
use log::{debug, error, info};
use rsslcon::{Config, Result, VpnClient};
use std::process;

#[derive(Parser)]
#[command(name = "rsslcon-client")]
#[command(about = "AnyConnect-compatible SSL-VPN authentication client")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Authenticate and print the negotiated session
    Connect {
        /// User group (overrides config)
        #[arg(short, long)]
        group: Option<String>,

        /// Skip server certificate verification
        #[arg(long)]
        insecure: bool,
    },
    /// Validate the configuration file
    CheckConfig,
}

impl Args {
    /// Initialize logging based on verbosity level and config
    fn init_logging(&self, config_level: Option<&str>) {
        let level = if self.verbose {
            log::LevelFilter::Debug
        } else {
            config_level
                .and_then(|l| l.parse().ok())
                .unwrap_or(log::LevelFilter::Info)
        };
        env_logger::Builder::from_default_env()
            .filter_level(level)
            .init();
    }
}

fn main() {
    let args = Args::parse();

    let config = match Config::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            args.init_logging(None);
            error!("Failed to load {}: {}", args.config, e);
            process::exit(1);
        }
    };
    args.init_logging(Some(&config.logging.level));
    info!("Starting rSSLCon Client v{}", rsslcon::VERSION);

    if let Err(e) = run(&args, config) {
        error!("{e}");
        process::exit(1);
    }
}

fn run(args: &Args, mut config: Config) -> Result<()> {
    match &args.command {
        Command::CheckConfig => {
            config.validate()?;
            println!("{}: ok", args.config);
            println!("  gateway: {}", config.server.host);
            println!("  user:    {}", config.auth.username);
            println!("  version: {}", config.agent.reported_version());
            Ok(())
        }
        Command::Connect { group, insecure } => {
            if let Some(group) = group {
                config.auth.group = group.clone();
            }
            if *insecure {
                config.server.verify_certificate = false;
            }
            debug!("Gateway: {}", config.server.host);

            let mut client = VpnClient::new(config)?;
            let result = client.connect();
            if let Err(e) = result {
                client.disconnect();
                return Err(e);
            }

            let session = client.session();
            println!("Authenticated to {}", session.host);
            println!("  user:         {}", session.username);
            println!("  group:        {}", session.group);
            println!("  tunnel group: {}", session.tunnel_group);
            println!("  status:       {:?}", client.status());
            client.disconnect();
            Ok(())
        }
    }
}
