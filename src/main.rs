use clap::Parser;
use dashpool::configuration::config::{Config, Overrides};
use dashpool::controller::controller_handler::Controller;
use log::{error, info};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dashpool")]
#[command(version = "0.1.0")]
#[command(about = "Per-user pool of short-lived dashboard processes")]
struct Args {
    /// TOML configuration file; built-in defaults are used when omitted
    #[arg(env = "DASHPOOL_CONFIG")]
    config_file: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,
}

fn load_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = match &args.config_file {
        Some(path) => Config::from_file(path)?,
        None => {
            info!("No configuration file given, using defaults");
            Config::default()
        }
    };
    config.apply_overrides(&args.overrides);
    config.resolve_paths(&std::env::current_dir()?);
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() {
    // RUST_LOG overrides the default level
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .init();

    println!(
        "
==============================================================================
                      dashpool v0.1.0 - dashboard sessions
==============================================================================
"
    );

    let args = Args::parse();

    info!("Importing configuration");
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Unable to import configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!("Configuration imported successfully");

    let controller = match Controller::new(config) {
        Ok(controller) => controller,
        Err(e) => {
            error!("Unable to create a controller instance: {}, exiting...", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = controller.run().await {
        error!("Error occured in the controller process: {}, exiting...", e);
        std::process::exit(1);
    }
    info!("Bye");
}
