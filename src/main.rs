//! CLI for Messager
//!
//! Subcommands:
//! - `producer`: run the HTTP producer
//! - `consumer`: run the consumer that stores deliveries in the sink

use clap::Parser;
use messager::config::load_config_from;
use messager::runtime::{run_consumer, run_producer};
use messager::utils::logging;
use std::process::ExitCode;
use tracing::error;

#[derive(Parser)]
#[command(name = "messager")]
enum Command {
    /// Accept messages over HTTP and publish them to the exchange
    Producer {
        /// Settings file, without extension
        #[arg(long, default_value = "config/default")]
        config: String,
    },
    /// Consume the exchange and store every message
    Consumer {
        /// Settings file, without extension
        #[arg(long, default_value = "config/default")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cmd = Command::parse();

    let path = match &cmd {
        Command::Producer { config } | Command::Consumer { config } => config.clone(),
    };
    let settings = match load_config_from(&path) {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    logging::init(&settings.logging.level);

    let result = match cmd {
        Command::Producer { .. } => run_producer(settings).await,
        Command::Consumer { .. } => run_consumer(settings).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Exiting after fatal error: {}", e);
            ExitCode::FAILURE
        }
    }
}
