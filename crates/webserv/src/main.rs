use std::{path::PathBuf, process::ExitCode};

use anyhow::{Context as _, Error};
use clap::Parser;
use tracing::{event, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use webserv::{processor::SiteProcessor, Dispatcher};

const USAGE: &str = "Usage: webserv <CONFIG>";

/// Serve the sites described by an nginx-style configuration file.
#[derive(Parser, Debug)]
#[command(name = "webserv", version)]
struct Cli {
    /// Path to the configuration file
    config: PathBuf,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) if !error.use_stderr() => {
            // --help and --version
            let _ = error.print();
            return ExitCode::SUCCESS;
        }
        Err(error) => {
            eprintln!("[error] {}", error.kind());
            eprintln!("{}", USAGE);
            return ExitCode::FAILURE;
        }
    };

    if !cli.config.is_file() {
        eprintln!(
            "[error] configuration file \"{}\" not found",
            cli.config.display()
        );
        eprintln!("{}", USAGE);
        return ExitCode::FAILURE;
    }

    init_logging();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            event!(Level::ERROR, "{:#}", error);
            eprintln!("[error] {:#}", error);
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("[warn] logging already initialized");
    }
}

fn run(cli: Cli) -> Result<(), Error> {
    let servers = webserv_config::parse_file(&cli.config)?;
    event!(Level::INFO, count = servers.len(), "configuration loaded");

    let mut dispatcher = Dispatcher::bind(servers, SiteProcessor::default())?;

    let shutdown = dispatcher.shutdown_handle();
    ctrlc::set_handler(move || shutdown.request())
        .context("failed to install interrupt handler")?;

    dispatcher.run()?;

    event!(Level::INFO, "server stopped");
    Ok(())
}
