//! lode CLI Binary
//!
//! Command-line interface for content-addressed data tracking.

use anyhow::Context;
use clap::Parser;
use lode::cli::{Cli, RunContext};
use lode::config::ConfigLoader;
use lode::logging::{init_logging, LoggingConfig};
use lode::repo::Repo;
use std::process;
use tracing::{error, info};

fn main() {
    let cli = Cli::parse();

    let logging_config = build_logging_config(&cli);
    if let Err(e) = init_logging(Some(&logging_config)) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    match run(&cli) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

/// Returns whether every item of the command succeeded
fn run(cli: &Cli) -> anyhow::Result<bool> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let context = RunContext::new(cli.workspace.clone(), cli.config.clone())
        .context("Failed to resolve workspace")?;
    info!(command = cli.command.name(), "lode starting");

    let output = runtime
        .block_on(context.execute(&cli.command))
        .with_context(|| format!("lode {} failed", cli.command.name()))?;
    println!("{}", output.text);
    Ok(output.ok)
}

/// Build logging configuration from config files, then CLI args on top
fn build_logging_config(cli: &Cli) -> LoggingConfig {
    let loaded = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path).ok(),
        None => Repo::discover(&cli.workspace)
            .ok()
            .and_then(|root| {
                ConfigLoader::load(&root).ok().map(|mut config| {
                    if config.logging.file.is_relative() {
                        config.logging.file = root.join(&config.logging.file);
                    }
                    config
                })
            }),
    };
    let mut config = loaded.map(|c| c.logging).unwrap_or_default();

    if cli.verbose {
        config.level = "debug".to_string();
    }
    if let Some(level) = &cli.log_level {
        config.level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.format = format.clone();
    }
    if let Some(output) = &cli.log_output {
        config.output = output.clone();
    }
    if let Some(file) = &cli.log_file {
        config.file = file.clone();
    }
    config
}
