// ABOUTME: Entry point for the hearth CLI application.
// ABOUTME: Runs the privileged driver, the container daemon, or lists templates.

mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use hearth::config::Config;
use hearth::driver::{self, DriverClient};
use hearth::error::Result;
use hearth::events::{Event, EventBus};
use hearth::logs::LogAggregator;
use hearth::runner::DriverRunner;
use hearth::service::{ContainerService, ServiceSettings};
use hearth::store::Stores;
use hearth::template::TemplateStore;
use std::env;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let result = run(cli).await;

    if let Err(e) = result {
        eprintln!("Error: {}", e.private_message());
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load(path)?,
        None => Config::discover(&env::current_dir()?)?,
    };
    config.with_env_overrides()
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Driver { listen } => run_driver(config, listen).await,
        Commands::Daemon => run_daemon(config).await,
        Commands::Templates => list_templates(&config),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}

/// Serve the runtime driver until interrupted.
async fn run_driver(config: Config, listen: Option<SocketAddr>) -> Result<()> {
    let addr = listen.unwrap_or(config.driver.listen);
    let listener = driver::bind(addr).await?;
    let state = driver::state_from_config(&config).await?;
    driver::serve(listener, state, shutdown_signal()).await?;
    Ok(())
}

/// Load containers, start the flagged ones, and stop them again on interrupt.
async fn run_daemon(config: Config) -> Result<()> {
    let stores = Stores::on_disk(&config.data_dir).await?;
    let templates = Arc::new(TemplateStore::load(&config.templates_dir)?);
    let bus = Arc::new(EventBus::new());
    let logs = Arc::new(LogAggregator::new(
        config.data_dir.clone(),
        config.logs.buffer_capacity,
    ));
    let runner = Arc::new(DriverRunner::new(
        DriverClient::new(config.driver.listen),
        config.data_dir.clone(),
    ));

    let service = ContainerService::new(
        stores,
        templates,
        runner,
        Arc::clone(&bus),
        logs,
        ServiceSettings::from_config(&config),
    );
    let lifecycle = service.install_lifecycle();

    service.load().await?;
    bus.publish(&Event::ServerStart)?;
    lifecycle.join().await;
    tracing::info!("Daemon ready");

    shutdown_signal().await;
    tracing::info!("Shutting down");
    bus.publish(&Event::ServerStop)?;
    lifecycle.join().await;
    Ok(())
}

fn list_templates(config: &Config) -> Result<()> {
    let templates = TemplateStore::load(&config.templates_dir)?;
    for template in templates.list() {
        let method = match template.docker() {
            Some(docker) if docker.requires_build() => "build",
            Some(_) => "image",
            None => "none",
        };
        println!(
            "{}\tv{}\t{}\t{}",
            template.id, template.version, method, template.name
        );
    }
    Ok(())
}
