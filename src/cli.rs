// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines the driver and daemon processes plus template inspection.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hearth")]
#[command(about = "Container lifecycle engine for a personal server")]
#[command(version)]
pub struct Cli {
    /// Configuration file (defaults to hearth.yml in the working directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the privileged runtime driver on a loopback address
    Driver {
        /// Address to listen on (overrides the configuration)
        #[arg(short, long)]
        listen: Option<SocketAddr>,
    },

    /// Run the container service against a running driver
    Daemon,

    /// List the templates that load from the templates directory
    Templates,
}
