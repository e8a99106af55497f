// ABOUTME: Privileged runtime driver and the loopback client the runner uses to reach it.
// ABOUTME: The only component that touches the container runtime or mount directories.

pub mod api;
mod client;
mod error;
mod server;

pub use client::{ByteStream, DriverClient, DriverProgressStream, LineStream, lines};
pub use error::DriverError;
pub use server::{DriverState, bind, router, serve};

use std::sync::Arc;

use crate::config::Config;
use crate::runtime::RuntimeError;

/// Connect to the local runtime and build driver state from configuration.
pub async fn state_from_config(config: &Config) -> Result<DriverState, RuntimeError> {
    let runtime = crate::runtime::connect(&config.driver.runtime_config()).await?;
    Ok(DriverState::new(
        Arc::new(runtime),
        config.data_dir.clone(),
        config.timeouts.runtime_stop,
    ))
}
