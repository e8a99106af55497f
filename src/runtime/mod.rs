// ABOUTME: Container runtime access for the privileged driver.
// ABOUTME: Capability traits, the bollard backend, and local runtime detection.

mod bollard;
mod detection;
mod error;
#[cfg(test)]
pub(crate) mod fake;
pub mod traits;
mod types;

pub use self::bollard::BollardRuntime;
pub use detection::{DetectionError, detect_runtime};
pub use error::{RuntimeError, RuntimeErrorKind};
pub use traits::*;
pub use types::{DetectedRuntime, RuntimeConfig, RuntimeType};

/// Detect the local runtime and connect to it.
pub async fn connect(config: &RuntimeConfig) -> Result<BollardRuntime, RuntimeError> {
    let info = detect_runtime(Some(config))?;
    tracing::info!(
        runtime = %info.runtime_type,
        socket = %info.socket_path,
        "Using container runtime"
    );
    let runtime = BollardRuntime::connect(&info)?;
    runtime.ping().await?;
    Ok(runtime)
}
