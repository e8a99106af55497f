// ABOUTME: Volume operations trait for container runtimes.
// ABOUTME: Create, remove and list named volumes by label.

use super::sealed::Sealed;
use async_trait::async_trait;
use std::collections::HashMap;

#[async_trait]
pub trait VolumeOps: Sealed + Send + Sync {
    /// Create a named volume. Creating an existing volume succeeds.
    async fn create_volume(
        &self,
        name: &str,
        labels: &HashMap<String, String>,
    ) -> Result<(), VolumeError>;

    async fn remove_volume(&self, name: &str) -> Result<(), VolumeError>;

    /// Names of volumes carrying every given label.
    async fn list_volumes(
        &self,
        labels: &HashMap<String, String>,
    ) -> Result<Vec<String>, VolumeError>;
}

#[derive(Debug, thiserror::Error)]
pub enum VolumeError {
    #[error("volume not found: {0}")]
    NotFound(String),

    #[error("volume in use: {0}")]
    InUse(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}
