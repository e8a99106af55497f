// ABOUTME: Image operations trait for container runtimes.
// ABOUTME: Pull and build images as progress streams, inspect local images.

use super::sealed::Sealed;
use super::shared_types::{ImageInfo, ImageProgress};
use crate::types::ImageRef;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// Progress records as the runtime reports them.
pub type ProgressStream = Pin<Box<dyn Stream<Item = Result<ImageProgress, ImageError>> + Send>>;

/// Image operations: pull, build, inspect.
#[async_trait]
pub trait ImageOps: Sealed + Send + Sync {
    /// Pull an image from a registry. Progress ends when the pull completes.
    async fn pull_image(&self, reference: &ImageRef) -> Result<ProgressStream, ImageError>;

    /// Build an image from a tar'd build context and tag it `tag`.
    async fn build_image(
        &self,
        tag: &str,
        context: Vec<u8>,
        dockerfile: &str,
    ) -> Result<ProgressStream, ImageError>;

    async fn inspect_image(&self, reference: &str) -> Result<ImageInfo, ImageError>;
}

/// Errors from image operations.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("image not found: {0}")]
    NotFound(String),

    #[error("pull failed: {0}")]
    PullFailed(String),

    #[error("build failed: {0}")]
    BuildFailed(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}
