// ABOUTME: Composable capability traits for container runtimes.
// ABOUTME: Defines ContainerOps, ImageOps, VolumeOps, LogOps and RuntimeInfo.

mod container;
mod image;
mod logs;
mod runtime_info;
pub(crate) mod sealed;
mod shared_types;
mod volume;

pub use container::{ContainerError, ContainerFilters, ContainerOps, ContainerSummary};
pub use image::{ImageError, ImageOps, ProgressStream};
pub use logs::{LogChunk, LogError, LogOps, LogOptions, LogStream};
pub use runtime_info::{RuntimeInfo, RuntimeInfoError};
pub use shared_types::*;
pub use volume::{VolumeError, VolumeOps};

/// Everything the privileged driver needs from a backend.
pub trait Runtime: ContainerOps + ImageOps + VolumeOps + LogOps + RuntimeInfo + 'static {}

impl<T> Runtime for T where
    T: ContainerOps + ImageOps + VolumeOps + LogOps + RuntimeInfo + 'static
{
}
