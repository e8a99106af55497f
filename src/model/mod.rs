// ABOUTME: Domain records shared by the registry, stores, runner and log aggregator.
// ABOUTME: Containers, their resource rows, tags and log lines.

mod container;
mod log;
mod resources;
mod tag;

pub use container::{Container, ContainerPatch, ContainerStatus, ContainerUpdate};
pub use log::{DOWNLOAD_MARKER, DownloadProgress, LogKind, LogLine, LogMessage};
pub use resources::{
    Capability, EnvType, EnvVariable, Port, Resource, Resources, Sysctl, Volume, VolumeKind,
};
pub use tag::{ContainerTag, Tag};
