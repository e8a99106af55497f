// ABOUTME: Lifecycle facts published on the in-process event bus.
// ABOUTME: Container creation, deletion, status, log lines and server start/stop.

use serde::Serialize;

use crate::model::{Container, ContainerStatus, LogKind, LogMessage};
use crate::types::ContainerId;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    ContainerCreated {
        id: ContainerId,
    },
    ContainerDeleted {
        id: ContainerId,
    },
    /// Carries a snapshot of the container as of the change.
    ContainerStatusChange {
        id: ContainerId,
        status: ContainerStatus,
        container: Container,
    },
    ContainerLog {
        id: ContainerId,
        kind: LogKind,
        message: LogMessage,
    },
    /// The set of containers changed; consumers should re-read the registry.
    ContainersChange,
    ContainersLoaded {
        count: usize,
    },
    ServerStart,
    ServerStop,
}

impl Event {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ContainerCreated { .. } => "container_created",
            Self::ContainerDeleted { .. } => "container_deleted",
            Self::ContainerStatusChange { .. } => "container_status_change",
            Self::ContainerLog { .. } => "container_log",
            Self::ContainersChange => "containers_change",
            Self::ContainersLoaded { .. } => "containers_loaded",
            Self::ServerStart => "server_start",
            Self::ServerStop => "server_stop",
        }
    }
}
