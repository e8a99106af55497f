// ABOUTME: Wire types and naming rules shared by the driver server and its client.
// ABOUTME: Runtime object names are derived from the container id, never stored.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::runtime::ContainerSpec;
use crate::types::ContainerId;

pub const LABEL_MANAGED: &str = "hearth.managed";
pub const LABEL_CONTAINER: &str = "hearth.container";

const CONTAINER_PREFIX: &str = "hearth_container_";
const IMAGE_PREFIX: &str = "hearth_image_";
pub const VOLUME_PREFIX: &str = "hearth_volume_";

/// Runtime container name for a container id.
pub fn container_name(id: &ContainerId) -> String {
    format!("{CONTAINER_PREFIX}{id}")
}

/// Tag of the image built for a container.
pub fn image_name(id: &ContainerId) -> String {
    format!("{IMAGE_PREFIX}{id}")
}

/// Named volume for one volume key of a container.
///
/// Characters the runtime rejects in volume names are replaced by `_`.
pub fn volume_name(id: &ContainerId, key: &str) -> String {
    let key: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{VOLUME_PREFIX}{id}_{key}")
}

/// Labels put on every runtime object owned by a container.
pub fn owner_labels(id: &ContainerId) -> HashMap<String, String> {
    HashMap::from([
        (LABEL_MANAGED.to_string(), "true".to_string()),
        (LABEL_CONTAINER.to_string(), id.to_string()),
    ])
}

/// Query of `GET /runtime/containers/{id}/logs/{stream}`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LogsQuery {
    /// Unix seconds; earlier output is skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,
}

/// Body of `POST /runtime/containers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateContainerRequest {
    pub id: ContainerId,
    pub spec: ContainerSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateContainerResponse {
    /// Runtime-assigned id; informational only.
    pub runtime_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitResponse {
    pub status_code: i64,
}

/// Body of `POST /runtime/images/pull`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub image: String,
}

/// Body of `POST /runtime/images/build`.
///
/// The build context is always the container's cloned source directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRequest {
    pub id: ContainerId,
    #[serde(default)]
    pub dockerfile: Option<String>,
}

/// Body of `POST /runtime/volumes` and `DELETE /runtime/volumes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeRequest {
    pub name: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// Error body returned for every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}
