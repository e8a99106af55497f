// ABOUTME: The Container record owned by the registry and its status machine.
// ABOUTME: Also defines the patch and update-check types that mutate it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::types::{ContainerId, ImageRef, TemplateId};

/// Lifecycle status of a container.
///
/// `off -> building -> starting -> running -> stopping -> off`, with `error`
/// reachable from any active state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    #[default]
    Off,
    Building,
    Starting,
    Running,
    Stopping,
    Error,
}

impl ContainerStatus {
    /// Transitional states in which Start/Stop are no-ops.
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            ContainerStatus::Building | ContainerStatus::Starting | ContainerStatus::Stopping
        )
    }

    /// Anything that still owns a runtime process or is about to.
    pub fn is_active(self) -> bool {
        !matches!(self, ContainerStatus::Off | ContainerStatus::Error)
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerStatus::Off => "off",
            ContainerStatus::Building => "building",
            ContainerStatus::Starting => "starting",
            ContainerStatus::Running => "running",
            ContainerStatus::Stopping => "stopping",
            ContainerStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// A managed container: the persisted intent to run one runtime container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub id: ContainerId,
    #[serde(default)]
    pub template_id: Option<TemplateId>,
    pub image: String,
    #[serde(default)]
    pub image_tag: Option<String>,
    #[serde(default)]
    pub status: ContainerStatus,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub launch_on_startup: bool,
    /// Database role declared by the template -> linked container.
    #[serde(default)]
    pub databases: BTreeMap<String, ContainerId>,
    /// Result of the last update check. Never persisted.
    #[serde(skip)]
    pub update: Option<ContainerUpdate>,
}

impl Container {
    /// A fresh container in the `off` state.
    pub fn new(id: ContainerId, name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            id,
            template_id: None,
            image: image.into(),
            image_tag: None,
            status: ContainerStatus::Off,
            name: name.into(),
            description: None,
            color: None,
            icon: None,
            command: None,
            launch_on_startup: false,
            databases: BTreeMap::new(),
            update: None,
        }
    }

    /// `image[:tag]` as handed to the runtime.
    ///
    /// The tag column replaces any tag embedded in `image`. Unparseable
    /// images are passed through for the runtime to reject.
    pub fn image_reference(&self) -> String {
        match ImageRef::from_parts(&self.image, self.image_tag.as_deref()) {
            Ok(reference) => reference.to_string(),
            Err(_) => self.image.clone(),
        }
    }
}

/// Image identities compared by an update check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerUpdate {
    pub current_version: String,
    pub latest_version: String,
}

/// Partial edit of a container's user-editable columns.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub image: Option<String>,
    pub image_tag: Option<String>,
    pub command: Option<String>,
    pub launch_on_startup: Option<bool>,
}

impl ContainerPatch {
    /// Apply the set fields onto `container`.
    pub fn apply(self, container: &mut Container) {
        if let Some(name) = self.name {
            container.name = name;
        }
        if let Some(description) = self.description {
            container.description = Some(description);
        }
        if let Some(color) = self.color {
            container.color = Some(color);
        }
        if let Some(icon) = self.icon {
            container.icon = Some(icon);
        }
        if let Some(image) = self.image {
            container.image = image;
        }
        if let Some(tag) = self.image_tag {
            container.image_tag = Some(tag);
        }
        if let Some(command) = self.command {
            container.command = Some(command).filter(|c| !c.trim().is_empty());
        }
        if let Some(launch) = self.launch_on_startup {
            container.launch_on_startup = launch;
        }
    }
}
