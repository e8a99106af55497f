// ABOUTME: Resource rows attached to a container: ports, volumes, env, capabilities, sysctls.
// ABOUTME: Each row kind knows its store key and how to validate itself.

use serde::{Deserialize, Serialize};

use crate::types::{CapabilityId, ContainerId, EnvVariableId, PortId, SysctlId, VolumeId};

/// Common shape of a row that belongs to exactly one container.
pub trait Resource:
    Clone + Serialize + serde::de::DeserializeOwned + Send + Sync + 'static
{
    /// Table / file name for this row kind.
    const KIND: &'static str;

    fn id(&self) -> &str;
    fn container_id(&self) -> &ContainerId;

    /// Reject malformed rows before they reach a store.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Published port mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub id: PortId,
    pub container_id: ContainerId,
    /// Port inside the container.
    #[serde(rename = "in")]
    pub internal: String,
    /// Port published on the host.
    #[serde(rename = "out")]
    pub external: String,
}

impl Port {
    pub fn new(container_id: ContainerId, internal: &str, external: &str) -> Self {
        Self {
            id: PortId::generate(),
            container_id,
            internal: internal.to_string(),
            external: external.to_string(),
        }
    }
}

fn validate_port_number(label: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{label} port cannot be empty"));
    }
    value
        .trim()
        .parse::<u16>()
        .map(|_| ())
        .map_err(|_| format!("{label} port is not a valid port number: {value}"))
}

impl Resource for Port {
    const KIND: &'static str = "ports";

    fn id(&self) -> &str {
        self.id.as_str()
    }

    fn container_id(&self) -> &ContainerId {
        &self.container_id
    }

    fn validate(&self) -> Result<(), String> {
        validate_port_number("internal", &self.internal)?;
        validate_port_number("external", &self.external)
    }
}

/// How a volume's external side is provided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeKind {
    /// Host directory bind mount.
    Bind,
    /// Runtime-managed named volume.
    Volume,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub id: VolumeId,
    pub container_id: ContainerId,
    #[serde(rename = "type")]
    pub kind: VolumeKind,
    pub internal_path: String,
    /// Host path for binds, generated volume name for named volumes.
    pub external_path: String,
}

impl Resource for Volume {
    const KIND: &'static str = "volumes";

    fn id(&self) -> &str {
        self.id.as_str()
    }

    fn container_id(&self) -> &ContainerId {
        &self.container_id
    }

    fn validate(&self) -> Result<(), String> {
        if self.internal_path.trim().is_empty() {
            return Err("volume internal path cannot be empty".to_string());
        }
        if self.external_path.trim().is_empty() {
            return Err("volume external path cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Declared type of an environment variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvType {
    #[default]
    String,
    Port,
    Url,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVariable {
    pub id: EnvVariableId,
    pub container_id: ContainerId,
    #[serde(rename = "type", default)]
    pub kind: EnvType,
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub secret: bool,
}

impl EnvVariable {
    /// A plain string variable with no template metadata.
    pub fn plain(container_id: ContainerId, name: &str, value: &str) -> Self {
        Self {
            id: EnvVariableId::generate(),
            container_id,
            kind: EnvType::String,
            name: name.to_string(),
            display_name: name.to_string(),
            value: value.to_string(),
            default: None,
            description: None,
            secret: false,
        }
    }
}

impl Resource for EnvVariable {
    const KIND: &'static str = "env";

    fn id(&self) -> &str {
        self.id.as_str()
    }

    fn container_id(&self) -> &ContainerId {
        &self.container_id
    }

    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("environment variable name cannot be empty".to_string());
        }
        if self.name.contains('=') {
            return Err(format!(
                "environment variable name cannot contain '=': {}",
                self.name
            ));
        }
        Ok(())
    }
}

/// Additional runtime privilege granted to the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub id: CapabilityId,
    pub container_id: ContainerId,
    pub name: String,
}

impl Resource for Capability {
    const KIND: &'static str = "capabilities";

    fn id(&self) -> &str {
        self.id.as_str()
    }

    fn container_id(&self) -> &ContainerId {
        &self.container_id
    }

    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("capability name cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Namespaced kernel parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sysctl {
    pub id: SysctlId,
    pub container_id: ContainerId,
    pub name: String,
    pub value: String,
}

impl Resource for Sysctl {
    const KIND: &'static str = "sysctls";

    fn id(&self) -> &str {
        self.id.as_str()
    }

    fn container_id(&self) -> &ContainerId {
        &self.container_id
    }

    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("sysctl name cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Every resource row of one container, as handed to the runner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    pub ports: Vec<Port>,
    pub volumes: Vec<Volume>,
    pub env: Vec<EnvVariable>,
    pub capabilities: Vec<Capability>,
    pub sysctls: Vec<Sysctl>,
}

impl Resources {
    /// Value of the environment variable `name`, if set.
    pub fn env_value(&self, name: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.value.as_str())
    }
}
