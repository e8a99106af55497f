// ABOUTME: Translates a container and its resource rows into a runtime creation spec.
// ABOUTME: Pure; the driver fills in the runtime name, labels and host bind paths.

use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, Result};
use crate::model::{Container, Resources, VolumeKind};
use crate::runtime::{ContainerSpec, MountKind, MountSpec, PortMapping, Protocol};

/// Lets containers reach services published on the host.
pub const HOST_GATEWAY: &str = "host.docker.internal:host-gateway";

fn port_number(label: &str, value: &str) -> Result<u16> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Validation(format!("{label} port is not a valid port number: {value}")))
}

pub fn build_spec(
    container: &Container,
    resources: &Resources,
    image: &str,
) -> Result<ContainerSpec> {
    let env: BTreeMap<String, String> = resources
        .env
        .iter()
        .map(|e| (e.name.clone(), e.value.clone()))
        .collect();

    let ports = resources
        .ports
        .iter()
        .map(|p| {
            Ok(PortMapping {
                container_port: port_number("internal", &p.internal)?,
                host_port: Some(port_number("external", &p.external)?),
                protocol: Protocol::Tcp,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mounts = resources
        .volumes
        .iter()
        .map(|v| MountSpec {
            kind: match v.kind {
                VolumeKind::Bind => MountKind::Bind,
                VolumeKind::Volume => MountKind::Volume,
            },
            source: v.external_path.clone(),
            target: v.internal_path.clone(),
            read_only: false,
        })
        .collect();

    let sysctls: HashMap<String, String> = resources
        .sysctls
        .iter()
        .map(|s| (s.name.clone(), s.value.clone()))
        .collect();

    let command = container
        .command
        .as_deref()
        .map(|c| c.split_whitespace().map(str::to_string).collect::<Vec<_>>())
        .filter(|argv| !argv.is_empty());

    Ok(ContainerSpec {
        name: String::new(),
        image: image.to_string(),
        env,
        labels: HashMap::new(),
        ports,
        mounts,
        cap_add: resources.capabilities.iter().map(|c| c.name.clone()).collect(),
        sysctls,
        extra_hosts: vec![HOST_GATEWAY.to_string()],
        command,
    })
}
