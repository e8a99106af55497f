// ABOUTME: Builds a new container row and its resource rows from create options.
// ABOUTME: Template defaults are copied one-to-one; volumes become bind or named mounts.

use std::collections::BTreeMap;

use crate::driver::api::volume_name;
use crate::error::{Error, Result};
use crate::model::{
    Capability, Container, EnvVariable, Port, Resources, Sysctl, Volume, VolumeKind,
};
use crate::template::Template;
use crate::types::{CapabilityId, ContainerId, EnvVariableId, SysctlId, TemplateId, VolumeId};

/// What a caller may choose when creating a container.
///
/// With a template, unset fields fall back to the template. Without one,
/// `image` is required and `env` becomes plain variables.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub template_id: Option<TemplateId>,
    pub name: Option<String>,
    pub image: Option<String>,
    pub image_tag: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub command: Option<String>,
    pub launch_on_startup: bool,
    /// Values for env entries, keyed by name.
    pub env: BTreeMap<String, String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

pub(crate) fn container_row(
    id: &ContainerId,
    options: &CreateOptions,
    template: Option<&Template>,
) -> Result<Container> {
    let docker = template.and_then(Template::docker);

    let image = non_empty(options.image.clone())
        .or_else(|| docker.and_then(|d| d.image.clone()))
        .unwrap_or_default();
    if image.is_empty() && !docker.is_some_and(|d| d.requires_build()) {
        return Err(Error::Validation(
            "a container needs an image or a template that builds one".into(),
        ));
    }

    let name = non_empty(options.name.clone())
        .or_else(|| template.map(|t| t.name.clone()))
        .unwrap_or_else(|| image.clone());

    let mut container = Container::new(id.clone(), name, image);
    container.template_id = template.map(|t| t.id.clone());
    container.image_tag =
        non_empty(options.image_tag.clone()).or_else(|| docker.and_then(|d| d.image_tag.clone()));
    container.description = non_empty(options.description.clone())
        .or_else(|| template.map(|t| t.description.clone()).filter(|d| !d.is_empty()));
    container.color =
        non_empty(options.color.clone()).or_else(|| template.and_then(|t| t.color.clone()));
    container.icon =
        non_empty(options.icon.clone()).or_else(|| template.and_then(|t| t.icon.clone()));
    container.command =
        non_empty(options.command.clone()).or_else(|| docker.and_then(|d| d.command.clone()));
    container.launch_on_startup = options.launch_on_startup;
    Ok(container)
}

/// Map a template volume key to its mount.
///
/// Keys containing a path separator are directories under the container's
/// volume root; anything else is a named volume.
pub(crate) fn volume_row(id: &ContainerId, key: &str, target: &str) -> Volume {
    let (kind, external_path) = if key.contains('/') {
        let rel = key.trim_start_matches("./").trim_matches('/');
        (VolumeKind::Bind, rel.to_string())
    } else {
        (VolumeKind::Volume, volume_name(id, key))
    };
    Volume {
        id: VolumeId::generate(),
        container_id: id.clone(),
        kind,
        internal_path: target.to_string(),
        external_path,
    }
}

pub(crate) fn resource_rows(
    id: &ContainerId,
    options: &CreateOptions,
    template: Option<&Template>,
) -> Resources {
    let Some(template) = template else {
        return Resources {
            env: options
                .env
                .iter()
                .map(|(name, value)| EnvVariable::plain(id.clone(), name, value))
                .collect(),
            ..Resources::default()
        };
    };

    let env = template
        .environment
        .iter()
        .map(|e| EnvVariable {
            id: EnvVariableId::generate(),
            container_id: id.clone(),
            kind: e.kind,
            name: e.name.clone(),
            display_name: if e.display_name.is_empty() {
                e.name.clone()
            } else {
                e.display_name.clone()
            },
            value: options
                .env
                .get(&e.name)
                .cloned()
                .or_else(|| e.default.clone())
                .unwrap_or_default(),
            default: e.default.clone(),
            description: e.description.clone(),
            secret: e.secret,
        })
        .collect();

    let ports = template
        .ports
        .iter()
        .map(|p| Port::new(id.clone(), &p.port, &p.port))
        .collect();

    let mut resources = Resources {
        env,
        ports,
        ..Resources::default()
    };

    if let Some(docker) = template.docker() {
        resources.volumes = docker
            .volumes
            .iter()
            .map(|(key, target)| volume_row(id, key, target))
            .collect();
        resources.capabilities = docker
            .capabilities
            .iter()
            .map(|name| Capability {
                id: CapabilityId::generate(),
                container_id: id.clone(),
                name: name.clone(),
            })
            .collect();
        resources.sysctls = docker
            .sysctls
            .iter()
            .map(|(name, value)| Sysctl {
                id: SysctlId::generate(),
                container_id: id.clone(),
                name: name.clone(),
                value: value.clone(),
            })
            .collect();
    }

    resources
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::parse_template;

    const TEMPLATE: &str = r#"
version: 3
name: Media Server
description: Streams your library
ports:
  - name: Web
    port: "8096"
environment:
  - name: TZ
    default: UTC
  - name: ADMIN_PASSWORD
    display_name: Admin password
    secret: true
methods:
  docker:
    image: jellyfin/jellyfin
    image_tag: "10.9"
    volumes:
      ./media: /media
      config: /config
    capabilities: [NET_ADMIN]
    sysctls:
      net.ipv4.ip_unprivileged_port_start: "0"
"#;

    fn template() -> Template {
        parse_template("jellyfin", TEMPLATE).unwrap()
    }

    #[test]
    fn template_rows_are_seeded_one_to_one() {
        let id = ContainerId::new("c1");
        let options = CreateOptions {
            env: BTreeMap::from([("ADMIN_PASSWORD".to_string(), "hunter2".to_string())]),
            ..Default::default()
        };
        let rows = resource_rows(&id, &options, Some(&template()));

        assert_eq!(rows.ports.len(), 1);
        assert_eq!(rows.ports[0].internal, "8096");
        assert_eq!(rows.ports[0].external, "8096");

        let names: Vec<_> = rows.env.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["TZ", "ADMIN_PASSWORD"]);
        assert_eq!(rows.env[0].value, "UTC");
        assert_eq!(rows.env[0].display_name, "TZ");
        assert_eq!(rows.env[1].value, "hunter2");
        assert!(rows.env[1].secret);

        assert_eq!(rows.capabilities.len(), 1);
        assert_eq!(rows.sysctls[0].name, "net.ipv4.ip_unprivileged_port_start");
        assert!(rows.volumes.iter().all(|v| v.container_id == id));
    }

    #[test]
    fn volume_keys_with_separators_are_binds() {
        let id = ContainerId::new("c1");
        let rows = resource_rows(&id, &CreateOptions::default(), Some(&template()));
        let bind = rows.volumes.iter().find(|v| v.internal_path == "/media").unwrap();
        assert_eq!(bind.kind, VolumeKind::Bind);
        assert_eq!(bind.external_path, "media");

        let named = rows.volumes.iter().find(|v| v.internal_path == "/config").unwrap();
        assert_eq!(named.kind, VolumeKind::Volume);
        assert_eq!(named.external_path, volume_name(&id, "config"));
    }

    #[test]
    fn template_fills_unset_container_fields() {
        let id = ContainerId::new("c1");
        let container = container_row(&id, &CreateOptions::default(), Some(&template())).unwrap();
        assert_eq!(container.name, "Media Server");
        assert_eq!(container.image_reference(), "jellyfin/jellyfin:10.9");
        assert_eq!(container.template_id, Some(TemplateId::new("jellyfin")));
        assert_eq!(container.description.as_deref(), Some("Streams your library"));
    }

    #[test]
    fn raw_image_container_takes_plain_env() {
        let id = ContainerId::new("c1");
        let options = CreateOptions {
            image: Some("nginx".into()),
            env: BTreeMap::from([("A".to_string(), "1".to_string())]),
            ..Default::default()
        };
        let container = container_row(&id, &options, None).unwrap();
        assert_eq!(container.name, "nginx");
        let rows = resource_rows(&id, &options, None);
        assert_eq!(rows.env.len(), 1);
        assert!(rows.ports.is_empty());
    }

    #[test]
    fn missing_image_is_rejected() {
        let err =
            container_row(&ContainerId::new("c1"), &CreateOptions::default(), None).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
