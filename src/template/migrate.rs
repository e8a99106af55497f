// ABOUTME: Upgrades older template documents to the current shape.
// ABOUTME: Each step rewrites a YAML mapping from version N to N+1.

use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use super::{Template, TemplateError};
use crate::types::TemplateId;

pub const MAX_SUPPORTED_VERSION: u32 = 3;

type Step = fn(&mut Mapping) -> Result<(), String>;

/// Steps indexed by the version they upgrade from.
const STEPS: [(u32, Step); 2] = [(1, v1_to_v2), (2, v2_to_v3)];

#[derive(Deserialize)]
struct VersionHeader {
    #[serde(default)]
    version: Option<u64>,
}

/// Read only the version tag. A document without one is version 1.
pub fn read_version(id: &str, yaml: &str) -> Result<u64, TemplateError> {
    let header: VersionHeader = serde_yaml::from_str(yaml).map_err(|e| TemplateError::Parse {
        id: id.to_string(),
        message: e.to_string(),
    })?;
    Ok(header.version.unwrap_or(1))
}

/// Parse a template document of any supported version into the current shape.
pub fn parse_template(id: &str, yaml: &str) -> Result<Template, TemplateError> {
    let version = read_version(id, yaml)?;
    if version == 0 || version > u64::from(MAX_SUPPORTED_VERSION) {
        return Err(TemplateError::UnsupportedVersion {
            id: id.to_string(),
            version,
            max: MAX_SUPPORTED_VERSION,
        });
    }

    let doc: Value = serde_yaml::from_str(yaml).map_err(|e| TemplateError::Parse {
        id: id.to_string(),
        message: e.to_string(),
    })?;
    // Checked against MAX_SUPPORTED_VERSION above.
    let doc = migrate(id, doc, version as u32)?;

    let mut template: Template =
        serde_yaml::from_value(doc).map_err(|e| TemplateError::Parse {
            id: id.to_string(),
            message: e.to_string(),
        })?;
    template.id = TemplateId::new(id);
    Ok(template)
}

/// Apply every step from `version` up to the current version.
pub fn migrate(id: &str, doc: Value, version: u32) -> Result<Value, TemplateError> {
    let Value::Mapping(mut map) = doc else {
        return Err(TemplateError::Parse {
            id: id.to_string(),
            message: "template document must be a mapping".to_string(),
        });
    };

    for (from, step) in STEPS {
        if from < version {
            continue;
        }
        step(&mut map).map_err(|message| TemplateError::Migration {
            id: id.to_string(),
            message,
        })?;
        map.insert("version".into(), Value::from(from + 1));
        tracing::debug!(template = %id, from, to = from + 1, "Migrated template");
    }

    if version >= MAX_SUPPORTED_VERSION {
        map.insert("version".into(), Value::from(MAX_SUPPORTED_VERSION));
    }
    Ok(Value::Mapping(map))
}

/// v1 wrote literal port numbers where v2 names the port-typed env entry.
fn v1_to_v2(doc: &mut Mapping) -> Result<(), String> {
    let port_envs = port_env_defaults(doc)?;
    let lookup = |value: &Value| -> Option<Value> {
        let literal = scalar_string(value)?;
        port_envs
            .iter()
            .find(|(default, _)| *default == literal)
            .map(|(_, name)| Value::String(name.clone()))
    };

    if let Some(ports) = docker_method_mut(doc).and_then(|d| d.get_mut("ports")) {
        let Value::Mapping(ports) = ports else {
            return Err("methods.docker.ports must be a mapping".to_string());
        };
        for (_, value) in ports.iter_mut() {
            if let Some(name) = lookup(value) {
                *value = name;
            }
        }
    }

    if let Some(urls) = doc.get_mut("urls") {
        let Value::Sequence(urls) = urls else {
            return Err("urls must be a list".to_string());
        };
        for url in urls.iter_mut() {
            if let Some(port) = url.get_mut("port") {
                if let Some(name) = lookup(port) {
                    *port = name;
                }
            }
        }
    }

    Ok(())
}

/// v3 moves port-typed env entries to a top-level `ports` list.
fn v2_to_v3(doc: &mut Mapping) -> Result<(), String> {
    let mut moved = Vec::new();

    if let Some(env) = doc.get_mut("environment") {
        let Value::Sequence(entries) = env else {
            return Err("environment must be a list".to_string());
        };
        let mut kept = Vec::with_capacity(entries.len());
        for entry in entries.drain(..) {
            if is_port_env(&entry) {
                moved.push(port_from_env(&entry));
            } else {
                kept.push(entry);
            }
        }
        *entries = kept;
    }

    if !moved.is_empty() {
        let ports = doc
            .entry("ports".into())
            .or_insert(Value::Sequence(Vec::new()));
        let Value::Sequence(ports) = ports else {
            return Err("ports must be a list".to_string());
        };
        ports.extend(moved);
    }

    doc.remove("urls");
    if let Some(docker) = docker_method_mut(doc) {
        docker.remove("ports");
    }
    Ok(())
}

fn docker_method_mut(doc: &mut Mapping) -> Option<&mut Mapping> {
    match doc.get_mut("methods")?.get_mut("docker")? {
        Value::Mapping(docker) => Some(docker),
        _ => None,
    }
}

fn is_port_env(entry: &Value) -> bool {
    entry.get("type").and_then(Value::as_str) == Some("port")
}

fn port_env_defaults(doc: &Mapping) -> Result<Vec<(String, String)>, String> {
    let Some(env) = doc.get("environment") else {
        return Ok(Vec::new());
    };
    let Value::Sequence(entries) = env else {
        return Err("environment must be a list".to_string());
    };
    Ok(entries
        .iter()
        .filter(|e| is_port_env(e))
        .filter_map(|e| {
            let name = e.get("name")?.as_str()?.to_string();
            let default = scalar_string(e.get("default")?)?;
            Some((default, name))
        })
        .collect())
}

fn port_from_env(entry: &Value) -> Value {
    let display = entry
        .get("display_name")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .or_else(|| entry.get("name").and_then(Value::as_str))
        .unwrap_or_default();
    let port = entry
        .get("default")
        .and_then(scalar_string)
        .unwrap_or_default();

    let mut map = Mapping::new();
    map.insert("name".into(), Value::String(display.to_string()));
    map.insert("port".into(), Value::String(port));
    Value::Mapping(map)
}

/// Ports show up both quoted and bare in YAML.
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
