// ABOUTME: Declarative container templates in their current (v3) shape.
// ABOUTME: TemplateStore loads templates/<id>/template.yml through the migration chain.

mod migrate;

pub use migrate::{MAX_SUPPORTED_VERSION, migrate, parse_template, read_version};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::model::EnvType;
use crate::types::TemplateId;

pub const TEMPLATE_FILENAME: &str = "template.yml";

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("failed to read template {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse template {id}: {message}")]
    Parse { id: String, message: String },

    #[error("template {id} declares version {version}, newest supported is {max}")]
    UnsupportedVersion { id: String, version: u64, max: u32 },

    #[error("template {id} cannot be migrated: {message}")]
    Migration { id: String, message: String },
}

fn unset_template_id() -> TemplateId {
    TemplateId::new("")
}

/// A template after migration to the current version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    /// Directory name; assigned by the loader, not read from the document.
    #[serde(default = "unset_template_id", skip_serializing)]
    pub id: TemplateId,
    pub version: u32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub features: Features,
    #[serde(default)]
    pub environment: Vec<TemplateEnv>,
    #[serde(default)]
    pub ports: Vec<TemplatePort>,
    /// Database roles this template consumes, keyed by role id.
    #[serde(default)]
    pub databases: BTreeMap<String, DatabaseRole>,
    #[serde(default)]
    pub methods: Methods,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Features {
    /// Databases this template provides to others.
    #[serde(default)]
    pub databases: Vec<DatabaseFeature>,
}

/// Env names a database-providing template exposes its connection through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseFeature {
    #[serde(rename = "type")]
    pub kind: String,
    pub port: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Env entry holding the default database name.
    #[serde(default)]
    pub database: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseRole {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub names: DatabaseEnvNames,
}

/// Env names in the consuming container a linked database is written to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseEnvNames {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateEnv {
    #[serde(rename = "type", default)]
    pub kind: EnvType,
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub secret: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplatePort {
    pub name: String,
    pub port: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Methods {
    #[serde(default)]
    pub docker: Option<DockerMethod>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DockerMethod {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub image_tag: Option<String>,
    /// Repository cloned as build context instead of pulling `image`.
    #[serde(default)]
    pub clone: Option<CloneSource>,
    #[serde(default)]
    pub dockerfile: Option<String>,
    /// Source key -> path inside the container.
    #[serde(default)]
    pub volumes: BTreeMap<String, String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub sysctls: BTreeMap<String, String>,
    #[serde(default)]
    pub command: Option<String>,
}

impl DockerMethod {
    /// Whether the image has to be built from a cloned repository.
    pub fn requires_build(&self) -> bool {
        self.clone.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneSource {
    pub repository: String,
}

impl Template {
    pub fn docker(&self) -> Option<&DockerMethod> {
        self.methods.docker.as_ref()
    }

    pub fn env_default(&self, name: &str) -> Option<&str> {
        self.environment
            .iter()
            .find(|e| e.name == name)
            .and_then(|e| e.default.as_deref())
    }
}

/// Templates loaded from `<dir>/<id>/template.yml`.
#[derive(Debug, Default)]
pub struct TemplateStore {
    dir: PathBuf,
    templates: BTreeMap<TemplateId, Template>,
}

impl TemplateStore {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load every template directory under `dir`.
    ///
    /// A template that fails to parse or declares an unsupported version is
    /// skipped with a warning; the rest still load.
    pub fn load(dir: &Path) -> Result<Self, TemplateError> {
        let mut store = Self {
            dir: dir.to_path_buf(),
            templates: BTreeMap::new(),
        };

        if !dir.exists() {
            tracing::warn!(dir = %dir.display(), "Templates directory does not exist");
            return Ok(store);
        }

        let entries = std::fs::read_dir(dir).map_err(|source| TemplateError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        for entry in entries.flatten() {
            let path = entry.path().join(TEMPLATE_FILENAME);
            if !path.is_file() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().into_owned();
            match Self::load_one(&id, &path) {
                Ok(template) => {
                    store.templates.insert(template.id.clone(), template);
                }
                Err(e) => tracing::warn!(template = %id, error = %e, "Skipping template"),
            }
        }

        tracing::info!(count = store.templates.len(), "Templates loaded");
        Ok(store)
    }

    fn load_one(id: &str, path: &Path) -> Result<Template, TemplateError> {
        let content = std::fs::read_to_string(path).map_err(|source| TemplateError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        parse_template(id, &content)
    }

    /// Register an already-parsed template.
    pub fn insert(&mut self, template: Template) {
        self.templates.insert(template.id.clone(), template);
    }

    pub fn get(&self, id: &TemplateId) -> Option<&Template> {
        self.templates.get(id)
    }

    pub fn list(&self) -> impl Iterator<Item = &Template> {
        self.templates.values()
    }

    /// Path of the icon asset a template names, if it exists on disk.
    pub fn icon_path(&self, id: &TemplateId) -> Option<PathBuf> {
        let icon = self.get(id)?.icon.as_deref()?;
        if icon.contains('/') || icon.contains("..") {
            return None;
        }
        let path = self.dir.join(id.as_str()).join(icon);
        path.is_file().then_some(path)
    }
}
