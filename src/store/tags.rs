// ABOUTME: Tags and the container <-> tag membership relation.
// ABOUTME: Persisted as a single <root>/.tags.yml document when file backed.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::TagStore;
use super::file;
use crate::error::{Error, Result};
use crate::model::{ContainerTag, Tag};
use crate::types::{ContainerId, TagId};

const TAGS_FILE: &str = ".tags.yml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TagState {
    #[serde(default)]
    tags: Vec<Tag>,
    #[serde(default)]
    members: Vec<ContainerTag>,
}

pub struct TagTable {
    state: RwLock<TagState>,
    path: Option<PathBuf>,
    persist: tokio::sync::Mutex<()>,
}

impl TagTable {
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(TagState::default()),
            path: None,
            persist: tokio::sync::Mutex::new(()),
        }
    }

    pub async fn open(root: &Path) -> Result<Self> {
        let path = root.join(TAGS_FILE);
        let state = file::read_yaml::<TagState>(&path).await?.unwrap_or_default();
        Ok(Self {
            state: RwLock::new(state),
            path: Some(path),
            persist: tokio::sync::Mutex::new(()),
        })
    }

    async fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot = self.state.read().clone();
        file::write_yaml(path, &snapshot).await
    }
}

#[async_trait]
impl TagStore for TagTable {
    async fn list(&self) -> Result<Vec<Tag>> {
        Ok(self.state.read().tags.clone())
    }

    async fn insert(&self, tag: &Tag) -> Result<()> {
        if tag.name.trim().is_empty() {
            return Err(Error::Validation("tag name cannot be empty".into()));
        }
        let _guard = self.persist.lock().await;
        self.state.write().tags.push(tag.clone());
        self.flush().await
    }

    async fn delete(&self, id: &TagId) -> Result<()> {
        let _guard = self.persist.lock().await;
        {
            let mut state = self.state.write();
            let before = state.tags.len();
            state.tags.retain(|t| &t.id != id);
            if state.tags.len() == before {
                return Err(Error::ResourceNotFound {
                    kind: "tag",
                    id: id.to_string(),
                });
            }
            state.members.retain(|m| &m.tag_id != id);
        }
        self.flush().await
    }

    async fn attach(&self, container: &ContainerId, tag: &TagId) -> Result<()> {
        let _guard = self.persist.lock().await;
        {
            let mut state = self.state.write();
            if !state.tags.iter().any(|t| &t.id == tag) {
                return Err(Error::ResourceNotFound {
                    kind: "tag",
                    id: tag.to_string(),
                });
            }
            let row = ContainerTag {
                container_id: container.clone(),
                tag_id: tag.clone(),
            };
            if state.members.contains(&row) {
                return Ok(());
            }
            state.members.push(row);
        }
        self.flush().await
    }

    async fn detach(&self, container: &ContainerId, tag: &TagId) -> Result<()> {
        let _guard = self.persist.lock().await;
        self.state
            .write()
            .members
            .retain(|m| !(&m.container_id == container && &m.tag_id == tag));
        self.flush().await
    }

    async fn containers_with_any(&self, tags: &[TagId]) -> Result<HashSet<ContainerId>> {
        Ok(self
            .state
            .read()
            .members
            .iter()
            .filter(|m| tags.contains(&m.tag_id))
            .map(|m| m.container_id.clone())
            .collect())
    }

    async fn detach_all(&self, container: &ContainerId) -> Result<()> {
        let _guard = self.persist.lock().await;
        self.state
            .write()
            .members
            .retain(|m| &m.container_id != container);
        self.flush().await
    }
}
