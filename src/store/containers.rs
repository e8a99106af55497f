// ABOUTME: Container table, in memory or mirrored to <root>/<id>/.meta/container.yml.
// ABOUTME: One YAML document per container.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::ContainerStore;
use super::file;
use crate::error::{Error, Result};
use crate::model::Container;
use crate::types::ContainerId;

const CONTAINER_FILE: &str = "container.yml";

pub struct ContainerTable {
    containers: RwLock<HashMap<ContainerId, Container>>,
    root: Option<PathBuf>,
    persist: tokio::sync::Mutex<()>,
}

impl ContainerTable {
    pub fn in_memory() -> Self {
        Self {
            containers: RwLock::new(HashMap::new()),
            root: None,
            persist: tokio::sync::Mutex::new(()),
        }
    }

    pub async fn open(root: &Path) -> Result<Self> {
        let mut containers = HashMap::new();
        for id in file::container_dirs(root).await? {
            let path = file::meta_dir(root, &id).join(CONTAINER_FILE);
            match file::read_yaml::<Container>(&path).await {
                Ok(Some(container)) if container.id == id => {
                    containers.insert(id, container);
                }
                Ok(Some(container)) => tracing::warn!(
                    dir = %id,
                    recorded = %container.id,
                    "Container file id does not match its directory, skipping"
                ),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(container = %id, error = %e, "Skipping unreadable container")
                }
            }
        }
        tracing::debug!(count = containers.len(), "Loaded containers");
        Ok(Self {
            containers: RwLock::new(containers),
            root: Some(root.to_path_buf()),
            persist: tokio::sync::Mutex::new(()),
        })
    }

    fn path_for(&self, id: &ContainerId) -> Option<PathBuf> {
        self.root
            .as_ref()
            .map(|root| file::meta_dir(root, id).join(CONTAINER_FILE))
    }

    async fn flush(&self, id: &ContainerId) -> Result<()> {
        let Some(path) = self.path_for(id) else {
            return Ok(());
        };
        let snapshot = self.containers.read().get(id).cloned();
        match snapshot {
            Some(container) => file::write_yaml(&path, &container).await,
            None => file::remove_file(&path).await,
        }
    }
}

#[async_trait]
impl ContainerStore for ContainerTable {
    async fn list(&self) -> Result<Vec<Container>> {
        let mut all: Vec<Container> = self.containers.read().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    async fn get(&self, id: &ContainerId) -> Result<Container> {
        self.containers
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::ContainerNotFound(id.clone()))
    }

    async fn insert(&self, container: &Container) -> Result<()> {
        if !container.id.is_path_safe() {
            return Err(Error::Validation(format!(
                "container id is not usable: {}",
                container.id
            )));
        }
        let _guard = self.persist.lock().await;
        {
            let mut containers = self.containers.write();
            if containers.contains_key(&container.id) {
                return Err(Error::Validation(format!(
                    "container already exists: {}",
                    container.id
                )));
            }
            containers.insert(container.id.clone(), container.clone());
        }
        self.flush(&container.id).await
    }

    async fn update(&self, container: &Container) -> Result<()> {
        let _guard = self.persist.lock().await;
        {
            let mut containers = self.containers.write();
            let slot = containers
                .get_mut(&container.id)
                .ok_or_else(|| Error::ContainerNotFound(container.id.clone()))?;
            *slot = container.clone();
        }
        self.flush(&container.id).await
    }

    async fn delete(&self, id: &ContainerId) -> Result<()> {
        let _guard = self.persist.lock().await;
        if self.containers.write().remove(id).is_none() {
            return Err(Error::ContainerNotFound(id.clone()));
        }
        self.flush(id).await
    }
}
