// ABOUTME: Generic table of resource rows grouped by container.
// ABOUTME: Optionally mirrors each container's rows to <root>/<id>/.meta/<kind>.yml.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::ResourceStore;
use super::file;
use crate::error::{Error, Result};
use crate::model::Resource;
use crate::types::ContainerId;

pub struct RowTable<R> {
    rows: RwLock<HashMap<ContainerId, Vec<R>>>,
    root: Option<PathBuf>,
    /// Serializes mutate-and-persist so files are written in mutation order.
    persist: tokio::sync::Mutex<()>,
}

impl<R: Resource> RowTable<R> {
    pub fn in_memory() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            root: None,
            persist: tokio::sync::Mutex::new(()),
        }
    }

    /// Load every container's rows of this kind from `root`.
    pub async fn open(root: &Path) -> Result<Self> {
        let mut rows = HashMap::new();
        for id in file::container_dirs(root).await? {
            let path = Self::file_for(root, &id);
            if let Some(list) = file::read_yaml::<Vec<R>>(&path).await?
                && !list.is_empty()
            {
                rows.insert(id, list);
            }
        }
        tracing::debug!(kind = R::KIND, containers = rows.len(), "Loaded resource rows");
        Ok(Self {
            rows: RwLock::new(rows),
            root: Some(root.to_path_buf()),
            persist: tokio::sync::Mutex::new(()),
        })
    }

    fn file_for(root: &Path, id: &ContainerId) -> PathBuf {
        file::meta_dir(root, id).join(format!("{}.yml", R::KIND))
    }

    async fn flush(&self, id: &ContainerId) -> Result<()> {
        let Some(root) = &self.root else {
            return Ok(());
        };
        let path = Self::file_for(root, id);
        let snapshot = self.rows.read().get(id).cloned().unwrap_or_default();
        if snapshot.is_empty() {
            file::remove_file(&path).await
        } else {
            file::write_yaml(&path, &snapshot).await
        }
    }

    fn not_found(id: &str) -> Error {
        Error::ResourceNotFound {
            kind: R::KIND,
            id: id.to_string(),
        }
    }

    fn owner_of(&self, row_id: &str) -> Option<ContainerId> {
        self.rows
            .read()
            .iter()
            .find(|(_, rows)| rows.iter().any(|r| r.id() == row_id))
            .map(|(owner, _)| owner.clone())
    }
}

#[async_trait]
impl<R: Resource> ResourceStore<R> for RowTable<R> {
    async fn list(&self, container: &ContainerId) -> Result<Vec<R>> {
        Ok(self.rows.read().get(container).cloned().unwrap_or_default())
    }

    async fn get(&self, id: &str) -> Result<R> {
        self.rows
            .read()
            .values()
            .flatten()
            .find(|r| r.id() == id)
            .cloned()
            .ok_or_else(|| Self::not_found(id))
    }

    async fn insert(&self, row: R) -> Result<()> {
        row.validate().map_err(Error::Validation)?;
        let _guard = self.persist.lock().await;
        let owner = row.container_id().clone();
        {
            let mut rows = self.rows.write();
            if rows.values().flatten().any(|r| r.id() == row.id()) {
                return Err(Error::Validation(format!(
                    "duplicate {} row id: {}",
                    R::KIND,
                    row.id()
                )));
            }
            rows.entry(owner.clone()).or_default().push(row);
        }
        self.flush(&owner).await
    }

    async fn update(&self, row: R) -> Result<()> {
        row.validate().map_err(Error::Validation)?;
        let _guard = self.persist.lock().await;
        let owner = row.container_id().clone();
        {
            let mut rows = self.rows.write();
            let slot = rows
                .get_mut(&owner)
                .and_then(|list| list.iter_mut().find(|r| r.id() == row.id()))
                .ok_or_else(|| Self::not_found(row.id()))?;
            *slot = row;
        }
        self.flush(&owner).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let _guard = self.persist.lock().await;
        let owner = self.owner_of(id).ok_or_else(|| Self::not_found(id))?;
        {
            let mut rows = self.rows.write();
            if let Some(list) = rows.get_mut(&owner) {
                list.retain(|r| r.id() != id);
                if list.is_empty() {
                    rows.remove(&owner);
                }
            }
        }
        self.flush(&owner).await
    }

    async fn delete_all(&self, container: &ContainerId) -> Result<()> {
        let _guard = self.persist.lock().await;
        self.rows.write().remove(container);
        self.flush(container).await
    }
}
