// ABOUTME: Persistence-agnostic stores for containers, resource rows and tags.
// ABOUTME: Each store is a trait; the tables here are memory or YAML-file backed.

mod containers;
mod file;
mod rows;
mod tags;

pub use containers::ContainerTable;
pub use rows::RowTable;
pub use tags::TagTable;

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::model::{
    Capability, Container, EnvVariable, Port, Resource, Resources, Sysctl, Tag, Volume,
};
use crate::types::{ContainerId, TagId};

/// CRUD over one kind of resource row.
#[async_trait]
pub trait ResourceStore<R: Resource>: Send + Sync {
    async fn list(&self, container: &ContainerId) -> Result<Vec<R>>;
    async fn get(&self, id: &str) -> Result<R>;
    async fn insert(&self, row: R) -> Result<()>;
    async fn update(&self, row: R) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<()>;
    /// Remove every row owned by `container`. Succeeds when there are none.
    async fn delete_all(&self, container: &ContainerId) -> Result<()>;
}

#[async_trait]
pub trait ContainerStore: Send + Sync {
    async fn list(&self) -> Result<Vec<Container>>;
    async fn get(&self, id: &ContainerId) -> Result<Container>;
    async fn insert(&self, container: &Container) -> Result<()>;
    async fn update(&self, container: &Container) -> Result<()>;
    async fn delete(&self, id: &ContainerId) -> Result<()>;
}

#[async_trait]
pub trait TagStore: Send + Sync {
    async fn list(&self) -> Result<Vec<Tag>>;
    async fn insert(&self, tag: &Tag) -> Result<()>;
    async fn delete(&self, id: &TagId) -> Result<()>;
    async fn attach(&self, container: &ContainerId, tag: &TagId) -> Result<()>;
    async fn detach(&self, container: &ContainerId, tag: &TagId) -> Result<()>;
    async fn containers_with_any(&self, tags: &[TagId]) -> Result<HashSet<ContainerId>>;
    async fn detach_all(&self, container: &ContainerId) -> Result<()>;
}

/// One store of each kind, as injected into the container service.
#[derive(Clone)]
pub struct Stores {
    pub containers: Arc<dyn ContainerStore>,
    pub ports: Arc<dyn ResourceStore<Port>>,
    pub volumes: Arc<dyn ResourceStore<Volume>>,
    pub env: Arc<dyn ResourceStore<EnvVariable>>,
    pub capabilities: Arc<dyn ResourceStore<Capability>>,
    pub sysctls: Arc<dyn ResourceStore<Sysctl>>,
    pub tags: Arc<dyn TagStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            containers: Arc::new(ContainerTable::in_memory()),
            ports: Arc::new(RowTable::<Port>::in_memory()),
            volumes: Arc::new(RowTable::<Volume>::in_memory()),
            env: Arc::new(RowTable::<EnvVariable>::in_memory()),
            capabilities: Arc::new(RowTable::<Capability>::in_memory()),
            sysctls: Arc::new(RowTable::<Sysctl>::in_memory()),
            tags: Arc::new(TagTable::in_memory()),
        }
    }

    /// Open YAML-backed stores rooted at the container data directory.
    pub async fn on_disk(root: &Path) -> Result<Self> {
        Ok(Self {
            containers: Arc::new(ContainerTable::open(root).await?),
            ports: Arc::new(RowTable::<Port>::open(root).await?),
            volumes: Arc::new(RowTable::<Volume>::open(root).await?),
            env: Arc::new(RowTable::<EnvVariable>::open(root).await?),
            capabilities: Arc::new(RowTable::<Capability>::open(root).await?),
            sysctls: Arc::new(RowTable::<Sysctl>::open(root).await?),
            tags: Arc::new(TagTable::open(root).await?),
        })
    }

    /// Every resource row of `id`.
    pub async fn resources(&self, id: &ContainerId) -> Result<Resources> {
        Ok(Resources {
            ports: self.ports.list(id).await?,
            volumes: self.volumes.list(id).await?,
            env: self.env.list(id).await?,
            capabilities: self.capabilities.list(id).await?,
            sysctls: self.sysctls.list(id).await?,
        })
    }

    /// Drop every row that references `id`, tags included.
    pub async fn delete_resources(&self, id: &ContainerId) -> Result<()> {
        self.ports.delete_all(id).await?;
        self.volumes.delete_all(id).await?;
        self.env.delete_all(id).await?;
        self.capabilities.delete_all(id).await?;
        self.sysctls.delete_all(id).await?;
        self.tags.detach_all(id).await
    }

    /// Insert a full set of rows for a new container.
    pub async fn insert_resources(&self, resources: Resources) -> Result<()> {
        for row in resources.ports {
            self.ports.insert(row).await?;
        }
        for row in resources.volumes {
            self.volumes.insert(row).await?;
        }
        for row in resources.env {
            self.env.insert(row).await?;
        }
        for row in resources.capabilities {
            self.capabilities.insert(row).await?;
        }
        for row in resources.sysctls {
            self.sysctls.insert(row).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}
