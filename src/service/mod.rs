// ABOUTME: Container registry and lifecycle service: the single owner of container state.
// ABOUTME: Start/stop/recreate/delete, status tracking, log fan-out and database linking.

mod databases;
mod lifecycle;
mod seed;

pub use lifecycle::LifecycleListener;
pub use seed::CreateOptions;

use futures::StreamExt;
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, RwLock, watch};

use crate::config::Config;
use crate::driver::lines;
use crate::error::{Error, Result};
use crate::events::{Event, EventBus, Listener};
use crate::logs::LogAggregator;
use crate::model::{
    Container, ContainerPatch, ContainerStatus, ContainerUpdate, EnvVariable, LogLine, Port,
    Resource,
};
use crate::runner::{ImageSource, RunOutput, Runner, StartRequest, StatusSetter, classify};
use crate::runtime::LogStream;
use crate::store::{ResourceStore, Stores};
use crate::template::{Template, TemplateStore};
use crate::types::{ContainerId, TagId};

/// Deadlines and host facts the service needs from configuration.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub start_timeout: Duration,
    pub stop_timeout: Duration,
    pub wait_timeout: Duration,
    /// Host name written into linked database env entries.
    pub database_host: String,
}

impl ServiceSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            start_timeout: config.timeouts.start,
            stop_timeout: config.timeouts.stop,
            wait_timeout: config.timeouts.wait_status,
            database_host: config.database_host.clone(),
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// One registered container.
struct Entry {
    record: parking_lot::Mutex<Container>,
    status: watch::Sender<ContainerStatus>,
    /// Held for the duration of start, stop and delete.
    lifecycle: AsyncMutex<()>,
    /// Bumped by every start; reports from older runs are dropped.
    generation: AtomicU64,
    /// Serializes status changes through to their published event.
    reporting: parking_lot::Mutex<()>,
}

impl Entry {
    fn new(container: Container) -> Arc<Self> {
        let (status, _) = watch::channel(container.status);
        Arc::new(Self {
            record: parking_lot::Mutex::new(container),
            status,
            lifecycle: AsyncMutex::new(()),
            generation: AtomicU64::new(0),
            reporting: parking_lot::Mutex::new(()),
        })
    }

    fn snapshot(&self) -> Container {
        self.record.lock().clone()
    }

    fn status(&self) -> ContainerStatus {
        self.record.lock().status
    }
}

struct Inner {
    stores: Stores,
    templates: Arc<TemplateStore>,
    runner: Arc<dyn Runner>,
    bus: Arc<EventBus>,
    logs: Arc<LogAggregator>,
    settings: ServiceSettings,
    table: RwLock<HashMap<ContainerId, Arc<Entry>>>,
}

/// Check a whole replacement set, then swap it in for the container's rows.
async fn replace_rows<R: Resource>(
    store: &dyn ResourceStore<R>,
    id: &ContainerId,
    rows: Vec<R>,
) -> Result<()> {
    let mut seen = HashSet::new();
    for row in &rows {
        if row.container_id() != id {
            return Err(Error::Validation(format!(
                "{} row {} belongs to another container",
                R::KIND,
                row.id()
            )));
        }
        row.validate().map_err(Error::Validation)?;
        if !seen.insert(row.id()) {
            return Err(Error::Validation(format!(
                "duplicate {} row id: {}",
                R::KIND,
                row.id()
            )));
        }
    }

    store.delete_all(id).await?;
    for row in rows {
        store.insert(row).await?;
    }
    Ok(())
}

impl Inner {
    fn publish(&self, event: Event) {
        if let Err(e) = self.bus.publish(&event) {
            tracing::warn!(event = event.event_type(), error = %e, "Event dispatch failed");
        }
    }

    fn apply_status(&self, entry: &Entry, status: ContainerStatus) {
        let _reporting = entry.reporting.lock();
        let snapshot = {
            let mut record = entry.record.lock();
            let current = record.status;
            if current == status {
                return;
            }
            // A container exits on its own accord when it is being stopped.
            if status == ContainerStatus::Error
                && matches!(current, ContainerStatus::Stopping | ContainerStatus::Off)
            {
                tracing::debug!(container = %record.id, %current, "Ignoring exit after stop");
                return;
            }
            record.status = status;
            // Sent under the record lock so the channel never lags the record.
            entry.status.send_replace(status);
            record.clone()
        };
        tracing::info!(container = %snapshot.id, %status, "Container status changed");
        self.publish(Event::ContainerStatusChange {
            id: snapshot.id.clone(),
            status,
            container: snapshot,
        });
    }

    fn template_of(&self, container: &Container) -> Option<&Template> {
        container
            .template_id
            .as_ref()
            .and_then(|t| self.templates.get(t))
    }
}

/// The container registry. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ContainerService {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ContainerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerService")
            .field("settings", &self.inner.settings)
            .finish_non_exhaustive()
    }
}

impl ContainerService {
    /// Build the service and subscribe the log aggregator to `bus`.
    pub fn new(
        stores: Stores,
        templates: Arc<TemplateStore>,
        runner: Arc<dyn Runner>,
        bus: Arc<EventBus>,
        logs: Arc<LogAggregator>,
        settings: ServiceSettings,
    ) -> Self {
        bus.subscribe(Arc::clone(&logs) as Arc<dyn Listener>);
        Self {
            inner: Arc::new(Inner {
                stores,
                templates,
                runner,
                bus,
                logs,
                settings,
                table: RwLock::new(HashMap::new()),
            }),
        }
    }

    fn downgrade(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    fn from_inner(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.inner.bus
    }

    pub fn stores(&self) -> &Stores {
        &self.inner.stores
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.inner.templates
    }

    /// Subscribe a listener that runs start-all and stop-all on server events.
    pub fn install_lifecycle(&self) -> Arc<LifecycleListener> {
        let listener = Arc::new(LifecycleListener::new(self));
        self.inner
            .bus
            .subscribe(Arc::clone(&listener) as Arc<dyn Listener>);
        listener
    }

    async fn entry(&self, id: &ContainerId) -> Result<Arc<Entry>> {
        self.inner
            .table
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::ContainerNotFound(id.clone()))
    }

    async fn entries(&self) -> Vec<Arc<Entry>> {
        self.inner.table.read().await.values().cloned().collect()
    }

    fn status_setter(&self, entry: &Arc<Entry>) -> StatusSetter {
        let inner = self.downgrade();
        let entry = Arc::clone(entry);
        let generation = entry.generation.fetch_add(1, Ordering::SeqCst) + 1;
        Arc::new(move |status: ContainerStatus| {
            if entry.generation.load(Ordering::SeqCst) != generation {
                tracing::debug!(%status, "Dropping status from a previous run");
                return;
            }
            if let Some(inner) = inner.upgrade() {
                inner.apply_status(&entry, status);
            }
        })
    }

    /// Read every persisted container into the registry.
    ///
    /// Status is not trusted across restarts: every container comes back off.
    pub async fn load(&self) -> Result<usize> {
        let containers = self.inner.stores.containers.list().await?;
        let count = containers.len();
        {
            let mut table = self.inner.table.write().await;
            table.clear();
            for mut container in containers {
                container.status = ContainerStatus::Off;
                container.update = None;
                if let Err(e) = self.inner.logs.register(&container.id) {
                    tracing::warn!(container = %container.id, error = %e, "Log file unavailable");
                }
                table.insert(container.id.clone(), Entry::new(container));
            }
        }
        tracing::info!(count, "Containers loaded");
        self.inner.publish(Event::ContainersLoaded { count });
        Ok(count)
    }

    pub async fn get(&self, id: &ContainerId) -> Result<Container> {
        Ok(self.entry(id).await?.snapshot())
    }

    /// Every container, ordered by name.
    pub async fn get_containers(&self) -> Vec<Container> {
        let mut containers: Vec<Container> =
            self.entries().await.iter().map(|e| e.snapshot()).collect();
        containers.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        containers
    }

    /// Containers carrying at least one of `tags`; all of them when `tags` is empty.
    pub async fn get_containers_with_filters(&self, tags: &[TagId]) -> Result<Vec<Container>> {
        let containers = self.get_containers().await;
        if tags.is_empty() {
            return Ok(containers);
        }
        let tagged = self.inner.stores.tags.containers_with_any(tags).await?;
        Ok(containers
            .into_iter()
            .filter(|c| tagged.contains(&c.id))
            .collect())
    }

    pub async fn create_container(&self, options: CreateOptions) -> Result<Container> {
        let template = match &options.template_id {
            Some(t) => Some(
                self.inner
                    .templates
                    .get(t)
                    .ok_or_else(|| Error::TemplateNotFound(t.to_string()))?,
            ),
            None => None,
        };

        let id = ContainerId::generate();
        let container = seed::container_row(&id, &options, template)?;
        let resources = seed::resource_rows(&id, &options, template);

        if let Some(clone) = template.and_then(Template::docker).and_then(|d| d.clone.as_ref()) {
            self.inner.runner.prepare_source(&id, &clone.repository).await?;
        }

        {
            let mut table = self.inner.table.write().await;
            self.inner.stores.containers.insert(&container).await?;
            if let Err(e) = self.inner.stores.insert_resources(resources).await {
                if let Err(cleanup) = self.inner.stores.delete_resources(&id).await {
                    tracing::warn!(
                        container = %id,
                        error = %cleanup,
                        "Rollback left resource rows"
                    );
                }
                if let Err(cleanup) = self.inner.stores.containers.delete(&id).await {
                    tracing::warn!(
                        container = %id,
                        error = %cleanup,
                        "Rollback left container row"
                    );
                }
                return Err(e);
            }
            table.insert(id.clone(), Entry::new(container.clone()));
        }

        if let Err(e) = self.inner.logs.register(&id) {
            tracing::warn!(container = %id, error = %e, "Log file unavailable");
        }
        tracing::info!(container = %id, name = %container.name, "Container created");
        self.inner.publish(Event::ContainerCreated { id });
        self.inner.publish(Event::ContainersChange);
        Ok(container)
    }

    /// Remove the container, its runtime objects and every row that references it.
    pub async fn delete(&self, id: &ContainerId) -> Result<()> {
        let entry = self.entry(id).await?;
        let Ok(_guard) = entry.lifecycle.try_lock() else {
            return Err(Error::StillRunning(id.clone()));
        };
        if entry.status().is_active() {
            return Err(Error::StillRunning(id.clone()));
        }

        self.inner.runner.delete_container(id).await?;
        self.inner.runner.delete_mounts(id).await?;

        {
            let mut table = self.inner.table.write().await;
            self.inner.stores.delete_resources(id).await?;
            match self.inner.stores.containers.delete(id).await {
                Ok(()) | Err(Error::ContainerNotFound(_)) => {}
                Err(e) => return Err(e),
            }
            table.remove(id);
        }

        self.inner.logs.unregister(id);
        tracing::info!(container = %id, "Container deleted");
        self.inner.publish(Event::ContainerDeleted { id: id.clone() });
        self.inner.publish(Event::ContainersChange);
        Ok(())
    }

    /// Bring the container up and wait until it runs.
    ///
    /// A no-op while another lifecycle operation is in flight. Fails when the
    /// container is already running, when it reaches `error` instead, or when
    /// it does not run within the start timeout. A timed-out start keeps its
    /// last reported status.
    pub async fn start(&self, id: &ContainerId) -> Result<()> {
        let entry = self.entry(id).await?;
        if entry.status().is_busy() {
            return Ok(());
        }
        let Ok(_guard) = entry.lifecycle.try_lock() else {
            return Ok(());
        };
        match entry.status() {
            ContainerStatus::Running => return Err(Error::AlreadyRunning(id.clone())),
            s if s.is_busy() => return Ok(()),
            _ => {}
        }

        let container = entry.snapshot();
        let resources = self.inner.stores.resources(id).await?;
        let image = ImageSource::resolve(&container, self.inner.template_of(&container));

        self.inner.apply_status(&entry, ContainerStatus::Building);
        let mut status = entry.status.subscribe();
        let request = StartRequest {
            container,
            resources,
            image,
        };
        let output = match self
            .inner
            .runner
            .start(request, self.status_setter(&entry))
            .await
        {
            Ok(output) => output,
            Err(e) => {
                self.inner.apply_status(&entry, ContainerStatus::Error);
                return Err(e);
            }
        };
        self.spawn_output_readers(id, output);

        let settled = status.wait_for(|s| {
            matches!(s, ContainerStatus::Running | ContainerStatus::Error)
        });
        match tokio::time::timeout(self.inner.settings.start_timeout, settled).await {
            Ok(Ok(s)) if *s == ContainerStatus::Running => Ok(()),
            Ok(_) => Err(Error::StartFailed { id: id.clone() }),
            Err(_) => Err(Error::Timeout {
                id: id.clone(),
                status: ContainerStatus::Running,
            }),
        }
    }

    fn spawn_output_readers(&self, id: &ContainerId, output: RunOutput) {
        for (stream, bytes) in [
            (LogStream::Stdout, output.stdout),
            (LogStream::Stderr, output.stderr),
        ] {
            let inner = self.downgrade();
            let id = id.clone();
            tokio::spawn(async move {
                let mut lines = lines(bytes);
                while let Some(line) = lines.next().await {
                    let line = match line {
                        Ok(line) => line,
                        Err(e) => {
                            tracing::debug!(container = %id, error = %e, "Output stream ended");
                            break;
                        }
                    };
                    let Some(inner) = inner.upgrade() else {
                        break;
                    };
                    let (kind, message) = classify(stream, &line);
                    inner.publish(Event::ContainerLog {
                        id: id.clone(),
                        kind,
                        message,
                    });
                }
            });
        }
    }

    /// Stop a running container.
    ///
    /// A no-op while another lifecycle operation is in flight. On failure or
    /// timeout the container goes back to `running`.
    pub async fn stop(&self, id: &ContainerId) -> Result<()> {
        let entry = self.entry(id).await?;
        if entry.status().is_busy() {
            return Ok(());
        }
        let Ok(_guard) = entry.lifecycle.try_lock() else {
            return Ok(());
        };
        match entry.status() {
            ContainerStatus::Running => {}
            s if s.is_busy() => return Ok(()),
            _ => return Err(Error::NotRunning(id.clone())),
        }

        self.inner.apply_status(&entry, ContainerStatus::Stopping);
        let stopped = tokio::time::timeout(
            self.inner.settings.stop_timeout,
            self.inner.runner.stop(id),
        )
        .await;
        match stopped {
            Ok(Ok(())) => {
                self.inner.apply_status(&entry, ContainerStatus::Off);
                Ok(())
            }
            Ok(Err(e)) => {
                self.inner.apply_status(&entry, ContainerStatus::Running);
                Err(e)
            }
            Err(_) => {
                self.inner.apply_status(&entry, ContainerStatus::Running);
                Err(Error::Timeout {
                    id: id.clone(),
                    status: ContainerStatus::Off,
                })
            }
        }
    }

    /// Replace the runtime container, keeping volumes, and start it again.
    pub async fn recreate_container(&self, id: &ContainerId) -> Result<()> {
        let entry = self.entry(id).await?;
        if entry.status().is_busy() {
            return Ok(());
        }
        if entry.status() == ContainerStatus::Running {
            self.stop(id).await?;
        }
        self.inner.runner.delete_container(id).await?;
        self.start(id).await
    }

    fn launch_on_startup(containers: Vec<Container>) -> impl Iterator<Item = ContainerId> {
        containers
            .into_iter()
            .filter(|c| c.launch_on_startup)
            .map(|c| c.id)
    }

    /// Start every container flagged to launch on startup, concurrently.
    ///
    /// Returns the containers that failed.
    pub async fn start_all(&self) -> Vec<(ContainerId, Error)> {
        let ids: Vec<_> = Self::launch_on_startup(self.get_containers().await).collect();
        let results = join_all(ids.iter().map(|id| self.start(id))).await;
        Self::failures(ids, results, "start")
    }

    /// Stop every running container flagged to launch on startup, concurrently.
    pub async fn stop_all(&self) -> Vec<(ContainerId, Error)> {
        let running: Vec<_> = self
            .get_containers()
            .await
            .into_iter()
            .filter(|c| c.status == ContainerStatus::Running)
            .collect();
        let ids: Vec<_> = Self::launch_on_startup(running).collect();
        let results = join_all(ids.iter().map(|id| self.stop(id))).await;
        Self::failures(ids, results, "stop")
    }

    fn failures(
        ids: Vec<ContainerId>,
        results: Vec<Result<()>>,
        action: &str,
    ) -> Vec<(ContainerId, Error)> {
        ids.into_iter()
            .zip(results)
            .filter_map(|(id, result)| {
                let e = result.err()?;
                tracing::warn!(container = %id, action, error = %e, "Bulk operation failed");
                Some((id, e))
            })
            .collect()
    }

    /// Ask the runner whether newer images exist and record the answer on each container.
    pub async fn check_for_updates(&self) -> Vec<(ContainerId, ContainerUpdate)> {
        let entries = self.entries().await;
        let checks = entries.iter().map(|entry| async move {
            let container = entry.snapshot();
            let image = ImageSource::resolve(&container, self.inner.template_of(&container));
            let update = match self.inner.runner.check_for_updates(&container.id, &image).await {
                Ok(update) => update,
                Err(e) => {
                    tracing::warn!(container = %container.id, error = %e, "Update check failed");
                    return None;
                }
            };
            entry.record.lock().update = update.clone();
            update.map(|u| (container.id, u))
        });
        let mut found: Vec<_> = join_all(checks).await.into_iter().flatten().collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        found
    }

    /// Block until the container reaches `status`.
    ///
    /// Uses the configured wait timeout when `timeout` is `None`.
    pub async fn wait_status(
        &self,
        id: &ContainerId,
        status: ContainerStatus,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let entry = self.entry(id).await?;
        let mut rx = entry.status.subscribe();
        let deadline = timeout.unwrap_or(self.inner.settings.wait_timeout);
        match tokio::time::timeout(deadline, rx.wait_for(|s| *s == status)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(Error::ContainerNotFound(id.clone())),
            Err(_) => Err(Error::Timeout {
                id: id.clone(),
                status,
            }),
        }
    }

    /// Apply a partial edit to the container record and persist it.
    pub async fn patch_container(
        &self,
        id: &ContainerId,
        patch: ContainerPatch,
    ) -> Result<Container> {
        let entry = self.entry(id).await?;
        let updated = {
            let mut record = entry.record.lock();
            let mut updated = record.clone();
            patch.apply(&mut updated);
            *record = updated.clone();
            updated
        };
        self.inner.stores.containers.update(&updated).await?;
        self.inner.publish(Event::ContainersChange);
        Ok(updated)
    }

    pub async fn add_tag(&self, id: &ContainerId, tag: &TagId) -> Result<()> {
        self.entry(id).await?;
        self.inner.stores.tags.attach(id, tag).await
    }

    pub async fn remove_tag(&self, id: &ContainerId, tag: &TagId) -> Result<()> {
        self.entry(id).await?;
        self.inner.stores.tags.detach(id, tag).await
    }

    /// Replace every env variable of the container.
    ///
    /// Nothing is written unless every row is valid.
    pub async fn save_env(&self, id: &ContainerId, env: Vec<EnvVariable>) -> Result<()> {
        self.entry(id).await?;
        replace_rows(self.inner.stores.env.as_ref(), id, env).await
    }

    /// Replace every port mapping of the container.
    ///
    /// Nothing is written unless every row is valid.
    pub async fn save_ports(&self, id: &ContainerId, ports: Vec<Port>) -> Result<()> {
        self.entry(id).await?;
        replace_rows(self.inner.stores.ports.as_ref(), id, ports).await
    }

    /// Recent log lines, oldest first.
    pub async fn logs(&self, id: &ContainerId) -> Result<Vec<LogLine>> {
        self.entry(id).await?;
        Ok(self.inner.logs.load_buffer(id))
    }

    /// Link database roles of `id` to the containers providing them.
    ///
    /// `links` maps a role the container's template declares to the providing
    /// container. `databases` optionally names the database per role; without
    /// one the provider template's default database is used, or the entry is
    /// removed when there is none.
    pub async fn set_databases(
        &self,
        id: &ContainerId,
        links: BTreeMap<String, ContainerId>,
        databases: BTreeMap<String, String>,
    ) -> Result<()> {
        let entry = self.entry(id).await?;
        let container = entry.snapshot();
        let template = self.inner.template_of(&container);

        let mut writes = Vec::new();
        for (role_id, provider_id) in &links {
            let role = template
                .and_then(|t| t.databases.get(role_id))
                .ok_or_else(|| {
                    Error::Validation(format!("container {id} declares no database role {role_id}"))
                })?;
            let provider = self.entry(provider_id).await?.snapshot();
            let provider_template = self.inner.template_of(&provider).ok_or_else(|| {
                Error::Validation(format!("container {provider_id} provides no database"))
            })?;
            let provider_rows = self.inner.stores.resources(provider_id).await?;
            let values = databases::link_values(
                role,
                provider_id,
                provider_template,
                &provider_rows,
                &self.inner.settings.database_host,
                databases.get(role_id).map(String::as_str),
            )?;
            writes.extend(databases::env_writes(&role.names, values));
        }

        let env = self.inner.stores.env.list(id).await?;
        for (name, value) in writes {
            let existing = env.iter().find(|e| e.name == name);
            match (existing, value) {
                (Some(row), Some(value)) => {
                    let mut row = row.clone();
                    row.value = value;
                    self.inner.stores.env.update(row).await?;
                }
                (None, Some(value)) => {
                    self.inner
                        .stores
                        .env
                        .insert(EnvVariable::plain(id.clone(), &name, &value))
                        .await?;
                }
                (Some(row), None) => self.inner.stores.env.delete(row.id.as_str()).await?,
                (None, None) => {}
            }
        }

        let updated = {
            let mut record = entry.record.lock();
            record.databases.extend(links);
            record.clone()
        };
        self.inner.stores.containers.update(&updated).await?;
        self.inner.publish(Event::ContainersChange);
        Ok(())
    }
}
