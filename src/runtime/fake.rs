// ABOUTME: In-memory runtime backend for unit tests of the driver and runner.
// ABOUTME: Tracks containers, images, volumes and canned log output behind a mutex.

use super::traits::sealed::Sealed;
use super::traits::{
    ContainerError, ContainerFilters, ContainerInfo, ContainerOps, ContainerSpec, ContainerState,
    ContainerSummary, ImageError, ImageInfo, ImageOps, ImageProgress, LogChunk, LogError, LogOps,
    LogOptions, LogStream, ProgressStream, RuntimeInfo, RuntimeInfoError, RuntimeMetadata,
    VolumeError, VolumeOps, WaitCondition,
};
use crate::types::ImageRef;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::Notify;

struct FakeContainer {
    spec: ContainerSpec,
    state: ContainerState,
    /// Image id resolved when the container was created.
    image_id: String,
}

#[derive(Default)]
struct Inner {
    containers: HashMap<String, FakeContainer>,
    images: HashMap<String, String>,
    volumes: HashMap<String, HashMap<String, String>>,
    /// Output per container, stamped with unix seconds.
    logs: HashMap<String, Vec<(LogStream, Bytes, i64)>>,
    calls: Vec<String>,
}

#[derive(Default)]
pub struct FakeRuntime {
    inner: Mutex<Inner>,
    changed: Notify,
}

impl FakeRuntime {
    pub fn spec(&self, name: &str) -> Option<ContainerSpec> {
        self.inner
            .lock()
            .containers
            .get(name)
            .map(|c| c.spec.clone())
    }

    pub fn state(&self, name: &str) -> Option<ContainerState> {
        self.inner.lock().containers.get(name).map(|c| c.state)
    }

    pub fn has_volume(&self, name: &str) -> bool {
        self.inner.lock().volumes.contains_key(name)
    }

    pub fn push_log(&self, name: &str, stream: LogStream, text: &str) {
        self.push_log_at(name, stream, text, chrono::Utc::now().timestamp());
    }

    /// Record output as if written at `at` (unix seconds).
    pub fn push_log_at(&self, name: &str, stream: LogStream, text: &str, at: i64) {
        self.inner
            .lock()
            .logs
            .entry(name.to_string())
            .or_default()
            .push((stream, Bytes::from(text.to_string()), at));
    }

    pub fn add_image(&self, reference: &str, id: &str) {
        self.inner
            .lock()
            .images
            .insert(reference.to_string(), id.to_string());
    }

    /// Simulate the container exiting on its own.
    pub fn crash(&self, name: &str) {
        if let Some(c) = self.inner.lock().containers.get_mut(name) {
            c.state = ContainerState::Exited;
        }
        self.changed.notify_waiters();
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().calls.clone()
    }

    fn record(&self, call: String) {
        self.inner.lock().calls.push(call);
    }

    fn progress(records: Vec<ImageProgress>) -> ProgressStream {
        Box::pin(futures::stream::iter(records.into_iter().map(Ok)))
    }
}

impl Sealed for FakeRuntime {}

#[async_trait]
impl RuntimeInfo for FakeRuntime {
    async fn info(&self) -> Result<RuntimeMetadata, RuntimeInfoError> {
        Ok(RuntimeMetadata {
            name: "fake".into(),
            version: "0".into(),
            api_version: "0".into(),
            os: "linux".into(),
            arch: "x86_64".into(),
        })
    }

    async fn ping(&self) -> Result<(), RuntimeInfoError> {
        Ok(())
    }
}

#[async_trait]
impl ContainerOps for FakeRuntime {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, ContainerError> {
        self.record(format!("create {}", spec.name));
        let mut inner = self.inner.lock();
        if inner.containers.contains_key(&spec.name) {
            return Err(ContainerError::AlreadyExists(spec.name.clone()));
        }
        let image_id = inner.images.get(&spec.image).cloned().unwrap_or_default();
        inner.containers.insert(
            spec.name.clone(),
            FakeContainer {
                spec: spec.clone(),
                state: ContainerState::Created,
                image_id,
            },
        );
        Ok(format!("runtime-{}", spec.name))
    }

    async fn start_container(&self, name: &str) -> Result<(), ContainerError> {
        self.record(format!("start {name}"));
        let mut inner = self.inner.lock();
        let c = inner
            .containers
            .get_mut(name)
            .ok_or_else(|| ContainerError::NotFound(name.to_string()))?;
        if c.state == ContainerState::Running {
            return Err(ContainerError::AlreadyRunning(name.to_string()));
        }
        c.state = ContainerState::Running;
        Ok(())
    }

    async fn stop_container(&self, name: &str, _timeout: Duration) -> Result<(), ContainerError> {
        self.record(format!("stop {name}"));
        {
            let mut inner = self.inner.lock();
            let c = inner
                .containers
                .get_mut(name)
                .ok_or_else(|| ContainerError::NotFound(name.to_string()))?;
            c.state = ContainerState::Exited;
        }
        self.changed.notify_waiters();
        Ok(())
    }

    async fn remove_container(&self, name: &str, _force: bool) -> Result<(), ContainerError> {
        self.record(format!("remove {name}"));
        let removed = self.inner.lock().containers.remove(name);
        self.changed.notify_waiters();
        removed
            .map(|_| ())
            .ok_or_else(|| ContainerError::NotFound(name.to_string()))
    }

    async fn inspect_container(&self, name: &str) -> Result<ContainerInfo, ContainerError> {
        let inner = self.inner.lock();
        let c = inner
            .containers
            .get(name)
            .ok_or_else(|| ContainerError::NotFound(name.to_string()))?;
        Ok(ContainerInfo {
            id: format!("runtime-{name}"),
            name: name.to_string(),
            image: c.spec.image.clone(),
            image_id: c.image_id.clone(),
            state: c.state,
            labels: c.spec.labels.clone(),
        })
    }

    async fn list_containers(
        &self,
        filters: &ContainerFilters,
    ) -> Result<Vec<ContainerSummary>, ContainerError> {
        let inner = self.inner.lock();
        Ok(inner
            .containers
            .iter()
            .filter(|(_, c)| {
                filters
                    .labels
                    .iter()
                    .all(|(k, v)| c.spec.labels.get(k) == Some(v))
            })
            .map(|(name, c)| ContainerSummary {
                id: format!("runtime-{name}"),
                name: name.clone(),
                image: c.spec.image.clone(),
                state: format!("{:?}", c.state).to_lowercase(),
                status: String::new(),
                labels: c.spec.labels.clone(),
            })
            .collect())
    }

    async fn wait_container(
        &self,
        name: &str,
        _condition: WaitCondition,
    ) -> Result<i64, ContainerError> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let state = self.state(name);
            match state {
                None => return Err(ContainerError::NotFound(name.to_string())),
                Some(state) if state != ContainerState::Running => return Ok(0),
                Some(_) => {}
            }
            notified.await;
        }
    }
}

#[async_trait]
impl ImageOps for FakeRuntime {
    async fn pull_image(&self, reference: &ImageRef) -> Result<ProgressStream, ImageError> {
        let name = reference.to_string();
        self.record(format!("pull {name}"));
        let id = format!("sha256:{}", name.replace([':', '/'], "-"));
        self.inner.lock().images.entry(name).or_insert(id);
        Ok(Self::progress(vec![
            ImageProgress {
                id: Some("layer1".into()),
                status: Some("Downloading".into()),
                current: Some(50),
                total: Some(100),
                ..Default::default()
            },
            ImageProgress {
                id: Some("layer1".into()),
                status: Some("Pull complete".into()),
                ..Default::default()
            },
        ]))
    }

    async fn build_image(
        &self,
        tag: &str,
        _context: Vec<u8>,
        _dockerfile: &str,
    ) -> Result<ProgressStream, ImageError> {
        self.record(format!("build {tag}"));
        self.inner
            .lock()
            .images
            .insert(tag.to_string(), format!("sha256:{tag}"));
        Ok(Self::progress(vec![ImageProgress {
            stream: Some("Step 1/1 : FROM scratch\n".into()),
            ..Default::default()
        }]))
    }

    async fn inspect_image(&self, reference: &str) -> Result<ImageInfo, ImageError> {
        self.inner
            .lock()
            .images
            .get(reference)
            .map(|id| ImageInfo {
                id: id.clone(),
                repo_tags: vec![reference.to_string()],
            })
            .ok_or_else(|| ImageError::NotFound(reference.to_string()))
    }
}

#[async_trait]
impl VolumeOps for FakeRuntime {
    async fn create_volume(
        &self,
        name: &str,
        labels: &HashMap<String, String>,
    ) -> Result<(), VolumeError> {
        self.record(format!("volume {name}"));
        self.inner
            .lock()
            .volumes
            .insert(name.to_string(), labels.clone());
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<(), VolumeError> {
        self.inner
            .lock()
            .volumes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| VolumeError::NotFound(name.to_string()))
    }

    async fn list_volumes(
        &self,
        labels: &HashMap<String, String>,
    ) -> Result<Vec<String>, VolumeError> {
        Ok(self
            .inner
            .lock()
            .volumes
            .iter()
            .filter(|(_, l)| labels.iter().all(|(k, v)| l.get(k) == Some(v)))
            .map(|(name, _)| name.clone())
            .collect())
    }
}

#[async_trait]
impl LogOps for FakeRuntime {
    async fn container_logs(
        &self,
        name: &str,
        opts: &LogOptions,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<LogChunk, LogError>> + Send>>, LogError> {
        let chunks: Vec<Result<LogChunk, LogError>> = self
            .inner
            .lock()
            .logs
            .get(name)
            .into_iter()
            .flatten()
            .filter(|(stream, _, at)| {
                let wanted = match stream {
                    LogStream::Stdout => opts.stdout,
                    LogStream::Stderr => opts.stderr,
                };
                wanted && opts.since.is_none_or(|since| *at >= since)
            })
            .map(|(stream, data, _)| {
                Ok(LogChunk {
                    data: data.clone(),
                    stream: *stream,
                })
            })
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}
