// ABOUTME: Runner backed by the privileged driver's loopback API.
// ABOUTME: Start runs in a background task that reports status and forwards output.

use async_trait::async_trait;
use futures::StreamExt;
use std::path::PathBuf;

use super::output::{self, OutputSink, RunOutput};
use super::spec::build_spec;
use super::{ImageSource, Runner, StartRequest, StatusSetter};
use crate::driver::api::{image_name, owner_labels};
use crate::driver::{DriverClient, DriverError, DriverProgressStream};
use crate::error::{Error, Result};
use crate::model::{ContainerStatus, ContainerUpdate, DownloadProgress, VolumeKind};
use crate::runtime::{ImageError, ImageProgress, LogStream, WaitCondition};
use crate::types::ContainerId;

/// Treat "already gone" as done.
fn ignore_not_found(result: std::result::Result<(), DriverError>) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => Ok(other?),
    }
}

#[derive(Debug, Clone)]
pub struct DriverRunner {
    client: DriverClient,
    data_dir: PathBuf,
}

impl DriverRunner {
    pub fn new(client: DriverClient, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            data_dir: data_dir.into(),
        }
    }

    fn source_dir(&self, id: &ContainerId) -> PathBuf {
        self.data_dir.join(id.as_str()).join("src")
    }
}

#[async_trait]
impl Runner for DriverRunner {
    async fn start(&self, request: StartRequest, set_status: StatusSetter) -> Result<RunOutput> {
        let (sink, output) = output::channel();
        let task = StartTask {
            client: self.client.clone(),
            request,
            set_status,
            sink,
        };
        tokio::spawn(task.run());
        Ok(output)
    }

    async fn stop(&self, id: &ContainerId) -> Result<()> {
        match self.client.stop_container(id).await {
            Err(e) if e.is_not_found() || e.is_conflict() => {
                tracing::debug!(container = %id, error = %e, "Container was not running");
                Ok(())
            }
            other => Ok(other?),
        }
    }

    async fn delete_container(&self, id: &ContainerId) -> Result<()> {
        ignore_not_found(self.client.delete_container(id).await)
    }

    async fn delete_mounts(&self, id: &ContainerId) -> Result<()> {
        ignore_not_found(self.client.delete_mounts(id).await)
    }

    async fn prepare_source(&self, id: &ContainerId, repository: &str) -> Result<()> {
        let target = self.source_dir(id);
        if target.join(".git").is_dir() {
            tracing::debug!(container = %id, "Source already cloned");
            return Ok(());
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tracing::info!(container = %id, repository, "Cloning source");
        let output = tokio::process::Command::new("git")
            .args(["clone", "--depth", "1", repository])
            .arg(&target)
            .output()
            .await
            .map_err(|e| Error::SourceClone {
                repository: repository.to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(Error::SourceClone {
                repository: repository.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    async fn check_for_updates(
        &self,
        id: &ContainerId,
        image: &ImageSource,
    ) -> Result<Option<ContainerUpdate>> {
        let ImageSource::Pull(reference) = image else {
            return Ok(None);
        };
        let current = match self.client.container_info(id).await {
            Ok(info) => info.image_id,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut progress = self.client.pull_image(reference).await?;
        while let Some(record) = progress.next().await {
            if let Some(message) = record?.error {
                return Err(DriverError::from(ImageError::PullFailed(message)).into());
            }
        }
        let latest = self.client.image_info(reference).await?.id;

        tracing::debug!(container = %id, %current, %latest, "Checked for image update");
        Ok((current != latest).then_some(ContainerUpdate {
            current_version: current,
            latest_version: latest,
        }))
    }
}

struct StartTask {
    client: DriverClient,
    request: StartRequest,
    set_status: StatusSetter,
    sink: OutputSink,
}

impl StartTask {
    fn id(&self) -> &ContainerId {
        &self.request.container.id
    }

    async fn run(self) {
        let id = self.id().clone();
        let since = match self.launch().await {
            Ok(since) => since,
            Err(e) => {
                tracing::warn!(container = %id, error = %e, "Container failed to start");
                self.sink.err(&format!("Failed to start container: {e}")).await;
                (self.set_status)(ContainerStatus::Error);
                return;
            }
        };

        let forwarders = [LogStream::Stdout, LogStream::Stderr].map(|stream| {
            let client = self.client.clone();
            let sink = self.sink.clone();
            let id = id.clone();
            tokio::spawn(async move {
                match client.logs(&id, stream, Some(since)).await {
                    Ok(bytes) => sink.forward(stream, bytes).await,
                    Err(e) => {
                        tracing::debug!(container = %id, error = %e, "Could not attach to logs")
                    }
                }
            })
        });

        let exit = self.client.wait(&id, WaitCondition::NotRunning).await;
        for task in forwarders {
            let _ = task.await;
        }
        match exit {
            Ok(code) => {
                tracing::info!(container = %id, code, "Container exited");
                self.sink.err(&format!("Container exited with code {code}")).await;
            }
            Err(e) => {
                tracing::warn!(container = %id, error = %e, "Lost track of container");
            }
        }
        // Ignored by the registry when the exit was requested.
        (self.set_status)(ContainerStatus::Error);
    }

    /// Bring the container up; returns the unix second its output starts from.
    ///
    /// A reused runtime container still holds the output of earlier runs.
    async fn launch(&self) -> Result<i64> {
        let id = self.id();
        (self.set_status)(ContainerStatus::Building);
        let image = self.prepare_image().await?;
        self.create_volumes().await?;

        let spec = build_spec(&self.request.container, &self.request.resources, &image)?;
        match self.client.container_info(id).await {
            Ok(_) => tracing::debug!(container = %id, "Reusing existing runtime container"),
            Err(e) if e.is_not_found() => {
                self.sink.out("Creating container").await;
                self.client.create_container(id, spec).await?;
            }
            Err(e) => return Err(e.into()),
        }

        (self.set_status)(ContainerStatus::Starting);
        let since = chrono::Utc::now().timestamp();
        match self.client.start_container(id).await {
            Err(e) if e.is_conflict() => {
                tracing::debug!(container = %id, "Runtime container already running")
            }
            other => other?,
        }
        (self.set_status)(ContainerStatus::Running);
        Ok(since)
    }

    async fn prepare_image(&self) -> Result<String> {
        let id = self.id();
        match &self.request.image {
            ImageSource::Pull(reference) => {
                self.sink.out(&format!("Pulling image {reference}")).await;
                let pulled = match self.client.pull_image(reference).await {
                    Ok(progress) => self.follow(progress).await,
                    Err(e) => Err(e.into()),
                };
                if let Err(e) = pulled {
                    // An image already present locally is good enough.
                    if self.client.image_info(reference).await.is_err() {
                        return Err(e);
                    }
                    tracing::warn!(container = %id, error = %e, "Pull failed, using local image");
                    self.sink.err(&format!("Pull failed, using local image: {e}")).await;
                }
                Ok(reference.clone())
            }
            ImageSource::Build { dockerfile } => {
                self.sink.out("Building image").await;
                let progress = self.client.build_image(id, dockerfile.clone()).await?;
                self.follow(progress).await?;
                Ok(image_name(id))
            }
        }
    }

    async fn follow(&self, mut progress: DriverProgressStream) -> Result<()> {
        while let Some(record) = progress.next().await {
            let record = record?;
            if let Some(message) = record.error {
                return Err(DriverError::from(ImageError::PullFailed(message)).into());
            }
            self.report(record).await;
        }
        Ok(())
    }

    async fn report(&self, record: ImageProgress) {
        match record {
            ImageProgress {
                stream: Some(text), ..
            } => {
                for line in text.lines().filter(|l| !l.trim().is_empty()) {
                    self.sink.out(line).await;
                }
            }
            ImageProgress {
                id: Some(layer),
                status: Some(status),
                current,
                total,
                ..
            } => {
                self.sink
                    .download(&DownloadProgress {
                        id: layer,
                        status,
                        current,
                        total,
                    })
                    .await
            }
            ImageProgress {
                status: Some(status),
                ..
            } => self.sink.out(&status).await,
            _ => {}
        }
    }

    async fn create_volumes(&self) -> Result<()> {
        let id = self.id();
        for volume in &self.request.resources.volumes {
            if volume.kind != VolumeKind::Volume {
                continue;
            }
            match self
                .client
                .create_volume(&volume.external_path, owner_labels(id))
                .await
            {
                Err(e) if e.is_conflict() => {}
                other => other?,
            }
        }
        Ok(())
    }
}
