// ABOUTME: Privileged driver HTTP server: a thin loopback wrapper over the runtime traits.
// ABOUTME: Control calls answer JSON; pulls, builds and logs stream their bodies.

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use bytes::Bytes;
use futures::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::{Component, Path as FsPath, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use super::api::{
    BuildRequest, CreateContainerRequest, CreateContainerResponse, LABEL_CONTAINER,
    LABEL_MANAGED, LogsQuery, PullRequest, VOLUME_PREFIX, VolumeRequest, WaitResponse,
    container_name, image_name, owner_labels,
};
use super::error::DriverError;
use crate::runtime::{
    ContainerFilters, ContainerInfo, ContainerOps, ContainerSpec, ContainerSummary, ImageInfo,
    ImageOps, ImageProgress, LogOps, LogOptions, LogStream, MountKind, ProgressStream, Runtime,
    VolumeError, VolumeOps, WaitCondition,
};
use crate::types::{ContainerId, ImageRef};

type DriverResult<T> = std::result::Result<T, DriverError>;

/// Shared state for the driver handlers.
#[derive(Clone)]
pub struct DriverState {
    runtime: Arc<dyn Runtime>,
    data_dir: PathBuf,
    stop_timeout: Duration,
}

impl DriverState {
    pub fn new(runtime: Arc<dyn Runtime>, data_dir: PathBuf, stop_timeout: Duration) -> Self {
        // The runtime resolves bind sources itself, so they must be absolute.
        let data_dir = std::path::absolute(&data_dir).unwrap_or(data_dir);
        Self {
            runtime,
            data_dir,
            stop_timeout,
        }
    }
}

/// Creates the driver router with all endpoints.
pub fn router(state: DriverState) -> Router {
    Router::new()
        .route(
            "/runtime/containers",
            get(list_containers).post(create_container),
        )
        .route("/runtime/containers/{id}", delete(delete_container))
        .route("/runtime/containers/{id}/start", post(start_container))
        .route("/runtime/containers/{id}/stop", post(stop_container))
        .route("/runtime/containers/{id}/info", get(container_info))
        .route("/runtime/containers/{id}/logs/{stream}", get(container_logs))
        .route("/runtime/containers/{id}/wait/{condition}", get(wait_container))
        .route("/runtime/containers/{id}/mounts", delete(delete_mounts))
        .route("/runtime/images/{id}/info", get(image_info))
        .route("/runtime/images/pull", post(pull_image))
        .route("/runtime/images/build", post(build_image))
        .route("/runtime/volumes", post(create_volume).delete(delete_volume))
        .with_state(state)
}

/// Bind the driver listener, refusing anything but loopback.
pub async fn bind(addr: SocketAddr) -> DriverResult<TcpListener> {
    if !addr.ip().is_loopback() {
        return Err(DriverError::NonLoopback(addr));
    }
    Ok(TcpListener::bind(addr).await?)
}

/// Serve the driver API until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: DriverState, shutdown: F) -> DriverResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "Runtime driver listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

fn checked_id(raw: String) -> DriverResult<ContainerId> {
    let id = ContainerId::new(raw);
    if !id.is_path_safe() {
        return Err(DriverError::InvalidId(id.into_inner()));
    }
    Ok(id)
}

async fn list_containers(
    State(state): State<DriverState>,
) -> DriverResult<Json<Vec<ContainerSummary>>> {
    let filters = ContainerFilters {
        labels: HashMap::from([(LABEL_MANAGED.to_string(), "true".to_string())]),
        name: None,
        all: true,
    };
    Ok(Json(state.runtime.list_containers(&filters).await?))
}

async fn create_container(
    State(state): State<DriverState>,
    Json(req): Json<CreateContainerRequest>,
) -> DriverResult<(StatusCode, Json<CreateContainerResponse>)> {
    let id = checked_id(req.id.into_inner())?;
    let mut spec = req.spec;
    spec.name = container_name(&id);
    spec.labels.extend(owner_labels(&id));
    resolve_binds(&state.data_dir, &id, &mut spec).await?;

    let runtime_id = state.runtime.create_container(&spec).await?;
    tracing::info!(container = %id, runtime_id = %runtime_id, "Created runtime container");
    Ok((StatusCode::CREATED, Json(CreateContainerResponse { runtime_id })))
}

/// Map bind sources (relative keys) into `<data_dir>/<id>/volumes`, creating them.
async fn resolve_binds(
    data_dir: &FsPath,
    id: &ContainerId,
    spec: &mut ContainerSpec,
) -> DriverResult<()> {
    let root = data_dir.join(id.as_str()).join("volumes");
    for mount in spec
        .mounts
        .iter_mut()
        .filter(|m| matches!(m.kind, MountKind::Bind))
    {
        let relative = FsPath::new(&mount.source);
        let contained = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if mount.source.is_empty() || !contained {
            return Err(DriverError::Decode(format!(
                "bind source escapes the container volume directory: {}",
                mount.source
            )));
        }
        let host = root.join(relative);
        tokio::fs::create_dir_all(&host).await?;
        mount.source = host.to_string_lossy().into_owned();
    }
    Ok(())
}

async fn delete_container(
    State(state): State<DriverState>,
    Path(id): Path<String>,
) -> DriverResult<StatusCode> {
    let id = checked_id(id)?;
    state
        .runtime
        .remove_container(&container_name(&id), true)
        .await?;
    tracing::info!(container = %id, "Removed runtime container");
    Ok(StatusCode::NO_CONTENT)
}

async fn start_container(
    State(state): State<DriverState>,
    Path(id): Path<String>,
) -> DriverResult<StatusCode> {
    let id = checked_id(id)?;
    state.runtime.start_container(&container_name(&id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn stop_container(
    State(state): State<DriverState>,
    Path(id): Path<String>,
) -> DriverResult<StatusCode> {
    let id = checked_id(id)?;
    state
        .runtime
        .stop_container(&container_name(&id), state.stop_timeout)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn container_info(
    State(state): State<DriverState>,
    Path(id): Path<String>,
) -> DriverResult<Json<ContainerInfo>> {
    let id = checked_id(id)?;
    Ok(Json(
        state.runtime.inspect_container(&container_name(&id)).await?,
    ))
}

async fn container_logs(
    State(state): State<DriverState>,
    Path((id, stream)): Path<(String, String)>,
    Query(query): Query<LogsQuery>,
) -> DriverResult<Response> {
    let id = checked_id(id)?;
    let stream: LogStream = stream.parse().map_err(DriverError::Decode)?;

    let logs = state
        .runtime
        .container_logs(
            &container_name(&id),
            &LogOptions::follow(stream, query.since),
        )
        .await?;
    let body = logs.map(|chunk| {
        chunk
            .map(|c| c.data)
            .map_err(|e| io::Error::other(e.to_string()))
    });

    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::from_stream(body),
    )
        .into_response())
}

async fn wait_container(
    State(state): State<DriverState>,
    Path((id, condition)): Path<(String, String)>,
) -> DriverResult<Json<WaitResponse>> {
    let id = checked_id(id)?;
    let condition: WaitCondition = condition.parse().map_err(DriverError::Decode)?;
    let status_code = state
        .runtime
        .wait_container(&container_name(&id), condition)
        .await?;
    Ok(Json(WaitResponse { status_code }))
}

/// Remove the container's bind-mount directory and its named volumes.
async fn delete_mounts(
    State(state): State<DriverState>,
    Path(id): Path<String>,
) -> DriverResult<StatusCode> {
    let id = checked_id(id)?;

    let dir = state.data_dir.join(id.as_str()).join("volumes");
    match tokio::fs::remove_dir_all(&dir).await {
        Ok(()) => tracing::debug!(dir = %dir.display(), "Removed bind mounts"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let labels = HashMap::from([(LABEL_CONTAINER.to_string(), id.to_string())]);
    for name in state.runtime.list_volumes(&labels).await? {
        match state.runtime.remove_volume(&name).await {
            Ok(()) | Err(VolumeError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

async fn image_info(
    State(state): State<DriverState>,
    Path(reference): Path<String>,
) -> DriverResult<Json<ImageInfo>> {
    Ok(Json(state.runtime.inspect_image(&reference).await?))
}

async fn pull_image(
    State(state): State<DriverState>,
    Json(req): Json<PullRequest>,
) -> DriverResult<Response> {
    let reference =
        ImageRef::parse(&req.image).map_err(|e| DriverError::Decode(e.to_string()))?;
    tracing::info!(image = %reference, "Pulling image");
    let progress = state.runtime.pull_image(&reference).await?;
    Ok(progress_response(progress))
}

async fn build_image(
    State(state): State<DriverState>,
    Json(req): Json<BuildRequest>,
) -> DriverResult<Response> {
    let id = checked_id(req.id.into_inner())?;
    let context_dir = state.data_dir.join(id.as_str()).join("src");
    if !context_dir.is_dir() {
        return Err(DriverError::Decode(format!(
            "no build context for container {id}"
        )));
    }

    let context = tokio::task::spawn_blocking(move || -> io::Result<Vec<u8>> {
        let mut ar = tar::Builder::new(Vec::new());
        ar.follow_symlinks(false);
        ar.append_dir_all(".", &context_dir)?;
        ar.into_inner()
    })
    .await
    .map_err(|e| DriverError::Transport(e.to_string()))??;

    let dockerfile = req.dockerfile.unwrap_or_else(|| "Dockerfile".to_string());
    let tag = image_name(&id);
    tracing::info!(container = %id, tag = %tag, "Building image");
    let progress = state
        .runtime
        .build_image(&tag, context, &dockerfile)
        .await?;
    Ok(progress_response(progress))
}

async fn create_volume(
    State(state): State<DriverState>,
    Json(req): Json<VolumeRequest>,
) -> DriverResult<StatusCode> {
    if !req.name.starts_with(VOLUME_PREFIX) {
        return Err(DriverError::InvalidId(req.name));
    }
    let mut labels = req.labels;
    labels.insert(LABEL_MANAGED.to_string(), "true".to_string());
    state.runtime.create_volume(&req.name, &labels).await?;
    Ok(StatusCode::CREATED)
}

async fn delete_volume(
    State(state): State<DriverState>,
    Json(req): Json<VolumeRequest>,
) -> DriverResult<StatusCode> {
    if !req.name.starts_with(VOLUME_PREFIX) {
        return Err(DriverError::InvalidId(req.name));
    }
    state.runtime.remove_volume(&req.name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Newline-delimited JSON progress; a failing record ends the stream as an `error` line.
fn progress_response(progress: ProgressStream) -> Response {
    let body = progress.map(|item| {
        let record = item.unwrap_or_else(|e| ImageProgress {
            error: Some(e.to_string()),
            ..Default::default()
        });
        let mut line = serde_json::to_vec(&record).map_err(io::Error::other)?;
        line.push(b'\n');
        Ok::<_, io::Error>(Bytes::from(line))
    });

    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(body),
    )
        .into_response()
}
