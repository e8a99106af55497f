// ABOUTME: Unprivileged client for the runtime driver over loopback HTTP/1.
// ABOUTME: One hyper connection per call; streamed responses are handed back unbuffered.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use tokio::net::TcpStream;

use super::api::{
    BuildRequest, CreateContainerRequest, CreateContainerResponse, ErrorBody, PullRequest,
    VolumeRequest, WaitResponse,
};
use super::error::DriverError;
use crate::runtime::{
    ContainerInfo, ContainerSpec, ContainerSummary, ImageInfo, ImageProgress, LogStream,
    WaitCondition,
};
use crate::types::ContainerId;

/// Raw bytes as they arrive from the driver.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Newline-separated text, one item per line without the terminator.
pub type LineStream = Pin<Box<dyn Stream<Item = io::Result<String>> + Send>>;

pub type DriverProgressStream =
    Pin<Box<dyn Stream<Item = Result<ImageProgress, DriverError>> + Send>>;

type DriverResult<T> = std::result::Result<T, DriverError>;

#[derive(Debug, Clone)]
pub struct DriverClient {
    addr: SocketAddr,
}

impl DriverClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> DriverResult<Response<Incoming>> {
        let stream = TcpStream::connect(self.addr)
            .await
            .map_err(|e| DriverError::Connect(format!("{}: {}", self.addr, e)))?;
        let io = TokioIo::new(stream);

        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| DriverError::Connect(format!("HTTP handshake failed: {}", e)))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(error = %e, "Driver connection closed with error");
            }
        });

        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header(HOST, "localhost");
        let body = match body {
            Some(bytes) => {
                builder = builder.header(CONTENT_TYPE, "application/json");
                Full::new(Bytes::from(bytes))
            }
            None => Full::new(Bytes::new()),
        };
        let req = builder
            .body(body)
            .map_err(|e| DriverError::Transport(format!("failed to build request: {}", e)))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| DriverError::Transport(format!("request failed: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let bytes = resp
                .into_body()
                .collect()
                .await
                .map(|b| b.to_bytes())
                .unwrap_or_default();
            let message = serde_json::from_slice::<ErrorBody>(&bytes)
                .map(|b| b.message)
                .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).into_owned());
            return Err(DriverError::Status { status, message });
        }

        Ok(resp)
    }

    async fn call(&self, method: Method, path: &str) -> DriverResult<()> {
        self.send(method, path, None).await?;
        Ok(())
    }

    async fn call_json<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> DriverResult<Response<Incoming>> {
        let bytes = serde_json::to_vec(body).map_err(|e| DriverError::Decode(e.to_string()))?;
        self.send(method, path, Some(bytes)).await
    }

    async fn read_json<T: DeserializeOwned>(resp: Response<Incoming>) -> DriverResult<T> {
        let bytes = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| DriverError::Transport(format!("failed to read response: {}", e)))?
            .to_bytes();
        serde_json::from_slice(&bytes).map_err(|e| DriverError::Decode(e.to_string()))
    }

    fn byte_stream(resp: Response<Incoming>) -> ByteStream {
        Box::pin(
            resp.into_body()
                .into_data_stream()
                .map(|chunk| chunk.map_err(io::Error::other)),
        )
    }

    fn progress_stream(resp: Response<Incoming>) -> DriverProgressStream {
        Box::pin(lines(Self::byte_stream(resp)).filter_map(|line| async move {
            match line {
                Ok(line) if line.trim().is_empty() => None,
                Ok(line) => Some(
                    serde_json::from_str::<ImageProgress>(&line)
                        .map_err(|e| DriverError::Decode(e.to_string())),
                ),
                Err(e) => Some(Err(DriverError::Transport(e.to_string()))),
            }
        }))
    }

    pub async fn list_containers(&self) -> DriverResult<Vec<ContainerSummary>> {
        let resp = self
            .send(Method::GET, "/runtime/containers", None)
            .await?;
        Self::read_json(resp).await
    }

    pub async fn create_container(
        &self,
        id: &ContainerId,
        spec: ContainerSpec,
    ) -> DriverResult<CreateContainerResponse> {
        let req = CreateContainerRequest {
            id: id.clone(),
            spec,
        };
        let resp = self
            .call_json(Method::POST, "/runtime/containers", &req)
            .await?;
        Self::read_json(resp).await
    }

    pub async fn delete_container(&self, id: &ContainerId) -> DriverResult<()> {
        self.call(Method::DELETE, &format!("/runtime/containers/{id}"))
            .await
    }

    pub async fn start_container(&self, id: &ContainerId) -> DriverResult<()> {
        self.call(Method::POST, &format!("/runtime/containers/{id}/start"))
            .await
    }

    pub async fn stop_container(&self, id: &ContainerId) -> DriverResult<()> {
        self.call(Method::POST, &format!("/runtime/containers/{id}/stop"))
            .await
    }

    pub async fn container_info(&self, id: &ContainerId) -> DriverResult<ContainerInfo> {
        let resp = self
            .send(Method::GET, &format!("/runtime/containers/{id}/info"), None)
            .await?;
        Self::read_json(resp).await
    }

    /// Follow one output stream of a container until it exits.
    ///
    /// `since` is in unix seconds; output written before it is skipped.
    pub async fn logs(
        &self,
        id: &ContainerId,
        stream: LogStream,
        since: Option<i64>,
    ) -> DriverResult<ByteStream> {
        let mut path = format!("/runtime/containers/{id}/logs/{}", stream.as_str());
        if let Some(since) = since {
            path.push_str(&format!("?since={since}"));
        }
        let resp = self.send(Method::GET, &path, None).await?;
        Ok(Self::byte_stream(resp))
    }

    /// Block until the container meets `condition`; returns the exit code.
    pub async fn wait(&self, id: &ContainerId, condition: WaitCondition) -> DriverResult<i64> {
        let path = format!("/runtime/containers/{id}/wait/{}", condition.as_str());
        let resp = self.send(Method::GET, &path, None).await?;
        let body: WaitResponse = Self::read_json(resp).await?;
        Ok(body.status_code)
    }

    pub async fn delete_mounts(&self, id: &ContainerId) -> DriverResult<()> {
        self.call(Method::DELETE, &format!("/runtime/containers/{id}/mounts"))
            .await
    }

    pub async fn image_info(&self, reference: &str) -> DriverResult<ImageInfo> {
        let path = format!("/runtime/images/{}/info", urlencoding::encode(reference));
        let resp = self.send(Method::GET, &path, None).await?;
        Self::read_json(resp).await
    }

    pub async fn pull_image(&self, image: &str) -> DriverResult<DriverProgressStream> {
        let req = PullRequest {
            image: image.to_string(),
        };
        let resp = self
            .call_json(Method::POST, "/runtime/images/pull", &req)
            .await?;
        Ok(Self::progress_stream(resp))
    }

    /// Build `hearth_image_<id>` from the container's cloned source.
    pub async fn build_image(
        &self,
        id: &ContainerId,
        dockerfile: Option<String>,
    ) -> DriverResult<DriverProgressStream> {
        let req = BuildRequest {
            id: id.clone(),
            dockerfile,
        };
        let resp = self
            .call_json(Method::POST, "/runtime/images/build", &req)
            .await?;
        Ok(Self::progress_stream(resp))
    }

    pub async fn create_volume(
        &self,
        name: &str,
        labels: HashMap<String, String>,
    ) -> DriverResult<()> {
        let req = VolumeRequest {
            name: name.to_string(),
            labels,
        };
        self.call_json(Method::POST, "/runtime/volumes", &req)
            .await?;
        Ok(())
    }

    pub async fn delete_volume(&self, name: &str) -> DriverResult<()> {
        let req = VolumeRequest {
            name: name.to_string(),
            labels: HashMap::new(),
        };
        self.call_json(Method::DELETE, "/runtime/volumes", &req)
            .await?;
        Ok(())
    }
}

/// Split a byte stream into lines. A trailing partial line is emitted at end of stream.
pub fn lines(stream: ByteStream) -> LineStream {
    Box::pin(futures::stream::unfold(
        (stream, Vec::<u8>::new(), false),
        |(mut stream, mut buf, mut done)| async move {
            loop {
                if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                    let rest = buf.split_off(pos + 1);
                    let mut line = std::mem::replace(&mut buf, rest);
                    line.pop();
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    let line = String::from_utf8_lossy(&line).into_owned();
                    return Some((Ok(line), (stream, buf, done)));
                }
                if done {
                    if buf.is_empty() {
                        return None;
                    }
                    let line = String::from_utf8_lossy(&std::mem::take(&mut buf)).into_owned();
                    return Some((Ok(line), (stream, buf, done)));
                }
                match stream.next().await {
                    Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        done = true;
                        return Some((Err(e), (stream, buf, done)));
                    }
                    None => done = true,
                }
            }
        },
    ))
}
