// ABOUTME: Log operations trait for container runtimes.
// ABOUTME: Stream raw stdout/stderr chunks from a container.

use super::sealed::Sealed;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// Log streaming operations.
#[async_trait]
pub trait LogOps: Sealed + Send + Sync {
    /// Stream logs from a container.
    async fn container_logs(
        &self,
        name: &str,
        opts: &LogOptions,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<LogChunk, LogError>> + Send>>, LogError>;
}

/// Options for log streaming.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub stdout: bool,
    pub stderr: bool,
    /// Follow log output (like `tail -f`).
    pub follow: bool,
    /// Skip output written before this unix time in seconds.
    pub since: Option<i64>,
}

impl LogOptions {
    /// Follow a single stream, from `since` or from the container's first output.
    pub fn follow(stream: LogStream, since: Option<i64>) -> Self {
        Self {
            stdout: stream == LogStream::Stdout,
            stderr: stream == LogStream::Stderr,
            follow: true,
            since,
        }
    }
}

/// A chunk of output as the runtime delivered it; not necessarily one line.
#[derive(Debug, Clone)]
pub struct LogChunk {
    pub data: Bytes,
    pub stream: LogStream,
}

/// Log stream type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    pub fn as_str(self) -> &'static str {
        match self {
            LogStream::Stdout => "stdout",
            LogStream::Stderr => "stderr",
        }
    }
}

impl std::str::FromStr for LogStream {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdout" => Ok(LogStream::Stdout),
            "stderr" => Ok(LogStream::Stderr),
            other => Err(format!("unknown log stream: {other}")),
        }
    }
}

/// Errors from log operations.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    #[error("stream error: {0}")]
    StreamError(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}
