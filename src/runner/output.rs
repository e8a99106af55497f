// ABOUTME: The two byte streams a started container hands back, and how lines are read.
// ABOUTME: Download progress travels on stdout behind a marker prefix as JSON.

use bytes::Bytes;
use futures::StreamExt;
use std::io;
use tokio::sync::mpsc;

use crate::driver::ByteStream;
use crate::model::{DOWNLOAD_MARKER, DownloadProgress, LogKind, LogMessage};
use crate::runtime::LogStream;

const CHANNEL_CAPACITY: usize = 256;

/// Output of a start: everything the runner and the container print.
pub struct RunOutput {
    pub stdout: ByteStream,
    pub stderr: ByteStream,
}

impl std::fmt::Debug for RunOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOutput").finish_non_exhaustive()
    }
}

/// Writing half of a `RunOutput`. Dropping it ends both streams.
#[derive(Clone)]
pub(crate) struct OutputSink {
    stdout: mpsc::Sender<io::Result<Bytes>>,
    stderr: mpsc::Sender<io::Result<Bytes>>,
}

fn receiver_stream(rx: mpsc::Receiver<io::Result<Bytes>>) -> ByteStream {
    Box::pin(futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    }))
}

pub(crate) fn channel() -> (OutputSink, RunOutput) {
    let (out_tx, out_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (err_tx, err_rx) = mpsc::channel(CHANNEL_CAPACITY);
    (
        OutputSink {
            stdout: out_tx,
            stderr: err_tx,
        },
        RunOutput {
            stdout: receiver_stream(out_rx),
            stderr: receiver_stream(err_rx),
        },
    )
}

impl OutputSink {
    fn sender(&self, stream: LogStream) -> &mpsc::Sender<io::Result<Bytes>> {
        match stream {
            LogStream::Stdout => &self.stdout,
            LogStream::Stderr => &self.stderr,
        }
    }

    async fn line(&self, stream: LogStream, text: &str) {
        let mut line = text.trim_end_matches(['\r', '\n']).to_string();
        line.push('\n');
        // A closed reader just means nobody is listening any more.
        let _ = self.sender(stream).send(Ok(Bytes::from(line))).await;
    }

    pub(crate) async fn out(&self, text: &str) {
        self.line(LogStream::Stdout, text).await;
    }

    pub(crate) async fn err(&self, text: &str) {
        self.line(LogStream::Stderr, text).await;
    }

    pub(crate) async fn download(&self, progress: &DownloadProgress) {
        match serde_json::to_string(progress) {
            Ok(json) => self.out(&format!("{DOWNLOAD_MARKER}{json}")).await,
            Err(e) => tracing::debug!(error = %e, "Dropping unserializable progress"),
        }
    }

    /// Copy a container's raw output until it ends, terminating a dangling last line.
    pub(crate) async fn forward(&self, stream: LogStream, mut bytes: ByteStream) {
        let sender = self.sender(stream);
        let mut ends_with_newline = true;
        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) if chunk.is_empty() => {}
                Ok(chunk) => {
                    ends_with_newline = chunk.last() == Some(&b'\n');
                    if sender.send(Ok(chunk)).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    tracing::debug!(stream = stream.as_str(), error = %e, "Log stream broke");
                    break;
                }
            }
        }
        if !ends_with_newline {
            let _ = sender.send(Ok(Bytes::from_static(b"\n"))).await;
        }
    }
}

/// Classify one output line as a download record or plain text.
pub fn classify(stream: LogStream, line: &str) -> (LogKind, LogMessage) {
    if stream == LogStream::Stdout
        && let Some(json) = line.strip_prefix(DOWNLOAD_MARKER)
        && let Ok(progress) = serde_json::from_str::<DownloadProgress>(json)
    {
        return (LogKind::Download, LogMessage::Download(progress));
    }
    let kind = match stream {
        LogStream::Stdout => LogKind::Out,
        LogStream::Stderr => LogKind::Err,
    };
    (kind, LogMessage::Text(line.to_string()))
}
