// ABOUTME: Log line types: kind discriminator and the polymorphic message body.
// ABOUTME: Messages are plain text, one download progress record, or a keyed set of them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Prefix the runner puts on stdout lines carrying a JSON `DownloadProgress`.
pub const DOWNLOAD_MARKER: &str = "!!download ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogKind {
    Out,
    Err,
    Download,
    Downloads,
    /// Messages emitted by the platform itself, not the container.
    EngineOut,
    EngineErr,
}

impl LogKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LogKind::Out => "out",
            LogKind::Err => "err",
            LogKind::Download => "download",
            LogKind::Downloads => "downloads",
            LogKind::EngineOut => "engine-out",
            LogKind::EngineErr => "engine-err",
        }
    }
}

/// Progress of one layer (or other sub-item) being downloaded.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub current: Option<u64>,
    #[serde(default)]
    pub total: Option<u64>,
}

impl DownloadProgress {
    pub fn render(&self) -> String {
        match (self.current, self.total) {
            (Some(current), Some(total)) => {
                format!("{}: {} {}/{}", self.id, self.status, current, total)
            }
            _ => format!("{}: {}", self.id, self.status),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum LogMessage {
    Text(String),
    Download(DownloadProgress),
    /// Latest progress per sub-item id.
    Downloads(BTreeMap<String, DownloadProgress>),
}

impl LogMessage {
    pub fn render(&self) -> String {
        match self {
            LogMessage::Text(text) => text.clone(),
            LogMessage::Download(progress) => progress.render(),
            LogMessage::Downloads(set) => set
                .values()
                .map(DownloadProgress::render)
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub id: u64,
    pub kind: LogKind,
    pub message: LogMessage,
}
