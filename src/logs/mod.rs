// ABOUTME: Per-container log aggregator: bounded ring buffer plus a rotating day file.
// ABOUTME: Folds consecutive download progress into one line; failures only warn.

mod file;

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;

use crate::events::{Event, Listener, ListenerResult};
use crate::model::{DownloadProgress, LogKind, LogLine, LogMessage};
use crate::types::ContainerId;
use file::LogFile;

/// Directory holding a container's day files, relative to the data root.
pub fn log_dir(data_dir: &Path, id: &ContainerId) -> PathBuf {
    data_dir.join(id.as_str()).join(".meta").join("logs")
}

struct ContainerLogs {
    buffer: VecDeque<LogLine>,
    next_id: u64,
    file: Option<LogFile>,
    rotation: Option<JoinHandle<()>>,
}

impl ContainerLogs {
    fn append(&mut self, id: &ContainerId, line: LogLine, capacity: usize) {
        if let Some(file) = self.file.as_mut()
            && let Err(e) = file.write_line(&line)
        {
            tracing::warn!(container = %id, error = %e, "Failed to write log line");
        }
        self.buffer.push_back(line);
        while self.buffer.len() > capacity {
            self.buffer.pop_front();
        }
    }

    fn push(
        &mut self,
        id: &ContainerId,
        kind: LogKind,
        message: LogMessage,
        capacity: usize,
    ) -> LogLine {
        let line = LogLine {
            id: self.next_id,
            kind,
            message,
        };
        self.next_id += 1;
        self.append(id, line.clone(), capacity);
        line
    }

    /// Merge `progress` into the last line if it is download progress.
    fn fold(&mut self, id: &ContainerId, progress: DownloadProgress, capacity: usize) -> LogLine {
        let previous = match self.buffer.back().map(|l| l.kind) {
            Some(LogKind::Download | LogKind::Downloads) => self.buffer.pop_back(),
            _ => None,
        };
        let Some(previous) = previous else {
            return self.push(id, LogKind::Download, LogMessage::Download(progress), capacity);
        };

        let mut set = match previous.message {
            LogMessage::Downloads(set) => set,
            LogMessage::Download(single) => BTreeMap::from([(single.id.clone(), single)]),
            LogMessage::Text(_) => BTreeMap::new(),
        };
        set.insert(progress.id.clone(), progress);

        let line = LogLine {
            id: previous.id,
            kind: LogKind::Downloads,
            message: LogMessage::Downloads(set),
        };
        self.append(id, line.clone(), capacity);
        line
    }
}

impl Drop for ContainerLogs {
    fn drop(&mut self) {
        if let Some(task) = self.rotation.take() {
            task.abort();
        }
    }
}

/// In-memory tail and on-disk history of every registered container's output.
pub struct LogAggregator {
    data_dir: PathBuf,
    capacity: usize,
    containers: RwLock<HashMap<ContainerId, Arc<Mutex<ContainerLogs>>>>,
}

impl std::fmt::Debug for LogAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogAggregator")
            .field("data_dir", &self.data_dir)
            .field("capacity", &self.capacity)
            .field("containers", &self.containers.read().len())
            .finish()
    }
}

impl LogAggregator {
    pub fn new(data_dir: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            data_dir: data_dir.into(),
            capacity: capacity.max(1),
            containers: RwLock::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Start collecting logs for `id`.
    ///
    /// The in-memory buffer is always created; an error means only that the
    /// day file could not be opened and lines will not reach disk.
    pub fn register(&self, id: &ContainerId) -> io::Result<()> {
        let opened = LogFile::open(&log_dir(&self.data_dir, id));
        let entry = Arc::new(Mutex::new(ContainerLogs {
            buffer: VecDeque::with_capacity(self.capacity),
            next_id: 0,
            file: None,
            rotation: None,
        }));

        let result = match opened {
            Ok(file) => {
                let mut logs = entry.lock();
                logs.file = Some(file);
                logs.rotation = schedule_rotation(id.clone(), Arc::downgrade(&entry));
                Ok(())
            }
            Err(e) => Err(e),
        };

        self.containers.write().insert(id.clone(), entry);
        tracing::debug!(container = %id, "Registered container logs");
        result
    }

    /// Stop collecting logs for `id`, closing its file and rotation task.
    pub fn unregister(&self, id: &ContainerId) {
        if self.containers.write().remove(id).is_some() {
            tracing::debug!(container = %id, "Unregistered container logs");
        }
    }

    pub fn is_registered(&self, id: &ContainerId) -> bool {
        self.containers.read().contains_key(id)
    }

    fn entry(&self, id: &ContainerId) -> Option<Arc<Mutex<ContainerLogs>>> {
        self.containers.read().get(id).cloned()
    }

    /// Append a line. Returns `None` when `id` is not registered.
    pub fn push(&self, id: &ContainerId, kind: LogKind, message: LogMessage) -> Option<LogLine> {
        let entry = self.entry(id)?;
        let line = entry.lock().push(id, kind, message, self.capacity);
        Some(line)
    }

    /// Remove and return the most recent line.
    pub fn pop(&self, id: &ContainerId) -> Option<LogLine> {
        self.entry(id)?.lock().buffer.pop_back()
    }

    /// Snapshot of the buffer, oldest first.
    pub fn load_buffer(&self, id: &ContainerId) -> Vec<LogLine> {
        self.entry(id)
            .map(|entry| entry.lock().buffer.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Record a log event, folding download progress into the previous line.
    pub fn record(&self, id: &ContainerId, kind: LogKind, message: LogMessage) -> Option<LogLine> {
        let entry = self.entry(id)?;
        let mut logs = entry.lock();
        let line = match (kind, message) {
            (LogKind::Download, LogMessage::Download(progress)) => {
                logs.fold(id, progress, self.capacity)
            }
            (kind, message) => logs.push(id, kind, message, self.capacity),
        };
        Some(line)
    }

    /// Path of the file currently receiving lines for `id`.
    pub fn current_file(&self, id: &ContainerId) -> Option<PathBuf> {
        self.entry(id)?.lock().file.as_ref().map(LogFile::path)
    }
}

impl Listener for LogAggregator {
    fn on_event(&self, event: &Event) -> ListenerResult {
        if let Event::ContainerLog { id, kind, message } = event
            && self.record(id, *kind, message.clone()).is_none()
        {
            tracing::trace!(container = %id, "Dropping log line for unregistered container");
        }
        Ok(())
    }

    fn accepts(&self, event: &Event) -> bool {
        matches!(event, Event::ContainerLog { .. })
    }

    fn name(&self) -> &str {
        "log-aggregator"
    }
}

/// Reopen the day file at every local midnight while the entry is alive.
fn schedule_rotation(
    id: ContainerId,
    entry: Weak<Mutex<ContainerLogs>>,
) -> Option<JoinHandle<()>> {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        tracing::debug!(container = %id, "No async runtime, rotating on write only");
        return None;
    };
    Some(handle.spawn(async move {
        loop {
            tokio::time::sleep(file::until_midnight(chrono::Local::now())).await;
            let Some(entry) = entry.upgrade() else {
                return;
            };
            let today = chrono::Local::now().date_naive();
            let mut logs = entry.lock();
            if let Some(file) = logs.file.as_mut()
                && let Err(e) = file.rotate_to(today)
            {
                tracing::warn!(container = %id, error = %e, "Failed to rotate log file");
            }
        }
    }))
}
