// ABOUTME: Bus listener that starts and stops launch-on-startup containers with the server.
// ABOUTME: Work runs on spawned tasks so dispatch never blocks on container operations.

use parking_lot::Mutex;
use std::sync::Weak;
use tokio::task::JoinHandle;

use super::{ContainerService, Inner};
use crate::events::{Event, Listener, ListenerResult};

pub struct LifecycleListener {
    service: Weak<Inner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for LifecycleListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleListener")
            .field("pending", &self.tasks.lock().len())
            .finish()
    }
}

impl LifecycleListener {
    pub(super) fn new(service: &ContainerService) -> Self {
        Self {
            service: service.downgrade(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Wait for every start-all or stop-all this listener has spawned.
    pub async fn join(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Lifecycle task panicked");
            }
        }
    }
}

impl Listener for LifecycleListener {
    fn on_event(&self, event: &Event) -> ListenerResult {
        let Some(inner) = self.service.upgrade() else {
            return Ok(());
        };
        let service = ContainerService::from_inner(inner);
        let handle = tokio::runtime::Handle::try_current()?;
        let task = match event {
            Event::ServerStart => handle.spawn(async move {
                let failed = service.start_all().await;
                tracing::info!(failed = failed.len(), "Startup containers launched");
            }),
            Event::ServerStop => handle.spawn(async move {
                let failed = service.stop_all().await;
                tracing::info!(failed = failed.len(), "Startup containers stopped");
            }),
            _ => return Ok(()),
        };
        self.tasks.lock().push(task);
        Ok(())
    }

    fn accepts(&self, event: &Event) -> bool {
        matches!(event, Event::ServerStart | Event::ServerStop)
    }

    fn name(&self) -> &str {
        "container-lifecycle"
    }
}
