// ABOUTME: Scripted Runner for exercising the container service without a driver.
// ABOUTME: Each start follows a chosen script; every call is recorded for assertions.

use async_trait::async_trait;
use bytes::Bytes;
use hearth::driver::ByteStream;
use hearth::error::{Error, Result};
use hearth::model::{ContainerStatus, ContainerUpdate};
use hearth::runner::{ImageSource, RunOutput, Runner, StartRequest, StatusSetter};
use hearth::types::ContainerId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::time::Duration;

/// What a start does after the service marks the container building.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartScript {
    /// Starting, then running.
    Run,
    /// Straight to error, as when the image cannot be obtained.
    Fail,
    /// Never reports again.
    Hang,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopScript {
    Ok,
    Fail,
    Hang,
}

struct State {
    start: StartScript,
    stop: StopScript,
    stdout: Vec<String>,
    updates: HashMap<ContainerId, ContainerUpdate>,
    calls: Vec<String>,
    requests: Vec<StartRequest>,
    setters: HashMap<ContainerId, StatusSetter>,
}

pub struct ScriptedRunner {
    state: Mutex<State>,
}

impl Default for ScriptedRunner {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                start: StartScript::Run,
                stop: StopScript::Ok,
                stdout: Vec::new(),
                updates: HashMap::new(),
                calls: Vec::new(),
                requests: Vec::new(),
                setters: HashMap::new(),
            }),
        }
    }
}

fn stream(lines: Vec<String>) -> ByteStream {
    Box::pin(futures::stream::iter(
        lines
            .into_iter()
            .map(|l| Ok::<_, io::Error>(Bytes::from(format!("{l}\n")))),
    ))
}

impl ScriptedRunner {
    pub fn set_start(&self, script: StartScript) {
        self.state.lock().start = script;
    }

    pub fn set_stop(&self, script: StopScript) {
        self.state.lock().stop = script;
    }

    /// Lines every following start prints on stdout.
    pub fn set_stdout(&self, lines: &[&str]) {
        self.state.lock().stdout = lines.iter().map(|l| l.to_string()).collect();
    }

    pub fn set_update(&self, id: &ContainerId, update: ContainerUpdate) {
        self.state.lock().updates.insert(id.clone(), update);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn requests(&self) -> Vec<StartRequest> {
        self.state.lock().requests.clone()
    }

    /// Status callback handed over by the most recent start of `id`.
    pub fn last_setter(&self, id: &ContainerId) -> Option<StatusSetter> {
        self.state.lock().setters.get(id).cloned()
    }

    /// Report a status as the most recent run of `id` would.
    pub fn report(&self, id: &ContainerId, status: ContainerStatus) {
        if let Some(setter) = self.last_setter(id) {
            setter(status);
        }
    }

    fn record(&self, call: String) {
        self.state.lock().calls.push(call);
    }
}

#[async_trait]
impl Runner for ScriptedRunner {
    async fn start(&self, request: StartRequest, set_status: StatusSetter) -> Result<RunOutput> {
        let id = request.container.id.clone();
        self.record(format!("start {id}"));
        let (script, stdout) = {
            let mut state = self.state.lock();
            state.requests.push(request);
            state.setters.insert(id, set_status.clone());
            (state.start, state.stdout.clone())
        };
        tokio::spawn(async move {
            match script {
                StartScript::Run => {
                    set_status(ContainerStatus::Starting);
                    set_status(ContainerStatus::Running);
                }
                StartScript::Fail => set_status(ContainerStatus::Error),
                StartScript::Hang => {}
            }
        });
        Ok(RunOutput {
            stdout: stream(stdout),
            stderr: stream(Vec::new()),
        })
    }

    async fn stop(&self, id: &ContainerId) -> Result<()> {
        self.record(format!("stop {id}"));
        let script = self.state.lock().stop;
        match script {
            StopScript::Ok => Ok(()),
            StopScript::Fail => Err(Error::Validation("runtime refused to stop".into())),
            StopScript::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }
    }

    async fn delete_container(&self, id: &ContainerId) -> Result<()> {
        self.record(format!("delete_container {id}"));
        Ok(())
    }

    async fn delete_mounts(&self, id: &ContainerId) -> Result<()> {
        self.record(format!("delete_mounts {id}"));
        Ok(())
    }

    async fn prepare_source(&self, id: &ContainerId, repository: &str) -> Result<()> {
        self.record(format!("prepare_source {id} {repository}"));
        Ok(())
    }

    async fn check_for_updates(
        &self,
        id: &ContainerId,
        _image: &ImageSource,
    ) -> Result<Option<ContainerUpdate>> {
        Ok(self.state.lock().updates.get(id).cloned())
    }
}
