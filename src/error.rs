// ABOUTME: Application-wide error taxonomy for the container service.
// ABOUTME: Maps every failure to a stable code, public/private messages and an HTTP class.

use hyper::StatusCode;
use thiserror::Error;

use crate::driver::DriverError;
use crate::events::BusError;
use crate::model::ContainerStatus;
use crate::runtime::RuntimeError;
use crate::template::TemplateError;
use crate::types::ContainerId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("container not found: {0}")]
    ContainerNotFound(ContainerId),

    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("{kind} not found: {id}")]
    ResourceNotFound { kind: &'static str, id: String },

    #[error("container already running: {0}")]
    AlreadyRunning(ContainerId),

    #[error("container not running: {0}")]
    NotRunning(ContainerId),

    #[error("container still running: {0}")]
    StillRunning(ContainerId),

    #[error("timed out waiting for container {id} to become {status}")]
    Timeout {
        id: ContainerId,
        status: ContainerStatus,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("runtime driver call failed: {0}")]
    Upstream(#[from] DriverError),

    #[error("container {id} failed to start")]
    StartFailed { id: ContainerId },

    #[error("failed to clone {repository}: {message}")]
    SourceClone { repository: String, message: String },

    #[error("container runtime unavailable: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    #[error("event dispatch failed: {0}")]
    Bus(#[from] BusError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    /// Lifecycle precondition violated (already/not/still running).
    Conflict,
    Timeout,
    Validation,
    Upstream,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ContainerNotFound(_)
            | Error::TemplateNotFound(_)
            | Error::ResourceNotFound { .. } => ErrorKind::NotFound,
            Error::AlreadyRunning(_) | Error::NotRunning(_) | Error::StillRunning(_) => {
                ErrorKind::Conflict
            }
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Template(TemplateError::UnsupportedVersion { .. })
            | Error::Template(TemplateError::Parse { .. }) => ErrorKind::Validation,
            Error::Upstream(_)
            | Error::Runtime(_)
            | Error::StartFailed { .. }
            | Error::SourceClone { .. } => ErrorKind::Upstream,
            Error::Template(_)
            | Error::Bus(_)
            | Error::InvalidConfig(_)
            | Error::Io(_)
            | Error::Yaml(_)
            | Error::Json(_) => ErrorKind::Internal,
        }
    }

    /// Stable identifier for clients.
    pub fn code(&self) -> &'static str {
        match self {
            Error::ContainerNotFound(_) => "container_not_found",
            Error::TemplateNotFound(_) => "template_not_found",
            Error::ResourceNotFound { .. } => "resource_not_found",
            Error::AlreadyRunning(_) => "container_already_running",
            Error::NotRunning(_) => "container_not_running",
            Error::StillRunning(_) => "container_still_running",
            Error::Timeout { .. } => "container_wait_timeout",
            Error::Validation(_) => "validation_failed",
            Error::Upstream(_) => "runtime_call_failed",
            Error::StartFailed { .. } => "container_start_failed",
            Error::SourceClone { .. } => "source_clone_failed",
            Error::Runtime(_) => "runtime_unavailable",
            Error::Template(_) => "template_invalid",
            Error::Bus(_) => "event_dispatch_failed",
            Error::InvalidConfig(_) => "config_invalid",
            Error::Io(_) => "io_failed",
            Error::Yaml(_) | Error::Json(_) => "serialization_failed",
        }
    }

    /// Message that is safe to show to end users.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::NotFound | ErrorKind::Conflict | ErrorKind::Validation => self.to_string(),
            ErrorKind::Timeout => "The container did not reach the expected state in time.".into(),
            ErrorKind::Upstream => "The container runtime reported a failure.".into(),
            ErrorKind::Internal => "An internal error occurred.".into(),
        }
    }

    /// Full diagnostic message, including upstream details.
    pub fn private_message(&self) -> String {
        let mut message = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            message.push_str(": ");
            message.push_str(&err.to_string());
            source = err.source();
        }
        message
    }

    pub fn status(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Upstream | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
