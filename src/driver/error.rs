// ABOUTME: Errors crossing the driver boundary, on both the server and the client side.
// ABOUTME: Every variant maps to an HTTP status so 404s survive the round trip.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use thiserror::Error;

use super::api::ErrorBody;
use crate::runtime::{ContainerError, ImageError, LogError, VolumeError};

#[derive(Debug, Error)]
pub enum DriverError {
    /// Non-2xx answer from the driver, as seen by the client.
    #[error("driver returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("cannot reach driver: {0}")]
    Connect(String),

    #[error("driver transport error: {0}")]
    Transport(String),

    #[error("invalid driver payload: {0}")]
    Decode(String),

    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("driver must bind a loopback address, got {0}")]
    NonLoopback(SocketAddr),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Volume(#[from] VolumeError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DriverError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Status { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Self::InvalidId(_) | Self::Decode(_) => StatusCode::BAD_REQUEST,
            Self::Container(e) => match e {
                ContainerError::NotFound(_) | ContainerError::ImageNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                ContainerError::AlreadyExists(_)
                | ContainerError::AlreadyRunning(_)
                | ContainerError::NotRunning(_) => StatusCode::CONFLICT,
                ContainerError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
                ContainerError::Runtime(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Image(ImageError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Volume(VolumeError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Volume(VolumeError::InUse(_)) => StatusCode::CONFLICT,
            Self::Log(LogError::ContainerNotFound(_)) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The object the call addressed does not exist.
    pub fn is_not_found(&self) -> bool {
        self.status_code() == StatusCode::NOT_FOUND
    }

    /// The call conflicted with the object's current state.
    pub fn is_conflict(&self) -> bool {
        self.status_code() == StatusCode::CONFLICT
    }
}

impl IntoResponse for DriverError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(error = %self, "Driver call failed");
        }
        let body = ErrorBody {
            message: self.to_string(),
        };
        (status, axum::Json(body)).into_response()
    }
}
