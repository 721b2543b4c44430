//! Error types.
//!
//! Per-request failures never escape as [`Error`]: they are expressed as
//! HTTP [`Response`](crate::Response) values through [`IntoResponse`]. The
//! types here only name what went wrong so the conversion stays in one place.

use crate::response::{IntoResponse, Response};
use crate::status::Status;
use crate::worker::ExitStatus;

/// Infrastructure failures: binding the listener, accepting connections.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// The worker could not be started.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("worker `{program}` did not expose a {stream} pipe")]
    MissingPipe { program: String, stream: &'static str },
}

impl IntoResponse for WorkerError {
    fn into_response(self) -> Response {
        Response::builder()
            .status(Status::InternalServerError)
            .text("worker could not be started\n")
    }
}

/// Why a streamed body was cut short after its status line went out.
///
/// Yielded as the body's error, so hyper aborts the connection instead of
/// terminating the body cleanly and the client can tell it got partial
/// output.
#[derive(Debug, thiserror::Error)]
pub enum StreamAbort {
    #[error("worker passed its deadline mid-stream")]
    Deadline,

    #[error("worker failed after streaming output: {0}")]
    Failed(ExitStatus),

    #[error("worker stopped without reporting an exit status")]
    Lost,
}

/// A submission the bridge refuses to forward.
#[derive(Debug, thiserror::Error)]
pub enum RejectError {
    #[error("unsupported content type `{0}`")]
    UnsupportedMediaType(String),

    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("could not read request body: {0}")]
    Body(String),

    #[error("malformed json body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("field `{field}` is required")]
    Missing { field: &'static str },

    #[error("field `{field}` must be an integer between 0 and 255, got `{value}`")]
    Channel { field: &'static str, value: String },
}

impl IntoResponse for RejectError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::UnsupportedMediaType(_) => Status::UnsupportedMediaType,
            Self::BodyTooLarge { .. } => Status::ContentTooLarge,
            _ => Status::BadRequest,
        };
        Response::builder().status(status).text(format!("{self}\n"))
    }
}
