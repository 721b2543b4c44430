//! # sporeline
//!
//! A small HTTP front end for a scripted worker. It serves a form and, on
//! submission, runs the worker once with the submitted values as
//! command-line arguments, streaming the worker's stdout back as the
//! response body.
//!
//! ```text
//! POST /rep ─▶ Submission ─▶ ArgumentVector ─▶ Bridge ─▶ WorkerInvoker
//!                                                 ▲            │
//!            response body ◀── stdout chunks ─────┴────────────┘
//! ```
//!
//! - [`Submission`] decodes form-encoded or JSON bodies. `shape` and
//!   `surface` accept a single value or a list.
//! - [`ArgumentVector`] flattens it into the worker's fixed argv layout.
//! - [`Bridge`] bounds concurrency and the worker's run time, relays stdout
//!   chunks as they arrive, logs stderr and maps failures to status codes.
//! - [`WorkerInvoker`] hides whether the worker is a child process
//!   ([`ProcessInvoker`]) or an async Rust function ([`InProcessInvoker`]).
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use clap::Parser;
//! use sporeline::{App, Config, Server, app};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), sporeline::Error> {
//!     let config = Config::parse();
//!     let router = app::router(App::from_config(&config));
//!
//!     Server::bind(config.addr)
//!         .body_limit(config.max_body_bytes)
//!         .serve(router)
//!         .await
//! }
//! ```

mod argv;
mod bridge;
mod config;
mod error;
mod handler;
mod method;
mod request;
mod response;
mod router;
mod server;
mod status;
mod submission;
mod worker;

pub mod app;
pub mod health;

pub use app::App;
pub use argv::ArgumentVector;
pub use bridge::Bridge;
pub use config::Config;
pub use error::{Error, RejectError, StreamAbort, WorkerError};
pub use handler::Handler;
pub use method::{Method, UnknownMethod};
pub use request::Request;
pub use response::{Chunk, ContentType, IntoResponse, Response, ResponseBuilder};
pub use router::Router;
pub use server::Server;
pub use status::Status;
pub use submission::{OneOrMany, Scalar, Submission, Validation};
pub use worker::{
    ExitStatus, InProcessInvoker, ProcessInvoker, WorkerEvent, WorkerInvoker, WorkerRun, WorkerSink,
};
