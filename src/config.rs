//! Startup configuration.
//!
//! Every knob is a CLI flag with an environment-variable fallback, so the
//! same binary runs unchanged locally and in a container. The parsed
//! [`Config`] is passed explicitly to [`app::router`](crate::app::router)
//! and [`Server::bind`](crate::Server::bind).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Serve a form and forward its submissions to a scripted worker.
#[derive(Parser, Debug, Clone)]
#[command(name = "sporeline", version, about)]
pub struct Config {
    /// Socket address to listen on.
    #[arg(long, env = "SPORELINE_ADDR", default_value = "0.0.0.0:8000")]
    pub addr: SocketAddr,

    /// Program that runs the worker script.
    #[arg(long, env = "SPORELINE_INTERPRETER", default_value = "python")]
    pub interpreter: String,

    /// Worker script, passed as the first argument to the interpreter.
    #[arg(long, env = "SPORELINE_SCRIPT", default_value = "../process.py")]
    pub script: String,

    /// HTML page served on `GET /form`.
    #[arg(long, env = "SPORELINE_FORM_PAGE", default_value = "./static/form.html")]
    pub form_page: PathBuf,

    /// Seconds a worker may run before it is killed.
    #[arg(long, env = "SPORELINE_WORKER_TIMEOUT", default_value_t = 30)]
    pub worker_timeout: u64,

    /// Workers allowed to run at the same time. Further submissions get 503.
    #[arg(long, env = "SPORELINE_MAX_WORKERS", default_value_t = 8,
          value_parser = clap::value_parser!(u32).range(1..))]
    pub max_workers: u32,

    /// Largest accepted request body.
    #[arg(long, env = "SPORELINE_MAX_BODY_BYTES", default_value_t = 64 * 1024)]
    pub max_body_bytes: usize,

    /// Reject submissions that omit any of red, green or blue.
    #[arg(long, env = "SPORELINE_REQUIRE_RGB")]
    pub require_rgb: bool,
}

impl Config {
    pub fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_timeout)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_from(["sporeline"])
    }
}
