//! `sporeline` binary.
//!
//! ```text
//! RUST_LOG=sporeline=debug sporeline --interpreter python3 --script ./process.py
//! ```

use clap::Parser;
use sporeline::{App, Config, Server, app};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), sporeline::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::parse();
    info!(
        interpreter = %config.interpreter,
        script = %config.script,
        max_workers = config.max_workers,
        worker_timeout_s = config.worker_timeout,
        "starting",
    );

    let router = app::router(App::from_config(&config));

    Server::bind(config.addr)
        .body_limit(config.max_body_bytes)
        .serve(router)
        .await
}
