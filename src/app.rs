//! The service's routes and the state they share.
//!
//! | Route | Handler |
//! |---|---|
//! | `GET /form` | [`form`]: the HTML page that posts to `/rep` |
//! | `POST /rep` | [`submit`]: decode → validate → build argv → run worker |
//! | `GET /healthz` | [`health::liveness`] |
//! | `GET /readyz` | [`health::readiness`] |

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error};

use crate::argv::ArgumentVector;
use crate::bridge::Bridge;
use crate::config::Config;
use crate::health;
use crate::method::Method;
use crate::request::Request;
use crate::response::{IntoResponse, Response};
use crate::router::Router;
use crate::status::Status;
use crate::submission::{Submission, Validation};

/// Shared, read-only per-process state.
pub struct App {
    pub bridge: Bridge,
    /// Invocation target placed first in every argument vector.
    pub script: String,
    pub form_page: PathBuf,
    pub validation: Validation,
}

impl App {
    /// State for a real deployment: workers are child processes.
    pub fn from_config(config: &Config) -> Self {
        Self::with_bridge(config, Bridge::from_config(config))
    }

    /// State with a caller-supplied bridge, e.g. one backed by an
    /// [`InProcessInvoker`](crate::InProcessInvoker).
    pub fn with_bridge(config: &Config, bridge: Bridge) -> Self {
        Self {
            bridge,
            script: config.script.clone(),
            form_page: config.form_page.clone(),
            validation: Validation { require_rgb: config.require_rgb },
        }
    }
}

/// All routes over `app`.
pub fn router(app: App) -> Router<App> {
    Router::new(app)
        .on(Method::Get,  "/form",    form)
        .on(Method::Post, "/rep",     submit)
        .on(Method::Get,  "/healthz", health::liveness)
        .on(Method::Get,  "/readyz",  health::readiness)
}

/// `GET /form`: the page is re-read on every request so it can be edited
/// without a restart.
pub async fn form(app: Arc<App>, _req: Request) -> Response {
    match tokio::fs::read(&app.form_page).await {
        Ok(html) => Response::html(html),
        Err(e) => {
            error!(path = %app.form_page.display(), "cannot read form page: {e}");
            Response::status(Status::InternalServerError)
        }
    }
}

/// `POST /rep`
pub async fn submit(app: Arc<App>, req: Request) -> Response {
    let sub = match Submission::from_request(&req) {
        Ok(sub) => sub,
        Err(e) => {
            debug!("rejecting submission: {e}");
            return e.into_response();
        }
    };
    if let Err(e) = sub.validate(&app.validation) {
        debug!("rejecting submission: {e}");
        return e.into_response();
    }

    let argv = ArgumentVector::build(&app.script, &sub);
    app.bridge.execute(argv).await
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use super::*;
    use crate::worker::InProcessInvoker;

    fn echo_app(form_page: PathBuf) -> App {
        let config = Config { form_page, ..Config::default() };
        let bridge = Bridge::new(
            InProcessInvoker::new(|args, out| async move {
                out.stdout(args[1..].join(" ")).await;
                0
            }),
            2,
            Duration::from_secs(5),
        );
        App::with_bridge(&config, bridge)
    }

    fn post(content_type: &str, body: &'static str) -> Request {
        Request::new(Method::Post, "/rep", vec![("content-type".into(), content_type.into())], body)
    }

    #[tokio::test]
    async fn submit_streams_worker_output() {
        let router = router(echo_app(PathBuf::from("unused.html")));
        let res = router
            .handle(post(
                "application/x-www-form-urlencoded",
                "red=10&green=20&blue=30&shape=circle&surface=matte&model=A",
            ))
            .await;

        assert_eq!(res.status_code(), Status::Ok);
        assert_eq!(res.header("content-type"), Some("text/plain; charset=utf-8"));
        assert_eq!(
            res.into_bytes().await,
            "process rgb 10 20 30 shape circle surface matte model A",
        );
    }

    #[tokio::test]
    async fn json_lists_are_flattened() {
        let router = router(echo_app(PathBuf::from("unused.html")));
        let res = router
            .handle(post(
                "application/json",
                r#"{"shape":["circle","square"],"surface":["matte"],"model":"B"}"#,
            ))
            .await;

        assert_eq!(res.into_bytes().await, "process rgb    shape circle square surface matte model B");
    }

    #[tokio::test]
    async fn bad_channel_is_a_400() {
        let router = router(echo_app(PathBuf::from("unused.html")));
        let res = router.handle(post("application/json", r#"{"red":"crimson"}"#)).await;
        assert_eq!(res.status_code(), Status::BadRequest);
    }

    #[tokio::test]
    async fn unknown_media_type_is_a_415() {
        let router = router(echo_app(PathBuf::from("unused.html")));
        let res = router.handle(post("text/csv", "a,b")).await;
        assert_eq!(res.status_code(), Status::UnsupportedMediaType);
    }

    #[tokio::test]
    async fn form_page_is_served_from_disk() {
        let mut page = tempfile::NamedTempFile::new().unwrap();
        write!(page, "<form action=\"/rep\"></form>").unwrap();

        let router = router(echo_app(page.path().to_path_buf()));
        let res = router.handle(Request::new(Method::Get, "/form", Vec::new(), "")).await;

        assert_eq!(res.header("content-type"), Some("text/html; charset=utf-8"));
        assert_eq!(res.into_bytes().await, "<form action=\"/rep\"></form>");
    }

    #[tokio::test]
    async fn missing_form_page_is_a_500() {
        let router = router(echo_app(PathBuf::from("/no/such/form.html")));
        let res = router.handle(Request::new(Method::Get, "/form", Vec::new(), "")).await;
        assert_eq!(res.status_code(), Status::InternalServerError);
    }
}
