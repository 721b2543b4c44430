//! Health-check handlers.
//!
//! | Probe | Path | Question |
//! |---|---|---|
//! | **Liveness** | `/healthz` | Is the process alive? Failure → restart. |
//! | **Readiness** | `/readyz` | Is there a free worker slot? Failure → pulled from load-balancer. |

use std::sync::Arc;

use crate::app::App;
use crate::request::Request;
use crate::response::Response;
use crate::status::Status;

/// Always `200 OK` with body `"ok"`.
pub async fn liveness(_app: Arc<App>, _req: Request) -> Response {
    Response::text("ok")
}

/// `200 OK` while at least one worker slot is free, `503` otherwise.
pub async fn readiness(app: Arc<App>, _req: Request) -> Response {
    if app.bridge.available() > 0 {
        Response::text("ready")
    } else {
        Response::builder()
            .status(Status::ServiceUnavailable)
            .text(format!("all {} worker slots busy\n", app.bridge.capacity()))
    }
}
