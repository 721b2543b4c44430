//! The process bridge: one worker per submission, its stdout relayed as the
//! response body.
//!
//! # Response policy
//!
//! Exactly one response is produced per call to [`Bridge::execute`]:
//!
//! | Situation | Response |
//! |---|---|
//! | every worker slot busy | `503`, no worker started |
//! | worker fails to start | `500` |
//! | first stdout chunk arrives | `200 text/plain`, body streamed chunk by chunk |
//! | exit 0 with no stdout | `200`, empty body |
//! | non-zero exit or signal with no stdout | `502` |
//! | deadline passes with no stdout | `504`, worker killed |
//!
//! Once the first chunk has been sent the status line is committed. A later
//! failure (non-zero exit, deadline) is logged and the body ends with a
//! [`StreamAbort`], so the connection is cut without a final chunk and the
//! client sees truncated output rather than a clean end. Stderr is only ever
//! logged.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::time::{Instant, timeout_at};
use tracing::{Instrument, debug, error, info, warn};

use crate::argv::ArgumentVector;
use crate::config::Config;
use crate::error::{StreamAbort, WorkerError};
use crate::response::{Chunk, ContentType, IntoResponse as _, Response};
use crate::status::Status;
use crate::worker::{ExitStatus, ProcessInvoker, WorkerEvent, WorkerInvoker, WorkerRun};

/// Chunks buffered between the worker and a slow client.
const BODY_BUFFER: usize = 16;

/// Mediates between one HTTP request and one worker.
pub struct Bridge {
    invoker: Arc<dyn WorkerInvoker>,
    slots: Arc<Semaphore>,
    capacity: usize,
    timeout: Duration,
}

impl Bridge {
    pub fn new(invoker: impl WorkerInvoker + 'static, max_workers: usize, timeout: Duration) -> Self {
        Self {
            invoker: Arc::new(invoker),
            slots: Arc::new(Semaphore::new(max_workers)),
            capacity: max_workers,
            timeout,
        }
    }

    /// A bridge that runs `<interpreter> <script> ...` child processes.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            ProcessInvoker::new(&config.interpreter),
            config.max_workers as usize,
            config.worker_timeout(),
        )
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Worker slots currently free.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Runs one worker for `argv` and returns the response for its caller.
    pub async fn execute(&self, argv: ArgumentVector) -> Response {
        let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
            warn!(capacity = self.capacity, "all worker slots busy, rejecting submission");
            return Response::builder()
                .status(Status::ServiceUnavailable)
                .text("all workers are busy, retry later\n");
        };

        let deadline = Instant::now() + self.timeout;

        let mut run = match self.invoker.invoke(&argv) {
            Ok(run) => run,
            Err(e) => return spawn_failed(e),
        };
        debug!(pid = run.pid(), args = ?argv.as_slice(), "worker started");

        let first = loop {
            let event = match timeout_at(deadline, run.next()).await {
                Ok(event) => event,
                Err(_) => {
                    warn!(pid = run.pid(), timeout = ?self.timeout, "worker produced no output before the deadline, killing it");
                    return Response::builder()
                        .status(Status::GatewayTimeout)
                        .text("worker timed out\n");
                }
            };
            match event {
                Some(WorkerEvent::Stdout(chunk)) => break chunk,
                Some(WorkerEvent::Stderr(chunk)) => log_stderr(&chunk),
                Some(WorkerEvent::Exit(status)) => return finished_silently(status),
                None => {
                    error!("worker stopped without reporting an exit status");
                    return Response::builder()
                        .status(Status::BadGateway)
                        .text("worker stopped unexpectedly\n");
                }
            }
        };

        log_stdout(&first);
        let (tx, rx) = mpsc::channel(BODY_BUFFER);
        // The channel is fresh, so this cannot be full.
        let _ = tx.try_send(Ok(first));
        tokio::spawn(pump(run, tx, deadline, permit).in_current_span());

        Response::builder().stream(ContentType::Text, rx)
    }
}

fn spawn_failed(e: WorkerError) -> Response {
    error!("worker could not be started: {e}");
    e.into_response()
}

fn finished_silently(status: ExitStatus) -> Response {
    if status.success() {
        info!(%status, "worker exited without output");
        return Response::text("");
    }
    warn!(%status, "worker failed before producing output");
    Response::builder()
        .status(Status::BadGateway)
        .text(format!("worker failed: {status}\n"))
}

/// Forwards the rest of the worker's stdout into the response body. Holds the
/// worker slot until the worker is gone; returning drops `run`, which stops
/// the worker if it is still running.
async fn pump(
    mut run: WorkerRun,
    body: mpsc::Sender<Chunk>,
    deadline: Instant,
    _slot: OwnedSemaphorePermit,
) {
    let Some(abort) = forward(&mut run, &body, deadline).await else {
        return;
    };
    drop(run);

    // A slow client may still have the channel full. The error has to
    // follow the data already queued, so hand it to a task that waits for
    // room without holding the worker slot.
    match body.try_send(Err(abort)) {
        Ok(()) | Err(TrySendError::Closed(_)) => {}
        Err(TrySendError::Full(last)) => {
            tokio::spawn(async move {
                let _ = body.send(last).await;
            });
        }
    }
}

/// Relays events until the run ends. Returns the reason to fail the body,
/// or `None` when it should end normally or nobody is reading it.
async fn forward(
    run: &mut WorkerRun,
    body: &mpsc::Sender<Chunk>,
    deadline: Instant,
) -> Option<StreamAbort> {
    loop {
        let event = tokio::select! {
            () = body.closed() => {
                warn!(pid = run.pid(), "client went away, stopping worker");
                return None;
            }
            event = timeout_at(deadline, run.next()) => event,
        };

        match event {
            Err(_) => {
                warn!(pid = run.pid(), "worker hit the deadline mid-stream, truncating response");
                return Some(StreamAbort::Deadline);
            }
            Ok(None) => {
                error!("worker stopped without reporting an exit status");
                return Some(StreamAbort::Lost);
            }
            Ok(Some(WorkerEvent::Stdout(chunk))) => {
                log_stdout(&chunk);
                match timeout_at(deadline, body.send(Ok(chunk))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => {
                        warn!(pid = run.pid(), "client went away, stopping worker");
                        return None;
                    }
                    Err(_) => {
                        warn!(pid = run.pid(), "client too slow to drain output before the deadline");
                        return Some(StreamAbort::Deadline);
                    }
                }
            }
            Ok(Some(WorkerEvent::Stderr(chunk))) => log_stderr(&chunk),
            Ok(Some(WorkerEvent::Exit(status))) => {
                if status.success() {
                    info!(%status, "worker exited");
                    return None;
                }
                warn!(%status, "worker failed after its output was streamed");
                return Some(StreamAbort::Failed(status));
            }
        }
    }
}

fn log_stdout(chunk: &[u8]) {
    info!(bytes = chunk.len(), output = %String::from_utf8_lossy(chunk).trim_end(), "worker stdout");
}

fn log_stderr(chunk: &[u8]) {
    warn!(output = %String::from_utf8_lossy(chunk).trim_end(), "worker stderr");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submission::Submission;
    use crate::worker::InProcessInvoker;

    const LONG: Duration = Duration::from_secs(3600);

    fn argv() -> ArgumentVector {
        ArgumentVector::build("worker.py", &Submission::default())
    }

    fn bridge<F, Fut>(max_workers: usize, timeout: Duration, work: F) -> Bridge
    where
        F: Fn(Vec<String>, crate::worker::WorkerSink) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = i32> + Send + 'static,
    {
        Bridge::new(InProcessInvoker::new(work), max_workers, timeout)
    }

    async fn wait_for_free_slots(bridge: &Bridge, n: usize) {
        for _ in 0..200 {
            if bridge.available() == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("worker slot was never released");
    }

    #[tokio::test]
    async fn every_stdout_chunk_reaches_the_body() {
        let bridge = bridge(2, LONG, |_, out| async move {
            out.stdout("first ").await;
            tokio::time::sleep(Duration::from_millis(10)).await;
            out.stdout("second").await;
            0
        });

        let res = bridge.execute(argv()).await;
        assert_eq!(res.status_code(), Status::Ok);
        assert!(res.is_streaming());
        assert_eq!(res.into_bytes().await, "first second");
        wait_for_free_slots(&bridge, 2).await;
    }

    #[tokio::test]
    async fn stderr_is_never_sent_to_the_caller() {
        let bridge = bridge(1, LONG, |_, out| async move {
            out.stderr("Traceback ...").await;
            out.stdout("A").await;
            out.stderr("more noise").await;
            0
        });

        let res = bridge.execute(argv()).await;
        assert_eq!(res.into_bytes().await, "A");
    }

    #[tokio::test]
    async fn worker_receives_the_argument_vector() {
        let bridge = bridge(1, LONG, |args, out| async move {
            out.stdout(args.join(",")).await;
            0
        });

        let res = bridge.execute(argv()).await;
        assert_eq!(res.into_bytes().await, "worker.py,process,rgb,,,,shape,surface,model,");
    }

    #[tokio::test]
    async fn spawn_failure_is_a_500() {
        let bridge = Bridge::new(ProcessInvoker::new("/no/such/interpreter"), 1, LONG);
        let res = bridge.execute(argv()).await;
        assert_eq!(res.status_code(), Status::InternalServerError);
        assert_eq!(bridge.available(), 1);
    }

    #[tokio::test]
    async fn silent_failure_is_a_502() {
        let bridge = bridge(1, LONG, |_, out| async move {
            out.stderr("boom").await;
            2
        });

        let res = bridge.execute(argv()).await;
        assert_eq!(res.status_code(), Status::BadGateway);
        assert_eq!(res.into_bytes().await, "worker failed: exit code 2\n");
    }

    #[tokio::test]
    async fn silent_success_is_an_empty_200() {
        let bridge = bridge(1, LONG, |_, _| async { 0 });
        let res = bridge.execute(argv()).await;
        assert_eq!(res.status_code(), Status::Ok);
        assert!(!res.is_streaming());
        assert!(res.into_bytes().await.is_empty());
    }

    #[tokio::test]
    async fn hung_worker_is_a_504() {
        let bridge = bridge(1, Duration::from_millis(50), |_, _| async {
            tokio::time::sleep(LONG).await;
            0
        });

        let res = bridge.execute(argv()).await;
        assert_eq!(res.status_code(), Status::GatewayTimeout);
        assert_eq!(bridge.available(), 1);
    }

    #[tokio::test]
    async fn deadline_truncates_a_started_stream() {
        let bridge = bridge(1, Duration::from_millis(100), |_, out| async move {
            out.stdout("partial").await;
            tokio::time::sleep(LONG).await;
            out.stdout("never").await;
            0
        });

        let res = bridge.execute(argv()).await;
        assert_eq!(res.status_code(), Status::Ok);
        let (data, abort) = res.drain().await;
        assert_eq!(data, "partial");
        assert!(matches!(abort, Some(StreamAbort::Deadline)));
        wait_for_free_slots(&bridge, 1).await;
    }

    #[tokio::test]
    async fn failure_after_output_fails_the_body() {
        let bridge = bridge(1, LONG, |_, out| async move {
            out.stdout("half a result").await;
            1
        });

        let (data, abort) = bridge.execute(argv()).await.drain().await;
        assert_eq!(data, "half a result");
        assert!(matches!(abort, Some(StreamAbort::Failed(status)) if status.code() == Some(1)));
    }

    #[tokio::test]
    async fn clean_exit_ends_the_body_without_error() {
        let bridge = bridge(1, LONG, |_, out| async move {
            out.stdout("all of it").await;
            0
        });

        let (data, abort) = bridge.execute(argv()).await.drain().await;
        assert_eq!(data, "all of it");
        assert!(abort.is_none());
    }

    #[tokio::test]
    async fn first_chunk_arrives_while_the_worker_is_still_running() {
        use http_body_util::BodyExt;

        let (release, released) = tokio::sync::oneshot::channel::<()>();
        let released = std::sync::Mutex::new(Some(released));
        let bridge = bridge(1, LONG, move |_, out| {
            let released = released.lock().unwrap().take();
            async move {
                out.stdout("first").await;
                if let Some(released) = released {
                    let _ = released.await;
                }
                out.stdout("second").await;
                0
            }
        });

        let res = bridge.execute(argv()).await;
        let mut body = res.into_inner().into_body();

        let frame = body.frame().await.unwrap().unwrap();
        assert_eq!(frame.into_data().unwrap(), "first");

        release.send(()).unwrap();
        let frame = body.frame().await.unwrap().unwrap();
        assert_eq!(frame.into_data().unwrap(), "second");
        assert!(body.frame().await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_process_is_killed_on_timeout() {
        use std::io::Write;

        fn alive(pid: &str) -> bool {
            std::process::Command::new("sh")
                .args(["-c", &format!("kill -0 {pid} 2>/dev/null")])
                .status()
                .map(|s| s.success())
                .unwrap_or(false)
        }

        let pid_file = tempfile::NamedTempFile::new().unwrap();
        let mut script = tempfile::NamedTempFile::new().unwrap();
        write!(script, "echo $$ > '{}'; exec sleep 30", pid_file.path().display()).unwrap();

        let bridge = Bridge::new(ProcessInvoker::new("sh"), 1, Duration::from_millis(500));
        let argv = ArgumentVector::build(script.path().to_str().unwrap(), &Submission::default());

        let res = bridge.execute(argv).await;
        assert_eq!(res.status_code(), Status::GatewayTimeout);

        let pid = std::fs::read_to_string(pid_file.path()).unwrap();
        let pid = pid.trim();
        assert!(!pid.is_empty());

        for _ in 0..200 {
            if !alive(pid) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("worker process {pid} outlived its timeout");
    }

    #[tokio::test]
    async fn admission_limit_rejects_with_503() {
        let bridge = bridge(1, LONG, |_, out| async move {
            out.stdout("x").await;
            tokio::time::sleep(LONG).await;
            0
        });

        let held = bridge.execute(argv()).await;
        assert_eq!(held.status_code(), Status::Ok);
        assert_eq!(bridge.available(), 0);

        let rejected = bridge.execute(argv()).await;
        assert_eq!(rejected.status_code(), Status::ServiceUnavailable);

        // Hanging up on the first response frees its slot.
        drop(held);
        wait_for_free_slots(&bridge, 1).await;
    }
}
