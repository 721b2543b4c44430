//! Worker invocation.
//!
//! A worker consumes an [`ArgumentVector`] and produces a stream of
//! [`WorkerEvent`]s: stdout and stderr chunks in emission order, then exactly
//! one [`WorkerEvent::Exit`] as the final event. How the worker runs is hidden
//! behind [`WorkerInvoker`]:
//!
//! - [`ProcessInvoker`] spawns an OS child process (`<interpreter> <argv...>`).
//! - [`InProcessInvoker`] runs an async Rust function on the runtime.
//!
//! Dropping the [`WorkerRun`] stops the worker; a child process is killed.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt};
use tokio_util::codec::{BytesCodec, FramedRead};
use tracing::{debug, info, warn};

use crate::argv::ArgumentVector;
use crate::error::WorkerError;

/// Events buffered between the worker and the bridge before the worker is
/// made to wait.
const EVENT_BUFFER: usize = 16;

/// One observation of a running worker.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WorkerEvent {
    Stdout(Bytes),
    Stderr(Bytes),
    /// Always the last event of a run.
    Exit(ExitStatus),
}

/// How a worker finished.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExitStatus {
    code: Option<i32>,
}

impl ExitStatus {
    pub fn from_code(code: i32) -> Self {
        Self { code: Some(code) }
    }

    /// A worker terminated by a signal has no code.
    pub fn signaled() -> Self {
        Self { code: None }
    }

    pub fn code(self) -> Option<i32> {
        self.code
    }

    pub fn success(self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        Self { code: status.code() }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => f.write_str("terminated by signal"),
        }
    }
}

/// A started worker. Events arrive on [`WorkerRun::next`].
pub struct WorkerRun {
    events: mpsc::Receiver<WorkerEvent>,
    pid: Option<u32>,
}

impl WorkerRun {
    /// OS process id, for workers that are child processes.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Next event, or `None` once the worker has exited and every event was
    /// read (or the worker task died without reporting).
    pub async fn next(&mut self) -> Option<WorkerEvent> {
        self.events.recv().await
    }
}

/// Starts workers. Implementations must deliver events in emission order per
/// stream and end every run with [`WorkerEvent::Exit`].
pub trait WorkerInvoker: Send + Sync {
    /// Starts a worker for `argv`. Must be called from within a tokio runtime.
    fn invoke(&self, argv: &ArgumentVector) -> Result<WorkerRun, WorkerError>;
}

// ── Out of process ────────────────────────────────────────────────────────────

/// Runs `<interpreter> <argv...>` as a child process.
#[derive(Clone, Debug)]
pub struct ProcessInvoker {
    interpreter: String,
}

impl ProcessInvoker {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self { interpreter: interpreter.into() }
    }
}

fn chunks(
    reader: impl AsyncRead,
    op: fn(Bytes) -> WorkerEvent,
) -> impl Stream<Item = std::io::Result<WorkerEvent>> {
    FramedRead::new(reader, BytesCodec::new()).map(move |r| r.map(|b| op(b.freeze())))
}

impl WorkerInvoker for ProcessInvoker {
    fn invoke(&self, argv: &ArgumentVector) -> Result<WorkerRun, WorkerError> {
        let mut child = Command::new(&self.interpreter)
            .args(argv.as_slice())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| WorkerError::Spawn { program: self.interpreter.clone(), source })?;

        let missing = |stream: &'static str| WorkerError::MissingPipe { program: self.interpreter.clone(), stream };
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        let pid = child.id();
        debug!(pid, program = %self.interpreter, "worker spawned");

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        // If this task is dropped with the runtime, `kill_on_drop` still
        // stops the child.
        tokio::spawn(async move {
            let mut output = chunks(stdout, WorkerEvent::Stdout).merge(chunks(stderr, WorkerEvent::Stderr));

            loop {
                tokio::select! {
                    () = tx.closed() => return kill(child, pid).await,
                    item = output.next() => match item {
                        Some(Ok(event)) => {
                            if tx.send(event).await.is_err() {
                                return kill(child, pid).await;
                            }
                        }
                        Some(Err(e)) => {
                            warn!("reading worker output failed: {e}");
                            break;
                        }
                        None => break,
                    },
                }
            }

            let status = tokio::select! {
                () = tx.closed() => return kill(child, pid).await,
                status = child.wait() => match status {
                    Ok(status) => ExitStatus::from(status),
                    Err(e) => {
                        warn!("waiting for worker failed: {e}");
                        ExitStatus::signaled()
                    }
                },
            };
            let _ = tx.send(WorkerEvent::Exit(status)).await;
        });

        Ok(WorkerRun { events: rx, pid })
    }
}

/// Kills an abandoned child and reaps it, so no zombie outlives the run.
async fn kill(mut child: Child, pid: Option<u32>) {
    match child.kill().await {
        Ok(()) => info!(pid, "worker killed before it exited"),
        Err(e) => warn!(pid, "killing worker failed: {e}"),
    }
}

// ── In process ────────────────────────────────────────────────────────────────

/// Output handle given to an in-process worker function.
#[derive(Clone)]
pub struct WorkerSink {
    tx: mpsc::Sender<WorkerEvent>,
}

impl WorkerSink {
    /// Emits a stdout chunk. Returns `false` once nobody is listening.
    pub async fn stdout(&self, chunk: impl Into<Bytes>) -> bool {
        self.tx.send(WorkerEvent::Stdout(chunk.into())).await.is_ok()
    }

    /// Emits a stderr chunk. Returns `false` once nobody is listening.
    pub async fn stderr(&self, chunk: impl Into<Bytes>) -> bool {
        self.tx.send(WorkerEvent::Stderr(chunk.into())).await.is_ok()
    }
}

type WorkFn = dyn Fn(Vec<String>, WorkerSink) -> Pin<Box<dyn Future<Output = i32> + Send>> + Send + Sync;

/// Runs an async Rust function as the worker. The function receives the
/// argument vector and a [`WorkerSink`]; its return value is the exit code.
///
/// ```rust
/// use sporeline::InProcessInvoker;
///
/// let echo = InProcessInvoker::new(|args, out| async move {
///     out.stdout(args.join(" ")).await;
///     0
/// });
/// ```
#[derive(Clone)]
pub struct InProcessInvoker {
    work: Arc<WorkFn>,
}

impl InProcessInvoker {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<String>, WorkerSink) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = i32> + Send + 'static,
    {
        let work: Arc<WorkFn> = Arc::new(move |args: Vec<String>, sink: WorkerSink| {
            Box::pin(f(args, sink)) as Pin<Box<dyn Future<Output = i32> + Send>>
        });
        Self { work }
    }
}

impl WorkerInvoker for InProcessInvoker {
    fn invoke(&self, argv: &ArgumentVector) -> Result<WorkerRun, WorkerError> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let work = (self.work)(argv.as_slice().to_vec(), WorkerSink { tx: tx.clone() });

        tokio::spawn(async move {
            tokio::select! {
                () = tx.closed() => info!("in-process worker cancelled before it finished"),
                code = work => {
                    let _ = tx.send(WorkerEvent::Exit(ExitStatus::from_code(code))).await;
                }
            }
        });

        Ok(WorkerRun { events: rx, pid: None })
    }
}
