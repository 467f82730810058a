//! Dedicated Emacs daemon and the `emacsclient` calls made against it.
//!
//! An [`Emacs`] handle owns one daemon, started with
//! `--fg-daemon=<socket> --init-directory=<tmp>`. Every evaluation spawns its
//! own `emacsclient --socket-name=<socket> --eval <expr>` and returns what
//! that client printed on stdout.

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tempfile::TempDir;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use super::framing::write_payload;
use super::request::Request;
use crate::config::EmacsConfig;
use crate::sexp::{stringify, Sexp, SexpError};

/// Line the daemon prints on stderr once its server socket is accepting.
///
/// This is the only readiness signal `--fg-daemon` offers. If a future Emacs
/// rewords the message, `startup` will wait forever.
pub const DAEMON_READY_MARKER: &str = "Starting Emacs daemon.";

/// Distinguishes handles created by the same process.
static INSTANCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Errors from the daemon lifecycle and from evaluation.
#[derive(Debug, Error)]
pub enum EmacsError {
    /// A daemon or client process could not be created.
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The daemon exited with a failure code before becoming ready.
    #[error("Emacs daemon exited with code {code}")]
    AbnormalExit { code: i32 },

    /// The daemon went away before becoming ready without a failure code.
    #[error("Emacs daemon exited before it was ready ({0})")]
    WorkerExited(ExitStatus),

    /// `evaluate` was called while the daemon was not running.
    #[error("Emacs daemon is not started. Call startup() first.")]
    NotStarted,

    /// The expression could not be rendered.
    #[error(transparent)]
    Serialization(#[from] SexpError),

    /// The daemon's init directory could not be created.
    #[error("Failed to create daemon init directory: {0}")]
    WorkDir(#[source] io::Error),

    /// I/O error while talking to a child process.
    #[error("I/O error: {0}")]
    Io(#[source] io::Error),
}

/// Observable lifecycle of the daemon behind a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Starting,
    Running,
    Stopped,
}

enum Slot {
    Idle,
    Starting,
    Running(Worker),
    Stopped,
}

impl Slot {
    fn state(&self) -> WorkerState {
        match self {
            Slot::Idle => WorkerState::Idle,
            Slot::Starting => WorkerState::Starting,
            Slot::Running(_) => WorkerState::Running,
            Slot::Stopped => WorkerState::Stopped,
        }
    }
}

/// A ready daemon. The child and its init directory live in the supervisor
/// task, which removes the directory only after the child has been reaped.
struct Worker {
    generation: u64,
    shutdown_tx: oneshot::Sender<()>,
    reaped_rx: oneshot::Receiver<()>,
    work_dir: PathBuf,
}

/// Handle to one dedicated Emacs daemon.
///
/// Handles are independent: each has its own socket name and init directory,
/// so several can run side by side without sharing configuration.
///
/// # Example
///
/// ```ignore
/// use orgmacs::{atom, list, Emacs, EmacsConfig};
///
/// let emacs = Emacs::new(EmacsConfig::from_env());
/// emacs.startup().await?;
/// let out = emacs.evaluate(&list![atom("princ")?, "hello world"], None).await?;
/// assert_eq!(out, "hello world");
/// emacs.shutdown().await;
/// ```
pub struct Emacs {
    config: EmacsConfig,
    socket_name: String,
    slot: Arc<Mutex<Slot>>,
    /// Serializes startup and shutdown. Never held by `evaluate`.
    lifecycle: AsyncMutex<()>,
    generation: AtomicU64,
}

impl Emacs {
    /// Create an idle handle. No process is started until [`Emacs::startup`].
    pub fn new(config: EmacsConfig) -> Self {
        let socket_name = format!(
            "{}-{}-{}",
            config.socket_prefix,
            std::process::id(),
            INSTANCE_COUNTER.fetch_add(1, Ordering::Relaxed)
        );

        Self {
            config,
            socket_name,
            slot: Arc::new(Mutex::new(Slot::Idle)),
            lifecycle: AsyncMutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Create an idle handle configured from `ORGMACS_*` variables.
    pub fn from_env() -> Self {
        Self::new(EmacsConfig::from_env())
    }

    pub fn config(&self) -> &EmacsConfig {
        &self.config
    }

    /// Name of the server socket the daemon listens on.
    pub fn socket_name(&self) -> &str {
        &self.socket_name
    }

    pub fn state(&self) -> WorkerState {
        self.lock_slot().state()
    }

    /// Init directory of the running daemon, if any.
    pub fn work_dir(&self) -> Option<PathBuf> {
        match &*self.lock_slot() {
            Slot::Running(worker) => Some(worker.work_dir.clone()),
            _ => None,
        }
    }

    /// Start a fluent request against this daemon.
    pub fn request(&self) -> Request<'_> {
        Request::new(self)
    }

    /// Start the daemon and wait until it reports readiness.
    ///
    /// Returns immediately if the daemon is already running. Concurrent calls
    /// wait for the first one and share its outcome through the state.
    ///
    /// # Errors
    ///
    /// - `EmacsError::WorkDir` if the init directory cannot be created
    /// - `EmacsError::Spawn` if the daemon program cannot be executed
    /// - `EmacsError::AbnormalExit` if it exits non-zero before readiness
    /// - `EmacsError::WorkerExited` if it exits otherwise before readiness
    pub async fn startup(&self) -> Result<(), EmacsError> {
        let _lifecycle = self.lifecycle.lock().await;

        {
            let mut slot = self.lock_slot();
            if let Slot::Running(_) = *slot {
                return Ok(());
            }
            *slot = Slot::Starting;
        }

        match self.launch().await {
            Ok(()) => {
                info!("Emacs daemon {} is ready", self.socket_name);
                Ok(())
            }
            Err(e) => {
                *self.lock_slot() = Slot::Idle;
                Err(e)
            }
        }
    }

    async fn launch(&self) -> Result<(), EmacsError> {
        let work_root = self.config.work_root();
        std::fs::create_dir_all(&work_root).map_err(EmacsError::WorkDir)?;
        let work_dir = tempfile::Builder::new()
            .prefix(&format!("{}-", self.config.socket_prefix))
            .tempdir_in(&work_root)
            .map_err(EmacsError::WorkDir)?;

        info!(
            "Starting Emacs daemon {} with init directory {}",
            self.socket_name,
            work_dir.path().display()
        );

        let mut init_directory = OsString::from("--init-directory=");
        init_directory.push(work_dir.path());

        let mut child = Command::new(&self.config.emacs_program)
            .args(&self.config.emacs_args)
            .arg(format!("--fg-daemon={}", self.socket_name))
            .arg(init_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EmacsError::Spawn {
                program: self.config.emacs_program.clone(),
                source,
            })?;

        let stderr = child.stderr.take().ok_or_else(|| {
            EmacsError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "daemon stderr was not captured",
            ))
        })?;

        let (ready_tx, mut ready_rx) = oneshot::channel();
        forward_daemon_stderr(stderr, ready_tx);

        let ready = tokio::select! {
            ready = &mut ready_rx => ready.is_ok(),
            status = child.wait() => {
                return Err(exit_error(status.map_err(EmacsError::Io)?));
            }
        };

        if !ready {
            // stderr closed without the marker; the exit status says why.
            let status = child.wait().await.map_err(EmacsError::Io)?;
            return Err(exit_error(status));
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (reaped_tx, reaped_rx) = oneshot::channel();

        *self.lock_slot() = Slot::Running(Worker {
            generation,
            shutdown_tx,
            reaped_rx,
            work_dir: work_dir.path().to_path_buf(),
        });

        tokio::spawn(supervise(
            child,
            work_dir,
            generation,
            Arc::clone(&self.slot),
            shutdown_rx,
            reaped_tx,
        ));

        Ok(())
    }

    /// Evaluate `sexp` in a fresh `emacsclient` and return its stdout.
    ///
    /// `input`, when given, is streamed to the client's stdin and never
    /// passed as an argument. Client stderr is logged as a diagnostic and a
    /// failing client still yields whatever it printed.
    ///
    /// # Errors
    ///
    /// - `EmacsError::NotStarted` if the daemon is not running (nothing is spawned)
    /// - `EmacsError::Serialization` if `sexp` cannot be rendered
    /// - `EmacsError::Spawn` if the client program cannot be executed
    pub async fn evaluate(&self, sexp: &Sexp, input: Option<&str>) -> Result<String, EmacsError> {
        if self.state() != WorkerState::Running {
            return Err(EmacsError::NotStarted);
        }

        let expression = stringify(sexp)?;
        debug!(socket = %self.socket_name, "Evaluating {}", expression);

        let mut child = Command::new(&self.config.client_program)
            .args(&self.config.client_args)
            .arg(format!("--socket-name={}", self.socket_name))
            .arg("--eval")
            .arg(&expression)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EmacsError::Spawn {
                program: self.config.client_program.clone(),
                source,
            })?;

        // Feed stdin from its own task so a chatty client cannot deadlock
        // against a full stdout pipe.
        let feeder = match (input, child.stdin.take()) {
            (Some(payload), Some(mut stdin)) => {
                let payload = payload.to_owned();
                Some(tokio::spawn(async move {
                    write_payload(&mut stdin, &payload).await
                }))
            }
            _ => None,
        };

        let output = child.wait_with_output().await.map_err(EmacsError::Io)?;

        if let Some(feeder) = feeder {
            match feeder.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Failed to stream input to emacsclient: {:#}", e),
                Err(e) => warn!("Input feeder task failed: {}", e),
            }
        }

        let diagnostic = String::from_utf8_lossy(&output.stderr);
        if !diagnostic.trim().is_empty() {
            warn!(
                diagnostic = %diagnostic.trim_end(),
                "Emacs Lisp evaluation reported diagnostics"
            );
        }
        if !output.status.success() {
            debug!(status = %output.status, "emacsclient exited unsuccessfully");
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Stop the daemon if it is running and wait until it has been reaped.
    ///
    /// The init directory is removed on a best-effort basis before this
    /// returns.
    pub async fn shutdown(&self) {
        let _lifecycle = self.lifecycle.lock().await;

        let worker = {
            let mut slot = self.lock_slot();
            match std::mem::replace(&mut *slot, Slot::Stopped) {
                Slot::Running(worker) => worker,
                other => {
                    *slot = other;
                    return;
                }
            }
        };

        info!("Stopping Emacs daemon {}", self.socket_name);

        let Worker {
            shutdown_tx,
            reaped_rx,
            ..
        } = worker;

        // A closed channel means the supervisor already saw the exit.
        let _ = shutdown_tx.send(());
        let _ = reaped_rx.await;
    }

    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Emacs {
    fn drop(&mut self) {
        // Dropping the worker closes its shutdown channel; the supervisor
        // then kills the daemon and removes its init directory.
        *self.lock_slot() = Slot::Stopped;
    }
}

/// Log daemon stderr and fire `ready_tx` on the readiness marker.
///
/// The marker is matched against raw bytes as they arrive, so it counts even
/// when the daemon has not finished the line yet. Complete lines are logged.
/// Keeps draining after readiness so the daemon never blocks on a full pipe.
fn forward_daemon_stderr(stderr: ChildStderr, ready_tx: oneshot::Sender<()>) {
    tokio::spawn(async move {
        let mut ready_tx = Some(ready_tx);
        let mut reader = BufReader::new(stderr);
        // Bytes after the last logged newline.
        let mut pending: Vec<u8> = Vec::new();

        loop {
            let read = match reader.fill_buf().await {
                Ok(chunk) => {
                    pending.extend_from_slice(chunk);
                    chunk.len()
                }
                Err(e) => {
                    warn!("Failed to read Emacs daemon stderr: {}", e);
                    break;
                }
            };
            if read == 0 {
                break;
            }
            reader.consume(read);

            if ready_tx.is_some() && contains_marker(&pending) {
                if let Some(tx) = ready_tx.take() {
                    let _ = tx.send(());
                }
            }

            while let Some(end) = pending.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = pending.drain(..=end).collect();
                log_daemon_line(&line);
            }
        }

        if !pending.is_empty() {
            log_daemon_line(&pending);
        }
    });
}

fn contains_marker(bytes: &[u8]) -> bool {
    let marker = DAEMON_READY_MARKER.as_bytes();
    bytes.windows(marker.len()).any(|window| window == marker)
}

fn log_daemon_line(line: &[u8]) {
    let line = String::from_utf8_lossy(line);
    debug!(target: "orgmacs::daemon", "{}", line.trim_end());
}

/// Own the daemon child until shutdown is requested or it exits by itself.
async fn supervise(
    mut child: Child,
    work_dir: TempDir,
    generation: u64,
    slot: Arc<Mutex<Slot>>,
    shutdown_rx: oneshot::Receiver<()>,
    reaped_tx: oneshot::Sender<()>,
) {
    tokio::select! {
        // Fires on an explicit shutdown and when the handle is dropped.
        _ = shutdown_rx => {
            if let Err(e) = child.start_kill() {
                debug!("Emacs daemon already gone: {}", e);
            }
            match child.wait().await {
                Ok(status) => debug!(%status, "Emacs daemon reaped"),
                Err(e) => warn!("Failed to reap Emacs daemon: {}", e),
            }
        }
        status = child.wait() => {
            match status {
                Ok(status) => warn!(%status, "Emacs daemon exited unexpectedly"),
                Err(e) => warn!("Lost track of Emacs daemon: {}", e),
            }

            let mut current = slot.lock().unwrap_or_else(PoisonError::into_inner);
            if matches!(&*current, Slot::Running(worker) if worker.generation == generation) {
                *current = Slot::Stopped;
            }
        }
    }

    if let Err(e) = work_dir.close() {
        debug!("Failed to remove daemon init directory: {}", e);
    }

    let _ = reaped_tx.send(());
}

/// Classify a daemon exit that happened before readiness.
fn exit_error(status: ExitStatus) -> EmacsError {
    match status.code() {
        Some(code) if code != 0 => EmacsError::AbnormalExit { code },
        _ => EmacsError::WorkerExited(status),
    }
}
