pub(crate) mod builder;
pub(crate) mod handle;

use std::{io, path::PathBuf, sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, oneshot},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    check::TypeChecker,
    compile::Bundler,
    diagnostic::Diagnostic,
    error::{CompileError, Error},
    process::{ExitInfo, ProcessSpawner, SupervisedProcess, Termination},
    report::{Report, Reporter},
    supervisor::handle::SupervisorHandle,
    unit::CompilationUnit,
    watch::{ChangeStream, WatchEvent},
};

/// How long output forwarders may keep draining once their process is gone.
const OUTPUT_DRAIN_LIMIT: Duration = Duration::from_millis(500);

/// Where the supervisor is in its restart cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    TypeChecking,
    Compiling,
    Spawning,
    Running,
    Terminating,
    Terminated,
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::TypeChecking => write!(f, "type-checking"),
            Self::Compiling => write!(f, "compiling"),
            Self::Spawning => write!(f, "spawning"),
            Self::Running => write!(f, "running"),
            Self::Terminating => write!(f, "terminating"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Snapshot answered to [`SupervisorHandle::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorStatus {
    pub state: SupervisorState,
    pub pid: Option<u32>,
    /// Restart cycles started so far, including the initial one.
    pub cycles: u64,
    /// A change was seen and its cycle has not started yet.
    pub pending: bool,
}

/// How one restart cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Spawned,
    TypeCheckFailed,
    CompileFailed,
    SpawnFailed,
    /// Shutdown was requested before a process could be started.
    Cancelled,
}

#[derive(Debug)]
pub(crate) enum SupervisorMessage {
    Restart(PathBuf),
    Status(oneshot::Sender<SupervisorStatus>),
    Shutdown,
}

/// Owns the single child process of one entry file and keeps it in sync with
/// the sources.
///
/// Every restart cycle stops the previous child, type-checks, compiles and
/// spawns, strictly in that order. Cycles never overlap: change events that
/// arrive while a cycle is in flight collapse into one pending restart.
pub struct Supervisor {
    unit: CompilationUnit,
    checker: Arc<dyn TypeChecker>,
    bundler: Arc<dyn Bundler>,
    spawner: Arc<dyn ProcessSpawner>,
    reporter: Arc<dyn Reporter>,
    grace_period: Duration,
    shutdown_grace_period: Duration,
    debounce_window: Duration,
    stderr_quiet: Duration,
    shutdown: CancellationToken,
    state: SupervisorState,
    active: Option<SupervisedProcess>,
    cycles: u64,
    external_tx: mpsc::UnboundedSender<SupervisorMessage>,
    external_rx: mpsc::UnboundedReceiver<SupervisorMessage>,
}

impl Supervisor {
    pub fn unit(&self) -> &CompilationUnit {
        &self.unit
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Runs the pipeline once and waits for the program to finish.
    ///
    /// Returns the exit code for the tool: the child's own code, 1 for any
    /// failed stage, 0 when interrupted.
    pub async fn run_once(&mut self) -> Result<i32, Error> {
        let outcome = self.restart_cycle().await?;
        let code = match outcome {
            CycleOutcome::Spawned => self.wait_for_exit().await?,
            CycleOutcome::Cancelled => 0,
            CycleOutcome::TypeCheckFailed
            | CycleOutcome::CompileFailed
            | CycleOutcome::SpawnFailed => 1,
        };
        Ok(code)
    }

    /// Starts the watch loop on a tokio task, consuming `changes`.
    ///
    /// The stream (and the OS watch behind it) is closed when the loop ends.
    pub fn run(self, changes: ChangeStream) -> SupervisorHandle {
        let user_tx = self.external_tx.clone();
        let shutdown = self.shutdown.clone();
        let join_handle = tokio::spawn(self.supervise(changes));
        SupervisorHandle::new(join_handle, user_tx, shutdown)
    }

    async fn supervise(mut self, mut changes: ChangeStream) -> Result<(), Error> {
        self.reporter.report(Report::status(format!(
            "Watching: {}",
            self.unit.entry_path().display()
        )));
        let result = self.watch_loop(&mut changes).await;
        if let Err(e) = &result {
            error!("supervisor stopped: {e}");
        }
        changes.close();
        let grace = self.shutdown_grace_period;
        self.stop_active(grace).await;
        info!(cycles = self.cycles, "supervisor stopped");
        result
    }

    async fn watch_loop(&mut self, changes: &mut ChangeStream) -> Result<(), Error> {
        self.restart_cycle().await?;

        let mut deadline: Option<Instant> = None;
        let mut last_change: Option<PathBuf> = None;
        let mut changes_open = true;

        loop {
            let debounce = async move {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Ok(()),
                Some(msg) = self.external_rx.recv() => match msg {
                    SupervisorMessage::Restart(path) => {
                        deadline = Some(Instant::now() + self.debounce_window);
                        last_change = Some(path);
                    }
                    SupervisorMessage::Status(tx) => {
                        let _ = tx.send(self.status(deadline.is_some()));
                    }
                    SupervisorMessage::Shutdown => return Ok(()),
                },
                event = changes.recv(), if changes_open => match event {
                    Some(WatchEvent::Ready) => {
                        self.reporter.report(Report::status("Watcher ready, monitoring changes..."));
                    }
                    Some(WatchEvent::Change(path)) => {
                        debug!(path = %path.display(), "change detected");
                        deadline = Some(Instant::now() + self.debounce_window);
                        last_change = Some(path);
                    }
                    Some(WatchEvent::Error(message)) => warn!("file watcher error: {message}"),
                    None => {
                        debug!("change stream closed");
                        changes_open = false;
                    }
                },
                exit = Self::wait_active(&mut self.active) => self.on_child_exit(exit).await,
                _ = debounce, if deadline.is_some() => {
                    deadline = None;
                    if let Some(path) = last_change.take() {
                        self.reporter.report(Report::ClearScreen);
                        self.reporter.report(Report::status(format!(
                            "Rebuilding due to change in {}...",
                            path.display()
                        )));
                    }
                    self.restart_cycle().await?;
                }
            }
        }
    }

    /// One full cycle: stop, check, compile, spawn.
    ///
    /// Expected failures are reported and end the cycle; only engines that
    /// cannot be invoked at all come back as `Err`.
    async fn restart_cycle(&mut self) -> Result<CycleOutcome, Error> {
        self.cycles += 1;
        debug!(cycle = self.cycles, "restart cycle");

        if self.active.as_ref().is_some_and(|p| p.state().is_alive()) {
            self.reporter.report(Report::status("Restarting..."));
        }
        let grace = self.grace_period;
        self.stop_active(grace).await;

        self.state = SupervisorState::TypeChecking;
        let check = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Ok(self.finish_cycle(CycleOutcome::Cancelled)),
            check = self.checker.check(self.unit.entry_path()) => check,
        };
        let report = match check {
            Ok(report) => report,
            Err(e) => {
                self.state = SupervisorState::Idle;
                return Err(e.into());
            }
        };
        if !report.success {
            self.reporter.report(Report::Diagnostics(report.diagnostics));
            return Ok(self.finish_cycle(CycleOutcome::TypeCheckFailed));
        }
        if !report.diagnostics.is_empty() {
            self.reporter.report(Report::Diagnostics(report.diagnostics));
        }

        self.state = SupervisorState::Compiling;
        let compiled = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Ok(self.finish_cycle(CycleOutcome::Cancelled)),
            compiled = self.bundler.compile(&self.unit) => compiled,
        };
        let artifact = match compiled {
            Ok(artifact) => artifact,
            Err(CompileError::Failed { entry, errors }) => {
                self.reporter.report(Report::CompileFailed { entry, errors });
                return Ok(self.finish_cycle(CycleOutcome::CompileFailed));
            }
            Err(e) if e.is_fatal() => {
                self.state = SupervisorState::Idle;
                return Err(e.into());
            }
            Err(e) => {
                self.reporter.report(Report::CompileFailed {
                    entry: self.unit.entry_path().to_path_buf(),
                    errors: vec![Diagnostic::error(e.to_string())],
                });
                return Ok(self.finish_cycle(CycleOutcome::CompileFailed));
            }
        };

        self.state = SupervisorState::Spawning;
        match self.spawner.spawn(&artifact) {
            Ok(child) => {
                let process =
                    SupervisedProcess::start(child, self.reporter.clone(), self.stderr_quiet);
                info!(pid = ?process.pid(), artifact = %artifact.display(), "process started");
                self.active = Some(process);
                self.state = SupervisorState::Running;
                Ok(CycleOutcome::Spawned)
            }
            Err(e) => {
                self.reporter.report(Report::SpawnFailed(e.to_string()));
                Ok(self.finish_cycle(CycleOutcome::SpawnFailed))
            }
        }
    }

    fn finish_cycle(&mut self, outcome: CycleOutcome) -> CycleOutcome {
        debug!(?outcome, "cycle aborted");
        self.state = SupervisorState::Idle;
        outcome
    }

    /// Terminates the active child, if any, and waits until it is gone.
    async fn stop_active(&mut self, grace: Duration) {
        let Some(mut process) = self.active.take() else {
            return;
        };
        if process.state().is_alive() {
            self.state = SupervisorState::Terminating;
            let pid = process.pid();
            match process.terminate(grace).await {
                Ok(Termination::Exited(exit)) => {
                    info!(?pid, %exit, "process exited");
                    self.reporter.report(Report::status(format!(
                        "Process {} exited with {exit}",
                        display_pid(pid)
                    )));
                }
                Ok(Termination::Killed(exit)) => {
                    warn!(?pid, %exit, "process force killed");
                    self.reporter.report(Report::status(format!(
                        "Timeout reached, force killed process {}",
                        display_pid(pid)
                    )));
                }
                Err(e) => error!(?pid, "failed to confirm process termination: {e}"),
            }
            self.state = SupervisorState::Terminated;
        }
        process.finish_output(OUTPUT_DRAIN_LIMIT).await;
        self.state = SupervisorState::Idle;
    }

    /// Waits for the single-shot child to finish, or for shutdown.
    async fn wait_for_exit(&mut self) -> Result<i32, Error> {
        let Some(process) = self.active.as_mut() else {
            return Ok(1);
        };
        tokio::select! {
            exit = process.wait() => {
                let exit = exit?;
                process.finish_output(OUTPUT_DRAIN_LIMIT).await;
                self.active = None;
                self.state = SupervisorState::Idle;
                Ok(exit.exit_code())
            }
            _ = self.shutdown.cancelled() => {
                let grace = self.shutdown_grace_period;
                self.stop_active(grace).await;
                Ok(0)
            }
        }
    }

    async fn wait_active(active: &mut Option<SupervisedProcess>) -> io::Result<ExitInfo> {
        match active {
            Some(process) if process.state().is_alive() => process.wait().await,
            _ => std::future::pending().await,
        }
    }

    /// The child ended without being asked to.
    async fn on_child_exit(&mut self, exit: io::Result<ExitInfo>) {
        let pid = self.active.as_ref().and_then(SupervisedProcess::pid);
        if let Some(mut process) = self.active.take() {
            process.finish_output(OUTPUT_DRAIN_LIMIT).await;
        }
        self.state = SupervisorState::Idle;
        match exit {
            Ok(exit) => {
                info!(?pid, %exit, "process exited on its own");
                self.reporter.report(Report::status(format!(
                    "Process exited with {exit}, waiting for changes..."
                )));
            }
            Err(e) => error!(?pid, "failed to wait for process: {e}"),
        }
    }

    fn status(&self, pending: bool) -> SupervisorStatus {
        SupervisorStatus {
            state: self.state,
            pid: self.active.as_ref().and_then(SupervisedProcess::pid),
            cycles: self.cycles,
            pending,
        }
    }
}

fn display_pid(pid: Option<u32>) -> String {
    pid.map_or_else(|| "?".to_string(), |pid| pid.to_string())
}
