//! Child processes of the supervisor: how they are spawned, how their output
//! reaches the reporter and how they are stopped.

use std::{
    io,
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader},
    process::{Child, Command},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{
    error::SpawnError,
    report::{Report, Reporter},
};

/// Lifecycle of one spawned program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Starting,
    Running,
    Terminating,
    Terminated,
}

impl ProcessState {
    /// Starting or running; at most one such process exists per supervisor.
    pub fn is_alive(&self) -> bool {
        matches!(self, ProcessState::Starting | ProcessState::Running)
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Terminating => write!(f, "terminating"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// How a process ended: an exit code, or the signal that killed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn signal(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Exit code to hand on to our own caller. Signals map to 1.
    pub fn exit_code(&self) -> i32 {
        self.code.unwrap_or(1)
    }
}

impl From<std::process::ExitStatus> for ExitInfo {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;
        Self {
            code: status.code(),
            signal,
        }
    }
}

impl std::fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => write!(f, "unknown status"),
        }
    }
}

pub type OutputStream = Box<dyn AsyncRead + Send + Unpin>;

/// Output pipes of a freshly spawned child.
#[derive(Default)]
pub struct ChildOutput {
    pub stdout: Option<OutputStream>,
    pub stderr: Option<OutputStream>,
}

/// OS-level control over one child.
#[async_trait]
pub trait ChildHandle: Send {
    fn pid(&self) -> Option<u32>;

    /// Asks the process to exit.
    fn terminate(&mut self) -> io::Result<()>;

    /// Kills the process unconditionally.
    fn force_kill(&mut self) -> io::Result<()>;

    /// Resolves once the process is gone. Must be cancel safe.
    async fn wait(&mut self) -> io::Result<ExitInfo>;

    /// Hands out the output pipes. Only the first call returns them.
    fn take_output(&mut self) -> ChildOutput;
}

pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, artifact: &Path) -> Result<Box<dyn ChildHandle>, SpawnError>;
}

/// Runs compiled artifacts with `node`.
#[derive(Debug, Clone)]
pub struct NodeSpawner {
    program: PathBuf,
}

impl NodeSpawner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl ProcessSpawner for NodeSpawner {
    fn spawn(&self, artifact: &Path) -> Result<Box<dyn ChildHandle>, SpawnError> {
        let child = Command::new(&self.program)
            .arg("--enable-source-maps")
            .arg(artifact)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SpawnError::Start {
                program: self.program.display().to_string(),
                artifact: artifact.to_path_buf(),
                source,
            })?;
        Ok(Box::new(OsChild { child }))
    }
}

struct OsChild {
    child: Child,
}

#[async_trait]
impl ChildHandle for OsChild {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> io::Result<()> {
        use nix::{
            sys::signal::{kill, Signal},
            unistd::Pid,
        };
        let Some(pid) = self.child.id() else {
            // Already reaped.
            return Ok(());
        };
        let pid = i32::try_from(pid).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(io::Error::from)
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }

    fn force_kill(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }

    async fn wait(&mut self) -> io::Result<ExitInfo> {
        self.child.wait().await.map(ExitInfo::from)
    }

    fn take_output(&mut self) -> ChildOutput {
        ChildOutput {
            stdout: self
                .child
                .stdout
                .take()
                .map(|s| Box::new(s) as OutputStream),
            stderr: self
                .child
                .stderr
                .take()
                .map(|s| Box::new(s) as OutputStream),
        }
    }
}

/// Result of stopping a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exited on its own within the grace period.
    Exited(ExitInfo),
    /// Grace period elapsed; killed.
    Killed(ExitInfo),
}

impl Termination {
    pub fn exit(&self) -> ExitInfo {
        match self {
            Self::Exited(exit) | Self::Killed(exit) => *exit,
        }
    }

    pub fn was_forced(&self) -> bool {
        matches!(self, Self::Killed(_))
    }
}

/// Graceful-then-forced stop.
///
/// Sends the termination request, then races the exit of the process against
/// `grace`. Whichever resolves first drops the other, so at most one forced
/// kill is ever sent.
pub async fn terminate_child(
    child: &mut dyn ChildHandle,
    grace: Duration,
) -> io::Result<Termination> {
    if let Err(e) = child.terminate() {
        warn!(pid = ?child.pid(), "graceful termination request failed: {e}");
    }
    tokio::select! {
        exit = child.wait() => Ok(Termination::Exited(exit?)),
        _ = tokio::time::sleep(grace) => {
            warn!(pid = ?child.pid(), "timeout reached, force killing");
            child.force_kill()?;
            let exit = child.wait().await?;
            Ok(Termination::Killed(exit))
        }
    }
}

/// A spawned child together with the tasks forwarding its output.
pub struct SupervisedProcess {
    pid: Option<u32>,
    state: ProcessState,
    child: Box<dyn ChildHandle>,
    forwarders: Vec<JoinHandle<()>>,
    exit: Option<ExitInfo>,
}

impl std::fmt::Debug for SupervisedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisedProcess")
            .field("pid", &self.pid)
            .field("state", &self.state)
            .field("exit", &self.exit)
            .finish_non_exhaustive()
    }
}

impl SupervisedProcess {
    /// Wires the child's output to `reporter` and marks it running.
    ///
    /// Stdout is forwarded verbatim. Stderr is collected into blocks that end
    /// after `stderr_quiet` without new lines and reported as one unit.
    pub fn start(
        mut child: Box<dyn ChildHandle>,
        reporter: Arc<dyn Reporter>,
        stderr_quiet: Duration,
    ) -> Self {
        let pid = child.pid();
        let mut process = Self {
            pid,
            state: ProcessState::Starting,
            child,
            forwarders: Vec::new(),
            exit: None,
        };
        let output = process.child.take_output();
        if let Some(stdout) = output.stdout {
            let reporter = reporter.clone();
            process
                .forwarders
                .push(tokio::spawn(forward_stdout(stdout, reporter)));
        }
        if let Some(stderr) = output.stderr {
            process
                .forwarders
                .push(tokio::spawn(forward_stderr(stderr, reporter, stderr_quiet)));
        }
        process.state = ProcessState::Running;
        debug!(?pid, "process running");
        process
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn exit(&self) -> Option<ExitInfo> {
        self.exit
    }

    /// Waits for the process to end on its own. Cancel safe.
    pub async fn wait(&mut self) -> io::Result<ExitInfo> {
        if let Some(exit) = self.exit {
            return Ok(exit);
        }
        let exit = self.child.wait().await?;
        self.mark_terminated(exit);
        Ok(exit)
    }

    /// Stops the process with the graceful-then-forced protocol.
    pub async fn terminate(&mut self, grace: Duration) -> io::Result<Termination> {
        if let Some(exit) = self.exit {
            return Ok(Termination::Exited(exit));
        }
        self.state = ProcessState::Terminating;
        let termination = terminate_child(self.child.as_mut(), grace).await?;
        self.mark_terminated(termination.exit());
        Ok(termination)
    }

    /// Lets the output forwarders drain, giving up after `limit`.
    pub async fn finish_output(&mut self, limit: Duration) {
        for mut forwarder in self.forwarders.drain(..) {
            if tokio::time::timeout(limit, &mut forwarder).await.is_err() {
                forwarder.abort();
            }
        }
    }

    fn mark_terminated(&mut self, exit: ExitInfo) {
        self.exit = Some(exit);
        self.state = ProcessState::Terminated;
    }
}

impl Drop for SupervisedProcess {
    fn drop(&mut self) {
        for forwarder in &self.forwarders {
            forwarder.abort();
        }
    }
}

async fn forward_stdout(mut stdout: OutputStream, reporter: Arc<dyn Reporter>) {
    let mut buf = vec![0u8; 8 * 1024];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => reporter.report(Report::Stdout(buf[..n].to_vec())),
            Err(e) => {
                debug!("stdout forwarding stopped: {e}");
                break;
            }
        }
    }
}

async fn forward_stderr(stderr: OutputStream, reporter: Arc<dyn Reporter>, quiet: Duration) {
    let mut lines = BufReader::new(stderr).lines();
    let mut block: Vec<String> = Vec::new();
    loop {
        let next = if block.is_empty() {
            Ok(lines.next_line().await)
        } else {
            tokio::time::timeout(quiet, lines.next_line()).await
        };
        match next {
            Ok(Ok(Some(line))) => block.push(line),
            Ok(Ok(None)) => break,
            Ok(Err(e)) => {
                debug!("stderr forwarding stopped: {e}");
                break;
            }
            Err(_) => flush_block(&mut block, reporter.as_ref()),
        }
    }
    flush_block(&mut block, reporter.as_ref());
}

fn flush_block(block: &mut Vec<String>, reporter: &dyn Reporter) {
    if block.is_empty() {
        return;
    }
    let text = block.join("\n");
    block.clear();
    reporter.report(Report::Stderr(text));
}
