use std::{path::PathBuf, sync::Arc, time::Duration};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    check::TypeChecker,
    compile::Bundler,
    config::ToolConfig,
    process::ProcessSpawner,
    report::{Reporter, TerminalReporter},
    supervisor::{Supervisor, SupervisorState},
    unit::CompilationUnit,
    watch::WatchSession,
};

/// Builds a `Supervisor` for one entry file.
///
/// Starts from the real engines described by a [`ToolConfig`]; every
/// collaborator and timing can be replaced.
pub struct SupervisorBuilder {
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
}

impl SupervisorBuilder {
    pub fn new(config: &ToolConfig, entry: impl Into<PathBuf>) -> Self {
        Self {
            unit: CompilationUnit::run(entry, &config.scratch_dir),
            checker: config.checker(),
            bundler: config.bundler(),
            spawner: config.spawner(),
            reporter: Arc::new(TerminalReporter::new(false)),
            grace_period: config.grace_period,
            shutdown_grace_period: config.shutdown_grace_period,
            debounce_window: config.debounce_window,
            stderr_quiet: config.stderr_quiet,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_checker(mut self, checker: Arc<dyn TypeChecker>) -> Self {
        self.checker = checker;
        self
    }

    pub fn with_bundler(mut self, bundler: Arc<dyn Bundler>) -> Self {
        self.bundler = bundler;
        self
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn ProcessSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Time a child gets to exit after the termination request on restart.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self.shutdown_grace_period = self.shutdown_grace_period.min(grace);
        self
    }

    /// Same as the restart grace period, but on shutdown. Capped by it.
    pub fn with_shutdown_grace_period(mut self, grace: Duration) -> Self {
        self.shutdown_grace_period = grace.min(self.grace_period);
        self
    }

    /// Quiet time after the last change event before a restart starts.
    pub fn with_debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window = window;
        self
    }

    /// Takes the debounce window of the session whose changes will drive the loop.
    pub fn with_watch_session(self, session: &WatchSession) -> Self {
        self.with_debounce_window(session.debounce_window())
    }

    pub fn with_stderr_quiet(mut self, quiet: Duration) -> Self {
        self.stderr_quiet = quiet;
        self
    }

    /// Token whose cancellation shuts the supervisor down.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn build(self) -> Supervisor {
        let (external_tx, external_rx) = mpsc::unbounded_channel();
        Supervisor {
            unit: self.unit,
            checker: self.checker,
            bundler: self.bundler,
            spawner: self.spawner,
            reporter: self.reporter,
            grace_period: self.grace_period,
            shutdown_grace_period: self.shutdown_grace_period,
            debounce_window: self.debounce_window,
            stderr_quiet: self.stderr_quiet,
            // The handle cancels this one, never the caller's.
            shutdown: self.shutdown.child_token(),
            state: SupervisorState::Idle,
            active: None,
            cycles: 0,
            external_tx,
            external_rx,
        }
    }
}
