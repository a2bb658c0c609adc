#![allow(dead_code)]

use std::{
    io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::watch;

use ghostts::{
    Bundler, CheckError, ChildHandle, ChildOutput, CompilationUnit, CompileError, Diagnostic,
    ExitInfo, ProcessSpawner, Report, Reporter, SpawnError, SupervisorBuilder, ToolConfig,
    TypeCheckReport, TypeChecker,
};

pub const ENTRY: &str = "src/index.ts";

#[derive(Default)]
pub struct FakeChecker {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
    pub broken: AtomicBool,
    pub delay: Mutex<Duration>,
}

impl FakeChecker {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }
}

#[async_trait]
impl TypeChecker for FakeChecker {
    async fn check(&self, entry: &Path) -> Result<TypeCheckReport, CheckError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.broken.load(Ordering::SeqCst) {
            return Err(CheckError::Engine {
                program: "tsc".into(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
            });
        }
        let diagnostics = if self.fail.load(Ordering::SeqCst) {
            vec![
                Diagnostic::error("Type 'string' is not assignable to type 'number'.")
                    .at(entry, 2, 5),
            ]
        } else {
            Vec::new()
        };
        Ok(TypeCheckReport::from_diagnostics(diagnostics))
    }
}

#[derive(Default)]
pub struct FakeBundler {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

#[async_trait]
impl Bundler for FakeBundler {
    async fn compile(&self, unit: &CompilationUnit) -> Result<PathBuf, CompileError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(CompileError::Failed {
                entry: unit.entry_path().to_path_buf(),
                errors: vec![Diagnostic::error("Could not resolve \"./x\"").at(
                    unit.entry_path(),
                    1,
                    20,
                )],
            });
        }
        Ok(unit.artifact_path())
    }
}

#[derive(Default)]
pub struct SpawnStats {
    pub spawned: AtomicUsize,
    pub alive: AtomicUsize,
    pub max_alive: AtomicUsize,
    pub terminate_requests: AtomicUsize,
    pub kills: AtomicUsize,
}

impl SpawnStats {
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    pub fn alive(&self) -> usize {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn max_alive(&self) -> usize {
        self.max_alive.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }
}

/// Ends a fake child exactly once.
pub struct ExitSwitch {
    tx: watch::Sender<Option<ExitInfo>>,
    stats: Arc<SpawnStats>,
}

impl ExitSwitch {
    pub fn fire(&self, exit: ExitInfo) {
        let fired = self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(exit);
                true
            } else {
                false
            }
        });
        if fired {
            self.stats.alive.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

pub struct FakeChild {
    pid: u32,
    cooperative: bool,
    switch: Arc<ExitSwitch>,
    exit_rx: watch::Receiver<Option<ExitInfo>>,
    output: Option<ChildOutput>,
}

#[async_trait]
impl ChildHandle for FakeChild {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn terminate(&mut self) -> io::Result<()> {
        self.switch
            .stats
            .terminate_requests
            .fetch_add(1, Ordering::SeqCst);
        if self.cooperative {
            self.switch.fire(ExitInfo::signal(15));
        }
        Ok(())
    }

    fn force_kill(&mut self) -> io::Result<()> {
        self.switch.stats.kills.fetch_add(1, Ordering::SeqCst);
        self.switch.fire(ExitInfo::signal(9));
        Ok(())
    }

    async fn wait(&mut self) -> io::Result<ExitInfo> {
        let exit = self
            .exit_rx
            .wait_for(Option::is_some)
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(exit.unwrap_or_default())
    }

    fn take_output(&mut self) -> ChildOutput {
        self.output.take().unwrap_or_default()
    }
}

pub struct FakeSpawner {
    pub stats: Arc<SpawnStats>,
    /// Children exit on the termination request when set, otherwise only when killed.
    pub cooperative: AtomicBool,
    pub fail: AtomicBool,
    /// Children exit on their own right after start with this code.
    pub exit_immediately: Mutex<Option<i32>>,
    pub stderr: Mutex<Option<&'static [u8]>>,
    switches: Mutex<Vec<Arc<ExitSwitch>>>,
}

impl Default for FakeSpawner {
    fn default() -> Self {
        Self {
            stats: Arc::default(),
            cooperative: AtomicBool::new(true),
            fail: AtomicBool::new(false),
            exit_immediately: Mutex::new(None),
            stderr: Mutex::new(None),
            switches: Mutex::new(Vec::new()),
        }
    }
}

impl FakeSpawner {
    /// Makes the most recently spawned child exit on its own.
    pub fn exit_latest(&self, code: i32) {
        if let Some(switch) = self.switches.lock().unwrap().last() {
            switch.fire(ExitInfo::code(code));
        }
    }
}

impl ProcessSpawner for FakeSpawner {
    fn spawn(&self, artifact: &Path) -> Result<Box<dyn ChildHandle>, SpawnError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SpawnError::Start {
                program: "node".into(),
                artifact: artifact.to_path_buf(),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "permission denied"),
            });
        }
        let stats = self.stats.clone();
        let pid = stats.spawned.fetch_add(1, Ordering::SeqCst) as u32 + 1000;
        let alive = stats.alive.fetch_add(1, Ordering::SeqCst) + 1;
        stats.max_alive.fetch_max(alive, Ordering::SeqCst);

        let (tx, exit_rx) = watch::channel(None);
        let switch = Arc::new(ExitSwitch { tx, stats });
        self.switches.lock().unwrap().push(switch.clone());

        let output = self.stderr.lock().unwrap().map(|stderr| ChildOutput {
            stdout: None,
            stderr: Some(Box::new(stderr)),
        });
        if let Some(code) = *self.exit_immediately.lock().unwrap() {
            switch.fire(ExitInfo::code(code));
        }
        Ok(Box::new(FakeChild {
            pid,
            cooperative: self.cooperative.load(Ordering::SeqCst),
            switch,
            exit_rx,
            output,
        }))
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    pub reports: Mutex<Vec<Report>>,
}

impl RecordingReporter {
    pub fn all(&self) -> Vec<Report> {
        self.reports.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.all()
            .into_iter()
            .filter_map(|r| match r {
                Report::Status(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Report) -> bool) -> usize {
        self.reports.lock().unwrap().iter().filter(|r| pred(r)).count()
    }
}

impl Reporter for RecordingReporter {
    fn report(&self, report: Report) {
        self.reports.lock().unwrap().push(report);
    }
}

pub struct Harness {
    pub checker: Arc<FakeChecker>,
    pub bundler: Arc<FakeBundler>,
    pub spawner: Arc<FakeSpawner>,
    pub reporter: Arc<RecordingReporter>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            checker: Arc::default(),
            bundler: Arc::default(),
            spawner: Arc::default(),
            reporter: Arc::default(),
        }
    }

    pub fn stats(&self) -> &SpawnStats {
        &self.spawner.stats
    }

    /// Builder wired to the fakes: 1 s grace period, 100 ms debounce.
    pub fn builder(&self) -> SupervisorBuilder {
        let config = ToolConfig::resolve(".", |_| None);
        SupervisorBuilder::new(&config, ENTRY)
            .with_checker(self.checker.clone())
            .with_bundler(self.bundler.clone())
            .with_spawner(self.spawner.clone())
            .with_reporter(self.reporter.clone())
            .with_grace_period(Duration::from_millis(1000))
            .with_debounce_window(Duration::from_millis(100))
            .with_stderr_quiet(Duration::from_millis(50))
    }
}
