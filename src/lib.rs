//! # 👻 ghostts
//!
//! `ghostts` runs TypeScript files without any setup. It type-checks the
//! entry file, bundles it, executes the result with `node`, and in watch mode
//! restarts the program every time a source file changes.
//!
//! ## Install
//!
//! ```bash
//! cargo install ghostts
//! ```
//!
//! The type checker (`tsc`), bundler (`esbuild`) and runtime (`node`) are
//! external programs. They are taken from `node_modules/.bin` when present,
//! from `PATH` otherwise, and can be overridden with `GHOSTTS_TSC`,
//! `GHOSTTS_ESBUILD` and `GHOSTTS_NODE`.
//!
//! ## Usage
//!
//! ```bash
//! ghostts run src/index.ts           # check, compile, run once
//! ghostts run src/index.ts --watch   # restart on every change
//! ghostts build src --outdir dist    # one .js + .js.map per source file
//! ```
//!
//! ## Embedding
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ghostts::{ToolConfig, TerminalReporter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ghostts::Error> {
//!     let config = ToolConfig::from_env(std::env::current_dir()?);
//!     let reporter = Arc::new(TerminalReporter::new(true));
//!     let code = ghostts::run_file(&config, "src/index.ts", reporter).await?;
//!     std::process::exit(code);
//! }
//! ```
//!
//! ## What you get
//!
//! * **One child at a time** – the previous program is always gone before the next one starts.
//! * **Graceful restarts** – `SIGTERM` first, `SIGKILL` only after a 1 s grace period.
//! * **Readable failures** – type errors and bundler errors with code frames, runtime stack traces with the noise dimmed.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

pub use check::{TscChecker, TypeCheckReport, TypeChecker};
pub use compile::{build::build_project, Bundler, EsbuildBundler};
pub use config::ToolConfig;
pub use diagnostic::{Diagnostic, Severity, SourceFrame};
pub use error::{BuildError, CheckError, CompileError, Error, Result, SpawnError, WatchError};
pub use format::DiagnosticFormatter;
pub use process::{
    terminate_child, ChildHandle, ChildOutput, ExitInfo, NodeSpawner, ProcessSpawner,
    ProcessState, SupervisedProcess, Termination,
};
pub use report::{Report, Reporter, TerminalReporter};
pub use shutdown::ShutdownCoordinator;
pub use supervisor::{
    builder::SupervisorBuilder,
    handle::{SupervisorHandle, SupervisorHandleError},
    CycleOutcome, Supervisor, SupervisorState, SupervisorStatus,
};
pub use unit::{CompilationUnit, Mode};
pub use watch::{ChangeStream, ChangeWatcher, WatchEvent, WatchSession};

pub mod check;
pub mod compile;
pub mod config;
pub mod diagnostic;
pub mod error;
pub mod format;
pub mod logging;
pub mod process;
pub mod report;
pub mod shutdown;
mod supervisor;
pub mod unit;
pub mod watch;

/// Type-checks, compiles and runs `entry` once.
///
/// Returns the exit code the tool should end with.
pub async fn run_file(
    config: &ToolConfig,
    entry: impl Into<PathBuf>,
    reporter: Arc<dyn Reporter>,
) -> Result<i32> {
    SupervisorBuilder::new(config, entry)
        .with_reporter(reporter)
        .build()
        .run_once()
        .await
}

/// Bundles `entry` into the scratch directory and returns the artifact path.
pub async fn compile_file(config: &ToolConfig, entry: &Path) -> Result<PathBuf> {
    let unit = CompilationUnit::run(entry, &config.scratch_dir);
    Ok(config.bundler().compile(&unit).await?)
}
