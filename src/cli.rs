use std::{path::PathBuf, sync::Arc};

use anyhow::{ensure, Context, Result};
use clap::{Parser, Subcommand};

use ghostts::{
    build_project, BuildError, ChangeWatcher, CompileError, Report, Reporter, ShutdownCoordinator,
    SupervisorBuilder, TerminalReporter, ToolConfig, WatchSession,
};

/// ghostts - zero-config TypeScript runner
#[derive(Parser, Debug)]
#[command(name = "ghostts")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Type-check, compile and run a file
    Run {
        /// Entry .ts file
        file: PathBuf,

        /// Restart whenever a source file changes
        #[arg(short, long)]
        watch: bool,

        /// Keep previous output on screen between restarts
        #[arg(long)]
        no_clear: bool,
    },

    /// Compile every source file of a directory to JavaScript
    Build {
        /// Source directory
        src_dir: PathBuf,

        /// Output directory
        #[arg(long, default_value = ghostts::config::DEFAULT_OUT_DIR)]
        outdir: PathBuf,
    },
}

/// Runs the parsed command and returns the process exit code.
pub async fn dispatch(cli: Cli, color: bool) -> Result<i32> {
    let root = std::env::current_dir().context("failed to read current directory")?;
    let config = ToolConfig::from_env(root);
    match cli.command {
        Commands::Run {
            file,
            watch,
            no_clear,
        } => cmd_run(config.with_clear_screen(!no_clear), file, watch, color).await,
        Commands::Build { src_dir, outdir } => cmd_build(&config, src_dir, outdir, color).await,
    }
}

async fn cmd_run(config: ToolConfig, file: PathBuf, watch: bool, color: bool) -> Result<i32> {
    ensure!(file.is_file(), "entry file not found: {}", file.display());

    let coordinator = ShutdownCoordinator::new();
    let _interrupt = coordinator.listen_for_interrupt();
    let reporter = Arc::new(
        TerminalReporter::new(color).with_clear_screen(watch && config.clear_screen),
    );
    let builder = SupervisorBuilder::new(&config, &file)
        .with_reporter(reporter.clone())
        .with_shutdown(coordinator.register());

    if !watch {
        return Ok(builder.build().run_once().await?);
    }

    let session = WatchSession::for_entry(&file, &config.root)
        .with_debounce_window(config.debounce_window);
    let builder = builder.with_watch_session(&session);
    let changes = ChangeWatcher::watch(session).context("failed to start file watcher")?;
    builder.build().run(changes).wait().await?;

    reporter.report(Report::status("Goodbye!"));
    Ok(0)
}

async fn cmd_build(
    config: &ToolConfig,
    src_dir: PathBuf,
    outdir: PathBuf,
    color: bool,
) -> Result<i32> {
    let reporter = TerminalReporter::new(color);
    let bundler = config.bundler();
    match build_project(&src_dir, &outdir, bundler.as_ref(), &reporter).await {
        Ok(_) => Ok(0),
        Err(BuildError::Compile(CompileError::Failed { entry, errors })) => {
            reporter.report(Report::CompileFailed { entry, errors });
            Ok(1)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_with_watch_flag() {
        let cli = Cli::try_parse_from(["ghostts", "run", "src/index.ts", "-w"]).unwrap();
        match cli.command {
            Commands::Run { file, watch, no_clear } => {
                assert_eq!(file, PathBuf::from("src/index.ts"));
                assert!(watch);
                assert!(!no_clear);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn build_defaults_to_dist() {
        let cli = Cli::try_parse_from(["ghostts", "build", "src"]).unwrap();
        match cli.command {
            Commands::Build { src_dir, outdir } => {
                assert_eq!(src_dir, PathBuf::from("src"));
                assert_eq!(outdir, PathBuf::from("./dist"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn run_requires_a_file() {
        assert!(Cli::try_parse_from(["ghostts", "run"]).is_err());
    }
}
