//! ghostts CLI - zero-config TypeScript runner
//!
//! Usage: ghostts <COMMAND>
//!
//! Commands:
//!   run     Type-check, compile and run a file (`--watch` to restart on change)
//!   build   Compile every source file of a directory to JavaScript

mod cli;

use std::process::ExitCode;

use clap::Parser;
use crossterm::tty::IsTty;

use cli::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let color = !cli.no_color && std::io::stderr().is_tty();
    ghostts::logging::init_logging(cli.verbose, color);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(cli::dispatch(cli, color)) {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
