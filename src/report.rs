//! The single reporting path every failure and every piece of program output
//! goes through.

use std::{
    io::Write,
    path::PathBuf,
    sync::Mutex,
};

use crossterm::{
    cursor::MoveTo,
    execute,
    terminal::{Clear, ClearType},
};

use crate::{diagnostic::Diagnostic, format::DiagnosticFormatter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    /// Progress information for the user.
    Status(String),
    /// Type-check diagnostics; errors when the gate failed, otherwise warnings.
    Diagnostics(Vec<Diagnostic>),
    /// Location-tagged errors of a failed compilation.
    CompileFailed {
        entry: PathBuf,
        errors: Vec<Diagnostic>,
    },
    /// Bytes the child wrote to stdout, passed through verbatim.
    Stdout(Vec<u8>),
    /// A block of text the child wrote to stderr.
    Stderr(String),
    /// The compiled artifact could not be started.
    SpawnFailed(String),
    /// Start of a new watch cycle.
    ClearScreen,
}

impl Report {
    pub fn status(message: impl Into<String>) -> Self {
        Self::Status(message.into())
    }
}

pub trait Reporter: Send + Sync {
    fn report(&self, report: Report);
}

/// Writes reports to the process' stdout and stderr.
#[derive(Debug)]
pub struct TerminalReporter {
    formatter: DiagnosticFormatter,
    clear_screen: bool,
    // Serialises writes from the stdout and stderr forwarding tasks.
    lock: Mutex<()>,
}

impl TerminalReporter {
    pub fn new(supports_color: bool) -> Self {
        Self {
            formatter: DiagnosticFormatter::new(supports_color),
            clear_screen: false,
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_clear_screen(mut self, clear_screen: bool) -> Self {
        self.clear_screen = clear_screen;
        self
    }
}

impl Reporter for TerminalReporter {
    fn report(&self, report: Report) {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut stdout = std::io::stdout().lock();
        let mut stderr = std::io::stderr().lock();
        // Nothing sensible can be done when the terminal itself is gone.
        let _ = match report {
            Report::Status(message) => writeln!(stdout, "{message}"),
            Report::Diagnostics(diagnostics) => diagnostics
                .iter()
                .try_for_each(|d| writeln!(stderr, "{}", self.formatter.diagnostic(d))),
            Report::CompileFailed { entry, errors } => {
                writeln!(stderr, "{}", self.formatter.compile_error(&entry, &errors))
            }
            Report::Stdout(bytes) => stdout.write_all(&bytes).and_then(|()| stdout.flush()),
            Report::Stderr(text) => write!(stderr, "{}", self.formatter.runtime_error(&text)),
            Report::SpawnFailed(message) => writeln!(stderr, "error: {message}"),
            Report::ClearScreen if self.clear_screen => {
                execute!(stdout, Clear(ClearType::All), MoveTo(0, 0))
            }
            Report::ClearScreen => Ok(()),
        };
    }
}
