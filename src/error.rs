use std::path::PathBuf;

use thiserror::Error;

use crate::diagnostic::Diagnostic;

pub type Result<T> = std::result::Result<T, Error>;

/// The type-checking engine could not be invoked at all.
///
/// Type errors in the checked program are not errors of the gate; they come
/// back as diagnostics.
#[derive(Error, Debug)]
pub enum CheckError {
    #[error("failed to invoke type checker `{program}`: {source}")]
    Engine {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// The bundler rejected the input, or could not be invoked.
#[derive(Error, Debug)]
pub enum CompileError {
    /// Location-tagged failures reported by the bundler.
    #[error("compilation of {} failed with {} error(s)", .entry.display(), .errors.len())]
    Failed {
        entry: PathBuf,
        errors: Vec<Diagnostic>,
    },

    #[error("failed to invoke bundler `{program}`: {source}")]
    Engine {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to prepare output {}: {source}", .path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CompileError {
    /// Engine failures are fatal to the tool; everything else is reported.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Engine { .. })
    }
}

/// The compiled artifact could not be started.
#[derive(Error, Debug)]
pub enum SpawnError {
    #[error("failed to start `{program}` for {}: {source}", .artifact.display())]
    Start {
        program: String,
        artifact: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("failed to create file watcher: {0}")]
    Create(#[source] notify::Error),

    #[error("failed to watch {}: {source}", .path.display())]
    Path {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("source directory not found: {}", .0.display())]
    MissingSourceDir(PathBuf),

    #[error("failed to clean output directory {}: {source}", .path.display())]
    Clean {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to scan {}: {source}", .path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: ignore::Error,
    },

    #[error(transparent)]
    Compile(#[from] CompileError),
}

/// Errors that end the tool itself rather than a single cycle.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Check(#[from] CheckError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
