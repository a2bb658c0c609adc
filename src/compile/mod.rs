//! Compile delegate.
//!
//! Hands source files to the external bundler. Run mode bundles the entry and
//! its local imports into one inline-source-mapped script in the scratch
//! directory; build mode transpiles a single file to its mirrored location.

pub mod build;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::{
    diagnostic::Diagnostic,
    error::CompileError,
    unit::{CompilationUnit, Mode},
};

#[async_trait]
pub trait Bundler: Send + Sync {
    /// Compiles `unit` and returns the path of the written artifact.
    async fn compile(&self, unit: &CompilationUnit) -> Result<PathBuf, CompileError>;
}

/// Bundler backed by the `esbuild` command line tool.
#[derive(Debug, Clone)]
pub struct EsbuildBundler {
    program: PathBuf,
}

impl EsbuildBundler {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, unit: &CompilationUnit, outfile: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(unit.entry_path());
        match unit.mode() {
            Mode::Run => {
                cmd.args(["--bundle", "--sourcemap=inline"]);
            }
            Mode::Build => {
                cmd.arg("--sourcemap");
            }
        }
        cmd.args(["--platform=node", "--format=cjs", "--log-level=error"])
            .arg(format!("--outfile={}", outfile.display()))
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Bundler for EsbuildBundler {
    async fn compile(&self, unit: &CompilationUnit) -> Result<PathBuf, CompileError> {
        let outfile = unit.artifact_path();
        if let Some(parent) = outfile.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| CompileError::Output {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let output = self
            .command(unit, &outfile)
            .output()
            .await
            .map_err(|source| CompileError::Engine {
                program: self.program.display().to_string(),
                source,
            })?;
        debug!(
            entry = %unit.entry_path().display(),
            mode = %unit.mode(),
            status = ?output.status.code(),
            "bundler finished"
        );

        if output.status.success() {
            return Ok(outfile);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut errors: Vec<Diagnostic> = parse_esbuild_errors(&stderr)
            .into_iter()
            .map(Diagnostic::with_frame_from_disk)
            .collect();
        if errors.is_empty() {
            let message = match stderr.trim() {
                "" => format!("bundler exited with {}", output.status),
                raw => raw.to_string(),
            };
            errors.push(Diagnostic::error(message));
        }
        Err(CompileError::Failed {
            entry: unit.entry_path().to_path_buf(),
            errors,
        })
    }
}

const ERROR_MARKERS: &[&str] = &["✘ [ERROR] ", "X [ERROR] ", "[ERROR] "];

/// Parses the error blocks esbuild prints to stderr.
///
/// ```text
/// ✘ [ERROR] Could not resolve "./missing"
///
///     src/index.ts:1:20:
/// ```
///
/// The location line is optional. esbuild columns are 0-based; the returned
/// diagnostics are 1-based.
pub fn parse_esbuild_errors(stderr: &str) -> Vec<Diagnostic> {
    let mut errors = Vec::new();
    let mut current: Option<Diagnostic> = None;
    let mut awaiting_location = false;

    for line in stderr.lines() {
        let trimmed = line.trim();
        if let Some(message) = ERROR_MARKERS
            .iter()
            .find_map(|marker| trimmed.strip_prefix(marker))
        {
            errors.extend(current.take());
            current = Some(Diagnostic::error(message.trim()));
            awaiting_location = true;
            continue;
        }
        if trimmed.contains("[WARNING] ") {
            errors.extend(current.take());
            awaiting_location = false;
            continue;
        }
        if trimmed.is_empty() || !awaiting_location {
            continue;
        }
        awaiting_location = false;
        if let Some((file, line, column)) = parse_location(trimmed) {
            current = current.take().map(|d| d.at(file, line, column + 1));
        }
    }
    errors.extend(current);
    errors
}

/// Parses `path/to/file.ts:12:4:`.
fn parse_location(line: &str) -> Option<(&str, usize, usize)> {
    let body = line.strip_suffix(':')?;
    let mut parts = body.rsplitn(3, ':');
    let column = parts.next()?.parse().ok()?;
    let row = parts.next()?.parse().ok()?;
    let file = parts.next().filter(|f| !f.is_empty())?;
    Some((file, row, column))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_error_with_location() {
        let stderr = "✘ [ERROR] Could not resolve \"./missing\"\n\n    src/index.ts:1:20:\n      1 │ import { x } from \"./missing\";\n        ╵                     ~~~~~~~~~~~\n\n1 error\n";
        let errors = parse_esbuild_errors(stderr);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "Could not resolve \"./missing\"");
        assert_eq!(errors[0].file.as_deref(), Some(Path::new("src/index.ts")));
        assert_eq!((errors[0].line, errors[0].column), (1, 21));
    }

    #[test]
    fn parses_multiple_errors_and_skips_warnings() {
        let stderr = "X [ERROR] Expected \";\" but found \"x\"\n\n    a.ts:2:6:\n\n▲ [WARNING] Duplicate key\n\n    a.ts:9:1:\n\nX [ERROR] Unexpected end of file\n\n    b.ts:7:0:\n";
        let errors = parse_esbuild_errors(stderr);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].file.as_deref(), Some(Path::new("a.ts")));
        assert_eq!(errors[1].message, "Unexpected end of file");
        assert_eq!((errors[1].line, errors[1].column), (7, 1));
    }

    #[test]
    fn error_without_location() {
        let stderr = "✘ [ERROR] Must use \"outdir\" when there are multiple input files\n\n1 error\n";
        let errors = parse_esbuild_errors(stderr);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].file.is_none());
    }

    #[test]
    fn location_parsing() {
        assert_eq!(parse_location("src/a.ts:3:4:"), Some(("src/a.ts", 3, 4)));
        assert_eq!(parse_location("C:/x/a.ts:3:4:"), Some(("C:/x/a.ts", 3, 4)));
        assert_eq!(parse_location("1 │ import x"), None);
    }
}
