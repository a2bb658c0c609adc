//! Type-check gate.
//!
//! Runs the external checker against an entry file and turns its output into
//! [`Diagnostic`]s. Type errors in the user's program are a normal verdict;
//! only an engine that cannot be started is an error.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::{
    diagnostic::{Diagnostic, Severity},
    error::CheckError,
};

/// Verdict of one type-check pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeCheckReport {
    pub success: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl TypeCheckReport {
    /// Succeeds iff no diagnostic has `Error` severity.
    pub fn from_diagnostics(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            success: !diagnostics.iter().any(Diagnostic::is_error),
            diagnostics,
        }
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }
}

#[async_trait]
pub trait TypeChecker: Send + Sync {
    /// Checks `entry` and everything it imports. Safe to call repeatedly.
    async fn check(&self, entry: &Path) -> Result<TypeCheckReport, CheckError>;
}

/// Type checker backed by the `tsc` command line compiler.
#[derive(Debug, Clone)]
pub struct TscChecker {
    program: PathBuf,
}

impl TscChecker {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, entry: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args([
            "--noEmit",
            "--pretty",
            "false",
            "--strict",
            "--target",
            "ES2020",
            "--module",
            "commonjs",
            "--esModuleInterop",
            "--allowSyntheticDefaultImports",
            "--skipLibCheck",
        ])
        .arg(entry)
        .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl TypeChecker for TscChecker {
    async fn check(&self, entry: &Path) -> Result<TypeCheckReport, CheckError> {
        let output = self
            .command(entry)
            .output()
            .await
            .map_err(|source| CheckError::Engine {
                program: self.program.display().to_string(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut diagnostics: Vec<Diagnostic> = parse_tsc_output(&stdout)
            .into_iter()
            .map(Diagnostic::with_frame_from_disk)
            .collect();
        debug!(
            entry = %entry.display(),
            status = ?output.status.code(),
            count = diagnostics.len(),
            "type check finished"
        );

        if !output.status.success() && !diagnostics.iter().any(Diagnostic::is_error) {
            // Non-zero exit without anything we could parse still fails the gate.
            let stderr = String::from_utf8_lossy(&output.stderr);
            let raw = [stdout.trim(), stderr.trim()]
                .into_iter()
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            let message = if raw.is_empty() {
                format!("type checker exited with {}", output.status)
            } else {
                raw
            };
            diagnostics.push(Diagnostic::error(message));
        }

        Ok(TypeCheckReport::from_diagnostics(diagnostics))
    }
}

/// Parses `tsc --pretty false` output.
///
/// Located lines look like `src/a.ts(3,7): error TS2322: message`; global ones
/// like `error TS6053: message`. Indented lines continue the previous message.
pub fn parse_tsc_output(output: &str) -> Vec<Diagnostic> {
    let mut diagnostics: Vec<Diagnostic> = Vec::new();
    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if line.starts_with(char::is_whitespace) {
            if let Some(last) = diagnostics.last_mut() {
                last.message.push('\n');
                last.message.push_str(line.trim_end());
            }
            continue;
        }
        if let Some(diagnostic) = parse_located(line).or_else(|| parse_global(line)) {
            diagnostics.push(diagnostic);
        }
    }
    diagnostics
}

fn parse_located(line: &str) -> Option<Diagnostic> {
    for (idx, _) in line.match_indices("): ") {
        let head = &line[..idx];
        let Some(open) = head.rfind('(') else {
            continue;
        };
        let Some((row, col)) = head[open + 1..].split_once(',') else {
            continue;
        };
        let (Ok(row), Ok(col)) = (row.parse::<usize>(), col.parse::<usize>()) else {
            continue;
        };
        let (severity, message) = parse_category(&line[idx + 3..])?;
        let diagnostic = match severity {
            Severity::Error => Diagnostic::error(message),
            Severity::Warning => Diagnostic::warning(message),
        };
        return Some(diagnostic.at(&head[..open], row, col));
    }
    None
}

fn parse_global(line: &str) -> Option<Diagnostic> {
    let (severity, message) = parse_category(line)?;
    Some(match severity {
        Severity::Error => Diagnostic::error(message),
        Severity::Warning => Diagnostic::warning(message),
    })
}

/// Splits `error TS2322: message` into severity and message.
fn parse_category(rest: &str) -> Option<(Severity, String)> {
    let (category, rest) = rest.split_once(' ')?;
    let severity = match category {
        "error" => Severity::Error,
        "warning" | "suggestion" | "message" => Severity::Warning,
        _ => return None,
    };
    let (code, message) = rest.split_once(": ")?;
    if !code.starts_with("TS") {
        return None;
    }
    Some((severity, message.trim_end().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_located_error() {
        let out = "src/index.ts(3,7): error TS2322: Type 'string' is not assignable to type 'number'.\n";
        let diagnostics = parse_tsc_output(out);
        assert_eq!(diagnostics.len(), 1);
        let d = &diagnostics[0];
        assert_eq!(d.severity, Severity::Error);
        assert_eq!(d.file.as_deref(), Some(Path::new("src/index.ts")));
        assert_eq!((d.line, d.column), (3, 7));
        assert_eq!(d.message, "Type 'string' is not assignable to type 'number'.");
    }

    #[test]
    fn continuation_lines_extend_the_message() {
        let out = "a.ts(1,1): error TS2345: Argument is wrong.\n  Type 'x' is missing.\nb.ts(2,4): error TS1005: ';' expected.\n";
        let diagnostics = parse_tsc_output(out);
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(
            diagnostics[0].message,
            "Argument is wrong.\n  Type 'x' is missing."
        );
        assert_eq!(diagnostics[1].file.as_deref(), Some(Path::new("b.ts")));
    }

    #[test]
    fn parses_global_error_and_paths_with_parentheses() {
        let out = "error TS6053: File 'missing.ts' not found.\nsrc/(group)/page.ts(10,2): error TS2304: Cannot find name 'x'.\n";
        let diagnostics = parse_tsc_output(out);
        assert_eq!(diagnostics.len(), 2);
        assert!(diagnostics[0].file.is_none());
        assert_eq!(
            diagnostics[1].file.as_deref(),
            Some(Path::new("src/(group)/page.ts"))
        );
        assert_eq!((diagnostics[1].line, diagnostics[1].column), (10, 2));
    }

    #[test]
    fn unrelated_lines_are_ignored() {
        assert!(parse_tsc_output("Version 5.4.5\n\nFound 0 errors.\n").is_empty());
    }

    #[test]
    fn warnings_do_not_fail_the_report() {
        let report = TypeCheckReport::from_diagnostics(vec![Diagnostic::warning("unused")]);
        assert!(report.success);
        assert_eq!(report.errors().count(), 0);

        let report = TypeCheckReport::from_diagnostics(vec![Diagnostic::error("bad")]);
        assert!(!report.success);
    }
}
