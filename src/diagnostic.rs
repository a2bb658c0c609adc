use std::path::{Path, PathBuf};

/// How serious a diagnostic is. Only `Error` blocks compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    pub fn is_error(&self) -> bool {
        matches!(self, Severity::Error)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// The three source lines around a reported position.
///
/// `line` is 1-based and refers to `current`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceFrame {
    pub line: usize,
    pub before: Option<String>,
    pub current: String,
    pub after: Option<String>,
}

impl SourceFrame {
    /// Cuts a frame around the 1-based `line` out of `text`.
    ///
    /// Returns `None` when `line` is out of range.
    pub fn from_text(text: &str, line: usize) -> Option<Self> {
        if line == 0 {
            return None;
        }
        let lines: Vec<&str> = text.lines().collect();
        let current = lines.get(line - 1)?;
        Some(Self {
            line,
            before: (line >= 2).then(|| lines[line - 2].to_string()),
            current: current.to_string(),
            after: lines.get(line).map(|l| l.to_string()),
        })
    }

    /// Reads `path` and cuts a frame around `line`. Unreadable files yield `None`.
    pub fn read(path: &Path, line: usize) -> Option<Self> {
        let text = std::fs::read_to_string(path).ok()?;
        Self::from_text(&text, line)
    }
}

/// A location-tagged message produced by the type checker or the bundler.
///
/// `line` and `column` are 1-based. A diagnostic without a file carries no
/// position and no frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub file: Option<PathBuf>,
    pub line: usize,
    pub column: usize,
    pub message: String,
    pub frame: Option<SourceFrame>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            file: None,
            line: 0,
            column: 0,
            message: message.into(),
            frame: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(message)
        }
    }

    #[must_use]
    pub fn at(mut self, file: impl Into<PathBuf>, line: usize, column: usize) -> Self {
        self.file = Some(file.into());
        self.line = line;
        self.column = column;
        self
    }

    #[must_use]
    pub fn with_frame(mut self, frame: Option<SourceFrame>) -> Self {
        self.frame = frame;
        self
    }

    /// Loads the code frame from disk if the diagnostic points into a file.
    #[must_use]
    pub fn with_frame_from_disk(self) -> Self {
        let frame = self
            .file
            .as_deref()
            .and_then(|file| SourceFrame::read(file, self.line));
        self.with_frame(frame)
    }

    pub fn is_error(&self) -> bool {
        self.severity.is_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "let a = 1;\nlet b: number = \"x\";\nconsole.log(a, b);\n";

    #[test]
    fn frame_in_the_middle_has_both_neighbours() {
        let frame = SourceFrame::from_text(SOURCE, 2).unwrap();
        assert_eq!(frame.before.as_deref(), Some("let a = 1;"));
        assert_eq!(frame.current, "let b: number = \"x\";");
        assert_eq!(frame.after.as_deref(), Some("console.log(a, b);"));
    }

    #[test]
    fn frame_on_first_and_last_line() {
        let first = SourceFrame::from_text(SOURCE, 1).unwrap();
        assert!(first.before.is_none());
        let last = SourceFrame::from_text(SOURCE, 3).unwrap();
        assert!(last.after.is_none());
    }

    #[test]
    fn frame_out_of_range() {
        assert!(SourceFrame::from_text(SOURCE, 0).is_none());
        assert!(SourceFrame::from_text(SOURCE, 4).is_none());
    }

    #[test]
    fn warnings_do_not_count_as_errors() {
        assert!(Diagnostic::error("bad").is_error());
        assert!(!Diagnostic::warning("meh").is_error());
    }
}
