//! Human-readable rendering of diagnostics and runtime stack traces.
//!
//! Everything here is a pure function from data to text. Colour is applied
//! only when `supports_color` is set.

use std::path::Path;

use crossterm::style::{Color, Stylize};

use crate::diagnostic::{Diagnostic, Severity, SourceFrame};

const ERROR: Color = Color::Red;
const WARNING: Color = Color::Yellow;
const LOCATION: Color = Color::Blue;
const POSITION: Color = Color::Yellow;
const DIM: Color = Color::DarkGrey;

/// Left margin before the line number column.
const MARGIN: &str = "  ";
/// Separator between the line number column and the source text.
const SEPARATOR: &str = " | ";

#[derive(Debug, Clone, Copy, Default)]
pub struct DiagnosticFormatter {
    supports_color: bool,
}

impl DiagnosticFormatter {
    pub fn new(supports_color: bool) -> Self {
        Self { supports_color }
    }

    /// Renders one diagnostic with its location and code frame.
    ///
    /// ```text
    /// error: Type 'string' is not assignable to type 'number'.
    ///   src/index.ts:2:17
    ///    1 | let a = 1;
    ///    2 | let b: number = "x";
    ///                        ^
    ///    3 | console.log(a, b);
    /// ```
    pub fn diagnostic(&self, diagnostic: &Diagnostic) -> String {
        let (label, color) = match diagnostic.severity {
            Severity::Error => ("error", ERROR),
            Severity::Warning => ("warning", WARNING),
        };
        let mut out = format!(
            "{}: {}\n",
            self.paint_bold(label, color),
            diagnostic.message
        );

        let Some(file) = diagnostic.file.as_deref() else {
            return out;
        };
        out.push_str(&format!(
            "{MARGIN}{}:{}:{}\n",
            self.paint(&file.display().to_string(), LOCATION),
            self.paint(&diagnostic.line.to_string(), POSITION),
            self.paint(&diagnostic.column.to_string(), POSITION),
        ));

        if let Some(frame) = &diagnostic.frame {
            out.push_str(&self.code_frame(frame, diagnostic.column));
        }
        out
    }

    /// Renders all location-tagged errors of a failed compilation.
    pub fn compile_error(&self, entry: &Path, errors: &[Diagnostic]) -> String {
        let mut out = format!(
            "{} {}\n",
            self.paint_bold("failed to compile", ERROR),
            entry.display()
        );
        for error in errors {
            out.push('\n');
            out.push_str(&self.diagnostic(error));
        }
        out
    }

    /// Renders raw stderr text of a crashed program.
    ///
    /// The error message line is emphasised, stack frames (`at ...`) are
    /// dimmed and anything else passes through untouched. A leading source
    /// excerpt as printed by node (`file:line`, code, caret, blank line) is
    /// kept as is and the message is the first line after it.
    pub fn runtime_error(&self, raw: &str) -> String {
        let lines: Vec<&str> = raw
            .trim_end_matches(['\r', '\n'])
            .split('\n')
            .map(|line| line.trim_end_matches('\r'))
            .collect();
        let message = message_line(&lines);

        let mut out = self.paint_bold("Runtime Error:", ERROR);
        for (idx, line) in lines.into_iter().enumerate() {
            out.push('\n');
            if idx == message {
                out.push_str(&self.paint_bold(line, ERROR));
            } else if is_stack_frame(line) {
                out.push_str(&self.paint(line, DIM));
            } else {
                out.push_str(line);
            }
        }
        out.push('\n');
        out
    }

    fn code_frame(&self, frame: &SourceFrame, column: usize) -> String {
        let width = (frame.line + 1).to_string().len().max(2);
        let gutter = |n: usize| format!("{MARGIN}{n:>width$}{SEPARATOR}");

        let mut out = String::new();
        if let Some(before) = &frame.before {
            out.push_str(&self.paint(&format!("{}{before}", gutter(frame.line - 1)), DIM));
            out.push('\n');
        }
        out.push_str(&format!(
            "{MARGIN}{}{SEPARATOR}{}\n",
            self.paint(&format!("{:>width$}", frame.line), POSITION),
            frame.current
        ));
        let pad = MARGIN.len() + width + SEPARATOR.len() + column.saturating_sub(1);
        out.push_str(&format!("{}{}\n", " ".repeat(pad), self.paint("^", ERROR)));
        if let Some(after) = &frame.after {
            out.push_str(&self.paint(&format!("{}{after}", gutter(frame.line + 1)), DIM));
            out.push('\n');
        }
        out
    }

    fn paint(&self, s: &str, color: Color) -> String {
        if !self.supports_color {
            return s.to_string();
        }
        format!("{}", s.with(color))
    }

    fn paint_bold(&self, s: &str, color: Color) -> String {
        if !self.supports_color {
            return s.to_string();
        }
        format!("{}", s.with(color).bold())
    }
}

/// Index of the line carrying the error message.
fn message_line(lines: &[&str]) -> usize {
    if !lines.first().is_some_and(|first| is_source_location(first)) {
        return 0;
    }
    let Some(blank) = lines.iter().position(|line| line.trim().is_empty()) else {
        return 0;
    };
    lines
        .iter()
        .skip(blank)
        .position(|line| !line.trim().is_empty())
        .map_or(0, |offset| blank + offset)
}

/// `path:line` as node prints it above the offending source line.
fn is_source_location(line: &str) -> bool {
    line.rsplit_once(':').is_some_and(|(path, row)| {
        !path.trim().is_empty() && !row.is_empty() && row.bytes().all(|b| b.is_ascii_digit())
    })
}

fn is_stack_frame(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed == "at" || trimmed.starts_with("at ")
}
