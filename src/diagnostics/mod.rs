//! Diagnostics for problems in the compiled program.
//!
//! A diagnosable error does not stop compilation: the reporter collects it,
//! downstream stages keep running on a poison type or an unchanged subtree,
//! and the driver suppresses the main unit at the end.

mod reporter;

pub use reporter::DiagnosticReporter;

use crate::error::InternalError;
use crate::types::OverloadError;
use colored::Colorize;
use std::fmt;

/// Location in source code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub length: usize,
}

impl SourceLocation {
    pub fn new(file: &str, line: usize, column: usize, length: usize) -> Self {
        Self {
            file: file.to_string(),
            line,
            column,
            length,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Severity level of a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Error,
    Warning,
    Note,
    Help,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticLevel::Error => write!(f, "{}", "error".red().bold()),
            DiagnosticLevel::Warning => write!(f, "{}", "warning".yellow().bold()),
            DiagnosticLevel::Note => write!(f, "{}", "note".cyan().bold()),
            DiagnosticLevel::Help => write!(f, "{}", "help".green().bold()),
        }
    }
}

/// A compiler diagnostic with rich context
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub code: String,
    pub message: String,
    pub location: Option<SourceLocation>,
    pub source_line: Option<String>,
    pub labels: Vec<(usize, usize, String)>, // (column, length, label)
    pub help: Option<String>,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            code: code.to_string(),
            message: message.into(),
            location: None,
            source_line: None,
            labels: Vec::new(),
            help: None,
            notes: Vec::new(),
        }
    }

    /// A compiler defect surfaced to the user.
    pub fn internal(err: &InternalError) -> Self {
        Self::error(codes::INTERNAL_ERROR, format!("internal compiler error: {}", err))
            .with_help("this is a bug in the compiler, not in the module being compiled")
    }

    pub fn from_overload(err: &OverloadError) -> Self {
        let code = match err {
            OverloadError::NoMatch { .. } => codes::NO_MATCHING_OVERLOAD,
            OverloadError::Ambiguous { .. } => codes::AMBIGUOUS_OVERLOAD,
        };
        err.notes()
            .into_iter()
            .fold(Self::error(code, err.to_string()), |d, note| d.with_note(note))
    }

    pub fn warning(code: &str, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Warning,
            code: code.to_string(),
            message: message.into(),
            location: None,
            source_line: None,
            labels: Vec::new(),
            help: None,
            notes: Vec::new(),
        }
    }

    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_source_line(mut self, line: impl Into<String>) -> Self {
        self.source_line = Some(line.into());
        self
    }

    pub fn with_label(mut self, column: usize, length: usize, label: impl Into<String>) -> Self {
        self.labels.push((column, length, label.into()));
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn is_error(&self) -> bool {
        matches!(self.level, DiagnosticLevel::Error)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Header: error[E001]: message
        writeln!(f, "{}[{}]: {}", self.level, self.code.cyan(), self.message)?;

        // Location arrow
        if let Some(ref loc) = self.location {
            let line_num_width = loc.line.to_string().len();
            let padding = " ".repeat(line_num_width);

            writeln!(f, "{}--> {}", padding, loc.to_string().blue())?;
            writeln!(f, "{} {}", padding, "|".blue())?;

            // Source line with line number
            if let Some(ref source) = self.source_line {
                writeln!(f, "{} {} {}", 
                    loc.line.to_string().blue().bold(),
                    "|".blue(),
                    source
                )?;

                // Underlines and labels
                for (column, length, label) in &self.labels {
                    let underline_padding = " ".repeat(column.saturating_sub(1));
                    let underline = "^".repeat(*length);
                    
                    let colored_underline = match self.level {
                        DiagnosticLevel::Error => underline.red().bold().to_string(),
                        DiagnosticLevel::Warning => underline.yellow().bold().to_string(),
                        _ => underline.cyan().to_string(),
                    };

                    let colored_label = match self.level {
                        DiagnosticLevel::Error => label.red().to_string(),
                        DiagnosticLevel::Warning => label.yellow().to_string(),
                        _ => label.cyan().to_string(),
                    };

                    writeln!(f, "{} {} {}{} {}", 
                        padding,
                        "|".blue(),
                        underline_padding,
                        colored_underline,
                        colored_label
                    )?;
                }
            }

            writeln!(f, "{} {}", padding, "|".blue())?;
        }

        // Help message
        if let Some(ref help) = self.help {
            writeln!(f, "   {} {}: {}", "=".blue(), "help".green().bold(), help)?;
        }

        // Notes
        for note in &self.notes {
            writeln!(f, "   {} {}: {}", "=".blue(), "note".cyan().bold(), note)?;
        }

        Ok(())
    }
}

/// Error codes for compiler diagnostics
pub mod codes {
    // Input errors (E0xx)
    pub const INVALID_INPUT: &str = "E001";
    pub const UNREADABLE_INPUT: &str = "E002";

    // Type errors (E2xx)
    pub const TYPE_MISMATCH: &str = "E200";
    pub const NO_MATCHING_OVERLOAD: &str = "E201";
    pub const AMBIGUOUS_OVERLOAD: &str = "E202";
    pub const INVALID_COERCION: &str = "E203";
    pub const NOT_CALLABLE: &str = "E206";
    pub const ARGUMENT_COUNT_MISMATCH: &str = "E208";

    // Constructs the C target cannot express (E3xx)
    pub const UNSUPPORTED_CONSTRUCT: &str = "E300";

    // Compiler defects (E9xx)
    pub const INTERNAL_ERROR: &str = "E900";

    // Warning codes (W0xx)
    pub const UNREACHABLE_CODE: &str = "W004";
}
