//! Diagnostic reporter that collects and manages diagnostics.

use super::{Diagnostic, SourceLocation};
use crate::ast::Pos;
use std::collections::HashMap;

/// Collects diagnostics during compilation
#[derive(Debug, Default)]
pub struct DiagnosticReporter {
    diagnostics: Vec<Diagnostic>,
    files: Vec<String>,
    sources: HashMap<usize, Vec<String>>, // file index -> lines
}

impl DiagnosticReporter {
    /// `files` is the module's filename table; positions index into it.
    pub fn new(files: &[String]) -> Self {
        Self {
            diagnostics: Vec::new(),
            files: files.to_vec(),
            sources: HashMap::new(),
        }
    }

    /// Makes source text available so reports can quote the offending line.
    pub fn with_source(mut self, file: usize, source: &str) -> Self {
        self.sources.insert(file, source.lines().map(str::to_string).collect());
        self
    }

    pub fn location(&self, pos: Pos) -> SourceLocation {
        let file = self
            .files
            .get(pos.file)
            .cloned()
            .unwrap_or_else(|| "<unknown>".to_string());
        SourceLocation::new(&file, pos.line, pos.col, 1)
    }

    /// Get a specific line's content
    pub fn get_line(&self, pos: Pos) -> Option<&str> {
        let lines = self.sources.get(&pos.file)?;
        if pos.line == 0 {
            return None;
        }
        lines.get(pos.line - 1).map(String::as_str)
    }

    /// Report a diagnostic at a source position
    pub fn report(&mut self, diagnostic: Diagnostic, pos: Pos) {
        self.report_with_label(diagnostic, pos, 1, "");
    }

    /// Report a diagnostic with custom label
    pub fn report_with_label(&mut self, mut diagnostic: Diagnostic, pos: Pos, length: usize, label: &str) {
        let mut loc = self.location(pos);
        loc.length = length;

        if let Some(line) = self.get_line(pos) {
            let line = line.to_string();
            diagnostic = diagnostic
                .with_source_line(line)
                .with_label(loc.column, length, label);
        }
        self.diagnostics.push(diagnostic.with_location(loc));
    }

    /// Add a raw diagnostic (already formatted)
    pub fn add(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// Check if there are any errors
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.is_error())
    }

    /// Get error count
    pub fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_error()).count()
    }

    /// Consume and return all diagnostics
    pub fn take_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    /// Get reference to diagnostics
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::codes;

    #[test]
    fn quotes_source_when_available() {
        let mut reporter = DiagnosticReporter::new(&["m.pyx".to_string()]).with_source(0, "x = 1\ny = f(x)\n");
        reporter.report(Diagnostic::error(codes::TYPE_MISMATCH, "bad"), Pos::new(0, 2, 5));
        let d = &reporter.diagnostics()[0];
        assert_eq!(d.source_line.as_deref(), Some("y = f(x)"));
        assert_eq!(d.location.as_ref().map(|l| l.file.as_str()), Some("m.pyx"));
        assert!(reporter.has_errors());
    }
}
