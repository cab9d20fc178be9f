//! Compiler diagnostics.
//!
//! The DSL is consumed as an already-built AST, so diagnostics carry no
//! source spans; they name the offending construct instead.

/// A compiler diagnostic (error or warning).
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub notes: Vec<String>,
    pub help: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl Diagnostic {
    pub fn error(message: String) -> Self {
        Self {
            severity: Severity::Error,
            message,
            notes: Vec::new(),
            help: None,
        }
    }

    pub fn warning(message: String) -> Self {
        Self {
            severity: Severity::Warning,
            message,
            notes: Vec::new(),
            help: None,
        }
    }

    pub fn with_note(mut self, note: String) -> Self {
        self.notes.push(note);
        self
    }

    pub fn with_help(mut self, help: String) -> Self {
        self.help = Some(help);
        self
    }

    /// Render the diagnostic to stderr.
    pub fn render(&self) {
        let tag = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        eprintln!("{}: {}", tag, self.message);
        for note in &self.notes {
            eprintln!("  note: {}", note);
        }
        if let Some(help) = &self.help {
            eprintln!("  help: {}", help);
        }
    }
}

/// Render a list of diagnostics.
pub fn render_diagnostics(diagnostics: &[Diagnostic]) {
    for diag in diagnostics {
        diag.render();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let d = Diagnostic::error("unsupported construct".to_string());
        assert_eq!(d.severity, Severity::Error);
        assert!(d.notes.is_empty());
        assert!(d.help.is_none());
    }

    #[test]
    fn test_chained_builders() {
        let d = Diagnostic::warning("shadowed result variable".to_string())
            .with_note("user declaration kept".to_string())
            .with_help("rename the local or return it explicitly".to_string());
        assert_eq!(d.severity, Severity::Warning);
        assert_eq!(d.notes.len(), 1);
        assert!(d.help.is_some());
    }

    #[test]
    fn test_render_does_not_panic() {
        let d = Diagnostic::warning("w".to_string()).with_note("n".to_string());
        d.render();
        render_diagnostics(&[d]);
    }
}
