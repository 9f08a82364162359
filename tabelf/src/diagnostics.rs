//! Accumulator for data-quality findings gathered during a parse pass.

use std::fmt;

/// Stable numeric identifiers for every finding this crate can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum DiagnosticId {
    /// A section declares a per-record size smaller than its native layout.
    InvalidSectionEntrySize = 1,
    /// A section's file range does not fit inside the image.
    InvalidSectionRange = 2,
    /// Reading a section's records failed part way through.
    SectionReadFailure = 3,
    /// A table that holds string offsets is not linked to a string table.
    InvalidStringTable = 4,
}

impl DiagnosticId {
    pub fn code(self) -> u16 {
        self as u16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub id: DiagnosticId,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            DiagnosticKind::Error => "error",
            DiagnosticKind::Warning => "warning",
        };
        write!(f, "{} ELF{:04}: {}", kind, self.id.code(), self.message)
    }
}

/// An ordered list of [`Diagnostic`]s. Order is detection order.
#[derive(Debug, Default, Clone)]
pub struct DiagnosticBag {
    messages: Vec<Diagnostic>,
}

impl DiagnosticBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error<S: Into<String>>(&mut self, id: DiagnosticId, message: S) {
        self.push(DiagnosticKind::Error, id, message.into());
    }

    pub fn warning<S: Into<String>>(&mut self, id: DiagnosticId, message: S) {
        self.push(DiagnosticKind::Warning, id, message.into());
    }

    fn push(&mut self, kind: DiagnosticKind, id: DiagnosticId, message: String) {
        let diagnostic = Diagnostic { kind, id, message };
        log::warn!("{}", diagnostic);
        self.messages.push(diagnostic);
    }

    pub fn has_errors(&self) -> bool {
        self.messages
            .iter()
            .any(|d| d.kind == DiagnosticKind::Error)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl fmt::Display for DiagnosticBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for diagnostic in &self.messages {
            writeln!(f, "{}", diagnostic)?;
        }

        Ok(())
    }
}
