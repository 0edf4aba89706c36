//! Structured diagnostic messages with severity, code and property trace.

use crate::code::DiagnosticCode;
use crate::severity::Severity;
use serde::{Deserialize, Serialize};

/// A structured problem report produced while encoding or decoding.
///
/// The `trace` is the human-readable breadcrumb of the value being processed
/// when the problem was found, e.g. `field 'output' of bean 'CompileTask'`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Whether the entry may still be stored.
    pub severity: Severity,
    /// Kind of problem.
    pub code: DiagnosticCode,
    /// One-line description.
    pub message: String,
    /// Where in the object graph the problem was found.
    pub trace: Option<String>,
    /// Extra context lines.
    pub notes: Vec<String>,
    /// Suggested fixes.
    pub help: Vec<String>,
}

impl Diagnostic {
    /// Creates a diagnostic with an explicit severity.
    pub fn new(severity: Severity, code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            severity,
            code,
            message: message.into(),
            trace: None,
            notes: Vec::new(),
            help: Vec::new(),
        }
    }

    /// A problem that blocks storing the entry.
    pub fn error(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, code, message)
    }

    /// A degradation the entry survives.
    pub fn warning(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, code, message)
    }

    /// Sets the trace. An empty trace means the top of the stream and is dropped.
    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        let trace = trace.into();
        if !trace.is_empty() {
            self.trace = Some(trace);
        }
        self
    }

    /// Appends a note.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Appends a suggested fix.
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help.push(help.into());
        self
    }
}
