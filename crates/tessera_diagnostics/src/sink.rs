//! Collects the problems reported while a cache entry is written or read.

use crate::code::DiagnosticCode;
use crate::diagnostic::Diagnostic;
use parking_lot::Mutex;

#[derive(Default)]
struct Reported {
    entries: Vec<Diagnostic>,
    // Survives `take_all`, so a drained sink still refuses the store.
    errors: usize,
}

/// Shared collector for [`Diagnostic`]s.
///
/// Owner streams of a work graph may be encoded on several threads at once,
/// all reporting into the same sink.
#[derive(Default)]
pub struct DiagnosticSink {
    reported: Mutex<Reported>,
}

impl DiagnosticSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a diagnostic.
    pub fn emit(&self, diag: Diagnostic) {
        let mut reported = self.reported.lock();
        if diag.severity.is_error() {
            reported.errors += 1;
        }
        reported.entries.push(diag);
    }

    /// Whether anything reported so far blocks storing the entry.
    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    /// Error diagnostics reported since the sink was created.
    pub fn error_count(&self) -> usize {
        self.reported.lock().errors
    }

    /// Diagnostics currently held.
    pub fn len(&self) -> usize {
        self.reported.lock().entries.len()
    }

    /// Whether no diagnostics are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Held diagnostics carrying `code`.
    pub fn count_code(&self, code: DiagnosticCode) -> usize {
        let reported = self.reported.lock();
        reported.entries.iter().filter(|d| d.code == code).count()
    }

    /// Drains the held diagnostics.
    pub fn take_all(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.reported.lock().entries)
    }

    /// Copies the held diagnostics.
    pub fn snapshot(&self) -> Vec<Diagnostic> {
        self.reported.lock().entries.clone()
    }
}

impl std::fmt::Debug for DiagnosticSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reported = self.reported.lock();
        f.debug_struct("DiagnosticSink")
            .field("held", &reported.entries.len())
            .field("errors", &reported.errors)
            .finish()
    }
}
