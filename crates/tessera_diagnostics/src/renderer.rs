//! Text output for diagnostics and the problem report printed after a store.

use std::collections::BTreeMap;
use std::fmt::Write;

use crate::code::Category;
use crate::diagnostic::Diagnostic;
use crate::severity::Severity;

/// Turns a diagnostic into text.
pub trait DiagnosticRenderer {
    /// Text for one diagnostic, ending in a newline.
    fn render(&self, diag: &Diagnostic) -> String;
}

/// Plain terminal output, optionally with ANSI colors:
///
/// ```text
/// warning[U001]: cannot serialize object of type 'Socket'
///   --> field 'connection' of bean 'Upload'
///    = note: the field is reset on load
/// ```
pub struct TerminalRenderer {
    /// Color the severity label.
    pub color: bool,
}

impl TerminalRenderer {
    /// Renderer with or without colors.
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    fn label(&self, severity: Severity) -> String {
        let code = match severity {
            Severity::Error => 31,
            Severity::Warning => 33,
            Severity::Note => 36,
        };
        if self.color {
            format!("\x1b[1;{code}m{}\x1b[0m", severity.label())
        } else {
            severity.label().to_string()
        }
    }
}

impl DiagnosticRenderer for TerminalRenderer {
    fn render(&self, diag: &Diagnostic) -> String {
        let mut text = String::new();
        // Writing into a String cannot fail.
        let _ = writeln!(text, "{}[{}]: {}", self.label(diag.severity), diag.code, diag.message);
        if let Some(trace) = &diag.trace {
            let _ = writeln!(text, "  --> {trace}");
        }
        let extra = diag.notes.iter().map(|n| ("note", n));
        for (kind, line) in extra.chain(diag.help.iter().map(|h| ("help", h))) {
            let _ = writeln!(text, "   = {kind}: {line}");
        }
        text
    }
}

/// The problems found while storing one cache entry.
///
/// A diagnostic repeated with the same message at the same trace, such as an
/// unsupported value inside a loop, is listed once with its count.
#[derive(Debug, Default)]
pub struct ProblemSummary {
    problems: BTreeMap<(String, String), (Diagnostic, usize)>,
}

impl ProblemSummary {
    /// Groups `diagnostics` by message and trace.
    pub fn from_diagnostics(diagnostics: impl IntoIterator<Item = Diagnostic>) -> Self {
        let mut problems = BTreeMap::new();
        for diag in diagnostics {
            let key = (diag.message.clone(), diag.trace.clone().unwrap_or_default());
            problems.entry(key).or_insert((diag, 0)).1 += 1;
        }
        Self { problems }
    }

    /// Number of distinct problems.
    pub fn distinct(&self) -> usize {
        self.problems.len()
    }

    /// Distinct problems whose code is in `category`.
    pub fn count_in(&self, category: Category) -> usize {
        self.problems
            .values()
            .filter(|(diag, _)| diag.code.category == category)
            .count()
    }

    /// The report, or an empty string when nothing was found.
    pub fn render(&self, renderer: &dyn DiagnosticRenderer) -> String {
        let mut report = match self.problems.len() {
            0 => return String::new(),
            1 => "1 problem was found storing the configuration cache.\n".to_string(),
            n => format!("{n} problems were found storing the configuration cache.\n"),
        };
        for (diag, count) in self.problems.values() {
            report.push_str(&renderer.render(diag));
            if *count > 1 {
                let _ = writeln!(report, "   = note: reported {count} times");
            }
        }
        report
    }
}
