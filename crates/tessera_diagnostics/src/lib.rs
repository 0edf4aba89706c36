//! Diagnostic creation, severity management, and problem reporting.
//!
//! Serialization never fails on values it cannot represent. Instead it records
//! a structured [`Diagnostic`] into a thread-safe [`DiagnosticSink`], carrying
//! the property trace that led to the value. The [`TerminalRenderer`] formats
//! individual diagnostics and [`ProblemSummary`] batches them into the report
//! shown at the end of a build.

#![warn(missing_docs)]

pub mod code;
pub mod diagnostic;
pub mod renderer;
pub mod severity;
pub mod sink;

pub use code::{Category, DiagnosticCode};
pub use diagnostic::Diagnostic;
pub use renderer::{DiagnosticRenderer, ProblemSummary, TerminalRenderer};
pub use severity::Severity;
pub use sink::DiagnosticSink;
