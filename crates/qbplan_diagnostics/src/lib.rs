//! Structured progress and outcome reporting for floorplanning runs.
//!
//! A [`Diagnostic`] carries a severity, a coded category, an optional subject
//! module, and free-form notes. The thread-safe [`DiagnosticSink`] collects
//! them while the annealer runs, and [`DiagnosticRenderer`] implementations
//! turn them into text.

#![warn(missing_docs)]

pub mod code;
pub mod diagnostic;
pub mod label;
pub mod renderer;
pub mod severity;
pub mod sink;

pub use code::{Category, DiagnosticCode};
pub use diagnostic::Diagnostic;
pub use label::{Label, LabelStyle};
pub use renderer::{DiagnosticRenderer, ModuleNames, TerminalRenderer};
pub use severity::Severity;
pub use sink::DiagnosticSink;
