//! Text rendering of diagnostics.

use crate::diagnostic::Diagnostic;
use crate::label::LabelStyle;
use qbplan_common::ModuleId;

/// Resolves module ids to human-readable names for rendering.
pub trait ModuleNames {
    /// Returns the name of `module`, if known.
    fn module_name(&self, module: ModuleId) -> Option<&str>;
}

impl ModuleNames for Vec<String> {
    fn module_name(&self, module: ModuleId) -> Option<&str> {
        self.get(module.index()).map(String::as_str)
    }
}

/// Trait for rendering diagnostics into formatted output strings.
pub trait DiagnosticRenderer {
    /// Renders a single diagnostic into a formatted string.
    fn render(&self, diag: &Diagnostic, names: &dyn ModuleNames) -> String;
}

/// Renders diagnostics in a rustc-style terminal format.
///
/// ```text
/// warning[C201]: minimum separation violated
///   --> module m3 (alu)
///    - module m4 (regfile): too close
///    = note: clearance 2 < 5
/// ```
pub struct TerminalRenderer {
    /// Whether to use ANSI color codes for the header.
    pub color: bool,
}

impl TerminalRenderer {
    /// Creates a new terminal renderer.
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    fn header(&self, diag: &Diagnostic) -> String {
        let head = format!("{}[{}]", diag.severity, diag.code);
        if !self.color {
            return head;
        }
        let ansi = match diag.severity {
            crate::Severity::Error => "31",
            crate::Severity::Warning => "33",
            crate::Severity::Note | crate::Severity::Help => "36",
        };
        format!("\x1b[1;{ansi}m{head}\x1b[0m")
    }
}

fn describe(module: ModuleId, names: &dyn ModuleNames) -> String {
    match names.module_name(module) {
        Some(name) => format!("module m{module} ({name})"),
        None => format!("module m{module}"),
    }
}

impl DiagnosticRenderer for TerminalRenderer {
    fn render(&self, diag: &Diagnostic, names: &dyn ModuleNames) -> String {
        let mut out = format!("{}: {}\n", self.header(diag), diag.message);

        if let Some(module) = diag.module {
            out.push_str(&format!("  --> {}\n", describe(module, names)));
        }
        for label in &diag.labels {
            let marker = match label.style {
                LabelStyle::Primary => '^',
                LabelStyle::Secondary => '-',
            };
            out.push_str(&format!(
                "   {marker} {}: {}\n",
                describe(label.module, names),
                label.message
            ));
        }
        for note in &diag.notes {
            out.push_str(&format!("   = note: {note}\n"));
        }
        for help in &diag.help {
            out.push_str(&format!("   = help: {help}\n"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::{Category, DiagnosticCode};
    use crate::label::Label;

    fn names() -> Vec<String> {
        vec!["alu".to_string(), "regfile".to_string()]
    }

    #[test]
    fn render_with_module_and_label() {
        let diag = Diagnostic::warning(
            DiagnosticCode::new(Category::Constraint, 201),
            "minimum separation violated",
        )
        .with_module(ModuleId::from_raw(0))
        .with_label(Label::secondary(ModuleId::from_raw(1), "too close"))
        .with_note("clearance 2 < 5");

        let names = names();
        let out = TerminalRenderer::new(false).render(&diag, &names);
        assert!(out.contains("warning[C201]: minimum separation violated"));
        assert!(out.contains("--> module m0 (alu)"));
        assert!(out.contains("- module m1 (regfile): too close"));
        assert!(out.contains("= note: clearance 2 < 5"));
    }

    #[test]
    fn render_unknown_module_without_name() {
        let diag = Diagnostic::note(DiagnosticCode::new(Category::Anneal, 101), "stage")
            .with_module(ModuleId::from_raw(9));
        let names = names();
        let out = TerminalRenderer::new(false).render(&diag, &names);
        assert!(out.contains("--> module m9\n"));
    }

    #[test]
    fn color_wraps_header() {
        let diag = Diagnostic::error(DiagnosticCode::new(Category::Error, 101), "failed")
            .with_help("raise anneal.max_retries");
        let names = names();
        let out = TerminalRenderer::new(true).render(&diag, &names);
        assert!(out.starts_with("\x1b[1;31merror[E101]\x1b[0m: failed"));
        assert!(out.contains("= help: raise anneal.max_retries"));
    }
}
