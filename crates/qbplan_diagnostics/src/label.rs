//! Labels that point a diagnostic at additional modules.

use qbplan_common::ModuleId;
use serde::{Deserialize, Serialize};

/// The visual style of a diagnostic label.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum LabelStyle {
    /// The module the diagnostic is about.
    Primary,
    /// A related module, such as the partner of a separation constraint.
    Secondary,
}

/// A module reference with an explanatory message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Label {
    /// The module this label refers to.
    pub module: ModuleId,
    /// The message displayed next to the module reference.
    pub message: String,
    /// Whether this is a primary or secondary label.
    pub style: LabelStyle,
}

impl Label {
    /// Creates a primary label.
    pub fn primary(module: ModuleId, message: impl Into<String>) -> Self {
        Self {
            module,
            message: message.into(),
            style: LabelStyle::Primary,
        }
    }

    /// Creates a secondary label.
    pub fn secondary(module: ModuleId, message: impl Into<String>) -> Self {
        Self {
            module,
            message: message.into(),
            style: LabelStyle::Secondary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_styles() {
        let a = Label::primary(ModuleId::from_raw(1), "constrained module");
        let b = Label::secondary(ModuleId::from_raw(2), "separation partner");
        assert_eq!(a.style, LabelStyle::Primary);
        assert_eq!(b.style, LabelStyle::Secondary);
        assert_eq!(b.module, ModuleId::from_raw(2));
    }
}
