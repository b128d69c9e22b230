use std::fmt;

use serde::{Deserialize, Serialize};

/// One offending field, named by its dotted path in the document model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub reason: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// The document could not be built. Lists every offending field, never just the first.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("document has {} invalid field(s): {}", .violations.len(), summarize(.violations))]
pub struct BuildError {
    pub violations: Vec<FieldError>,
}

impl BuildError {
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.violations.iter().map(|v| v.field.as_str())
    }

    pub fn hint(&self) -> &'static str {
        "correct the listed fields and emit again"
    }
}

fn summarize(violations: &[FieldError]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
