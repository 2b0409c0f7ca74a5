//! Error types for rule registration and content loading.
//!
//! Evaluation itself never fails: missing attributes and broken cycles are
//! data, not errors. `RuleError` covers the load-time surface (bad formulas,
//! bad attribute strings, bad requirement text, missing modules, bad config).

use crate::attr_key::AttrKey;
use thiserror::Error;

/// Format a cycle path as a readable string.
pub(crate) fn format_cycle_path(path: &[AttrKey]) -> String {
    if path.is_empty() {
        return String::from("(empty cycle)");
    }
    path.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Errors that can occur while registering rules or loading content.
///
/// # Examples
///
/// ```rust
/// use rulegraph::RuleError;
///
/// let err = RuleError::UnknownOperator("~=".into());
/// assert_eq!(err.to_string(), "Unknown rule operator: ~=");
/// ```
#[derive(Debug, Error)]
pub enum RuleError {
    /// A formula could not be compiled.
    #[error("Invalid formula `{text}`: {reason}")]
    Formula { text: String, reason: String },

    /// An attribute string (`Key=value ...`) was malformed.
    #[error("Malformed attribute string `{text}`: {reason}")]
    Attributes { text: String, reason: String },

    /// A prerequisite expression could not be parsed.
    #[error("Invalid requirement `{text}`: {reason}")]
    Requirement { text: String, reason: String },

    /// A choice type tag was not recognized.
    #[error("Unknown choice type: {0}")]
    UnknownChoiceType(String),

    /// A rule operator was not one of `= + * ^ v ?` (or their `op=` spellings).
    #[error("Unknown rule operator: {0}")]
    UnknownOperator(String),

    /// A randomizer attribute name was not recognized.
    #[error("Unknown random attribute: {0}")]
    UnknownRandomAttr(String),

    /// A patch referenced a table entry that does not exist.
    #[error("No entry named {0} in table")]
    MissingEntry(String),

    /// A content module was loaded before a module it depends on.
    #[error("Module {module} requires {requires}, which has not been loaded")]
    MissingModule { module: String, requires: String },

    /// Engine configuration could not be read.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Attribute store (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RuleError {
    pub(crate) fn formula(text: &str, reason: impl Into<String>) -> Self {
        RuleError::Formula {
            text: text.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn attributes(text: &str, reason: impl Into<String>) -> Self {
        RuleError::Attributes {
            text: text.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn requirement(text: &str, reason: impl Into<String>) -> Self {
        RuleError::Requirement {
            text: text.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<toml::de::Error> for RuleError {
    fn from(err: toml::de::Error) -> Self {
        RuleError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RuleError::formula("source +", "unexpected end of input");
        let display = err.to_string();
        assert!(display.contains("source +"));
        assert!(display.contains("unexpected end"));
    }

    #[test]
    fn test_cycle_path_display() {
        let a = AttrKey::new("a");
        let b = AttrKey::new("b");
        let path = format_cycle_path(&[a.clone(), b, a]);
        assert_eq!(path, "a -> b -> a");
        assert_eq!(format_cycle_path(&[]), "(empty cycle)");
    }

    #[test]
    fn test_missing_module_display() {
        let err = RuleError::MissingModule {
            module: "Xanathar".into(),
            requires: "SRD5E".into(),
        };
        assert!(err.to_string().contains("requires SRD5E"));
    }
}
