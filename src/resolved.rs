//! Evaluation breakdown module.
//!
//! Contains the `Breakdown` type returned by `RuleEngine::explain`: the
//! final value of one attribute plus every rule that contributed to it.

use crate::attr_key::AttrKey;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// How one attribute got its value.
///
/// # Examples
///
/// ```rust
/// use rulegraph::{AttrKey, Breakdown, Value};
///
/// let mut breakdown = Breakdown::new(AttrKey::new("armorClass"), Some(Value::from(12)));
/// breakdown.add_contribution("armorClass = base", Some(Value::from(10)));
/// breakdown.add_contribution("armorClass + dexterityModifier", Some(Value::from(2)));
///
/// assert_eq!(breakdown.contributions.len(), 2);
/// assert!(breakdown.to_string().contains("dexterityModifier"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Breakdown {
    pub key: AttrKey,

    /// The value in the evaluated snapshot. `None` when absent.
    pub value: Option<Value>,

    /// The caller-supplied value the rules started from.
    pub input: Option<Value>,

    /// Each entry is `(rule_description, contribution)`, in application
    /// order. Gate entries carry whether the gate was open.
    pub contributions: Vec<(String, Option<Value>)>,
}

impl Breakdown {
    pub fn new(key: AttrKey, value: Option<Value>) -> Self {
        Self {
            key,
            value,
            input: None,
            contributions: Vec::new(),
        }
    }

    pub fn add_contribution(&mut self, description: impl Into<String>, value: Option<Value>) {
        self.contributions.push((description.into(), value));
    }
}

impl std::fmt::Display for Breakdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.value {
            Some(v) => writeln!(f, "{} = {}", self.key, v)?,
            None => writeln!(f, "{} (absent)", self.key)?,
        }
        if let Some(input) = &self.input {
            writeln!(f, "  input: {}", input)?;
        }
        for (description, value) in &self.contributions {
            match value {
                Some(v) => writeln!(f, "  {} -> {}", description, v)?,
                None => writeln!(f, "  {} -> nothing", description)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breakdown_creation() {
        let b = Breakdown::new(AttrKey::new("hitPoints"), Some(Value::from(12)));
        assert_eq!(b.key.as_str(), "hitPoints");
        assert!(b.contributions.is_empty());
        assert!(b.input.is_none());
    }

    #[test]
    fn test_breakdown_order() {
        let mut b = Breakdown::new(AttrKey::new("speed"), Some(Value::from(35)));
        b.add_contribution("speed = base", Some(Value::from(30)));
        b.add_contribution("speed + featureBonus", Some(Value::from(5)));
        b.add_contribution("speed + encumbrance", None);
        assert_eq!(b.contributions[0].0, "speed = base");
        assert_eq!(b.contributions[2].1, None);
        let shown = b.to_string();
        assert!(shown.starts_with("speed = 35"));
        assert!(shown.contains("nothing"));
    }

    #[test]
    fn test_absent_display() {
        let b = Breakdown::new(AttrKey::new("dwarfLevel"), None);
        assert!(b.to_string().contains("absent"));
    }
}
