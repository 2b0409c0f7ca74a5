//! The attribute store.
//!
//! `Attributes` is the flat `name -> value` map describing one character.
//! The same type carries both the caller's inputs and the computed snapshot
//! returned by [`RuleEngine::apply_rules`](crate::RuleEngine::apply_rules).
//! It is backed by a `BTreeMap` so serialization order is stable.

use crate::attr_key::AttrKey;
use crate::error::RuleError;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A character's attribute store.
///
/// # Examples
///
/// ```rust
/// use rulegraph::{Attributes, Value};
///
/// let mut attrs = Attributes::new();
/// attrs.set("race", "Hill Dwarf");
/// attrs.set("levels.Fighter", 3);
///
/// assert_eq!(attrs.number("levels.Fighter"), Some(3.0));
/// assert_eq!(attrs.get("race"), Some(&Value::from("Hill Dwarf")));
/// assert!(attrs.get("levels.Wizard").is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes {
    data: BTreeMap<AttrKey, Value>,
}

impl Attributes {
    /// Create an empty attribute store.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rulegraph::Attributes;
    ///
    /// let character = Attributes::new();
    /// assert!(character.is_empty());
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an attribute, replacing any previous value.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rulegraph::{Attributes, Value};
    ///
    /// let mut character = Attributes::new();
    /// character.set("levels.Wizard", 3);
    /// character.set("race", "Hill Dwarf");
    /// assert_eq!(character.get("race"), Some(&Value::from("Hill Dwarf")));
    /// ```
    pub fn set(&mut self, key: impl Into<AttrKey>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
    }

    /// Insert or remove depending on whether `value` is present.
    pub fn put(&mut self, key: impl Into<AttrKey>, value: Option<Value>) {
        let key = key.into();
        match value {
            Some(v) => {
                self.data.insert(key, v);
            }
            None => {
                self.data.remove(&key);
            }
        }
    }

    /// Get an attribute by name.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rulegraph::{Attributes, Value};
    ///
    /// let mut character = Attributes::new();
    /// character.set("strength", 15);
    ///
    /// assert_eq!(character.get("strength"), Some(&Value::from(15)));
    /// assert_eq!(character.get("charisma"), None);
    /// ```
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Like [`Attributes::get`], for an interned key.
    pub fn get_key(&self, key: &AttrKey) -> Option<&Value> {
        self.data.get(key)
    }

    /// Numeric view of an attribute.
    pub fn number(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_number)
    }

    /// True if the attribute is present and truthy.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rulegraph::Attributes;
    ///
    /// let mut character = Attributes::new();
    /// character.set("feats.Alert", 1);
    /// character.set("feats.Lucky", 0);
    ///
    /// assert!(character.truthy("feats.Alert"));
    /// assert!(!character.truthy("feats.Lucky"));
    /// assert!(!character.truthy("feats.Tough"));
    /// ```
    pub fn truthy(&self, key: &str) -> bool {
        self.get(key).map(Value::truthy).unwrap_or(false)
    }

    /// Remove an attribute, returning its old value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    /// Check if an attribute is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Attributes in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&AttrKey, &Value)> {
        self.data.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &AttrKey> {
        self.data.keys()
    }

    /// Every attribute under `prefix.`, in key order.
    pub fn with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a AttrKey, &'a Value)> {
        self.data.iter().filter(move |(k, _)| k.has_prefix(prefix))
    }

    /// Sum of the numeric attributes under `prefix.`.
    pub fn sum_prefix(&self, prefix: &str) -> f64 {
        self.with_prefix(prefix)
            .filter_map(|(_, v)| v.as_number())
            .sum()
    }

    /// Serialize to a flat JSON object.
    ///
    /// # Errors
    ///
    /// Returns `RuleError::Json` if serialization fails.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rulegraph::Attributes;
    ///
    /// let mut character = Attributes::new();
    /// character.set("level", 2);
    /// let json = character.to_json().unwrap();
    /// assert_eq!(Attributes::from_json(&json).unwrap(), character);
    /// ```
    pub fn to_json(&self) -> Result<String, RuleError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a flat JSON object of numbers, strings and booleans.
    ///
    /// # Errors
    ///
    /// Returns `RuleError::Json` for malformed input or nested values.
    pub fn from_json(json: &str) -> Result<Self, RuleError> {
        Ok(serde_json::from_str(json)?)
    }
}

impl FromIterator<(AttrKey, Value)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (AttrKey, Value)>>(iter: I) -> Self {
        Self {
            data: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attributes_set_get() {
        let mut attrs = Attributes::new();
        attrs.set("strength", 15);
        assert_eq!(attrs.number("strength"), Some(15.0));
        assert!(attrs.truthy("strength"));
        assert!(!attrs.truthy("dexterity"));
    }

    #[test]
    fn test_put_none_removes() {
        let mut attrs = Attributes::new();
        attrs.set("race", "Elf");
        attrs.put("race", None);
        assert!(attrs.is_empty());
    }

    #[test]
    fn test_prefix_queries() {
        let mut attrs = Attributes::new();
        attrs.set("levels.Fighter", 3);
        attrs.set("levels.Wizard", 2);
        attrs.set("level", 5);
        assert_eq!(attrs.with_prefix("levels").count(), 2);
        assert_eq!(attrs.sum_prefix("levels"), 5.0);
    }

    #[test]
    fn test_json_roundtrip_is_sorted() {
        let mut attrs = Attributes::new();
        attrs.set("race", "Elf");
        attrs.set("level", 2);
        let json = attrs.to_json().unwrap();
        assert_eq!(json, r#"{"level":2.0,"race":"Elf"}"#);
        assert_eq!(Attributes::from_json(&json).unwrap(), attrs);
    }
}
