//! Layered content tables.
//!
//! A supplement does not copy and edit its base rule set's tables. It
//! declares patches against them: add an entry, override a field, append to
//! a list field or remove an entry. [`LayeredTable::merge`] applies the
//! patches in order.

use crate::attr_table::AttrTable;
use crate::error::RuleError;
use serde::{Deserialize, Serialize};

/// Ordered `name -> attribute string` records for one choice type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChoiceTable {
    entries: Vec<(String, String)>,
}

impl ChoiceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace, keeping the position of a replaced entry.
    pub fn insert(&mut self, name: impl Into<String>, attrs: impl Into<String>) {
        let name = name.into();
        let attrs = attrs.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, a)) => *a = attrs,
            None => self.entries.push((name, attrs)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, a)| a.as_str())
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let idx = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, a)| (n.as_str(), a.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N: Into<String>, A: Into<String>> FromIterator<(N, A)> for ChoiceTable {
    fn from_iter<I: IntoIterator<Item = (N, A)>>(iter: I) -> Self {
        let mut table = ChoiceTable::new();
        for (name, attrs) in iter {
            table.insert(name, attrs);
        }
        table
    }
}

/// One edit to a base table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Patch {
    /// Add an entry, replacing one of the same name.
    Add { name: String, attrs: String },
    /// Replace the values of one key of an entry.
    OverrideField {
        name: String,
        key: String,
        value: Vec<String>,
    },
    /// Append items to a list key of an entry.
    AppendToList {
        name: String,
        key: String,
        items: Vec<String>,
    },
    Remove { name: String },
}

impl Patch {
    fn apply(&self, table: &mut ChoiceTable) -> Result<(), RuleError> {
        match self {
            Patch::Add { name, attrs } => {
                table.insert(name.clone(), attrs.clone());
                Ok(())
            }
            Patch::Remove { name } => table
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| RuleError::MissingEntry(name.clone())),
            Patch::OverrideField { name, key, value } => {
                edit(table, name, |attrs| attrs.set(key, value.clone()))
            }
            Patch::AppendToList { name, key, items } => {
                edit(table, name, |attrs| attrs.append(key, items.clone()))
            }
        }
    }
}

fn edit(
    table: &mut ChoiceTable,
    name: &str,
    f: impl FnOnce(&mut AttrTable),
) -> Result<(), RuleError> {
    let text = table
        .get(name)
        .ok_or_else(|| RuleError::MissingEntry(name.to_string()))?;
    let mut attrs = AttrTable::parse(text)?;
    f(&mut attrs);
    table.insert(name, attrs.to_string());
    Ok(())
}

/// A base table plus the patches layered on it.
///
/// # Examples
///
/// ```rust
/// use rulegraph::table::{ChoiceTable, LayeredTable, Patch};
///
/// let base: ChoiceTable = [("Acolyte", "Features=\"1:Shelter Of The Faithful\"")]
///     .into_iter()
///     .collect();
/// let mut layered = LayeredTable::new(base);
/// layered.patch(Patch::AppendToList {
///     name: "Acolyte".into(),
///     key: "Selectables".into(),
///     items: vec!["1:Temple Ties:Feature".into()],
/// });
/// layered.patch(Patch::Add { name: "Sage".into(), attrs: "Languages=any,any".into() });
///
/// let merged = layered.merge();
/// assert_eq!(merged.len(), 2);
/// assert!(merged.get("Acolyte").unwrap().contains("Temple Ties"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayeredTable {
    pub base: ChoiceTable,
    pub patches: Vec<Patch>,
}

impl LayeredTable {
    /// Start a layer stack from `base`.
    pub fn new(base: ChoiceTable) -> Self {
        Self {
            base,
            patches: Vec::new(),
        }
    }

    /// Queue a patch. Patches apply in the order given.
    pub fn patch(&mut self, patch: Patch) -> &mut Self {
        self.patches.push(patch);
        self
    }

    /// Apply every patch in order. A patch naming a missing entry, or an
    /// entry whose attributes do not parse, is logged and skipped.
    pub fn merge(&self) -> ChoiceTable {
        let mut table = self.base.clone();
        for patch in &self.patches {
            if let Err(err) = patch.apply(&mut table) {
                tracing::warn!(error = %err, patch = ?patch, "table patch skipped");
            }
        }
        table
    }

    /// Layer this table's patches on top of another merged table, as a
    /// supplement extends the table its dependency exports.
    pub fn on_top_of(&self, lower: &ChoiceTable) -> ChoiceTable {
        let mut base = lower.clone();
        for (name, attrs) in self.base.iter() {
            base.insert(name, attrs);
        }
        LayeredTable {
            base,
            patches: self.patches.clone(),
        }
        .merge()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ChoiceTable {
        [
            ("Acolyte", "Features=\"1:Shelter Of The Faithful\" Languages=any,any"),
            ("Sage", "Features=\"1:Researcher\""),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_patches_apply_in_order() {
        let mut layered = LayeredTable::new(base());
        layered
            .patch(Patch::OverrideField {
                name: "Sage".into(),
                key: "Languages".into(),
                value: vec!["Elvish".into()],
            })
            .patch(Patch::OverrideField {
                name: "Sage".into(),
                key: "Languages".into(),
                value: vec!["Dwarvish".into()],
            })
            .patch(Patch::Remove { name: "Acolyte".into() });
        let merged = layered.merge();
        assert!(!merged.contains("Acolyte"));
        let sage = AttrTable::parse(merged.get("Sage").unwrap()).unwrap();
        assert_eq!(sage.get_list("Languages"), &["Dwarvish".to_string()]);
        assert_eq!(sage.get("Features"), Some("1:Researcher"));
    }

    #[test]
    fn test_missing_entry_is_skipped() {
        let mut layered = LayeredTable::new(base());
        layered
            .patch(Patch::AppendToList {
                name: "Hermit".into(),
                key: "Features".into(),
                items: vec!["1:Discovery".into()],
            })
            .patch(Patch::Remove { name: "Hermit".into() })
            .patch(Patch::Add { name: "Hermit".into(), attrs: "Features=\"1:Discovery\"".into() });
        let merged = layered.merge();
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.iter().last().map(|(n, _)| n), Some("Hermit"));
    }

    #[test]
    fn test_append_keeps_existing_items() {
        let mut layered = LayeredTable::new(base());
        layered.patch(Patch::AppendToList {
            name: "Acolyte".into(),
            key: "Languages".into(),
            items: vec!["Celestial".into()],
        });
        let merged = layered.merge();
        let acolyte = AttrTable::parse(merged.get("Acolyte").unwrap()).unwrap();
        assert_eq!(acolyte.get_list("Languages").len(), 3);
    }

    #[test]
    fn test_on_top_of() {
        let lower = base();
        let mut supplement = LayeredTable::new([("Hermit", "Features=\"1:Discovery\"")].into_iter().collect());
        supplement.patch(Patch::Remove { name: "Sage".into() });
        let merged = supplement.on_top_of(&lower);
        assert!(merged.contains("Acolyte"));
        assert!(merged.contains("Hermit"));
        assert!(!merged.contains("Sage"));
        // the lower table is untouched
        assert!(lower.contains("Sage"));
    }
}
