//! Attribute key module.
//!
//! Provides `AttrKey`, the interned dotted attribute name used throughout
//! the engine (`levels.Fighter`, `combatNotes.tough`), and `Namespace`, the
//! typed view of its prefix. The dotted string stays the identity so stores
//! serialize exactly as the content modules spell them.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::Arc;

/// Classification of an attribute by the prefix before its first dot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// No dot: `race`, `level`, `strength`.
    Root,
    /// `levels.<Class>`
    Levels,
    /// `features.<Name>`
    Features,
    /// `feats.<Name>`
    Feats,
    /// `selectableFeatures.<Owner> - <Name>`
    SelectableFeatures,
    /// `selectableFeatureCount.<Owner> (<Group>)`
    SelectableFeatureCount,
    /// `featCount.<Type>`
    FeatCount,
    /// `skillProficiency.`, `armorProficiency.`, ...
    Proficiency,
    /// `skillsChosen.`, `languagesChosen.`, `toolsChosen.`
    Chosen,
    /// `spells.<Name> (<Group><Level>)`
    Spells,
    /// `spellSlots.<Group><Level>`
    SpellSlots,
    /// Report-section notes: `combatNotes.`, `skillNotes.`, ...
    Notes,
    /// `validationNotes.` hard constraints.
    Validation,
    /// `sanityNotes.` soft constraints.
    Sanity,
    /// Any other dotted prefix.
    Other,
}

impl Namespace {
    fn classify(prefix: &str) -> Self {
        match prefix {
            "levels" => Namespace::Levels,
            "features" => Namespace::Features,
            "feats" => Namespace::Feats,
            "selectableFeatures" => Namespace::SelectableFeatures,
            "selectableFeatureCount" => Namespace::SelectableFeatureCount,
            "featCount" => Namespace::FeatCount,
            "spells" => Namespace::Spells,
            "spellSlots" => Namespace::SpellSlots,
            "validationNotes" => Namespace::Validation,
            "sanityNotes" => Namespace::Sanity,
            p if p.ends_with("Proficiency") => Namespace::Proficiency,
            p if p.ends_with("Chosen") => Namespace::Chosen,
            p if p.ends_with("Notes") => Namespace::Notes,
            _ => Namespace::Other,
        }
    }
}

/// Interned dotted attribute name.
///
/// Uses `Arc<str>` so clones are cheap; equality, hashing and ordering all
/// follow the dotted string.
///
/// # Examples
///
/// ```rust
/// use rulegraph::{AttrKey, attr_key::Namespace};
///
/// let key = AttrKey::new("combatNotes.tough");
/// assert_eq!(key.prefix(), Some("combatNotes"));
/// assert_eq!(key.name(), "tough");
/// assert_eq!(key.namespace(), Namespace::Notes);
///
/// let scoped = AttrKey::scoped("levels", "Fighter");
/// assert_eq!(scoped.as_str(), "levels.Fighter");
/// ```
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct AttrKey(Arc<str>);

impl Serialize for AttrKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.as_ref().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AttrKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(AttrKey::from(s))
    }
}

impl AttrKey {
    /// Create a key from its dotted form.
    pub fn new(s: &str) -> Self {
        Self(Arc::from(s))
    }

    /// Create `<prefix>.<name>`.
    pub fn scoped(prefix: &str, name: &str) -> Self {
        Self(Arc::from(format!("{}.{}", prefix, name)))
    }

    /// The full dotted string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part before the first dot, if any.
    pub fn prefix(&self) -> Option<&str> {
        self.0.split_once('.').map(|(p, _)| p)
    }

    /// The part after the first dot, or the whole key at the root.
    pub fn name(&self) -> &str {
        self.0.split_once('.').map(|(_, n)| n).unwrap_or(&self.0)
    }

    pub fn namespace(&self) -> Namespace {
        match self.prefix() {
            None => Namespace::Root,
            Some(p) => Namespace::classify(p),
        }
    }

    /// True for `validationNotes.*` and `sanityNotes.*`.
    pub fn is_constraint_note(&self) -> bool {
        matches!(self.namespace(), Namespace::Validation | Namespace::Sanity)
    }

    /// True if the key lives under `prefix.`.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.prefix() == Some(prefix)
    }
}

impl From<&str> for AttrKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for AttrKey {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl From<&AttrKey> for AttrKey {
    fn from(k: &AttrKey) -> Self {
        k.clone()
    }
}

impl std::borrow::Borrow<str> for AttrKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AttrKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Convert a display name into the identifier form used inside attribute
/// names: first letter lower-cased, everything that is not alphanumeric
/// dropped.
///
/// ```rust
/// use rulegraph::attr_key::camelize;
///
/// assert_eq!(camelize("Defensive Duelist"), "defensiveDuelist");
/// assert_eq!(camelize("Thieves' Cant"), "thievesCant");
/// ```
pub fn camelize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars().filter(|c| c.is_alphanumeric()) {
        if out.is_empty() {
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
