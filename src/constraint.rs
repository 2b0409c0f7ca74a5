//! Constraint bookkeeping shared by the validator, repair and randomizer.
//!
//! The validator's notes are ordinary derived attributes; these records keep
//! the extra structure the repair and randomizer loops need to act on a
//! nonzero note: which requirement produced it, or which budget and members
//! an allocation note sums.

use crate::attr_key::AttrKey;
use crate::requirement::Requirement;
use crate::rule::ChoiceId;

/// A compiled `Require`/`Imply` list attached to a selectable thing.
#[derive(Debug, Clone)]
pub struct RequirementConstraint {
    /// `validationNotes.*` or `sanityNotes.*`.
    pub note: AttrKey,
    /// The attribute whose presence activates the requirement, e.g.
    /// `feats.Defensive Duelist`.
    pub selector: AttrKey,
    pub requirement: Requirement,
    pub origin: Option<ChoiceId>,
}

/// "Exactly `budget` items chosen from `members`".
///
/// The note's value is `sum(members) - budget`: positive when
/// over-allocated, negative when under-allocated. Allocations are shared by
/// every choice that declares them or contributes members.
#[derive(Debug, Clone)]
pub struct Allocation {
    pub note: AttrKey,
    pub budget: AttrKey,
    /// Each member with the sequence number of the rule that counts it.
    pub members: Vec<(AttrKey, u64)>,
    pub(crate) budget_rule: u64,
}

impl Allocation {
    pub fn member_keys(&self) -> impl Iterator<Item = &AttrKey> {
        self.members.iter().map(|(k, _)| k)
    }
}

/// The kinds of "Choose N from ..." grants the note grammar recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PoolKind {
    Armor,
    Save,
    Skill,
    Tool,
    Weapon,
    Language,
    AbilityBoost,
}

impl PoolKind {
    /// Proficiency kinds by the word that precedes `Proficiency`.
    pub fn from_proficiency_word(word: &str) -> Option<PoolKind> {
        Some(match word {
            "Armor" => PoolKind::Armor,
            "Save" => PoolKind::Save,
            "Skill" => PoolKind::Skill,
            "Tool" => PoolKind::Tool,
            "Weapon" => PoolKind::Weapon,
            _ => return None,
        })
    }

    /// Budget attribute bumped by "Choose N".
    pub fn budget_attr(self) -> AttrKey {
        AttrKey::new(match self {
            PoolKind::Armor => "armorChoiceCount",
            PoolKind::Save => "saveChoiceCount",
            PoolKind::Skill => "skillChoiceCount",
            PoolKind::Tool => "toolChoiceCount",
            PoolKind::Weapon => "weaponChoiceCount",
            PoolKind::Language => "languageChoiceCount",
            PoolKind::AbilityBoost => "abilityBoostChoiceCount",
        })
    }

    /// Prefix of the directly granted attribute.
    pub fn grant_prefix(self) -> &'static str {
        match self {
            PoolKind::Armor => "armorProficiency",
            PoolKind::Save => "saveProficiency",
            PoolKind::Skill => "skillProficiency",
            PoolKind::Tool => "toolProficiency",
            PoolKind::Weapon => "weaponProficiency",
            PoolKind::Language => "languages",
            PoolKind::AbilityBoost => "abilityBoosts",
        }
    }

    /// Prefix of the input attributes a player (or the randomizer) sets to
    /// spend the budget.
    pub fn chosen_prefix(self) -> &'static str {
        match self {
            PoolKind::Armor => "armorChosen",
            PoolKind::Save => "savesChosen",
            PoolKind::Skill => "skillsChosen",
            PoolKind::Tool => "toolsChosen",
            PoolKind::Weapon => "weaponsChosen",
            PoolKind::Language => "languagesChosen",
            PoolKind::AbilityBoost => "abilityBoosts",
        }
    }

    /// The allocation note that checks the budget.
    pub fn allocation_note(self) -> AttrKey {
        let stem = match self {
            PoolKind::Armor => "armor",
            PoolKind::Save => "save",
            PoolKind::Skill => "skill",
            PoolKind::Tool => "tool",
            PoolKind::Weapon => "weapon",
            PoolKind::Language => "language",
            PoolKind::AbilityBoost => "abilityBoost",
        };
        AttrKey::scoped("validationNotes", &format!("{}ChoiceAllocation", stem))
    }
}

/// One "Choose N from ..." grant, active while `gate` is truthy.
#[derive(Debug, Clone)]
pub struct ChoicePool {
    pub kind: PoolKind,
    pub count: u32,
    pub gate: AttrKey,
    /// `None` means "any".
    pub options: Option<Vec<String>>,
    pub origin: Option<ChoiceId>,
}
