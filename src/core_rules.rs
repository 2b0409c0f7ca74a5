//! Rules every content module builds on.

use crate::attr_key::AttrKey;
use crate::constraint::PoolKind;
use crate::engine::RuleEngine;
use crate::formula::Formula;
use crate::note_grammar::pool_member;
use crate::rule::Operator;

/// The six abilities, as they appear in note text.
pub const ABILITIES: [&str; 6] = [
    "Charisma",
    "Constitution",
    "Dexterity",
    "Intelligence",
    "Strength",
    "Wisdom",
];

/// The score attribute of an ability: `Strength` -> `strength`.
pub fn ability_attr(ability: &str) -> AttrKey {
    AttrKey::new(&ability.to_lowercase())
}

pub fn ability_modifier(ability: &str) -> AttrKey {
    AttrKey::new(&format!("{}Modifier", ability.to_lowercase()))
}

const POOLS: [PoolKind; 7] = [
    PoolKind::Armor,
    PoolKind::Save,
    PoolKind::Skill,
    PoolKind::Tool,
    PoolKind::Weapon,
    PoolKind::Language,
    PoolKind::AbilityBoost,
];

fn formula(text: &str) -> Option<Formula> {
    match Formula::parse(text) {
        Ok(f) => Some(f),
        Err(err) => {
            tracing::warn!(error = %err, "core formula rejected");
            None
        }
    }
}

/// Install ability, combat and allocation rules.
///
/// # Examples
///
/// ```rust
/// use rulegraph::{core_rules, Attributes, RuleEngine};
///
/// let mut engine = RuleEngine::new();
/// core_rules(&mut engine);
///
/// let mut character = Attributes::new();
/// character.set("dexterity", 14);
/// character.set("level", 5);
/// let sheet = engine.apply_rules(&character);
/// assert_eq!(sheet.number("dexterityModifier"), Some(2.0));
/// assert_eq!(sheet.number("armorClass"), Some(12.0));
/// assert_eq!(sheet.number("proficiencyBonus"), Some(3.0));
/// ```
pub fn core_rules(engine: &mut RuleEngine) {
    for ability in ABILITIES {
        let score = ability_attr(ability);
        engine.add_rule(
            score.clone(),
            AttrKey::scoped("abilityBoosts", ability),
            Operator::Add,
            None,
        );
        engine.add_rule(
            ability_modifier(ability),
            score,
            Operator::Set,
            formula("Math.floor((source - 10) / 2)"),
        );
    }

    engine.add_rule(
        AttrKey::new("armorClass"),
        ability_modifier("Dexterity"),
        Operator::Set,
        formula("10 + source"),
    );
    engine.add_rule(
        AttrKey::new("initiative"),
        ability_modifier("Dexterity"),
        Operator::Set,
        None,
    );
    engine.add_rule(
        AttrKey::new("proficiencyBonus"),
        AttrKey::new("level"),
        Operator::Set,
        formula("2 + Math.floor((source - 1) / 4)"),
    );
    engine.add_rule(
        AttrKey::new("hitPoints"),
        ability_modifier("Constitution"),
        Operator::Add,
        formula("source * dict['level']"),
    );
    // Ability saves use the modifier plus proficiency when proficient.
    for ability in ABILITIES {
        let save = AttrKey::scoped("saveModifier", ability);
        engine.add_rule(save.clone(), ability_modifier(ability), Operator::Set, None);
        engine.add_rule(
            save,
            AttrKey::scoped("saveProficiency", ability),
            Operator::Add,
            formula("source ? dict['proficiencyBonus'] : 0"),
        );
    }

    for kind in POOLS {
        engine.define_allocation(kind.allocation_note(), kind.budget_attr());
    }
    for ability in ABILITIES {
        pool_member(engine, PoolKind::AbilityBoost, ability);
        pool_member(engine, PoolKind::Save, ability);
    }
}
