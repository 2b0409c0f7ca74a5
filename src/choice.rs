//! Choices and `choice_rules`.
//!
//! A choice is a named content item (a class, a feat, a spell...) described
//! by an attribute string. Registering a choice parses the string and adds
//! the rules it implies, all tagged with the choice's identity so
//! [`RuleEngine::remove_choice`] can retract them.

use crate::attr_key::{camelize, AttrKey};
use crate::attr_table::AttrTable;
use crate::constraint::PoolKind;
use crate::engine::RuleEngine;
use crate::error::RuleError;
use crate::feature_list::feature_list_rules;
use crate::formula::{BinaryOp, Expr, Formula};
use crate::note_grammar::{grammar_rules, grant_rules, pool_member, Item};
use crate::requirement::{requirement_rules, Requirement};
use crate::rule::{ChoiceId, Operator};
use crate::value::Value;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kinds of content a rule set defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChoiceType {
    Armor,
    Background,
    Class,
    Deity,
    Feat,
    Feature,
    Goody,
    Language,
    Path,
    Race,
    School,
    Shield,
    Skill,
    Spell,
    Tool,
    Weapon,
}

impl ChoiceType {
    pub const ALL: [ChoiceType; 16] = [
        ChoiceType::Armor,
        ChoiceType::Background,
        ChoiceType::Class,
        ChoiceType::Deity,
        ChoiceType::Feat,
        ChoiceType::Feature,
        ChoiceType::Goody,
        ChoiceType::Language,
        ChoiceType::Path,
        ChoiceType::Race,
        ChoiceType::School,
        ChoiceType::Shield,
        ChoiceType::Skill,
        ChoiceType::Spell,
        ChoiceType::Tool,
        ChoiceType::Weapon,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ChoiceType::Armor => "Armor",
            ChoiceType::Background => "Background",
            ChoiceType::Class => "Class",
            ChoiceType::Deity => "Deity",
            ChoiceType::Feat => "Feat",
            ChoiceType::Feature => "Feature",
            ChoiceType::Goody => "Goody",
            ChoiceType::Language => "Language",
            ChoiceType::Path => "Path",
            ChoiceType::Race => "Race",
            ChoiceType::School => "School",
            ChoiceType::Shield => "Shield",
            ChoiceType::Skill => "Skill",
            ChoiceType::Spell => "Spell",
            ChoiceType::Tool => "Tool",
            ChoiceType::Weapon => "Weapon",
        }
    }

    /// Attribute keys an editor may set for this type.
    pub fn recognized_keys(self) -> &'static [&'static str] {
        match self {
            ChoiceType::Armor => &["AC", "Weight"],
            ChoiceType::Background => &["Equipment", "Features", "Languages"],
            ChoiceType::Class => &[
                "Require",
                "HitDie",
                "Features",
                "Selectables",
                "Languages",
                "CasterLevelArcane",
                "CasterLevelDivine",
                "SpellAbility",
                "SpellSlots",
            ],
            ChoiceType::Deity => &["Alignment", "Domain"],
            ChoiceType::Feat => &["Require", "Imply", "Type"],
            ChoiceType::Feature => &["Section", "Note"],
            ChoiceType::Goody => &["Pattern", "Effect", "Value", "Attribute", "Section", "Note"],
            ChoiceType::Language => &[],
            ChoiceType::Path => &["Group", "Level", "Features", "Selectables", "SpellAbility", "SpellSlots"],
            ChoiceType::Race => &["Require", "Features", "Selectables", "Languages", "SpellSlots"],
            ChoiceType::School => &["Abbreviation"],
            ChoiceType::Shield => &["AC"],
            ChoiceType::Skill => &["Ability", "Class"],
            ChoiceType::Spell => &["School", "Level", "Description"],
            ChoiceType::Tool => &["Type"],
            ChoiceType::Weapon => &["Category", "Property", "Damage", "Range"],
        }
    }

    /// The single-valued input attribute that selects a choice of this
    /// type, for types a character has exactly one of.
    pub fn selector_attr(self) -> Option<AttrKey> {
        Some(AttrKey::new(match self {
            ChoiceType::Armor => "armor",
            ChoiceType::Background => "background",
            ChoiceType::Deity => "deity",
            ChoiceType::Race => "race",
            ChoiceType::Shield => "shield",
            _ => return None,
        }))
    }
}

impl fmt::Display for ChoiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChoiceType {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChoiceType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| RuleError::UnknownChoiceType(s.to_string()))
    }
}

/// A registered choice and its parsed attributes.
#[derive(Debug, Clone)]
pub struct Choice {
    pub kind: ChoiceType,
    pub name: String,
    pub attrs: AttrTable,
}

impl Choice {
    /// The origin tag of every rule this choice registered.
    pub fn id(&self) -> ChoiceId {
        ChoiceId::new(self.kind.as_str(), self.name.clone())
    }

    /// First value of an attribute, e.g. `HitDie`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attrs.get(key)
    }

    pub fn get_list(&self, key: &str) -> &[String] {
        self.attrs.get_list(key)
    }

    /// `Feat` types; `General` when none is given.
    pub fn feat_types(&self) -> Vec<String> {
        let types = self.get_list("Type");
        if types.is_empty() {
            vec!["General".to_string()]
        } else {
            types.to_vec()
        }
    }

    /// Input attributes for a spell, one per `<group><level>` listing:
    /// `spells.Fire Bolt (W0)`.
    pub fn spell_keys(&self) -> Vec<AttrKey> {
        self.get_list("Level")
            .iter()
            .map(|level| AttrKey::scoped("spells", &format!("{} ({})", self.name, level)))
            .collect()
    }
}

impl RuleEngine {
    /// Register a choice from a type name. Unknown types are an error.
    pub fn define_choice(&mut self, kind: &str, name: &str, attrs: &str) -> Result<(), RuleError> {
        let kind = kind.parse::<ChoiceType>()?;
        self.choice_rules(kind, name, attrs);
        Ok(())
    }

    /// Register a choice and the rules its attributes imply.
    ///
    /// A previous registration of the same choice is removed first.
    /// Malformed attribute text is logged and the well-formed part is still
    /// registered.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rulegraph::{Attributes, ChoiceType, RuleEngine};
    ///
    /// let mut engine = RuleEngine::new();
    /// engine.choice_rules(ChoiceType::Feat, "Defensive Duelist", r#"Require="dexterity >= 13""#);
    ///
    /// let mut character = Attributes::new();
    /// character.set("feats.Defensive Duelist", 1);
    /// character.set("dexterity", 10);
    /// let sheet = engine.apply_rules(&character);
    /// assert_eq!(sheet.number("validationNotes.defensiveDuelistFeat"), Some(1.0));
    /// ```
    pub fn choice_rules(&mut self, kind: ChoiceType, name: &str, attrs: &str) {
        let (table, errors) = AttrTable::parse_lossy(attrs);
        for err in &errors {
            tracing::warn!(kind = %kind, name, error = %err, "malformed attributes");
        }
        for key in table.keys() {
            if !kind.recognized_keys().contains(&key) {
                tracing::warn!(kind = %kind, name, key, "unrecognized attribute");
            }
        }
        if self.choice(kind, name).is_some() {
            self.remove_choice(kind, name);
        }
        let choice = Choice {
            kind,
            name: name.to_string(),
            attrs: table,
        };
        self.with_origin(choice.id(), |engine| {
            match kind {
                ChoiceType::Armor => armor_rules(engine, &choice, "armor"),
                ChoiceType::Background => background_rules(engine, &choice),
                ChoiceType::Class => class_rules(engine, &choice),
                ChoiceType::Feat => feat_rules(engine, &choice),
                ChoiceType::Feature => feature_rules(engine, &choice),
                ChoiceType::Goody => goody_rules(engine, &choice),
                ChoiceType::Language => pool_member(engine, PoolKind::Language, name),
                ChoiceType::Path => path_rules(engine, &choice),
                ChoiceType::Race => race_rules(engine, &choice),
                ChoiceType::Shield => armor_rules(engine, &choice, "shield"),
                ChoiceType::Skill => skill_rules(engine, &choice),
                ChoiceType::Tool => pool_member(engine, PoolKind::Tool, name),
                ChoiceType::Weapon => pool_member(engine, PoolKind::Weapon, name),
                ChoiceType::Deity | ChoiceType::School | ChoiceType::Spell => {}
            }
        });
        self.insert_choice(choice);
    }

    /// Remove a choice and everything it registered. Returns false if it
    /// was not registered.
    pub fn remove_choice(&mut self, kind: ChoiceType, name: &str) -> bool {
        match self.take_choice(kind, name) {
            Some(choice) => {
                self.remove_origin(&choice.id());
                true
            }
            None => false,
        }
    }
}

fn equals_name(name: &str) -> Formula {
    Formula::from_expr(
        Expr::binary(BinaryOp::Eq, Expr::Source, Expr::text(name)),
        format!("source == '{}'", name),
    )
}

fn requirement_note(
    engine: &mut RuleEngine,
    choice: &Choice,
    key: &str,
    section: &str,
    suffix: &str,
    selector: &AttrKey,
) {
    let items = choice.get_list(key);
    if items.is_empty() {
        return;
    }
    match Requirement::parse_all(items) {
        Ok(req) => {
            let note = format!("{}{}", camelize(&choice.name), suffix);
            requirement_rules(engine, section, &note, selector, req);
        }
        Err(err) => tracing::warn!(name = %choice.name, error = %err, "requirement skipped"),
    }
}

/// `Languages=Common,any` style lists.
fn language_rules(engine: &mut RuleEngine, gate: &AttrKey, languages: &[String]) {
    let items = languages
        .iter()
        .map(|l| {
            if l.eq_ignore_ascii_case("any") {
                Item::Choose {
                    count: 1,
                    options: None,
                }
            } else {
                Item::Grant {
                    name: l.clone(),
                    amount: 1.0,
                }
            }
        })
        .collect();
    grant_rules(engine, gate, PoolKind::Language, items);
}

/// `<camel>Level` is the character level while `selector == name`.
fn identity_level(engine: &mut RuleEngine, choice: &Choice, selector: &str) -> AttrKey {
    let level_attr = AttrKey::new(&format!("{}Level", camelize(&choice.name)));
    engine.add_rule(
        level_attr.clone(),
        AttrKey::new(selector),
        Operator::Gate,
        Some(equals_name(&choice.name)),
    );
    engine.add_rule(level_attr.clone(), AttrKey::new("level"), Operator::Set, None);
    level_attr
}

fn background_rules(engine: &mut RuleEngine, choice: &Choice) {
    let level_attr = identity_level(engine, choice, "background");
    feature_list_rules(engine, &choice.name, &level_attr, choice.get_list("Features"), &[]);
    language_rules(engine, &level_attr, choice.get_list("Languages"));
}

fn race_rules(engine: &mut RuleEngine, choice: &Choice) {
    let level_attr = identity_level(engine, choice, "race");
    requirement_note(engine, choice, "Require", "validation", "Race", &level_attr);
    feature_list_rules(
        engine,
        &choice.name,
        &level_attr,
        choice.get_list("Features"),
        choice.get_list("Selectables"),
    );
    language_rules(engine, &level_attr, choice.get_list("Languages"));
    spell_slot_rules(engine, &level_attr, choice.get_list("SpellSlots"));
}

fn class_rules(engine: &mut RuleEngine, choice: &Choice) {
    let class_level = AttrKey::scoped("levels", &choice.name);
    engine.add_rule(AttrKey::new("level"), class_level.clone(), Operator::Add, None);
    requirement_note(engine, choice, "Require", "validation", "Class", &class_level);
    feature_list_rules(
        engine,
        &choice.name,
        &class_level,
        choice.get_list("Features"),
        choice.get_list("Selectables"),
    );
    language_rules(engine, &class_level, choice.get_list("Languages"));

    let caster_level = AttrKey::scoped("casterLevels", &choice.name);
    for (key, total) in [
        ("CasterLevelArcane", "casterLevelArcane"),
        ("CasterLevelDivine", "casterLevelDivine"),
    ] {
        if let Some(text) = choice.get(key) {
            if value_rule(engine, &caster_level, &class_level, text) {
                engine.add_rule(AttrKey::new(total), caster_level.clone(), Operator::Add, None);
            }
        }
    }
    if let Some(ability) = choice.get("SpellAbility") {
        spell_ability_rules(engine, &choice.name, ability, &caster_level);
    }
    spell_slot_rules(engine, &class_level, choice.get_list("SpellSlots"));
}

fn path_rules(engine: &mut RuleEngine, choice: &Choice) {
    let level_attr = AttrKey::new(&format!("{}Level", camelize(&choice.name)));
    let source = match (choice.get("Level"), choice.get("Group")) {
        (Some(level), _) => AttrKey::new(level),
        (None, Some(group)) => AttrKey::scoped("levels", group),
        (None, None) => AttrKey::new("level"),
    };
    engine.add_rule(
        level_attr.clone(),
        AttrKey::scoped("features", &choice.name),
        Operator::Gate,
        None,
    );
    engine.add_rule(level_attr.clone(), source, Operator::Set, None);
    feature_list_rules(
        engine,
        &choice.name,
        &level_attr,
        choice.get_list("Features"),
        choice.get_list("Selectables"),
    );
    if let Some(ability) = choice.get("SpellAbility") {
        let caster_level = AttrKey::scoped("casterLevels", &choice.name);
        engine.add_rule(caster_level.clone(), level_attr.clone(), Operator::Set, None);
        spell_ability_rules(engine, &choice.name, ability, &caster_level);
    }
    spell_slot_rules(engine, &level_attr, choice.get_list("SpellSlots"));
}

/// `target = text`, where `text` is a formula over `source` or the name of
/// another attribute. Returns false if neither parses.
fn value_rule(engine: &mut RuleEngine, target: &AttrKey, source: &AttrKey, text: &str) -> bool {
    match Formula::parse(text) {
        Ok(formula) => {
            engine.add_rule(target.clone(), source.clone(), Operator::Set, Some(formula));
            true
        }
        Err(_) if !text.is_empty() && !text.contains(char::is_whitespace) => {
            engine.add_rule(target.clone(), AttrKey::new(text), Operator::Set, None);
            true
        }
        Err(err) => {
            tracing::warn!(target = %target, error = %err, "value skipped");
            false
        }
    }
}

fn spell_ability_rules(engine: &mut RuleEngine, owner: &str, ability: &str, caster_level: &AttrKey) {
    let attack = AttrKey::scoped("spellAttackModifier", owner);
    let difficulty = AttrKey::scoped("spellDifficultyClass", owner);
    let modifier = AttrKey::new(&format!("{}Modifier", ability.to_lowercase()));
    engine.add_rule(attack.clone(), caster_level.clone(), Operator::Gate, None);
    engine.add_rule(attack.clone(), modifier, Operator::Set, None);
    engine.add_rule(attack.clone(), AttrKey::new("proficiencyBonus"), Operator::Add, None);
    engine.add_rule(difficulty.clone(), caster_level.clone(), Operator::Gate, None);
    engine.add_rule(
        difficulty,
        attack,
        Operator::Set,
        Some(Formula::from_expr(
            Expr::binary(BinaryOp::Add, Expr::Source, Expr::number(8.0)),
            "source + 8",
        )),
    );
}

/// Parse `W1:1=2;2=3;3=4` into (`W1`, [(1, 2), (2, 3), (3, 4)]).
pub fn parse_spell_slots(text: &str) -> Result<(String, Vec<(f64, f64)>), RuleError> {
    let (slot, table) = text
        .split_once(':')
        .ok_or_else(|| RuleError::attributes(text, "spell slots need `<slot>:<table>`"))?;
    let mut steps = Vec::new();
    for step in table.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let (level, count) = step
            .split_once('=')
            .ok_or_else(|| RuleError::attributes(text, format!("bad step `{}`", step)))?;
        let level: f64 = level
            .trim()
            .parse()
            .map_err(|_| RuleError::attributes(text, format!("bad level `{}`", level)))?;
        let count: f64 = count
            .trim()
            .parse()
            .map_err(|_| RuleError::attributes(text, format!("bad count `{}`", count)))?;
        steps.push((level, count));
    }
    if slot.trim().is_empty() || steps.is_empty() {
        return Err(RuleError::attributes(text, "empty spell slot table"));
    }
    steps.sort_by(|a, b| a.0.total_cmp(&b.0));
    Ok((slot.trim().to_string(), steps))
}

fn spell_slot_rules(engine: &mut RuleEngine, level_attr: &AttrKey, tables: &[String]) {
    for text in tables {
        let (slot, steps) = match parse_spell_slots(text) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!(error = %err, "spell slots skipped");
                continue;
            }
        };
        // source >= highest ? n : ... : source >= lowest ? m : null
        let expr = steps.iter().fold(Expr::Null, |otherwise, &(level, count)| {
            Expr::ternary(
                Expr::binary(BinaryOp::Ge, Expr::Source, Expr::number(level)),
                Expr::number(count),
                otherwise,
            )
        });
        engine.add_rule(
            AttrKey::scoped("spellSlots", &slot),
            level_attr.clone(),
            Operator::Add,
            Some(Formula::from_expr(expr, text.clone())),
        );
    }
}

fn feat_rules(engine: &mut RuleEngine, choice: &Choice) {
    let selector = AttrKey::scoped("feats", &choice.name);
    requirement_note(engine, choice, "Require", "validation", "Feat", &selector);
    requirement_note(engine, choice, "Imply", "sanity", "Feat", &selector);
    engine.add_rule(AttrKey::scoped("features", &choice.name), selector.clone(), Operator::Add, None);
    for feat_type in choice.feat_types() {
        let note = AttrKey::scoped(
            "validationNotes",
            &format!("{}FeatAllocation", camelize(&feat_type)),
        );
        engine.define_allocation(note.clone(), AttrKey::scoped("featCount", &feat_type));
        engine.add_allocation_member(&note, selector.clone());
    }
}

fn feature_rules(engine: &mut RuleEngine, choice: &Choice) {
    let sections = choice.get_list("Section");
    let notes = choice.get_list("Note");
    if sections.len() != notes.len() {
        tracing::warn!(
            name = %choice.name,
            sections = sections.len(),
            notes = notes.len(),
            "Section and Note counts differ"
        );
    }
    let feature = AttrKey::scoped("features", &choice.name);
    let mut used = Vec::new();
    for (section, text) in sections.iter().zip(notes) {
        if used.contains(&section) {
            tracing::warn!(name = %choice.name, section = %section, "duplicate note section skipped");
            continue;
        }
        used.push(section);
        let note = AttrKey::scoped(&format!("{}Notes", section), &camelize(&choice.name));
        if text.contains("%V") {
            engine.add_rule(note.clone(), feature.clone(), Operator::Gate, None);
        } else {
            engine.add_rule(note.clone(), feature.clone(), Operator::Set, None);
        }
        engine.define_note(note.clone(), text.clone());
        grammar_rules(engine, &note, text);
    }
}

fn skill_rules(engine: &mut RuleEngine, choice: &Choice) {
    let modifier = AttrKey::scoped("skillModifier", &choice.name);
    let proficiency = AttrKey::scoped("skillProficiency", &choice.name);
    if let Some(ability) = choice.get("Ability") {
        engine.add_rule(
            modifier.clone(),
            AttrKey::new(&format!("{}Modifier", ability.to_lowercase())),
            Operator::Set,
            None,
        );
    }
    engine.add_rule(
        modifier,
        proficiency,
        Operator::Add,
        Some(Formula::from_expr(
            Expr::ternary(Expr::Source, Expr::attr("proficiencyBonus"), Expr::number(0.0)),
            "source ? dict['proficiencyBonus'] : 0",
        )),
    );
    pool_member(engine, PoolKind::Skill, &choice.name);
}

fn armor_rules(engine: &mut RuleEngine, choice: &Choice, selector: &str) {
    let Some(ac) = choice.attrs.get_number("AC") else {
        return;
    };
    let expr = Expr::ternary(
        Expr::binary(BinaryOp::Eq, Expr::Source, Expr::text(choice.name.as_str())),
        Expr::number(ac),
        Expr::Null,
    );
    engine.add_rule(
        AttrKey::new("armorClass"),
        AttrKey::new(selector),
        Operator::Add,
        Some(Formula::from_expr(expr, format!("source == '{}' ? {} : null", choice.name, ac))),
    );
}

fn goody_rules(engine: &mut RuleEngine, choice: &Choice) {
    let (Some(pattern), Some(attribute)) = (choice.get("Pattern"), choice.get("Attribute")) else {
        tracing::warn!(name = %choice.name, "goody needs Pattern and Attribute");
        return;
    };
    let regex = match Regex::new(pattern) {
        Ok(re) => re,
        Err(err) => {
            tracing::warn!(name = %choice.name, error = %err, "goody pattern skipped");
            return;
        }
    };
    let count = AttrKey::scoped("goodies", &format!("{} Count", choice.name));
    let matches = Expr::Matches(Box::new(Expr::Source), regex);
    engine.add_rule(
        count.clone(),
        AttrKey::new("notes"),
        Operator::Set,
        Some(Formula::from_expr(
            Expr::ternary(
                Expr::binary(BinaryOp::Gt, matches.clone(), Expr::number(0.0)),
                matches,
                Expr::Null,
            ),
            format!("matches(source, '{}')", pattern),
        )),
    );

    let value = choice.attrs.get_number("Value").unwrap_or(1.0);
    let (op, expr) = match choice.get("Effect").unwrap_or("add") {
        "add" => (
            Operator::Add,
            Expr::binary(BinaryOp::Mul, Expr::Source, Expr::number(value)),
        ),
        "lower" => (Operator::Min, Expr::number(value)),
        "raise" => (Operator::Max, Expr::number(value)),
        "set" => (Operator::Set, Expr::number(value)),
        other => {
            tracing::warn!(name = %choice.name, effect = other, "unknown goody effect");
            return;
        }
    };
    engine.add_rule(
        AttrKey::new(attribute),
        count.clone(),
        op,
        Some(Formula::from_expr(expr, Value::from(value).to_string())),
    );
    if let (Some(section), Some(note)) = (choice.get("Section"), choice.get("Note")) {
        let note_key = AttrKey::scoped(&format!("{}Notes", section), &camelize(&choice.name));
        engine.add_rule(note_key.clone(), count, Operator::Set, None);
        engine.define_note(note_key, note);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::Attributes;

    #[test]
    fn test_choice_type_parse() {
        assert_eq!("feat".parse::<ChoiceType>().unwrap(), ChoiceType::Feat);
        assert!(matches!("Gizmo".parse::<ChoiceType>(), Err(RuleError::UnknownChoiceType(_))));
        assert!(ChoiceType::Background.recognized_keys().contains(&"Languages"));
    }

    #[test]
    fn test_define_choice_unknown_type() {
        let mut engine = RuleEngine::new();
        assert!(engine.define_choice("Gizmo", "Widget", "").is_err());
        assert!(engine.define_choice("Language", "Elvish", "").is_ok());
        assert_eq!(engine.choice_names(ChoiceType::Language), vec!["Elvish".to_string()]);
    }

    #[test]
    fn test_feat_requirement_and_allocation() {
        let mut engine = RuleEngine::new();
        engine.choice_rules(ChoiceType::Feat, "Grappler", r#"Require="strength >= 13""#);
        engine.choice_rules(ChoiceType::Feat, "Alert", "");

        let mut c = Attributes::new();
        c.set("feats.Grappler", 1);
        c.set("feats.Alert", 1);
        c.set("featCount.General", 1);
        c.set("strength", 12);
        let sheet = engine.apply_rules(&c);
        assert_eq!(sheet.number("validationNotes.grapplerFeat"), Some(1.0));
        assert_eq!(sheet.number("validationNotes.generalFeatAllocation"), Some(1.0));
        assert_eq!(sheet.number("features.Alert"), Some(1.0));
    }

    #[test]
    fn test_feature_note_and_adjustment() {
        let mut engine = RuleEngine::new();
        engine.choice_rules(ChoiceType::Feature, "Tough", r#"Section=combat Note="+2 Hit Points""#);
        assert_eq!(
            engine.note_format(&AttrKey::new("combatNotes.tough")),
            Some("+2 Hit Points")
        );
        let mut c = Attributes::new();
        c.set("features.Tough", 1);
        c.set("hitPoints", 10);
        let sheet = engine.apply_rules(&c);
        assert_eq!(sheet.number("combatNotes.tough"), Some(1.0));
        assert_eq!(sheet.number("hitPoints"), Some(12.0));
    }

    #[test]
    fn test_percent_v_note_is_gate_only() {
        let mut engine = RuleEngine::new();
        engine.choice_rules(ChoiceType::Feature, "Rage", r#"Section=combat Note="+%V melee damage""#);
        let mut c = Attributes::new();
        c.set("features.Rage", 1);
        assert!(engine.apply_rules(&c).get("combatNotes.rage").is_none());
        engine
            .define_rule("combatNotes.rage", "levels.Barbarian", "=", Some("source < 9 ? 2 : 3"))
            .unwrap();
        c.set("levels.Barbarian", 9);
        assert_eq!(engine.apply_rules(&c).number("combatNotes.rage"), Some(3.0));
        c.remove("features.Rage");
        assert!(engine.apply_rules(&c).get("combatNotes.rage").is_none());
    }

    #[test]
    fn test_class_levels_and_spell_slots() {
        let mut engine = RuleEngine::new();
        engine.choice_rules(
            ChoiceType::Class,
            "Wizard",
            r#"Features="1:Arcane Recovery","2:Arcane Tradition" CasterLevelArcane=source SpellAbility=intelligence SpellSlots="W1:1=2;2=3;3=4""#,
        );
        let mut c = Attributes::new();
        c.set("levels.Wizard", 2);
        c.set("intelligenceModifier", 3);
        c.set("proficiencyBonus", 2);
        let sheet = engine.apply_rules(&c);
        assert_eq!(sheet.number("level"), Some(2.0));
        assert_eq!(sheet.number("spellSlots.W1"), Some(3.0));
        assert_eq!(sheet.number("casterLevelArcane"), Some(2.0));
        assert_eq!(sheet.number("spellAttackModifier.Wizard"), Some(5.0));
        assert_eq!(sheet.number("spellDifficultyClass.Wizard"), Some(13.0));
        assert_eq!(sheet.number("features.Arcane Tradition"), Some(1.0));
    }

    #[test]
    fn test_parse_spell_slots() {
        let (slot, steps) = parse_spell_slots("P1:3=2;2=1").unwrap();
        assert_eq!(slot, "P1");
        assert_eq!(steps, vec![(2.0, 1.0), (3.0, 2.0)]);
        assert!(parse_spell_slots("P1").is_err());
        assert!(parse_spell_slots("P1:x=2").is_err());
    }

    #[test]
    fn test_race_level_gate() {
        let mut engine = RuleEngine::new();
        engine.choice_rules(ChoiceType::Race, "Dwarf", r#"Features="1:Darkvision" Languages=Common,Dwarvish"#);
        let mut c = Attributes::new();
        c.set("race", "Elf");
        c.set("level", 1);
        let sheet = engine.apply_rules(&c);
        assert!(sheet.get("dwarfLevel").is_none());
        assert!(sheet.get("features.Darkvision").is_none());

        c.set("race", "Dwarf");
        let sheet = engine.apply_rules(&c);
        assert_eq!(sheet.number("dwarfLevel"), Some(1.0));
        assert_eq!(sheet.number("features.Darkvision"), Some(1.0));
        assert_eq!(sheet.number("languages.Dwarvish"), Some(1.0));
    }

    #[test]
    fn test_re_registration_supersedes() {
        let mut engine = RuleEngine::new();
        engine.choice_rules(ChoiceType::Shield, "Shield", "AC=2");
        engine.choice_rules(ChoiceType::Shield, "Shield", "AC=3");
        let mut c = Attributes::new();
        c.set("armorClass", 10);
        c.set("shield", "Shield");
        assert_eq!(engine.apply_rules(&c).number("armorClass"), Some(13.0));
        assert!(engine.remove_choice(ChoiceType::Shield, "Shield"));
        assert_eq!(engine.apply_rules(&c).number("armorClass"), Some(10.0));
        assert!(!engine.remove_choice(ChoiceType::Shield, "Shield"));
    }

    #[test]
    fn test_goody() {
        let mut engine = RuleEngine::new();
        engine.choice_rules(
            ChoiceType::Goody,
            "Armor Bonus",
            r#"Pattern="\+\d\s+armor" Effect=add Value=1 Attribute=armorClass Section=combat Note="+1 AC""#,
        );
        let mut c = Attributes::new();
        c.set("armorClass", 10);
        c.set("notes", "+1 armor from the ring; +1 armor from the cloak");
        assert_eq!(engine.apply_rules(&c).number("armorClass"), Some(12.0));
        c.set("notes", "nothing");
        assert_eq!(engine.apply_rules(&c).number("armorClass"), Some(10.0));
    }

    #[test]
    fn test_skill_modifier() {
        let mut engine = RuleEngine::new();
        engine.choice_rules(ChoiceType::Skill, "Arcana", "Ability=intelligence Class=Wizard");
        let mut c = Attributes::new();
        c.set("intelligenceModifier", 2);
        c.set("proficiencyBonus", 3);
        assert_eq!(engine.apply_rules(&c).number("skillModifier.Arcana"), Some(2.0));
        c.set("skillProficiency.Arcana", 1);
        assert_eq!(engine.apply_rules(&c).number("skillModifier.Arcana"), Some(5.0));
    }
}
