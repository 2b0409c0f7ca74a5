//! Feature and selectable lists.
//!
//! Classes, races, backgrounds and paths list what they grant as
//! `[<prereq> ? ]<level>:<name>[:<group>]` entries.

use crate::attr_key::{camelize, AttrKey};
use crate::engine::RuleEngine;
use crate::error::RuleError;
use crate::formula::{BinaryOp, Expr, Formula};
use crate::note_grammar::grammar_rules;
use crate::requirement::{requirement_rules, Requirement};
use crate::rule::Operator;

/// One parsed feature-list entry.
///
/// # Examples
///
/// ```rust
/// use rulegraph::feature_list::FeatureSpec;
///
/// let spec = FeatureSpec::parse("features.Fighting Style ? 3:Martial Adept:Maneuver").unwrap();
/// assert_eq!(spec.level, 3);
/// assert_eq!(spec.name, "Martial Adept");
/// assert_eq!(spec.group.as_deref(), Some("Maneuver"));
/// assert!(spec.prerequisite.is_some());
///
/// assert_eq!(FeatureSpec::parse("Darkvision").unwrap().level, 1);
/// ```
#[derive(Debug, Clone)]
pub struct FeatureSpec {
    pub prerequisite: Option<Requirement>,
    pub level: u32,
    pub name: String,
    pub group: Option<String>,
}

impl FeatureSpec {
    pub fn parse(text: &str) -> Result<FeatureSpec, RuleError> {
        let (prerequisite, rest) = match text.split_once(" ? ") {
            Some((prereq, rest)) => (Some(Requirement::parse(prereq)?), rest),
            None => (None, text),
        };
        let mut parts = rest.splitn(3, ':').map(str::trim);
        let first = parts.next().unwrap_or_default();
        let (level, name, group) = match first.parse::<u32>() {
            Ok(level) => (level, parts.next().unwrap_or_default(), parts.next()),
            Err(_) => (1, first, parts.next()),
        };
        if name.is_empty() {
            return Err(RuleError::attributes(text, "feature has no name"));
        }
        Ok(FeatureSpec {
            prerequisite,
            level,
            name: name.to_string(),
            group: group.filter(|g| !g.is_empty()).map(str::to_string),
        })
    }
}

/// The input attribute a player sets to pick one of `owner`'s selectables.
pub fn selectable_key(owner: &str, name: &str) -> AttrKey {
    AttrKey::scoped("selectableFeatures", &format!("{} - {}", owner, name))
}

/// Budget for one selectable group of `owner`.
pub fn selectable_budget(owner: &str, group: Option<&str>) -> AttrKey {
    match group {
        Some(g) => AttrKey::scoped("selectableFeatureCount", &format!("{} ({})", owner, g)),
        None => AttrKey::scoped("selectableFeatureCount", owner),
    }
}

/// Allocation note checking [`selectable_budget`].
pub fn selectable_allocation(owner: &str, group: Option<&str>) -> AttrKey {
    let stem = format!("{}SelectableFeatureAllocation", camelize(owner));
    match group {
        Some(g) => AttrKey::scoped("validationNotes", &format!("{} ({})", stem, g)),
        None => AttrKey::scoped("validationNotes", &stem),
    }
}

fn level_formula(level: u32, then: Expr) -> Formula {
    Formula::from_expr(
        Expr::ternary(
            Expr::binary(BinaryOp::Ge, Expr::Source, Expr::number(level as f64)),
            then,
            Expr::Null,
        ),
        format!("source >= {} ? 1 : null", level),
    )
}

/// Register the rules for an owner's fixed features and selectables.
///
/// Malformed entries are logged and skipped.
pub fn feature_list_rules(
    engine: &mut RuleEngine,
    owner: &str,
    level_attr: &AttrKey,
    features: &[String],
    selectables: &[String],
) {
    let owner_prefix = format!("{}Features", camelize(owner));
    for (text, selectable) in features
        .iter()
        .map(|t| (t, false))
        .chain(selectables.iter().map(|t| (t, true)))
    {
        let spec = match FeatureSpec::parse(text) {
            Ok(spec) => spec,
            Err(err) => {
                tracing::warn!(owner, error = %err, "feature entry skipped");
                continue;
            }
        };
        let owned = AttrKey::scoped(&owner_prefix, &spec.name);
        if let Some(prereq) = &spec.prerequisite {
            engine.add_rule(
                owned.clone(),
                level_attr.clone(),
                Operator::Gate,
                Some(Formula::from_expr(prereq.to_expr(), prereq.text.clone())),
            );
        }
        if selectable {
            selectable_rules(engine, owner, level_attr, &owned, &spec);
        } else {
            engine.add_rule(
                owned.clone(),
                level_attr.clone(),
                Operator::Set,
                Some(level_formula(spec.level, Expr::number(1.0))),
            );
        }
        engine.add_rule(AttrKey::scoped("features", &spec.name), owned.clone(), Operator::Add, None);
        grammar_rules(engine, &owned, &spec.name);
    }
}

fn selectable_rules(
    engine: &mut RuleEngine,
    owner: &str,
    level_attr: &AttrKey,
    owned: &AttrKey,
    spec: &FeatureSpec,
) {
    let chosen = selectable_key(owner, &spec.name);
    engine.add_rule(
        owned.clone(),
        level_attr.clone(),
        Operator::Gate,
        Some(Formula::from_expr(
            Expr::binary(BinaryOp::Ge, Expr::Source, Expr::number(spec.level as f64)),
            format!("source >= {}", spec.level),
        )),
    );
    engine.add_rule(owned.clone(), chosen.clone(), Operator::Set, None);

    let group = spec.group.as_deref();
    let note = selectable_allocation(owner, group);
    engine.define_allocation(note.clone(), selectable_budget(owner, group));
    engine.add_allocation_member(&note, chosen.clone());

    let mut clauses = format!("{} >= {}", level_attr, spec.level);
    if let Some(prereq) = &spec.prerequisite {
        clauses.push('/');
        clauses.push_str(&prereq.text);
    }
    match Requirement::parse(&clauses) {
        Ok(req) => {
            let note_name = format!("{}SelectableFeature", camelize(&format!("{} {}", owner, spec.name)));
            requirement_rules(engine, "validation", &note_name, &chosen, req);
        }
        Err(err) => tracing::warn!(owner, error = %err, "selectable requirement skipped"),
    }
}
