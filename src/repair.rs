//! Constraint repair.
//!
//! `make_valid` nudges a character's inputs until its validation and sanity
//! notes are zero, or until it runs out of passes. It is a bounded
//! heuristic, not a solver: some violations may remain.

use crate::attr_key::AttrKey;
use crate::attributes::Attributes;
use crate::choice::ChoiceType;
use crate::constraint::{Allocation, RequirementConstraint};
use crate::engine::RuleEngine;
use crate::requirement::{CompareOp, Test};
use crate::value::Value;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;

/// One input change made by the repair loop.
#[derive(Debug, Clone, PartialEq)]
pub struct Fix {
    pub note: AttrKey,
    pub attr: AttrKey,
    /// The new input value; `None` when the input was removed.
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepairReport {
    pub passes: usize,
    pub fixes: Vec<Fix>,
    /// Notes still nonzero after the last pass.
    pub remaining: Vec<AttrKey>,
}

impl RepairReport {
    /// True if no constraint note was left nonzero.
    pub fn is_valid(&self) -> bool {
        self.remaining.is_empty()
    }
}

/// Nonzero `validationNotes.*` and `sanityNotes.*`, in key order.
pub fn violations(snapshot: &Attributes) -> Vec<AttrKey> {
    snapshot
        .iter()
        .filter(|(k, v)| k.is_constraint_note() && v.as_number().map_or(v.truthy(), |n| n != 0.0))
        .map(|(k, _)| k.clone())
        .collect()
}

struct Pass<'a, R: Rng + ?Sized> {
    engine: &'a RuleEngine,
    snapshot: Attributes,
    store: &'a mut Attributes,
    rng: &'a mut R,
    changed: HashSet<AttrKey>,
    fixes: Vec<Fix>,
}

impl<'a, R: Rng + ?Sized> Pass<'a, R> {
    fn settable(&self, key: &AttrKey) -> bool {
        !self.changed.contains(key)
            && (self.store.contains_key(key.as_str()) || !self.engine.is_derived(key))
    }

    fn write(&mut self, note: &AttrKey, attr: &AttrKey, value: Option<Value>) {
        tracing::debug!(note = %note, attr = %attr, value = ?value, "repair");
        self.store.put(attr.clone(), value.clone());
        self.changed.insert(attr.clone());
        self.fixes.push(Fix {
            note: note.clone(),
            attr: attr.clone(),
            value,
        });
    }

    fn fix(&mut self, note: &AttrKey) {
        let engine = self.engine;
        if let Some(allocation) = engine.allocation(note) {
            self.fix_allocation(allocation);
        } else if let Some(constraint) = engine.requirement(note) {
            self.fix_requirement(constraint);
        } else {
            tracing::debug!(note = %note, "no repair strategy");
        }
    }

    /// Close the whole gap between `sum(members)` and the budget, picking
    /// members in random order.
    fn fix_allocation(&mut self, allocation: &Allocation) {
        let mut excess = self.snapshot.number(allocation.note.as_str()).unwrap_or(0.0);
        let mut members: Vec<&AttrKey> = allocation
            .member_keys()
            .filter(|k| !self.changed.contains(*k))
            .collect();
        if excess > 0.0 {
            members.retain(|k| self.store.truthy(k.as_str()));
            members.shuffle(&mut *self.rng);
            for member in members {
                if excess <= 0.0 {
                    break;
                }
                let current = self.store.number(member.as_str()).unwrap_or(1.0);
                let value = (current > excess).then(|| Value::from(current - excess));
                excess -= current;
                self.write(&allocation.note, member, value);
            }
        } else {
            let engine = self.engine;
            let snapshot = &self.snapshot;
            members.retain(|k| !self.store.truthy(k.as_str()) && requirements_met(engine, k, snapshot));
            members.shuffle(&mut *self.rng);
            for member in members {
                if excess > -1.0 {
                    break;
                }
                excess += 1.0;
                self.write(&allocation.note, member, Some(Value::from(1)));
            }
        }
    }

    fn fix_requirement(&mut self, constraint: &RequirementConstraint) {
        let unmet = constraint.requirement.unmet_clauses(&self.snapshot);
        if let Some(clause) = unmet.choose(&mut *self.rng) {
            let mut alternatives: Vec<&Test> = clause.alternatives.iter().collect();
            alternatives.shuffle(&mut *self.rng);
            for test in alternatives {
                if let Some((attr, value)) = self.satisfy(test) {
                    self.write(&constraint.note, &attr, value);
                    return;
                }
            }
        }
        self.deselect(constraint);
    }

    /// The input change that would make `test` hold, if one is known.
    fn satisfy(&mut self, test: &Test) -> Option<(AttrKey, Option<Value>)> {
        let key = test.attr()?.clone();
        if !self.settable(&key) {
            return None;
        }
        let enum_type = ChoiceType::ALL
            .into_iter()
            .find(|t| t.selector_attr().as_ref() == Some(&key));
        let Some((op, value)) = &test.comparison else {
            return (!self.engine.is_derived(&key)).then(|| (key, Some(Value::from(1))));
        };
        if let Some(kind) = enum_type {
            let names = self.engine.choice_names(kind);
            let candidates: Vec<&String> = names
                .iter()
                .filter(|name| {
                    let mut trial = Attributes::new();
                    trial.set(key.clone(), name.as_str());
                    test.holds(&trial)
                })
                .collect();
            let pick = candidates.choose(&mut *self.rng)?;
            return Some((key, Some(Value::from(pick.as_str()))));
        }
        let Some(target) = value.as_number() else {
            return match op {
                CompareOp::Eq => Some((key, Some(value.clone()))),
                CompareOp::Ne => Some((key, None)),
                _ => None,
            };
        };
        let target = match op {
            CompareOp::Ge | CompareOp::Le | CompareOp::Eq => target,
            CompareOp::Gt | CompareOp::Ne => target + 1.0,
            CompareOp::Lt => target - 1.0,
            CompareOp::Matches | CompareOp::NotMatches => return None,
        };
        let current = self.snapshot.number(key.as_str()).unwrap_or(0.0);
        let input = self.store.number(key.as_str()).unwrap_or(0.0);
        Some((key, Some(Value::from(input + target - current))))
    }

    /// Undo whatever activates the requirement.
    fn deselect(&mut self, constraint: &RequirementConstraint) {
        let selector = &constraint.selector;
        if self.store.contains_key(selector.as_str()) && !self.changed.contains(selector) {
            self.write(&constraint.note, selector, None);
            return;
        }
        // Identity choices are selected through a single attribute such as
        // `race`; swap in a different choice of the same type.
        let Some(origin) = &constraint.origin else {
            return;
        };
        let Some(kind) = origin.kind.parse::<ChoiceType>().ok() else {
            return;
        };
        let Some(attr) = kind.selector_attr() else {
            return;
        };
        if self.changed.contains(&attr) {
            return;
        }
        let others: Vec<String> = self
            .engine
            .choice_names(kind)
            .into_iter()
            .filter(|n| *n != origin.name)
            .collect();
        match others.choose(&mut *self.rng) {
            Some(other) => self.write(&constraint.note, &attr, Some(Value::from(other.as_str()))),
            None => self.write(&constraint.note, &attr, None),
        }
    }
}

/// True unless a requirement selected by `member` is unmet.
fn requirements_met(engine: &RuleEngine, member: &AttrKey, snapshot: &Attributes) -> bool {
    engine
        .requirements()
        .filter(|r| &r.selector == member)
        .all(|r| r.requirement.is_met(snapshot))
}

/// Repair `store` in place.
pub fn make_valid<R: Rng + ?Sized>(
    engine: &RuleEngine,
    store: &mut Attributes,
    rng: &mut R,
) -> RepairReport {
    let mut report = RepairReport::default();
    let mut snapshot = engine.apply_rules(store);
    for _ in 0..engine.config().repair_passes {
        let notes = violations(&snapshot);
        if notes.is_empty() {
            break;
        }
        report.passes += 1;
        let mut pass = Pass {
            engine,
            snapshot,
            store: &mut *store,
            rng: &mut *rng,
            changed: HashSet::new(),
            fixes: Vec::new(),
        };
        for note in &notes {
            pass.fix(note);
        }
        let fixes = pass.fixes;
        snapshot = engine.apply_rules(store);
        if fixes.is_empty() {
            tracing::debug!(remaining = notes.len(), "repair made no progress");
            break;
        }
        report.fixes.extend(fixes);
    }
    report.remaining = violations(&snapshot);
    report
}

impl RuleEngine {
    /// See [`make_valid`].
    pub fn make_valid<R: Rng + ?Sized>(&self, store: &mut Attributes, rng: &mut R) -> RepairReport {
        make_valid(self, store, rng)
    }
}
