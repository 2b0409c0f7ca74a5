//! Rule engine module.
//!
//! Provides `RuleEngine`, the main entry point. It owns the rule graph, the
//! choice registry, the note-format registry and the constraint records,
//! and evaluates character attribute stores against them.

use crate::attr_key::AttrKey;
use crate::attributes::Attributes;
use crate::choice::{Choice, ChoiceType};
use crate::config::EngineConfig;
use crate::constraint::{Allocation, ChoicePool, RequirementConstraint};
use crate::error::RuleError;
use crate::formula::{Expr, Formula, UnaryOp};
use crate::graph::{Component, RuleGraph};
use crate::resolved::Breakdown;
use crate::rule::{ChoiceId, Operator, Rule};
use crate::value::Value;
use std::cell::OnceCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// A display format registered for a note attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteFormat {
    pub format: String,
    pub origin: Option<ChoiceId>,
}

/// A rule several choices can register. It stays while any owner remains;
/// an owner of `None` keeps it for good.
struct SharedRule {
    target: AttrKey,
    source: AttrKey,
    op: Operator,
    formula: Option<String>,
    seq: u64,
    owners: Vec<Option<ChoiceId>>,
}

/// Cached evaluation order, rebuilt after any rule change.
struct EvalPlan {
    components: Vec<Component>,
    /// Indices into `RuleEngine::rules`, sorted by (priority, seq).
    by_target: HashMap<AttrKey, Vec<usize>>,
}

/// The rule engine.
///
/// Evaluation (`apply_rules`):
/// 1. Starts from a copy of the input store
/// 2. Walks the dependency graph component by component
/// 3. For each target: gates, then `=`, then the accumulating operators
/// 4. Breaks cycles by evaluating members in key order with last-known values
///
/// # Examples
///
/// ```rust
/// use rulegraph::{Attributes, RuleEngine};
///
/// let mut engine = RuleEngine::new();
/// engine.define_rule("combatNotes.tough", "level", "=", Some("2 * source")).unwrap();
///
/// let mut character = Attributes::new();
/// character.set("level", 5);
///
/// let sheet = engine.apply_rules(&character);
/// assert_eq!(sheet.number("combatNotes.tough"), Some(10.0));
/// // the input is untouched
/// assert!(character.get("combatNotes.tough").is_none());
/// ```
pub struct RuleEngine {
    config: EngineConfig,
    rules: Vec<Rule>,
    next_seq: u64,
    origin: Option<ChoiceId>,
    plan: OnceCell<EvalPlan>,
    notes: BTreeMap<AttrKey, NoteFormat>,
    choices: BTreeMap<ChoiceType, BTreeMap<String, Choice>>,
    requirements: BTreeMap<AttrKey, RequirementConstraint>,
    allocations: BTreeMap<AttrKey, Allocation>,
    shared: Vec<SharedRule>,
    pools: Vec<ChoicePool>,
}

impl RuleEngine {
    /// Create an empty engine with the default configuration.
    ///
    /// An empty engine derives nothing: `apply_rules` returns its input.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rulegraph::{Attributes, RuleEngine};
    ///
    /// let engine = RuleEngine::new();
    /// let mut character = Attributes::new();
    /// character.set("strength", 12);
    /// assert_eq!(engine.apply_rules(&character), character);
    /// ```
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create an empty engine with `config`.
    ///
    /// # Arguments
    ///
    /// * `config` - Repair, randomizer and note-grammar settings
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rulegraph::{EngineConfig, RuleEngine};
    ///
    /// let engine = RuleEngine::with_config(EngineConfig {
    ///     repair_passes: 4,
    ///     ..Default::default()
    /// });
    /// assert_eq!(engine.config().repair_passes, 4);
    /// ```
    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            rules: Vec::new(),
            next_seq: 0,
            origin: None,
            plan: OnceCell::new(),
            notes: BTreeMap::new(),
            choices: BTreeMap::new(),
            requirements: BTreeMap::new(),
            allocations: BTreeMap::new(),
            shared: Vec::new(),
            pools: Vec::new(),
        }
    }

    /// The configuration the engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Define a rule from its textual parts.
    ///
    /// `formula` of `None` passes the source value through.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rulegraph::{Attributes, RuleEngine};
    ///
    /// let mut engine = RuleEngine::new();
    /// engine.define_rule("armorClass", "dexterityModifier", "+", None).unwrap();
    /// assert!(engine.define_rule("armorClass", "shield", "~", None).is_err());
    /// assert!(engine.define_rule("armorClass", "shield", "+", Some("source +")).is_err());
    /// ```
    pub fn define_rule(
        &mut self,
        target: &str,
        source: &str,
        op: &str,
        formula: Option<&str>,
    ) -> Result<(), RuleError> {
        let op = Operator::parse(op)?;
        let formula = match formula {
            None => None,
            Some(text) => Some(Formula::parse(text)?),
        };
        self.add_rule(AttrKey::new(target), AttrKey::new(source), op, formula);
        Ok(())
    }

    /// Append a rule. Tagged with the origin of the choice currently being
    /// registered, if any.
    pub fn add_rule(
        &mut self,
        target: AttrKey,
        source: AttrKey,
        op: Operator,
        formula: Option<Formula>,
    ) {
        tracing::trace!(target = %target, source = %source, op = %op, "define rule");
        let seq = self.next_seq;
        self.next_seq += 1;
        self.rules.push(Rule {
            target,
            source,
            op,
            formula,
            origin: self.origin.clone(),
            seq,
        });
        self.invalidate();
    }

    /// Run `f` with every rule, note and constraint it registers tagged with
    /// `origin`.
    pub fn with_origin<R>(&mut self, origin: ChoiceId, f: impl FnOnce(&mut Self) -> R) -> R {
        let previous = self.origin.replace(origin);
        let result = f(self);
        self.origin = previous;
        result
    }

    /// The choice being registered, inside [`RuleEngine::with_origin`].
    pub fn current_origin(&self) -> Option<&ChoiceId> {
        self.origin.as_ref()
    }

    /// Retract everything registered under `origin`.
    ///
    /// Shared rules and allocations are retracted once no remaining choice
    /// owns them.
    ///
    /// # Arguments
    ///
    /// * `origin` - The choice whose registrations to drop
    pub fn remove_origin(&mut self, origin: &ChoiceId) {
        let before = self.rules.len();
        let mut dropped = HashSet::new();
        for shared in &mut self.shared {
            shared.owners.retain(|o| o.as_ref() != Some(origin));
            if shared.owners.is_empty() {
                dropped.insert(shared.seq);
            }
        }
        self.allocations.retain(|_, allocation| {
            if dropped.contains(&allocation.budget_rule) {
                dropped.extend(allocation.members.iter().map(|(_, seq)| *seq));
                return false;
            }
            allocation.members.retain(|(_, seq)| !dropped.contains(seq));
            true
        });
        self.shared.retain(|s| !dropped.contains(&s.seq));
        self.rules
            .retain(|r| r.origin.as_ref() != Some(origin) && !dropped.contains(&r.seq));
        self.notes.retain(|_, n| n.origin.as_ref() != Some(origin));
        self.requirements
            .retain(|_, r| r.origin.as_ref() != Some(origin));
        self.pools.retain(|p| p.origin.as_ref() != Some(origin));
        tracing::trace!(origin = %origin, removed = before - self.rules.len(), "retracted rules");
        self.invalidate();
    }

    /// Register a rule owned jointly by every origin that registers it.
    ///
    /// Returns the new rule's sequence number, or `None` if an identical
    /// shared rule existed and only gained the current origin as an owner.
    pub(crate) fn add_shared_rule(
        &mut self,
        target: AttrKey,
        source: AttrKey,
        op: Operator,
        formula: Option<Formula>,
    ) -> Option<u64> {
        let owner = self.origin.clone();
        let text = formula.as_ref().map(|f| f.text().to_string());
        if let Some(shared) = self
            .shared
            .iter_mut()
            .find(|s| s.target == target && s.source == source && s.op == op && s.formula == text)
        {
            if !shared.owners.contains(&owner) {
                shared.owners.push(owner);
            }
            return None;
        }
        let seq = self.next_seq;
        let origin = self.origin.take();
        self.add_rule(target.clone(), source.clone(), op, formula);
        self.origin = origin;
        self.shared.push(SharedRule {
            target,
            source,
            op,
            formula: text,
            seq,
            owners: vec![owner],
        });
        Some(seq)
    }

    fn invalidate(&mut self) {
        self.plan = OnceCell::new();
    }

    /// Every registered rule, in declaration order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Rules targeting `key`, in application order.
    pub fn rules_for(&self, key: &AttrKey) -> Vec<&Rule> {
        self.plan()
            .by_target
            .get(key)
            .map(|idx| idx.iter().map(|&i| &self.rules[i]).collect())
            .unwrap_or_default()
    }

    /// True if at least one rule targets `key`.
    pub fn is_derived(&self, key: &AttrKey) -> bool {
        self.plan().by_target.contains_key(key)
    }

    /// Every attribute some rule targets, in key order.
    pub fn targets(&self) -> BTreeSet<AttrKey> {
        self.rules.iter().map(|r| r.target.clone()).collect()
    }

    /// Build the dependency graph of every registered rule.
    pub fn graph(&self) -> RuleGraph {
        let mut graph = RuleGraph::new();
        let targets = self.targets();
        for rule in &self.rules {
            graph.add_edge(rule.target.clone(), rule.source.clone());
            if let Some(formula) = &rule.formula {
                for dep in formula.dependencies() {
                    graph.add_edge(rule.target.clone(), dep.clone());
                }
                for pattern in formula.patterns() {
                    for other in targets.iter().filter(|t| pattern.is_match(t.as_str())) {
                        if other != &rule.target {
                            graph.add_edge(rule.target.clone(), other.clone());
                        }
                    }
                }
            }
        }
        graph
    }

    fn plan(&self) -> &EvalPlan {
        self.plan.get_or_init(|| {
            let graph = self.graph();
            for cycle in graph.describe_cycles() {
                tracing::warn!(cycle = %cycle, "rule cycle; members use last-known values");
            }
            let mut by_target: HashMap<AttrKey, Vec<usize>> = HashMap::new();
            for (i, rule) in self.rules.iter().enumerate() {
                by_target.entry(rule.target.clone()).or_default().push(i);
            }
            for indices in by_target.values_mut() {
                indices.sort_by_key(|&i| (self.rules[i].op.priority(), self.rules[i].seq));
            }
            EvalPlan {
                components: graph.evaluation_order(),
                by_target,
            }
        })
    }

    /// Compute every derived attribute from `input`.
    ///
    /// Returns a new snapshot; `input` is not modified. The result is a pure
    /// function of the rule set and `input`.
    pub fn apply_rules(&self, input: &Attributes) -> Attributes {
        let plan = self.plan();
        let mut result = input.clone();
        for component in &plan.components {
            for key in &component.members {
                if let Some(indices) = plan.by_target.get(key) {
                    let value = self.compute_target(key, indices, input, &result, None);
                    result.put(key.clone(), value);
                }
            }
        }
        result
    }

    fn compute_target(
        &self,
        key: &AttrKey,
        indices: &[usize],
        input: &Attributes,
        dict: &Attributes,
        mut trace: Option<&mut Vec<(String, Option<Value>)>>,
    ) -> Option<Value> {
        let mut value = input.get_key(key).cloned();
        for &i in indices {
            let rule = &self.rules[i];
            let source = dict.get_key(&rule.source);
            if rule.op == Operator::Gate {
                let open = match (&rule.formula, source) {
                    (_, None) => false,
                    (None, Some(v)) => v.truthy(),
                    (Some(f), Some(v)) => f.eval(Some(v), dict).is_some_and(|r| r.truthy()),
                };
                if let Some(t) = trace.as_deref_mut() {
                    t.push((rule.description(), Some(Value::Bool(open))));
                }
                if !open {
                    return None;
                }
                continue;
            }
            let contribution = rule.contribution(source, dict);
            if let Some(t) = trace.as_deref_mut() {
                t.push((rule.description(), contribution.clone()));
            }
            if let Some(c) = contribution {
                value = rule.op.combine(value, c);
            }
        }
        value
    }

    /// Explain how `key` got its value for this character.
    pub fn explain(&self, input: &Attributes, key: &AttrKey) -> Breakdown {
        let snapshot = self.apply_rules(input);
        let mut breakdown = Breakdown::new(key.clone(), snapshot.get_key(key).cloned());
        breakdown.input = input.get_key(key).cloned();
        if let Some(indices) = self.plan().by_target.get(key) {
            let mut trace = Vec::new();
            self.compute_target(key, indices, input, &snapshot, Some(&mut trace));
            for (description, value) in trace {
                breakdown.add_contribution(description, value);
            }
        }
        breakdown
    }

    /// Register the display format of a note attribute.
    pub fn define_note(&mut self, key: AttrKey, format: impl Into<String>) {
        self.notes.insert(
            key,
            NoteFormat {
                format: format.into(),
                origin: self.origin.clone(),
            },
        );
    }

    /// The display format registered for a note, e.g. `"+%V Hit Points"`.
    pub fn note_format(&self, key: &AttrKey) -> Option<&str> {
        self.notes.get(key).map(|n| n.format.as_str())
    }

    /// The `notes` choice set consumed by sheet viewers.
    pub fn note_formats(&self) -> BTreeMap<AttrKey, String> {
        self.notes
            .iter()
            .map(|(k, n)| (k.clone(), n.format.clone()))
            .collect()
    }

    pub(crate) fn insert_choice(&mut self, choice: Choice) {
        self.choices
            .entry(choice.kind)
            .or_default()
            .insert(choice.name.clone(), choice);
    }

    pub(crate) fn take_choice(&mut self, kind: ChoiceType, name: &str) -> Option<Choice> {
        self.choices.get_mut(&kind)?.remove(name)
    }

    /// Look up a registered choice.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rulegraph::{ChoiceType, RuleEngine};
    ///
    /// let mut engine = RuleEngine::new();
    /// engine.choice_rules(ChoiceType::Feat, "Alert", "Type=General");
    ///
    /// let alert = engine.choice(ChoiceType::Feat, "Alert").unwrap();
    /// assert_eq!(alert.get("Type"), Some("General"));
    /// assert!(engine.choice(ChoiceType::Race, "Alert").is_none());
    /// ```
    pub fn choice(&self, kind: ChoiceType, name: &str) -> Option<&Choice> {
        self.choices.get(&kind)?.get(name)
    }

    /// Registered choices of a type, in name order.
    pub fn choices(&self, kind: ChoiceType) -> impl Iterator<Item = &Choice> {
        self.choices.get(&kind).into_iter().flat_map(|m| m.values())
    }

    /// Names of the registered choices of a type, in name order.
    pub fn choice_names(&self, kind: ChoiceType) -> Vec<String> {
        self.choices(kind).map(|c| c.name.clone()).collect()
    }

    pub(crate) fn add_requirement(&mut self, mut constraint: RequirementConstraint) {
        constraint.origin = self.origin.clone();
        self.requirements.insert(constraint.note.clone(), constraint);
    }

    /// The requirement behind a `validationNotes.*` or `sanityNotes.*` note.
    pub fn requirement(&self, note: &AttrKey) -> Option<&RequirementConstraint> {
        self.requirements.get(note)
    }

    /// Every registered requirement, in note order.
    pub fn requirements(&self) -> impl Iterator<Item = &RequirementConstraint> {
        self.requirements.values()
    }

    /// Declare an allocation note `note = sum(members) - budget`.
    ///
    /// Several choices can share one budget. The allocation is retracted
    /// with the last choice that declared it; one declared outside any
    /// choice is permanent.
    ///
    /// # Arguments
    ///
    /// * `note` - The `validationNotes.*` attribute holding the difference
    /// * `budget` - The attribute holding the number of picks allowed
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rulegraph::{AttrKey, Attributes, RuleEngine};
    ///
    /// let mut engine = RuleEngine::new();
    /// let note = AttrKey::new("validationNotes.skillChoiceAllocation");
    /// engine.define_allocation(note.clone(), AttrKey::new("skillChoiceCount"));
    /// engine.add_allocation_member(&note, AttrKey::new("skillsChosen.Arcana"));
    ///
    /// let mut c = Attributes::new();
    /// c.set("skillChoiceCount", 2);
    /// c.set("skillsChosen.Arcana", 1);
    /// assert_eq!(engine.apply_rules(&c).number(note.as_str()), Some(-1.0));
    /// ```
    pub fn define_allocation(&mut self, note: AttrKey, budget: AttrKey) {
        if let Some(existing) = self.allocations.get(&note) {
            if existing.budget != budget {
                tracing::warn!(note = %note, budget = %budget, "allocation redeclared with another budget");
                return;
            }
        }
        let negated = Expr::Unary(UnaryOp::Neg, Box::new(Expr::Source));
        let budget_rule = self.add_shared_rule(
            note.clone(),
            budget.clone(),
            Operator::Add,
            Some(Formula::from_expr(negated, "-source")),
        );
        if let Some(seq) = budget_rule {
            self.allocations.insert(
                note.clone(),
                Allocation {
                    note,
                    budget,
                    members: Vec::new(),
                    budget_rule: seq,
                },
            );
        }
    }

    /// Count `member` toward an allocation declared earlier.
    ///
    /// A member counted by several choices is counted once and kept until
    /// the last of them is removed.
    ///
    /// # Returns
    ///
    /// False if the allocation is undeclared.
    pub fn add_allocation_member(&mut self, note: &AttrKey, member: AttrKey) -> bool {
        if !self.allocations.contains_key(note) {
            tracing::warn!(note = %note, member = %member, "member added to undeclared allocation");
            return false;
        }
        let rule = self.add_shared_rule(note.clone(), member.clone(), Operator::Add, None);
        if let (Some(seq), Some(allocation)) = (rule, self.allocations.get_mut(note)) {
            allocation.members.push((member, seq));
        }
        true
    }

    /// The allocation checked by `note`.
    pub fn allocation(&self, note: &AttrKey) -> Option<&Allocation> {
        self.allocations.get(note)
    }

    /// Every declared allocation, in note order.
    pub fn allocations(&self) -> impl Iterator<Item = &Allocation> {
        self.allocations.values()
    }

    pub(crate) fn add_pool(&mut self, mut pool: ChoicePool) {
        pool.origin = self.origin.clone();
        self.pools.push(pool);
    }

    /// The "Choose N from ..." grants of every registered choice.
    ///
    /// A pool only applies while its gate attribute is truthy.
    pub fn pools(&self) -> &[ChoicePool] {
        &self.pools
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn character(pairs: &[(&str, f64)]) -> Attributes {
        let mut attrs = Attributes::new();
        for (k, v) in pairs {
            attrs.set(*k, *v);
        }
        attrs
    }

    #[test]
    fn test_set_rule() {
        let mut engine = RuleEngine::new();
        engine
            .define_rule("combatNotes.tough", "level", "=", Some("2*source"))
            .unwrap();
        let sheet = engine.apply_rules(&character(&[("level", 5.0)]));
        assert_eq!(sheet.number("combatNotes.tough"), Some(10.0));
    }

    #[test]
    fn test_missing_source_contributes_nothing() {
        let mut engine = RuleEngine::new();
        engine
            .define_rule("combatNotes.tough", "level", "=", Some("2*source"))
            .unwrap();
        let sheet = engine.apply_rules(&Attributes::new());
        assert!(sheet.get("combatNotes.tough").is_none());
    }

    #[test]
    fn test_accumulators_start_from_input() {
        let mut engine = RuleEngine::new();
        engine.define_rule("strength", "abilityBoosts.Strength", "+", None).unwrap();
        let sheet = engine.apply_rules(&character(&[("strength", 14.0), ("abilityBoosts.Strength", 2.0)]));
        assert_eq!(sheet.number("strength"), Some(16.0));
    }

    #[test]
    fn test_chained_rules() {
        let mut engine = RuleEngine::new();
        engine
            .define_rule("strengthModifier", "strength", "=", Some("Math.floor((source - 10) / 2)"))
            .unwrap();
        engine.define_rule("meleeAttack", "strengthModifier", "+", None).unwrap();
        engine.define_rule("meleeAttack", "proficiencyBonus", "+", None).unwrap();
        let sheet = engine.apply_rules(&character(&[("strength", 16.0), ("proficiencyBonus", 2.0)]));
        assert_eq!(sheet.number("meleeAttack"), Some(5.0));
    }

    #[test]
    fn test_gate_suppresses_target() {
        let mut engine = RuleEngine::new();
        engine.define_rule("dwarfLevel", "race", "?", Some("source == 'Dwarf'")).unwrap();
        engine.define_rule("dwarfLevel", "level", "=", None).unwrap();

        let mut c = character(&[("level", 3.0)]);
        c.set("race", "Elf");
        assert!(engine.apply_rules(&c).get("dwarfLevel").is_none());
        c.set("race", "Dwarf");
        assert_eq!(engine.apply_rules(&c).number("dwarfLevel"), Some(3.0));
    }

    #[test]
    fn test_set_applies_before_accumulators_regardless_of_order() {
        let mut engine = RuleEngine::new();
        engine.define_rule("speed", "bonus", "+", None).unwrap();
        engine.define_rule("speed", "base", "=", None).unwrap();
        let sheet = engine.apply_rules(&character(&[("base", 30.0), ("bonus", 10.0)]));
        assert_eq!(sheet.number("speed"), Some(40.0));
    }

    #[test]
    fn test_max_and_min() {
        let mut engine = RuleEngine::new();
        engine.define_rule("armorClass", "natural", "^", None).unwrap();
        engine.define_rule("armorClass", "cap", "v", None).unwrap();
        engine.define_rule("armorClass", "base", "=", None).unwrap();
        let sheet = engine.apply_rules(&character(&[("base", 10.0), ("natural", 13.0), ("cap", 12.0)]));
        assert_eq!(sheet.number("armorClass"), Some(12.0));
    }

    #[test]
    fn test_cycle_is_broken_not_fatal() {
        let mut engine = RuleEngine::new();
        engine.define_rule("a", "b", "+", Some("source + 1")).unwrap();
        engine.define_rule("b", "a", "+", Some("source + 1")).unwrap();
        let input = character(&[("a", 1.0)]);
        let first = engine.apply_rules(&input);
        let second = engine.apply_rules(&input);
        assert_eq!(first, second);
        // a is first in key order: b is unknown so a keeps its input value,
        // then b reads the computed a.
        assert_eq!(first.number("a"), Some(1.0));
        assert_eq!(first.number("b"), Some(2.0));
        assert_eq!(engine.graph().cycles().len(), 1);
    }

    #[test]
    fn test_no_rule_means_absent() {
        let engine = RuleEngine::new();
        let sheet = engine.apply_rules(&Attributes::new());
        assert!(sheet.is_empty());
    }

    #[test]
    fn test_remove_origin() {
        let mut engine = RuleEngine::new();
        engine.define_rule("armorClass", "base", "=", None).unwrap();
        let origin = ChoiceId::new("Shield", "Shield");
        engine.with_origin(origin.clone(), |e| {
            e.define_rule("armorClass", "shield", "+", Some("2")).unwrap();
            e.define_note(AttrKey::new("combatNotes.shield"), "+2 AC");
        });
        let mut c = character(&[("base", 10.0)]);
        c.set("shield", "Shield");
        assert_eq!(engine.apply_rules(&c).number("armorClass"), Some(12.0));

        engine.remove_origin(&origin);
        assert_eq!(engine.apply_rules(&c).number("armorClass"), Some(10.0));
        assert!(engine.note_format(&AttrKey::new("combatNotes.shield")).is_none());
    }

    #[test]
    fn test_allocation_note() {
        let mut engine = RuleEngine::new();
        let note = AttrKey::new("validationNotes.skillChoiceAllocation");
        engine.define_allocation(note.clone(), AttrKey::new("skillChoiceCount"));
        engine.add_allocation_member(&note, AttrKey::new("skillsChosen.Arcana"));
        engine.add_allocation_member(&note, AttrKey::new("skillsChosen.History"));

        let mut c = character(&[("skillChoiceCount", 2.0), ("skillsChosen.Arcana", 1.0)]);
        assert_eq!(engine.apply_rules(&c).number(note.as_str()), Some(-1.0));
        c.set("skillsChosen.History", 1);
        assert_eq!(engine.apply_rules(&c).number(note.as_str()), Some(0.0));
    }

    #[test]
    fn test_allocation_retracted_with_last_owner() {
        let mut engine = RuleEngine::new();
        let note = AttrKey::new("validationNotes.fancyFeatAllocation");
        let first = ChoiceId::new("Feat", "Shiny");
        let second = ChoiceId::new("Feat", "Glossy");
        for (origin, feat) in [(&first, "feats.Shiny"), (&second, "feats.Glossy")] {
            engine.with_origin(origin.clone(), |e| {
                e.define_allocation(note.clone(), AttrKey::new("featCount.Fancy"));
                e.add_allocation_member(&note, AttrKey::new(feat));
            });
        }
        let c = character(&[("featCount.Fancy", 1.0), ("feats.Glossy", 1.0)]);
        assert_eq!(engine.apply_rules(&c).number(note.as_str()), Some(0.0));

        engine.remove_origin(&first);
        assert_eq!(engine.allocation(&note).unwrap().members.len(), 1);
        assert_eq!(engine.apply_rules(&c).number(note.as_str()), Some(0.0));

        engine.remove_origin(&second);
        assert!(engine.allocation(&note).is_none());
        assert!(engine.rules().is_empty());
        assert!(engine.apply_rules(&c).get(note.as_str()).is_none());
    }

    #[test]
    fn test_permanent_allocation_survives_removal() {
        let mut engine = RuleEngine::new();
        let note = AttrKey::new("validationNotes.skillChoiceAllocation");
        engine.define_allocation(note.clone(), AttrKey::new("skillChoiceCount"));
        let origin = ChoiceId::new("Feat", "Skilled");
        engine.with_origin(origin.clone(), |e| {
            e.define_allocation(note.clone(), AttrKey::new("skillChoiceCount"));
        });
        engine.remove_origin(&origin);
        assert!(engine.allocation(&note).is_some());
        let c = character(&[("skillChoiceCount", 1.0)]);
        assert_eq!(engine.apply_rules(&c).number(note.as_str()), Some(-1.0));
    }

    #[test]
    fn test_shared_member_counted_once_until_last_owner() {
        let mut engine = RuleEngine::new();
        let note = AttrKey::new("validationNotes.skillChoiceAllocation");
        engine.define_allocation(note.clone(), AttrKey::new("skillChoiceCount"));
        let feature = ChoiceId::new("Feature", "Scholar");
        let skill = ChoiceId::new("Skill", "Arcana");
        for origin in [&feature, &skill] {
            engine.with_origin(origin.clone(), |e| {
                e.add_allocation_member(&note, AttrKey::new("skillsChosen.Arcana"));
            });
        }
        let c = character(&[("skillChoiceCount", 1.0), ("skillsChosen.Arcana", 1.0)]);
        assert_eq!(engine.apply_rules(&c).number(note.as_str()), Some(0.0));

        engine.remove_origin(&feature);
        assert_eq!(engine.apply_rules(&c).number(note.as_str()), Some(0.0));
        engine.remove_origin(&skill);
        assert_eq!(engine.apply_rules(&c).number(note.as_str()), Some(-1.0));
    }

    #[test]
    fn test_explain_lists_contributions() {
        let mut engine = RuleEngine::new();
        engine.define_rule("hitPoints", "constitutionModifier", "+", None).unwrap();
        engine.define_rule("hitPoints", "level", "+", Some("source * 2")).unwrap();
        let c = character(&[("hitPoints", 10.0), ("constitutionModifier", 1.0), ("level", 2.0)]);
        let breakdown = engine.explain(&c, &AttrKey::new("hitPoints"));
        assert_eq!(breakdown.value, Some(Value::from(15.0)));
        assert_eq!(breakdown.input, Some(Value::from(10.0)));
        assert_eq!(breakdown.contributions.len(), 2);
    }

    #[test]
    fn test_aggregate_dependency_order() {
        let mut engine = RuleEngine::new();
        engine.define_rule("level", "always", "=", Some("sum('^levels\\\\.')")).unwrap();
        engine.define_rule("levels.Fighter", "bonusLevel", "+", None).unwrap();
        let c = character(&[("always", 1.0), ("levels.Fighter", 2.0), ("bonusLevel", 1.0)]);
        assert_eq!(engine.apply_rules(&c).number("level"), Some(3.0));
    }
}
