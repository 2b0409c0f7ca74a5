//! Random character generation, one attribute at a time.
//!
//! Each strategy reads the current snapshot to find what is legal, picks
//! uniformly (or by weight) among the legal options and writes the pick to
//! the character's inputs. Strategies that fill a budget never pick past
//! it, so calling one twice is harmless.

use crate::attr_key::{camelize, AttrKey};
use crate::attributes::Attributes;
use crate::choice::ChoiceType;
use crate::constraint::{Allocation, PoolKind};
use crate::core_rules::{ability_attr, ABILITIES};
use crate::engine::RuleEngine;
use crate::error::RuleError;
use crate::repair::violations;
use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// The attributes [`randomize_one_attribute`] knows how to fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RandomAttr {
    Abilities,
    AbilityBoosts,
    Armor,
    Background,
    Deity,
    Feats,
    Gender,
    HitPoints,
    Languages,
    Levels,
    Race,
    SelectableFeatures,
    Shield,
    Skills,
    Spells,
    Tools,
    Weapons,
}

impl RandomAttr {
    pub const ALL: [RandomAttr; 17] = [
        RandomAttr::Abilities,
        RandomAttr::AbilityBoosts,
        RandomAttr::Armor,
        RandomAttr::Background,
        RandomAttr::Deity,
        RandomAttr::Feats,
        RandomAttr::Gender,
        RandomAttr::HitPoints,
        RandomAttr::Languages,
        RandomAttr::Levels,
        RandomAttr::Race,
        RandomAttr::SelectableFeatures,
        RandomAttr::Shield,
        RandomAttr::Skills,
        RandomAttr::Spells,
        RandomAttr::Tools,
        RandomAttr::Weapons,
    ];

    /// The attribute name as passed by callers, e.g. `"abilityBoosts"`.
    pub fn as_str(self) -> &'static str {
        match self {
            RandomAttr::Abilities => "abilities",
            RandomAttr::AbilityBoosts => "abilityBoosts",
            RandomAttr::Armor => "armor",
            RandomAttr::Background => "background",
            RandomAttr::Deity => "deity",
            RandomAttr::Feats => "feats",
            RandomAttr::Gender => "gender",
            RandomAttr::HitPoints => "hitPoints",
            RandomAttr::Languages => "languages",
            RandomAttr::Levels => "levels",
            RandomAttr::Race => "race",
            RandomAttr::SelectableFeatures => "selectableFeatures",
            RandomAttr::Shield => "shield",
            RandomAttr::Skills => "skills",
            RandomAttr::Spells => "spells",
            RandomAttr::Tools => "tools",
            RandomAttr::Weapons => "weapons",
        }
    }
}

impl fmt::Display for RandomAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RandomAttr {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RandomAttr::ALL
            .iter()
            .copied()
            .find(|a| a.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| RuleError::UnknownRandomAttr(s.to_string()))
    }
}

/// Fill one attribute of `store` with a random legal value.
///
/// # Examples
///
/// ```rust
/// use rand::SeedableRng;
/// use rand_chacha::ChaCha8Rng;
/// use rulegraph::{randomize_one_attribute, Attributes, ChoiceType, RandomAttr, RuleEngine};
///
/// let mut engine = RuleEngine::new();
/// engine.choice_rules(ChoiceType::Race, "Dwarf", "");
/// engine.choice_rules(ChoiceType::Race, "Halfling", "");
///
/// let mut character = Attributes::new();
/// let mut rng = ChaCha8Rng::seed_from_u64(42);
/// randomize_one_attribute(&engine, &mut character, RandomAttr::Race, &mut rng);
/// let race = character.get("race").unwrap().as_text();
/// assert!(race == "Dwarf" || race == "Halfling");
/// ```
pub fn randomize_one_attribute<R: Rng + ?Sized>(
    engine: &RuleEngine,
    store: &mut Attributes,
    attr: RandomAttr,
    rng: &mut R,
) {
    tracing::debug!(attr = %attr, "randomizing");
    match attr {
        RandomAttr::Abilities => {
            for ability in ABILITIES {
                store.set(ability_attr(ability), roll_ability(rng));
            }
        }
        RandomAttr::AbilityBoosts => ability_boosts(engine, store, rng),
        RandomAttr::Armor => identity(engine, store, ChoiceType::Armor, rng),
        RandomAttr::Background => identity(engine, store, ChoiceType::Background, rng),
        RandomAttr::Deity => identity(engine, store, ChoiceType::Deity, rng),
        RandomAttr::Race => identity(engine, store, ChoiceType::Race, rng),
        RandomAttr::Shield => identity(engine, store, ChoiceType::Shield, rng),
        RandomAttr::Feats => budgets(engine, store, "featCount", rng),
        RandomAttr::SelectableFeatures => budgets(engine, store, "selectableFeatureCount", rng),
        RandomAttr::Gender => {
            if let Some(gender) = engine.config().genders.choose(rng) {
                store.set("gender", gender.as_str());
            }
        }
        RandomAttr::HitPoints => hit_points(engine, store, rng),
        RandomAttr::Levels => levels(engine, store, rng),
        RandomAttr::Languages => pool_choices(engine, store, PoolKind::Language, rng),
        RandomAttr::Skills => pool_choices(engine, store, PoolKind::Skill, rng),
        RandomAttr::Tools => pool_choices(engine, store, PoolKind::Tool, rng),
        RandomAttr::Weapons => pool_choices(engine, store, PoolKind::Weapon, rng),
        RandomAttr::Spells => spells(engine, store, rng),
    }
}

impl RuleEngine {
    /// See [`randomize_one_attribute`].
    pub fn randomize_one_attribute<R: Rng + ?Sized>(
        &self,
        store: &mut Attributes,
        attr: RandomAttr,
        rng: &mut R,
    ) {
        randomize_one_attribute(self, store, attr, rng)
    }
}

/// 4d6, dropping the lowest die.
fn roll_ability<R: Rng + ?Sized>(rng: &mut R) -> u32 {
    let mut dice: [u32; 4] = std::array::from_fn(|_| rng.gen_range(1..=6));
    dice.sort_unstable();
    dice[1..].iter().sum()
}

fn requirement_violations(engine: &RuleEngine, snapshot: &Attributes) -> usize {
    violations(snapshot)
        .iter()
        .filter(|note| engine.requirement(note).is_some())
        .count()
}

/// True if no validation requirement selected by `member` fails.
fn member_is_valid(engine: &RuleEngine, member: &AttrKey, snapshot: &Attributes) -> bool {
    engine
        .requirements()
        .filter(|r| &r.selector == member && r.note.has_prefix("validationNotes"))
        .all(|r| snapshot.number(r.note.as_str()).map_or(true, |v| v == 0.0))
}

/// Pick the single choice of `kind`, preferring one that breaks no more
/// requirements than the character already breaks.
fn identity<R: Rng + ?Sized>(engine: &RuleEngine, store: &mut Attributes, kind: ChoiceType, rng: &mut R) {
    let Some(attr) = kind.selector_attr() else {
        return;
    };
    let mut names = engine.choice_names(kind);
    if names.is_empty() {
        return;
    }
    names.shuffle(rng);
    let baseline = requirement_violations(engine, &engine.apply_rules(store));
    let legal = names
        .iter()
        .take(engine.config().random_retries)
        .find(|name| {
            let mut trial = store.clone();
            trial.set(attr.clone(), name.as_str());
            requirement_violations(engine, &engine.apply_rules(&trial)) <= baseline
        });
    let pick = legal.unwrap_or(&names[0]);
    store.set(attr, pick.as_str());
}

/// The first class in `candidates` whose requirements hold with one level
/// added to `store`.
fn qualifying_class(engine: &RuleEngine, store: &Attributes, candidates: &[String]) -> Option<String> {
    candidates
        .iter()
        .take(engine.config().random_retries)
        .find(|class| {
            let mut trial = store.clone();
            trial.set(AttrKey::scoped("levels", class), 1);
            let note = AttrKey::scoped("validationNotes", &format!("{}Class", camelize(class)));
            !engine.apply_rules(&trial).truthy(note.as_str())
        })
        .cloned()
}

/// Spread the character level over one class, or occasionally two.
///
/// An input `level` is taken as the desired total and replaced by class
/// levels; otherwise the total is random.
fn levels<R: Rng + ?Sized>(engine: &RuleEngine, store: &mut Attributes, rng: &mut R) {
    let config = engine.config();
    let mut classes = engine.choice_names(ChoiceType::Class);
    if classes.is_empty() {
        return;
    }
    let cap = config.max_random_level.max(1);
    let total = match store.remove("level").and_then(|v| v.as_number()) {
        Some(n) if n >= 1.0 => level_count(n, cap),
        _ => rng.gen_range(1..=cap),
    };
    let old: Vec<AttrKey> = store.with_prefix("levels").map(|(k, _)| k.clone()).collect();
    for key in old {
        store.remove(key.as_str());
    }

    classes.shuffle(rng);
    let first = qualifying_class(engine, store, &classes).unwrap_or_else(|| classes[0].clone());
    let first_key = AttrKey::scoped("levels", &first);
    store.set(first_key.clone(), total);

    let multiclass = total >= 2 && rng.gen_bool(config.multiclass_chance.clamp(0.0, 1.0));
    if !multiclass {
        return;
    }
    let others: Vec<String> = classes.into_iter().filter(|c| *c != first).collect();
    store.set(first_key.clone(), total - 1);
    match qualifying_class(engine, store, &others) {
        Some(second) => {
            let first_levels = rng.gen_range(1..total);
            store.set(first_key, first_levels);
            store.set(AttrKey::scoped("levels", &second), total - first_levels);
            tracing::debug!(first = %first, second = %second, total, "multiclass");
        }
        None => store.set(first_key, total),
    }
}

/// Spend unallocated ability boosts, weighted toward the abilities the
/// active boost grants name.
fn ability_boosts<R: Rng + ?Sized>(engine: &RuleEngine, store: &mut Attributes, rng: &mut R) {
    let snapshot = engine.apply_rules(store);
    let budget = snapshot.number("abilityBoostChoiceCount").unwrap_or(0.0);
    let boost_key = |ability: &str| AttrKey::scoped("abilityBoosts", ability);
    let spent: f64 = ABILITIES
        .iter()
        .filter_map(|a| store.number(boost_key(a).as_str()))
        .sum();
    let remaining = (budget - spent).max(0.0) as u32;
    if remaining == 0 {
        return;
    }

    let mut weights = [0.0f64; ABILITIES.len()];
    let pools = engine
        .pools()
        .iter()
        .filter(|p| p.kind == PoolKind::AbilityBoost && snapshot.truthy(p.gate.as_str()));
    for pool in pools {
        let count = pool.count as f64;
        match &pool.options {
            None => weights.iter_mut().for_each(|w| *w += count),
            Some(options) => {
                for option in options {
                    if option.eq_ignore_ascii_case("any") {
                        weights.iter_mut().for_each(|w| *w += count);
                    } else if let Some(i) = ABILITIES.iter().position(|a| a.eq_ignore_ascii_case(option)) {
                        weights[i] += count;
                    }
                }
            }
        }
    }
    if weights.iter().all(|w| *w == 0.0) {
        weights = [1.0; ABILITIES.len()];
    }

    let mut scores: Vec<f64> = ABILITIES
        .iter()
        .map(|a| snapshot.number(ability_attr(a).as_str()).unwrap_or(0.0))
        .collect();
    let max = engine.config().ability_max;
    for _ in 0..remaining {
        let open: Vec<f64> = weights
            .iter()
            .zip(&scores)
            .map(|(w, s)| if s + 1.0 <= max { *w } else { 0.0 })
            .collect();
        let Ok(dist) = WeightedIndex::new(&open) else {
            tracing::debug!("no ability can take another boost");
            break;
        };
        let i = dist.sample(rng);
        let key = boost_key(ABILITIES[i]);
        let current = store.number(key.as_str()).unwrap_or(0.0);
        store.set(key, current + 1.0);
        scores[i] += 1.0;
    }
}

/// Fill every allocation whose budget lives under `budget_prefix`.
fn budgets<R: Rng + ?Sized>(engine: &RuleEngine, store: &mut Attributes, budget_prefix: &str, rng: &mut R) {
    let allocations: Vec<&Allocation> = engine
        .allocations()
        .filter(|a| a.budget.has_prefix(budget_prefix))
        .collect();
    for allocation in allocations {
        fill_allocation(engine, store, allocation, |_| true, rng);
    }
}

/// Pick random members of `allocation` until its budget is met, rolling
/// back picks whose requirements fail. Returns the number kept.
fn fill_allocation<R: Rng + ?Sized>(
    engine: &RuleEngine,
    store: &mut Attributes,
    allocation: &Allocation,
    allowed: impl Fn(&AttrKey) -> bool,
    rng: &mut R,
) -> usize {
    let snapshot = engine.apply_rules(store);
    let Some(excess) = snapshot.number(allocation.note.as_str()) else {
        return 0;
    };
    let mut shortfall = -excess;
    let mut candidates: Vec<&AttrKey> = allocation
        .member_keys()
        .filter(|k| !store.truthy(k.as_str()) && allowed(k))
        .collect();
    candidates.shuffle(rng);

    let retries = engine.config().random_retries;
    let mut kept = 0;
    let mut failures = 0;
    for member in candidates {
        if shortfall < 1.0 || failures >= retries {
            break;
        }
        store.set(member.clone(), 1);
        if member_is_valid(engine, member, &engine.apply_rules(store)) {
            tracing::debug!(note = %allocation.note, member = %member, "picked");
            shortfall -= 1.0;
            kept += 1;
        } else {
            tracing::debug!(note = %allocation.note, member = %member, "rolled back");
            store.remove(member.as_str());
            failures += 1;
        }
    }
    kept
}

/// Fill the choice pool of `kind` from the options its active grants allow,
/// skipping anything already granted outright.
fn pool_choices<R: Rng + ?Sized>(engine: &RuleEngine, store: &mut Attributes, kind: PoolKind, rng: &mut R) {
    let Some(allocation) = engine.allocation(&kind.allocation_note()) else {
        return;
    };
    let snapshot = engine.apply_rules(store);
    let active: Vec<_> = engine
        .pools()
        .iter()
        .filter(|p| p.kind == kind && snapshot.truthy(p.gate.as_str()))
        .collect();
    let any = active.iter().any(|p| {
        p.options
            .as_ref()
            .map_or(true, |o| o.iter().any(|x| x.eq_ignore_ascii_case("any")))
    });
    let named: HashSet<AttrKey> = active
        .iter()
        .filter_map(|p| p.options.as_ref())
        .flatten()
        .map(|o| AttrKey::scoped(kind.chosen_prefix(), o))
        .collect();
    let allowed = |member: &AttrKey| {
        let granted = AttrKey::scoped(kind.grant_prefix(), member.name());
        !snapshot.truthy(granted.as_str()) && (any || named.contains(member))
    };
    fill_allocation(engine, store, allocation, allowed, rng);
}

/// Learn random spells until each `spellSlots.<group><level>` is filled.
fn spells<R: Rng + ?Sized>(engine: &RuleEngine, store: &mut Attributes, rng: &mut R) {
    let snapshot = engine.apply_rules(store);
    let keys: Vec<AttrKey> = engine
        .choices(ChoiceType::Spell)
        .flat_map(|c| c.spell_keys())
        .collect();
    for (slot, count) in snapshot
        .with_prefix("spellSlots")
        .filter_map(|(k, v)| v.as_number().map(|n| (k.name(), n)))
    {
        let suffix = format!("({})", slot);
        let mut candidates: Vec<&AttrKey> = keys.iter().filter(|k| k.as_str().ends_with(&suffix)).collect();
        let known = candidates.iter().filter(|k| store.truthy(k.as_str())).count();
        candidates.retain(|k| !store.truthy(k.as_str()));
        candidates.shuffle(rng);
        let wanted = (count.max(0.0) as usize).saturating_sub(known);
        for key in candidates.into_iter().take(wanted) {
            store.set(key.clone(), 1);
        }
    }
}

fn hit_die(text: &str) -> Option<u32> {
    text.trim()
        .trim_start_matches(['d', 'D'])
        .parse()
        .ok()
        .filter(|d| *d > 0)
}

/// A stored level as a loop bound, limited to `cap`.
fn level_count(n: f64, cap: u32) -> u32 {
    if n.is_nan() {
        return 0;
    }
    n.clamp(0.0, cap as f64) as u32
}

/// Maximum hit die at first level, rolled dice after.
///
/// At most `max_random_level` dice are rolled across all classes.
fn hit_points<R: Rng + ?Sized>(engine: &RuleEngine, store: &mut Attributes, rng: &mut R) {
    let mut budget = engine.config().max_random_level.max(1);
    let mut total: u64 = 0;
    let mut first = true;
    for class in engine.choices(ChoiceType::Class) {
        let stored = store
            .number(AttrKey::scoped("levels", &class.name).as_str())
            .unwrap_or(0.0);
        let levels = level_count(stored, budget);
        budget -= levels;
        let die = class.get("HitDie").and_then(hit_die).unwrap_or(8);
        for _ in 0..levels {
            total += u64::from(if first { die } else { rng.gen_range(1..=die) });
            first = false;
        }
    }
    if total > 0 {
        store.set("hitPoints", total as f64);
    }
}
