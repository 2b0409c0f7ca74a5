//! Micro-grammars embedded in feature names and note text.
//!
//! ```text
//! text        := { fragment | any-char }
//! fragment    := list-grant | adjustment
//! list-grant  := ( KIND "Proficiency" | "Language" | "Ability Boost" ) "(" items ")"
//! items       := item { "/" item }
//! item        := "Choose" N "from" ( "any" | name { ("," | ";") name } )
//!              | [ "+" N ] name { ";" name }
//! adjustment  := ( "+" | "-" | "x" ) ( N | "%V" | "%" DIGIT ) Capitalized { Capitalized }
//! ```
//!
//! Parsing is lenient: anything that does not form a fragment is skipped.

use crate::attr_key::{camelize, AttrKey};
use crate::constraint::{ChoicePool, PoolKind};
use crate::engine::RuleEngine;
use crate::formula::{Expr, Formula, UnaryOp};
use crate::rule::Operator;

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    /// `Choose N from ...`; `options` of `None` means "any".
    Choose {
        count: u32,
        options: Option<Vec<String>>,
    },
    /// A direct grant. `amount` is only meaningful for ability boosts.
    Grant { name: String, amount: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustOp {
    Add,
    Subtract,
    Multiply,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Amount {
    Number(f64),
    /// `%V`: the note's own value.
    Value,
    /// `%1`, `%2`...: the note's numbered sub-values.
    Indexed(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    Grant { kind: PoolKind, items: Vec<Item> },
    Adjustment {
        op: AdjustOp,
        amount: Amount,
        /// Capitalized words following the amount, e.g. `["Armor", "Class"]`.
        words: Vec<String>,
    },
}

struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, s: &str) -> bool {
        if self.rest().starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn skip_spaces(&mut self) {
        while self.peek().is_some_and(|c| c == ' ') {
            self.pos += 1;
        }
    }

    fn word(&mut self) -> Option<&'a str> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '\'' || c == '-')
        {
            self.bump();
        }
        (self.pos > start).then(|| &self.text[start..self.pos])
    }

    fn number(&mut self) -> Option<f64> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.pos == start {
            return None;
        }
        if self.rest().starts_with('.') && self.rest()[1..].starts_with(|c: char| c.is_ascii_digit()) {
            self.pos += 1;
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        self.text[start..self.pos].parse().ok()
    }

    /// Consume `( ... )` with nested parentheses and return the inside.
    fn group(&mut self) -> Option<&'a str> {
        if !self.eat("(") {
            return None;
        }
        let start = self.pos;
        let mut depth = 1;
        while let Some(c) = self.bump() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(&self.text[start..self.pos - 1]);
                    }
                }
                _ => {}
            }
        }
        None
    }
}

/// Parse every fragment in `text`.
///
/// # Examples
///
/// ```rust
/// use rulegraph::note_grammar::{parse_fragments, Fragment, Item};
///
/// let fragments = parse_fragments("Skill Proficiency (Choose 2 from Arcana, History)");
/// assert_eq!(fragments.len(), 1);
/// match &fragments[0] {
///     Fragment::Grant { items, .. } => assert!(matches!(items[0], Item::Choose { count: 2, .. })),
///     _ => unreachable!(),
/// }
/// ```
pub fn parse_fragments(text: &str) -> Vec<Fragment> {
    let mut fragments = Vec::new();
    let mut cursor = Cursor::new(text);
    let mut prev: Option<char> = None;
    while cursor.peek().is_some() {
        if !prev.is_some_and(|c| c.is_alphanumeric()) {
            let start = cursor.pos;
            let parsed = grant(&mut cursor).or_else(|| {
                cursor.pos = start;
                adjustment(&mut cursor)
            });
            match parsed {
                Some(fragment) => {
                    fragments.push(fragment);
                    prev = None;
                    continue;
                }
                None => cursor.pos = start,
            }
        }
        prev = cursor.bump();
    }
    fragments
}

fn grant(cursor: &mut Cursor<'_>) -> Option<Fragment> {
    let kind = if cursor.eat("Ability Boost") {
        PoolKind::AbilityBoost
    } else if cursor.eat("Language") {
        PoolKind::Language
    } else {
        let kind = PoolKind::from_proficiency_word(cursor.word()?)?;
        cursor.skip_spaces();
        if !cursor.eat("Proficiency") {
            return None;
        }
        kind
    };
    cursor.skip_spaces();
    let inner = cursor.group()?;
    let items = items(inner, kind);
    (!items.is_empty()).then_some(Fragment::Grant { kind, items })
}

fn items(inner: &str, kind: PoolKind) -> Vec<Item> {
    let mut items = Vec::new();
    for piece in split_top_level(inner, '/') {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        if piece.starts_with("Choose ") {
            match choose(piece) {
                Some(item) => items.push(item),
                None => tracing::warn!(item = piece, "malformed Choose clause skipped"),
            }
            continue;
        }
        for name in piece.split(';').map(str::trim).filter(|n| !n.is_empty()) {
            items.push(if kind == PoolKind::AbilityBoost {
                boost(name)
            } else {
                Item::Grant {
                    name: name.to_string(),
                    amount: 1.0,
                }
            });
        }
    }
    items
}

fn choose(piece: &str) -> Option<Item> {
    let mut cursor = Cursor::new(piece);
    cursor.eat("Choose");
    cursor.skip_spaces();
    let count = cursor.number()?;
    cursor.skip_spaces();
    if !cursor.eat("from") {
        return None;
    }
    let list = cursor.rest().trim();
    if list.is_empty() || count < 1.0 || count.fract() != 0.0 {
        return None;
    }
    let options = if list.eq_ignore_ascii_case("any") {
        None
    } else {
        Some(
            list.split([',', ';'])
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    };
    Some(Item::Choose {
        count: count as u32,
        options,
    })
}

fn boost(name: &str) -> Item {
    let mut cursor = Cursor::new(name);
    if cursor.eat("+") {
        if let Some(n) = cursor.number() {
            cursor.skip_spaces();
            return Item::Grant {
                name: cursor.rest().trim().to_string(),
                amount: n,
            };
        }
    }
    Item::Grant {
        name: name.to_string(),
        amount: 1.0,
    }
}

fn adjustment(cursor: &mut Cursor<'_>) -> Option<Fragment> {
    let op = match cursor.bump()? {
        '+' => AdjustOp::Add,
        '-' => AdjustOp::Subtract,
        'x' => AdjustOp::Multiply,
        _ => return None,
    };
    let amount = if cursor.eat("%V") {
        Amount::Value
    } else if cursor.eat("%") {
        let digit = cursor.bump()?.to_digit(10)?;
        Amount::Indexed(digit)
    } else {
        Amount::Number(cursor.number()?)
    };
    if !cursor.eat(" ") {
        return None;
    }
    let mut words = Vec::new();
    loop {
        let start = cursor.pos;
        match cursor.word() {
            Some(w) if w.starts_with(|c: char| c.is_uppercase()) => words.push(w.to_string()),
            _ => {
                cursor.pos = start;
                break;
            }
        }
        let before_space = cursor.pos;
        if !cursor.eat(" ") {
            break;
        }
        if !cursor.peek().is_some_and(|c| c.is_uppercase()) {
            cursor.pos = before_space;
            break;
        }
    }
    (!words.is_empty()).then_some(Fragment::Adjustment { op, amount, words })
}

fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            c if c == sep && depth == 0 => {
                parts.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

fn gated(value: f64) -> Formula {
    Formula::from_expr(
        Expr::ternary(Expr::Source, Expr::number(value), Expr::Null),
        format!("source ? {} : null", value),
    )
}

/// Register the rules for every fragment of `text`.
///
/// `gate` is the attribute that is truthy while the owning feature or note
/// is active; `%V` reads it and `%N` reads `<gate>.N`.
pub fn grammar_rules(engine: &mut RuleEngine, gate: &AttrKey, text: &str) {
    for fragment in parse_fragments(text) {
        match fragment {
            Fragment::Grant { kind, items } => grant_rules(engine, gate, kind, items),
            Fragment::Adjustment { op, amount, words } => {
                adjustment_rules(engine, gate, op, amount, &words)
            }
        }
    }
}

pub(crate) fn grant_rules(engine: &mut RuleEngine, gate: &AttrKey, kind: PoolKind, items: Vec<Item>) {
    for item in items {
        match item {
            Item::Choose { count, options } => {
                engine.add_rule(kind.budget_attr(), gate.clone(), Operator::Add, Some(gated(count as f64)));
                if let Some(options) = &options {
                    for option in options {
                        pool_member(engine, kind, option);
                    }
                }
                engine.add_pool(ChoicePool {
                    kind,
                    count,
                    gate: gate.clone(),
                    options,
                    origin: None,
                });
            }
            Item::Grant { name, amount } if kind == PoolKind::AbilityBoost => {
                let ability = AttrKey::new(&name.to_lowercase());
                engine.add_rule(ability, gate.clone(), Operator::Add, Some(gated(amount)));
            }
            Item::Grant { name, .. } => {
                let target = AttrKey::scoped(kind.grant_prefix(), &name);
                engine.add_rule(target, gate.clone(), Operator::Set, Some(gated(1.0)));
            }
        }
    }
}

/// Make `<chosen>.<name>` count toward the kind's budget and grant the
/// proficiency. Every choice naming the same option shares both rules.
pub(crate) fn pool_member(engine: &mut RuleEngine, kind: PoolKind, name: &str) {
    let chosen = AttrKey::scoped(kind.chosen_prefix(), name);
    if !engine.add_allocation_member(&kind.allocation_note(), chosen.clone()) {
        return;
    }
    if kind != PoolKind::AbilityBoost {
        let granted = AttrKey::scoped(kind.grant_prefix(), name);
        engine.add_shared_rule(granted, chosen, Operator::Max, None);
    }
}

fn adjustment_rules(
    engine: &mut RuleEngine,
    gate: &AttrKey,
    op: AdjustOp,
    amount: Amount,
    words: &[String],
) {
    let target = (1..=words.len()).rev().map(|n| AttrKey::new(&camelize(&words[..n].join(" ")))).find(|key| {
        engine
            .config()
            .adjustable_attributes
            .iter()
            .any(|a| a == key.as_str())
            || engine.is_derived(key)
    });
    let Some(target) = target else {
        tracing::trace!(gate = %gate, words = ?words, "adjustment names no known attribute");
        return;
    };
    let (source, formula) = match amount {
        Amount::Number(n) => {
            let n = if op == AdjustOp::Subtract { -n } else { n };
            (gate.clone(), Some(gated(n)))
        }
        Amount::Value | Amount::Indexed(_) => {
            let source = match amount {
                Amount::Indexed(i) => AttrKey::new(&format!("{}.{}", gate, i)),
                _ => gate.clone(),
            };
            let formula = (op == AdjustOp::Subtract).then(|| {
                Formula::from_expr(Expr::Unary(UnaryOp::Neg, Box::new(Expr::Source)), "-source")
            });
            (source, formula)
        }
    };
    let operator = if op == AdjustOp::Multiply {
        Operator::Multiply
    } else {
        Operator::Add
    };
    engine.add_rule(target, source, operator, formula);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::Attributes;

    #[test]
    fn test_choose_from_list() {
        let f = parse_fragments("Skill Proficiency (Choose 2 from Arcana, History, Persuasion)");
        assert_eq!(
            f,
            vec![Fragment::Grant {
                kind: PoolKind::Skill,
                items: vec![Item::Choose {
                    count: 2,
                    options: Some(vec!["Arcana".into(), "History".into(), "Persuasion".into()]),
                }],
            }]
        );
    }

    #[test]
    fn test_direct_grants() {
        let f = parse_fragments("Skill Proficiency (Insight/Religion)");
        match &f[0] {
            Fragment::Grant { items, .. } => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[1], Item::Grant { name: "Religion".into(), amount: 1.0 });
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_mixed_items_and_semicolons() {
        let f = parse_fragments("Tool Proficiency (Choose 1 from Lute;Lyre/Smith's Tools)");
        match &f[0] {
            Fragment::Grant { kind, items } => {
                assert_eq!(*kind, PoolKind::Tool);
                assert_eq!(
                    items[0],
                    Item::Choose { count: 1, options: Some(vec!["Lute".into(), "Lyre".into()]) }
                );
                assert_eq!(items[1], Item::Grant { name: "Smith's Tools".into(), amount: 1.0 });
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_language_and_boost() {
        let f = parse_fragments("Language (Common/Choose 1 from any); Ability Boost (+2 Strength/Constitution)");
        assert_eq!(f.len(), 2);
        assert!(matches!(
            &f[0],
            Fragment::Grant { kind: PoolKind::Language, items } if items[1] == Item::Choose { count: 1, options: None }
        ));
        match &f[1] {
            Fragment::Grant { kind: PoolKind::AbilityBoost, items } => {
                assert_eq!(items[0], Item::Grant { name: "Strength".into(), amount: 2.0 });
                assert_eq!(items[1], Item::Grant { name: "Constitution".into(), amount: 1.0 });
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_adjustments() {
        let f = parse_fragments("+1 Armor Class while wearing armor; x2 Speed, -%V Hit Points");
        assert_eq!(f.len(), 3);
        assert_eq!(
            f[0],
            Fragment::Adjustment {
                op: AdjustOp::Add,
                amount: Amount::Number(1.0),
                words: vec!["Armor".into(), "Class".into()],
            }
        );
        assert!(matches!(&f[1], Fragment::Adjustment { op: AdjustOp::Multiply, .. }));
        assert!(matches!(&f[2], Fragment::Adjustment { amount: Amount::Value, .. }));
    }

    #[test]
    fn test_malformed_is_skipped() {
        assert!(parse_fragments("Skill Proficiency (Choose two from Arcana)").is_empty());
        assert!(parse_fragments("Skill Proficiency (Arcana").is_empty());
        assert!(parse_fragments("Half-Elf heritage, 5 ft").is_empty());
    }

    #[test]
    fn test_grammar_rules_choose_and_grant() {
        let mut engine = RuleEngine::new();
        let gate = AttrKey::new("features.Scholar");
        grammar_rules(&mut engine, &gate, "Skill Proficiency (Choose 2 from Arcana, History/Insight)");

        let mut c = Attributes::new();
        c.set("features.Scholar", 1);
        let sheet = engine.apply_rules(&c);
        assert_eq!(sheet.number("skillChoiceCount"), Some(2.0));
        assert_eq!(sheet.number("skillProficiency.Insight"), Some(1.0));
        assert!(sheet.get("skillProficiency.Arcana").is_none());
        assert_eq!(engine.pools().len(), 1);
    }

    #[test]
    fn test_grammar_rules_adjustment() {
        let mut engine = RuleEngine::new();
        let note = AttrKey::new("combatNotes.fastMovement");
        grammar_rules(&mut engine, &note, "+%V Speed");
        grammar_rules(&mut engine, &note, "+2 Unknown Thing");

        let mut c = Attributes::new();
        c.set("speed", 30);
        c.set("combatNotes.fastMovement", 10);
        assert_eq!(engine.apply_rules(&c).number("speed"), Some(40.0));
        assert_eq!(engine.rules().len(), 1);
    }
}
