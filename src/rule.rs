//! Rules and rule operators.
//!
//! A rule is one dependency edge: `target` receives a contribution computed
//! from `source` through an optional formula, combined by an operator.
//! Rules for the same target are grouped by operator priority and, within a
//! priority, applied in declaration order.

use crate::attr_key::AttrKey;
use crate::error::RuleError;
use crate::formula::Formula;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a rule's contribution combines with the target's running value.
///
/// Operators are applied in a fixed priority order:
/// Gate → Set → Add → Multiply → Max → Min.
///
/// # Examples
///
/// ```rust
/// use rulegraph::Operator;
///
/// assert_eq!(Operator::parse("+=").unwrap(), Operator::Add);
/// assert_eq!(Operator::parse("v").unwrap(), Operator::Min);
/// assert!(Operator::Gate.priority() < Operator::Set.priority());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Operator {
    /// `?`: the target exists only if the source is present and the formula
    /// is truthy.
    Gate,
    /// `=`: replace the running value. Last declaration wins.
    Set,
    /// `+`: accumulate.
    Add,
    /// `*`: scale.
    Multiply,
    /// `^`: keep the larger.
    Max,
    /// `v`: keep the smaller.
    Min,
}

impl Operator {
    /// Parse the spellings content modules use.
    pub fn parse(op: &str) -> Result<Operator, RuleError> {
        Ok(match op.trim() {
            "?" => Operator::Gate,
            "=" => Operator::Set,
            "+" | "+=" => Operator::Add,
            "*" | "*=" => Operator::Multiply,
            "^" | "^=" => Operator::Max,
            "v" | "v=" => Operator::Min,
            other => return Err(RuleError::UnknownOperator(other.to_string())),
        })
    }

    /// Lower values are applied first.
    pub fn priority(self) -> u8 {
        match self {
            Operator::Gate => 0,
            Operator::Set => 1,
            Operator::Add => 2,
            Operator::Multiply => 3,
            Operator::Max => 4,
            Operator::Min => 5,
        }
    }

    /// True for the operators whose result does not depend on rule order.
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            Operator::Add | Operator::Multiply | Operator::Max | Operator::Min
        )
    }

    /// Fold a contribution into the running value.
    pub fn combine(self, current: Option<Value>, contribution: Value) -> Option<Value> {
        let current = match current {
            None => return Some(contribution),
            Some(c) => c,
        };
        match self {
            Operator::Gate => Some(current),
            Operator::Set => Some(contribution),
            Operator::Add => current.plus(&contribution).or(Some(current)),
            Operator::Multiply => current.times(&contribution).or(Some(current)),
            Operator::Max => Some(current.max(contribution)),
            Operator::Min => Some(current.min(contribution)),
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Gate => "?",
            Operator::Set => "=",
            Operator::Add => "+",
            Operator::Multiply => "*",
            Operator::Max => "^",
            Operator::Min => "v",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Identity of the choice that registered a rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChoiceId {
    pub kind: String,
    pub name: String,
}

impl ChoiceId {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ChoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.name)
    }
}

/// One edge of the rule graph.
#[derive(Debug, Clone)]
pub struct Rule {
    pub target: AttrKey,
    pub source: AttrKey,
    pub op: Operator,
    /// `None` passes the source value through unchanged.
    pub formula: Option<Formula>,
    /// The choice that produced this rule, if any.
    pub origin: Option<ChoiceId>,
    /// Global declaration order.
    pub seq: u64,
}

impl Rule {
    /// The contribution of this rule given its source value and the
    /// snapshot built so far. `None` means no contribution.
    pub fn contribution(
        &self,
        source: Option<&Value>,
        dict: &crate::attributes::Attributes,
    ) -> Option<Value> {
        let source = source?;
        match &self.formula {
            None => Some(source.clone()),
            Some(f) => f.eval(Some(source), dict),
        }
    }

    pub fn description(&self) -> String {
        match &self.formula {
            None => format!("{} {} {}", self.target, self.op, self.source),
            Some(f) => format!("{} {} {} [{}]", self.target, self.op, self.source, f.text()),
        }
    }
}
