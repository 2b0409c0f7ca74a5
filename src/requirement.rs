//! Prerequisite expressions.
//!
//! A requirement list such as `strength >= 13/features.Spellcasting || race =~ 'Elf'`
//! is an AND (split on `/`) of clauses, each an OR (split on `||`) of tests.
//! Requirements compile to ordinary rules targeting a `validationNotes.*` or
//! `sanityNotes.*` attribute whose value is the number of unmet clauses.

use crate::attr_key::AttrKey;
use crate::attributes::Attributes;
use crate::constraint::RequirementConstraint;
use crate::engine::RuleEngine;
use crate::error::RuleError;
use crate::formula::{Aggregate, BinaryOp, Expr, Formula};
use crate::rule::Operator;
use crate::value::Value;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Ge,
    Le,
    Gt,
    Lt,
    Eq,
    Ne,
    Matches,
    NotMatches,
}

impl CompareOp {
    const SPELLINGS: [(&'static str, CompareOp); 8] = [
        (">=", CompareOp::Ge),
        ("<=", CompareOp::Le),
        ("==", CompareOp::Eq),
        ("!=", CompareOp::Ne),
        ("=~", CompareOp::Matches),
        ("!~", CompareOp::NotMatches),
        (">", CompareOp::Gt),
        ("<", CompareOp::Lt),
    ];

    fn binary(self) -> Option<BinaryOp> {
        Some(match self {
            CompareOp::Ge => BinaryOp::Ge,
            CompareOp::Le => BinaryOp::Le,
            CompareOp::Gt => BinaryOp::Gt,
            CompareOp::Lt => BinaryOp::Lt,
            CompareOp::Eq => BinaryOp::Eq,
            CompareOp::Ne => BinaryOp::Ne,
            CompareOp::Matches | CompareOp::NotMatches => return None,
        })
    }
}

/// What a test reads.
#[derive(Debug, Clone)]
pub enum Subject {
    Attr(AttrKey),
    /// `Sum "pattern"`: total of every attribute whose name matches.
    Sum(Regex),
    /// `Max "pattern"`: largest value among matching attributes.
    Max(Regex),
}

/// One alternative: a subject, optionally compared against a value.
#[derive(Debug, Clone)]
pub struct Test {
    pub subject: Subject,
    pub comparison: Option<(CompareOp, Value)>,
    /// Compiled value of `=~` / `!~`.
    regex: Option<Regex>,
}

impl Test {
    fn parse(text: &str, whole: &str) -> Result<Test, RuleError> {
        let text = text.trim();
        let (aggregate, rest) = match text.split_once(' ') {
            Some(("Sum", rest)) => (Some(Aggregate::Sum), rest.trim_start()),
            Some(("Max", rest)) => (Some(Aggregate::Max), rest.trim_start()),
            _ => (None, text),
        };
        let (subject_text, comparison) = match find_operator(rest) {
            Some((pos, spelling, op)) => {
                let value = rest[pos + spelling.len()..].trim();
                (&rest[..pos], Some((op, parse_value(value, whole)?)))
            }
            None => (rest, None),
        };
        let subject_text = unquote(subject_text.trim());
        if subject_text.is_empty() {
            return Err(RuleError::requirement(whole, format!("missing attribute in `{}`", text)));
        }
        let subject = match aggregate {
            None => Subject::Attr(AttrKey::new(&subject_text)),
            Some(kind) => {
                let re = Regex::new(&subject_text)
                    .map_err(|e| RuleError::requirement(whole, e.to_string()))?;
                if kind == Aggregate::Sum {
                    Subject::Sum(re)
                } else {
                    Subject::Max(re)
                }
            }
        };
        let regex = match &comparison {
            Some((CompareOp::Matches | CompareOp::NotMatches, value)) => Some(
                Regex::new(&value.as_text())
                    .map_err(|e| RuleError::requirement(whole, e.to_string()))?,
            ),
            _ => None,
        };
        Ok(Test {
            subject,
            comparison,
            regex,
        })
    }

    /// The attribute a repair can change to satisfy this test, if it reads
    /// a single attribute.
    pub fn attr(&self) -> Option<&AttrKey> {
        match &self.subject {
            Subject::Attr(key) => Some(key),
            _ => None,
        }
    }

    pub fn to_expr(&self) -> Expr {
        let subject = match &self.subject {
            Subject::Attr(key) => Expr::Attr(key.clone()),
            Subject::Sum(re) => Expr::Aggregate(Aggregate::Sum, re.clone()),
            Subject::Max(re) => Expr::Aggregate(Aggregate::Max, re.clone()),
        };
        match (&self.comparison, &self.regex) {
            (None, _) => subject,
            (Some((CompareOp::Matches, _)), Some(re)) => {
                Expr::Matches(Box::new(subject), re.clone())
            }
            (Some((CompareOp::NotMatches, _)), Some(re)) => {
                Expr::not(Expr::Matches(Box::new(subject), re.clone()))
            }
            (Some((op, value)), _) => match op.binary() {
                Some(bin) => Expr::binary(bin, subject, Expr::Literal(value.clone())),
                None => subject,
            },
        }
    }

    /// Evaluate against an evaluated sheet. An absent subject fails any
    /// comparison.
    pub fn holds(&self, snapshot: &Attributes) -> bool {
        self.to_expr()
            .eval(None, snapshot)
            .is_some_and(|v| v.truthy())
    }
}

/// An OR of tests.
#[derive(Debug, Clone)]
pub struct Clause {
    pub text: String,
    pub alternatives: Vec<Test>,
}

impl Clause {
    pub fn to_expr(&self) -> Expr {
        let mut iter = self.alternatives.iter().map(Test::to_expr);
        let first = iter.next().unwrap_or(Expr::Literal(Value::Bool(true)));
        iter.fold(first, Expr::or)
    }

    pub fn holds(&self, snapshot: &Attributes) -> bool {
        self.alternatives.iter().any(|t| t.holds(snapshot))
    }
}

/// A parsed prerequisite list.
///
/// # Examples
///
/// ```rust
/// use rulegraph::requirement::Requirement;
/// use rulegraph::Attributes;
///
/// let req = Requirement::parse("strength >= 13/race == 'Elf' || race == 'Half-Elf'").unwrap();
/// assert_eq!(req.clauses.len(), 2);
///
/// let mut character = Attributes::new();
/// character.set("strength", 10);
/// character.set("race", "Elf");
/// assert_eq!(req.unmet_clauses(&character).len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct Requirement {
    pub text: String,
    pub clauses: Vec<Clause>,
}

impl Requirement {
    /// Parse a `/`-separated list of clauses, each a `||` of tests.
    ///
    /// # Errors
    ///
    /// Returns `RuleError::Requirement` naming the whole text when any test
    /// is malformed or the list is empty.
    pub fn parse(text: &str) -> Result<Requirement, RuleError> {
        let mut clauses = Vec::new();
        for clause_text in split_outside_quotes(text, "/") {
            if clause_text.trim().is_empty() {
                continue;
            }
            let alternatives = split_outside_quotes(clause_text, "||")
                .into_iter()
                .map(|alt| Test::parse(alt, text))
                .collect::<Result<Vec<_>, _>>()?;
            clauses.push(Clause {
                text: clause_text.trim().to_string(),
                alternatives,
            });
        }
        if clauses.is_empty() {
            return Err(RuleError::requirement(text, "empty requirement"));
        }
        Ok(Requirement {
            text: text.to_string(),
            clauses,
        })
    }

    /// Parse several lists (the values of a `Require=` key) as one.
    pub fn parse_all(items: &[String]) -> Result<Requirement, RuleError> {
        Requirement::parse(&items.join("/"))
    }

    /// The clauses that fail on `snapshot`. The validator note counts them.
    pub fn unmet_clauses<'a>(&'a self, snapshot: &Attributes) -> Vec<&'a Clause> {
        self.clauses.iter().filter(|c| !c.holds(snapshot)).collect()
    }

    /// An expression that is truthy when every clause holds.
    pub fn to_expr(&self) -> Expr {
        let mut iter = self.clauses.iter().map(Clause::to_expr);
        let first = iter.next().unwrap_or(Expr::Literal(Value::Bool(true)));
        iter.fold(first, Expr::and)
    }

    pub fn is_met(&self, snapshot: &Attributes) -> bool {
        self.clauses.iter().all(|c| c.holds(snapshot))
    }
}

/// Compile a requirement into `<section>Notes.<note_name>`.
///
/// `section` is `validation` for hard requirements and `sanity` for soft
/// ones. The note is absent unless `selector` is present and truthy;
/// otherwise it counts unmet clauses.
pub fn requirement_rules(
    engine: &mut RuleEngine,
    section: &str,
    note_name: &str,
    selector: &AttrKey,
    requirement: Requirement,
) {
    let note = AttrKey::scoped(&format!("{}Notes", section), note_name);
    engine.add_rule(note.clone(), selector.clone(), Operator::Gate, None);
    engine.add_rule(note.clone(), selector.clone(), Operator::Set, Some(Formula::constant(0)));
    for clause in &requirement.clauses {
        let unmet = Expr::ternary(clause.to_expr(), Expr::number(0.0), Expr::number(1.0));
        let formula = Formula::from_expr(unmet, format!("!({})", clause.text));
        engine.add_rule(note.clone(), selector.clone(), Operator::Add, Some(formula));
    }
    engine.add_requirement(RequirementConstraint {
        note,
        selector: selector.clone(),
        requirement,
        origin: None,
    });
}

/// Position, spelling and kind of the first comparison operator outside
/// quotes.
fn find_operator(text: &str) -> Option<(usize, &'static str, CompareOp)> {
    let bytes = text.as_bytes();
    let mut quote: Option<u8> = None;
    for i in 0..bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None => {
                for (spelling, op) in CompareOp::SPELLINGS {
                    if bytes[i..].starts_with(spelling.as_bytes()) {
                        return Some((i, spelling, op));
                    }
                }
            }
        }
    }
    None
}

fn split_outside_quotes<'a>(text: &'a str, sep: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    let mut iter = text.char_indices().peekable();
    while let Some((i, c)) = iter.next() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if text[i..].starts_with(sep) => {
                parts.push(&text[start..i]);
                start = i + sep.len();
                for _ in 1..sep.chars().count() {
                    iter.next();
                }
            }
            None => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

fn unquote(text: &str) -> String {
    let quoted = text.len() >= 2
        && ((text.starts_with('"') && text.ends_with('"'))
            || (text.starts_with('\'') && text.ends_with('\'')));
    if quoted {
        text[1..text.len() - 1].to_string()
    } else {
        text.to_string()
    }
}

fn parse_value(text: &str, whole: &str) -> Result<Value, RuleError> {
    if text.is_empty() {
        return Err(RuleError::requirement(whole, "missing comparison value"));
    }
    let unquoted = unquote(text);
    if unquoted.len() != text.len() {
        return Ok(Value::Text(unquoted));
    }
    Ok(match text.parse::<f64>() {
        Ok(n) => Value::Number(n),
        Err(_) => Value::Text(text.to_string()),
    })
}
