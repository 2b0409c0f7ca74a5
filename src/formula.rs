//! Formula AST and interpreter.
//!
//! Rule formulas such as `source < 7 ? 4 : source < 15 ? 5 : 6` are parsed
//! once, when the rule is defined, into an [`Expr`] tree. Evaluation walks
//! the tree against the rule's source value and the snapshot under
//! construction. Evaluation is total: anything that cannot be computed
//! yields `None` and the rule contributes nothing.

use crate::attr_key::AttrKey;
use crate::attributes::Attributes;
use crate::error::RuleError;
use crate::formula_parser;
use crate::value::Value;
use regex::Regex;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Floor,
    Ceil,
    Round,
    Abs,
    Min,
    Max,
    /// Render a number with an explicit sign: `+2`, `-1`, `+0`.
    Signed,
}

impl Func {
    pub(crate) fn lookup(name: &str) -> Option<Func> {
        let name = name.strip_prefix("Math.").unwrap_or(name);
        Some(match name {
            "floor" => Func::Floor,
            "ceil" => Func::Ceil,
            "round" => Func::Round,
            "abs" => Func::Abs,
            "min" => Func::Min,
            "max" => Func::Max,
            "signed" => Func::Signed,
            _ => return None,
        })
    }
}

/// Aggregation over every attribute whose name matches a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Sum,
    Max,
}

/// A compiled formula expression.
#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    Null,
    /// The value of the rule's source attribute.
    Source,
    /// `dict["name"]`: any attribute of the snapshot.
    Attr(AttrKey),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
    /// Number of matches of `regex` in the text of the subject.
    Matches(Box<Expr>, Regex),
    Aggregate(Aggregate, Regex),
}

impl Expr {
    pub fn number(n: f64) -> Expr {
        Expr::Literal(Value::Number(n))
    }

    pub fn text(s: impl Into<String>) -> Expr {
        Expr::Literal(Value::Text(s.into()))
    }

    pub fn attr(key: impl Into<AttrKey>) -> Expr {
        Expr::Attr(key.into())
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn not(e: Expr) -> Expr {
        Expr::Unary(UnaryOp::Not, Box::new(e))
    }

    pub fn ternary(cond: Expr, then: Expr, otherwise: Expr) -> Expr {
        Expr::Ternary(Box::new(cond), Box::new(then), Box::new(otherwise))
    }

    pub fn and(lhs: Expr, rhs: Expr) -> Expr {
        Expr::And(Box::new(lhs), Box::new(rhs))
    }

    pub fn or(lhs: Expr, rhs: Expr) -> Expr {
        Expr::Or(Box::new(lhs), Box::new(rhs))
    }

    /// Evaluate against a source value and the snapshot built so far.
    /// Evaluate with `source` bound to the rule's source value and `dict`
    /// as the partially computed sheet.
    pub fn eval(&self, source: Option<&Value>, dict: &Attributes) -> Option<Value> {
        match self {
            Expr::Literal(v) => Some(v.clone()),
            Expr::Null => None,
            Expr::Source => source.cloned(),
            Expr::Attr(key) => dict.get_key(key).cloned(),
            Expr::Unary(op, e) => {
                let v = e.eval(source, dict);
                match op {
                    UnaryOp::Not => Some(Value::Bool(!v.map(|v| v.truthy()).unwrap_or(false))),
                    UnaryOp::Neg => Some(Value::Number(-v?.as_number()?)),
                    UnaryOp::Plus => Some(Value::Number(v?.as_number()?)),
                }
            }
            Expr::Binary(op, lhs, rhs) => {
                let l = lhs.eval(source, dict);
                let r = rhs.eval(source, dict);
                eval_binary(*op, l, r)
            }
            Expr::And(lhs, rhs) => {
                let l = lhs.eval(source, dict);
                if l.as_ref().map(Value::truthy).unwrap_or(false) {
                    rhs.eval(source, dict)
                } else {
                    l
                }
            }
            Expr::Or(lhs, rhs) => {
                let l = lhs.eval(source, dict);
                if l.as_ref().map(Value::truthy).unwrap_or(false) {
                    l
                } else {
                    rhs.eval(source, dict)
                }
            }
            Expr::Ternary(cond, then, otherwise) => {
                let c = cond.eval(source, dict);
                if c.map(|v| v.truthy()).unwrap_or(false) {
                    then.eval(source, dict)
                } else {
                    otherwise.eval(source, dict)
                }
            }
            Expr::Call(func, args) => {
                let values: Vec<Option<Value>> =
                    args.iter().map(|a| a.eval(source, dict)).collect();
                eval_call(*func, &values)
            }
            Expr::Matches(subject, regex) => {
                let text = subject.eval(source, dict)?.as_text();
                Some(Value::Number(regex.find_iter(&text).count() as f64))
            }
            Expr::Aggregate(kind, regex) => {
                let matching = dict
                    .iter()
                    .filter(|(k, _)| regex.is_match(k.as_str()))
                    .filter_map(|(_, v)| v.as_number());
                match kind {
                    Aggregate::Sum => Some(Value::Number(matching.sum())),
                    Aggregate::Max => matching
                        .fold(None, |acc: Option<f64>, n| Some(acc.map_or(n, |a| a.max(n))))
                        .map(Value::Number),
                }
            }
        }
    }

    fn collect(&self, deps: &mut Vec<AttrKey>, patterns: &mut Vec<Regex>) {
        match self {
            Expr::Attr(key) => {
                if !deps.contains(key) {
                    deps.push(key.clone());
                }
            }
            Expr::Aggregate(_, re) => patterns.push(re.clone()),
            Expr::Unary(_, e) => e.collect(deps, patterns),
            Expr::Matches(e, _) => e.collect(deps, patterns),
            Expr::Binary(_, a, b) | Expr::And(a, b) | Expr::Or(a, b) => {
                a.collect(deps, patterns);
                b.collect(deps, patterns);
            }
            Expr::Ternary(a, b, c) => {
                a.collect(deps, patterns);
                b.collect(deps, patterns);
                c.collect(deps, patterns);
            }
            Expr::Call(_, args) => {
                for a in args {
                    a.collect(deps, patterns);
                }
            }
            Expr::Literal(_) | Expr::Null | Expr::Source => {}
        }
    }
}

fn eval_binary(op: BinaryOp, l: Option<Value>, r: Option<Value>) -> Option<Value> {
    let compare = |pred: fn(Ordering) -> bool| -> Option<Value> {
        let result = match (&l, &r) {
            (Some(a), Some(b)) => a.loose_cmp(b).map(pred).unwrap_or(false),
            _ => false,
        };
        Some(Value::Bool(result))
    };
    match op {
        BinaryOp::Eq => Some(Value::Bool(match (&l, &r) {
            (Some(a), Some(b)) => a.loose_eq(b),
            (None, None) => true,
            _ => false,
        })),
        BinaryOp::Ne => Some(Value::Bool(match (&l, &r) {
            (Some(a), Some(b)) => !a.loose_eq(b),
            (None, None) => false,
            _ => true,
        })),
        BinaryOp::Lt => compare(|o| o == Ordering::Less),
        BinaryOp::Le => compare(|o| o != Ordering::Greater),
        BinaryOp::Gt => compare(|o| o == Ordering::Greater),
        BinaryOp::Ge => compare(|o| o != Ordering::Less),
        BinaryOp::Add => l?.plus(&r?),
        BinaryOp::Mul => l?.times(&r?),
        BinaryOp::Sub => Some(Value::Number(l?.as_number()? - r?.as_number()?)),
        BinaryOp::Div => {
            let d = r?.as_number()?;
            if d == 0.0 {
                return None;
            }
            Some(Value::Number(l?.as_number()? / d))
        }
        BinaryOp::Rem => {
            let d = r?.as_number()?;
            if d == 0.0 {
                return None;
            }
            Some(Value::Number(l?.as_number()? % d))
        }
    }
}

fn eval_call(func: Func, args: &[Option<Value>]) -> Option<Value> {
    let first = || args.first()?.as_ref()?.as_number();
    match func {
        Func::Floor => Some(Value::Number(first()?.floor())),
        Func::Ceil => Some(Value::Number(first()?.ceil())),
        Func::Round => Some(Value::Number(first()?.round())),
        Func::Abs => Some(Value::Number(first()?.abs())),
        Func::Signed => {
            let n = first()?;
            let shown = Value::Number(n).to_string();
            Some(Value::Text(if n >= 0.0 { format!("+{}", shown) } else { shown }))
        }
        Func::Min | Func::Max => {
            let nums = args
                .iter()
                .filter_map(|a| a.as_ref().and_then(Value::as_number));
            let picked = nums.fold(None, |acc: Option<f64>, n| {
                Some(match acc {
                    None => n,
                    Some(a) if func == Func::Min => a.min(n),
                    Some(a) => a.max(n),
                })
            });
            picked.map(Value::Number)
        }
    }
}

/// A formula compiled at rule-registration time.
///
/// # Examples
///
/// ```rust
/// use rulegraph::{Attributes, Formula, Value};
///
/// let f = Formula::parse("source < 7 ? 4 : source < 15 ? 5 : 6").unwrap();
/// let dict = Attributes::new();
/// assert_eq!(f.eval(Some(&Value::from(3.0)), &dict), Some(Value::from(4.0)));
/// assert_eq!(f.eval(Some(&Value::from(20.0)), &dict), Some(Value::from(6.0)));
///
/// let g = Formula::parse("dict['levels.Fighter'] * 2").unwrap();
/// assert_eq!(g.dependencies().len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct Formula {
    text: String,
    expr: Expr,
    deps: Vec<AttrKey>,
    patterns: Vec<Regex>,
}

impl Formula {
    /// Compile formula text.
    pub fn parse(text: &str) -> Result<Formula, RuleError> {
        let expr = formula_parser::parse(text)?;
        Ok(Formula::from_expr(expr, text))
    }

    /// Wrap an already-built expression; `text` is used for descriptions.
    pub fn from_expr(expr: Expr, text: impl Into<String>) -> Formula {
        let mut deps = Vec::new();
        let mut patterns = Vec::new();
        expr.collect(&mut deps, &mut patterns);
        Formula {
            text: text.into(),
            expr,
            deps,
            patterns,
        }
    }

    /// A formula that ignores its source and yields `value`.
    pub fn constant(value: impl Into<Value>) -> Formula {
        let value = value.into();
        let text = value.to_string();
        Formula::from_expr(Expr::Literal(value), text)
    }

    pub fn eval(&self, source: Option<&Value>, dict: &Attributes) -> Option<Value> {
        self.expr.eval(source, dict)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Attributes named through `dict[...]`.
    pub fn dependencies(&self) -> &[AttrKey] {
        &self.deps
    }

    /// Name patterns read by `sum(...)`/`maxof(...)`.
    pub fn patterns(&self) -> &[Regex] {
        &self.patterns
    }
}
