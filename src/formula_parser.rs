//! Lexer and recursive-descent parser for rule formulas.

use crate::error::RuleError;
use crate::formula::{Aggregate, BinaryOp, Expr, Func, UnaryOp};
use crate::value::Value;
use regex::Regex;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
}

const PUNCTUATION: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "(", ")", "[", "]", ",", "?", ":", "+",
    "-", "*", "/", "%", "<", ">", "!",
];

fn tokenize(text: &str) -> Result<Vec<Token>, RuleError> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let literal: String = chars[start..i].iter().collect();
            let n = literal
                .parse::<f64>()
                .map_err(|_| RuleError::formula(text, format!("bad number `{}`", literal)))?;
            tokens.push(Token::Num(n));
        } else if c == '"' || c == '\'' {
            let quote = c;
            i += 1;
            let mut s = String::new();
            loop {
                match chars.get(i) {
                    None => return Err(RuleError::formula(text, "unterminated string")),
                    Some(&ch) if ch == quote => {
                        i += 1;
                        break;
                    }
                    Some('\\') => {
                        match chars.get(i + 1) {
                            Some(&e @ ('\\' | '\'' | '"')) => s.push(e),
                            Some('n') => s.push('\n'),
                            Some(&other) => {
                                s.push('\\');
                                s.push(other);
                            }
                            None => return Err(RuleError::formula(text, "unterminated string")),
                        }
                        i += 2;
                    }
                    Some(&ch) => {
                        s.push(ch);
                        i += 1;
                    }
                }
            }
            tokens.push(Token::Str(s));
        } else if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '$' | '.'))
            {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else {
            let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
            let punct = PUNCTUATION
                .iter()
                .find(|p| rest.starts_with(*p))
                .ok_or_else(|| RuleError::formula(text, format!("unexpected character `{}`", c)))?;
            tokens.push(Token::Punct(punct));
            i += punct.chars().count();
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    text: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, reason: impl Into<String>) -> RuleError {
        RuleError::formula(self.text, reason)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn eat(&mut self, punct: &str) -> bool {
        if matches!(self.peek(), Some(Token::Punct(p)) if *p == punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) -> Result<(), RuleError> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(self.error(format!("expected `{}`", punct)))
        }
    }

    fn ternary(&mut self) -> Result<Expr, RuleError> {
        let cond = self.or()?;
        if self.eat("?") {
            let then = self.ternary()?;
            self.expect(":")?;
            let otherwise = self.ternary()?;
            return Ok(Expr::ternary(cond, then, otherwise));
        }
        Ok(cond)
    }

    fn or(&mut self) -> Result<Expr, RuleError> {
        let mut lhs = self.and()?;
        while self.eat("||") {
            lhs = Expr::or(lhs, self.and()?);
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, RuleError> {
        let mut lhs = self.equality()?;
        while self.eat("&&") {
            lhs = Expr::and(lhs, self.equality()?);
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> Result<Expr, RuleError> {
        let mut lhs = self.comparison()?;
        loop {
            let op = if self.eat("==") || self.eat("===") {
                BinaryOp::Eq
            } else if self.eat("!=") || self.eat("!==") {
                BinaryOp::Ne
            } else {
                return Ok(lhs);
            };
            lhs = Expr::binary(op, lhs, self.comparison()?);
        }
    }

    fn comparison(&mut self) -> Result<Expr, RuleError> {
        let mut lhs = self.additive()?;
        loop {
            let op = if self.eat("<=") {
                BinaryOp::Le
            } else if self.eat(">=") {
                BinaryOp::Ge
            } else if self.eat("<") {
                BinaryOp::Lt
            } else if self.eat(">") {
                BinaryOp::Gt
            } else {
                return Ok(lhs);
            };
            lhs = Expr::binary(op, lhs, self.additive()?);
        }
    }

    fn additive(&mut self) -> Result<Expr, RuleError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = if self.eat("+") {
                BinaryOp::Add
            } else if self.eat("-") {
                BinaryOp::Sub
            } else {
                return Ok(lhs);
            };
            lhs = Expr::binary(op, lhs, self.multiplicative()?);
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, RuleError> {
        let mut lhs = self.unary()?;
        loop {
            let op = if self.eat("*") {
                BinaryOp::Mul
            } else if self.eat("/") {
                BinaryOp::Div
            } else if self.eat("%") {
                BinaryOp::Rem
            } else {
                return Ok(lhs);
            };
            lhs = Expr::binary(op, lhs, self.unary()?);
        }
    }

    fn unary(&mut self) -> Result<Expr, RuleError> {
        let op = if self.eat("-") {
            UnaryOp::Neg
        } else if self.eat("+") {
            UnaryOp::Plus
        } else if self.eat("!") {
            UnaryOp::Not
        } else {
            return self.primary();
        };
        Ok(Expr::Unary(op, Box::new(self.unary()?)))
    }

    fn string_arg(&mut self) -> Result<String, RuleError> {
        match self.next() {
            Some(Token::Str(s)) => Ok(s),
            _ => Err(self.error("expected a quoted string")),
        }
    }

    fn regex(&self, pattern: &str) -> Result<Regex, RuleError> {
        Regex::new(pattern).map_err(|e| self.error(format!("bad pattern `{}`: {}", pattern, e)))
    }

    fn primary(&mut self) -> Result<Expr, RuleError> {
        match self.next() {
            Some(Token::Num(n)) => Ok(Expr::number(n)),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::Text(s))),
            Some(Token::Punct("(")) => {
                let e = self.ternary()?;
                self.expect(")")?;
                Ok(e)
            }
            Some(Token::Ident(name)) => self.identifier(name),
            Some(other) => Err(self.error(format!("unexpected token {:?}", other))),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn identifier(&mut self, name: String) -> Result<Expr, RuleError> {
        match name.as_str() {
            "source" => return Ok(Expr::Source),
            "true" => return Ok(Expr::Literal(Value::Bool(true))),
            "false" => return Ok(Expr::Literal(Value::Bool(false))),
            "null" | "undefined" => return Ok(Expr::Null),
            "dict" => {
                self.expect("[")?;
                let key = self.string_arg()?;
                self.expect("]")?;
                return Ok(Expr::attr(key.as_str()));
            }
            _ => {}
        }
        if !self.eat("(") {
            return Err(self.error(format!("unknown identifier `{}`", name)));
        }
        let expr = match name.as_str() {
            "sum" | "maxof" => {
                let pattern = self.string_arg()?;
                let kind = if name == "sum" { Aggregate::Sum } else { Aggregate::Max };
                Expr::Aggregate(kind, self.regex(&pattern)?)
            }
            "matches" => {
                let subject = self.ternary()?;
                self.expect(",")?;
                let pattern = self.string_arg()?;
                Expr::Matches(Box::new(subject), self.regex(&pattern)?)
            }
            _ => {
                let func = Func::lookup(&name)
                    .ok_or_else(|| self.error(format!("unknown function `{}`", name)))?;
                let mut args = Vec::new();
                if !matches!(self.peek(), Some(Token::Punct(")"))) {
                    loop {
                        args.push(self.ternary()?);
                        if !self.eat(",") {
                            break;
                        }
                    }
                }
                Expr::Call(func, args)
            }
        };
        self.expect(")")?;
        Ok(expr)
    }
}

/// Parse formula text into an expression tree.
pub(crate) fn parse(text: &str) -> Result<Expr, RuleError> {
    let tokens = tokenize(text)?;
    if tokens.is_empty() {
        return Err(RuleError::formula(text, "empty formula"));
    }
    let mut parser = Parser {
        text,
        tokens,
        pos: 0,
    };
    let expr = parser.ternary()?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.error(format!("trailing input at token {}", parser.pos)));
    }
    Ok(expr)
}
