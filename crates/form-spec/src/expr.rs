use std::collections::BTreeMap;

use handlebars::Handlebars;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::coerce;

/// User-authored expression used by custom validators, mapping transforms
/// and calculated fields.
///
/// A bare string is a formula. Structured forms are tagged by `kind`.
/// Evaluation never runs arbitrary code: formulas are parsed into a small
/// AST over a closed set of operators and functions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Expression {
    Source(String),
    Structured(ExpressionKind),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExpressionKind {
    Formula {
        source: String,
    },
    /// Handlebars template rendered against the bindings.
    Template {
        template: String,
    },
    /// Maps the string form of a bound value through a table.
    Lookup {
        table: BTreeMap<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<Value>,
        /// Binding to look up; defaults to `value`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExprError {
    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),
    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("function '{name}' expects {expected} argument(s), got {found}")]
    Arity {
        name: String,
        expected: &'static str,
        found: usize,
    },
    #[error("cannot read property '{0}' of null or undefined")]
    NullAccess(String),
    #[error("result is not a finite number")]
    NonFinite,
    #[error("invalid regular expression: {0}")]
    Regex(String),
    #[error("template error: {0}")]
    Template(String),
    #[error("no lookup entry for '{0}'")]
    LookupMiss(String),
    #[error("fixed-point digits must be between 0 and 100, got {0}")]
    Precision(f64),
    #[error("expression nests deeper than {} levels", MAX_DEPTH)]
    TooDeep,
}

/// Deepest nesting a formula may have; bounds parser and evaluator recursion.
pub const MAX_DEPTH: usize = 64;

/// Largest precision accepted by `fixed` and `#` formats.
pub const MAX_FIXED_DIGITS: usize = 100;

impl Expression {
    pub fn formula(source: impl Into<String>) -> Self {
        Expression::Source(source.into())
    }

    pub fn template(template: impl Into<String>) -> Self {
        Expression::Structured(ExpressionKind::Template {
            template: template.into(),
        })
    }

    /// Evaluates with a single bound parameter.
    pub fn evaluate_with(&self, name: &str, value: &Value) -> Result<Value, ExprError> {
        let mut bindings = Map::new();
        bindings.insert(name.to_string(), value.clone());
        self.evaluate(&bindings)
    }

    pub fn evaluate(&self, bindings: &Map<String, Value>) -> Result<Value, ExprError> {
        match self {
            Expression::Source(source)
            | Expression::Structured(ExpressionKind::Formula { source }) => {
                let node = parse(source)?;
                eval(&node, bindings)?.into_value()
            }
            Expression::Structured(ExpressionKind::Template { template }) => {
                let mut registry = Handlebars::new();
                registry.register_escape_fn(handlebars::no_escape);
                registry
                    .render_template(template, bindings)
                    .map(Value::String)
                    .map_err(|error| ExprError::Template(error.to_string()))
            }
            Expression::Structured(ExpressionKind::Lookup {
                table,
                default,
                key,
            }) => {
                let bound = match key {
                    Some(key) => bindings.get(key),
                    None => bindings.get("value").or_else(|| bindings.values().next()),
                };
                let lookup_key = coerce::to_js_string(bound);
                table
                    .get(&lookup_key)
                    .or(default.as_ref())
                    .cloned()
                    .ok_or(ExprError::LookupMiss(lookup_key))
            }
        }
    }
}

/// Parses a formula, tolerating a leading `return` and trailing `;`.
pub fn parse(source: &str) -> Result<Node, ExprError> {
    let trimmed = source.trim();
    let trimmed = trimmed.strip_prefix("return ").unwrap_or(trimmed);
    let trimmed = trimmed.trim().trim_end_matches(';');
    let tokens = tokenize(trimmed)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let node = parser.conditional()?;
    match parser.peek() {
        None => Ok(node),
        Some(token) => Err(ExprError::UnexpectedToken(token.to_string())),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{}", coerce::format_number(*n)),
            Token::Str(text) => write!(f, "\"{text}\""),
            Token::Ident(name) => f.write_str(name),
            Token::Punct(punct) => f.write_str(punct),
        }
    }
}

const PUNCTUATION: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "(", ")", "[", "]", ",", ".", "?", ":",
    "+", "-", "*", "/", "%", "!", "<", ">",
];

fn tokenize(source: &str) -> Result<Vec<Token>, ExprError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        if ch.is_whitespace() {
            i += 1;
            continue;
        }

        let starts_number =
            ch.is_ascii_digit() || (ch == '.' && chars.get(i + 1).is_some_and(char::is_ascii_digit));
        if starts_number {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].is_ascii_digit() {
                    i = j;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let literal: String = chars[start..i].iter().collect();
            let number = literal
                .parse::<f64>()
                .map_err(|_| ExprError::UnexpectedToken(literal.clone()))?;
            tokens.push(Token::Number(number));
            continue;
        }

        if ch == '"' || ch == '\'' {
            let quote = ch;
            let mut text = String::new();
            i += 1;
            loop {
                let Some(&current) = chars.get(i) else {
                    return Err(ExprError::UnterminatedString);
                };
                i += 1;
                if current == quote {
                    break;
                }
                if current == '\\' {
                    let Some(&escaped) = chars.get(i) else {
                        return Err(ExprError::UnterminatedString);
                    };
                    i += 1;
                    text.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        other => other,
                    });
                } else {
                    text.push(current);
                }
            }
            tokens.push(Token::Str(text));
            continue;
        }

        if ch.is_alphabetic() || ch == '_' || ch == '$' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
            {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }

        let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
        match PUNCTUATION.iter().find(|punct| rest.starts_with(**punct)) {
            Some(&punct) => {
                tokens.push(Token::Punct(punct));
                i += punct.len();
            }
            None => return Err(ExprError::UnexpectedChar { ch, offset: i }),
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

/// Formula AST.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Literal(Value),
    Undefined,
    Ident(String),
    Member(Box<Node>, Box<Node>),
    Negate(Box<Node>),
    Not(Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
    Conditional(Box<Node>, Box<Node>, Box<Node>),
    Call(String, Vec<Node>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token, ExprError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(ExprError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(token)
    }

    fn eat(&mut self, punct: &str) -> bool {
        if matches!(self.peek(), Some(Token::Punct(p)) if *p == punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) -> Result<(), ExprError> {
        if self.eat(punct) {
            Ok(())
        } else {
            match self.peek() {
                Some(token) => Err(ExprError::UnexpectedToken(token.to_string())),
                None => Err(ExprError::UnexpectedEnd),
            }
        }
    }

    /// Each nested construct takes one level; `ascend` gives them back.
    fn descend(&mut self) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExprError::TooDeep);
        }
        Ok(())
    }

    fn ascend(&mut self, levels: usize) {
        self.depth -= levels;
    }

    fn conditional(&mut self) -> Result<Node, ExprError> {
        self.descend()?;
        let test = self.binary(0)?;
        let node = if self.eat("?") {
            let consequent = self.conditional()?;
            self.expect(":")?;
            let alternate = self.conditional()?;
            Node::Conditional(Box::new(test), Box::new(consequent), Box::new(alternate))
        } else {
            test
        };
        self.ascend(1);
        Ok(node)
    }

    fn binary_operator(&self) -> Option<(BinaryOp, u8)> {
        let Some(Token::Punct(punct)) = self.peek() else {
            return None;
        };
        let operator = match *punct {
            "||" => (BinaryOp::Or, 1),
            "&&" => (BinaryOp::And, 2),
            "==" | "===" => (BinaryOp::Eq, 3),
            "!=" | "!==" => (BinaryOp::Ne, 3),
            "<" => (BinaryOp::Lt, 4),
            "<=" => (BinaryOp::Le, 4),
            ">" => (BinaryOp::Gt, 4),
            ">=" => (BinaryOp::Ge, 4),
            "+" => (BinaryOp::Add, 5),
            "-" => (BinaryOp::Sub, 5),
            "*" => (BinaryOp::Mul, 6),
            "/" => (BinaryOp::Div, 6),
            "%" => (BinaryOp::Rem, 6),
            _ => return None,
        };
        Some(operator)
    }

    fn binary(&mut self, min_precedence: u8) -> Result<Node, ExprError> {
        let mut left = self.unary()?;
        let mut levels = 0;
        while let Some((operator, precedence)) = self.binary_operator() {
            if precedence <= min_precedence {
                break;
            }
            self.pos += 1;
            self.descend()?;
            levels += 1;
            let right = self.binary(precedence)?;
            left = Node::Binary(operator, Box::new(left), Box::new(right));
        }
        self.ascend(levels);
        Ok(left)
    }

    fn unary(&mut self) -> Result<Node, ExprError> {
        let prefix = ["-", "+", "!"].into_iter().find(|punct| self.eat(punct));
        let Some(prefix) = prefix else {
            return self.postfix();
        };
        self.descend()?;
        let operand = self.unary()?;
        self.ascend(1);
        Ok(match prefix {
            "-" => Node::Negate(Box::new(operand)),
            "+" => Node::Call("number".into(), vec![operand]),
            _ => Node::Not(Box::new(operand)),
        })
    }

    fn postfix(&mut self) -> Result<Node, ExprError> {
        let mut node = self.primary()?;
        let mut levels = 0;
        loop {
            let index = if self.eat(".") {
                match self.next()? {
                    Token::Ident(name) => Node::Literal(name.into()),
                    other => return Err(ExprError::UnexpectedToken(other.to_string())),
                }
            } else if self.eat("[") {
                let index = self.conditional()?;
                self.expect("]")?;
                index
            } else {
                self.ascend(levels);
                return Ok(node);
            };
            self.descend()?;
            levels += 1;
            node = Node::Member(Box::new(node), Box::new(index));
        }
    }

    fn primary(&mut self) -> Result<Node, ExprError> {
        match self.next()? {
            Token::Number(n) => Ok(Node::Literal(coerce::number_value(n))),
            Token::Str(text) => Ok(Node::Literal(Value::String(text))),
            Token::Punct("(") => {
                let inner = self.conditional()?;
                self.expect(")")?;
                Ok(inner)
            }
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Node::Literal(Value::Bool(true))),
                "false" => Ok(Node::Literal(Value::Bool(false))),
                "null" => Ok(Node::Literal(Value::Null)),
                "undefined" => Ok(Node::Undefined),
                _ if self.eat("(") => {
                    let mut args = Vec::new();
                    if !self.eat(")") {
                        loop {
                            args.push(self.conditional()?);
                            if self.eat(")") {
                                break;
                            }
                            self.expect(",")?;
                        }
                    }
                    Ok(Node::Call(name, args))
                }
                _ => Ok(Node::Ident(name)),
            },
            other => Err(ExprError::UnexpectedToken(other.to_string())),
        }
    }
}

/// Runtime value during evaluation. Numbers stay `f64` so `NaN` and
/// infinities survive until the final conversion.
#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Undefined,
    Number(f64),
    Json(Value),
}

impl Operand {
    fn from_value(value: &Value) -> Self {
        match value {
            Value::Number(number) => Operand::Number(number.as_f64().unwrap_or(f64::NAN)),
            other => Operand::Json(other.clone()),
        }
    }

    fn as_json(&self) -> Option<Value> {
        match self {
            Operand::Undefined => None,
            Operand::Number(n) => Some(coerce::number_value(*n)),
            Operand::Json(value) => Some(value.clone()),
        }
    }

    fn number(&self) -> f64 {
        match self {
            Operand::Undefined => f64::NAN,
            Operand::Number(n) => *n,
            Operand::Json(value) => coerce::to_number(Some(value)),
        }
    }

    fn truthy(&self) -> bool {
        match self {
            Operand::Undefined => false,
            Operand::Number(n) => *n != 0.0 && !n.is_nan(),
            Operand::Json(value) => coerce::truthy(Some(value)),
        }
    }

    fn text(&self) -> String {
        match self {
            Operand::Undefined => "undefined".to_string(),
            Operand::Number(n) => coerce::format_number(*n),
            Operand::Json(value) => coerce::to_js_string(Some(value)),
        }
    }

    fn is_textual(&self) -> bool {
        matches!(
            self,
            Operand::Json(Value::String(_) | Value::Array(_) | Value::Object(_))
        )
    }

    fn strict_eq(&self, other: &Operand) -> bool {
        match (self, other) {
            (Operand::Undefined, Operand::Undefined) => true,
            (Operand::Number(a), Operand::Number(b)) => a == b,
            (Operand::Json(a), Operand::Json(b)) => coerce::strict_equals(Some(a), Some(b)),
            _ => false,
        }
    }

    fn into_value(self) -> Result<Value, ExprError> {
        match self {
            Operand::Undefined => Ok(Value::Null),
            Operand::Number(n) if !n.is_finite() => Err(ExprError::NonFinite),
            Operand::Number(n) => Ok(coerce::number_value(n)),
            Operand::Json(value) => Ok(value),
        }
    }
}

fn eval(node: &Node, bindings: &Map<String, Value>) -> Result<Operand, ExprError> {
    match node {
        Node::Literal(value) => Ok(Operand::from_value(value)),
        Node::Undefined => Ok(Operand::Undefined),
        Node::Ident(name) => bindings
            .get(name)
            .map(Operand::from_value)
            .ok_or_else(|| ExprError::UnknownIdentifier(name.clone())),
        Node::Member(object, property) => {
            let object = eval(object, bindings)?;
            let property = eval(property, bindings)?;
            member(&object, &property.text())
        }
        Node::Negate(inner) => Ok(Operand::Number(-eval(inner, bindings)?.number())),
        Node::Not(inner) => Ok(Operand::Json(Value::Bool(!eval(inner, bindings)?.truthy()))),
        Node::Binary(BinaryOp::And, left, right) => {
            let left = eval(left, bindings)?;
            if left.truthy() {
                eval(right, bindings)
            } else {
                Ok(left)
            }
        }
        Node::Binary(BinaryOp::Or, left, right) => {
            let left = eval(left, bindings)?;
            if left.truthy() {
                Ok(left)
            } else {
                eval(right, bindings)
            }
        }
        Node::Binary(operator, left, right) => {
            let left = eval(left, bindings)?;
            let right = eval(right, bindings)?;
            Ok(binary(*operator, &left, &right))
        }
        Node::Conditional(test, consequent, alternate) => {
            if eval(test, bindings)?.truthy() {
                eval(consequent, bindings)
            } else {
                eval(alternate, bindings)
            }
        }
        Node::Call(name, args) => {
            let args = args
                .iter()
                .map(|arg| eval(arg, bindings))
                .collect::<Result<Vec<_>, _>>()?;
            call(name, &args)
        }
    }
}

fn member(object: &Operand, key: &str) -> Result<Operand, ExprError> {
    match object {
        Operand::Undefined | Operand::Json(Value::Null) => {
            Err(ExprError::NullAccess(key.to_string()))
        }
        Operand::Json(Value::Object(map)) => {
            Ok(map.get(key).map(Operand::from_value).unwrap_or(Operand::Undefined))
        }
        Operand::Json(Value::Array(items)) => Ok(if key == "length" {
            Operand::Number(items.len() as f64)
        } else {
            key.parse::<usize>()
                .ok()
                .and_then(|index| items.get(index))
                .map(Operand::from_value)
                .unwrap_or(Operand::Undefined)
        }),
        Operand::Json(Value::String(text)) => Ok(if key == "length" {
            Operand::Number(text.chars().count() as f64)
        } else {
            key.parse::<usize>()
                .ok()
                .and_then(|index| text.chars().nth(index))
                .map(|ch| Operand::Json(Value::String(ch.to_string())))
                .unwrap_or(Operand::Undefined)
        }),
        _ => Ok(Operand::Undefined),
    }
}

fn binary(operator: BinaryOp, left: &Operand, right: &Operand) -> Operand {
    let both_strings = matches!(
        (left, right),
        (Operand::Json(Value::String(_)), Operand::Json(Value::String(_)))
    );
    let compare = |ordering: fn(std::cmp::Ordering) -> bool| -> Operand {
        let result = if both_strings {
            ordering(left.text().cmp(&right.text()))
        } else {
            left.number()
                .partial_cmp(&right.number())
                .is_some_and(ordering)
        };
        Operand::Json(Value::Bool(result))
    };

    match operator {
        BinaryOp::Add if left.is_textual() || right.is_textual() => {
            Operand::Json(Value::String(format!("{}{}", left.text(), right.text())))
        }
        BinaryOp::Add => Operand::Number(left.number() + right.number()),
        BinaryOp::Sub => Operand::Number(left.number() - right.number()),
        BinaryOp::Mul => Operand::Number(left.number() * right.number()),
        BinaryOp::Div => Operand::Number(left.number() / right.number()),
        BinaryOp::Rem => Operand::Number(left.number() % right.number()),
        BinaryOp::Lt => compare(|ordering| ordering.is_lt()),
        BinaryOp::Le => compare(|ordering| ordering.is_le()),
        BinaryOp::Gt => compare(|ordering| ordering.is_gt()),
        BinaryOp::Ge => compare(|ordering| ordering.is_ge()),
        BinaryOp::Eq => Operand::Json(Value::Bool(left.strict_eq(right))),
        BinaryOp::Ne => Operand::Json(Value::Bool(!left.strict_eq(right))),
        BinaryOp::And if left.truthy() => right.clone(),
        BinaryOp::Or if !left.truthy() => right.clone(),
        BinaryOp::And | BinaryOp::Or => left.clone(),
    }
}

fn arity(name: &str, args: &[Operand], expected: &'static str, ok: bool) -> Result<(), ExprError> {
    if ok {
        Ok(())
    } else {
        Err(ExprError::Arity {
            name: name.to_string(),
            expected,
            found: args.len(),
        })
    }
}

fn js_round(n: f64) -> f64 {
    (n + 0.5).floor()
}

fn call(name: &str, args: &[Operand]) -> Result<Operand, ExprError> {
    let text = |value: &Operand| Operand::Json(Value::String(value.text()));
    match name {
        "abs" | "floor" | "ceil" | "number" => {
            arity(name, args, "1", args.len() == 1)?;
            let n = args[0].number();
            Ok(Operand::Number(match name {
                "abs" => n.abs(),
                "floor" => n.floor(),
                "ceil" => n.ceil(),
                _ => n,
            }))
        }
        "round" => {
            arity(name, args, "1 or 2", matches!(args.len(), 1 | 2))?;
            let digits = args.get(1).map(Operand::number).unwrap_or(0.0);
            let factor = 10f64.powi(digits as i32);
            Ok(Operand::Number(js_round(args[0].number() * factor) / factor))
        }
        "fixed" => {
            arity(name, args, "1 or 2", matches!(args.len(), 1 | 2))?;
            let digits = args.get(1).map(Operand::number).unwrap_or(0.0);
            let fixed = to_fixed(args[0].number(), digits)?;
            Ok(Operand::Json(Value::String(fixed)))
        }
        "min" | "max" => {
            arity(name, args, "at least 1", !args.is_empty())?;
            let numbers = args.iter().map(Operand::number);
            let (start, pick): (f64, fn(f64, f64) -> f64) = if name == "min" {
                (f64::INFINITY, f64::min)
            } else {
                (f64::NEG_INFINITY, f64::max)
            };
            let result = numbers.fold(start, |acc, n| {
                if acc.is_nan() || n.is_nan() {
                    f64::NAN
                } else {
                    pick(acc, n)
                }
            });
            Ok(Operand::Number(result))
        }
        "string" => {
            arity(name, args, "1", args.len() == 1)?;
            Ok(text(&args[0]))
        }
        "upper" | "lower" | "trim" | "digits" => {
            arity(name, args, "1", args.len() == 1)?;
            let value = args[0].text();
            let result = match name {
                "upper" => value.to_uppercase(),
                "lower" => value.to_lowercase(),
                "trim" => value.trim().to_string(),
                _ => value.chars().filter(char::is_ascii_digit).collect(),
            };
            Ok(Operand::Json(Value::String(result)))
        }
        "len" | "length" => {
            arity(name, args, "1", args.len() == 1)?;
            let length = match &args[0] {
                Operand::Json(Value::Array(items)) => items.len(),
                Operand::Json(Value::Object(map)) => map.len(),
                Operand::Json(Value::Null) | Operand::Undefined => 0,
                other => other.text().chars().count(),
            };
            Ok(Operand::Number(length as f64))
        }
        "contains" => {
            arity(name, args, "2", args.len() == 2)?;
            let needle = args[1].as_json().unwrap_or(Value::Null);
            let found = crate::rules::evaluate(
                &crate::rules::Operator::Contains,
                args[0].as_json().as_ref(),
                &needle,
            );
            Ok(Operand::Json(Value::Bool(found)))
        }
        "replace" => {
            arity(name, args, "3", args.len() == 3)?;
            let replaced = args[0].text().replace(&args[1].text(), &args[2].text());
            Ok(Operand::Json(Value::String(replaced)))
        }
        "substring" => {
            arity(name, args, "2 or 3", matches!(args.len(), 2 | 3))?;
            let chars: Vec<char> = args[0].text().chars().collect();
            let clamp = |n: f64| -> usize {
                if n.is_nan() { 0 } else { n.max(0.0).min(chars.len() as f64) as usize }
            };
            let start = clamp(args[1].number());
            let end = args.get(2).map(|end| clamp(end.number())).unwrap_or(chars.len());
            let (start, end) = if start <= end { (start, end) } else { (end, start) };
            Ok(Operand::Json(Value::String(chars[start..end].iter().collect())))
        }
        "concat" => Ok(Operand::Json(Value::String(
            args.iter().map(Operand::text).collect(),
        ))),
        "matches" => {
            arity(name, args, "2", args.len() == 2)?;
            let regex =
                Regex::new(&args[1].text()).map_err(|error| ExprError::Regex(error.to_string()))?;
            Ok(Operand::Json(Value::Bool(regex.is_match(&args[0].text()))))
        }
        other => Err(ExprError::UnknownFunction(other.to_string())),
    }
}

/// Fixed-point formatting; `NaN` and infinities keep their names. Digits are
/// truncated to an integer and must lie in `0..=MAX_FIXED_DIGITS`.
pub(crate) fn to_fixed(n: f64, digits: f64) -> Result<String, ExprError> {
    let digits = if digits.is_nan() { 0.0 } else { digits.trunc() };
    if !(0.0..=MAX_FIXED_DIGITS as f64).contains(&digits) {
        return Err(ExprError::Precision(digits));
    }
    if !n.is_finite() {
        return Ok(coerce::format_number(n));
    }
    let digits = digits as usize;
    Ok(format!("{n:.digits$}"))
}
