//! # Expressions
//!
//! The small expression language used inside `{{ ... }}` markup: names,
//! attribute and index access, literals, boolean logic, comparisons,
//! concatenation, and a fixed set of builtin functions.

use crate::core::template::TemplateError;
use crate::core::value::{Value, asbool};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// What an expression is evaluated against.
pub trait Scope {
    /// Resolves a bare name.
    fn lookup(&self, name: &str) -> Result<Value, TemplateError>;

    /// Reads one option of a configuration section, already expanded.
    fn section_option(&self, section: &str, option: &str) -> Result<Value, TemplateError>;

    /// Expands a raw template string found inside a value.
    fn expand(&self, raw: &str) -> Result<String, TemplateError>;

    /// The directory relative paths are resolved against.
    fn base_path(&self) -> Option<&Path> {
        None
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    In,
    NotIn,
}

/// A parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Name(String),
    List(Vec<Expr>),
    Attr(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call {
        func: String,
        receiver: Option<Box<Expr>>,
        args: Vec<Expr>,
    },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, CmpOp, Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
}

// --- Lexer ---

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str(String),
    Int(i64),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Plus,
    EqEq,
    NotEq,
}

fn syntax(message: impl Into<String>) -> TemplateError {
    TemplateError::Eval(message.into())
}

fn lex(source: &str) -> Result<Vec<Tok>, TemplateError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while let Some(&c) = chars.get(i) {
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Tok::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Tok::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Tok::RBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Tok::Comma);
                i += 1;
            }
            '.' => {
                tokens.push(Tok::Dot);
                i += 1;
            }
            '+' => {
                tokens.push(Tok::Plus);
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Tok::EqEq);
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Tok::NotEq);
                i += 2;
            }
            '"' | '\'' => {
                let quote = c;
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(syntax("unterminated string literal")),
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            let escaped = match chars.get(i + 1) {
                                Some('n') => '\n',
                                Some('t') => '\t',
                                Some(&other) => other,
                                None => return Err(syntax("dangling escape in string literal")),
                            };
                            text.push(escaped);
                            i += 2;
                        }
                        Some(&ch) => {
                            text.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Tok::Str(text));
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) => {
                let start = i;
                i += 1;
                while chars.get(i).is_some_and(char::is_ascii_digit) {
                    i += 1;
                }
                let text: String = chars.get(start..i).unwrap_or_default().iter().collect();
                let number = text
                    .parse::<i64>()
                    .map_err(|_| syntax(format!("invalid integer literal: {text}")))?;
                tokens.push(Tok::Int(number));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while chars
                    .get(i)
                    .is_some_and(|ch| ch.is_alphanumeric() || *ch == '_')
                {
                    i += 1;
                }
                tokens.push(Tok::Ident(
                    chars.get(start..i).unwrap_or_default().iter().collect(),
                ));
            }
            other => return Err(syntax(format!("unexpected character '{other}' in expression"))),
        }
    }
    Ok(tokens)
}

// --- Parser ---

struct Parser {
    tokens: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Tok::Ident(word)) if word == keyword)
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expect(&mut self, expected: &Tok) -> Result<(), TemplateError> {
        match self.next() {
            Some(ref tok) if tok == expected => Ok(()),
            Some(tok) => Err(syntax(format!("expected {expected:?}, found {tok:?}"))),
            None => Err(syntax(format!("expected {expected:?}, found end of expression"))),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.parse_and()?;
        while self.peek_keyword("or") {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.parse_not()?;
        while self.peek_keyword("and") {
            self.pos += 1;
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, TemplateError> {
        if self.peek_keyword("not") {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Expr, TemplateError> {
        let left = self.parse_add()?;
        let op = match self.peek().cloned() {
            Some(Tok::EqEq) => CmpOp::Eq,
            Some(Tok::NotEq) => CmpOp::NotEq,
            Some(Tok::Ident(w)) if w == "in" => CmpOp::In,
            Some(Tok::Ident(w))
                if w == "not"
                    && matches!(self.tokens.get(self.pos + 1), Some(Tok::Ident(n)) if n == "in") =>
            {
                self.pos += 1;
                CmpOp::NotIn
            }
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.parse_add()?;
        Ok(Expr::Compare(Box::new(left), op, Box::new(right)))
    }

    fn parse_add(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.parse_postfix()?;
        while self.peek() == Some(&Tok::Plus) {
            self.pos += 1;
            let right = self.parse_postfix()?;
            left = Expr::Add(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, TemplateError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Tok::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.parse_or()?);
            match self.next() {
                Some(Tok::Comma) => continue,
                Some(Tok::RParen) => return Ok(args),
                _ => return Err(syntax("expected ',' or ')' in argument list")),
            }
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, TemplateError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Tok::Dot) => {
                    self.pos += 1;
                    let Some(Tok::Ident(name)) = self.next() else {
                        return Err(syntax("expected attribute name after '.'"));
                    };
                    if self.peek() == Some(&Tok::LParen) {
                        self.pos += 1;
                        let args = self.parse_args()?;
                        expr = Expr::Call {
                            func: name,
                            receiver: Some(Box::new(expr)),
                            args,
                        };
                    } else {
                        expr = Expr::Attr(Box::new(expr), name);
                    }
                }
                Some(Tok::LBracket) => {
                    self.pos += 1;
                    let index = self.parse_or()?;
                    self.expect(&Tok::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                Some(Tok::LParen) => {
                    let Expr::Name(func) = expr else {
                        return Err(syntax("only builtin functions can be called"));
                    };
                    self.pos += 1;
                    let args = self.parse_args()?;
                    expr = Expr::Call {
                        func,
                        receiver: None,
                        args,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, TemplateError> {
        match self.next() {
            Some(Tok::Str(s)) => Ok(Expr::Literal(Value::Str(s))),
            Some(Tok::Int(i)) => Ok(Expr::Literal(Value::Int(i))),
            Some(Tok::Ident(word)) => Ok(match word.as_str() {
                "True" | "true" => Expr::Literal(Value::Bool(true)),
                "False" | "false" => Expr::Literal(Value::Bool(false)),
                "None" => Expr::Literal(Value::None),
                _ => Expr::Name(word),
            }),
            Some(Tok::LParen) => {
                let inner = self.parse_or()?;
                self.expect(&Tok::RParen)?;
                Ok(inner)
            }
            Some(Tok::LBracket) => {
                let mut items = Vec::new();
                if self.peek() == Some(&Tok::RBracket) {
                    self.pos += 1;
                    return Ok(Expr::List(items));
                }
                loop {
                    items.push(self.parse_or()?);
                    match self.next() {
                        Some(Tok::Comma) => continue,
                        Some(Tok::RBracket) => return Ok(Expr::List(items)),
                        _ => return Err(syntax("expected ',' or ']' in list literal")),
                    }
                }
            }
            Some(tok) => Err(syntax(format!("unexpected token {tok:?}"))),
            None => Err(syntax("unexpected end of expression")),
        }
    }
}

/// Parses an expression.
pub fn parse(source: &str) -> Result<Expr, TemplateError> {
    let tokens = lex(source)?;
    if tokens.is_empty() {
        return Err(syntax("empty expression"));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if let Some(tok) = parser.peek() {
        return Err(syntax(format!("unexpected trailing token {tok:?}")));
    }
    Ok(expr)
}

// --- Evaluation ---

/// Expands lazy values so they can be inspected.
pub fn realize(value: Value, scope: &dyn Scope) -> Result<Value, TemplateError> {
    match value {
        Value::Template(raw) => Ok(Value::Str(scope.expand(&raw)?)),
        other => Ok(other),
    }
}

/// Evaluates an expression against `scope`.
pub fn eval(expr: &Expr, scope: &dyn Scope) -> Result<Value, TemplateError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Name(name) => realize(scope.lookup(name)?, scope),
        Expr::List(items) => Ok(Value::List(
            items
                .iter()
                .map(|item| eval(item, scope))
                .collect::<Result<_, _>>()?,
        )),
        Expr::Attr(target, name) => {
            let target = eval(target, scope)?;
            attribute(&target, name, scope)
        }
        Expr::Index(target, index) => {
            let target = eval(target, scope)?;
            let index = eval(index, scope)?;
            subscript(&target, &index, scope)
        }
        Expr::Call {
            func,
            receiver,
            args,
        } => {
            let mut values = Vec::with_capacity(args.len() + 1);
            if let Some(receiver) = receiver {
                values.push(eval(receiver, scope)?);
            }
            for arg in args {
                values.push(eval(arg, scope)?);
            }
            call_builtin(func, values, scope)
        }
        Expr::Not(inner) => Ok(Value::Bool(!eval(inner, scope)?.is_truthy())),
        Expr::And(left, right) => {
            let left = eval(left, scope)?;
            if left.is_truthy() { eval(right, scope) } else { Ok(left) }
        }
        Expr::Or(left, right) => {
            let left = eval(left, scope)?;
            if left.is_truthy() { Ok(left) } else { eval(right, scope) }
        }
        Expr::Compare(left, op, right) => {
            let left = eval(left, scope)?;
            let right = eval(right, scope)?;
            let result = match op {
                CmpOp::Eq => loosely_equal(&left, &right),
                CmpOp::NotEq => !loosely_equal(&left, &right),
                CmpOp::In => contains(&right, &left)?,
                CmpOp::NotIn => !contains(&right, &left)?,
            };
            Ok(Value::Bool(result))
        }
        Expr::Add(left, right) => {
            let left = eval(left, scope)?;
            let right = eval(right, scope)?;
            match (left, right) {
                (Value::Int(a), Value::Int(b)) => a
                    .checked_add(b)
                    .map(Value::Int)
                    .ok_or_else(|| syntax("integer overflow")),
                (Value::List(mut a), Value::List(b)) => {
                    a.extend(b);
                    Ok(Value::List(a))
                }
                (a, b) => Ok(Value::Str(format!("{a}{b}"))),
            }
        }
    }
}

fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Int(a), Value::Str(b)) | (Value::Str(b), Value::Int(a)) => {
            b.trim().parse::<i64>().is_ok_and(|b| b == *a)
        }
        (a, b) => a == b,
    }
}

fn contains(container: &Value, needle: &Value) -> Result<bool, TemplateError> {
    match container {
        Value::List(items) => Ok(items.iter().any(|item| loosely_equal(item, needle))),
        Value::Map(map) => Ok(map.contains_key(&needle.to_string())),
        Value::Str(haystack) => Ok(haystack.contains(&needle.to_string())),
        other => Err(syntax(format!(
            "argument of type '{}' is not a container",
            other.type_name()
        ))),
    }
}

fn attribute(target: &Value, name: &str, scope: &dyn Scope) -> Result<Value, TemplateError> {
    match target {
        Value::Map(map) => match map.get(name) {
            Some(value) => realize(value.clone(), scope),
            None => Err(TemplateError::Undefined(name.to_string())),
        },
        Value::Section(section) => scope.section_option(section, name),
        other => Err(syntax(format!(
            "'{}' value has no attribute '{name}'",
            other.type_name()
        ))),
    }
}

fn subscript(target: &Value, index: &Value, scope: &dyn Scope) -> Result<Value, TemplateError> {
    match (target, index) {
        (Value::List(items), Value::Int(i)) => {
            let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
            let position = if *i < 0 { len + i } else { *i };
            usize::try_from(position)
                .ok()
                .and_then(|p| items.get(p))
                .cloned()
                .ok_or_else(|| syntax(format!("list index {i} out of range")))
        }
        (Value::Map(_) | Value::Section(_), key) => attribute(target, &key.to_string(), scope),
        (target, index) => Err(syntax(format!(
            "cannot index '{}' with '{}'",
            target.type_name(),
            index.type_name()
        ))),
    }
}

// --- Builtins ---

fn text_arg(args: &[Value], position: usize, func: &str) -> Result<String, TemplateError> {
    args.get(position)
        .map(ToString::to_string)
        .ok_or_else(|| syntax(format!("{func}() is missing argument {}", position + 1)))
}

/// Removes the whitespace prefix common to all non-blank lines.
pub fn dedent(text: &str) -> String {
    let margin = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);
    let mut out: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            out.push("");
        } else {
            out.push(line.get(margin..).unwrap_or(line));
        }
    }
    let mut joined = out.join("\n");
    if text.ends_with('\n') {
        joined.push('\n');
    }
    joined
}

/// Prefixes every line of `text` with `prefix`.
pub fn indent(text: &str, prefix: &str) -> String {
    text.lines()
        .map(|line| format!("{prefix}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Underlines `text` with `ch` repeated to the same width.
pub fn underline(text: &str, ch: &str) -> String {
    format!("{text}\n{}", ch.repeat(text.chars().count()))
}

fn resolve_path(path: &str, scope: &dyn Scope) -> PathBuf {
    let expanded = shellexpand::tilde(path).into_owned();
    let candidate = PathBuf::from(expanded);
    match scope.base_path() {
        Some(base) if candidate.is_relative() => base.join(candidate),
        _ => candidate,
    }
}

fn call_builtin(func: &str, args: Vec<Value>, scope: &dyn Scope) -> Result<Value, TemplateError> {
    let args = args
        .into_iter()
        .map(|arg| realize(arg, scope))
        .collect::<Result<Vec<_>, _>>()?;
    let first = args.first().cloned().unwrap_or(Value::None);

    let value = match func {
        "asbool" => match &first {
            Value::Bool(b) => Value::Bool(*b),
            Value::Int(i) => Value::Bool(*i != 0),
            Value::None => Value::Bool(false),
            other => {
                let text = other.to_string();
                Value::Bool(
                    asbool(&text)
                        .ok_or_else(|| syntax(format!("cannot interpret {text:?} as a boolean")))?,
                )
            }
        },
        "str" => Value::Str(first.to_string()),
        "repr" => Value::Str(first.repr()),
        "int" => match &first {
            Value::Int(i) => Value::Int(*i),
            Value::Bool(b) => Value::Int(i64::from(*b)),
            other => {
                let text = other.to_string();
                Value::Int(
                    text.trim()
                        .parse()
                        .map_err(|_| syntax(format!("invalid literal for int(): {text:?}")))?,
                )
            }
        },
        "len" => {
            let len = match &first {
                Value::List(items) => items.len(),
                Value::Map(map) => map.len(),
                other => other.to_string().chars().count(),
            };
            Value::Int(i64::try_from(len).unwrap_or(i64::MAX))
        }
        "lower" => Value::Str(text_arg(&args, 0, func)?.to_lowercase()),
        "upper" => Value::Str(text_arg(&args, 0, func)?.to_uppercase()),
        "strip" => Value::Str(text_arg(&args, 0, func)?.trim().to_string()),
        "lines" => Value::List(first.to_items()),
        "split" => {
            let text = text_arg(&args, 0, func)?;
            let parts: Vec<Value> = match args.get(1) {
                Some(sep) => text.split(&sep.to_string()).map(Value::from).collect(),
                None => text.split_whitespace().map(Value::from).collect(),
            };
            Value::List(parts)
        }
        "replace" => Value::Str(
            text_arg(&args, 0, func)?
                .replace(&text_arg(&args, 1, func)?, &text_arg(&args, 2, func)?),
        ),
        "startswith" => Value::Bool(text_arg(&args, 0, func)?.starts_with(&text_arg(&args, 1, func)?)),
        "endswith" => Value::Bool(text_arg(&args, 0, func)?.ends_with(&text_arg(&args, 1, func)?)),
        "join" => {
            let separator = args.get(1).map(ToString::to_string).unwrap_or_default();
            let parts: Vec<String> = first.to_items().iter().map(ToString::to_string).collect();
            Value::Str(parts.join(&separator))
        }
        "indent" => {
            let prefix = args
                .get(1)
                .map(ToString::to_string)
                .unwrap_or_else(|| "  ".to_string());
            Value::Str(indent(&text_arg(&args, 0, func)?, &prefix))
        }
        "underline" => {
            let ch = args
                .get(1)
                .map(ToString::to_string)
                .unwrap_or_else(|| "=".to_string());
            Value::Str(underline(&text_arg(&args, 0, func)?, &ch))
        }
        "dedent" => Value::Str(dedent(&text_arg(&args, 0, func)?)),
        "default" => {
            if first.is_truthy() {
                first
            } else {
                args.get(1).cloned().unwrap_or(Value::None)
            }
        }
        "get" => {
            let key = text_arg(&args, 1, func)?;
            let fallback = args.get(2).cloned().unwrap_or(Value::None);
            match &first {
                Value::Map(map) => match map.get(&key) {
                    Some(v) => realize(v.clone(), scope)?,
                    None => fallback,
                },
                Value::Section(section) => match scope.section_option(section, &key) {
                    Ok(v) => v,
                    Err(TemplateError::Undefined(_)) => fallback,
                    Err(e) => return Err(e),
                },
                _ => fallback,
            }
        }
        "items" => match &first {
            Value::Map(map) => Value::List(
                map.iter()
                    .map(|(k, v)| Value::List(vec![Value::Str(k.clone()), v.clone()]))
                    .collect(),
            ),
            other => {
                return Err(syntax(format!(
                    "items() expects a map, got '{}'",
                    other.type_name()
                )));
            }
        },
        "keys" => match &first {
            Value::Map(map) => Value::List(map.keys().cloned().map(Value::Str).collect()),
            _ => Value::List(Vec::new()),
        },
        "basename" => {
            let text = text_arg(&args, 0, func)?;
            let trimmed = text.trim_end_matches('/');
            Value::Str(
                Path::new(trimmed)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            )
        }
        "dirname" => {
            let text = text_arg(&args, 0, func)?;
            Value::Str(
                Path::new(&text)
                    .parent()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            )
        }
        "path_join" => {
            let mut path = PathBuf::new();
            for arg in &args {
                path.push(arg.to_string());
            }
            Value::Str(path.display().to_string())
        }
        "abspath" => Value::Str(
            resolve_path(&text_arg(&args, 0, func)?, scope)
                .display()
                .to_string(),
        ),
        "exists" => Value::Bool(resolve_path(&text_arg(&args, 0, func)?, scope).exists()),
        other => return Err(TemplateError::Undefined(format!("{other}()"))),
    };
    Ok(value)
}

/// A scope over a plain map of variables, with no configuration sections.
#[derive(Debug)]
pub struct MapScope<'a> {
    vars: &'a BTreeMap<String, Value>,
    base_path: Option<&'a Path>,
}

impl<'a> MapScope<'a> {
    pub fn new(vars: &'a BTreeMap<String, Value>) -> Self {
        Self {
            vars,
            base_path: None,
        }
    }

    pub fn with_base_path(mut self, base_path: &'a Path) -> Self {
        self.base_path = Some(base_path);
        self
    }
}

impl Scope for MapScope<'_> {
    fn lookup(&self, name: &str) -> Result<Value, TemplateError> {
        self.vars
            .get(name)
            .cloned()
            .ok_or_else(|| TemplateError::Undefined(name.to_string()))
    }

    fn section_option(&self, section: &str, option: &str) -> Result<Value, TemplateError> {
        Err(TemplateError::Undefined(format!("{section}.{option}")))
    }

    fn expand(&self, raw: &str) -> Result<String, TemplateError> {
        crate::core::template::Template::parse(raw, "<value>")?.render(self)
    }

    fn base_path(&self) -> Option<&Path> {
        self.base_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_str(source: &str, vars: &BTreeMap<String, Value>) -> Value {
        eval(&parse(source).unwrap(), &MapScope::new(vars)).unwrap()
    }

    fn vars() -> BTreeMap<String, Value> {
        let mut inner = BTreeMap::new();
        inner.insert("port".to_string(), Value::from("8080"));
        let mut vars = BTreeMap::new();
        vars.insert("name".to_string(), Value::from("Bob"));
        vars.insert("flag".to_string(), Value::from("yes"));
        vars.insert("site".to_string(), Value::Map(inner));
        vars.insert(
            "hosts".to_string(),
            Value::List(vec!["a".into(), "b".into()]),
        );
        vars
    }

    #[test]
    fn test_boolean_logic_and_comparison() {
        let v = vars();
        assert_eq!(eval_str("name == 'Bob'", &v), Value::Bool(true));
        assert_eq!(eval_str("not asbool(flag)", &v), Value::Bool(false));
        assert_eq!(eval_str("'a' in hosts and 'c' not in hosts", &v), Value::Bool(true));
        assert_eq!(eval_str("None or 'fallback'", &v), Value::from("fallback"));
        assert_eq!(eval_str("site.port == 8080", &v), Value::Bool(true));
    }

    #[test]
    fn test_attribute_index_and_methods() {
        let v = vars();
        assert_eq!(eval_str("site['port']", &v), Value::from("8080"));
        assert_eq!(eval_str("hosts[-1]", &v), Value::from("b"));
        assert_eq!(eval_str("name.upper()", &v), Value::from("BOB"));
        assert_eq!(eval_str("join(hosts, ',')", &v), Value::from("a,b"));
        assert_eq!(eval_str("len(hosts) + 1", &v), Value::Int(3));
        assert_eq!(eval_str("'x' + name", &v), Value::from("xBob"));
        assert_eq!(eval_str("basename('/srv/app/')", &v), Value::from("app"));
    }

    #[test]
    fn test_text_helpers() {
        assert_eq!(underline("Title", "-"), "Title\n-----");
        assert_eq!(indent("a\nb", "> "), "> a\n> b");
        assert_eq!(dedent("    a\n      b\n"), "a\n  b\n");
    }

    #[test]
    fn test_undefined_name_is_reported() {
        let v = vars();
        let err = eval(&parse("missing").unwrap(), &MapScope::new(&v)).unwrap_err();
        assert!(matches!(err, TemplateError::Undefined(name) if name == "missing"));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(parse("").is_err());
        assert!(parse("a +").is_err());
        assert!(parse("'unterminated").is_err());
        assert!(parse("a b").is_err());
    }
}
