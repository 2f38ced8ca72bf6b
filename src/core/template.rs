//! # Templates
//!
//! Parses and renders the `{{ ... }}` markup used in task descriptions, file
//! contents and configuration values.
//!
//! Supported directives: `{{expr}}`, `{{if expr}}` / `{{elif expr}}` /
//! `{{else}}` / `{{endif}}`, `{{for x in expr}}` / `{{for k, v in expr}}` /
//! `{{endfor}}` and `{{# comment}}`. A trailing `:` after a directive is
//! accepted. A directive that sits alone on its line consumes the whole line.

use crate::core::expr::{self, Expr, Scope};
use crate::core::value::Value;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

lazy_static! {
    static ref TAG_RE: Regex = Regex::new(r"(?s)\{\{(.*?)\}\}").unwrap();
    static ref FOR_RE: Regex =
        Regex::new(r"^for\s+([A-Za-z_]\w*(?:\s*,\s*[A-Za-z_]\w*)*)\s+in\s+(.+)$").unwrap();
}

/// Errors raised while parsing or rendering a template.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TemplateError {
    /// The markup itself is malformed.
    #[error("{template}:{line}: {message}")]
    Syntax {
        template: String,
        line: usize,
        message: String,
    },
    /// A variable or function does not exist in the namespace.
    #[error("name '{0}' is not defined")]
    Undefined(String),
    /// An expression failed while being evaluated.
    #[error("{0}")]
    Eval(String),
    /// A value refers back to itself through interpolation.
    #[error("Interpolation cycle detected: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
    /// Nested interpolation went deeper than the configured limit.
    #[error("Maximum interpolation depth ({0}) exceeded. Check for indirect cycles.")]
    DepthExceeded(usize),
    /// An error raised while rendering a named template. The location is
    /// shown in front of the cause, which is not reported separately.
    #[error("{template}, line {line}: {cause}")]
    InTemplate {
        template: String,
        line: usize,
        cause: Box<TemplateError>,
    },
}

impl TemplateError {
    /// The innermost error, with template locations peeled off.
    pub fn root(&self) -> &Self {
        match self {
            Self::InTemplate { cause, .. } => cause.root(),
            other => other,
        }
    }
}

// --- AST ---

#[derive(Debug, Clone)]
enum Node {
    Text(String),
    Expr {
        expr: Expr,
        line: usize,
    },
    If {
        branches: Vec<(Expr, Vec<Node>)>,
        otherwise: Vec<Node>,
        line: usize,
    },
    For {
        vars: Vec<String>,
        iter: Expr,
        body: Vec<Node>,
        line: usize,
    },
}

/// A parsed template, ready to be rendered any number of times.
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    nodes: Vec<Node>,
}

// --- Lexing ---

#[derive(Debug)]
enum Chunk {
    Text(String),
    Tag { content: String, line: usize },
}

fn is_directive(content: &str) -> bool {
    let word = content
        .split(|c: char| c.is_whitespace() || c == ':')
        .next()
        .unwrap_or_default();
    content.starts_with('#')
        || matches!(word, "if" | "elif" | "else" | "endif" | "for" | "endfor")
}

fn line_of(source: &str, offset: usize) -> usize {
    source.get(..offset).map_or(0, |s| s.matches('\n').count()) + 1
}

fn lex(source: &str) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut last = 0;
    for capture in TAG_RE.captures_iter(source) {
        let (Some(whole), Some(inner)) = (capture.get(0), capture.get(1)) else {
            continue;
        };
        if whole.start() > last {
            chunks.push(Chunk::Text(
                source.get(last..whole.start()).unwrap_or_default().to_string(),
            ));
        }
        chunks.push(Chunk::Tag {
            content: inner.as_str().trim().to_string(),
            line: line_of(source, whole.start()),
        });
        last = whole.end();
    }
    if last < source.len() {
        chunks.push(Chunk::Text(source.get(last..).unwrap_or_default().to_string()));
    }
    trim_directive_lines(&mut chunks);
    chunks
}

/// Directives alone on their line swallow the surrounding indentation and the newline.
fn trim_directive_lines(chunks: &mut [Chunk]) {
    // Decided on the untrimmed text: trimming one directive's line must not
    // hide that the next directive also starts a line.
    let standalone: Vec<bool> = (0..chunks.len())
        .map(|i| {
            let directive =
                matches!(chunks.get(i), Some(Chunk::Tag { content, .. }) if is_directive(content));
            let starts_line = match i.checked_sub(1).and_then(|p| chunks.get(p)) {
                None => true,
                Some(Chunk::Text(text)) => {
                    let tail = text.rsplit('\n').next().unwrap_or_default();
                    tail.trim().is_empty() && (text.contains('\n') || i == 1)
                }
                Some(Chunk::Tag { .. }) => false,
            };
            let ends_line = match chunks.get(i + 1) {
                None => true,
                Some(Chunk::Text(text)) => {
                    let head = text.split('\n').next().unwrap_or_default();
                    head.trim().is_empty()
                }
                Some(Chunk::Tag { .. }) => false,
            };
            directive && starts_line && ends_line
        })
        .collect();

    for (i, _) in standalone.iter().enumerate().filter(|(_, alone)| **alone) {
        if let Some(Chunk::Text(text)) = i.checked_sub(1).and_then(|p| chunks.get_mut(p)) {
            let keep = text.rfind('\n').map_or(0, |pos| pos + 1);
            text.truncate(keep);
        }
        if let Some(Chunk::Text(text)) = chunks.get_mut(i + 1) {
            *text = match text.find('\n') {
                Some(pos) => text.get(pos + 1..).unwrap_or_default().to_string(),
                None => String::new(),
            };
        }
    }
}

// --- Parsing ---

struct Builder<'a> {
    name: &'a str,
    chunks: std::vec::IntoIter<Chunk>,
}

enum Terminator {
    End,
    Elif(Expr, usize),
    Else(usize),
    EndIf(usize),
    EndFor(usize),
}

impl Builder<'_> {
    fn error(&self, line: usize, message: impl Into<String>) -> TemplateError {
        TemplateError::Syntax {
            template: self.name.to_string(),
            line,
            message: message.into(),
        }
    }

    fn expr(&self, source: &str, line: usize) -> Result<Expr, TemplateError> {
        expr::parse(source.trim().trim_end_matches(':'))
            .map_err(|e| self.error(line, format!("{e} in '{source}'")))
    }

    fn block(&mut self) -> Result<(Vec<Node>, Terminator), TemplateError> {
        let mut nodes = Vec::new();
        while let Some(chunk) = self.chunks.next() {
            let (content, line) = match chunk {
                Chunk::Text(text) => {
                    if !text.is_empty() {
                        nodes.push(Node::Text(text));
                    }
                    continue;
                }
                Chunk::Tag { content, line } => (content, line),
            };
            let head = content.trim_end_matches(':').trim();

            if head.starts_with('#') {
                continue;
            } else if let Some(cond) = head.strip_prefix("if ") {
                let first = self.expr(cond, line)?;
                nodes.push(self.if_block(first, line)?);
            } else if let Some(cond) = head.strip_prefix("elif ") {
                return Ok((nodes, Terminator::Elif(self.expr(cond, line)?, line)));
            } else if head == "else" {
                return Ok((nodes, Terminator::Else(line)));
            } else if head == "endif" {
                return Ok((nodes, Terminator::EndIf(line)));
            } else if head == "endfor" {
                return Ok((nodes, Terminator::EndFor(line)));
            } else if head.starts_with("for ") {
                let captures = FOR_RE
                    .captures(head)
                    .ok_or_else(|| self.error(line, format!("malformed loop: {{{{{content}}}}}")))?;
                let vars = captures
                    .get(1)
                    .map(|m| m.as_str().split(',').map(|v| v.trim().to_string()).collect())
                    .unwrap_or_default();
                let iter = self.expr(captures.get(2).map_or("", |m| m.as_str()), line)?;
                let (body, end) = self.block()?;
                if !matches!(end, Terminator::EndFor(_)) {
                    return Err(self.error(line, "{{for}} without matching {{endfor}}"));
                }
                nodes.push(Node::For {
                    vars,
                    iter,
                    body,
                    line,
                });
            } else {
                nodes.push(Node::Expr {
                    expr: self.expr(&content, line)?,
                    line,
                });
            }
        }
        Ok((nodes, Terminator::End))
    }

    fn if_block(&mut self, first: Expr, line: usize) -> Result<Node, TemplateError> {
        let mut branches = Vec::new();
        let mut condition = first;
        loop {
            let (body, end) = self.block()?;
            branches.push((condition, body));
            match end {
                Terminator::Elif(next, _) => condition = next,
                Terminator::Else(else_line) => {
                    let (otherwise, end) = self.block()?;
                    if !matches!(end, Terminator::EndIf(_)) {
                        return Err(self.error(else_line, "{{else}} without matching {{endif}}"));
                    }
                    return Ok(Node::If {
                        branches,
                        otherwise,
                        line,
                    });
                }
                Terminator::EndIf(_) => {
                    return Ok(Node::If {
                        branches,
                        otherwise: Vec::new(),
                        line,
                    });
                }
                Terminator::EndFor(l) => return Err(self.error(l, "unexpected {{endfor}}")),
                Terminator::End => return Err(self.error(line, "{{if}} without matching {{endif}}")),
            }
        }
    }
}

// --- Rendering ---

/// A scope layering loop variables over a parent scope.
struct Locals<'a> {
    parent: &'a dyn Scope,
    vars: BTreeMap<String, Value>,
}

impl Scope for Locals<'_> {
    fn lookup(&self, name: &str) -> Result<Value, TemplateError> {
        match self.vars.get(name) {
            Some(value) => Ok(value.clone()),
            None => self.parent.lookup(name),
        }
    }

    fn section_option(&self, section: &str, option: &str) -> Result<Value, TemplateError> {
        self.parent.section_option(section, option)
    }

    fn expand(&self, raw: &str) -> Result<String, TemplateError> {
        self.parent.expand(raw)
    }

    fn base_path(&self) -> Option<&Path> {
        self.parent.base_path()
    }
}

impl Template {
    /// Parses `source`; `name` is used in error messages.
    pub fn parse(source: &str, name: &str) -> Result<Self, TemplateError> {
        let mut builder = Builder {
            name,
            chunks: lex(source).into_iter(),
        };
        let (nodes, end) = builder.block()?;
        match end {
            Terminator::End => Ok(Self {
                name: name.to_string(),
                nodes,
            }),
            Terminator::Elif(_, line) | Terminator::Else(line) | Terminator::EndIf(line) => {
                Err(builder.error(line, "conditional directive outside of {{if}}"))
            }
            Terminator::EndFor(line) => Err(builder.error(line, "{{endfor}} outside of {{for}}")),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renders the template against `scope`.
    pub fn render(&self, scope: &dyn Scope) -> Result<String, TemplateError> {
        let mut out = String::new();
        self.render_nodes(&self.nodes, scope, &mut out)?;
        Ok(out)
    }

    fn locate(&self, line: usize, source: TemplateError) -> TemplateError {
        match source {
            // Syntax errors, cycles and depth errors already say where they are.
            e @ (TemplateError::Syntax { .. }
            | TemplateError::Cycle(_)
            | TemplateError::DepthExceeded(_)
            | TemplateError::InTemplate { .. }) => e,
            other => TemplateError::InTemplate {
                template: self.name.clone(),
                line,
                cause: Box::new(other),
            },
        }
    }

    fn render_nodes(
        &self,
        nodes: &[Node],
        scope: &dyn Scope,
        out: &mut String,
    ) -> Result<(), TemplateError> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Expr { expr, line } => {
                    let value = expr::eval(expr, scope).map_err(|e| self.locate(*line, e))?;
                    out.push_str(&value.to_string());
                }
                Node::If {
                    branches,
                    otherwise,
                    line,
                } => {
                    let mut chosen = otherwise;
                    for (condition, body) in branches {
                        let value =
                            expr::eval(condition, scope).map_err(|e| self.locate(*line, e))?;
                        if value.is_truthy() {
                            chosen = body;
                            break;
                        }
                    }
                    self.render_nodes(chosen, scope, out)?;
                }
                Node::For {
                    vars,
                    iter,
                    body,
                    line,
                } => {
                    let sequence = expr::eval(iter, scope).map_err(|e| self.locate(*line, e))?;
                    for item in sequence.to_items() {
                        let mut locals = Locals {
                            parent: scope,
                            vars: BTreeMap::new(),
                        };
                        bind_loop_vars(vars, item, &mut locals.vars)
                            .map_err(|e| self.locate(*line, e))?;
                        self.render_nodes(body, &locals, out)?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn bind_loop_vars(
    names: &[String],
    item: Value,
    vars: &mut BTreeMap<String, Value>,
) -> Result<(), TemplateError> {
    match names {
        [single] => {
            vars.insert(single.clone(), item);
            Ok(())
        }
        many => {
            let Value::List(parts) = item else {
                return Err(TemplateError::Eval(format!(
                    "cannot unpack '{}' into {} loop variables",
                    item.type_name(),
                    many.len()
                )));
            };
            if parts.len() != many.len() {
                return Err(TemplateError::Eval(format!(
                    "expected {} values to unpack, got {}",
                    many.len(),
                    parts.len()
                )));
            }
            for (name, value) in many.iter().zip(parts) {
                vars.insert(name.clone(), value);
            }
            Ok(())
        }
    }
}

/// Parses and renders in one go.
pub fn render_str(source: &str, name: &str, scope: &dyn Scope) -> Result<String, TemplateError> {
    // Plain text needs no parse.
    if !source.contains("{{") {
        return Ok(source.to_string());
    }
    Template::parse(source, name)?.render(scope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expr::MapScope;

    fn render(source: &str, vars: &[(&str, Value)]) -> String {
        let map: BTreeMap<String, Value> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();
        render_str(source, "test", &MapScope::new(&map)).unwrap()
    }

    #[test]
    fn test_plain_text_is_returned_verbatim() {
        assert_eq!(render("no markup here\n", &[]), "no markup here\n");
    }

    #[test]
    fn test_substitution_matches_display() {
        assert_eq!(render("{{x}}", &[("x", Value::Int(42))]), "42");
        assert_eq!(render("Hi {{ name }}!", &[("name", "Bob".into())]), "Hi Bob!");
    }

    #[test]
    fn test_conditionals_with_elif_else() {
        let tmpl = "{{if n == 1}}one{{elif n == 2:}}two{{else}}many{{endif}}";
        assert_eq!(render(tmpl, &[("n", Value::Int(1))]), "one");
        assert_eq!(render(tmpl, &[("n", Value::Int(2))]), "two");
        assert_eq!(render(tmpl, &[("n", Value::Int(7))]), "many");
    }

    #[test]
    fn test_directive_lines_are_removed() {
        let tmpl = "start\n  {{if show}}\n  shown\n  {{endif}}\nend\n";
        assert_eq!(render(tmpl, &[("show", Value::Bool(true))]), "start\n  shown\nend\n");
        assert_eq!(render(tmpl, &[("show", Value::Bool(false))]), "start\nend\n");
    }

    #[test]
    fn test_consecutive_directive_lines_are_removed() {
        let tmpl = "start\n{{if a}}\n{{if b}}\nboth\n{{endif}}\n{{endif}}\nend\n";
        let vars = [("a", Value::Bool(true)), ("b", Value::Bool(true))];
        assert_eq!(render(tmpl, &vars), "start\nboth\nend\n");
        let vars = [("a", Value::Bool(true)), ("b", Value::Bool(false))];
        assert_eq!(render(tmpl, &vars), "start\nend\n");
    }

    #[test]
    fn test_loops_including_unpacking() {
        let hosts = Value::List(vec!["a".into(), "b".into()]);
        assert_eq!(
            render("{{for h in hosts}}[{{h}}]{{endfor}}", &[("hosts", hosts)]),
            "[a][b]"
        );

        let mut map = BTreeMap::new();
        map.insert("k".to_string(), Value::from("v"));
        assert_eq!(
            render(
                "{{for key, val in m.items()}}{{key}}={{val}}{{endfor}}",
                &[("m", Value::Map(map))]
            ),
            "k=v"
        );
    }

    #[test]
    fn test_comments_render_nothing() {
        assert_eq!(render("a{{# ignored }}b", &[]), "ab");
    }

    #[test]
    fn test_unbalanced_blocks_are_syntax_errors() {
        assert!(matches!(
            Template::parse("{{if x}}open", "t"),
            Err(TemplateError::Syntax { .. })
        ));
        assert!(matches!(
            Template::parse("{{endfor}}", "t"),
            Err(TemplateError::Syntax { .. })
        ));
    }

    #[test]
    fn test_render_errors_carry_template_location() {
        let map = BTreeMap::new();
        let err = render_str("line one\n{{missing}}", "desc", &MapScope::new(&map)).unwrap_err();
        match &err {
            TemplateError::InTemplate { template, line, .. } => {
                assert_eq!(template, "desc");
                assert_eq!(*line, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(err.root(), TemplateError::Undefined(name) if name == "missing"));
    }
}
