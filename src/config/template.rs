//! `${...}` template expansion over the merged config tree.
//!
//! Any string leaf may embed expressions that read other params:
//!
//! ```text
//! "https": { "port": "${http.port + 22}" }          → 43733 (number)
//! "publicFolder": "${staticsRoot}/../public"         → "/app/public"
//! "banner": "v${symlinks[0].dest}-${'x'}"            → string
//! ```
//!
//! Grammar:
//!
//! ```text
//! expr    := operand (('+' | '-') operand)*
//! operand := number | quoted-string | path | '(' expr ')'
//! path    := ident ('.' ident | '[' int ']' | '[' quoted ']')*
//! ```
//!
//! `+` adds two numbers and concatenates anything else; `-` only subtracts
//! numbers. A string that is exactly one template takes the type of its
//! result. A reference to a value that itself still holds a template is
//! pending until that value resolves, so each pass settles at least one more
//! hop of a chain. Expansion runs for [`TEMPLATE_PASSES`] passes; whatever is
//! still unresolved after that is left verbatim.

use super::derive::clean_path;
use super::merge::coerce_literal;
use super::schema::ValueKind;
use serde_json::{Number, Value};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Number of expansion passes over the tree.
pub const TEMPLATE_PASSES: usize = 3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("parse error at {pos}: {message}")]
    Parse { pos: usize, message: String },
    #[error("undefined reference: {0}")]
    Undefined(String),
    #[error("reference to unresolved template: {0}")]
    Pending(String),
    #[error("cannot apply '{op}' to {lhs} and {rhs}")]
    Operands {
        op: char,
        lhs: ValueKind,
        rhs: ValueKind,
    },
}

/// One step of a reference path.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(Number),
    Str(String),
    Ref(Vec<Segment>),
    Binary {
        op: char,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    pub fn parse(input: &str) -> Result<Self, ExprError> {
        let mut parser = Parser {
            chars: input.chars().collect(),
            pos: 0,
        };
        let expr = parser.expr()?;
        parser.skip_ws();
        if parser.pos < parser.chars.len() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(expr)
    }

    pub fn eval(&self, root: &Value) -> Result<Value, ExprError> {
        match self {
            Expr::Number(n) => Ok(Value::Number(n.clone())),
            Expr::Str(s) => Ok(Value::String(s.clone())),
            Expr::Ref(segments) => match lookup(root, segments) {
                Some(Value::String(s)) if s.contains("${") => {
                    Err(ExprError::Pending(display_path(segments)))
                }
                Some(value) => Ok(value.clone()),
                None => Err(ExprError::Undefined(display_path(segments))),
            },
            Expr::Binary { op, lhs, rhs } => {
                let lhs = lhs.eval(root)?;
                let rhs = rhs.eval(root)?;
                apply(*op, &lhs, &rhs)
            }
        }
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn error(&self, message: &str) -> ExprError {
        ExprError::Parse {
            pos: self.pos,
            message: message.to_string(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expr(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.operand()?;
        loop {
            self.skip_ws();
            let op = match self.peek() {
                Some(c @ ('+' | '-')) => c,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.operand()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn operand(&mut self) -> Result<Expr, ExprError> {
        self.skip_ws();
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let inner = self.expr()?;
                self.skip_ws();
                if self.peek() != Some(')') {
                    return Err(self.error("expected ')'"));
                }
                self.pos += 1;
                Ok(inner)
            }
            Some(q @ ('\'' | '"')) => Ok(Expr::Str(self.quoted(q)?)),
            Some(c) if c.is_ascii_digit() => self.number(),
            Some(c) if is_ident_start(c) => self.path(),
            Some(_) => Err(self.error("expected a value")),
            None => Err(self.error("unexpected end of expression")),
        }
    }

    fn quoted(&mut self, quote: char) -> Result<String, ExprError> {
        self.pos += 1;
        let mut out = String::new();
        while let Some(c) = self.peek() {
            self.pos += 1;
            match c {
                '\\' => {
                    if let Some(escaped) = self.peek() {
                        out.push(escaped);
                        self.pos += 1;
                    }
                }
                c if c == quote => return Ok(out),
                c => out.push(c),
            }
        }
        Err(self.error("unterminated string"))
    }

    fn number(&mut self) -> Result<Expr, ExprError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '.') {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        if let Ok(i) = text.parse::<i64>() {
            return Ok(Expr::Number(Number::from(i)));
        }
        text.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Expr::Number)
            .ok_or_else(|| self.error("invalid number"))
    }

    fn ident(&mut self) -> Result<String, ExprError> {
        let start = self.pos;
        match self.peek() {
            Some(c) if is_ident_start(c) => self.pos += 1,
            _ => return Err(self.error("expected an identifier")),
        }
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '$')
        {
            self.pos += 1;
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn path(&mut self) -> Result<Expr, ExprError> {
        let mut segments = vec![Segment::Key(self.ident()?)];
        loop {
            match self.peek() {
                Some('.') => {
                    self.pos += 1;
                    segments.push(Segment::Key(self.ident()?));
                }
                Some('[') => {
                    self.pos += 1;
                    self.skip_ws();
                    let segment = match self.peek() {
                        Some(q @ ('\'' | '"')) => Segment::Key(self.quoted(q)?),
                        Some(c) if c.is_ascii_digit() => {
                            let start = self.pos;
                            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                                self.pos += 1;
                            }
                            let digits: String = self.chars[start..self.pos].iter().collect();
                            let index = digits
                                .parse()
                                .map_err(|_| self.error("index out of range"))?;
                            Segment::Index(index)
                        }
                        _ => return Err(self.error("expected an index or quoted key")),
                    };
                    self.skip_ws();
                    if self.peek() != Some(']') {
                        return Err(self.error("expected ']'"));
                    }
                    self.pos += 1;
                    segments.push(segment);
                }
                _ => return Ok(Expr::Ref(segments)),
            }
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn lookup<'a>(root: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    segments.iter().try_fold(root, |node, segment| match segment {
        Segment::Key(key) => node.get(key.as_str()),
        Segment::Index(i) => node.get(*i),
    })
}

fn display_path(segments: &[Segment]) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Key(key) if out.is_empty() => out.push_str(key),
            Segment::Key(key) => {
                out.push('.');
                out.push_str(key);
            }
            Segment::Index(i) => out.push_str(&format!("[{i}]")),
        }
    }
    out
}

fn apply(op: char, lhs: &Value, rhs: &Value) -> Result<Value, ExprError> {
    let operands = || ExprError::Operands {
        op,
        lhs: ValueKind::of(lhs),
        rhs: ValueKind::of(rhs),
    };
    match (op, lhs, rhs) {
        ('+' | '-', Value::Number(a), Value::Number(b)) => {
            if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
                let exact = if op == '+' { a.checked_add(b) } else { a.checked_sub(b) };
                if let Some(n) = exact {
                    return Ok(Value::Number(Number::from(n)));
                }
            }
            let (a, b) = (a.as_f64().ok_or_else(operands)?, b.as_f64().ok_or_else(operands)?);
            let result = if op == '+' { a + b } else { a - b };
            Number::from_f64(result)
                .map(Value::Number)
                .ok_or_else(operands)
        }
        ('+', _, _) => Ok(Value::String(format!("{}{}", stringify(lhs), stringify(rhs)))),
        _ => Err(operands()),
    }
}

/// Render a value for splicing into a string.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// A piece of a template string.
#[derive(Debug, PartialEq)]
enum Piece<'a> {
    Text(&'a str),
    Template(&'a str),
}

/// Split a string into literal text and `${...}` bodies. Closing braces
/// inside quoted strings do not end a template. An unterminated `${` is
/// treated as text.
fn split_pieces(s: &str) -> Vec<Piece<'_>> {
    let mut pieces = Vec::new();
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        let body_start = start + 2;
        let Some(len) = template_len(&rest[body_start..]) else {
            break;
        };
        if start > 0 {
            pieces.push(Piece::Text(&rest[..start]));
        }
        pieces.push(Piece::Template(&rest[body_start..body_start + len]));
        rest = &rest[body_start + len + 1..];
    }
    if !rest.is_empty() {
        pieces.push(Piece::Text(rest));
    }
    pieces
}

fn template_len(body: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in body.char_indices() {
        match (quote, c) {
            (Some(_), _) if escaped => escaped = false,
            (Some(_), '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '}') => return Some(i),
            (None, _) => {}
        }
    }
    None
}

/// Expand one string against the tree. Returns the new value for the leaf.
pub fn expand_str(s: &str, root: &Value) -> Value {
    let pieces = split_pieces(s);
    if !pieces.iter().any(|p| matches!(p, Piece::Template(_))) {
        return coerce_literal(s);
    }

    if let [Piece::Template(body)] = pieces.as_slice() {
        return match Expr::parse(body).and_then(|e| e.eval(root)) {
            Ok(Value::String(result)) => coerce_literal(&result),
            Ok(value) => value,
            Err(e) => {
                debug!(template = s, error = %e, "leaving template unresolved");
                Value::String(s.to_string())
            }
        };
    }

    let mut out = String::new();
    for piece in &pieces {
        match piece {
            Piece::Text(text) => out.push_str(text),
            Piece::Template(body) => match Expr::parse(body).and_then(|e| e.eval(root)) {
                Ok(value) => out.push_str(&stringify(&value)),
                Err(e) => {
                    debug!(template = *body, error = %e, "leaving template unresolved");
                    out.push_str("${");
                    out.push_str(body);
                    out.push('}');
                }
            },
        }
    }
    match out.as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(out),
    }
}

/// Expand every string leaf of the tree for [`TEMPLATE_PASSES`] passes.
///
/// Leaves are visited in key order and updated in place, so a later leaf in
/// the same pass already sees an earlier leaf's new value. String results
/// containing `app_root` are normalised as filesystem paths.
pub fn resolve_templates(tree: &mut Value, app_root: Option<&Path>) {
    let mut leaves = Vec::new();
    collect_string_leaves(tree, &mut Vec::new(), &mut leaves);

    for _ in 0..TEMPLATE_PASSES {
        for dotted in &leaves {
            let Some(Value::String(current)) = lookup(tree, dotted) else {
                continue;
            };
            let expanded = match (expand_str(current, tree), app_root) {
                (Value::String(s), Some(root))
                    if s.contains(root.to_string_lossy().as_ref()) && !s.contains("${") =>
                {
                    Value::String(clean_path(Path::new(&s)).to_string_lossy().into_owned())
                }
                (value, _) => value,
            };
            set_dotted(tree, dotted, expanded);
        }
    }
}

/// Paths to string leaves. Array elements are addressed by index.
fn collect_string_leaves(node: &Value, path: &mut Vec<Segment>, out: &mut Vec<Vec<Segment>>) {
    match node {
        Value::String(_) => out.push(path.clone()),
        Value::Object(map) => {
            for (key, child) in map {
                path.push(Segment::Key(key.clone()));
                collect_string_leaves(child, path, out);
                path.pop();
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                path.push(Segment::Index(i));
                collect_string_leaves(child, path, out);
                path.pop();
            }
        }
        _ => {}
    }
}

fn set_dotted(tree: &mut Value, path: &[Segment], value: Value) {
    let mut node = tree;
    for segment in path {
        let next = match segment {
            Segment::Key(key) => node.get_mut(key.as_str()),
            Segment::Index(i) => node.get_mut(*i),
        };
        match next {
            Some(child) => node = child,
            None => return,
        }
    }
    *node = value;
}
