//! # Query Expressions
//!
//! A small boolean filter language for server-side search:
//!
//! ```text
//! vertiser:acme AND (tag:red OR tag:"dark blue") AND climate
//! └── prop ───┘      └──────── nested group ───────┘  └ word ┘
//! ```
//!
//! ## Parsing Rules
//! - Tokens split on whitespace outside double quotes; `(` and `)` open and
//!   close nested groups.
//! - `key:value` splits on the first colon outside quotes. Either side may be
//!   quoted, so `"my key":"my value"` is a single prop.
//! - A bare, unquoted `OR` anywhere in a group makes that whole group an OR.
//!   There is no precedence: `a AND b OR c` is `a OR b OR c`. Builders
//!   always bracket mixed operators, so their output round-trips.
//! - A bare `AND` is noise and ignored (AND is the default).
//!
//! Expressions are immutable; every builder returns a new [`QueryExpr`].
//!
//! ```rust
//! use portal_core::query::{set_prop, set_prop_or};
//!
//! let q = set_prop_or(None, "tag", &["red", "dark blue"]);
//! let q = set_prop(Some(&q), "vertiser", Some("acme"));
//! assert_eq!(q.to_string(), "(tag:red OR tag:\"dark blue\") AND vertiser:acme");
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::QueryError;

// =============================================================================
// Tree
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BoolOp {
    #[default]
    And,
    Or,
}

impl BoolOp {
    fn joiner(self) -> &'static str {
        match self {
            BoolOp::And => " AND ",
            BoolOp::Or => " OR ",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
    /// `key:value`
    Prop { key: String, value: String },
    /// Free-text search word.
    Word(String),
    Group(Group),
}

impl Term {
    pub fn prop(key: impl Into<String>, value: impl Into<String>) -> Self {
        Term::Prop {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn word(text: impl Into<String>) -> Self {
        Term::Word(text.into())
    }

    /// True when the term is a prop named `name`, or a group made only of them.
    fn is_only_prop(&self, name: &str) -> bool {
        match self {
            Term::Prop { key, .. } => key == name,
            Term::Word(_) => false,
            Term::Group(group) => {
                !group.terms.is_empty() && group.terms.iter().all(|t| t.is_only_prop(name))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Group {
    pub op: BoolOp,
    pub terms: Vec<Term>,
}

/// A parsed, normalized boolean filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueryExpr {
    root: Group,
}

impl QueryExpr {
    pub fn parse(input: &str) -> Result<Self, QueryError> {
        let tokens = tokenize(input)?;
        let mut idx = 0;
        let root = parse_group(&tokens, &mut idx, None)?;
        Ok(Self::from_group(root))
    }

    /// Normalizes the group: single-term groups are lifted, same-operator
    /// children flattened, empty groups dropped.
    fn from_group(group: Group) -> Self {
        let mut root = normalize(group);
        loop {
            match root.terms.as_slice() {
                [Term::Group(inner)] => root = inner.clone(),
                _ => break,
            }
        }
        QueryExpr { root }
    }

    pub fn op(&self) -> BoolOp {
        self.root.op
    }

    pub fn terms(&self) -> &[Term] {
        &self.root.terms
    }

    pub fn is_empty(&self) -> bool {
        self.root.terms.is_empty()
    }

    /// First value of `name`, searching nested groups too.
    pub fn prop(&self, name: &str) -> Option<&str> {
        self.values(name).into_iter().next()
    }

    /// Every value of `name`, in order of appearance.
    pub fn values(&self, name: &str) -> Vec<&str> {
        fn collect<'a>(group: &'a Group, name: &str, out: &mut Vec<&'a str>) {
            for term in &group.terms {
                match term {
                    Term::Prop { key, value } if key == name => out.push(value),
                    Term::Group(inner) => collect(inner, name, out),
                    _ => {}
                }
            }
        }
        let mut out = Vec::new();
        collect(&self.root, name, &mut out);
        out
    }
}

// =============================================================================
// Builders
// =============================================================================

/// Replace (or with `None`, remove) the top-level `name:value` term.
pub fn set_prop(expr: Option<&QueryExpr>, name: &str, value: Option<&str>) -> QueryExpr {
    let mut root = expr.map(|e| e.root.clone()).unwrap_or_default();
    strip_prop(&mut root, name);
    if let Some(value) = value {
        root = and_term(root, Term::prop(name, value));
    }
    QueryExpr::from_group(root)
}

/// Replace the `name` terms with `name:v1 OR name:v2 ...`, AND-merged into `expr`.
pub fn set_prop_or<S: AsRef<str>>(expr: Option<&QueryExpr>, name: &str, values: &[S]) -> QueryExpr {
    let mut root = expr.map(|e| e.root.clone()).unwrap_or_default();
    strip_prop(&mut root, name);
    let mut props: Vec<Term> = values
        .iter()
        .map(|v| Term::prop(name, v.as_ref()))
        .collect();
    match props.len() {
        0 => {}
        1 => root = and_term(root, props.remove(0)),
        _ => {
            root = and_term(
                root,
                Term::Group(Group {
                    op: BoolOp::Or,
                    terms: props,
                }),
            )
        }
    }
    QueryExpr::from_group(root)
}

pub fn and(a: &QueryExpr, b: &QueryExpr) -> QueryExpr {
    combine(BoolOp::And, a, b)
}

pub fn or(a: &QueryExpr, b: &QueryExpr) -> QueryExpr {
    combine(BoolOp::Or, a, b)
}

/// Strip every leaf term of `b` from `a`, at any depth.
pub fn remove(a: &QueryExpr, b: &QueryExpr) -> QueryExpr {
    fn leaves<'a>(group: &'a Group, out: &mut Vec<&'a Term>) {
        for term in &group.terms {
            match term {
                Term::Group(inner) => leaves(inner, out),
                leaf => out.push(leaf),
            }
        }
    }
    fn strip(group: &mut Group, doomed: &[&Term]) {
        group.terms.retain(|t| !doomed.contains(&t));
        for term in &mut group.terms {
            if let Term::Group(inner) = term {
                strip(inner, doomed);
            }
        }
    }

    let mut doomed = Vec::new();
    leaves(&b.root, &mut doomed);
    let mut root = a.root.clone();
    strip(&mut root, &doomed);
    QueryExpr::from_group(root)
}

fn combine(op: BoolOp, a: &QueryExpr, b: &QueryExpr) -> QueryExpr {
    if a.is_empty() {
        return b.clone();
    }
    if b.is_empty() {
        return a.clone();
    }
    QueryExpr::from_group(Group {
        op,
        terms: vec![Term::Group(a.root.clone()), Term::Group(b.root.clone())],
    })
}

fn strip_prop(root: &mut Group, name: &str) {
    if root.op == BoolOp::Or && root.terms.len() > 1 {
        if root.terms.iter().all(|t| t.is_only_prop(name)) {
            root.terms.clear();
        }
        return;
    }
    root.terms.retain(|t| !t.is_only_prop(name));
}

fn and_term(root: Group, term: Term) -> Group {
    if root.op == BoolOp::And || root.terms.len() < 2 {
        let mut terms = root.terms;
        terms.push(term);
        Group {
            op: BoolOp::And,
            terms,
        }
    } else {
        Group {
            op: BoolOp::And,
            terms: vec![Term::Group(root), term],
        }
    }
}

fn normalize(group: Group) -> Group {
    fn push(terms: &mut Vec<Term>, term: Term, op: BoolOp) {
        match term {
            Term::Group(child) => match child.terms.len() {
                0 => {}
                1 => {
                    for t in child.terms {
                        push(terms, t, op);
                    }
                }
                _ if child.op == op => {
                    for t in child.terms {
                        push(terms, t, op);
                    }
                }
                _ => terms.push(Term::Group(child)),
            },
            leaf => terms.push(leaf),
        }
    }

    let op = group.op;
    let mut terms = Vec::with_capacity(group.terms.len());
    for term in group.terms {
        let term = match term {
            Term::Group(child) => Term::Group(normalize(child)),
            leaf => leaf,
        };
        push(&mut terms, term, op);
    }
    let op = if terms.len() < 2 { BoolOp::And } else { op };
    Group { op, terms }
}

// =============================================================================
// Parsing
// =============================================================================

#[derive(Debug)]
enum Token {
    Open(usize),
    Close(usize),
    Atom(Atom),
}

#[derive(Debug, Default)]
struct Atom {
    text: String,
    /// Byte offset in `text` of the first colon seen outside quotes.
    colon_at: Option<usize>,
    quoted: bool,
}

enum Parsed {
    Or,
    And,
    Term(Term),
}

impl Atom {
    fn classify(&self) -> Parsed {
        if !self.quoted && self.text == "OR" {
            return Parsed::Or;
        }
        if !self.quoted && self.text == "AND" {
            return Parsed::And;
        }
        match self.colon_at {
            Some(at) if at > 0 || self.quoted => {
                let key = &self.text[..at];
                let value = &self.text[at + 1..];
                if value.is_empty() && !self.quoted {
                    Parsed::Term(Term::word(self.text.clone()))
                } else {
                    Parsed::Term(Term::prop(key, value))
                }
            }
            _ => Parsed::Term(Term::word(self.text.clone())),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, QueryError> {
    fn flush(current: &mut Option<Atom>, tokens: &mut Vec<Token>) {
        if let Some(atom) = current.take() {
            tokens.push(Token::Atom(atom));
        }
    }

    let mut tokens = Vec::new();
    let mut current: Option<Atom> = None;
    let mut chars = input.char_indices();

    while let Some((pos, ch)) = chars.next() {
        match ch {
            c if c.is_whitespace() => flush(&mut current, &mut tokens),
            '(' => {
                flush(&mut current, &mut tokens);
                tokens.push(Token::Open(pos));
            }
            ')' => {
                flush(&mut current, &mut tokens);
                tokens.push(Token::Close(pos));
            }
            '"' => {
                let atom = current.get_or_insert_with(Atom::default);
                atom.quoted = true;
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '\\' => {
                            if let Some((_, escaped)) = chars.next() {
                                atom.text.push(escaped);
                            }
                        }
                        '"' => {
                            closed = true;
                            break;
                        }
                        other => atom.text.push(other),
                    }
                }
                if !closed {
                    return Err(QueryError::UnterminatedQuote { position: pos });
                }
            }
            ':' => {
                let atom = current.get_or_insert_with(Atom::default);
                if atom.colon_at.is_none() {
                    atom.colon_at = Some(atom.text.len());
                }
                atom.text.push(':');
            }
            other => current.get_or_insert_with(Atom::default).text.push(other),
        }
    }
    flush(&mut current, &mut tokens);
    Ok(tokens)
}

fn parse_group(tokens: &[Token], idx: &mut usize, open: Option<usize>) -> Result<Group, QueryError> {
    let mut group = Group::default();
    while let Some(token) = tokens.get(*idx) {
        *idx += 1;
        match token {
            Token::Open(pos) => {
                let inner = parse_group(tokens, idx, Some(*pos))?;
                group.terms.push(Term::Group(inner));
            }
            Token::Close(pos) => {
                return match open {
                    Some(_) => Ok(group),
                    None => Err(QueryError::UnbalancedBracket { position: *pos }),
                };
            }
            Token::Atom(atom) => match atom.classify() {
                Parsed::Or => group.op = BoolOp::Or,
                Parsed::And => {}
                Parsed::Term(term) => group.terms.push(term),
            },
        }
    }
    match open {
        Some(position) => Err(QueryError::UnbalancedBracket { position }),
        None => Ok(group),
    }
}

// =============================================================================
// Unparsing
// =============================================================================

fn needs_quotes(text: &str, is_word: bool) -> bool {
    text.is_empty()
        || text == "OR"
        || text == "AND"
        || text
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '(' | ')') || (is_word && c == ':'))
}

fn write_text(f: &mut fmt::Formatter<'_>, text: &str, is_word: bool) -> fmt::Result {
    if !needs_quotes(text, is_word) {
        return f.write_str(text);
    }
    f.write_str("\"")?;
    for c in text.chars() {
        if matches!(c, '"' | '\\') {
            f.write_str("\\")?;
        }
        write!(f, "{c}")?;
    }
    f.write_str("\"")
}

fn write_group(f: &mut fmt::Formatter<'_>, group: &Group) -> fmt::Result {
    for (i, term) in group.terms.iter().enumerate() {
        if i > 0 {
            f.write_str(group.op.joiner())?;
        }
        match term {
            Term::Prop { key, value } => {
                write_text(f, key, true)?;
                f.write_str(":")?;
                write_text(f, value, false)?;
            }
            Term::Word(text) => write_text(f, text, true)?,
            Term::Group(inner) => {
                f.write_str("(")?;
                write_group(f, inner)?;
                f.write_str(")")?;
            }
        }
    }
    Ok(())
}

impl fmt::Display for QueryExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_group(f, &self.root)
    }
}

impl FromStr for QueryExpr {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueryExpr::parse(s)
    }
}

impl TryFrom<String> for QueryExpr {
    type Error = QueryError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        QueryExpr::parse(&s)
    }
}

impl From<QueryExpr> for String {
    fn from(expr: QueryExpr) -> Self {
        expr.to_string()
    }
}
