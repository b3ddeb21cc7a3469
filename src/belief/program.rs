//! Probabilistic logic programs: weighted facts, Horn rules with negation,
//! queries and evidence.
//!
//! Text form, one statement per line:
//! ```text
//! 0.5::n(1).
//! 0.7::prior(0).
//! arg(0) :- n(1).
//! n(0) :- prior(0), \+arg(1).
//! n(0) :- arg(0).
//! query(n(0)).
//! evidence(n(3), true).
//! ```
//! `%` starts a comment that runs to the end of the line.

use std::fmt;

use thiserror::Error;

use crate::{ArgumentId, PositionId};

/// A ground atom such as `n(3)`. Whitespace is not significant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Atom(String);

impl Atom {
    pub fn new(text: &str) -> Self {
        Atom(text.chars().filter(|c| !c.is_whitespace()).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn position_atom(id: PositionId) -> Atom {
    Atom(format!("n({})", id))
}

pub fn prior_atom(id: PositionId) -> Atom {
    Atom(format!("prior({})", id))
}

pub fn argument_atom(id: ArgumentId) -> Atom {
    Atom(format!("arg({})", id))
}

/// Position id named by a `n(ID)` atom.
pub fn parse_position_atom(text: &str) -> Option<PositionId> {
    let atom = Atom::new(text);
    atom.as_str()
        .strip_prefix("n(")
        .and_then(|rest| rest.strip_suffix(')'))
        .and_then(|id| id.parse().ok())
}

#[derive(Debug, Clone, PartialEq)]
pub struct Literal {
    pub atom: Atom,
    pub negated: bool,
}

impl Literal {
    pub fn pos(atom: Atom) -> Self {
        Self { atom, negated: false }
    }

    pub fn neg(atom: Atom) -> Self {
        Self { atom, negated: true }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            write!(f, "\\+{}", self.atom)
        } else {
            write!(f, "{}", self.atom)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Independent random atom, true with `probability`.
    Fact { probability: f64, atom: Atom },
    Rule { head: Atom, body: Vec<Literal> },
    Query(Atom),
    Evidence { atom: Atom, value: bool },
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Fact { probability, atom } => write!(f, "{}::{}.", probability, atom),
            Statement::Rule { head, body } => {
                write!(f, "{} :- ", head)?;
                for (i, lit) in body.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", lit)?;
                }
                f.write_str(".")
            }
            Statement::Query(atom) => write!(f, "query({}).", atom),
            Statement::Evidence { atom, value } => write!(f, "evidence({}, {}).", atom, value),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub statements: Vec<Statement>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, statement: Statement) {
        self.statements.push(statement);
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn queries(&self) -> impl Iterator<Item = &Atom> {
        self.statements.iter().filter_map(|s| match s {
            Statement::Query(a) => Some(a),
            _ => None,
        })
    }

    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let mut program = Program::new();
        for (line, raw) in split_statements(text) {
            program.push(parse_statement(&raw).map_err(|msg| ParseError { line, msg })?);
        }
        Ok(program)
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for s in &self.statements {
            writeln!(f, "{}", s)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("line {line}: {msg}")]
pub struct ParseError {
    pub line: usize,
    pub msg: String,
}

// =============================================================================
// Parser
// =============================================================================

/// Split on statement-terminating dots (a dot followed by whitespace or end
/// of input, outside parentheses). Returns the starting line of each one.
fn split_statements(text: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut start_line = 1;
    let mut line = 1;
    let mut depth = 0i32;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '%' => {
                while let Some(&n) = chars.peek() {
                    if n == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '\n' => {
                line += 1;
                current.push(' ');
            }
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth -= 1;
                current.push(c);
            }
            '.' if depth == 0 && chars.peek().map_or(true, |n| n.is_whitespace() || *n == '%') => {
                let stmt = current.trim().to_string();
                if !stmt.is_empty() {
                    out.push((start_line, stmt));
                }
                current.clear();
            }
            _ => {
                if current.trim().is_empty() && !c.is_whitespace() {
                    start_line = line;
                }
                current.push(c);
            }
        }
    }
    let rest = current.trim();
    if !rest.is_empty() {
        // unterminated trailing statement
        out.push((start_line, format!("{}\u{0}", rest)));
    }
    out
}

fn parse_statement(raw: &str) -> Result<Statement, String> {
    if raw.ends_with('\u{0}') {
        return Err(format!("missing '.' after `{}`", raw.trim_end_matches('\u{0}')));
    }
    if let Some((head, body)) = raw.split_once(":-") {
        let head = parse_atom(head)?;
        let body = split_top_level(body)
            .iter()
            .map(|lit| parse_literal(lit))
            .collect::<Result<Vec<_>, _>>()?;
        if body.is_empty() {
            return Err(format!("rule for {} has an empty body", head));
        }
        return Ok(Statement::Rule { head, body });
    }
    if let Some((prob, atom)) = raw.split_once("::") {
        let probability: f64 = prob
            .trim()
            .parse()
            .map_err(|_| format!("bad probability `{}`", prob.trim()))?;
        if !(0.0..=1.0).contains(&probability) {
            return Err(format!("probability {} outside [0,1]", probability));
        }
        return Ok(Statement::Fact { probability, atom: parse_atom(atom)? });
    }
    let atom = parse_atom(raw)?;
    if let Some(inner) = call_args(&atom, "query") {
        return Ok(Statement::Query(parse_atom(&inner)?));
    }
    if let Some(inner) = call_args(&atom, "evidence") {
        let parts = split_top_level(&inner);
        let value = match parts.get(1).map(|s| s.trim()) {
            None | Some("true") => true,
            Some("false") => false,
            Some(other) => return Err(format!("bad evidence value `{}`", other)),
        };
        if parts.len() > 2 {
            return Err("evidence takes at most two arguments".to_string());
        }
        return Ok(Statement::Evidence { atom: parse_atom(&parts[0])?, value });
    }
    Ok(Statement::Fact { probability: 1.0, atom })
}

/// Inner text of `name(...)` when `atom` is a call of `name`.
fn call_args(atom: &Atom, name: &str) -> Option<String> {
    atom.as_str()
        .strip_prefix(name)
        .and_then(|rest| rest.strip_prefix('('))
        .and_then(|rest| rest.strip_suffix(')'))
        .map(str::to_string)
}

fn parse_literal(text: &str) -> Result<Literal, String> {
    let text = text.trim();
    match text.strip_prefix("\\+") {
        Some(rest) => Ok(Literal::neg(parse_atom(rest)?)),
        None => Ok(Literal::pos(parse_atom(text)?)),
    }
}

fn parse_atom(text: &str) -> Result<Atom, String> {
    let atom = Atom::new(text);
    let s = atom.as_str();
    let name_end = s.find('(').unwrap_or(s.len());
    let name = &s[..name_end];
    let valid_name = name
        .chars()
        .next()
        .map_or(false, |c| c.is_ascii_lowercase())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_name {
        return Err(format!("bad atom `{}`", text.trim()));
    }
    if name_end < s.len() {
        if !s.ends_with(')') || depth_balanced(&s[name_end..]).is_none() {
            return Err(format!("unbalanced parentheses in `{}`", text.trim()));
        }
    }
    Ok(atom)
}

fn depth_balanced(s: &str) -> Option<()> {
    let mut depth = 0i32;
    for c in s.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    (depth == 0).then_some(())
}

fn split_top_level(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    for c in text.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts.into_iter().filter(|p| !p.trim().is_empty()).collect()
}
