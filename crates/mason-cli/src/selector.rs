//! Kubernetes-style label selectors.
//!
//! Grammar (comma-separated requirements, all of which must match):
//!
//! ```text
//! key=value   key==value   key!=value
//! key in (a,b)   key notin (a,b)
//! key   !key
//! ```
//!
//! `!=` and `notin` also match when the key is absent.

use std::collections::BTreeSet;
use std::fmt;

use mason_core::{LabelSelector, Labels};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid label selector {selector:?}: {reason}")]
pub struct SelectorError {
    pub selector: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    key: String,
    operator: Operator,
    values: BTreeSet<String>,
}

impl Requirement {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    fn single_value(&self) -> &str {
        self.values.iter().next().map(String::as_str).unwrap_or("")
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            Operator::Equals | Operator::In => value.is_some_and(|v| self.values.contains(v)),
            Operator::NotEquals | Operator::NotIn => !value.is_some_and(|v| self.values.contains(v)),
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = || self.values.iter().cloned().collect::<Vec<_>>().join(",");
        match self.operator {
            Operator::Equals => write!(f, "{}={}", self.key, self.single_value()),
            Operator::NotEquals => write!(f, "{}!={}", self.key, self.single_value()),
            Operator::In => write!(f, "{} in ({})", self.key, joined()),
            Operator::NotIn => write!(f, "{} notin ({})", self.key, joined()),
            Operator::Exists => write!(f, "{}", self.key),
            Operator::DoesNotExist => write!(f, "!{}", self.key),
        }
    }
}

/// A parsed selector. The empty selector matches every label set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        let fail = |reason: String| SelectorError {
            selector: input.to_owned(),
            reason,
        };

        let mut requirements = Vec::new();
        for term in split_terms(input).map_err(fail)? {
            requirements.push(parse_requirement(term).map_err(fail)?);
        }
        Ok(Self { requirements })
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// This selector's requirements followed by `other`'s.
    pub fn and(mut self, other: &Selector) -> Self {
        self.requirements.extend(other.requirements.iter().cloned());
        self
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, requirement) in self.requirements.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{requirement}")?;
        }
        Ok(())
    }
}

impl LabelSelector for Selector {
    fn matches(&self, labels: &Labels) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

/// Split on the commas that are not inside a value list.
fn split_terms(input: &str) -> Result<Vec<&str>, String> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| "unbalanced ')'".to_owned())?;
            }
            ',' if depth == 0 => {
                terms.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err("unbalanced '('".to_owned());
    }
    terms.push(&input[start..]);

    let terms: Vec<&str> = terms.into_iter().map(str::trim).collect();
    if terms.len() == 1 && terms[0].is_empty() {
        return Ok(Vec::new());
    }
    if terms.iter().any(|t| t.is_empty()) {
        return Err("empty requirement".to_owned());
    }
    Ok(terms)
}

fn parse_requirement(term: &str) -> Result<Requirement, String> {
    if let Some(key) = term.strip_prefix('!') {
        return requirement(key.trim(), Operator::DoesNotExist, []);
    }

    if let Some((head, rest)) = term.split_once('(') {
        let list = rest
            .strip_suffix(')')
            .ok_or_else(|| format!("expected ')' at the end of {term:?}"))?;
        let mut words = head.split_whitespace();
        let (Some(key), Some(op), None) = (words.next(), words.next(), words.next()) else {
            return Err(format!("expected `key in (...)` or `key notin (...)`, got {term:?}"));
        };
        let operator = match op {
            "in" => Operator::In,
            "notin" => Operator::NotIn,
            other => return Err(format!("unknown operator {other:?}")),
        };
        let values: Vec<&str> = list.split(',').map(str::trim).collect();
        if values.iter().all(|v| v.is_empty()) {
            return Err(format!("{op} requires at least one value"));
        }
        return requirement(key, operator, values);
    }

    for (token, operator) in [
        ("!=", Operator::NotEquals),
        ("==", Operator::Equals),
        ("=", Operator::Equals),
    ] {
        if let Some((key, value)) = term.split_once(token) {
            return requirement(key.trim(), operator, [value.trim()]);
        }
    }

    requirement(term, Operator::Exists, [])
}

fn requirement<'a>(
    key: &str,
    operator: Operator,
    values: impl IntoIterator<Item = &'a str>,
) -> Result<Requirement, String> {
    validate_key(key)?;
    let values = values
        .into_iter()
        .map(|v| validate_value(v).map(|()| v.to_owned()))
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(Requirement {
        key: key.to_owned(),
        operator,
        values,
    })
}

fn validate_key(key: &str) -> Result<(), String> {
    let valid_char = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/');
    let starts_and_ends_alnum = key.starts_with(|c: char| c.is_ascii_alphanumeric())
        && key.ends_with(|c: char| c.is_ascii_alphanumeric());
    if key.is_empty() || !starts_and_ends_alnum || !key.chars().all(valid_char) {
        return Err(format!("invalid label key {key:?}"));
    }
    Ok(())
}

/// Values may be module refs, so `:` `/` `@` are allowed on top of the
/// usual label value characters.
fn validate_value(value: &str) -> Result<(), String> {
    let valid_char =
        |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '@');
    if !value.chars().all(valid_char) {
        return Err(format!("invalid label value {value:?}"));
    }
    Ok(())
}
