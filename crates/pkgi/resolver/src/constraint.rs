//! Constraint expressions
//!
//! A constraint is a disjunction (`||`) of conjunctions. Each conjunction is
//! a list of comparators separated by whitespace or commas. Every comparator
//! is expanded into plain precedence bounds when parsed, so matching never
//! has to special-case prereleases: a version is inside a range exactly when
//! its precedence is.

use crate::error::{ConstraintError, Result};
use semver::{BuildMetadata, Prerelease, Version};
use std::cmp::Ordering;
use std::fmt;

/// Spellings that mean "no constraint"
const LATEST: &[&str] = &["", "*", "x", "X", "latest"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Exact,
    NotEqual,
    Greater,
    GreaterEq,
    Less,
    LessEq,
    Tilde,
    Caret,
}

/// Operators in match order; two-character forms come first
const OPERATORS: &[(&str, Operator)] = &[
    (">=", Operator::GreaterEq),
    ("<=", Operator::LessEq),
    ("==", Operator::Exact),
    ("!=", Operator::NotEqual),
    (">", Operator::Greater),
    ("<", Operator::Less),
    ("=", Operator::Exact),
    ("~", Operator::Tilde),
    ("^", Operator::Caret),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoundOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Bound {
    op: BoundOp,
    version: Version,
}

impl Bound {
    fn new(op: BoundOp, version: Version) -> Self {
        Self { op, version }
    }

    /// A bound no version satisfies: nothing precedes `0.0.0-0`
    fn never() -> Self {
        Self::new(BoundOp::Lt, floor(0, 0, 0))
    }

    fn matches(&self, version: &Version) -> bool {
        let ord = version.cmp_precedence(&self.version);
        match self.op {
            BoundOp::Eq => ord == Ordering::Equal,
            BoundOp::Ne => ord != Ordering::Equal,
            BoundOp::Gt => ord == Ordering::Greater,
            BoundOp::Ge => ord != Ordering::Less,
            BoundOp::Lt => ord == Ordering::Less,
            BoundOp::Le => ord != Ordering::Greater,
        }
    }
}

/// A parsed version constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    source: String,
    unconstrained: bool,
    alternatives: Vec<Vec<Bound>>,
}

impl Constraint {
    /// Parse a constraint expression
    pub fn parse(expr: &str) -> Result<Self> {
        let source = expr.trim().to_string();
        if LATEST.contains(&source.as_str()) {
            return Ok(Self {
                source,
                unconstrained: true,
                alternatives: Vec::new(),
            });
        }

        let alternatives = source
            .split("||")
            .map(|alt| parse_alternative(&source, alt))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            source,
            unconstrained: false,
            alternatives,
        })
    }

    /// Whether the expression is an implicit "latest" selection
    pub fn is_unconstrained(&self) -> bool {
        self.unconstrained
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.unconstrained
            || self
                .alternatives
                .iter()
                .any(|bounds| bounds.iter().all(|b| b.matches(version)))
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.source.is_empty() {
            f.write_str("latest")
        } else {
            f.write_str(&self.source)
        }
    }
}

fn parse_alternative(constraint: &str, alt: &str) -> Result<Vec<Bound>> {
    let mut tokens = alt
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .peekable();

    if tokens.peek().is_none() {
        return Err(ConstraintError::Unsupported {
            constraint: constraint.to_string(),
            reason: "empty alternative".into(),
        });
    }

    let mut bounds = Vec::new();
    while let Some(token) = tokens.next() {
        // Allow a space between operator and version: ">= 1.0.0"
        let comparator = if token.chars().all(is_operator_char) {
            let version = tokens.next().ok_or_else(|| ConstraintError::InvalidOperator {
                constraint: constraint.to_string(),
                operator: token.to_string(),
            })?;
            format!("{}{}", token, version)
        } else {
            token.to_string()
        };

        if tokens.peek() == Some(&"-") {
            tokens.next();
            let upper = tokens.next().ok_or_else(|| ConstraintError::Unsupported {
                constraint: constraint.to_string(),
                reason: "hyphen range is missing its upper bound".into(),
            })?;
            bounds.extend(hyphen_range(constraint, &comparator, upper)?);
            continue;
        }

        let (op, raw) = split_operator(constraint, &comparator)?;
        let partial = Partial::parse(constraint, raw)?;
        bounds.extend(expand(constraint, op, partial)?);
    }

    Ok(bounds)
}

fn is_operator_char(c: char) -> bool {
    matches!(c, '<' | '>' | '=' | '!' | '~' | '^')
}

fn split_operator<'a>(constraint: &str, token: &'a str) -> Result<(Operator, &'a str)> {
    let (op, rest) = OPERATORS
        .iter()
        .find_map(|(prefix, op)| token.strip_prefix(prefix).map(|rest| (*op, rest)))
        .unwrap_or((Operator::Exact, token));

    if rest.starts_with(is_operator_char) {
        return Err(ConstraintError::InvalidOperator {
            constraint: constraint.to_string(),
            operator: token.to_string(),
        });
    }
    Ok((op, rest))
}

fn hyphen_range(constraint: &str, lower: &str, upper: &str) -> Result<Vec<Bound>> {
    let lower = Partial::parse(constraint, lower)?;
    let upper = Partial::parse(constraint, upper)?;
    let mut bounds = expand(constraint, Operator::GreaterEq, lower)?;
    bounds.extend(expand(constraint, Operator::LessEq, upper)?);
    Ok(bounds)
}

/// Version with missing or wildcard components
#[derive(Debug, Clone)]
struct Partial {
    major: Option<u64>,
    minor: Option<u64>,
    patch: Option<u64>,
    pre: Prerelease,
}

impl Partial {
    fn parse(constraint: &str, raw: &str) -> Result<Self> {
        let invalid = |reason: &str| ConstraintError::InvalidVersion {
            constraint: constraint.to_string(),
            version: raw.to_string(),
            reason: reason.to_string(),
        };

        let s = raw.strip_prefix(['v', 'V']).unwrap_or(raw);
        let (core, rest) = match s.find(['-', '+']) {
            Some(i) => s.split_at(i),
            None => (s, ""),
        };
        // Build metadata never affects precedence, so it is dropped here
        let pre = rest
            .strip_prefix('-')
            .and_then(|r| r.split('+').next())
            .unwrap_or("");

        if core.is_empty() {
            return Err(invalid("missing version number"));
        }

        let mut components = [None; 3];
        let mut wildcard = false;
        for (i, part) in core.split('.').enumerate() {
            let Some(slot) = components.get_mut(i) else {
                return Err(invalid("too many version components"));
            };
            if matches!(part, "x" | "X" | "*") {
                wildcard = true;
                continue;
            }
            if wildcard {
                continue;
            }
            let n = part
                .parse::<u64>()
                .map_err(|_| invalid("version components must be numbers or wildcards"))?;
            *slot = Some(n);
        }
        let [major, minor, patch] = components;

        if !pre.is_empty() && patch.is_none() {
            return Err(invalid("prerelease requires a full version"));
        }
        let pre = Prerelease::new(pre).map_err(|e| invalid(&e.to_string()))?;

        Ok(Self {
            major,
            minor,
            patch,
            pre,
        })
    }
}

fn exact(major: u64, minor: u64, patch: u64, pre: Prerelease) -> Version {
    Version {
        major,
        minor,
        patch,
        pre,
        build: BuildMetadata::EMPTY,
    }
}

fn release(major: u64, minor: u64, patch: u64) -> Version {
    exact(major, minor, patch, Prerelease::EMPTY)
}

/// The lowest version with the given core (`M.m.p-0`)
fn floor(major: u64, minor: u64, patch: u64) -> Version {
    let lowest = Prerelease::new("0").unwrap_or(Prerelease::EMPTY);
    exact(major, minor, patch, lowest)
}

fn bump(constraint: &str, n: u64) -> Result<u64> {
    n.checked_add(1).ok_or_else(|| ConstraintError::Unsupported {
        constraint: constraint.to_string(),
        reason: "version component out of range".into(),
    })
}

fn expand(constraint: &str, op: Operator, partial: Partial) -> Result<Vec<Bound>> {
    use BoundOp::*;

    let Some(major) = partial.major else {
        return Ok(match op {
            Operator::NotEqual | Operator::Greater | Operator::Less => vec![Bound::never()],
            _ => Vec::new(),
        });
    };
    let Partial {
        minor, patch, pre, ..
    } = partial;
    let lower = exact(major, minor.unwrap_or(0), patch.unwrap_or(0), pre.clone());

    let bounds = match (op, minor, patch) {
        (Operator::Exact, Some(mi), Some(pa)) => vec![Bound::new(Eq, exact(major, mi, pa, pre))],
        (Operator::Exact, Some(mi), None) => vec![
            Bound::new(Ge, release(major, mi, 0)),
            Bound::new(Lt, floor(major, bump(constraint, mi)?, 0)),
        ],
        (Operator::Exact, None, _) => vec![
            Bound::new(Ge, release(major, 0, 0)),
            Bound::new(Lt, floor(bump(constraint, major)?, 0, 0)),
        ],
        (Operator::NotEqual, Some(mi), Some(pa)) => {
            vec![Bound::new(Ne, exact(major, mi, pa, pre))]
        }
        (Operator::NotEqual, _, _) => {
            return Err(ConstraintError::Unsupported {
                constraint: constraint.to_string(),
                reason: "!= requires a full version".into(),
            })
        }
        (Operator::Greater, Some(mi), Some(pa)) => vec![Bound::new(Gt, exact(major, mi, pa, pre))],
        (Operator::Greater, Some(mi), None) => {
            vec![Bound::new(Ge, release(major, bump(constraint, mi)?, 0))]
        }
        (Operator::Greater, None, _) => {
            vec![Bound::new(Ge, release(bump(constraint, major)?, 0, 0))]
        }
        (Operator::GreaterEq, _, _) => vec![Bound::new(Ge, lower)],
        (Operator::Less, Some(mi), Some(pa)) => vec![Bound::new(Lt, exact(major, mi, pa, pre))],
        (Operator::Less, mi, _) => vec![Bound::new(Lt, floor(major, mi.unwrap_or(0), 0))],
        (Operator::LessEq, Some(mi), Some(pa)) => vec![Bound::new(Le, exact(major, mi, pa, pre))],
        (Operator::LessEq, Some(mi), None) => {
            vec![Bound::new(Lt, floor(major, bump(constraint, mi)?, 0))]
        }
        (Operator::LessEq, None, _) => vec![Bound::new(Lt, floor(bump(constraint, major)?, 0, 0))],
        (Operator::Tilde, mi, _) => {
            let upper = match mi {
                Some(mi) => floor(major, bump(constraint, mi)?, 0),
                None => floor(bump(constraint, major)?, 0, 0),
            };
            vec![Bound::new(Ge, lower), Bound::new(Lt, upper)]
        }
        (Operator::Caret, mi, pa) => {
            let upper = match (major, mi, pa) {
                (0, Some(0), Some(pa)) => floor(0, 0, bump(constraint, pa)?),
                (0, Some(0), None) => floor(0, 1, 0),
                (0, Some(mi), _) => floor(0, bump(constraint, mi)?, 0),
                (major, _, _) => floor(bump(constraint, major)?, 0, 0),
            };
            vec![Bound::new(Ge, lower), Bound::new(Lt, upper)]
        }
    };

    Ok(bounds)
}
