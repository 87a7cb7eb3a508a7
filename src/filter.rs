//! Filter expression parsing and evaluation.
//!
//! A filter rule is a single line of the grammar
//!
//! ```text
//! field_path (== | !=) value ( "|" value )* ( AND field_path ... )*
//! ```
//!
//! Conditions within a line are ANDed. The only OR is the same-field `|`
//! alternation. Values are shell-style glob patterns (`*`, `?`, character
//! classes), matched against the addressed field's string representation.
//! Field paths descend maps with `.`; a numeric segment indexes a list and
//! `*` means "any element of the list".
//!
//! Rules are compiled at configuration load; any malformed rule aborts
//! startup instead of surfacing at evaluation time.

use glob::Pattern;
use serde_json::Value;
use thiserror::Error;

/// Error type for filter compilation failures.
#[derive(Debug, Error)]
pub enum FilterParseError {
    /// A condition has no `==` or `!=` operator.
    #[error("condition '{0}' has no == or != operator")]
    MissingOperator(String),

    /// The field path side of a condition is empty.
    #[error("condition '{0}' has an empty field path")]
    EmptyPath(String),

    /// A value alternative is empty (e.g. a trailing `|`).
    #[error("condition '{0}' has an empty value alternative")]
    EmptyValue(String),

    /// A value is not a valid glob pattern.
    #[error("invalid glob pattern '{pattern}': {source}")]
    BadPattern {
        pattern: String,
        source: glob::PatternError,
    },
}

/// One segment of a dotted field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Descend into a map by key.
    Key(String),
    /// Descend into a list by position.
    Index(usize),
    /// Any element of a list.
    Any,
}

/// A parsed dotted field path, e.g. `commits.*.author.name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath(Vec<Segment>);

impl FieldPath {
    /// Parses a dotted path. Numeric segments index lists, `*` matches any
    /// list element.
    pub fn parse(path: &str) -> Result<Self, FilterParseError> {
        if path.is_empty() || path.split('.').any(str::is_empty) {
            return Err(FilterParseError::EmptyPath(path.to_string()));
        }
        let segments = path
            .split('.')
            .map(|seg| {
                if seg == "*" {
                    Segment::Any
                } else if let Ok(index) = seg.parse::<usize>() {
                    Segment::Index(index)
                } else {
                    Segment::Key(seg.to_string())
                }
            })
            .collect();
        Ok(FieldPath(segments))
    }

    /// Resolves the path against a field tree, returning the string forms
    /// of every scalar it addresses. `*` segments fan out over list
    /// elements; non-scalar leaves and dead ends contribute nothing.
    pub fn resolve(&self, fields: &Value) -> Vec<String> {
        let mut current = vec![fields];
        for segment in &self.0 {
            let mut next = Vec::new();
            for value in current {
                match segment {
                    Segment::Key(key) => {
                        if let Some(child) = value.get(key) {
                            next.push(child);
                        }
                    }
                    Segment::Index(index) => {
                        if let Some(child) = value.as_array().and_then(|a| a.get(*index)) {
                            next.push(child);
                        }
                    }
                    Segment::Any => {
                        if let Some(array) = value.as_array() {
                            next.extend(array.iter());
                        }
                    }
                }
            }
            current = next;
        }
        current.iter().filter_map(|v| scalar_repr(v)).collect()
    }

    /// Resolves the path to the first scalar it addresses, if any.
    pub fn resolve_first(&self, fields: &Value) -> Option<String> {
        self.resolve(fields).into_iter().next()
    }
}

/// String representation of a scalar field, as used for glob matching and
/// argument substitution. Lists and maps have no string form.
fn scalar_repr(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some("null".to_string()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Collapses runs of `*` to a single star, matching shell fnmatch where
/// `***` means the same as `*`.
fn collapse_star_runs(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_star = false;
    for c in value.chars() {
        if c == '*' && prev_star {
            continue;
        }
        prev_star = c == '*';
        out.push(c);
    }
    out
}

/// Comparison operator of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
}

/// One `path op value|value|...` condition.
#[derive(Debug, Clone)]
pub struct Condition {
    path: FieldPath,
    op: Op,
    values: Vec<Pattern>,
}

impl Condition {
    fn parse(text: &str) -> Result<Self, FilterParseError> {
        // The first operator occurrence wins, so values are free to
        // contain the other operator (e.g. `title == a!=b`).
        let (lhs, op, rhs) = match (text.find("=="), text.find("!=")) {
            (Some(eq), Some(ne)) if ne < eq => (&text[..ne], Op::Ne, &text[ne + 2..]),
            (Some(eq), _) => (&text[..eq], Op::Eq, &text[eq + 2..]),
            (None, Some(ne)) => (&text[..ne], Op::Ne, &text[ne + 2..]),
            (None, None) => {
                return Err(FilterParseError::MissingOperator(text.to_string()));
            }
        };

        let path = FieldPath::parse(lhs.trim())
            .map_err(|_| FilterParseError::EmptyPath(text.to_string()))?;

        let mut values = Vec::new();
        for alternative in rhs.split('|') {
            let alternative = alternative.trim();
            if alternative.is_empty() {
                return Err(FilterParseError::EmptyValue(text.to_string()));
            }
            let normalized = collapse_star_runs(alternative);
            let pattern =
                Pattern::new(&normalized).map_err(|source| FilterParseError::BadPattern {
                    pattern: alternative.to_string(),
                    source,
                })?;
            values.push(pattern);
        }
        Ok(Condition { path, op, values })
    }

    /// Whether the condition holds for the given field tree.
    ///
    /// For `==`: some addressed value glob-matches some alternative.
    /// For `!=`: the negation; a missing field therefore satisfies `!=`.
    pub fn matches(&self, fields: &Value) -> bool {
        let hit = self
            .path
            .resolve(fields)
            .iter()
            .any(|value| self.values.iter().any(|pattern| pattern.matches(value)));
        match self.op {
            Op::Eq => hit,
            Op::Ne => !hit,
        }
    }
}

/// An AND-joined set of conditions compiled from one rule line.
#[derive(Debug, Clone)]
pub struct FilterRule {
    conditions: Vec<Condition>,
}

impl FilterRule {
    /// Compiles one rule line.
    pub fn parse(line: &str) -> Result<Self, FilterParseError> {
        let conditions = line
            .split(" AND ")
            .map(|part| Condition::parse(part.trim()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FilterRule { conditions })
    }

    /// Whether every condition of the rule holds.
    pub fn matches(&self, fields: &Value) -> bool {
        self.conditions.iter().all(|c| c.matches(fields))
    }
}

/// Compiles a list of rule lines, failing on the first malformed one.
pub fn parse_rules(lines: &[String]) -> Result<Vec<FilterRule>, FilterParseError> {
    lines.iter().map(|line| FilterRule::parse(line)).collect()
}

/// Whether any rule in the list fully matches (top-level discard check).
pub fn any_rule_matches(rules: &[FilterRule], fields: &Value) -> bool {
    rules.iter().any(|rule| rule.matches(fields))
}
