//! Typed condition clauses and their evaluation over a request context.
//!
//! Operators: `StringEquals`, `StringNotEquals`, `StringLike`, `Null`
//! (short forms `Equals`, `NotEquals` are accepted too), optionally prefixed
//! by `ForAnyValue:` or `ForAllValues:`.
//!
//! Values may embed policy variables such as `${aws:PrincipalAccount}`; those
//! are resolved against the request context at evaluation time.

use std::borrow::Cow;
use std::collections::{BTreeSet, HashSet};

use crate::authz::errors::CompileError;
use crate::authz::pattern::wildcard_match;
use crate::authz::types::{
    ConditionClause, ConditionOperator, ConditionPredicate, Quantifier, RequestContext,
};

// ─── Construction ───────────────────────────────────────────────────────

/// Split `ForAnyValue:StringLike` into its quantifier and operator.
pub fn parse_operator(raw: &str) -> Result<(Quantifier, ConditionOperator), CompileError> {
    let (quantifier, name) = if let Some(rest) = raw.strip_prefix("ForAnyValue:") {
        (Quantifier::ForAny, rest)
    } else if let Some(rest) = raw.strip_prefix("ForAllValues:") {
        (Quantifier::ForAll, rest)
    } else {
        (Quantifier::None, raw)
    };

    let operator = match name {
        "StringEquals" | "Equals" => ConditionOperator::Equals,
        "StringNotEquals" | "NotEquals" => ConditionOperator::NotEquals,
        "StringLike" => ConditionOperator::StringLike,
        "Null" => ConditionOperator::Null,
        other => {
            return Err(CompileError::MalformedConditionClause(format!(
                "unknown operator `{other}`"
            )));
        }
    };

    if operator == ConditionOperator::Null && quantifier != Quantifier::None {
        return Err(CompileError::MalformedConditionClause(format!(
            "`{raw}`: Null does not take a set quantifier"
        )));
    }
    Ok((quantifier, operator))
}

impl ConditionClause {
    /// Validate and build a clause from its manifest spelling.
    pub fn parse(operator: &str, key: &str, values: &[String]) -> Result<Self, CompileError> {
        let (quantifier, operator) = parse_operator(operator)?;
        validate_key(key)?;

        let values: BTreeSet<String> = if operator == ConditionOperator::Null {
            match values {
                [v] if v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("false") => {
                    BTreeSet::from([v.to_ascii_lowercase()])
                }
                _ => {
                    return Err(CompileError::MalformedConditionClause(format!(
                        "Null on `{key}` takes exactly one value, \"true\" or \"false\""
                    )));
                }
            }
        } else {
            if values.is_empty() {
                return Err(CompileError::MalformedConditionClause(format!(
                    "{} on `{key}` requires at least one value",
                    operator.wire_name()
                )));
            }
            for v in values {
                validate_value(key, v)?;
            }
            values.iter().cloned().collect()
        };

        Ok(Self {
            operator,
            quantifier,
            key: key.to_string(),
            values,
        })
    }

    /// `Null(key, "false")`: the key must be present.
    pub fn is_present_check(&self) -> bool {
        self.operator == ConditionOperator::Null && self.values.contains("false")
    }
}

impl ConditionPredicate {
    /// Put clauses in canonical order. Two clauses with the same operator
    /// block and key cannot both be expressed in a policy document, so they
    /// are rejected.
    pub fn from_clauses(mut clauses: Vec<ConditionClause>) -> Result<Self, CompileError> {
        clauses.sort_by(|a, b| {
            (a.block_name(), &a.key).cmp(&(b.block_name(), &b.key))
        });
        let mut seen = HashSet::new();
        for clause in &clauses {
            if !seen.insert((clause.block_name(), clause.key.as_str())) {
                return Err(CompileError::MalformedConditionClause(format!(
                    "duplicate {} clause on `{}`",
                    clause.block_name(),
                    clause.key
                )));
            }
        }
        Ok(Self { clauses })
    }
}

fn validate_key(key: &str) -> Result<(), CompileError> {
    let valid = match key.split_once(':') {
        Some((prefix, name)) => {
            !prefix.is_empty()
                && !name.is_empty()
                && prefix
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
                && !key.chars().any(|c| c.is_whitespace() || c.is_control())
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(CompileError::MalformedConditionClause(format!(
            "invalid condition key `{key}` (expected `prefix:name`)"
        )))
    }
}

/// Policy variables must be closed and namespaced; anything else is a
/// placeholder that substitution failed to resolve.
fn validate_value(key: &str, value: &str) -> Result<(), CompileError> {
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return Err(CompileError::MalformedConditionClause(format!(
                "unterminated variable in value `{value}` of `{key}`"
            )));
        };
        let name = &after[..end];
        if !name.contains(':') {
            return Err(CompileError::MalformedConditionClause(format!(
                "unresolved placeholder `${{{name}}}` in value of `{key}`"
            )));
        }
        rest = &after[end + 1..];
    }
    Ok(())
}

// ─── Evaluator ──────────────────────────────────────────────────────────

/// All clauses must hold. An empty predicate is unconditional.
pub fn evaluate(predicate: &ConditionPredicate, context: &RequestContext) -> bool {
    predicate
        .clauses()
        .iter()
        .all(|clause| evaluate_clause(clause, context))
}

/// Evaluate one clause. A missing key is a failed condition, never an error,
/// except where the clause asks for absence (`Null` true) or quantifies with
/// `ForAllValues`.
pub fn evaluate_clause(clause: &ConditionClause, context: &RequestContext) -> bool {
    let entry = context.get(clause.key());

    if clause.operator() == ConditionOperator::Null {
        let expect_absent = clause.values().contains("true");
        return entry.is_none() == expect_absent;
    }

    let Some(expected) = resolve_values(clause.values(), context) else {
        return false;
    };
    let passes = |v: &String| value_passes(clause.operator(), &expected, v);

    match clause.quantifier() {
        Quantifier::ForAll => entry.map_or(true, |e| e.as_slice().iter().all(passes)),
        Quantifier::ForAny => entry.is_some_and(|e| e.as_slice().iter().any(passes)),
        Quantifier::None => match entry {
            Some(e) if !e.as_slice().is_empty() => e.as_slice().iter().all(passes),
            _ => false,
        },
    }
}

fn value_passes(operator: ConditionOperator, expected: &[Cow<'_, str>], value: &str) -> bool {
    match operator {
        ConditionOperator::Equals => expected.iter().any(|e| e == value),
        ConditionOperator::NotEquals => !expected.iter().any(|e| e == value),
        ConditionOperator::StringLike => expected.iter().any(|e| wildcard_match(e, value)),
        ConditionOperator::Null => false,
    }
}

/// Substitute policy variables. `None` if any referenced variable is absent
/// or multi-valued.
fn resolve_values<'a>(
    values: &'a BTreeSet<String>,
    context: &RequestContext,
) -> Option<Vec<Cow<'a, str>>> {
    values
        .iter()
        .map(|v| {
            if v.contains("${") {
                resolve_variables(v, context).map(Cow::Owned)
            } else {
                Some(Cow::Borrowed(v.as_str()))
            }
        })
        .collect()
}

fn resolve_variables(value: &str, context: &RequestContext) -> Option<String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}')?;
        match context.get(&after[..end])?.as_slice() {
            [single] => out.push_str(single),
            _ => return None,
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Some(out)
}
