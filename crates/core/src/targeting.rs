//! Targeting rules: attribute name -> predicate.
//!
//! Rules arrive as JSON (`{"country": {"in": ["US", "CA"]}, "tier": "pro"}`)
//! and parse into a tagged predicate union. Unknown operators are rejected at
//! parse time, never silently ignored.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    In,
    Eq,
    Neq,
    Gte,
    Lte,
}

impl Op {
    fn parse(name: &str) -> Option<Op> {
        match name {
            "in" => Some(Op::In),
            "eq" => Some(Op::Eq),
            "neq" => Some(Op::Neq),
            "gte" => Some(Op::Gte),
            "lte" => Some(Op::Lte),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Op::In => "in",
            Op::Eq => "eq",
            Op::Neq => "neq",
            Op::Gte => "gte",
            Op::Lte => "lte",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Bare value: equality match.
    Literal(Value),
    /// Bare sequence: membership match.
    In(Vec<Value>),
    /// Operator mapping; every operator must pass.
    Ops(Vec<(Op, Value)>),
}

/// Parsed targeting configuration. Empty targeting matches every unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Targeting {
    rules: BTreeMap<String, Predicate>,
}

impl Targeting {
    /// Parse a JSON targeting object, rejecting unknown operators.
    pub fn parse(value: &Value) -> CoreResult<Targeting> {
        let object = match value {
            Value::Null => return Ok(Targeting::default()),
            Value::Object(object) => object,
            other => {
                return Err(CoreError::invalid(format!(
                    "targeting must be an object, got: {other}"
                )))
            }
        };
        let mut rules = BTreeMap::new();
        for (attribute, rule) in object {
            rules.insert(attribute.clone(), parse_predicate(attribute, rule)?);
        }
        Ok(Targeting { rules })
    }

    /// Lenient decode for the persistence boundary: anything unreadable
    /// degrades to empty targeting.
    pub fn from_stored(raw: &str) -> Targeting {
        serde_json::from_str::<Value>(raw)
            .ok()
            .and_then(|value| Targeting::parse(&value).ok())
            .unwrap_or_default()
    }

    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        for (attribute, predicate) in &self.rules {
            object.insert(attribute.clone(), predicate_to_value(predicate));
        }
        Value::Object(object)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Every rule attribute must be present and satisfied; missing
    /// attributes reject the unit.
    pub fn matches(&self, attributes: &Map<String, Value>) -> bool {
        self.rules.iter().all(|(attribute, predicate)| {
            attributes
                .get(attribute)
                .is_some_and(|value| predicate_matches(predicate, value))
        })
    }
}

fn parse_predicate(attribute: &str, rule: &Value) -> CoreResult<Predicate> {
    match rule {
        Value::Object(ops) => {
            let mut parsed = Vec::with_capacity(ops.len());
            for (name, expected) in ops {
                let op = Op::parse(name).ok_or_else(|| {
                    CoreError::invalid(format!(
                        "unknown targeting operator '{name}' for attribute '{attribute}'"
                    ))
                })?;
                if op == Op::In && !expected.is_array() {
                    return Err(CoreError::invalid(format!(
                        "'in' operator for attribute '{attribute}' requires a list"
                    )));
                }
                parsed.push((op, expected.clone()));
            }
            Ok(Predicate::Ops(parsed))
        }
        Value::Array(values) => Ok(Predicate::In(values.clone())),
        other => Ok(Predicate::Literal(other.clone())),
    }
}

fn predicate_to_value(predicate: &Predicate) -> Value {
    match predicate {
        Predicate::Literal(value) => value.clone(),
        Predicate::In(values) => Value::Array(values.clone()),
        Predicate::Ops(ops) => {
            let mut object = Map::new();
            for (op, expected) in ops {
                object.insert(op.as_str().to_string(), expected.clone());
            }
            Value::Object(object)
        }
    }
}

fn predicate_matches(predicate: &Predicate, value: &Value) -> bool {
    match predicate {
        Predicate::Literal(expected) => value == expected,
        Predicate::In(expected) => expected.contains(value),
        Predicate::Ops(ops) => ops.iter().all(|(op, expected)| match op {
            Op::In => expected
                .as_array()
                .is_some_and(|candidates| candidates.contains(value)),
            Op::Eq => value == expected,
            Op::Neq => value != expected,
            Op::Gte => compare_versions(value, expected) != Ordering::Less,
            Op::Lte => compare_versions(value, expected) != Ordering::Greater,
        }),
    }
}

/// Maximal leading run of decimal-digit tokens, split on '.'.
fn version_components(value: &Value) -> Vec<i64> {
    let text = match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    text.split('.')
        .map_while(|token| {
            if token.is_empty() || !token.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            token.parse::<i64>().ok()
        })
        .collect()
}

/// Version-tuple comparison; the shorter side is zero-padded.
fn compare_versions(left: &Value, right: &Value) -> Ordering {
    let mut left_parts = version_components(left);
    let mut right_parts = version_components(right);
    let size = left_parts.len().max(right_parts.len());
    left_parts.resize(size, 0);
    right_parts.resize(size, 0);
    left_parts.cmp(&right_parts)
}
