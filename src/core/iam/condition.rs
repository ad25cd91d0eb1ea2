//! Condition evaluation for access policies
//!
//! A statement's `Condition` block maps an operator to `{context key: values}`.
//! Every operator entry must hold for the statement to apply; within one
//! entry, positive operators pass when any value matches and negated
//! operators pass when no value matches.

use super::pattern::PatternMatcher;
use super::policy::ValueList;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Request context: condition key to value (e.g. `AWS:SourceArn`)
pub type RequestContext = HashMap<String, String>;

/// Condition block of a statement, serialized as
/// `{"StringEquals": {"AWS:SourceArn": "..."}}`
pub type ConditionBlock = BTreeMap<ConditionOperator, BTreeMap<String, ValueList>>;

/// Condition operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConditionOperator {
    /// String equals (case-sensitive)
    StringEquals,
    /// String not equals
    StringNotEquals,
    /// String matches pattern (supports `*` and `?`)
    StringLike,
    /// String does not match pattern
    StringNotLike,
}

impl ConditionOperator {
    /// Whether the operator passes when no value matches
    fn is_negated(self) -> bool {
        matches!(self, ConditionOperator::StringNotEquals | ConditionOperator::StringNotLike)
    }

    fn value_matches(self, expected: &str, actual: &str) -> bool {
        match self {
            ConditionOperator::StringEquals | ConditionOperator::StringNotEquals => {
                expected == actual
            }
            ConditionOperator::StringLike | ConditionOperator::StringNotLike => {
                PatternMatcher::matches(expected, actual)
            }
        }
    }
}

/// A single condition: one operator applied to one context key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub operator: ConditionOperator,
    pub key: String,
    pub values: Vec<String>,
}

impl Condition {
    /// Create a new condition
    pub fn new(operator: ConditionOperator, key: impl Into<String>, values: Vec<String>) -> Self {
        Condition {
            operator,
            key: key.into(),
            values,
        }
    }

    /// Evaluate this condition against a request context
    ///
    /// A missing context key fails positive operators and satisfies negated
    /// ones.
    pub fn evaluate(&self, context: &RequestContext) -> bool {
        let actual = match context.get(&self.key) {
            Some(v) => v,
            None => return self.operator.is_negated(),
        };

        let any_match = self
            .values
            .iter()
            .any(|expected| self.operator.value_matches(expected, actual));

        any_match != self.operator.is_negated()
    }
}

/// Flatten a condition block into individual conditions
pub fn conditions(block: &ConditionBlock) -> Vec<Condition> {
    block
        .iter()
        .flat_map(|(operator, entries)| {
            entries.iter().map(move |(key, values)| {
                Condition::new(*operator, key.clone(), values.iter().map(String::from).collect())
            })
        })
        .collect()
}

/// Evaluate every condition in a block (logical AND)
pub fn evaluate_block(block: &ConditionBlock, context: &RequestContext) -> bool {
    conditions(block).iter().all(|c| c.evaluate(context))
}
