//! Access policy documents and evaluation
//!
//! Provides:
//! - JSON policy documents in the S3 bucket-policy layout
//! - Allow/Deny statements with explicit deny precedence
//! - Wildcard pattern matching for actions and resources
//! - Condition evaluation (`StringEquals`, `StringNotEquals`, `StringLike`,
//!   `StringNotLike`)

mod condition;
mod engine;
mod pattern;
mod policy;

pub use condition::{
    conditions, evaluate_block, Condition, ConditionBlock, ConditionOperator, RequestContext,
};
pub use engine::{Decision, PolicyEngine, Request};
pub use pattern::PatternMatcher;
pub use policy::{
    Caller, Effect, Policy, Principal, Statement, ValueList, POLICY_VERSION, READ_ACTIONS,
};

#[cfg(test)]
mod tests;
