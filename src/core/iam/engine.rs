//! Policy evaluation engine with deny precedence
//!
//! Evaluates a policy document against a single request to decide whether
//! it is allowed. Key features:
//! - Explicit deny takes precedence over allow
//! - Principal, action and resource wildcard matching
//! - Condition evaluation against the request context

use super::condition::{evaluate_block, RequestContext};
use super::policy::{Caller, Effect, Policy, Statement};
use tracing::debug;

/// A request to evaluate
#[derive(Debug, Clone)]
pub struct Request {
    pub caller: Caller,
    pub action: String,
    pub resource: String,
    pub context: RequestContext,
}

impl Request {
    /// Build a request with an empty context
    pub fn new(caller: Caller, action: impl Into<String>, resource: impl Into<String>) -> Self {
        Request {
            caller,
            action: action.into(),
            resource: resource.into(),
            context: RequestContext::new(),
        }
    }

    /// Add a request context entry
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Outcome of an evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// At least one Allow statement applied and no Deny did
    Allow,
    /// A Deny statement applied
    ExplicitDeny,
    /// No statement applied
    ImplicitDeny,
}

impl Decision {
    /// Whether the request is allowed
    pub fn is_allowed(self) -> bool {
        self == Decision::Allow
    }
}

/// Policy evaluation engine
#[derive(Debug, Default, Clone, Copy)]
pub struct PolicyEngine;

impl PolicyEngine {
    /// Create a new policy engine
    pub fn new() -> Self {
        PolicyEngine
    }

    /// Evaluate `request` against `policy`
    ///
    /// # Examples
    ///
    /// ```
    /// use sitebinder::core::iam::{Caller, Effect, Policy, PolicyEngine, Request, Statement};
    ///
    /// let mut policy = Policy::new();
    /// policy.add_statement(Statement::new(Effect::Allow, "s3:GetObject", "arn:aws:s3:::site/*"));
    ///
    /// let engine = PolicyEngine::new();
    /// let read = Request::new(Caller::Anonymous, "s3:GetObject", "arn:aws:s3:::site/index.html");
    /// assert!(engine.evaluate(&policy, &read).is_allowed());
    ///
    /// let write = Request::new(Caller::Anonymous, "s3:PutObject", "arn:aws:s3:::site/index.html");
    /// assert!(!engine.evaluate(&policy, &write).is_allowed());
    /// ```
    pub fn evaluate(&self, policy: &Policy, request: &Request) -> Decision {
        let mut has_allow = false;

        for (i, statement) in policy.statement.iter().enumerate() {
            if !Self::statement_applies(statement, request) {
                continue;
            }

            match statement.effect {
                Effect::Deny => {
                    debug!(
                        "Statement {} ({:?}) denies {} on {}",
                        i, statement.sid, request.action, request.resource
                    );
                    return Decision::ExplicitDeny;
                }
                Effect::Allow => {
                    has_allow = true;
                }
            }
        }

        if has_allow {
            Decision::Allow
        } else {
            Decision::ImplicitDeny
        }
    }

    /// Shorthand for `evaluate(..).is_allowed()`
    pub fn is_allowed(&self, policy: &Policy, request: &Request) -> bool {
        self.evaluate(policy, request).is_allowed()
    }

    fn statement_applies(statement: &Statement, request: &Request) -> bool {
        if let Some(principal) = &statement.principal {
            if !principal.admits(&request.caller) {
                return false;
            }
        }

        if !statement.applies_to(&request.action, &request.resource) {
            return false;
        }

        match &statement.condition {
            Some(block) => evaluate_block(block, &request.context),
            None => true,
        }
    }
}
