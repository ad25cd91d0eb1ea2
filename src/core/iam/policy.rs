//! Access policy document structure
//!
//! Policies follow the S3 bucket policy JSON layout: a `Version` plus a list
//! of statements, each with an effect, principal, actions, resources and an
//! optional condition block.

use super::condition::ConditionBlock;
use super::pattern::PatternMatcher;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Policy language version written into every generated document
pub const POLICY_VERSION: &str = "2012-10-17";

/// Actions that only read object content
pub const READ_ACTIONS: &[&str] = &["s3:GetObject", "s3:GetObjectVersion"];

/// Effect of a policy statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    /// Allow the action
    Allow,
    /// Deny the action (takes precedence over Allow)
    Deny,
}

/// A single string or a list of strings
///
/// Policy JSON accepts both `"Action": "s3:GetObject"` and
/// `"Action": ["s3:GetObject"]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueList {
    One(String),
    Many(Vec<String>),
}

impl ValueList {
    /// Iterate the contained values
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let values: &[String] = match self {
            ValueList::One(value) => std::slice::from_ref(value),
            ValueList::Many(values) => values,
        };
        values.iter().map(String::as_str)
    }

    /// Whether the list holds no values
    pub fn is_empty(&self) -> bool {
        match self {
            ValueList::One(_) => false,
            ValueList::Many(values) => values.is_empty(),
        }
    }
}

impl From<&str> for ValueList {
    fn from(value: &str) -> Self {
        ValueList::One(value.to_string())
    }
}

impl From<Vec<String>> for ValueList {
    fn from(values: Vec<String>) -> Self {
        ValueList::Many(values)
    }
}

/// Principal a statement applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Principal {
    /// Bare `"*"`: everyone, including anonymous callers
    Wildcard(String),
    /// Typed principals, e.g. `{"Service": "cloudfront.amazonaws.com"}`
    Typed(BTreeMap<String, ValueList>),
}

impl Principal {
    /// A service principal
    pub fn service(name: &str) -> Self {
        let mut map = BTreeMap::new();
        map.insert("Service".to_string(), ValueList::from(name));
        Principal::Typed(map)
    }

    /// Whether the principal admits anyone
    pub fn is_public(&self) -> bool {
        match self {
            Principal::Wildcard(value) => value == "*",
            Principal::Typed(map) => map.values().any(|ids| ids.iter().any(|id| id == "*")),
        }
    }

    /// Whether `caller` is covered by this principal
    pub fn admits(&self, caller: &Caller) -> bool {
        if self.is_public() {
            return true;
        }
        let (kind, id) = match caller {
            Caller::Anonymous => return false,
            Caller::Service(id) => ("Service", id),
            Caller::Account(id) => ("AWS", id),
        };
        match self {
            Principal::Wildcard(_) => false,
            Principal::Typed(map) => map
                .get(kind)
                .map_or(false, |ids| ids.iter().any(|allowed| allowed == id)),
        }
    }
}

/// Identity making a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    /// Unauthenticated caller
    Anonymous,
    /// Service identity (e.g. the CDN)
    Service(String),
    /// Account or role identity
    Account(String),
}

/// A single policy statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    /// Statement ID (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,

    /// Effect of this statement
    pub effect: Effect,

    /// Principal this statement applies to (absent: the policy holder)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,

    /// Actions this statement applies to (supports wildcards)
    pub action: ValueList,

    /// Resources this statement applies to (supports wildcards)
    pub resource: ValueList,

    /// Optional conditions for when this statement applies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionBlock>,
}

impl Statement {
    /// Create a new statement without principal or conditions
    pub fn new(
        effect: Effect,
        action: impl Into<ValueList>,
        resource: impl Into<ValueList>,
    ) -> Self {
        Statement {
            sid: None,
            effect,
            principal: None,
            action: action.into(),
            resource: resource.into(),
            condition: None,
        }
    }

    /// Set the statement id
    pub fn with_sid(mut self, sid: impl Into<String>) -> Self {
        self.sid = Some(sid.into());
        self
    }

    /// Set the principal
    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    /// Set the condition block
    pub fn with_condition(mut self, condition: ConditionBlock) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Check if this statement applies to the given action and resource
    pub fn applies_to(&self, action: &str, resource: &str) -> bool {
        let action_matches = self
            .action
            .iter()
            .any(|pattern| PatternMatcher::matches_ignore_case(pattern, action));
        if !action_matches {
            return false;
        }

        self.resource
            .iter()
            .any(|pattern| PatternMatcher::matches(pattern, resource))
    }

    /// Actions outside the read-only set
    pub fn non_read_actions(&self) -> Vec<&str> {
        self.action
            .iter()
            .filter(|action| {
                !READ_ACTIONS
                    .iter()
                    .any(|read| read.eq_ignore_ascii_case(action))
            })
            .collect()
    }
}

/// Complete policy document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Policy {
    /// Policy format version
    pub version: String,

    /// List of policy statements
    pub statement: Vec<Statement>,
}

impl Policy {
    /// Create a new empty policy
    pub fn new() -> Self {
        Policy {
            version: POLICY_VERSION.to_string(),
            statement: Vec::new(),
        }
    }

    /// Add a statement to this policy
    pub fn add_statement(&mut self, statement: Statement) {
        self.statement.push(statement);
    }

    /// Parse policy from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize policy to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Validate policy structure
    pub fn validate(&self) -> Result<(), String> {
        if self.statement.is_empty() {
            return Err("Policy must have at least one statement".to_string());
        }

        for (i, stmt) in self.statement.iter().enumerate() {
            if stmt.action.is_empty() {
                return Err(format!("Statement {} has no actions", i));
            }
            if stmt.resource.is_empty() {
                return Err(format!("Statement {} has no resources", i));
            }
        }

        Ok(())
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::iam::ConditionOperator;

    #[test]
    fn test_policy_creation() {
        let mut policy = Policy::new();
        assert_eq!(policy.version, "2012-10-17");
        assert_eq!(policy.statement.len(), 0);

        policy.add_statement(Statement::new(
            Effect::Allow,
            "s3:GetObject",
            "arn:aws:s3:::site/*",
        ));
        assert_eq!(policy.statement.len(), 1);
    }

    #[test]
    fn test_policy_json_shape() {
        let mut block = ConditionBlock::new();
        block
            .entry(ConditionOperator::StringEquals)
            .or_default()
            .insert("AWS:SourceArn".to_string(), ValueList::from("E123ABC"));

        let mut policy = Policy::new();
        policy.add_statement(
            Statement::new(Effect::Allow, "s3:GetObject", "arn:aws:s3:::site/*")
                .with_sid("AllowCdnRead")
                .with_principal(Principal::service("cloudfront.amazonaws.com"))
                .with_condition(block),
        );

        let value: serde_json::Value = serde_json::from_str(&policy.to_json().unwrap()).unwrap();
        assert_eq!(value["Version"], "2012-10-17");
        let stmt = &value["Statement"][0];
        assert_eq!(stmt["Sid"], "AllowCdnRead");
        assert_eq!(stmt["Effect"], "Allow");
        assert_eq!(stmt["Principal"]["Service"], "cloudfront.amazonaws.com");
        assert_eq!(stmt["Action"], "s3:GetObject");
        assert_eq!(stmt["Resource"], "arn:aws:s3:::site/*");
        assert_eq!(stmt["Condition"]["StringEquals"]["AWS:SourceArn"], "E123ABC");

        let parsed = Policy::from_json(&policy.to_json().unwrap()).unwrap();
        assert_eq!(parsed, policy);
    }

    #[test]
    fn test_parse_list_forms() {
        let policy = Policy::from_json(
            r#"{
                "Version": "2012-10-17",
                "Statement": [{
                    "Effect": "Deny",
                    "Principal": "*",
                    "Action": ["s3:PutObject", "s3:DeleteObject"],
                    "Resource": ["arn:aws:s3:::site/*"]
                }]
            }"#,
        )
        .unwrap();

        let stmt = &policy.statement[0];
        assert!(stmt.principal.as_ref().unwrap().is_public());
        assert_eq!(stmt.action.iter().count(), 2);
        assert_eq!(stmt.non_read_actions(), vec!["s3:PutObject", "s3:DeleteObject"]);
    }

    #[test]
    fn test_policy_validation() {
        assert!(Policy::new().validate().is_err());

        let mut policy = Policy::new();
        policy.add_statement(Statement::new(
            Effect::Allow,
            ValueList::Many(Vec::new()),
            "arn:aws:s3:::site/*",
        ));
        assert!(policy.validate().is_err());

        let mut valid = Policy::new();
        valid.add_statement(Statement::new(Effect::Allow, "s3:GetObject", "arn:aws:s3:::site/*"));
        assert!(valid.validate().is_ok());
    }

    #[test]
    fn test_statement_applies_to() {
        let stmt = Statement::new(Effect::Allow, "s3:Get*", "arn:aws:s3:::site/*");

        assert!(stmt.applies_to("s3:GetObject", "arn:aws:s3:::site/index.html"));
        assert!(stmt.applies_to("S3:GETOBJECT", "arn:aws:s3:::site/index.html"));
        assert!(!stmt.applies_to("s3:PutObject", "arn:aws:s3:::site/index.html"));
        assert!(!stmt.applies_to("s3:GetObject", "arn:aws:s3:::other/index.html"));
    }

    #[test]
    fn test_principal_admits() {
        let cdn = Principal::service("cloudfront.amazonaws.com");
        assert!(cdn.admits(&Caller::Service("cloudfront.amazonaws.com".into())));
        assert!(!cdn.admits(&Caller::Service("lambda.amazonaws.com".into())));
        assert!(!cdn.admits(&Caller::Anonymous));
        assert!(!cdn.is_public());

        let public = Principal::Wildcard("*".to_string());
        assert!(public.admits(&Caller::Anonymous));

        let mut map = BTreeMap::new();
        map.insert("AWS".to_string(), ValueList::from("*"));
        assert!(Principal::Typed(map).is_public());
    }

    #[test]
    fn test_read_action_classification() {
        let read = Statement::new(
            Effect::Allow,
            ValueList::Many(vec!["s3:GetObject".into(), "s3:getobjectversion".into()]),
            "arn:aws:s3:::site/*",
        );
        assert!(read.non_read_actions().is_empty());

        let wildcard = Statement::new(Effect::Allow, "s3:*", "arn:aws:s3:::site/*");
        assert_eq!(wildcard.non_read_actions(), vec!["s3:*"]);
    }
}
