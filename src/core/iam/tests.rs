//! Integration tests for the policy engine

use super::*;
use serde_json::json;

const SITE: &str = "arn:aws:s3:::site";

fn cdn() -> Caller {
    Caller::Service("cloudfront.amazonaws.com".to_string())
}

fn distribution_arn(id: &str) -> String {
    format!("arn:aws:cloudfront::111122223333:distribution/{}", id)
}

#[test]
fn test_distribution_scoped_grant() {
    let policy: Policy = serde_json::from_value(json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Sid": "AllowCdnRead",
            "Effect": "Allow",
            "Principal": {"Service": "cloudfront.amazonaws.com"},
            "Action": "s3:GetObject",
            "Resource": "arn:aws:s3:::site/*",
            "Condition": {"StringEquals": {"AWS:SourceArn": distribution_arn("E123ABC")}}
        }]
    }))
    .unwrap();

    let engine = PolicyEngine::new();
    let resource = format!("{}/index.html", SITE);

    let bound = Request::new(cdn(), "s3:GetObject", resource.as_str())
        .with_context("AWS:SourceArn", distribution_arn("E123ABC"));
    assert!(engine.is_allowed(&policy, &bound));

    // Same service, different distribution
    let other = Request::new(cdn(), "s3:GetObject", resource.as_str())
        .with_context("AWS:SourceArn", distribution_arn("E999XYZ"));
    assert_eq!(engine.evaluate(&policy, &other), Decision::ImplicitDeny);

    // No distribution in the request context
    let bare = Request::new(cdn(), "s3:GetObject", resource.as_str());
    assert!(!engine.is_allowed(&policy, &bare));

    // Bound distribution, but a write
    let write = Request::new(cdn(), "s3:PutObject", resource.as_str())
        .with_context("AWS:SourceArn", distribution_arn("E123ABC"));
    assert!(!engine.is_allowed(&policy, &write));
}

#[test]
fn test_explicit_deny_overrides_conditioned_allow() {
    let policy: Policy = serde_json::from_value(json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Effect": "Allow",
                "Principal": {"Service": "cloudfront.amazonaws.com"},
                "Action": ["s3:GetObject"],
                "Resource": ["arn:aws:s3:::site/*"],
                "Condition": {
                    "StringLike": {"AWS:SourceArn": "arn:aws:cloudfront::*:distribution/*"}
                }
            },
            {
                "Effect": "Deny",
                "Principal": "*",
                "Action": "s3:*",
                "Resource": "arn:aws:s3:::site/*",
                "Condition": {"StringNotEquals": {"AWS:SourceArn": distribution_arn("E123ABC")}}
            }
        ]
    }))
    .unwrap();

    let engine = PolicyEngine::new();
    let resource = format!("{}/img/logo.png", SITE);

    let bound = Request::new(cdn(), "s3:GetObject", resource.as_str())
        .with_context("AWS:SourceArn", distribution_arn("E123ABC"));
    assert_eq!(engine.evaluate(&policy, &bound), Decision::Allow);

    let foreign = Request::new(cdn(), "s3:GetObject", resource.as_str())
        .with_context("AWS:SourceArn", distribution_arn("E777"));
    assert_eq!(engine.evaluate(&policy, &foreign), Decision::ExplicitDeny);

    // Missing key satisfies the negated operator, so the deny applies
    let anonymous = Request::new(Caller::Anonymous, "s3:GetObject", resource.as_str());
    assert_eq!(engine.evaluate(&policy, &anonymous), Decision::ExplicitDeny);
}

#[test]
fn test_prefix_scoped_resources() {
    let mut policy = Policy::new();
    policy.add_statement(
        Statement::new(Effect::Allow, "s3:GetObject", "arn:aws:s3:::site/www/*")
            .with_principal(Principal::service("cloudfront.amazonaws.com")),
    );

    let engine = PolicyEngine::new();
    assert!(engine.is_allowed(
        &policy,
        &Request::new(cdn(), "s3:GetObject", "arn:aws:s3:::site/www/a/b.css")
    ));
    assert!(!engine.is_allowed(
        &policy,
        &Request::new(cdn(), "s3:GetObject", "arn:aws:s3:::site/backup/db.sql")
    ));
}

#[test]
fn test_multiple_statements_and_actions() {
    let policy: Policy = serde_json::from_value(json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Effect": "Allow",
                "Action": ["s3:GetObject", "s3:ListBucket"],
                "Resource": "arn:aws:s3:::site/*"
            },
            {
                "Effect": "Allow",
                "Action": "s3:PutObject",
                "Resource": "arn:aws:s3:::site/uploads/*"
            }
        ]
    }))
    .unwrap();

    let engine = PolicyEngine::new();
    let ask = |action: &str, resource: &str| {
        engine.is_allowed(&policy, &Request::new(Caller::Anonymous, action, resource))
    };

    assert!(ask("s3:ListBucket", "arn:aws:s3:::site/x"));
    assert!(ask("s3:PutObject", "arn:aws:s3:::site/uploads/a.png"));
    assert!(!ask("s3:PutObject", "arn:aws:s3:::site/index.html"));
    assert!(!ask("s3:DeleteObject", "arn:aws:s3:::site/uploads/a.png"));
}

#[test]
fn test_empty_policy_denies() {
    let engine = PolicyEngine::new();
    let request = Request::new(cdn(), "s3:GetObject", "arn:aws:s3:::site/index.html");
    assert_eq!(engine.evaluate(&Policy::new(), &request), Decision::ImplicitDeny);
}
