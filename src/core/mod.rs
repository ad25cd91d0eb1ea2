//! Publishing engine
//!
//! Components, leaf-first:
//!
//! - [`scan`] - enumerate a local tree into ordered relative paths
//! - [`content_type`] - extension to MIME type resolution
//! - [`asset`] - read, fingerprint and resolve files in parallel
//! - [`plan`] - fingerprint diff of local assets against remote objects
//! - [`binder`] - distribution-scoped read grant with CAS policy writes
//! - [`routing`] - error status to fallback document table
//! - [`orchestrator`] - the publish state machine
//!
//! Supporting modules: [`backend`] (storage and CDN collaborators),
//! [`iam`] (policy documents and evaluation), [`pool`], [`retry`],
//! [`target`], [`validation`] and [`config`].

pub mod asset;
pub mod backend;
pub mod binder;
pub mod config;
pub mod content_type;
pub mod iam;
pub mod orchestrator;
pub mod plan;
pub mod pool;
pub mod retry;
pub mod routing;
pub mod scan;
pub mod target;
pub mod validation;
