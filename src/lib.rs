//! # sitebinder - Static Asset Publisher & Access-Binder
//!
//! `sitebinder` publishes a local static-site tree into object storage and
//! binds read access on that storage to exactly one CDN distribution:
//!
//! - **Deterministic scanning** with symlink-cycle detection and ignore rules
//! - **Fingerprint diffing**: SHA-256 content digests, never timestamps or sizes
//! - **Bounded parallel uploads** with throttle backoff and cancellation
//! - **Trust binding**: a read-only policy conditioned on the distribution
//!   identifier, written with compare-and-swap after a public-access precheck
//! - **Error routing** of 4xx statuses to a fallback document
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sitebinder::core::backend::{MemoryCdn, MemoryStorage};
//! use sitebinder::{ErrorRoute, Publisher, StorageTarget};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = Arc::new(MemoryStorage::new());
//! let distribution = "arn:aws:cloudfront::123456789012:distribution/E123ABC";
//! let cdn = Arc::new(MemoryCdn::new(distribution));
//! let publisher = Publisher::new(storage, cdn);
//!
//! // The default `AWS:SourceArn` condition compares against the full ARN
//! let target = StorageTarget::new("arn:aws:s3:::my-site")?;
//! let result = publisher.publish(
//!     "public",
//!     &target,
//!     distribution,
//!     &[ErrorRoute::new(404, "error.html", 404)],
//! )?;
//!
//! println!("{:?} (created, updated, skipped)", result.counts());
//! # Ok(())
//! # }
//! ```
//!
//! ## Dry runs and pruning
//!
//! ```rust,no_run
//! use sitebinder::core::backend::{MemoryCdn, MemoryStorage};
//! use sitebinder::{Publisher, StorageTarget};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let publisher = Publisher::new(Arc::new(MemoryStorage::new()), Arc::new(MemoryCdn::new("E1")));
//! let target = StorageTarget::new("arn:aws:s3:::my-site")?.with_prefix("www")?;
//!
//! let plan = publisher.plan("public", &target)?;
//! // Remote objects without a local file are only ever reported...
//! for candidate in plan.prune_candidates() {
//!     println!("orphan: {}", candidate.key());
//! }
//! // ...until deleted explicitly
//! publisher.prune(&target, plan.prune_candidates())?;
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod error;

pub use crate::core::{
    asset::{Asset, AssetSet, Fingerprint},
    backend::{CdnService, ObjectStorage, PublicAccessBlock, RemoteObject},
    binder::{AccessBinder, AccessGrant, BinderConfig},
    config::PublisherConfig,
    content_type::ContentTypeResolver,
    orchestrator::{
        InvalidationWarning, ObjectOutcome, ObjectReport, PublishFailure, PublishResult,
        PublishState, Publisher,
    },
    plan::{ObjectSyncPlanner, PruneCandidate, SyncAction, SyncPlan},
    pool::CancellationToken,
    routing::{ErrorRoute, ErrorRoutingTable},
    scan::FileSetScanner,
    target::StorageTarget,
};
pub use crate::error::{PublishError, Result};
