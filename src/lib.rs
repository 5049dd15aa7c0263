//! syzygy: a relationship-aware, role-based authorization kernel.
//!
//! The engine answers one question: may this user perform this action on this
//! resource instance? A schema declares, per resource type, an action
//! vocabulary and an ordered list of roles; each role grants a subset of the
//! actions and carries an async condition predicate deciding membership.
//! Conditions may recurse into the engine through their [`CheckContext`],
//! which is how hierarchical resolution is expressed (a folder's `owner`
//! role satisfied by `owner` on the parent project). Decisions are memoized
//! in a TTL cache, with concurrent identical misses collapsed into a single
//! evaluation.
//!
//! The engine owns no storage and no transport: membership facts live behind
//! the caller's condition predicates, and callers receive plain
//! [`CheckResult`] values. Denials (including unknown resource types,
//! actions, and roles) are ordinary results; errors are reserved for
//! evaluation faults (a condition's own dependency failing, a cyclic policy),
//! which are never cached.
//!
//! ```
//! use syzygy::{CheckContext, ConditionError, SchemaBuilder};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), syzygy::EngineError> {
//! let engine = SchemaBuilder::new()
//!     .resource("project", ["read", "edit", "delete"])
//!     .role("owner", ["read", "edit", "delete"], |_cx: CheckContext, user: String, _res: String| async move {
//!         // in a real schema this queries the data store
//!         Ok::<_, ConditionError>(user == "alice")
//!     })
//!     .role("viewer", ["read"], |_cx: CheckContext, _user: String, _res: String| async move {
//!         Ok::<_, ConditionError>(false)
//!     })
//!     .build()?;
//!
//! let decision = engine.check("alice", "edit", "project", "proj-1").await?;
//! assert!(decision.allowed);
//!
//! let decision = engine.check("mallory", "edit", "project", "proj-1").await?;
//! assert!(!decision.allowed);
//! # Ok(())
//! # }
//! ```

pub mod builder;
mod cache;
pub mod engine;
pub mod errors;
pub mod manifest;
pub mod schema;
pub mod types;

pub use builder::{RoleHandle, SchemaBuilder};
pub use engine::{CheckContext, Engine, EngineConfig};
pub use errors::EngineError;
pub use manifest::{load_manifests, parse_manifest, Manifest};
pub use schema::{ResourceTypeDef, Role};
pub use types::{
    BatchCheckRequest, BoxFuture, CheckOptions, CheckResult, Condition, ConditionError,
    ResourceTypeInfo, RoleInfo,
};
