use miette::Diagnostic;
use thiserror::Error;

use crate::types::ConditionError;

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("Role `{role}` on resource type `{resource_type}` grants undeclared action `{action}`")]
    #[diagnostic(
        code(syzygy::schema::undeclared_action),
        help("Every action a role grants must appear in its resource type's action list")
    )]
    UndeclaredAction {
        resource_type: String,
        role: String,
        action: String,
    },

    #[error("Duplicate role `{role}` on resource type `{resource_type}`")]
    #[diagnostic(
        code(syzygy::schema::duplicate_role),
        help("Role names must be unique within a resource type")
    )]
    DuplicateRole {
        resource_type: String,
        role: String,
    },

    #[error("Duplicate action `{action}` on resource type `{resource_type}`")]
    #[diagnostic(code(syzygy::schema::duplicate_action))]
    DuplicateAction {
        resource_type: String,
        action: String,
    },

    #[error("Role `{role}` on resource type `{resource_type}` grants no actions")]
    #[diagnostic(
        code(syzygy::schema::empty_role),
        help("A role must grant at least one of its resource type's declared actions")
    )]
    EmptyRole {
        resource_type: String,
        role: String,
    },

    #[error("Cannot register `{resource_type}`: the schema is frozen once a check has been served")]
    #[diagnostic(
        code(syzygy::schema::frozen),
        help("Register every resource type during startup wiring, before the first check")
    )]
    SchemaFrozen { resource_type: String },

    #[error("Unknown resource type `{0}`")]
    #[diagnostic(code(syzygy::schema::unknown_resource_type))]
    UnknownResourceType(String),

    #[error("Unknown role `{role}` on resource type `{resource_type}`")]
    #[diagnostic(code(syzygy::schema::unknown_role))]
    UnknownRole {
        resource_type: String,
        role: String,
    },

    #[error("No condition bound for declared role `{role}` on `{resource_type}`")]
    #[diagnostic(
        code(syzygy::builder::missing_condition),
        help("Bind one condition per manifest-declared role with SchemaBuilder::bind")
    )]
    MissingCondition {
        resource_type: String,
        role: String,
    },

    #[error("Condition bound for `{role}` on `{resource_type}`, but no such role is declared")]
    #[diagnostic(
        code(syzygy::builder::unknown_binding),
        help("Bindings must target a role declared in the builder or the manifest")
    )]
    UnknownBinding {
        resource_type: String,
        role: String,
    },

    #[error("Failed to load schema manifest `{path}`")]
    #[diagnostic(
        code(syzygy::manifest::load),
        help("Check that the file exists and contains valid KDL syntax")
    )]
    ManifestLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid schema manifest: {0}")]
    #[diagnostic(
        code(syzygy::manifest::invalid),
        help("A manifest contains `resource` nodes with `actions` and `role` children")
    )]
    InvalidManifest(String),

    #[error("KDL parse error: {0}")]
    #[diagnostic(
        code(syzygy::manifest::kdl_parse),
        help("Check your KDL file syntax; see https://kdl.dev for the specification")
    )]
    KdlParse(String),

    #[error("Condition predicate failed: {source}")]
    #[diagnostic(
        code(syzygy::eval::condition),
        help("The condition's own dependency failed; the result was not cached and the check may be retried")
    )]
    Condition {
        #[source]
        source: ConditionError,
    },

    #[error("Cyclic policy detected at {path}")]
    #[diagnostic(
        code(syzygy::eval::cyclic_policy),
        help("Two or more role conditions re-enter the engine with the same key; break the cycle in the schema")
    )]
    CyclicPolicy { path: String },

    #[error("Policy recursion exceeded max depth {max_depth}")]
    #[diagnostic(code(syzygy::eval::depth_limit))]
    DepthLimitExceeded { max_depth: usize },

    #[error("I/O error: {0}")]
    #[diagnostic(code(syzygy::io))]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// True for faults raised while evaluating a condition, as opposed to
    /// configuration faults raised at registration or build time. Evaluation
    /// faults are never written to the decision cache.
    pub fn is_evaluation_fault(&self) -> bool {
        matches!(
            self,
            EngineError::Condition { .. }
                | EngineError::CyclicPolicy { .. }
                | EngineError::DepthLimitExceeded { .. }
        )
    }
}
