use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::engine::CheckContext;

/// Boxed future alias; conditions are type-erased so they can re-enter the
/// engine without producing an infinitely sized future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Error surfaced by a condition predicate whose own dependency failed
/// (e.g. the data-store lookup behind a membership test).
pub type ConditionError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Async membership predicate for one (resource type, role) pair.
///
/// The predicate receives a [`CheckContext`] carrying the running evaluation's
/// cycle guard; nested checks issued through it express hierarchical
/// resolution (e.g. a folder's `owner` role satisfied by `owner` on the
/// parent project). Implemented for any async closure of the same shape:
///
/// ```ignore
/// |cx: CheckContext, user_id: String, resource_id: String| async move {
///     let parent = store.parent_project(&resource_id).await?;
///     Ok(cx.check_role("project", "owner", &user_id, &parent).await?.allowed)
/// }
/// ```
pub trait Condition: Send + Sync + 'static {
    fn evaluate(
        &self,
        cx: CheckContext,
        user_id: String,
        resource_id: String,
    ) -> BoxFuture<'static, Result<bool, ConditionError>>;
}

impl<F, Fut> Condition for F
where
    F: Fn(CheckContext, String, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, ConditionError>> + Send + 'static,
{
    fn evaluate(
        &self,
        cx: CheckContext,
        user_id: String,
        resource_id: String,
    ) -> BoxFuture<'static, Result<bool, ConditionError>> {
        Box::pin((self)(cx, user_id, resource_id))
    }
}

/// The outcome of a `check` or `check_role` call. A denial is an ordinary
/// value, never an error; errors are reserved for evaluation faults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub allowed: bool,
    pub message: String,
    /// Matched role identifier, present when the caller asked for details.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub detail: Option<String>,
}

impl CheckResult {
    pub(crate) fn allow(message: String) -> Self {
        Self {
            allowed: true,
            message,
            detail: None,
        }
    }

    pub(crate) fn deny(message: String) -> Self {
        Self {
            allowed: false,
            message,
            detail: None,
        }
    }
}

/// Per-call options for [`crate::Engine::check_with`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CheckOptions {
    /// Emit a `tracing::debug!` event per evaluation step.
    #[serde(default)]
    pub debug: bool,
    /// Set [`CheckResult::detail`] to the matched role name.
    #[serde(default)]
    pub include_details: bool,
}

/// One named entry in a [`crate::Engine::check_many`] batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchCheckRequest {
    /// e.g. "user-1"
    pub user_id: String,
    /// e.g. "edit"
    pub action: String,
    /// e.g. "project"
    pub resource_type: String,
    /// e.g. "proj-123"
    pub resource_id: String,
    #[serde(default)]
    pub options: CheckOptions,
}

// ---------- Introspection views ----------

/// Read-only view of a registered resource type, for building permission
/// matrices in UIs.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceTypeInfo {
    pub name: String,
    pub actions: Vec<String>,
    pub roles: Vec<RoleInfo>,
}

/// Read-only view of a role: its name and the actions it grants.
#[derive(Debug, Clone, Serialize)]
pub struct RoleInfo {
    pub name: String,
    pub actions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_result_serialization() {
        let allow = CheckResult::allow("Action 'read' granted on project via role 'owner'".into());
        let json = serde_json::to_value(&allow).unwrap();
        assert_eq!(json["allowed"], true);
        // detail is omitted entirely when absent
        assert!(json.get("detail").is_none());

        let mut detailed = allow;
        detailed.detail = Some("owner".into());
        let json = serde_json::to_value(&detailed).unwrap();
        assert_eq!(json["detail"], "owner");
    }

    #[test]
    fn test_batch_request_defaults_options() {
        let req: BatchCheckRequest = serde_json::from_str(
            r#"{"user_id":"u1","action":"read","resource_type":"project","resource_id":"p1"}"#,
        )
        .unwrap();
        assert!(!req.options.debug);
        assert!(!req.options.include_details);
    }
}
