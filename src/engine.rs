//! Decision engine: resolves (user, action, resource type, resource id)
//! against the registered schema, evaluating role conditions in declared
//! order with first-match-wins semantics.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::RwLock;
use tracing::debug;

use crate::cache::{CacheKey, ResultCache};
use crate::errors::EngineError;
use crate::schema::{ResourceTypeDef, Schema};
use crate::types::{
    BatchCheckRequest, CheckOptions, CheckResult, Condition, ResourceTypeInfo, RoleInfo,
};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Memoize terminal decisions (allow, deny, unknown-name denials).
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    /// Cadence of the background expired-key sweep (see [`Engine::spawn_sweeper`]).
    pub sweep_interval: Duration,
    /// Bound on nested checks issued by conditions through [`CheckContext`].
    pub max_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
            max_depth: 10,
        }
    }
}

/// The decision engine. Cheap to clone; every clone shares one schema and one
/// decision cache. Construct once at process start and hand clones to
/// consumers instead of keeping a process-wide global.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

struct EngineInner {
    schema: RwLock<Schema>,
    /// Set once the first check has been served; registration then fails.
    frozen: AtomicBool,
    cache: ResultCache,
    config: EngineConfig,
}

/// Recursion guard threaded through nested checks: the set of keys currently
/// being evaluated on this call path, and how deep the path is.
#[derive(Clone)]
struct EvalState {
    visited: Arc<HashSet<CacheKey>>,
    depth: usize,
    max_depth: usize,
}

impl EvalState {
    fn root(max_depth: usize) -> Self {
        Self {
            visited: Arc::new(HashSet::new()),
            depth: 0,
            max_depth,
        }
    }

    /// Fail fast on a repeated key (cyclic policy) or an exhausted depth
    /// budget; otherwise extend the path with `key`.
    fn enter(&self, key: &CacheKey) -> Result<EvalState, EngineError> {
        if self.depth >= self.max_depth {
            return Err(EngineError::DepthLimitExceeded {
                max_depth: self.max_depth,
            });
        }
        if self.visited.contains(key) {
            return Err(EngineError::CyclicPolicy {
                path: key.to_string(),
            });
        }
        let mut visited = (*self.visited).clone();
        visited.insert(key.clone());
        Ok(EvalState {
            visited: Arc::new(visited),
            depth: self.depth + 1,
            max_depth: self.max_depth,
        })
    }
}

/// Handed to every condition predicate. Checks issued through it recurse into
/// the engine while carrying the running evaluation's cycle guard, which is
/// how hierarchical resolution (folder owner via project owner) stays safe.
#[derive(Clone)]
pub struct CheckContext {
    engine: Engine,
    state: EvalState,
}

impl CheckContext {
    pub async fn check(
        &self,
        user_id: &str,
        action: &str,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<CheckResult, EngineError> {
        self.engine
            .check_inner(
                user_id,
                action,
                resource_type,
                resource_id,
                CheckOptions::default(),
                &self.state,
            )
            .await
    }

    pub async fn check_role(
        &self,
        resource_type: &str,
        role: &str,
        user_id: &str,
        resource_id: &str,
    ) -> Result<CheckResult, EngineError> {
        self.engine
            .check_role_inner(resource_type, role, user_id, resource_id, &self.state)
            .await
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                schema: RwLock::new(Schema::default()),
                frozen: AtomicBool::new(false),
                cache: ResultCache::new(config.cache_enabled, config.cache_ttl),
                config,
            }),
        }
    }

    /// Validate and register a resource type. Replacing a prior registration
    /// is allowed until the engine serves its first check; afterwards the
    /// schema is frozen.
    pub fn register_resource_type(&self, def: ResourceTypeDef) -> Result<(), EngineError> {
        if self.inner.frozen.load(Ordering::Acquire) {
            return Err(EngineError::SchemaFrozen {
                resource_type: def.name,
            });
        }
        self.inner.schema.write().register(def)
    }

    pub fn list_resource_types(&self) -> Vec<ResourceTypeInfo> {
        self.inner.schema.read().list()
    }

    pub fn list_roles(&self, resource_type: &str) -> Result<Vec<RoleInfo>, EngineError> {
        self.inner.schema.read().roles(resource_type)
    }

    /// Primary decision API: may `user_id` perform `action` on the given
    /// resource instance? Unknown names yield denials, never errors.
    pub async fn check(
        &self,
        user_id: &str,
        action: &str,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<CheckResult, EngineError> {
        self.check_with(user_id, action, resource_type, resource_id, CheckOptions::default())
            .await
    }

    pub async fn check_with(
        &self,
        user_id: &str,
        action: &str,
        resource_type: &str,
        resource_id: &str,
        options: CheckOptions,
    ) -> Result<CheckResult, EngineError> {
        self.inner.frozen.store(true, Ordering::Release);
        let state = EvalState::root(self.inner.config.max_depth);
        self.check_inner(user_id, action, resource_type, resource_id, options, &state)
            .await
    }

    /// Direct role-membership test, bypassing action resolution.
    pub async fn check_role(
        &self,
        resource_type: &str,
        role: &str,
        user_id: &str,
        resource_id: &str,
    ) -> Result<CheckResult, EngineError> {
        self.inner.frozen.store(true, Ordering::Release);
        let state = EvalState::root(self.inner.config.max_depth);
        self.check_role_inner(resource_type, role, user_id, resource_id, &state)
            .await
    }

    /// Evaluate a map of named check requests concurrently. One faulting
    /// entry does not mask the others' decisions.
    pub async fn check_many(
        &self,
        requests: HashMap<String, BatchCheckRequest>,
    ) -> HashMap<String, Result<CheckResult, EngineError>> {
        let futures = requests.into_iter().map(|(name, req)| async move {
            let result = self
                .check_with(
                    &req.user_id,
                    &req.action,
                    &req.resource_type,
                    &req.resource_id,
                    req.options,
                )
                .await;
            (name, result)
        });
        join_all(futures).await.into_iter().collect()
    }

    /// Drop expired cache entries now; returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        self.inner.cache.sweep()
    }

    /// Spawn the periodic expired-key sweep. Must be called from within a
    /// tokio runtime; the task runs until the returned handle is aborted.
    pub fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let engine = self.clone();
        let period = self.inner.config.sweep_interval;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // first tick completes immediately
            tick.tick().await;
            loop {
                tick.tick().await;
                let dropped = engine.sweep_expired();
                if dropped > 0 {
                    debug!(dropped, "swept expired decision cache entries");
                }
            }
        })
    }

    async fn check_inner(
        &self,
        user_id: &str,
        action: &str,
        resource_type: &str,
        resource_id: &str,
        options: CheckOptions,
        state: &EvalState,
    ) -> Result<CheckResult, EngineError> {
        let key = CacheKey::Check {
            user_id: user_id.to_string(),
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
        };

        if let Some(hit) = self.inner.cache.get(&key) {
            if options.debug {
                debug!(key = %key, allowed = hit.allowed, "decision cache hit");
            }
            return Ok(hit);
        }

        // The cycle guard must run before joining the in-flight map, or a
        // self-recursive policy would await its own evaluation forever.
        let entered = state.enter(&key)?;

        if !self.inner.cache.enabled() {
            return self
                .evaluate_check(user_id, action, resource_type, resource_id, options, &entered)
                .await;
        }

        let cell = self.inner.cache.join_inflight(&key);
        let outcome = cell
            .get_or_try_init(|| async {
                let result = self
                    .evaluate_check(user_id, action, resource_type, resource_id, options, &entered)
                    .await?;
                self.inner.cache.insert(key.clone(), &result);
                Ok::<_, EngineError>(result)
            })
            .await
            .map(CheckResult::clone);
        self.inner.cache.leave_inflight(&key);
        outcome
    }

    async fn evaluate_check(
        &self,
        user_id: &str,
        action: &str,
        resource_type: &str,
        resource_id: &str,
        options: CheckOptions,
        state: &EvalState,
    ) -> Result<CheckResult, EngineError> {
        // Copy candidates out so no schema lock is held across an await.
        let candidates: Vec<(String, Arc<dyn Condition>)> = {
            let schema = self.inner.schema.read();
            let Some(def) = schema.resource_type(resource_type) else {
                return Ok(CheckResult::deny(format!(
                    "Unknown resource type `{resource_type}`"
                )));
            };
            if !def.has_action(action) {
                return Ok(CheckResult::deny(format!(
                    "Action '{action}' is not declared on {resource_type}"
                )));
            }
            def.roles
                .iter()
                .filter(|r| r.grants(action))
                .map(|r| (r.name.clone(), r.condition.clone()))
                .collect()
        };

        for (role_name, condition) in candidates {
            if options.debug {
                debug!(
                    user_id,
                    action,
                    resource_type,
                    resource_id,
                    role = %role_name,
                    depth = state.depth,
                    "evaluating role condition"
                );
            }
            let cx = CheckContext {
                engine: self.clone(),
                state: state.clone(),
            };
            let held = condition
                .evaluate(cx, user_id.to_string(), resource_id.to_string())
                .await
                .map_err(|source| EngineError::Condition { source })?;
            if held {
                let mut result = CheckResult::allow(format!(
                    "Action '{action}' granted on {resource_type} via role '{role_name}'"
                ));
                if options.include_details {
                    result.detail = Some(role_name);
                }
                return Ok(result);
            }
        }

        Ok(CheckResult::deny(format!(
            "Action '{action}' denied on {resource_type}"
        )))
    }

    async fn check_role_inner(
        &self,
        resource_type: &str,
        role: &str,
        user_id: &str,
        resource_id: &str,
        state: &EvalState,
    ) -> Result<CheckResult, EngineError> {
        let key = CacheKey::Role {
            resource_type: resource_type.to_string(),
            role: role.to_string(),
            user_id: user_id.to_string(),
            resource_id: resource_id.to_string(),
        };

        if let Some(hit) = self.inner.cache.get(&key) {
            return Ok(hit);
        }

        let entered = state.enter(&key)?;

        if !self.inner.cache.enabled() {
            return self
                .evaluate_role(resource_type, role, user_id, resource_id, &entered)
                .await;
        }

        let cell = self.inner.cache.join_inflight(&key);
        let outcome = cell
            .get_or_try_init(|| async {
                let result = self
                    .evaluate_role(resource_type, role, user_id, resource_id, &entered)
                    .await?;
                self.inner.cache.insert(key.clone(), &result);
                Ok::<_, EngineError>(result)
            })
            .await
            .map(CheckResult::clone);
        self.inner.cache.leave_inflight(&key);
        outcome
    }

    async fn evaluate_role(
        &self,
        resource_type: &str,
        role: &str,
        user_id: &str,
        resource_id: &str,
        state: &EvalState,
    ) -> Result<CheckResult, EngineError> {
        let condition: Arc<dyn Condition> = {
            let schema = self.inner.schema.read();
            let Some(def) = schema.resource_type(resource_type) else {
                return Ok(CheckResult::deny(format!(
                    "Unknown resource type `{resource_type}`"
                )));
            };
            let Some(found) = def.find_role(role) else {
                return Ok(CheckResult::deny(format!(
                    "Unknown role `{role}` on resource type `{resource_type}`"
                )));
            };
            found.condition.clone()
        };

        let cx = CheckContext {
            engine: self.clone(),
            state: state.clone(),
        };
        let held = condition
            .evaluate(cx, user_id.to_string(), resource_id.to_string())
            .await
            .map_err(|source| EngineError::Condition { source })?;

        Ok(if held {
            CheckResult::allow(format!("Role '{role}' held on {resource_type}"))
        } else {
            CheckResult::deny(format!("Role '{role}' not held on {resource_type}"))
        })
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
