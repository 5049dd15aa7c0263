//! TTL memo of terminal decisions, plus a single-flight map collapsing
//! concurrent identical misses into one condition evaluation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::debug;

use crate::types::CheckResult;

/// Deterministic key for one decision. The operation kind is part of the key
/// so `check` and `check_role` results never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum CacheKey {
    Check {
        user_id: String,
        action: String,
        resource_type: String,
        resource_id: String,
    },
    Role {
        resource_type: String,
        role: String,
        user_id: String,
        resource_id: String,
    },
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Check {
                user_id,
                action,
                resource_type,
                resource_id,
            } => write!(f, "check:{user_id}:{action}:{resource_type}:{resource_id}"),
            CacheKey::Role {
                resource_type,
                role,
                user_id,
                resource_id,
            } => write!(f, "checkRole:{resource_type}:{role}:{user_id}:{resource_id}"),
        }
    }
}

struct CacheEntry {
    result: CheckResult,
    expires_at: Instant,
}

pub(crate) struct ResultCache {
    enabled: bool,
    ttl: Duration,
    entries: DashMap<CacheKey, CacheEntry>,
    inflight: DashMap<CacheKey, Arc<OnceCell<CheckResult>>>,
}

impl ResultCache {
    pub fn new(enabled: bool, ttl: Duration) -> Self {
        Self {
            enabled,
            ttl,
            entries: DashMap::new(),
            inflight: DashMap::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Expired entries count as misses and are dropped on read; the periodic
    /// sweep handles keys nobody asks for again.
    pub fn get(&self, key: &CacheKey) -> Option<CheckResult> {
        if !self.enabled {
            return None;
        }
        let hit = {
            let entry = self.entries.get(key)?;
            if entry.expires_at <= Instant::now() {
                None
            } else {
                Some(entry.result.clone())
            }
        };
        if hit.is_none() {
            debug!(key = %key, "decision cache entry expired");
            self.entries.remove(key);
        }
        hit
    }

    pub fn insert(&self, key: CacheKey, result: &CheckResult) {
        if !self.enabled {
            return;
        }
        self.entries.insert(
            key,
            CacheEntry {
                result: result.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Remove every expired entry; returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Cell shared by every in-flight evaluation of `key`. The first caller
    /// runs the evaluation; the rest await its result.
    pub fn join_inflight(&self, key: &CacheKey) -> Arc<OnceCell<CheckResult>> {
        self.inflight.entry(key.clone()).or_default().clone()
    }

    pub fn leave_inflight(&self, key: &CacheKey) {
        self.inflight.remove(key);
    }
}
