//! Schema model: per resource type, the declared action vocabulary and the
//! ordered role list. All consistency invariants are enforced here, at
//! registration time, so a check can never trip over a malformed schema.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::errors::EngineError;
use crate::types::{Condition, ResourceTypeInfo, RoleInfo};

/// A named bundle of actions plus the predicate deciding membership.
pub struct Role {
    pub name: String,
    /// Non-empty subset of the owning resource type's actions.
    pub actions: Vec<String>,
    pub condition: Arc<dyn Condition>,
}

impl Role {
    pub fn new<S, I, A>(name: S, actions: I, condition: impl Condition) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self {
            name: name.into(),
            actions: actions.into_iter().map(Into::into).collect(),
            condition: Arc::new(condition),
        }
    }

    pub fn grants(&self, action: &str) -> bool {
        self.actions.iter().any(|a| a == action)
    }
}

impl fmt::Debug for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Role")
            .field("name", &self.name)
            .field("actions", &self.actions)
            .finish_non_exhaustive()
    }
}

/// One resource type: its action vocabulary and its roles in evaluation order.
#[derive(Debug)]
pub struct ResourceTypeDef {
    pub name: String,
    pub actions: Vec<String>,
    /// Order is significant: `check` evaluates candidates first to last and
    /// stops at the first condition that holds.
    pub roles: Vec<Role>,
}

impl ResourceTypeDef {
    pub fn new<S, I, A>(name: S, actions: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self {
            name: name.into(),
            actions: actions.into_iter().map(Into::into).collect(),
            roles: Vec::new(),
        }
    }

    /// Append a role; evaluation order follows declaration order.
    pub fn role<S, I, A>(mut self, name: S, actions: I, condition: impl Condition) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.roles.push(Role::new(name, actions, condition));
        self
    }

    pub fn has_action(&self, action: &str) -> bool {
        self.actions.iter().any(|a| a == action)
    }

    pub fn find_role(&self, name: &str) -> Option<&Role> {
        self.roles.iter().find(|r| r.name == name)
    }

    fn validate(&self) -> Result<(), EngineError> {
        for (i, action) in self.actions.iter().enumerate() {
            if self.actions[..i].contains(action) {
                return Err(EngineError::DuplicateAction {
                    resource_type: self.name.clone(),
                    action: action.clone(),
                });
            }
        }

        for (i, role) in self.roles.iter().enumerate() {
            if self.roles[..i].iter().any(|r| r.name == role.name) {
                return Err(EngineError::DuplicateRole {
                    resource_type: self.name.clone(),
                    role: role.name.clone(),
                });
            }
            if role.actions.is_empty() {
                return Err(EngineError::EmptyRole {
                    resource_type: self.name.clone(),
                    role: role.name.clone(),
                });
            }
            for action in &role.actions {
                if !self.has_action(action) {
                    return Err(EngineError::UndeclaredAction {
                        resource_type: self.name.clone(),
                        role: role.name.clone(),
                        action: action.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn info(&self) -> ResourceTypeInfo {
        ResourceTypeInfo {
            name: self.name.clone(),
            actions: self.actions.clone(),
            roles: self
                .roles
                .iter()
                .map(|r| RoleInfo {
                    name: r.name.clone(),
                    actions: r.actions.clone(),
                })
                .collect(),
        }
    }
}

/// All registered resource types, registration order preserved for
/// introspection.
#[derive(Debug, Default)]
pub struct Schema {
    types: Vec<ResourceTypeDef>,
    index: HashMap<String, usize>,
}

impl Schema {
    /// Validate and register a resource type. Re-registering a name replaces
    /// the prior definition; the engine forbids this after its first check.
    pub fn register(&mut self, def: ResourceTypeDef) -> Result<(), EngineError> {
        def.validate()?;
        match self.index.get(&def.name) {
            Some(&slot) => {
                tracing::debug!(resource_type = %def.name, "replacing resource type registration");
                self.types[slot] = def;
            }
            None => {
                self.index.insert(def.name.clone(), self.types.len());
                self.types.push(def);
            }
        }
        Ok(())
    }

    pub fn resource_type(&self, name: &str) -> Option<&ResourceTypeDef> {
        self.index.get(name).map(|&slot| &self.types[slot])
    }

    pub fn list(&self) -> Vec<ResourceTypeInfo> {
        self.types.iter().map(ResourceTypeDef::info).collect()
    }

    pub fn roles(&self, resource_type: &str) -> Result<Vec<RoleInfo>, EngineError> {
        let def = self
            .resource_type(resource_type)
            .ok_or_else(|| EngineError::UnknownResourceType(resource_type.to_string()))?;
        Ok(def.info().roles)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
