//! Fluent schema construction. The builder makes the schema's consistency
//! invariants checkable before the engine ever serves a decision: in the
//! fluent path a role carries its condition at declaration, and in the
//! manifest path `build` refuses to finish while any declared role is
//! missing a condition or any binding targets an undeclared role.

use std::sync::Arc;

use tracing::info;

use crate::engine::{Engine, EngineConfig};
use crate::errors::EngineError;
use crate::manifest::Manifest;
use crate::schema::{ResourceTypeDef, Role};
use crate::types::{CheckResult, Condition};

struct PendingRole {
    name: String,
    actions: Vec<String>,
    condition: Option<Arc<dyn Condition>>,
}

struct PendingResource {
    name: String,
    actions: Vec<String>,
    roles: Vec<PendingRole>,
}

pub struct SchemaBuilder {
    config: EngineConfig,
    resources: Vec<PendingResource>,
    /// First wiring mistake hit while chaining; reported at `build`.
    deferred: Option<EngineError>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            resources: Vec::new(),
            deferred: None,
        }
    }

    /// Pre-load resource type and role declarations from a manifest; every
    /// declared role must then be bound to a condition with [`Self::bind`].
    pub fn from_manifest(manifest: &Manifest) -> Self {
        let mut builder = Self::new();
        for resource in &manifest.resources {
            builder.resources.push(PendingResource {
                name: resource.name.clone(),
                actions: resource.actions.clone(),
                roles: resource
                    .roles
                    .iter()
                    .map(|role| PendingRole {
                        name: role.name.clone(),
                        actions: role.actions.clone(),
                        condition: None,
                    })
                    .collect(),
            });
        }
        builder
    }

    /// Declare a resource type and make it current for subsequent [`Self::role`]
    /// calls.
    pub fn resource<S, I, A>(mut self, name: S, actions: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.resources.push(PendingResource {
            name: name.into(),
            actions: actions.into_iter().map(Into::into).collect(),
            roles: Vec::new(),
        });
        self
    }

    /// Declare a role (with its condition) on the current resource type.
    /// Declaration order is evaluation order.
    pub fn role<S, I, A>(mut self, name: S, actions: I, condition: impl Condition) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        let name = name.into();
        match self.resources.last_mut() {
            Some(resource) => resource.roles.push(PendingRole {
                name,
                actions: actions.into_iter().map(Into::into).collect(),
                condition: Some(Arc::new(condition)),
            }),
            None => {
                if self.deferred.is_none() {
                    self.deferred = Some(EngineError::UnknownBinding {
                        resource_type: "<none>".into(),
                        role: name,
                    });
                }
            }
        }
        self
    }

    /// Bind a condition to a role declared in the manifest (or earlier in the
    /// chain). Binding an undeclared role is a build error.
    pub fn bind(
        mut self,
        resource_type: &str,
        role: &str,
        condition: impl Condition,
    ) -> Self {
        let slot = self
            .resources
            .iter_mut()
            .find(|r| r.name == resource_type)
            .and_then(|r| r.roles.iter_mut().find(|p| p.name == role));
        match slot {
            Some(pending) => pending.condition = Some(Arc::new(condition)),
            None => {
                if self.deferred.is_none() {
                    self.deferred = Some(EngineError::UnknownBinding {
                        resource_type: resource_type.to_string(),
                        role: role.to_string(),
                    });
                }
            }
        }
        self
    }

    /// Validate everything and produce a ready engine.
    pub fn build(self) -> Result<Engine, EngineError> {
        if let Some(err) = self.deferred {
            return Err(err);
        }

        let engine = Engine::with_config(self.config);
        let mut role_count = 0;
        let resource_count = self.resources.len();

        for resource in self.resources {
            let mut def = ResourceTypeDef::new(resource.name.clone(), resource.actions);
            for pending in resource.roles {
                let condition = pending.condition.ok_or_else(|| {
                    EngineError::MissingCondition {
                        resource_type: resource.name.clone(),
                        role: pending.name.clone(),
                    }
                })?;
                def.roles.push(Role {
                    name: pending.name,
                    actions: pending.actions,
                    condition,
                });
                role_count += 1;
            }
            engine.register_resource_type(def)?;
        }

        info!(
            resource_types = resource_count,
            roles = role_count,
            "Compiled authorization schema"
        );
        Ok(engine)
    }
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Typed proxy over [`Engine::check_role`] for a (resource type, role) pair
/// validated once at creation. Holds no state beyond the names.
#[derive(Clone, Debug)]
pub struct RoleHandle {
    engine: Engine,
    resource_type: String,
    role: String,
}

impl RoleHandle {
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub async fn check(
        &self,
        user_id: &str,
        resource_id: &str,
    ) -> Result<CheckResult, EngineError> {
        self.engine
            .check_role(&self.resource_type, &self.role, user_id, resource_id)
            .await
    }
}

impl Engine {
    /// Validate a (resource type, role) pair once and return a handle for
    /// issuing membership checks without re-stating the names.
    pub fn role_handle(&self, resource_type: &str, role: &str) -> Result<RoleHandle, EngineError> {
        let roles = self.list_roles(resource_type)?;
        if !roles.iter().any(|r| r.name == role) {
            return Err(EngineError::UnknownRole {
                resource_type: resource_type.to_string(),
                role: role.to_string(),
            });
        }
        Ok(RoleHandle {
            engine: self.clone(),
            resource_type: resource_type.to_string(),
            role: role.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::CheckContext;
    use crate::manifest::parse_manifest;
    use crate::types::ConditionError;

    fn always(held: bool) -> impl Condition {
        move |_cx: CheckContext, _user: String, _res: String| async move {
            Ok::<_, ConditionError>(held)
        }
    }

    #[tokio::test]
    async fn test_fluent_build_and_check() {
        let engine = SchemaBuilder::new()
            .resource("project", ["read", "edit"])
            .role("owner", ["read", "edit"], always(true))
            .resource("file", ["read"])
            .role("viewer", ["read"], always(false))
            .build()
            .unwrap();

        assert_eq!(engine.list_resource_types().len(), 2);
        assert!(engine.check("u1", "edit", "project", "p1").await.unwrap().allowed);
        assert!(!engine.check("u1", "read", "file", "f1").await.unwrap().allowed);
    }

    #[test]
    fn test_role_without_resource_is_a_build_error() {
        let err = SchemaBuilder::new()
            .role("orphan", ["read"], always(true))
            .build()
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownBinding { .. }));
    }

    #[test]
    fn test_builder_surfaces_schema_violations() {
        let err = SchemaBuilder::new()
            .resource("project", ["read", "edit"])
            .role("viewer", ["peek"], always(true))
            .build()
            .unwrap_err();
        assert!(matches!(err, EngineError::UndeclaredAction { .. }));
    }

    #[tokio::test]
    async fn test_manifest_roles_must_all_be_bound() {
        let manifest = parse_manifest(
            r#"
resource "project" {
    actions {
        - "read"
        - "edit"
    }
    role "owner" {
        actions {
            - "read"
            - "edit"
        }
    }
    role "viewer" {
        actions {
            - "read"
        }
    }
}
"#,
        )
        .unwrap();

        let err = SchemaBuilder::from_manifest(&manifest)
            .bind("project", "owner", always(true))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::MissingCondition { ref role, .. } if role == "viewer"
        ));

        let engine = SchemaBuilder::from_manifest(&manifest)
            .bind("project", "owner", always(true))
            .bind("project", "viewer", always(false))
            .build()
            .unwrap();
        assert!(engine.check("u1", "edit", "project", "p1").await.unwrap().allowed);
    }

    #[test]
    fn test_binding_undeclared_role_is_an_error() {
        let manifest = parse_manifest(
            r#"
resource "project" {
    actions {
        - "read"
    }
    role "viewer" {
        actions {
            - "read"
        }
    }
}
"#,
        )
        .unwrap();

        let err = SchemaBuilder::from_manifest(&manifest)
            .bind("project", "viewer", always(true))
            .bind("project", "ghost", always(true))
            .build()
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownBinding { .. }));
    }

    #[tokio::test]
    async fn test_role_handle_validated_once() {
        let engine = SchemaBuilder::new()
            .resource("project", ["read"])
            .role("viewer", ["read"], always(true))
            .build()
            .unwrap();

        let handle = engine.role_handle("project", "viewer").unwrap();
        assert_eq!(handle.resource_type(), "project");
        assert!(handle.check("u1", "p1").await.unwrap().allowed);

        assert!(matches!(
            engine.role_handle("project", "ghost").unwrap_err(),
            EngineError::UnknownRole { .. }
        ));
        assert!(matches!(
            engine.role_handle("ghost", "viewer").unwrap_err(),
            EngineError::UnknownResourceType(_)
        ));
    }
}
