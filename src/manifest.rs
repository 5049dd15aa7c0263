//! KDL schema manifests: declare resource types, their action vocabulary,
//! and role action-sets. Conditions are code, so a manifest only declares the
//! shape; [`crate::SchemaBuilder::bind`] attaches one condition per declared role
//! and the builder refuses to produce an engine until every role is bound.
//!
//! Example manifest:
//!
//! ```kdl
//! resource "project" {
//!     actions {
//!         - "read"
//!         - "edit"
//!         - "delete"
//!     }
//!     role "owner" {
//!         actions {
//!             - "read"
//!             - "edit"
//!             - "delete"
//!         }
//!     }
//!     role "viewer" {
//!         actions {
//!             - "read"
//!         }
//!     }
//! }
//! ```

use std::path::Path;

use kdl::KdlDocument;

use crate::errors::EngineError;

#[derive(Debug, Clone)]
pub struct ManifestRole {
    pub name: String,
    pub actions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ManifestResource {
    pub name: String,
    pub actions: Vec<String>,
    pub roles: Vec<ManifestRole>,
}

/// Parsed schema declarations, possibly merged from several files.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub resources: Vec<ManifestResource>,
}

/// Parse a KDL document string into a schema manifest.
pub fn parse_manifest(source: &str) -> Result<Manifest, EngineError> {
    let doc: KdlDocument = source
        .parse()
        .map_err(|e: kdl::KdlError| EngineError::KdlParse(e.to_string()))?;

    let mut manifest = Manifest::default();

    for node in doc.nodes() {
        match node.name().value() {
            "resource" => {
                let name = first_string_arg(node).ok_or_else(|| {
                    EngineError::InvalidManifest(
                        "resource node requires a string argument (e.g. resource \"project\")"
                            .into(),
                    )
                })?;

                let mut actions = Vec::new();
                let mut roles = Vec::new();

                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        match child.name().value() {
                            "actions" => {
                                actions = dash_list(child);
                            }
                            "role" => {
                                roles.push(parse_role(child, &name)?);
                            }
                            other => {
                                return Err(EngineError::InvalidManifest(format!(
                                    "unexpected child `{other}` in resource `{name}` (expected `actions` or `role`)"
                                )));
                            }
                        }
                    }
                }

                manifest.resources.push(ManifestResource {
                    name,
                    actions,
                    roles,
                });
            }
            other => {
                // Ignore unknown top-level nodes with a warning
                tracing::warn!("ignoring unknown top-level KDL node `{other}`");
            }
        }
    }

    Ok(manifest)
}

fn parse_role(node: &kdl::KdlNode, resource: &str) -> Result<ManifestRole, EngineError> {
    let name = first_string_arg(node).ok_or_else(|| {
        EngineError::InvalidManifest(format!(
            "role node in resource `{resource}` requires a string argument (e.g. role \"owner\")"
        ))
    })?;

    let mut actions = Vec::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "actions" => {
                    actions = dash_list(child);
                }
                other => {
                    return Err(EngineError::InvalidManifest(format!(
                        "unexpected child `{other}` in role `{name}` (expected `actions`)"
                    )));
                }
            }
        }
    }

    Ok(ManifestRole { name, actions })
}

/// Load all `.kdl` manifests from the given directory, merged in file-name
/// order.
pub fn load_manifests(dir: &Path) -> Result<Manifest, EngineError> {
    if !dir.is_dir() {
        return Err(EngineError::InvalidManifest(format!(
            "manifest directory `{}` does not exist or is not a directory",
            dir.display()
        )));
    }

    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| ext == "kdl")
                .unwrap_or(false)
        })
        .collect();
    entries.sort_by_key(|e| e.path());

    let mut merged = Manifest::default();
    let mut file_count = 0;

    for entry in entries {
        let path = entry.path();
        let contents =
            std::fs::read_to_string(&path).map_err(|source| EngineError::ManifestLoad {
                path: path.display().to_string(),
                source,
            })?;
        let parsed = parse_manifest(&contents)?;
        merged.resources.extend(parsed.resources);
        file_count += 1;
    }

    tracing::info!(
        files = file_count,
        resources = merged.resources.len(),
        roles = merged.resources.iter().map(|r| r.roles.len()).sum::<usize>(),
        "Loaded schema manifests"
    );

    Ok(merged)
}

/// Extract the first string argument from a KDL node.
fn first_string_arg(node: &kdl::KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

/// Extract dash-list children: nodes named "-" whose first argument is a string.
fn dash_list(node: &kdl::KdlNode) -> Vec<String> {
    let Some(children) = node.children() else {
        return Vec::new();
    };
    children
        .nodes()
        .iter()
        .filter(|n| n.name().value() == "-")
        .filter_map(first_string_arg)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROJECT_KDL: &str = r#"
resource "project" {
    actions {
        - "read"
        - "edit"
        - "delete"
    }
    role "owner" {
        actions {
            - "read"
            - "edit"
            - "delete"
        }
    }
    role "viewer" {
        actions {
            - "read"
        }
    }
}
"#;

    #[test]
    fn test_parse_resource_with_roles() {
        let manifest = parse_manifest(PROJECT_KDL).unwrap();
        assert_eq!(manifest.resources.len(), 1);

        let project = &manifest.resources[0];
        assert_eq!(project.name, "project");
        assert_eq!(project.actions, vec!["read", "edit", "delete"]);
        assert_eq!(project.roles.len(), 2);
        assert_eq!(project.roles[0].name, "owner");
        assert_eq!(project.roles[1].actions, vec!["read"]);
    }

    #[test]
    fn test_role_order_preserved() {
        let manifest = parse_manifest(
            r#"
resource "doc" {
    actions { - "read" }
    role "b" { actions { - "read" } }
    role "a" { actions { - "read" } }
}
"#,
        )
        .unwrap();
        let names: Vec<_> = manifest.resources[0]
            .roles
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_resource_requires_name() {
        let err = parse_manifest("resource").unwrap_err();
        assert!(matches!(err, EngineError::InvalidManifest(_)));
    }

    #[test]
    fn test_unexpected_child_rejected() {
        let err = parse_manifest(
            r#"
resource "doc" {
    permissions { - "read" }
}
"#,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidManifest(_)));
    }

    #[test]
    fn test_invalid_kdl_rejected() {
        let err = parse_manifest("resource \"doc\" {").unwrap_err();
        assert!(matches!(err, EngineError::KdlParse(_)));
    }

    #[test]
    fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();

        std::fs::write(dir.path().join("10_project.kdl"), PROJECT_KDL).unwrap();
        std::fs::write(
            dir.path().join("20_folder.kdl"),
            r#"
resource "folder" {
    actions {
        - "read"
        - "delete"
    }
    role "owner" {
        actions {
            - "read"
            - "delete"
        }
    }
}
"#,
        )
        .unwrap();
        // Non-KDL files are ignored
        std::fs::write(dir.path().join("README.md"), "not a manifest").unwrap();

        let manifest = load_manifests(dir.path()).unwrap();
        assert_eq!(manifest.resources.len(), 2);
        assert_eq!(manifest.resources[0].name, "project");
        assert_eq!(manifest.resources[1].name, "folder");
    }

    #[test]
    fn test_load_nonexistent_directory() {
        let err = load_manifests(Path::new("/nonexistent/path")).unwrap_err();
        assert!(matches!(err, EngineError::InvalidManifest(_)));
    }
}
