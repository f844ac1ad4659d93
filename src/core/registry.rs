//! Static resource-type registry: every known type tag maps to its
//! constructors at compile time, and the table is validated exhaustively at
//! startup instead of being discovered at run time.

use std::path::PathBuf;

use crate::core::context::ExecutionContext;
use crate::core::resource::{ParamMap, Resource};
use crate::error::{DwsError, ErrorContext, Result};

/// Everything a resource constructor may need from its surroundings.
#[derive(Clone)]
pub struct ResourceEnv {
    pub workspace_root: PathBuf,
    pub exec: ExecutionContext,
}

impl ResourceEnv {
    /// Per-resource local scratch directory (never synced).
    pub fn scratch_dir(&self, resource_type: &str, name: &str) -> Result<PathBuf> {
        let dir = self
            .workspace_root
            .join(crate::core::workspace::SCRATCH_DIR_PATH)
            .join(resource_type)
            .join(name);
        std::fs::create_dir_all(&dir)
            .with_io_context(|| format!("creating scratch directory {}", dir.display()))?;
        Ok(dir)
    }
}

type FromParamsFn = fn(&ParamMap, Option<&ParamMap>, &ResourceEnv) -> Result<Box<dyn Resource>>;
type CloneFn = fn(&ParamMap, &ResourceEnv) -> Result<Box<dyn Resource>>;
type UrlOfFn = fn(&ParamMap, Option<&ParamMap>) -> Result<String>;

#[derive(Debug)]
pub struct ResourceFactory {
    pub resource_type: &'static str,
    /// Whether instances keep per-copy local state (and therefore need to
    /// be materialized when a workspace copy is cloned).
    pub has_local_state: bool,
    /// Instantiate from persisted shared + local params.
    pub from_params: FromParamsFn,
    /// Materialize a resource declared remotely but absent locally.
    pub clone_resource: CloneFn,
    /// Derive the resource's globally unique identity from its params,
    /// without instantiating it.
    pub url_of: UrlOfFn,
}

pub const KNOWN_TYPES: [&str; 4] = ["git", "git-subdirectory", "file", "bucket"];

static FACTORIES: [ResourceFactory; 4] = [
    ResourceFactory {
        resource_type: "git",
        has_local_state: true,
        from_params: crate::resources::git_repo::from_params,
        clone_resource: crate::resources::git_repo::clone_resource,
        url_of: crate::resources::git_repo::url_of,
    },
    ResourceFactory {
        resource_type: "git-subdirectory",
        has_local_state: true,
        from_params: crate::resources::git_subdir::from_params,
        clone_resource: crate::resources::git_subdir::clone_resource,
        url_of: crate::resources::git_subdir::url_of,
    },
    ResourceFactory {
        resource_type: "file",
        has_local_state: true,
        from_params: crate::resources::local_files::from_params,
        clone_resource: crate::resources::local_files::clone_resource,
        url_of: crate::resources::local_files::url_of,
    },
    ResourceFactory {
        resource_type: "bucket",
        has_local_state: false,
        from_params: crate::resources::bucket::from_params,
        clone_resource: crate::resources::bucket::clone_resource,
        url_of: crate::resources::bucket::url_of,
    },
];

pub fn lookup(resource_type: &str) -> Result<&'static ResourceFactory> {
    FACTORIES
        .iter()
        .find(|f| f.resource_type == resource_type)
        .ok_or_else(|| {
            DwsError::config(format!(
                "Unknown resource type '{}'; known types are: {}",
                resource_type,
                KNOWN_TYPES.join(", ")
            ))
        })
}

/// Startup check that the factory table covers exactly the known tags.
pub fn validate() -> Result<()> {
    if FACTORIES.len() != KNOWN_TYPES.len() {
        return Err(DwsError::internal("Resource registry size does not match known types"));
    }
    for tag in KNOWN_TYPES {
        if !FACTORIES.iter().any(|f| f.resource_type == tag) {
            return Err(DwsError::internal(format!("Resource registry is missing type '{}'", tag)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_is_exhaustive() {
        validate().unwrap();
        for tag in KNOWN_TYPES {
            assert_eq!(lookup(tag).unwrap().resource_type, tag);
        }
    }

    #[test]
    fn test_unknown_type_is_config_error() {
        let err = lookup("svn").unwrap_err();
        match err {
            DwsError::Config { message, .. } => {
                assert!(message.contains("svn"));
                assert!(message.contains("git-subdirectory"));
            }
            other => panic!("expected Config error, got {:?}", other),
        }
    }
}
