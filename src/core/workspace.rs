use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::backends::git;
use crate::core::context::ExecutionContext;
use crate::core::registry::{self, ResourceEnv};
use crate::core::resource::{param_str, ParamMap, Resource};
use crate::core::store::SnapshotStore;
use crate::error::{DwsError, ErrorContext, Result};

pub const BASE_DIR: &str = ".dataworkspace";
pub const CONFIG_FILE_PATH: &str = ".dataworkspace/config.json";
pub const LOCAL_PARAMS_PATH: &str = ".dataworkspace/local_params.json";
pub const RESOURCES_FILE_PATH: &str = ".dataworkspace/resources.json";
pub const RESOURCE_LOCAL_PARAMS_PATH: &str = ".dataworkspace/resource_local_params.json";
pub const SNAPSHOT_DIR_PATH: &str = ".dataworkspace/snapshots";
pub const SNAPSHOT_METADATA_DIR_PATH: &str = ".dataworkspace/snapshot_metadata";
pub const SCRATCH_DIR_PATH: &str = ".dataworkspace/scratch";
pub const GIT_IGNORE_FILE_PATH: &str = ".dataworkspace/.gitignore";

pub const DWS_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shape of config.json. Field names are a stable interop format.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorkspaceConfig {
    name: String,
    #[serde(rename = "dws-version")]
    dws_version: String,
    global_params: ParamMap,
}

/// A loaded workspace: the metadata files plus the execution context the
/// command was started with. Exactly one workspace per root directory.
#[derive(Debug)]
pub struct Workspace {
    pub root: PathBuf,
    pub name: String,
    pub dws_version: String,
    global_params: ParamMap,
    local_params: ParamMap,
    resource_params: Vec<ParamMap>,
    resource_local_params: BTreeMap<String, ParamMap>,
    exec: ExecutionContext,
}

fn read_json_file<T: serde::de::DeserializeOwned>(root: &Path, relative: &str) -> Result<T> {
    let path = root.join(relative);
    if !path.exists() {
        return Err(DwsError::config(format!(
            "Did not find workspace metadata file {}",
            path.display()
        )));
    }
    let content = fs::read_to_string(&path)
        .with_io_context(|| format!("reading workspace metadata file {}", path.display()))?;
    serde_json::from_str(&content)
        .map_err(|e| DwsError::config_in(format!("Invalid JSON: {}", e), path))
}

fn write_json_file<T: Serialize>(root: &Path, relative: &str, value: &T) -> Result<()> {
    let path = root.join(relative);
    let content = serde_json::to_string_pretty(value)
        .with_context(|| format!("serializing {}", path.display()))?;
    fs::write(&path, content)
        .with_io_context(|| format!("writing workspace metadata file {}", path.display()))?;
    Ok(())
}

impl Workspace {
    /// Initialize a brand-new workspace under `root` and commit the
    /// metadata through the governing git repository.
    pub fn init(root: &Path, name: &str, exec: ExecutionContext) -> Result<Workspace> {
        if !root.is_dir() {
            return Err(DwsError::config(format!(
                "Directory for new workspace '{}' does not exist",
                root.display()
            )));
        }
        let md_dir = root.join(BASE_DIR);
        if md_dir.is_dir() {
            return Err(DwsError::config(format!(
                "Found {} directory under {}. Has this workspace already been initialized?",
                BASE_DIR,
                root.display()
            )));
        }
        for dir in [BASE_DIR, SNAPSHOT_DIR_PATH, SNAPSHOT_METADATA_DIR_PATH, SCRATCH_DIR_PATH] {
            fs::create_dir_all(root.join(dir))
                .with_io_context(|| format!("creating directory {}", root.join(dir).display()))?;
        }
        let config = WorkspaceConfig {
            name: name.to_string(),
            dws_version: DWS_VERSION.to_string(),
            global_params: ParamMap::new(),
        };
        write_json_file(root, CONFIG_FILE_PATH, &config)?;
        write_json_file(root, RESOURCES_FILE_PATH, &Vec::<ParamMap>::new())?;
        write_json_file(root, LOCAL_PARAMS_PATH, &ParamMap::new())?;
        write_json_file(root, RESOURCE_LOCAL_PARAMS_PATH, &BTreeMap::<String, ParamMap>::new())?;

        // Local-only files must never reach the shared repository.
        let gitignore = [
            "local_params.json",
            "resource_local_params.json",
            "scratch/",
        ]
        .join("\n")
            + "\n";
        fs::write(root.join(GIT_IGNORE_FILE_PATH), gitignore)
            .with_io_context(|| format!("writing {}", GIT_IGNORE_FILE_PATH))?;

        if !git::is_git_repo(root) {
            git::git_init(root)?;
        } else {
            exec.vlog(&format!("{} is already a git repository, will just add to it", root.display()));
        }
        git::git_add(root, &[CONFIG_FILE_PATH, RESOURCES_FILE_PATH, GIT_IGNORE_FILE_PATH])?;
        git::commit_changes_in_repo(root, "dws init")?;
        Workspace::load(root, exec)
    }

    /// Load an existing workspace. A missing metadata file is a
    /// configuration error naming the path.
    pub fn load(root: &Path, exec: ExecutionContext) -> Result<Workspace> {
        let config: WorkspaceConfig = read_json_file(root, CONFIG_FILE_PATH)?;
        let local_params: ParamMap = read_json_file(root, LOCAL_PARAMS_PATH)?;
        let resource_params: Vec<ParamMap> = read_json_file(root, RESOURCES_FILE_PATH)?;
        let resource_local_params: BTreeMap<String, ParamMap> =
            read_json_file(root, RESOURCE_LOCAL_PARAMS_PATH)?;
        Ok(Workspace {
            root: root.to_path_buf(),
            name: config.name,
            dws_version: config.dws_version,
            global_params: config.global_params,
            local_params,
            resource_params,
            resource_local_params,
            exec,
        })
    }

    /// Walk upward from `start` looking for a directory containing
    /// `.dataworkspace`.
    pub fn find_containing_workspace(start: &Path) -> Option<PathBuf> {
        let mut current = Some(start);
        while let Some(dir) = current {
            if dir.join(BASE_DIR).is_dir() {
                return Some(dir.to_path_buf());
            }
            current = dir.parent();
        }
        None
    }

    pub fn exec(&self) -> ExecutionContext {
        self.exec
    }

    /// Re-read the metadata files after out-of-band changes (e.g. a plan
    /// that rewrote resources.json).
    pub fn reload(&mut self) -> Result<()> {
        *self = Workspace::load(&self.root.clone(), self.exec)?;
        Ok(())
    }

    pub fn store(&self) -> SnapshotStore {
        SnapshotStore::new(&self.root)
    }

    pub fn env(&self) -> ResourceEnv {
        ResourceEnv {
            workspace_root: self.root.clone(),
            exec: self.exec,
        }
    }

    pub fn global_param(&self, name: &str) -> Option<&serde_json::Value> {
        self.global_params.get(name)
    }

    pub fn local_param(&self, name: &str) -> Option<&serde_json::Value> {
        self.local_params.get(name)
    }

    /// Setting a global param persists config.json immediately; the change
    /// is shared once the workspace is committed and pushed.
    pub fn set_global_param(&mut self, name: &str, value: serde_json::Value) -> Result<()> {
        self.global_params.insert(name.to_string(), value);
        let config = WorkspaceConfig {
            name: self.name.clone(),
            dws_version: self.dws_version.clone(),
            global_params: self.global_params.clone(),
        };
        write_json_file(&self.root, CONFIG_FILE_PATH, &config)
    }

    pub fn set_local_param(&mut self, name: &str, value: serde_json::Value) -> Result<()> {
        self.local_params.insert(name.to_string(), value);
        write_json_file(&self.root, LOCAL_PARAMS_PATH, &self.local_params)
    }

    /// Resource names in lexical order.
    pub fn resource_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .resource_params
            .iter()
            .filter_map(|p| p.get("name").and_then(|v| v.as_str()).map(|s| s.to_string()))
            .collect();
        names.sort();
        names
    }

    pub fn has_resource(&self, name: &str) -> bool {
        self.resource_params
            .iter()
            .any(|p| p.get("name").and_then(|v| v.as_str()) == Some(name))
    }

    pub fn resource_params(&self, name: &str) -> Result<&ParamMap> {
        self.resource_params
            .iter()
            .find(|p| p.get("name").and_then(|v| v.as_str()) == Some(name))
            .ok_or_else(|| {
                DwsError::config(format!(
                    "A resource by the name '{}' does not exist in this workspace",
                    name
                ))
            })
    }

    pub fn resource_local_params(&self, name: &str) -> Option<&ParamMap> {
        self.resource_local_params.get(name)
    }

    /// Urls of all current resources, for duplicate detection.
    pub fn resource_urls(&self) -> Result<Vec<String>> {
        let mut urls = Vec::new();
        for params in &self.resource_params {
            let name = param_str(params, "name", "<resources.json>")?;
            let rtype = param_str(params, "resource_type", &name)?;
            let factory = registry::lookup(&rtype)?;
            urls.push((factory.url_of)(params, self.resource_local_params.get(&name))?);
        }
        Ok(urls)
    }

    /// Record the shared params of a new resource and rewrite
    /// resources.json.
    pub fn add_params_for_resource(&mut self, name: &str, params: ParamMap) -> Result<()> {
        if self.has_resource(name) {
            return Err(DwsError::internal(format!(
                "add_params_for_resource called twice for '{}'",
                name
            )));
        }
        self.resource_params.push(params);
        write_json_file(&self.root, RESOURCES_FILE_PATH, &self.resource_params)
    }

    /// Record local params for a new or cloned resource.
    pub fn add_local_params_for_resource(&mut self, name: &str, local_params: ParamMap) -> Result<()> {
        self.resource_local_params.insert(name.to_string(), local_params);
        write_json_file(&self.root, RESOURCE_LOCAL_PARAMS_PATH, &self.resource_local_params)
    }

    /// Instantiate one resource from its persisted params.
    pub fn instantiate_resource(&self, name: &str) -> Result<Box<dyn Resource>> {
        let params = self.resource_params(name)?;
        let rtype = param_str(params, "resource_type", name)?;
        let factory = registry::lookup(&rtype)?;
        (factory.from_params)(params, self.resource_local_params.get(name), &self.env())
    }

    /// All snapshottable resources, in name order.
    pub fn instantiate_snapshottable(&self) -> Result<Vec<Box<dyn Resource>>> {
        let mut resources = Vec::new();
        for name in self.resource_names() {
            let r = self.instantiate_resource(&name)?;
            if r.capabilities().snapshottable {
                resources.push(r);
            }
        }
        Ok(resources)
    }

    /// Commit the current state of the workspace through its governing
    /// repository.
    pub fn save(&self, message: &str) -> Result<()> {
        git::commit_changes_in_repo(&self.root, message)
    }
}

/// Rewrite resources.json wholesale (used by restore reconciliation,
/// which works from a manifest rather than a loaded workspace).
pub fn write_resources_file(root: &Path, params: &[ParamMap]) -> Result<()> {
    write_json_file(root, RESOURCES_FILE_PATH, &params.to_vec())
}

/// Append one resource's params to resources.json on disk.
pub fn append_resource_params_file(root: &Path, params: &ParamMap) -> Result<()> {
    let mut all: Vec<ParamMap> = read_json_file(root, RESOURCES_FILE_PATH)?;
    all.push(params.clone());
    write_json_file(root, RESOURCES_FILE_PATH, &all)
}

/// Record local params for one resource directly on disk.
pub fn record_local_params_file(root: &Path, name: &str, local: &ParamMap) -> Result<()> {
    let mut all: BTreeMap<String, ParamMap> = read_json_file(root, RESOURCE_LOCAL_PARAMS_PATH)
        .unwrap_or_default();
    all.insert(name.to_string(), local.clone());
    write_json_file(root, RESOURCE_LOCAL_PARAMS_PATH, &all)
}

/// Clone a workspace repository, set up its local-only files, and
/// materialize every local-state resource.
pub fn clone_workspace(
    repository: &str,
    directory: Option<&str>,
    exec: ExecutionContext,
) -> Result<Workspace> {
    let parent_dir = std::env::current_dir()
        .with_io_context(|| "getting current directory".to_string())?;

    let (initial_path, explicit) = match directory {
        Some(d) => {
            let target = parent_dir.join(d);
            if target.is_dir() {
                return Err(DwsError::config(format!(
                    "Clone target directory '{}' already exists",
                    target.display()
                )));
            }
            (target, true)
        }
        None => {
            // We have to clone before we know the workspace name, so use a
            // unique scratch name and rename afterwards.
            let scratch: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(12)
                .map(char::from)
                .collect();
            (parent_dir.join(scratch), false)
        }
    };

    git::ls_remote(repository, &parent_dir)?;
    let initial_name = initial_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| DwsError::config(format!("Invalid clone directory '{}'", initial_path.display())))?;
    git::clone(repository, &parent_dir, &initial_name)?;

    let result = finish_clone(&initial_path, explicit, &parent_dir, exec);
    if result.is_err() && initial_path.is_dir() {
        let _ = fs::remove_dir_all(&initial_path);
    }
    result
}

fn finish_clone(
    initial_path: &Path,
    explicit: bool,
    parent_dir: &Path,
    exec: ExecutionContext,
) -> Result<Workspace> {
    let config: WorkspaceConfig = read_json_file(initial_path, CONFIG_FILE_PATH)
        .map_err(|_| DwsError::config("Did not find a dws configuration file in the cloned repository"))?;

    let directory = if explicit {
        initial_path.to_path_buf()
    } else {
        let named = parent_dir.join(&config.name);
        if named.is_dir() {
            return Err(DwsError::config(format!(
                "Clone target directory {} already exists",
                named.display()
            )));
        }
        fs::rename(initial_path, &named)
            .with_io_context(|| format!("renaming {} to {}", initial_path.display(), named.display()))?;
        named
    };

    write_json_file(&directory, LOCAL_PARAMS_PATH, &ParamMap::new())?;
    write_json_file(&directory, RESOURCE_LOCAL_PARAMS_PATH, &BTreeMap::<String, ParamMap>::new())?;
    // The origin may predate any snapshot.
    for dir in [SNAPSHOT_DIR_PATH, SNAPSHOT_METADATA_DIR_PATH, SCRATCH_DIR_PATH] {
        fs::create_dir_all(directory.join(dir))
            .with_io_context(|| format!("creating directory {}", directory.join(dir).display()))?;
    }

    let mut ws = Workspace::load(&directory, exec)?;
    // Materialize every local-state resource declared by the origin.
    for name in ws.resource_names() {
        let params = ws.resource_params(&name)?.clone();
        let rtype = param_str(&params, "resource_type", &name)?;
        let factory = registry::lookup(&rtype)?;
        if !factory.has_local_state {
            continue;
        }
        let resource = (factory.clone_resource)(&params, &ws.env())?;
        ws.add_local_params_for_resource(&name, resource.local_params())?;
    }
    Ok(ws)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(true, false)
    }

    fn init_bare_layout(root: &Path) {
        // Test-only layout creation that skips the git commit.
        for dir in [BASE_DIR, SNAPSHOT_DIR_PATH, SNAPSHOT_METADATA_DIR_PATH, SCRATCH_DIR_PATH] {
            fs::create_dir_all(root.join(dir)).unwrap();
        }
        let config = WorkspaceConfig {
            name: "test-ws".to_string(),
            dws_version: DWS_VERSION.to_string(),
            global_params: ParamMap::new(),
        };
        write_json_file(root, CONFIG_FILE_PATH, &config).unwrap();
        write_json_file(root, RESOURCES_FILE_PATH, &Vec::<ParamMap>::new()).unwrap();
        write_json_file(root, LOCAL_PARAMS_PATH, &ParamMap::new()).unwrap();
        write_json_file(root, RESOURCE_LOCAL_PARAMS_PATH, &BTreeMap::<String, ParamMap>::new())
            .unwrap();
    }

    #[test]
    fn test_load_missing_metadata_file() {
        let tmp = tempdir().unwrap();
        let err = Workspace::load(tmp.path(), ctx()).unwrap_err();
        assert!(matches!(err, DwsError::Config { .. }));
    }

    #[test]
    fn test_load_and_params_round_trip() {
        let tmp = tempdir().unwrap();
        init_bare_layout(tmp.path());
        let mut ws = Workspace::load(tmp.path(), ctx()).unwrap();
        assert_eq!(ws.name, "test-ws");
        assert!(ws.resource_names().is_empty());

        ws.set_global_param("results.dir_template", serde_json::json!("snapshots/{TAG}"))
            .unwrap();
        ws.set_local_param("hostname", serde_json::json!("testhost")).unwrap();

        let reloaded = Workspace::load(tmp.path(), ctx()).unwrap();
        assert_eq!(
            reloaded.global_param("results.dir_template").unwrap(),
            &serde_json::json!("snapshots/{TAG}")
        );
        assert_eq!(reloaded.local_param("hostname").unwrap(), &serde_json::json!("testhost"));
    }

    #[test]
    fn test_add_resource_params_and_names_sorted() {
        let tmp = tempdir().unwrap();
        init_bare_layout(tmp.path());
        let mut ws = Workspace::load(tmp.path(), ctx()).unwrap();

        let mut b = ParamMap::new();
        b.insert("name".to_string(), serde_json::json!("beta"));
        b.insert("resource_type".to_string(), serde_json::json!("file"));
        b.insert("role".to_string(), serde_json::json!("source-data"));
        ws.add_params_for_resource("beta", b).unwrap();

        let mut a = ParamMap::new();
        a.insert("name".to_string(), serde_json::json!("alpha"));
        a.insert("resource_type".to_string(), serde_json::json!("file"));
        a.insert("role".to_string(), serde_json::json!("code"));
        ws.add_params_for_resource("alpha", a).unwrap();

        assert_eq!(ws.resource_names(), vec!["alpha", "beta"]);
        assert!(ws.resource_params("alpha").is_ok());
        assert!(matches!(ws.resource_params("gamma").unwrap_err(), DwsError::Config { .. }));
    }

    #[test]
    fn test_find_containing_workspace() {
        let tmp = tempdir().unwrap();
        init_bare_layout(tmp.path());
        let nested = tmp.path().join("a/b/c");
        fs::create_dir_all(&nested).unwrap();
        let found = Workspace::find_containing_workspace(&nested).unwrap();
        assert_eq!(found.canonicalize().unwrap(), tmp.path().canonicalize().unwrap());

        let other = tempdir().unwrap();
        assert!(Workspace::find_containing_workspace(other.path()).is_none());
    }
}
