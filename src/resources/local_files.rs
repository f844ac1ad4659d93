//! Resource variant for a plain local directory with no versioned
//! backend. Snapshots record a content tree hash; since there is no store
//! to replay from, a restore can only verify that the directory already
//! matches the requested state.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::core::context::ExecutionContext;
use crate::core::registry::ResourceEnv;
use crate::core::resource::{
    param_role, param_str, Capabilities, HashPair, ParamMap, Resource, ResourceRole,
};
use crate::core::results::move_current_files_local_fs;
use crate::error::{DwsError, ErrorContext, Result};

pub const RESOURCE_TYPE: &str = "file";

pub struct LocalFilesResource {
    name: String,
    role: ResourceRole,
    local_path: PathBuf,
    exec: ExecutionContext,
}

impl LocalFilesResource {
    pub fn new(name: String, role: ResourceRole, local_path: PathBuf, exec: ExecutionContext) -> Self {
        Self { name, role, local_path, exec }
    }

    /// Deterministic digest over the directory's relative paths and file
    /// contents, walked in sorted order.
    fn tree_hash(&self) -> Result<String> {
        let mut hasher = Sha256::new();
        hash_dir(&self.local_path, &self.local_path, &mut hasher)?;
        Ok(format!("{:x}", hasher.finalize()))
    }
}

fn hash_dir(base: &Path, dir: &Path, hasher: &mut Sha256) -> Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)
        .with_io_context(|| format!("reading directory {}", dir.display()))?
        .collect::<std::io::Result<_>>()
        .with_io_context(|| format!("reading directory {}", dir.display()))?;
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let path = entry.path();
        let ftype = entry
            .file_type()
            .with_io_context(|| format!("getting file type of {}", path.display()))?;
        let rel = path
            .strip_prefix(base)
            .map_err(|_| DwsError::internal(format!("{} escaped {}", path.display(), base.display())))?
            .to_string_lossy()
            .replace('\\', "/");
        if ftype.is_dir() {
            hash_dir(base, &path, hasher)?;
        } else if ftype.is_file() {
            let bytes = fs::read(&path)
                .with_io_context(|| format!("reading file {}", path.display()))?;
            hasher.update(rel.as_bytes());
            hasher.update([0u8]);
            hasher.update((bytes.len() as u64).to_le_bytes());
            hasher.update(&bytes);
        }
    }
    Ok(())
}

pub fn from_command_line(
    role: ResourceRole,
    name: &str,
    local_path: &Path,
    env: &ResourceEnv,
) -> Result<Box<dyn Resource>> {
    if !local_path.is_dir() {
        return Err(DwsError::config(format!("Directory '{}' does not exist", local_path.display())));
    }
    let local_path = local_path
        .canonicalize()
        .with_io_context(|| format!("resolving path {}", local_path.display()))?;
    Ok(Box::new(LocalFilesResource::new(name.to_string(), role, local_path, env.exec)))
}

pub fn from_params(
    params: &ParamMap,
    local_params: Option<&ParamMap>,
    env: &ResourceEnv,
) -> Result<Box<dyn Resource>> {
    let name = param_str(params, "name", "<resources.json>")?;
    let local = local_params.ok_or_else(|| {
        DwsError::config(format!(
            "Local-files resource '{}' has no local path recorded on this copy",
            name
        ))
    })?;
    let local_path = PathBuf::from(param_str(local, "local_path", &name)?);
    Ok(Box::new(LocalFilesResource::new(name.clone(), param_role(params, &name)?, local_path, env.exec)))
}

/// A plain directory has nothing to fetch; materializing it on a fresh
/// copy means asking where it lives (or should live).
pub fn clone_resource(params: &ParamMap, env: &ResourceEnv) -> Result<Box<dyn Resource>> {
    let name = param_str(params, "name", "<resources.json>")?;
    let default_path = env.workspace_root.join(&name);
    let answer = env.exec.prompt_with_default(
        &format!("Local-files resource '{}' needs a directory on this machine. Where should it live?", name),
        &default_path.to_string_lossy(),
    )?;
    let local_path = PathBuf::from(answer);
    if !local_path.exists() {
        fs::create_dir_all(&local_path)
            .with_io_context(|| format!("creating directory {}", local_path.display()))?;
    }
    Ok(Box::new(LocalFilesResource::new(name.clone(), param_role(params, &name)?, local_path, env.exec)))
}

pub fn url_of(params: &ParamMap, local_params: Option<&ParamMap>) -> Result<String> {
    if let Some(local) = local_params {
        if let Some(path) = local.get("local_path").and_then(|v| v.as_str()) {
            return Ok(format!("file://{}", path));
        }
    }
    let name = param_str(params, "name", "<resources.json>")?;
    Ok(format!("file://{}", name))
}

impl Resource for LocalFilesResource {
    fn name(&self) -> &str {
        &self.name
    }

    fn resource_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn role(&self) -> ResourceRole {
        self.role
    }

    fn url(&self) -> String {
        format!("file://{}", self.local_path.display())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { local_state: true, file_like: true, snapshottable: true }
    }

    fn params(&self) -> ParamMap {
        let mut params = ParamMap::new();
        params.insert("name".to_string(), json!(self.name));
        params.insert("resource_type".to_string(), json!(RESOURCE_TYPE));
        params.insert("role".to_string(), json!(self.role.as_str()));
        params
    }

    fn local_params(&self) -> ParamMap {
        let mut params = ParamMap::new();
        params.insert("local_path".to_string(), json!(self.local_path.to_string_lossy()));
        params
    }

    fn local_path(&self) -> Option<&Path> {
        Some(&self.local_path)
    }

    fn add_precheck(&self) -> Result<()> {
        if !self.local_path.is_dir() {
            return Err(DwsError::config(format!(
                "Directory '{}' does not exist",
                self.local_path.display()
            )));
        }
        fs::read_dir(&self.local_path)
            .with_io_context(|| format!("checking read access to {}", self.local_path.display()))?;
        Ok(())
    }

    fn add(&mut self) -> Result<()> {
        Ok(())
    }

    fn snapshot_precheck(&self) -> Result<()> {
        if !self.local_path.is_dir() {
            return Err(DwsError::config(format!(
                "Directory for resource '{}' is missing at {}",
                self.name,
                self.local_path.display()
            )));
        }
        Ok(())
    }

    fn snapshot(&mut self) -> Result<HashPair> {
        Ok(HashPair::same(self.tree_hash()?))
    }

    fn restore_precheck(&self, hashval: &str) -> Result<()> {
        let current = self.tree_hash()?;
        if current != hashval {
            return Err(DwsError::config(format!(
                "Resource '{}' cannot be restored: its contents have changed since the snapshot \
                 and a plain directory has no versioned backend to replay from",
                self.name
            )));
        }
        Ok(())
    }

    /// A verified no-op: the precheck established the directory already
    /// matches the requested state.
    fn restore(&mut self, hashval: &str) -> Result<()> {
        self.restore_precheck(hashval)
    }

    fn push_precheck(&self) -> Result<()> {
        Ok(())
    }

    fn push(&mut self) -> Result<()> {
        self.exec.vlog(&format!("Resource {} has no remote, skipping push", self.name));
        Ok(())
    }

    fn pull_precheck(&self) -> Result<()> {
        Ok(())
    }

    fn pull(&mut self) -> Result<()> {
        self.exec.vlog(&format!("Resource {} has no remote, skipping pull", self.name));
        Ok(())
    }

    fn results_move_current_files(
        &mut self,
        rel_dest_root: &str,
        exclude_files: &HashSet<String>,
        exclude_dirs_re: &Regex,
    ) -> Result<()> {
        if self.role != ResourceRole::Results {
            return Err(DwsError::internal(format!(
                "results_move_current_files called on non-results resource '{}'",
                self.name
            )));
        }
        move_current_files_local_fs(
            &self.name,
            &self.local_path.clone(),
            rel_dest_root,
            exclude_files,
            exclude_dirs_re,
            |src, dest| {
                fs::rename(src, dest)
                    .with_io_context(|| format!("moving {} to {}", src.display(), dest.display()))
            },
            self.exec.verbose,
        )?;
        Ok(())
    }

    fn add_results_file(&mut self, src: &Path, rel_dest_path: &str) -> Result<()> {
        if self.role != ResourceRole::Results {
            return Err(DwsError::internal(format!(
                "add_results_file called on non-results resource '{}'",
                self.name
            )));
        }
        let dest = self.local_path.join(rel_dest_path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_io_context(|| format!("creating directory {}", parent.display()))?;
        }
        fs::copy(src, &dest)
            .with_io_context(|| format!("copying {} to {}", src.display(), dest.display()))?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("local directory {} in role '{}'", self.local_path.display(), self.role)
    }
}
