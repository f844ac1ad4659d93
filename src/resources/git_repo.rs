//! Resource variant for an independent git repository.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde_json::json;

use crate::backends::git;
use crate::core::context::ExecutionContext;
use crate::core::hash::short_hash;
use crate::core::registry::ResourceEnv;
use crate::core::resource::{
    param_bool, param_role, param_str, Capabilities, HashPair, ParamMap, Resource, ResourceRole,
};
use crate::core::results::move_current_files_local_fs;
use crate::error::{DwsError, ErrorContext, Result};

pub const RESOURCE_TYPE: &str = "git";

pub struct GitRepoResource {
    name: String,
    role: ResourceRole,
    local_path: PathBuf,
    remote_origin_url: Option<String>,
    branch: String,
    read_only: bool,
    exec: ExecutionContext,
}

impl GitRepoResource {
    pub fn new(
        name: String,
        role: ResourceRole,
        local_path: PathBuf,
        remote_origin_url: Option<String>,
        branch: String,
        read_only: bool,
        exec: ExecutionContext,
    ) -> Self {
        Self { name, role, local_path, remote_origin_url, branch, read_only, exec }
    }

    fn on_branch(&self) -> Result<()> {
        git::switch_branch_if_needed(&self.local_path, &self.branch)
    }
}

/// Build a git resource from the add command's arguments. A path that is
/// not its own repository but lies inside the workspace resolves to a
/// `git-subdirectory` resource instead; that decision is fixed at add time
/// by the persisted resource_type.
pub fn from_command_line(
    role: ResourceRole,
    name: &str,
    local_path: &Path,
    branch: Option<&str>,
    read_only: bool,
    env: &ResourceEnv,
) -> Result<Box<dyn Resource>> {
    if !local_path.is_dir() {
        return Err(DwsError::config(format!("Directory '{}' does not exist", local_path.display())));
    }
    let local_path = local_path
        .canonicalize()
        .with_io_context(|| format!("resolving path {}", local_path.display()))?;

    if !git::is_git_repo(&local_path) {
        let workspace_root = env
            .workspace_root
            .canonicalize()
            .with_io_context(|| format!("resolving path {}", env.workspace_root.display()))?;
        if local_path.starts_with(&workspace_root) {
            if branch.is_some() {
                return Err(DwsError::config(
                    "A branch may only be specified for separate git repositories, not subdirectories of the workspace",
                ));
            }
            if read_only {
                return Err(DwsError::config(
                    "The --read-only parameter is only valid for separate git repositories, not subdirectories of the workspace",
                ));
            }
            return crate::resources::git_subdir::from_command_line(role, name, &local_path, env);
        }
        return Err(DwsError::config(format!(
            "{} is not a git repository",
            local_path.display()
        )));
    }

    let remote_origin_url = git::get_remote_origin(&local_path)?;
    let current = git::get_current_branch(&local_path)?;
    let branch = branch.unwrap_or(&current).to_string();
    if branch != current {
        if !git::branch_exists(&local_path, &branch)? {
            return Err(DwsError::config(format!(
                "Requested branch '{}' is not available for git repository at {}",
                branch,
                local_path.display()
            )));
        }
        if git::is_git_dirty(&local_path)? {
            eprintln!(
                "WARNING: repo at {} is on branch {} with uncommitted changes; will not switch to {} now",
                local_path.display(),
                current,
                branch
            );
        } else {
            git::switch_branch(&local_path, &branch)?;
        }
    }
    Ok(Box::new(GitRepoResource::new(
        name.to_string(),
        role,
        local_path,
        remote_origin_url,
        branch,
        read_only,
        env.exec,
    )))
}

/// Instantiate from persisted params. The local path is a per-copy param.
pub fn from_params(
    params: &ParamMap,
    local_params: Option<&ParamMap>,
    env: &ResourceEnv,
) -> Result<Box<dyn Resource>> {
    let name = param_str(params, "name", "<resources.json>")?;
    let local = local_params.ok_or_else(|| {
        DwsError::config(format!(
            "Git resource '{}' has no local path recorded; run a pull or clone to materialize it",
            name
        ))
    })?;
    let local_path = PathBuf::from(param_str(local, "local_path", &name)?);
    let remote_origin_url = params
        .get("remote_origin_url")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    Ok(Box::new(GitRepoResource::new(
        name.clone(),
        param_role(params, &name)?,
        local_path,
        remote_origin_url,
        param_str(params, "branch", &name)?,
        param_bool(params, "read_only"),
        env.exec,
    )))
}

/// Materialize a remotely-declared git resource by cloning it next to the
/// workspace (or wherever the user points us).
pub fn clone_resource(params: &ParamMap, env: &ResourceEnv) -> Result<Box<dyn Resource>> {
    let name = param_str(params, "name", "<resources.json>")?;
    let remote_origin_url = param_str(params, "remote_origin_url", &name).map_err(|_| {
        DwsError::config(format!(
            "Git resource '{}' has no remote origin; it cannot be materialized on this copy",
            name
        ))
    })?;
    let default_path = env.workspace_root.join(&name);
    let answer = env.exec.prompt_with_default(
        &format!("Git resource '{}' is being added to your workspace. Where do you want to clone it?", name),
        &default_path.to_string_lossy(),
    )?;
    let local_path = PathBuf::from(answer);

    if local_path.is_dir() {
        if !git::is_git_repo(&local_path) {
            return Err(DwsError::config(format!(
                "Unable to materialize resource '{}': local path '{}' exists but is not a git repository",
                name,
                local_path.display()
            )));
        }
        let remote = git::get_remote_origin(&local_path)?;
        if remote.as_deref() != Some(remote_origin_url.as_str()) {
            return Err(DwsError::config(format!(
                "Unable to materialize resource '{}': '{}' has remote origin {:?}, but the workspace expects '{}'",
                name,
                local_path.display(),
                remote,
                remote_origin_url
            )));
        }
    } else {
        let parent = local_path
            .parent()
            .ok_or_else(|| DwsError::config(format!("Invalid clone path '{}'", local_path.display())))?;
        let dest_name = local_path
            .file_name()
            .ok_or_else(|| DwsError::config(format!("Invalid clone path '{}'", local_path.display())))?
            .to_string_lossy()
            .to_string();
        git::clone(&remote_origin_url, parent, &dest_name)?;
    }
    let branch = param_str(params, "branch", &name)?;
    if git::branch_exists(&local_path, &branch)? {
        git::switch_branch_if_needed(&local_path, &branch)?;
    }
    Ok(Box::new(GitRepoResource::new(
        name.clone(),
        param_role(params, &name)?,
        local_path,
        Some(remote_origin_url),
        branch,
        param_bool(params, "read_only"),
        env.exec,
    )))
}

/// The remote origin is the identity when there is one; otherwise the
/// local path pins the repository to this machine.
pub fn url_of(params: &ParamMap, local_params: Option<&ParamMap>) -> Result<String> {
    if let Some(url) = params.get("remote_origin_url").and_then(|v| v.as_str()) {
        if !url.is_empty() {
            return Ok(url.to_string());
        }
    }
    if let Some(local) = local_params {
        if let Some(path) = local.get("local_path").and_then(|v| v.as_str()) {
            return Ok(format!("file://{}", path));
        }
    }
    let name = param_str(params, "name", "<resources.json>")?;
    Ok(format!("git://{}", name))
}

impl Resource for GitRepoResource {
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
        match &self.remote_origin_url {
            Some(url) if !url.is_empty() => url.clone(),
            _ => format!("file://{}", self.local_path.display()),
        }
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { local_state: true, file_like: true, snapshottable: true }
    }

    fn params(&self) -> ParamMap {
        let mut params = ParamMap::new();
        params.insert("name".to_string(), json!(self.name));
        params.insert("resource_type".to_string(), json!(RESOURCE_TYPE));
        params.insert("role".to_string(), json!(self.role.as_str()));
        params.insert("remote_origin_url".to_string(), json!(self.remote_origin_url));
        params.insert("branch".to_string(), json!(self.branch));
        params.insert("read_only".to_string(), json!(self.read_only));
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
        if !git::is_git_repo(&self.local_path) {
            return Err(DwsError::config(format!(
                "{} is not a git repository",
                self.local_path.display()
            )));
        }
        Ok(())
    }

    fn add(&mut self) -> Result<()> {
        // The repository already exists; registration is purely metadata.
        Ok(())
    }

    fn snapshot_precheck(&self) -> Result<()> {
        if !self.local_path.is_dir() || !git::is_git_repo(&self.local_path) {
            return Err(DwsError::config(format!(
                "Git repository for resource '{}' is missing at {}",
                self.name,
                self.local_path.display()
            )));
        }
        Ok(())
    }

    fn snapshot(&mut self) -> Result<HashPair> {
        git::commit_changes_in_repo(&self.local_path, "autocommit ahead of snapshot")?;
        self.on_branch()?;
        let hashval = git::get_local_head_hash(&self.local_path)?;
        Ok(HashPair::same(hashval))
    }

    fn restore_precheck(&self, hashval: &str) -> Result<()> {
        if !git::commit_exists(&self.local_path, hashval)? {
            return Err(DwsError::config(format!(
                "No commit found with hash '{}' in {}",
                hashval,
                self.describe()
            )));
        }
        Ok(())
    }

    fn restore(&mut self, hashval: &str) -> Result<()> {
        git::commit_changes_in_repo(&self.local_path, "auto-commit ahead of restore")?;
        self.on_branch()?;
        git::checkout_and_apply_commit(
            &self.local_path,
            hashval,
            &format!("Restored to state of commit {}", short_hash(hashval)),
        )
    }

    fn push_precheck(&self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        if git::is_git_dirty(&self.local_path)? {
            return Err(DwsError::config(format!(
                "Git repo at {} has uncommitted changes. Please commit your changes before pushing.",
                self.local_path.display()
            )));
        }
        if self.remote_origin_url.is_some()
            && git::is_pull_needed_from_remote(&self.local_path, &self.branch)?
        {
            return Err(DwsError::config(format!(
                "Resource '{}' requires a pull from the remote origin before pushing.",
                self.name
            )));
        }
        Ok(())
    }

    fn push(&mut self) -> Result<()> {
        if self.read_only {
            self.exec.vlog(&format!("Skipping push of resource {}, as it is read-only", self.name));
            return Ok(());
        }
        if self.remote_origin_url.is_none() {
            self.exec.vlog(&format!("Resource {} has no remote origin, skipping push", self.name));
            return Ok(());
        }
        self.on_branch()?;
        git::push(&self.local_path, &self.branch)
    }

    fn pull_precheck(&self) -> Result<()> {
        if git::is_git_dirty(&self.local_path)? {
            return Err(DwsError::config(format!(
                "Git repo at {} has uncommitted changes. Please commit your changes before pulling.",
                self.local_path.display()
            )));
        }
        Ok(())
    }

    fn pull(&mut self) -> Result<()> {
        if self.remote_origin_url.is_none() {
            self.exec.vlog(&format!("Resource {} has no remote origin, skipping pull", self.name));
            return Ok(());
        }
        self.on_branch()?;
        git::pull(&self.local_path, &self.branch)
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
        self.on_branch()?;
        let local_path = self.local_path.clone();
        let moved = move_current_files_local_fs(
            &self.name,
            &local_path,
            rel_dest_root,
            exclude_files,
            exclude_dirs_re,
            |src, dest| git::git_move_and_add(src, dest, &local_path),
            self.exec.verbose,
        )?;
        // An empty results dir gets no snapshot subdirectory.
        if !moved.is_empty() {
            git::run_git(
                &["commit", "-m", &format!("Move current results to {}", rel_dest_root)],
                &self.local_path,
            )?;
        }
        Ok(())
    }

    fn add_results_file(&mut self, src: &Path, rel_dest_path: &str) -> Result<()> {
        if self.role != ResourceRole::Results {
            return Err(DwsError::internal(format!(
                "add_results_file called on non-results resource '{}'",
                self.name
            )));
        }
        self.on_branch()?;
        let dest = self.local_path.join(rel_dest_path);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .with_io_context(|| format!("creating directory {}", parent.display()))?;
        }
        // Copy rather than rename: the source may live on another filesystem.
        std::fs::copy(src, &dest)
            .with_io_context(|| format!("copying {} to {}", src.display(), dest.display()))?;
        git::git_add(&self.local_path, &[rel_dest_path])?;
        git::run_git(
            &["commit", "-m", &format!("Added {}", rel_dest_path)],
            &self.local_path,
        )?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("git repository {} in role '{}'", self.local_path.display(), self.role)
    }
}
