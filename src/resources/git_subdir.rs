//! Resource variant for a subdirectory of the workspace's own git
//! repository. Comparison and restore hashes genuinely differ here: the
//! subdirectory tree hash detects change, the repository HEAD replays it.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde_json::json;

use crate::backends::git;
use crate::core::context::ExecutionContext;
use crate::core::hash::short_hash;
use crate::core::registry::ResourceEnv;
use crate::core::resource::{
    param_role, param_str, Capabilities, HashPair, ParamMap, Resource, ResourceRole,
};
use crate::core::results::move_current_files_local_fs;
use crate::error::{DwsError, ErrorContext, Result};

pub const RESOURCE_TYPE: &str = "git-subdirectory";

pub struct GitSubdirResource {
    name: String,
    role: ResourceRole,
    relative_path: String,
    workspace_root: PathBuf,
    local_path: PathBuf,
    exec: ExecutionContext,
}

impl GitSubdirResource {
    pub fn new(
        name: String,
        role: ResourceRole,
        relative_path: String,
        workspace_root: PathBuf,
        exec: ExecutionContext,
    ) -> Self {
        let local_path = workspace_root.join(&relative_path);
        Self { name, role, relative_path, workspace_root, local_path, exec }
    }
}

/// Build a subdirectory resource from the add command's arguments. Only
/// reached through the `git` factory, for paths under the workspace root.
pub fn from_command_line(
    role: ResourceRole,
    name: &str,
    local_path: &Path,
    env: &ResourceEnv,
) -> Result<Box<dyn Resource>> {
    if git::is_git_repo(local_path) {
        return Err(DwsError::config(format!(
            "{} is its own git repository; a workspace subdirectory resource may not also be an independent repository",
            local_path.display()
        )));
    }
    if !git::is_git_repo(&env.workspace_root) {
        return Err(DwsError::config(
            "Workspace subdirectory resources require the workspace itself to be a git repository",
        ));
    }
    let workspace_root = env
        .workspace_root
        .canonicalize()
        .with_io_context(|| format!("resolving path {}", env.workspace_root.display()))?;
    let relative = local_path.strip_prefix(&workspace_root).map_err(|_| {
        DwsError::config("Workspace subdirectory resources must live under the workspace root")
    })?;
    let relative_path = relative.to_string_lossy().replace('\\', "/");
    if relative_path.is_empty() || relative_path.starts_with(".dataworkspace") {
        return Err(DwsError::config(format!(
            "'{}' cannot be used as a subdirectory resource",
            local_path.display()
        )));
    }
    Ok(Box::new(GitSubdirResource::new(
        name.to_string(),
        role,
        relative_path,
        workspace_root,
        env.exec,
    )))
}

pub fn from_params(
    params: &ParamMap,
    _local_params: Option<&ParamMap>,
    env: &ResourceEnv,
) -> Result<Box<dyn Resource>> {
    let name = param_str(params, "name", "<resources.json>")?;
    Ok(Box::new(GitSubdirResource::new(
        name.clone(),
        param_role(params, &name)?,
        param_str(params, "relative_path", &name)?,
        env.workspace_root.clone(),
        env.exec,
    )))
}

/// A subdirectory declared remotely materializes as a placeholder dir; the
/// workspace-level pull brings its content.
pub fn clone_resource(params: &ParamMap, env: &ResourceEnv) -> Result<Box<dyn Resource>> {
    let name = param_str(params, "name", "<resources.json>")?;
    let relative_path = param_str(params, "relative_path", &name)?;
    let local_path = env.workspace_root.join(&relative_path);
    if !local_path.exists() {
        fs::create_dir_all(&local_path)
            .with_io_context(|| format!("creating placeholder directory {}", local_path.display()))?;
    }
    Ok(Box::new(GitSubdirResource::new(
        name.clone(),
        param_role(params, &name)?,
        relative_path,
        env.workspace_root.clone(),
        env.exec,
    )))
}

pub fn url_of(params: &ParamMap, _local_params: Option<&ParamMap>) -> Result<String> {
    let name = param_str(params, "name", "<resources.json>")?;
    let relative_path = param_str(params, "relative_path", &name)?;
    Ok(format!("git-subdirectory://{}", relative_path))
}

impl Resource for GitSubdirResource {
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
        format!("git-subdirectory://{}", self.relative_path)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { local_state: true, file_like: true, snapshottable: true }
    }

    fn params(&self) -> ParamMap {
        let mut params = ParamMap::new();
        params.insert("name".to_string(), json!(self.name));
        params.insert("resource_type".to_string(), json!(RESOURCE_TYPE));
        params.insert("role".to_string(), json!(self.role.as_str()));
        params.insert("relative_path".to_string(), json!(self.relative_path));
        params
    }

    fn local_params(&self) -> ParamMap {
        ParamMap::new()
    }

    fn local_path(&self) -> Option<&Path> {
        Some(&self.local_path)
    }

    fn add_precheck(&self) -> Result<()> {
        if !git::is_git_repo(&self.workspace_root) {
            return Err(DwsError::config(
                "Workspace subdirectory resources require the workspace itself to be a git repository",
            ));
        }
        Ok(())
    }

    /// Create the directory on first use; git needs a file to track it.
    fn add(&mut self) -> Result<()> {
        if !self.local_path.exists() {
            fs::create_dir_all(&self.local_path)
                .with_io_context(|| format!("creating directory {}", self.local_path.display()))?;
            let readme = self.local_path.join("README.txt");
            let body = format!(
                "This directory is for {}.\nThis file keeps the directory present in the git repository.\n",
                self.role.purpose()
            );
            fs::write(&readme, body)
                .with_io_context(|| format!("writing {}", readme.display()))?;
            git::git_add(&self.workspace_root, &[&self.relative_path])?;
            git::run_git(
                &[
                    "commit",
                    "--only",
                    "-m",
                    &format!("Add {} to repo", self.relative_path),
                    "--",
                    &self.relative_path,
                ],
                &self.workspace_root,
            )?;
        }
        Ok(())
    }

    fn snapshot_precheck(&self) -> Result<()> {
        if !self.local_path.is_dir() {
            return Err(DwsError::config(format!(
                "Missing directory {} for resource {}",
                self.local_path.display(),
                self.name
            )));
        }
        Ok(())
    }

    fn snapshot(&mut self) -> Result<HashPair> {
        if self.role != ResourceRole::Results {
            git::commit_changes_in_repo_subdir(
                &self.workspace_root,
                &self.relative_path,
                "autocommit ahead of snapshot",
            )?;
        }
        // Results content was already moved and committed by the snapshot
        // command before this point.
        Ok(HashPair {
            comparison: git::get_subdirectory_hash(&self.workspace_root, &self.relative_path)?,
            restore: git::get_local_head_hash(&self.workspace_root)?,
        })
    }

    fn restore_precheck(&self, hashval: &str) -> Result<()> {
        if self.role == ResourceRole::Results {
            return Err(DwsError::config(format!(
                "Resource '{}' holds results and cannot be restored; results are append-only history",
                self.name
            )));
        }
        if !git::commit_exists(&self.workspace_root, hashval)? {
            return Err(DwsError::config(format!(
                "No commit found with hash '{}' in {}",
                hashval,
                self.describe()
            )));
        }
        Ok(())
    }

    fn restore(&mut self, hashval: &str) -> Result<()> {
        if self.role == ResourceRole::Results {
            return Err(DwsError::internal(format!(
                "restore called on results subdirectory resource '{}'",
                self.name
            )));
        }
        git::commit_changes_in_repo_subdir(
            &self.workspace_root,
            &self.relative_path,
            "auto-commit ahead of restore",
        )?;
        git::checkout_subdir_and_apply_commit(
            &self.workspace_root,
            &self.relative_path,
            hashval,
            &format!("Restored {} to state of commit {}", self.relative_path, short_hash(hashval)),
        )
    }

    fn push_precheck(&self) -> Result<()> {
        if !self.local_path.is_dir() {
            return Err(DwsError::config(format!(
                "Missing directory {} for resource {}",
                self.local_path.display(),
                self.name
            )));
        }
        Ok(())
    }

    fn push(&mut self) -> Result<()> {
        // Sync happens at the workspace level.
        Ok(())
    }

    fn pull_precheck(&self) -> Result<()> {
        if git::is_git_subdir_dirty(&self.workspace_root, &self.relative_path)? {
            return Err(DwsError::config(format!(
                "Subdirectory {} has uncommitted changes. Please commit your changes before pulling.",
                self.relative_path
            )));
        }
        Ok(())
    }

    fn pull(&mut self) -> Result<()> {
        // Sync happens at the workspace level.
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
        let workspace_root = self.workspace_root.clone();
        let moved = move_current_files_local_fs(
            &self.name,
            &self.local_path.clone(),
            rel_dest_root,
            exclude_files,
            exclude_dirs_re,
            |src, dest| git::git_move_and_add(src, dest, &workspace_root),
            self.exec.verbose,
        )?;
        if !moved.is_empty() {
            git::run_git(
                &[
                    "commit",
                    "--only",
                    "-m",
                    &format!("Move current results to {}", rel_dest_root),
                    "--",
                    &self.relative_path,
                ],
                &self.workspace_root,
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
        let dest = self.local_path.join(rel_dest_path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_io_context(|| format!("creating directory {}", parent.display()))?;
        }
        fs::copy(src, &dest)
            .with_io_context(|| format!("copying {} to {}", src.display(), dest.display()))?;
        let rel_in_repo = format!("{}/{}", self.relative_path, rel_dest_path);
        git::git_add(&self.workspace_root, &[&rel_in_repo])?;
        git::run_git(
            &["commit", "--only", "-m", &format!("Added {}", rel_in_repo), "--", &rel_in_repo],
            &self.workspace_root,
        )?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("workspace subdirectory {} in role '{}'", self.relative_path, self.role)
    }
}
