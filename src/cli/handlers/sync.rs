use std::path::{Path, PathBuf};

use crate::backends::git;
use crate::cli::ui::print_success;
use crate::core::actions::{run_plan, Action, Plan};
use crate::core::context::ExecutionContext;
use crate::core::registry;
use crate::core::resource::{param_str, Resource};
use crate::core::workspace;
use crate::error::{DwsError, Result};

use super::load_workspace;

struct PushResourceAction {
    resource: Box<dyn Resource>,
}

impl PushResourceAction {
    fn new(resource: Box<dyn Resource>) -> Result<Self> {
        resource.push_precheck()?;
        Ok(Self { resource })
    }
}

impl Action for PushResourceAction {
    fn describe(&self) -> String {
        format!("Push {}", self.resource.describe())
    }

    fn run(&mut self, _ctx: &ExecutionContext) -> Result<()> {
        self.resource.push()
    }
}

struct PushWorkspaceAction {
    workspace_root: PathBuf,
}

impl PushWorkspaceAction {
    fn new(workspace_root: PathBuf) -> Result<Self> {
        if !git::has_remote_origin(&workspace_root) {
            return Err(DwsError::config(format!(
                "Workspace repo at {} has no remote origin to push to",
                workspace_root.display()
            )));
        }
        if git::is_git_dirty(&workspace_root)? {
            return Err(DwsError::config(format!(
                "Workspace metadata repo at {} has uncommitted changes. Please commit before pushing.",
                workspace_root.display()
            )));
        }
        let branch = git::get_current_branch(&workspace_root)?;
        if git::is_pull_needed_from_remote(&workspace_root, &branch)? {
            return Err(DwsError::config(format!(
                "Workspace at {} requires a pull from the remote origin",
                workspace_root.display()
            )));
        }
        Ok(Self { workspace_root })
    }
}

impl Action for PushWorkspaceAction {
    fn describe(&self) -> String {
        "Push the workspace metadata to origin".to_string()
    }

    fn run(&mut self, _ctx: &ExecutionContext) -> Result<()> {
        let branch = git::get_current_branch(&self.workspace_root)?;
        git::push(&self.workspace_root, &branch)
    }
}

struct PullResourceAction {
    resource: Box<dyn Resource>,
}

impl PullResourceAction {
    fn new(resource: Box<dyn Resource>) -> Result<Self> {
        resource.pull_precheck()?;
        Ok(Self { resource })
    }
}

impl Action for PullResourceAction {
    fn describe(&self) -> String {
        format!("Pull {}", self.resource.describe())
    }

    fn run(&mut self, ctx: &ExecutionContext) -> Result<()> {
        ctx.vlog(&format!("Pulling {}...", self.resource.describe()));
        self.resource.pull()
    }
}

struct PullWorkspaceAction {
    workspace_root: PathBuf,
}

impl PullWorkspaceAction {
    fn new(workspace_root: PathBuf) -> Result<Self> {
        if !git::has_remote_origin(&workspace_root) {
            return Err(DwsError::config(format!(
                "Workspace repo at {} has no remote origin to pull from",
                workspace_root.display()
            )));
        }
        if git::is_git_dirty(&workspace_root)? {
            return Err(DwsError::config(format!(
                "Workspace metadata repo at {} has uncommitted changes. Please commit before pulling.",
                workspace_root.display()
            )));
        }
        Ok(Self { workspace_root })
    }
}

impl Action for PullWorkspaceAction {
    fn describe(&self) -> String {
        "Pull the workspace metadata from origin".to_string()
    }

    fn run(&mut self, _ctx: &ExecutionContext) -> Result<()> {
        let branch = git::get_current_branch(&self.workspace_root)?;
        git::pull(&self.workspace_root, &branch)
    }
}

/// Names to process for a sync, honoring --only/--skip.
fn resources_to_process(
    all_names: &[String],
    only: Option<&[String]>,
    skip: Option<&[String]>,
) -> Result<Vec<String>> {
    for name in only.iter().flat_map(|l| l.iter()).chain(skip.iter().flat_map(|l| l.iter())) {
        if !all_names.contains(name) {
            return Err(DwsError::usage(format!(
                "No resource named '{}' exists in this workspace",
                name
            )));
        }
    }
    Ok(all_names
        .iter()
        .filter(|n| only.map(|l| l.contains(*n)).unwrap_or(true))
        .filter(|n| !skip.map(|l| l.contains(*n)).unwrap_or(false))
        .cloned()
        .collect())
}

pub fn handle_push(workspace_dir: Option<&Path>, ctx: ExecutionContext) -> Result<()> {
    let ws = load_workspace(workspace_dir, ctx)?;
    let mut plan = Plan::new();
    for name in ws.resource_names() {
        plan.push(Box::new(PushResourceAction::new(ws.instantiate_resource(&name)?)?));
    }
    plan.push(Box::new(PushWorkspaceAction::new(ws.root.clone())?));
    run_plan(plan, "push the workspace state to origins", "push complete", &ctx)?;
    print_success("Pushed workspace state to origins");
    Ok(())
}

pub fn handle_pull(
    only: Option<&[String]>,
    skip: Option<&[String]>,
    only_workspace: bool,
    workspace_dir: Option<&Path>,
    ctx: ExecutionContext,
) -> Result<()> {
    let mut ws = load_workspace(workspace_dir, ctx)?;
    let mut plan = Plan::new();
    if !only_workspace {
        for name in resources_to_process(&ws.resource_names(), only, skip)? {
            // Resources never materialized on this copy cannot be pulled;
            // they are picked up after the workspace-level pull below.
            if ws.resource_local_params(&name).is_none()
                && registry::lookup(&param_str(ws.resource_params(&name)?, "resource_type", &name)?)?
                    .has_local_state
            {
                continue;
            }
            plan.push(Box::new(PullResourceAction::new(ws.instantiate_resource(&name)?)?));
        }
    }
    plan.push(Box::new(PullWorkspaceAction::new(ws.root.clone())?));
    run_plan(plan, "pull the workspace state from origins", "pull complete", &ctx)?;

    // The pull may have brought resources added on another copy;
    // materialize any local-state resource we have no local params for.
    ws.reload()?;
    let env = ws.env();
    for name in ws.resource_names() {
        if ws.resource_local_params(&name).is_some() {
            continue;
        }
        let params = ws.resource_params(&name)?.clone();
        let rtype = param_str(&params, "resource_type", &name)?;
        let factory = registry::lookup(&rtype)?;
        if !factory.has_local_state {
            continue;
        }
        ctx.vlog(&format!("Materializing resource '{}' added on another copy", name));
        let resource = (factory.clone_resource)(&params, &env)?;
        workspace::record_local_params_file(&ws.root, &name, &resource.local_params())?;
    }
    print_success("Pulled workspace state from origins");
    Ok(())
}
