use std::path::{Path, PathBuf};

use crate::backends::git;
use crate::cli::commands::AddCommands;
use crate::cli::ui::print_success;
use crate::core::actions::{run_plan, Action, Plan};
use crate::core::context::ExecutionContext;
use crate::core::registry;
use crate::core::resource::{ParamMap, Resource};
use crate::core::workspace;
use crate::error::{DwsError, Result};

use super::{load_workspace, resolve_resource_name, resolve_role};

/// Run the resource's own registration (validating its preconditions at
/// construction time, before anything is written).
struct AddResourceAction {
    resource: Box<dyn Resource>,
}

impl AddResourceAction {
    fn new(resource: Box<dyn Resource>) -> Result<Self> {
        resource.add_precheck()?;
        Ok(Self { resource })
    }
}

impl Action for AddResourceAction {
    fn describe(&self) -> String {
        format!("Register {}", self.resource.describe())
    }

    fn run(&mut self, _ctx: &ExecutionContext) -> Result<()> {
        self.resource.add()
    }
}

/// Record the new resource in resources.json (and its local params).
struct RecordResourceAction {
    workspace_root: PathBuf,
    name: String,
    params: ParamMap,
    local_params: Option<ParamMap>,
}

impl Action for RecordResourceAction {
    fn describe(&self) -> String {
        format!("Add '{}' to resources.json", self.name)
    }

    fn run(&mut self, _ctx: &ExecutionContext) -> Result<()> {
        workspace::append_resource_params_file(&self.workspace_root, &self.params)?;
        if let Some(local) = &self.local_params {
            workspace::record_local_params_file(&self.workspace_root, &self.name, local)?;
        }
        Ok(())
    }
}

struct CommitMetadataAction {
    workspace_root: PathBuf,
    message: String,
}

impl Action for CommitMetadataAction {
    fn describe(&self) -> String {
        "Commit the workspace metadata".to_string()
    }

    fn run(&mut self, _ctx: &ExecutionContext) -> Result<()> {
        git::commit_paths_in_repo(&self.workspace_root, &[workspace::BASE_DIR], &self.message)
    }
}

pub fn handle_add(command: AddCommands, workspace_dir: Option<&Path>, ctx: ExecutionContext) -> Result<()> {
    let ws = load_workspace(workspace_dir, ctx)?;
    let env = ws.env();

    let resource = match command {
        AddCommands::Git { role, name, branch, read_only, path } => {
            let role = resolve_role(role.as_deref(), &ctx)?;
            let suggestion = suggest_name(&path);
            let name = resolve_resource_name(name.as_deref(), &suggestion, &ws, &ctx)?;
            crate::resources::git_repo::from_command_line(
                role,
                &name,
                &path,
                branch.as_deref(),
                read_only,
                &env,
            )?
        }
        AddCommands::LocalFiles { role, name, path } => {
            let role = resolve_role(role.as_deref(), &ctx)?;
            let suggestion = suggest_name(&path);
            let name = resolve_resource_name(name.as_deref(), &suggestion, &ws, &ctx)?;
            crate::resources::local_files::from_command_line(role, &name, &path, &env)?
        }
        AddCommands::Bucket { role, name, path } => {
            let role = resolve_role(role.as_deref(), &ctx)?;
            let suggestion = suggest_name(&path);
            let name = resolve_resource_name(name.as_deref(), &suggestion, &ws, &ctx)?;
            crate::resources::bucket::from_command_line(role, &name, &path, &env)?
        }
    };

    // A resource resolves to a unique URL; the same container must not be
    // tracked twice.
    let url = resource.url();
    if ws.resource_urls()?.iter().any(|u| u == &url) {
        return Err(DwsError::config(format!("Resource '{}' already in workspace", url)));
    }

    let name = resource.name().to_string();
    let description = resource.describe();
    let params = resource.params();
    let factory = registry::lookup(resource.resource_type())?;
    let local_params = factory.has_local_state.then(|| resource.local_params());

    let mut plan = Plan::new();
    plan.push(Box::new(AddResourceAction::new(resource)?));
    plan.push(Box::new(RecordResourceAction {
        workspace_root: ws.root.clone(),
        name: name.clone(),
        params,
        local_params,
    }));
    plan.push(Box::new(CommitMetadataAction {
        workspace_root: ws.root.clone(),
        message: format!("Added resource {}", name),
    }));
    run_plan(plan, &format!("add {} to the workspace", description), "resource added", &ctx)?;
    print_success(&format!("Added {} to workspace", description));
    Ok(())
}

fn suggest_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "resource".to_string())
}
