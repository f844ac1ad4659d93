pub mod add;
pub mod init;
pub mod log;
pub mod restore;
pub mod snapshot;
pub mod sync;

use std::path::{Path, PathBuf};

use crate::core::context::ExecutionContext;
use crate::core::resource::ResourceRole;
use crate::core::workspace::{Workspace, BASE_DIR};
use crate::error::{DwsError, ErrorContext, Result};

/// Resolve the workspace root: an explicit --workspace-dir must contain
/// `.dataworkspace`; otherwise walk up from the current directory.
pub fn resolve_workspace_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(dir) => {
            if !dir.is_dir() {
                return Err(DwsError::config(format!("Directory '{}' does not exist", dir.display())));
            }
            if !dir.join(BASE_DIR).is_dir() {
                return Err(DwsError::config(format!(
                    "No {} directory found under '{}'. Did you run 'dws init'?",
                    BASE_DIR,
                    dir.display()
                )));
            }
            Ok(dir.to_path_buf())
        }
        None => {
            let cwd = std::env::current_dir()
                .with_io_context(|| "getting current directory".to_string())?;
            Workspace::find_containing_workspace(&cwd).ok_or_else(|| {
                DwsError::config(
                    "No containing workspace found. Run this command inside a workspace, or pass --workspace-dir.",
                )
            })
        }
    }
}

pub fn load_workspace(explicit: Option<&Path>, ctx: ExecutionContext) -> Result<Workspace> {
    let dir = resolve_workspace_dir(explicit)?;
    Workspace::load(&dir, ctx)
}

/// Resolve a role argument, prompting in interactive mode.
pub fn resolve_role(role: Option<&str>, ctx: &ExecutionContext) -> Result<ResourceRole> {
    match role {
        Some(r) => r.parse(),
        None => {
            let answer = ctx.prompt_required(
                "Please enter a role for this resource, one of [s]ource-data, [i]ntermediate-data, [c]ode, or [r]esults:",
                "--role",
            )?;
            answer.parse()
        }
    }
}

/// Resolve the resource name: explicit names must be free; otherwise the
/// suggestion (typically the path basename) is used, prompting outside of
/// batch mode.
pub fn resolve_resource_name(
    explicit: Option<&str>,
    suggestion: &str,
    ws: &Workspace,
    ctx: &ExecutionContext,
) -> Result<String> {
    let name = match explicit {
        Some(n) => n.to_string(),
        None => ctx.prompt_with_default("Please enter a short, unique name for this resource", suggestion)?,
    };
    if ws.has_resource(&name) {
        return Err(DwsError::config(format!("Resource name '{}' already in use", name)));
    }
    Ok(name)
}

/// Split a comma-separated name list option.
pub fn parse_name_list(value: Option<&str>) -> Option<Vec<String>> {
    value.map(|v| {
        v.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}
