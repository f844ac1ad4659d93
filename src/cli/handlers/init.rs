use crate::cli::ui::print_success;
use crate::core::context::ExecutionContext;
use crate::core::workspace::{clone_workspace, Workspace};
use crate::error::{DwsError, ErrorContext, Result};

pub fn handle_init(name: Option<&str>, ctx: ExecutionContext) -> Result<()> {
    let cwd = std::env::current_dir()
        .with_io_context(|| "getting current directory".to_string())?;
    let name = match name {
        Some(n) => n.to_string(),
        None => cwd
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| DwsError::config("Cannot derive a workspace name from the current directory"))?,
    };
    let ws = Workspace::init(&cwd, &name, ctx)?;
    print_success(&format!("Initialized workspace '{}' at {}", ws.name, ws.root.display()));
    Ok(())
}

pub fn handle_clone(repository: &str, directory: Option<&str>, ctx: ExecutionContext) -> Result<()> {
    let ws = clone_workspace(repository, directory, ctx)?;
    print_success(&format!("Cloned workspace '{}' into {}", ws.name, ws.root.display()));
    Ok(())
}
