use std::path::Path;

use crate::cli::ui::{print_info, print_success};
use crate::core::context::ExecutionContext;
use crate::core::hash::short_hash;
use crate::core::snapshot::SnapshotManager;
use crate::error::Result;

use super::load_workspace;

pub fn handle_snapshot(
    message: &str,
    tag: Option<&str>,
    workspace_dir: Option<&Path>,
    ctx: ExecutionContext,
) -> Result<()> {
    let mut ws = load_workspace(workspace_dir, ctx)?;
    let report = SnapshotManager::new(&mut ws).take_snapshot(message, tag)?;
    if let Some(dest) = &report.moved_results_to {
        print_info(&format!("Moved current results to {}", dest));
    }
    if report.created_new {
        match tag {
            Some(t) => print_success(&format!(
                "Took snapshot {} with tag '{}'",
                short_hash(&report.hashval),
                t
            )),
            None => print_success(&format!("Took snapshot {}", short_hash(&report.hashval))),
        }
    } else {
        print_success(&format!(
            "Workspace state unchanged; snapshot {} already covers it",
            short_hash(&report.hashval)
        ));
    }
    Ok(())
}
