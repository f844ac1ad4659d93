use std::path::Path;

use crate::cli::ui::print_success;
use crate::core::context::ExecutionContext;
use crate::core::hash::short_hash;
use crate::core::restore::RestorePlanner;
use crate::error::{DwsError, Result};

use super::{load_workspace, parse_name_list};

pub fn handle_restore(
    tag_or_hash: &str,
    only: Option<&str>,
    leave: Option<&str>,
    no_new_snapshot: bool,
    workspace_dir: Option<&Path>,
    ctx: ExecutionContext,
) -> Result<()> {
    if only.is_some() && leave.is_some() {
        return Err(DwsError::usage("Please specify either --only or --leave, but not both"));
    }
    let only = parse_name_list(only);
    let leave = parse_name_list(leave);

    let mut ws = load_workspace(workspace_dir, ctx)?;
    let report = RestorePlanner::new(&mut ws).restore(
        tag_or_hash,
        only.as_deref(),
        leave.as_deref(),
        no_new_snapshot,
    )?;
    match &report.new_snapshot_hash {
        Some(new_hash) => print_success(&format!(
            "Restored to snapshot {}; workspace drift recorded as new snapshot {}",
            short_hash(&report.target_hash),
            short_hash(new_hash)
        )),
        None => print_success(&format!("Restored to snapshot {}", short_hash(&report.target_hash))),
    }
    Ok(())
}
