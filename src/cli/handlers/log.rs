use std::path::Path;

use owo_colors::OwoColorize;

use crate::cli::ui::print_success;
use crate::core::context::ExecutionContext;
use crate::core::hash::short_hash;
use crate::error::Result;

use super::load_workspace;

pub fn handle_log(max_count: Option<usize>, workspace_dir: Option<&Path>, ctx: ExecutionContext) -> Result<()> {
    let ws = load_workspace(workspace_dir, ctx)?;
    let snapshots = ws.store().list_snapshots(true, max_count)?;
    if snapshots.is_empty() {
        println!("{}", "No snapshots in this workspace yet".yellow());
        return Ok(());
    }
    for md in snapshots {
        let time_str = md.timestamp.format("%Y-%m-%d %H:%M:%S");
        let tags = if md.tags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", md.tags.join(", "))
        };
        println!(
            "{} {}{} {}",
            short_hash(&md.hashval).bright_yellow(),
            time_str.dimmed(),
            tags.cyan(),
            md.message
        );
    }
    Ok(())
}

pub fn handle_delete_tag(tag: &str, workspace_dir: Option<&Path>, ctx: ExecutionContext) -> Result<()> {
    let ws = load_workspace(workspace_dir, ctx)?;
    let store = ws.store();
    // Unknown tags are the user's mistake; the store-level removal treats
    // them as a caller bug, so validate here first.
    let md = store.get_snapshot_by_tag(tag)?;
    store.remove_tag_from_snapshot(&md.hashval, tag)?;
    ws.save(&format!("Removed tag {} from snapshot {}", tag, short_hash(&md.hashval)))?;
    print_success(&format!("Removed tag '{}' from snapshot {}", tag, short_hash(&md.hashval)));
    Ok(())
}
