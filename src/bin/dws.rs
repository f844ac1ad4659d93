use clap::Parser;

use dws::backends::git;
use dws::cli::handlers;
use dws::cli::ui::print_error;
use dws::cli::{Cli, Commands};
use dws::core::context::ExecutionContext;
use dws::core::registry;
use dws::error::{DwsError, Result};

fn main() {
    let cli = Cli::parse();
    let ctx = ExecutionContext::new(cli.batch, cli.verbose);
    if let Err(e) = run(cli, ctx) {
        print_error(&e.to_string());
        std::process::exit(e.exit_code());
    }
}

fn run(cli: Cli, ctx: ExecutionContext) -> Result<()> {
    registry::validate()?;
    if !git::is_git_available() {
        return Err(DwsError::config(
            "git executable not found on PATH; dws needs git to manage workspace metadata",
        ));
    }
    let workspace_dir = cli.workspace_dir;
    let workspace_dir = workspace_dir.as_deref();
    match cli.command {
        Commands::Init { name } => handlers::init::handle_init(name.as_deref(), ctx),
        Commands::Clone { repository, directory } => {
            handlers::init::handle_clone(&repository, directory.as_deref(), ctx)
        }
        Commands::Add { resource } => handlers::add::handle_add(resource, workspace_dir, ctx),
        Commands::Snapshot { message, tag } => {
            handlers::snapshot::handle_snapshot(&message, tag.as_deref(), workspace_dir, ctx)
        }
        Commands::Restore { only, leave, no_new_snapshot, tag_or_hash } => {
            handlers::restore::handle_restore(
                &tag_or_hash,
                only.as_deref(),
                leave.as_deref(),
                no_new_snapshot,
                workspace_dir,
                ctx,
            )
        }
        Commands::Push => handlers::sync::handle_push(workspace_dir, ctx),
        Commands::Pull { only, skip, only_workspace } => {
            let only = handlers::parse_name_list(only.as_deref());
            let skip = handlers::parse_name_list(skip.as_deref());
            handlers::sync::handle_pull(
                only.as_deref(),
                skip.as_deref(),
                only_workspace,
                workspace_dir,
                ctx,
            )
        }
        Commands::Log { max_count } => handlers::log::handle_log(max_count, workspace_dir, ctx),
        Commands::DeleteTag { tag } => handlers::log::handle_delete_tag(&tag, workspace_dir, ctx),
    }
}
