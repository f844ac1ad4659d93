use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "dws", version, about = "Data workspace snapshot/restore tool")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Run in batch mode, never ask for user input
    #[arg(short, long, global = true)]
    pub batch: bool,

    /// Print extra diagnostic information
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Workspace root (defaults to the nearest ancestor containing .dataworkspace)
    #[arg(long, global = true)]
    pub workspace_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new workspace in the current directory
    Init {
        /// Workspace name (defaults to the directory name)
        name: Option<String>,
    },

    /// Initialize a workspace from a remote repository
    Clone {
        repository: String,
        directory: Option<String>,
    },

    /// Add a data collection to the workspace
    Add {
        #[command(subcommand)]
        resource: AddCommands,
    },

    /// Take a snapshot of the current workspace state
    Snapshot {
        /// Message describing the snapshot
        #[arg(short, long, default_value = "")]
        message: String,
        tag: Option<String>,
    },

    /// Restore the workspace to a prior snapshot
    Restore {
        /// Comma-separated resource names to revert; the rest are left as-is
        #[arg(long)]
        only: Option<String>,
        /// Comma-separated resource names to leave in their current state
        #[arg(long)]
        leave: Option<String>,
        /// Adjust resource states without recording a new snapshot when the
        /// result differs from the requested one
        #[arg(long)]
        no_new_snapshot: bool,
        tag_or_hash: String,
    },

    /// Push resources and workspace metadata to their origins
    Push,

    /// Pull resources and workspace metadata from their origins
    Pull {
        /// Comma-separated resource names to pull; the rest are skipped
        #[arg(long)]
        only: Option<String>,
        /// Comma-separated resource names to skip
        #[arg(long)]
        skip: Option<String>,
        /// Only pull the workspace metadata, not the resources
        #[arg(long)]
        only_workspace: bool,
    },

    /// List snapshots, newest first
    Log {
        #[arg(long)]
        max_count: Option<usize>,
    },

    /// Remove a tag from the snapshot that owns it
    DeleteTag {
        tag: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum AddCommands {
    /// Local git repository (or a subdirectory of the workspace repo)
    Git {
        #[arg(long, help = "Role: source-data, intermediate-data, code or results")]
        role: Option<String>,
        #[arg(long, help = "Short name for this resource")]
        name: Option<String>,
        #[arg(long, help = "Branch to track (separate repositories only)")]
        branch: Option<String>,
        #[arg(long, help = "Treat the repository as read-only; never push it")]
        read_only: bool,
        path: PathBuf,
    },

    /// Local file directory (not managed by git)
    LocalFiles {
        #[arg(long, help = "Role: source-data, intermediate-data, code or results")]
        role: Option<String>,
        #[arg(long, help = "Short name for this resource")]
        name: Option<String>,
        path: PathBuf,
    },

    /// Object-store bucket (directory-backed store)
    Bucket {
        #[arg(long, help = "Role: source-data, intermediate-data or code")]
        role: Option<String>,
        #[arg(long, help = "Short name for this resource")]
        name: Option<String>,
        path: PathBuf,
    },
}
