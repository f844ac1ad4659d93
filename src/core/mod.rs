pub mod actions;
pub mod context;
pub mod hash;
pub mod registry;
pub mod resource;
pub mod restore;
pub mod results;
pub mod snapshot;
pub mod store;
pub mod workspace;

pub use actions::{run_plan, Action, Plan};
pub use context::ExecutionContext;
pub use resource::{Capabilities, HashPair, ParamMap, Resource, ResourceRole};
pub use restore::{process_names, NamePartition, RestorePlanner};
pub use snapshot::{SnapshotManager, SnapshotManifest, SnapshotMetadata};
pub use store::SnapshotStore;
pub use workspace::Workspace;
