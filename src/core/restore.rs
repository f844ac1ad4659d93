//! Restore reconciliation: the three-way diff between the current
//! resource set and a target snapshot's resource set, and the plan that
//! replays, materializes, or leaves each resource accordingly.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::rc::Rc;

use chrono::Utc;

use crate::backends::git;
use crate::core::actions::{run_plan, Action, Plan};
use crate::core::context::ExecutionContext;
use crate::core::hash::short_hash;
use crate::core::registry::{self, ResourceEnv};
use crate::core::resource::{param_str, HashPair, ParamMap, Resource, ResourceRole};
use crate::core::snapshot::{ManifestEntry, SnapshotHistoryEntry, SnapshotManifest, SnapshotMetadata};
use crate::core::store::SnapshotStore;
use crate::core::workspace::{self, Workspace};
use crate::error::{DwsError, Result};

/// The three-way partition of resource names. The three sets are pairwise
/// disjoint and their union is `current ∪ snapshot`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamePartition {
    pub to_restore: Vec<String>,
    pub to_add: Vec<String>,
    pub to_leave: Vec<String>,
}

/// Decide what to do for each resource, given what exists now, what the
/// snapshot recorded, and the `--only`/`--leave` restrictions.
pub fn process_names(
    current_names: &BTreeSet<String>,
    snapshot_names: &BTreeSet<String>,
    only: Option<&[String]>,
    leave: Option<&[String]>,
) -> Result<NamePartition> {
    if only.is_some() && leave.is_some() {
        return Err(DwsError::usage("Please specify either --only or --leave, but not both"));
    }
    let all_names: BTreeSet<String> = current_names.union(snapshot_names).cloned().collect();
    let mut to_restore: BTreeSet<String> =
        snapshot_names.intersection(current_names).cloned().collect();
    let to_add: BTreeSet<String> = snapshot_names.difference(current_names).cloned().collect();
    let mut to_leave: BTreeSet<String> = current_names.difference(snapshot_names).cloned().collect();

    if let Some(only_names) = only {
        for name in only_names {
            if !all_names.contains(name) {
                return Err(DwsError::usage(format!(
                    "No resource named '{}' exists in the current or restored workspaces",
                    name
                )));
            }
        }
        for name in &all_names {
            if !only_names.contains(name) && to_restore.remove(name) {
                to_leave.insert(name.clone());
            }
        }
    }

    if let Some(leave_names) = leave {
        for name in leave_names {
            if !all_names.contains(name) {
                return Err(DwsError::usage(format!(
                    "No resource named '{}' exists in the current or restored workspaces",
                    name
                )));
            }
            if to_restore.remove(name) {
                to_leave.insert(name.clone());
            }
        }
    }

    Ok(NamePartition {
        to_restore: to_restore.into_iter().collect(),
        to_add: to_add.into_iter().collect(),
        to_leave: to_leave.into_iter().collect(),
    })
}

/// Restore a resource that exists locally, using the hash the target
/// snapshot recorded for it.
struct RestoreResourceAction {
    resource: Box<dyn Resource>,
    hashval: String,
}

impl RestoreResourceAction {
    fn new(resource: Box<dyn Resource>, hashval: String) -> Result<Self> {
        resource.restore_precheck(&hashval)?;
        Ok(Self { resource, hashval })
    }
}

impl Action for RestoreResourceAction {
    fn describe(&self) -> String {
        format!("Restore {} to {}", self.resource.describe(), short_hash(&self.hashval))
    }

    fn run(&mut self, _ctx: &ExecutionContext) -> Result<()> {
        self.resource.restore(&self.hashval)
    }
}

/// No-op marker for resources deliberately not restored (results-role
/// resources are append-only history and are never rolled back).
struct SkipResourceAction {
    description: String,
    reason: String,
}

impl Action for SkipResourceAction {
    fn describe(&self) -> String {
        format!("Skip {}: {}", self.description, self.reason)
    }

    fn run(&mut self, ctx: &ExecutionContext) -> Result<()> {
        ctx.vlog(&self.describe());
        Ok(())
    }
}

/// Materialize a resource that the snapshot declares but the local copy
/// has never seen, then restore it. The restore precheck necessarily runs
/// after materialization.
struct MaterializeResourceAction {
    params: ParamMap,
    restore_hash: Option<String>,
    env: ResourceEnv,
    workspace_root: PathBuf,
}

impl MaterializeResourceAction {
    fn new(
        params: ParamMap,
        restore_hash: Option<String>,
        env: ResourceEnv,
        workspace_root: PathBuf,
    ) -> Result<Self> {
        let name = param_str(&params, "name", "<manifest>")?;
        let rtype = param_str(&params, "resource_type", &name)?;
        registry::lookup(&rtype)?;
        Ok(Self { params, restore_hash, env, workspace_root })
    }

    fn name(&self) -> &str {
        self.params.get("name").and_then(|v| v.as_str()).unwrap_or("")
    }
}

impl Action for MaterializeResourceAction {
    fn describe(&self) -> String {
        match &self.restore_hash {
            Some(h) => format!("Materialize resource '{}' and restore it to {}", self.name(), short_hash(h)),
            None => format!("Materialize resource '{}'", self.name()),
        }
    }

    fn run(&mut self, _ctx: &ExecutionContext) -> Result<()> {
        let rtype = param_str(&self.params, "resource_type", self.name())?;
        let factory = registry::lookup(&rtype)?;
        let mut resource = (factory.clone_resource)(&self.params, &self.env)?;
        if factory.has_local_state {
            workspace::record_local_params_file(
                &self.workspace_root,
                resource.name(),
                &resource.local_params(),
            )?;
        }
        if let Some(hashval) = &self.restore_hash {
            resource.restore_precheck(hashval)?;
            resource.restore(hashval)?;
        }
        Ok(())
    }
}

/// Append a left-out resource's params to the (shared, in-plan) revised
/// manifest, so the reconciled resource set keeps it.
struct AddResourceToSnapshotAction {
    revised: Rc<RefCell<SnapshotManifest>>,
    params: ParamMap,
}

impl AddResourceToSnapshotAction {
    fn new(
        revised: Rc<RefCell<SnapshotManifest>>,
        params: ParamMap,
        local_params: Option<&ParamMap>,
    ) -> Result<Self> {
        let name = param_str(&params, "name", "<resources.json>")?;
        let rtype = param_str(&params, "resource_type", &name)?;
        let factory = registry::lookup(&rtype)?;
        let url = (factory.url_of)(&params, local_params)?;
        // A resource resolves to a unique URL; the same container must not
        // enter the snapshot twice under different names.
        for entry in revised.borrow().entries() {
            let entry_type = entry.resource_type().to_string();
            let entry_factory = registry::lookup(&entry_type)?;
            if (entry_factory.url_of)(&entry.params, None)? == url {
                return Err(DwsError::config(format!(
                    "A resource with url '{}' is already in the snapshot",
                    url
                )));
            }
        }
        Ok(Self { revised, params })
    }
}

impl Action for AddResourceToSnapshotAction {
    fn describe(&self) -> String {
        let name = self.params.get("name").and_then(|v| v.as_str()).unwrap_or("");
        format!("Add resource '{}' to the restored resource set", name)
    }

    fn run(&mut self, _ctx: &ExecutionContext) -> Result<()> {
        self.revised.borrow_mut().push_entry(ManifestEntry {
            comparison_hash: String::new(),
            restore_hash: String::new(),
            params: self.params.clone(),
        });
        Ok(())
    }
}

/// Re-snapshot a left-out resource, recording its fresh hash pair for the
/// derived manifest.
struct TakeResourceSnapshotAction {
    resource: Box<dyn Resource>,
    fresh_hashes: Rc<RefCell<BTreeMap<String, HashPair>>>,
}

impl TakeResourceSnapshotAction {
    fn new(
        resource: Box<dyn Resource>,
        fresh_hashes: Rc<RefCell<BTreeMap<String, HashPair>>>,
    ) -> Result<Self> {
        resource.snapshot_precheck()?;
        Ok(Self { resource, fresh_hashes })
    }
}

impl Action for TakeResourceSnapshotAction {
    fn describe(&self) -> String {
        format!("Re-snapshot {}", self.resource.describe())
    }

    fn run(&mut self, _ctx: &ExecutionContext) -> Result<()> {
        let pair = self.resource.snapshot()?;
        self.fresh_hashes
            .borrow_mut()
            .insert(self.resource.name().to_string(), pair);
        Ok(())
    }
}

/// Overlay the fresh hashes onto the target manifest and persist the
/// result as a brand-new snapshot, unless the overlay turns out identical
/// to the target (a pure replay). The original snapshot is never touched.
struct WriteRevisedSnapshotAction {
    store: SnapshotStore,
    revised: Rc<RefCell<SnapshotManifest>>,
    fresh_hashes: Rc<RefCell<BTreeMap<String, HashPair>>>,
    target_hash: String,
    new_hash: Rc<RefCell<Option<String>>>,
    number: u32,
}

impl Action for WriteRevisedSnapshotAction {
    fn describe(&self) -> String {
        "Write the derived snapshot manifest, if the state differs".to_string()
    }

    fn run(&mut self, _ctx: &ExecutionContext) -> Result<()> {
        let mut manifest = self.revised.borrow_mut();
        manifest.overlay_hashes(&self.fresh_hashes.borrow());
        let bytes = manifest.to_canonical_bytes()?;
        let hashval = manifest.compute_hash()?;
        if hashval == self.target_hash {
            return Ok(());
        }
        if self.store.metadata_exists(&hashval) {
            // The reconciled state matches a snapshot that already exists
            // (e.g. the same partial restore ran before). Point at it;
            // persisted records stay immutable.
            *self.new_hash.borrow_mut() = Some(hashval);
            return Ok(());
        }
        let md = SnapshotMetadata {
            hashval: hashval.clone(),
            tags: Vec::new(),
            message: format!(
                "Derived snapshot from partial restore of {}",
                short_hash(&self.target_hash)
            ),
            hostname: whoami::fallible::hostname().unwrap_or_else(|_| "localhost".to_string()),
            number: self.number,
            relative_destination_path: None,
            timestamp: Utc::now(),
        };
        self.store.save_snapshot(&md, &bytes)?;
        *self.new_hash.borrow_mut() = Some(hashval);
        Ok(())
    }
}

/// Every snapshot ever created gets a history record, derived ones
/// included.
struct AppendDerivedHistoryAction {
    store: SnapshotStore,
    new_hash: Rc<RefCell<Option<String>>>,
    target_hash: String,
}

impl Action for AppendDerivedHistoryAction {
    fn describe(&self) -> String {
        "Append the derived snapshot to the history log".to_string()
    }

    fn run(&mut self, _ctx: &ExecutionContext) -> Result<()> {
        let hash = match self.new_hash.borrow().clone() {
            Some(h) => h,
            None => return Ok(()),
        };
        self.store.append_history(&SnapshotHistoryEntry {
            hash,
            tag: None,
            message: format!("Partial restore of snapshot {}", short_hash(&self.target_hash)),
            timestamp: Utc::now(),
        })
    }
}

/// Rewrite resources.json to the reconciled resource set.
struct WriteRevisedResourcesAction {
    workspace_root: PathBuf,
    revised: Rc<RefCell<SnapshotManifest>>,
}

impl Action for WriteRevisedResourcesAction {
    fn describe(&self) -> String {
        "Write the revised resources.json".to_string()
    }

    fn run(&mut self, _ctx: &ExecutionContext) -> Result<()> {
        let params = self.revised.borrow().resource_params_list();
        workspace::write_resources_file(&self.workspace_root, &params)
    }
}

/// Commit the metadata changes through the workspace's governing repo.
struct CommitWorkspaceAction {
    workspace_root: PathBuf,
    target_desc: String,
    new_hash: Rc<RefCell<Option<String>>>,
}

impl Action for CommitWorkspaceAction {
    fn describe(&self) -> String {
        "Commit the workspace metadata".to_string()
    }

    fn run(&mut self, _ctx: &ExecutionContext) -> Result<()> {
        let message = match self.new_hash.borrow().clone() {
            Some(h) => format!(
                "Partial restore of snapshot {}, resulting in new snapshot {}",
                self.target_desc,
                short_hash(&h)
            ),
            None => format!("Restore snapshot {}", self.target_desc),
        };
        git::commit_paths_in_repo(&self.workspace_root, &[workspace::BASE_DIR], &message)
    }
}

/// Outcome of a restore.
pub struct RestoreReport {
    pub target_hash: String,
    pub partition: NamePartition,
    pub new_snapshot_hash: Option<String>,
}

/// Builds and executes the reconciliation plan for one restore.
pub struct RestorePlanner<'a> {
    ws: &'a mut Workspace,
}

impl<'a> RestorePlanner<'a> {
    pub fn new(ws: &'a mut Workspace) -> Self {
        Self { ws }
    }

    pub fn restore(
        &mut self,
        tag_or_hash: &str,
        only: Option<&[String]>,
        leave: Option<&[String]>,
        no_new_snapshot: bool,
    ) -> Result<RestoreReport> {
        let store = self.ws.store();
        let exec = self.ws.exec();
        let env = self.ws.env();
        let root = self.ws.root.clone();

        let target_md = store.resolve_snapshot_ref(tag_or_hash)?;
        let target_hash = target_md.hashval.clone();
        let manifest = store.read_manifest(&target_hash)?;

        let current_names: BTreeSet<String> = self.ws.resource_names().into_iter().collect();
        let snapshot_names = manifest.names();
        let partition = process_names(&current_names, &snapshot_names, only, leave)?;

        let revised = Rc::new(RefCell::new(manifest.clone()));
        let fresh_hashes: Rc<RefCell<BTreeMap<String, HashPair>>> =
            Rc::new(RefCell::new(BTreeMap::new()));
        let new_hash: Rc<RefCell<Option<String>>> = Rc::new(RefCell::new(None));

        let mut plan = Plan::new();
        let mut create_new_hash = false;

        for name in &partition.to_restore {
            let entry = manifest.get(name).ok_or_else(|| {
                DwsError::internal(format!("Manifest entry for '{}' vanished mid-plan", name))
            })?;
            let resource = self.ws.instantiate_resource(name)?;
            if resource.role() == ResourceRole::Results {
                plan.push(Box::new(SkipResourceAction {
                    description: resource.describe(),
                    reason: "results resources are never rolled back".to_string(),
                }));
            } else {
                plan.push(Box::new(RestoreResourceAction::new(
                    resource,
                    entry.restore_hash.clone(),
                )?));
            }
        }

        for name in &partition.to_add {
            let entry = manifest.get(name).ok_or_else(|| {
                DwsError::internal(format!("Manifest entry for '{}' vanished mid-plan", name))
            })?;
            let restore_hash = if entry.role()? == ResourceRole::Results {
                None
            } else {
                Some(entry.restore_hash.clone())
            };
            plan.push(Box::new(MaterializeResourceAction::new(
                entry.params.clone(),
                restore_hash,
                env.clone(),
                root.clone(),
            )?));
        }

        for name in &partition.to_leave {
            if !manifest.contains_name(name) {
                let params = self.ws.resource_params(name)?.clone();
                plan.push(Box::new(AddResourceToSnapshotAction::new(
                    Rc::clone(&revised),
                    params,
                    self.ws.resource_local_params(name),
                )?));
            }
            if !no_new_snapshot {
                let resource = self.ws.instantiate_resource(name)?;
                plan.push(Box::new(TakeResourceSnapshotAction::new(
                    resource,
                    Rc::clone(&fresh_hashes),
                )?));
                create_new_hash = true;
            }
        }

        let reconciled_names: BTreeSet<String> = snapshot_names
            .union(&partition.to_leave.iter().cloned().collect())
            .cloned()
            .collect();
        let need_to_write_resources = current_names != reconciled_names;

        if create_new_hash {
            plan.push(Box::new(WriteRevisedSnapshotAction {
                store: store.clone(),
                revised: Rc::clone(&revised),
                fresh_hashes: Rc::clone(&fresh_hashes),
                target_hash: target_hash.clone(),
                new_hash: Rc::clone(&new_hash),
                number: store.get_next_snapshot_number()?,
            }));
            plan.push(Box::new(AppendDerivedHistoryAction {
                store: store.clone(),
                new_hash: Rc::clone(&new_hash),
                target_hash: target_hash.clone(),
            }));
        }
        if need_to_write_resources {
            plan.push(Box::new(WriteRevisedResourcesAction {
                workspace_root: root.clone(),
                revised: Rc::clone(&revised),
            }));
        }
        plan.push(Box::new(CommitWorkspaceAction {
            workspace_root: root.clone(),
            target_desc: short_hash(&target_hash),
            new_hash: Rc::clone(&new_hash),
        }));

        let fmt_list = |names: &[String]| {
            if names.is_empty() {
                "None".to_string()
            } else {
                names.join(", ")
            }
        };
        println!("Restore snapshot {}", short_hash(&target_hash));
        println!("  Resources to restore: {}", fmt_list(&partition.to_restore));
        println!("  Resources to add: {}", fmt_list(&partition.to_add));
        println!("  Resources to leave: {}", fmt_list(&partition.to_leave));

        run_plan(plan, "perform this restore", "restore complete", &exec)?;
        self.ws.reload()?;

        let new_snapshot_hash = new_hash.borrow().clone();
        Ok(RestoreReport { target_hash, partition, new_snapshot_hash })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn strings(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn assert_partition_properties(
        current: &BTreeSet<String>,
        snapshot: &BTreeSet<String>,
        partition: &NamePartition,
    ) {
        let to_restore: BTreeSet<String> = partition.to_restore.iter().cloned().collect();
        let to_add: BTreeSet<String> = partition.to_add.iter().cloned().collect();
        let to_leave: BTreeSet<String> = partition.to_leave.iter().cloned().collect();

        // Pairwise disjoint.
        assert!(to_restore.is_disjoint(&to_add));
        assert!(to_restore.is_disjoint(&to_leave));
        assert!(to_add.is_disjoint(&to_leave));

        // Union covers everything.
        let mut union = to_restore.clone();
        union.extend(to_add.iter().cloned());
        union.extend(to_leave.iter().cloned());
        let all: BTreeSet<String> = current.union(snapshot).cloned().collect();
        assert_eq!(union, all);
    }

    #[test]
    fn test_basic_partition() {
        let current = names(&["a", "b", "c"]);
        let snapshot = names(&["b", "c", "d"]);
        let p = process_names(&current, &snapshot, None, None).unwrap();
        assert_eq!(p.to_restore, strings(&["b", "c"]));
        assert_eq!(p.to_add, strings(&["d"]));
        assert_eq!(p.to_leave, strings(&["a"]));
        assert_partition_properties(&current, &snapshot, &p);
    }

    #[test]
    fn test_partition_properties_across_shapes() {
        let cases: Vec<(Vec<&str>, Vec<&str>)> = vec![
            (vec![], vec![]),
            (vec!["a"], vec![]),
            (vec![], vec!["a"]),
            (vec!["a", "b"], vec!["a", "b"]),
            (vec!["a", "b", "c"], vec!["x", "y"]),
            (vec!["a", "b", "c", "d"], vec!["b", "d", "e", "f"]),
        ];
        for (cur, snap) in cases {
            let current = names(&cur);
            let snapshot = names(&snap);
            let p = process_names(&current, &snapshot, None, None).unwrap();
            assert_partition_properties(&current, &snapshot, &p);
        }
    }

    #[test]
    fn test_only_moves_rest_to_leave() {
        let current = names(&["a", "b", "c"]);
        let snapshot = names(&["a", "b"]);
        let only = strings(&["a"]);
        let p = process_names(&current, &snapshot, Some(&only), None).unwrap();
        assert_eq!(p.to_restore, strings(&["a"]));
        assert_eq!(p.to_leave, strings(&["b", "c"]));
        assert_partition_properties(&current, &snapshot, &p);
    }

    #[test]
    fn test_leave_moves_named_out_of_restore() {
        let current = names(&["a", "b"]);
        let snapshot = names(&["a", "b"]);
        let leave = strings(&["b"]);
        let p = process_names(&current, &snapshot, None, Some(&leave)).unwrap();
        assert_eq!(p.to_restore, strings(&["a"]));
        assert_eq!(p.to_leave, strings(&["b"]));
        assert_partition_properties(&current, &snapshot, &p);
    }

    #[test]
    fn test_unknown_name_is_usage_error() {
        let current = names(&["a"]);
        let snapshot = names(&["b"]);
        for (only, leave) in [(Some(strings(&["zz"])), None), (None, Some(strings(&["zz"])))] {
            let err =
                process_names(&current, &snapshot, only.as_deref(), leave.as_deref()).unwrap_err();
            assert!(matches!(err, DwsError::Usage { .. }));
        }
    }

    #[test]
    fn test_only_and_leave_together_rejected() {
        let current = names(&["a"]);
        let snapshot = names(&["a"]);
        let only = strings(&["a"]);
        let leave = strings(&["a"]);
        let err = process_names(&current, &snapshot, Some(&only), Some(&leave)).unwrap_err();
        assert!(matches!(err, DwsError::Usage { .. }));
    }

    #[test]
    fn test_spec_scenario_partition() {
        // Workspace has {A, B, C}; snapshot H1 recorded {A, B}; restore
        // with --only A: B falls out of to_restore, C was never in H1.
        let current = names(&["A", "B", "C"]);
        let snapshot = names(&["A", "B"]);
        let only = strings(&["A"]);
        let p = process_names(&current, &snapshot, Some(&only), None).unwrap();
        assert_eq!(p.to_restore, strings(&["A"]));
        assert_eq!(p.to_add, Vec::<String>::new());
        assert_eq!(p.to_leave, strings(&["B", "C"]));
    }
}
