use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::hash::{compute_content_hash, looks_like_hash, short_hash};
use crate::core::resource::{HashPair, ParamMap, ResourceRole};
use crate::core::results::{expand_dir_template, make_re_pattern_for_dir_template};
use crate::core::workspace::Workspace;
use crate::error::{DwsError, ErrorContext, Result};

/// Default template for the per-snapshot results subdirectory. Overridable
/// via the `results.dir_template` global param.
pub const DEFAULT_RESULTS_DIR_TEMPLATE: &str = "snapshots/{ISO_TIMESTAMP}-{TAG}";

/// Files in a results directory that are never moved into a snapshot
/// subdirectory.
pub const RESULTS_MOVE_EXCLUDE_FILES: [&str; 1] = ["README.txt"];

/// One manifest line: the two hashes recorded for a resource, together
/// with its shared params (so that a restore can materialize the resource
/// on a copy of the workspace that has never seen it).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub comparison_hash: String,
    pub restore_hash: String,
    #[serde(flatten)]
    pub params: ParamMap,
}

impl ManifestEntry {
    pub fn name(&self) -> &str {
        self.params.get("name").and_then(|v| v.as_str()).unwrap_or("")
    }

    pub fn resource_type(&self) -> &str {
        self.params.get("resource_type").and_then(|v| v.as_str()).unwrap_or("")
    }

    pub fn role(&self) -> Result<ResourceRole> {
        crate::core::resource::param_role(&self.params, self.name())
    }
}

/// An ordered, name-keyed sequence of manifest entries. Entry order and
/// param key order are pinned down here so both the persisted bytes and
/// the identity projection are canonical.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SnapshotManifest {
    entries: Vec<ManifestEntry>,
}

impl SnapshotManifest {
    pub fn new(mut entries: Vec<ManifestEntry>) -> Self {
        entries.sort_by(|a, b| a.name().cmp(b.name()));
        Self { entries }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let entries: Vec<ManifestEntry> = serde_json::from_slice(bytes)
            .with_context(|| "parsing snapshot manifest".to_string())?;
        Ok(Self::new(entries))
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.entries.iter().map(|e| e.name().to_string()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.name() == name)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn push_entry(&mut self, entry: ManifestEntry) {
        self.entries.push(entry);
        self.entries.sort_by(|a, b| a.name().cmp(b.name()));
    }

    /// Overlay freshly computed hashes onto the named entries.
    pub fn overlay_hashes(&mut self, fresh: &BTreeMap<String, HashPair>) {
        for entry in &mut self.entries {
            if let Some(pair) = fresh.get(entry.name()) {
                entry.comparison_hash = pair.comparison.clone();
                entry.restore_hash = pair.restore.clone();
            }
        }
    }

    /// Canonical byte form: entries sorted by name, params keys sorted,
    /// pretty-printed JSON. This is what gets persisted.
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(&self.entries)
            .with_context(|| "serializing snapshot manifest".to_string())
    }

    /// The snapshot identity is derived from the comparison-relevant
    /// projection only. Restore hashes can differ for identical content
    /// (a repository HEAD moves whenever metadata is committed), and
    /// identical resource states must always yield the identical hashval.
    pub fn to_identity_bytes(&self) -> Result<Vec<u8>> {
        #[derive(Serialize)]
        struct IdentityEntry<'a> {
            comparison_hash: &'a str,
            #[serde(flatten)]
            params: &'a ParamMap,
        }
        let projection: Vec<IdentityEntry> = self
            .entries
            .iter()
            .map(|e| IdentityEntry { comparison_hash: &e.comparison_hash, params: &e.params })
            .collect();
        serde_json::to_vec_pretty(&projection)
            .with_context(|| "serializing snapshot identity".to_string())
    }

    pub fn compute_hash(&self) -> Result<String> {
        Ok(compute_content_hash(&self.to_identity_bytes()?))
    }

    /// The shared resource params recorded in this manifest, in entry
    /// order. This is exactly the shape of resources.json.
    pub fn resource_params_list(&self) -> Vec<ParamMap> {
        self.entries.iter().map(|e| e.params.clone()).collect()
    }
}

/// Metadata persisted alongside a manifest. `hashval` is the identity;
/// `number` is informational only (concurrent copies of a workspace may
/// race on it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub hashval: String,
    pub tags: Vec<String>,
    pub message: String,
    pub hostname: String,
    pub number: u32,
    pub relative_destination_path: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl SnapshotMetadata {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Append-only history record; one per snapshot ever created, including
/// reconciliation-derived ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotHistoryEntry {
    pub hash: String,
    pub tag: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Tags share a namespace with snapshot refs, so a tag must not be
/// mistakable for a hash.
pub fn validate_tag(tag: &str) -> Result<()> {
    if tag.is_empty() {
        return Err(DwsError::config("Snapshot tag may not be empty"));
    }
    if looks_like_hash(tag) {
        return Err(DwsError::config(format!(
            "Tag '{}' could be confused with a snapshot hash; please include a non-hex character",
            tag
        )));
    }
    let valid = tag
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if !valid || !tag.chars().next().unwrap_or(' ').is_ascii_alphanumeric() {
        return Err(DwsError::config(format!(
            "Tag '{}' is invalid: tags start with a letter or digit and contain only letters, digits, '-', '_' and '.'",
            tag
        )));
    }
    Ok(())
}

/// Outcome of a snapshot operation.
pub struct SnapshotReport {
    pub hashval: String,
    pub created_new: bool,
    pub moved_results_to: Option<String>,
}

/// Orchestrates taking one cross-resource snapshot: precheck everything,
/// snapshot each resource in a stable order, derive the manifest identity,
/// persist, and commit through the workspace's governing repository.
pub struct SnapshotManager<'a> {
    ws: &'a mut Workspace,
}

impl<'a> SnapshotManager<'a> {
    pub fn new(ws: &'a mut Workspace) -> Self {
        Self { ws }
    }

    pub fn take_snapshot(&mut self, message: &str, tag: Option<&str>) -> Result<SnapshotReport> {
        let store = self.ws.store();
        let exec = self.ws.exec();

        // Tag bookkeeping happens against the computed hash below; here we
        // only look up any snapshot that already owns the tag.
        let existing_tagged = match tag {
            Some(t) => {
                validate_tag(t)?;
                store.get_snapshot_by_tag(t).ok()
            }
            None => None,
        };

        let mut resources = self.ws.instantiate_snapshottable()?;
        if resources.is_empty() {
            return Err(DwsError::config(
                "No snapshottable resources in workspace; add a resource first",
            ));
        }

        // Fail fast: no resource snapshot runs if any precheck fails.
        for r in &resources {
            r.snapshot_precheck()?;
        }

        // Move current result files into a per-snapshot subdirectory before
        // hashing, so the snapshot captures them at their final location.
        let number = store.get_next_snapshot_number()?;
        let moved_results_to = self.move_current_results(&mut resources, number, tag)?;

        let mut entries = Vec::with_capacity(resources.len());
        for r in &mut resources {
            exec.vlog(&format!("Taking snapshot of {}", r.describe()));
            let pair = r.snapshot()?;
            entries.push(ManifestEntry {
                comparison_hash: pair.comparison,
                restore_hash: pair.restore,
                params: r.params(),
            });
        }
        let manifest = SnapshotManifest::new(entries);
        let manifest_bytes = manifest.to_canonical_bytes()?;
        let hashval = manifest.compute_hash()?;

        if let (Some(t), Some(owner)) = (tag, existing_tagged.as_ref()) {
            if owner.hashval != hashval {
                return Err(DwsError::config(format!(
                    "Tag '{}' is already bound to snapshot {}",
                    t,
                    short_hash(&owner.hashval)
                )));
            }
        }

        let timestamp = Utc::now();
        let created_new = if store.metadata_exists(&hashval) {
            // Identical workspace state: merge the tag instead of
            // duplicating the snapshot.
            let mut md = store.get_snapshot_metadata(&hashval)?;
            if let Some(t) = tag {
                if !md.has_tag(t) {
                    md.tags.push(t.to_string());
                    store.write_metadata(&md)?;
                }
            }
            false
        } else {
            let md = SnapshotMetadata {
                hashval: hashval.clone(),
                tags: tag.map(|t| vec![t.to_string()]).unwrap_or_default(),
                message: message.to_string(),
                hostname: whoami::fallible::hostname().unwrap_or_else(|_| "localhost".to_string()),
                number,
                relative_destination_path: moved_results_to.clone(),
                timestamp,
            };
            store.save_snapshot(&md, &manifest_bytes)?;
            true
        };

        store.append_history(&SnapshotHistoryEntry {
            hash: hashval.clone(),
            tag: tag.map(|t| t.to_string()),
            message: message.to_string(),
            timestamp,
        })?;

        let commit_msg = match tag {
            Some(t) => format!("Snapshot {} (tag {})", short_hash(&hashval), t),
            None => format!("Snapshot {}", short_hash(&hashval)),
        };
        self.ws.save(&commit_msg)?;

        Ok(SnapshotReport { hashval, created_new, moved_results_to })
    }

    fn move_current_results(
        &self,
        resources: &mut [Box<dyn crate::core::resource::Resource>],
        number: u32,
        tag: Option<&str>,
    ) -> Result<Option<String>> {
        let has_results = resources
            .iter()
            .any(|r| r.role() == ResourceRole::Results && r.capabilities().file_like);
        if !has_results {
            return Ok(None);
        }

        let template = self
            .ws
            .global_param("results.dir_template")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_RESULTS_DIR_TEMPLATE)
            .to_string();
        let username = whoami::username();
        let hostname = whoami::fallible::hostname().unwrap_or_else(|_| "localhost".to_string());
        let rel_dest_root = expand_dir_template(
            &template,
            &username,
            &hostname,
            chrono::Local::now().naive_local(),
            number,
            tag,
        );
        let exclude_re = make_re_pattern_for_dir_template(&template)?;
        let exclude_files: HashSet<String> =
            RESULTS_MOVE_EXCLUDE_FILES.iter().map(|s| s.to_string()).collect();

        for r in resources.iter_mut() {
            if r.role() == ResourceRole::Results && r.capabilities().file_like {
                r.results_move_current_files(&rel_dest_root, &exclude_files, &exclude_re)?;
            }
        }
        Ok(Some(rel_dest_root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(name: &str, comparison: &str, restore: &str) -> ManifestEntry {
        let mut params = ParamMap::new();
        params.insert("name".to_string(), json!(name));
        params.insert("resource_type".to_string(), json!("file"));
        params.insert("role".to_string(), json!("source-data"));
        ManifestEntry {
            comparison_hash: comparison.to_string(),
            restore_hash: restore.to_string(),
            params,
        }
    }

    #[test]
    fn test_manifest_hash_independent_of_entry_order() {
        let m1 = SnapshotManifest::new(vec![entry("a", "h1", "h1"), entry("b", "h2", "h2")]);
        let m2 = SnapshotManifest::new(vec![entry("b", "h2", "h2"), entry("a", "h1", "h1")]);
        assert_eq!(m1.compute_hash().unwrap(), m2.compute_hash().unwrap());
    }

    #[test]
    fn test_manifest_hash_changes_with_content() {
        let m1 = SnapshotManifest::new(vec![entry("a", "h1", "h1")]);
        let m2 = SnapshotManifest::new(vec![entry("a", "h2", "h2")]);
        assert_ne!(m1.compute_hash().unwrap(), m2.compute_hash().unwrap());
    }

    #[test]
    fn test_manifest_round_trip_preserves_hash() {
        let m = SnapshotManifest::new(vec![entry("a", "h1", "h1"), entry("b", "h2", "h2")]);
        let bytes = m.to_canonical_bytes().unwrap();
        let back = SnapshotManifest::from_bytes(&bytes).unwrap();
        assert_eq!(m.compute_hash().unwrap(), back.compute_hash().unwrap());
        assert_eq!(back.names().len(), 2);
    }

    #[test]
    fn test_overlay_hashes() {
        let mut m = SnapshotManifest::new(vec![entry("a", "old", "old"), entry("b", "keep", "keep")]);
        let mut fresh = BTreeMap::new();
        fresh.insert("a".to_string(), HashPair::same("new"));
        m.overlay_hashes(&fresh);
        assert_eq!(m.get("a").unwrap().comparison_hash, "new");
        assert_eq!(m.get("b").unwrap().comparison_hash, "keep");
    }

    #[test]
    fn test_manifest_hash_ignores_restore_hash_noise() {
        // The same content restored through a different commit (the HEAD
        // moves whenever metadata is committed) is still the same snapshot.
        let m1 = SnapshotManifest::new(vec![entry("a", "content1", "head-aaa")]);
        let m2 = SnapshotManifest::new(vec![entry("a", "content1", "head-bbb")]);
        assert_eq!(m1.compute_hash().unwrap(), m2.compute_hash().unwrap());
        assert_ne!(m1.to_canonical_bytes().unwrap(), m2.to_canonical_bytes().unwrap());
    }

    #[test]
    fn test_comparison_and_restore_hashes_are_distinct_fields() {
        let m = SnapshotManifest::new(vec![entry("sub", "tree123", "head456")]);
        let e = m.get("sub").unwrap();
        assert_eq!(e.comparison_hash, "tree123");
        assert_eq!(e.restore_hash, "head456");
    }

    #[test]
    fn test_validate_tag() {
        assert!(validate_tag("v1").is_ok());
        assert!(validate_tag("release-2.0_rc1").is_ok());
        assert!(validate_tag("").is_err());
        assert!(validate_tag("abc123").is_err()); // hash-shaped
        assert!(validate_tag("-leading").is_err());
        assert!(validate_tag("has space").is_err());
    }
}
