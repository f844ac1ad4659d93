use std::fs;
use std::path::{Path, PathBuf};

use crate::core::hash::{find_hashes_by_prefix, short_hash, validate_hash_format};
use crate::core::snapshot::{SnapshotHistoryEntry, SnapshotManifest, SnapshotMetadata};
use crate::core::workspace::{SNAPSHOT_DIR_PATH, SNAPSHOT_METADATA_DIR_PATH};
use crate::error::{DwsError, ErrorContext, Result};

const METADATA_SUFFIX: &str = "_md.json";
const HISTORY_FILE: &str = "snapshot_history.json";

/// Persistence and lookup for snapshot manifests, metadata records and the
/// history log. Tag and prefix lookups are linear scans over the metadata
/// directory — fine for modest snapshot counts, and isolated here so a
/// reverse index could replace them without touching callers.
///
/// No cross-process locking: concurrent writers overwrite whole files,
/// last writer wins.
#[derive(Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self { root: workspace_root.into() }
    }

    fn snapshot_dir(&self) -> PathBuf {
        self.root.join(SNAPSHOT_DIR_PATH)
    }

    fn metadata_dir(&self) -> PathBuf {
        self.root.join(SNAPSHOT_METADATA_DIR_PATH)
    }

    fn manifest_path(&self, hashval: &str) -> PathBuf {
        self.snapshot_dir().join(format!("snapshot-{}.json", hashval.to_lowercase()))
    }

    fn metadata_path(&self, hashval: &str) -> PathBuf {
        self.metadata_dir().join(format!("{}{}", hashval.to_lowercase(), METADATA_SUFFIX))
    }

    fn history_path(&self) -> PathBuf {
        self.snapshot_dir().join(HISTORY_FILE)
    }

    fn ensure_layout(&self) -> Result<()> {
        for dir in [self.snapshot_dir(), self.metadata_dir()] {
            fs::create_dir_all(&dir)
                .with_io_context(|| format!("creating snapshot directory {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn metadata_exists(&self, hashval: &str) -> bool {
        self.metadata_path(hashval).exists()
    }

    /// Direct keyed read of a metadata record.
    pub fn get_snapshot_metadata(&self, hashval: &str) -> Result<SnapshotMetadata> {
        let hashval = hashval.to_lowercase();
        let path = self.metadata_path(&hashval);
        if !path.exists() {
            return Err(DwsError::config(format!("No metadata entry for snapshot {}", hashval)));
        }
        let md = self.read_metadata_file(&path)?;
        if md.hashval != hashval {
            return Err(DwsError::internal(format!(
                "Snapshot metadata file {} claims hash {}",
                path.display(),
                md.hashval
            )));
        }
        Ok(md)
    }

    fn read_metadata_file(&self, path: &Path) -> Result<SnapshotMetadata> {
        let content = fs::read_to_string(path)
            .with_io_context(|| format!("reading snapshot metadata {}", path.display()))?;
        serde_json::from_str(&content)
            .map_err(|e| DwsError::config_in(format!("Invalid snapshot metadata: {}", e), path))
    }

    /// All persisted hash values, sorted.
    pub fn all_hashes(&self) -> Result<Vec<String>> {
        let dir = self.metadata_dir();
        let mut hashes = Vec::new();
        if !dir.is_dir() {
            return Ok(hashes);
        }
        let entries = fs::read_dir(&dir)
            .with_io_context(|| format!("reading snapshot metadata directory {}", dir.display()))?;
        for entry in entries {
            let entry = entry.with_io_context(|| "reading snapshot metadata entry".to_string())?;
            let fname = entry.file_name().to_string_lossy().to_string();
            if let Some(hashval) = fname.strip_suffix(METADATA_SUFFIX) {
                hashes.push(hashval.to_lowercase());
            }
        }
        hashes.sort();
        Ok(hashes)
    }

    /// Linear scan for exact tag membership (not substring).
    pub fn get_snapshot_by_tag(&self, tag: &str) -> Result<SnapshotMetadata> {
        for hashval in self.all_hashes()? {
            let md = self.get_snapshot_metadata(&hashval)?;
            if md.has_tag(tag) {
                return Ok(md);
            }
        }
        Err(DwsError::config(format!("Snapshot for tag '{}' not found", tag)))
    }

    /// Prefix lookup over persisted hashes. An ambiguous prefix is a
    /// configuration error listing every match, so repeated calls can never
    /// silently pick different snapshots.
    pub fn get_snapshot_by_partial_hash(&self, partial: &str) -> Result<SnapshotMetadata> {
        let partial = partial.to_lowercase();
        let hashes = self.all_hashes()?;
        let matches = find_hashes_by_prefix(&hashes, &partial);
        match matches.len() {
            0 => Err(DwsError::config(format!(
                "Snapshot match for partial hash '{}' not found",
                partial
            ))),
            1 => self.get_snapshot_metadata(matches[0]),
            _ => Err(DwsError::config(format!(
                "Partial hash '{}' is ambiguous; it matches: {}",
                partial,
                matches.iter().map(|h| short_hash(h)).collect::<Vec<_>>().join(", ")
            ))),
        }
    }

    /// All metadata records sorted by timestamp ascending (descending when
    /// `reverse`), ties broken by hash so the order is stable run to run.
    pub fn list_snapshots(&self, reverse: bool, max_count: Option<usize>) -> Result<Vec<SnapshotMetadata>> {
        let mut snapshots = Vec::new();
        for hashval in self.all_hashes()? {
            snapshots.push(self.get_snapshot_metadata(&hashval)?);
        }
        snapshots.sort_by(|a, b| (a.timestamp, &a.hashval).cmp(&(b.timestamp, &b.hashval)));
        if reverse {
            snapshots.reverse();
        }
        if let Some(max) = max_count {
            snapshots.truncate(max);
        }
        Ok(snapshots)
    }

    /// Remove a tag from a snapshot. Callers must have validated existence
    /// of both; failures here are contract violations, not user errors.
    pub fn remove_tag_from_snapshot(&self, hashval: &str, tag: &str) -> Result<()> {
        let path = self.metadata_path(hashval);
        if !path.exists() {
            return Err(DwsError::internal(format!("No metadata entry for snapshot {}", hashval)));
        }
        let mut md = self.read_metadata_file(&path)?;
        if !md.has_tag(tag) {
            return Err(DwsError::internal(format!(
                "Tag '{}' not found in snapshot {}",
                tag, hashval
            )));
        }
        md.tags.retain(|t| t != tag);
        self.write_metadata(&md)
    }

    pub fn write_metadata(&self, md: &SnapshotMetadata) -> Result<()> {
        self.ensure_layout()?;
        let path = self.metadata_path(&md.hashval);
        let content = serde_json::to_string_pretty(md)
            .with_context(|| format!("serializing snapshot metadata {}", md.hashval))?;
        fs::write(&path, content)
            .with_io_context(|| format!("writing snapshot metadata {}", path.display()))?;
        Ok(())
    }

    pub fn write_manifest_bytes(&self, hashval: &str, manifest: &[u8]) -> Result<()> {
        self.ensure_layout()?;
        let path = self.manifest_path(hashval);
        fs::write(&path, manifest)
            .with_io_context(|| format!("writing snapshot manifest {}", path.display()))?;
        Ok(())
    }

    /// Persist a manifest and its metadata record together.
    pub fn save_snapshot(&self, md: &SnapshotMetadata, manifest: &[u8]) -> Result<()> {
        self.write_manifest_bytes(&md.hashval, manifest)?;
        self.write_metadata(md)
    }

    pub fn read_manifest_bytes(&self, hashval: &str) -> Result<Vec<u8>> {
        let path = self.manifest_path(hashval);
        if !path.exists() {
            return Err(DwsError::config(format!("No snapshot found for hash value {}", hashval)));
        }
        fs::read(&path).with_io_context(|| format!("reading snapshot manifest {}", path.display()))
    }

    pub fn read_manifest(&self, hashval: &str) -> Result<SnapshotManifest> {
        SnapshotManifest::from_bytes(&self.read_manifest_bytes(hashval)?)
    }

    pub fn read_history(&self) -> Result<Vec<SnapshotHistoryEntry>> {
        let path = self.history_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path)
            .with_io_context(|| format!("reading snapshot history {}", path.display()))?;
        serde_json::from_str(&content)
            .map_err(|e| DwsError::config_in(format!("Invalid snapshot history: {}", e), path))
    }

    /// History is append-only: existing records are never edited.
    pub fn append_history(&self, entry: &SnapshotHistoryEntry) -> Result<()> {
        self.ensure_layout()?;
        let mut history = self.read_history()?;
        history.push(entry.clone());
        let path = self.history_path();
        let content = serde_json::to_string_pretty(&history)
            .with_context(|| "serializing snapshot history".to_string())?;
        fs::write(&path, content)
            .with_io_context(|| format!("writing snapshot history {}", path.display()))?;
        Ok(())
    }

    /// Snapshot numbers count persisted metadata records, starting at 1.
    /// Purely informational: copies of a workspace can race on this.
    pub fn get_next_snapshot_number(&self) -> Result<u32> {
        Ok(self.all_hashes()?.len() as u32 + 1)
    }

    /// Resolve a user-supplied snapshot reference: full hash, then tag,
    /// then unique hash prefix.
    pub fn resolve_snapshot_ref(&self, reference: &str) -> Result<SnapshotMetadata> {
        if validate_hash_format(reference) {
            return self.get_snapshot_metadata(reference);
        }
        match self.get_snapshot_by_tag(reference) {
            Ok(md) => Ok(md),
            Err(tag_err) => {
                if reference.chars().all(|c| c.is_ascii_hexdigit()) && reference.len() >= 4 {
                    self.get_snapshot_by_partial_hash(reference)
                } else {
                    Err(tag_err)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn md(hashval: &str, tags: &[&str], secs: i64) -> SnapshotMetadata {
        SnapshotMetadata {
            hashval: hashval.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            message: format!("snapshot {}", hashval),
            hostname: "testhost".to_string(),
            number: 1,
            relative_destination_path: None,
            timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        }
    }

    fn new_store() -> (tempfile::TempDir, SnapshotStore) {
        let tmp = tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path());
        (tmp, store)
    }

    #[test]
    fn test_save_and_lookup_by_hash() {
        let (_tmp, store) = new_store();
        store.save_snapshot(&md("abc123ff", &["v1"], 0), b"[]").unwrap();

        let found = store.get_snapshot_metadata("ABC123FF").unwrap();
        assert_eq!(found.hashval, "abc123ff");
        assert!(matches!(
            store.get_snapshot_metadata("deadbeef").unwrap_err(),
            DwsError::Config { .. }
        ));
        assert_eq!(store.read_manifest_bytes("abc123ff").unwrap(), b"[]");
    }

    #[test]
    fn test_lookup_by_tag_exact_membership() {
        let (_tmp, store) = new_store();
        store.save_snapshot(&md("abc123ff", &["v1"], 0), b"[]").unwrap();
        store.save_snapshot(&md("def456ff", &["v1.1"], 1), b"[]").unwrap();

        // "v1" must not match "v1.1" by substring.
        assert_eq!(store.get_snapshot_by_tag("v1").unwrap().hashval, "abc123ff");
        assert_eq!(store.get_snapshot_by_tag("v1.1").unwrap().hashval, "def456ff");
        assert!(store.get_snapshot_by_tag("v").is_err());
    }

    #[test]
    fn test_partial_hash_requires_uniqueness() {
        let (_tmp, store) = new_store();
        store.save_snapshot(&md("abc123ff", &[], 0), b"[]").unwrap();
        store.save_snapshot(&md("abc987ff", &[], 1), b"[]").unwrap();

        assert_eq!(store.get_snapshot_by_partial_hash("abc123").unwrap().hashval, "abc123ff");
        let err = store.get_snapshot_by_partial_hash("abc").unwrap_err();
        match err {
            DwsError::Config { message, .. } => assert!(message.contains("ambiguous")),
            other => panic!("expected Config error, got {:?}", other),
        }
        assert!(store.get_snapshot_by_partial_hash("ffff").is_err());
    }

    #[test]
    fn test_list_snapshots_ordering_and_cap() {
        let (_tmp, store) = new_store();
        store.save_snapshot(&md("aaaa0000", &[], 2), b"[]").unwrap();
        store.save_snapshot(&md("bbbb0000", &[], 0), b"[]").unwrap();
        store.save_snapshot(&md("cccc0000", &[], 1), b"[]").unwrap();

        let ascending: Vec<_> = store
            .list_snapshots(false, None)
            .unwrap()
            .into_iter()
            .map(|m| m.hashval)
            .collect();
        assert_eq!(ascending, vec!["bbbb0000", "cccc0000", "aaaa0000"]);

        let newest = store.list_snapshots(true, Some(1)).unwrap();
        assert_eq!(newest.len(), 1);
        assert_eq!(newest[0].hashval, "aaaa0000");
    }

    #[test]
    fn test_remove_tag_contract() {
        let (_tmp, store) = new_store();
        store.save_snapshot(&md("abc123ff", &["v1", "best"], 0), b"[]").unwrap();

        store.remove_tag_from_snapshot("abc123ff", "v1").unwrap();
        let after = store.get_snapshot_metadata("abc123ff").unwrap();
        assert_eq!(after.tags, vec!["best"]);

        // Missing tag and missing snapshot are contract violations.
        assert!(matches!(
            store.remove_tag_from_snapshot("abc123ff", "v1").unwrap_err(),
            DwsError::Internal { .. }
        ));
        assert!(matches!(
            store.remove_tag_from_snapshot("deadbeef", "v1").unwrap_err(),
            DwsError::Internal { .. }
        ));
    }

    #[test]
    fn test_history_is_append_only() {
        let (_tmp, store) = new_store();
        assert!(store.read_history().unwrap().is_empty());
        for (i, hash) in ["h1", "h2"].iter().enumerate() {
            store
                .append_history(&SnapshotHistoryEntry {
                    hash: hash.to_string(),
                    tag: None,
                    message: String::new(),
                    timestamp: Utc.timestamp_opt(1_700_000_000 + i as i64, 0).unwrap(),
                })
                .unwrap();
        }
        let history = store.read_history().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].hash, "h1");
        assert_eq!(history[1].hash, "h2");
    }

    #[test]
    fn test_next_snapshot_number() {
        let (_tmp, store) = new_store();
        assert_eq!(store.get_next_snapshot_number().unwrap(), 1);
        store.save_snapshot(&md("abc123ff", &[], 0), b"[]").unwrap();
        assert_eq!(store.get_next_snapshot_number().unwrap(), 2);
    }

    #[test]
    fn test_resolve_snapshot_ref() {
        let (_tmp, store) = new_store();
        let full = "a".repeat(64);
        store.save_snapshot(&md(&full, &["v1"], 0), b"[]").unwrap();

        assert_eq!(store.resolve_snapshot_ref(&full).unwrap().hashval, full);
        assert_eq!(store.resolve_snapshot_ref("v1").unwrap().hashval, full);
        assert_eq!(store.resolve_snapshot_ref("aaaa").unwrap().hashval, full);
        assert!(store.resolve_snapshot_ref("nope").is_err());
    }
}
