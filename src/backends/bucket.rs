//! Narrow object-store boundary used by bucket resources. The store itself
//! (network transport, real versioning) is an external collaborator; this
//! module defines the contract plus a directory-backed implementation whose
//! version identifiers are content digests.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::core::hash::compute_content_hash;
use crate::error::{ErrorContext, Result};

/// One object in a bucket-scoped listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectVersion {
    pub key: String,
    pub version_id: String,
}

/// The operations a bucket resource needs from its backing store.
pub trait ObjectStore: Send + Sync {
    fn exists(&self, key: &str) -> Result<bool>;
    fn get_bytes(&self, key: &str) -> Result<Vec<u8>>;
    fn put_bytes(&self, key: &str, data: &[u8]) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    /// All object keys in the bucket, sorted, excluding the reserved
    /// `.snapshots/` prefix.
    fn list_keys(&self) -> Result<Vec<String>>;
    /// Version identifier of one object.
    fn version_id(&self, key: &str) -> Result<String>;
}

/// Prefix under which snapshot listing files are stored in the bucket.
pub const SNAPSHOTS_PREFIX: &str = ".snapshots/";

/// Object store rooted at a local directory. Keys are relative paths;
/// version ids are truncated content digests, so rewriting an object with
/// identical bytes keeps its version.
pub struct DirObjectStore {
    root: PathBuf,
}

impl DirObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn collect_keys(&self, dir: &Path, rel: &str, out: &mut Vec<String>) -> Result<()> {
        let mut entries: Vec<_> = fs::read_dir(dir)
            .with_io_context(|| format!("reading bucket directory {}", dir.display()))?
            .collect::<std::io::Result<_>>()
            .with_io_context(|| format!("reading bucket directory {}", dir.display()))?;
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let name = entry.file_name().to_string_lossy().to_string();
            let child_rel = if rel.is_empty() { name.clone() } else { format!("{}/{}", rel, name) };
            if child_rel.starts_with(SNAPSHOTS_PREFIX) || child_rel == ".snapshots" {
                continue;
            }
            let ftype = entry
                .file_type()
                .with_io_context(|| format!("getting file type of {}", entry.path().display()))?;
            if ftype.is_dir() {
                self.collect_keys(&entry.path(), &child_rel, out)?;
            } else if ftype.is_file() {
                out.push(child_rel);
            }
        }
        Ok(())
    }
}

impl ObjectStore for DirObjectStore {
    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.key_path(key).is_file())
    }

    fn get_bytes(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.key_path(key);
        fs::read(&path).with_io_context(|| format!("reading object {}", path.display()))
    }

    fn put_bytes(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.key_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_io_context(|| format!("creating object directory {}", parent.display()))?;
        }
        fs::write(&path, data).with_io_context(|| format!("writing object {}", path.display()))
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.key_path(key);
        fs::remove_file(&path).with_io_context(|| format!("removing object {}", path.display()))
    }

    fn list_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        if self.root.is_dir() {
            self.collect_keys(&self.root.clone(), "", &mut keys)?;
        }
        keys.sort();
        Ok(keys)
    }

    fn version_id(&self, key: &str) -> Result<String> {
        let bytes = self.get_bytes(key)?;
        Ok(compute_content_hash(&bytes)[..32].to_string())
    }
}

/// Number of workers used to enumerate and hash bucket objects.
const SNAPSHOT_WORKERS: usize = 8;

/// Build the versioned listing of a bucket, fanning the per-object version
/// lookups out over a worker pool. Completion order is arbitrary; results
/// are merged into one sorted listing only after every worker has finished.
pub fn bucket_listing(
    store: &dyn ObjectStore,
    progress: Option<&indicatif::ProgressBar>,
) -> Result<BTreeMap<String, String>> {
    let keys = store.list_keys()?;
    if let Some(pb) = progress {
        pb.set_length(keys.len() as u64);
    }
    if keys.is_empty() {
        return Ok(BTreeMap::new());
    }

    let queue = Arc::new(Mutex::new(keys));
    let (tx, rx) = mpsc::channel::<Result<(String, String)>>();
    let worker_count = SNAPSHOT_WORKERS.min(queue.lock().unwrap().len());

    thread::scope(|scope| {
        for _ in 0..worker_count {
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            scope.spawn(move || loop {
                let key = match queue.lock().unwrap().pop() {
                    Some(k) => k,
                    None => break,
                };
                let result = store.version_id(&key).map(|v| (key, v));
                if tx.send(result).is_err() {
                    break;
                }
            });
        }
        drop(tx);

        // Join barrier: the listing is assembled only once the channel
        // drains, i.e. after all workers are done.
        let mut versions = BTreeMap::new();
        for result in rx {
            let (key, version) = result?;
            if let Some(pb) = progress {
                pb.inc(1);
            }
            versions.insert(key, version);
        }
        Ok(versions)
    })
}

/// Canonical bytes of a listing; the snapshot hash is the digest of these.
pub fn listing_to_canonical_bytes(versions: &BTreeMap<String, String>) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(versions)
        .with_context(|| "serializing bucket listing".to_string())
}

pub fn compress_listing(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .with_io_context(|| "compressing bucket listing".to_string())?;
    encoder
        .finish()
        .with_io_context(|| "compressing bucket listing".to_string())
}

pub fn decompress_listing(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .with_io_context(|| "decompressing bucket listing".to_string())?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hash::compute_content_hash;
    use tempfile::tempdir;

    fn seeded_store() -> (tempfile::TempDir, DirObjectStore) {
        let tmp = tempdir().unwrap();
        let store = DirObjectStore::new(tmp.path());
        store.put_bytes("b/two.csv", b"2,2,2").unwrap();
        store.put_bytes("a/one.csv", b"1,1,1").unwrap();
        store.put_bytes("top.txt", b"hello").unwrap();
        store.put_bytes(".snapshots/deadbeef.json.gz", b"ignored").unwrap();
        (tmp, store)
    }

    #[test]
    fn test_list_keys_sorted_and_snapshots_excluded() {
        let (_tmp, store) = seeded_store();
        assert_eq!(store.list_keys().unwrap(), vec!["a/one.csv", "b/two.csv", "top.txt"]);
    }

    #[test]
    fn test_version_id_tracks_content() {
        let (_tmp, store) = seeded_store();
        let v1 = store.version_id("top.txt").unwrap();
        store.put_bytes("top.txt", b"hello").unwrap();
        assert_eq!(v1, store.version_id("top.txt").unwrap());
        store.put_bytes("top.txt", b"changed").unwrap();
        assert_ne!(v1, store.version_id("top.txt").unwrap());
    }

    #[test]
    fn test_parallel_listing_matches_sequential() {
        let (_tmp, store) = seeded_store();
        let parallel = bucket_listing(&store, None).unwrap();

        let mut sequential = BTreeMap::new();
        for key in store.list_keys().unwrap() {
            let version = store.version_id(&key).unwrap();
            sequential.insert(key, version);
        }
        assert_eq!(parallel, sequential);

        let h1 = compute_content_hash(&listing_to_canonical_bytes(&parallel).unwrap());
        let h2 = compute_content_hash(&listing_to_canonical_bytes(&sequential).unwrap());
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_compress_round_trip() {
        let bytes = b"{\"a\": 1}".to_vec();
        let packed = compress_listing(&bytes).unwrap();
        assert_eq!(decompress_listing(&packed).unwrap(), bytes);
    }

    #[test]
    fn test_empty_bucket_listing() {
        let tmp = tempdir().unwrap();
        let store = DirObjectStore::new(tmp.path().join("missing"));
        assert!(bucket_listing(&store, None).unwrap().is_empty());
    }
}
