//! Resource variant for an object-store bucket. The bucket's state is a
//! versioned object listing; snapshots pin one listing, restores re-pin an
//! earlier one. All store access goes through the narrow `ObjectStore`
//! boundary; nothing here talks to a network itself.

use std::fs;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;

use crate::backends::bucket::{
    bucket_listing, compress_listing, listing_to_canonical_bytes, DirObjectStore, ObjectStore,
    SNAPSHOTS_PREFIX,
};
use crate::core::context::ExecutionContext;
use crate::core::hash::compute_content_hash;
use crate::core::registry::ResourceEnv;
use crate::core::resource::{
    param_role, param_str, Capabilities, HashPair, ParamMap, Resource, ResourceRole,
};
use crate::error::{DwsError, ErrorContext, Result};

pub const RESOURCE_TYPE: &str = "bucket";

const CURRENT_SNAPSHOT_FILE: &str = "current_snapshot.txt";
const SNAPSHOT_CACHE_DIR: &str = "snapshot_cache";

pub struct BucketResource {
    name: String,
    role: ResourceRole,
    bucket_name: String,
    store: Box<dyn ObjectStore>,
    store_path: PathBuf,
    scratch_dir: PathBuf,
    current_snapshot: Option<String>,
    exec: ExecutionContext,
}

impl std::fmt::Debug for BucketResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketResource")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("bucket_name", &self.bucket_name)
            .field("store_path", &self.store_path)
            .field("scratch_dir", &self.scratch_dir)
            .field("current_snapshot", &self.current_snapshot)
            .field("exec", &self.exec)
            .finish()
    }
}

impl BucketResource {
    pub fn new(
        name: String,
        role: ResourceRole,
        bucket_name: String,
        store_path: PathBuf,
        env: &ResourceEnv,
    ) -> Result<Self> {
        if role == ResourceRole::Results {
            return Err(DwsError::NotSupported {
                operation: "add".to_string(),
                reason: format!("the '{}' role is not supported for bucket resources", role),
            });
        }
        let scratch_dir = env.scratch_dir(RESOURCE_TYPE, &name)?;
        fs::create_dir_all(scratch_dir.join(SNAPSHOT_CACHE_DIR))
            .with_io_context(|| "creating bucket snapshot cache".to_string())?;
        let current_file = scratch_dir.join(CURRENT_SNAPSHOT_FILE);
        let current_snapshot = if current_file.exists() {
            let text = fs::read_to_string(&current_file)
                .with_io_context(|| format!("reading {}", current_file.display()))?;
            let trimmed = text.trim().to_string();
            if trimmed.is_empty() { None } else { Some(trimmed) }
        } else {
            None
        };
        Ok(Self {
            name,
            role,
            bucket_name,
            store: Box::new(DirObjectStore::new(&store_path)),
            store_path,
            scratch_dir,
            current_snapshot,
            exec: env.exec,
        })
    }

    fn snapshot_key(hashval: &str) -> String {
        format!("{}{}.json.gz", SNAPSHOTS_PREFIX, hashval)
    }

    fn cache_path(&self, hashval: &str) -> PathBuf {
        self.scratch_dir.join(SNAPSHOT_CACHE_DIR).join(format!("{}.json.gz", hashval))
    }

    fn pin_snapshot(&mut self, hashval: &str) -> Result<()> {
        let current_file = self.scratch_dir.join(CURRENT_SNAPSHOT_FILE);
        fs::write(&current_file, hashval)
            .with_io_context(|| format!("writing {}", current_file.display()))?;
        self.current_snapshot = Some(hashval.to_string());
        Ok(())
    }

    /// Fetch the snapshot listing into the local cache if needed.
    fn ensure_cached(&self, hashval: &str) -> Result<()> {
        let cache = self.cache_path(hashval);
        if cache.exists() {
            return Ok(());
        }
        let key = Self::snapshot_key(hashval);
        if !self.store.exists(&key)? {
            return Err(DwsError::config(format!(
                "Snapshot listing {} not found in bucket '{}'",
                key, self.bucket_name
            )));
        }
        let bytes = self.store.get_bytes(&key)?;
        fs::write(&cache, bytes)
            .with_io_context(|| format!("writing snapshot cache {}", cache.display()))?;
        Ok(())
    }

    fn progress_bar(&self) -> ProgressBar {
        if self.exec.verbose {
            let pb = ProgressBar::new(0);
            if let Ok(style) =
                ProgressStyle::with_template("{msg} {bar:30} {pos}/{len}")
            {
                pb.set_style(style);
            }
            pb.set_message(format!("hashing bucket '{}'", self.bucket_name));
            pb
        } else {
            ProgressBar::hidden()
        }
    }
}

pub fn from_command_line(
    role: ResourceRole,
    name: &str,
    store_path: &Path,
    env: &ResourceEnv,
) -> Result<Box<dyn Resource>> {
    if !store_path.is_dir() {
        return Err(DwsError::config(format!(
            "Bucket store directory '{}' does not exist",
            store_path.display()
        )));
    }
    let store_path = store_path
        .canonicalize()
        .with_io_context(|| format!("resolving path {}", store_path.display()))?;
    let bucket_name = store_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| DwsError::config(format!("Invalid bucket path '{}'", store_path.display())))?;
    Ok(Box::new(BucketResource::new(
        name.to_string(),
        role,
        bucket_name,
        store_path,
        env,
    )?))
}

pub fn from_params(
    params: &ParamMap,
    local_params: Option<&ParamMap>,
    env: &ResourceEnv,
) -> Result<Box<dyn Resource>> {
    let name = param_str(params, "name", "<resources.json>")?;
    let local = local_params.ok_or_else(|| {
        DwsError::config(format!(
            "Bucket resource '{}' has no local store path recorded on this copy",
            name
        ))
    })?;
    Ok(Box::new(BucketResource::new(
        name.clone(),
        param_role(params, &name)?,
        param_str(params, "bucket_name", &name)?,
        PathBuf::from(param_str(local, "store_path", &name)?),
        env,
    )?))
}

/// Materializing a bucket on a fresh copy just needs to know where the
/// store lives; there is no local content to fetch.
pub fn clone_resource(params: &ParamMap, env: &ResourceEnv) -> Result<Box<dyn Resource>> {
    let name = param_str(params, "name", "<resources.json>")?;
    let bucket_name = param_str(params, "bucket_name", &name)?;
    let answer = env.exec.prompt_required(
        &format!("Bucket resource '{}' (bucket '{}') needs its store path on this machine:", name, bucket_name),
        "the bucket store path",
    )?;
    Ok(Box::new(BucketResource::new(
        name.clone(),
        param_role(params, &name)?,
        bucket_name,
        PathBuf::from(answer),
        env,
    )?))
}

pub fn url_of(params: &ParamMap, _local_params: Option<&ParamMap>) -> Result<String> {
    let name = param_str(params, "name", "<resources.json>")?;
    let bucket_name = param_str(params, "bucket_name", &name)?;
    Ok(format!("bucket://{}", bucket_name))
}

impl Resource for BucketResource {
    fn name(&self) -> &str {
        &self.name
    }

    fn resource_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn role(&self) -> ResourceRole {
        self.role
    }

    fn url(&self) -> String {
        format!("bucket://{}", self.bucket_name)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { local_state: false, file_like: true, snapshottable: true }
    }

    fn params(&self) -> ParamMap {
        let mut params = ParamMap::new();
        params.insert("name".to_string(), json!(self.name));
        params.insert("resource_type".to_string(), json!(RESOURCE_TYPE));
        params.insert("role".to_string(), json!(self.role.as_str()));
        params.insert("bucket_name".to_string(), json!(self.bucket_name));
        params
    }

    fn local_params(&self) -> ParamMap {
        let mut params = ParamMap::new();
        params.insert("store_path".to_string(), json!(self.store_path.to_string_lossy()));
        params
    }

    fn local_path(&self) -> Option<&Path> {
        None
    }

    fn add_precheck(&self) -> Result<()> {
        self.store.list_keys().map_err(|e| {
            DwsError::config(format!("Bucket '{}' is not reachable: {}", self.bucket_name, e))
        })?;
        Ok(())
    }

    fn add(&mut self) -> Result<()> {
        Ok(())
    }

    fn snapshot_precheck(&self) -> Result<()> {
        self.store.list_keys().map_err(|e| {
            DwsError::config(format!("Bucket '{}' is not reachable: {}", self.bucket_name, e))
        })?;
        Ok(())
    }

    fn snapshot(&mut self) -> Result<HashPair> {
        // A pinned snapshot short-circuits: the visible state already is
        // that snapshot.
        if let Some(current) = &self.current_snapshot {
            return Ok(HashPair::same(current.clone()));
        }
        let pb = self.progress_bar();
        let versions = bucket_listing(self.store.as_ref(), Some(&pb))?;
        pb.finish_and_clear();
        let bytes = listing_to_canonical_bytes(&versions)?;
        let hashval = compute_content_hash(&bytes);
        let packed = compress_listing(&bytes)?;
        self.store.put_bytes(&Self::snapshot_key(&hashval), &packed)?;
        fs::write(self.cache_path(&hashval), &packed)
            .with_io_context(|| "writing bucket snapshot cache".to_string())?;
        self.pin_snapshot(&hashval)?;
        Ok(HashPair::same(hashval))
    }

    fn restore_precheck(&self, hashval: &str) -> Result<()> {
        if self.cache_path(hashval).exists() || self.store.exists(&Self::snapshot_key(hashval))? {
            Ok(())
        } else {
            Err(DwsError::config(format!(
                "Snapshot listing for {} not found for bucket '{}'",
                hashval, self.bucket_name
            )))
        }
    }

    fn restore(&mut self, hashval: &str) -> Result<()> {
        self.ensure_cached(hashval)?;
        self.pin_snapshot(hashval)
    }

    fn push_precheck(&self) -> Result<()> {
        // The store is its own source of truth; nothing to sync.
        Ok(())
    }

    fn push(&mut self) -> Result<()> {
        Ok(())
    }

    fn pull_precheck(&self) -> Result<()> {
        Ok(())
    }

    fn pull(&mut self) -> Result<()> {
        Ok(())
    }

    fn describe(&self) -> String {
        format!("bucket '{}' in role '{}'", self.bucket_name, self.role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn env(root: &Path) -> ResourceEnv {
        ResourceEnv {
            workspace_root: root.to_path_buf(),
            exec: ExecutionContext::new(true, false),
        }
    }

    fn setup() -> (tempfile::TempDir, tempfile::TempDir, BucketResource) {
        let ws = tempdir().unwrap();
        let bucket_dir = tempdir().unwrap();
        fs::write(bucket_dir.path().join("one.csv"), b"1").unwrap();
        fs::write(bucket_dir.path().join("two.csv"), b"2").unwrap();
        let r = BucketResource::new(
            "mybucket".to_string(),
            ResourceRole::SourceData,
            "mybucket".to_string(),
            bucket_dir.path().to_path_buf(),
            &env(ws.path()),
        )
        .unwrap();
        (ws, bucket_dir, r)
    }

    #[test]
    fn test_results_role_not_supported() {
        let ws = tempdir().unwrap();
        let bucket_dir = tempdir().unwrap();
        let err = BucketResource::new(
            "b".to_string(),
            ResourceRole::Results,
            "b".to_string(),
            bucket_dir.path().to_path_buf(),
            &env(ws.path()),
        )
        .unwrap_err();
        assert!(matches!(err, DwsError::NotSupported { .. }));
    }

    #[test]
    fn test_snapshot_pins_and_short_circuits() {
        let (_ws, bucket_dir, mut r) = setup();
        let first = r.snapshot().unwrap();
        // Changing an object after pinning must not change the resource's
        // reported state until the pin moves.
        fs::write(bucket_dir.path().join("one.csv"), b"changed").unwrap();
        let second = r.snapshot().unwrap();
        assert_eq!(first.comparison, second.comparison);
    }

    #[test]
    fn test_snapshot_persists_listing_in_store_and_cache() {
        let (_ws, bucket_dir, mut r) = setup();
        let pair = r.snapshot().unwrap();
        let store = DirObjectStore::new(bucket_dir.path());
        assert!(store.exists(&BucketResource::snapshot_key(&pair.comparison)).unwrap());
        assert!(r.cache_path(&pair.comparison).exists());
    }

    #[test]
    fn test_restore_repins_known_snapshot() {
        let (ws, bucket_dir, mut r) = setup();
        let pair = r.snapshot().unwrap();

        // New resource instance for the same scratch dir picks up the pin.
        let mut r2 = BucketResource::new(
            "mybucket".to_string(),
            ResourceRole::SourceData,
            "mybucket".to_string(),
            bucket_dir.path().to_path_buf(),
            &env(ws.path()),
        )
        .unwrap();
        assert_eq!(r2.snapshot().unwrap().comparison, pair.comparison);

        r2.restore_precheck(&pair.restore).unwrap();
        r2.restore(&pair.restore).unwrap();
        assert!(matches!(
            r2.restore_precheck("0000000000000000"),
            Err(DwsError::Config { .. })
        ));
    }
}
