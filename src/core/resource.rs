use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{DwsError, Result};

/// Shared, serializable resource parameters. A sorted map so that canonical
/// manifest bytes never depend on JSON key order.
pub type ParamMap = BTreeMap<String, serde_json::Value>;

/// The role a resource plays within the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceRole {
    #[serde(rename = "source-data")]
    SourceData,
    #[serde(rename = "intermediate-data")]
    IntermediateData,
    #[serde(rename = "code")]
    Code,
    #[serde(rename = "results")]
    Results,
}

impl ResourceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceRole::SourceData => "source-data",
            ResourceRole::IntermediateData => "intermediate-data",
            ResourceRole::Code => "code",
            ResourceRole::Results => "results",
        }
    }

    pub fn purpose(&self) -> &'static str {
        match self {
            ResourceRole::SourceData => "input data sets",
            ResourceRole::IntermediateData => "intermediate data generated by the pipeline",
            ResourceRole::Code => "code used to generate results",
            ResourceRole::Results => "experiment results",
        }
    }
}

impl fmt::Display for ResourceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceRole {
    type Err = DwsError;

    /// Accepts the full role names plus the single-letter aliases used on
    /// the command line.
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "source-data" | "s" => Ok(ResourceRole::SourceData),
            "intermediate-data" | "i" => Ok(ResourceRole::IntermediateData),
            "code" | "c" => Ok(ResourceRole::Code),
            "results" | "r" => Ok(ResourceRole::Results),
            other => Err(DwsError::usage(format!(
                "Invalid resource role '{}'. Must be one of: source-data, intermediate-data, code, results",
                other
            ))),
        }
    }
}

/// Capability flags of a resource variant. Decided once at construction,
/// never probed dynamically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// The resource keeps per-copy state on the local filesystem.
    pub local_state: bool,
    /// The resource holds addressable files (as opposed to an opaque API).
    pub file_like: bool,
    /// The resource participates in snapshot/restore.
    pub snapshottable: bool,
}

/// The two hashes a snapshot records per resource: one for change
/// detection, one for replaying the state. They may differ (e.g. a
/// subdirectory tree hash vs. the repository HEAD that restores it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashPair {
    pub comparison: String,
    pub restore: String,
}

impl HashPair {
    pub fn same(hash: impl Into<String>) -> Self {
        let h = hash.into();
        Self { comparison: h.clone(), restore: h }
    }
}

/// The polymorphic resource contract. Every variant is driven exclusively
/// through this trait; optional operations are gated on `capabilities()`
/// and on the `results` role.
pub trait Resource {
    fn name(&self) -> &str;
    fn resource_type(&self) -> &'static str;
    fn role(&self) -> ResourceRole;
    /// Globally unique identity used for de-duplication across workspaces.
    fn url(&self) -> String;
    fn capabilities(&self) -> Capabilities;
    /// Shared params, as persisted in resources.json (includes name,
    /// resource_type and role).
    fn params(&self) -> ParamMap;
    /// Per-copy params (local filesystem paths and the like), never synced.
    fn local_params(&self) -> ParamMap;
    fn local_path(&self) -> Option<&Path>;

    fn add_precheck(&self) -> Result<()>;
    fn add(&mut self) -> Result<()>;

    /// Must be a pure read: no side effects on the resource.
    fn snapshot_precheck(&self) -> Result<()>;
    fn snapshot(&mut self) -> Result<HashPair>;
    fn restore_precheck(&self, hashval: &str) -> Result<()>;
    fn restore(&mut self, hashval: &str) -> Result<()>;

    fn push_precheck(&self) -> Result<()>;
    fn push(&mut self) -> Result<()>;
    fn pull_precheck(&self) -> Result<()>;
    fn pull(&mut self) -> Result<()>;

    /// Move the current result files into `rel_dest_root` ahead of a
    /// snapshot. Only meaningful for the results role; calling it on any
    /// other resource is a caller bug.
    fn results_move_current_files(
        &mut self,
        _rel_dest_root: &str,
        _exclude_files: &HashSet<String>,
        _exclude_dirs_re: &Regex,
    ) -> Result<()> {
        Err(DwsError::internal(format!(
            "results_move_current_files called on non-results resource '{}'",
            self.name()
        )))
    }

    /// Copy a file into the resource at `rel_dest_path`. Results role only.
    fn add_results_file(&mut self, _src: &Path, _rel_dest_path: &str) -> Result<()> {
        Err(DwsError::internal(format!(
            "add_results_file called on non-results resource '{}'",
            self.name()
        )))
    }

    fn describe(&self) -> String;
}

/// Pull a required string field out of a params map, with a useful error
/// when a persisted file is malformed.
pub fn param_str(params: &ParamMap, key: &str, owner: &str) -> Result<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            DwsError::config(format!(
                "Resource entry for '{}' is missing required field '{}'",
                owner, key
            ))
        })
}

pub fn param_bool(params: &ParamMap, key: &str) -> bool {
    params.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

pub fn param_role(params: &ParamMap, owner: &str) -> Result<ResourceRole> {
    let raw = param_str(params, "role", owner)?;
    serde_json::from_value(serde_json::Value::String(raw.clone())).map_err(|_| {
        DwsError::config(format!("Resource entry for '{}' has unknown role '{}'", owner, raw))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        for role in [
            ResourceRole::SourceData,
            ResourceRole::IntermediateData,
            ResourceRole::Code,
            ResourceRole::Results,
        ] {
            let s = serde_json::to_string(&role).unwrap();
            let back: ResourceRole = serde_json::from_str(&s).unwrap();
            assert_eq!(role, back);
            assert_eq!(role, role.as_str().parse().unwrap());
        }
    }

    #[test]
    fn test_role_aliases() {
        assert_eq!(ResourceRole::SourceData, "s".parse().unwrap());
        assert_eq!(ResourceRole::Results, "R".parse().unwrap());
        assert!("x".parse::<ResourceRole>().is_err());
    }

    #[test]
    fn test_param_helpers() {
        let mut params = ParamMap::new();
        params.insert("name".to_string(), serde_json::json!("data"));
        params.insert("role".to_string(), serde_json::json!("source-data"));
        params.insert("read_only".to_string(), serde_json::json!(true));

        assert_eq!(param_str(&params, "name", "data").unwrap(), "data");
        assert!(param_str(&params, "missing", "data").is_err());
        assert!(param_bool(&params, "read_only"));
        assert!(!param_bool(&params, "absent"));
        assert_eq!(param_role(&params, "data").unwrap(), ResourceRole::SourceData);
    }
}
