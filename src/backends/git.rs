//! Narrow glue around the external `git` executable. The version-control
//! primitives themselves (commit, push, pull, hashing) are git's business;
//! this module only shells out and maps failures onto `DwsError::Command`.

use std::path::Path;
use std::process::Command;

use crate::error::{DwsError, ErrorContext, Result};

/// Run git with the given args, returning trimmed stdout on success.
pub fn run_git(args: &[&str], cwd: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .with_io_context(|| format!("running git {} in {}", args.join(" "), cwd.display()))?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        Err(DwsError::Command {
            command: format!("git {}", args.join(" ")),
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Run git and return just the exit code (for probes where failure is an
/// answer, not an error).
pub fn run_git_rc(args: &[&str], cwd: &Path) -> Result<i32> {
    let status = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .with_io_context(|| format!("running git {} in {}", args.join(" "), cwd.display()))?;
    Ok(status.code().unwrap_or(-1))
}

pub fn is_git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

pub fn is_git_repo(dir: &Path) -> bool {
    dir.join(".git").is_dir()
}

pub fn git_init(dir: &Path) -> Result<()> {
    run_git(&["init"], dir)?;
    Ok(())
}

pub fn git_add(dir: &Path, rel_paths: &[&str]) -> Result<()> {
    let mut args = vec!["add", "--"];
    args.extend_from_slice(rel_paths);
    run_git(&args, dir)?;
    Ok(())
}

/// True when the working tree (optionally limited to a subpath) has any
/// uncommitted changes, staged or not.
pub fn is_git_dirty(dir: &Path) -> Result<bool> {
    let out = run_git(&["status", "--porcelain"], dir)?;
    Ok(!out.is_empty())
}

pub fn is_git_subdir_dirty(dir: &Path, rel_path: &str) -> Result<bool> {
    let out = run_git(&["status", "--porcelain", "--", rel_path], dir)?;
    Ok(!out.is_empty())
}

/// Stage everything and commit, if there is anything to commit.
pub fn commit_changes_in_repo(dir: &Path, message: &str) -> Result<()> {
    if !is_git_dirty(dir)? {
        return Ok(());
    }
    run_git(&["add", "-A"], dir)?;
    run_git(&["commit", "-m", message], dir)?;
    Ok(())
}

/// Stage and commit only the changes under the given subdirectory.
pub fn commit_changes_in_repo_subdir(dir: &Path, rel_path: &str, message: &str) -> Result<()> {
    if !is_git_subdir_dirty(dir, rel_path)? {
        return Ok(());
    }
    run_git(&["add", "--", rel_path], dir)?;
    run_git(&["commit", "--only", "-m", message, "--", rel_path], dir)?;
    Ok(())
}

/// Stage the listed paths and commit them, if any of them changed.
pub fn commit_paths_in_repo(dir: &Path, rel_paths: &[&str], message: &str) -> Result<()> {
    let mut probe = vec!["status", "--porcelain", "--"];
    probe.extend_from_slice(rel_paths);
    if run_git(&probe, dir)?.is_empty() {
        return Ok(());
    }
    git_add(dir, rel_paths)?;
    let mut commit = vec!["commit", "-m", message, "--"];
    commit.extend_from_slice(rel_paths);
    run_git(&commit, dir)?;
    Ok(())
}

pub fn get_local_head_hash(dir: &Path) -> Result<String> {
    run_git(&["rev-parse", "HEAD"], dir)
}

/// Hash of the remote branch head, or None when the remote has no such
/// branch (e.g. nothing was ever pushed).
pub fn get_remote_head_hash(dir: &Path, branch: &str) -> Result<Option<String>> {
    let refspec = format!("refs/heads/{}", branch);
    let out = run_git(&["ls-remote", "origin", &refspec], dir)?;
    Ok(out.split_whitespace().next().map(|s| s.to_string()))
}

/// Tree hash of a subdirectory at HEAD. Changes exactly when the
/// subdirectory's content changes, independent of the rest of the repo.
pub fn get_subdirectory_hash(dir: &Path, rel_path: &str) -> Result<String> {
    run_git(&["rev-parse", &format!("HEAD:{}", rel_path)], dir)
}

pub fn commit_exists(dir: &Path, hashval: &str) -> Result<bool> {
    let spec = format!("{}^{{commit}}", hashval);
    Ok(run_git_rc(&["cat-file", "-e", &spec], dir)? == 0)
}

/// Overlay the content of an old commit onto the working tree and record
/// it as a new commit on the current branch (history is never rewritten).
pub fn checkout_and_apply_commit(dir: &Path, hashval: &str, message: &str) -> Result<()> {
    run_git(&["checkout", hashval, "--", "."], dir)?;
    commit_changes_in_repo(dir, message)
}

/// Same, limited to one subdirectory of the repository.
pub fn checkout_subdir_and_apply_commit(
    dir: &Path,
    rel_path: &str,
    hashval: &str,
    message: &str,
) -> Result<()> {
    run_git(&["checkout", hashval, "--", rel_path], dir)?;
    commit_changes_in_repo_subdir(dir, rel_path, message)
}

pub fn get_current_branch(dir: &Path) -> Result<String> {
    run_git(&["rev-parse", "--abbrev-ref", "HEAD"], dir)
}

pub fn branch_exists(dir: &Path, branch: &str) -> Result<bool> {
    Ok(run_git_rc(&["rev-parse", "--verify", "--quiet", branch], dir)? == 0)
}

pub fn switch_branch(dir: &Path, branch: &str) -> Result<()> {
    run_git(&["checkout", branch], dir).map_err(|e| {
        DwsError::config(format!(
            "Unable to switch git repo at {} to branch {}: {}",
            dir.display(),
            branch,
            e
        ))
    })?;
    Ok(())
}

pub fn switch_branch_if_needed(dir: &Path, branch: &str) -> Result<()> {
    if get_current_branch(dir)? == branch {
        Ok(())
    } else {
        switch_branch(dir, branch)
    }
}

pub fn has_remote_origin(dir: &Path) -> bool {
    run_git_rc(&["config", "--get", "remote.origin.url"], dir)
        .map(|rc| rc == 0)
        .unwrap_or(false)
}

pub fn get_remote_origin(dir: &Path) -> Result<Option<String>> {
    match run_git(&["config", "--get", "remote.origin.url"], dir) {
        Ok(url) => Ok(Some(url)),
        Err(DwsError::Command { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

pub fn push(dir: &Path, branch: &str) -> Result<()> {
    run_git(&["push", "origin", branch], dir)?;
    Ok(())
}

pub fn pull(dir: &Path, branch: &str) -> Result<()> {
    run_git(&["pull", "origin", branch], dir)?;
    Ok(())
}

/// Clone `repository` into `dest_name` under `parent_dir`.
pub fn clone(repository: &str, parent_dir: &Path, dest_name: &str) -> Result<()> {
    run_git(&["clone", repository, dest_name], parent_dir)?;
    Ok(())
}

/// Cheap reachability probe for a remote repository.
pub fn ls_remote(repository: &str, cwd: &Path) -> Result<()> {
    run_git(&["ls-remote", "--quiet", repository], cwd).map_err(|_| {
        DwsError::config(format!("Unable to access remote repository '{}'", repository))
    })?;
    Ok(())
}

/// A pull is needed when the remote head commit is not known locally.
pub fn is_pull_needed_from_remote(dir: &Path, branch: &str) -> Result<bool> {
    match get_remote_head_hash(dir, branch)? {
        None => Ok(false),
        Some(hashval) => Ok(!commit_exists(dir, &hashval)?),
    }
}

pub fn is_file_tracked(dir: &Path, rel_path: &str) -> Result<bool> {
    Ok(run_git_rc(&["ls-files", "--error-unmatch", "--", rel_path], dir)? == 0)
}

/// Move a file (tracked or not) to a new location inside the same repo,
/// mark it read-only, and stage the result.
pub fn git_move_and_add(src_abs: &Path, dest_abs: &Path, git_root: &Path) -> Result<()> {
    let src_rel = src_abs
        .strip_prefix(git_root)
        .map_err(|_| DwsError::internal(format!("{} is outside {}", src_abs.display(), git_root.display())))?;
    let dest_rel = dest_abs
        .strip_prefix(git_root)
        .map_err(|_| DwsError::internal(format!("{} is outside {}", dest_abs.display(), git_root.display())))?;
    let src_str = src_rel.to_string_lossy().to_string();
    let dest_str = dest_rel.to_string_lossy().to_string();
    if is_file_tracked(git_root, &src_str)? {
        run_git(&["mv", &src_str, &dest_str], git_root)?;
    } else {
        std::fs::rename(src_abs, dest_abs)
            .with_io_context(|| format!("moving {} to {}", src_abs.display(), dest_abs.display()))?;
    }
    let mut perms = std::fs::metadata(dest_abs)
        .with_io_context(|| format!("reading permissions of {}", dest_abs.display()))?
        .permissions();
    perms.set_readonly(true);
    std::fs::set_permissions(dest_abs, perms)
        .with_io_context(|| format!("marking {} read-only", dest_abs.display()))?;
    run_git(&["add", "--", &dest_str], git_root)?;
    Ok(())
}
