use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

fn bin(cwd: &Path) -> Command {
    let mut cmd = Command::cargo_bin("dws").unwrap();
    cmd.current_dir(cwd);
    cmd.arg("--batch");
    // Commits must work without a configured git identity.
    cmd.env("GIT_AUTHOR_NAME", "dws-test");
    cmd.env("GIT_AUTHOR_EMAIL", "dws-test@example.com");
    cmd.env("GIT_COMMITTER_NAME", "dws-test");
    cmd.env("GIT_COMMITTER_EMAIL", "dws-test@example.com");
    cmd
}

fn resource_names(ws: &Path) -> Vec<String> {
    let raw = fs::read_to_string(ws.join(".dataworkspace/resources.json")).unwrap();
    let parsed: Vec<serde_json::Value> = serde_json::from_str(&raw).unwrap();
    parsed
        .iter()
        .map(|v| v["name"].as_str().unwrap().to_string())
        .collect()
}

fn metadata_files(ws: &Path) -> Vec<String> {
    let dir = ws.join(".dataworkspace/snapshot_metadata");
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

#[test]
fn local_files_snapshot_and_restore_flow() {
    let tmp = tempdir().unwrap();
    let ws = tmp.path().join("workspace");
    let data = tmp.path().join("data");
    fs::create_dir_all(&ws).unwrap();
    fs::create_dir_all(&data).unwrap();
    fs::write(data.join("input.csv"), "1,2,3\n").unwrap();

    bin(&ws)
        .args(["init", "myws"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized workspace 'myws'"));

    bin(&ws)
        .args(["add", "local-files", "--role", "source-data", "--name", "data"])
        .arg(&data)
        .assert()
        .success()
        .stdout(predicate::str::contains("Added"));

    // Re-adding the same directory under another name is a duplicate.
    bin(&ws)
        .args(["add", "local-files", "--role", "source-data", "--name", "data2"])
        .arg(&data)
        .assert()
        .failure()
        .stderr(predicate::str::contains("already in workspace"));

    bin(&ws)
        .args(["snapshot", "-m", "first snapshot", "v1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Took snapshot"));

    assert_eq!(metadata_files(&ws).len(), 1);
    assert!(ws.join(".dataworkspace/snapshots/snapshot_history.json").exists());

    bin(&ws)
        .args(["log"])
        .assert()
        .success()
        .stdout(predicate::str::contains("v1").and(predicate::str::contains("first snapshot")));

    // Identical state: the same snapshot covers it, no duplicate is made.
    bin(&ws)
        .args(["snapshot", "-m", "again"])
        .assert()
        .success()
        .stdout(predicate::str::contains("already covers it"));
    assert_eq!(metadata_files(&ws).len(), 1);

    // Unchanged directory restores as a pure replay.
    bin(&ws)
        .args(["restore", "v1"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Resources to restore: data")
                .and(predicate::str::contains("Restored to snapshot")),
        );

    // Re-using the tag for a different state is a configuration error.
    fs::write(data.join("input.csv"), "4,5,6\n").unwrap();
    bin(&ws)
        .args(["snapshot", "-m", "drifted", "v1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already bound"));

    // A drifted plain directory cannot be replayed.
    bin(&ws)
        .args(["restore", "--no-new-snapshot", "v1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no versioned backend"));
}

#[test]
fn subdir_resources_derived_snapshot_scenario() {
    let tmp = tempdir().unwrap();
    let ws = tmp.path().join("workspace");
    fs::create_dir_all(ws.join("codeA")).unwrap();
    fs::create_dir_all(ws.join("dataB")).unwrap();
    fs::write(ws.join("codeA/main.py"), "print('v1')\n").unwrap();
    fs::write(ws.join("dataB/table.csv"), "a,b\n").unwrap();

    bin(&ws).args(["init"]).assert().success();
    bin(&ws)
        .args(["add", "git", "--role", "code", "--name", "A", "./codeA"])
        .assert()
        .success();
    bin(&ws)
        .args(["add", "git", "--role", "source-data", "--name", "B", "./dataB"])
        .assert()
        .success();

    bin(&ws)
        .args(["snapshot", "-m", "baseline", "v1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Took snapshot"));

    let h1_md_file = metadata_files(&ws)
        .into_iter()
        .next()
        .expect("one metadata record after the first snapshot");
    let h1_md_before = fs::read_to_string(ws.join(".dataworkspace/snapshot_metadata").join(&h1_md_file)).unwrap();

    // Drift A and B, and add a brand-new resource C.
    fs::write(ws.join("codeA/main.py"), "print('v2')\n").unwrap();
    fs::write(ws.join("dataB/table.csv"), "a,b\nc,d\n").unwrap();
    fs::create_dir_all(ws.join("dataC")).unwrap();
    fs::write(ws.join("dataC/new.csv"), "x\n").unwrap();
    bin(&ws)
        .args(["add", "git", "--role", "source-data", "--name", "C", "./dataC"])
        .assert()
        .success();

    // Restore v1 for A only: B and C are left, and since B drifted and C
    // was never in v1, a derived snapshot must be recorded.
    bin(&ws)
        .args(["restore", "--only", "A", "v1"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Resources to restore: A")
                .and(predicate::str::contains("Resources to add: None"))
                .and(predicate::str::contains("Resources to leave: B, C"))
                .and(predicate::str::contains("new snapshot")),
        );

    // A's content is back at the v1 state.
    assert_eq!(fs::read_to_string(ws.join("codeA/main.py")).unwrap(), "print('v1')\n");
    // B was left alone.
    assert_eq!(fs::read_to_string(ws.join("dataB/table.csv")).unwrap(), "a,b\nc,d\n");

    // The original snapshot record is byte-identical; a second one exists.
    let md_files = metadata_files(&ws);
    assert_eq!(md_files.len(), 2);
    let h1_md_after = fs::read_to_string(ws.join(".dataworkspace/snapshot_metadata").join(&h1_md_file)).unwrap();
    assert_eq!(h1_md_before, h1_md_after);

    // All three resources remain current.
    let mut names = resource_names(&ws);
    names.sort();
    assert_eq!(names, vec!["A", "B", "C"]);

    // History: v1, the derived snapshot.
    let history: Vec<serde_json::Value> = serde_json::from_str(
        &fs::read_to_string(ws.join(".dataworkspace/snapshots/snapshot_history.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(history.len(), 2);

    // Restoring v1 again for A only, with everything unchanged since the
    // derived snapshot, must not mint a third snapshot: A is already at
    // v1 and B/C re-snapshot to the hashes the derived manifest recorded.
    bin(&ws)
        .args(["restore", "--only", "A", "v1"])
        .assert()
        .success();
    // B drifted vs v1, so every such restore derives the same revised
    // manifest; its hash already exists, so only history may grow.
    assert_eq!(metadata_files(&ws).len(), 2);
}

#[test]
fn restore_flag_validation() {
    let tmp = tempdir().unwrap();
    let ws = tmp.path().join("workspace");
    let data = tmp.path().join("data");
    fs::create_dir_all(&ws).unwrap();
    fs::create_dir_all(&data).unwrap();
    fs::write(data.join("f.txt"), "x").unwrap();

    bin(&ws).args(["init"]).assert().success();
    bin(&ws)
        .args(["add", "local-files", "--role", "source-data", "--name", "data"])
        .arg(&data)
        .assert()
        .success();
    bin(&ws).args(["snapshot", "-m", "s", "v1"]).assert().success();

    bin(&ws)
        .args(["restore", "--only", "data", "--leave", "data", "v1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("either --only or --leave"));

    bin(&ws)
        .args(["restore", "--only", "ghost", "v1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No resource named 'ghost'"));

    bin(&ws)
        .args(["restore", "unknown-tag"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn bucket_resource_flow() {
    let tmp = tempdir().unwrap();
    let ws = tmp.path().join("workspace");
    let bucket = tmp.path().join("mybucket");
    fs::create_dir_all(&ws).unwrap();
    fs::create_dir_all(&bucket).unwrap();
    fs::write(bucket.join("objects.bin"), "payload").unwrap();

    bin(&ws).args(["init"]).assert().success();
    bin(&ws)
        .args(["add", "bucket", "--role", "source-data", "--name", "store"])
        .arg(&bucket)
        .assert()
        .success();

    // The results role is a capability mismatch for buckets.
    let bucket2 = tmp.path().join("otherbucket");
    fs::create_dir_all(&bucket2).unwrap();
    bin(&ws)
        .args(["add", "bucket", "--role", "results", "--name", "store2"])
        .arg(&bucket2)
        .assert()
        .failure()
        .stderr(predicate::str::contains("not supported"));

    bin(&ws)
        .args(["snapshot", "-m", "bucket snapshot", "b1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Took snapshot"));

    // The listing landed in the bucket's reserved prefix.
    let snapshots_dir = bucket.join(".snapshots");
    assert!(snapshots_dir.is_dir());
    assert_eq!(fs::read_dir(&snapshots_dir).unwrap().count(), 1);

    // The pinned listing restores as a pure replay.
    bin(&ws)
        .args(["restore", "b1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Restored to snapshot"));
}

#[test]
fn delete_tag_flow() {
    let tmp = tempdir().unwrap();
    let ws = tmp.path().join("workspace");
    let data = tmp.path().join("data");
    fs::create_dir_all(&ws).unwrap();
    fs::create_dir_all(&data).unwrap();
    fs::write(data.join("f.txt"), "x").unwrap();

    bin(&ws).args(["init"]).assert().success();
    bin(&ws)
        .args(["add", "local-files", "--role", "source-data", "--name", "data"])
        .arg(&data)
        .assert()
        .success();
    bin(&ws).args(["snapshot", "-m", "s", "v1"]).assert().success();

    bin(&ws)
        .args(["delete-tag", "v1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed tag 'v1'"));

    bin(&ws)
        .args(["log"])
        .assert()
        .success()
        .stdout(predicate::str::contains("v1").not());

    bin(&ws)
        .args(["delete-tag", "v1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}
