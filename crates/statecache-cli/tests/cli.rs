//! Tests for the statecache binary
//!
//! These tests verify that the CLI can:
//! - Report an empty cache root
//! - Describe and inspect a saved snapshot
//! - Purge every piece of cache state

use anyhow::Result;
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use statecache::{Action, CacheConfig, Node, Page, SnapshotStore, Store};
use tempfile::TempDir;

fn statecache(root: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("statecache").unwrap();
    cmd.env_remove("STATECACHE_ROOT")
        .arg("--cache-root")
        .arg(root.path());
    cmd
}

async fn save_snapshot(root: &TempDir) -> Result<()> {
    let mut store = Store::new();
    store.dispatch(Action::CreatePage {
        page: Page::new("/p/", "/t.js").with_context(json!({"id": "123456"})),
        plugin: "default-site-plugin".to_string(),
    });
    store.dispatch(Action::CreateNode(Node::new("n1", "File", "fs")));

    SnapshotStore::new(CacheConfig::with_root(root.path()))
        .save_state(&store)
        .await?;
    Ok(())
}

#[test]
fn status_of_empty_root() {
    let root = TempDir::new().unwrap();

    statecache(&root)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("snapshot:   absent"))
        .stdout(predicate::str::contains("staging:    none"));
}

#[tokio::test]
async fn status_lists_snapshot_entries() -> Result<()> {
    let root = TempDir::new()?;
    save_snapshot(&root).await?;

    statecache(&root)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("rest.state"))
        .stdout(predicate::str::contains("nodes.0.state"));

    statecache(&root)
        .args(["status", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"state\": \"present\""));
    Ok(())
}

#[tokio::test]
async fn inspect_prints_sub_state_sizes() -> Result<()> {
    let root = TempDir::new()?;
    save_snapshot(&root).await?;

    statecache(&root)
        .arg("inspect")
        .assert()
        .success()
        .stdout(predicate::str::contains("pages:       1"))
        .stdout(predicate::str::contains("nodes:       1"));
    Ok(())
}

#[test]
fn inspect_reports_corrupt_snapshot() {
    let root = TempDir::new().unwrap();
    let snapshot = root.path().join("redux-state");
    std::fs::create_dir_all(&snapshot).unwrap();
    std::fs::write(snapshot.join("rest.state"), b"not a snapshot").unwrap();

    statecache(&root)
        .arg("inspect")
        .assert()
        .failure()
        .stderr(predicate::str::contains("corrupt snapshot"));
}

#[tokio::test]
async fn purge_removes_snapshot_and_legacy_file() -> Result<()> {
    let root = TempDir::new()?;
    save_snapshot(&root).await?;
    std::fs::write(root.path().join("redux.state"), b"legacy location for cache")?;

    statecache(&root)
        .arg("purge")
        .assert()
        .success()
        .stdout(predicate::str::contains("removed"));

    assert!(!root.path().join("redux-state").exists());
    assert!(!root.path().join("redux.state").exists());

    statecache(&root)
        .arg("purge")
        .assert()
        .success()
        .stdout(predicate::str::contains("nothing to remove"));
    Ok(())
}
