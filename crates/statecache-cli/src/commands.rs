//! CLI command implementations

use anyhow::{Context, Result};
use serde_json::json;
use statecache::{CacheConfig, CorruptPolicy, SnapshotPresence, SnapshotStore};

/// Print what is on disk under the cache root
pub async fn status(config: CacheConfig, as_json: bool) -> Result<()> {
    let root = config.cache_root.clone();
    let status = SnapshotStore::new(config)
        .status()
        .await
        .context("failed to read cache status")?;

    if as_json {
        let snapshot = match &status.snapshot {
            SnapshotPresence::Absent => json!({"state": "absent"}),
            SnapshotPresence::Present(manifest) => json!({
                "state": "present",
                "manifest": manifest,
            }),
            SnapshotPresence::Unreadable(reason) => json!({
                "state": "unreadable",
                "reason": reason,
            }),
        };
        let output = json!({
            "cache_root": root,
            "snapshot": snapshot,
            "backup_present": status.backup_present,
            "legacy_present": status.legacy_present,
            "staging_dirs": status.staging_dirs,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("cache root: {}", root.display());
    match &status.snapshot {
        SnapshotPresence::Absent => println!("snapshot:   absent"),
        SnapshotPresence::Present(manifest) => {
            println!(
                "snapshot:   {} entries, {} bytes, codec {}, written at {} ms",
                manifest.entries.len(),
                manifest.total_bytes(),
                manifest.codec,
                manifest.written_at_ms
            );
            for entry in &manifest.entries {
                println!("  {:<20} {:>12} {}", entry.name, entry.size_bytes, entry.digest);
            }
        }
        SnapshotPresence::Unreadable(reason) => println!("snapshot:   unreadable ({})", reason),
    }
    println!("backup:     {}", if status.backup_present { "present" } else { "absent" });
    println!("legacy:     {}", if status.legacy_present { "present" } else { "absent" });
    if status.staging_dirs.is_empty() {
        println!("staging:    none");
    } else {
        println!("staging:    {}", status.staging_dirs.join(", "));
    }
    Ok(())
}

/// Restore the snapshot and print sub-state sizes
pub async fn inspect(config: CacheConfig) -> Result<()> {
    // Report corruption instead of quietly showing an empty state
    let snapshots = SnapshotStore::new(config.on_corrupt(CorruptPolicy::Fail));
    let state = snapshots
        .read_state()
        .await
        .context("failed to restore snapshot")?;

    println!("components:  {}", state.components.len());
    println!("pages:       {}", state.pages.len());
    println!("nodes:       {}", state.nodes.len());
    for (node_type, ids) in &state.nodes_by_type {
        println!("  {:<24} {}", node_type, ids.len());
    }
    println!("status:      {}", state.status.len());
    Ok(())
}

/// Delete every piece of cache state under the cache root
pub async fn purge(config: CacheConfig) -> Result<()> {
    let report = SnapshotStore::new(config)
        .purge()
        .await
        .context("failed to purge cache")?;

    if report.removed.is_empty() {
        println!("nothing to remove");
    }
    for path in &report.removed {
        println!("removed {}", path.display());
    }
    Ok(())
}
