//! Durable snapshots for an in-process state store.
//!
//! A [`Store`] holds the expensive-to-rebuild state of a site build: pages,
//! the components they use, content nodes and plugin status. [`SnapshotStore`]
//! writes all of it to disk so the next run can start from there instead of
//! recomputing.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use statecache::{Action, CacheConfig, Page, SnapshotStore, Store};
//!
//! # async fn run() -> Result<(), statecache::PersistError> {
//! let snapshots = SnapshotStore::new(CacheConfig::with_root("/srv/site/.cache"));
//!
//! // Start from the last snapshot, or empty on a cold start
//! let mut store = snapshots.restore_store().await?;
//!
//! store.dispatch(Action::CreatePage {
//!     page: Page::new("/blog/", "/src/templates/blog.js"),
//!     plugin: "default-site-plugin".to_string(),
//! });
//!
//! snapshots.save_state(&store).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # On-disk layout
//!
//! ```text
//! {cache_root}/
//! ├── redux-state/          # current snapshot
//! │   ├── rest.state        # components, pages, status
//! │   ├── nodes.0.state     # node chunks
//! │   └── manifest.json     # written last
//! ├── redux-state.bak/      # previous snapshot, only during a save
//! └── .redux-state-<id>/    # staging area of an in-flight save
//! ```
//!
//! A save never modifies the current snapshot in place. It assembles the new
//! one in a staging area and renames it into place; a reader sees the old
//! snapshot or the new one, never a mixture.
//!
//! # Configuration
//!
//! Environment variables:
//! - `STATECACHE_ROOT`: Cache root (default: `<cwd>/.cache`)
//! - `STATECACHE_DISABLE_PERSISTENCE`: Set to "true" to skip saving
//! - `STATECACHE_ON_CORRUPT`: `discard` or `fail`
//! - `STATECACHE_MAX_CHUNK_BYTES`: Upper bound for one node chunk

pub mod codec;
pub mod config;
pub mod digest;
pub mod error;
pub mod fs;
pub mod legacy;
pub mod manifest;
pub mod memory_fs;
pub mod ordered_map;
pub mod persist;
pub mod reader;
pub mod staging;
pub mod state;
pub mod writer;

// Re-exports for convenience
pub use codec::{Codec, JsonCodec, SnapshotEntry};
pub use config::{CacheConfig, CorruptPolicy};
pub use digest::{DigestError, EntryDigest};
pub use error::{CodecError, PersistError};
pub use fs::{Filesystem, LocalFs};
pub use legacy::LegacyCleanup;
pub use manifest::SnapshotManifest;
pub use memory_fs::{ExternalChange, FsOp, MemoryFs};
pub use ordered_map::OrderedMap;
pub use persist::{
    CacheStatus, PurgeReport, SaveOutcome, SaveReport, SnapshotPresence, SnapshotStore,
};
pub use reader::SnapshotReader;
pub use state::{Action, ComponentRecord, Node, Page, Store, StoreState};
pub use writer::{displace_previous, SnapshotWriter};
