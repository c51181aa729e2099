//! Cache configuration with environment variable and file-based loading.
//!
//! Environment variables:
//! - `STATECACHE_ROOT`: Cache root directory
//! - `STATECACHE_DISABLE_PERSISTENCE`: Set to "true" to skip saving snapshots
//! - `STATECACHE_ON_CORRUPT`: `discard` (default) or `fail`
//! - `STATECACHE_MAX_CHUNK_BYTES`: Upper bound for one node chunk entry
//!
//! Default root: `<cwd>/.cache`

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Name of the canonical snapshot directory under the cache root.
pub const SNAPSHOT_DIR_NAME: &str = "redux-state";

/// Name of the flat file older versions wrote instead of a directory.
pub const LEGACY_FILE_NAME: &str = "redux.state";

/// Name the previous snapshot is parked under while a new one is installed.
pub const BACKUP_DIR_NAME: &str = "redux-state.bak";

/// Prefix of staging directory names.
pub const STAGING_PREFIX: &str = ".redux-state-";

/// 1.5 GiB, comfortably below the 2 GiB single-buffer limit of most readers.
pub const DEFAULT_MAX_CHUNK_BYTES: u64 = 3 * 512 * 1024 * 1024;

/// What `read_state` does with a snapshot that fails to decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorruptPolicy {
    /// Log and start from the empty state.
    #[default]
    Discard,
    /// Surface the error to the caller.
    Fail,
}

impl FromStr for CorruptPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "discard" => Ok(Self::Discard),
            "fail" => Ok(Self::Fail),
            other => anyhow::bail!("unknown corrupt snapshot policy: {other}"),
        }
    }
}

/// Configuration for snapshot persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache root. The snapshot lives in `{cache_root}/redux-state/`.
    pub cache_root: PathBuf,

    /// Skip writing snapshots entirely. Reads still work.
    #[serde(default)]
    pub disable_persistence: bool,

    /// Policy for snapshots that exist but cannot be decoded.
    #[serde(default)]
    pub on_corrupt: CorruptPolicy,

    /// Upper bound for the encoded size of one node chunk.
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: u64,
}

fn default_max_chunk_bytes() -> u64 {
    DEFAULT_MAX_CHUNK_BYTES
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::with_root(default_cache_root())
    }
}

/// Get the default cache root (`<cwd>/.cache`).
fn default_cache_root() -> PathBuf {
    env::current_dir()
        .map(|dir| dir.join(".cache"))
        .unwrap_or_else(|_| PathBuf::from(".cache"))
}

impl CacheConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let cache_root = env::var("STATECACHE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_cache_root());

        let disable_persistence = env::var("STATECACHE_DISABLE_PERSISTENCE")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(false);

        let on_corrupt = match env::var("STATECACHE_ON_CORRUPT") {
            Ok(v) => v.parse().context("invalid STATECACHE_ON_CORRUPT")?,
            Err(_) => CorruptPolicy::default(),
        };

        let max_chunk_bytes = match env::var("STATECACHE_MAX_CHUNK_BYTES") {
            Ok(v) => v
                .parse()
                .with_context(|| format!("invalid STATECACHE_MAX_CHUNK_BYTES: {v}"))?,
            Err(_) => DEFAULT_MAX_CHUNK_BYTES,
        };

        Ok(Self {
            cache_root,
            disable_persistence,
            on_corrupt,
            max_chunk_bytes,
        })
    }

    /// Load configuration from a TOML file, falling back to environment.
    ///
    /// The file should contain a `[cache]` section:
    /// ```toml
    /// [cache]
    /// cache_root = "/srv/site/.cache"
    /// disable_persistence = false
    /// on_corrupt = "fail"
    /// ```
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        let table: toml::Table = contents
            .parse()
            .with_context(|| format!("failed to parse TOML: {}", path.display()))?;

        if let Some(cache_section) = table.get("cache") {
            let config: CacheConfig = cache_section
                .clone()
                .try_into()
                .context("failed to parse [cache] section")?;
            Ok(config)
        } else {
            Self::from_env()
        }
    }

    /// Create a config rooted at a specific directory.
    pub fn with_root(path: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: path.into(),
            disable_persistence: false,
            on_corrupt: CorruptPolicy::default(),
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
        }
    }

    /// Builder: set the node chunk bound.
    pub fn max_chunk_bytes(mut self, bytes: u64) -> Self {
        self.max_chunk_bytes = bytes;
        self
    }

    /// Builder: set the corrupt snapshot policy.
    pub fn on_corrupt(mut self, policy: CorruptPolicy) -> Self {
        self.on_corrupt = policy;
        self
    }

    /// Canonical snapshot directory.
    pub fn snapshot_dir(&self) -> PathBuf {
        self.cache_root.join(SNAPSHOT_DIR_NAME)
    }

    /// Flat file written by older versions.
    pub fn legacy_file(&self) -> PathBuf {
        self.cache_root.join(LEGACY_FILE_NAME)
    }

    /// Where the previous snapshot waits while a new one is installed.
    pub fn backup_dir(&self) -> PathBuf {
        self.cache_root.join(BACKUP_DIR_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert!(config.cache_root.ends_with(".cache"));
        assert!(!config.disable_persistence);
        assert_eq!(config.on_corrupt, CorruptPolicy::Discard);
        assert_eq!(config.max_chunk_bytes, DEFAULT_MAX_CHUNK_BYTES);
    }

    #[test]
    fn test_derived_paths() {
        let config = CacheConfig::with_root("/site/.cache");
        assert_eq!(config.snapshot_dir(), PathBuf::from("/site/.cache/redux-state"));
        assert_eq!(config.legacy_file(), PathBuf::from("/site/.cache/redux.state"));
        assert_eq!(config.backup_dir(), PathBuf::from("/site/.cache/redux-state.bak"));
    }

    #[test]
    fn test_corrupt_policy_parse() {
        assert_eq!("fail".parse::<CorruptPolicy>().unwrap(), CorruptPolicy::Fail);
        assert_eq!("Discard".parse::<CorruptPolicy>().unwrap(), CorruptPolicy::Discard);
        assert!("retry".parse::<CorruptPolicy>().is_err());
    }

    #[test]
    fn test_from_file_cache_section() -> Result<()> {
        let temp_dir = tempfile::TempDir::new()?;
        let path = temp_dir.path().join("statecache.toml");
        std::fs::write(
            &path,
            "[cache]\ncache_root = \"/srv/site/.cache\"\non_corrupt = \"fail\"\n",
        )?;

        let config = CacheConfig::from_file(&path)?;
        assert_eq!(config.cache_root, PathBuf::from("/srv/site/.cache"));
        assert_eq!(config.on_corrupt, CorruptPolicy::Fail);
        assert!(!config.disable_persistence);
        assert_eq!(config.max_chunk_bytes, DEFAULT_MAX_CHUNK_BYTES);
        Ok(())
    }

    #[test]
    fn test_from_file_missing() {
        let result = CacheConfig::from_file(Path::new("/definitely/not/here.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = CacheConfig::with_root("/custom/cache")
            .max_chunk_bytes(4096)
            .on_corrupt(CorruptPolicy::Fail);
        let json = serde_json::to_string(&config).unwrap();
        let restored: CacheConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.cache_root, restored.cache_root);
        assert_eq!(restored.max_chunk_bytes, 4096);
        assert_eq!(restored.on_corrupt, CorruptPolicy::Fail);
    }
}
