//! Content-hash-keyed summary cache.
//!
//! One JSON file per entry, named `<basename>_<kind>_<path-hash>.json`,
//! holding `{content_hash, timestamp, result}`. A lookup hits only when the
//! stored hash equals the hash recomputed from the caller's input and the
//! entry is younger than the configured TTL.
//!
//! Failures never abort the pipeline: read errors degrade to a miss and
//! write errors are returned for the caller to log.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::models::{FileSummary, FolderSummary};

/// Which summary granularity an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    File,
    Folder,
    Project,
}

impl CacheKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKind::File => "file",
            CacheKind::Folder => "folder",
            CacheKind::Project => "project",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(CacheKind::File),
            "folder" => Some(CacheKind::Folder),
            "project" => Some(CacheKind::Project),
            _ => None,
        }
    }
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    content_hash: String,
    timestamp: DateTime<Utc>,
    result: T,
}

/// Lowercase hex MD5 of `data`.
pub fn md5_hex(data: impl AsRef<[u8]>) -> String {
    format!("{:x}", Md5::digest(data.as_ref()))
}

/// Canonical hash input for a folder: its file summaries in key order.
pub fn folder_hash_input(files: &BTreeMap<String, FileSummary>) -> String {
    serde_json::to_string(files).unwrap_or_default()
}

/// Canonical hash input for a project: its folder summaries in key order.
pub fn project_hash_input(folders: &BTreeMap<String, FolderSummary>) -> String {
    serde_json::to_string(folders).unwrap_or_default()
}

/// Persistent store for file, folder and project summaries.
#[derive(Debug, Clone)]
pub struct SummaryCache {
    dir: PathBuf,
    ttl: Duration,
    enabled: bool,
}

impl SummaryCache {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
            enabled: true,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        if config.enabled {
            Self::new(&config.dir, config.ttl())
        } else {
            Self::disabled()
        }
    }

    /// A cache whose lookups always miss and whose writes do nothing.
    pub fn disabled() -> Self {
        Self {
            dir: PathBuf::new(),
            ttl: Duration::ZERO,
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path of the entry for `(kind, key)`.
    pub fn entry_path(&self, kind: CacheKind, key: &str) -> PathBuf {
        let base = key
            .trim_end_matches('/')
            .rsplit(['/', '\\'])
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("root");
        let base: String = base
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let path_hash = &md5_hex(key)[..12];
        self.dir.join(format!("{}_{}_{}.json", base, kind, path_hash))
    }

    /// Look up `(kind, key)`; hits only when `hash_input` still hashes to
    /// the stored value and the entry is within the TTL.
    pub async fn get<T: DeserializeOwned>(
        &self,
        kind: CacheKind,
        key: &str,
        hash_input: &str,
    ) -> Option<T> {
        if !self.enabled {
            return None;
        }
        let path = self.entry_path(kind, key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "cache read failed; treating as miss");
                }
                return None;
            }
        };
        let envelope: Envelope<T> = match serde_json::from_slice(&bytes) {
            Ok(env) => env,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt cache entry; treating as miss");
                return None;
            }
        };
        if envelope.content_hash != md5_hex(hash_input) {
            debug!(%kind, key, "cache stale: content changed");
            return None;
        }
        let age = Utc::now().signed_duration_since(envelope.timestamp);
        if age.num_seconds() < 0 || age.to_std().map_or(true, |a| a > self.ttl) {
            debug!(%kind, key, "cache stale: ttl expired");
            return None;
        }
        debug!(%kind, key, "cache hit");
        Some(envelope.result)
    }

    /// Store `value` for `(kind, key)` stamped with the hash of `hash_input`.
    pub async fn set<T: Serialize>(
        &self,
        kind: CacheKind,
        key: &str,
        hash_input: &str,
        value: &T,
    ) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let envelope = Envelope {
            content_hash: md5_hex(hash_input),
            timestamp: Utc::now(),
            result: value,
        };
        let bytes = serde_json::to_vec_pretty(&envelope)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create cache dir: {}", self.dir.display()))?;
        let path = self.entry_path(kind, key);
        let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &bytes)
            .await
            .with_context(|| format!("Failed to write cache entry: {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move cache entry into place: {}", path.display()))?;
        Ok(())
    }

    /// Remove every entry of `kind`. Returns the number of files removed.
    pub async fn clear(&self, kind: CacheKind) -> Result<usize> {
        self.remove_matching(|name| entry_kind(name) == Some(kind.as_str()))
            .await
    }

    /// Remove every entry of every kind.
    pub async fn clear_all(&self) -> Result<usize> {
        self.remove_matching(|_| true).await
    }

    async fn remove_matching(&self, matches: impl Fn(&str) -> bool) -> Result<usize> {
        if !self.enabled {
            return Ok(0);
        }
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e).context("Failed to list cache dir"),
        };
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".json") && matches(&name) {
                tokio::fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Kind segment of an entry file name. The base may itself contain
/// underscores, so the name is split from the right.
fn entry_kind(name: &str) -> Option<&str> {
    let stem = name.strip_suffix(".json")?;
    let mut parts = stem.rsplitn(3, '_');
    let _hash = parts.next()?;
    let kind = parts.next()?;
    parts.next().map(|_| kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Complexity;
    use tempfile::TempDir;

    fn summary(purpose: &str) -> FileSummary {
        FileSummary {
            language: "rust".into(),
            purpose: purpose.into(),
            key_types: vec!["Config".into()],
            functions: vec![],
            imports: vec![],
            side_effects: vec![],
            risks: vec![],
            complexity: Complexity::Low,
        }
    }

    #[test]
    fn md5_known_vector() {
        assert_eq!(md5_hex(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex("abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn entry_names_follow_layout() {
        let cache = SummaryCache::new("/tmp/c", Duration::from_secs(60));
        let p = cache.entry_path(CacheKind::File, "src/lib.rs");
        let name = p.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("lib.rs_file_"), "{}", name);
        assert!(name.ends_with(".json"));
        let other = cache.entry_path(CacheKind::File, "tests/lib.rs");
        assert_ne!(p, other);
        let url = cache.entry_path(CacheKind::Project, "https://github.com/acme/shop");
        assert!(url.to_string_lossy().contains("shop_project_"));
    }

    #[tokio::test]
    async fn hit_requires_matching_hash() {
        let tmp = TempDir::new().unwrap();
        let cache = SummaryCache::new(tmp.path(), Duration::from_secs(3600));
        cache
            .set(CacheKind::File, "src/a.rs", "fn a() {}", &summary("a"))
            .await
            .unwrap();

        let hit: Option<FileSummary> = cache.get(CacheKind::File, "src/a.rs", "fn a() {}").await;
        assert_eq!(hit.unwrap().purpose, "a");

        let stale: Option<FileSummary> = cache.get(CacheKind::File, "src/a.rs", "fn b() {}").await;
        assert!(stale.is_none());

        let other_kind: Option<FileSummary> =
            cache.get(CacheKind::Folder, "src/a.rs", "fn a() {}").await;
        assert!(other_kind.is_none());
    }

    #[tokio::test]
    async fn expired_entries_miss() {
        let tmp = TempDir::new().unwrap();
        let cache = SummaryCache::new(tmp.path(), Duration::ZERO);
        cache
            .set(CacheKind::File, "a.rs", "x", &summary("a"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        let hit: Option<FileSummary> = cache.get(CacheKind::File, "a.rs", "x").await;
        assert!(hit.is_none());
    }

    #[tokio::test]
    async fn corrupt_entry_degrades_to_miss() {
        let tmp = TempDir::new().unwrap();
        let cache = SummaryCache::new(tmp.path(), Duration::from_secs(3600));
        let path = cache.entry_path(CacheKind::File, "a.rs");
        std::fs::write(&path, b"{ not json").unwrap();
        let hit: Option<FileSummary> = cache.get(CacheKind::File, "a.rs", "x").await;
        assert!(hit.is_none());
    }

    #[tokio::test]
    async fn disabled_cache_is_inert() {
        let cache = SummaryCache::disabled();
        cache
            .set(CacheKind::File, "a.rs", "x", &summary("a"))
            .await
            .unwrap();
        let hit: Option<FileSummary> = cache.get(CacheKind::File, "a.rs", "x").await;
        assert!(hit.is_none());
        assert_eq!(cache.clear_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn clear_by_kind() {
        let tmp = TempDir::new().unwrap();
        let cache = SummaryCache::new(tmp.path(), Duration::from_secs(3600));
        cache.set(CacheKind::File, "a.rs", "x", &summary("a")).await.unwrap();
        cache.set(CacheKind::File, "b.rs", "y", &summary("b")).await.unwrap();
        cache.set(CacheKind::Folder, "src", "z", &summary("c")).await.unwrap();

        assert_eq!(cache.clear(CacheKind::File).await.unwrap(), 2);
        let folder: Option<FileSummary> = cache.get(CacheKind::Folder, "src", "z").await;
        assert!(folder.is_some());
        assert_eq!(cache.clear_all().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn clear_matches_the_kind_segment_only() {
        let tmp = TempDir::new().unwrap();
        let cache = SummaryCache::new(tmp.path(), Duration::from_secs(3600));
        cache
            .set(CacheKind::Folder, "/repo/my_file_utils", "h", &summary("utils"))
            .await
            .unwrap();

        assert_eq!(cache.clear(CacheKind::File).await.unwrap(), 0);
        let folder: Option<FileSummary> =
            cache.get(CacheKind::Folder, "/repo/my_file_utils", "h").await;
        assert!(folder.is_some());
        assert_eq!(cache.clear(CacheKind::Folder).await.unwrap(), 1);
    }

    #[test]
    fn entry_kind_reads_from_the_right() {
        assert_eq!(entry_kind("my_file_utils_folder_0123456789ab.json"), Some("folder"));
        assert_eq!(entry_kind("main.rs_file_0123456789ab.json"), Some("file"));
        assert_eq!(entry_kind("stray.json"), None);
    }
}
