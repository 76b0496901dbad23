use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::META_DIR;

/// One memoized directory listing, keyed by the directory's own mtime so a
/// later listing with an unchanged mtime can reuse it without a re-walk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirListing {
    pub dir_mtime_ns: u128,
    pub entries: Vec<String>,
}

/// A remote subtree snapshot taken during a pull, reused by a subsequent
/// pull as long as it isn't stale (spec.md §4.6 optimization).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteTreeSnapshot {
    pub taken_at: DateTime<Utc>,
    pub page_ids: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheDocument {
    #[serde(default)]
    dir_listings: BTreeMap<String, DirListing>,
    #[serde(default)]
    remote_tree: Option<RemoteTreeSnapshot>,
}

pub struct Cache {
    project_dir: std::path::PathBuf,
    document: CacheDocument,
}

impl Cache {
    pub fn cache_path(project_dir: &Path) -> std::path::PathBuf {
        project_dir.join(META_DIR).join("cache")
    }

    pub fn load(project_dir: &Path) -> Result<Self> {
        let path = Self::cache_path(project_dir);
        let document = if path.exists() {
            let data = fs::read_to_string(&path)
                .with_context(|| format!("read cache {}", path.display()))?;
            serde_json::from_str(&data).unwrap_or_default()
        } else {
            CacheDocument::default()
        };
        Ok(Self {
            project_dir: project_dir.to_path_buf(),
            document,
        })
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::cache_path(&self.project_dir);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let data = serde_json::to_vec_pretty(&self.document).context("serialize cache")?;
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        fs::write(&tmp, &data).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
        Ok(())
    }

    pub fn dir_listing(&self, rel_dir: &str) -> Option<&DirListing> {
        self.document.dir_listings.get(rel_dir)
    }

    pub fn put_dir_listing(&mut self, rel_dir: impl Into<String>, listing: DirListing) {
        self.document.dir_listings.insert(rel_dir.into(), listing);
    }

    /// Returns the cached remote-tree snapshot if it was taken within
    /// `max_age`, measured against `last_sync_at`.
    pub fn remote_tree_if_fresh(&self, last_sync_at: DateTime<Utc>, max_age: chrono::Duration) -> Option<&RemoteTreeSnapshot> {
        let snapshot = self.document.remote_tree.as_ref()?;
        if snapshot.taken_at < last_sync_at {
            return None;
        }
        if Utc::now() - snapshot.taken_at > max_age {
            return None;
        }
        Some(snapshot)
    }

    pub fn put_remote_tree(&mut self, snapshot: RemoteTreeSnapshot) {
        self.document.remote_tree = Some(snapshot);
    }
}
