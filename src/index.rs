use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::META_DIR;
use crate::error::{ErrorKind, ItemError};
use crate::filters::SyncFilters;

/// Local relative path that is always present and reserved for the project
/// root itself (Invariant 2).
pub const ROOT_KEY: &str = "";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    File,
    Directory,
    Page,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRecord {
    pub page_id: String,
    pub page_url: String,
    pub parent_id: String,
    pub kind: RecordKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_sha1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_mtime_ns: Option<u128>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_last_edited: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<String>,
    /// Fields present in the stored document this struct doesn't model;
    /// round-tripped verbatim (forward compatibility, spec.md §9).
    #[serde(flatten)]
    pub unknown: BTreeMap<String, Value>,
}

impl IndexRecord {
    pub fn new(page_id: String, page_url: String, parent_id: String, kind: RecordKind) -> Self {
        Self {
            page_id,
            page_url,
            parent_id,
            kind,
            content_sha1: None,
            local_mtime_ns: None,
            remote_last_edited: None,
            last_sync_at: None,
            unknown: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexDocument {
    #[serde(default)]
    root_page_url: Option<String>,
    #[serde(default)]
    records: BTreeMap<String, IndexRecord>,
}

/// Persistent per-project mapping from local relative path to remote item
/// record (spec.md §4.1).
pub struct Index {
    project_dir: std::path::PathBuf,
    document: IndexDocument,
}

impl Index {
    pub fn index_path(project_dir: &Path) -> std::path::PathBuf {
        project_dir.join(META_DIR).join("index")
    }

    /// Returns an empty index if the file is absent.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let path = Self::index_path(project_dir);
        if !path.exists() {
            return Ok(Self {
                project_dir: project_dir.to_path_buf(),
                document: IndexDocument::default(),
            });
        }
        let data = fs::read_to_string(&path)
            .with_context(|| format!("read index {}", path.display()))?;
        let document: IndexDocument = serde_json::from_str(&data)
            .map_err(|e| ItemError::fatal(ErrorKind::IndexCorrupt, "index", e))?;
        Ok(Self {
            project_dir: project_dir.to_path_buf(),
            document,
        })
    }

    pub fn root_page_url(&self) -> Option<&str> {
        self.document.root_page_url.as_deref()
    }

    pub fn set_root_page_url(&mut self, url: Option<String>) {
        self.document.root_page_url = url;
    }

    pub fn get(&self, rel_path: &str) -> Option<&IndexRecord> {
        self.document.records.get(rel_path)
    }

    pub fn records(&self) -> impl Iterator<Item = (&String, &IndexRecord)> {
        self.document.records.iter()
    }

    /// Upserts a record. In Hierarchy mode, every non-root path's parent
    /// directory must already have a `Directory` record (Invariant 3).
    pub fn put(&mut self, rel_path: &str, record: IndexRecord, enforce_hierarchy: bool) -> Result<()> {
        if enforce_hierarchy && rel_path != ROOT_KEY {
            if let Some(parent) = parent_of(rel_path) {
                if parent != ROOT_KEY {
                    match self.document.records.get(&parent) {
                        Some(p) if p.kind == RecordKind::Directory => {}
                        _ => {
                            return Err(ItemError::fatal(
                                ErrorKind::InvariantViolation,
                                rel_path,
                                anyhow::anyhow!(
                                    "parent path '{parent}' has no directory record"
                                ),
                            ));
                        }
                    }
                }
            }
        }
        self.document.records.insert(rel_path.to_string(), record);
        Ok(())
    }

    pub fn remove(&mut self, rel_path: &str) {
        self.document.records.remove(rel_path);
    }

    /// Writes atomically (write-temp-then-rename); preserves `root_page_url`
    /// even when absent.
    pub fn save(&self) -> Result<()> {
        let path = Self::index_path(&self.project_dir);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let data = serde_json::to_vec_pretty(&self.document).context("serialize index")?;
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        fs::write(&tmp, &data).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
        Ok(())
    }

    pub fn is_ignored(&self, rel_path: &str, filters: &SyncFilters, is_dir: bool) -> bool {
        filters.should_ignore_rel(Path::new(rel_path), is_dir)
    }
}

fn parent_of(rel_path: &str) -> Option<String> {
    match rel_path.rsplit_once('/') {
        Some((parent, _)) => Some(parent.to_string()),
        None => Some(ROOT_KEY.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn make_temp_dir(name: &str) -> std::path::PathBuf {
        let tmp = std::env::temp_dir().join(format!("c2n-index-test-{name}"));
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();
        tmp
    }

    #[test]
    fn load_missing_index_is_empty() {
        let dir = make_temp_dir("missing");
        let idx = Index::load(&dir).unwrap();
        assert!(idx.get("readme.md").is_none());
        assert!(idx.root_page_url().is_none());
    }

    #[test]
    fn save_then_load_round_trips_preserving_root_url() {
        let dir = make_temp_dir("roundtrip");
        let mut idx = Index::load(&dir).unwrap();
        idx.set_root_page_url(Some("https://notion.so/abc".to_string()));
        idx.put(
            ROOT_KEY,
            IndexRecord::new(
                "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa".to_string(),
                "https://notion.so/abc".to_string(),
                String::new(),
                RecordKind::Directory,
            ),
            false,
        )
        .unwrap();
        idx.save().unwrap();

        let loaded = Index::load(&dir).unwrap();
        assert_eq!(loaded.root_page_url(), Some("https://notion.so/abc"));
        assert!(loaded.get(ROOT_KEY).is_some());
    }

    #[test]
    fn put_under_hierarchy_rejects_missing_parent_directory_record() {
        let dir = make_temp_dir("hierarchy");
        let mut idx = Index::load(&dir).unwrap();
        let record = IndexRecord::new(
            "bbbbbbbb-bbbb-bbbb-bbbb-bbbbbbbbbbbb".to_string(),
            "https://notion.so/def".to_string(),
            "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa".to_string(),
            RecordKind::File,
        );
        let err = idx.put("docs/readme.md", record, true).unwrap_err();
        let item_err = err.downcast_ref::<ItemError>().unwrap();
        assert_eq!(item_err.kind, ErrorKind::InvariantViolation);
    }

    #[test]
    fn put_succeeds_once_parent_directory_record_exists() {
        let dir = make_temp_dir("hierarchy-ok");
        let mut idx = Index::load(&dir).unwrap();
        idx.put(
            "docs",
            IndexRecord::new(
                "cccccccc-cccc-cccc-cccc-cccccccccccc".to_string(),
                "https://notion.so/docs".to_string(),
                String::new(),
                RecordKind::Directory,
            ),
            true,
        )
        .unwrap();
        idx.put(
            "docs/readme.md",
            IndexRecord::new(
                "dddddddd-dddd-dddd-dddd-dddddddddddd".to_string(),
                "https://notion.so/readme".to_string(),
                "cccccccc-cccc-cccc-cccc-cccccccccccc".to_string(),
                RecordKind::File,
            ),
            true,
        )
        .unwrap();
        assert!(idx.get("docs/readme.md").is_some());
    }

    #[test]
    fn corrupt_index_fails_with_index_corrupt() {
        let dir = make_temp_dir("corrupt");
        fs::create_dir_all(dir.join(META_DIR)).unwrap();
        fs::write(Index::index_path(&dir), "not json").unwrap();
        let err = Index::load(&dir).unwrap_err();
        let item_err = err.downcast_ref::<ItemError>().unwrap();
        assert_eq!(item_err.kind, ErrorKind::IndexCorrupt);
    }
}
