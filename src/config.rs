use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ItemError};

pub const META_DIR: &str = ".c2n";
pub const IGNORE_FILE: &str = ".c2n_ignore";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Hierarchy,
    Flat,
}

impl Default for SyncMode {
    fn default() -> Self {
        SyncMode::Hierarchy
    }
}

#[derive(Debug, Default, Deserialize, Clone)]
struct PartialConfig {
    #[serde(default)]
    default_parent_url: Option<String>,
    #[serde(default)]
    root_page_url: Option<String>,
    #[serde(default)]
    sync_mode: Option<SyncMode>,
    #[serde(default)]
    pull_apply_default: Option<bool>,
    #[serde(default)]
    push_changed_only_default: Option<bool>,
    #[serde(default)]
    no_dir_update_default: Option<bool>,
}

/// Project-level configuration, loaded from `.c2n/config`.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectConfig {
    pub default_parent_url: Option<String>,
    /// Legacy key, read but never written (see URL Resolver).
    #[serde(skip_serializing)]
    pub legacy_root_page_url: Option<String>,
    pub sync_mode: SyncMode,
    pub pull_apply_default: bool,
    pub push_changed_only_default: bool,
    pub no_dir_update_default: bool,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            default_parent_url: None,
            legacy_root_page_url: None,
            sync_mode: SyncMode::Hierarchy,
            pull_apply_default: true,
            push_changed_only_default: true,
            no_dir_update_default: false,
        }
    }
}

impl ProjectConfig {
    pub fn config_path(project_dir: &Path) -> PathBuf {
        project_dir.join(META_DIR).join("config")
    }

    pub fn load(project_dir: &Path) -> Result<Self> {
        let path = Self::config_path(project_dir);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&path)
            .with_context(|| format!("read config {}", path.display()))?;
        let partial: PartialConfig = serde_json::from_str(&data)
            .map_err(|e| ItemError::fatal(ErrorKind::IndexCorrupt, "config", e))
            .context("parse project config json")?;
        Ok(Self {
            default_parent_url: partial.default_parent_url,
            legacy_root_page_url: partial.root_page_url,
            sync_mode: partial.sync_mode.unwrap_or_default(),
            pull_apply_default: partial.pull_apply_default.unwrap_or(true),
            push_changed_only_default: partial.push_changed_only_default.unwrap_or(true),
            no_dir_update_default: partial.no_dir_update_default.unwrap_or(false),
        })
    }

    pub fn save(&self, project_dir: &Path) -> Result<()> {
        let path = Self::config_path(project_dir);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        #[derive(Serialize)]
        struct Persisted<'a> {
            default_parent_url: &'a Option<String>,
            sync_mode: SyncMode,
            pull_apply_default: bool,
            push_changed_only_default: bool,
            no_dir_update_default: bool,
        }
        let persisted = Persisted {
            default_parent_url: &self.default_parent_url,
            sync_mode: self.sync_mode,
            pull_apply_default: self.pull_apply_default,
            push_changed_only_default: self.push_changed_only_default,
            no_dir_update_default: self.no_dir_update_default,
        };
        let data = serde_json::to_vec_pretty(&persisted).context("serialize project config")?;
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        fs::write(&tmp, &data).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
        Ok(())
    }
}

/// Authentication + per-command context threaded through every engine call.
/// Replaces module-level config singletons; tests instantiate fresh contexts.
#[derive(Clone)]
pub struct Context {
    pub project_dir: PathBuf,
    pub config: std::sync::Arc<ProjectConfig>,
    pub notion_token: Option<String>,
    pub pool_size: usize,
    pub verbose: bool,
}

impl Context {
    pub fn new(project_dir: PathBuf, config: ProjectConfig) -> Self {
        Self {
            project_dir,
            config: std::sync::Arc::new(config),
            notion_token: None,
            pool_size: 8,
            verbose: false,
        }
    }

    pub fn with_env(mut self) -> Self {
        let env = load_env_cascade(&self.project_dir);
        self.notion_token = env
            .get("NOTION_TOKEN")
            .or_else(|| env.get("NOTION_API_KEY"))
            .cloned()
            .or_else(|| std::env::var("NOTION_TOKEN").ok())
            .or_else(|| std::env::var("NOTION_API_KEY").ok());
        self
    }
}

/// Load `<project>/.c2n/.env`, then `<project>/.env`, then a tool-adjacent `.env`.
/// First definition of a key wins; later files never override an already-set key.
pub fn load_env_cascade(project_dir: &Path) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let candidates = [
        project_dir.join(META_DIR).join(".env"),
        project_dir.join(".env"),
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.join(".env")))
            .unwrap_or_else(|| PathBuf::from(".env")),
    ];
    for path in candidates {
        let Ok(data) = fs::read_to_string(&path) else {
            continue;
        };
        for line in data.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let Some((key, value)) = trimmed.split_once('=') else {
                continue;
            };
            let key = key.trim().to_string();
            let value = value
                .trim()
                .trim_matches('"')
                .trim_matches('\'')
                .to_string();
            out.entry(key).or_insert(value);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn make_temp_dir(name: &str) -> PathBuf {
        let tmp = std::env::temp_dir().join(format!("c2n-config-test-{name}"));
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();
        tmp
    }

    #[test]
    fn load_missing_config_returns_default() {
        let dir = make_temp_dir("missing");
        let cfg = ProjectConfig::load(&dir).unwrap();
        assert_eq!(cfg.sync_mode, SyncMode::Hierarchy);
        assert!(cfg.default_parent_url.is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = make_temp_dir("roundtrip");
        let mut cfg = ProjectConfig::default();
        cfg.default_parent_url = Some("https://notion.so/abc123".to_string());
        cfg.sync_mode = SyncMode::Flat;
        cfg.save(&dir).unwrap();

        let loaded = ProjectConfig::load(&dir).unwrap();
        assert_eq!(
            loaded.default_parent_url.as_deref(),
            Some("https://notion.so/abc123")
        );
        assert_eq!(loaded.sync_mode, SyncMode::Flat);
    }

    #[test]
    fn legacy_root_page_url_is_read_but_not_persisted() {
        let dir = make_temp_dir("legacy");
        let path = ProjectConfig::config_path(&dir);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{"root_page_url":"https://notion.so/legacy"}"#).unwrap();

        let cfg = ProjectConfig::load(&dir).unwrap();
        assert_eq!(
            cfg.legacy_root_page_url.as_deref(),
            Some("https://notion.so/legacy")
        );

        cfg.save(&dir).unwrap();
        let raw = fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("root_page_url"));
    }

    #[test]
    fn env_cascade_prefers_project_env_over_tool_adjacent() {
        let dir = make_temp_dir("env-cascade");
        fs::create_dir_all(dir.join(META_DIR)).unwrap();
        fs::write(dir.join(META_DIR).join(".env"), "NOTION_TOKEN=from_meta\n").unwrap();
        fs::write(dir.join(".env"), "NOTION_TOKEN=from_project\n").unwrap();

        let env = load_env_cascade(&dir);
        assert_eq!(env.get("NOTION_TOKEN").map(String::as_str), Some("from_meta"));
    }
}
