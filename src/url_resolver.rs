use anyhow::Result;

use crate::config::ProjectConfig;
use crate::error::{ErrorKind, ItemError};
use crate::paths;

/// Single source of truth for a project's root remote URL (spec.md §4.2).
///
/// Resolution order: `config.default_parent_url`, then (during `init` only)
/// the `NOTION_ROOT_URL` environment variable. Legacy keys (`root_page_url`
/// on the config, a `parent_url` on the root index record) are read but
/// never written; `status --fix` is what migrates them.
pub struct UrlResolver;

impl UrlResolver {
    pub fn resolve(config: &ProjectConfig) -> Option<String> {
        config.default_parent_url.clone()
    }

    pub fn resolve_for_init(config: &ProjectConfig, notion_root_url_env: Option<&str>) -> Option<String> {
        config
            .default_parent_url
            .clone()
            .or_else(|| notion_root_url_env.map(str::to_string))
    }

    /// Resolves and extracts the page id in one step, failing with
    /// `UrlMalformed` if no URL is configured or no id can be extracted.
    pub fn resolve_root_page_id(config: &ProjectConfig) -> Result<String> {
        let url = Self::resolve(config).ok_or_else(|| {
            ItemError::fatal(
                ErrorKind::UrlMalformed,
                "root",
                anyhow::anyhow!("no default_parent_url configured"),
            )
        })?;
        paths::extract_id_from_url(&url).ok_or_else(|| {
            ItemError::fatal(
                ErrorKind::UrlMalformed,
                "root",
                anyhow::anyhow!("could not extract a page id from '{url}'"),
            )
        })
    }

    /// Migrates the legacy `root_page_url` config key into
    /// `default_parent_url`, as performed by `status --fix`.
    pub fn fix(config: &mut ProjectConfig) -> bool {
        if config.default_parent_url.is_none() {
            if let Some(legacy) = config.legacy_root_page_url.take() {
                config.default_parent_url = Some(legacy);
                return true;
            }
        }
        config.legacy_root_page_url = None;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_prefers_configured_url_over_env() {
        let mut config = ProjectConfig::default();
        config.default_parent_url = Some("https://notion.so/configured".to_string());
        assert_eq!(
            UrlResolver::resolve_for_init(&config, Some("https://notion.so/env")).as_deref(),
            Some("https://notion.so/configured")
        );
    }

    #[test]
    fn resolve_for_init_falls_back_to_env_when_unconfigured() {
        let config = ProjectConfig::default();
        assert_eq!(
            UrlResolver::resolve_for_init(&config, Some("https://notion.so/env")).as_deref(),
            Some("https://notion.so/env")
        );
    }

    #[test]
    fn resolve_root_page_id_fails_when_unresolvable() {
        let config = ProjectConfig::default();
        let err = UrlResolver::resolve_root_page_id(&config).unwrap_err();
        let item_err = err.downcast_ref::<ItemError>().unwrap();
        assert_eq!(item_err.kind, ErrorKind::UrlMalformed);
    }

    #[test]
    fn fix_migrates_legacy_root_page_url() {
        let mut config = ProjectConfig::default();
        config.legacy_root_page_url = Some("https://notion.so/legacy".to_string());
        assert!(UrlResolver::fix(&mut config));
        assert_eq!(
            config.default_parent_url.as_deref(),
            Some("https://notion.so/legacy")
        );
        assert!(config.legacy_root_page_url.is_none());
    }

    #[test]
    fn fix_is_noop_when_already_configured() {
        let mut config = ProjectConfig::default();
        config.default_parent_url = Some("https://notion.so/configured".to_string());
        config.legacy_root_page_url = Some("https://notion.so/legacy".to_string());
        assert!(!UrlResolver::fix(&mut config));
        assert_eq!(
            config.default_parent_url.as_deref(),
            Some("https://notion.so/configured")
        );
    }
}
