use serde::{Deserialize, Serialize};

use crate::config::SyncMode;
use crate::paths::sanitize_title;

/// One remote page as seen by the Projection Policy: enough to decide
/// whether it maps to a local directory or a file, and what that file's
/// front-matter (Flat mode) should contain.
#[derive(Debug, Clone)]
pub struct RemotePageMeta {
    pub page_id: String,
    pub page_url: String,
    pub parent_id: String,
    pub title: String,
    pub is_folder_marked: bool,
    pub has_child_pages: bool,
    pub has_inline_content: bool,
    pub children_ids: Vec<String>,
}

impl RemotePageMeta {
    /// A page is treated as a directory-page in Hierarchy mode when it's
    /// explicitly marked as a folder, or has child pages and no content of
    /// its own beyond its title (spec.md §4.8).
    pub fn is_directory_like(&self) -> bool {
        self.is_folder_marked || (self.has_child_pages && !self.has_inline_content)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatFrontMatter {
    pub page_id: String,
    pub page_url: String,
    pub parent_id: String,
    pub parent_type: String,
    pub children_ids: Vec<String>,
    pub sync_mode: String,
}

impl FlatFrontMatter {
    pub fn new(meta: &RemotePageMeta) -> Self {
        Self {
            page_id: meta.page_id.clone(),
            page_url: meta.page_url.clone(),
            parent_id: meta.parent_id.clone(),
            parent_type: "page".to_string(),
            children_ids: meta.children_ids.clone(),
            sync_mode: "flat".to_string(),
        }
    }

    /// Exact key order matters (spec.md §4.8/§6): `page_id`, `page_url`,
    /// `parent_id`, `parent_type`, `children_ids`, `sync_mode`.
    pub fn render(&self) -> String {
        let children = self.children_ids.join(", ");
        format!(
            "---\npage_id: {}\npage_url: {}\nparent_id: {}\nparent_type: {}\nchildren_ids: [{}]\nsync_mode: {}\n---\n",
            self.page_id, self.page_url, self.parent_id, self.parent_type, children, self.sync_mode
        )
    }
}

/// Result of mapping one remote page onto a local path under the project's
/// chosen projection.
#[derive(Debug, Clone)]
pub enum LocalTarget {
    Directory { rel_path: String },
    File { rel_path: String },
}

/// Computes the local relative path a remote page maps to, given its
/// parent's already-resolved relative directory path.
pub fn project_page(mode: SyncMode, meta: &RemotePageMeta, parent_rel_dir: &str) -> LocalTarget {
    let title = sanitize_title(&meta.title);
    match mode {
        SyncMode::Flat => LocalTarget::File {
            rel_path: format!("{title}.md"),
        },
        SyncMode::Hierarchy => {
            let joined = if parent_rel_dir.is_empty() {
                title.clone()
            } else {
                format!("{parent_rel_dir}/{title}")
            };
            if meta.is_directory_like() {
                LocalTarget::Directory { rel_path: joined }
            } else {
                LocalTarget::File {
                    rel_path: format!("{joined}.md"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(title: &str, folder: bool, has_children: bool, inline: bool) -> RemotePageMeta {
        RemotePageMeta {
            page_id: "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa".to_string(),
            page_url: "https://notion.so/x".to_string(),
            parent_id: "bbbbbbbb-bbbb-bbbb-bbbb-bbbbbbbbbbbb".to_string(),
            title: title.to_string(),
            is_folder_marked: folder,
            has_child_pages: has_children,
            has_inline_content: inline,
            children_ids: vec![],
        }
    }

    #[test]
    fn hierarchy_file_page_maps_under_parent_with_md_extension() {
        let m = meta("My Notes", false, false, true);
        match project_page(SyncMode::Hierarchy, &m, "docs") {
            LocalTarget::File { rel_path } => assert_eq!(rel_path, "docs/My Notes.md"),
            _ => panic!("expected file"),
        }
    }

    #[test]
    fn hierarchy_folder_like_page_maps_to_directory() {
        let m = meta("Section", true, false, false);
        match project_page(SyncMode::Hierarchy, &m, "") {
            LocalTarget::Directory { rel_path } => assert_eq!(rel_path, "Section"),
            _ => panic!("expected directory"),
        }
    }

    #[test]
    fn hierarchy_page_with_children_and_no_inline_content_is_directory_like() {
        let m = meta("Parent", false, true, false);
        assert!(m.is_directory_like());
    }

    #[test]
    fn flat_mode_always_maps_to_project_root() {
        let m = meta("Deeply/Nested Title", false, true, false);
        match project_page(SyncMode::Flat, &m, "ignored") {
            LocalTarget::File { rel_path } => assert_eq!(rel_path, "DeeplyNested Title.md"),
            _ => panic!("expected file"),
        }
    }

    #[test]
    fn flat_front_matter_renders_exact_key_order() {
        let mut m = meta("Page", false, false, true);
        m.children_ids = vec!["cccccccc-cccc-cccc-cccc-cccccccccccc".to_string()];
        let fm = FlatFrontMatter::new(&m);
        let rendered = fm.render();
        assert!(rendered.starts_with("---\npage_id: "));
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "---");
        assert!(lines[1].starts_with("page_id: "));
        assert!(lines[2].starts_with("page_url: "));
        assert!(lines[3].starts_with("parent_id: "));
        assert!(lines[4].starts_with("parent_type: "));
        assert!(lines[5].starts_with("children_ids: "));
        assert!(lines[6].starts_with("sync_mode: "));
        assert_eq!(lines[7], "---");
    }
}
