use std::{
    fs,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use ignore::gitignore::{Gitignore, GitignoreBuilder};

use crate::config::{IGNORE_FILE, META_DIR};

/// Image extensions skipped on push (spec §6), plus the project's own
/// metadata folder and common editor/OS noise.
const DEFAULT_IGNORE_LINES: &[&str] = &[
    "*.png",
    "*.jpg",
    "*.jpeg",
    "*.gif",
    "*.bmp",
    "*.svg",
    "*.webp",
    "*.ico",
    "*.tiff",
    "*.tif",
    ".c2n/",
    ".git/",
    ".vscode",
    ".idea",
    ".DS_Store",
    "Thumbs.db",
    "*.tmp",
    "*.tmp-*",
];

/// `.c2n_ignore` matcher, used by the Push Engine (enumeration), `status`
/// reporting, and the Index Store's `isIgnored` (Invariant 7).
#[derive(Clone)]
pub struct SyncFilters {
    base_dir: PathBuf,
    ignore: Gitignore,
}

impl SyncFilters {
    pub fn load(project_dir: &Path) -> Result<Self> {
        let mut builder = GitignoreBuilder::new(project_dir);
        for line in DEFAULT_IGNORE_LINES {
            builder
                .add_line(None, line)
                .with_context(|| format!("add default ignore line: {line}"))?;
        }

        let ignore_path = project_dir.join(IGNORE_FILE);
        if ignore_path.exists() {
            for line in read_ignore_file(&ignore_path)? {
                builder
                    .add_line(None, &line)
                    .with_context(|| format!("add {IGNORE_FILE} line: {line}"))?;
            }
        }

        let ignore = builder.build().context("build .c2n_ignore matcher")?;
        Ok(Self {
            base_dir: project_dir.to_path_buf(),
            ignore,
        })
    }

    pub fn should_ignore_abs(&self, abs_path: &Path, is_dir: bool) -> bool {
        let rel = abs_path.strip_prefix(&self.base_dir).unwrap_or(abs_path);
        self.should_ignore_rel(rel, is_dir)
    }

    pub fn should_ignore_rel(&self, rel_path: &Path, is_dir: bool) -> bool {
        self.ignore
            .matched_path_or_any_parents(rel_path, is_dir)
            .is_ignore()
    }

    pub fn is_hidden_metadata(rel_path: &Path) -> bool {
        rel_path
            .components()
            .next()
            .map(|c| c.as_os_str() == META_DIR)
            .unwrap_or(false)
    }
}

fn read_ignore_file(path: &Path) -> Result<Vec<String>> {
    let file =
        fs::File::open(path).with_context(|| format!("open ignore file {}", path.display()))?;
    let mut out = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.contains('\0') {
            continue;
        }
        out.push(trimmed.to_string());
    }
    Ok(out)
}
