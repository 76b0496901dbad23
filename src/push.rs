use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use futures_util::stream::{self, StreamExt};
use walkdir::WalkDir;

use crate::config::Context as AppContext;
use crate::error::{ErrorKind, ItemStatus, Report};
use crate::filters::SyncFilters;
use crate::hashing::{hash_file, mtime_ns};
use crate::index::{Index, IndexRecord, RecordKind, ROOT_KEY};
use crate::markdown::{self, Block};
use crate::paths::sanitize_title;
use crate::remote::RemoteClient;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanCategory {
    CreateFile,
    UpdateFile,
    SkipFile,
    CreateDirectory,
    SkipDirectoryUpdate,
}

#[derive(Debug, Clone)]
pub struct PlanItem {
    pub rel_path: String,
    pub is_dir: bool,
    pub category: PlanCategory,
}

pub struct PushOptions {
    pub force_all: bool,
    pub no_dir_update: bool,
    pub dry_run: bool,
}

/// Walks the local tree (skipping ignored, hidden-metadata, and image
/// files), pairing every path with a plan category (spec.md §4.5).
/// Directories are listed before their contents; within a directory,
/// creations are listed before updates.
pub fn compute_plan(
    project_dir: &Path,
    index: &Index,
    filters: &SyncFilters,
    options: &PushOptions,
) -> Result<Vec<PlanItem>> {
    let mut dirs = Vec::new();
    let mut creates = Vec::new();
    let mut updates = Vec::new();

    for entry in WalkDir::new(project_dir)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let rel = entry
            .path()
            .strip_prefix(project_dir)
            .unwrap_or(entry.path());
        if SyncFilters::is_hidden_metadata(rel) {
            continue;
        }
        let is_dir = entry.file_type().is_dir();
        if filters.should_ignore_abs(entry.path(), is_dir) {
            continue;
        }
        let rel_key = rel.to_string_lossy().replace('\\', "/");

        if is_dir {
            // Directories never get UpdateFile semantics; only missing ones
            // are created (spec.md §4.5) — `no_dir_update` only matters once
            // a status or push re-touches an already-created directory page.
            if index.get(&rel_key).is_none() {
                dirs.push(PlanItem {
                    rel_path: rel_key,
                    is_dir: true,
                    category: PlanCategory::CreateDirectory,
                });
            }
            continue;
        }

        let ext = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        if markdown::is_image_extension(ext) {
            continue;
        }

        match index.get(&rel_key) {
            None => creates.push(PlanItem {
                rel_path: rel_key,
                is_dir: false,
                category: PlanCategory::CreateFile,
            }),
            Some(record) => {
                let changed = options.force_all || {
                    let sha1 = hash_file(entry.path())
                        .with_context(|| format!("hash {rel_key}"))?;
                    record.content_sha1.as_deref() != Some(sha1.as_str())
                };
                if changed {
                    updates.push(PlanItem {
                        rel_path: rel_key,
                        is_dir: false,
                        category: PlanCategory::UpdateFile,
                    });
                } else {
                    updates.push(PlanItem {
                        rel_path: rel_key,
                        is_dir: false,
                        category: PlanCategory::SkipFile,
                    });
                }
            }
        }
    }

    let mut plan = Vec::with_capacity(dirs.len() + creates.len() + updates.len());
    plan.extend(dirs);
    plan.extend(creates);
    plan.extend(updates);
    Ok(plan)
}

/// Outcome of one `CreateFile`/`UpdateFile` item, collected off the
/// concurrent stream before it touches `index`/`report` (mirrors the
/// fetch-then-apply split in `pull::compute_plan`).
enum FileOutcome {
    Skipped,
    Created { page_id: String, page_url: String, sha1: String },
    Updated { sha1: String },
    Failed(anyhow::Error),
}

struct FileItemResult {
    rel_path: String,
    parent_id: String,
    outcome: FileOutcome,
}

/// Everything a file item's remote call needs, resolved up front so the
/// concurrent stage never has to borrow `index` across an `.await`.
struct FilePlanContext {
    rel_path: String,
    category: PlanCategory,
    abs_path: PathBuf,
    parent_id: String,
    existing_page_id: Option<String>,
}

/// Executes a previously computed plan against the remote. Directories are
/// created first, serially, in the plan's pre-order — a nested directory's
/// `parent_id` lookup depends on its ancestor's index record already
/// existing. Independent file operations then run through the bounded
/// worker pool in parallel (spec.md §5); only the delete-then-append on a
/// single page stays serialized, within that one item's own task. Failures
/// on a single item do not abort the walk.
pub async fn execute_plan(
    ctx: &AppContext,
    client: &RemoteClient,
    index: &mut Index,
    plan: &[PlanItem],
    root_page_id: &str,
    options: &PushOptions,
) -> Result<Report> {
    let mut report = Report::new();

    for item in plan.iter().filter(|i| i.is_dir) {
        execute_directory_item(ctx, client, index, item, root_page_id, options, &mut report).await;
    }

    let mut live_items = Vec::new();
    for item in plan.iter().filter(|i| !i.is_dir) {
        if item.category == PlanCategory::SkipFile {
            report.push(item.rel_path.clone(), None, ItemStatus::Skipped, None);
        } else {
            live_items.push(item);
        }
    }

    if options.dry_run {
        for item in live_items {
            let status = match item.category {
                PlanCategory::UpdateFile => ItemStatus::Updated,
                _ => ItemStatus::Created,
            };
            report.push(item.rel_path.clone(), None, status, Some("dry-run".into()));
        }
        return Ok(report);
    }

    let file_contexts: Vec<FilePlanContext> = live_items
        .iter()
        .map(|item| {
            let parent_rel = parent_of(&item.rel_path);
            let parent_id = index
                .get(&parent_rel)
                .map(|r| r.page_id.clone())
                .unwrap_or_else(|| root_page_id.to_string());
            let existing_page_id = index.get(&item.rel_path).map(|r| r.page_id.clone());
            FilePlanContext {
                rel_path: item.rel_path.clone(),
                category: item.category.clone(),
                abs_path: ctx.project_dir.join(&item.rel_path),
                parent_id,
                existing_page_id,
            }
        })
        .collect();

    let results: Vec<FileItemResult> = stream::iter(file_contexts.into_iter().map(|fc| {
        let client = client.clone();
        async move { run_file_item(client, fc).await }
    }))
    .buffer_unordered(ctx.pool_size)
    .collect()
    .await;

    for result in results {
        apply_file_result(&mut report, index, ctx, result);
    }

    Ok(report)
}

async fn execute_directory_item(
    ctx: &AppContext,
    client: &RemoteClient,
    index: &mut Index,
    item: &PlanItem,
    root_page_id: &str,
    options: &PushOptions,
    report: &mut Report,
) {
    let abs_path = ctx.project_dir.join(&item.rel_path);
    let parent_rel = parent_of(&item.rel_path);
    let parent_id = index
        .get(&parent_rel)
        .map(|r| r.page_id.clone())
        .unwrap_or_else(|| root_page_id.to_string());

    match item.category {
        PlanCategory::SkipDirectoryUpdate => {
            report.push(item.rel_path.clone(), None, ItemStatus::Skipped, None);
        }
        PlanCategory::CreateDirectory => {
            if options.dry_run {
                report.push(item.rel_path.clone(), None, ItemStatus::Created, Some("dry-run".into()));
                return;
            }
            let title = sanitize_title(abs_path.file_name().and_then(|n| n.to_str()).unwrap_or(""));
            match client.create_child_page(&parent_id, &title, Some("folder")).await {
                Ok(page) => {
                    let record = IndexRecord::new(page.id.clone(), page.url.clone(), parent_id.clone(), RecordKind::Directory);
                    let _ = index.put(&item.rel_path, record, true);
                    report.push(item.rel_path.clone(), Some(page.url), ItemStatus::Created, None);
                }
                Err(e) => report_failure(report, &item.rel_path, e),
            }
        }
        _ => {}
    }
}

async fn run_file_item(client: RemoteClient, fc: FilePlanContext) -> FileItemResult {
    let outcome = match fc.category {
        PlanCategory::CreateFile => {
            match push_file_content(&client, &fc.abs_path, &fc.parent_id, &fc.rel_path).await {
                Ok((page_id, page_url, sha1)) => FileOutcome::Created { page_id, page_url, sha1 },
                Err(e) => FileOutcome::Failed(e),
            }
        }
        PlanCategory::UpdateFile => match &fc.existing_page_id {
            Some(page_id) => match replace_page_content(&client, &fc.abs_path, page_id).await {
                Ok(sha1) => FileOutcome::Updated { sha1 },
                Err(e) => FileOutcome::Failed(e),
            },
            None => FileOutcome::Skipped,
        },
        _ => FileOutcome::Skipped,
    };
    FileItemResult { rel_path: fc.rel_path, parent_id: fc.parent_id, outcome }
}

fn apply_file_result(report: &mut Report, index: &mut Index, ctx: &AppContext, result: FileItemResult) {
    let abs_path = ctx.project_dir.join(&result.rel_path);
    match result.outcome {
        FileOutcome::Skipped => {}
        FileOutcome::Created { page_id, page_url, sha1 } => {
            let mut record = IndexRecord::new(page_id, page_url.clone(), result.parent_id, RecordKind::File);
            record.content_sha1 = Some(sha1);
            record.local_mtime_ns = mtime_ns(&abs_path).ok();
            record.last_sync_at = Some(chrono::Utc::now().to_rfc3339());
            let _ = index.put(&result.rel_path, record, true);
            report.push(result.rel_path, Some(page_url), ItemStatus::Created, None);
        }
        FileOutcome::Updated { sha1 } => {
            let Some(mut record) = index.get(&result.rel_path).cloned() else {
                return;
            };
            let page_url = record.page_url.clone();
            record.content_sha1 = Some(sha1);
            record.local_mtime_ns = mtime_ns(&abs_path).ok();
            record.last_sync_at = Some(chrono::Utc::now().to_rfc3339());
            let _ = index.put(&result.rel_path, record, true);
            report.push(result.rel_path, Some(page_url), ItemStatus::Updated, None);
        }
        FileOutcome::Failed(e) => report_failure(report, &result.rel_path, e),
    }
}

async fn push_file_content(
    client: &RemoteClient,
    abs_path: &Path,
    parent_id: &str,
    rel_path: &str,
) -> Result<(String, String, String)> {
    let title = sanitize_title(
        Path::new(rel_path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(rel_path),
    );
    let page = client.create_child_page(parent_id, &title, None).await?;
    let blocks = file_to_blocks(abs_path)?;
    client.append_blocks(&page.id, &blocks).await?;
    let sha1 = hash_file(abs_path)?;
    Ok((page.id, page.url, sha1))
}

async fn replace_page_content(client: &RemoteClient, abs_path: &Path, page_id: &str) -> Result<String> {
    // Delete-then-append: the remote has no diff primitive, so a full
    // replacement is the simplest transaction guaranteeing the
    // post-condition "remote content == converted(local bytes)". Deletions
    // and the subsequent append are serialized on this one page (spec.md §5).
    let existing_ids = client.list_child_block_ids(page_id).await?;
    for block_id in &existing_ids {
        client.delete_block(block_id).await?;
    }
    let blocks = file_to_blocks(abs_path)?;
    client.append_blocks(page_id, &blocks).await?;
    hash_file(abs_path)
}

fn file_to_blocks(abs_path: &Path) -> Result<Vec<Block>> {
    let ext = abs_path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let content = std::fs::read_to_string(abs_path)
        .with_context(|| format!("read {}", abs_path.display()))?;
    if let Some(lang) = markdown::code_language_for_extension(ext) {
        Ok(markdown::code_file_to_blocks(&content, lang))
    } else {
        Ok(markdown::markdown_to_blocks(strip_front_matter(&content)))
    }
}

/// Strips a leading `---`-delimited front-matter block (Flat mode's
/// `FlatFrontMatter::render()` format) before Markdown conversion. A Flat
/// page's front matter is metadata about the page, never document content,
/// and must never round-trip back to the remote as a block (Invariant 4).
fn strip_front_matter(content: &str) -> &str {
    let Some(rest) = content.strip_prefix("---\n") else {
        return content;
    };
    match rest.find("\n---\n") {
        Some(idx) => &rest[idx + "\n---\n".len()..],
        None => content,
    }
}

fn report_failure(report: &mut Report, rel_path: &str, err: anyhow::Error) {
    let kind = err
        .downcast_ref::<crate::error::ItemError>()
        .map(|e| e.kind)
        .unwrap_or(ErrorKind::IoError);
    report.push(rel_path.to_string(), None, ItemStatus::Failed(kind), Some(err.to_string()));
}

fn parent_of(rel_path: &str) -> String {
    match rel_path.rsplit_once('/') {
        Some((parent, _)) => parent.to_string(),
        None => ROOT_KEY.to_string(),
    }
}
