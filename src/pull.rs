use std::collections::VecDeque;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};

use crate::config::{Context as AppContext, SyncMode};
use crate::error::{ItemStatus, Report};
use crate::hashing::mtime_ns;
use crate::index::{Index, IndexRecord, RecordKind};
use crate::markdown::blocks_to_markdown;
use crate::merge::{self, Classification};
use crate::projection::{self, FlatFrontMatter, LocalTarget, RemotePageMeta};
use crate::remote::RemoteClient;

pub struct PullOptions {
    pub existing_only: bool,
    pub new_only: bool,
    pub dry_run: bool,
}

impl PullOptions {
    fn runs_existing(&self) -> bool {
        !self.new_only || self.existing_only
    }

    fn runs_new(&self) -> bool {
        !self.existing_only || self.new_only
    }
}

#[derive(Debug, Clone)]
pub enum PullPlanItem {
    /// `--existing-only` (change pull): the record's remote counterpart was
    /// edited since last sync.
    RefreshExisting { rel_path: String, page_id: String },
    /// `--new-only` (new-page pull): a page whose id isn't in the index yet.
    DiscoverNew { meta: RemotePageMeta, parent_rel_dir: String },
}

/// Enumerates the plan for both pull submodes (spec.md §4.6). `--dry-run`
/// stops after this step.
pub async fn compute_plan(
    client: &RemoteClient,
    index: &Index,
    root_page_id: &str,
    options: &PullOptions,
) -> Result<Vec<PullPlanItem>> {
    let mut plan = Vec::new();

    if options.runs_existing() {
        const LAST_EDITED_CONCURRENCY: usize = 8;
        let candidates: Vec<(String, String, Option<String>)> = index
            .records()
            .filter(|(_, r)| r.kind == RecordKind::File)
            .map(|(rel_path, r)| (rel_path.clone(), r.page_id.clone(), r.remote_last_edited.clone()))
            .collect();

        // Fetching `last_edited_time` is the dominant per-item cost of a
        // status check, so these go out concurrently rather than one at a
        // time (spec.md §4.6).
        let fetched: Vec<Result<(String, DateTime<Utc>)>> = stream::iter(candidates.iter().map(
            |(rel_path, page_id, _)| {
                let client = client.clone();
                let rel_path = rel_path.clone();
                let page_id = page_id.clone();
                async move {
                    let last_edited = client.get_last_edited_time(&page_id).await?;
                    Ok((rel_path, last_edited))
                }
            },
        ))
        .buffer_unordered(LAST_EDITED_CONCURRENCY)
        .collect()
        .await;

        let remote_last_edited: std::collections::HashMap<String, Option<String>> = candidates
            .into_iter()
            .map(|(rel_path, _, remote_last_edited)| (rel_path, remote_last_edited))
            .collect();

        for result in fetched {
            let (rel_path, last_edited) = result?;
            let stale = remote_last_edited
                .get(&rel_path)
                .and_then(|s| s.as_deref())
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| last_edited > t.with_timezone(&Utc))
                .unwrap_or(true);
            if stale {
                let page_id = index.get(&rel_path).map(|r| r.page_id.clone()).unwrap_or_default();
                plan.push(PullPlanItem::RefreshExisting { rel_path, page_id });
            }
        }
    }

    if options.runs_new() {
        let known: std::collections::HashSet<&str> =
            index.records().map(|(_, r)| r.page_id.as_str()).collect();
        let mut queue = VecDeque::new();
        queue.push_back((root_page_id.to_string(), String::new()));
        let mut visited = std::collections::HashSet::new();
        visited.insert(root_page_id.to_string());

        while let Some((page_id, parent_rel_dir)) = queue.pop_front() {
            let children = client.list_child_pages(&page_id).await?;
            for child in children {
                if !visited.insert(child.id.clone()) {
                    continue;
                }
                let meta = page_to_meta(&child);
                let next_rel_dir = if meta.is_directory_like() {
                    join_rel_dir(&parent_rel_dir, &crate::paths::sanitize_title(&meta.title))
                } else {
                    parent_rel_dir.clone()
                };
                if !known.contains(child.id.as_str()) {
                    plan.push(PullPlanItem::DiscoverNew {
                        meta: meta.clone(),
                        parent_rel_dir: parent_rel_dir.clone(),
                    });
                }
                queue.push_back((child.id, next_rel_dir));
            }
        }
    }

    Ok(plan)
}

fn join_rel_dir(parent_rel_dir: &str, title: &str) -> String {
    if parent_rel_dir.is_empty() {
        title.to_string()
    } else {
        format!("{parent_rel_dir}/{title}")
    }
}

fn page_to_meta(page: &crate::remote::RemotePage) -> RemotePageMeta {
    RemotePageMeta {
        page_id: page.id.clone(),
        page_url: page.url.clone(),
        parent_id: page.parent_id.clone(),
        title: page.title.clone(),
        is_folder_marked: page.is_folder_marked,
        has_child_pages: page.has_child_pages,
        has_inline_content: page.has_inline_content,
        children_ids: Vec::new(),
    }
}

/// Runs the full pull: enumerate, render changed pages into
/// `.c2n/pull/latest/<relPath>`, then invoke the Merge Engine against the
/// working tree (spec.md §4.6/§4.7).
pub async fn execute_plan(
    ctx: &AppContext,
    client: &RemoteClient,
    index: &mut Index,
    plan: &[PullPlanItem],
    options: &PullOptions,
) -> Result<Report> {
    let mut report = Report::new();
    let staging = ctx.project_dir.join(".c2n").join("pull").join("latest");

    for item in plan {
        match item {
            PullPlanItem::RefreshExisting { rel_path, page_id } => {
                let blocks = client.get_child_blocks(page_id).await?;
                let rendered = blocks_to_markdown(&blocks);

                if options.dry_run {
                    report.push(rel_path.clone(), None, ItemStatus::Updated, Some("dry-run".into()));
                    continue;
                }

                let staged_path = staging.join(rel_path);
                if let Some(parent) = staged_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&staged_path, &rendered)?;

                let local_path = ctx.project_dir.join(rel_path);
                let local_bytes = std::fs::read(&local_path).ok();
                let outcome = merge::merge(local_bytes.as_deref(), rendered.as_bytes());

                std::fs::write(&local_path, &outcome.bytes)?;

                if let Some(mut record) = index.get(rel_path).cloned() {
                    record.remote_last_edited = Some(Utc::now().to_rfc3339());
                    record.last_sync_at = Some(Utc::now().to_rfc3339());
                    record.content_sha1 = Some(crate::hashing::hash_bytes(&outcome.bytes));
                    record.local_mtime_ns = mtime_ns(&local_path).ok();
                    let _ = index.put(rel_path, record, false);
                }

                let status = match outcome.classification {
                    Classification::Same => ItemStatus::Skipped,
                    Classification::Update if outcome.conflict_count > 0 => ItemStatus::Conflict,
                    _ => ItemStatus::Updated,
                };
                report.push(rel_path.clone(), None, status, None);
            }
            PullPlanItem::DiscoverNew { meta, parent_rel_dir } => {
                if options.dry_run {
                    report.push(meta.title.clone(), Some(meta.page_url.clone()), ItemStatus::Created, Some("dry-run".into()));
                    continue;
                }
                let target = projection::project_page(ctx.config.sync_mode, meta, parent_rel_dir);
                write_discovered(ctx, client, index, meta, &target).await?;
                report.push(meta.title.clone(), Some(meta.page_url.clone()), ItemStatus::Created, None);
            }
        }
    }

    Ok(report)
}

async fn write_discovered(
    ctx: &AppContext,
    client: &RemoteClient,
    index: &mut Index,
    meta: &RemotePageMeta,
    target: &LocalTarget,
) -> Result<()> {
    match target {
        LocalTarget::Directory { rel_path } => {
            std::fs::create_dir_all(ctx.project_dir.join(rel_path))?;
            let record = IndexRecord::new(
                meta.page_id.clone(),
                meta.page_url.clone(),
                meta.parent_id.clone(),
                RecordKind::Directory,
            );
            let _ = index.put(rel_path, record, false);
        }
        LocalTarget::File { rel_path } => {
            let abs_path = ctx.project_dir.join(rel_path);
            if let Some(parent) = abs_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let blocks = client.get_child_blocks(&meta.page_id).await?;
            let content = blocks_to_markdown(&blocks);
            let body = match ctx.config.sync_mode {
                SyncMode::Flat => format!("{}{}", FlatFrontMatter::new(meta).render(), content),
                SyncMode::Hierarchy => content,
            };
            std::fs::write(&abs_path, body)?;
            let kind = match ctx.config.sync_mode {
                SyncMode::Flat => RecordKind::Page,
                SyncMode::Hierarchy => RecordKind::File,
            };
            let mut record = IndexRecord::new(meta.page_id.clone(), meta.page_url.clone(), meta.parent_id.clone(), kind);
            record.content_sha1 = Some(crate::hashing::hash_file(&abs_path)?);
            record.local_mtime_ns = mtime_ns(&abs_path).ok();
            record.remote_last_edited = Some(Utc::now().to_rfc3339());
            record.last_sync_at = Some(Utc::now().to_rfc3339());
            let _ = index.put(rel_path, record, false);
        }
    }
    Ok(())
}
