pub mod pool;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client as HttpClient, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{ErrorKind, ItemError};
use crate::markdown::Block;
use pool::{RateLimiter, WorkerPool};

const MAX_RETRIES: u32 = 5;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Deserialize)]
pub struct RemotePage {
    pub id: String,
    pub url: String,
    pub title: String,
    pub parent_id: String,
    pub last_edited_time: DateTime<Utc>,
    #[serde(default)]
    pub is_folder_marked: bool,
    #[serde(default)]
    pub has_child_pages: bool,
    #[serde(default)]
    pub has_inline_content: bool,
}

#[derive(Debug, Deserialize)]
struct Paginated<T> {
    results: Vec<T>,
    has_more: bool,
    next_cursor: Option<String>,
}

/// Thin typed wrapper over the remote document service's HTTP API
/// (spec.md §4.4). Clonable; shares one underlying `reqwest::Client`, one
/// worker pool, and one rate limiter across clones.
#[derive(Clone)]
pub struct RemoteClient {
    http: HttpClient,
    base_url: String,
    token: String,
    pool: WorkerPool,
    limiter: Arc<RateLimiter>,
}

impl RemoteClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, pool_size: usize) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            token: token.into(),
            pool: WorkerPool::new(pool_size),
            limiter: Arc::new(RateLimiter::new(3.0, 8.0)),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn send_with_retry(&self, build: impl Fn() -> reqwest::RequestBuilder) -> Result<Response> {
        let _permit = self.pool.acquire().await;
        self.limiter.acquire().await;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let req = build().bearer_auth(&self.token);
            let result = req.send().await;
            match result {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp);
                    }
                    if is_fatal_status(status) {
                        let text = resp.text().await.unwrap_or_default();
                        return Err(ItemError::fatal(
                            ErrorKind::RemoteFatal,
                            "remote",
                            anyhow::anyhow!("{status}: {text}"),
                        ));
                    }
                    if attempt >= MAX_RETRIES {
                        let text = resp.text().await.unwrap_or_default();
                        return Err(ItemError::fatal(
                            ErrorKind::RemoteTransient,
                            "remote",
                            anyhow::anyhow!("{status} after {attempt} attempts: {text}"),
                        ));
                    }
                }
                Err(e) if attempt >= MAX_RETRIES => {
                    return Err(ItemError::fatal(ErrorKind::RemoteTransient, "remote", e));
                }
                Err(_) => {}
            }
            tokio::time::sleep(backoff_delay(attempt)).await;
        }
    }

    pub async fn retrieve_page(&self, page_id: &str) -> Result<RemotePage> {
        let path = format!("/v1/pages/{page_id}");
        let resp = self
            .send_with_retry(|| self.http.get(self.url(&path)))
            .await?;
        resp.json().await.context("decode page")
    }

    pub async fn get_child_blocks(&self, page_id: &str) -> Result<Vec<Block>> {
        let values = self.get_child_block_payloads(page_id).await?;
        Ok(values.iter().filter_map(block_from_payload).collect())
    }

    /// Ids of every direct child block, in remote order. Used to drive the
    /// delete-then-append replacement strategy (spec.md §4.5/§5: block
    /// deletions and appends on one page are serialized).
    pub async fn list_child_block_ids(&self, page_id: &str) -> Result<Vec<String>> {
        let values = self.get_child_block_payloads(page_id).await?;
        Ok(values
            .iter()
            .filter_map(|v| v.get("id")?.as_str().map(str::to_string))
            .collect())
    }

    async fn get_child_block_payloads(&self, page_id: &str) -> Result<Vec<Value>> {
        let mut values = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut path = format!("/v1/blocks/{page_id}/children?page_size=100");
            if let Some(c) = &cursor {
                path.push_str(&format!("&start_cursor={c}"));
            }
            let resp = self
                .send_with_retry(|| self.http.get(self.url(&path)))
                .await?;
            let page: Paginated<Value> = resp.json().await.context("decode block page")?;
            values.extend(page.results);
            if page.has_more {
                cursor = page.next_cursor;
            } else {
                break;
            }
        }
        Ok(values)
    }

    pub async fn append_blocks(&self, page_id: &str, blocks: &[Block]) -> Result<()> {
        let payload = json!({ "children": blocks.iter().map(block_to_payload).collect::<Vec<_>>() });
        let path = format!("/v1/blocks/{page_id}/children");
        self.send_with_retry(|| self.http.patch(self.url(&path)).json(&payload))
            .await?;
        Ok(())
    }

    pub async fn delete_block(&self, block_id: &str) -> Result<()> {
        let path = format!("/v1/blocks/{block_id}");
        self.send_with_retry(|| self.http.delete(self.url(&path)))
            .await?;
        Ok(())
    }

    pub async fn create_child_page(
        &self,
        parent_id: &str,
        title: &str,
        icon: Option<&str>,
    ) -> Result<RemotePage> {
        let payload = json!({
            "parent": { "page_id": parent_id },
            "properties": { "title": title },
            "icon": icon,
        });
        let resp = self
            .send_with_retry(|| self.http.post(self.url("/v1/pages")).json(&payload))
            .await?;
        resp.json().await.context("decode created page")
    }

    pub async fn update_page_title(&self, page_id: &str, title: &str) -> Result<()> {
        let payload = json!({ "properties": { "title": title } });
        let path = format!("/v1/pages/{page_id}");
        self.send_with_retry(|| self.http.patch(self.url(&path)).json(&payload))
            .await?;
        Ok(())
    }

    pub async fn archive_page(&self, page_id: &str) -> Result<()> {
        let payload = json!({ "archived": true });
        let path = format!("/v1/pages/{page_id}");
        self.send_with_retry(|| self.http.patch(self.url(&path)).json(&payload))
            .await?;
        Ok(())
    }

    pub async fn get_last_edited_time(&self, page_id: &str) -> Result<DateTime<Utc>> {
        Ok(self.retrieve_page(page_id).await?.last_edited_time)
    }

    pub async fn find_child_page_by_title(
        &self,
        parent_id: &str,
        title: &str,
    ) -> Result<Option<RemotePage>> {
        Ok(self
            .list_child_pages(parent_id)
            .await?
            .into_iter()
            .find(|p| p.title == title))
    }

    /// Lists every direct child page of `parent_id`, draining pagination.
    /// Used by the Pull Engine's new-page BFS (spec.md §4.6).
    pub async fn list_child_pages(&self, parent_id: &str) -> Result<Vec<RemotePage>> {
        let mut out = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut path = format!("/v1/pages/{parent_id}/children?page_size=100");
            if let Some(c) = &cursor {
                path.push_str(&format!("&start_cursor={c}"));
            }
            let resp = self
                .send_with_retry(|| self.http.get(self.url(&path)))
                .await?;
            let page: Paginated<RemotePage> = resp.json().await.context("decode page list")?;
            out.extend(page.results);
            if page.has_more {
                cursor = page.next_cursor;
            } else {
                return Ok(out);
            }
        }
    }
}

fn is_fatal_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND
    )
}

fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(200u64.saturating_mul(1u64 << attempt.min(6)))
}

fn block_to_payload(block: &Block) -> Value {
    match block {
        Block::Heading1(t) => json!({"type": "heading_1", "text": t}),
        Block::Heading2(t) => json!({"type": "heading_2", "text": t}),
        Block::Heading3(t) => json!({"type": "heading_3", "text": t}),
        Block::Paragraph(t) => json!({"type": "paragraph", "text": t}),
        Block::BulletedListItem { text, depth } => {
            json!({"type": "bulleted_list_item", "text": text, "depth": depth})
        }
        Block::NumberedListItem { text, depth } => {
            json!({"type": "numbered_list_item", "text": text, "depth": depth})
        }
        Block::ToDo { text, checked, depth } => {
            json!({"type": "to_do", "text": text, "checked": checked, "depth": depth})
        }
        Block::Quote(t) => json!({"type": "quote", "text": t}),
        Block::Code { language, segments } => {
            json!({"type": "code", "language": language, "segments": segments})
        }
        Block::Table { header, rows } => json!({"type": "table", "header": header, "rows": rows}),
        Block::Image { url, alt } => json!({"type": "image", "url": url, "alt": alt}),
    }
}

fn block_from_payload(value: &Value) -> Option<Block> {
    let kind = value.get("type")?.as_str()?;
    let s = |key: &str| value.get(key)?.as_str().map(str::to_string);
    match kind {
        "heading_1" => Some(Block::Heading1(s("text")?)),
        "heading_2" => Some(Block::Heading2(s("text")?)),
        "heading_3" => Some(Block::Heading3(s("text")?)),
        "paragraph" => Some(Block::Paragraph(s("text")?)),
        "bulleted_list_item" => Some(Block::BulletedListItem {
            text: s("text")?,
            depth: value.get("depth")?.as_u64()? as usize,
        }),
        "numbered_list_item" => Some(Block::NumberedListItem {
            text: s("text")?,
            depth: value.get("depth")?.as_u64()? as usize,
        }),
        "to_do" => Some(Block::ToDo {
            text: s("text")?,
            checked: value.get("checked")?.as_bool()?,
            depth: value.get("depth")?.as_u64()? as usize,
        }),
        "quote" => Some(Block::Quote(s("text")?)),
        "code" => Some(Block::Code {
            language: s("language")?,
            segments: value
                .get("segments")?
                .as_array()?
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        }),
        "table" => Some(Block::Table {
            header: value
                .get("header")?
                .as_array()?
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            rows: value
                .get("rows")?
                .as_array()?
                .iter()
                .filter_map(|row| {
                    row.as_array().map(|cells| {
                        cells
                            .iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect()
                    })
                })
                .collect(),
        }),
        "image" => Some(Block::Image {
            url: s("url")?,
            alt: s("alt")?,
        }),
        _ => None,
    }
}
