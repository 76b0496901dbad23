//! End-to-end coverage against an in-process stub remote, grounded on the
//! teacher's `http.rs` ephemeral-`TcpListener` + `axum::serve` test pattern.
//! The stub models just enough of the document API (`RemoteClient`'s own
//! surface) to drive the Push and Pull Engines through a real HTTP round
//! trip rather than through their module-internal plumbing.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use axum::extract::{Path as AxumPath, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use uuid::Uuid;

use c2n::config::{Context as AppContext, ProjectConfig};
use c2n::error::ItemStatus;
use c2n::filters::SyncFilters;
use c2n::hashing::hash_bytes;
use c2n::index::Index;
use c2n::pull::{self, PullOptions};
use c2n::push::{self, PushOptions};
use c2n::remote::RemoteClient;

#[derive(Clone)]
struct PageRow {
    id: String,
    url: String,
    title: String,
    parent_id: String,
    last_edited_time: String,
    is_folder_marked: bool,
    has_child_pages: bool,
    has_inline_content: bool,
}

#[derive(Default)]
struct ServerState {
    pages: Mutex<HashMap<String, PageRow>>,
    blocks: Mutex<HashMap<String, Vec<Value>>>,
}

fn page_json(row: &PageRow) -> Value {
    json!({
        "id": row.id,
        "url": row.url,
        "title": row.title,
        "parent_id": row.parent_id,
        "last_edited_time": row.last_edited_time,
        "is_folder_marked": row.is_folder_marked,
        "has_child_pages": row.has_child_pages,
        "has_inline_content": row.has_inline_content,
    })
}

async fn get_page(State(state): State<Arc<ServerState>>, AxumPath(id): AxumPath<String>) -> Json<Value> {
    let pages = state.pages.lock().unwrap();
    Json(page_json(pages.get(&id).expect("page exists")))
}

async fn update_page(
    State(state): State<Arc<ServerState>>,
    AxumPath(id): AxumPath<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let mut pages = state.pages.lock().unwrap();
    if let Some(row) = pages.get_mut(&id) {
        if let Some(title) = body
            .get("properties")
            .and_then(|p| p.get("title"))
            .and_then(|t| t.as_str())
        {
            row.title = title.to_string();
        }
    }
    Json(json!({}))
}

async fn list_page_children(
    State(state): State<Arc<ServerState>>,
    AxumPath(parent_id): AxumPath<String>,
) -> Json<Value> {
    let pages = state.pages.lock().unwrap();
    let results: Vec<Value> = pages
        .values()
        .filter(|p| p.parent_id == parent_id)
        .map(page_json)
        .collect();
    Json(json!({"results": results, "has_more": false, "next_cursor": Value::Null}))
}

async fn create_page(State(state): State<Arc<ServerState>>, Json(body): Json<Value>) -> Json<Value> {
    let parent_id = body["parent"]["page_id"].as_str().unwrap_or("").to_string();
    let title = body["properties"]["title"].as_str().unwrap_or("").to_string();
    let is_folder = body.get("icon").and_then(|v| v.as_str()) == Some("folder");
    let id = Uuid::new_v4().to_string();
    let row = PageRow {
        id: id.clone(),
        url: format!("https://notion.so/{id}"),
        title,
        parent_id: parent_id.clone(),
        last_edited_time: Utc::now().to_rfc3339(),
        is_folder_marked: is_folder,
        has_child_pages: false,
        has_inline_content: false,
    };
    let out = page_json(&row);
    let mut pages = state.pages.lock().unwrap();
    if let Some(parent) = pages.get_mut(&parent_id) {
        parent.has_child_pages = true;
    }
    pages.insert(id, row);
    Json(out)
}

async fn get_block_children(
    State(state): State<Arc<ServerState>>,
    AxumPath(page_id): AxumPath<String>,
) -> Json<Value> {
    let blocks = state.blocks.lock().unwrap();
    let results = blocks.get(&page_id).cloned().unwrap_or_default();
    Json(json!({"results": results, "has_more": false, "next_cursor": Value::Null}))
}

async fn append_block_children(
    State(state): State<Arc<ServerState>>,
    AxumPath(page_id): AxumPath<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let children = body["children"].as_array().cloned().unwrap_or_default();
    {
        let mut blocks = state.blocks.lock().unwrap();
        let entry = blocks.entry(page_id.clone()).or_default();
        for mut child in children {
            child["id"] = json!(Uuid::new_v4().to_string());
            entry.push(child);
        }
    }
    let mut pages = state.pages.lock().unwrap();
    if let Some(row) = pages.get_mut(&page_id) {
        row.has_inline_content = true;
    }
    Json(json!({}))
}

async fn delete_block(State(state): State<Arc<ServerState>>, AxumPath(block_id): AxumPath<String>) -> Json<Value> {
    let mut blocks = state.blocks.lock().unwrap();
    for entries in blocks.values_mut() {
        entries.retain(|b| b.get("id").and_then(|v| v.as_str()) != Some(block_id.as_str()));
    }
    Json(json!({}))
}

async fn spawn_stub(state: Arc<ServerState>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new()
        .route("/v1/pages/:id", get(get_page).patch(update_page))
        .route("/v1/pages/:id/children", get(list_page_children))
        .route("/v1/pages", post(create_page))
        .route(
            "/v1/blocks/:id/children",
            get(get_block_children).patch(append_block_children),
        )
        .route("/v1/blocks/:id", axum::routing::delete(delete_block))
        .with_state(state);

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    format!("http://{}", addr)
}

fn make_temp_dir(name: &str) -> PathBuf {
    let tmp = std::env::temp_dir().join(format!("c2n-integration-test-{name}"));
    let _ = std::fs::remove_dir_all(&tmp);
    std::fs::create_dir_all(&tmp).unwrap();
    tmp
}

fn insert_root(state: &ServerState) -> String {
    let root_id = Uuid::new_v4().to_string();
    let row = PageRow {
        id: root_id.clone(),
        url: format!("https://notion.so/{root_id}"),
        title: "Root".to_string(),
        parent_id: String::new(),
        last_edited_time: Utc::now().to_rfc3339(),
        is_folder_marked: true,
        has_child_pages: false,
        has_inline_content: false,
    };
    state.pages.lock().unwrap().insert(root_id.clone(), row);
    root_id
}

/// spec scenario 1: pushing one clean file renders the exact Markdown
/// remotely and records its content hash.
#[tokio::test]
async fn clean_push_of_one_file() {
    let dir = make_temp_dir("push-clean");
    std::fs::write(dir.join("README.md"), "# Hi\nhello\n").unwrap();
    std::fs::create_dir_all(dir.join(".c2n")).unwrap();

    let state = Arc::new(ServerState::default());
    let root_id = insert_root(&state);
    let base = spawn_stub(state.clone()).await;
    let client = RemoteClient::new(base, "test-token", 4).unwrap();

    let index = Index::load(&dir).unwrap();
    let filters = SyncFilters::load(&dir).unwrap();
    let options = PushOptions { force_all: false, no_dir_update: false, dry_run: false };
    let plan = push::compute_plan(&dir, &index, &filters, &options).unwrap();
    assert_eq!(plan.len(), 1);

    let ctx = AppContext::new(dir.clone(), ProjectConfig::default());
    let mut index = index;
    let report = push::execute_plan(&ctx, &client, &mut index, &plan, &root_id, &options)
        .await
        .unwrap();
    assert_eq!(report.exit_code(), 0);
    assert!(matches!(report.outcomes[0].status, ItemStatus::Created));

    let record = index.get("README.md").unwrap();
    assert_eq!(
        record.content_sha1.as_deref(),
        Some(hash_bytes(b"# Hi\nhello\n").as_str())
    );

    let blocks = state.blocks.lock().unwrap();
    let stored = blocks.get(&record.page_id).cloned().unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0]["type"], "heading_1");
    assert_eq!(stored[0]["text"], "Hi");
    assert_eq!(stored[1]["type"], "paragraph");
    assert_eq!(stored[1]["text"], "hello");
}

/// P3: an unchanged file is skipped on a second push, and no block writes
/// happen against the page it already has.
#[tokio::test]
async fn second_push_of_unchanged_file_is_skipped() {
    let dir = make_temp_dir("push-idempotent");
    std::fs::write(dir.join("README.md"), "# Hi\nhello\n").unwrap();
    std::fs::create_dir_all(dir.join(".c2n")).unwrap();

    let state = Arc::new(ServerState::default());
    let root_id = insert_root(&state);
    let base = spawn_stub(state.clone()).await;
    let client = RemoteClient::new(base, "test-token", 4).unwrap();

    let filters = SyncFilters::load(&dir).unwrap();
    let options = PushOptions { force_all: false, no_dir_update: false, dry_run: false };
    let ctx = AppContext::new(dir.clone(), ProjectConfig::default());

    let mut index = Index::load(&dir).unwrap();
    let plan = push::compute_plan(&dir, &index, &filters, &options).unwrap();
    push::execute_plan(&ctx, &client, &mut index, &plan, &root_id, &options)
        .await
        .unwrap();

    let page_id = index.get("README.md").unwrap().page_id.clone();
    let blocks_before = state.blocks.lock().unwrap().get(&page_id).cloned().unwrap();

    let plan2 = push::compute_plan(&dir, &index, &filters, &options).unwrap();
    assert_eq!(plan2.len(), 1);
    assert_eq!(plan2[0].category, push::PlanCategory::SkipFile);

    let report2 = push::execute_plan(&ctx, &client, &mut index, &plan2, &root_id, &options)
        .await
        .unwrap();
    assert!(matches!(report2.outcomes[0].status, ItemStatus::Skipped));

    let blocks_after = state.blocks.lock().unwrap().get(&page_id).cloned().unwrap();
    assert_eq!(blocks_before.len(), blocks_after.len());
}

/// spec scenario 3: a remote edit advances `last_edited_time`; pull writes
/// the new content and updates the index, and re-running pull is a no-op.
#[tokio::test]
async fn change_pull_then_idempotent_rerun() {
    let dir = make_temp_dir("pull-change");
    std::fs::write(dir.join("README.md"), "A\n").unwrap();
    std::fs::create_dir_all(dir.join(".c2n")).unwrap();

    let state = Arc::new(ServerState::default());
    let root_id = insert_root(&state);

    let page_id = Uuid::new_v4().to_string();
    let stale_edit = Utc::now() - chrono::Duration::hours(2);
    {
        let mut pages = state.pages.lock().unwrap();
        pages.insert(
            page_id.clone(),
            PageRow {
                id: page_id.clone(),
                url: format!("https://notion.so/{page_id}"),
                title: "README".to_string(),
                parent_id: root_id.clone(),
                last_edited_time: Utc::now().to_rfc3339(),
                is_folder_marked: false,
                has_child_pages: false,
                has_inline_content: true,
            },
        );
        let mut blocks = state.blocks.lock().unwrap();
        blocks.insert(
            page_id.clone(),
            vec![
                json!({"id": Uuid::new_v4().to_string(), "type": "paragraph", "text": "A\nB"}),
            ],
        );
    }

    let mut index = Index::load(&dir).unwrap();
    let mut record = c2n::index::IndexRecord::new(
        page_id.clone(),
        format!("https://notion.so/{page_id}"),
        root_id.clone(),
        c2n::index::RecordKind::File,
    );
    record.content_sha1 = Some(hash_bytes(b"A\n"));
    record.remote_last_edited = Some(stale_edit.to_rfc3339());
    index.put("README.md", record, false).unwrap();

    let base = spawn_stub(state.clone()).await;
    let client = RemoteClient::new(base, "test-token", 4).unwrap();
    let ctx = AppContext::new(dir.clone(), ProjectConfig::default());
    let options = PullOptions { existing_only: true, new_only: false, dry_run: false };

    let plan = pull::compute_plan(&client, &index, &root_id, &options).await.unwrap();
    assert_eq!(plan.len(), 1);

    let report = pull::execute_plan(&ctx, &client, &mut index, &plan, &options)
        .await
        .unwrap();
    assert!(matches!(report.outcomes[0].status, ItemStatus::Updated));

    let on_disk = std::fs::read_to_string(dir.join("README.md")).unwrap();
    assert_eq!(on_disk, "A\nB\n");
    assert_eq!(
        index.get("README.md").unwrap().content_sha1.as_deref(),
        Some(hash_bytes(b"A\nB\n").as_str())
    );

    // Re-running against the now-unchanged remote produces no plan items at
    // all, per P2 (pull idempotency on an unchanged tree).
    let plan_again = pull::compute_plan(&client, &index, &root_id, &options).await.unwrap();
    assert!(plan_again.is_empty());
}
