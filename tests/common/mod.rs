#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tempfile::TempDir;

use pubfinder::config::FeedConfig;
use pubfinder::crawler::{SortDirection, SortField};
use pubfinder::SqliteStore;

/// Query strings the fake feed has received, in order.
pub type CallLog = Arc<Mutex<Vec<HashMap<String, String>>>>;

#[derive(Clone)]
struct FeedState {
    sizes: Arc<Vec<usize>>,
    status: StatusCode,
    without_id: Option<usize>,
    calls: CallLog,
}

pub fn atom_entry(n: usize) -> String {
    let day = 28 - (n % 28);
    format!(
        r#"  <entry>
    <id>http://arxiv.org/abs/2405.{n:05}v1</id>
    <published>2024-04-{day:02}T12:00:00Z</published>
    <title>Paper number {n}</title>
    <summary>Results on topic {n}.</summary>
    <author><name>Author {n}</name></author>
    <link href="http://arxiv.org/abs/2405.{n:05}v1" rel="alternate" type="text/html"/>
    <arxiv:primary_category xmlns:arxiv="http://arxiv.org/schemas/atom" term="cs.LG"/>
    <category term="cs.LG"/>
    <category term="{extra}"/>
  </entry>
"#,
        extra = if n % 2 == 0 { "cs.AI" } else { "stat.ML" },
    )
}

/// Feed of entries `start..start + count`; entry `without_id` loses its `<id>`.
pub fn atom_feed(start: usize, count: usize, without_id: Option<usize>) -> String {
    let entries: String = (start..start + count)
        .map(|n| {
            let entry = atom_entry(n);
            if without_id == Some(n) {
                entry.replace(&format!("    <id>http://arxiv.org/abs/2405.{n:05}v1</id>\n"), "")
            } else {
                entry
            }
        })
        .collect();
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <feed xmlns=\"http://www.w3.org/2005/Atom\">\n<title>fake</title>\n{entries}</feed>"
    )
}

async fn serve_page(
    State(state): State<FeedState>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    let call = {
        let mut calls = state.calls.lock().unwrap();
        calls.push(params.clone());
        calls.len() - 1
    };
    if state.status != StatusCode::OK {
        return (state.status, "unavailable".to_string());
    }
    let start: usize = params.get("start").and_then(|s| s.parse().ok()).unwrap_or(0);
    let count = state.sizes.get(call).copied().unwrap_or(0);
    (StatusCode::OK, atom_feed(start, count, state.without_id))
}

/// Start a fake arXiv endpoint that answers call `i` with `sizes[i]` entries.
pub async fn spawn_feed(sizes: &[usize], status: StatusCode) -> (String, CallLog) {
    spawn_feed_with(sizes, status, None).await
}

/// Like [`spawn_feed`], but entry number `without_id` is served without an `<id>`.
pub async fn spawn_feed_with(
    sizes: &[usize],
    status: StatusCode,
    without_id: Option<usize>,
) -> (String, CallLog) {
    let calls: CallLog = Arc::default();
    let state = FeedState {
        sizes: Arc::new(sizes.to_vec()),
        status,
        without_id,
        calls: Arc::clone(&calls),
    };
    let app = Router::new().route("/api/query", get(serve_page)).with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}/api/query"), calls)
}

pub fn feed_config(base_url: &str) -> FeedConfig {
    FeedConfig {
        base_url: base_url.to_string(),
        search_query: "cat:cs.*".to_string(),
        sort_field: SortField::SubmittedDate,
        sort_direction: SortDirection::Descending,
        timeout_secs: 5,
        user_agent: "pubfinder-tests".to_string(),
    }
}

pub async fn temp_store() -> (TempDir, SqliteStore) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("index.db").display());
    let store = SqliteStore::connect_with(&url, 4, Duration::from_secs(5))
        .await
        .unwrap();
    store.init_schema().await.unwrap();
    (dir, store)
}
