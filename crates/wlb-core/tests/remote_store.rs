use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use wlb_core::collection::{Collection, LoadOutcome};
use wlb_core::error::{TrackerError, TrackerResult};
use wlb_core::identity::{Identity, IdentityProvider, SignIn};
use wlb_core::item::{Category, NewItem, Title};
use wlb_core::store::{ItemStore, RemoteConfig, RemoteStore};

/// One request as the backend saw it.
#[derive(Debug)]
struct Seen {
    method: String,
    target: String,
    headers: HashMap<String, String>,
    body: String,
}

impl Seen {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    fn json(&self) -> Value {
        serde_json::from_str(&self.body).expect("json body")
    }
}

async fn answer(stream: TcpStream, status: u16, body: &str) -> Seen {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader
        .read_line(&mut request_line)
        .await
        .expect("request line");
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await.expect("header line");
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let length = headers
        .get("content-length")
        .and_then(|raw| raw.parse::<usize>().ok())
        .unwrap_or(0);
    let mut raw_body = vec![0; length];
    reader.read_exact(&mut raw_body).await.expect("body");

    let reason = match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        _ => "Error",
    };
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    );
    let stream = reader.get_mut();
    stream.write_all(response.as_bytes()).await.expect("respond");
    let _ = stream.shutdown().await;

    Seen {
        method,
        target,
        headers,
        body: String::from_utf8(raw_body).expect("utf8 body"),
    }
}

/// Local backend that answers each connection with the next canned reply
/// and hands back what it received.
async fn backend(replies: Vec<(u16, String)>) -> (RemoteStore, JoinHandle<Vec<Seen>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url = format!("http://{}", listener.local_addr().expect("addr"));
    let server = tokio::spawn(async move {
        let mut seen = Vec::new();
        for (status, body) in replies {
            let (stream, _) = listener.accept().await.expect("accept");
            seen.push(answer(stream, status, &body).await);
        }
        seen
    });

    let client = reqwest::Client::builder()
        .no_proxy()
        .build()
        .expect("client");
    let config = RemoteConfig::new(url, "anon").expect("config");
    (RemoteStore::with_client(config, client), server)
}

fn owner() -> Identity {
    Identity {
        user_id: "u-1".to_string(),
        email: Some("me@example.com".to_string()),
        access_token: Some("tok-1".to_string()),
    }
}

fn row(id: &str, title: &str, kind: &str, completed: bool) -> Value {
    json!({
        "id": id,
        "user_id": "u-1",
        "title": title,
        "start_time": "2026-04-02T15:00:00Z",
        "created_at": "2026-04-01T10:00:00Z",
        "calendar_id": null,
        "completed": completed,
        "type": kind,
    })
}

fn due() -> DateTime<Utc> {
    "2026-04-02T15:00:00Z".parse().expect("due")
}

#[tokio::test]
async fn fetch_filters_by_owner_and_skips_unreadable_rows() {
    let rows = json!([row("ev-1", "Vet visit", "Personal", false), row("ev-2", "Taxes", "Errand", false)]);
    let (store, server) = backend(vec![(200, rows.to_string())]).await;

    let items = store.fetch(&owner()).await.expect("fetch");
    let seen = server.await.expect("server");

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, "ev-1");
    assert_eq!(items[0].category, Category::Life);

    let request = &seen[0];
    assert_eq!(request.method, "GET");
    assert!(request.target.starts_with("/rest/v1/events?"), "{}", request.target);
    assert!(request.target.contains("user_id=eq.u-1"), "{}", request.target);
    assert!(request.target.contains("order=start_time.asc"), "{}", request.target);
    assert!(request.target.contains("select="), "{}", request.target);
    assert_eq!(request.header("apikey"), Some("anon"));
    assert_eq!(request.header("authorization"), Some("Bearer tok-1"));
}

#[tokio::test]
async fn anonymous_owner_falls_back_to_the_public_key() {
    let (store, server) = backend(vec![(200, "[]".to_string())]).await;
    let anonymous = Identity {
        access_token: None,
        ..owner()
    };

    assert!(store.fetch(&anonymous).await.expect("fetch").is_empty());
    let seen = server.await.expect("server");
    assert_eq!(seen[0].header("authorization"), Some("Bearer anon"));
}

#[tokio::test]
async fn insert_posts_the_row_and_returns_the_stored_one() {
    let stored = row("srv-1", "Feed cat", "Pet", false);
    let (store, server) = backend(vec![(201, stored.to_string())]).await;

    let new_item = NewItem::new(Title::parse("Feed cat").expect("title"), Category::Pet, due(), due());
    let item = store.insert(&owner(), new_item).await.expect("insert");
    let seen = server.await.expect("server");

    assert_eq!(item.id, "srv-1");
    assert_eq!(item.category, Category::Pet);

    let request = &seen[0];
    assert_eq!(request.method, "POST");
    assert!(request.target.starts_with("/rest/v1/events"));
    assert_eq!(request.header("prefer"), Some("return=representation"));
    assert_eq!(request.header("accept"), Some("application/vnd.pgrst.object+json"));
    let body = request.json();
    assert_eq!(body["user_id"], "u-1");
    assert_eq!(body["title"], "Feed cat");
    assert_eq!(body["type"], "Pet");
    assert_eq!(body["completed"], false);
    assert_eq!(body["start_time"], "2026-04-02T15:00:00Z");
}

#[tokio::test]
async fn confirmed_insert_with_unreadable_echo_still_succeeds() {
    let stored = row("srv-2", "Feed cat", "Chores", false);
    let (store, server) = backend(vec![(201, stored.to_string())]).await;

    let new_item = NewItem::new(Title::parse("Feed cat").expect("title"), Category::Pet, due(), due());
    let item = store.insert(&owner(), new_item).await.expect("insert");
    server.await.expect("server");

    assert_eq!(item.id, "srv-2");
    assert_eq!(item.category, Category::Pet);
}

#[tokio::test]
async fn updates_and_deletes_target_one_row() {
    let (store, server) = backend(vec![
        (204, String::new()),
        (204, String::new()),
        (204, String::new()),
    ])
    .await;
    let later: DateTime<Utc> = "2026-04-02T15:15:00Z".parse().expect("later");

    store.set_completed(&owner(), "ev-1", true).await.expect("complete");
    store.set_due(&owner(), "ev-1", later).await.expect("snooze");
    store.delete(&owner(), "ev-1").await.expect("delete");
    let seen = server.await.expect("server");

    assert_eq!(seen[0].method, "PATCH");
    assert!(seen[0].target.contains("id=eq.ev-1"), "{}", seen[0].target);
    assert_eq!(seen[0].json(), json!({ "completed": true }));

    assert_eq!(seen[1].method, "PATCH");
    assert_eq!(seen[1].json(), json!({ "start_time": "2026-04-02T15:15:00Z" }));

    assert_eq!(seen[2].method, "DELETE");
    assert!(seen[2].target.contains("id=eq.ev-1"), "{}", seen[2].target);
    assert_eq!(seen[2].header("authorization"), Some("Bearer tok-1"));
}

#[tokio::test]
async fn rejected_requests_map_to_typed_errors() {
    let (store, server) = backend(vec![
        (401, r#"{"message":"JWT expired"}"#.to_string()),
        (500, r#"{"message":"boom"}"#.to_string()),
        (400, r#"{"message":"bad id"}"#.to_string()),
    ])
    .await;

    assert!(matches!(
        store.set_completed(&owner(), "ev-1", true).await,
        Err(TrackerError::Auth(_))
    ));
    match store.fetch(&owner()).await {
        Err(TrackerError::Load(reason)) => assert!(reason.contains("500"), "{reason}"),
        other => panic!("expected load error, got {other:?}"),
    }
    match store.delete(&owner(), "ev-1").await {
        Err(TrackerError::Persistence(reason)) => assert!(reason.contains("bad id"), "{reason}"),
        other => panic!("expected persistence error, got {other:?}"),
    }
    server.await.expect("server");
}

/// Always signed in as the same remote user.
struct SignedIn {
    tx: watch::Sender<Option<Identity>>,
}

#[async_trait]
impl IdentityProvider for SignedIn {
    async fn current_identity(&self) -> Option<Identity> {
        self.tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.tx.subscribe()
    }

    async fn sign_in(&self, _request: SignIn) -> TrackerResult<Identity> {
        Err(TrackerError::Auth("not supported".to_string()))
    }

    async fn sign_out(&self) -> TrackerResult<()> {
        Err(TrackerError::Auth("not supported".to_string()))
    }
}

#[tokio::test]
async fn rejected_toggle_leaves_the_collection_unchanged() {
    let rows = json!([row("ev-1", "Vet visit", "Personal", false)]);
    let (store, server) = backend(vec![
        (200, rows.to_string()),
        (400, r#"{"message":"row is locked"}"#.to_string()),
    ])
    .await;
    let (tx, _rx) = watch::channel(Some(owner()));
    let collection = Collection::new(Arc::new(store), Arc::new(SignedIn { tx }));

    assert_eq!(collection.load().await, LoadOutcome::Loaded { count: 1 });
    let revision = collection.revision();

    match collection.toggle("ev-1").await {
        Err(TrackerError::Persistence(reason)) => assert!(reason.contains("row is locked"), "{reason}"),
        other => panic!("expected persistence error, got {other:?}"),
    }
    assert!(!collection.get("ev-1").expect("cached").completed);
    assert_eq!(collection.revision(), revision);

    let seen = server.await.expect("server");
    assert_eq!(seen[1].method, "PATCH");
}
