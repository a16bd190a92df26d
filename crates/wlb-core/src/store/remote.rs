use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::ItemStore;
use crate::error::{TrackerError, TrackerResult};
use crate::identity::Identity;
use crate::item::{Category, Item, NewItem, Title};

const EVENTS_TABLE: &str = "events";
const EVENT_COLUMNS: &str = "id,user_id,title,start_time,created_at,calendar_id,completed,type";

/// Endpoint and public API key of the managed backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub url: String,
    pub anon_key: String,
}

impl RemoteConfig {
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> TrackerResult<Self> {
        let url = url.into().trim().trim_end_matches('/').to_string();
        let anon_key = anon_key.into().trim().to_string();
        if url.is_empty() {
            return Err(TrackerError::Config("remote.url is not set".to_string()));
        }
        if anon_key.is_empty() {
            return Err(TrackerError::Config("remote.anon_key is not set".to_string()));
        }
        Ok(Self { url, anon_key })
    }

    pub fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.url)
    }

    pub fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{path}", self.url)
    }

    pub(crate) fn http_client() -> TrackerResult<Client> {
        Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| TrackerError::Config(format!("failed building HTTP client: {err}")))
    }
}

/// Row shape of the remote `events` table.
#[derive(Debug, Clone, Deserialize)]
struct EventRow {
    id: String,
    user_id: String,
    title: String,
    start_time: DateTime<Utc>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    completed: bool,
    #[serde(rename = "type")]
    kind: String,
}

impl EventRow {
    fn into_item(self) -> TrackerResult<Item> {
        Ok(Item {
            title: Title::parse(&self.title)?,
            category: self.kind.parse::<Category>()?,
            id: self.id,
            owner_id: Some(self.user_id),
            due_at: self.start_time,
            completed: self.completed,
            created_at: self.created_at,
        })
    }

    /// The row the backend confirmed for an insert. Columns it echoed back
    /// in a shape this client cannot read fall back to what was sent, since
    /// the row exists either way.
    fn into_confirmed(self, sent: NewItem) -> Item {
        match self.clone().into_item() {
            Ok(item) => item,
            Err(err) => {
                warn!(
                    id = %self.id,
                    kind = %self.kind,
                    error = %err,
                    "backend echoed an unreadable row for a confirmed insert; keeping submitted fields"
                );
                Item {
                    id: self.id,
                    owner_id: Some(self.user_id),
                    title: sent.title,
                    category: sent.category,
                    due_at: self.start_time,
                    completed: self.completed,
                    created_at: self.created_at,
                }
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct InsertRow<'a> {
    user_id: &'a str,
    title: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    start_time: DateTime<Utc>,
    completed: bool,
}

/// PostgREST-style store. Row ownership is enforced by the backend; every
/// request carries the owner's bearer token.
#[derive(Debug, Clone)]
pub struct RemoteStore {
    client: Client,
    config: RemoteConfig,
}

impl RemoteStore {
    pub fn new(config: RemoteConfig) -> TrackerResult<Self> {
        Ok(Self::with_client(config, RemoteConfig::http_client()?))
    }

    /// Uses a caller-built client, e.g. one with its own proxy or TLS setup.
    pub fn with_client(config: RemoteConfig, client: Client) -> Self {
        info!(url = %config.url, "using remote item store");
        Self { client, config }
    }

    fn authorized(&self, request: RequestBuilder, owner: &Identity) -> RequestBuilder {
        let token = owner
            .access_token
            .as_deref()
            .unwrap_or(self.config.anon_key.as_str());
        request
            .header("apikey", &self.config.anon_key)
            .bearer_auth(token)
    }

    fn by_id(&self, request: RequestBuilder, id: &str) -> RequestBuilder {
        request.query(&[("id", format!("eq.{id}"))])
    }

    async fn patch(&self, owner: &Identity, id: &str, body: serde_json::Value) -> TrackerResult<()> {
        let request = self.client.patch(self.config.rest_url(EVENTS_TABLE));
        let response = self
            .authorized(self.by_id(request, id), owner)
            .json(&body)
            .send()
            .await
            .map_err(TrackerError::persistence)?;
        ensure_success(response, TrackerError::Persistence).await?;
        Ok(())
    }
}

/// Maps a non-2xx response into `wrap`, keeping the status and body text.
async fn ensure_success(response: Response, wrap: fn(String) -> TrackerError) -> TrackerResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    warn!(status = %status, body = %body, "remote store rejected request");
    if status == StatusCode::UNAUTHORIZED {
        return Err(TrackerError::Auth(format!("session rejected by backend ({status})")));
    }
    Err(wrap(format!("{status}: {}", body.trim())))
}

#[async_trait]
impl ItemStore for RemoteStore {
    #[tracing::instrument(skip(self, owner), fields(owner = %owner.user_id))]
    async fn fetch(&self, owner: &Identity) -> TrackerResult<Vec<Item>> {
        let request = self
            .client
            .get(self.config.rest_url(EVENTS_TABLE))
            .query(&[
                ("select", EVENT_COLUMNS.to_string()),
                ("user_id", format!("eq.{}", owner.user_id)),
                ("order", "start_time.asc".to_string()),
            ]);
        let response = self
            .authorized(request, owner)
            .send()
            .await
            .map_err(TrackerError::load)?;
        let rows: Vec<EventRow> = ensure_success(response, TrackerError::Load)
            .await?
            .json()
            .await
            .map_err(TrackerError::load)?;

        let total = rows.len();
        let items: Vec<Item> = rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id.clone();
                match row.into_item() {
                    Ok(item) => Some(item),
                    Err(err) => {
                        warn!(id = %id, error = %err, "skipping remote row that fails validation");
                        None
                    }
                }
            })
            .collect();
        debug!(total, kept = items.len(), "fetched remote events");
        Ok(items)
    }

    #[tracing::instrument(skip(self, owner, item), fields(owner = %owner.user_id))]
    async fn insert(&self, owner: &Identity, item: NewItem) -> TrackerResult<Item> {
        let request = self
            .client
            .post(self.config.rest_url(EVENTS_TABLE))
            .query(&[("select", EVENT_COLUMNS)])
            .header("Prefer", "return=representation")
            .header("Accept", "application/vnd.pgrst.object+json")
            .json(&InsertRow {
                user_id: &owner.user_id,
                title: item.title.as_str(),
                kind: item.category.remote_name(),
                start_time: item.due_at,
                completed: false,
            });
        let response = self
            .authorized(request, owner)
            .send()
            .await
            .map_err(TrackerError::persistence)?;
        let inserted: EventRow = ensure_success(response, TrackerError::Persistence)
            .await?
            .json()
            .await
            .map_err(TrackerError::persistence)?;
        Ok(inserted.into_confirmed(item))
    }

    #[tracing::instrument(skip(self, owner))]
    async fn set_completed(&self, owner: &Identity, id: &str, completed: bool) -> TrackerResult<()> {
        self.patch(owner, id, serde_json::json!({ "completed": completed }))
            .await
    }

    #[tracing::instrument(skip(self, owner))]
    async fn set_due(&self, owner: &Identity, id: &str, due_at: DateTime<Utc>) -> TrackerResult<()> {
        self.patch(owner, id, serde_json::json!({ "start_time": due_at }))
            .await
    }

    #[tracing::instrument(skip(self, owner))]
    async fn delete(&self, owner: &Identity, id: &str) -> TrackerResult<()> {
        let request = self.client.delete(self.config.rest_url(EVENTS_TABLE));
        let response = self
            .authorized(self.by_id(request, id), owner)
            .send()
            .await
            .map_err(TrackerError::persistence)?;
        ensure_success(response, TrackerError::Persistence).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}
