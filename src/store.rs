use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};

use crate::error::{RelayError, Result};
use crate::types::{generate_id, Request, Webhook};

pub const DEFAULT_MAX_REQUESTS: usize = 10_000;

const WEBHOOKS_FILE: &str = "webhooks.json";
const REQUESTS_FILE: &str = "requests.json";

/// Webhook definitions.
#[async_trait]
pub trait ConfigStorage: Send + Sync {
    /// Every webhook, enabled or not, oldest first.
    async fn list_webhooks(&self) -> Result<Vec<Webhook>>;
    /// Enabled webhooks only, oldest first.
    async fn get_valid_webhooks(&self) -> Result<Vec<Webhook>>;
    async fn get_webhook(&self, id: &str) -> Result<Option<Webhook>>;
    /// Rejects a webhook whose id or route is already taken.
    async fn add_webhook(&self, webhook: Webhook) -> Result<()>;
    async fn remove_webhook(&self, id: &str) -> Result<()>;
    async fn enable_webhook(&self, id: &str) -> Result<()>;
    async fn disable_webhook(&self, id: &str) -> Result<()>;
    /// Replace name, enabled flag and targets. Method and path are fixed.
    async fn update_webhook(&self, webhook: Webhook) -> Result<Webhook>;
}

/// Captured requests.
#[async_trait]
pub trait RequestsStorage: Send + Sync {
    async fn store_request(&self, request: Request) -> Result<()>;
    async fn get_request(&self, id: &str) -> Result<Option<Request>>;
    async fn get_newest_requests(&self, count: usize) -> Result<Vec<Request>>;
    async fn get_oldest_requests(&self, count: usize) -> Result<Vec<Request>>;
    async fn delete_request(&self, id: &str) -> Result<()>;
}

type WebhookMap = HashMap<String, Webhook>;

#[derive(Default)]
struct StoreState {
    webhooks: WebhookMap,
    /// Oldest first.
    requests: VecDeque<Request>,
}

/// In-memory implementation of both storage contracts.
///
/// With a data directory every mutation is mirrored to `webhooks.json` and
/// `requests.json`, and `open` loads them back. Once `max_requests` captures
/// are held the oldest one is evicted.
///
/// A mutation writes the file first and only then changes the in-memory
/// state, so a failed write leaves nothing behind. Mutations are serialized
/// by `writer`; readers only wait for the final in-memory swap, never for
/// file I/O.
pub struct JsonStore {
    state: RwLock<StoreState>,
    writer: Mutex<()>,
    data_dir: Option<PathBuf>,
    max_requests: usize,
}

impl JsonStore {
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            writer: Mutex::new(()),
            data_dir: None,
            max_requests: DEFAULT_MAX_REQUESTS,
        }
    }

    pub async fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .map_err(|e| RelayError::storage(format!("failed to create {}: {e}", data_dir.display())))?;

        let mut state = StoreState::default();
        if let Some(items) = read_json::<Vec<Webhook>>(&data_dir.join(WEBHOOKS_FILE)).await? {
            for wh in items {
                state.webhooks.insert(wh.id.clone(), wh);
            }
        }
        if let Some(items) = read_json::<Vec<Request>>(&data_dir.join(REQUESTS_FILE)).await? {
            state.requests = VecDeque::from(items);
        }
        tracing::info!(
            data_dir = %data_dir.display(),
            webhooks = state.webhooks.len(),
            requests = state.requests.len(),
            "storage loaded"
        );

        Ok(Self {
            state: RwLock::new(state),
            writer: Mutex::new(()),
            data_dir: Some(data_dir),
            max_requests: DEFAULT_MAX_REQUESTS,
        })
    }

    pub fn with_max_requests(mut self, max_requests: usize) -> Self {
        self.max_requests = max_requests.max(1);
        self
    }

    /// Apply `change` to a copy of the webhooks, persist the copy, then swap
    /// it in.
    async fn mutate_webhooks<T, F>(&self, change: F) -> Result<T>
    where
        F: FnOnce(&mut WebhookMap) -> Result<T> + Send,
        T: Send,
    {
        let _writer = self.writer.lock().await;
        let mut webhooks = self.state.read().await.webhooks.clone();
        let outcome = change(&mut webhooks)?;

        if let Some(dir) = &self.data_dir {
            write_json(&dir.join(WEBHOOKS_FILE), &sorted_webhooks(&webhooks)).await?;
        }
        self.state.write().await.webhooks = webhooks;
        Ok(outcome)
    }

    async fn persist_requests(&self, requests: &[&Request]) -> Result<()> {
        match &self.data_dir {
            Some(dir) => write_json(&dir.join(REQUESTS_FILE), requests).await,
            None => Ok(()),
        }
    }
}

fn sorted_webhooks(webhooks: &WebhookMap) -> Vec<&Webhook> {
    let mut items: Vec<&Webhook> = webhooks.values().collect();
    items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    items
}

fn find_mut<'a>(webhooks: &'a mut WebhookMap, id: &str) -> Result<&'a mut Webhook> {
    webhooks
        .get_mut(id)
        .ok_or_else(|| RelayError::not_found(format!("webhook {id}")))
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| RelayError::storage(format!("failed to parse {}: {e}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(RelayError::storage(format!("failed to read {}: {e}", path.display()))),
    }
}

/// Write through a temporary file so a failed write never truncates `path`.
async fn write_json<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)
        .map_err(|e| RelayError::storage(format!("failed to serialize {}: {e}", path.display())))?;
    let staging = path.with_extension("json.tmp");
    tokio::fs::write(&staging, content)
        .await
        .map_err(|e| RelayError::storage(format!("failed to write {}: {e}", staging.display())))?;
    tokio::fs::rename(&staging, path)
        .await
        .map_err(|e| RelayError::storage(format!("failed to replace {}: {e}", path.display())))
}

#[async_trait]
impl ConfigStorage for JsonStore {
    async fn list_webhooks(&self) -> Result<Vec<Webhook>> {
        let st = self.state.read().await;
        Ok(sorted_webhooks(&st.webhooks).into_iter().cloned().collect())
    }

    async fn get_valid_webhooks(&self) -> Result<Vec<Webhook>> {
        let st = self.state.read().await;
        Ok(sorted_webhooks(&st.webhooks)
            .into_iter()
            .filter(|wh| wh.enabled)
            .cloned()
            .collect())
    }

    async fn get_webhook(&self, id: &str) -> Result<Option<Webhook>> {
        Ok(self.state.read().await.webhooks.get(id).cloned())
    }

    async fn add_webhook(&self, webhook: Webhook) -> Result<()> {
        self.mutate_webhooks(move |webhooks| {
            if webhooks.contains_key(&webhook.id) {
                return Err(RelayError::invalid(format!(
                    "webhook {} already exists",
                    webhook.id
                )));
            }
            let key = webhook.route_key();
            if webhooks.values().any(|w| w.route_key() == key) {
                return Err(RelayError::invalid(format!("a webhook already exists for {key}")));
            }
            webhooks.insert(webhook.id.clone(), webhook);
            Ok(())
        })
        .await
    }

    async fn remove_webhook(&self, id: &str) -> Result<()> {
        self.mutate_webhooks(|webhooks| {
            webhooks
                .remove(id)
                .map(|_| ())
                .ok_or_else(|| RelayError::not_found(format!("webhook {id}")))
        })
        .await
    }

    async fn enable_webhook(&self, id: &str) -> Result<()> {
        self.mutate_webhooks(|webhooks| {
            find_mut(webhooks, id)?.enabled = true;
            Ok(())
        })
        .await
    }

    async fn disable_webhook(&self, id: &str) -> Result<()> {
        self.mutate_webhooks(|webhooks| {
            find_mut(webhooks, id)?.enabled = false;
            Ok(())
        })
        .await
    }

    async fn update_webhook(&self, webhook: Webhook) -> Result<Webhook> {
        self.mutate_webhooks(move |webhooks| {
            let existing = find_mut(webhooks, &webhook.id)?;
            if existing.route_key() != webhook.route_key() {
                return Err(RelayError::invalid("webhook method and path cannot be changed"));
            }

            existing.name = webhook.name;
            existing.enabled = webhook.enabled;
            existing.forward_urls = webhook.forward_urls;
            for furl in &mut existing.forward_urls {
                if furl.id.is_empty() {
                    furl.id = generate_id("f");
                }
            }
            Ok(existing.clone())
        })
        .await
    }
}

#[async_trait]
impl RequestsStorage for JsonStore {
    async fn store_request(&self, request: Request) -> Result<()> {
        let _writer = self.writer.lock().await;
        {
            let st = self.state.read().await;
            let evicted = (st.requests.len() + 1).saturating_sub(self.max_requests);
            let kept: Vec<&Request> = st
                .requests
                .iter()
                .skip(evicted)
                .chain(std::iter::once(&request))
                .collect();
            self.persist_requests(&kept).await?;
        }

        let mut st = self.state.write().await;
        while st.requests.len() >= self.max_requests {
            st.requests.pop_front();
        }
        st.requests.push_back(request);
        Ok(())
    }

    async fn get_request(&self, id: &str) -> Result<Option<Request>> {
        let st = self.state.read().await;
        Ok(st.requests.iter().find(|r| r.id == id).cloned())
    }

    async fn get_newest_requests(&self, count: usize) -> Result<Vec<Request>> {
        let st = self.state.read().await;
        Ok(st.requests.iter().rev().take(count).cloned().collect())
    }

    async fn get_oldest_requests(&self, count: usize) -> Result<Vec<Request>> {
        let st = self.state.read().await;
        Ok(st.requests.iter().take(count).cloned().collect())
    }

    async fn delete_request(&self, id: &str) -> Result<()> {
        let _writer = self.writer.lock().await;
        {
            let st = self.state.read().await;
            if !st.requests.iter().any(|r| r.id == id) {
                return Err(RelayError::not_found(format!("request {id}")));
            }
            let kept: Vec<&Request> = st.requests.iter().filter(|r| r.id != id).collect();
            self.persist_requests(&kept).await?;
        }

        self.state.write().await.requests.retain(|r| r.id != id);
        Ok(())
    }
}
