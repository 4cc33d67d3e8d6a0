//! Webhook ingestion and fan-out relay.
//!
//! Registered webhooks are served on the public listener. Each inbound call
//! is forwarded concurrently to the webhook's targets; one target's response
//! is mirrored back to the caller, failures (and opted-in successes) are
//! captured for audit and can be replayed by an operator.

pub mod admin;
pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod forward;
pub mod http_server;
pub mod registry;
pub mod replay;
pub mod store;
pub mod types;
pub mod validation;

use std::sync::Arc;

pub use error::{RelayError, Result};
pub use forward::{ForwardedResponse, Forwarder};
pub use registry::{Registration, Registry};
pub use replay::Replayer;
pub use store::{ConfigStorage, JsonStore, RequestsStorage};
pub use types::{ForwardUrl, Replay, Request, RouteKey, Webhook};

/// Shared state handed to the public and admin routers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub config: Arc<dyn ConfigStorage>,
    pub requests: Arc<dyn RequestsStorage>,
    pub forwarder: Forwarder,
    /// Inbound webhook bodies above this size are answered with 413.
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(
        config: Arc<dyn ConfigStorage>,
        requests: Arc<dyn RequestsStorage>,
        forwarder: Forwarder,
    ) -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            config,
            requests,
            forwarder,
            max_body_bytes: dispatch::DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    /// One store backing both contracts.
    pub fn with_store<S>(store: Arc<S>, forwarder: Forwarder) -> Self
    where
        S: ConfigStorage + RequestsStorage + 'static,
    {
        Self::new(store.clone(), store, forwarder)
    }

    pub fn replayer(&self) -> Replayer {
        Replayer::new(
            self.config.clone(),
            self.requests.clone(),
            self.forwarder.clone(),
        )
    }

    /// Register every enabled stored webhook. Invalid ones are logged and
    /// skipped. Returns how many were registered.
    pub async fn register_stored_webhooks(&self) -> Result<usize> {
        let mut registered = 0;
        for webhook in self.config.get_valid_webhooks().await? {
            let id = webhook.id.clone();
            match self.registry.register(webhook) {
                Ok(_) => registered += 1,
                Err(e) => tracing::error!(webhook_id = %id, error = %e, "skipping stored webhook"),
            }
        }
        Ok(registered)
    }
}
