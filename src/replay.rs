use std::sync::Arc;

use crate::error::{RelayError, Result};
use crate::forward::{restore_headers, ForwardedResponse, Forwarder, Outbound};
use crate::store::{ConfigStorage, RequestsStorage};
use crate::types::Replay;

/// Re-executes a captured request against one target of its webhook.
///
/// Never fans out and never captures: the outcome goes back to the operator.
#[derive(Clone)]
pub struct Replayer {
    config: Arc<dyn ConfigStorage>,
    requests: Arc<dyn RequestsStorage>,
    forwarder: Forwarder,
}

impl Replayer {
    pub fn new(
        config: Arc<dyn ConfigStorage>,
        requests: Arc<dyn RequestsStorage>,
        forwarder: Forwarder,
    ) -> Self {
        Self {
            config,
            requests,
            forwarder,
        }
    }

    pub async fn replay(&self, replay: &Replay) -> Result<ForwardedResponse> {
        let original = self
            .requests
            .get_request(&replay.request_id)
            .await?
            .ok_or_else(|| RelayError::not_found(format!("request {}", replay.request_id)))?;
        let webhook = self
            .config
            .get_webhook(&replay.webhook_id)
            .await?
            .ok_or_else(|| RelayError::not_found(format!("webhook {}", replay.webhook_id)))?;
        let furl = webhook.forward_url(&replay.forward_url_id).ok_or_else(|| {
            RelayError::not_found(format!(
                "forward url {} on webhook {}",
                replay.forward_url_id, webhook.id
            ))
        })?;

        let headers = restore_headers(&original.headers);
        let response = self
            .forwarder
            .forward(Outbound {
                method: &original.method,
                url: &furl.url,
                headers: &headers,
                body: original.body.clone(),
                timeout: furl.timeout,
            })
            .await?;

        tracing::info!(
            request_id = %original.id,
            webhook_id = %webhook.id,
            target_id = %furl.id,
            status = %response.status,
            "request replayed"
        );

        if replay.delete_on_success && response.status.is_success() {
            self.requests.delete_request(&original.id).await?;
            tracing::info!(request_id = %original.id, "replayed request deleted");
        }

        Ok(response)
    }
}
