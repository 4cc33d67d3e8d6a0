use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Captured header values, keyed by lowercase header name.
pub type Headers = BTreeMap<String, Vec<String>>;

/// A routing rule: `method` + `path` fan out to `forward_urls`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Webhook {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub forward_urls: Vec<ForwardUrl>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl Webhook {
    pub fn route_key(&self) -> RouteKey {
        RouteKey::new(&self.method, &self.path)
    }

    /// The single target whose response is mirrored back to the caller.
    pub fn response_target(&self) -> Option<&ForwardUrl> {
        self.forward_urls.iter().find(|f| f.return_as_response)
    }

    pub fn forward_url(&self, id: &str) -> Option<&ForwardUrl> {
        self.forward_urls.iter().find(|f| f.id == id)
    }

    /// Uppercase the method and give every target without an id a fresh one.
    pub fn normalize(&mut self) {
        self.method = self.method.trim().to_ascii_uppercase();
        for furl in &mut self.forward_urls {
            if furl.id.is_empty() {
                furl.id = generate_id("f");
            }
        }
    }
}

/// One downstream target of a webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardUrl {
    #[serde(default)]
    pub id: String,
    pub url: String,
    #[serde(rename = "timeoutMs", with = "duration_ms")]
    pub timeout: Duration,
    #[serde(default)]
    pub return_as_response: bool,
    #[serde(default)]
    pub wait_till_completion: bool,
    #[serde(default)]
    pub keep_successful_requests: bool,
}

impl ForwardUrl {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            id: String::new(),
            url: url.into(),
            timeout,
            return_as_response: false,
            wait_till_completion: false,
            keep_successful_requests: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn returning_response(mut self) -> Self {
        self.return_as_response = true;
        self
    }

    pub fn waiting(mut self) -> Self {
        self.wait_till_completion = true;
        self
    }

    pub fn keeping_successes(mut self) -> Self {
        self.keep_successful_requests = true;
        self
    }
}

/// The outcome of one inbound call against one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub id: String,
    pub call_id: String,
    pub method: String,
    pub path: String,
    pub headers: Headers,
    #[serde(with = "body_base64")]
    pub body: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward_url: Option<ForwardUrl>,
    pub from_webhook_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Request {
    /// Everything needed to retry this capture against its target.
    /// Captures without a target (capture-only webhooks) have none.
    pub fn replay_payload(&self) -> Option<Replay> {
        let furl = self.forward_url.as_ref()?;
        Some(Replay {
            request_id: self.id.clone(),
            webhook_id: self.from_webhook_id.clone(),
            forward_url_id: furl.id.clone(),
            delete_on_success: true,
        })
    }
}

/// A request as returned to operators, with its derived replay payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestView {
    #[serde(flatten)]
    pub request: Request,
    pub replay_payload: Option<Replay>,
}

impl From<Request> for RequestView {
    fn from(request: Request) -> Self {
        let replay_payload = request.replay_payload();
        Self {
            request,
            replay_payload,
        }
    }
}

/// Instruction to re-execute a captured request against one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Replay {
    pub request_id: String,
    pub webhook_id: String,
    pub forward_url_id: String,
    #[serde(default)]
    pub delete_on_success: bool,
}

/// `"<METHOD> <path>"`, the key a webhook is routed and cached under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteKey(String);

impl RouteKey {
    pub fn new(method: &str, path: &str) -> Self {
        Self(format!("{} {}", method.trim().to_ascii_uppercase(), path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn generate_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod body_base64 {
    use base64::Engine as _;
    use bytes::Bytes;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(D::Error::custom)
    }
}
