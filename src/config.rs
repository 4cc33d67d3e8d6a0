use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Parser;

use crate::dispatch::DEFAULT_MAX_BODY_BYTES;
use crate::store::DEFAULT_MAX_REQUESTS;

/// Process configuration. Every flag can also be set through the environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "nexus-webhook-relay", about = "Webhook ingestion and fan-out relay")]
pub struct Config {
    /// Address of the public listener serving registered webhooks.
    #[arg(long, env = "RELAY_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Address of the admin listener. When equal to `--listen` the admin
    /// routes are served on the public listener.
    #[arg(long, env = "RELAY_ADMIN_LISTEN", default_value = "0.0.0.0:8081")]
    pub admin_listen: SocketAddr,

    /// Path prefix for the admin routes.
    #[arg(long, env = "RELAY_ADMIN_PATH", default_value = "/__admin__")]
    pub admin_path: String,

    #[arg(long, env = "RELAY_ADMIN_USERNAME", default_value = "admin")]
    pub username: String,

    #[arg(long, env = "RELAY_ADMIN_PASSWORD", default_value = "admin", hide_env_values = true)]
    pub password: String,

    /// Directory for webhooks.json and requests.json. In-memory only if unset.
    #[arg(long, env = "RELAY_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Captured requests kept before the oldest are evicted.
    #[arg(long, env = "RELAY_MAX_REQUESTS", default_value_t = DEFAULT_MAX_REQUESTS)]
    pub max_requests: usize,

    /// Largest inbound webhook body accepted, in bytes.
    #[arg(long, env = "RELAY_MAX_BODY_BYTES", default_value_t = DEFAULT_MAX_BODY_BYTES)]
    pub max_body_bytes: usize,
}

impl Config {
    pub fn shared_listener(&self) -> bool {
        self.listen == self.admin_listen
    }

    /// The admin prefix with a leading slash and no trailing one.
    pub fn admin_prefix(&self) -> Result<String> {
        let trimmed = self.admin_path.trim().trim_matches('/');
        if trimmed.is_empty() {
            return Err(anyhow!("admin path cannot be the root path"));
        }
        Ok(format!("/{trimmed}"))
    }
}
