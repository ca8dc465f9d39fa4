//! Client configuration: API server and key, passed explicitly to every
//! component. There is no process-wide mutable header state.

use crate::error::{PersoError, PersoResult};

/// Environment variable consulted when no API key is given explicitly.
pub const API_KEY_ENV: &str = "EST_LIVE_API_KEY";

/// Default public API server.
pub const DEFAULT_API_SERVER: &str = "https://live-api.perso.ai";

/// Connection settings shared by all client components.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL without trailing slash (e.g. https://live-api.perso.ai).
    pub api_server: String,
    /// Value for the `PersoLive-APIKey` header.
    pub api_key: String,
}

impl ClientConfig {
    /// Create with explicit server and key. The server URL is normalized by
    /// stripping any trailing slash.
    pub fn new(api_server: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_server: api_server.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    /// Build from an optional explicit key, falling back to `EST_LIVE_API_KEY`.
    pub fn from_env(api_server: impl Into<String>, api_key: Option<String>) -> PersoResult<Self> {
        let key = match api_key {
            Some(k) if !k.trim().is_empty() => k,
            _ => std::env::var(API_KEY_ENV).map_err(|_| {
                PersoError::Transport(format!(
                    "API key is required: pass one explicitly or set {}",
                    API_KEY_ENV
                ))
            })?,
        };
        Ok(Self::new(api_server, key))
    }

    /// Join a path onto the server base URL.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_server, path)
    }
}
