//! Client configuration.

/// Connection settings for the journal-generation backend.
///
/// All fields have sensible defaults suitable for local development.
/// Construct directly, or load overrides from environment variables
/// via [`ClientConfig::from_env`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// HTTP base URL (default: `http://localhost:8000`).
    pub api_url: String,
    /// WebSocket base URL (default: `ws://localhost:8000`).
    pub ws_url: String,
    /// Snapshot poll interval in seconds while the push connection is
    /// down (default: `2`).
    pub poll_interval_secs: u64,
    /// How long to wait for a terminal event after a cancellation
    /// request is accepted (default: `10`).
    pub cancel_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".into(),
            ws_url: "ws://localhost:8000".into(),
            poll_interval_secs: 2,
            cancel_timeout_secs: 10,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default                 |
    /// |-----------------------------|-------------------------|
    /// | `JOURN_API_URL`             | `http://localhost:8000` |
    /// | `JOURN_WS_URL`              | `ws://localhost:8000`   |
    /// | `JOURN_POLL_INTERVAL_SECS`  | `2`                     |
    /// | `JOURN_CANCEL_TIMEOUT_SECS` | `10`                    |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let api_url = std::env::var("JOURN_API_URL").unwrap_or(defaults.api_url);
        let ws_url = std::env::var("JOURN_WS_URL").unwrap_or(defaults.ws_url);

        let poll_interval_secs: u64 = std::env::var("JOURN_POLL_INTERVAL_SECS")
            .unwrap_or_else(|_| defaults.poll_interval_secs.to_string())
            .parse()
            .expect("JOURN_POLL_INTERVAL_SECS must be a valid u64");

        let cancel_timeout_secs: u64 = std::env::var("JOURN_CANCEL_TIMEOUT_SECS")
            .unwrap_or_else(|_| defaults.cancel_timeout_secs.to_string())
            .parse()
            .expect("JOURN_CANCEL_TIMEOUT_SECS must be a valid u64");

        Self {
            api_url,
            ws_url,
            poll_interval_secs,
            cancel_timeout_secs,
        }
    }
}
