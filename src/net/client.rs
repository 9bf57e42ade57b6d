//! Shared HTTP client construction.
//!
//! Both clients in this crate read long-lived streaming bodies, so there is
//! no whole-exchange timeout. Only connection setup is bounded by default;
//! an idle read guard can be switched on per client.

use std::time::Duration;

use reqwest::Client;

use crate::config::{ClientConfig, UpstreamConfig};

/// User agent sent on every request.
pub const USER_AGENT: &str = concat!("chatrelay/", env!("CARGO_PKG_VERSION"));

/// Default connection timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// `reqwest::Client` configured for streaming.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
}

impl HttpClient {
    /// Connect timeout only, no read timeout.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    /// Client for calls to the Gemini API.
    pub fn for_upstream(config: &UpstreamConfig) -> Self {
        Self::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .read_timeout(config.read_timeout_secs.map(Duration::from_secs))
            .build()
    }

    /// Client the chat front-end uses to reach the relay.
    pub fn for_relay(config: &ClientConfig) -> Self {
        Self::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .read_timeout(config.read_timeout_secs.map(Duration::from_secs))
            .build()
    }

    pub fn inner(&self) -> &Client {
        &self.inner
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`HttpClient`].
#[derive(Debug, Clone)]
pub struct HttpClientBuilder {
    connect_timeout: Duration,
    read_timeout: Option<Duration>,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            read_timeout: None,
        }
    }
}

impl HttpClientBuilder {
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Fail a response whose body stays silent for longer than `timeout`.
    /// The timer restarts on every read, so a slow but steady stream is
    /// never cut off. `None` disables it.
    pub fn read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn build(self) -> HttpClient {
        let mut builder = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(self.connect_timeout);
        if let Some(timeout) = self.read_timeout {
            builder = builder.read_timeout(timeout);
        }

        let inner = match builder.build() {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to build HTTP client, falling back to reqwest defaults");
                Client::default()
            }
        };
        HttpClient { inner }
    }
}
