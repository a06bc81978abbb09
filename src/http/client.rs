//! Outbound HTTP calls
//!
//! Every request is bounded by the agent's global timeout, so a dead peer
//! costs at most one timeout per call.

use std::time::Duration;

use thiserror::Error;

/// Why an outbound request failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpFailure {
    /// Peer answered with a non-2xx status
    #[error("status {0}")]
    Status(u16),
    /// Connection refused, DNS failure, timeout, unreadable body
    #[error("{0}")]
    Transport(String),
}

/// Cheaply cloneable HTTP client with a fixed timeout
#[derive(Clone)]
pub struct HttpClient {
    agent: ureq::Agent,
    timeout: Duration,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self { agent, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// GET `url` with the given headers and return the body as text
    pub async fn get_text(
        &self,
        url: String,
        headers: Vec<(&'static str, String)>,
    ) -> Result<String, HttpFailure> {
        let agent = self.agent.clone();

        let result = tokio::task::spawn_blocking(move || {
            let mut request = agent.get(&url);
            for (name, value) in &headers {
                request = request.set(name, value);
            }

            match request.call() {
                Ok(response) => response
                    .into_string()
                    .map_err(|e| HttpFailure::Transport(e.to_string())),
                Err(ureq::Error::Status(code, _)) => Err(HttpFailure::Status(code)),
                Err(e) => Err(HttpFailure::Transport(e.to_string())),
            }
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(e) => Err(HttpFailure::Transport(format!("request task failed: {}", e))),
        }
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("timeout", &self.timeout)
            .finish()
    }
}
