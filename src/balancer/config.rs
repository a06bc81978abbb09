//! Load balancer configuration

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{duration_millis, load_or_create};
use crate::error::Result;

use super::cache::RefreshFailurePolicy;

/// Load balancer configuration options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BalancerConfig {
    /// Key relay nodes must present to register and report room changes
    pub auth_key: String,

    pub bind_address: IpAddr,

    pub endpoint_port: u16,

    /// Time between health ticks
    #[serde(with = "duration_millis")]
    pub health_check_interval: Duration,

    /// Bound on every stats probe and room list fetch
    #[serde(with = "duration_millis")]
    pub probe_timeout: Duration,

    /// Length of ids handed out by `/api/get/id`
    pub room_id_length: usize,

    pub refresh_failure_policy: RefreshFailurePolicy,

    /// Delay before rerunning an aborted refresh
    #[serde(with = "duration_millis")]
    pub refresh_retry_delay: Duration,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            auth_key: "AuthKey".to_string(),
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            endpoint_port: 7070,
            health_check_interval: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
            room_id_length: 5,
            refresh_failure_policy: RefreshFailurePolicy::SkipNode,
            refresh_retry_delay: Duration::from_secs(1),
        }
    }
}

impl BalancerConfig {
    /// Load from a JSON file, writing defaults there if it is missing
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self> {
        load_or_create(path.as_ref())
    }

    pub fn auth_key(mut self, key: impl Into<String>) -> Self {
        self.auth_key = key.into();
        self
    }

    pub fn bind(mut self, address: IpAddr, port: u16) -> Self {
        self.bind_address = address;
        self.endpoint_port = port;
        self
    }

    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Restore the abort-and-retry refresh behavior
    pub fn abort_refresh_on_failure(mut self, retry_delay: Duration) -> Self {
        self.refresh_failure_policy = RefreshFailurePolicy::AbortPass;
        self.refresh_retry_delay = retry_delay;
        self
    }

    pub fn endpoint_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.endpoint_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BalancerConfig::default();

        assert_eq!(config.endpoint_addr().port(), 7070);
        assert_eq!(config.health_check_interval, Duration::from_secs(10));
        assert_eq!(config.refresh_failure_policy, RefreshFailurePolicy::SkipNode);
    }

    #[test]
    fn test_policy_from_json() {
        let config: BalancerConfig = serde_json::from_str(
            r#"{"refreshFailurePolicy": "AbortPass", "healthCheckInterval": 2500}"#,
        )
        .unwrap();

        assert_eq!(config.refresh_failure_policy, RefreshFailurePolicy::AbortPass);
        assert_eq!(config.health_check_interval, Duration::from_millis(2500));
        assert_eq!(config.probe_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_builder() {
        let config = BalancerConfig::default()
            .auth_key("k")
            .bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
            .abort_refresh_on_failure(Duration::from_millis(50));

        assert_eq!(config.auth_key, "k");
        assert_eq!(config.refresh_retry_delay, Duration::from_millis(50));
        assert_eq!(config.endpoint_addr().port(), 0);
    }
}
