use crate::config::BrokerSettings;
use std::time::Duration;

/// Smallest keepalive the client library accepts.
const MIN_KEEPALIVE_SECS: u64 = 5;

/// Connection options for one gateway instance.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub keepalive: Duration,
    pub credentials: Option<(String, String)>,
    /// Topics (re-)subscribed on every successful connect
    pub subscriptions: Vec<String>,
    pub connect_timeout: Duration,
}

impl GatewayConfig {
    pub fn new(
        broker: &BrokerSettings,
        client_id: impl Into<String>,
        subscriptions: Vec<String>,
    ) -> Self {
        GatewayConfig {
            client_id: client_id.into(),
            host: broker.host.clone(),
            port: broker.port,
            keepalive: Duration::from_secs(broker.keepalive.max(MIN_KEEPALIVE_SECS)),
            credentials: broker
                .credentials()
                .map(|(user, pw)| (user.to_string(), pw.to_string())),
            subscriptions,
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}
