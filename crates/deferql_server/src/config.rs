//! Server configuration.

use deferql_runtime::DeferConfig;
use serde::{Deserialize, Serialize};

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Path of the GraphQL endpoint.
    pub endpoint: String,
    /// Deferral budgets applied to every request.
    pub defer: DeferConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerConfig {
    /// Creates a new config with default values.
    pub fn new() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 4000,
            endpoint: "/graphql".to_string(),
            defer: DeferConfig::default(),
        }
    }

    /// Sets the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the endpoint path.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the deferral budgets.
    pub fn defer(mut self, defer: DeferConfig) -> Self {
        self.defer = defer;
        self
    }

    /// The `host:port` pair to listen on.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = ServerConfig::new()
            .host("127.0.0.1")
            .port(8080)
            .defer(DeferConfig::new().with_max_nested_rounds(3));

        assert_eq!(config.address(), "127.0.0.1:8080");
        assert_eq!(config.endpoint, "/graphql");
        assert_eq!(config.defer.max_nested_rounds, 3);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"port": 9000, "defer": {"maxExecutionMs": 500}}"#).unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.host, "localhost");
        assert_eq!(config.defer.max_execution_ms, 500);
        assert_eq!(config.defer.max_nested_rounds, 0);
    }
}
