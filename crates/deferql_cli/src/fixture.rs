//! Replay fixtures.
//!
//! A fixture bundles persisted operations with the data they run against:
//!
//! ```json
//! {
//!   "operations": { "Profile": { "root": { "kind": "field", ... } } },
//!   "root": { "user": { "name": "Alice" } },
//!   "variables": { "withBio": true },
//!   "latency": { "User.bio": 50 }
//! }
//! ```
//!
//! `latency` slows selected fields down so that deadlines can be observed
//! without a real backend.

use deferql_runtime::QueryPlan;
use deferql_server::{DeferServer, ServerConfig};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Fixture {
    /// Operations by name, in file order.
    pub operations: IndexMap<String, QueryPlan>,
    /// Value root fields are read from.
    pub root: Option<Value>,
    pub variables: HashMap<String, Value>,
    /// Artificial resolver latency in milliseconds, keyed by `Type.field`.
    pub latency: IndexMap<String, u64>,
}

impl Fixture {
    pub fn load(path: &Path) -> Result<Self, Box<dyn Error>> {
        let source = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&source)?)
    }

    pub fn from_json(source: &str) -> serde_json::Result<Self> {
        serde_json::from_str(source)
    }

    /// The operation used when none is named: the first one in the file.
    pub fn default_operation(&self) -> Option<&str> {
        self.operations.keys().next().map(String::as_str)
    }

    /// Builds a server for the fixture's operations.
    pub fn server(&self, config: ServerConfig) -> Result<DeferServer, Box<dyn Error>> {
        let mut builder = DeferServer::builder().config(config);

        for (coordinate, &millis) in &self.latency {
            let (type_name, field_name) = coordinate
                .split_once('.')
                .ok_or_else(|| format!("latency key `{}` must be `Type.field`", coordinate))?;
            builder = builder.resolver_async(
                type_name,
                field_name,
                move |parent, _args, _ctx, info| async move {
                    tokio::time::sleep(Duration::from_millis(millis)).await;
                    Ok(parent.get(&info.field_name).cloned().unwrap_or(Value::Null))
                },
            );
        }

        for (name, plan) in &self.operations {
            builder = builder.operation(name.clone(), plan.clone());
        }
        if let Some(root) = &self.root {
            builder = builder.root_value(root.clone());
        }
        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{
        "operations": {
            "Profile": {
                "root": {
                    "kind": "field",
                    "info": {"name": "user", "parentType": "Query", "type": "User"},
                    "children": {
                        "kind": "leaf",
                        "field": {"name": "name", "parentType": "User", "type": "String"}
                    }
                }
            },
            "Other": {
                "root": {
                    "kind": "leaf",
                    "field": {"name": "version", "parentType": "Query", "type": "String"}
                }
            }
        },
        "root": {"user": {"name": "Alice"}, "version": "1"},
        "latency": {"User.name": 1}
    }"#;

    #[test]
    fn test_from_json() {
        let fixture = Fixture::from_json(FIXTURE).unwrap();
        assert_eq!(fixture.default_operation(), Some("Profile"));
        assert_eq!(fixture.latency.get("User.name"), Some(&1));
        assert!(fixture.variables.is_empty());
    }

    #[test]
    fn test_bad_latency_key() {
        let mut fixture = Fixture::from_json(FIXTURE).unwrap();
        fixture.latency.insert("nodot".to_string(), 5);
        let err = fixture.server(ServerConfig::default()).unwrap_err();
        assert!(err.to_string().contains("nodot"));
    }

    #[tokio::test]
    async fn test_server_reads_root() {
        let fixture = Fixture::from_json(FIXTURE).unwrap();
        let server = fixture.server(ServerConfig::default()).unwrap();

        let mut names: Vec<&str> = server.operation_names().collect();
        names.sort_unstable();
        assert_eq!(names, vec!["Other", "Profile"]);

        let outcome = server.execute(Some("Profile"), HashMap::new()).await.unwrap();
        let deferql_runtime::ExecutionOutcome::Complete(response) = outcome else {
            panic!("nothing is deferred");
        };
        assert_eq!(response.data, Some(serde_json::json!({"user": {"name": "Alice"}})));
    }
}
