//! HTTP server for deferql.
//!
//! Serves persisted operations over HTTP/1.1. Responses that defer fields
//! are streamed as `multipart/mixed`, one part per round.
//!
//! # Example
//!
//! ```ignore
//! use deferql_server::{DeferServer, ServerConfig};
//!
//! let server = DeferServer::builder()
//!     .config(ServerConfig::new().port(4000))
//!     .operation("Profile", plan)
//!     .resolver_async("Query", "user", |_parent, _args, _ctx, _info| async move {
//!         Ok(serde_json::json!({"name": "Alice"}))
//!     })
//!     .build();
//!
//! server.listen().await?;
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod server;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use http::{create_response, handle_graphql_request, serve, ChunkStream, MULTIPART_CONTENT_TYPE};
pub use server::{DeferServer, ServerBuilder};
