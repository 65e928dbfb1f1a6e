//! # Carelog Sync Server
//!
//! Reference sync server for the Carelog offline-first sync protocol.
//!
//! This crate provides:
//! - Push and pull endpoints (`POST /sync/push`, `GET /sync/pull`)
//! - Per-entity conflict detection
//! - Authentication (HMAC-SHA256 device tokens)
//! - An axum router for serving it over HTTP
//!
//! # Conflict contract
//!
//! The server keeps the latest version of every entity together with the
//! device that wrote it. A pushed change conflicts when the stored version
//! was written by a different device after the pusher's `lastSyncTime`
//! (or at any time, if the pusher has never synced). Conflicting changes
//! are not applied; the response lists them with the server's data, and
//! the client resolves them.
//!
//! # Authentication
//!
//! Authentication is optional:
//!
//! ```rust
//! use carelog_sync_server::{ServerConfig, SyncServer};
//!
//! let config = ServerConfig::default().with_auth(b"my-secure-secret".to_vec());
//! let server = SyncServer::new(config);
//! let token = server.issue_token("device-1").unwrap();
//! assert!(token.is_some());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod handler;
mod http;
mod server;
mod store;

pub use auth::{AuthConfig, TokenValidator};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use http::{router, serve};
pub use server::{ServerRequest, ServerResponse, SyncServer, DEVICE_ID_HEADER};
pub use store::{ChangeBatch, EntityStore, EntityVersion};
