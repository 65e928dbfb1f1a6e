//! Main sync server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use crate::store::EntityStore;
use carelog_sync_protocol::{SyncPayload, Timestamp};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Header carrying the device ID.
pub const DEVICE_ID_HEADER: &str = "x-device-id";

/// A transport-independent HTTP request.
#[derive(Debug, Clone, Default)]
pub struct ServerRequest {
    /// Method name, e.g. `GET`.
    pub method: String,
    /// Path with optional query string.
    pub target: String,
    /// Request headers.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Vec<u8>,
}

impl ServerRequest {
    /// Creates a request without headers or body.
    pub fn new(method: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            target: target.into(),
            ..Self::default()
        }
    }

    /// Adds a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the body.
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Returns the first header with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn path_and_query(&self) -> (&str, Option<&str>) {
        match self.target.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (self.target.as_str(), None),
        }
    }
}

/// A transport-independent HTTP response with a JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerResponse {
    /// Status code.
    pub status: u16,
    /// JSON body.
    pub body: Vec<u8>,
}

impl ServerResponse {
    fn ok(body: Vec<u8>) -> Self {
        Self { status: 200, body }
    }

    fn error(err: &ServerError) -> Self {
        let body = serde_json::json!({ "error": err.to_string() });
        Self {
            status: err.status_code(),
            body: body.to_string().into_bytes(),
        }
    }
}

/// The sync server.
///
/// This server handles `POST /sync/push` and `GET /sync/pull` requests
/// independently of any HTTP library; [`crate::router`] exposes it over
/// HTTP.
///
/// # Example
///
/// ```
/// use carelog_sync_server::{ServerConfig, ServerRequest, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default());
/// let response = server.handle(
///     &ServerRequest::new("GET", "/sync/pull").with_header("X-Device-ID", "device-1"),
/// );
/// assert_eq!(response.status, 200);
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl SyncServer {
    /// Creates a new sync server.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_store(config, Arc::new(EntityStore::new()))
    }

    /// Creates a sync server with an existing store.
    pub fn with_store(config: ServerConfig, store: Arc<EntityStore>) -> Self {
        let context = Arc::new(HandlerContext::new(config, store));
        let handler = RequestHandler::new(Arc::clone(&context));

        Self { handler, context }
    }

    /// Handles a request, mapping errors to their status codes.
    pub fn handle(&self, request: &ServerRequest) -> ServerResponse {
        match self.route(request) {
            Ok(body) => ServerResponse::ok(body),
            Err(err) => {
                if err.is_server_error() {
                    tracing::error!(target_path = %request.target, error = %err, "request failed");
                } else {
                    tracing::warn!(target_path = %request.target, error = %err, "request rejected");
                }
                ServerResponse::error(&err)
            }
        }
    }

    fn route(&self, request: &ServerRequest) -> ServerResult<Vec<u8>> {
        let (path, query) = request.path_and_query();
        let method = request.method.to_ascii_uppercase();

        match (path, method.as_str()) {
            ("/sync/push", "POST") => {
                let device_id = self.authorize(request)?;
                let payload = SyncPayload::decode(&request.body)?;
                let result = self.handler.handle_push(&device_id, payload)?;
                Ok(result.encode()?)
            }
            ("/sync/pull", "GET") => {
                let device_id = self.authorize(request)?;
                let since = parse_since(query)?;
                let payload = self.handler.handle_pull(&device_id, since)?;
                Ok(payload.encode()?)
            }
            ("/sync/push", _) | ("/sync/pull", _) => {
                Err(ServerError::MethodNotAllowed(request.method.clone()))
            }
            _ => Err(ServerError::NotFound(path.to_string())),
        }
    }

    fn authorize(&self, request: &ServerRequest) -> ServerResult<String> {
        let device_id = request
            .header(DEVICE_ID_HEADER)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(ServerError::MissingDeviceId)?;
        self.handler
            .authenticate(device_id, request.header("authorization"))?;
        Ok(device_id.to_string())
    }

    /// Issues a token for a device, if authentication is enabled.
    pub fn issue_token(&self, device_id: &str) -> ServerResult<Option<String>> {
        self.context
            .validator()
            .map(|validator| validator.create_token(device_id))
            .transpose()
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// Returns the entity store.
    pub fn store(&self) -> &Arc<EntityStore> {
        &self.context.store
    }
}

fn parse_since(query: Option<&str>) -> ServerResult<Option<Timestamp>> {
    let Some(value) = query
        .into_iter()
        .flat_map(|q| q.split('&'))
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "since")
        .map(|(_, value)| value)
    else {
        return Ok(None);
    };
    if value.is_empty() {
        return Ok(None);
    }

    DateTime::parse_from_rfc3339(value)
        .map(|t| Some(t.with_timezone(&Utc)))
        .map_err(|e| ServerError::InvalidRequest(format!("invalid since {value:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use carelog_sync_protocol::{EntityData, EntityType, Operation, SyncChange, SyncResult};

    fn push_request(device_id: &str, changes: Vec<SyncChange>) -> ServerRequest {
        ServerRequest::new("POST", "/sync/push")
            .with_header("X-Device-ID", device_id)
            .with_body(SyncPayload::new(device_id, None, changes).encode().unwrap())
    }

    fn growth(id: &str) -> SyncChange {
        SyncChange::new(
            EntityType::Growth,
            id,
            Operation::Create,
            EntityData::new().with("weightKg", 4.2),
            Utc::now(),
        )
    }

    #[test]
    fn full_sync_flow() {
        let server = SyncServer::new(ServerConfig::default());

        let response = server.handle(&push_request("a", vec![growth("g-1"), growth("g-2")]));
        assert_eq!(response.status, 200);
        let result = SyncResult::decode(&response.body).unwrap();
        assert!(result.success);

        let response = server.handle(
            &ServerRequest::new("GET", "/sync/pull").with_header("x-device-id", "b"),
        );
        assert_eq!(response.status, 200);
        let payload = SyncPayload::decode(&response.body).unwrap();
        assert_eq!(payload.changes.len(), 2);
        assert_eq!(server.store().entity_count(), 2);
    }

    #[test]
    fn pull_since_filters() {
        let server = SyncServer::new(ServerConfig::default());
        server.handle(&push_request("a", vec![growth("g-1")]));

        let later = (Utc::now() + chrono::Duration::hours(1))
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let response = server.handle(
            &ServerRequest::new("GET", format!("/sync/pull?since={later}"))
                .with_header("X-Device-ID", "b"),
        );
        assert!(SyncPayload::decode(&response.body).unwrap().changes.is_empty());
    }

    #[test]
    fn rejects_bad_requests() {
        let server = SyncServer::new(ServerConfig::default());

        let missing_device = ServerRequest::new("GET", "/sync/pull");
        assert_eq!(server.handle(&missing_device).status, 400);

        let bad_since = ServerRequest::new("GET", "/sync/pull?since=yesterday")
            .with_header("X-Device-ID", "a");
        assert_eq!(server.handle(&bad_since).status, 400);

        let bad_body = ServerRequest::new("POST", "/sync/push")
            .with_header("X-Device-ID", "a")
            .with_body(b"{".to_vec());
        assert_eq!(server.handle(&bad_body).status, 400);

        assert_eq!(server.handle(&ServerRequest::new("GET", "/sync/push")).status, 405);
        assert_eq!(server.handle(&ServerRequest::new("GET", "/health")).status, 404);
    }

    #[test]
    fn error_body_is_json() {
        let server = SyncServer::new(ServerConfig::default());
        let response = server.handle(&ServerRequest::new("GET", "/sync/pull"));
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert!(body["error"].as_str().unwrap().contains("X-Device-ID"));
    }

    #[test]
    fn auth_required() {
        let server = SyncServer::new(ServerConfig::default().with_auth(b"secret".to_vec()));
        let token = server.issue_token("a").unwrap().unwrap();

        assert_eq!(server.handle(&push_request("a", vec![])).status, 401);

        let authorized = push_request("a", vec![growth("g-1")])
            .with_header("Authorization", format!("Bearer {token}"));
        assert_eq!(server.handle(&authorized).status, 200);

        let wrong_device = push_request("b", vec![])
            .with_header("Authorization", format!("Bearer {token}"));
        assert_eq!(server.handle(&wrong_device).status, 403);
    }

    #[test]
    fn no_tokens_without_auth() {
        let server = SyncServer::new(ServerConfig::default());
        assert_eq!(server.issue_token("a").unwrap(), None);
    }
}
