//! Request handlers for sync endpoints.

use crate::auth::{AuthConfig, TokenValidator};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::store::EntityStore;
use carelog_sync_protocol::{SyncPayload, SyncResult, Timestamp};
use std::sync::Arc;

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Entity store (shared across all handlers).
    pub store: Arc<EntityStore>,
    /// Token validator, when authentication is enabled.
    validator: Option<TokenValidator>,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, store: Arc<EntityStore>) -> Self {
        let validator = match (&config.auth_secret, config.require_auth) {
            (Some(secret), true) => Some(TokenValidator::new(
                AuthConfig::new(secret.clone()).with_expiry(config.token_expiry),
            )),
            _ => None,
        };
        Self {
            config,
            store,
            validator,
        }
    }

    /// Returns the token validator, if authentication is enabled.
    pub fn validator(&self) -> Option<&TokenValidator> {
        self.validator.as_ref()
    }
}

/// Handler for sync requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Checks the bearer token of a request from `device_id`.
    pub fn authenticate(&self, device_id: &str, authorization: Option<&str>) -> ServerResult<()> {
        let Some(validator) = self.context.validator() else {
            if self.context.config.require_auth {
                return Err(ServerError::Internal("auth required but no secret set".into()));
            }
            return Ok(());
        };

        let token = authorization
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ServerError::AuthenticationFailed("missing bearer token".into()))?;
        validator.validate_token(token, device_id)
    }

    /// Handles a push request.
    pub fn handle_push(&self, device_id: &str, payload: SyncPayload) -> ServerResult<SyncResult> {
        if payload.changes.len() > self.context.config.max_push_batch {
            return Err(ServerError::InvalidRequest(format!(
                "too many changes: {} > {}",
                payload.changes.len(),
                self.context.config.max_push_batch
            )));
        }
        if payload.device_id != device_id {
            return Err(ServerError::InvalidRequest(
                "payload deviceId does not match X-Device-ID".into(),
            ));
        }

        let conflicts =
            self.context
                .store
                .apply_push(device_id, payload.last_sync_time, &payload.changes);
        tracing::info!(
            %device_id,
            changes = payload.changes.len(),
            conflicts = conflicts.len(),
            "push processed"
        );

        Ok(SyncResult::with_conflicts(conflicts))
    }

    /// Handles a pull request.
    pub fn handle_pull(&self, device_id: &str, since: Option<Timestamp>) -> ServerResult<SyncPayload> {
        let batch = self.context.store.pull(since);
        tracing::info!(%device_id, changes = batch.changes.len(), "pull processed");

        Ok(SyncPayload::new(
            self.context.config.server_id.clone(),
            batch.cursor,
            batch.changes,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carelog_sync_protocol::{EntityData, EntityType, Operation, SyncChange};
    use chrono::Utc;

    fn note(id: &str) -> SyncChange {
        SyncChange::new(
            EntityType::Note,
            id,
            Operation::Create,
            EntityData::new().with("text", "slept well"),
            Utc::now(),
        )
    }

    fn create_handler(config: ServerConfig) -> RequestHandler {
        let context = Arc::new(HandlerContext::new(config, Arc::new(EntityStore::new())));
        RequestHandler::new(context)
    }

    #[test]
    fn push_and_pull() {
        let handler = create_handler(ServerConfig::default());

        let result = handler
            .handle_push("a", SyncPayload::new("a", None, vec![note("n-1"), note("n-2")]))
            .unwrap();
        assert!(result.success);
        assert!(result.conflicts.is_empty());

        let pulled = handler.handle_pull("b", None).unwrap();
        assert_eq!(pulled.changes.len(), 2);
        assert_eq!(pulled.device_id, "carelog-sync-server");
        assert!(pulled.last_sync_time.is_some());

        let again = handler.handle_pull("b", pulled.last_sync_time).unwrap();
        assert!(again.changes.is_empty());
        assert_eq!(again.last_sync_time, pulled.last_sync_time);
    }

    #[test]
    fn push_conflict_is_success_with_conflicts() {
        let handler = create_handler(ServerConfig::default());
        handler
            .handle_push("a", SyncPayload::new("a", None, vec![note("n-1")]))
            .unwrap();

        let result = handler
            .handle_push("b", SyncPayload::new("b", None, vec![note("n-1")]))
            .unwrap();
        assert!(result.success);
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].entity_id, "n-1");
    }

    #[test]
    fn oversized_push_is_rejected() {
        let handler = create_handler(ServerConfig::default().with_max_push_batch(1));
        let err = handler
            .handle_push("a", SyncPayload::new("a", None, vec![note("n-1"), note("n-2")]))
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn mismatched_device_is_rejected() {
        let handler = create_handler(ServerConfig::default());
        let err = handler
            .handle_push("a", SyncPayload::new("b", None, vec![]))
            .unwrap_err();
        assert!(matches!(err, ServerError::InvalidRequest(_)));
    }

    #[test]
    fn authentication() {
        let handler = create_handler(ServerConfig::default().with_auth(b"secret".to_vec()));
        let validator = TokenValidator::new(AuthConfig::new(b"secret".to_vec()));
        let token = validator.create_token("a").unwrap();
        let header = format!("Bearer {token}");

        assert!(handler.authenticate("a", Some(&header)).is_ok());
        assert_eq!(handler.authenticate("a", None).unwrap_err().status_code(), 401);
        assert_eq!(
            handler.authenticate("a", Some("Bearer ")).unwrap_err().status_code(),
            401
        );
        assert_eq!(
            handler.authenticate("b", Some(&header)).unwrap_err().status_code(),
            403
        );

        let open = create_handler(ServerConfig::default());
        assert!(open.authenticate("a", None).is_ok());
    }
}
