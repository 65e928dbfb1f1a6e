//! Integration tests for sync engine and server.

use async_trait::async_trait;
use carelog_sync_engine::{
    Connectivity, CycleOutcome, DeviceId, EngineResult, HttpClient, HttpMethod, HttpRequest,
    HttpResponse, HttpTransport, MemoryMutationStore, MutationStore, ReqwestClient, StaticToken,
    SyncConfig, SyncEngine, SyncEvent, SyncStatus,
};
use carelog_sync_protocol::{EntityData, EntityType, Operation, Resolution, SyncChange, Timestamp};
use carelog_sync_server::{ServerConfig, ServerRequest, SyncServer};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// An HTTP client that hands requests straight to an in-process server.
struct LoopbackClient {
    server: Arc<SyncServer>,
}

#[async_trait]
impl HttpClient for LoopbackClient {
    async fn send(&self, request: HttpRequest) -> EngineResult<HttpResponse> {
        let method = match request.method {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        };
        let target = request
            .url
            .strip_prefix("memory://server")
            .unwrap_or(&request.url)
            .to_string();
        let response = self.server.handle(&ServerRequest {
            method: method.to_string(),
            target,
            headers: request.headers,
            body: request.body.unwrap_or_default(),
        });
        Ok(HttpResponse {
            status: response.status,
            body: response.body,
        })
    }
}

struct Client {
    engine: Arc<SyncEngine<MemoryMutationStore>>,
    store: Arc<MemoryMutationStore>,
}

fn client(server: &Arc<SyncServer>, token: Option<String>) -> Client {
    let device_id = DeviceId::generate();
    client_for(server, device_id, token)
}

fn client_for(server: &Arc<SyncServer>, device_id: DeviceId, token: Option<String>) -> Client {
    let config = SyncConfig::new(device_id, "memory://server");
    let store = Arc::new(MemoryMutationStore::new());
    let engine = Arc::new(SyncEngine::new(config, store.clone(), Connectivity::new(true)));

    let mut transport = HttpTransport::new(
        "memory://server",
        device_id,
        LoopbackClient {
            server: Arc::clone(server),
        },
    );
    if let Some(token) = token {
        transport = transport.with_token_provider(Arc::new(StaticToken(token)));
    }
    engine.set_transport(Arc::new(transport));

    Client { engine, store }
}

fn at(s: &str) -> Timestamp {
    s.parse().unwrap()
}

fn feeding(id: &str, amount: i64, updated_at: &str, caregiver: &str) -> SyncChange {
    SyncChange::new(
        EntityType::Feeding,
        id,
        Operation::Update,
        EntityData::new()
            .with("amountMl", amount)
            .with("updatedAt", updated_at)
            .with("caregiverId", caregiver),
        at(updated_at),
    )
    .with_caregiver(caregiver)
}

fn completed(outcome: CycleOutcome) -> (usize, usize) {
    match outcome {
        CycleOutcome::Completed(report) => (report.synced, report.failed),
        other => panic!("expected completed cycle, got {other:?}"),
    }
}

#[tokio::test]
async fn client_server_full_sync() {
    let server = Arc::new(SyncServer::new(ServerConfig::default()));
    let alice = client(&server, None);

    for i in 0..3 {
        alice
            .store
            .record_change(&feeding(&format!("f-{i}"), 100, "2024-03-01T08:00:00Z", "alice"))
            .await
            .unwrap();
    }

    assert_eq!(completed(alice.engine.process_queue().await), (3, 0));
    assert_eq!(alice.engine.status(), SyncStatus::Synced);
    assert_eq!(alice.store.pending_count().await.unwrap(), 0);
    assert_eq!(server.store().entity_count(), 3);
}

#[tokio::test]
async fn changes_propagate_through_pull() {
    let server = Arc::new(SyncServer::new(ServerConfig::default()));
    let alice = client(&server, None);
    let bob = client(&server, None);

    alice
        .store
        .record_change(&feeding("f-1", 120, "2024-03-01T08:00:00Z", "alice"))
        .await
        .unwrap();
    completed(alice.engine.process_queue().await);

    assert_eq!(bob.engine.pull_remote().await.unwrap(), 1);
    let entity = bob.store.entity(EntityType::Feeding, "f-1").unwrap();
    assert_eq!(entity.data.get("amountMl"), Some(&json!(120)));
    assert!(entity.synced_at.is_some());
}

#[tokio::test]
async fn empty_cycle_does_not_hide_remote_changes() {
    let server = Arc::new(SyncServer::new(ServerConfig::default()));
    let alice = client(&server, None);
    let bob = client(&server, None);

    alice
        .store
        .record_change(&feeding("f-1", 120, "2024-03-01T08:00:00Z", "alice"))
        .await
        .unwrap();
    completed(alice.engine.process_queue().await);

    // Bob's own cycle completes after Alice's push was stored.
    assert_eq!(completed(bob.engine.process_queue().await), (0, 0));
    assert_eq!(bob.engine.pull_remote().await.unwrap(), 1);
    assert!(bob.engine.pull_cursor().is_some());

    // A second pull sees only what arrived since the first.
    assert_eq!(bob.engine.pull_remote().await.unwrap(), 0);
    alice
        .store
        .record_change(&feeding("f-2", 80, "2024-03-01T09:00:00Z", "alice"))
        .await
        .unwrap();
    completed(alice.engine.process_queue().await);
    completed(bob.engine.process_queue().await);
    assert_eq!(bob.engine.pull_remote().await.unwrap(), 1);
    assert!(bob.store.entity(EntityType::Feeding, "f-2").is_some());
}

#[tokio::test]
async fn concurrent_edit_is_resolved_last_write_wins() {
    let server = Arc::new(SyncServer::new(ServerConfig::default()));
    let alice = client(&server, None);
    let bob = client(&server, None);

    // Bob edits later than Alice but syncs first.
    bob.store
        .record_change(&feeding("f-1", 150, "2024-03-01T09:00:00Z", "bob"))
        .await
        .unwrap();
    completed(bob.engine.process_queue().await);

    alice
        .store
        .record_change(&feeding("f-1", 90, "2024-03-01T08:00:00Z", "alice"))
        .await
        .unwrap();
    let mut events = alice.engine.subscribe();
    assert_eq!(completed(alice.engine.process_queue().await), (1, 0));

    // The server version was newer, so Alice adopts it.
    let entity = alice.store.entity(EntityType::Feeding, "f-1").unwrap();
    assert_eq!(entity.data.get("amountMl"), Some(&json!(150)));
    assert_eq!(alice.store.pending_count().await.unwrap(), 0);

    let mut resolved = None;
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::ConflictResolved(result) = event {
            resolved = Some(result);
        }
    }
    let resolved = resolved.expect("conflict event");
    assert_eq!(resolved.resolution, Resolution::Server);
    assert_eq!(resolved.winning_caregiver_id.as_deref(), Some("bob"));
    assert_eq!(resolved.losing_caregiver_id.as_deref(), Some("alice"));
    assert_eq!(resolved.losing_timestamp, at("2024-03-01T08:00:00Z"));
}

#[tokio::test]
async fn authenticated_sync() {
    let server = Arc::new(SyncServer::new(
        ServerConfig::default().with_auth(b"integration-secret".to_vec()),
    ));
    let device_id = DeviceId::generate();
    let token = server.issue_token(&device_id.to_string()).unwrap();
    let trusted = client_for(&server, device_id, token);

    trusted
        .store
        .record_change(&feeding("f-1", 60, "2024-03-01T08:00:00Z", "alice"))
        .await
        .unwrap();
    assert_eq!(completed(trusted.engine.process_queue().await), (1, 0));

    // Without a token every push is a non-retryable 401.
    let anonymous = client(&server, None);
    anonymous
        .store
        .record_change(&feeding("f-2", 60, "2024-03-01T08:00:00Z", "alice"))
        .await
        .unwrap();
    assert_eq!(completed(anonymous.engine.process_queue().await), (0, 1));
    assert_eq!(anonymous.engine.status(), SyncStatus::Error);

    let entry = &anonymous.store.pending().await.unwrap()[0];
    assert_eq!(entry.retry_count, 1);
    assert!(entry.last_error.as_deref().unwrap().contains("401"));
}

#[tokio::test]
async fn sync_over_http() {
    let server = Arc::new(SyncServer::new(ServerConfig::default()));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serving = tokio::spawn(carelog_sync_server::serve(listener, Arc::clone(&server)));

    let device_id = DeviceId::generate();
    let base_url = format!("http://{addr}");
    let config = SyncConfig::new(device_id, base_url.clone());
    let store = Arc::new(MemoryMutationStore::new());
    let engine = SyncEngine::new(config, store.clone(), Connectivity::new(true));
    let http = ReqwestClient::new(Duration::from_secs(5)).unwrap();
    engine.set_transport(Arc::new(HttpTransport::new(base_url, device_id, http)));

    store
        .record_change(&feeding("f-1", 75, "2024-03-01T08:00:00Z", "alice"))
        .await
        .unwrap();
    assert_eq!(completed(engine.process_queue().await), (1, 0));
    assert_eq!(server.store().change_count(), 1);

    serving.abort();
}
