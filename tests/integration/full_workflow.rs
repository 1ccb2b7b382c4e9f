//! End-to-end workflow: publishers contend for a stream, release it, and
//! expired credentials disappear. Runs against both backends.

use std::sync::Arc;
use std::time::Duration;

use stream_auth::callback::{self, CallbackKind, CallbackResponse};
use stream_auth::{
    AuthExpiry, AuthOutcome, DistributedBackend, FileBackend, MemoryKv, NewStream, Store,
};

async fn file_store(dir: &tempfile::TempDir) -> Store {
    let backend = FileBackend::open(dir.path().join("store.db"))
        .await
        .expect("open file backend");
    Store::new(Arc::new(backend))
}

async fn distributed_store(kv: &MemoryKv) -> Store {
    let backend = DistributedBackend::connect(kv.clone(), "stream_auth", Duration::from_secs(1))
        .await
        .expect("connect distributed backend");
    Store::new(Arc::new(backend))
}

async fn publisher_handover(store: &Store) {
    let a = store
        .add_stream(NewStream::new("live", "s1", "k1", AuthExpiry::Never))
        .await
        .unwrap();

    let first = store.auth("live", "s1", "k1").await.unwrap();
    assert!(first.is_allowed());
    assert_eq!(first.stream_id, Some(a.id.clone()));
    assert!(store.set_active(&a.id).await.unwrap());

    let b = store
        .add_stream(NewStream::new("live", "s1", "k2", AuthExpiry::Never))
        .await
        .unwrap();
    let second = store.auth("live", "s1", "k2").await.unwrap();
    assert_eq!(second.outcome, AuthOutcome::StreamInUse);

    assert!(store.set_inactive("live", "s1").await.unwrap());
    let retry = store.auth("live", "s1", "k2").await.unwrap();
    assert!(retry.is_allowed());
    assert_eq!(retry.stream_id, Some(b.id));
}

async fn expired_credential_is_gone(store: &Store) {
    let now = stream_auth::time::now_secs();
    let c = store
        .add_stream(NewStream::new("live", "s3", "k3", AuthExpiry::At(now - 1)))
        .await
        .unwrap();

    let removed = store.expire().await.unwrap();
    assert_eq!(removed, vec![c.id]);

    let decision = store.auth("live", "s3", "k3").await.unwrap();
    assert_eq!(decision.outcome, AuthOutcome::UnknownCredentials);
    assert_eq!(decision.stream_id, None);
}

#[tokio::test]
async fn workflow_file_backend() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(&dir).await;
    publisher_handover(&store).await;
    expired_credential_is_gone(&store).await;
}

#[tokio::test]
async fn workflow_distributed_backend() {
    let kv = MemoryKv::new();
    let store = distributed_store(&kv).await;
    publisher_handover(&store).await;
    expired_credential_is_gone(&store).await;
}

#[tokio::test]
async fn file_restart_keeps_credentials_and_frees_streams() {
    let dir = tempfile::tempdir().unwrap();
    let (id, secret) = {
        let store = file_store(&dir).await;
        let a = store
            .add_stream(NewStream::new("live", "s1", "k1", AuthExpiry::Never).with_notes("stage"))
            .await
            .unwrap();
        store.set_active(&a.id).await.unwrap();
        (a.id, store.secret().await.unwrap())
    };

    let store = file_store(&dir).await;
    let state = store.snapshot().await.unwrap();
    assert_eq!(state.secret, secret);
    let a = state.stream(&id).expect("record survives restart");
    assert!(!a.active);
    assert_eq!(a.notes, "stage");
}

#[tokio::test]
async fn callbacks_across_instances() {
    let kv = MemoryKv::new();
    let edge_a = distributed_store(&kv).await;
    let edge_b = distributed_store(&kv).await;

    edge_a
        .add_stream(NewStream::new("live", "talk", "k1", AuthExpiry::Never))
        .await
        .unwrap();
    edge_a
        .add_stream(NewStream::new("live", "talk", "k2", AuthExpiry::Never))
        .await
        .unwrap();

    let form = "application/x-www-form-urlencoded";
    let publish =
        callback::parse_request(form, b"app=live&name=talk&auth=k1", CallbackKind::Publish)
            .unwrap();
    assert_eq!(
        callback::handle_publish(&edge_a, &publish).await,
        CallbackResponse::Accepted
    );

    // Once the second edge's cache has caught up it refuses at auth time.
    let mut denied = false;
    let competing =
        callback::parse_request(form, b"app=live&name=talk&auth=k2", CallbackKind::Publish)
            .unwrap();
    for _ in 0..50 {
        let state = edge_b.snapshot().await.unwrap();
        if state.is_target_active("live", "talk") {
            denied = callback::handle_publish(&edge_b, &competing).await
                == CallbackResponse::Unauthorized;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(denied, "second edge must refuse the competing publisher");

    let srs = br#"{"action":"on_unpublish","app":"live","stream":"talk","param":""}"#;
    let unpublish = callback::parse_request("application/json", srs, CallbackKind::Unpublish)
        .unwrap();
    assert_eq!(
        callback::handle_unpublish(&edge_b, &unpublish).await,
        CallbackResponse::Accepted
    );
    let state = edge_b.snapshot().await.unwrap();
    assert!(!state.is_target_active("live", "talk"));
}

#[tokio::test]
async fn racing_edges_activate_at_most_one_publisher() {
    for _ in 0..20 {
        let kv = MemoryKv::new();
        let edge_a = distributed_store(&kv).await;
        let edge_b = distributed_store(&kv).await;

        let a = edge_a
            .add_stream(NewStream::new("live", "s1", "k1", AuthExpiry::Never))
            .await
            .unwrap();
        let b = edge_a
            .add_stream(NewStream::new("live", "s1", "k2", AuthExpiry::Never))
            .await
            .unwrap();

        // Both publishers pass auth before either is marked live.
        let first = edge_a.auth("live", "s1", "k1").await.unwrap();
        let second = edge_b.auth("live", "s1", "k2").await.unwrap();
        assert!(first.is_allowed());
        if !second.is_allowed() {
            // Edge B had not seen the new records yet; nothing to race.
            continue;
        }

        let (won_a, won_b) = tokio::join!(edge_a.set_active(&a.id), edge_b.set_active(&b.id));
        let (won_a, won_b) = (won_a.unwrap(), won_b.unwrap());
        assert!(!(won_a && won_b), "both publishers were activated");

        let fresh = distributed_store(&kv).await.snapshot().await.unwrap();
        let live = fresh.streams.iter().filter(|s| s.active).count();
        assert!(live <= 1, "{live} records live for live/s1");
        assert_eq!(live, usize::from(won_a) + usize::from(won_b));
    }
}
