//! HTTP peer client against a local axum peer

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, head},
    Router,
};
use chunkrep::common::{ChunkId, ChunkKind, IdentityFile, PeerEntry, ReplicationAuditLog, SigningIdentity};
use chunkrep::peer::http::{SIGNATURE_HEADER, USER_HEADER};
use chunkrep::peer::{HttpPeerClient, PeerClient, PeerConnection, StaticPeerDirectory};
use chunkrep::replication::{Replicator, RunContext, RunSettings};
use chunkrep::storage::MemChunkStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

#[derive(Clone, Default)]
struct TestPeer {
    chunks: Arc<Mutex<HashMap<(String, String), Vec<u8>>>>,
    signatures: Arc<Mutex<Vec<(String, String)>>>,
    broken: bool,
}

async fn head_chunk(
    State(peer): State<TestPeer>,
    Path((kind, hash)): Path<(String, String)>,
) -> StatusCode {
    if peer.broken {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    if peer.chunks.lock().unwrap().contains_key(&(kind, hash)) {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn put_chunk(
    State(peer): State<TestPeer>,
    Path((kind, hash)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if peer.broken {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    let (Some(user), Some(signature)) = (headers.get(USER_HEADER), headers.get(SIGNATURE_HEADER))
    else {
        return StatusCode::UNAUTHORIZED;
    };
    if blake3::hash(&body).to_hex().as_str() != hash {
        return StatusCode::BAD_REQUEST;
    }
    peer.signatures.lock().unwrap().push((
        user.to_str().unwrap().to_string(),
        signature.to_str().unwrap().to_string(),
    ));
    let mut chunks = peer.chunks.lock().unwrap();
    if chunks.contains_key(&(kind.clone(), hash.clone())) {
        return StatusCode::CONFLICT;
    }
    chunks.insert((kind, hash), body.to_vec());
    StatusCode::CREATED
}

async fn status() -> &'static str {
    "ok"
}

/// Serve `peer` on an ephemeral port, returning its base URL
async fn spawn_peer(peer: TestPeer) -> String {
    let app = Router::new()
        .route("/chunks/:kind/:hash", head(head_chunk).put(put_chunk))
        .route("/status", get(status))
        .with_state(peer);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn identity() -> SigningIdentity {
    IdentityFile::generate("ops", "pw").unwrap().unlock("pw").unwrap()
}

fn client() -> HttpPeerClient {
    HttpPeerClient::new(Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_push_then_has() {
    let peer = TestPeer::default();
    let url = spawn_peer(peer.clone()).await;
    let identity = identity();
    let data = Bytes::from_static(b"chunk body");
    let id = ChunkId::for_bytes(&data);

    let mut conn = client().connect(&url).await.unwrap();
    conn.ping().await.unwrap();
    assert!(!conn.has_chunk(&id, ChunkKind::Data).await.unwrap());

    conn.push_chunk(&identity, &id, ChunkKind::Data, data.clone())
        .await
        .unwrap();
    assert!(conn.has_chunk(&id, ChunkKind::Data).await.unwrap());
    assert!(!conn.has_chunk(&id, ChunkKind::Meta).await.unwrap());

    let signatures = peer.signatures.lock().unwrap().clone();
    assert_eq!(
        signatures,
        vec![(
            "ops".to_string(),
            identity.sign_push(ChunkKind::Data, &id, &data)
        )]
    );
}

#[tokio::test]
async fn test_duplicate_push_accepted() {
    let url = spawn_peer(TestPeer::default()).await;
    let identity = identity();
    let data = Bytes::from_static(b"twice");
    let id = ChunkId::for_bytes(&data);

    let mut conn = client().connect(&url).await.unwrap();
    conn.push_chunk(&identity, &id, ChunkKind::Meta, data.clone())
        .await
        .unwrap();
    conn.push_chunk(&identity, &id, ChunkKind::Meta, data)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_server_errors_are_transport_errors() {
    let url = spawn_peer(TestPeer {
        broken: true,
        ..TestPeer::default()
    })
    .await;
    let id = ChunkId::for_bytes(b"x");

    let mut conn = client().connect(&url).await.unwrap();
    let err = conn.has_chunk(&id, ChunkKind::Data).await.unwrap_err();
    assert!(err.is_transport());
    let err = conn
        .push_chunk(&identity(), &id, ChunkKind::Data, Bytes::from_static(b"x"))
        .await
        .unwrap_err();
    assert!(err.is_transport());
}

#[tokio::test]
async fn test_unreachable_peer() {
    // Bind then drop to get a port nobody listens on
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let mut conn = client().connect(&format!("http://{}", addr)).await.unwrap();
    let err = conn.ping().await.unwrap_err();
    assert!(err.is_transport());
}

#[tokio::test]
async fn test_repair_over_http() {
    let peers = vec![
        TestPeer::default(),
        TestPeer::default(),
        TestPeer::default(),
        TestPeer::default(),
    ];
    let mut entries = Vec::new();
    for peer in &peers {
        entries.push(PeerEntry::new(spawn_peer(peer.clone()).await));
    }

    let store = Arc::new(MemChunkStore::new());
    let data = store.insert(ChunkKind::Data, &b"over the wire"[..]);
    store.insert(ChunkKind::Meta, &b"meta over the wire"[..]);
    // One replica already in place
    peers[0]
        .chunks
        .lock()
        .unwrap()
        .insert(("data".into(), data.to_hex()), b"over the wire".to_vec());

    let client = Arc::new(client());
    let directory = Arc::new(StaticPeerDirectory::new(&entries));
    assert_eq!(directory.probe(client.as_ref(), Duration::from_secs(2)).await, 4);

    let out = TempDir::new().unwrap();
    let audit = ReplicationAuditLog::create(
        &out.path().join("exceptions.csv"),
        &out.path().join("failures.csv"),
    )
    .unwrap();
    let ctx = Arc::new(RunContext::new(
        store,
        client,
        directory,
        identity(),
        audit,
        RunSettings::default(),
    ));

    let report = Replicator::new().run(ctx).await.unwrap();

    assert_eq!(report.stats.chunks_injected, 5);
    assert_eq!(report.exception_rows, 0);
    assert_eq!(report.failure_rows, 0);
    let holders = |kind: &str| {
        peers
            .iter()
            .filter(|p| p.chunks.lock().unwrap().keys().any(|(k, _)| k == kind))
            .count()
    };
    assert_eq!(holders("data"), 3);
    assert_eq!(holders("meta"), 3);
}
