//! End-to-end relay tests over real WebSocket connections.

use driftlist_relay::{RelayConfig, RelayServer, RoomManagerConfig};
use driftlist_storage::AutoPersisterConfig;
use driftlist_store::MergeableStore;
use driftlist_sync::SyncMessage;
use driftlist_types::{CellValue, Identity, ReplicaId};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn identity(tag: &str) -> Identity {
    Identity::parse(&format!("{tag:0>16}")).unwrap()
}

async fn start_relay(dir: &tempfile::TempDir) -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    let config = RelayConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        db_path: dir.path().join("relay.db"),
        rooms: RoomManagerConfig {
            persist: AutoPersisterConfig {
                autosave_interval: Duration::from_millis(50),
                autoload_interval: Duration::from_millis(50),
            },
        },
    };
    let server = RelayServer::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let task = tokio::spawn(async move {
        let _ = server.run().await;
    });
    (addr, task)
}

async fn connect(addr: std::net::SocketAddr, identity: &Identity) -> WsClient {
    let url = format!("ws://{addr}/{identity}");
    let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws
}

async fn next_message(ws: &mut WsClient) -> SyncMessage {
    loop {
        let frame = timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
            .expect("websocket error");
        if let Message::Text(raw) = frame {
            return SyncMessage::decode(&raw).expect("relay sent malformed message");
        }
    }
}

fn delta_for(cells: &[(&str, &str, &str, &str)]) -> driftlist_store::Delta {
    let mut store = MergeableStore::new(ReplicaId::generate());
    for (table, row, cell, value) in cells {
        store.set_cell(table, row, cell, *value);
    }
    store.take_pending()
}

#[tokio::test(flavor = "multi_thread")]
async fn deltas_fan_out_to_the_other_replica_only() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _task) = start_relay(&dir).await;
    let id = identity("ab");

    let mut alice = connect(addr, &id).await;
    let mut bob = connect(addr, &id).await;
    assert!(matches!(next_message(&mut alice).await, SyncMessage::Snapshot { .. }));
    assert!(matches!(next_message(&mut bob).await, SyncMessage::Snapshot { .. }));

    let delta = delta_for(&[("lists", "l1", "title", "from alice")]);
    alice
        .send(Message::Text(SyncMessage::Deltas { delta }.encode()))
        .await
        .unwrap();

    let forwarded = next_message(&mut bob).await;
    let mut check = MergeableStore::new(ReplicaId::new("check"));
    check.merge(forwarded.delta());
    assert_eq!(
        check.cell("lists", "l1", "title"),
        Some(&CellValue::from("from alice"))
    );

    // The sender gets no echo of its own delta.
    let echo = timeout(Duration::from_millis(300), alice.next()).await;
    assert!(echo.is_err(), "sender should not receive its own delta back");
}

#[tokio::test(flavor = "multi_thread")]
async fn identities_are_isolated_under_interleaved_traffic() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _task) = start_relay(&dir).await;

    let mut alpha_writer = connect(addr, &identity("aa")).await;
    let mut alpha_reader = connect(addr, &identity("aa")).await;
    let mut beta_writer = connect(addr, &identity("bb")).await;
    let mut beta_reader = connect(addr, &identity("bb")).await;
    for ws in [&mut alpha_writer, &mut alpha_reader, &mut beta_writer, &mut beta_reader] {
        assert!(matches!(next_message(ws).await, SyncMessage::Snapshot { .. }));
    }

    // Rapid interleaved sends on both identities.
    for i in 0..10 {
        let row = format!("row{i}");
        let alpha_delta = delta_for(&[("lists", &row, "owner", "alpha")]);
        let beta_delta = delta_for(&[("lists", &row, "owner", "beta")]);
        alpha_writer
            .send(Message::Text(SyncMessage::Deltas { delta: alpha_delta }.encode()))
            .await
            .unwrap();
        beta_writer
            .send(Message::Text(SyncMessage::Deltas { delta: beta_delta }.encode()))
            .await
            .unwrap();
    }

    let mut alpha_store = MergeableStore::new(ReplicaId::new("alpha-check"));
    let mut beta_store = MergeableStore::new(ReplicaId::new("beta-check"));
    while alpha_store.row_ids("lists").len() < 10 {
        alpha_store.merge(next_message(&mut alpha_reader).await.delta());
    }
    while beta_store.row_ids("lists").len() < 10 {
        beta_store.merge(next_message(&mut beta_reader).await.delta());
    }

    for store in [&alpha_store, &beta_store] {
        assert_eq!(store.row_ids("lists").len(), 10);
    }
    for i in 0..10 {
        let row = format!("row{i}");
        assert_eq!(
            alpha_store.cell("lists", &row, "owner"),
            Some(&CellValue::from("alpha"))
        );
        assert_eq!(
            beta_store.cell("lists", &row, "owner"),
            Some(&CellValue::from("beta"))
        );
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn late_joiner_bootstraps_from_durable_state() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _task) = start_relay(&dir).await;
    let id = identity("cc");

    {
        let mut writer = connect(addr, &id).await;
        assert!(matches!(next_message(&mut writer).await, SyncMessage::Snapshot { .. }));
        let delta = delta_for(&[("lists", "l1", "title", "persisted")]);
        writer
            .send(Message::Text(SyncMessage::Deltas { delta }.encode()))
            .await
            .unwrap();
        // A clean close evicts the room, flushing to the shared file.
        writer.close(None).await.unwrap();
    }

    // Give the relay a moment to run the eviction flush, then join late.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut late = connect(addr, &id).await;
    let mut store = MergeableStore::new(ReplicaId::new("late"));
    store.merge(next_message(&mut late).await.delta());
    while store.cell("lists", "l1", "title").is_none() {
        store.merge(next_message(&mut late).await.delta());
    }
    assert_eq!(
        store.cell("lists", "l1", "title"),
        Some(&CellValue::from("persisted"))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_messages_do_not_kill_the_channel() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _task) = start_relay(&dir).await;
    let id = identity("dd");

    let mut alice = connect(addr, &id).await;
    let mut bob = connect(addr, &id).await;
    assert!(matches!(next_message(&mut alice).await, SyncMessage::Snapshot { .. }));
    assert!(matches!(next_message(&mut bob).await, SyncMessage::Snapshot { .. }));

    alice
        .send(Message::Text("this is not json".to_string()))
        .await
        .unwrap();

    // The channel survives: a real delta still goes through afterwards.
    let delta = delta_for(&[("lists", "l1", "title", "still alive")]);
    alice
        .send(Message::Text(SyncMessage::Deltas { delta }.encode()))
        .await
        .unwrap();

    let forwarded = next_message(&mut bob).await;
    let mut check = MergeableStore::new(ReplicaId::new("check"));
    check.merge(forwarded.delta());
    assert!(check.has_row("lists", "l1"));
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_identity_paths_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _task) = start_relay(&dir).await;

    let url = format!("ws://{addr}/not-a-valid-identity");
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    // The relay closes the channel without ever sending a snapshot.
    let frame = timeout(WAIT, ws.next()).await.expect("timed out");
    match frame {
        None | Some(Ok(Message::Close(_))) | Some(Err(_)) => {}
        other => panic!("expected close, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn health_endpoint_answers_plain_http() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _task) = start_relay(&dir).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n")
        .await
        .unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK"), "got: {response}");
    assert!(response.contains("\"status\":\"ok\""));
    assert!(response.contains("\"timestamp\""));
}
