//! End-to-end synchronization over loopback TCP.

use bytes::BytesMut;
use nettables_core::{Arena, Role, Value};
use nettables_node::{ConnectionRegistry, NodeConfig, NodeRole};
use nettables_protocol::{Decoder, WireMessage, WireValue};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;

const WAIT: Duration = Duration::from_secs(5);

fn config(role: NodeRole, watchdog_ms: u64) -> NodeConfig {
    let mut config = NodeConfig::default();
    config.network.role = role;
    config.timing.write_delay_ms = 10;
    config.timing.watchdog_ms = watchdog_ms;
    config
}

async fn start_server() -> (ConnectionRegistry, SocketAddr) {
    start_server_with_watchdog(10_000).await
}

async fn start_server_with_watchdog(watchdog_ms: u64) -> (ConnectionRegistry, SocketAddr) {
    let registry = ConnectionRegistry::new(config(NodeRole::Server, watchdog_ms));
    let addr = registry
        .serve_on("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    (registry, addr)
}

async fn connect_client(addr: SocketAddr, tables: &[&str]) -> ConnectionRegistry {
    let registry = ConnectionRegistry::new(config(NodeRole::Client, 10_000));
    for name in tables {
        registry.table(name);
    }
    registry.connect_to(addr).await.unwrap();
    registry
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A hand-driven peer speaking raw wire messages.
struct RawPeer {
    stream: TcpStream,
    decoder: Decoder,
}

impl RawPeer {
    async fn connect(addr: SocketAddr) -> Self {
        Self {
            stream: TcpStream::connect(addr).await.unwrap(),
            decoder: Decoder::new(),
        }
    }

    async fn send(&mut self, messages: &[WireMessage]) {
        let mut buf = BytesMut::new();
        for message in messages {
            message.encode(&mut buf).unwrap();
        }
        self.stream.write_all(&buf).await.unwrap();
    }

    /// Next message other than a ping, or `None` once the server hangs up.
    async fn recv(&mut self) -> Option<WireMessage> {
        let mut buf = [0u8; 1024];
        loop {
            match self.decoder.decode_message().unwrap() {
                Some(WireMessage::Ping) => continue,
                Some(message) => return Some(message),
                None => {}
            }
            let n = tokio::time::timeout(WAIT, self.stream.read(&mut buf))
                .await
                .expect("server went silent")
                .unwrap_or(0);
            if n == 0 {
                return None;
            }
            self.decoder.extend(&buf[..n]);
        }
    }

    async fn expect(&mut self) -> WireMessage {
        self.recv().await.expect("server closed the connection")
    }

    /// Requests table `T` under our id 0, returns the server's table id.
    async fn request_table(&mut self) -> u32 {
        self.send(&[WireMessage::TableRequest {
            name: "T".into(),
            table_id: 0,
        }])
        .await;
        match self.expect().await {
            WireMessage::TableAssignment {
                target_id: 0,
                table_id,
            } => table_id,
            other => panic!("expected TableAssignment, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_put_is_confirmed_and_reaches_late_joiners() {
    let (server, addr) = start_server().await;
    let client = connect_client(addr, &["T"]).await;

    let confirmations = Arc::new(Mutex::new(Vec::new()));
    let table = client.table("T");
    {
        let confirmations = confirmations.clone();
        table.add_listener("x", move |event| {
            confirmations.lock().push(event.confirmed);
        });
    }
    table.put("x", 5).unwrap();

    let server_table = server.table("T");
    eventually("server to see x", || server_table.get_int("x").ok() == Some(5)).await;
    eventually("client write to be confirmed", || {
        *confirmations.lock() == vec![false, true]
    })
    .await;

    let late = connect_client(addr, &["T"]).await;
    let late_table = late.table("T");
    eventually("late client sync", || late_table.get_int("x").ok() == Some(5)).await;

    late.shutdown();
    client.shutdown();
    server.shutdown();
}

#[tokio::test]
async fn test_initial_sync_burst_has_no_transaction_wrapper() {
    let (server, addr) = start_server().await;
    let table = server.table("T");
    table.put("x", 5).unwrap();

    let mut peer = RawPeer::connect(addr).await;
    let server_table_id = peer.request_table().await;
    assert_eq!(server_table_id, table.id());

    let key_id = match peer.expect().await {
        WireMessage::FieldAssignment {
            table_id,
            name,
            key_id,
        } => {
            assert_eq!(table_id, server_table_id);
            assert_eq!(name, "x");
            key_id
        }
        other => panic!("expected FieldAssignment, got {other:?}"),
    };
    assert_eq!(
        peer.expect().await,
        WireMessage::Entry {
            key_id,
            value: WireValue::Integer(5),
        }
    );

    server.shutdown();
}

#[tokio::test]
async fn test_large_table_survives_connect() {
    let (server, addr) = start_server().await;
    let client = ConnectionRegistry::new(config(NodeRole::Client, 10_000));
    let table = client.table("Big");
    for i in 0..5_000 {
        table.put(&format!("k{i}"), i).unwrap();
    }
    table.put_path("nested.leaf", 1.5).unwrap();
    let connection = client.connect_to(addr).await.unwrap();

    let server_table = server.table("Big");
    eventually("every key to arrive", || {
        server_table.keys().len() == 5_001
            && server_table.get_path("nested.leaf").ok() == Some(Value::Double(1.5))
    })
    .await;
    assert!(!connection.is_closed());
    assert_eq!(client.connection_count(), 1);
    assert_eq!(server_table.get_int("k4999").unwrap(), 4_999);

    client.shutdown();
    server.shutdown();
}

#[tokio::test]
async fn test_server_writes_reach_client() {
    let (server, addr) = start_server().await;
    let client = connect_client(addr, &["T"]).await;
    let server_table = server.table("T");

    eventually("subscription", || server_table.connection_count() == 1).await;
    server_table.put("speed", 2.5).unwrap();
    server_table.put("mode", "auto").unwrap();

    let table = client.table("T");
    eventually("client to see writes", || {
        table.get_double("speed").ok() == Some(2.5)
            && table.get_string("mode").ok().as_deref() == Some("auto")
    })
    .await;

    client.shutdown();
    server.shutdown();
}

#[tokio::test]
async fn test_tables_created_after_connect_are_requested() {
    let (server, addr) = start_server().await;
    let client = connect_client(addr, &[]).await;

    let table = client.table("Late");
    table.put("ready", true).unwrap();

    let server_table = server.table("Late");
    eventually("late table", || server_table.get_boolean("ready").ok() == Some(true)).await;

    client.shutdown();
    server.shutdown();
}

#[tokio::test]
async fn test_conflicting_write_is_denied_and_converges() {
    let (server, addr) = start_server().await;
    let server_table = server.table("T");
    server_table.put("x", 0).unwrap();

    // Both peers subscribe and acknowledge the initial value.
    let mut a = RawPeer::connect(addr).await;
    let mut b = RawPeer::connect(addr).await;
    let mut key_id = 0;
    for peer in [&mut a, &mut b] {
        peer.request_table().await;
        key_id = match peer.expect().await {
            WireMessage::FieldAssignment { key_id, .. } => key_id,
            other => panic!("expected FieldAssignment, got {other:?}"),
        };
        assert!(matches!(peer.expect().await, WireMessage::Entry { .. }));
        peer.send(&[
            WireMessage::Confirmation(1),
            WireMessage::FieldAssignment {
                table_id: 0,
                name: "x".into(),
                key_id: 1,
            },
        ])
        .await;
    }

    // A's write is accepted and forwarded to B, which has not acknowledged it
    // when its own write for the same key arrives.
    a.send(&[WireMessage::Entry {
        key_id: 1,
        value: WireValue::Integer(10),
    }])
    .await;
    assert_eq!(a.expect().await, WireMessage::Confirmation(1));
    assert_eq!(
        b.expect().await,
        WireMessage::Entry {
            key_id,
            value: WireValue::Integer(10),
        }
    );

    b.send(&[WireMessage::Entry {
        key_id: 1,
        value: WireValue::Integer(20),
    }])
    .await;
    assert_eq!(b.expect().await, WireMessage::Denial(1));
    assert_eq!(
        b.expect().await,
        WireMessage::OldData {
            key_id,
            value: WireValue::Integer(10),
        }
    );
    assert_eq!(server_table.get_int("x").unwrap(), 10);

    server.shutdown();
}

#[tokio::test]
async fn test_client_converges_after_denial() {
    let (server, addr) = start_server().await;
    let server_table = server.table("T");
    server_table.put("x", 1).unwrap();

    let client = connect_client(addr, &["T"]).await;
    let table = client.table("T");
    eventually("initial sync", || table.get_int("x").ok() == Some(1)).await;

    // Racing writes from both ends settle on one value everywhere.
    for round in 0..20 {
        table.put("x", 100 + round).unwrap();
        server_table.put("x", 200 + round).unwrap();
    }

    eventually("both sides to agree", || {
        let connection = &client.connections()[0];
        connection.pending() == 0
            && connection.unacknowledged() == 0
            && table.get("x") == server_table.get("x")
    })
    .await;

    client.shutdown();
    server.shutdown();
}

#[tokio::test]
async fn test_transactions_are_atomic_across_the_wire() {
    let (server, addr) = start_server().await;
    let server_table = server.table("T");
    let observed = Arc::new(Mutex::new(Vec::new()));
    {
        let observed = observed.clone();
        server_table.add_listener("a", move |event| {
            let b = event.table.get("b");
            observed.lock().push((event.value.clone(), b));
        });
    }

    let client = connect_client(addr, &["T"]).await;
    let table = client.table("T");
    table.begin_transaction();
    table.put("a", 1).unwrap();
    table.put("b", 2).unwrap();
    table.end_transaction().unwrap();

    eventually("transaction to land", || !observed.lock().is_empty()).await;
    assert_eq!(
        *observed.lock(),
        vec![(Value::Integer(1), Some(Value::Integer(2)))]
    );
    eventually("transaction to be acknowledged", || {
        client.connections()[0].unacknowledged() == 0
    })
    .await;

    client.shutdown();
    server.shutdown();
}

#[tokio::test]
async fn test_sub_tables_replicate() {
    let (server, addr) = start_server().await;
    let client = connect_client(addr, &["T"]).await;

    client.table("T").put_path("drive.left.speed", 0.5).unwrap();

    let server_table = server.table("T");
    eventually("nested value", || {
        server_table.get_path("drive.left.speed").ok() == Some(Value::Double(0.5))
    })
    .await;

    client.shutdown();
    server.shutdown();
}

#[tokio::test]
async fn test_watchdog_closes_silent_peer() {
    let (server, addr) = start_server_with_watchdog(200).await;
    let table = server.table("T");

    let mut peer = RawPeer::connect(addr).await;
    peer.request_table().await;
    eventually("subscription", || table.connection_count() == 1).await;
    assert_eq!(server.connection_count(), 1);

    // The peer never answers again; the server must hang up.
    while peer.recv().await.is_some() {}
    eventually("connection removal", || server.connection_count() == 0).await;
    assert_eq!(table.connection_count(), 0);

    server.shutdown();
}

#[tokio::test]
async fn test_disconnect_keeps_values() {
    let (server, addr) = start_server().await;
    let client = connect_client(addr, &["T"]).await;
    client.table("T").put("kept", 7).unwrap();

    let server_table = server.table("T");
    eventually("value", || server_table.get_int("kept").ok() == Some(7)).await;

    client.shutdown();
    eventually("disconnect", || server.connection_count() == 0).await;
    assert_eq!(server_table.get_int("kept").unwrap(), 7);
    assert_eq!(server_table.connection_count(), 0);

    server.shutdown();
}

#[test]
fn test_registry_over_shared_arena() {
    let arena = Arena::new(Role::Server);
    let registry = ConnectionRegistry::with_arena(NodeConfig::default(), arena.clone());
    assert!(Arc::ptr_eq(registry.arena(), &arena));
}
