use bytes::Bytes;
use parley_transport::{
    MemoryTransport, MemoryTransportConfig, TcpHub, TcpTransport, Transport, TransportError,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

struct Running {
    addr: SocketAddr,
    backend: Arc<MemoryTransport>,
    stop: oneshot::Sender<()>,
    hub: JoinHandle<()>,
}

async fn start_hub(backend: MemoryTransport) -> Running {
    let backend = Arc::new(backend);
    let hub = TcpHub::bind("127.0.0.1:0", backend.clone()).await.unwrap();
    let addr = hub.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let hub = tokio::spawn(hub.run_until(async {
        let _ = stopped.await;
    }));
    Running {
        addr,
        backend,
        stop,
        hub,
    }
}

async fn wait_for_subscribers(backend: &MemoryTransport, topic: &str, expected: usize) {
    timeout(Duration::from_secs(2), async {
        while backend.subscriber_count(topic) != expected {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn records_cross_the_connection_with_their_key() {
    let running = start_hub(MemoryTransport::new()).await;
    let alice = TcpTransport::connect(running.addr).await.unwrap();
    let bob = TcpTransport::connect(running.addr).await.unwrap();

    let mut sub = bob.subscribe("rpcResponseTopic").await.unwrap();
    alice
        .publish("rpcResponseTopic", Some("id-1"), Bytes::from_static(b"hello"))
        .await
        .unwrap();

    let record = timeout(Duration::from_secs(2), sub.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.topic, "rpcResponseTopic");
    assert_eq!(record.key(), Some("id-1"));
    assert_eq!(record.text(), "hello");
    assert_eq!(alice.name(), "tcp");
}

#[tokio::test]
async fn hub_side_records_reach_remote_subscribers_in_order() {
    let running = start_hub(MemoryTransport::new()).await;
    let client = TcpTransport::connect(running.addr).await.unwrap();
    let mut sub = client.subscribe("ordered").await.unwrap();

    for i in 0..50u32 {
        running
            .backend
            .publish("ordered", None, Bytes::from(i.to_string()))
            .await
            .unwrap();
    }

    for i in 0..50u32 {
        let record = timeout(Duration::from_secs(2), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.text(), i.to_string());
    }
}

#[tokio::test]
async fn invalid_topic_fails_locally() {
    let running = start_hub(MemoryTransport::new()).await;
    let client = TcpTransport::connect(running.addr).await.unwrap();

    let result = client.publish("bad topic", None, Bytes::new()).await;
    assert!(matches!(result, Err(TransportError::InvalidTopic { .. })));
    assert!(client.subscribe("").await.is_err());
}

#[tokio::test]
async fn hub_rejections_come_back_as_remote_errors() {
    let running = start_hub(MemoryTransport::with_config(MemoryTransportConfig {
        max_payload_size: 8,
        ..Default::default()
    }))
    .await;
    let client = TcpTransport::connect(running.addr).await.unwrap();

    let result = client
        .publish("small", None, Bytes::from_static(b"far too large"))
        .await;
    match result {
        Err(TransportError::Remote(reason)) => assert!(reason.contains("exceeds maximum")),
        other => panic!("expected a remote rejection, got {other:?}"),
    }

    // The connection stays usable.
    client
        .publish("small", None, Bytes::from_static(b"ok"))
        .await
        .unwrap();
}

#[tokio::test]
async fn dropping_a_subscription_releases_it_on_the_hub() {
    let running = start_hub(MemoryTransport::new()).await;
    let client = TcpTransport::connect(running.addr).await.unwrap();

    let first = client.subscribe("general").await.unwrap();
    let mut second = client.subscribe("general").await.unwrap();
    wait_for_subscribers(&running.backend, "general", 2).await;

    drop(first);
    wait_for_subscribers(&running.backend, "general", 1).await;

    second.close().await;
    assert!(!second.is_open());
    wait_for_subscribers(&running.backend, "general", 0).await;
}

#[tokio::test]
async fn disconnecting_releases_every_subscription() {
    let running = start_hub(MemoryTransport::new()).await;
    let client = TcpTransport::connect(running.addr).await.unwrap();

    let _a = client.subscribe("one").await.unwrap();
    let _b = client.subscribe("two").await.unwrap();
    wait_for_subscribers(&running.backend, "one", 1).await;

    client.close();
    assert!(!client.is_healthy());
    assert!(matches!(
        client.publish("one", None, Bytes::new()).await,
        Err(TransportError::Closed)
    ));

    wait_for_subscribers(&running.backend, "one", 0).await;
    wait_for_subscribers(&running.backend, "two", 0).await;
}

#[tokio::test]
async fn hub_shutdown_ends_remote_subscriptions() {
    let running = start_hub(MemoryTransport::new()).await;
    let client = TcpTransport::connect(running.addr).await.unwrap();
    let mut sub = client.subscribe("general").await.unwrap();

    running.stop.send(()).unwrap();
    running.hub.await.unwrap();

    let end = timeout(Duration::from_secs(2), sub.recv()).await.unwrap();
    assert!(end.is_none());
    assert!(!sub.is_open());

    timeout(Duration::from_secs(2), async {
        while client.is_healthy() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn connect_to_nothing_fails() {
    let running = start_hub(MemoryTransport::new()).await;
    let addr = running.addr;
    running.stop.send(()).unwrap();
    running.hub.await.unwrap();

    assert!(matches!(
        TcpTransport::connect(addr).await,
        Err(TransportError::Io(_))
    ));
}

#[tokio::test]
async fn dropping_the_transport_ends_its_subscriptions() {
    let running = start_hub(MemoryTransport::new()).await;
    let client = TcpTransport::connect(running.addr).await.unwrap();
    let mut sub = client.subscribe("general").await.unwrap();

    drop(client);

    let end = timeout(Duration::from_secs(2), sub.recv()).await.unwrap();
    assert!(end.is_none());
    wait_for_subscribers(&running.backend, "general", 0).await;
}
