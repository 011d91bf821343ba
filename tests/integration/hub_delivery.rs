//! Broadcast hub delivery scenarios

use node_monitoring::WsMessage;
use node_monitoring::hub::{CLIENT_QUEUE_CAPACITY, HubHandle};
use serde_json::json;
use tokio::sync::mpsc;

#[tokio::test]
async fn test_delivery_is_scoped_to_the_tagged_account() {
    let hub = HubHandle::spawn();

    let mut client_a = hub.register("a1", false).await.unwrap();
    let mut client_b = hub.register("a2", false).await.unwrap();

    hub.broadcast(WsMessage::new("a1", "x", json!({"n": 1})))
        .await
        .unwrap();

    let frame = client_a.outbound.recv().await.unwrap();
    let decoded: WsMessage = serde_json::from_str(&frame).unwrap();
    assert_eq!(decoded.account_id, "a1");
    assert_eq!(decoded.kind, "x");
    assert_eq!(decoded.payload, json!({"n": 1}));

    // Exactly one frame for C-A, none for C-B.
    assert!(
        tokio::time::timeout(
            std::time::Duration::from_millis(100),
            client_a.outbound.recv()
        )
        .await
        .is_err()
    );
    assert!(
        tokio::time::timeout(
            std::time::Duration::from_millis(100),
            client_b.outbound.recv()
        )
        .await
        .is_err()
    );
}

#[tokio::test]
async fn test_full_queue_evicts_client_but_sibling_receives() {
    let hub = HubHandle::spawn();

    // C-A never drains; C-A' of the same account drains continuously.
    let stuck = hub.register("a1", false).await.unwrap();
    let sibling = hub.register("a1", false).await.unwrap();

    let (fwd_tx, mut fwd_rx) = mpsc::unbounded_channel();
    let mut sibling_rx = sibling.outbound;
    tokio::spawn(async move {
        while let Some(frame) = sibling_rx.recv().await {
            let _ = fwd_tx.send(frame);
        }
    });

    for i in 0..=CLIENT_QUEUE_CAPACITY {
        hub.broadcast(WsMessage::new("a1", "node_metrics", json!({"seq": i})))
            .await
            .unwrap();
    }

    // The sibling sees the full burst, overflow frame included.
    for _ in 0..=CLIENT_QUEUE_CAPACITY {
        fwd_rx.recv().await.unwrap();
    }

    // The stuck client's queue was closed at eviction: its buffered
    // frames drain and then the channel reports closure.
    let mut stuck_rx = stuck.outbound;
    let mut drained = 0;
    while stuck_rx.recv().await.is_some() {
        drained += 1;
    }
    assert_eq!(drained, CLIENT_QUEUE_CAPACITY);
}
