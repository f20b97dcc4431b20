//! Listen and restoration integration tests
//!
//! These cover the durable side of the link:
//! 1. Listen streams and their persisted entries
//! 2. Cancellation, explicit and disconnect-driven
//! 3. Restoration snapshots consumed at relaunch
//! 4. Reconciling persisted listens once the radio comes back
//!
//! Run with: cargo test --test integration_listen_restore

mod common;

use common::{settle, FakeTransport};
use lariat_core::{
    value_channel, CharacteristicId, LinkConfig, LinkError, ListenRestorer, ListenStore,
    Peripheral, PeripheralId, PeripheralLink, RestorationSnapshot, ServiceId, SnapshotState,
    ValueSink, ValueStream,
};
use parking_lot::Mutex;
use std::sync::Arc;

fn spawn_link(
    transport: &Arc<FakeTransport>,
    store: &Arc<ListenStore>,
    config: LinkConfig,
) -> PeripheralLink {
    let link = PeripheralLink::spawn(transport.clone(), store.clone(), config);
    transport.attach(link.event_sink());
    link
}

async fn connected_link() -> (
    PeripheralLink,
    Arc<FakeTransport>,
    Arc<ListenStore>,
    Peripheral,
) {
    let transport = FakeTransport::new();
    let store = Arc::new(ListenStore::memory());
    let peripheral = Peripheral::named(PeripheralId::random(), "thermo-1");
    transport.add_peripheral(peripheral.clone());
    let link = spawn_link(&transport, &store, LinkConfig::default());
    link.connect(peripheral.id)
        .await
        .expect("connect must succeed");
    (link, transport, store, peripheral)
}

fn characteristic() -> CharacteristicId {
    CharacteristicId::random(ServiceId::random())
}

/// Restorer that re-adopts exactly one characteristic and keeps the stream
/// half so the test can watch delivered values.
struct ConfirmingRestorer {
    confirmed: CharacteristicId,
    stream: Mutex<Option<ValueStream>>,
}

impl ConfirmingRestorer {
    fn new(confirmed: CharacteristicId) -> Arc<Self> {
        Arc::new(Self {
            confirmed,
            stream: Mutex::new(None),
        })
    }

    fn take_stream(&self) -> Option<ValueStream> {
        self.stream.lock().take()
    }
}

impl ListenRestorer for ConfirmingRestorer {
    fn restore(&self, characteristic: &CharacteristicId) -> Option<ValueSink> {
        if *characteristic != self.confirmed {
            return None;
        }
        let (sink, stream) = value_channel();
        *self.stream.lock() = Some(stream);
        Some(sink)
    }
}

#[tokio::test]
async fn test_listen_delivers_values_in_order() {
    let (link, transport, store, _) = connected_link().await;
    let c = characteristic();

    let mut stream = link.listen(c).await.expect("listen must succeed");
    assert!(store.contains(&c).expect("store must be readable"));

    transport.notify(c, vec![1]);
    transport.notify(c, vec![2]);

    assert_eq!(stream.next().await.unwrap().unwrap(), vec![1]);
    assert_eq!(stream.next().await.unwrap().unwrap(), vec![2]);
}

#[tokio::test]
async fn test_cancel_listen_notifies_owner_and_removes_entry() {
    let (link, transport, store, _) = connected_link().await;
    let c = characteristic();

    let mut stream = link.listen(c).await.expect("listen must succeed");
    link.cancel_listen(c, true)
        .await
        .expect("cancel-listen must succeed");

    assert!(matches!(stream.next().await, Some(Err(LinkError::Cancelled))));
    assert!(!store.contains(&c).expect("store must be readable"));
    assert!(transport.calls().contains(&format!("notify {c} false")));
}

#[tokio::test]
async fn test_disconnect_cancels_listens_and_purges_persisted_entries() {
    let (link, _, store, _) = connected_link().await;
    let c = characteristic();

    let mut stream = link.listen(c).await.expect("listen must succeed");
    assert_eq!(store.count(), 1);

    link.disconnect().await.expect("disconnect must succeed");

    assert!(matches!(stream.next().await, Some(Err(LinkError::Cancelled))));
    assert_eq!(store.count(), 0);
}

#[tokio::test]
async fn test_unexpected_drop_keeps_persisted_entries() {
    let (link, transport, store, peripheral) = connected_link().await;
    let c = characteristic();

    let mut stream = link.listen(c).await.expect("listen must succeed");
    transport.drop_connection(peripheral.id, "link lost");
    settle().await;

    // the stream fails, but the durable entry stays for restoration
    assert!(matches!(
        stream.next().await,
        Some(Err(LinkError::UnexpectedDisconnect))
    ));
    assert!(store.contains(&c).expect("store must be readable"));
    assert!(link.is_connected(), "auto-reconnect should have kicked in");
}

#[tokio::test]
async fn test_reconciliation_restores_confirmed_and_cancels_stale() {
    let transport = FakeTransport::new();
    let store = Arc::new(ListenStore::memory());
    let peripheral = Peripheral::named(PeripheralId::random(), "thermo-1");
    let kept = characteristic();
    let stale = characteristic();
    store.insert(&kept).expect("seed insert must succeed");
    store.insert(&stale).expect("seed insert must succeed");

    let link = spawn_link(
        &transport,
        &store,
        LinkConfig {
            awaiting_restoration: true,
            ..LinkConfig::default()
        },
    );
    let restorer = ConfirmingRestorer::new(kept);
    link.set_listen_restorer(restorer.clone())
        .await
        .expect("set restorer must succeed");
    link.resume(RestorationSnapshot::with_peripheral(
        peripheral.clone(),
        SnapshotState::Connected,
    ))
    .await
    .expect("resume must succeed");
    assert!(link.is_connected());

    transport.set_available(true);
    settle().await;

    // the stale entry was unsubscribed and forgotten
    assert!(transport.calls().contains(&format!("notify {stale} false")));
    assert!(!store.contains(&stale).expect("store must be readable"));

    // the confirmed listen survived without a fresh subscribe request
    assert!(store.contains(&kept).expect("store must be readable"));
    assert!(!transport.calls().contains(&format!("notify {kept} true")));
    let mut stream = restorer
        .take_stream()
        .expect("restorer should have been consulted for the kept listen");
    transport.notify(kept, vec![0x2A]);
    assert_eq!(stream.next().await.unwrap().unwrap(), vec![0x2A]);
}

#[tokio::test]
async fn test_reconciliation_without_restorer_cancels_all_entries() {
    let transport = FakeTransport::new();
    let store = Arc::new(ListenStore::memory());
    let peripheral = Peripheral::new(PeripheralId::random());
    let first = characteristic();
    let second = characteristic();
    store.insert(&first).expect("seed insert must succeed");
    store.insert(&second).expect("seed insert must succeed");

    let link = spawn_link(
        &transport,
        &store,
        LinkConfig {
            awaiting_restoration: true,
            ..LinkConfig::default()
        },
    );
    link.resume(RestorationSnapshot::with_peripheral(
        peripheral,
        SnapshotState::Connected,
    ))
    .await
    .expect("resume must succeed");
    transport.set_available(true);
    settle().await;

    assert_eq!(store.count(), 0);
    let calls = transport.calls();
    assert!(calls.contains(&format!("notify {first} false")));
    assert!(calls.contains(&format!("notify {second} false")));
}

#[tokio::test]
async fn test_live_listens_are_not_touched_by_reconciliation() {
    let (link, transport, store, _) = connected_link().await;
    let c = characteristic();
    let mut stream = link.listen(c).await.expect("listen must succeed");

    // availability bounce while the listen is live in memory
    transport.set_available(true);
    settle().await;

    assert!(store.contains(&c).expect("store must be readable"));
    transport.notify(c, vec![9]);
    assert_eq!(stream.next().await.unwrap().unwrap(), vec![9]);
    // no cancel went out for it
    assert!(!transport.calls().contains(&format!("notify {c} false")));
}

#[tokio::test]
async fn test_deferred_connect_replays_after_restoration() {
    let transport = FakeTransport::new();
    let store = Arc::new(ListenStore::memory());
    let peripheral = Peripheral::named(PeripheralId::random(), "thermo-1");
    transport.add_peripheral(peripheral.clone());
    let link = spawn_link(
        &transport,
        &store,
        LinkConfig {
            awaiting_restoration: true,
            ..LinkConfig::default()
        },
    );

    // connect arrives before the snapshot: it parks without a result
    let early = link.clone();
    let target = peripheral.id;
    let parked = tokio::spawn(async move { early.connect(target).await });
    settle().await;
    assert_eq!(transport.connect_attempts(), 0);

    link.resume(RestorationSnapshot::empty())
        .await
        .expect("resume must succeed");

    let outcome = parked.await.expect("connect task must not panic");
    assert_eq!(outcome.expect("deferred connect must succeed"), peripheral);
    assert!(link.is_connected());
}

#[tokio::test]
async fn test_resume_adopts_connected_peripheral_without_reconnecting() {
    let transport = FakeTransport::new();
    let store = Arc::new(ListenStore::memory());
    let peripheral = Peripheral::named(PeripheralId::random(), "thermo-1");
    let link = spawn_link(
        &transport,
        &store,
        LinkConfig {
            awaiting_restoration: true,
            ..LinkConfig::default()
        },
    );

    link.resume(RestorationSnapshot::with_peripheral(
        peripheral.clone(),
        SnapshotState::Connected,
    ))
    .await
    .expect("resume must succeed");

    assert!(link.is_connected());
    assert_eq!(transport.connect_attempts(), 0);

    // the restored queue is immediately usable
    let c = characteristic();
    transport.set_read_value(c, vec![7, 7]);
    assert_eq!(link.read(c).await.expect("read must succeed"), vec![7, 7]);
}

#[tokio::test]
async fn test_restore_listen_skips_the_subscribe_request() {
    let (link, transport, _, _) = connected_link().await;
    let c = characteristic();

    let mut stream = link
        .restore_listen(c)
        .await
        .expect("restore-listen must succeed");

    assert!(!transport.calls().contains(&format!("notify {c} true")));
    transport.notify(c, vec![5]);
    assert_eq!(stream.next().await.unwrap().unwrap(), vec![5]);
}

#[tokio::test]
async fn test_resume_is_consumed_exactly_once() {
    let transport = FakeTransport::new();
    let store = Arc::new(ListenStore::memory());
    let link = spawn_link(
        &transport,
        &store,
        LinkConfig {
            awaiting_restoration: true,
            ..LinkConfig::default()
        },
    );

    link.resume(RestorationSnapshot::empty())
        .await
        .expect("first resume must succeed");
    let second = link.resume(RestorationSnapshot::empty()).await;
    assert!(matches!(second, Err(LinkError::InvalidState(_))));
}

#[tokio::test]
async fn test_scan_waits_for_restoration_to_complete() {
    let transport = FakeTransport::new();
    let store = Arc::new(ListenStore::memory());
    let peripheral = Peripheral::named(PeripheralId::random(), "thermo-1");
    transport.add_peripheral(peripheral.clone());
    let link = spawn_link(
        &transport,
        &store,
        LinkConfig {
            awaiting_restoration: true,
            ..LinkConfig::default()
        },
    );

    let denied = link.scan(ServiceId::random()).await;
    assert!(matches!(denied, Err(LinkError::InvalidState(_))));
    assert!(transport.calls().is_empty(), "no scan may reach the radio");

    // the snapshot still lands afterwards and brings the peripheral back
    link.resume(RestorationSnapshot::with_peripheral(
        peripheral.clone(),
        SnapshotState::Connected,
    ))
    .await
    .expect("resume must succeed");
    assert!(link.is_connected());
}
