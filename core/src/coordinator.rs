// Connection coordinator — the single source of truth for connection state
//
// All state lives inside one task that consumes a command channel. Public
// calls and transport events are both commands on that channel, so every
// mutation happens in submission order on one context and the state machine
// never races itself. The `PeripheralLink` handle is the cheap, cloneable
// front door; it sends a command and waits on a per-call reply channel.

use crate::host::{LifecycleExtension, ListenRestorer, NoLifecycleExtension};
use crate::observers::{LinkObserver, ObserverRegistry};
use crate::queue::{respond, Operation, OperationQueue, Reply};
use crate::store::ListenStore;
use crate::transport::{Transport, TransportEvent};
use crate::types::{
    CharacteristicId, ConnectionState, Peripheral, PeripheralId, RestorationSnapshot, ServiceId,
    SnapshotState,
};
use crate::value::{Payload, ValueStream};
use crate::{LinkConfig, LinkError, LinkResult};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub(crate) enum Command {
    RegisterObserver {
        observer: Arc<dyn LinkObserver>,
        reply: Reply<()>,
    },
    UnregisterObserver {
        observer: Arc<dyn LinkObserver>,
        reply: Reply<()>,
    },
    Scan {
        service: ServiceId,
        reply: Reply<Peripheral>,
    },
    CancelScan {
        reply: Reply<()>,
    },
    Connect {
        id: PeripheralId,
        reply: Reply<Peripheral>,
    },
    Disconnect {
        reply: Reply<()>,
    },
    CancelAllConnections {
        reply: Reply<()>,
    },
    Read {
        characteristic: CharacteristicId,
        reply: Reply<Vec<u8>>,
    },
    Write {
        characteristic: CharacteristicId,
        value: Vec<u8>,
        reply: Reply<()>,
    },
    Listen {
        characteristic: CharacteristicId,
        reply: Reply<ValueStream>,
    },
    CancelListen {
        characteristic: CharacteristicId,
        notify_owner: bool,
        reply: Reply<()>,
    },
    RestoreListen {
        characteristic: CharacteristicId,
        reply: Reply<ValueStream>,
    },
    SetListenRestorer {
        restorer: Arc<dyn ListenRestorer>,
        reply: Reply<()>,
    },
    Resume {
        snapshot: RestorationSnapshot,
        reply: Reply<()>,
    },
    Shutdown {
        reply: Reply<()>,
    },
    Transport(TransportEvent),
}

/// The one outstanding scan or connect request. `reply` is absent for
/// requests the coordinator issued itself (auto-reconnect), whose outcome
/// nobody is waiting on.
struct Pending {
    reply: Option<Reply<Peripheral>>,
}

impl Pending {
    fn resolve(self, peripheral: Peripheral) {
        if let Some(reply) = self.reply {
            respond(reply, Ok(peripheral));
        }
    }

    fn fail(self, error: LinkError) {
        if let Some(reply) = self.reply {
            respond(reply, Err(error));
        }
    }
}

/// A connect request parked while a restoration snapshot is still owed.
struct DeferredConnect {
    id: PeripheralId,
    reply: Reply<Peripheral>,
}

enum Phase {
    Idle,
    Scanning {
        service: ServiceId,
    },
    Connecting {
        peripheral: Peripheral,
    },
    /// The queue owns the connected peripheral handle.
    Connected {
        queue: OperationQueue,
    },
    Disconnecting {
        peripheral: Peripheral,
    },
}

pub(crate) struct LinkStatus {
    pub(crate) available: bool,
    pub(crate) state: ConnectionState,
}

struct Coordinator {
    transport: Arc<dyn Transport>,
    store: Arc<ListenStore>,
    lifecycle: Arc<dyn LifecycleExtension>,
    observers: ObserverRegistry,
    restorer: Option<Arc<dyn ListenRestorer>>,
    phase: Phase,
    pending: Option<Pending>,
    deferred: Option<DeferredConnect>,
    auto_reconnect: bool,
    restoring: bool,
    available: bool,
    rx: mpsc::UnboundedReceiver<Command>,
    status: Arc<RwLock<LinkStatus>>,
}

impl Coordinator {
    async fn run(mut self) {
        info!("connection coordinator running");
        while let Some(command) = self.rx.recv().await {
            if self.handle_command(command) {
                break;
            }
        }
        info!("connection coordinator stopped");
    }

    /// Returns true when the coordinator should stop.
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::RegisterObserver { observer, reply } => {
                let connected = self.connected_peripheral();
                self.observers
                    .register(&observer, self.available, connected.as_ref());
                respond(reply, Ok(()));
            }
            Command::UnregisterObserver { observer, reply } => {
                self.observers.unregister(&observer);
                respond(reply, Ok(()));
            }
            Command::Scan { service, reply } => self.handle_scan(service, reply),
            Command::CancelScan { reply } => self.handle_cancel_scan(reply),
            Command::Connect { id, reply } => self.handle_connect(id, reply),
            Command::Disconnect { reply } => self.handle_disconnect(reply),
            Command::CancelAllConnections { reply } => {
                self.cancel_all_connections();
                respond(reply, Ok(()));
            }
            Command::Read {
                characteristic,
                reply,
            } => self.enqueue_or_reject(
                Operation::Read {
                    characteristic,
                    reply,
                },
            ),
            Command::Write {
                characteristic,
                value,
                reply,
            } => self.enqueue_or_reject(Operation::Write {
                characteristic,
                value,
                reply,
            }),
            Command::Listen {
                characteristic,
                reply,
            } => self.enqueue_or_reject(Operation::Listen {
                characteristic,
                reply,
            }),
            Command::CancelListen {
                characteristic,
                notify_owner,
                reply,
            } => self.enqueue_or_reject(Operation::CancelListen {
                characteristic,
                notify_owner,
                reply: Some(reply),
            }),
            Command::RestoreListen {
                characteristic,
                reply,
            } => self.enqueue_or_reject(Operation::RestoreListen {
                characteristic,
                sink: None,
                reply: Some(reply),
            }),
            Command::SetListenRestorer { restorer, reply } => {
                self.restorer = Some(restorer);
                respond(reply, Ok(()));
            }
            Command::Resume { snapshot, reply } => {
                self.lifecycle.begin();
                self.handle_resume(snapshot, reply);
                self.lifecycle.end();
            }
            Command::Shutdown { reply } => {
                self.handle_shutdown(reply);
                return true;
            }
            Command::Transport(event) => {
                self.lifecycle.begin();
                self.handle_transport_event(event);
                self.lifecycle.end();
            }
        }
        false
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::AvailabilityChanged { available } => {
                self.handle_availability(available)
            }
            TransportEvent::Discovered { peripheral } => self.handle_discovered(peripheral),
            TransportEvent::Connected { id } => self.handle_connected(id),
            TransportEvent::Disconnected { id, reason } => self.handle_disconnected(id, reason),
            TransportEvent::FailedToConnect { id, reason } => {
                self.handle_failed_to_connect(id, reason)
            }
            // characteristic traffic belongs to the active queue
            event => match &mut self.phase {
                Phase::Connected { queue } => queue.handle_event(event),
                _ => debug!("dropping characteristic event with no connection: {event:?}"),
            },
        }
    }

    fn handle_scan(&mut self, service: ServiceId, reply: Reply<Peripheral>) {
        if self.pending.is_some() {
            respond(
                reply,
                Err(LinkError::InvalidState(
                    "another scan or connect is already outstanding".into(),
                )),
            );
            return;
        }
        // the snapshot decides the link's starting point; scanning before it
        // lands would race the restored connection
        if self.restoring {
            respond(
                reply,
                Err(LinkError::InvalidState(
                    "restoration is pending; scanning is not available yet".into(),
                )),
            );
            return;
        }
        if !matches!(self.phase, Phase::Idle) {
            respond(
                reply,
                Err(LinkError::InvalidState(format!(
                    "cannot scan while {}",
                    self.public_state()
                ))),
            );
            return;
        }
        info!("scanning for service {service}");
        self.pending = Some(Pending { reply: Some(reply) });
        self.phase = Phase::Scanning { service };
        self.transport.scan_for_peripherals(service);
        self.publish_status();
    }

    fn handle_cancel_scan(&mut self, reply: Reply<()>) {
        if let Phase::Scanning { .. } = self.phase {
            self.transport.stop_scan();
            if let Some(pending) = self.pending.take() {
                pending.fail(LinkError::Cancelled);
            }
            self.phase = Phase::Idle;
            debug!("scan cancelled");
        } else {
            debug!("cancel-scan with no scan in progress");
        }
        self.publish_status();
        respond(reply, Ok(()));
    }

    fn handle_connect(&mut self, id: PeripheralId, reply: Reply<Peripheral>) {
        if self.pending.is_some() {
            respond(
                reply,
                Err(LinkError::InvalidState(
                    "another scan or connect is already outstanding".into(),
                )),
            );
            return;
        }
        if self.restoring {
            if self.deferred.is_some() {
                respond(
                    reply,
                    Err(LinkError::InvalidState(
                        "a connect request is already deferred for restoration".into(),
                    )),
                );
            } else {
                debug!("deferring connect to {id} until restoration completes");
                self.deferred = Some(DeferredConnect { id, reply });
            }
            return;
        }
        match &mut self.phase {
            Phase::Connected { queue } if queue.peripheral().id == id => {
                let peripheral = queue.peripheral().clone();
                debug!("already connected to {id}");
                respond(reply, Ok(peripheral));
            }
            Phase::Connected { queue } => {
                // switching peripherals tears the current connection down
                // first; persisted listen entries stay for later restoration
                let old = queue.peripheral().clone();
                info!("switching connection from {} to {id}", old.id);
                queue.cancel_all(LinkError::Cancelled);
                self.transport.cancel_connection(&old);
                self.observers.notify_disconnected(&old);
                self.phase = Phase::Idle;
                self.start_connect(id, Some(reply));
            }
            Phase::Connecting { peripheral } if peripheral.id == id => {
                debug!("adopting in-flight connect to {id}");
                self.pending = Some(Pending { reply: Some(reply) });
            }
            Phase::Scanning { .. } | Phase::Connecting { .. } | Phase::Disconnecting { .. } => {
                respond(
                    reply,
                    Err(LinkError::InvalidState(format!(
                        "cannot connect while {}",
                        self.public_state()
                    ))),
                );
            }
            Phase::Idle => self.start_connect(id, Some(reply)),
        }
        self.publish_status();
    }

    /// Resolve the identifier through the transport and issue the connect.
    fn start_connect(&mut self, id: PeripheralId, reply: Option<Reply<Peripheral>>) {
        let Some(peripheral) = self.transport.retrieve_peripheral(id) else {
            warn!("peripheral {id} is not known to the transport");
            if let Some(reply) = reply {
                respond(reply, Err(LinkError::UnknownPeripheral(id)));
            }
            return;
        };
        info!("connecting to {peripheral}");
        self.pending = Some(Pending { reply });
        self.phase = Phase::Connecting {
            peripheral: peripheral.clone(),
        };
        self.transport.connect(&peripheral);
    }

    fn handle_disconnect(&mut self, reply: Reply<()>) {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Connected { mut queue } => {
                let peripheral = queue.peripheral().clone();
                info!("disconnecting from {}", peripheral.id);
                self.auto_reconnect = false;
                self.pending = None;
                let persisted = queue.cancel_all(LinkError::Cancelled);
                for characteristic in &persisted {
                    if let Err(e) = self.store.remove(characteristic) {
                        warn!("failed to drop persisted listen for {characteristic}: {e}");
                    }
                }
                self.phase = Phase::Disconnecting {
                    peripheral: peripheral.clone(),
                };
                self.transport.cancel_connection(&peripheral);
            }
            other => {
                self.phase = other;
                debug!("disconnect requested with no connected peripheral");
            }
        }
        self.publish_status();
        respond(reply, Ok(()));
    }

    /// Tear down whatever connection activity is in progress, failing every
    /// outstanding completion with `UnexpectedDisconnect`. Persisted listen
    /// entries are left alone so a later restoration can reconcile them.
    /// Returns the peripheral that was connecting or connected, if any.
    fn cancel_all_connections(&mut self) -> Option<Peripheral> {
        if let Some(pending) = self.pending.take() {
            pending.fail(LinkError::UnexpectedDisconnect);
        }
        let peripheral = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => None,
            Phase::Scanning { .. } => {
                self.transport.stop_scan();
                None
            }
            Phase::Connecting { peripheral } => Some(peripheral),
            Phase::Connected { mut queue } => {
                queue.cancel_all(LinkError::UnexpectedDisconnect);
                let peripheral = queue.peripheral().clone();
                self.observers.notify_disconnected(&peripheral);
                Some(peripheral)
            }
            Phase::Disconnecting { peripheral } => {
                self.observers.notify_disconnected(&peripheral);
                Some(peripheral)
            }
        };
        self.publish_status();
        peripheral
    }

    fn handle_availability(&mut self, available: bool) {
        info!("transport availability changed: {available}");
        self.available = available;
        if available {
            if matches!(self.phase, Phase::Connected { .. }) {
                self.reconcile_listens();
            }
        } else {
            match &self.phase {
                Phase::Connecting { peripheral } => {
                    self.transport.cancel_connection(peripheral);
                }
                Phase::Connected { queue } => {
                    self.transport.cancel_connection(queue.peripheral());
                }
                _ => {}
            }
            self.cancel_all_connections();
        }
        self.observers.notify_availability(available);
        if available {
            if let Phase::Connected { queue } = &self.phase {
                let peripheral = queue.peripheral().clone();
                self.observers.notify_connected(&peripheral);
            }
        }
        self.publish_status();
    }

    /// Reconcile persisted listen intent with actual callback availability.
    /// Entries whose listen is already live in memory are untouched; the
    /// rest are either re-adopted through the restorer or cancelled so the
    /// platform-side subscription and the durable entry both go away.
    fn reconcile_listens(&mut self) {
        let Phase::Connected { queue } = &mut self.phase else {
            return;
        };
        let entries = match self.store.entries() {
            Ok(entries) => entries,
            Err(e) => {
                warn!("cannot read persisted listens: {e}");
                return;
            }
        };
        for entry in entries {
            let characteristic = entry.characteristic;
            if queue.has_listen(&characteristic) {
                continue;
            }
            match self.restorer.as_ref().and_then(|r| r.restore(&characteristic)) {
                Some(sink) => {
                    debug!("restoring listen on {characteristic}");
                    queue.enqueue(Operation::RestoreListen {
                        characteristic,
                        sink: Some(sink),
                        reply: None,
                    });
                }
                None => {
                    debug!("no handler to restore listen on {characteristic}, cancelling");
                    queue.enqueue(Operation::CancelListen {
                        characteristic,
                        notify_owner: false,
                        reply: None,
                    });
                }
            }
        }
    }

    fn handle_discovered(&mut self, peripheral: Peripheral) {
        if let Phase::Scanning { .. } = self.phase {
            info!("discovered {peripheral}");
            self.transport.stop_scan();
            self.transport.connect(&peripheral);
            // the scan's completion now waits for the connect outcome
            self.phase = Phase::Connecting { peripheral };
            self.publish_status();
        } else {
            debug!("ignoring discovery of {} outside a scan", peripheral.id);
        }
    }

    fn handle_connected(&mut self, id: PeripheralId) {
        match &self.phase {
            Phase::Connecting { peripheral } if peripheral.id == id => {
                let peripheral = peripheral.clone();
                info!("✅ connected to {}", peripheral.id);
                self.phase = Phase::Connected {
                    queue: OperationQueue::new(
                        self.transport.clone(),
                        self.store.clone(),
                        peripheral.clone(),
                    ),
                };
                self.auto_reconnect = true;
                // status goes out before the completion so a woken caller
                // already reads the connected state
                self.publish_status();
                if let Some(pending) = self.pending.take() {
                    pending.resolve(peripheral.clone());
                }
                self.observers.notify_connected(&peripheral);
            }
            _ => warn!("connected event for {id} with no matching attempt"),
        }
    }

    fn handle_disconnected(&mut self, id: PeripheralId, reason: Option<String>) {
        match &self.phase {
            Phase::Connected { queue } if queue.peripheral().id == id => {
                match &reason {
                    Some(reason) => warn!("connection to {id} dropped: {reason}"),
                    None => warn!("connection to {id} dropped"),
                }
                let peripheral = self.cancel_all_connections();
                if self.auto_reconnect {
                    if let Some(peripheral) = peripheral {
                        self.reconnect(peripheral);
                    }
                }
            }
            // a drop can land while the connection is still being set up;
            // the id guard keeps stale confirmations from switched or
            // already torn-down peripherals out of this arm
            Phase::Connecting { peripheral } if peripheral.id == id => {
                warn!(
                    "connection attempt to {id} dropped: {}",
                    reason.as_deref().unwrap_or("no reason given")
                );
                let peripheral = self.cancel_all_connections();
                if self.auto_reconnect {
                    if let Some(peripheral) = peripheral {
                        self.reconnect(peripheral);
                    }
                }
            }
            Phase::Disconnecting { peripheral } if peripheral.id == id => {
                debug!("disconnection from {id} confirmed");
                let peripheral = peripheral.clone();
                self.phase = Phase::Idle;
                self.observers.notify_disconnected(&peripheral);
                self.publish_status();
            }
            _ => warn!("disconnect event for {id} with no matching connection"),
        }
    }

    fn handle_failed_to_connect(&mut self, id: PeripheralId, reason: Option<String>) {
        match &self.phase {
            Phase::Connecting { peripheral } if peripheral.id == id => {
                warn!(
                    "failed to connect to {id}: {}",
                    reason.as_deref().unwrap_or("no reason given")
                );
                let peripheral = self.cancel_all_connections();
                if self.auto_reconnect {
                    if let Some(peripheral) = peripheral {
                        self.reconnect(peripheral);
                    }
                }
            }
            _ => warn!("connect failure for {id} with no matching attempt"),
        }
    }

    fn reconnect(&mut self, peripheral: Peripheral) {
        info!("auto-reconnecting to {}", peripheral.id);
        self.pending = Some(Pending { reply: None });
        self.transport.connect(&peripheral);
        self.phase = Phase::Connecting { peripheral };
        self.publish_status();
    }

    fn handle_resume(&mut self, snapshot: RestorationSnapshot, reply: Reply<()>) {
        if !self.restoring {
            warn!("resume called but no restoration was pending");
            respond(
                reply,
                Err(LinkError::InvalidState("no restoration pending".into())),
            );
            return;
        }
        // scan and connect are both held off while restoring, so the phase
        // must still be Idle here; the rejection leaves the latch set
        if snapshot.peripheral.is_some() && !matches!(self.phase, Phase::Idle) {
            debug_assert!(
                false,
                "restoration with connection activity already in progress"
            );
            respond(
                reply,
                Err(LinkError::InvalidState(
                    "restoration with connection activity already in progress".into(),
                )),
            );
            return;
        }
        self.restoring = false;
        match snapshot.peripheral {
            None => debug!("restoration snapshot names no peripheral"),
            Some(peripheral) => {
                info!("restoring {} from snapshot ({:?})", peripheral.id, snapshot.state);
                self.phase = match snapshot.state {
                    SnapshotState::Connecting => Phase::Connecting { peripheral },
                    SnapshotState::Connected => Phase::Connected {
                        queue: OperationQueue::new(
                            self.transport.clone(),
                            self.store.clone(),
                            peripheral,
                        ),
                    },
                    SnapshotState::Disconnecting => Phase::Disconnecting { peripheral },
                    SnapshotState::Disconnected => Phase::Idle,
                };
            }
        }
        if let Some(DeferredConnect { id, reply: deferred }) = self.deferred.take() {
            debug!("replaying deferred connect to {id}");
            self.handle_connect(id, deferred);
        }
        self.publish_status();
        respond(reply, Ok(()));
    }

    fn handle_shutdown(&mut self, reply: Reply<()>) {
        info!("shutting down peripheral link");
        if let Some(pending) = self.pending.take() {
            pending.fail(LinkError::Cancelled);
        }
        if let Some(deferred) = self.deferred.take() {
            respond(deferred.reply, Err(LinkError::Cancelled));
        }
        if let Phase::Connected { queue } = &mut self.phase {
            queue.cancel_all(LinkError::Cancelled);
        }
        self.phase = Phase::Idle;
        self.publish_status();
        respond(reply, Ok(()));
    }

    fn enqueue_or_reject(&mut self, op: Operation) {
        match &mut self.phase {
            Phase::Connected { queue } => queue.enqueue(op),
            _ => op.fail(LinkError::NotConnected),
        }
    }

    fn connected_peripheral(&self) -> Option<Peripheral> {
        match &self.phase {
            Phase::Connected { queue } => Some(queue.peripheral().clone()),
            _ => None,
        }
    }

    fn public_state(&self) -> ConnectionState {
        match &self.phase {
            Phase::Idle => ConnectionState::Idle,
            Phase::Scanning { .. } => ConnectionState::Scanning,
            Phase::Connecting { peripheral } => ConnectionState::Connecting(peripheral.clone()),
            Phase::Connected { queue } => ConnectionState::Connected(queue.peripheral().clone()),
            Phase::Disconnecting { .. } => ConnectionState::Disconnecting,
        }
    }

    fn publish_status(&self) {
        *self.status.write() = LinkStatus {
            available: self.available,
            state: self.public_state(),
        };
    }
}

/// Feeds transport events into the coordinator. Hand one of these to the
/// transport integration; events are queued in arrival order behind the
/// same channel as public calls.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Command>,
}

impl EventSink {
    pub fn emit(&self, event: TransportEvent) {
        if self.tx.send(Command::Transport(event)).is_err() {
            debug!("transport event dropped after shutdown");
        }
    }
}

/// Handle to a running connection coordinator. Cloneable; all clones talk
/// to the same underlying task.
#[derive(Clone)]
pub struct PeripheralLink {
    tx: mpsc::UnboundedSender<Command>,
    status: Arc<RwLock<LinkStatus>>,
}

impl PeripheralLink {
    /// Spawn a coordinator with no lifecycle extension.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        store: Arc<ListenStore>,
        config: LinkConfig,
    ) -> Self {
        Self::spawn_with_lifecycle(transport, store, Arc::new(NoLifecycleExtension), config)
    }

    pub fn spawn_with_lifecycle(
        transport: Arc<dyn Transport>,
        store: Arc<ListenStore>,
        lifecycle: Arc<dyn LifecycleExtension>,
        config: LinkConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let status = Arc::new(RwLock::new(LinkStatus {
            available: false,
            state: ConnectionState::Idle,
        }));
        let coordinator = Coordinator {
            transport,
            store,
            lifecycle,
            observers: ObserverRegistry::new(),
            restorer: None,
            phase: Phase::Idle,
            pending: None,
            deferred: None,
            auto_reconnect: config.auto_reconnect,
            restoring: config.awaiting_restoration,
            available: false,
            rx,
            status: status.clone(),
        };
        tokio::spawn(coordinator.run());
        Self { tx, status }
    }

    pub fn event_sink(&self) -> EventSink {
        EventSink {
            tx: self.tx.clone(),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.status.read().state.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status.read().state.is_connected()
    }

    pub fn is_available(&self) -> bool {
        self.status.read().available
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> LinkResult<T> {
        let (reply, mut rx) = mpsc::channel(1);
        self.tx
            .send(make(reply))
            .map_err(|_| LinkError::Cancelled)?;
        rx.recv().await.unwrap_or(Err(LinkError::Cancelled))
    }

    pub async fn register_observer(
        &self,
        observer: Arc<dyn LinkObserver>,
    ) -> LinkResult<()> {
        self.request(|reply| Command::RegisterObserver { observer, reply })
            .await
    }

    pub async fn unregister_observer(
        &self,
        observer: Arc<dyn LinkObserver>,
    ) -> LinkResult<()> {
        self.request(|reply| Command::UnregisterObserver { observer, reply })
            .await
    }

    /// Scan for the first peripheral advertising `service` and connect to
    /// it. Resolves once the connection is established.
    pub async fn scan(&self, service: ServiceId) -> LinkResult<Peripheral> {
        self.request(|reply| Command::Scan { service, reply }).await
    }

    pub async fn cancel_scan(&self) -> LinkResult<()> {
        self.request(|reply| Command::CancelScan { reply }).await
    }

    pub async fn connect(&self, id: PeripheralId) -> LinkResult<Peripheral> {
        self.request(|reply| Command::Connect { id, reply }).await
    }

    pub async fn disconnect(&self) -> LinkResult<()> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    pub async fn cancel_all_connections(&self) -> LinkResult<()> {
        self.request(|reply| Command::CancelAllConnections { reply })
            .await
    }

    /// Read the raw bytes of a characteristic.
    pub async fn read(
        &self,
        characteristic: CharacteristicId,
    ) -> LinkResult<Vec<u8>> {
        self.request(|reply| Command::Read {
            characteristic,
            reply,
        })
        .await
    }

    /// Read a characteristic and decode it as `T`.
    pub async fn read_value<T: Payload>(
        &self,
        characteristic: CharacteristicId,
    ) -> LinkResult<T> {
        let bytes = self.read(characteristic).await?;
        T::decode(&bytes)
    }

    /// Write raw bytes to a characteristic.
    pub async fn write(
        &self,
        characteristic: CharacteristicId,
        value: Vec<u8>,
    ) -> LinkResult<()> {
        self.request(|reply| Command::Write {
            characteristic,
            value,
            reply,
        })
        .await
    }

    /// Encode `value` and write it to a characteristic. Encoding failures
    /// surface before anything is queued.
    pub async fn write_value<T: Payload>(
        &self,
        characteristic: CharacteristicId,
        value: T,
    ) -> LinkResult<()> {
        let bytes = value.encode()?;
        self.write(characteristic, bytes).await
    }

    /// Subscribe to value changes on a characteristic. The returned stream
    /// yields every delivered value until the listen is cancelled or the
    /// connection drops, at which point it yields the terminating error.
    pub async fn listen(
        &self,
        characteristic: CharacteristicId,
    ) -> LinkResult<ValueStream> {
        self.request(|reply| Command::Listen {
            characteristic,
            reply,
        })
        .await
    }

    /// Stop a listen. With `notify_owner`, the listen's stream receives a
    /// cancellation error before closing.
    pub async fn cancel_listen(
        &self,
        characteristic: CharacteristicId,
        notify_owner: bool,
    ) -> LinkResult<()> {
        self.request(|reply| Command::CancelListen {
            characteristic,
            notify_owner,
            reply,
        })
        .await
    }

    /// Adopt a listen believed to already be subscribed at the transport
    /// level, without re-issuing a subscribe request.
    pub async fn restore_listen(
        &self,
        characteristic: CharacteristicId,
    ) -> LinkResult<ValueStream> {
        self.request(|reply| Command::RestoreListen {
            characteristic,
            reply,
        })
        .await
    }

    pub async fn set_listen_restorer(
        &self,
        restorer: Arc<dyn ListenRestorer>,
    ) -> LinkResult<()> {
        self.request(|reply| Command::SetListenRestorer { restorer, reply })
            .await
    }

    /// Feed the restoration snapshot captured by the host at relaunch.
    /// Consumed once; a second call is rejected.
    pub async fn resume(&self, snapshot: RestorationSnapshot) -> LinkResult<()> {
        self.request(|reply| Command::Resume { snapshot, reply })
            .await
    }

    pub async fn shutdown(&self) -> LinkResult<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    pub(crate) fn command_sender(&self) -> mpsc::UnboundedSender<Command> {
        self.tx.clone()
    }
}
