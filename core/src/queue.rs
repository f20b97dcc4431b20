// Operation queue — serialized characteristic traffic for one connection
//
// At most one operation is in flight against the transport; everything else
// waits in FIFO order. The next operation is dispatched only once the
// in-flight completion (success, failure, cancellation) has been observed.
// Characteristics are resolved on demand and the resolution is cached for
// the lifetime of the connection.

use crate::store::ListenStore;
use crate::transport::{Transport, TransportEvent};
use crate::types::{CharacteristicId, Peripheral};
use crate::value::{value_channel, ValueSink, ValueStream};
use crate::{LinkError, LinkResult};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Reply channel for one operation. Capacity one, created per call, so the
/// completion is delivered at most once and the send never blocks.
pub(crate) type Reply<T> = mpsc::Sender<LinkResult<T>>;

pub(crate) fn respond<T>(reply: Reply<T>, result: LinkResult<T>) {
    // A dropped receiver means the caller stopped waiting.
    let _ = reply.try_send(result);
}

pub(crate) enum Operation {
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
        reply: Option<Reply<()>>,
    },
    RestoreListen {
        characteristic: CharacteristicId,
        /// Sink supplied by a restoration collaborator; when absent the
        /// queue creates a fresh channel and hands the stream back.
        sink: Option<ValueSink>,
        reply: Option<Reply<ValueStream>>,
    },
}

impl Operation {
    fn characteristic(&self) -> &CharacteristicId {
        match self {
            Operation::Read { characteristic, .. }
            | Operation::Write { characteristic, .. }
            | Operation::Listen { characteristic, .. }
            | Operation::CancelListen { characteristic, .. }
            | Operation::RestoreListen { characteristic, .. } => characteristic,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Operation::Read { .. } => "read",
            Operation::Write { .. } => "write",
            Operation::Listen { .. } => "listen",
            Operation::CancelListen { .. } => "cancel-listen",
            Operation::RestoreListen { .. } => "restore-listen",
        }
    }

    /// Deliver `error` to whoever is waiting on this operation.
    pub(crate) fn fail(self, error: LinkError) {
        match self {
            Operation::Read { reply, .. } => respond(reply, Err(error)),
            Operation::Write { reply, .. } => respond(reply, Err(error)),
            Operation::Listen { reply, .. } => respond(reply, Err(error)),
            Operation::CancelListen { reply, .. } => {
                if let Some(reply) = reply {
                    respond(reply, Err(error));
                }
            }
            Operation::RestoreListen { sink, reply, .. } => {
                if let Some(sink) = sink {
                    sink.deliver(Err(error.clone()));
                }
                if let Some(reply) = reply {
                    respond(reply, Err(error));
                }
            }
        }
    }
}

enum Stage {
    /// Waiting for on-demand characteristic discovery.
    Resolving,
    /// The transport call has been issued.
    Executing,
}

struct InFlight {
    op: Operation,
    stage: Stage,
    /// Stream half of a listen being established, handed to the caller once
    /// the subscribe request is confirmed.
    pending_stream: Option<ValueStream>,
}

struct ListenRegistration {
    sink: ValueSink,
    /// Whether the persisted entry for this listen was written, making it
    /// subject to restoration after a relaunch.
    persisted: bool,
}

pub(crate) struct OperationQueue {
    transport: Arc<dyn Transport>,
    store: Arc<ListenStore>,
    peripheral: Peripheral,
    waiting: VecDeque<Operation>,
    in_flight: Option<InFlight>,
    listens: HashMap<CharacteristicId, ListenRegistration>,
    resolved: HashSet<CharacteristicId>,
}

impl OperationQueue {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        store: Arc<ListenStore>,
        peripheral: Peripheral,
    ) -> Self {
        Self {
            transport,
            store,
            peripheral,
            waiting: VecDeque::new(),
            in_flight: None,
            listens: HashMap::new(),
            resolved: HashSet::new(),
        }
    }

    pub(crate) fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    pub(crate) fn has_listen(&self, characteristic: &CharacteristicId) -> bool {
        self.listens.contains_key(characteristic)
    }

    pub(crate) fn enqueue(&mut self, op: Operation) {
        trace!("queued {} for {}", op.describe(), op.characteristic());
        self.waiting.push_back(op);
        self.pump();
    }

    /// Dispatch until something is in flight or the queue is empty.
    fn pump(&mut self) {
        while self.in_flight.is_none() {
            let Some(op) = self.waiting.pop_front() else {
                break;
            };
            self.dispatch(op);
        }
    }

    fn dispatch(&mut self, op: Operation) {
        // Restore-listen never touches the hardware: the subscription is
        // believed live already, only the delivery callback is missing.
        if let Operation::RestoreListen {
            characteristic,
            sink,
            reply,
        } = op
        {
            let (sink, stream) = match sink {
                Some(sink) => (sink, None),
                None => {
                    let (sink, stream) = value_channel();
                    (sink, Some(stream))
                }
            };
            let displaced = self
                .listens
                .insert(characteristic, ListenRegistration { sink, persisted: true });
            if let Some(previous) = displaced {
                debug!("restored listen for {characteristic} displaces the previous owner");
                previous.sink.deliver(Err(LinkError::Cancelled));
            } else {
                debug!("restored listen for {characteristic}");
            }
            if let (Some(reply), Some(stream)) = (reply, stream) {
                respond(reply, Ok(stream));
            }
            return;
        }

        let characteristic = *op.characteristic();
        if self.resolved.contains(&characteristic) {
            self.execute(op);
        } else {
            trace!("resolving {characteristic} before {}", op.describe());
            self.transport
                .discover_characteristic(&self.peripheral, &characteristic);
            self.in_flight = Some(InFlight {
                op,
                stage: Stage::Resolving,
                pending_stream: None,
            });
        }
    }

    /// Issue the transport call for a resolved operation.
    fn execute(&mut self, mut op: Operation) {
        let mut pending_stream = None;
        match &mut op {
            Operation::Read { characteristic, .. } => {
                self.transport.read_value(&self.peripheral, characteristic);
            }
            Operation::Write {
                characteristic,
                value,
                ..
            } => {
                let payload = std::mem::take(value);
                trace!(
                    "writing {} byte(s) to {characteristic}: {}",
                    payload.len(),
                    hex::encode(&payload)
                );
                self.transport
                    .write_value(&self.peripheral, characteristic, payload);
            }
            Operation::Listen { characteristic, .. } => {
                // Registration goes in before the subscribe request so
                // notifications arriving ahead of the confirmation are
                // buffered for the caller.
                let (sink, stream) = value_channel();
                let displaced = self.listens.insert(
                    *characteristic,
                    ListenRegistration {
                        sink,
                        persisted: false,
                    },
                );
                if let Some(previous) = displaced {
                    debug!("listen on {characteristic} displaces the previous owner");
                    previous.sink.deliver(Err(LinkError::Cancelled));
                }
                pending_stream = Some(stream);
                self.transport
                    .set_notify(&self.peripheral, characteristic, true);
            }
            Operation::CancelListen {
                characteristic,
                notify_owner,
                ..
            } => {
                if let Some(registration) = self.listens.remove(characteristic) {
                    if *notify_owner {
                        registration.sink.deliver(Err(LinkError::Cancelled));
                    }
                }
                if let Err(e) = self.store.remove(characteristic) {
                    warn!("failed to drop persisted listen for {characteristic}: {e}");
                }
                self.transport
                    .set_notify(&self.peripheral, characteristic, false);
            }
            Operation::RestoreListen { .. } => {
                debug_assert!(false, "restore-listen is completed at dispatch");
                return;
            }
        }
        self.in_flight = Some(InFlight {
            op,
            stage: Stage::Executing,
            pending_stream,
        });
    }

    /// Route a transport event that concerns characteristic traffic.
    pub(crate) fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::CharacteristicDiscovered {
                characteristic,
                result,
            } => match self.in_flight.take() {
                Some(InFlight {
                    op,
                    stage: Stage::Resolving,
                    ..
                }) if *op.characteristic() == characteristic => match result {
                    Ok(()) => {
                        self.resolved.insert(characteristic);
                        self.execute(op);
                    }
                    Err(reason) => {
                        op.fail(LinkError::CharacteristicResolution {
                            characteristic,
                            reason,
                        });
                        self.pump();
                    }
                },
                other => self.put_back_unmatched(other, "characteristic discovery"),
            },
            TransportEvent::ValueRead {
                characteristic,
                result,
            } => match self.in_flight.take() {
                Some(InFlight {
                    op:
                        Operation::Read {
                            characteristic: c,
                            reply,
                        },
                    stage: Stage::Executing,
                    ..
                }) if c == characteristic => {
                    respond(reply, result.map_err(LinkError::Transport));
                    self.pump();
                }
                other => self.put_back_unmatched(other, "read completion"),
            },
            TransportEvent::WriteCompleted {
                characteristic,
                result,
            } => match self.in_flight.take() {
                Some(InFlight {
                    op:
                        Operation::Write {
                            characteristic: c,
                            reply,
                            ..
                        },
                    stage: Stage::Executing,
                    ..
                }) if c == characteristic => {
                    respond(reply, result.map_err(LinkError::Transport));
                    self.pump();
                }
                other => self.put_back_unmatched(other, "write completion"),
            },
            TransportEvent::NotifyStateChanged {
                characteristic,
                enabled,
                result,
            } => match self.in_flight.take() {
                Some(InFlight {
                    op:
                        Operation::Listen {
                            characteristic: c,
                            reply,
                        },
                    stage: Stage::Executing,
                    pending_stream,
                }) if c == characteristic && enabled => {
                    match result {
                        Ok(()) => {
                            match self.store.insert(&characteristic) {
                                Ok(()) => {
                                    if let Some(registration) =
                                        self.listens.get_mut(&characteristic)
                                    {
                                        registration.persisted = true;
                                    }
                                }
                                Err(e) => {
                                    warn!("listen on {characteristic} is live but not persisted: {e}");
                                }
                            }
                            debug!("listening on {characteristic}");
                            match pending_stream {
                                Some(stream) => respond(reply, Ok(stream)),
                                None => warn!("listen confirmation for {characteristic} had no stream"),
                            }
                        }
                        Err(reason) => {
                            self.listens.remove(&characteristic);
                            respond(reply, Err(LinkError::Transport(reason)));
                        }
                    }
                    self.pump();
                }
                Some(InFlight {
                    op:
                        Operation::CancelListen {
                            characteristic: c,
                            reply,
                            ..
                        },
                    stage: Stage::Executing,
                    ..
                }) if c == characteristic && !enabled => {
                    if let Some(reply) = reply {
                        respond(reply, result.map_err(LinkError::Transport));
                    }
                    self.pump();
                }
                other => self.put_back_unmatched(other, "notify state change"),
            },
            TransportEvent::ValueChanged {
                characteristic,
                value,
            } => {
                trace!("value from {characteristic}: {}", hex::encode(&value));
                let delivered = match self.listens.get(&characteristic) {
                    Some(registration) => registration.sink.deliver(Ok(value)),
                    None => {
                        trace!("no listener for {characteristic}, value dropped");
                        return;
                    }
                };
                if !delivered {
                    debug!("listener for {characteristic} is gone, dropping registration");
                    self.listens.remove(&characteristic);
                }
            }
            event => {
                debug!("operation queue ignoring event: {event:?}");
            }
        }
    }

    fn put_back_unmatched(&mut self, in_flight: Option<InFlight>, context: &str) {
        warn!("ignoring {context} event that matches no in-flight operation");
        self.in_flight = in_flight;
    }

    /// Fail every waiting and in-flight operation with `error`, deliver
    /// `error` to every listen sink, and clear all registrations without
    /// unsubscribing (the connection is already gone). Returns the
    /// characteristics whose listens had been persisted, so the caller can
    /// decide what happens to their durable entries.
    pub(crate) fn cancel_all(&mut self, error: LinkError) -> Vec<CharacteristicId> {
        let waiting_count = self.waiting.len();
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.op.fail(error.clone());
        }
        for op in self.waiting.drain(..) {
            op.fail(error.clone());
        }
        let listen_count = self.listens.len();
        let mut persisted = Vec::new();
        for (characteristic, registration) in self.listens.drain() {
            registration.sink.deliver(Err(error.clone()));
            if registration.persisted {
                persisted.push(characteristic);
            }
        }
        self.resolved.clear();
        debug!(
            "cancelled {waiting_count} waiting operation(s) and {listen_count} listen(s): {error}"
        );
        persisted
    }
}
