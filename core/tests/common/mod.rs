//! Shared test doubles: a scripted transport and a recording observer.
//!
//! `FakeTransport` answers every transport call by emitting the matching
//! event back through the link's `EventSink`, so tests drive the public API
//! end to end without real hardware. Per-test knobs select the unhappy
//! paths (unknown peripherals, failed connects, silent scans).

// not every test binary exercises every helper
#![allow(dead_code)]

use lariat_core::{
    CharacteristicId, EventSink, LinkObserver, Peripheral, PeripheralId, ServiceId, Transport,
    TransportEvent,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub struct FakeTransport {
    sink: Mutex<Option<EventSink>>,
    calls: Mutex<Vec<String>>,
    known: Mutex<HashMap<PeripheralId, Peripheral>>,
    advertised: Mutex<Option<Peripheral>>,
    read_values: Mutex<HashMap<CharacteristicId, Vec<u8>>>,
    auto_connect: Mutex<bool>,
    fail_connects: Mutex<u32>,
    connect_attempts: Mutex<u32>,
    writes: Mutex<Vec<(CharacteristicId, Vec<u8>)>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sink: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            known: Mutex::new(HashMap::new()),
            advertised: Mutex::new(None),
            read_values: Mutex::new(HashMap::new()),
            auto_connect: Mutex::new(true),
            fail_connects: Mutex::new(0),
            connect_attempts: Mutex::new(0),
            writes: Mutex::new(Vec::new()),
        })
    }

    /// Wire the event channel up after the link is spawned.
    pub fn attach(&self, sink: EventSink) {
        *self.sink.lock() = Some(sink);
    }

    fn emit(&self, event: TransportEvent) {
        if let Some(sink) = &*self.sink.lock() {
            sink.emit(event);
        }
    }

    /// Make a peripheral resolvable via `retrieve_peripheral`.
    pub fn add_peripheral(&self, peripheral: Peripheral) {
        self.known.lock().insert(peripheral.id, peripheral);
    }

    /// The peripheral reported for the next scan.
    pub fn advertise(&self, peripheral: Peripheral) {
        *self.advertised.lock() = Some(peripheral);
    }

    pub fn set_read_value(&self, characteristic: CharacteristicId, value: Vec<u8>) {
        self.read_values.lock().insert(characteristic, value);
    }

    /// When false, connect requests stay pending until the test answers.
    pub fn set_auto_connect(&self, enabled: bool) {
        *self.auto_connect.lock() = enabled;
    }

    /// Fail the next `count` connect attempts with a transport error.
    pub fn fail_next_connects(&self, count: u32) {
        *self.fail_connects.lock() = count;
    }

    pub fn connect_attempts(&self) -> u32 {
        *self.connect_attempts.lock()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn writes(&self) -> Vec<(CharacteristicId, Vec<u8>)> {
        self.writes.lock().clone()
    }

    // Event injection for test scripts.

    pub fn set_available(&self, available: bool) {
        self.emit(TransportEvent::AvailabilityChanged { available });
    }

    pub fn drop_connection(&self, id: PeripheralId, reason: &str) {
        self.emit(TransportEvent::Disconnected {
            id,
            reason: Some(reason.to_string()),
        });
    }

    pub fn notify(&self, characteristic: CharacteristicId, value: Vec<u8>) {
        self.emit(TransportEvent::ValueChanged {
            characteristic,
            value,
        });
    }
}

impl Transport for FakeTransport {
    fn scan_for_peripherals(&self, service: ServiceId) {
        self.calls.lock().push(format!("scan {service}"));
        let advertised = self.advertised.lock().clone();
        if let Some(peripheral) = advertised {
            self.emit(TransportEvent::Discovered { peripheral });
        }
    }

    fn stop_scan(&self) {
        self.calls.lock().push("stop-scan".to_string());
    }

    fn connect(&self, peripheral: &Peripheral) {
        self.calls.lock().push(format!("connect {}", peripheral.id));
        *self.connect_attempts.lock() += 1;
        let mut failures = self.fail_connects.lock();
        if *failures > 0 {
            *failures -= 1;
            self.emit(TransportEvent::FailedToConnect {
                id: peripheral.id,
                reason: Some("peripheral refused the connection".to_string()),
            });
            return;
        }
        drop(failures);
        if *self.auto_connect.lock() {
            self.emit(TransportEvent::Connected { id: peripheral.id });
        }
    }

    fn cancel_connection(&self, peripheral: &Peripheral) {
        self.calls
            .lock()
            .push(format!("cancel-connection {}", peripheral.id));
        self.emit(TransportEvent::Disconnected {
            id: peripheral.id,
            reason: None,
        });
    }

    fn retrieve_peripheral(&self, id: PeripheralId) -> Option<Peripheral> {
        self.known.lock().get(&id).cloned()
    }

    fn discover_characteristic(&self, _peripheral: &Peripheral, characteristic: &CharacteristicId) {
        self.calls
            .lock()
            .push(format!("discover {characteristic}"));
        self.emit(TransportEvent::CharacteristicDiscovered {
            characteristic: *characteristic,
            result: Ok(()),
        });
    }

    fn read_value(&self, _peripheral: &Peripheral, characteristic: &CharacteristicId) {
        self.calls.lock().push(format!("read {characteristic}"));
        let value = self
            .read_values
            .lock()
            .get(characteristic)
            .cloned()
            .unwrap_or_default();
        self.emit(TransportEvent::ValueRead {
            characteristic: *characteristic,
            result: Ok(value),
        });
    }

    fn write_value(&self, _peripheral: &Peripheral, characteristic: &CharacteristicId, value: Vec<u8>) {
        self.calls.lock().push(format!("write {characteristic}"));
        // writes are readable back, like a real characteristic value slot
        self.read_values
            .lock()
            .insert(*characteristic, value.clone());
        self.writes.lock().push((*characteristic, value));
        self.emit(TransportEvent::WriteCompleted {
            characteristic: *characteristic,
            result: Ok(()),
        });
    }

    fn set_notify(&self, _peripheral: &Peripheral, characteristic: &CharacteristicId, enabled: bool) {
        self.calls
            .lock()
            .push(format!("notify {characteristic} {enabled}"));
        self.emit(TransportEvent::NotifyStateChanged {
            characteristic: *characteristic,
            enabled,
            result: Ok(()),
        });
    }
}

/// Observer that records every callback it receives, in order.
pub struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl LinkObserver for RecordingObserver {
    fn availability_changed(&self, available: bool) {
        self.events.lock().push(format!("available {available}"));
    }

    fn peripheral_connected(&self, peripheral: &Peripheral) {
        self.events.lock().push(format!("connected {}", peripheral.id));
    }

    fn peripheral_disconnected(&self, peripheral: &Peripheral) {
        self.events
            .lock()
            .push(format!("disconnected {}", peripheral.id));
    }
}

/// Let the coordinator task drain its command queue.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}
