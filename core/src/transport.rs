//! Transport collaborator seam.
//!
//! The radio stack lives outside this crate. The link drives it through the
//! fire-and-forget primitives of [`Transport`] and hears back exclusively
//! through [`TransportEvent`]s pushed into the control task (see
//! [`EventSink`](crate::EventSink)). No primitive blocks and none carries a
//! timeout: every outcome arrives as an event or not at all.

use crate::types::{CharacteristicId, Peripheral, PeripheralId, ServiceId};

/// Primitives the link consumes from the host's radio stack.
///
/// Implementations must be cheap to call from the control task. Outcomes are
/// reported asynchronously via [`TransportEvent`].
pub trait Transport: Send + Sync {
    /// Begin scanning for peripherals advertising the given service.
    fn scan_for_peripherals(&self, service: ServiceId);

    /// Stop an in-progress scan.
    fn stop_scan(&self);

    /// Request a connection. Resolution arrives as `Connected` or
    /// `FailedToConnect`.
    fn connect(&self, peripheral: &Peripheral);

    /// Tear down or abandon a connection. Confirmation arrives as
    /// `Disconnected`.
    fn cancel_connection(&self, peripheral: &Peripheral);

    /// Reconstruct a peripheral handle from a stable identifier, if the
    /// transport still knows it.
    fn retrieve_peripheral(&self, id: PeripheralId) -> Option<Peripheral>;

    /// Resolve a characteristic (service discovery as needed). Resolution
    /// arrives as `CharacteristicDiscovered`.
    fn discover_characteristic(&self, peripheral: &Peripheral, characteristic: &CharacteristicId);

    /// Read the current value. Arrives as `ValueRead`.
    fn read_value(&self, peripheral: &Peripheral, characteristic: &CharacteristicId);

    /// Write a value. Arrives as `WriteCompleted`.
    fn write_value(
        &self,
        peripheral: &Peripheral,
        characteristic: &CharacteristicId,
        value: Vec<u8>,
    );

    /// Enable or disable notifications. Arrives as `NotifyStateChanged`;
    /// subsequent deliveries arrive as `ValueChanged`.
    fn set_notify(&self, peripheral: &Peripheral, characteristic: &CharacteristicId, enabled: bool);
}

/// Events the transport reports back to the link.
///
/// Transport-specific failure detail travels as a plain string and surfaces
/// to callers wrapped in [`LinkError::Transport`](crate::LinkError).
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The radio became available or unavailable (powered on/off).
    AvailabilityChanged { available: bool },
    /// A scan hit a peripheral advertising the requested service.
    Discovered { peripheral: Peripheral },
    /// A requested connection is established.
    Connected { id: PeripheralId },
    /// The connection dropped, whether requested or not.
    Disconnected {
        id: PeripheralId,
        reason: Option<String>,
    },
    /// A connection request failed outright.
    FailedToConnect {
        id: PeripheralId,
        reason: Option<String>,
    },
    /// Outcome of `discover_characteristic`.
    CharacteristicDiscovered {
        characteristic: CharacteristicId,
        result: Result<(), String>,
    },
    /// Outcome of `read_value`.
    ValueRead {
        characteristic: CharacteristicId,
        result: Result<Vec<u8>, String>,
    },
    /// Outcome of `write_value`.
    WriteCompleted {
        characteristic: CharacteristicId,
        result: Result<(), String>,
    },
    /// Outcome of `set_notify`.
    NotifyStateChanged {
        characteristic: CharacteristicId,
        enabled: bool,
        result: Result<(), String>,
    },
    /// An unsolicited notification carrying a fresh value.
    ValueChanged {
        characteristic: CharacteristicId,
        value: Vec<u8>,
    },
}
