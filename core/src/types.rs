//! Core identifier and state types for the peripheral link.
//!
//! Identifiers are opaque, stable value types: a `PeripheralId` survives
//! process restarts, and a `CharacteristicId` always carries the service it
//! belongs to so call sites never pass mismatched pairs.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable identifier for a remote peripheral, valid across process restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeripheralId(Uuid);

impl PeripheralId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Generate a fresh random identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from the canonical hyphenated form.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for PeripheralId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Identifier of a service hosted by a peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceId(Uuid);

impl ServiceId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ServiceId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Identifier of a characteristic, together with its owning service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharacteristicId {
    service: ServiceId,
    uuid: Uuid,
}

impl CharacteristicId {
    pub fn new(service: ServiceId, uuid: Uuid) -> Self {
        Self { service, uuid }
    }

    pub fn random(service: ServiceId) -> Self {
        Self {
            service,
            uuid: Uuid::new_v4(),
        }
    }

    pub fn service(&self) -> ServiceId {
        self.service
    }

    pub fn uuid(&self) -> &Uuid {
        &self.uuid
    }
}

impl fmt::Display for CharacteristicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.uuid)
    }
}

/// Handle for a peripheral as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peripheral {
    pub id: PeripheralId,
    /// Advertised local name, when the transport saw one.
    pub name: Option<String>,
}

impl Peripheral {
    pub fn new(id: PeripheralId) -> Self {
        Self { id, name: None }
    }

    pub fn named(id: PeripheralId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: Some(name.into()),
        }
    }
}

impl fmt::Display for Peripheral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.id),
            None => write!(f, "{}", self.id),
        }
    }
}

/// Top-level connection state as observed through the public surface.
///
/// A single enum means a connecting handle and a connected handle can never
/// coexist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Scanning,
    Connecting(Peripheral),
    Connected(Peripheral),
    Disconnecting,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected(_))
    }

    /// The connected peripheral, if any.
    pub fn connected_peripheral(&self) -> Option<&Peripheral> {
        match self {
            ConnectionState::Connected(p) => Some(p),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Scanning => write!(f, "scanning"),
            ConnectionState::Connecting(p) => write!(f, "connecting to {p}"),
            ConnectionState::Connected(p) => write!(f, "connected to {p}"),
            ConnectionState::Disconnecting => write!(f, "disconnecting"),
        }
    }
}

/// Sub-state reported by the host in a restoration snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotState {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

/// Host-supplied description of the link at the moment the process was
/// revived to handle a pending radio event. Consumed exactly once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestorationSnapshot {
    pub peripheral: Option<Peripheral>,
    pub state: SnapshotState,
}

impl RestorationSnapshot {
    /// Snapshot that names no peripheral at all.
    pub fn empty() -> Self {
        Self {
            peripheral: None,
            state: SnapshotState::Disconnected,
        }
    }

    pub fn with_peripheral(peripheral: Peripheral, state: SnapshotState) -> Self {
        Self {
            peripheral: Some(peripheral),
            state,
        }
    }
}
