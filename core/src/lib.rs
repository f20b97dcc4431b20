// Lariat Core — Peripheral Connection Spine
//
// One peripheral, one serialized queue, one place that knows the
// connection state. Everything else is a collaborator behind a trait.

pub mod host;
pub mod observers;
pub mod store;
pub mod transport;
pub mod types;
pub mod value;

mod bridge;
mod coordinator;
mod queue;

use thiserror::Error;

pub use bridge::SyncLink;
pub use coordinator::{EventSink, PeripheralLink};
pub use host::{LifecycleExtension, ListenRestorer, NoLifecycleExtension};
pub use observers::LinkObserver;
pub use store::{ListenEntry, ListenStore};
pub use transport::{Transport, TransportEvent};
pub use types::{
    CharacteristicId, ConnectionState, Peripheral, PeripheralId, RestorationSnapshot, ServiceId,
    SnapshotState,
};
pub use value::{value_channel, Payload, ValueSink, ValueStream};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error, Clone)]
pub enum LinkError {
    /// The operation needs a connected peripheral and there is none.
    /// Reported synchronously, never queued.
    #[error("no peripheral is connected")]
    NotConnected,
    #[error("peripheral {0} is not known to the transport")]
    UnknownPeripheral(types::PeripheralId),
    /// The transport dropped the connection outside an explicit disconnect.
    #[error("the connection dropped unexpectedly")]
    UnexpectedDisconnect,
    /// The operation or connection was explicitly cancelled.
    #[error("cancelled")]
    Cancelled,
    /// Caller contract violation, e.g. a second scan while one is pending.
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("could not resolve characteristic {characteristic}: {reason}")]
    CharacteristicResolution {
        characteristic: types::CharacteristicId,
        reason: String,
    },
    #[error("encoding failed: {0}")]
    Encoding(String),
    #[error("decoding failed: {0}")]
    Decoding(String),
    /// Opaque passthrough for anything the transport itself reports.
    #[error("transport error: {0}")]
    Transport(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type LinkResult<T> = Result<T, LinkError>;

impl From<anyhow::Error> for LinkError {
    fn from(err: anyhow::Error) -> Self {
        LinkError::Internal(err.to_string())
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Reconnect automatically after an unexpected drop. Cleared only by an
    /// explicit `disconnect`, re-armed on every successful connection.
    pub auto_reconnect: bool,
    /// The host was relaunched to handle a pending radio event and will
    /// call `resume` with a restoration snapshot. Until it does, connect
    /// requests are deferred.
    pub awaiting_restoration: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            awaiting_restoration: false,
        }
    }
}

/// Initialize tracing with an env-filter (idempotent). `RUST_LOG` overrides
/// the default `info` level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_reconnects() {
        let config = LinkConfig::default();
        assert!(config.auto_reconnect);
        assert!(!config.awaiting_restoration);
    }

    #[test]
    fn test_error_messages_name_the_peripheral() {
        let id = types::PeripheralId::random();
        let message = LinkError::UnknownPeripheral(id).to_string();
        assert!(message.contains(&id.to_string()));
    }

    #[test]
    fn test_anyhow_errors_become_internal() {
        let err: LinkError = anyhow::anyhow!("sled exploded").into();
        assert!(matches!(err, LinkError::Internal(_)));
        assert!(err.to_string().contains("sled exploded"));
    }
}
