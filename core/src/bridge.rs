// Sync bridge — blocking characteristic calls for worker-thread code
//
// The coordinator task stays fully asynchronous; this module only parks a
// dedicated worker thread on the per-operation reply channels. Nothing here
// shares queue state across contexts.

use crate::coordinator::{Command, PeripheralLink};
use crate::queue::Reply;
use crate::types::CharacteristicId;
use crate::value::{Payload, ValueStream};
use crate::{LinkError, LinkResult};
use tokio::sync::mpsc;
use tracing::debug;

/// Blocking view of a connected link, handed to `run_task` closures. Each
/// call enqueues one operation and parks the worker until its completion
/// arrives, so a closure reads like straight-line peripheral code.
pub struct SyncLink {
    tx: mpsc::UnboundedSender<Command>,
}

impl SyncLink {
    fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> LinkResult<T> {
        let (reply, mut rx) = mpsc::channel(1);
        self.tx.send(make(reply)).map_err(|_| LinkError::Cancelled)?;
        rx.blocking_recv().unwrap_or(Err(LinkError::Cancelled))
    }

    pub fn read(&self, characteristic: CharacteristicId) -> LinkResult<Vec<u8>> {
        self.request(|reply| Command::Read {
            characteristic,
            reply,
        })
    }

    pub fn read_value<T: Payload>(&self, characteristic: CharacteristicId) -> LinkResult<T> {
        let bytes = self.read(characteristic)?;
        T::decode(&bytes)
    }

    pub fn write(&self, characteristic: CharacteristicId, value: Vec<u8>) -> LinkResult<()> {
        self.request(|reply| Command::Write {
            characteristic,
            value,
            reply,
        })
    }

    pub fn write_value<T: Payload>(
        &self,
        characteristic: CharacteristicId,
        value: T,
    ) -> LinkResult<()> {
        let bytes = value.encode()?;
        self.write(characteristic, bytes)
    }

    pub fn listen(&self, characteristic: CharacteristicId) -> LinkResult<ValueStream> {
        self.request(|reply| Command::Listen {
            characteristic,
            reply,
        })
    }

    pub fn cancel_listen(
        &self,
        characteristic: CharacteristicId,
        notify_owner: bool,
    ) -> LinkResult<()> {
        self.request(|reply| Command::CancelListen {
            characteristic,
            notify_owner,
            reply,
        })
    }

    /// Re-attach to an already-subscribed characteristic without touching
    /// the hardware.
    pub fn restore_listen(&self, characteristic: CharacteristicId) -> LinkResult<ValueStream> {
        self.request(|reply| Command::RestoreListen {
            characteristic,
            reply,
        })
    }
}

impl PeripheralLink {
    /// Run blocking characteristic work on a worker thread.
    ///
    /// Fails immediately with `NotConnected` when no peripheral is
    /// connected. Otherwise `work` runs on a dedicated worker with a
    /// blocking view of the link, and its outcome is delivered back here
    /// exactly once. The coordinator keeps servicing events while the
    /// worker waits on individual operations.
    pub async fn run_task<T, F>(&self, work: F) -> LinkResult<T>
    where
        F: FnOnce(&SyncLink) -> LinkResult<T> + Send + 'static,
        T: Send + 'static,
    {
        if !self.is_connected() {
            debug!("task rejected: no peripheral connected");
            return Err(LinkError::NotConnected);
        }
        let sync = SyncLink {
            tx: self.command_sender(),
        };
        tokio::task::spawn_blocking(move || work(&sync))
            .await
            .map_err(|e| LinkError::Internal(format!("worker task failed: {e}")))?
    }
}
