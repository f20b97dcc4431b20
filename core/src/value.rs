//! Typed characteristic payloads and listen delivery channels.
//!
//! A characteristic value on the wire is a short byte string. `Payload` is
//! the encode/decode contract applied at the public API boundary: `write`
//! encodes before an operation is enqueued, `read` decodes when the
//! completion is delivered. Integers use little-endian fixed-width encoding.
//!
//! `ValueSink`/`ValueStream` carry delivered listen values. The sink half is
//! held by the operation queue (or supplied by a restoration collaborator);
//! the stream half belongs to the application and can be consumed async,
//! blocking (from a worker context), or as a `futures::Stream`.

use crate::{LinkError, LinkResult};
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Encode/decode contract for characteristic payloads.
pub trait Payload: Sized {
    fn encode(&self) -> LinkResult<Vec<u8>>;
    fn decode(bytes: &[u8]) -> LinkResult<Self>;
}

impl Payload for Vec<u8> {
    fn encode(&self) -> LinkResult<Vec<u8>> {
        Ok(self.clone())
    }

    fn decode(bytes: &[u8]) -> LinkResult<Self> {
        Ok(bytes.to_vec())
    }
}

impl Payload for String {
    fn encode(&self) -> LinkResult<Vec<u8>> {
        Ok(self.as_bytes().to_vec())
    }

    fn decode(bytes: &[u8]) -> LinkResult<Self> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| LinkError::Decoding(format!("invalid utf-8 payload: {e}")))
    }
}

impl Payload for bool {
    fn encode(&self) -> LinkResult<Vec<u8>> {
        Ok(vec![u8::from(*self)])
    }

    fn decode(bytes: &[u8]) -> LinkResult<Self> {
        match bytes {
            [0] => Ok(false),
            [1] => Ok(true),
            _ => Err(LinkError::Decoding(format!(
                "expected a single 0/1 byte, got {} bytes",
                bytes.len()
            ))),
        }
    }
}

macro_rules! impl_le_payload {
    ($($ty:ty),*) => {
        $(
            impl Payload for $ty {
                fn encode(&self) -> LinkResult<Vec<u8>> {
                    Ok(self.to_le_bytes().to_vec())
                }

                fn decode(bytes: &[u8]) -> LinkResult<Self> {
                    let array: [u8; std::mem::size_of::<$ty>()] =
                        bytes.try_into().map_err(|_| {
                            LinkError::Decoding(format!(
                                "expected {} bytes for {}, got {}",
                                std::mem::size_of::<$ty>(),
                                stringify!($ty),
                                bytes.len()
                            ))
                        })?;
                    Ok(<$ty>::from_le_bytes(array))
                }
            }
        )*
    };
}

impl_le_payload!(u8, u16, u32, u64);

/// Create a connected sink/stream pair for listen delivery.
pub fn value_channel() -> (ValueSink, ValueStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ValueSink { tx }, ValueStream { rx })
}

/// Sender half of a listen delivery channel.
///
/// Unbounded so the control task never blocks on a slow consumer.
#[derive(Debug, Clone)]
pub struct ValueSink {
    tx: mpsc::UnboundedSender<LinkResult<Vec<u8>>>,
}

impl ValueSink {
    /// Deliver one value or error. Returns false when the consumer is gone.
    pub(crate) fn deliver(&self, item: LinkResult<Vec<u8>>) -> bool {
        self.tx.send(item).is_ok()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiver half of a listen delivery channel.
///
/// Yields `Ok(bytes)` per delivered value; a terminal `Err` (cancellation,
/// unexpected disconnect) is the last item before the stream ends.
#[derive(Debug)]
pub struct ValueStream {
    rx: mpsc::UnboundedReceiver<LinkResult<Vec<u8>>>,
}

impl ValueStream {
    /// Await the next delivered value. `None` once the listen is gone.
    pub async fn next(&mut self) -> Option<LinkResult<Vec<u8>>> {
        self.rx.recv().await
    }

    /// Await the next value decoded as `T`.
    pub async fn next_value<T: Payload>(&mut self) -> Option<LinkResult<T>> {
        self.next().await.map(|item| item.and_then(|b| T::decode(&b)))
    }

    /// Blocking variant of [`next`](Self::next) for worker contexts.
    pub fn blocking_next(&mut self) -> Option<LinkResult<Vec<u8>>> {
        self.rx.blocking_recv()
    }

    /// Blocking variant of [`next_value`](Self::next_value).
    pub fn blocking_next_value<T: Payload>(&mut self) -> Option<LinkResult<T>> {
        self.blocking_next()
            .map(|item| item.and_then(|b| T::decode(&b)))
    }
}

impl Stream for ValueStream {
    type Item = LinkResult<Vec<u8>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
