//! # Transport Layer
//!
//! The reliable, ordered channel a player's frames travel over.
//!
//! The layer above only needs one operation, [`ReliableChannel::send_reliable`]:
//! submit a complete frame, in order, without waiting for delivery. Failures
//! are local (queue full, peer gone) and are connection-fatal for the player.
//!
//! ## Implementations
//! - **Memory**: in-process queue with an observable receiving end
//! - **Stream**: any `AsyncWrite`, framed by [`FrameCodec`](crate::core::codec::FrameCodec)
//!   and drained by a writer task

use bytes::Bytes;

use crate::error::ChannelError;

pub mod memory;
pub mod stream;

/// Send bytes reliably and in order.
///
/// Delivery order must match call order. Implementations must not block on
/// acknowledgement from the peer.
pub trait ReliableChannel: Send {
    fn send_reliable(&mut self, frame: Bytes) -> Result<(), ChannelError>;
}

/// Collects frames in memory. Useful for benchmarks and offline encoding.
impl ReliableChannel for Vec<Bytes> {
    fn send_reliable(&mut self, frame: Bytes) -> Result<(), ChannelError> {
        self.push(frame);
        Ok(())
    }
}

impl<C: ReliableChannel + ?Sized> ReliableChannel for Box<C> {
    fn send_reliable(&mut self, frame: Bytes) -> Result<(), ChannelError> {
        (**self).send_reliable(frame)
    }
}
