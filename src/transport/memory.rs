//! In-process reliable channel.
//!
//! A bounded tokio queue stands in for the network. The sending half is a
//! [`ReliableChannel`]; the receiving half sees frames in exactly the order
//! they were sent. Dropping the receiver closes the channel.

use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::ChannelError;
use crate::transport::ReliableChannel;

#[derive(Debug)]
pub struct MemoryChannel {
    tx: mpsc::Sender<Bytes>,
    capacity: usize,
}

/// Receiving end of a [`MemoryChannel`]
#[derive(Debug)]
pub struct MemoryReceiver {
    rx: mpsc::Receiver<Bytes>,
}

impl MemoryChannel {
    /// Create a connected pair holding at most `capacity` undelivered frames.
    pub fn pair(capacity: usize) -> (MemoryChannel, MemoryReceiver) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        (MemoryChannel { tx, capacity }, MemoryReceiver { rx })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl ReliableChannel for MemoryChannel {
    fn send_reliable(&mut self, frame: Bytes) -> Result<(), ChannelError> {
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => ChannelError::Backpressure(self.capacity),
            TrySendError::Closed(_) => ChannelError::Closed,
        })
    }
}

impl MemoryReceiver {
    /// Wait for the next frame. `None` once the sender is gone and the queue is empty.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Take every frame currently queued without waiting.
    pub fn drain(&mut self) -> Vec<Bytes> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Stop accepting frames; later sends fail with `ChannelError::Closed`.
    pub fn close(&mut self) {
        self.rx.close();
    }
}
