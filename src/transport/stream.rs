//! Reliable channel over a byte stream.
//!
//! `send_reliable` only enqueues; a writer task drains the queue into a
//! [`FramedWrite`] with [`FrameCodec`], so callers never wait on the socket.
//! The queue is bounded in bytes, not frames, so a whole track transfer fits
//! in one go. Each queued frame holds its share of the budget until the writer
//! has sent it. A peer that stops reading surfaces as
//! `ChannelError::Backpressure`, and a dead writer as `ChannelError::Closed`.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, instrument, warn};

use crate::core::codec::FrameCodec;
use crate::error::{ChannelError, Result};
use crate::session::player::{Identity, Player, PlayerId};
use crate::session::registry::SessionRegistry;
use crate::transport::ReliableChannel;

type QueuedFrame = (Bytes, OwnedSemaphorePermit);

#[derive(Debug)]
pub struct StreamChannel {
    tx: mpsc::UnboundedSender<QueuedFrame>,
    budget: Arc<Semaphore>,
    budget_bytes: usize,
}

impl StreamChannel {
    /// Start a writer task for `writer` and return the channel feeding it.
    ///
    /// At most `budget_bytes` of frame data wait in the queue at once. The
    /// task finishes once the channel is dropped and the queue has been
    /// flushed, or on the first write error.
    pub fn spawn<W>(
        writer: W,
        codec: FrameCodec,
        budget_bytes: usize,
    ) -> (StreamChannel, JoinHandle<std::result::Result<(), ChannelError>>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let budget_bytes = budget_bytes.clamp(1, Semaphore::MAX_PERMITS);
        let budget = Arc::new(Semaphore::new(budget_bytes));
        let (tx, mut rx) = mpsc::unbounded_channel::<QueuedFrame>();

        let task = tokio::spawn(async move {
            let mut sink = FramedWrite::new(writer, codec);
            while let Some((frame, permit)) = rx.recv().await {
                let sent = sink.send(frame).await;
                drop(permit);
                if let Err(e) = sent {
                    warn!(error = %e, "Stream write failed");
                    return Err(e);
                }
            }
            sink.close().await?;
            debug!("Stream writer finished");
            Ok(())
        });

        let channel = StreamChannel {
            tx,
            budget,
            budget_bytes,
        };
        (channel, task)
    }

    /// Budget bytes not taken by queued frames
    pub fn available_bytes(&self) -> usize {
        self.budget.available_permits()
    }
}

impl ReliableChannel for StreamChannel {
    fn send_reliable(&mut self, frame: Bytes) -> std::result::Result<(), ChannelError> {
        if self.tx.is_closed() {
            return Err(ChannelError::Closed);
        }
        let cost =
            u32::try_from(frame.len()).map_err(|_| ChannelError::FrameTooLarge(frame.len()))?;
        let permit = Arc::clone(&self.budget)
            .try_acquire_many_owned(cost)
            .map_err(|e| match e {
                TryAcquireError::NoPermits => ChannelError::Backpressure(self.budget_bytes),
                TryAcquireError::Closed => ChannelError::Closed,
            })?;
        self.tx
            .send((frame, permit))
            .map_err(|_| ChannelError::Closed)
    }
}

/// Run one client connection end to end.
///
/// Registers a session for `id` in `registry`, forwards every frame the client
/// sends to it, and shuts the session down when the client disconnects or a
/// fatal error occurs.
#[instrument(skip(io, identity, registry), fields(player_id = %id))]
pub async fn serve_connection<S>(
    io: S,
    id: PlayerId,
    identity: Identity,
    registry: &SessionRegistry,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let settings = registry.settings().clone();
    let codec = FrameCodec::new(settings.transport.max_frame_size);
    let (read_half, write_half) = tokio::io::split(io);

    let budget = settings.transport.outbound_buffer_bytes;
    let (channel, writer) = StreamChannel::spawn(write_half, codec, budget);
    let handle = registry.spawn(Player::new(id, identity, channel, &settings))?;
    info!("Connection established");

    let mut frames = FramedRead::new(read_half, codec);
    while let Some(frame) = frames.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Inbound stream failed");
                break;
            }
        };
        if let Err(e) = handle.deliver_inbound(frame).await {
            if e.is_fatal() {
                break;
            }
            debug!(error = %e, "Dropping malformed inbound frame");
        }
    }

    handle.shutdown().await;
    drop(handle);
    registry.remove(id);

    match writer.await {
        Ok(Ok(())) | Ok(Err(ChannelError::Closed)) => {}
        Ok(Err(e)) => debug!(error = %e, "Writer ended with error"),
        Err(e) => warn!(error = %e, "Writer task failed"),
    }
    info!("Connection closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn frames_are_length_prefixed_in_order() {
        let (client, server) = tokio::io::duplex(1024);
        let (mut channel, writer) = StreamChannel::spawn(server, FrameCodec::default(), 64);

        channel
            .send_reliable(Bytes::from_static(b"\x04\x01\x00\x00\x00"))
            .unwrap();
        channel.send_reliable(Bytes::from_static(b"\x02ab")).unwrap();
        drop(channel);
        writer.await.unwrap().unwrap();

        let mut received = Vec::new();
        let mut client = client;
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(
            received,
            b"\x00\x00\x00\x05\x04\x01\x00\x00\x00\x00\x00\x00\x03\x02ab".to_vec()
        );
    }

    #[tokio::test]
    async fn budget_counts_bytes_and_is_returned_after_write() {
        let (mut client, server) = tokio::io::duplex(1024);
        let (mut channel, writer) = StreamChannel::spawn(server, FrameCodec::default(), 8);

        channel.send_reliable(Bytes::from_static(b"\x02abcde")).unwrap();
        assert!(matches!(
            channel.send_reliable(Bytes::from_static(b"\x02xyz")),
            Err(ChannelError::Backpressure(8))
        ));

        let mut received = [0u8; 10];
        client.read_exact(&mut received).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while channel.available_bytes() != 8 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        channel.send_reliable(Bytes::from_static(b"\x02xyz")).unwrap();

        drop(channel);
        writer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn frame_count_is_not_the_limit() {
        let (_client, server) = tokio::io::duplex(1 << 20);
        let (mut channel, writer) = StreamChannel::spawn(server, FrameCodec::default(), 4096);

        for _ in 0..1000 {
            channel.send_reliable(Bytes::from_static(b"\x04\x00")).unwrap();
        }
        drop(channel);
        writer.await.unwrap().unwrap();
    }
}
