//! Chunked track transfer.
//!
//! A track's export bytes can exceed what the channel accepts in one message,
//! so a transfer is one `TrackId` announcement followed by raw chunk frames:
//!
//! ```text
//! [0x01][track id]            announcement, via the packet sender
//! [0x02][bytes 0..M]          chunk at offset 0
//! [0x02][bytes M..2M]         chunk at offset M
//! ...
//! [0x02][bytes kM..len]       remainder, possibly shorter than M
//! ```
//!
//! `M` is at most [`MAX_CHUNK_PAYLOAD`]. There are no sequence numbers and no
//! end marker: the channel is ordered, so the receiver concatenates in arrival
//! order, and the announced id is the content hash, so the receiver knows when
//! it has everything.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{info, instrument, warn};

use crate::core::packet::{PacketType, TrackIdPacket};
use crate::core::track::{TrackId, TrackSource};
use crate::error::{ProtocolError, Result, SendContext};
use crate::protocol::sender::PacketSender;
use crate::transport::ReliableChannel;
use crate::utils::metrics::{global_metrics, Timer};

pub use crate::config::MAX_CHUNK_PAYLOAD;

/// One slice of the content and where it starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub offset: usize,
    pub payload: &'a [u8],
}

impl Chunk<'_> {
    /// Build the wire frame: tag byte, then the payload verbatim.
    pub fn to_frame(&self) -> Bytes {
        let mut frame = BytesMut::with_capacity(1 + self.payload.len());
        frame.put_u8(PacketType::TrackChunk.tag());
        frame.put_slice(self.payload);
        frame.freeze()
    }
}

/// Deterministic partition of a byte sequence into consecutive slices of at
/// most `max_chunk_payload` bytes. Empty content yields no chunks.
#[derive(Debug, Clone)]
pub struct ChunkPlan<'a> {
    content: &'a [u8],
    max_chunk_payload: usize,
    offset: usize,
}

impl<'a> ChunkPlan<'a> {
    /// # Errors
    /// `ConfigError` unless `1 <= max_chunk_payload <= MAX_CHUNK_PAYLOAD`
    pub fn new(content: &'a [u8], max_chunk_payload: usize) -> Result<Self> {
        if max_chunk_payload == 0 || max_chunk_payload > MAX_CHUNK_PAYLOAD {
            return Err(ProtocolError::ConfigError(format!(
                "chunk payload size {max_chunk_payload} outside 1..={MAX_CHUNK_PAYLOAD}"
            )));
        }
        Ok(Self {
            content,
            max_chunk_payload,
            offset: 0,
        })
    }

    /// Total number of chunks the content splits into
    pub fn chunk_count(&self) -> usize {
        self.content.len().div_ceil(self.max_chunk_payload)
    }
}

impl<'a> Iterator for ChunkPlan<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Chunk<'a>> {
        if self.offset >= self.content.len() {
            return None;
        }
        let start = self.offset;
        let end = (start + self.max_chunk_payload).min(self.content.len());
        self.offset = end;
        Some(Chunk {
            offset: start,
            payload: &self.content[start..end],
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.content.len() - self.offset).div_ceil(self.max_chunk_payload);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ChunkPlan<'_> {}

/// Outcome of a completed transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSummary {
    pub track_id: TrackId,
    /// Chunk frames sent, announcement excluded
    pub chunks: usize,
    /// Payload bytes sent, tags excluded
    pub bytes: usize,
}

/// Announce `track` and stream its export bytes as chunk frames.
///
/// Stops at the first failure. A failure after the announcement leaves the
/// receiver with a truncated payload; callers must treat any error as a
/// failed transfer.
///
/// # Errors
/// - `ConfigError` for an invalid chunk size; nothing is sent
/// - `TrackResolution` if the id is unavailable; nothing is sent
/// - `Encoding` / `Transport` from the announcement; no chunks are sent
/// - `Transport` with `SendContext::Chunk { offset }` for a failed chunk
#[instrument(skip(sender, track), fields(track_id = tracing::field::Empty))]
pub fn send_track<C, T>(
    sender: &mut PacketSender<C>,
    track: &T,
    max_chunk_payload: usize,
) -> Result<TransferSummary>
where
    C: ReliableChannel,
    T: TrackSource + ?Sized,
{
    let _timer = Timer::start("send_track");
    let result = transfer(sender, track, max_chunk_payload);
    match &result {
        Ok(summary) => {
            global_metrics().track_sent();
            info!(
                chunks = summary.chunks,
                bytes = summary.bytes,
                "Track transfer complete"
            );
        }
        Err(e) => {
            global_metrics().track_failed();
            warn!(error = %e, "Track transfer aborted");
        }
    }
    result
}

fn transfer<C, T>(
    sender: &mut PacketSender<C>,
    track: &T,
    max_chunk_payload: usize,
) -> Result<TransferSummary>
where
    C: ReliableChannel,
    T: TrackSource + ?Sized,
{
    let content = track.export_bytes();
    let plan = ChunkPlan::new(content, max_chunk_payload)?;

    let track_id = track.track_id()?;
    tracing::Span::current().record("track_id", track_id.as_str());

    sender.send(&TrackIdPacket {
        track_id: track_id.clone(),
    })?;

    let mut chunks = 0;
    for chunk in plan {
        let frame = chunk.to_frame();
        let len = frame.len() as u64;
        let context = SendContext::Chunk {
            offset: chunk.offset,
        };
        sender.send_raw(frame, context)?;
        global_metrics().chunk_sent(len);
        chunks += 1;
    }

    Ok(TransferSummary {
        track_id,
        chunks,
        bytes: content.len(),
    })
}
