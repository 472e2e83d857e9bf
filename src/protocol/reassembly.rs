//! Receiver side of a chunked track transfer.
//!
//! Chunk payloads are appended in arrival order. Since the announced id is the
//! SHA-256 of the full export bytes, the assembler knows the transfer is done
//! as soon as the running digest matches it.

use bytes::BytesMut;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::core::packet::{frame_type, PacketType, TrackIdPacket};
use crate::core::track::{Track, TrackId};
use crate::error::{constants, ProtocolError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyProgress {
    /// More chunks are expected; `received` payload bytes so far
    Incomplete { received: usize },
    /// The accumulated bytes hash to the announced id
    Complete,
}

#[derive(Debug)]
pub struct TrackAssembler {
    track_id: TrackId,
    buffer: BytesMut,
    hasher: Sha256,
    max_track_bytes: usize,
    chunks: usize,
    complete: bool,
}

impl TrackAssembler {
    /// Start a transfer from its `TrackId` announcement frame.
    pub fn from_announcement(frame: &[u8], max_track_bytes: usize) -> Result<Self> {
        if frame_type(frame)? != PacketType::TrackId {
            return Err(ProtocolError::Reassembly(
                constants::ERR_NOT_AN_ANNOUNCEMENT.to_string(),
            ));
        }
        let announcement = TrackIdPacket::decode(frame)?;
        debug!(track_id = %announcement.track_id, "Track transfer announced");

        Ok(Self {
            track_id: announcement.track_id,
            buffer: BytesMut::new(),
            hasher: Sha256::new(),
            max_track_bytes,
            chunks: 0,
            complete: false,
        })
    }

    /// Append one `TrackChunk` frame.
    ///
    /// # Errors
    /// `Reassembly` for a non-chunk frame, a chunk after completion, or growth
    /// past `max_track_bytes`. The buffer is unchanged on error.
    pub fn push(&mut self, frame: &[u8]) -> Result<AssemblyProgress> {
        if frame_type(frame)? != PacketType::TrackChunk {
            return Err(ProtocolError::Reassembly(constants::ERR_NOT_A_CHUNK.to_string()));
        }
        if self.complete {
            return Err(ProtocolError::Reassembly(
                constants::ERR_TRANSFER_COMPLETE.to_string(),
            ));
        }

        let payload = &frame[1..];
        if self.buffer.len() + payload.len() > self.max_track_bytes {
            return Err(ProtocolError::Reassembly(format!(
                "{}: {} bytes (max {})",
                constants::ERR_TRACK_TOO_LARGE,
                self.buffer.len() + payload.len(),
                self.max_track_bytes
            )));
        }

        self.buffer.extend_from_slice(payload);
        self.hasher.update(payload);
        self.chunks += 1;

        let digest = self.hasher.clone().finalize();
        if TrackId::from_digest(&digest) == self.track_id {
            self.complete = true;
            debug!(
                track_id = %self.track_id,
                chunks = self.chunks,
                bytes = self.buffer.len(),
                "Track reassembled"
            );
            return Ok(AssemblyProgress::Complete);
        }

        Ok(AssemblyProgress::Incomplete {
            received: self.buffer.len(),
        })
    }

    pub fn track_id(&self) -> &TrackId {
        &self.track_id
    }

    /// Payload bytes received so far
    pub fn received(&self) -> usize {
        self.buffer.len()
    }

    pub fn chunks(&self) -> usize {
        self.chunks
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Finish the transfer and recover the export string.
    pub fn into_track(self) -> Result<Track> {
        if !self.complete {
            return Err(ProtocolError::Reassembly(format!(
                "track {} incomplete after {} bytes",
                self.track_id,
                self.buffer.len()
            )));
        }
        let export = String::from_utf8(self.buffer.to_vec())
            .map_err(|e| ProtocolError::Reassembly(format!("track is not UTF-8: {e}")))?;
        Ok(Track::new(export))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::packet::PlayerPacket;
    use crate::core::track::TrackSource;
    use crate::protocol::chunking::ChunkPlan;

    fn announcement(track: &Track) -> Vec<u8> {
        TrackIdPacket {
            track_id: track.track_id().unwrap(),
        }
        .marshal()
        .unwrap()
        .to_vec()
    }

    #[test]
    fn completes_exactly_on_last_chunk() {
        let track = Track::new("Zz9".repeat(3000));
        let mut assembler = TrackAssembler::from_announcement(&announcement(&track), 1 << 20)
            .unwrap();

        let frames: Vec<_> = ChunkPlan::new(track.export_bytes(), 4000)
            .unwrap()
            .map(|c| c.to_frame())
            .collect();
        let (last, rest) = frames.split_last().unwrap();
        for frame in rest {
            assert!(matches!(
                assembler.push(frame).unwrap(),
                AssemblyProgress::Incomplete { .. }
            ));
        }
        assert_eq!(assembler.push(last).unwrap(), AssemblyProgress::Complete);
        assert_eq!(assembler.into_track().unwrap(), track);
    }

    #[test]
    fn rejects_non_chunk_frames() {
        let track = Track::new("abc");
        let frame = announcement(&track);
        let mut assembler = TrackAssembler::from_announcement(&frame, 1024).unwrap();
        assert!(matches!(
            assembler.push(&frame),
            Err(ProtocolError::Reassembly(_))
        ));
        assert_eq!(assembler.received(), 0);
    }

    #[test]
    fn enforces_size_limit() {
        let track = Track::new("abcdef");
        let mut assembler = TrackAssembler::from_announcement(&announcement(&track), 4).unwrap();
        assert!(assembler.push(b"\x02abcdef").is_err());
        assert_eq!(assembler.received(), 0);
    }

    #[test]
    fn incomplete_transfer_cannot_finish() {
        let track = Track::new("abcdef");
        let mut assembler = TrackAssembler::from_announcement(&announcement(&track), 64).unwrap();
        assembler.push(b"\x02abc").unwrap();
        assert!(assembler.into_track().is_err());
    }
}
