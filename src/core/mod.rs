//! # Core Protocol Components
//!
//! Packet tags and encodings, the stream framing codec, and track payloads.
//!
//! ## Components
//! - **Packet**: one-byte type tags and the `PlayerPacket` capability trait
//! - **Codec**: Tokio codec for length-delimited framing over byte streams
//! - **Track**: the `TrackSource` seam and the export-string `Track`
//!
//! ## Frame Layout
//! ```text
//! [Type(1)] [Body(N)]
//! ```
//! Stream-backed channels add a 4-byte big-endian length prefix; message
//! channels carry the frame as-is.

pub mod codec;
pub mod packet;
pub mod track;
