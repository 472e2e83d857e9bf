//! # Error Types
//!
//! Error handling for the per-player transport layer.
//!
//! Every failure is wrapped with enough context (packet type, chunk offset,
//! probe id, player id) to be diagnosed from the message alone.
//!
//! ## Error Categories
//! - **Encoding**: a packet could not be marshalled; nothing was sent. Recoverable.
//! - **Transport**: the reliable channel refused a frame. Connection-fatal.
//! - **Track resolution**: the track identifier was unavailable; nothing was sent.
//! - **Stale probe**: a ping reply matched no outstanding probe. Logged, never blocking.
//! - **Session**: the player was kicked or its session task has exited.
//! - **Registry**: the id is taken, the registry is full, or its lock is poisoned.
//!
//! ## Example Usage
//! ```rust
//! use race_transport::error::{ChannelError, ProtocolError, SendContext};
//! use race_transport::core::packet::PacketType;
//!
//! let err = ProtocolError::Transport {
//!     context: SendContext::Packet(PacketType::Ping),
//!     source: ChannelError::Closed,
//! };
//! assert!(err.is_fatal());
//! assert_eq!(err.to_string(), "failed to send Ping packet: channel closed");
//! ```

use std::fmt;
use std::io;
use thiserror::Error;

use crate::core::packet::PacketType;
use crate::protocol::ping::PingId;
use crate::session::player::PlayerId;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Registry lock errors
    pub const ERR_REGISTRY_WRITE_LOCK: &str = "Failed to acquire write lock on session registry";
    pub const ERR_REGISTRY_READ_LOCK: &str = "Failed to acquire read lock on session registry";

    /// Reassembly errors
    pub const ERR_NOT_AN_ANNOUNCEMENT: &str = "Expected a TrackId announcement frame";
    pub const ERR_NOT_A_CHUNK: &str = "Expected a TrackChunk frame";
    pub const ERR_TRANSFER_COMPLETE: &str = "Track transfer already complete";
    pub const ERR_TRACK_TOO_LARGE: &str = "Reassembled track exceeds size limit";
}

/// Failure surfaced by a [`ReliableChannel`](crate::transport::ReliableChannel).
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,

    /// Carries the queue limit, in the unit the channel budgets by
    #[error("outbound queue full (limit {0})")]
    Backpressure(usize),

    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Failure while marshalling a packet to bytes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("{0} is empty")]
    EmptyField(&'static str),

    #[error("{0} contains non-ASCII data")]
    NonAscii(&'static str),

    #[error("{field} too long: {len} bytes (max {max})")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
}

/// Failure while parsing an inbound frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty frame")]
    Empty,

    #[error("unknown packet type tag: {0:#04x}")]
    UnknownType(u8),

    #[error("truncated {packet_type} packet: expected {expected} bytes, got {actual}")]
    Truncated {
        packet_type: PacketType,
        expected: usize,
        actual: usize,
    },

    #[error("{0} packets are not accepted in this direction")]
    UnexpectedDirection(PacketType),

    #[error("{0} packet carries invalid UTF-8")]
    InvalidUtf8(PacketType),
}

/// Failure while resolving a track identifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackError {
    #[error("track export string is empty")]
    Empty,

    #[error("invalid base62 byte {byte:#04x} at position {position}")]
    InvalidCharacter { position: usize, byte: u8 },
}

/// Which send failed, for transport error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendContext {
    /// An ordinary encoded packet
    Packet(PacketType),
    /// A raw track chunk frame starting at `offset` in the export bytes
    Chunk { offset: usize },
}

impl fmt::Display for SendContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendContext::Packet(packet_type) => write!(f, "{packet_type} packet"),
            SendContext::Chunk { offset } => write!(f, "chunk at offset {offset}"),
        }
    }
}

// ProtocolError is the primary error type for all transport operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("failed to encode {packet_type} packet: {source}")]
    Encoding {
        packet_type: PacketType,
        source: EncodeError,
    },

    #[error("failed to send {context}: {source}")]
    Transport {
        context: SendContext,
        source: ChannelError,
    },

    #[error("failed to resolve track ID: {0}")]
    TrackResolution(#[from] TrackError),

    #[error("stale or unknown ping probe {0}")]
    StaleOrUnknownProbe(PingId),

    #[error("failed to decode frame: {0}")]
    Decode(#[from] DecodeError),

    #[error("player {0} has been kicked")]
    PlayerKicked(PlayerId),

    #[error("session for player {0} is closed")]
    SessionClosed(PlayerId),

    #[error("Reassembly error: {0}")]
    Reassembly(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("track is {len} bytes, above the {max} byte transfer limit")]
    TrackTooLarge { len: usize, max: usize },

    #[error("player {0} is already registered")]
    DuplicatePlayer(PlayerId),

    #[error("registry full ({0} players)")]
    RegistryFull(usize),

    #[error("Registry error: {0}")]
    Registry(&'static str),

    #[error("Logging error: {0}")]
    Logging(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// Whether the error means the player's channel is unusable and the
    /// session must be torn down.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::Transport { .. } | ProtocolError::SessionClosed(_)
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
