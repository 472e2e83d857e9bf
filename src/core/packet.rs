//! # Packet Types
//!
//! Every frame on a player's channel starts with a one-byte [`PacketType`] tag.
//! Ordinary packets implement [`PlayerPacket`] and marshal themselves into a
//! complete frame (tag included). Track chunk frames are raw bytes built by
//! [`crate::protocol::chunking`] and never go through this module's encoders.
//!
//! ## Wire Format
//! ```text
//! TrackId       [0x01] [ascii track id ...]
//! TrackChunk    [0x02] [raw payload, <= 16383 bytes]
//! NewSession    [0x03] [session_id: u32 LE] [game_mode: u8]
//! Ping          [0x04] [ping_id: u32 LE]
//! PingResponse  [0x05] [ping_id: u32 LE]
//! Kicked        [0x06] [utf-8 reason, <= 255 bytes]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

use crate::core::track::TrackId;
use crate::error::{DecodeError, EncodeError};
use crate::protocol::ping::PingId;

/// Maximum length of a kick reason in bytes
pub const MAX_REASON_LEN: usize = 255;

/// One-byte type tag leading every frame
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    TrackId = 0x01,
    TrackChunk = 0x02,
    NewSession = 0x03,
    Ping = 0x04,
    PingResponse = 0x05,
    Kicked = 0x06,
}

impl PacketType {
    /// Wire tag byte
    #[inline]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Map a wire tag back to its type
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(PacketType::TrackId),
            0x02 => Some(PacketType::TrackChunk),
            0x03 => Some(PacketType::NewSession),
            0x04 => Some(PacketType::Ping),
            0x05 => Some(PacketType::PingResponse),
            0x06 => Some(PacketType::Kicked),
            _ => None,
        }
    }

    /// Human-readable name used in logs and error messages
    pub fn name(self) -> &'static str {
        match self {
            PacketType::TrackId => "TrackId",
            PacketType::TrackChunk => "TrackChunk",
            PacketType::NewSession => "NewSession",
            PacketType::Ping => "Ping",
            PacketType::PingResponse => "PingResponse",
            PacketType::Kicked => "Kicked",
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Read the type tag of a frame without decoding its body.
pub fn frame_type(frame: &[u8]) -> Result<PacketType, DecodeError> {
    let tag = *frame.first().ok_or(DecodeError::Empty)?;
    PacketType::from_tag(tag).ok_or(DecodeError::UnknownType(tag))
}

/// Capability set required to send a value over a player's channel:
/// produce a byte encoding and report a type tag.
pub trait PlayerPacket {
    /// Type tag of this packet
    fn packet_type(&self) -> PacketType;

    /// Encode the packet into a complete frame, tag byte included
    fn marshal(&self) -> Result<Bytes, EncodeError>;
}

/// Announces the track whose chunks follow on the same channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackIdPacket {
    pub track_id: TrackId,
}

impl TrackIdPacket {
    /// Decode a `TrackId` frame
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        expect_type(frame, PacketType::TrackId)?;
        let body = std::str::from_utf8(&frame[1..])
            .map_err(|_| DecodeError::InvalidUtf8(PacketType::TrackId))?;
        Ok(Self {
            track_id: TrackId::from(body.to_string()),
        })
    }
}

impl PlayerPacket for TrackIdPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::TrackId
    }

    fn marshal(&self) -> Result<Bytes, EncodeError> {
        let id = self.track_id.as_str();
        if id.is_empty() {
            return Err(EncodeError::EmptyField("track_id"));
        }
        if !id.is_ascii() {
            return Err(EncodeError::NonAscii("track_id"));
        }

        let mut buf = BytesMut::with_capacity(1 + id.len());
        buf.put_u8(self.packet_type().tag());
        buf.put_slice(id.as_bytes());
        Ok(buf.freeze())
    }
}

/// Game mode carried by [`NewSessionPacket`]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GameMode {
    #[default]
    Casual = 0,
    Competitive = 1,
}

impl GameMode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(GameMode::Casual),
            1 => Some(GameMode::Competitive),
            _ => None,
        }
    }
}

/// Tells a player a new racing session has started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewSessionPacket {
    pub session_id: u32,
    pub game_mode: GameMode,
}

impl NewSessionPacket {
    const BODY_LEN: usize = 5;

    /// Decode a `NewSession` frame. Unknown game modes fall back to casual.
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        let mut body = expect_body(frame, PacketType::NewSession, Self::BODY_LEN)?;
        let session_id = body.get_u32_le();
        let game_mode = GameMode::from_byte(body.get_u8()).unwrap_or_default();
        Ok(Self {
            session_id,
            game_mode,
        })
    }
}

impl PlayerPacket for NewSessionPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::NewSession
    }

    fn marshal(&self) -> Result<Bytes, EncodeError> {
        let mut buf = BytesMut::with_capacity(1 + Self::BODY_LEN);
        buf.put_u8(self.packet_type().tag());
        buf.put_u32_le(self.session_id);
        buf.put_u8(self.game_mode as u8);
        Ok(buf.freeze())
    }
}

/// Latency probe. The client echoes the id back in a `PingResponse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingPacket {
    pub ping_id: PingId,
}

impl PingPacket {
    /// Decode a `Ping` frame
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        let mut body = expect_body(frame, PacketType::Ping, 4)?;
        Ok(Self {
            ping_id: PingId(body.get_u32_le()),
        })
    }
}

impl PlayerPacket for PingPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Ping
    }

    fn marshal(&self) -> Result<Bytes, EncodeError> {
        let mut buf = BytesMut::with_capacity(5);
        buf.put_u8(self.packet_type().tag());
        buf.put_u32_le(self.ping_id.0);
        Ok(buf.freeze())
    }
}

/// Final notice sent to a player before the server drops them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KickedPacket {
    pub reason: String,
}

impl KickedPacket {
    /// Decode a `Kicked` frame
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        expect_type(frame, PacketType::Kicked)?;
        let reason = std::str::from_utf8(&frame[1..])
            .map_err(|_| DecodeError::InvalidUtf8(PacketType::Kicked))?;
        Ok(Self {
            reason: reason.to_string(),
        })
    }
}

impl PlayerPacket for KickedPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Kicked
    }

    fn marshal(&self) -> Result<Bytes, EncodeError> {
        if self.reason.len() > MAX_REASON_LEN {
            return Err(EncodeError::FieldTooLong {
                field: "reason",
                len: self.reason.len(),
                max: MAX_REASON_LEN,
            });
        }

        let mut buf = BytesMut::with_capacity(1 + self.reason.len());
        buf.put_u8(self.packet_type().tag());
        buf.put_slice(self.reason.as_bytes());
        Ok(buf.freeze())
    }
}

/// Any server-to-client packet that goes through the generic encode step.
///
/// Used as the payload of session commands so that a single queue can carry
/// every packet kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundPacket {
    TrackId(TrackIdPacket),
    NewSession(NewSessionPacket),
    Ping(PingPacket),
    Kicked(KickedPacket),
}

impl PlayerPacket for OutboundPacket {
    fn packet_type(&self) -> PacketType {
        match self {
            OutboundPacket::TrackId(p) => p.packet_type(),
            OutboundPacket::NewSession(p) => p.packet_type(),
            OutboundPacket::Ping(p) => p.packet_type(),
            OutboundPacket::Kicked(p) => p.packet_type(),
        }
    }

    fn marshal(&self) -> Result<Bytes, EncodeError> {
        match self {
            OutboundPacket::TrackId(p) => p.marshal(),
            OutboundPacket::NewSession(p) => p.marshal(),
            OutboundPacket::Ping(p) => p.marshal(),
            OutboundPacket::Kicked(p) => p.marshal(),
        }
    }
}

impl From<TrackIdPacket> for OutboundPacket {
    fn from(p: TrackIdPacket) -> Self {
        OutboundPacket::TrackId(p)
    }
}

impl From<NewSessionPacket> for OutboundPacket {
    fn from(p: NewSessionPacket) -> Self {
        OutboundPacket::NewSession(p)
    }
}

impl From<PingPacket> for OutboundPacket {
    fn from(p: PingPacket) -> Self {
        OutboundPacket::Ping(p)
    }
}

impl From<KickedPacket> for OutboundPacket {
    fn from(p: KickedPacket) -> Self {
        OutboundPacket::Kicked(p)
    }
}

/// Packets a client may send to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundPacket {
    PingResponse { ping_id: PingId },
}

impl InboundPacket {
    /// Decode a frame received from a client.
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        match frame_type(frame)? {
            PacketType::PingResponse => {
                let mut body = expect_body(frame, PacketType::PingResponse, 4)?;
                Ok(InboundPacket::PingResponse {
                    ping_id: PingId(body.get_u32_le()),
                })
            }
            other => Err(DecodeError::UnexpectedDirection(other)),
        }
    }

    /// Encode as a client would. Used by client-side tooling and tests.
    pub fn encode(&self) -> Bytes {
        match self {
            InboundPacket::PingResponse { ping_id } => {
                let mut buf = BytesMut::with_capacity(5);
                buf.put_u8(PacketType::PingResponse.tag());
                buf.put_u32_le(ping_id.0);
                buf.freeze()
            }
        }
    }
}

fn expect_type(frame: &[u8], expected: PacketType) -> Result<(), DecodeError> {
    let actual = frame_type(frame)?;
    if actual != expected {
        return Err(DecodeError::UnexpectedDirection(actual));
    }
    Ok(())
}

/// Check the tag and body length, returning the body for fixed-size reads.
fn expect_body(frame: &[u8], expected: PacketType, len: usize) -> Result<&[u8], DecodeError> {
    expect_type(frame, expected)?;
    let body = &frame[1..];
    if body.len() < len {
        return Err(DecodeError::Truncated {
            packet_type: expected,
            expected: len,
            actual: body.len(),
        });
    }
    Ok(body)
}
