//! Framed packet sender.
//!
//! Every packet kind goes through the same two steps: marshal, then one
//! `send_reliable` call with the encoded bytes. There is no per-type branch.
//! A packet that fails to encode is never sent, not even partially.

use bytes::Bytes;
use tracing::{trace, warn};

use crate::core::packet::PlayerPacket;
use crate::error::{ProtocolError, Result, SendContext};
use crate::transport::ReliableChannel;
use crate::utils::metrics::global_metrics;

/// Owns a player's channel and writes frames to it in call order.
#[derive(Debug)]
pub struct PacketSender<C> {
    channel: C,
}

impl<C: ReliableChannel> PacketSender<C> {
    pub fn new(channel: C) -> Self {
        Self { channel }
    }

    /// Encode `packet` and submit it as one frame.
    ///
    /// # Errors
    /// - `Encoding` if the packet cannot be marshalled; nothing is sent
    /// - `Transport` if the channel refuses the frame
    pub fn send<P: PlayerPacket + ?Sized>(&mut self, packet: &P) -> Result<()> {
        let packet_type = packet.packet_type();
        let frame = packet.marshal().map_err(|source| {
            global_metrics().encode_failure();
            warn!(%packet_type, error = %source, "Packet encoding failed");
            ProtocolError::Encoding {
                packet_type,
                source,
            }
        })?;

        let len = frame.len() as u64;
        self.send_raw(frame, SendContext::Packet(packet_type))?;
        global_metrics().packet_sent(len);
        trace!(%packet_type, bytes = len, "Packet sent");
        Ok(())
    }

    /// Submit an already framed byte sequence. `context` names the frame in
    /// the error if the channel refuses it.
    pub fn send_raw(&mut self, frame: Bytes, context: SendContext) -> Result<()> {
        self.channel.send_reliable(frame).map_err(|source| {
            global_metrics().transport_failure();
            warn!(%context, error = %source, "Channel send failed");
            ProtocolError::Transport { context, source }
        })
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn into_channel(self) -> C {
        self.channel
    }
}
