//! Per-connection player record.
//!
//! A [`Player`] owns its channel exclusively and is the only writer to it.
//! Gameplay state that other layers touch (pending state updates, latency
//! probes, reset counter) is reachable only through methods, so the
//! kicked flag and ordering rules are enforced in one place.

use bytes::Bytes;
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::TransportSettings;
use crate::core::packet::{GameMode, NewSessionPacket, PingPacket, PlayerPacket};
use crate::core::track::TrackSource;
use crate::error::{ProtocolError, Result};
use crate::protocol::chunking::{send_track, TransferSummary};
use crate::protocol::ping::{PingId, PingTracker};
use crate::protocol::sender::PacketSender;
use crate::transport::ReliableChannel;

/// Server-assigned player identifier, stable for the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerId(pub u32);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who the player says they are
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub nickname: String,
    pub country_code: String,
    pub car_style: String,
    /// Installed modifications, as reported by the client
    pub mods: Vec<String>,
    /// Whether the installed mods are compatible with an unmodified client
    pub mods_vanilla_compatible: bool,
}

/// A state update queued for the next flush
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingState {
    CarState { frame: u32, payload: Bytes },
    Reset { counter: u32 },
}

/// Best completed run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunRecord {
    pub frame_count: u32,
}

/// Read-only view of a player, safe to hand across tasks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerStatus {
    pub id: PlayerId,
    pub nickname: String,
    pub ping_ms: u32,
    pub outstanding_probes: usize,
    pub pending_states: usize,
    pub reset_counter: u32,
    pub record: Option<RunRecord>,
    pub kicked: bool,
}

#[derive(Debug)]
pub struct Player<C> {
    id: PlayerId,
    identity: Identity,
    sender: PacketSender<C>,
    reset_counter: u32,
    pending: VecDeque<PendingState>,
    ping: PingTracker,
    record: Option<RunRecord>,
    kicked: bool,
    max_chunk_payload: usize,
    max_track_bytes: usize,
}

impl<C: ReliableChannel> Player<C> {
    pub fn new(id: PlayerId, identity: Identity, channel: C, settings: &TransportSettings) -> Self {
        Self {
            id,
            identity,
            sender: PacketSender::new(channel),
            reset_counter: 0,
            pending: VecDeque::new(),
            ping: PingTracker::new(&settings.ping),
            record: None,
            kicked: false,
            max_chunk_payload: settings.transport.max_chunk_payload,
            max_track_bytes: settings.transport.max_track_bytes,
        }
    }

    pub fn id(&self) -> PlayerId {
        self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn reset_counter(&self) -> u32 {
        self.reset_counter
    }

    pub fn is_kicked(&self) -> bool {
        self.kicked
    }

    pub fn ping_ms(&self) -> u32 {
        self.ping.ping_ms()
    }

    pub fn record(&self) -> Option<RunRecord> {
        self.record
    }

    pub fn channel(&self) -> &C {
        self.sender.channel()
    }

    /// Encode and send one packet.
    pub fn send<P: PlayerPacket + ?Sized>(&mut self, packet: &P) -> Result<()> {
        self.sender.send(packet)
    }

    /// Announce a track and send its content in chunk frames.
    ///
    /// # Errors
    /// `TrackTooLarge` for a track above `max_track_bytes`; nothing is sent.
    pub fn send_track<T: TrackSource + ?Sized>(&mut self, track: &T) -> Result<TransferSummary> {
        let len = track.export_bytes().len();
        if len > self.max_track_bytes {
            return Err(ProtocolError::TrackTooLarge {
                len,
                max: self.max_track_bytes,
            });
        }
        send_track(&mut self.sender, track, self.max_chunk_payload)
    }

    /// Tell the player a new session started.
    pub fn start_new_session(&mut self, session_id: u32, game_mode: GameMode) -> Result<()> {
        self.send(&NewSessionPacket {
            session_id,
            game_mode,
        })
    }

    /// Allocate a probe id without sending anything.
    pub fn record_probe(&mut self, now: Instant) -> PingId {
        self.ping.record_probe(now)
    }

    /// Send a `Ping` and record it as outstanding once the send succeeded.
    pub fn send_ping(&mut self, now: Instant) -> Result<PingId> {
        let ping_id = self.ping.next_probe_id();
        self.send(&PingPacket { ping_id })?;
        Ok(self.ping.record_probe(now))
    }

    /// Match a `PingResponse` and update the latency estimate.
    pub fn resolve_probe(&mut self, id: PingId, arrival: Instant) -> Result<Duration> {
        self.ping.resolve_probe(id, arrival)
    }

    pub fn expire_stale_probes(&mut self, now: Instant) -> usize {
        self.ping.expire_stale(now)
    }

    pub fn outstanding_probes(&self) -> usize {
        self.ping.outstanding()
    }

    /// Queue a state update behind any already pending.
    pub fn append_pending_state(&mut self, state: PendingState) -> Result<()> {
        self.ensure_active()?;
        self.pending.push_back(state);
        Ok(())
    }

    /// Take every pending update, oldest first.
    pub fn drain_pending_states(&mut self) -> Vec<PendingState> {
        self.pending.drain(..).collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Count a session restart for this player and return the new count.
    pub fn increment_reset_counter(&mut self) -> Result<u32> {
        self.ensure_active()?;
        self.reset_counter = self.reset_counter.wrapping_add(1);
        debug!(
            player_id = %self.id,
            reset_counter = self.reset_counter,
            "Reset counter incremented"
        );
        Ok(self.reset_counter)
    }

    /// Keep `frame_count` if it beats the current record. Returns whether it did.
    pub fn submit_run(&mut self, frame_count: u32) -> Result<bool> {
        self.ensure_active()?;
        let improved = self.record.map_or(true, |r| frame_count < r.frame_count);
        if improved {
            self.record = Some(RunRecord { frame_count });
        }
        Ok(improved)
    }

    /// Mark the player as kicked. Terminal.
    pub fn kick(&mut self) {
        if !self.kicked {
            self.kicked = true;
            info!(player_id = %self.id, nickname = %self.identity.nickname, "Player kicked");
        }
    }

    pub fn status(&self) -> PlayerStatus {
        PlayerStatus {
            id: self.id,
            nickname: self.identity.nickname.clone(),
            ping_ms: self.ping.ping_ms(),
            outstanding_probes: self.ping.outstanding(),
            pending_states: self.pending.len(),
            reset_counter: self.reset_counter,
            record: self.record,
            kicked: self.kicked,
        }
    }

    fn ensure_active(&self) -> Result<()> {
        if self.kicked {
            return Err(ProtocolError::PlayerKicked(self.id));
        }
        Ok(())
    }
}
