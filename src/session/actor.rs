//! Single-writer session task.
//!
//! Each player is owned by one tokio task. Everything that touches the player
//! (sends, track transfers, probes, pending state) arrives as a command on one
//! bounded queue and runs to completion before the next command starts, so
//! frames reach the channel in exactly the order callers issued them and a
//! track's chunks are never interleaved with other packets.
//!
//! A transport failure ends the task: the caller gets the error, then the
//! player and its channel are dropped.

use bytes::Bytes;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::config::PingConfig;
use crate::core::packet::{GameMode, InboundPacket, KickedPacket, OutboundPacket};
use crate::core::track::TrackSource;
use crate::error::{ProtocolError, Result};
use crate::protocol::chunking::TransferSummary;
use crate::protocol::ping::PingId;
use crate::session::player::{PendingState, Player, PlayerId, PlayerStatus};
use crate::transport::ReliableChannel;
use crate::utils::metrics::global_metrics;

/// Shared, thread-safe track handle for transfers
pub type SharedTrack = Arc<dyn TrackSource + Send + Sync>;

enum PlayerCommand {
    Send {
        packet: OutboundPacket,
        reply: oneshot::Sender<Result<()>>,
    },
    SendTrack {
        track: SharedTrack,
        reply: oneshot::Sender<Result<TransferSummary>>,
    },
    StartNewSession {
        session_id: u32,
        game_mode: GameMode,
        reply: oneshot::Sender<Result<()>>,
    },
    SendPing {
        reply: oneshot::Sender<Result<PingId>>,
    },
    Inbound {
        frame: Bytes,
        reply: oneshot::Sender<Result<()>>,
    },
    AppendPending {
        state: PendingState,
        reply: oneshot::Sender<Result<()>>,
    },
    DrainPending {
        reply: oneshot::Sender<Result<Vec<PendingState>>>,
    },
    IncrementReset {
        reply: oneshot::Sender<Result<u32>>,
    },
    SubmitRun {
        frame_count: u32,
        reply: oneshot::Sender<Result<bool>>,
    },
    Kick {
        reason: Option<String>,
        reply: oneshot::Sender<Result<()>>,
    },
    Status {
        reply: oneshot::Sender<Result<PlayerStatus>>,
    },
    Shutdown,
}

/// Cloneable address of a running session task.
#[derive(Debug, Clone)]
pub struct PlayerHandle {
    id: PlayerId,
    tx: mpsc::Sender<PlayerCommand>,
}

/// Non-owning reference to a session. Does not keep the task alive.
#[derive(Debug, Clone)]
pub struct WeakPlayerHandle {
    id: PlayerId,
    tx: mpsc::WeakSender<PlayerCommand>,
}

impl WeakPlayerHandle {
    pub fn id(&self) -> PlayerId {
        self.id
    }

    /// Whether `handle` addresses the same session task
    pub fn refers_to(&self, handle: &PlayerHandle) -> bool {
        self.tx
            .upgrade()
            .is_some_and(|tx| tx.same_channel(&handle.tx))
    }
}

impl std::fmt::Debug for PlayerCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PlayerCommand::Send { .. } => "Send",
            PlayerCommand::SendTrack { .. } => "SendTrack",
            PlayerCommand::StartNewSession { .. } => "StartNewSession",
            PlayerCommand::SendPing { .. } => "SendPing",
            PlayerCommand::Inbound { .. } => "Inbound",
            PlayerCommand::AppendPending { .. } => "AppendPending",
            PlayerCommand::DrainPending { .. } => "DrainPending",
            PlayerCommand::IncrementReset { .. } => "IncrementReset",
            PlayerCommand::SubmitRun { .. } => "SubmitRun",
            PlayerCommand::Kick { .. } => "Kick",
            PlayerCommand::Status { .. } => "Status",
            PlayerCommand::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}

impl PlayerHandle {
    pub fn id(&self) -> PlayerId {
        self.id
    }

    /// Whether the session task has exited
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn downgrade(&self) -> WeakPlayerHandle {
        WeakPlayerHandle {
            id: self.id,
            tx: self.tx.downgrade(),
        }
    }

    /// Wait until the session task has exited.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }

    /// Encode and send one packet.
    pub async fn send(&self, packet: impl Into<OutboundPacket>) -> Result<()> {
        let packet = packet.into();
        self.request(|reply| PlayerCommand::Send { packet, reply })
            .await
    }

    /// Announce and stream a track. Nothing else is written to this player's
    /// channel until the transfer finishes or fails.
    pub async fn send_track(&self, track: SharedTrack) -> Result<TransferSummary> {
        self.request(|reply| PlayerCommand::SendTrack { track, reply })
            .await
    }

    pub async fn start_new_session(&self, session_id: u32, game_mode: GameMode) -> Result<()> {
        self.request(|reply| PlayerCommand::StartNewSession {
            session_id,
            game_mode,
            reply,
        })
        .await
    }

    /// Send a latency probe now, independent of the automatic timer.
    pub async fn send_ping(&self) -> Result<PingId> {
        self.request(|reply| PlayerCommand::SendPing { reply }).await
    }

    /// Hand a frame received from the client to the session.
    pub async fn deliver_inbound(&self, frame: Bytes) -> Result<()> {
        self.request(|reply| PlayerCommand::Inbound { frame, reply })
            .await
    }

    pub async fn append_pending_state(&self, state: PendingState) -> Result<()> {
        self.request(|reply| PlayerCommand::AppendPending { state, reply })
            .await
    }

    pub async fn drain_pending_states(&self) -> Result<Vec<PendingState>> {
        self.request(|reply| PlayerCommand::DrainPending { reply })
            .await
    }

    pub async fn increment_reset_counter(&self) -> Result<u32> {
        self.request(|reply| PlayerCommand::IncrementReset { reply })
            .await
    }

    pub async fn submit_run(&self, frame_count: u32) -> Result<bool> {
        self.request(|reply| PlayerCommand::SubmitRun { frame_count, reply })
            .await
    }

    /// Mark the player kicked, optionally sending a `Kicked` notice first.
    pub async fn kick(&self, reason: Option<String>) -> Result<()> {
        self.request(|reply| PlayerCommand::Kick { reason, reply })
            .await
    }

    pub async fn status(&self) -> Result<PlayerStatus> {
        self.request(|reply| PlayerCommand::Status { reply }).await
    }

    /// Ask the task to stop after the commands already queued.
    pub async fn shutdown(&self) {
        // Already stopped if this fails
        let _ = self.tx.send(PlayerCommand::Shutdown).await;
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> PlayerCommand,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| ProtocolError::SessionClosed(self.id))?;
        reply_rx
            .await
            .map_err(|_| ProtocolError::SessionClosed(self.id))?
    }
}

/// Start the session task for `player`.
///
/// With `ping.auto_ping` set, the task also sweeps stale probes and sends a
/// `Ping` every `ping.interval`.
pub fn spawn_player<C>(
    player: Player<C>,
    command_queue: usize,
    ping: &PingConfig,
) -> (PlayerHandle, JoinHandle<()>)
where
    C: ReliableChannel + 'static,
{
    let (tx, rx) = mpsc::channel(command_queue.max(1));
    let handle = PlayerHandle {
        id: player.id(),
        tx,
    };
    let auto_ping = ping.auto_ping.then_some(ping.interval);
    let task = tokio::spawn(run(player, rx, auto_ping));
    (handle, task)
}

#[instrument(skip_all, fields(player_id = %player.id()))]
async fn run<C: ReliableChannel>(
    mut player: Player<C>,
    mut rx: mpsc::Receiver<PlayerCommand>,
    auto_ping: Option<Duration>,
) {
    global_metrics().session_started();
    info!(nickname = %player.identity().nickname, "Session started");

    let mut ticker = auto_ping.map(|period| {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        tokio::select! {
            command = rx.recv() => {
                let Some(command) = command else { break };
                if handle_command(&mut player, command).is_break() {
                    break;
                }
            }
            _ = next_tick(&mut ticker) => {
                let now = Instant::now();
                player.expire_stale_probes(now);
                if let Err(e) = player.send_ping(now) {
                    if e.is_fatal() {
                        break;
                    }
                }
            }
        }
    }

    global_metrics().session_ended();
    info!("Session ended");
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn handle_command<C: ReliableChannel>(
    player: &mut Player<C>,
    command: PlayerCommand,
) -> ControlFlow<()> {
    debug!(?command, "Handling command");
    match command {
        PlayerCommand::Send { packet, reply } => respond(reply, player.send(&packet)),
        PlayerCommand::SendTrack { track, reply } => {
            respond(reply, player.send_track(&*track))
        }
        PlayerCommand::StartNewSession {
            session_id,
            game_mode,
            reply,
        } => respond(reply, player.start_new_session(session_id, game_mode)),
        PlayerCommand::SendPing { reply } => respond(reply, player.send_ping(Instant::now())),
        PlayerCommand::Inbound { frame, reply } => respond(reply, handle_inbound(player, &frame)),
        PlayerCommand::AppendPending { state, reply } => {
            respond(reply, player.append_pending_state(state))
        }
        PlayerCommand::DrainPending { reply } => {
            respond(reply, Ok(player.drain_pending_states()))
        }
        PlayerCommand::IncrementReset { reply } => {
            respond(reply, player.increment_reset_counter())
        }
        PlayerCommand::SubmitRun { frame_count, reply } => {
            respond(reply, player.submit_run(frame_count))
        }
        PlayerCommand::Kick { reason, reply } => {
            let notice = match reason {
                Some(reason) => player.send(&KickedPacket { reason }),
                None => Ok(()),
            };
            player.kick();
            respond(reply, notice)
        }
        PlayerCommand::Status { reply } => respond(reply, Ok(player.status())),
        PlayerCommand::Shutdown => ControlFlow::Break(()),
    }
}

fn handle_inbound<C: ReliableChannel>(player: &mut Player<C>, frame: &[u8]) -> Result<()> {
    global_metrics().frame_received();
    match InboundPacket::decode(frame)? {
        InboundPacket::PingResponse { ping_id } => {
            match player.resolve_probe(ping_id, Instant::now()) {
                Ok(_) => Ok(()),
                Err(ProtocolError::StaleOrUnknownProbe(id)) => {
                    debug!(ping_id = %id, "Ignoring stale ping response");
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
    }
}

/// Reply to the caller; stop the task if the result was connection-fatal.
fn respond<T>(reply: oneshot::Sender<Result<T>>, result: Result<T>) -> ControlFlow<()> {
    let fatal = matches!(&result, Err(e) if e.is_fatal());
    if let Err(e) = &result {
        if fatal {
            warn!(error = %e, "Connection-fatal error, closing session");
        }
    }
    // Caller may have stopped waiting
    let _ = reply.send(result);
    if fatal {
        ControlFlow::Break(())
    } else {
        ControlFlow::Continue(())
    }
}
