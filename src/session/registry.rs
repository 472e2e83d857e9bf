//! Pool of live player sessions.
//!
//! The map only holds [`PlayerHandle`]s; each player's state stays inside its
//! own task. A session removes itself from the registry when its task exits,
//! so handles of closed channels do not linger. Broadcasts snapshot the
//! handles under the read lock and send after releasing it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::TransportSettings;
use crate::core::packet::OutboundPacket;
use crate::error::{constants, ProtocolError, Result};
use crate::session::actor::{spawn_player, PlayerHandle, WeakPlayerHandle};
use crate::session::player::{Player, PlayerId};
use crate::transport::ReliableChannel;
use crate::utils::metrics::global_metrics;

#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<PlayerId, PlayerHandle>>>,
    next_id: Arc<AtomicU32>,
    settings: Arc<TransportSettings>,
}

impl SessionRegistry {
    pub fn new(settings: TransportSettings) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU32::new(1)),
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    /// Hand out the next unused player id
    pub fn allocate_id(&self) -> PlayerId {
        PlayerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Start `player`'s session task and register its handle.
    ///
    /// # Errors
    /// `DuplicatePlayer` if the id is already registered, `RegistryFull` if
    /// `max_players` sessions are live.
    pub fn spawn<C>(&self, player: Player<C>) -> Result<PlayerHandle>
    where
        C: ReliableChannel + 'static,
    {
        let id = player.id();
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| ProtocolError::Registry(constants::ERR_REGISTRY_WRITE_LOCK))?;

        if sessions.contains_key(&id) {
            return Err(ProtocolError::DuplicatePlayer(id));
        }
        if sessions.len() >= self.settings.server.max_players {
            return Err(ProtocolError::RegistryFull(self.settings.server.max_players));
        }

        let (handle, task) = spawn_player(
            player,
            self.settings.server.command_queue,
            &self.settings.ping,
        );
        sessions.insert(id, handle.clone());
        drop(sessions);

        self.remove_on_exit(handle.downgrade(), task);
        debug!(player_id = %id, "Session registered");
        Ok(handle)
    }

    /// Unregister the session once its task exits, unless the id has since
    /// been taken by a different session.
    fn remove_on_exit(&self, session: WeakPlayerHandle, task: JoinHandle<()>) {
        let sessions = Arc::clone(&self.sessions);
        tokio::spawn(async move {
            let id = session.id();
            if let Err(e) = task.await {
                warn!(player_id = %id, error = %e, "Session task failed");
            }
            match sessions.write() {
                Ok(mut sessions) => {
                    if sessions.get(&id).is_some_and(|current| session.refers_to(current)) {
                        sessions.remove(&id);
                        debug!(player_id = %id, "Session unregistered");
                    }
                }
                Err(_) => warn!(player_id = %id, "{}", constants::ERR_REGISTRY_WRITE_LOCK),
            }
        });
    }

    pub fn get(&self, id: PlayerId) -> Option<PlayerHandle> {
        self.sessions
            .read()
            .ok()
            .and_then(|sessions| sessions.get(&id).cloned())
    }

    /// Forget a player without waiting for its task. The task keeps running
    /// until its last handle is dropped or it is shut down.
    pub fn remove(&self, id: PlayerId) -> Option<PlayerHandle> {
        self.sessions
            .write()
            .ok()
            .and_then(|mut sessions| sessions.remove(&id))
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consistent copy of the live handles
    pub fn snapshot(&self) -> Result<Vec<PlayerHandle>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| ProtocolError::Registry(constants::ERR_REGISTRY_READ_LOCK))?;
        Ok(sessions.values().cloned().collect())
    }

    /// Send `packet` to every registered player.
    ///
    /// Returns the players whose send failed. Players are independent, so one
    /// failure does not stop the others.
    pub async fn broadcast(
        &self,
        packet: impl Into<OutboundPacket>,
    ) -> Result<Vec<(PlayerId, ProtocolError)>> {
        let packet = packet.into();
        let handles = self.snapshot()?;

        let sends = handles.iter().map(|handle| {
            let packet = packet.clone();
            async move { (handle.id(), handle.send(packet).await) }
        });

        let failures = futures::future::join_all(sends)
            .await
            .into_iter()
            .filter_map(|(id, result)| result.err().map(|e| (id, e)))
            .collect::<Vec<_>>();

        for (id, e) in &failures {
            warn!(player_id = %id, error = %e, "Broadcast send failed");
        }
        Ok(failures)
    }

    /// Stop every session task, waiting up to `shutdown_timeout` for them to
    /// finish the commands already queued.
    pub async fn shutdown_all(&self) -> Result<()> {
        let handles = self.snapshot()?;
        for handle in &handles {
            handle.shutdown().await;
        }

        let drained = futures::future::join_all(handles.iter().map(|handle| handle.closed()));
        if tokio::time::timeout(self.settings.server.shutdown_timeout, drained)
            .await
            .is_err()
        {
            warn!(
                timeout_ms = self.settings.server.shutdown_timeout.as_millis() as u64,
                "Sessions still running after shutdown timeout"
            );
        }

        global_metrics().log_metrics();
        Ok(())
    }
}
