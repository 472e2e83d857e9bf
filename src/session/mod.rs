//! # Sessions
//!
//! Per-connection player state and the task that owns it.
//!
//! ## Components
//! - **Player**: identity, pending state, ping ledger, and the owned channel
//! - **Actor**: one tokio task per player; all access goes through its queue
//! - **Registry**: the live handles, for lookup and broadcast

pub mod actor;
pub mod player;
pub mod registry;

pub use actor::{spawn_player, PlayerHandle, SharedTrack, WeakPlayerHandle};
pub use player::{Identity, PendingState, Player, PlayerId, PlayerStatus, RunRecord};
pub use registry::SessionRegistry;
