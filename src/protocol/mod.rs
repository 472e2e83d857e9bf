//! # Protocol Layer
//!
//! What gets written to a player's channel, and in which shape.
//!
//! ## Components
//! - **Sender**: uniform encode-then-send for every packet kind
//! - **Chunking**: track announcement plus bounded chunk frames
//! - **Reassembly**: receiver-side concatenation and completion check
//! - **Ping**: outstanding latency probes and the smoothed estimate

pub mod chunking;
pub mod ping;
pub mod reassembly;
pub mod sender;

pub use chunking::{send_track, ChunkPlan, TransferSummary, MAX_CHUNK_PAYLOAD};
pub use ping::{PingId, PingTracker};
pub use reassembly::{AssemblyProgress, TrackAssembler};
pub use sender::PacketSender;
