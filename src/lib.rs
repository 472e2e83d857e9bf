//! # race-transport
//!
//! Per-player packet transport for a multiplayer racing session server.
//!
//! Every connected player gets one [`Player`](session::Player), owned by one
//! session task. The task is the only writer to the player's reliable
//! channel, so packets arrive in the order they were issued:
//!
//! - single packets are encoded and sent through a [`PacketSender`](protocol::PacketSender)
//! - tracks are announced by content hash, then streamed in chunks of at most
//!   [`MAX_CHUNK_PAYLOAD`](config::MAX_CHUNK_PAYLOAD) bytes
//! - latency is measured with numbered `Ping` probes and smoothed into a
//!   millisecond estimate
//!
//! ## Example
//!
//! ```
//! use race_transport::core::track::Track;
//! use race_transport::protocol::{PacketSender, send_track};
//!
//! let track = Track::new("abc");
//! let mut sender = PacketSender::new(Vec::new());
//! let summary = send_track(&mut sender, &track, 2).unwrap();
//!
//! assert_eq!(summary.chunks, 2);
//! // announcement + two chunks
//! assert_eq!(sender.channel().len(), 3);
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod utils;

pub use config::TransportSettings;
pub use error::{ChannelError, ProtocolError, Result};
pub use session::{PlayerHandle, PlayerId, SessionRegistry};
pub use transport::ReliableChannel;
