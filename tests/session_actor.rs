//! Integration tests for the per-player session task

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::Bytes;
use race_transport::config::TransportSettings;
use race_transport::core::packet::{
    frame_type, GameMode, InboundPacket, KickedPacket, NewSessionPacket, PacketType, PingPacket,
    TrackIdPacket,
};
use race_transport::core::track::{Track, TrackSource};
use race_transport::error::{ChannelError, ProtocolError, SendContext};
use race_transport::protocol::PingId;
use race_transport::session::{
    spawn_player, Identity, PendingState, Player, PlayerHandle, PlayerId, SharedTrack,
};
use race_transport::transport::memory::{MemoryChannel, MemoryReceiver};
use std::sync::Arc;
use std::time::Duration;

fn settings() -> TransportSettings {
    TransportSettings::default_with_overrides(|s| {
        s.ping.auto_ping = false;
    })
}

fn identity(nickname: &str) -> Identity {
    Identity {
        nickname: nickname.to_string(),
        country_code: "FI".to_string(),
        car_style: "red".to_string(),
        ..Identity::default()
    }
}

fn start(settings: &TransportSettings, capacity: usize) -> (PlayerHandle, MemoryReceiver) {
    let (channel, receiver) = MemoryChannel::pair(capacity);
    let player = Player::new(PlayerId(7), identity("Racer"), channel, settings);
    let (handle, _task) = spawn_player(player, settings.server.command_queue, &settings.ping);
    (handle, receiver)
}

fn types(frames: &[Bytes]) -> Vec<PacketType> {
    frames.iter().map(|f| frame_type(f).unwrap()).collect()
}

#[tokio::test]
async fn test_packets_then_track_arrive_in_call_order() {
    let settings = settings();
    let (handle, mut receiver) = start(&settings, 64);

    for session_id in 0..3 {
        handle
            .start_new_session(session_id, GameMode::Competitive)
            .await
            .unwrap();
    }
    let track: SharedTrack = Arc::new(Track::new("x".repeat(40_000)));
    let summary = handle.send_track(Arc::clone(&track)).await.unwrap();
    handle.send(PingPacket { ping_id: PingId(99) }).await.unwrap();

    let frames = receiver.drain();
    assert_eq!(summary.chunks, 3);
    assert_eq!(
        types(&frames),
        vec![
            PacketType::NewSession,
            PacketType::NewSession,
            PacketType::NewSession,
            PacketType::TrackId,
            PacketType::TrackChunk,
            PacketType::TrackChunk,
            PacketType::TrackChunk,
            PacketType::Ping,
        ]
    );

    for (i, frame) in frames[..3].iter().enumerate() {
        let packet = NewSessionPacket::decode(frame).unwrap();
        assert_eq!(packet.session_id, i as u32);
        assert_eq!(packet.game_mode, GameMode::Competitive);
    }
    assert_eq!(
        TrackIdPacket::decode(&frames[3]).unwrap().track_id,
        track.track_id().unwrap()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_never_split_a_transfer() {
    let settings = settings();
    let (handle, mut receiver) = start(&settings, 4096);

    let mut tasks = Vec::new();
    for worker in 0..4u32 {
        let handle = handle.clone();
        tasks.push(tokio::spawn(async move {
            for round in 0..5u32 {
                if round % 2 == 0 {
                    let track: SharedTrack = Arc::new(Track::new("Q".repeat(35_000)));
                    handle.send_track(track).await.unwrap();
                } else {
                    handle
                        .send(PingPacket {
                            ping_id: PingId(worker * 100 + round),
                        })
                        .await
                        .unwrap();
                }
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // Every announcement is followed by exactly its three chunks
    let kinds = types(&receiver.drain());
    let mut i = 0;
    let mut transfers = 0;
    while i < kinds.len() {
        match kinds[i] {
            PacketType::TrackId => {
                assert_eq!(&kinds[i + 1..i + 4], &[PacketType::TrackChunk; 3]);
                transfers += 1;
                i += 4;
            }
            PacketType::Ping => i += 1,
            other => panic!("unexpected frame {other}"),
        }
    }
    assert_eq!(transfers, 12);
}

#[tokio::test]
async fn test_ping_response_updates_estimate() {
    let settings = settings();
    let (handle, mut receiver) = start(&settings, 16);

    let id = handle.send_ping().await.unwrap();
    let frames = receiver.drain();
    assert_eq!(PingPacket::decode(&frames[0]).unwrap().ping_id, id);
    assert_eq!(handle.status().await.unwrap().outstanding_probes, 1);

    tokio::time::sleep(Duration::from_millis(20)).await;
    handle
        .deliver_inbound(InboundPacket::PingResponse { ping_id: id }.encode())
        .await
        .unwrap();

    let status = handle.status().await.unwrap();
    assert_eq!(status.outstanding_probes, 0);
    assert!(status.ping_ms >= 20);
}

#[tokio::test]
async fn test_stale_ping_response_is_ignored() {
    let settings = settings();
    let (handle, _receiver) = start(&settings, 16);

    let first = handle.send_ping().await.unwrap();
    handle
        .deliver_inbound(InboundPacket::PingResponse { ping_id: first }.encode())
        .await
        .unwrap();

    // Duplicate and never-issued ids
    handle
        .deliver_inbound(InboundPacket::PingResponse { ping_id: first }.encode())
        .await
        .unwrap();
    handle
        .deliver_inbound(InboundPacket::PingResponse { ping_id: PingId(4242) }.encode())
        .await
        .unwrap();

    let status = handle.status().await.unwrap();
    assert_eq!(status.outstanding_probes, 0);
    assert!(!handle.is_closed());
}

#[tokio::test]
async fn test_malformed_inbound_frame_is_not_fatal() {
    let settings = settings();
    let (handle, _receiver) = start(&settings, 16);

    let err = handle
        .deliver_inbound(Bytes::from_static(b"\x05\x01"))
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::Decode(_)));
    assert!(!err.is_fatal());

    // Session still serves requests
    handle.status().await.unwrap();
}

#[tokio::test]
async fn test_kick_sends_notice_and_freezes_player() {
    let settings = settings();
    let (handle, mut receiver) = start(&settings, 16);

    handle
        .append_pending_state(PendingState::Reset { counter: 1 })
        .await
        .unwrap();
    handle.kick(Some("too many resets".to_string())).await.unwrap();

    let frames = receiver.drain();
    assert_eq!(
        KickedPacket::decode(&frames[0]).unwrap().reason,
        "too many resets"
    );

    let err = handle
        .append_pending_state(PendingState::Reset { counter: 2 })
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::PlayerKicked(PlayerId(7))));
    assert!(handle.increment_reset_counter().await.is_err());

    let status = handle.status().await.unwrap();
    assert!(status.kicked);
    assert_eq!(status.pending_states, 1);
    assert_eq!(
        handle.drain_pending_states().await.unwrap(),
        vec![PendingState::Reset { counter: 1 }]
    );
}

#[tokio::test]
async fn test_reset_counter_and_run_record() {
    let settings = settings();
    let (handle, _receiver) = start(&settings, 16);

    assert_eq!(handle.increment_reset_counter().await.unwrap(), 1);
    assert_eq!(handle.increment_reset_counter().await.unwrap(), 2);
    assert!(handle.submit_run(1200).await.unwrap());
    assert!(!handle.submit_run(1300).await.unwrap());

    let status = handle.status().await.unwrap();
    assert_eq!(status.reset_counter, 2);
    assert_eq!(status.record.map(|r| r.frame_count), Some(1200));
}

#[tokio::test]
async fn test_transport_failure_closes_session() {
    let settings = settings();
    let (handle, mut receiver) = start(&settings, 16);
    receiver.close();

    let err = handle
        .send(PingPacket { ping_id: PingId(1) })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::Transport {
            context: SendContext::Packet(PacketType::Ping),
            source: ChannelError::Closed,
        }
    ));

    let err = handle.status().await.unwrap_err();
    assert!(matches!(err, ProtocolError::SessionClosed(PlayerId(7))));
}

#[tokio::test]
async fn test_backpressure_is_connection_fatal() {
    let settings = settings();
    let (handle, _receiver) = start(&settings, 2);

    let track: SharedTrack = Arc::new(Track::new("b".repeat(100_000)));
    let err = handle.send_track(track).await.unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::Transport {
            context: SendContext::Chunk { offset: 16383 },
            source: ChannelError::Backpressure(2),
        }
    ));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_oversized_track_is_refused_and_session_survives() {
    let settings = TransportSettings::default_with_overrides(|s| {
        s.ping.auto_ping = false;
        s.transport.max_track_bytes = 1000;
    });
    let (handle, mut receiver) = start(&settings, 16);

    let track: SharedTrack = Arc::new(Track::new("c".repeat(2000)));
    let err = handle.send_track(track).await.unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::TrackTooLarge {
            len: 2000,
            max: 1000
        }
    ));
    assert!(!err.is_fatal());
    assert!(receiver.drain().is_empty());

    handle.send_ping().await.unwrap();
    assert_eq!(receiver.drain().len(), 1);
}

#[tokio::test]
async fn test_shutdown_stops_task() {
    let settings = settings();
    let (channel, _receiver) = MemoryChannel::pair(4);
    let player = Player::new(PlayerId(3), identity("Quit"), channel, &settings);
    let (handle, task) = spawn_player(player, 4, &settings.ping);

    handle.shutdown().await;
    task.await.unwrap();
    assert!(handle.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_auto_ping_sends_on_interval() {
    let settings = TransportSettings::default_with_overrides(|s| {
        s.ping.auto_ping = true;
        s.ping.interval = Duration::from_millis(500);
    });
    let (handle, mut receiver) = start(&settings, 64);

    let first = receiver.recv().await.unwrap();
    let second = receiver.recv().await.unwrap();
    assert_eq!(PingPacket::decode(&first).unwrap().ping_id, PingId(0));
    assert_eq!(PingPacket::decode(&second).unwrap().ping_id, PingId(1));

    assert_eq!(handle.status().await.unwrap().outstanding_probes, 2);
}
