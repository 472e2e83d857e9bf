use bytes::{Bytes, BytesMut};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use race_transport::core::codec::FrameCodec;
use race_transport::core::track::{Track, TrackSource};
use race_transport::protocol::{
    send_track, ChunkPlan, PacketSender, TrackAssembler, MAX_CHUNK_PAYLOAD,
};
use tokio_util::codec::Encoder;

fn track_of(size: usize) -> Track {
    Track::new("aB3".repeat(size / 3 + 1)[..size].to_string())
}

#[allow(clippy::unwrap_used)]
fn bench_track_transfer(c: &mut Criterion) {
    let mut group = c.benchmark_group("track_transfer");
    let sizes = [4 * 1024usize, 64 * 1024, 1024 * 1024];

    for &size in &sizes {
        let track = track_of(size);
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_function(format!("plan_{size}b"), |b| {
            b.iter(|| {
                let plan = ChunkPlan::new(track.export_bytes(), MAX_CHUNK_PAYLOAD).unwrap();
                plan.map(|chunk| chunk.to_frame().len()).sum::<usize>()
            })
        });

        group.bench_function(format!("send_{size}b"), |b| {
            b.iter_batched(
                || PacketSender::new(Vec::<Bytes>::with_capacity(size / MAX_CHUNK_PAYLOAD + 2)),
                |mut sender| send_track(&mut sender, &track, MAX_CHUNK_PAYLOAD).unwrap(),
                BatchSize::SmallInput,
            )
        });

        group.bench_function(format!("frame_{size}b"), |b| {
            let mut sender = PacketSender::new(Vec::<Bytes>::new());
            send_track(&mut sender, &track, MAX_CHUNK_PAYLOAD).unwrap();
            let frames = sender.into_channel();
            b.iter(|| {
                let mut codec = FrameCodec::default();
                let mut buf = BytesMut::with_capacity(size + frames.len() * 5);
                for frame in &frames {
                    codec.encode(frame.clone(), &mut buf).unwrap();
                }
                buf.len()
            })
        });

        group.bench_function(format!("reassemble_{size}b"), |b| {
            let mut sender = PacketSender::new(Vec::<Bytes>::new());
            send_track(&mut sender, &track, MAX_CHUNK_PAYLOAD).unwrap();
            let frames = sender.into_channel();
            b.iter(|| {
                let mut assembler =
                    TrackAssembler::from_announcement(&frames[0], usize::MAX).unwrap();
                for frame in &frames[1..] {
                    assembler.push(frame).unwrap();
                }
                assert!(assembler.is_complete());
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_track_transfer);
criterion_main!(benches);
