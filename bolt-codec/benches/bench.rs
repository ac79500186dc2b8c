use bolt_codec::{Frame, FrameCodec, Mask, Opcode};
use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, Criterion};
use tokio_util::codec::{Decoder, Encoder};

// Encoding always masks, so the decode benchmarks include unmasking.
fn frame_bytes(len: usize) -> BytesMut {
    let frame = Frame::new(true, Opcode::Binary, vec![0x5a; len]);
    let mut data = BytesMut::new();
    FrameCodec::new().encode(&frame, &mut data).unwrap();
    data
}

fn bench_decode(c: &mut Criterion, id: &str, len: usize) {
    let data = frame_bytes(len);
    c.bench_function(id, move |b| {
        let mut codec = FrameCodec::new();
        b.iter(|| codec.decode(&mut data.clone()).unwrap().unwrap())
    });
}

fn bench_decode_chunked(c: &mut Criterion, id: &str, len: usize, chunk: usize) {
    let data = frame_bytes(len);
    c.bench_function(id, move |b| {
        let mut codec = FrameCodec::new();
        b.iter(|| {
            let mut src = BytesMut::new();
            for piece in data.chunks(chunk) {
                src.extend_from_slice(piece);
                if let Some(frame) = codec.decode(&mut src).unwrap() {
                    return frame;
                }
            }

            unreachable!()
        })
    });
}

fn bench_encode(c: &mut Criterion, id: &str, len: usize) {
    let frame = Frame::new(true, Opcode::Binary, vec![0x5a; len]).with_mask(Mask::from(0x12345678));
    let mut data = BytesMut::with_capacity(len + 14);
    c.bench_function(id, move |b| {
        let mut codec = FrameCodec::new();
        b.iter(|| {
            data.clear();
            codec.encode(&frame, &mut data).unwrap()
        })
    });
}

fn criterion_benchmark(c: &mut Criterion) {
    bench_encode(c, "masked encode tiny", 0);
    bench_encode(c, "masked encode small", 125);
    bench_encode(c, "masked encode medium", 1024);

    bench_decode(c, "decode tiny", 0);
    bench_decode(c, "decode small", 125);
    bench_decode(c, "decode medium", 1024);

    bench_decode_chunked(c, "decode medium in 64 byte chunks", 1024, 64);
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
