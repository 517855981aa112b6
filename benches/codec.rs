//! Hot-path benchmarks: one frame through the full encoder, the decoder,
//! and the bare transform.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use celt_rs::mdct::{mdct_forward, mdct_inverse};
use celt_rs::{Decoder, DecoderConfig, Encoder, EncoderConfig};

fn test_frame(frame_size: usize, channels: usize) -> Vec<f32> {
    (0..frame_size * channels)
        .map(|i| 0.4 * (i as f32 * 0.0576).sin() + 0.2 * (i as f32 * 0.313).sin())
        .collect()
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    for &(frame_size, bitrate) in &[(480usize, 96000u32), (960, 64000)] {
        let mut enc = Encoder::new(&EncoderConfig {
            frame_size,
            channels: 1,
            bitrate,
        })
        .unwrap();
        let pcm = test_frame(frame_size, 1);
        group.bench_function(format!("{frame_size}samp_{bitrate}bps"), |b| {
            b.iter(|| enc.encode(black_box(&pcm)).unwrap())
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    for &(frame_size, bitrate) in &[(480usize, 96000u32), (960, 64000)] {
        let mut enc = Encoder::new(&EncoderConfig {
            frame_size,
            channels: 1,
            bitrate,
        })
        .unwrap();
        let packet = enc.encode(&test_frame(frame_size, 1)).unwrap();
        let mut dec = Decoder::new(&DecoderConfig {
            frame_size,
            channels: 1,
        })
        .unwrap();
        group.bench_function(format!("{frame_size}samp_{bitrate}bps"), |b| {
            b.iter(|| dec.decode(black_box(&packet)).unwrap())
        });
    }
    group.finish();
}

fn bench_transform(c: &mut Criterion) {
    let mut group = c.benchmark_group("mdct");
    let frame = 960usize;
    let input = test_frame(frame + 120, 1);
    let mut coeffs = vec![0.0f32; frame];
    group.bench_function("forward_960", |b| {
        b.iter(|| mdct_forward(black_box(&input), &mut coeffs, 1))
    });
    let mut out = vec![0.0f32; frame];
    let mut mem = vec![0.0f32; 120];
    group.bench_function("inverse_960", |b| {
        b.iter(|| mdct_inverse(black_box(&coeffs), &mut out, &mut mem, 1))
    });
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_transform);
criterion_main!(benches);
