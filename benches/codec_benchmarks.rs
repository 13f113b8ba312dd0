use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use vcdelta::checksum::adler32;
use vcdelta::decoder::decode_all;
use vcdelta::encoder::WindowEncoder;
use vcdelta::header::FormatExtensions;

fn gen_data(size: usize, seed: u64) -> Vec<u8> {
    let mut s = seed;
    let mut out = Vec::with_capacity(size);
    for _ in 0..size {
        s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
        out.push((s >> 33) as u8);
    }
    out
}

/// Encode a copy-heavy instruction stream: alternating dictionary copies
/// and short literal runs, the shape a matcher produces for a lightly
/// edited file.
fn encode_delta(dict: &[u8], interleaved: bool) -> (Vec<u8>, Vec<u8>) {
    let mut target = Vec::new();
    let mut delta = Vec::new();
    let mut enc = WindowEncoder::new(interleaved);
    enc.write_header(&mut delta, FormatExtensions::CHECKSUM).unwrap();
    enc.init(dict.len() as u64).unwrap();

    let chunk = 4096;
    let mut pos = 0usize;
    while pos + chunk <= dict.len() {
        enc.copy(pos as u64, chunk as u32).unwrap();
        target.extend_from_slice(&dict[pos..pos + chunk]);
        enc.add(b"edit").unwrap();
        target.extend_from_slice(b"edit");
        pos += chunk;
    }
    enc.add_checksum(adler32(&target)).unwrap();
    enc.output(&mut delta).unwrap();
    (delta, target)
}

fn bench_encode(c: &mut Criterion) {
    let dict = gen_data(2 * 1024 * 1024, 0xD6C3);
    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(dict.len() as u64));
    for interleaved in [false, true] {
        group.bench_with_input(
            BenchmarkId::from_parameter(if interleaved { "interleaved" } else { "segregated" }),
            &interleaved,
            |b, &interleaved| {
                b.iter(|| encode_delta(black_box(&dict), interleaved));
            },
        );
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let dict = gen_data(2 * 1024 * 1024, 0xD6C3);
    let mut group = c.benchmark_group("decode");
    for interleaved in [false, true] {
        let (delta, target) = encode_delta(&dict, interleaved);
        group.throughput(Throughput::Bytes(target.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(if interleaved { "interleaved" } else { "segregated" }),
            &delta,
            |b, delta| {
                b.iter(|| decode_all(black_box(&dict), black_box(delta)).unwrap());
            },
        );
    }
    group.finish();
}

fn bench_run_expansion(c: &mut Criterion) {
    // A single RUN expanding to 8 MiB measures the decoder's fill path.
    let mut delta = Vec::new();
    let mut enc = WindowEncoder::new(true);
    enc.write_header(&mut delta, FormatExtensions::INTERLEAVED).unwrap();
    enc.init(0).unwrap();
    enc.run(8 << 20, 0x00).unwrap();
    enc.output(&mut delta).unwrap();

    let mut group = c.benchmark_group("run_expansion");
    group.throughput(Throughput::Bytes(8 << 20));
    group.bench_function("8MiB", |b| {
        b.iter(|| decode_all(&[], black_box(&delta)).unwrap());
    });
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_run_expansion);
criterion_main!(benches);
