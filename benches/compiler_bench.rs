use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use plsc::*;

// Benchmark scenarios: a flat document, a structured echo train, and a
// generated document with many channels and segments.

const RAMSEY: &str = "\
pi_h : 40ns
tau : 1us
!
0 : 100, pi_h, tau, pi_h
3 : +, 50
";

const CPMG: &str = "\
pi_h : 40ns
pi : 80ns
tau : 500ns
N : 64
!
0 : 100, pi_h | tau, pi, tau | +, pi_h
2 : | | 20, 50
! structure
0, 1^N, 2
";

const NESTED: &str = "\
pi_h : 40ns
pi : 80ns
tau : 500ns
N : 16
!
0 : 100, pi_h | tau, pi, tau | +, pi_h
2 : | | 20, 50
! structure
0, (1^N, 2)^4
";

fn scenarios() -> [(&'static str, &'static str); 3] {
    [("ramsey", RAMSEY), ("cpmg", CPMG), ("nested", NESTED)]
}

/// `channels` channels of `segments` staggered segments each.
fn generate_wide_document(channels: usize, segments: usize) -> String {
    let mut pls = String::from("!\n");
    for c in 0..channels {
        pls.push_str(&format!("{} : ", c));
        let body: Vec<String> = (0..segments)
            .map(|s| format!("{}ns", 10 + (c * 7 + s * 3) % 50))
            .collect();
        pls.push_str(&body.join(", "));
        pls.push('\n');
    }
    pls
}

fn compile_full(source: &str, params: &params::Params) -> Vec<emit::Instruction> {
    let sequence = document::parse(source)
        .and_then(document::Document::into_sequence)
        .expect("benchmark scenario must parse");
    let raw = sequence.eval(params).expect("benchmark scenario must evaluate");
    emit::plan(&raw.timeline(), emit::EndAction::default())
        .expect("benchmark scenario must emit")
}

fn bench_parse_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_latency");
    for (name, source) in scenarios() {
        group.bench_with_input(BenchmarkId::from_parameter(name), source, |b, source| {
            b.iter(|| black_box(document::parse(black_box(source))));
        });
    }
    group.finish();
}

// parse -> compose -> evaluate -> merge -> plan
fn bench_full_compile_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_compile_latency");
    let params = params::Params::new();
    for (name, source) in scenarios() {
        group.bench_with_input(BenchmarkId::from_parameter(name), source, |b, source| {
            b.iter(|| black_box(compile_full(black_box(source), &params)));
        });
    }
    group.finish();
}

fn bench_merge_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_scaling");
    for segments in [16, 256, 4096] {
        let source = generate_wide_document(id::Channel::COUNT, segments);
        let raw = document::parse(&source)
            .and_then(document::Document::into_sequence)
            .expect("generated document must parse")
            .eval(&params::Params::new())
            .expect("generated document must evaluate");
        group.bench_with_input(BenchmarkId::from_parameter(segments), &raw, |b, raw| {
            b.iter(|| black_box(raw.timeline()));
        });
    }
    group.finish();
}

fn bench_sweep_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("sweep_scaling");
    let sequence = document::parse(CPMG)
        .and_then(document::Document::into_sequence)
        .expect("benchmark scenario must parse");
    for points in [8, 64, 512] {
        let params = params::Params::new()
            .with("N", points as i64)
            .with("tau", params::linspace(100, 2_000, points));
        group.bench_with_input(BenchmarkId::from_parameter(points), &params, |b, params| {
            b.iter(|| black_box(sequence.eval(params)));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_parse_latency,
    bench_full_compile_latency,
    bench_merge_scaling,
    bench_sweep_scaling,
);
criterion_main!(benches);
