use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::io::Cursor;
use strace_graph::graph::{GraphBuilder, GraphOptions};
use strace_graph::parser::{parse_line, split_arguments};
use strace_graph::stream::RecordStream;

fn benchmark_parse_line(c: &mut Criterion) {
    let samples = vec![
        (
            "simple",
            "22:21:11.524449 brk(NULL) = 0x55edad95f000 <0.000004>",
        ),
        (
            "with_error",
            "22:21:11.524519 access(\"/etc/ld-nix.so.preload\", R_OK) = -1 ENOENT (No such file or directory) <0.000030>",
        ),
        (
            "complex",
            "22:21:11.524791 newfstatat(AT_FDCWD, \"/nix/store/ga8daf4c0airy2v5akmg3lcv5saik7nf-pipewire-1.4.9-jack/lib/\", {st_mode=S_IFDIR|0555, st_size=11, ...}, 0) = 0 <0.000006>",
        ),
        (
            "unfinished",
            "1387721 22:21:24.927885 poll([{fd=8, events=POLLIN}, {fd=7, events=POLLIN}], 2, -1 <unfinished ...>",
        ),
        (
            "resumed",
            "[pid 1387721] 22:21:24.930001 <... poll resumed>) = 1 ([{fd=8, revents=POLLIN}]) <0.002116>",
        ),
    ];

    let mut group = c.benchmark_group("parse_line");

    for (name, sample) in samples.iter() {
        group.throughput(Throughput::Bytes(sample.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), sample, |b, s| {
            b.iter(|| {
                black_box(parse_line(s));
            });
        });
    }
    group.finish();
}

fn benchmark_split_arguments(c: &mut Criterion) {
    let args = "AT_FDCWD, \"/usr/lib/x86_64-linux-gnu/libc.so.6, with comma\", {st_mode=S_IFREG|0755, st_size=2125328, ...}, [{iov_base=\"abc\", iov_len=3}], 0";

    c.bench_function("split_arguments", |b| {
        b.iter(|| {
            black_box(split_arguments(black_box(args)));
        });
    });
}

/// Interleaved multi-process trace with split calls
fn synthetic_trace(processes: u32, rounds: u32) -> String {
    let mut trace = String::new();
    let mut tick = 0u64;
    for round in 0..rounds {
        for pid in 1..=processes {
            tick += 1;
            trace.push_str(&format!("{pid} {tick}.000001 read(3, <unfinished ...>\n"));
        }
        for pid in 1..=processes {
            tick += 1;
            trace.push_str(&format!(
                "{pid} {tick}.000001 <... read resumed>\"round {round}\", 4096) = 7 <0.000010>\n"
            ));
            tick += 1;
            trace.push_str(&format!(
                "{pid} {tick}.000001 clone(child_stack=NULL, flags=SIGCHLD) = {}\n",
                pid + processes
            ));
        }
    }
    trace
}

fn benchmark_pipeline(c: &mut Criterion) {
    let trace = synthetic_trace(8, 250);

    let mut group = c.benchmark_group("pipeline");
    group.throughput(Throughput::Bytes(trace.len() as u64));

    group.bench_function("reconcile", |b| {
        b.iter(|| {
            let count = RecordStream::new(Cursor::new(trace.as_str()))
                .filter_map(Result::ok)
                .count();
            black_box(count);
        });
    });

    for compress in [false, true] {
        group.bench_with_input(
            BenchmarkId::new("graph", if compress { "compressed" } else { "full" }),
            &compress,
            |b, &compress| {
                b.iter(|| {
                    let mut builder = GraphBuilder::new(GraphOptions { compress });
                    for record in RecordStream::new(Cursor::new(trace.as_str())) {
                        if let Ok(record) = record {
                            builder.push(&record);
                        }
                    }
                    black_box(builder.finish());
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_parse_line,
    benchmark_split_arguments,
    benchmark_pipeline
);
criterion_main!(benches);
