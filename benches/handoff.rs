use std::thread;
use std::time::{Duration, Instant};

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use pg_notify::handoff::{self, Push};
use pg_notify::{memory_source, CancellationToken, ChannelName, Event, EventStream, Next, RawNotification};

const PAYLOAD: &str = r#"{"table":"users","action":"UPDATE","data":{"id":1,"name":"bench"}}"#;

fn event(i: u64) -> Event {
    Event::from(RawNotification::new(u32::try_from(i % 1024).unwrap_or(0), "events", PAYLOAD))
}

fn bench_handoff_same_thread(c: &mut Criterion) {
    let mut group = c.benchmark_group("handoff");
    group.throughput(Throughput::Elements(1));

    group.bench_function("push_pop_bounded", |b| {
        b.iter_custom(|iters| {
            let (tx, rx) = handoff::channel(Some(10_000));
            let start = Instant::now();
            for i in 0..iters {
                assert_eq!(tx.push(event(i)), Push::Queued);
                rx.pop().unwrap();
            }
            start.elapsed()
        })
    });

    group.finish();
}

fn bench_handoff_cross_thread(c: &mut Criterion) {
    let mut group = c.benchmark_group("handoff");
    group.throughput(Throughput::Elements(1));

    group.bench_function("reader_to_runner", |b| {
        b.iter_custom(|iters| {
            // Unbounded so nothing is dropped and every event is counted.
            let (tx, rx) = handoff::channel(None);
            let runner = thread::spawn(move || {
                let mut seen = 0u64;
                while rx.pop().is_some() {
                    seen += 1;
                }
                seen
            });

            let start = Instant::now();
            for i in 0..iters {
                tx.push(event(i));
            }
            drop(tx);
            let seen = runner.join().unwrap();
            let elapsed = start.elapsed();
            assert_eq!(seen, iters);
            elapsed
        })
    });

    group.finish();
}

fn bench_stream_next(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream");
    group.throughput(Throughput::Elements(1));

    group.bench_function("next_buffered", |b| {
        b.iter_custom(|iters| {
            let (source, injector) = memory_source();
            let mut stream =
                EventStream::open(source, ChannelName::default(), CancellationToken::new()).unwrap();
            for _ in 0..iters {
                injector.notify(1, "events", PAYLOAD);
            }

            let start = Instant::now();
            for _ in 0..iters {
                match stream.next(Some(Duration::from_secs(1))).unwrap() {
                    Next::Event(_) => {}
                    other => panic!("unexpected {other:?}"),
                }
            }
            start.elapsed()
        })
    });

    group.finish();
}

criterion_group!(
    handoff_benches,
    bench_handoff_same_thread,
    bench_handoff_cross_thread,
    bench_stream_next
);
criterion_main!(handoff_benches);
