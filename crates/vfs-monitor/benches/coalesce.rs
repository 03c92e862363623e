//! Cost of feeding events into the coalescing queue.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use vfs_core::{BackendKind, MonitorConfig, VfsPath};
use vfs_monitor::{Monitor, MonitorEvent};

const WATCHERS: [usize; 3] = [1, 16, 256];

fn monitor() -> Monitor {
    // Long interval: nothing is dispatched while measuring.
    Monitor::feed_only(MonitorConfig {
        interval_ms: 60_000,
        wait_poll_ms: 100,
        backend: BackendKind::None,
    })
}

fn bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("feed");

    for watchers in WATCHERS {
        let monitor = monitor();
        let dir = VfsPath::new("/srv/data");
        let handles: Vec<_> = (0..watchers)
            .map(|_| monitor.add_directory(dir.clone(), |_, _, _, _, _| {}))
            .collect();
        let child = VfsPath::new("/srv/data/report.csv");

        group.throughput(Throughput::Elements(watchers as u64));
        group.bench_function(BenchmarkId::new("coalesced", watchers), |b| {
            b.iter(|| monitor.feed(MonitorEvent::Changed, &child));
        });

        for handle in handles {
            monitor.remove(handle);
        }
    }

    group.finish();
}

criterion_group!(
    name = benches;
    config = Criterion::default();
    targets = bench
);

criterion_main!(benches);
