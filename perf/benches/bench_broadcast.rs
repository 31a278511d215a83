use basalt_frames::Frame56;
use basalt_perf::{make_frame56, temp_bus_path};
use basalt_ring::{Consumer, Producer, RingVariant, bytes_for_ring};
use basalt_shm::ShmRegionMut;
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};

fn setup(tag: &str, capacity: usize) -> (String, ShmRegionMut) {
    let path = temp_bus_path(tag);
    let region = ShmRegionMut::create_rw(&path, bytes_for_ring::<Frame56>(capacity) as u64)
        .expect("failed to create region");
    (path, region)
}

fn bench_publish_single(c: &mut Criterion) {
    let (path, region) = setup("pub_sp", 65536);
    let mut producer =
        Producer::<Frame56>::attach(&region, RingVariant::SinglePublisherBroadcast)
            .expect("failed to attach producer");
    let frame = make_frame56();

    let mut group = c.benchmark_group("broadcast");
    group.throughput(Throughput::Elements(1));

    group.bench_function("publish (single)", |b| {
        b.iter(|| producer.publish(black_box(&frame)));
    });

    drop(group);
    let _ = std::fs::remove_file(&path);
}

fn bench_publish_multi(c: &mut Criterion) {
    let (path, region) = setup("pub_mp", 65536);
    let mut producer = Producer::<Frame56>::attach(&region, RingVariant::MultiPublisherBroadcast)
        .expect("failed to attach producer");
    let frame = make_frame56();

    let mut group = c.benchmark_group("broadcast");
    group.throughput(Throughput::Elements(1));

    group.bench_function("publish (multi, ticketed)", |b| {
        b.iter(|| producer.publish(black_box(&frame)));
    });

    drop(group);
    let _ = std::fs::remove_file(&path);
}

fn bench_poll_data(c: &mut Criterion) {
    let (path, region) = setup("poll_data", 65536);
    let mut producer =
        Producer::<Frame56>::attach(&region, RingVariant::SinglePublisherBroadcast)
            .expect("failed to attach producer");
    let mut consumer = Consumer::<Frame56>::attach(&path).expect("failed to attach consumer");
    let frame = make_frame56();
    let mut out = Frame56::default();

    let mut group = c.benchmark_group("broadcast");
    group.throughput(Throughput::Elements(1));

    group.bench_function("poll (data)", |b| {
        b.iter_custom(|iters| {
            for _ in 0..iters {
                producer.publish(&frame);
            }
            let start = std::time::Instant::now();
            for _ in 0..iters {
                black_box(consumer.poll(&mut out)).ok();
            }
            start.elapsed()
        });
    });

    drop(group);
    let _ = std::fs::remove_file(&path);
}

fn bench_poll_empty(c: &mut Criterion) {
    let (path, region) = setup("poll_empty", 65536);
    let _producer =
        Producer::<Frame56>::attach(&region, RingVariant::SinglePublisherBroadcast)
            .expect("failed to attach producer");
    let mut consumer = Consumer::<Frame56>::attach(&path).expect("failed to attach consumer");
    let mut out = Frame56::default();

    let mut group = c.benchmark_group("broadcast");
    group.throughput(Throughput::Elements(1));

    group.bench_function("poll (empty)", |b| {
        b.iter(|| black_box(consumer.poll(&mut out)));
    });

    drop(group);
    let _ = std::fs::remove_file(&path);
}

fn bench_round_trip(c: &mut Criterion) {
    let (path, region) = setup("rt", 65536);
    let mut producer =
        Producer::<Frame56>::attach(&region, RingVariant::SinglePublisherBroadcast)
            .expect("failed to attach producer");
    let mut consumer = Consumer::<Frame56>::attach(&path).expect("failed to attach consumer");
    let frame = make_frame56();
    let mut out = Frame56::default();

    let mut group = c.benchmark_group("broadcast");
    group.throughput(Throughput::Elements(1));

    group.bench_function("round_trip", |b| {
        b.iter(|| {
            producer.publish(black_box(&frame));
            black_box(consumer.poll(&mut out)).ok();
        });
    });

    drop(group);
    let _ = std::fs::remove_file(&path);
}

fn bench_round_trip_capacities(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast_capacity");
    group.throughput(Throughput::Elements(1));

    for &cap in &[1024usize, 4096, 16384, 65536] {
        let (path, region) = setup(&format!("cap_{cap}"), cap);
        let mut producer =
            Producer::<Frame56>::attach(&region, RingVariant::SinglePublisherBroadcast)
                .expect("failed to attach producer");
        let mut consumer = Consumer::<Frame56>::attach(&path).expect("failed to attach consumer");
        let frame = make_frame56();
        let mut out = Frame56::default();

        group.bench_function(format!("round_trip_cap_{cap}"), |b| {
            b.iter(|| {
                producer.publish(black_box(&frame));
                black_box(consumer.poll(&mut out)).ok();
            });
        });

        drop(producer);
        drop(consumer);
        let _ = std::fs::remove_file(&path);
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_publish_single,
    bench_publish_multi,
    bench_poll_data,
    bench_poll_empty,
    bench_round_trip,
    bench_round_trip_capacities,
);
criterion_main!(benches);
