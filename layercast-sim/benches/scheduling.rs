use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use layercast_core::DeterministicRng;
use layercast_core::config::ExperimentConfig;
use layercast_core::scheduler::{FifoSettings, PolicyKind, Scheduler};
use layercast_core::stream::Streamer;
use layercast_sim::Simulation;

fn loaded_scheduler(policy: PolicyKind) -> (Scheduler, DeterministicRng) {
    let streamers = ["alice", "bob", "carlos", "davis"]
        .into_iter()
        .map(|name| {
            Streamer::builder(name)
                .layers(["Base", "Mid", "High"])
                .arrival_rate(120_000.0)
                .iframe_ratios(0.1, 2.0)
                .frame_sizes([800.0, 1_600.0, 3_000.0], [50.0, 100.0, 200.0])
                .build()
                .expect("valid streamer")
        })
        .collect();
    let mut scheduler = Scheduler::with_policy(streamers, policy, 8, FifoSettings::default())
        .expect("valid scheduler");
    let mut rng = DeterministicRng::from_seed(1);
    scheduler
        .update(0.0, 10.0, &mut rng)
        .expect("arrivals generated");
    (scheduler, rng)
}

fn bench_decisions(c: &mut Criterion) {
    for policy in [PolicyKind::Random, PolicyKind::Fifo, PolicyKind::Priority] {
        c.bench_function(&format!("drain_{policy}"), |b| {
            b.iter_batched(
                || loaded_scheduler(policy),
                |(mut scheduler, mut rng)| {
                    while let Some(frames) = scheduler.decide(&mut rng).expect("decision") {
                        std::hint::black_box(frames);
                    }
                },
                BatchSize::SmallInput,
            );
        });
    }
}

fn bench_arrivals(c: &mut Criterion) {
    c.bench_function("generate_arrivals_1s", |b| {
        b.iter_batched(
            || loaded_scheduler(PolicyKind::Random),
            |(mut scheduler, mut rng)| {
                std::hint::black_box(scheduler.update(10.0, 11.0, &mut rng).expect("arrivals"));
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_full_run(c: &mut Criterion) {
    c.bench_function("fifo_run_10s", |b| {
        b.iter(|| {
            let mut config = ExperimentConfig::for_testing();
            config.scheduler.policy = PolicyKind::Fifo;
            let report = Simulation::new(config)
                .and_then(|mut simulation| simulation.run())
                .expect("run completes");
            std::hint::black_box(report);
        });
    });
}

criterion_group!(benches, bench_decisions, bench_arrivals, bench_full_run);
criterion_main!(benches);
