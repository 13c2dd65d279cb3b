use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use shnn_kernel::{
    poisson_train, AdaptiveBounds, IntegrationConfig, LifConductanceModel, MethodKind,
    NetworkBuilder, NeuronId, Simulation, SimulationParams,
};

fn build_simulation(neurons: u32, threads: usize, integration: IntegrationConfig) -> Simulation {
    let mut builder = NetworkBuilder::new().add_neurons(neurons);
    // Ring with a skip connection to keep activity going
    for i in 0..neurons {
        for k in [1, 3] {
            let j = (i + k) % neurons;
            builder = builder.add_synapse(NeuronId::new(i), NeuronId::new(j), 0.6, 1e-3);
        }
    }
    let network = builder
        .build(Arc::new(LifConductanceModel::default()), threads)
        .expect("bench network build");
    let mut sim = Simulation::new(network, SimulationParams::default(), integration)
        .expect("bench simulation");
    for neuron in 0..neurons.min(8) {
        for time in poisson_train(100.0, 0.0, 0.05, u64::from(neuron)).expect("bench input") {
            sim.inject_spike(NeuronId::new(neuron), time).expect("bench spike");
        }
    }
    sim
}

fn bench_methods(c: &mut Criterion) {
    let mut group = c.benchmark_group("kernel_methods");
    let bounds = AdaptiveBounds::new(1e-6, 1e-4, 1e-6, 1e-3).expect("bench bounds");
    let methods = [
        ("euler", IntegrationConfig::fixed(MethodKind::Euler, Some(1e-4))),
        ("rk4", IntegrationConfig::fixed(MethodKind::Rk4, Some(1e-4))),
        ("bdf2", IntegrationConfig::fixed(MethodKind::Bdf2, Some(1e-4))),
        ("rk45-adaptive", IntegrationConfig::adaptive(MethodKind::Rk45Adaptive, bounds.clone())),
        ("bdf2-adaptive", IntegrationConfig::adaptive(MethodKind::Bdf2Adaptive, bounds)),
    ];

    let n = 64u32;
    group.throughput(Throughput::Elements(n as u64));
    for (name, integration) in methods {
        let integration = integration.expect("bench integration config");
        group.bench_with_input(BenchmarkId::new(name, n), &n, |b, &n| {
            b.iter_batched(
                || build_simulation(n, 1, integration.clone()),
                |mut sim| {
                    let _report = sim.run_until(0.05).unwrap();
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_threads(c: &mut Criterion) {
    let mut group = c.benchmark_group("kernel_threads");
    let n = 256u32;
    group.throughput(Throughput::Elements(n as u64));
    for &threads in &[1usize, 2, 4] {
        group.bench_with_input(BenchmarkId::new("rk4", threads), &threads, |b, &threads| {
            b.iter_batched(
                || {
                    let integration = IntegrationConfig::fixed(MethodKind::Rk4, Some(1e-4))
                        .expect("bench integration config");
                    build_simulation(n, threads, integration)
                },
                |mut sim| {
                    let _report = sim.run_until(0.05).unwrap();
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_methods, bench_threads);
criterion_main!(benches);
