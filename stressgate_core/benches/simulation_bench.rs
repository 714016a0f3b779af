use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tokio::runtime::Runtime;

use stressgate_core::cancel::CancellationHandle;
use stressgate_core::portfolio::Portfolio;
use stressgate_core::scenario::default_scenarios;
use stressgate_core::simulator::{MonteCarloConfig, MonteCarloSimulator, ScenarioSimulator};
use stressgate_core::stress::{OrchestratorConfig, StressTestOrchestrator};

fn portfolio() -> Portfolio {
    Portfolio::new(5_000_000.0)
        .with_position("ETH", 2_000_000.0, 0.2)
        .with_position("BTC", 2_000_000.0, 0.1)
        .with_position("SOL", 500_000.0, 0.3)
        .with_position("USDC", 500_000.0, 0.0)
}

fn bench_simulator(c: &mut Criterion) {
    let mut group = c.benchmark_group("MonteCarloSimulator");
    let simulator = MonteCarloSimulator::new(MonteCarloConfig::default());
    let cancel = CancellationHandle::new();
    let book = portfolio();

    for scenario in default_scenarios() {
        group.bench_function(BenchmarkId::new("simulate_10k", scenario.scenario_type().to_string()), |b| {
            b.iter(|| {
                let run = simulator.simulate(&scenario, &book, 10_000, 42, &cancel);
                black_box(run)
            });
        });
    }

    group.finish();
}

fn bench_orchestrator(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("StressTestOrchestrator");
    group.sample_size(20);

    let orchestrator = StressTestOrchestrator::new(
        MonteCarloConfig {
            seed: Some(42),
            ..Default::default()
        },
        OrchestratorConfig::default(),
    );
    let scenarios = default_scenarios();
    let book = portfolio();

    group.bench_function(BenchmarkId::new("run", "default_catalog"), |b| {
        b.iter(|| {
            rt.block_on(async {
                let _ = black_box(orchestrator.run(&scenarios, &book).await);
            });
        });
    });

    group.finish();
}

criterion_group!(benches, bench_simulator, bench_orchestrator);
criterion_main!(benches);
