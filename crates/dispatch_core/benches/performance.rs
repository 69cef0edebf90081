//! Performance benchmarks for dispatch_core using Criterion.rs.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dispatch_core::config::{DispatchConfig, MatchingAlgorithmType};
use dispatch_core::identity::Caller;
use dispatch_core::model::{AccountId, DriverId, OnlineState, VehicleCategory, VehicleType};
use dispatch_core::registry::NewDriver;
use dispatch_core::test_helpers::{damascus_center, damascus_east, near_center, place, ManualClock};
use dispatch_core::DispatchEngine;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

struct Fleet {
    engine: DispatchEngine,
    drivers: Vec<(DriverId, Caller)>,
}

/// Engine with `drivers` approved, online taxis scattered within ~4 km of the
/// center.
fn fleet(drivers: usize, algorithm: MatchingAlgorithmType) -> Fleet {
    let mut config = DispatchConfig::default();
    config.matching.algorithm = algorithm;
    let engine = DispatchEngine::builder(config)
        .clock(Arc::new(ManualClock::at_epoch()))
        .build()
        .expect("engine builds");
    let admin = Caller::admin(AccountId::from_u128(0xAD));
    let mut rng = StdRng::seed_from_u64(42);

    let mut registered = Vec::with_capacity(drivers);
    for n in 0..drivers {
        let caller = Caller::driver(AccountId::from_u128(1000 + n as u128));
        let new = NewDriver::new(caller.account_id, VehicleCategory::Taxi, VehicleType::Sedan)
            .with_id(DriverId::from_u128(n as u128 + 1));
        engine.register_driver(&admin, new).expect("register");
        engine.approve_driver(&admin, new.id).expect("approve");
        let position = near_center(rng.gen_range(-0.04..0.04), rng.gen_range(-0.04..0.04));
        engine
            .set_online_state(&caller, OnlineState::Online, Some(position))
            .expect("online");
        registered.push((new.id, caller));
    }
    Fleet {
        engine,
        drivers: registered,
    }
}

fn bench_request_lifecycle(c: &mut Criterion) {
    let pools = vec![("small", 50), ("medium", 500), ("large", 2_000)];

    let mut group = c.benchmark_group("request_lifecycle");
    for (name, drivers) in pools {
        let Fleet { engine, drivers } = fleet(drivers, MatchingAlgorithmType::CellSearch);
        let rider = Caller::rider(AccountId::from_u128(1));
        let by_id: HashMap<DriverId, Caller> = drivers.into_iter().collect();

        group.bench_with_input(BenchmarkId::from_parameter(name), &engine, |b, engine| {
            b.iter(|| {
                let request = engine
                    .request_ride(
                        &rider,
                        place(damascus_center(), "pickup"),
                        place(damascus_east(), "destination"),
                    )
                    .expect("offered");
                let driver = request
                    .offered_driver_id()
                    .and_then(|id| by_id.get(&id))
                    .copied()
                    .expect("known driver");
                engine.accept_offer(&driver, request.id).expect("accept");
                engine.start_trip(&driver, request.id).expect("start");
                black_box(engine.complete_trip(&driver, request.id).expect("complete"));
            });
        });
    }
    group.finish();
}

fn bench_matching_algorithms(c: &mut Criterion) {
    let excluded = BTreeSet::new();
    let mut group = c.benchmark_group("matching_algorithms");

    for drivers in [100, 1_000, 5_000] {
        for algorithm in [MatchingAlgorithmType::Nearest, MatchingAlgorithmType::CellSearch] {
            let Fleet { engine, .. } = fleet(drivers, algorithm);
            let id = BenchmarkId::new(format!("{algorithm:?}"), drivers);
            group.bench_function(id, |b| {
                b.iter(|| {
                    black_box(
                        engine
                            .select_best_driver(damascus_center(), VehicleCategory::Taxi, &excluded)
                            .expect("select"),
                    )
                });
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_request_lifecycle, bench_matching_algorithms);
criterion_main!(benches);
