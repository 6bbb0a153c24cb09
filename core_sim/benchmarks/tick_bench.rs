use bevy::prelude::*;
use criterion::{criterion_group, criterion_main, Criterion};

use core_sim::{
    build_headless_app, Building, BuildingType, Direction, SimulationConfig, SpatialStore,
    TileKey,
};

fn populated_app() -> App {
    let config = SimulationConfig {
        subdivisions: 32,
        ..SimulationConfig::default()
    };
    let mut app = build_headless_app(config);
    {
        let mut store = app.world.resource_mut::<SpatialStore>();
        // A conveyor lattice with producers sprinkled in, enough to load
        // the kernel and push phases.
        for face in 0..4u8 {
            for row in (0..32u16).step_by(2) {
                for col in 0..24u16 {
                    let key = TileKey::new(face, row, col);
                    let building_type = if col % 8 == 0 {
                        BuildingType::Processor
                    } else {
                        BuildingType::Conveyor
                    };
                    store.put_building(
                        key,
                        Building::prebuilt(building_type, Direction::East, None, None),
                    );
                }
            }
        }
    }
    // Settle dirty bits from setup.
    app.update();
    app
}

fn tick_benchmark(c: &mut Criterion) {
    let mut app = populated_app();
    c.bench_function("full_tick", |b| {
        b.iter(|| {
            app.update();
        });
    });
}

criterion_group!(benches, tick_benchmark);
criterion_main!(benches);
