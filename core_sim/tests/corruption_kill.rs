//! The corruption kill scenario: an isolated cell escalating under a
//! smelter until the building dies, and beacon containment.

use bevy::prelude::*;

use core_sim::{
    build_headless_app, chebyshev, Building, BuildingType, CorruptionCell, CorruptionField,
    Direction, SimulationConfig, SimulationTick, SpatialStore, TileKey,
};

fn test_app() -> App {
    let config = SimulationConfig {
        subdivisions: 16,
        ..SimulationConfig::default()
    };
    build_headless_app(config)
}

fn place(app: &mut App, key: TileKey, building_type: BuildingType) {
    app.world.resource_mut::<SpatialStore>().put_building(
        key,
        Building::prebuilt(building_type, Direction::North, None, None),
    );
}

#[test]
fn escalating_corruption_destroys_the_smelter_on_schedule() {
    let mut app = test_app();
    let smelter = TileKey::new(0, 8, 8);
    place(&mut app, smelter, BuildingType::Processor);
    // Wall the cell in so it cannot spread; intensity escalation is the
    // only clock that matters.
    place(&mut app, TileKey::new(0, 7, 8), BuildingType::ContainmentVault);
    place(&mut app, TileKey::new(0, 9, 8), BuildingType::ContainmentVault);
    place(&mut app, TileKey::new(0, 8, 7), BuildingType::ContainmentVault);
    place(&mut app, TileKey::new(0, 8, 9), BuildingType::ContainmentVault);

    // Run the world past the corruption start, then infect the smelter's
    // tile at intensity 1 just after the tick-500 spread pass.
    while app.world.resource::<SimulationTick>().0 <= 501 {
        app.update();
    }
    app.world.resource_mut::<CorruptionField>().restore_cell(
        smelter,
        CorruptionCell {
            intensity: 1,
            seeded_at: 501,
            building_damage_ticks: 0,
        },
    );

    let mut destroyed_at = None;
    while app.world.resource::<SimulationTick>().0 <= 730 {
        let tick = app.world.resource::<SimulationTick>().0;
        let alive = app.world.resource::<SpatialStore>().has_building(smelter);
        if alive {
            assert!(
                tick <= 726,
                "smelter should be gone by tick 725, still alive at {tick}"
            );
        } else if destroyed_at.is_none() {
            destroyed_at = Some(tick);
        }
        app.update();
    }

    let destroyed_at = destroyed_at.expect("smelter destroyed");
    // Intensity crosses the damage threshold at tick 700; 25 damaging
    // ticks later the building is gone.
    assert!(
        destroyed_at > 700 && destroyed_at <= 726,
        "destroyed at {destroyed_at}"
    );
}

#[test]
fn beacon_keeps_its_radius_clear() {
    // Corruption active from the first tick so purification runs
    // immediately.
    let mut config = SimulationConfig {
        subdivisions: 16,
        ..SimulationConfig::default()
    };
    config.corruption.start_tick = 0;
    let mut app = build_headless_app(config);
    let beacon = TileKey::new(0, 8, 8);
    place(&mut app, beacon, BuildingType::PurificationBeacon);

    // Paint corruption through the protected disc, then let purification
    // run for a few ticks.
    {
        let mut field = app.world.resource_mut::<CorruptionField>();
        for row in 4..=12u16 {
            for col in 4..=12u16 {
                field.restore_cell(
                    TileKey::new(0, row, col),
                    CorruptionCell {
                        intensity: 3,
                        seeded_at: 0,
                        building_damage_ticks: 0,
                    },
                );
            }
        }
    }
    for _ in 0..4 {
        app.update();
    }

    let field = app.world.resource::<CorruptionField>();
    let radius = app
        .world
        .resource::<SimulationConfig>()
        .corruption
        .beacon_radius;
    for (key, _) in field.cells() {
        let distance = chebyshev(*key, beacon).expect("same face");
        assert!(
            distance > u32::from(radius),
            "cell {key:?} survived inside the beacon radius"
        );
    }
}
