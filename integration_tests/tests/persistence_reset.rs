mod common;

use std::sync::Arc;

use core_sim::{
    build_headless_app_with, Building, BuildingType, Command, CommandClientHandle, Direction,
    MemoryPersistence, SimulationTick, SpatialStore, TileKey,
};

#[test]
fn periodic_saves_carry_accumulated_dirt() {
    let mut config = common::small_config();
    // One save every five ticks.
    config.save_interval_ms = 5 * config.tick_interval_ms;
    let persistence = Arc::new(MemoryPersistence::default());
    let mut app = build_headless_app_with(config, persistence.clone());

    let key = TileKey::new(0, 2, 2);
    app.world.resource_mut::<SpatialStore>().put_building(
        key,
        Building::prebuilt(BuildingType::Conveyor, Direction::East, None, None),
    );
    for _ in 0..7 {
        app.update();
    }

    assert!(persistence.save_count() >= 1, "a save should have fired");
    let payload = persistence.last_save().expect("payload");
    assert!(
        payload.buildings.iter().any(|row| row.key == key),
        "the placed conveyor reaches the persistence collaborator"
    );
}

#[test]
fn shutdown_save_flushes_whatever_is_pending() {
    let config = common::small_config();
    let persistence = Arc::new(MemoryPersistence::default());
    let mut app = build_headless_app_with(config, persistence.clone());

    app.world.resource_mut::<SpatialStore>().put_building(
        TileKey::new(0, 1, 1),
        Building::prebuilt(BuildingType::Conveyor, Direction::East, None, None),
    );
    app.update();
    assert_eq!(persistence.save_count(), 0, "interval not reached yet");

    core_sim::save_now(&mut app.world);
    assert_eq!(persistence.save_count(), 1);
}

#[test]
fn reset_world_clears_state_and_restarts_the_counter() {
    let config = common::small_config();
    let persistence = Arc::new(MemoryPersistence::default());
    let mut app = build_headless_app_with(config, persistence.clone());
    let client = app.world.resource::<CommandClientHandle>().0.clone();

    app.world.resource_mut::<SpatialStore>().put_building(
        TileKey::new(0, 3, 3),
        Building::prebuilt(BuildingType::Processor, Direction::East, None, None),
    );
    for _ in 0..10 {
        app.update();
    }
    assert_eq!(app.world.resource::<SimulationTick>().0, 10);

    client.send(Command::ResetWorld { new_seed: 777 });
    app.update();

    let store = app.world.resource::<SpatialStore>();
    assert_eq!(store.building_count(), 0, "reset drops every building");
    assert_eq!(
        app.world.resource::<SimulationTick>().0,
        1,
        "reset restarts the counter before the tick runs"
    );
    assert_eq!(persistence.deleted_worlds(), vec![1]);
}
