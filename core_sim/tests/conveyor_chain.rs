//! A miner feeding a conveyor chain: depletion, throughput, and
//! back-pressure at the open end.

use bevy::prelude::*;

use core_sim::{
    build_headless_app, Building, BuildingState, BuildingType, Deposit, Direction, ItemKind,
    SimulationConfig, SpatialStore, Terrain, TileKey,
};

fn test_app() -> App {
    let config = SimulationConfig {
        subdivisions: 16,
        ..SimulationConfig::default()
    };
    build_headless_app(config)
}

/// Desert keeps the shift-cycle extractor modifier at exactly 1.0, so the
/// default rate of 10 ticks per cycle holds.
fn seed_iron_tile(store: &mut SpatialStore, key: TileKey, amount: u32) {
    let mut tile = store.get_tile(key).cloned().expect("tile");
    tile.terrain = Terrain::Desert;
    tile.deposit = Some(Deposit {
        kind: ItemKind::IronOre,
        amount,
    });
    tile.altered = None;
    store.put_tile(key, tile);
}

#[test]
fn miner_fills_a_chain_and_backs_up_at_the_end() {
    let mut app = test_app();
    let miner_key = TileKey::new(0, 0, 0);
    {
        let mut store = app.world.resource_mut::<SpatialStore>();
        seed_iron_tile(&mut store, miner_key, 10);
        store.put_building(
            miner_key,
            Building::prebuilt(BuildingType::Extractor, Direction::East, None, None),
        );
        for col in 1..=5u16 {
            store.put_building(
                TileKey::new(0, 0, col),
                Building::prebuilt(BuildingType::Conveyor, Direction::East, None, None),
            );
        }
    }

    for _ in 0..50 {
        app.update();
    }

    let store = app.world.resource::<SpatialStore>();
    let deposit = store
        .get_tile(miner_key)
        .and_then(|tile| tile.deposit)
        .expect("deposit should remain");
    assert_eq!(deposit.amount, 5, "five cycles in fifty ticks");

    let mut chain_items = 0;
    for col in 1..=5u16 {
        let building = store.get_building(TileKey::new(0, 0, col)).unwrap();
        if let BuildingState::Conveyor { item: Some(kind) } = building.state {
            assert_eq!(kind, ItemKind::IronOre);
            chain_items += 1;
        }
    }
    assert_eq!(chain_items, 5, "all five mined items sit on the chain");

    // The chain dead-ends past the last conveyor, so the lead item parks
    // on the furthest tile.
    let last = store.get_building(TileKey::new(0, 0, 5)).unwrap();
    assert!(matches!(
        last.state,
        BuildingState::Conveyor { item: Some(_) }
    ));
}

#[test]
fn depleted_deposit_idles_the_miner() {
    let mut app = test_app();
    let miner_key = TileKey::new(0, 0, 0);
    {
        let mut store = app.world.resource_mut::<SpatialStore>();
        seed_iron_tile(&mut store, miner_key, 1);
        store.put_building(
            miner_key,
            Building::prebuilt(BuildingType::Extractor, Direction::East, None, None),
        );
        store.put_building(
            TileKey::new(0, 0, 1),
            Building::prebuilt(BuildingType::Conveyor, Direction::East, None, None),
        );
        store.put_building(
            TileKey::new(0, 0, 2),
            Building::prebuilt(BuildingType::Conveyor, Direction::East, None, None),
        );
    }

    for _ in 0..60 {
        app.update();
    }

    let store = app.world.resource::<SpatialStore>();
    assert!(
        store.get_tile(miner_key).unwrap().deposit.is_none(),
        "deposit clears at zero"
    );
    // Exactly one item ever produced.
    let mut items = 0;
    for col in 1..=2u16 {
        if let BuildingState::Conveyor { item: Some(_) } =
            store.get_building(TileKey::new(0, 0, col)).unwrap().state
        {
            items += 1;
        }
    }
    let miner = store.get_building(miner_key).unwrap();
    if let BuildingState::Extractor {
        output_buffer: Some(_),
        ..
    } = miner.state
    {
        items += 1;
    }
    assert_eq!(items, 1);
}
