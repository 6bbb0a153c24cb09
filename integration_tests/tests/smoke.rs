mod common;

use core_sim::{DeltaBus, SimulationMetrics, SimulationTick};

#[test]
fn app_initializes_and_ticks() {
    let mut app = common::small_app();
    for _ in 0..20 {
        app.update();
    }
    assert_eq!(app.world.resource::<SimulationTick>().0, 20);

    let metrics = app.world.resource::<SimulationMetrics>();
    assert_eq!(metrics.tick, 19, "metrics lag the counter by one phase");
}

#[test]
fn every_tick_emits_a_delta_frame() {
    let mut app = common::small_app();
    for expected_tick in 0..10u64 {
        app.update();
        let bus = app.world.resource::<DeltaBus>();
        let delta = bus.last.as_ref().expect("delta per tick");
        assert_eq!(delta.header.tick, expected_tick);
    }
}

#[test]
fn delta_stream_is_consumable_and_decodable() {
    let mut app = common::small_app();
    let receiver = app
        .world
        .remove_resource::<core_sim::DeltaStream>()
        .expect("stream available")
        .0;
    app.update();
    let delta = receiver.try_recv().expect("frame queued");
    let bytes = sim_proto::encode_delta(&delta).expect("encode");
    let decoded = sim_proto::decode_delta(&bytes).expect("decode");
    assert_eq!(delta, decoded);
}
