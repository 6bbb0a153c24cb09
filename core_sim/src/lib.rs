//! Core simulation crate for the Sphereworks prototype.
//!
//! Provides the authoritative tick-driven engine of the spherical
//! factory-automation world: the spatial store, per-class behavior
//! kernels, the push resolver, the capacity-based power resolver, the
//! creature and corruption subsystems, and the command/delta boundary.
//! The engine runs headless as a bevy app with a fixed-step schedule;
//! one `Update` run is one tick.

use std::sync::Arc;
use std::time::Duration;

use bevy::app::ScheduleRunnerPlugin;
use bevy::prelude::*;
use crossbeam_channel::Receiver;

pub mod buildings;
pub mod commands;
pub mod config;
pub mod corruption;
pub mod creatures;
pub mod deltas;
pub mod geom;
pub mod hashing;
pub mod items;
pub mod kernels;
pub mod metrics;
pub mod modifiers;
pub mod network;
pub mod persist;
pub mod power;
pub mod push;
pub mod rng;
pub mod scalar;
pub mod store;
pub mod systems;
pub mod terrain;

pub use buildings::{Building, BuildingState, BuildingTags, BuildingType, PlayerId, Side};
pub use commands::{
    command_channel, place_building, remove_building, Command, CommandClient, CommandQueue,
    CommandReply, PlaceError, RemoveError, TerritoryMap,
};
pub use config::SimulationConfig;
pub use corruption::{CorruptionCell, CorruptionField, HissEntity};
pub use creatures::{
    AssignError, CapturedCreature, CreatureLedger, CreatureType, WildCreature,
};
pub use deltas::{delta_channel, DeltaBus, TickOutcomes};
pub use geom::{chebyshev, face_disc, neighbor, Direction, Neighbor, TileKey, FACE_COUNT};
pub use items::ItemKind;
pub use metrics::SimulationMetrics;
pub use modifiers::{PlayerModifiers, ShiftCycle, Trinket, WorldEventKind, WorldEvents};
pub use persist::{
    MemoryPersistence, NullPersistence, Persistence, PersistenceHandle, SavePayload,
};
pub use power::{NetworkId, NetworkStats, PowerGrid};
pub use scalar::Scalar;
pub use store::{DirtySets, SpatialStore};
pub use systems::{save_now, SimulationTick, SubmissionLedger, WorldIdentity};
pub use terrain::{AlteredItem, Deposit, Terrain, Tile};

/// The command handle for a built app, stored as a resource so embedding
/// code can clone it out.
#[derive(Resource, Clone)]
pub struct CommandClientHandle(pub CommandClient);

/// Receiving half of the delta bus, stored as a resource until a
/// broadcast transport takes it.
#[derive(Resource)]
pub struct DeltaStream(pub Receiver<sim_proto::TickDelta>);

/// Capacity of the delta hand-off queue; a slow consumer loses frames
/// beyond this backlog instead of stalling the tick.
const DELTA_QUEUE_CAPACITY: usize = 64;

/// Build the headless simulation app with no persistence backend.
pub fn build_headless_app(config: SimulationConfig) -> App {
    build_headless_app_with(config, Arc::new(persist::NullPersistence))
}

/// Build the headless simulation app against a persistence collaborator.
/// When a saved world exists under the default name, its seed and
/// overlays are restored; otherwise terrain comes from the configured
/// seed.
pub fn build_headless_app_with(
    mut config: SimulationConfig,
    persistence: Arc<dyn Persistence>,
) -> App {
    let mut identity = systems::WorldIdentity::default();
    let mut overlays = persist::WorldOverlays::default();
    if let Some(meta) = persistence.load_world(&identity.name) {
        tracing::info!(
            world_id = meta.world_id,
            seed = meta.seed,
            "restoring saved world"
        );
        identity.world_id = meta.world_id;
        config.world_seed = meta.seed;
        config.subdivisions = meta.subdivisions;
        overlays = persistence.load_overlays(meta.world_id);
    }

    let tiles = terrain::generate_tiles(config.world_seed, config.subdivisions);
    let mut store = SpatialStore::from_tiles(config.subdivisions, tiles);
    persist::apply_overlays(&mut store, &overlays);

    let mut ledger = CreatureLedger::default();
    for creature in overlays.wild_creatures {
        ledger.restore_wild(creature);
    }
    for creature in overlays.captured_creatures {
        ledger.restore_captured(creature);
    }
    let mut field = CorruptionField::default();
    for (key, cell) in overlays.corruption {
        field.restore_cell(key, cell);
    }
    for entity in overlays.hiss {
        field.restore_entity(entity);
    }

    let (queue, client) = command_channel();
    let (bus, receiver) = delta_channel(DELTA_QUEUE_CAPACITY);
    let tick_interval = Duration::from_millis(config.tick_interval_ms);

    let mut app = App::new();
    app.add_plugins(MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(tick_interval)));
    app.insert_resource(config)
        .insert_resource(store)
        .insert_resource(ledger)
        .insert_resource(field)
        .insert_resource(PowerGrid::default())
        .insert_resource(TerritoryMap::default())
        .insert_resource(PlayerModifiers::default())
        .insert_resource(ShiftCycle::default())
        .insert_resource(WorldEvents::default())
        .insert_resource(TickOutcomes::default())
        .insert_resource(push::PendingPostEffects::default())
        .insert_resource(systems::SubmissionLedger::default())
        .insert_resource(systems::SimulationTick::default())
        .insert_resource(identity)
        .insert_resource(persist::PendingSave::default())
        .insert_resource(PersistenceHandle(persistence))
        .insert_resource(metrics::SimulationMetrics::default())
        .insert_resource(metrics::TickTimer::default())
        .insert_resource(queue)
        .insert_resource(bus)
        .insert_resource(CommandClientHandle(client))
        .insert_resource(DeltaStream(receiver));
    systems::add_tick_pipeline(&mut app);
    app
}
