//! The tick pipeline: every phase as a bevy system, chained in the fixed
//! order of the design. One `Update` run of the schedule is one tick.
//!
//! Commands are applied by the first system, so all mutation is
//! serialized through the driver; every later phase iterates the store in
//! sorted key order to keep runs bit-for-bit reproducible.

use std::collections::{BTreeMap, HashMap};

use bevy::prelude::*;
use rand::Rng;

use crate::buildings::{BuildingType, PlayerId};
use crate::commands::{
    place_building, remove_building, Command, CommandQueue, CommandReply, TerritoryMap,
};
use crate::config::SimulationConfig;
use crate::corruption::{
    combat_pass, damage_pass, hiss_move_pass, hiss_spawn_pass, purify_pass, seed_pass,
    spread_pass, CorruptionField,
};
use crate::creatures::{evolution_pass, move_wild, run_traps, spawn_wild, CreatureLedger};
use crate::deltas::{build_delta, DeltaBus, SubmissionRecord, TickOutcomes};
use crate::geom::{chebyshev, face_disc, illumination, sun_azimuth, Direction, TileKey};
use crate::hashing::StateHasher;
use crate::items::ItemKind;
use crate::kernels::{building_tick, conveyor_advance, KernelEffect, KernelInput};
use crate::metrics::{begin_tick_timer, collect_metrics};
use crate::modifiers::{
    efficiency_skip_chance, effective_rate, output_double_chance, PlayerModifiers, RateContext,
    ShiftCycle, WorldEventKind, WorldEvents,
};
use crate::persist::{build_save_payload, PendingSave, PersistenceHandle};
use crate::power::PowerGrid;
use crate::push::{apply_post_effects, conduit_pass, resolve_push, PendingPostEffects};
use crate::rng::{nonce, purpose_rng};
use crate::store::SpatialStore;
use crate::terrain::generate_tiles;

/// Authoritative tick counter; increments at the end of each schedule run.
#[derive(Resource, Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationTick(pub u64);

/// Identity of the currently loaded world, for the persistence boundary.
#[derive(Resource, Debug, Clone)]
pub struct WorldIdentity {
    pub world_id: u64,
    pub name: String,
}

impl Default for WorldIdentity {
    fn default() -> Self {
        Self {
            world_id: 1,
            name: "default".to_string(),
        }
    }
}

/// Per-player submission totals fed by terminal kernels.
#[derive(Resource, Debug, Clone, Default)]
pub struct SubmissionLedger {
    totals: BTreeMap<(Option<PlayerId>, ItemKind), u32>,
}

impl SubmissionLedger {
    pub fn record(&mut self, player: Option<PlayerId>, item: ItemKind) {
        *self.totals.entry((player, item)).or_insert(0) += 1;
    }

    pub fn total(&self, player: Option<PlayerId>, item: ItemKind) -> u32 {
        self.totals.get(&(player, item)).copied().unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.totals.clear();
    }
}

/// Install every phase on the app's `Update` schedule in pipeline order.
pub fn add_tick_pipeline(app: &mut App) {
    app.add_systems(
        Update,
        (
            process_commands,
            begin_tick_timer,
            construction_phase,
            power_phase,
            kernel_phase,
            advance_phase,
            push_phase,
            conduit_phase,
            post_effects_phase,
            creature_phase,
            corruption_phase,
            ambient_phase,
            emit_phase,
            collect_metrics,
            advance_tick,
        )
            .chain(),
    );
}

/// Drain and apply queued commands between ticks.
#[allow(clippy::too_many_arguments)]
pub fn process_commands(
    queue: Res<CommandQueue>,
    mut config: ResMut<SimulationConfig>,
    mut store: ResMut<SpatialStore>,
    mut modifiers: ResMut<PlayerModifiers>,
    mut ledger: ResMut<CreatureLedger>,
    mut field: ResMut<CorruptionField>,
    mut grid: ResMut<PowerGrid>,
    mut territory: ResMut<TerritoryMap>,
    mut events: ResMut<WorldEvents>,
    mut outcomes: ResMut<TickOutcomes>,
    mut submissions: ResMut<SubmissionLedger>,
    mut pending: ResMut<PendingSave>,
    mut tick: ResMut<SimulationTick>,
    identity: Res<WorldIdentity>,
    persistence: Res<PersistenceHandle>,
) {
    for envelope in queue.drain() {
        let reply = match envelope.command {
            Command::PlaceBuilding {
                key,
                type_code,
                orientation,
                owner,
            } => CommandReply::Place(apply_place(
                &mut store,
                &field,
                &territory,
                &mut modifiers,
                key,
                type_code,
                orientation,
                owner,
            )),
            Command::PlaceBuildings { requests } => CommandReply::PlaceMany(
                requests
                    .into_iter()
                    .map(|(key, type_code, orientation, owner)| {
                        apply_place(
                            &mut store,
                            &field,
                            &territory,
                            &mut modifiers,
                            key,
                            type_code,
                            orientation,
                            owner,
                        )
                    })
                    .collect(),
            ),
            Command::RemoveBuilding { key, acting_player } => CommandReply::Remove(
                remove_building(
                    &mut store,
                    &mut ledger,
                    key,
                    acting_player.map(PlayerId),
                )
                .map(|_| ()),
            ),
            Command::RemoveBuildings { keys, acting_player } => CommandReply::RemoveMany(
                keys.into_iter()
                    .map(|key| {
                        remove_building(
                            &mut store,
                            &mut ledger,
                            key,
                            acting_player.map(PlayerId),
                        )
                        .map(|_| ())
                    })
                    .collect(),
            ),
            Command::ReadTickCount => CommandReply::TickCount(tick.0),
            Command::ResetWorld { new_seed } => {
                tracing::info!(new_seed, "world reset requested");
                persistence.0.delete_world(identity.world_id);
                config.world_seed = new_seed;
                let tiles = generate_tiles(new_seed, config.subdivisions);
                store.reset(config.subdivisions, tiles);
                ledger.clear();
                field.clear();
                grid.clear();
                territory.clear();
                events.active.clear();
                outcomes.clear();
                submissions.clear();
                pending.clear();
                tick.0 = 0;
                outcomes.sync_requested = true;
                CommandReply::ResetDone
            }
        };
        if let Some(sender) = envelope.reply {
            let _ = sender.send(reply);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn apply_place(
    store: &mut SpatialStore,
    field: &CorruptionField,
    territory: &TerritoryMap,
    modifiers: &mut PlayerModifiers,
    key: TileKey,
    type_code: u16,
    orientation: u8,
    owner: Option<u64>,
) -> Result<(), crate::commands::PlaceError> {
    let Some(orientation) = Direction::from_index(orientation) else {
        return Err(crate::commands::PlaceError::InvalidBuildingType);
    };
    place_building(
        store,
        field,
        territory,
        modifiers,
        key,
        type_code,
        orientation,
        owner.map(PlayerId),
    )
}

/// Flip completed construction sites into live buildings.
pub fn construction_phase(mut store: ResMut<SpatialStore>) {
    for key in store.building_keys_sorted() {
        let finished = store
            .get_building(key)
            .and_then(|b| b.construction.as_ref())
            .is_some_and(|site| site.complete);
        if finished {
            store.update_building(key, |b| b.construction = None);
        }
    }
}

/// Rebuild power networks and territory claims every resolve interval.
pub fn power_phase(
    mut grid: ResMut<PowerGrid>,
    mut territory: ResMut<TerritoryMap>,
    mut outcomes: ResMut<TickOutcomes>,
    store: Res<SpatialStore>,
    config: Res<SimulationConfig>,
    tick: Res<SimulationTick>,
) {
    if tick.0 % config.power.resolve_interval != 0 {
        return;
    }
    grid.resolve(&store, &config);

    // Substations stake their owner's territory over the powered disc.
    let mut claims: HashMap<TileKey, PlayerId> = HashMap::new();
    for key in store.building_keys_sorted() {
        let Some(building) = store.get_building(key) else {
            continue;
        };
        if building.building_type != BuildingType::Substation || !building.is_built() {
            continue;
        }
        let Some(owner) = building.owner else {
            continue;
        };
        for tile in face_disc(key, config.power.sub_radius, store.subdivisions()) {
            claims.entry(tile).or_insert(owner);
        }
    }
    for key in territory.replace(claims) {
        let owner = territory.owner_of(key);
        outcomes.territory.push((key, owner));
    }
}

/// Run every building's production kernel in stable key order.
#[allow(clippy::too_many_arguments)]
pub fn kernel_phase(
    mut store: ResMut<SpatialStore>,
    mut outcomes: ResMut<TickOutcomes>,
    mut submissions: ResMut<SubmissionLedger>,
    ledger: Res<CreatureLedger>,
    modifiers: Res<PlayerModifiers>,
    grid: Res<PowerGrid>,
    shift: Res<ShiftCycle>,
    config: Res<SimulationConfig>,
    tick: Res<SimulationTick>,
) {
    let mut rng = purpose_rng(config.world_seed, tick.0, nonce::PRODUCTION_BOOST);

    // Powered lamps suppress shadow panels within Chebyshev 3.
    let lamps: Vec<TileKey> = store
        .building_keys_sorted()
        .into_iter()
        .filter(|key| {
            store.get_building(*key).is_some_and(|b| {
                b.building_type == BuildingType::Lamp
                    && b.is_built()
                    && b.powered_user
                    && grid.in_network(*key)
            })
        })
        .collect();

    for key in store.building_keys_sorted() {
        let Some(building) = store.get_building(key).cloned() else {
            continue;
        };
        let Some(tile) = store.get_tile(key).cloned() else {
            continue;
        };
        let assigned = ledger.boost_for(key);
        let rate_ctx = RateContext {
            building_type: building.building_type,
            base_rate: building.state.base_rate().unwrap_or(1),
            altered: building.altered,
            owner: building.owner,
            terrain: tile.terrain,
            assigned,
            shift: shift.phase,
            brownout: grid.brownout_ratio(key),
            in_network: grid.in_network(key),
        };
        let input = KernelInput {
            key,
            tile: &tile,
            effective_rate: effective_rate(&rate_ctx, &modifiers),
            eff_skip: efficiency_skip_chance(assigned, building.owner, &modifiers),
            out_double: output_double_chance(assigned, building.owner, &modifiers),
            illumination: illumination(key.face, tick.0),
            lamp_nearby: lamps
                .iter()
                .any(|lamp| chebyshev(key, *lamp).is_some_and(|d| d <= 3)),
        };
        let (next, effect) = building_tick(&building, &input, &mut rng);
        if next != building {
            store.put_building(key, next);
        }
        match effect {
            KernelEffect::None => {}
            KernelEffect::DepleteResource => {
                store.deplete_resource(key);
            }
            KernelEffect::Submission {
                player,
                item,
                trade,
            } => {
                submissions.record(player, item);
                outcomes.submissions.push(SubmissionRecord {
                    player,
                    item,
                    trade,
                });
            }
        }
    }
}

/// Shift buffered conveyor items one slot forward.
pub fn advance_phase(mut store: ResMut<SpatialStore>) {
    for key in store.building_keys_sorted() {
        let advanced = store
            .get_building(key)
            .and_then(|b| conveyor_advance(&b.state));
        if let Some(state) = advanced {
            store.update_building(key, |b| b.state = state);
        }
    }
}

pub fn push_phase(
    mut store: ResMut<SpatialStore>,
    mut outcomes: ResMut<TickOutcomes>,
    mut pending_effects: ResMut<PendingPostEffects>,
) {
    let report = resolve_push(&mut store);
    outcomes.moves.extend(report.moves);
    pending_effects.pushes = report.output_pushes;
}

pub fn conduit_phase(mut store: ResMut<SpatialStore>, mut outcomes: ResMut<TickOutcomes>) {
    outcomes.moves.extend(conduit_pass(&mut store));
}

/// Duplication and output-boost refills for sources that pushed this
/// tick, run once the conduit hop has settled.
pub fn post_effects_phase(
    mut store: ResMut<SpatialStore>,
    mut pending_effects: ResMut<PendingPostEffects>,
    ledger: Res<CreatureLedger>,
    modifiers: Res<PlayerModifiers>,
    config: Res<SimulationConfig>,
    tick: Res<SimulationTick>,
) {
    let pushes = std::mem::take(&mut pending_effects.pushes);
    apply_post_effects(&mut store, &ledger, &modifiers, &config, tick.0, &pushes);
}

pub fn creature_phase(
    mut ledger: ResMut<CreatureLedger>,
    mut store: ResMut<SpatialStore>,
    mut outcomes: ResMut<TickOutcomes>,
    events: Res<WorldEvents>,
    modifiers: Res<PlayerModifiers>,
    config: Res<SimulationConfig>,
    tick: Res<SimulationTick>,
) {
    let creatures = &config.creatures;
    if tick.0 % creatures.spawn_interval == 0 {
        let spawned = spawn_wild(&mut ledger, &store, &config, tick.0);
        outcomes.creatures.extend(spawned);
    }
    if tick.0 % creatures.move_interval == 0 {
        let moved = move_wild(&mut ledger, &store, &config, tick.0);
        outcomes.creatures.extend(moved);
    }
    let captured = run_traps(
        &mut ledger,
        &mut store,
        &events,
        &modifiers,
        &config,
        tick.0,
    );
    outcomes.creatures.extend(captured);
    if tick.0 % creatures.evolution_check_interval == 0 {
        for id in evolution_pass(&mut ledger, &config, tick.0) {
            tracing::info!(creature = id, "creature evolved");
        }
    }
}

pub fn corruption_phase(
    mut field: ResMut<CorruptionField>,
    mut store: ResMut<SpatialStore>,
    mut ledger: ResMut<CreatureLedger>,
    mut outcomes: ResMut<TickOutcomes>,
    config: Res<SimulationConfig>,
    tick: Res<SimulationTick>,
) {
    let corruption = &config.corruption;
    if tick.0 < corruption.start_tick {
        return;
    }
    if tick.0 % corruption.seed_interval == 0 {
        let seeded = seed_pass(&mut field, &store, &config, tick.0);
        outcomes.corruption.extend(seeded);
    }
    if tick.0 % corruption.spread_interval == 0 {
        let spread = spread_pass(&mut field, &store, &config, tick.0);
        outcomes.corruption.extend(spread);
        let spawned = hiss_spawn_pass(&mut field, &config, tick.0);
        outcomes.corruption.extend(spawned);
    }
    let damaged = damage_pass(&mut field, &mut store, &mut ledger, &config);
    outcomes.corruption.extend(damaged);
    if tick.0 % corruption.hiss_move_interval == 0 {
        let moved = hiss_move_pass(&mut field, &store, tick.0);
        outcomes.corruption.extend(moved);
    }
    let fought = combat_pass(&mut field, &mut store, &ledger, &config);
    outcomes.corruption.extend(fought);
    let purified = purify_pass(&mut field, &store, &config);
    outcomes.corruption.extend(purified);
}

/// Interval between world-event eligibility rolls.
const WORLD_EVENT_CHECK_TICKS: u64 = 2_000;
/// Resonance Cascade duration once started.
const RESONANCE_CASCADE_TICKS: u64 = 500;
/// Ticks between sun position notifications.
const SUN_NOTIFY_TICKS: u64 = 100;

/// Shift cycle, sun movement, and timed world events.
pub fn ambient_phase(
    mut shift: ResMut<ShiftCycle>,
    mut events: ResMut<WorldEvents>,
    mut outcomes: ResMut<TickOutcomes>,
    config: Res<SimulationConfig>,
    tick: Res<SimulationTick>,
) {
    let phase = ShiftCycle::phase_for_tick(tick.0);
    if phase != shift.phase {
        shift.phase = phase;
        outcomes
            .global
            .push(sim_proto::GlobalEvent::ShiftCycleChanged { phase: phase as u8 });
    }

    if tick.0 % SUN_NOTIFY_TICKS == 0 {
        let azimuth_milli = (sun_azimuth(tick.0) * 1_000.0) as u32;
        outcomes
            .global
            .push(sim_proto::GlobalEvent::SunMoved { azimuth_milli });
    }

    for kind in events.expire(tick.0) {
        outcomes
            .global
            .push(sim_proto::GlobalEvent::WorldEventEnded { kind: kind as u16 });
    }
    if tick.0 > 0 && tick.0 % WORLD_EVENT_CHECK_TICKS == 0 {
        let mut rng = purpose_rng(config.world_seed, tick.0, nonce::WORLD_EVENTS);
        if rng.gen_bool(0.25) && !events.is_active(WorldEventKind::ResonanceCascade) {
            let ends_at_tick = tick.0 + RESONANCE_CASCADE_TICKS;
            events.start(WorldEventKind::ResonanceCascade, ends_at_tick);
            outcomes.global.push(sim_proto::GlobalEvent::WorldEventStarted {
                kind: WorldEventKind::ResonanceCascade as u16,
                ends_at_tick,
            });
            tracing::info!(ends_at_tick, "resonance cascade started");
        }
    }
}

/// Hash the world, drain dirty sets, publish the delta, and run the
/// periodic save.
#[allow(clippy::too_many_arguments)]
pub fn emit_phase(
    mut store: ResMut<SpatialStore>,
    mut outcomes: ResMut<TickOutcomes>,
    mut bus: ResMut<DeltaBus>,
    mut pending: ResMut<PendingSave>,
    ledger: Res<CreatureLedger>,
    field: Res<CorruptionField>,
    grid: Res<PowerGrid>,
    events: Res<WorldEvents>,
    config: Res<SimulationConfig>,
    tick: Res<SimulationTick>,
    identity: Res<WorldIdentity>,
    persistence: Res<PersistenceHandle>,
) {
    let mut hasher = StateHasher::new();
    hasher.write_u64(tick.0);
    store.fold_hash(&mut hasher);
    ledger.fold_hash(&mut hasher);
    field.fold_hash(&mut hasher);
    grid.fold_hash(&mut hasher);
    events.fold_hash(&mut hasher);
    let state_hash = hasher.finish();

    if outcomes.sync_requested {
        let sync = crate::deltas::build_sync_delta(tick.0, state_hash, &store, &ledger, &field);
        bus.publish(sync);
    }
    let dirty = store.drain_dirty();
    let delta = build_delta(tick.0, state_hash, &store, &dirty, &outcomes);
    bus.publish(delta);
    outcomes.clear();

    pending.merge(&dirty);
    if tick.0 > 0 && tick.0 % config.save_interval_ticks() == 0 && !pending.is_empty() {
        let accumulated = pending.take();
        let payload = build_save_payload(&store, &accumulated, identity.world_id, tick.0);
        persistence.0.save_dirty(payload);
    }
}

pub fn advance_tick(mut tick: ResMut<SimulationTick>) {
    tick.0 = tick.0.wrapping_add(1);
}

/// Force a save of everything accumulated since the last periodic save;
/// called on shutdown.
pub fn save_now(world: &mut World) {
    let tick = world.resource::<SimulationTick>().0;
    let world_id = world.resource::<WorldIdentity>().world_id;
    let accumulated = world.resource_mut::<PendingSave>().take();
    let store = world.resource::<SpatialStore>();
    let payload = build_save_payload(store, &accumulated, world_id, tick);
    if !payload.is_empty() {
        world.resource::<PersistenceHandle>().0.save_dirty(payload);
    }
}
