//! Wild creature spawning and movement, trap capture, rosters, assignment,
//! and evolution.
//!
//! All randomness is drawn from purpose-seeded generators, and every
//! iteration walks keys in sorted order, so two runs with the same seed
//! produce the same menagerie.

use std::collections::{BTreeMap, HashMap};

use bevy::prelude::Resource;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::buildings::{Building, BuildingTags, BuildingType, PlayerId};
use crate::config::SimulationConfig;
use crate::geom::{chebyshev, neighbor, Direction, Neighbor, TileKey, DIRECTIONS, FACE_COUNT};
use crate::hashing::StateHasher;
use crate::modifiers::{PlayerModifiers, Trinket, WorldEventKind, WorldEvents};
use crate::rng::{nonce, purpose_rng};
use crate::scalar::Scalar;
use crate::store::SpatialStore;
use crate::terrain::{AlteredItem, Terrain};

pub type CreatureId = u64;

/// What an assigned creature improves on its building.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoostKind {
    Speed,
    Efficiency,
    Output,
}

#[repr(u16)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum CreatureType {
    Emberwing = 0,
    Frosthorn = 1,
    Verdantail = 2,
    Duneskimmer = 3,
    Shadowmaw = 4,
}

pub const CREATURE_TYPES: [CreatureType; 5] = [
    CreatureType::Emberwing,
    CreatureType::Frosthorn,
    CreatureType::Verdantail,
    CreatureType::Duneskimmer,
    CreatureType::Shadowmaw,
];

impl CreatureType {
    pub fn wire_code(self) -> u16 {
        self as u16
    }

    pub fn biomes(self) -> &'static [Terrain] {
        match self {
            Self::Emberwing => &[Terrain::Volcanic, Terrain::Desert],
            Self::Frosthorn => &[Terrain::Tundra],
            Self::Verdantail => &[Terrain::Forest, Terrain::Grassland],
            Self::Duneskimmer => &[Terrain::Desert, Terrain::Grassland],
            Self::Shadowmaw => &[Terrain::Forest, Terrain::Volcanic],
        }
    }

    pub fn boost(self) -> BoostKind {
        match self {
            Self::Emberwing | Self::Shadowmaw => BoostKind::Output,
            Self::Frosthorn | Self::Verdantail => BoostKind::Efficiency,
            Self::Duneskimmer => BoostKind::Speed,
        }
    }

    /// Probability strength for efficiency/output boosts; the speed boost
    /// is a flat rate factor and ignores this.
    pub fn boost_strength(self) -> Scalar {
        match self {
            Self::Frosthorn | Self::Shadowmaw => Scalar::from_f32(0.2),
            Self::Emberwing | Self::Verdantail => Scalar::from_f32(0.15),
            Self::Duneskimmer => Scalar::zero(),
        }
    }

    /// Damage dealt per tick to a hiss entity within reach.
    pub fn attack_damage(self) -> u32 {
        match self {
            Self::Emberwing => 35,
            Self::Shadowmaw => 30,
            Self::Duneskimmer => 25,
            Self::Frosthorn => 20,
            Self::Verdantail => 15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WildCreature {
    pub id: CreatureId,
    pub creature_type: CreatureType,
    pub key: TileKey,
    pub spawned_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedCreature {
    pub id: CreatureId,
    pub creature_type: CreatureType,
    pub owner: PlayerId,
    pub assigned_to: Option<TileKey>,
    pub captured_at_tick: u64,
    pub evolved: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssignError {
    #[error("creature {0} not found in the owner's roster")]
    CreatureNotFound(CreatureId),
    #[error("no building at the target tile")]
    NoBuilding,
    #[error("building class cannot host a creature")]
    InvalidBuildingType,
    #[error("building already has an assigned creature")]
    AlreadyAssigned,
    #[error("caller does not own the building")]
    NotOwner,
}

/// Outcomes of one creature phase, consumed by the delta layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreatureOutcome {
    Spawned {
        id: CreatureId,
        creature_type: CreatureType,
        key: TileKey,
    },
    Moved {
        id: CreatureId,
        from: TileKey,
        to: TileKey,
    },
    Captured {
        id: CreatureId,
        owner: PlayerId,
        trap: TileKey,
    },
}

/// All creature state: the wild set, per-player rosters, and the reverse
/// index for O(1) boost lookup during the kernel phase.
#[derive(Resource, Debug, Clone, Default)]
pub struct CreatureLedger {
    wild: BTreeMap<CreatureId, WildCreature>,
    captured: BTreeMap<CreatureId, CapturedCreature>,
    by_building: HashMap<TileKey, CreatureId>,
    next_id: CreatureId,
}

impl CreatureLedger {
    fn allocate_id(&mut self) -> CreatureId {
        self.next_id += 1;
        self.next_id
    }

    pub fn wild_count(&self) -> usize {
        self.wild.len()
    }

    pub fn wild(&self) -> impl Iterator<Item = &WildCreature> {
        self.wild.values()
    }

    pub fn roster(&self, owner: PlayerId) -> Vec<&CapturedCreature> {
        self.captured
            .values()
            .filter(|creature| creature.owner == owner)
            .collect()
    }

    pub fn captured(&self, id: CreatureId) -> Option<&CapturedCreature> {
        self.captured.get(&id)
    }

    /// The creature assigned to a building, if any.
    pub fn boost_for(&self, building: TileKey) -> Option<&CapturedCreature> {
        self.by_building
            .get(&building)
            .and_then(|id| self.captured.get(id))
    }

    /// Assigned creatures with their station tiles, sorted by station key;
    /// the combat phase walks this.
    pub fn assigned_stations(&self) -> Vec<(TileKey, CreatureId)> {
        let mut stations: Vec<_> = self
            .by_building
            .iter()
            .map(|(key, id)| (*key, *id))
            .collect();
        stations.sort_unstable();
        stations
    }

    pub fn assign(
        &mut self,
        caller: PlayerId,
        creature_id: CreatureId,
        building_key: TileKey,
        building: Option<&Building>,
    ) -> Result<(), AssignError> {
        let Some(building) = building else {
            return Err(AssignError::NoBuilding);
        };
        if building.building_type.tags().contains(BuildingTags::NO_ASSIGN) {
            return Err(AssignError::InvalidBuildingType);
        }
        if building.owner != Some(caller) {
            return Err(AssignError::NotOwner);
        }
        if self.by_building.contains_key(&building_key) {
            return Err(AssignError::AlreadyAssigned);
        }
        let Some(creature) = self.captured.get_mut(&creature_id) else {
            return Err(AssignError::CreatureNotFound(creature_id));
        };
        if creature.owner != caller {
            return Err(AssignError::CreatureNotFound(creature_id));
        }
        if let Some(previous) = creature.assigned_to.take() {
            self.by_building.remove(&previous);
        }
        creature.assigned_to = Some(building_key);
        self.by_building.insert(building_key, creature_id);
        Ok(())
    }

    pub fn unassign(
        &mut self,
        caller: PlayerId,
        creature_id: CreatureId,
    ) -> Result<(), AssignError> {
        let Some(creature) = self.captured.get_mut(&creature_id) else {
            return Err(AssignError::CreatureNotFound(creature_id));
        };
        if creature.owner != caller {
            return Err(AssignError::CreatureNotFound(creature_id));
        }
        if let Some(previous) = creature.assigned_to.take() {
            self.by_building.remove(&previous);
        }
        Ok(())
    }

    /// Drop the assignment when its building disappears.
    pub fn building_removed(&mut self, key: TileKey) {
        if let Some(id) = self.by_building.remove(&key) {
            if let Some(creature) = self.captured.get_mut(&id) {
                creature.assigned_to = None;
            }
        }
    }

    pub fn clear(&mut self) {
        self.wild.clear();
        self.captured.clear();
        self.by_building.clear();
        self.next_id = 0;
    }

    pub fn fold_hash(&self, hasher: &mut StateHasher) {
        for creature in self.wild.values() {
            hasher.write_u64(creature.id);
            hasher.write_u32(u32::from(creature.creature_type.wire_code()));
            hasher.write_u8(creature.key.face);
            hasher.write_u32(u32::from(creature.key.row));
            hasher.write_u32(u32::from(creature.key.col));
        }
        for creature in self.captured.values() {
            hasher.write_u64(creature.id);
            hasher.write_u64(creature.owner.0);
            hasher.write_u8(u8::from(creature.evolved));
            hasher.write_u64(creature.captured_at_tick);
        }
    }

    /// Insert a captured creature directly (persistence restore and tests).
    pub fn restore_captured(&mut self, creature: CapturedCreature) {
        if let Some(key) = creature.assigned_to {
            self.by_building.insert(key, creature.id);
        }
        self.next_id = self.next_id.max(creature.id);
        self.captured.insert(creature.id, creature);
    }

    /// Insert a wild creature directly (persistence restore and tests).
    pub fn restore_wild(&mut self, creature: WildCreature) {
        self.next_id = self.next_id.max(creature.id);
        self.wild.insert(creature.id, creature);
    }
}

/// Spawn pass, run every `spawn_interval` ticks: up to three random empty
/// tiles receive a biome-compatible wild creature while below `max_wild`.
pub fn spawn_wild(
    ledger: &mut CreatureLedger,
    store: &SpatialStore,
    config: &SimulationConfig,
    tick: u64,
) -> Vec<CreatureOutcome> {
    let mut outcomes = Vec::new();
    if ledger.wild_count() >= config.creatures.max_wild {
        return outcomes;
    }
    let n = store.subdivisions();
    let mut rng = purpose_rng(config.world_seed, tick, nonce::CREATURE_SPAWN);
    for _ in 0..3 {
        if ledger.wild_count() >= config.creatures.max_wild {
            break;
        }
        let key = TileKey::new(
            rng.gen_range(0..FACE_COUNT),
            rng.gen_range(0..n),
            rng.gen_range(0..n),
        );
        if store.has_building(key) {
            continue;
        }
        let Some(tile) = store.get_tile(key) else {
            continue;
        };
        let candidates: Vec<_> = CREATURE_TYPES
            .iter()
            .copied()
            .filter(|creature_type| creature_type.biomes().contains(&tile.terrain))
            .collect();
        if candidates.is_empty() {
            continue;
        }
        let creature_type = candidates[rng.gen_range(0..candidates.len())];
        let id = ledger.allocate_id();
        ledger.wild.insert(
            id,
            WildCreature {
                id,
                creature_type,
                key,
                spawned_at: tick,
            },
        );
        outcomes.push(CreatureOutcome::Spawned {
            id,
            creature_type,
            key,
        });
    }
    outcomes
}

/// Movement pass, run every `move_interval` ticks. With 30% probability a
/// creature steps toward the nearest Gathering Post within Chebyshev 7 on
/// its face, otherwise it wanders.
pub fn move_wild(
    ledger: &mut CreatureLedger,
    store: &SpatialStore,
    config: &SimulationConfig,
    tick: u64,
) -> Vec<CreatureOutcome> {
    let mut outcomes = Vec::new();
    let n = store.subdivisions();
    let mut rng = purpose_rng(config.world_seed, tick, nonce::CREATURE_MOVE);
    let ids: Vec<_> = ledger.wild.keys().copied().collect();
    for id in ids {
        let Some(creature) = ledger.wild.get(&id) else {
            continue;
        };
        let from = creature.key;
        let dir = if rng.gen_bool(0.3) {
            attractor_direction(store, from).unwrap_or_else(|| random_direction(&mut rng))
        } else {
            random_direction(&mut rng)
        };
        let Neighbor::Tile(target) = neighbor(from, dir, n) else {
            continue;
        };
        if store.has_building(target) {
            continue;
        }
        if let Some(creature) = ledger.wild.get_mut(&id) {
            creature.key = target;
            outcomes.push(CreatureOutcome::Moved {
                id,
                from,
                to: target,
            });
        }
    }
    outcomes
}

fn random_direction(rng: &mut impl Rng) -> Direction {
    DIRECTIONS[rng.gen_range(0..4)]
}

/// Direction toward the nearest built Gathering Post within Chebyshev 7 on
/// the creature's face, stepping along the dominant axis.
fn attractor_direction(store: &SpatialStore, from: TileKey) -> Option<Direction> {
    let mut best: Option<(u32, TileKey)> = None;
    for (key, building) in store.get_face_buildings(from.face) {
        if building.building_type != BuildingType::GatheringPost || !building.is_built() {
            continue;
        }
        let Some(distance) = chebyshev(from, key) else {
            continue;
        };
        if distance == 0 || distance > 7 {
            continue;
        }
        if best.map_or(true, |(d, _)| distance < d) {
            best = Some((distance, key));
        }
    }
    let (_, target) = best?;
    let d_row = i32::from(target.row) - i32::from(from.row);
    let d_col = i32::from(target.col) - i32::from(from.col);
    if d_row.abs() >= d_col.abs() {
        if d_row < 0 {
            Some(Direction::North)
        } else if d_row > 0 {
            Some(Direction::South)
        } else {
            None
        }
    } else if d_col > 0 {
        Some(Direction::East)
    } else {
        Some(Direction::West)
    }
}

/// Effective capture radius of a trap after altered, event, and trinket
/// multipliers.
pub fn trap_radius(
    base: u16,
    building: &Building,
    events: &WorldEvents,
    modifiers: &PlayerModifiers,
) -> u16 {
    let mut radius = u32::from(base);
    if building.altered == Some(AlteredItem::TrapRadius) {
        radius *= 3;
    }
    if events.is_active(WorldEventKind::ResonanceCascade) {
        radius *= 2;
    }
    if modifiers.has_trinket(building.owner, Trinket::AlteredResonance) {
        radius *= 2;
    }
    radius.min(u32::from(u16::MAX)) as u16
}

/// Trap pass, run every tick: each built trap tracks one creature in range
/// and captures it after `capture_time` consecutive ticks.
pub fn run_traps(
    ledger: &mut CreatureLedger,
    store: &mut SpatialStore,
    events: &WorldEvents,
    modifiers: &PlayerModifiers,
    config: &SimulationConfig,
    tick: u64,
) -> Vec<CreatureOutcome> {
    use crate::buildings::BuildingState;

    let mut outcomes = Vec::new();
    for trap_key in store.building_keys_sorted() {
        let Some(trap) = store.get_building(trap_key) else {
            continue;
        };
        if trap.building_type != BuildingType::ContainmentTrap
            || !trap.is_built()
            || !trap.powered_user
        {
            continue;
        }
        let Some(owner) = trap.owner else {
            continue;
        };
        let radius = trap_radius(config.creatures.capture_radius, trap, events, modifiers);
        let BuildingState::ContainmentTrap {
            capturing,
            capture_progress,
        } = trap.state
        else {
            continue;
        };

        // Stay locked onto the tracked creature while it remains in range;
        // otherwise acquire the lowest-id creature in range.
        let tracked = capturing.filter(|id| {
            ledger
                .wild
                .get(id)
                .and_then(|c| chebyshev(trap_key, c.key))
                .is_some_and(|d| d <= u32::from(radius))
        });
        let target = tracked.or_else(|| {
            ledger
                .wild
                .values()
                .find(|c| {
                    chebyshev(trap_key, c.key).is_some_and(|d| d <= u32::from(radius))
                })
                .map(|c| c.id)
        });

        let (new_capturing, new_progress) = match target {
            Some(id) if Some(id) == capturing => (Some(id), capture_progress + 1),
            Some(id) => (Some(id), 1),
            None => (None, 0),
        };

        if new_progress >= config.creatures.capture_time {
            if let Some(id) = new_capturing {
                if let Some(wild) = ledger.wild.remove(&id) {
                    ledger.captured.insert(
                        id,
                        CapturedCreature {
                            id,
                            creature_type: wild.creature_type,
                            owner,
                            assigned_to: None,
                            captured_at_tick: tick,
                            evolved: false,
                        },
                    );
                    outcomes.push(CreatureOutcome::Captured {
                        id,
                        owner,
                        trap: trap_key,
                    });
                }
            }
            store.update_building(trap_key, |b| {
                b.state = BuildingState::ContainmentTrap {
                    capturing: None,
                    capture_progress: 0,
                };
            });
        } else {
            store.update_building(trap_key, |b| {
                b.state = BuildingState::ContainmentTrap {
                    capturing: new_capturing,
                    capture_progress: new_progress,
                };
            });
        }
    }
    outcomes
}

/// Evolution pass, run every `evolution_check_interval` ticks: assigned,
/// un-evolved creatures held since `evolution_seconds` ago flip evolved.
/// `captured_at_tick` stays the reference point across unassignments.
pub fn evolution_pass(
    ledger: &mut CreatureLedger,
    config: &SimulationConfig,
    tick: u64,
) -> Vec<CreatureId> {
    let required_ticks =
        config.creatures.evolution_seconds * 1_000 / config.tick_interval_ms.max(1);
    let mut evolved = Vec::new();
    for creature in ledger.captured.values_mut() {
        if creature.assigned_to.is_some()
            && !creature.evolved
            && tick.saturating_sub(creature.captured_at_tick) >= required_ticks
        {
            creature.evolved = true;
            evolved.push(creature.id);
        }
    }
    evolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buildings::Building;
    use crate::geom::Direction;
    use crate::terrain::generate_tiles;

    fn test_store(n: u16) -> SpatialStore {
        SpatialStore::from_tiles(n, generate_tiles(42, n))
    }

    fn test_config(n: u16) -> SimulationConfig {
        SimulationConfig {
            subdivisions: n,
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn spawns_respect_the_wild_cap() {
        let store = test_store(8);
        let mut config = test_config(8);
        config.creatures.max_wild = 1;
        let mut ledger = CreatureLedger::default();
        for tick in 0..200 {
            spawn_wild(&mut ledger, &store, &config, tick);
        }
        assert!(ledger.wild_count() <= 1);
    }

    #[test]
    fn spawned_creatures_match_their_biome() {
        let store = test_store(8);
        let config = test_config(8);
        let mut ledger = CreatureLedger::default();
        for tick in 0..100 {
            spawn_wild(&mut ledger, &store, &config, tick);
        }
        for creature in ledger.wild() {
            let terrain = store.get_tile(creature.key).unwrap().terrain;
            assert!(creature.creature_type.biomes().contains(&terrain));
        }
    }

    #[test]
    fn assignment_rejects_foreign_buildings() {
        let mut ledger = CreatureLedger::default();
        ledger.restore_captured(CapturedCreature {
            id: 5,
            creature_type: CreatureType::Verdantail,
            owner: PlayerId(1),
            assigned_to: None,
            captured_at_tick: 0,
            evolved: false,
        });
        let building = Building::prebuilt(
            BuildingType::Processor,
            Direction::North,
            Some(PlayerId(2)),
            None,
        );
        let key = TileKey::new(0, 0, 0);
        assert_eq!(
            ledger.assign(PlayerId(1), 5, key, Some(&building)),
            Err(AssignError::NotOwner)
        );
        let conveyor = Building::prebuilt(
            BuildingType::Conveyor,
            Direction::North,
            Some(PlayerId(1)),
            None,
        );
        assert_eq!(
            ledger.assign(PlayerId(1), 5, key, Some(&conveyor)),
            Err(AssignError::InvalidBuildingType)
        );
    }

    #[test]
    fn assignment_maintains_the_reverse_index() {
        let mut ledger = CreatureLedger::default();
        ledger.restore_captured(CapturedCreature {
            id: 9,
            creature_type: CreatureType::Duneskimmer,
            owner: PlayerId(1),
            assigned_to: None,
            captured_at_tick: 0,
            evolved: false,
        });
        let building = Building::prebuilt(
            BuildingType::Processor,
            Direction::North,
            Some(PlayerId(1)),
            None,
        );
        let key = TileKey::new(0, 2, 2);
        ledger
            .assign(PlayerId(1), 9, key, Some(&building))
            .expect("assignment should succeed");
        assert_eq!(ledger.boost_for(key).map(|c| c.id), Some(9));
        ledger.unassign(PlayerId(1), 9).expect("unassign");
        assert!(ledger.boost_for(key).is_none());
    }

    #[test]
    fn evolution_uses_capture_time_as_reference() {
        let mut ledger = CreatureLedger::default();
        ledger.restore_captured(CapturedCreature {
            id: 3,
            creature_type: CreatureType::Frosthorn,
            owner: PlayerId(1),
            assigned_to: Some(TileKey::new(0, 0, 0)),
            captured_at_tick: 0,
            evolved: false,
        });
        let config = test_config(8);
        // 600 s at 200 ms per tick = 3000 ticks.
        assert!(evolution_pass(&mut ledger, &config, 2_999).is_empty());
        assert_eq!(evolution_pass(&mut ledger, &config, 3_000), vec![3]);
        assert!(ledger.captured(3).unwrap().evolved);
    }

    #[test]
    fn unassigned_creatures_do_not_evolve() {
        let mut ledger = CreatureLedger::default();
        ledger.restore_captured(CapturedCreature {
            id: 4,
            creature_type: CreatureType::Frosthorn,
            owner: PlayerId(1),
            assigned_to: None,
            captured_at_tick: 0,
            evolved: false,
        });
        let config = test_config(8);
        assert!(evolution_pass(&mut ledger, &config, 10_000).is_empty());
    }
}
