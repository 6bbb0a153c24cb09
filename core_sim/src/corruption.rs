//! The corruption field and its mobile hiss entities: seeding, spread,
//! building damage, combat against turrets and assigned creatures, and
//! purification rollback.

use std::collections::BTreeMap;

use bevy::prelude::Resource;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::buildings::{BuildingState, BuildingTags, BuildingType};
use crate::config::SimulationConfig;
use crate::creatures::CreatureLedger;
use crate::geom::{chebyshev, neighbor, Neighbor, TileKey, DIRECTIONS, FACE_COUNT};
use crate::hashing::{mix_seed, StateHasher};
use crate::items::ItemKind;
use crate::rng::{nonce, purpose_rng};
use crate::store::SpatialStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorruptionCell {
    pub intensity: u8,
    pub seeded_at: u64,
    pub building_damage_ticks: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HissEntity {
    pub id: u64,
    pub key: TileKey,
    pub health: i32,
    pub spawned_at: u64,
}

pub const HISS_MAX_HEALTH: i32 = 100;
pub const TURRET_DAMAGE: i32 = 34;

/// Outcomes of one corruption phase, consumed by the delta layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptionOutcome {
    CellUpdated { key: TileKey, intensity: u8 },
    CellCleared { key: TileKey },
    HissSpawned { id: u64, key: TileKey },
    HissMoved { id: u64, from: TileKey, to: TileKey },
    HissKilled { id: u64, key: TileKey },
    BuildingDamaged { key: TileKey },
    BuildingDestroyed { key: TileKey },
}

/// All corruption state. Mutated only inside the corruption phase.
#[derive(Resource, Debug, Clone, Default)]
pub struct CorruptionField {
    cells: BTreeMap<TileKey, CorruptionCell>,
    entities: BTreeMap<u64, HissEntity>,
    next_entity_id: u64,
}

impl CorruptionField {
    pub fn is_corrupted(&self, key: TileKey) -> bool {
        self.cells.contains_key(&key)
    }

    pub fn intensity(&self, key: TileKey) -> Option<u8> {
        self.cells.get(&key).map(|cell| cell.intensity)
    }

    pub fn cell(&self, key: TileKey) -> Option<&CorruptionCell> {
        self.cells.get(&key)
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn cells(&self) -> impl Iterator<Item = (&TileKey, &CorruptionCell)> {
        self.cells.iter()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn entities(&self) -> impl Iterator<Item = &HissEntity> {
        self.entities.values()
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.entities.clear();
        self.next_entity_id = 0;
    }

    /// Direct insertion for persistence restore and tests.
    pub fn restore_cell(&mut self, key: TileKey, cell: CorruptionCell) {
        self.cells.insert(key, cell);
    }

    pub fn restore_entity(&mut self, entity: HissEntity) {
        self.next_entity_id = self.next_entity_id.max(entity.id);
        self.entities.insert(entity.id, entity);
    }

    pub fn fold_hash(&self, hasher: &mut StateHasher) {
        for (key, cell) in &self.cells {
            hasher.write_u8(key.face);
            hasher.write_u32(u32::from(key.row));
            hasher.write_u32(u32::from(key.col));
            hasher.write_u8(cell.intensity);
            hasher.write_u32(cell.building_damage_ticks);
        }
        for entity in self.entities.values() {
            hasher.write_u64(entity.id);
            hasher.write_u8(entity.key.face);
            hasher.write_u32(u32::from(entity.key.row));
            hasher.write_u32(u32::from(entity.key.col));
            hasher.write_u32(entity.health as u32);
        }
    }
}

/// Is the tile inside the protection radius of any built, switched-on
/// Purification Beacon?
fn beacon_protected(store: &SpatialStore, key: TileKey, radius: u16) -> bool {
    store.get_face_buildings(key.face).iter().any(|(beacon_key, building)| {
        building.building_type == BuildingType::PurificationBeacon
            && building.is_built()
            && building.powered_user
            && chebyshev(key, *beacon_key).is_some_and(|d| d <= u32::from(radius))
    })
}

fn spread_eligible(
    store: &SpatialStore,
    field: &CorruptionField,
    key: TileKey,
    beacon_radius: u16,
) -> bool {
    if field.is_corrupted(key) {
        return false;
    }
    if beacon_protected(store, key, beacon_radius) {
        return false;
    }
    match store.get_building(key) {
        Some(building) => building
            .building_type
            .tags()
            .intersects(BuildingTags::PURIFIER | BuildingTags::DEFENSE),
        None => true,
    }
}

/// Seeding pass, run every `seed_interval` ticks once the world is old
/// enough: one to three random unoccupied, unprotected tiles turn
/// intensity 1.
pub fn seed_pass(
    field: &mut CorruptionField,
    store: &SpatialStore,
    config: &SimulationConfig,
    tick: u64,
) -> Vec<CorruptionOutcome> {
    let mut outcomes = Vec::new();
    let n = store.subdivisions();
    let mut rng = purpose_rng(config.world_seed, tick, nonce::CORRUPTION_SEED);
    let count = rng.gen_range(1..=3);
    for _ in 0..count {
        let key = TileKey::new(
            rng.gen_range(0..FACE_COUNT),
            rng.gen_range(0..n),
            rng.gen_range(0..n),
        );
        if store.has_building(key)
            || field.is_corrupted(key)
            || beacon_protected(store, key, config.corruption.beacon_radius)
        {
            continue;
        }
        field.cells.insert(
            key,
            CorruptionCell {
                intensity: 1,
                seeded_at: tick,
                building_damage_ticks: 0,
            },
        );
        outcomes.push(CorruptionOutcome::CellUpdated { key, intensity: 1 });
    }
    outcomes
}

/// Spread pass, run every `spread_interval` ticks: every cell escalates
/// and claims up to two eligible neighbors.
pub fn spread_pass(
    field: &mut CorruptionField,
    store: &SpatialStore,
    config: &SimulationConfig,
    tick: u64,
) -> Vec<CorruptionOutcome> {
    let mut outcomes = Vec::new();
    let n = store.subdivisions();
    let mut rng = purpose_rng(config.world_seed, tick, nonce::CORRUPTION_SPREAD);
    let existing: Vec<TileKey> = field.cells.keys().copied().collect();
    for key in existing {
        if let Some(cell) = field.cells.get_mut(&key) {
            if cell.intensity < config.corruption.max_intensity {
                cell.intensity += 1;
                outcomes.push(CorruptionOutcome::CellUpdated {
                    key,
                    intensity: cell.intensity,
                });
            }
        }

        let mut eligible: Vec<TileKey> = DIRECTIONS
            .into_iter()
            .filter_map(|dir| match neighbor(key, dir, n) {
                Neighbor::Tile(next) => Some(next),
                Neighbor::Boundary => None,
            })
            .filter(|next| {
                spread_eligible(store, field, *next, config.corruption.beacon_radius)
            })
            .collect();
        for _ in 0..2 {
            if eligible.is_empty() {
                break;
            }
            let target = eligible.remove(rng.gen_range(0..eligible.len()));
            field.cells.insert(
                target,
                CorruptionCell {
                    intensity: 1,
                    seeded_at: tick,
                    building_damage_ticks: 0,
                },
            );
            outcomes.push(CorruptionOutcome::CellUpdated {
                key: target,
                intensity: 1,
            });
        }
    }
    outcomes
}

/// Per-tick building damage: cells at or above the damage threshold chew
/// through whatever stands on them, except purifiers and turrets.
pub fn damage_pass(
    field: &mut CorruptionField,
    store: &mut SpatialStore,
    ledger: &mut CreatureLedger,
    config: &SimulationConfig,
) -> Vec<CorruptionOutcome> {
    let mut outcomes = Vec::new();
    let keys: Vec<TileKey> = field.cells.keys().copied().collect();
    for key in keys {
        let Some(cell) = field.cells.get_mut(&key) else {
            continue;
        };
        if cell.intensity < config.corruption.damage_threshold {
            continue;
        }
        let Some(building) = store.get_building(key) else {
            cell.building_damage_ticks = 0;
            continue;
        };
        if building
            .building_type
            .tags()
            .intersects(BuildingTags::PURIFIER | BuildingTags::DEFENSE)
        {
            continue;
        }
        cell.building_damage_ticks += 1;
        if cell.building_damage_ticks >= config.corruption.destroy_ticks {
            // Unhook a subsurface partner before the removal so the
            // pairing table never goes one-sided.
            if let BuildingState::SubsurfaceLink {
                linked_to: Some(partner),
                ..
            } = building.state
            {
                store.update_building(partner, |b| {
                    if let BuildingState::SubsurfaceLink { linked_to, .. } = &mut b.state {
                        *linked_to = None;
                    }
                });
            }
            store.remove_building(key);
            ledger.building_removed(key);
            cell.building_damage_ticks = 0;
            outcomes.push(CorruptionOutcome::BuildingDestroyed { key });
        } else {
            outcomes.push(CorruptionOutcome::BuildingDamaged { key });
        }
    }
    outcomes
}

/// Hiss spawning, run every `spread_interval` ticks: cells hot enough emit
/// an entity each, up to the global cap.
pub fn hiss_spawn_pass(
    field: &mut CorruptionField,
    config: &SimulationConfig,
    tick: u64,
) -> Vec<CorruptionOutcome> {
    let mut outcomes = Vec::new();
    let hot: Vec<TileKey> = field
        .cells
        .iter()
        .filter(|(_, cell)| cell.intensity >= config.corruption.entity_spawn_threshold)
        .map(|(key, _)| *key)
        .collect();
    for key in hot {
        if field.entities.len() >= config.corruption.max_entities {
            break;
        }
        field.next_entity_id += 1;
        let id = field.next_entity_id;
        field.entities.insert(
            id,
            HissEntity {
                id,
                key,
                health: HISS_MAX_HEALTH,
                spawned_at: tick,
            },
        );
        outcomes.push(CorruptionOutcome::HissSpawned { id, key });
    }
    outcomes
}

/// Hiss movement, run every `hiss_move_interval` ticks: each entity steps
/// in a direction derived from `hash(tick, id)`, skipping boundaries and
/// occupied tiles.
pub fn hiss_move_pass(
    field: &mut CorruptionField,
    store: &SpatialStore,
    tick: u64,
) -> Vec<CorruptionOutcome> {
    let mut outcomes = Vec::new();
    let n = store.subdivisions();
    let ids: Vec<u64> = field.entities.keys().copied().collect();
    for id in ids {
        let Some(entity) = field.entities.get(&id) else {
            continue;
        };
        let from = entity.key;
        let dir = DIRECTIONS[(mix_seed(tick, id, 0) % 4) as usize];
        let Neighbor::Tile(target) = neighbor(from, dir, n) else {
            continue;
        };
        if store.has_building(target) {
            continue;
        }
        if let Some(entity) = field.entities.get_mut(&id) {
            entity.key = target;
            outcomes.push(CorruptionOutcome::HissMoved {
                id,
                from,
                to: target,
            });
        }
    }
    outcomes
}

/// Per-tick combat: turrets within `turret_radius` each deal flat damage;
/// assigned creatures within Chebyshev 2 of an entity add their own. The
/// first turret that contributed to a kill collects the residue.
pub fn combat_pass(
    field: &mut CorruptionField,
    store: &mut SpatialStore,
    ledger: &CreatureLedger,
    config: &SimulationConfig,
) -> Vec<CorruptionOutcome> {
    let mut outcomes = Vec::new();
    let turrets: Vec<TileKey> = store
        .building_keys_sorted()
        .into_iter()
        .filter(|key| {
            store.get_building(*key).is_some_and(|b| {
                b.building_type == BuildingType::DefenseTurret && b.is_built() && b.powered_user
            })
        })
        .collect();
    let stations = ledger.assigned_stations();

    let ids: Vec<u64> = field.entities.keys().copied().collect();
    for id in ids {
        let Some(entity) = field.entities.get(&id) else {
            continue;
        };
        let position = entity.key;
        let mut damage = 0i32;
        let mut killer_turret: Option<TileKey> = None;
        for turret in &turrets {
            let in_range = chebyshev(position, *turret)
                .is_some_and(|d| d <= u32::from(config.corruption.turret_radius));
            if in_range {
                damage += TURRET_DAMAGE;
                killer_turret.get_or_insert(*turret);
            }
        }
        for (station, creature_id) in &stations {
            let in_range = chebyshev(position, *station).is_some_and(|d| d <= 2);
            if in_range {
                if let Some(creature) = ledger.captured(*creature_id) {
                    damage += creature.creature_type.attack_damage() as i32;
                }
            }
        }
        if damage == 0 {
            continue;
        }
        let Some(entity) = field.entities.get_mut(&id) else {
            continue;
        };
        entity.health -= damage;
        if entity.health <= 0 {
            field.entities.remove(&id);
            outcomes.push(CorruptionOutcome::HissKilled { id, key: position });
            if let Some(turret_key) = killer_turret {
                store.update_building(turret_key, |building| {
                    if let BuildingState::DefenseTurret {
                        output_buffer,
                        kills,
                    } = &mut building.state
                    {
                        *kills += 1;
                        if output_buffer.is_none() {
                            *output_buffer = Some(ItemKind::HissResidue);
                        }
                    }
                });
            }
        }
    }
    outcomes
}

/// Per-tick purification: every beacon rolls back every corrupted cell in
/// its radius by one intensity step; cells reaching zero vanish.
pub fn purify_pass(
    field: &mut CorruptionField,
    store: &SpatialStore,
    config: &SimulationConfig,
) -> Vec<CorruptionOutcome> {
    let mut outcomes = Vec::new();
    let beacons: Vec<TileKey> = store
        .building_keys_sorted()
        .into_iter()
        .filter(|key| {
            store.get_building(*key).is_some_and(|b| {
                b.building_type == BuildingType::PurificationBeacon
                    && b.is_built()
                    && b.powered_user
            })
        })
        .collect();
    for beacon in beacons {
        let affected: Vec<TileKey> = field
            .cells
            .keys()
            .filter(|key| {
                chebyshev(**key, beacon)
                    .is_some_and(|d| d <= u32::from(config.corruption.beacon_radius))
            })
            .copied()
            .collect();
        for key in affected {
            let Some(cell) = field.cells.get_mut(&key) else {
                continue;
            };
            cell.intensity = cell.intensity.saturating_sub(1);
            if cell.intensity == 0 {
                field.cells.remove(&key);
                outcomes.push(CorruptionOutcome::CellCleared { key });
            } else {
                outcomes.push(CorruptionOutcome::CellUpdated {
                    key,
                    intensity: field.cells[&key].intensity,
                });
            }
        }
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buildings::Building;
    use crate::geom::Direction;
    use crate::terrain::generate_tiles;

    fn harness(n: u16) -> (SpatialStore, SimulationConfig) {
        let config = SimulationConfig {
            subdivisions: n,
            ..SimulationConfig::default()
        };
        (SpatialStore::from_tiles(n, generate_tiles(5, n)), config)
    }

    fn corrupted(field: &mut CorruptionField, key: TileKey, intensity: u8) {
        field.restore_cell(
            key,
            CorruptionCell {
                intensity,
                seeded_at: 0,
                building_damage_ticks: 0,
            },
        );
    }

    #[test]
    fn spread_escalates_and_claims_neighbors() {
        let (store, config) = harness(16);
        let mut field = CorruptionField::default();
        corrupted(&mut field, TileKey::new(0, 8, 8), 1);
        spread_pass(&mut field, &store, &config, 100);
        assert_eq!(field.intensity(TileKey::new(0, 8, 8)), Some(2));
        assert_eq!(field.cell_count(), 3);
    }

    #[test]
    fn intensity_caps_at_the_configured_maximum() {
        let (store, config) = harness(16);
        let mut field = CorruptionField::default();
        corrupted(&mut field, TileKey::new(0, 8, 8), config.corruption.max_intensity);
        spread_pass(&mut field, &store, &config, 100);
        assert_eq!(
            field.intensity(TileKey::new(0, 8, 8)),
            Some(config.corruption.max_intensity)
        );
    }

    #[test]
    fn buildings_block_spread_but_defense_does_not() {
        let (mut store, config) = harness(16);
        let center = TileKey::new(0, 8, 8);
        // Box the cell in with processors except one turret to the east.
        store.put_building(
            TileKey::new(0, 7, 8),
            Building::prebuilt(BuildingType::Processor, Direction::North, None, None),
        );
        store.put_building(
            TileKey::new(0, 9, 8),
            Building::prebuilt(BuildingType::Processor, Direction::North, None, None),
        );
        store.put_building(
            TileKey::new(0, 8, 7),
            Building::prebuilt(BuildingType::Processor, Direction::North, None, None),
        );
        store.put_building(
            TileKey::new(0, 8, 9),
            Building::prebuilt(BuildingType::DefenseTurret, Direction::North, None, None),
        );
        let mut field = CorruptionField::default();
        corrupted(&mut field, center, 1);
        spread_pass(&mut field, &store, &config, 100);
        assert!(field.is_corrupted(TileKey::new(0, 8, 9)));
        assert!(!field.is_corrupted(TileKey::new(0, 7, 8)));
        assert_eq!(field.cell_count(), 2);
    }

    #[test]
    fn damage_destroys_after_the_configured_ticks() {
        let (mut store, config) = harness(16);
        let key = TileKey::new(0, 4, 4);
        store.put_building(
            key,
            Building::prebuilt(BuildingType::Processor, Direction::North, None, None),
        );
        let mut field = CorruptionField::default();
        corrupted(&mut field, key, config.corruption.damage_threshold);
        let mut ledger = CreatureLedger::default();
        for _ in 0..(config.corruption.destroy_ticks - 1) {
            let outcomes = damage_pass(&mut field, &mut store, &mut ledger, &config);
            assert!(outcomes
                .iter()
                .all(|o| matches!(o, CorruptionOutcome::BuildingDamaged { .. })));
        }
        let outcomes = damage_pass(&mut field, &mut store, &mut ledger, &config);
        assert!(outcomes
            .iter()
            .any(|o| matches!(o, CorruptionOutcome::BuildingDestroyed { .. })));
        assert!(!store.has_building(key));
    }

    #[test]
    fn turrets_survive_standing_in_corruption() {
        let (mut store, config) = harness(16);
        let key = TileKey::new(0, 4, 4);
        store.put_building(
            key,
            Building::prebuilt(BuildingType::DefenseTurret, Direction::North, None, None),
        );
        let mut field = CorruptionField::default();
        corrupted(&mut field, key, 10);
        let mut ledger = CreatureLedger::default();
        for _ in 0..100 {
            damage_pass(&mut field, &mut store, &mut ledger, &config);
        }
        assert!(store.has_building(key));
    }

    #[test]
    fn three_turret_hits_kill_and_drop_residue() {
        let (mut store, config) = harness(16);
        let turret_key = TileKey::new(0, 4, 4);
        store.put_building(
            turret_key,
            Building::prebuilt(BuildingType::DefenseTurret, Direction::North, None, None),
        );
        let mut field = CorruptionField::default();
        field.restore_entity(HissEntity {
            id: 1,
            key: TileKey::new(0, 5, 5),
            health: HISS_MAX_HEALTH,
            spawned_at: 0,
        });
        let ledger = CreatureLedger::default();
        let mut killed = false;
        for _ in 0..3 {
            let outcomes = combat_pass(&mut field, &mut store, &ledger, &config);
            killed |= outcomes
                .iter()
                .any(|o| matches!(o, CorruptionOutcome::HissKilled { .. }));
        }
        assert!(killed, "34 damage per tick should kill in three ticks");
        assert_eq!(field.entity_count(), 0);
        match &store.get_building(turret_key).unwrap().state {
            BuildingState::DefenseTurret {
                output_buffer,
                kills,
            } => {
                assert_eq!(*output_buffer, Some(ItemKind::HissResidue));
                assert_eq!(*kills, 1);
            }
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[test]
    fn beacons_dissolve_nearby_corruption() {
        let (mut store, config) = harness(16);
        store.put_building(
            TileKey::new(0, 8, 8),
            Building::prebuilt(
                BuildingType::PurificationBeacon,
                Direction::North,
                None,
                None,
            ),
        );
        let mut field = CorruptionField::default();
        corrupted(&mut field, TileKey::new(0, 8, 10), 2);
        purify_pass(&mut field, &store, &config);
        assert_eq!(field.intensity(TileKey::new(0, 8, 10)), Some(1));
        let outcomes = purify_pass(&mut field, &store, &config);
        assert!(outcomes
            .iter()
            .any(|o| matches!(o, CorruptionOutcome::CellCleared { .. })));
        assert_eq!(field.cell_count(), 0);
    }

    #[test]
    fn seeding_respects_beacon_protection() {
        let (mut store, config) = harness(8);
        // Blanket the world in beacons so every tile is protected.
        for face in 0..FACE_COUNT {
            for row in [2u16, 6] {
                for col in [2u16, 6] {
                    store.put_building(
                        TileKey::new(face, row, col),
                        Building::prebuilt(
                            BuildingType::PurificationBeacon,
                            Direction::North,
                            None,
                            None,
                        ),
                    );
                }
            }
        }
        let mut field = CorruptionField::default();
        for tick in 0..50 {
            seed_pass(&mut field, &store, &config, tick * 200);
        }
        assert_eq!(field.cell_count(), 0);
    }
}
