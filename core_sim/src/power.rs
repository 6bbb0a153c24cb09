//! Capacity-based power network resolution.
//!
//! Every `resolve_interval` ticks the resolver rebuilds connected
//! components over substations and transfer stations, seeds them with
//! producing generators, and publishes per-building network membership
//! plus per-network `{capacity, load}`. Power never crosses a face edge.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use bevy::prelude::Resource;

use crate::buildings::{BuildingState, BuildingType, BIO_GENERATOR_OUTPUT};
use crate::config::SimulationConfig;
use crate::geom::{chebyshev, face_disc, TileKey};
use crate::hashing::StateHasher;
use crate::scalar::Scalar;
use crate::store::SpatialStore;

/// Identifier of one resolved power network. Ids are fresh per resolve
/// pass; clients treat them as opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NetworkId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetworkStats {
    pub capacity: u32,
    pub load: u32,
}

/// Published membership and stats from the latest resolve pass.
#[derive(Resource, Debug, Clone, Default)]
pub struct PowerGrid {
    membership: HashMap<TileKey, NetworkId>,
    networks: BTreeMap<NetworkId, NetworkStats>,
    next_id: u64,
}

impl PowerGrid {
    pub fn network_of(&self, building: TileKey) -> Option<NetworkId> {
        self.membership.get(&building).copied()
    }

    pub fn in_network(&self, building: TileKey) -> bool {
        self.membership.contains_key(&building)
    }

    pub fn stats(&self, id: NetworkId) -> Option<NetworkStats> {
        self.networks.get(&id).copied()
    }

    pub fn network_count(&self) -> usize {
        self.networks.len()
    }

    /// `load / capacity` for the building's network when demand exceeds
    /// supply; `None` when the building is unpowered or supply covers
    /// demand.
    pub fn brownout_ratio(&self, building: TileKey) -> Option<Scalar> {
        let stats = self.stats(self.network_of(building)?)?;
        if stats.load > stats.capacity && stats.capacity > 0 {
            Some(Scalar::ratio(stats.load, stats.capacity))
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.membership.clear();
        self.networks.clear();
    }

    pub fn fold_hash(&self, hasher: &mut StateHasher) {
        for (id, stats) in &self.networks {
            hasher.write_u64(id.0);
            hasher.write_u32(stats.capacity);
            hasher.write_u32(stats.load);
        }
    }

    /// Rebuild every network from the current store. Replaces the previous
    /// membership atomically.
    pub fn resolve(&mut self, store: &SpatialStore, config: &SimulationConfig) {
        self.membership.clear();
        self.networks.clear();

        let keys = store.building_keys_sorted();
        let mut relays: Vec<(TileKey, bool)> = Vec::new();
        let mut generators: Vec<(TileKey, u32)> = Vec::new();
        for key in &keys {
            let Some(building) = store.get_building(*key) else {
                continue;
            };
            if !building.is_built() {
                continue;
            }
            match building.building_type {
                BuildingType::Substation => relays.push((*key, true)),
                BuildingType::TransferStation => relays.push((*key, false)),
                BuildingType::BioGenerator => {
                    if let BuildingState::BioGenerator { producing: true, .. } = building.state {
                        generators.push((*key, BIO_GENERATOR_OUTPUT));
                    }
                }
                BuildingType::ShadowPanel => {
                    if let BuildingState::ShadowPanel { power_output } = building.state {
                        if power_output > Scalar::zero() {
                            generators.push((*key, power_output.round_to_u32()));
                        }
                    }
                }
                _ => {}
            }
        }

        // Connected components among relays. Substation pairs link within
        // sub_radius; any pair involving a transfer station links within
        // tx_radius. Links never cross faces.
        let mut dsu = Dsu::new(relays.len());
        for i in 0..relays.len() {
            for j in (i + 1)..relays.len() {
                let (a, a_sub) = relays[i];
                let (b, b_sub) = relays[j];
                let Some(distance) = chebyshev(a, b) else {
                    continue;
                };
                let radius = if a_sub && b_sub {
                    config.power.sub_radius
                } else {
                    config.power.tx_radius
                };
                if distance <= u32::from(radius) {
                    dsu.union(i, j);
                }
            }
        }

        let mut components: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for index in 0..relays.len() {
            components.entry(dsu.find(index)).or_default().push(index);
        }

        // Components iterate in ascending smallest-member order because
        // relays are key-sorted, keeping id assignment deterministic.
        for members in components.values() {
            let substations: Vec<TileKey> = members
                .iter()
                .filter(|&&index| relays[index].1)
                .map(|&index| relays[index].0)
                .collect();
            if substations.is_empty() {
                continue;
            }

            let mut capacity = 0u32;
            for (gen_key, output) in &generators {
                let seeds = substations.iter().any(|sub| {
                    chebyshev(*gen_key, *sub)
                        .is_some_and(|d| d <= u32::from(config.power.gen_radius))
                });
                if seeds {
                    capacity += output;
                }
            }
            if capacity == 0 {
                continue;
            }

            self.next_id += 1;
            let id = NetworkId(self.next_id);

            let mut powered: BTreeSet<TileKey> = BTreeSet::new();
            for sub in &substations {
                powered.extend(face_disc(*sub, config.power.sub_radius, store.subdivisions()));
            }

            let mut load = 0u32;
            for tile in powered {
                let Some(building) = store.get_building(tile) else {
                    continue;
                };
                self.membership.insert(tile, id);
                if building.is_built() && building.powered_user {
                    load += building.building_type.power_draw();
                }
            }
            self.networks.insert(id, NetworkStats { capacity, load });
        }
    }
}

struct Dsu {
    parent: Vec<usize>,
}

impl Dsu {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, index: usize) -> usize {
        if self.parent[index] != index {
            let root = self.find(self.parent[index]);
            self.parent[index] = root;
        }
        self.parent[index]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }
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
        (SpatialStore::from_tiles(n, generate_tiles(1, n)), config)
    }

    fn place(store: &mut SpatialStore, key: TileKey, building_type: BuildingType) {
        store.put_building(
            key,
            Building::prebuilt(building_type, Direction::North, None, None),
        );
    }

    fn fueled_bio_generator() -> Building {
        let mut generator =
            Building::prebuilt(BuildingType::BioGenerator, Direction::North, None, None);
        generator.state = BuildingState::BioGenerator {
            input_buffer: None,
            fuel_remaining: 100,
            producing: true,
        };
        generator
    }

    #[test]
    fn generator_plus_substation_forms_a_network() {
        let (mut store, config) = harness(16);
        store.put_building(TileKey::new(0, 4, 4), fueled_bio_generator());
        place(&mut store, TileKey::new(0, 4, 6), BuildingType::Substation);
        place(&mut store, TileKey::new(0, 5, 6), BuildingType::Processor);

        let mut grid = PowerGrid::default();
        grid.resolve(&store, &config);

        assert_eq!(grid.network_count(), 1);
        let id = grid.network_of(TileKey::new(0, 5, 6)).expect("powered");
        let stats = grid.stats(id).unwrap();
        assert_eq!(stats.capacity, BIO_GENERATOR_OUTPUT);
        assert_eq!(stats.load, 2);
    }

    #[test]
    fn idle_generator_seeds_nothing() {
        let (mut store, config) = harness(16);
        place(&mut store, TileKey::new(0, 4, 4), BuildingType::BioGenerator);
        place(&mut store, TileKey::new(0, 4, 6), BuildingType::Substation);

        let mut grid = PowerGrid::default();
        grid.resolve(&store, &config);
        assert_eq!(grid.network_count(), 0);
        assert!(!grid.in_network(TileKey::new(0, 4, 6)));
    }

    #[test]
    fn transfer_stations_bridge_distant_substations() {
        let (mut store, config) = harness(32);
        store.put_building(TileKey::new(0, 2, 2), fueled_bio_generator());
        place(&mut store, TileKey::new(0, 2, 4), BuildingType::Substation);
        place(
            &mut store,
            TileKey::new(0, 2, 11),
            BuildingType::TransferStation,
        );
        place(&mut store, TileKey::new(0, 2, 18), BuildingType::Substation);
        place(&mut store, TileKey::new(0, 3, 18), BuildingType::Distiller);

        let mut grid = PowerGrid::default();
        grid.resolve(&store, &config);

        assert_eq!(grid.network_count(), 1);
        let far = grid.network_of(TileKey::new(0, 3, 18)).expect("bridged");
        let near = grid.network_of(TileKey::new(0, 2, 4)).expect("near");
        assert_eq!(far, near);
        assert_eq!(grid.stats(far).unwrap().load, 8);
    }

    #[test]
    fn power_never_crosses_faces() {
        let (mut store, config) = harness(16);
        // Substation against the east edge of face 0; a building just over
        // the edge on face 1 stays unpowered.
        store.put_building(TileKey::new(0, 4, 13), fueled_bio_generator());
        place(&mut store, TileKey::new(0, 4, 15), BuildingType::Substation);
        place(&mut store, TileKey::new(1, 4, 0), BuildingType::Processor);

        let mut grid = PowerGrid::default();
        grid.resolve(&store, &config);
        assert!(!grid.in_network(TileKey::new(1, 4, 0)));
    }

    #[test]
    fn brownout_ratio_appears_when_load_exceeds_capacity() {
        let (mut store, config) = harness(16);
        store.put_building(TileKey::new(0, 4, 4), fueled_bio_generator());
        place(&mut store, TileKey::new(0, 4, 6), BuildingType::Substation);
        for col in 0..3u16 {
            place(
                &mut store,
                TileKey::new(0, 5, 4 + col),
                BuildingType::Processor,
            );
        }
        place(&mut store, TileKey::new(0, 6, 6), BuildingType::Distiller);

        let mut grid = PowerGrid::default();
        grid.resolve(&store, &config);
        let id = grid.network_of(TileKey::new(0, 6, 6)).unwrap();
        assert_eq!(
            grid.stats(id).unwrap(),
            NetworkStats {
                capacity: 20,
                load: 14
            }
        );
        assert!(grid.brownout_ratio(TileKey::new(0, 6, 6)).is_none());

        // A particle collider pushes load to 34: ratio 1.7 for everyone.
        place(
            &mut store,
            TileKey::new(0, 3, 6),
            BuildingType::ParticleCollider,
        );
        grid.resolve(&store, &config);
        let ratio = grid
            .brownout_ratio(TileKey::new(0, 6, 6))
            .expect("brownout expected");
        assert_eq!(ratio, Scalar::ratio(34, 20));
    }

    #[test]
    fn buildings_under_construction_draw_nothing() {
        let (mut store, config) = harness(16);
        store.put_building(TileKey::new(0, 4, 4), fueled_bio_generator());
        place(&mut store, TileKey::new(0, 4, 6), BuildingType::Substation);
        store.put_building(
            TileKey::new(0, 5, 6),
            Building::new(BuildingType::Distiller, Direction::North, None, None),
        );

        let mut grid = PowerGrid::default();
        grid.resolve(&store, &config);
        let id = grid.network_of(TileKey::new(0, 4, 6)).unwrap();
        assert_eq!(grid.stats(id).unwrap().load, 0);
        // The site is still tagged as a member for the placement UI.
        assert!(grid.in_network(TileKey::new(0, 5, 6)));
    }
}
