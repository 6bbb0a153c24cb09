//! The authoritative keyed store of tiles and buildings.
//!
//! Tiles live in a flat face-major buffer indexed arithmetically; buildings
//! are a sparse map since density is far below one per tile. The store is
//! the sole owner of dirty bits: every mutating operation that actually
//! changes state records the key, and `drain_dirty` hands the accumulated
//! sets to the delta and persistence layers.
//!
//! A single writer (the tick schedule) is assumed; readers may snapshot
//! freely between phases.

use std::collections::{BTreeSet, HashMap};

use bevy::prelude::Resource;

use crate::buildings::Building;
use crate::geom::{TileKey, FACE_COUNT};
use crate::hashing::StateHasher;
use crate::terrain::Tile;

/// Disjoint dirty sets accumulated since the previous drain. A key appears
/// at most once overall between `buildings` and `removed_buildings`,
/// whichever action happened last.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtySets {
    pub tiles: Vec<TileKey>,
    pub buildings: Vec<TileKey>,
    pub removed_buildings: Vec<TileKey>,
}

impl DirtySets {
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty() && self.buildings.is_empty() && self.removed_buildings.is_empty()
    }
}

#[derive(Resource, Debug, Clone)]
pub struct SpatialStore {
    n: u16,
    tiles: Vec<Tile>,
    buildings: HashMap<TileKey, Building>,
    dirty_tiles: BTreeSet<TileKey>,
    dirty_buildings: BTreeSet<TileKey>,
    removed_buildings: BTreeSet<TileKey>,
}

impl SpatialStore {
    /// Wrap a generated tile buffer. `tiles.len()` must equal
    /// `30 * n * n`.
    pub fn from_tiles(n: u16, tiles: Vec<Tile>) -> Self {
        debug_assert_eq!(
            tiles.len(),
            usize::from(FACE_COUNT) * usize::from(n) * usize::from(n),
            "tile buffer does not match subdivisions"
        );
        Self {
            n,
            tiles,
            buildings: HashMap::new(),
            dirty_tiles: BTreeSet::new(),
            dirty_buildings: BTreeSet::new(),
            removed_buildings: BTreeSet::new(),
        }
    }

    pub fn subdivisions(&self) -> u16 {
        self.n
    }

    pub fn contains_key(&self, key: TileKey) -> bool {
        key.face < FACE_COUNT && key.row < self.n && key.col < self.n
    }

    pub fn get_tile(&self, key: TileKey) -> Option<&Tile> {
        if !self.contains_key(key) {
            return None;
        }
        self.tiles.get(key.flat_index(self.n))
    }

    /// Replace a tile wholesale. No-ops (identical tile) leave the dirty
    /// set untouched.
    pub fn put_tile(&mut self, key: TileKey, tile: Tile) {
        if !self.contains_key(key) {
            return;
        }
        let index = key.flat_index(self.n);
        if self.tiles[index] == tile {
            return;
        }
        self.tiles[index] = tile;
        self.dirty_tiles.insert(key);
    }

    /// Draw down the tile deposit by one unit; clears the deposit when it
    /// hits zero. Returns false when there was nothing left to consume.
    pub fn deplete_resource(&mut self, key: TileKey) -> bool {
        if !self.contains_key(key) {
            return false;
        }
        let index = key.flat_index(self.n);
        let Some(deposit) = self.tiles[index].deposit.as_mut() else {
            return false;
        };
        deposit.amount -= 1;
        if deposit.amount == 0 {
            self.tiles[index].deposit = None;
        }
        self.dirty_tiles.insert(key);
        true
    }

    /// Row-major tiles of one face with their keys.
    pub fn get_face_tiles(&self, face: u8) -> impl Iterator<Item = (TileKey, &Tile)> {
        let n = self.n;
        let per_face = usize::from(n) * usize::from(n);
        let start = usize::from(face) * per_face;
        self.tiles[start..start + per_face]
            .iter()
            .enumerate()
            .map(move |(offset, tile)| (TileKey::from_flat_index(start + offset, n), tile))
    }

    pub fn has_building(&self, key: TileKey) -> bool {
        self.buildings.contains_key(&key)
    }

    pub fn get_building(&self, key: TileKey) -> Option<&Building> {
        self.buildings.get(&key)
    }

    /// Insert or replace the building at `key`. Writing back an identical
    /// building is a no-op for dirty tracking.
    pub fn put_building(&mut self, key: TileKey, building: Building) {
        if self.buildings.get(&key) == Some(&building) {
            return;
        }
        self.buildings.insert(key, building);
        self.removed_buildings.remove(&key);
        self.dirty_buildings.insert(key);
    }

    /// Apply a closure to the building at `key`, recording a dirty bit only
    /// when the closure changed it.
    pub fn update_building<F>(&mut self, key: TileKey, mutate: F) -> bool
    where
        F: FnOnce(&mut Building),
    {
        let Some(building) = self.buildings.get_mut(&key) else {
            return false;
        };
        let before = building.clone();
        mutate(building);
        if *building != before {
            self.removed_buildings.remove(&key);
            self.dirty_buildings.insert(key);
            true
        } else {
            false
        }
    }

    pub fn remove_building(&mut self, key: TileKey) -> Option<Building> {
        let removed = self.buildings.remove(&key)?;
        self.dirty_buildings.remove(&key);
        self.removed_buildings.insert(key);
        Some(removed)
    }

    /// Buildings of one face, sorted by key for stable iteration.
    pub fn get_face_buildings(&self, face: u8) -> Vec<(TileKey, &Building)> {
        let mut entries: Vec<_> = self
            .buildings
            .iter()
            .filter(|(key, _)| key.face == face)
            .map(|(key, building)| (*key, building))
            .collect();
        entries.sort_unstable_by_key(|(key, _)| *key);
        entries
    }

    /// All building keys in stable (face, row, col) order. Phase iteration
    /// goes through this to keep runs deterministic.
    pub fn building_keys_sorted(&self) -> Vec<TileKey> {
        let mut keys: Vec<_> = self.buildings.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    pub fn building_count(&self) -> usize {
        self.buildings.len()
    }

    /// Take and clear the accumulated dirty sets.
    pub fn drain_dirty(&mut self) -> DirtySets {
        DirtySets {
            tiles: std::mem::take(&mut self.dirty_tiles).into_iter().collect(),
            buildings: std::mem::take(&mut self.dirty_buildings)
                .into_iter()
                .collect(),
            removed_buildings: std::mem::take(&mut self.removed_buildings)
                .into_iter()
                .collect(),
        }
    }

    /// Fold the mutable surface of the store into a state fingerprint:
    /// every deposit and altered marker, and every building in key order.
    pub fn fold_hash(&self, hasher: &mut StateHasher) {
        for (index, tile) in self.tiles.iter().enumerate() {
            if let Some(deposit) = tile.deposit {
                hasher.write_u64(index as u64);
                hasher.write_u32(deposit.kind.wire_code().into());
                hasher.write_u32(deposit.amount);
            }
        }
        for key in self.building_keys_sorted() {
            if let Some(building) = self.buildings.get(&key) {
                hasher.write_u64(key.flat_index(self.n) as u64);
                hasher.write_bytes(&building.state_blob());
                hasher.write_u8(building.building_type.wire_code() as u8);
                hasher.write_u8(building.orientation.index());
                hasher.write_u8(u8::from(building.powered_user));
            }
        }
    }

    /// Drop every building and install a fresh tile buffer; used by world
    /// reset. Dirty sets are cleared, a reset broadcasts full state anyway.
    pub fn reset(&mut self, n: u16, tiles: Vec<Tile>) {
        debug_assert_eq!(
            tiles.len(),
            usize::from(FACE_COUNT) * usize::from(n) * usize::from(n)
        );
        self.n = n;
        self.tiles = tiles;
        self.buildings.clear();
        self.dirty_tiles.clear();
        self.dirty_buildings.clear();
        self.removed_buildings.clear();
    }
}
