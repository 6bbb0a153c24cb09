//! Persistence collaborator boundary.
//!
//! The core hands dirty overlays to a [`Persistence`] implementation and
//! asks it for saved state at startup; it never cares about the backing
//! format. The state blob is the bincode encoding of [`BuildingState`],
//! which re-tags enum-kinded keys natively on load.

use std::sync::{Arc, Mutex};

use bevy::prelude::Resource;
use serde::{Deserialize, Serialize};

use crate::buildings::Building;
use crate::corruption::{CorruptionCell, HissEntity};
use crate::creatures::{CapturedCreature, WildCreature};
use crate::geom::TileKey;
use crate::store::{DirtySets, SpatialStore};
use crate::terrain::Deposit;

/// Identity of a saved world.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldMeta {
    pub world_id: u64,
    pub name: String,
    pub seed: u64,
    pub subdivisions: u16,
}

/// A tile whose deposit differs from the generated baseline. `None`
/// records full depletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileOverlayRow {
    pub key: TileKey,
    pub deposit: Option<Deposit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildingRow {
    pub key: TileKey,
    pub building: Building,
}

/// One periodic or shutdown save: only what changed since the last drain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SavePayload {
    pub world_id: u64,
    pub tick: u64,
    pub tiles: Vec<TileOverlayRow>,
    pub buildings: Vec<BuildingRow>,
    pub removed_buildings: Vec<TileKey>,
}

impl SavePayload {
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty() && self.buildings.is_empty() && self.removed_buildings.is_empty()
    }
}

/// Everything beyond terrain needed to reconstruct a saved world.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldOverlays {
    pub tiles: Vec<TileOverlayRow>,
    pub buildings: Vec<BuildingRow>,
    pub wild_creatures: Vec<WildCreature>,
    pub captured_creatures: Vec<CapturedCreature>,
    pub corruption: Vec<(TileKey, CorruptionCell)>,
    pub hiss: Vec<HissEntity>,
}

/// The collaborator interface. Implementations run their own I/O; calls
/// from the core must not block the tick for long.
pub trait Persistence: Send + Sync {
    fn load_world(&self, name: &str) -> Option<WorldMeta>;
    fn load_overlays(&self, world_id: u64) -> WorldOverlays;
    fn save_dirty(&self, payload: SavePayload);
    fn delete_world(&self, world_id: u64);
}

/// Default collaborator: persists nothing.
#[derive(Debug, Default)]
pub struct NullPersistence;

impl Persistence for NullPersistence {
    fn load_world(&self, _name: &str) -> Option<WorldMeta> {
        None
    }

    fn load_overlays(&self, _world_id: u64) -> WorldOverlays {
        WorldOverlays::default()
    }

    fn save_dirty(&self, _payload: SavePayload) {}

    fn delete_world(&self, _world_id: u64) {}
}

/// In-memory collaborator for tests and the headless demo server.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    saves: Mutex<Vec<SavePayload>>,
    deleted: Mutex<Vec<u64>>,
}

impl MemoryPersistence {
    pub fn save_count(&self) -> usize {
        self.saves.lock().map(|saves| saves.len()).unwrap_or(0)
    }

    pub fn last_save(&self) -> Option<SavePayload> {
        self.saves
            .lock()
            .ok()
            .and_then(|saves| saves.last().cloned())
    }

    pub fn deleted_worlds(&self) -> Vec<u64> {
        self.deleted
            .lock()
            .map(|deleted| deleted.clone())
            .unwrap_or_default()
    }
}

impl Persistence for MemoryPersistence {
    fn load_world(&self, _name: &str) -> Option<WorldMeta> {
        None
    }

    fn load_overlays(&self, _world_id: u64) -> WorldOverlays {
        WorldOverlays::default()
    }

    fn save_dirty(&self, payload: SavePayload) {
        if let Ok(mut saves) = self.saves.lock() {
            saves.push(payload);
        }
    }

    fn delete_world(&self, world_id: u64) {
        if let Ok(mut deleted) = self.deleted.lock() {
            deleted.push(world_id);
        }
    }
}

/// Dirty keys accumulated between periodic saves. The delta layer drains
/// the store every tick; this keeps the union until the next save fires.
#[derive(Resource, Debug, Default)]
pub struct PendingSave {
    tiles: std::collections::BTreeSet<TileKey>,
    buildings: std::collections::BTreeSet<TileKey>,
    removed: std::collections::BTreeSet<TileKey>,
}

impl PendingSave {
    pub fn merge(&mut self, dirty: &DirtySets) {
        self.tiles.extend(dirty.tiles.iter().copied());
        for key in &dirty.buildings {
            self.removed.remove(key);
            self.buildings.insert(*key);
        }
        for key in &dirty.removed_buildings {
            self.buildings.remove(key);
            self.removed.insert(*key);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty() && self.buildings.is_empty() && self.removed.is_empty()
    }

    /// Drain into one `DirtySets` for payload building.
    pub fn take(&mut self) -> DirtySets {
        DirtySets {
            tiles: std::mem::take(&mut self.tiles).into_iter().collect(),
            buildings: std::mem::take(&mut self.buildings).into_iter().collect(),
            removed_buildings: std::mem::take(&mut self.removed).into_iter().collect(),
        }
    }

    pub fn clear(&mut self) {
        self.tiles.clear();
        self.buildings.clear();
        self.removed.clear();
    }
}

/// Shared handle stored as a resource on the app.
#[derive(Resource, Clone)]
pub struct PersistenceHandle(pub Arc<dyn Persistence>);

impl Default for PersistenceHandle {
    fn default() -> Self {
        Self(Arc::new(NullPersistence))
    }
}

/// Snapshot the drained dirty sets into a save payload.
pub fn build_save_payload(
    store: &SpatialStore,
    dirty: &DirtySets,
    world_id: u64,
    tick: u64,
) -> SavePayload {
    let tiles = dirty
        .tiles
        .iter()
        .filter_map(|key| {
            store.get_tile(*key).map(|tile| TileOverlayRow {
                key: *key,
                deposit: tile.deposit,
            })
        })
        .collect();
    let buildings = dirty
        .buildings
        .iter()
        .filter_map(|key| {
            store.get_building(*key).map(|building| BuildingRow {
                key: *key,
                building: building.clone(),
            })
        })
        .collect();
    SavePayload {
        world_id,
        tick,
        tiles,
        buildings,
        removed_buildings: dirty.removed_buildings.clone(),
    }
}

/// Re-apply saved overlays onto a freshly generated store.
pub fn apply_overlays(store: &mut SpatialStore, overlays: &WorldOverlays) {
    for row in &overlays.tiles {
        if let Some(tile) = store.get_tile(row.key).cloned() {
            let mut tile = tile;
            tile.deposit = row.deposit;
            store.put_tile(row.key, tile);
        }
    }
    for row in &overlays.buildings {
        store.put_building(row.key, row.building.clone());
    }
    // Overlay application precedes the first tick; the dirty bits it set
    // would otherwise re-broadcast the whole save.
    store.drain_dirty();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buildings::BuildingType;
    use crate::geom::Direction;
    use crate::terrain::generate_tiles;

    #[test]
    fn payload_tracks_only_dirty_keys() {
        let mut store = SpatialStore::from_tiles(8, generate_tiles(2, 8));
        let key = TileKey::new(1, 1, 1);
        store.put_building(
            key,
            Building::prebuilt(BuildingType::Conveyor, Direction::East, None, None),
        );
        let dirty = store.drain_dirty();
        let payload = build_save_payload(&store, &dirty, 7, 42);
        assert_eq!(payload.world_id, 7);
        assert_eq!(payload.buildings.len(), 1);
        assert_eq!(payload.buildings[0].key, key);
        assert!(payload.tiles.is_empty());
    }

    #[test]
    fn overlays_restore_without_dirtying() {
        let mut store = SpatialStore::from_tiles(8, generate_tiles(2, 8));
        let key = TileKey::new(3, 4, 4);
        let overlays = WorldOverlays {
            buildings: vec![BuildingRow {
                key,
                building: Building::prebuilt(BuildingType::Processor, Direction::East, None, None),
            }],
            ..WorldOverlays::default()
        };
        apply_overlays(&mut store, &overlays);
        assert!(store.has_building(key));
        assert!(store.drain_dirty().is_empty());
    }

    #[test]
    fn memory_persistence_records_saves() {
        let persistence = MemoryPersistence::default();
        persistence.save_dirty(SavePayload {
            world_id: 1,
            ..SavePayload::default()
        });
        assert_eq!(persistence.save_count(), 1);
        persistence.delete_world(1);
        assert_eq!(persistence.deleted_worlds(), vec![1]);
    }
}
