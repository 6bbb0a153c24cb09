//! Per-face delta assembly and the bounded hand-off queue toward the
//! broadcast collaborator.
//!
//! Phases append raw outcomes into [`TickOutcomes`] as they run; the
//! emission system folds them together with the store's dirty sets into
//! one [`TickDelta`] per tick. The bus never blocks the tick: a full
//! queue drops the frame with a warning.

use std::collections::BTreeMap;

use bevy::prelude::Resource;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::warn;

use sim_proto::{
    BuildingEvent, CorruptionEvent, CreatureEvent, DeltaHeader, FaceDelta, GlobalEvent,
    HissEvent, ItemUpdate, TerritoryUpdate, TickDelta,
};

use crate::buildings::PlayerId;
use crate::corruption::CorruptionOutcome;
use crate::creatures::CreatureOutcome;
use crate::geom::TileKey;
use crate::items::ItemKind;
use crate::push::ItemMove;
use crate::store::{DirtySets, SpatialStore};

/// A terminal consumed an item on behalf of a player this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub player: Option<PlayerId>,
    pub item: ItemKind,
    pub trade: bool,
}

/// Accumulator the phases write into during one tick; drained by the
/// emission system.
#[derive(Resource, Debug, Default)]
pub struct TickOutcomes {
    pub moves: Vec<ItemMove>,
    pub creatures: Vec<CreatureOutcome>,
    pub corruption: Vec<CorruptionOutcome>,
    pub submissions: Vec<SubmissionRecord>,
    pub territory: Vec<(TileKey, Option<PlayerId>)>,
    pub global: Vec<GlobalEvent>,
    /// Set by world reset: the next emission leads with a full-state sync
    /// frame so clients can drop stale state.
    pub sync_requested: bool,
}

impl TickOutcomes {
    pub fn clear(&mut self) {
        self.moves.clear();
        self.creatures.clear();
        self.corruption.clear();
        self.submissions.clear();
        self.territory.clear();
        self.global.clear();
        self.sync_requested = false;
    }
}

/// Sending half of the broadcast hand-off. Keeps the last emitted delta
/// for diagnostics and tests.
#[derive(Resource)]
pub struct DeltaBus {
    sender: Sender<TickDelta>,
    pub last: Option<TickDelta>,
    dropped: u64,
}

impl DeltaBus {
    pub fn publish(&mut self, delta: TickDelta) {
        match self.sender.try_send(delta.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                warn!(
                    tick = delta.header.tick,
                    dropped_total = self.dropped,
                    "broadcast queue full, dropping delta frame"
                );
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
        self.last = Some(delta);
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }
}

/// Build the paired bus and consumer receiver.
pub fn delta_channel(capacity: usize) -> (DeltaBus, Receiver<TickDelta>) {
    let (sender, receiver) = bounded(capacity);
    (
        DeltaBus {
            sender,
            last: None,
            dropped: 0,
        },
        receiver,
    )
}

/// Fold one tick's dirty sets and outcomes into a per-face delta frame.
pub fn build_delta(
    tick: u64,
    state_hash: u64,
    store: &SpatialStore,
    dirty: &DirtySets,
    outcomes: &TickOutcomes,
) -> TickDelta {
    let mut faces: BTreeMap<u8, FaceDelta> = BTreeMap::new();

    for key in &dirty.buildings {
        if let Some(building) = store.get_building(*key) {
            face_entry(&mut faces, key.face)
                .buildings
                .push(BuildingEvent::Placed {
                    row: key.row,
                    col: key.col,
                    building_type: building.building_type.wire_code(),
                    orientation: building.orientation.index(),
                    owner: building.owner.map(|id| id.0),
                    state: building.state_blob(),
                });
        }
    }
    for key in &dirty.removed_buildings {
        face_entry(&mut faces, key.face)
            .buildings
            .push(BuildingEvent::Removed {
                row: key.row,
                col: key.col,
            });
    }

    for item_move in &outcomes.moves {
        let to = item_move.to;
        face_entry(&mut faces, to.face).items.push(ItemUpdate {
            row: to.row,
            col: to.col,
            item_kind: item_move.item.wire_code(),
            from_row: Some(item_move.from.row),
            from_col: Some(item_move.from.col),
            from_face: (item_move.from.face != to.face).then_some(item_move.from.face),
        });
    }

    for outcome in &outcomes.creatures {
        let (face_id, event) = match outcome {
            CreatureOutcome::Spawned {
                id,
                creature_type,
                key,
            } => (
                key.face,
                CreatureEvent::Spawned {
                    id: *id,
                    creature_type: creature_type.wire_code(),
                    row: key.row,
                    col: key.col,
                },
            ),
            CreatureOutcome::Moved { id, to, .. } => (
                to.face,
                CreatureEvent::Moved {
                    id: *id,
                    row: to.row,
                    col: to.col,
                },
            ),
            CreatureOutcome::Captured { id, owner, trap } => (
                trap.face,
                CreatureEvent::Captured {
                    id: *id,
                    owner: owner.0,
                },
            ),
        };
        face_entry(&mut faces, face_id).creatures.push(event);
    }

    for outcome in &outcomes.corruption {
        match outcome {
            CorruptionOutcome::CellUpdated { key, intensity } => {
                face_entry(&mut faces, key.face)
                    .corruption
                    .push(CorruptionEvent::Update {
                        row: key.row,
                        col: key.col,
                        intensity: *intensity,
                    });
            }
            CorruptionOutcome::CellCleared { key } => {
                face_entry(&mut faces, key.face)
                    .corruption
                    .push(CorruptionEvent::Cleared {
                        row: key.row,
                        col: key.col,
                    });
            }
            CorruptionOutcome::HissSpawned { id, key } => {
                face_entry(&mut faces, key.face).hiss.push(HissEvent::Spawned {
                    id: *id,
                    row: key.row,
                    col: key.col,
                });
            }
            CorruptionOutcome::HissMoved { id, to, .. } => {
                face_entry(&mut faces, to.face).hiss.push(HissEvent::Moved {
                    id: *id,
                    row: to.row,
                    col: to.col,
                });
            }
            CorruptionOutcome::HissKilled { id, key } => {
                face_entry(&mut faces, key.face)
                    .hiss
                    .push(HissEvent::Killed { id: *id });
            }
            CorruptionOutcome::BuildingDamaged { key } => {
                face_entry(&mut faces, key.face)
                    .buildings
                    .push(BuildingEvent::Damaged {
                        row: key.row,
                        col: key.col,
                        destroyed: false,
                    });
            }
            CorruptionOutcome::BuildingDestroyed { key } => {
                face_entry(&mut faces, key.face)
                    .buildings
                    .push(BuildingEvent::Damaged {
                        row: key.row,
                        col: key.col,
                        destroyed: true,
                    });
            }
        }
    }

    for (key, owner) in &outcomes.territory {
        face_entry(&mut faces, key.face)
            .territory
            .push(TerritoryUpdate {
                row: key.row,
                col: key.col,
                owner: owner.map(|id| id.0),
            });
    }

    let mut global = outcomes.global.clone();
    for submission in &outcomes.submissions {
        global.push(GlobalEvent::Submission {
            player: submission.player.map(|id| id.0),
            item_kind: submission.item.wire_code(),
            trade: submission.trade,
        });
    }

    TickDelta {
        header: DeltaHeader { tick, state_hash },
        faces: faces.into_values().filter(|f| !f.is_empty()).collect(),
        global,
    }
}

fn face_entry(faces: &mut BTreeMap<u8, FaceDelta>, face: u8) -> &mut FaceDelta {
    faces.entry(face).or_insert_with(|| FaceDelta::new(face))
}

/// A full-state frame: every building as an absolute placement plus
/// per-face sync events for creatures, hiss, and corruption. Published
/// after a world reset and replayable by any client from scratch.
pub fn build_sync_delta(
    tick: u64,
    state_hash: u64,
    store: &SpatialStore,
    ledger: &crate::creatures::CreatureLedger,
    field: &crate::corruption::CorruptionField,
) -> TickDelta {
    let mut faces: BTreeMap<u8, FaceDelta> = BTreeMap::new();
    for face in 0..crate::geom::FACE_COUNT {
        let entry = face_entry(&mut faces, face);
        for (key, building) in store.get_face_buildings(face) {
            entry.buildings.push(BuildingEvent::Placed {
                row: key.row,
                col: key.col,
                building_type: building.building_type.wire_code(),
                orientation: building.orientation.index(),
                owner: building.owner.map(|id| id.0),
                state: building.state_blob(),
            });
        }
        entry.creatures.push(CreatureEvent::Sync {
            creatures: ledger
                .wild()
                .filter(|c| c.key.face == face)
                .map(|c| (c.id, c.creature_type.wire_code(), c.key.row, c.key.col))
                .collect(),
        });
        entry.hiss.push(HissEvent::Sync {
            entities: field
                .entities()
                .filter(|e| e.key.face == face)
                .map(|e| (e.id, e.key.row, e.key.col, e.health.clamp(0, 100) as u8))
                .collect(),
        });
        entry.corruption.push(CorruptionEvent::Sync {
            cells: field
                .cells()
                .filter(|(key, _)| key.face == face)
                .map(|(key, cell)| (key.row, key.col, cell.intensity))
                .collect(),
        });
    }
    TickDelta {
        header: DeltaHeader { tick, state_hash },
        faces: faces.into_values().collect(),
        global: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buildings::{Building, BuildingType};
    use crate::geom::Direction;
    use crate::terrain::generate_tiles;

    #[test]
    fn deltas_group_by_face() {
        let mut store = SpatialStore::from_tiles(8, generate_tiles(3, 8));
        store.put_building(
            TileKey::new(2, 1, 1),
            Building::prebuilt(BuildingType::Conveyor, Direction::East, None, None),
        );
        store.put_building(
            TileKey::new(5, 1, 1),
            Building::prebuilt(BuildingType::Conveyor, Direction::East, None, None),
        );
        let dirty = store.drain_dirty();
        let outcomes = TickOutcomes::default();
        let delta = build_delta(1, 0xAB, &store, &dirty, &outcomes);
        let face_ids: Vec<u8> = delta.faces.iter().map(|f| f.face).collect();
        assert_eq!(face_ids, vec![2, 5]);
        assert_eq!(delta.header.tick, 1);
    }

    #[test]
    fn moves_carry_cross_face_sources() {
        let store = SpatialStore::from_tiles(8, generate_tiles(3, 8));
        let dirty = DirtySets::default();
        let mut outcomes = TickOutcomes::default();
        outcomes.moves.push(ItemMove {
            from: TileKey::new(4, 2, 7),
            to: TileKey::new(0, 2, 0),
            item: ItemKind::Coal,
        });
        let delta = build_delta(9, 0, &store, &dirty, &outcomes);
        let update = &delta.faces[0].items[0];
        assert_eq!(update.from_face, Some(4));
        assert_eq!(update.item_kind, ItemKind::Coal.wire_code());
    }

    #[test]
    fn full_bus_drops_frames_without_blocking() {
        let (mut bus, receiver) = delta_channel(1);
        let delta = TickDelta {
            header: DeltaHeader {
                tick: 0,
                state_hash: 0,
            },
            faces: Vec::new(),
            global: Vec::new(),
        };
        bus.publish(delta.clone());
        bus.publish(delta.clone());
        assert_eq!(bus.dropped_frames(), 1);
        assert!(receiver.try_recv().is_ok());
        assert!(bus.last.is_some());
    }
}
