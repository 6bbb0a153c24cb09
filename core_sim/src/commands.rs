//! The write-serialized command surface.
//!
//! Commands arrive on a crossbeam channel and are applied by the first
//! system in the tick schedule, so every mutation is serialized through
//! the driver. The placement/removal functions are also callable directly
//! for tests and embedded use; they validate in the fixed order of the
//! design and leave state untouched on failure.

use std::collections::HashMap;

use bevy::prelude::Resource;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::buildings::{Building, BuildingState, BuildingType, PlayerId};
use crate::corruption::CorruptionField;
use crate::creatures::CreatureLedger;
use crate::geom::{Direction, TileKey};
use crate::modifiers::PlayerModifiers;
use crate::store::SpatialStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum PlaceError {
    #[error("tile key is outside the world")]
    InvalidTile,
    #[error("unknown building type")]
    InvalidBuildingType,
    #[error("tile already holds a building")]
    TileOccupied,
    #[error("building cannot operate on this tile")]
    InvalidPlacement,
    #[error("building type is not unlocked")]
    NotUnlocked,
    #[error("tile is corrupted")]
    CorruptedTile,
    #[error("tile lies in another player's territory")]
    TerritoryBlocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum RemoveError {
    #[error("no building at the tile")]
    NoBuilding,
    #[error("caller does not own the building")]
    NotOwner,
}

/// Territory claims, recomputed alongside power resolution: a built
/// substation claims its powered disc for its owner.
#[derive(Resource, Debug, Clone, Default)]
pub struct TerritoryMap {
    claims: HashMap<TileKey, PlayerId>,
}

impl TerritoryMap {
    pub fn owner_of(&self, key: TileKey) -> Option<PlayerId> {
        self.claims.get(&key).copied()
    }

    pub fn blocks(&self, key: TileKey, placer: Option<PlayerId>) -> bool {
        match (self.owner_of(key), placer) {
            (Some(claimant), Some(placer)) => claimant != placer,
            (Some(_), None) => false,
            (None, _) => false,
        }
    }

    /// Replace all claims, returning the keys whose owner changed.
    pub fn replace(&mut self, claims: HashMap<TileKey, PlayerId>) -> Vec<TileKey> {
        let mut changed: Vec<TileKey> = Vec::new();
        for (key, owner) in &claims {
            if self.claims.get(key) != Some(owner) {
                changed.push(*key);
            }
        }
        for key in self.claims.keys() {
            if !claims.contains_key(key) {
                changed.push(*key);
            }
        }
        self.claims = claims;
        changed.sort_unstable();
        changed.dedup();
        changed
    }

    pub fn clear(&mut self) {
        self.claims.clear();
    }
}

/// Validate and apply a placement. First failure wins, in the fixed
/// order: tile, type, occupancy, tile fit, research gate, corruption,
/// territory.
#[allow(clippy::too_many_arguments)]
pub fn place_building(
    store: &mut SpatialStore,
    corruption: &CorruptionField,
    territory: &TerritoryMap,
    modifiers: &mut PlayerModifiers,
    key: TileKey,
    type_code: u16,
    orientation: Direction,
    owner: Option<PlayerId>,
) -> Result<(), PlaceError> {
    if !store.contains_key(key) {
        return Err(PlaceError::InvalidTile);
    }
    let Some(building_type) = BuildingType::from_wire_code(type_code) else {
        return Err(PlaceError::InvalidBuildingType);
    };
    if store.has_building(key) {
        return Err(PlaceError::TileOccupied);
    }
    let tile = store.get_tile(key).ok_or(PlaceError::InvalidTile)?;
    if building_type.requires_resource_tile() && !tile.has_resource() {
        return Err(PlaceError::InvalidPlacement);
    }
    if !modifiers.is_unlocked(owner, building_type) {
        return Err(PlaceError::NotUnlocked);
    }
    if corruption.is_corrupted(key) && !building_type.corruption_safe() {
        return Err(PlaceError::CorruptedTile);
    }
    if territory.blocks(key, owner) {
        return Err(PlaceError::TerritoryBlocked);
    }

    let altered = tile.altered;
    let building = if modifiers.take_starter_kit(owner, building_type) {
        Building::prebuilt(building_type, orientation, owner, altered)
    } else {
        Building::new(building_type, orientation, owner, altered)
    };
    store.put_building(key, building);

    if building_type == BuildingType::SubsurfaceLink {
        pair_subsurface_link(store, key, owner);
    }
    Ok(())
}

/// Pair a fresh Subsurface Link with the oldest unpaired link of the same
/// owner. Pairing is symmetric by construction.
fn pair_subsurface_link(store: &mut SpatialStore, placed: TileKey, owner: Option<PlayerId>) {
    let candidate = store.building_keys_sorted().into_iter().find(|key| {
        *key != placed
            && store.get_building(*key).is_some_and(|b| {
                b.building_type == BuildingType::SubsurfaceLink
                    && b.owner == owner
                    && matches!(
                        b.state,
                        BuildingState::SubsurfaceLink {
                            linked_to: None,
                            ..
                        }
                    )
            })
    });
    if let Some(partner) = candidate {
        store.update_building(partner, |b| {
            if let BuildingState::SubsurfaceLink { linked_to, .. } = &mut b.state {
                *linked_to = Some(placed);
            }
        });
        store.update_building(placed, |b| {
            if let BuildingState::SubsurfaceLink { linked_to, .. } = &mut b.state {
                *linked_to = Some(partner);
            }
        });
    }
}

/// Validate and apply a removal. A caller-less removal is a server action
/// and always passes the ownership check.
pub fn remove_building(
    store: &mut SpatialStore,
    ledger: &mut CreatureLedger,
    key: TileKey,
    acting_player: Option<PlayerId>,
) -> Result<Building, RemoveError> {
    let Some(building) = store.get_building(key) else {
        return Err(RemoveError::NoBuilding);
    };
    if let (Some(actor), Some(owner)) = (acting_player, building.owner) {
        if actor != owner {
            return Err(RemoveError::NotOwner);
        }
    }
    // Unhook a subsurface partner so the pairing stays symmetric.
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
    let removed = store
        .remove_building(key)
        .expect("building vanished during removal");
    ledger.building_removed(key);
    Ok(removed)
}

/// Commands accepted on the driver channel. Type and orientation arrive as
/// wire codes; validation happens inside the tick loop.
#[derive(Debug, Clone)]
pub enum Command {
    PlaceBuilding {
        key: TileKey,
        type_code: u16,
        orientation: u8,
        owner: Option<u64>,
    },
    PlaceBuildings {
        requests: Vec<(TileKey, u16, u8, Option<u64>)>,
    },
    RemoveBuilding {
        key: TileKey,
        acting_player: Option<u64>,
    },
    RemoveBuildings {
        keys: Vec<TileKey>,
        acting_player: Option<u64>,
    },
    ReadTickCount,
    ResetWorld {
        new_seed: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    Place(Result<(), PlaceError>),
    PlaceMany(Vec<Result<(), PlaceError>>),
    Remove(Result<(), RemoveError>),
    RemoveMany(Vec<Result<(), RemoveError>>),
    TickCount(u64),
    ResetDone,
    /// The command arrived while a world reset was in progress.
    Rejected,
}

#[derive(Debug)]
pub struct CommandEnvelope {
    pub command: Command,
    pub reply: Option<Sender<CommandReply>>,
}

/// Receiving half held by the driver; commands drain between ticks.
#[derive(Resource)]
pub struct CommandQueue {
    receiver: Receiver<CommandEnvelope>,
}

impl CommandQueue {
    pub fn drain(&self) -> Vec<CommandEnvelope> {
        let mut drained = Vec::new();
        while let Ok(envelope) = self.receiver.try_recv() {
            drained.push(envelope);
        }
        drained
    }
}

/// Sending half handed to transports and embedding code. Every call is
/// synchronous: it blocks until the driver processes the command between
/// ticks.
#[derive(Clone)]
pub struct CommandClient {
    sender: Sender<CommandEnvelope>,
}

impl CommandClient {
    pub fn send_with_reply(&self, command: Command) -> Option<CommandReply> {
        let (reply_tx, reply_rx) = bounded(1);
        let envelope = CommandEnvelope {
            command,
            reply: Some(reply_tx),
        };
        if self.sender.send(envelope).is_err() {
            return None;
        }
        reply_rx.recv().ok()
    }

    /// Fire-and-forget variant for transports that do not report results.
    pub fn send(&self, command: Command) -> bool {
        let envelope = CommandEnvelope {
            command,
            reply: None,
        };
        match self.sender.try_send(envelope) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Build the paired queue and client for a driver instance.
pub fn command_channel() -> (CommandQueue, CommandClient) {
    let (sender, receiver) = unbounded();
    (CommandQueue { receiver }, CommandClient { sender })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::ItemKind;
    use crate::terrain::{generate_tiles, Deposit};

    fn harness(n: u16) -> (SpatialStore, CorruptionField, TerritoryMap, PlayerModifiers) {
        (
            SpatialStore::from_tiles(n, generate_tiles(9, n)),
            CorruptionField::default(),
            TerritoryMap::default(),
            PlayerModifiers::default(),
        )
    }

    fn place(
        store: &mut SpatialStore,
        corruption: &CorruptionField,
        territory: &TerritoryMap,
        modifiers: &mut PlayerModifiers,
        key: TileKey,
        building_type: BuildingType,
        owner: Option<PlayerId>,
    ) -> Result<(), PlaceError> {
        place_building(
            store,
            corruption,
            territory,
            modifiers,
            key,
            building_type.wire_code(),
            Direction::North,
            owner,
        )
    }

    #[test]
    fn validation_order_puts_occupancy_before_research() {
        let (mut store, corruption, territory, mut modifiers) = harness(8);
        let key = TileKey::new(0, 1, 1);
        place(
            &mut store,
            &corruption,
            &territory,
            &mut modifiers,
            key,
            BuildingType::Conveyor,
            None,
        )
        .expect("first placement");
        // Collider is research-gated, but the occupied tile reports first.
        let result = place(
            &mut store,
            &corruption,
            &territory,
            &mut modifiers,
            key,
            BuildingType::ParticleCollider,
            Some(PlayerId(1)),
        );
        assert_eq!(result, Err(PlaceError::TileOccupied));
    }

    #[test]
    fn extractor_needs_a_deposit() {
        let (mut store, corruption, territory, mut modifiers) = harness(8);
        let empty = TileKey::new(0, 0, 0);
        let mut tile = store.get_tile(empty).cloned().unwrap();
        tile.deposit = None;
        store.put_tile(empty, tile);
        let result = place(
            &mut store,
            &corruption,
            &territory,
            &mut modifiers,
            empty,
            BuildingType::Extractor,
            None,
        );
        assert_eq!(result, Err(PlaceError::InvalidPlacement));

        let seeded = TileKey::new(0, 0, 1);
        let mut tile = store.get_tile(seeded).cloned().unwrap();
        tile.deposit = Some(Deposit {
            kind: ItemKind::IronOre,
            amount: 10,
        });
        store.put_tile(seeded, tile);
        assert!(place(
            &mut store,
            &corruption,
            &territory,
            &mut modifiers,
            seeded,
            BuildingType::Extractor,
            None,
        )
        .is_ok());
    }

    #[test]
    fn corrupted_tiles_accept_only_safe_classes() {
        let (mut store, mut corruption, territory, mut modifiers) = harness(8);
        let key = TileKey::new(0, 2, 2);
        corruption.restore_cell(
            key,
            crate::corruption::CorruptionCell {
                intensity: 3,
                seeded_at: 0,
                building_damage_ticks: 0,
            },
        );
        let denied = place(
            &mut store,
            &corruption,
            &territory,
            &mut modifiers,
            key,
            BuildingType::Conveyor,
            None,
        );
        assert_eq!(denied, Err(PlaceError::CorruptedTile));
        assert!(place(
            &mut store,
            &corruption,
            &territory,
            &mut modifiers,
            key,
            BuildingType::DefenseTurret,
            None,
        )
        .is_ok());
    }

    #[test]
    fn territory_blocks_rival_placements_only() {
        let (mut store, corruption, mut territory, mut modifiers) = harness(8);
        let key = TileKey::new(0, 3, 3);
        territory.replace([(key, PlayerId(1))].into_iter().collect());
        let rival = place(
            &mut store,
            &corruption,
            &territory,
            &mut modifiers,
            key,
            BuildingType::Conveyor,
            Some(PlayerId(2)),
        );
        assert_eq!(rival, Err(PlaceError::TerritoryBlocked));
        assert!(place(
            &mut store,
            &corruption,
            &territory,
            &mut modifiers,
            key,
            BuildingType::Conveyor,
            Some(PlayerId(1)),
        )
        .is_ok());
    }

    #[test]
    fn subsurface_links_pair_on_placement() {
        let (mut store, corruption, territory, mut modifiers) = harness(8);
        let a = TileKey::new(0, 1, 1);
        let b = TileKey::new(0, 5, 5);
        for key in [a, b] {
            place(
                &mut store,
                &corruption,
                &territory,
                &mut modifiers,
                key,
                BuildingType::SubsurfaceLink,
                Some(PlayerId(1)),
            )
            .expect("link placement");
        }
        fn linked(store: &SpatialStore, key: TileKey) -> Option<TileKey> {
            match store.get_building(key).unwrap().state {
                BuildingState::SubsurfaceLink { linked_to, .. } => linked_to,
                _ => None,
            }
        }
        assert_eq!(linked(&store, a), Some(b));
        assert_eq!(linked(&store, b), Some(a));

        // Removing one side unhooks the other.
        let mut ledger = CreatureLedger::default();
        remove_building(&mut store, &mut ledger, a, None).expect("removal");
        assert_eq!(linked(&store, b), None);
    }

    #[test]
    fn removal_enforces_ownership() {
        let (mut store, corruption, territory, mut modifiers) = harness(8);
        let key = TileKey::new(0, 4, 4);
        place(
            &mut store,
            &corruption,
            &territory,
            &mut modifiers,
            key,
            BuildingType::Conveyor,
            Some(PlayerId(1)),
        )
        .expect("placement");
        let mut ledger = CreatureLedger::default();
        assert_eq!(
            remove_building(&mut store, &mut ledger, key, Some(PlayerId(2))),
            Err(RemoveError::NotOwner)
        );
        assert!(remove_building(&mut store, &mut ledger, key, Some(PlayerId(1))).is_ok());
        assert_eq!(
            remove_building(&mut store, &mut ledger, key, None),
            Err(RemoveError::NoBuilding)
        );
    }

    #[test]
    fn starter_kits_skip_construction() {
        let (mut store, corruption, territory, mut modifiers) = harness(8);
        let player = PlayerId(7);
        modifiers.grant_starter_kit(player, BuildingType::Conveyor, 1);
        let kitted = TileKey::new(0, 6, 0);
        place(
            &mut store,
            &corruption,
            &territory,
            &mut modifiers,
            kitted,
            BuildingType::Conveyor,
            Some(player),
        )
        .expect("kit placement");
        assert!(store.get_building(kitted).unwrap().is_built());

        let unkitted = TileKey::new(0, 6, 1);
        place(
            &mut store,
            &corruption,
            &territory,
            &mut modifiers,
            unkitted,
            BuildingType::Conveyor,
            Some(player),
        )
        .expect("plain placement");
        assert!(!store.get_building(unkitted).unwrap().is_built());
    }
}
