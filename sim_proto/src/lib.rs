//! Shared serialization schema for the spherical-factory simulation server.
//! These types are consumed by both the core simulation crate and external
//! clients; the core groups them per face before broadcasting so a client
//! can subscribe to the faces it is looking at.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Frame header attached to every broadcast delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaHeader {
    pub tick: u64,
    /// FNV-1a hash of the authoritative store after this tick, for client
    /// drift detection.
    pub state_hash: u64,
}

/// One tick's worth of change notifications, grouped per face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickDelta {
    pub header: DeltaHeader,
    pub faces: Vec<FaceDelta>,
    pub global: Vec<GlobalEvent>,
}

/// All changes on a single face during one tick. Every event is idempotent
/// on replay: it carries absolute state, never an increment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceDelta {
    pub face: u8,
    pub buildings: Vec<BuildingEvent>,
    pub items: Vec<ItemUpdate>,
    pub creatures: Vec<CreatureEvent>,
    pub hiss: Vec<HissEvent>,
    pub corruption: Vec<CorruptionEvent>,
    pub territory: Vec<TerritoryUpdate>,
}

impl FaceDelta {
    pub fn new(face: u8) -> Self {
        Self {
            face,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buildings.is_empty()
            && self.items.is_empty()
            && self.creatures.is_empty()
            && self.hiss.is_empty()
            && self.corruption.is_empty()
            && self.territory.is_empty()
    }
}

/// Building lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BuildingEvent {
    Placed {
        row: u16,
        col: u16,
        building_type: u16,
        orientation: u8,
        owner: Option<u64>,
        /// Opaque state blob (bincode); clients that render internals decode
        /// it, others ignore it.
        state: Vec<u8>,
    },
    Removed {
        row: u16,
        col: u16,
    },
    Damaged {
        row: u16,
        col: u16,
        destroyed: bool,
    },
}

/// Item position on a face, with the optional same-tick movement source so
/// clients can interpolate conveyor motion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemUpdate {
    pub row: u16,
    pub col: u16,
    pub item_kind: u16,
    pub from_row: Option<u16>,
    pub from_col: Option<u16>,
    pub from_face: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CreatureEvent {
    Spawned {
        id: u64,
        creature_type: u16,
        row: u16,
        col: u16,
    },
    Moved {
        id: u64,
        row: u16,
        col: u16,
    },
    Captured {
        id: u64,
        owner: u64,
    },
    /// Full-face resync after reconnect or world reset.
    Sync {
        creatures: Vec<(u64, u16, u16, u16)>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HissEvent {
    Spawned { id: u64, row: u16, col: u16 },
    Moved { id: u64, row: u16, col: u16 },
    Killed { id: u64 },
    Sync { entities: Vec<(u64, u16, u16, u8)> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CorruptionEvent {
    Update { row: u16, col: u16, intensity: u8 },
    Cleared { row: u16, col: u16 },
    Sync { cells: Vec<(u16, u16, u8)> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerritoryUpdate {
    pub row: u16,
    pub col: u16,
    pub owner: Option<u64>,
}

/// Events that are not tied to a single face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GlobalEvent {
    WorldEventStarted { kind: u16, ends_at_tick: u64 },
    WorldEventEnded { kind: u16 },
    ShiftCycleChanged { phase: u8 },
    SunMoved { azimuth_milli: u32 },
    Submission {
        player: Option<u64>,
        item_kind: u16,
        trade: bool,
    },
}

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("delta encode failed: {0}")]
    Encode(#[source] bincode::Error),
    #[error("delta decode failed: {0}")]
    Decode(#[source] bincode::Error),
}

pub fn encode_delta(delta: &TickDelta) -> Result<Vec<u8>, ProtoError> {
    bincode::serialize(delta).map_err(ProtoError::Encode)
}

pub fn decode_delta(bytes: &[u8]) -> Result<TickDelta, ProtoError> {
    bincode::deserialize(bytes).map_err(ProtoError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_round_trips_through_bincode() {
        let delta = TickDelta {
            header: DeltaHeader {
                tick: 7,
                state_hash: 0xDEAD_BEEF,
            },
            faces: vec![FaceDelta {
                face: 3,
                buildings: vec![BuildingEvent::Removed { row: 1, col: 2 }],
                items: vec![ItemUpdate {
                    row: 4,
                    col: 5,
                    item_kind: 9,
                    from_row: Some(4),
                    from_col: Some(4),
                    from_face: None,
                }],
                creatures: Vec::new(),
                hiss: vec![HissEvent::Killed { id: 11 }],
                corruption: vec![CorruptionEvent::Update {
                    row: 0,
                    col: 0,
                    intensity: 6,
                }],
                territory: Vec::new(),
            }],
            global: vec![GlobalEvent::ShiftCycleChanged { phase: 2 }],
        };

        let bytes = encode_delta(&delta).expect("encode");
        let decoded = decode_delta(&bytes).expect("decode");
        assert_eq!(delta, decoded);
    }

    #[test]
    fn empty_face_delta_reports_empty() {
        let delta = FaceDelta::new(12);
        assert!(delta.is_empty());
        assert_eq!(delta.face, 12);
    }
}
