//! Building vocabulary: class enum, capability tags, per-class state union,
//! and the static tables (costs, draw, tiers) consulted by placement and
//! the rate pipeline.

use std::collections::BTreeMap;
use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::geom::{Direction, TileKey};
use crate::items::ItemKind;
use crate::scalar::Scalar;
use crate::terrain::AlteredItem;

/// Identifier for a player recognised by the command surface.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PlayerId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[repr(u16)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum BuildingType {
    Conveyor = 0,
    ConveyorMk2 = 1,
    ConveyorMk3 = 2,
    Extractor = 3,
    Distiller = 4,
    Processor = 5,
    Assembler = 6,
    AdvancedAssembler = 7,
    FabricationPlant = 8,
    ParticleCollider = 9,
    NuclearRefinery = 10,
    ParanaturalSynthesizer = 11,
    BoardInterface = 12,
    Distributor = 13,
    LoadEqualizer = 14,
    Converger = 15,
    TransitInterchange = 16,
    SubsurfaceLink = 17,
    ContainmentVault = 18,
    SubmissionTerminal = 19,
    TradeTerminal = 20,
    BioGenerator = 21,
    ShadowPanel = 22,
    Substation = 23,
    TransferStation = 24,
    Lamp = 25,
    GatheringPost = 26,
    ContainmentTrap = 27,
    PurificationBeacon = 28,
    DefenseTurret = 29,
    DimensionalStabilizer = 30,
}

pub const BUILDING_TYPES: [BuildingType; 31] = [
    BuildingType::Conveyor,
    BuildingType::ConveyorMk2,
    BuildingType::ConveyorMk3,
    BuildingType::Extractor,
    BuildingType::Distiller,
    BuildingType::Processor,
    BuildingType::Assembler,
    BuildingType::AdvancedAssembler,
    BuildingType::FabricationPlant,
    BuildingType::ParticleCollider,
    BuildingType::NuclearRefinery,
    BuildingType::ParanaturalSynthesizer,
    BuildingType::BoardInterface,
    BuildingType::Distributor,
    BuildingType::LoadEqualizer,
    BuildingType::Converger,
    BuildingType::TransitInterchange,
    BuildingType::SubsurfaceLink,
    BuildingType::ContainmentVault,
    BuildingType::SubmissionTerminal,
    BuildingType::TradeTerminal,
    BuildingType::BioGenerator,
    BuildingType::ShadowPanel,
    BuildingType::Substation,
    BuildingType::TransferStation,
    BuildingType::Lamp,
    BuildingType::GatheringPost,
    BuildingType::ContainmentTrap,
    BuildingType::PurificationBeacon,
    BuildingType::DefenseTurret,
    BuildingType::DimensionalStabilizer,
];

bitflags! {
    /// Capability tags consulted by placement, corruption, and assignment
    /// rules.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct BuildingTags: u16 {
        const LOGISTICS = 1 << 0;
        const PRODUCER = 1 << 1;
        const GENERATOR = 1 << 2;
        const RELAY = 1 << 3;
        const DEFENSE = 1 << 4;
        const PURIFIER = 1 << 5;
        const STABILIZER = 1 << 6;
        /// Creature assignment is rejected for these classes.
        const NO_ASSIGN = 1 << 7;
    }
}

impl BuildingType {
    pub fn wire_code(self) -> u16 {
        self as u16
    }

    pub fn from_wire_code(code: u16) -> Option<Self> {
        BUILDING_TYPES.get(usize::from(code)).copied()
    }

    pub fn tags(self) -> BuildingTags {
        use BuildingTags as Tag;
        match self {
            Self::Conveyor | Self::ConveyorMk2 | Self::ConveyorMk3 => {
                Tag::LOGISTICS | Tag::NO_ASSIGN
            }
            Self::Distributor
            | Self::LoadEqualizer
            | Self::Converger
            | Self::TransitInterchange
            | Self::SubsurfaceLink
            | Self::ContainmentVault => Tag::LOGISTICS,
            Self::Extractor
            | Self::Distiller
            | Self::Processor
            | Self::Assembler
            | Self::AdvancedAssembler
            | Self::FabricationPlant
            | Self::ParticleCollider
            | Self::NuclearRefinery
            | Self::ParanaturalSynthesizer
            | Self::BoardInterface => Tag::PRODUCER,
            Self::SubmissionTerminal | Self::TradeTerminal => Tag::NO_ASSIGN,
            Self::BioGenerator | Self::ShadowPanel => Tag::GENERATOR,
            Self::Substation | Self::TransferStation => Tag::RELAY,
            Self::DefenseTurret => Tag::DEFENSE,
            Self::PurificationBeacon => Tag::PURIFIER,
            Self::DimensionalStabilizer => Tag::STABILIZER,
            Self::ContainmentTrap => Tag::NO_ASSIGN,
            Self::Lamp | Self::GatheringPost => Tag::empty(),
        }
    }

    /// May this class be placed on (or keep standing in) a corrupted tile?
    pub fn corruption_safe(self) -> bool {
        self.tags().intersects(
            BuildingTags::PURIFIER | BuildingTags::DEFENSE | BuildingTags::STABILIZER,
        )
    }

    /// Progression tier; tier 0 classes run without grid power at full
    /// rate, higher tiers take the unpowered penalty.
    pub fn tier(self) -> u32 {
        match self {
            Self::Conveyor
            | Self::Extractor
            | Self::Processor
            | Self::Distributor
            | Self::Converger
            | Self::Lamp
            | Self::GatheringPost
            | Self::Substation
            | Self::BioGenerator
            | Self::ShadowPanel => 0,
            Self::ConveyorMk2
            | Self::Distiller
            | Self::Assembler
            | Self::LoadEqualizer
            | Self::TransitInterchange
            | Self::ContainmentVault
            | Self::SubmissionTerminal
            | Self::TradeTerminal
            | Self::ContainmentTrap
            | Self::TransferStation => 1,
            Self::ConveyorMk3
            | Self::AdvancedAssembler
            | Self::FabricationPlant
            | Self::SubsurfaceLink
            | Self::PurificationBeacon
            | Self::DefenseTurret
            | Self::DimensionalStabilizer => 2,
            Self::ParticleCollider | Self::NuclearRefinery => 3,
            Self::ParanaturalSynthesizer | Self::BoardInterface => 4,
        }
    }

    /// Grid load while built, powered on, and inside a network.
    pub fn power_draw(self) -> u32 {
        match self {
            Self::Extractor | Self::Processor | Self::ContainmentTrap => 2,
            Self::Distiller => 8,
            Self::Assembler => 4,
            Self::AdvancedAssembler => 6,
            Self::FabricationPlant => 10,
            Self::ParticleCollider => 20,
            Self::NuclearRefinery => 12,
            Self::ParanaturalSynthesizer | Self::BoardInterface => 15,
            Self::SubsurfaceLink => 2,
            Self::SubmissionTerminal | Self::TradeTerminal | Self::Lamp => 1,
            Self::PurificationBeacon | Self::DimensionalStabilizer => 5,
            Self::DefenseTurret => 3,
            _ => 0,
        }
    }

    pub fn requires_resource_tile(self) -> bool {
        matches!(self, Self::Extractor)
    }

    /// Items delivered to the construction site before the building runs.
    pub fn construction_cost(self) -> &'static [(ItemKind, u32)] {
        use ItemKind as I;
        match self {
            Self::Conveyor => &[(I::Stone, 2)],
            Self::ConveyorMk2 => &[(I::FerricIngot, 2)],
            Self::ConveyorMk3 => &[(I::Component, 2)],
            Self::Extractor => &[(I::Stone, 4)],
            Self::Distiller => &[(I::FerricIngot, 4)],
            Self::Processor => &[(I::Stone, 6)],
            Self::Assembler => &[(I::FerricIngot, 6)],
            Self::AdvancedAssembler => &[(I::Component, 4)],
            Self::FabricationPlant => &[(I::Component, 8)],
            Self::ParticleCollider => &[(I::Module, 6)],
            Self::NuclearRefinery => &[(I::Module, 4)],
            Self::ParanaturalSynthesizer => &[(I::Fabricate, 4)],
            Self::BoardInterface => &[(I::Fabricate, 8)],
            Self::Distributor => &[(I::Stone, 3)],
            Self::LoadEqualizer => &[(I::FerricIngot, 3)],
            Self::Converger => &[(I::Stone, 3)],
            Self::TransitInterchange => &[(I::FerricIngot, 2)],
            Self::SubsurfaceLink => &[(I::Component, 3)],
            Self::ContainmentVault => &[(I::Stone, 8)],
            Self::SubmissionTerminal => &[(I::FerricIngot, 5)],
            Self::TradeTerminal => &[(I::FerricIngot, 5)],
            Self::BioGenerator => &[(I::Stone, 5)],
            Self::ShadowPanel => &[(I::RefinedCrystal, 3)],
            Self::Substation => &[(I::CupricIngot, 4)],
            Self::TransferStation => &[(I::CupricIngot, 6)],
            Self::Lamp => &[(I::CupricIngot, 1)],
            Self::GatheringPost => &[(I::Stone, 4)],
            Self::ContainmentTrap => &[(I::Component, 2)],
            Self::PurificationBeacon => &[(I::RefinedCrystal, 6)],
            Self::DefenseTurret => &[(I::Component, 5)],
            Self::DimensionalStabilizer => &[(I::Module, 5)],
        }
    }
}

/// Bio Generator output while burning fuel.
pub const BIO_GENERATOR_OUTPUT: u32 = 20;
/// Shadow Panel output at full darkness.
pub const SHADOW_PANEL_MAX_OUTPUT: u32 = 10;
/// Containment Vault slot capacity.
pub const VAULT_CAPACITY: u32 = 50;

/// Which of a splitter's two outputs fired last (or fires next).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn flipped(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// Pending construction: the building is inert until every required item
/// has been delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstructionSite {
    pub required: BTreeMap<ItemKind, u32>,
    pub delivered: BTreeMap<ItemKind, u32>,
    pub complete: bool,
}

impl ConstructionSite {
    pub fn new(cost: &[(ItemKind, u32)]) -> Self {
        Self {
            required: cost.iter().copied().collect(),
            delivered: BTreeMap::new(),
            complete: cost.is_empty(),
        }
    }

    /// Is at least one more unit of `item` still needed?
    pub fn needs(&self, item: ItemKind) -> bool {
        if self.complete {
            return false;
        }
        let required = self.required.get(&item).copied().unwrap_or(0);
        let delivered = self.delivered.get(&item).copied().unwrap_or(0);
        delivered < required
    }

    /// Record one delivered unit; returns true when the site just became
    /// complete.
    pub fn deliver(&mut self, item: ItemKind) -> bool {
        if !self.needs(item) {
            return false;
        }
        *self.delivered.entry(item).or_insert(0) += 1;
        self.complete = self
            .required
            .iter()
            .all(|(kind, count)| self.delivered.get(kind).copied().unwrap_or(0) >= *count);
        self.complete
    }
}

/// Per-class mutable state. One variant per building class; kernels match
/// on exactly the variant they own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BuildingState {
    Conveyor {
        item: Option<ItemKind>,
    },
    ConveyorMk2 {
        item: Option<ItemKind>,
        buffer: Option<ItemKind>,
    },
    ConveyorMk3 {
        item: Option<ItemKind>,
        buffer1: Option<ItemKind>,
        buffer2: Option<ItemKind>,
    },
    Extractor {
        output_buffer: Option<ItemKind>,
        output_remaining: u32,
        progress: u32,
        rate: u32,
    },
    ProducerSingle {
        input_buffer: Option<ItemKind>,
        output_buffer: Option<ItemKind>,
        output_remaining: u32,
        progress: u32,
        rate: u32,
    },
    ProducerDual {
        input_a: u32,
        input_b: u32,
        output_buffer: Option<ItemKind>,
        output_remaining: u32,
        progress: u32,
        rate: u32,
    },
    ProducerTriple {
        input_a: u32,
        input_b: u32,
        input_c: u32,
        output_buffer: Option<ItemKind>,
        output_remaining: u32,
        progress: u32,
        rate: u32,
    },
    Distributor {
        item: Option<ItemKind>,
        next_output: Side,
    },
    LoadEqualizer {
        item: Option<ItemKind>,
        last_output: Side,
    },
    Converger {
        item: Option<ItemKind>,
    },
    TransitInterchange {
        horizontal: Option<ItemKind>,
        vertical: Option<ItemKind>,
        h_dir: Direction,
        v_dir: Direction,
    },
    SubsurfaceLink {
        item: Option<ItemKind>,
        linked_to: Option<TileKey>,
    },
    ContainmentVault {
        item_type: Option<ItemKind>,
        count: u32,
        capacity: u32,
    },
    SubmissionTerminal {
        input_buffer: Option<ItemKind>,
        last_submitted: Option<ItemKind>,
    },
    TradeTerminal {
        input_buffer: Option<ItemKind>,
        last_submitted: Option<ItemKind>,
    },
    BioGenerator {
        input_buffer: Option<ItemKind>,
        fuel_remaining: u32,
        producing: bool,
    },
    ShadowPanel {
        power_output: Scalar,
    },
    ContainmentTrap {
        capturing: Option<u64>,
        capture_progress: u32,
    },
    DefenseTurret {
        output_buffer: Option<ItemKind>,
        kills: u32,
    },
    /// Classes with no per-tick mutable fields.
    Passive,
}

impl BuildingState {
    /// Class defaults, including the behavior-defined base rate.
    pub fn initial(building_type: BuildingType) -> Self {
        use BuildingType as B;
        match building_type {
            B::Conveyor => Self::Conveyor { item: None },
            B::ConveyorMk2 => Self::ConveyorMk2 {
                item: None,
                buffer: None,
            },
            B::ConveyorMk3 => Self::ConveyorMk3 {
                item: None,
                buffer1: None,
                buffer2: None,
            },
            B::Extractor => Self::Extractor {
                output_buffer: None,
                output_remaining: 0,
                progress: 0,
                rate: 10,
            },
            B::Distiller => Self::ProducerSingle {
                input_buffer: None,
                output_buffer: None,
                output_remaining: 0,
                progress: 0,
                rate: 12,
            },
            B::Processor => Self::ProducerSingle {
                input_buffer: None,
                output_buffer: None,
                output_remaining: 0,
                progress: 0,
                rate: 8,
            },
            B::Assembler => Self::dual(15),
            B::AdvancedAssembler => Self::dual(20),
            B::ParticleCollider => Self::dual(40),
            B::NuclearRefinery => Self::dual(30),
            B::ParanaturalSynthesizer => Self::dual(50),
            B::FabricationPlant => Self::triple(25),
            B::BoardInterface => Self::triple(60),
            B::Distributor => Self::Distributor {
                item: None,
                next_output: Side::Left,
            },
            B::LoadEqualizer => Self::LoadEqualizer {
                item: None,
                last_output: Side::Right,
            },
            B::Converger => Self::Converger { item: None },
            B::TransitInterchange => Self::TransitInterchange {
                horizontal: None,
                vertical: None,
                h_dir: Direction::East,
                v_dir: Direction::North,
            },
            B::SubsurfaceLink => Self::SubsurfaceLink {
                item: None,
                linked_to: None,
            },
            B::ContainmentVault => Self::ContainmentVault {
                item_type: None,
                count: 0,
                capacity: VAULT_CAPACITY,
            },
            B::SubmissionTerminal => Self::SubmissionTerminal {
                input_buffer: None,
                last_submitted: None,
            },
            B::TradeTerminal => Self::TradeTerminal {
                input_buffer: None,
                last_submitted: None,
            },
            B::BioGenerator => Self::BioGenerator {
                input_buffer: None,
                fuel_remaining: 0,
                producing: false,
            },
            B::ShadowPanel => Self::ShadowPanel {
                power_output: Scalar::zero(),
            },
            B::ContainmentTrap => Self::ContainmentTrap {
                capturing: None,
                capture_progress: 0,
            },
            B::DefenseTurret => Self::DefenseTurret {
                output_buffer: None,
                kills: 0,
            },
            B::Substation
            | B::TransferStation
            | B::Lamp
            | B::GatheringPost
            | B::PurificationBeacon
            | B::DimensionalStabilizer => Self::Passive,
        }
    }

    fn dual(rate: u32) -> Self {
        Self::ProducerDual {
            input_a: 0,
            input_b: 0,
            output_buffer: None,
            output_remaining: 0,
            progress: 0,
            rate,
        }
    }

    fn triple(rate: u32) -> Self {
        Self::ProducerTriple {
            input_a: 0,
            input_b: 0,
            input_c: 0,
            output_buffer: None,
            output_remaining: 0,
            progress: 0,
            rate,
        }
    }

    /// Base rate for classes that cycle; `None` for stateless classes.
    pub fn base_rate(&self) -> Option<u32> {
        match self {
            Self::Extractor { rate, .. }
            | Self::ProducerSingle { rate, .. }
            | Self::ProducerDual { rate, .. }
            | Self::ProducerTriple { rate, .. } => Some(*rate),
            _ => None,
        }
    }
}

/// A structure occupying exactly one tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Building {
    pub building_type: BuildingType,
    pub orientation: Direction,
    pub owner: Option<PlayerId>,
    /// Copied from the tile at placement; immutable afterwards.
    pub altered: Option<AlteredItem>,
    pub construction: Option<ConstructionSite>,
    /// Operator on/off switch, independent of network membership.
    pub powered_user: bool,
    pub state: BuildingState,
}

impl Building {
    pub fn new(
        building_type: BuildingType,
        orientation: Direction,
        owner: Option<PlayerId>,
        altered: Option<AlteredItem>,
    ) -> Self {
        Self {
            building_type,
            orientation,
            owner,
            altered,
            construction: Some(ConstructionSite::new(building_type.construction_cost())),
            powered_user: true,
            state: BuildingState::initial(building_type),
        }
    }

    /// A prebuilt instance with no pending construction (starter-kit
    /// placements and tests).
    pub fn prebuilt(
        building_type: BuildingType,
        orientation: Direction,
        owner: Option<PlayerId>,
        altered: Option<AlteredItem>,
    ) -> Self {
        Self {
            construction: None,
            ..Self::new(building_type, orientation, owner, altered)
        }
    }

    /// Built and allowed to produce, route, and draw power.
    pub fn is_built(&self) -> bool {
        self.construction
            .as_ref()
            .map_or(true, |site| site.complete)
    }

    /// Serialized state blob carried by placement deltas and the persisted
    /// building table.
    pub fn state_blob(&self) -> Vec<u8> {
        bincode::serialize(&self.state).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_site_tracks_deliveries() {
        let mut site = ConstructionSite::new(&[(ItemKind::Stone, 2)]);
        assert!(site.needs(ItemKind::Stone));
        assert!(!site.needs(ItemKind::Coal));
        assert!(!site.deliver(ItemKind::Stone));
        assert!(site.deliver(ItemKind::Stone));
        assert!(site.complete);
        assert!(!site.needs(ItemKind::Stone));
    }

    #[test]
    fn prebuilt_buildings_are_immediately_built() {
        let building = Building::prebuilt(BuildingType::Processor, Direction::East, None, None);
        assert!(building.is_built());
        let pending = Building::new(BuildingType::Processor, Direction::East, None, None);
        assert!(!pending.is_built());
    }

    #[test]
    fn wire_codes_cover_every_class() {
        for building_type in BUILDING_TYPES {
            assert_eq!(
                BuildingType::from_wire_code(building_type.wire_code()),
                Some(building_type)
            );
        }
    }

    #[test]
    fn corruption_safe_classes_match_placement_rules() {
        assert!(BuildingType::PurificationBeacon.corruption_safe());
        assert!(BuildingType::DefenseTurret.corruption_safe());
        assert!(BuildingType::DimensionalStabilizer.corruption_safe());
        assert!(!BuildingType::Processor.corruption_safe());
    }

    #[test]
    fn assignment_blocked_classes_are_tagged() {
        for blocked in [
            BuildingType::Conveyor,
            BuildingType::ConveyorMk3,
            BuildingType::ContainmentTrap,
            BuildingType::SubmissionTerminal,
        ] {
            assert!(blocked.tags().contains(BuildingTags::NO_ASSIGN));
        }
        assert!(!BuildingType::Processor
            .tags()
            .contains(BuildingTags::NO_ASSIGN));
    }
}
