//! Item vocabulary and the fixed recipe tables consulted by producer
//! kernels.

use serde::{Deserialize, Serialize};

use crate::buildings::BuildingType;

/// Every discrete resource unit that can sit in a buffer or ride a
/// conveyor. The `u16` representation is the wire code used in deltas and
/// persisted blobs.
#[repr(u16)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ItemKind {
    IronOre = 0,
    CopperOre = 1,
    Coal = 2,
    Stone = 3,
    Uranium = 4,
    CrystalShard = 5,
    FerricIngot = 6,
    CupricIngot = 7,
    RefinedCrystal = 8,
    Component = 9,
    Module = 10,
    Fabricate = 11,
    ExoticMatter = 12,
    EnrichedFuel = 13,
    ParanaturalCore = 14,
    BoardSeal = 15,
    HissResidue = 16,
}

impl ItemKind {
    pub fn wire_code(self) -> u16 {
        self as u16
    }

    pub fn from_wire_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(Self::IronOre),
            1 => Some(Self::CopperOre),
            2 => Some(Self::Coal),
            3 => Some(Self::Stone),
            4 => Some(Self::Uranium),
            5 => Some(Self::CrystalShard),
            6 => Some(Self::FerricIngot),
            7 => Some(Self::CupricIngot),
            8 => Some(Self::RefinedCrystal),
            9 => Some(Self::Component),
            10 => Some(Self::Module),
            11 => Some(Self::Fabricate),
            12 => Some(Self::ExoticMatter),
            13 => Some(Self::EnrichedFuel),
            14 => Some(Self::ParanaturalCore),
            15 => Some(Self::BoardSeal),
            16 => Some(Self::HissResidue),
            _ => None,
        }
    }

    /// Burn duration in ticks for fuel kinds accepted by the Bio Generator.
    pub fn burn_ticks(self) -> Option<u32> {
        match self {
            Self::Coal => Some(60),
            Self::EnrichedFuel => Some(240),
            _ => None,
        }
    }

    pub fn is_fuel(self) -> bool {
        self.burn_ticks().is_some()
    }

    /// Raw kinds seeded into tile deposits at world generation.
    pub fn is_raw_resource(self) -> bool {
        matches!(
            self,
            Self::IronOre
                | Self::CopperOre
                | Self::Coal
                | Self::Stone
                | Self::Uranium
                | Self::CrystalShard
        )
    }
}

/// One production cycle: `inputs` maps slot order to accepted kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recipe {
    pub inputs: &'static [ItemKind],
    pub output: ItemKind,
    pub output_count: u32,
    pub rate: u32,
}

/// Recipe for a single-input producer keyed by what landed in its buffer.
/// Multi-slot producers have exactly one recipe; the Processor picks per
/// input kind.
pub fn recipe_for(building: BuildingType, input: ItemKind) -> Option<&'static Recipe> {
    match building {
        BuildingType::Distiller => match input {
            ItemKind::CrystalShard => Some(&DISTILLER),
            _ => None,
        },
        BuildingType::Processor => match input {
            ItemKind::IronOre => Some(&PROCESSOR_FERRIC),
            ItemKind::CopperOre => Some(&PROCESSOR_CUPRIC),
            _ => None,
        },
        _ => fixed_recipe(building),
    }
}

/// The single recipe of a multi-slot producer, or `None` for classes that
/// have no recipe table.
pub fn fixed_recipe(building: BuildingType) -> Option<&'static Recipe> {
    match building {
        BuildingType::Assembler => Some(&ASSEMBLER),
        BuildingType::AdvancedAssembler => Some(&ADVANCED_ASSEMBLER),
        BuildingType::FabricationPlant => Some(&FABRICATION_PLANT),
        BuildingType::ParticleCollider => Some(&PARTICLE_COLLIDER),
        BuildingType::NuclearRefinery => Some(&NUCLEAR_REFINERY),
        BuildingType::ParanaturalSynthesizer => Some(&PARANATURAL_SYNTHESIZER),
        BuildingType::BoardInterface => Some(&BOARD_INTERFACE),
        _ => None,
    }
}

static DISTILLER: Recipe = Recipe {
    inputs: &[ItemKind::CrystalShard],
    output: ItemKind::RefinedCrystal,
    output_count: 1,
    rate: 12,
};

static PROCESSOR_FERRIC: Recipe = Recipe {
    inputs: &[ItemKind::IronOre],
    output: ItemKind::FerricIngot,
    output_count: 1,
    rate: 8,
};

static PROCESSOR_CUPRIC: Recipe = Recipe {
    inputs: &[ItemKind::CopperOre],
    output: ItemKind::CupricIngot,
    output_count: 1,
    rate: 8,
};

static ASSEMBLER: Recipe = Recipe {
    inputs: &[ItemKind::FerricIngot, ItemKind::CupricIngot],
    output: ItemKind::Component,
    output_count: 1,
    rate: 15,
};

static ADVANCED_ASSEMBLER: Recipe = Recipe {
    inputs: &[ItemKind::Component, ItemKind::RefinedCrystal],
    output: ItemKind::Module,
    output_count: 1,
    rate: 20,
};

static FABRICATION_PLANT: Recipe = Recipe {
    inputs: &[ItemKind::Module, ItemKind::FerricIngot, ItemKind::Coal],
    output: ItemKind::Fabricate,
    output_count: 1,
    rate: 25,
};

static PARTICLE_COLLIDER: Recipe = Recipe {
    inputs: &[ItemKind::RefinedCrystal, ItemKind::Uranium],
    output: ItemKind::ExoticMatter,
    output_count: 2,
    rate: 40,
};

static NUCLEAR_REFINERY: Recipe = Recipe {
    inputs: &[ItemKind::Uranium, ItemKind::Coal],
    output: ItemKind::EnrichedFuel,
    output_count: 1,
    rate: 30,
};

static PARANATURAL_SYNTHESIZER: Recipe = Recipe {
    inputs: &[ItemKind::ExoticMatter, ItemKind::HissResidue],
    output: ItemKind::ParanaturalCore,
    output_count: 1,
    rate: 50,
};

static BOARD_INTERFACE: Recipe = Recipe {
    inputs: &[
        ItemKind::ParanaturalCore,
        ItemKind::Module,
        ItemKind::Fabricate,
    ],
    output: ItemKind::BoardSeal,
    output_count: 1,
    rate: 60,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes_round_trip() {
        for code in 0..32u16 {
            if let Some(kind) = ItemKind::from_wire_code(code) {
                assert_eq!(kind.wire_code(), code);
            }
        }
        assert_eq!(ItemKind::from_wire_code(999), None);
    }

    #[test]
    fn processor_routes_by_input_kind() {
        let ferric = recipe_for(BuildingType::Processor, ItemKind::IronOre).unwrap();
        assert_eq!(ferric.output, ItemKind::FerricIngot);
        let cupric = recipe_for(BuildingType::Processor, ItemKind::CopperOre).unwrap();
        assert_eq!(cupric.output, ItemKind::CupricIngot);
        assert!(recipe_for(BuildingType::Processor, ItemKind::Coal).is_none());
    }

    #[test]
    fn fuels_have_burn_durations() {
        assert_eq!(ItemKind::Coal.burn_ticks(), Some(60));
        assert_eq!(ItemKind::EnrichedFuel.burn_ticks(), Some(240));
        assert_eq!(ItemKind::IronOre.burn_ticks(), None);
    }

    #[test]
    fn collider_is_multi_output() {
        let recipe = fixed_recipe(BuildingType::ParticleCollider).unwrap();
        assert_eq!(recipe.output_count, 2);
        assert_eq!(recipe.inputs.len(), 2);
    }
}
