//! Per-building-class tick kernels for the production phase.
//!
//! Each kernel is a pure function from the building (plus a read-only tile
//! context) to its next state; cross-building effects are returned as
//! [`KernelEffect`] values and applied by the schedule, never performed
//! in-place. Item movement is not handled here; that is the push
//! resolver's job.

use rand::{rngs::SmallRng, Rng};

use crate::buildings::{
    Building, BuildingState, PlayerId, SHADOW_PANEL_MAX_OUTPUT,
};
use crate::geom::TileKey;
use crate::items::{fixed_recipe, recipe_for, ItemKind, Recipe};
use crate::scalar::Scalar;
use crate::terrain::{AlteredItem, Tile};

/// Read-only context handed to a kernel for one building on one tick.
#[derive(Debug, Clone, Copy)]
pub struct KernelInput<'a> {
    pub key: TileKey,
    pub tile: &'a Tile,
    /// Ticks per cycle after the full rate pipeline.
    pub effective_rate: u32,
    /// Probability a completed cycle skips input consumption.
    pub eff_skip: Scalar,
    /// Probability a completed cycle doubles its yield.
    pub out_double: Scalar,
    /// Current face illumination (Shadow Panel).
    pub illumination: Scalar,
    /// A powered Lamp sits within Chebyshev 3 (Shadow Panel).
    pub lamp_nearby: bool,
}

/// Side effect requested by a kernel, applied by the schedule after the
/// new state is written back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelEffect {
    None,
    /// Extractor consumed one unit of the tile deposit.
    DepleteResource,
    /// A terminal consumed its input buffer into a submission event.
    Submission {
        player: Option<PlayerId>,
        item: ItemKind,
        trade: bool,
    },
}

/// Roll a fixed-point probability in `[0, 1]`.
fn roll(rng: &mut SmallRng, chance: Scalar) -> bool {
    chance > Scalar::zero() && rng.gen_range(0..Scalar::SCALE) < chance.raw()
}

/// Output count for one completed cycle: recipe count, doubled by a
/// Thermal-Anomaly tile, doubled again on an output-boost roll.
fn cycle_yield(
    recipe_count: u32,
    altered: Option<AlteredItem>,
    out_double: Scalar,
    rng: &mut SmallRng,
) -> u32 {
    let mut count = recipe_count;
    if altered == Some(AlteredItem::PurifiedSmelting) {
        count *= 2;
    }
    if roll(rng, out_double) {
        count *= 2;
    }
    count
}

/// Advance one building through the production phase. Returns the next
/// state and any cross-store effect.
pub fn building_tick(
    building: &Building,
    input: &KernelInput<'_>,
    rng: &mut SmallRng,
) -> (Building, KernelEffect) {
    if !building.is_built() {
        return (building.clone(), KernelEffect::None);
    }
    let mut next = building.clone();
    let effect = match &mut next.state {
        BuildingState::Extractor {
            output_buffer,
            output_remaining,
            progress,
            ..
        } => {
            if !building.powered_user {
                KernelEffect::None
            } else {
                extractor_tick(
                    input,
                    building.altered,
                    output_buffer,
                    output_remaining,
                    progress,
                    rng,
                )
            }
        }
        BuildingState::ProducerSingle {
            input_buffer,
            output_buffer,
            output_remaining,
            progress,
            ..
        } => {
            if !building.powered_user {
                KernelEffect::None
            } else {
                let recipe =
                    input_buffer.and_then(|item| recipe_for(building.building_type, item));
                single_producer_tick(
                    input,
                    building.altered,
                    recipe,
                    input_buffer,
                    output_buffer,
                    output_remaining,
                    progress,
                    rng,
                )
            }
        }
        BuildingState::ProducerDual {
            input_a,
            input_b,
            output_buffer,
            output_remaining,
            progress,
            ..
        } => {
            if !building.powered_user {
                KernelEffect::None
            } else if let Some(recipe) = fixed_recipe(building.building_type) {
                let mut slots = [input_a, input_b];
                multi_producer_tick(
                    input,
                    building.altered,
                    recipe,
                    &mut slots,
                    output_buffer,
                    output_remaining,
                    progress,
                    rng,
                )
            } else {
                KernelEffect::None
            }
        }
        BuildingState::ProducerTriple {
            input_a,
            input_b,
            input_c,
            output_buffer,
            output_remaining,
            progress,
            ..
        } => {
            if !building.powered_user {
                KernelEffect::None
            } else if let Some(recipe) = fixed_recipe(building.building_type) {
                let mut slots = [input_a, input_b, input_c];
                multi_producer_tick(
                    input,
                    building.altered,
                    recipe,
                    &mut slots,
                    output_buffer,
                    output_remaining,
                    progress,
                    rng,
                )
            } else {
                KernelEffect::None
            }
        }
        BuildingState::BioGenerator {
            input_buffer,
            fuel_remaining,
            producing,
        } => {
            if *fuel_remaining > 0 {
                *fuel_remaining -= 1;
            }
            if *fuel_remaining == 0 {
                if let Some(burn) = input_buffer.and_then(ItemKind::burn_ticks) {
                    *input_buffer = None;
                    *fuel_remaining = burn;
                }
            }
            *producing = *fuel_remaining > 0 && building.powered_user;
            KernelEffect::None
        }
        BuildingState::ShadowPanel { power_output } => {
            *power_output = if building.powered_user && !input.lamp_nearby {
                shadow_output(input.illumination)
            } else {
                Scalar::zero()
            };
            KernelEffect::None
        }
        BuildingState::SubmissionTerminal {
            input_buffer,
            last_submitted,
        } => match input_buffer.take() {
            Some(item) => {
                *last_submitted = Some(item);
                KernelEffect::Submission {
                    player: building.owner,
                    item,
                    trade: false,
                }
            }
            None => KernelEffect::None,
        },
        BuildingState::TradeTerminal {
            input_buffer,
            last_submitted,
        } => match input_buffer.take() {
            Some(item) => {
                *last_submitted = Some(item);
                KernelEffect::Submission {
                    player: building.owner,
                    item,
                    trade: true,
                }
            }
            None => KernelEffect::None,
        },
        _ => KernelEffect::None,
    };
    (next, effect)
}

fn extractor_tick(
    input: &KernelInput<'_>,
    altered: Option<AlteredItem>,
    output_buffer: &mut Option<ItemKind>,
    output_remaining: &mut u32,
    progress: &mut u32,
    rng: &mut SmallRng,
) -> KernelEffect {
    // The stash drains through the push resolver: the output slot stays
    // occupied until `output_remaining` reaches zero, so a non-empty slot
    // is the only back-pressure condition.
    if output_buffer.is_some() {
        return KernelEffect::None;
    }
    let Some(deposit) = input.tile.deposit else {
        return KernelEffect::None;
    };
    *progress += 1;
    if *progress < input.effective_rate {
        return KernelEffect::None;
    }
    *progress = 0;
    let count = cycle_yield(1, altered, input.out_double, rng);
    *output_buffer = Some(deposit.kind);
    *output_remaining += count - 1;
    if roll(rng, input.eff_skip) {
        KernelEffect::None
    } else {
        KernelEffect::DepleteResource
    }
}

#[allow(clippy::too_many_arguments)]
fn single_producer_tick(
    input: &KernelInput<'_>,
    altered: Option<AlteredItem>,
    recipe: Option<&'static Recipe>,
    input_buffer: &mut Option<ItemKind>,
    output_buffer: &mut Option<ItemKind>,
    output_remaining: &mut u32,
    progress: &mut u32,
    rng: &mut SmallRng,
) -> KernelEffect {
    if output_buffer.is_some() {
        return KernelEffect::None;
    }
    let Some(recipe) = recipe else {
        return KernelEffect::None;
    };
    *progress += 1;
    if *progress < input.effective_rate {
        return KernelEffect::None;
    }
    *progress = 0;
    if !roll(rng, input.eff_skip) {
        *input_buffer = None;
    }
    let count = cycle_yield(recipe.output_count, altered, input.out_double, rng);
    *output_buffer = Some(recipe.output);
    *output_remaining += count - 1;
    KernelEffect::None
}

#[allow(clippy::too_many_arguments)]
fn multi_producer_tick(
    input: &KernelInput<'_>,
    altered: Option<AlteredItem>,
    recipe: &'static Recipe,
    slots: &mut [&mut u32],
    output_buffer: &mut Option<ItemKind>,
    output_remaining: &mut u32,
    progress: &mut u32,
    rng: &mut SmallRng,
) -> KernelEffect {
    if output_buffer.is_some() {
        return KernelEffect::None;
    }
    if slots.iter().any(|slot| **slot == 0) {
        return KernelEffect::None;
    }
    *progress += 1;
    if *progress < input.effective_rate {
        return KernelEffect::None;
    }
    *progress = 0;
    if !roll(rng, input.eff_skip) {
        for slot in slots.iter_mut() {
            **slot -= 1;
        }
    }
    let count = cycle_yield(recipe.output_count, altered, input.out_double, rng);
    *output_buffer = Some(recipe.output);
    *output_remaining += count - 1;
    KernelEffect::None
}

/// Shadow Panel output curve: full output in darkness, fading linearly to
/// zero as face illumination rises.
fn shadow_output(illumination: Scalar) -> Scalar {
    let low = Scalar::from_f32(0.15);
    let high = Scalar::from_f32(0.5);
    let max = Scalar::from_u32(SHADOW_PANEL_MAX_OUTPUT);
    if illumination <= low {
        max
    } else if illumination >= high {
        Scalar::zero()
    } else {
        max * ((high - illumination) / (high - low))
    }
}

/// Advance phase for buffered conveyors, run after production kernels and
/// before push resolution: items shift one slot toward the front.
pub fn conveyor_advance(state: &BuildingState) -> Option<BuildingState> {
    match state {
        BuildingState::ConveyorMk2 {
            item: None,
            buffer: Some(buffered),
        } => Some(BuildingState::ConveyorMk2 {
            item: Some(*buffered),
            buffer: None,
        }),
        BuildingState::ConveyorMk3 {
            item,
            buffer1,
            buffer2,
        } => {
            let mut front = *item;
            let mut mid = *buffer1;
            let mut rear = *buffer2;
            if front.is_none() {
                front = mid.take();
            }
            if mid.is_none() {
                mid = rear.take();
            }
            let next = BuildingState::ConveyorMk3 {
                item: front,
                buffer1: mid,
                buffer2: rear,
            };
            (next != *state).then_some(next)
        }
        _ => None,
    }
}
