//! Push resolution: the single pass that moves items between buildings.
//!
//! Runs after the behavior kernels. Intents are generated from a snapshot
//! of the store, grouped by destination, arbitrated with each class's
//! acceptance predicate, and applied against a write buffer that is
//! committed at the end, so every predicate sees start-of-phase state.
//! At most one intent is accepted per destination per tick.

use std::collections::{BTreeMap, HashMap};

use bevy::prelude::Resource;
use rand::{rngs::SmallRng, Rng};

use crate::buildings::{Building, BuildingState, BuildingType, Side};
use crate::config::SimulationConfig;
use crate::creatures::CreatureLedger;
use crate::geom::{neighbor, Direction, Neighbor, TileKey, DIRECTIONS};
use crate::items::{fixed_recipe, ItemKind};
use crate::modifiers::{output_double_chance, PlayerModifiers};
use crate::rng::{nonce, purpose_rng};
use crate::scalar::Scalar;
use crate::store::SpatialStore;
use crate::terrain::AlteredItem;

/// Input-slot accumulation cap for multi-input producers.
const INPUT_SLOT_CAP: u32 = 4;

/// Chance that a Duplication tile refills a just-emptied output slot.
const DUPLICATION_CHANCE: f32 = 0.05;

/// Which slot of the source a push drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceSlot {
    Front,
    Output,
    Vault,
    Horizontal,
    Vertical,
}

/// A proposed `(source, destination, item)` movement for the current tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushIntent {
    pub src: TileKey,
    pub dst: TileKey,
    pub item: ItemKind,
    pub slot: SourceSlot,
    /// Splitter/equalizer side this intent leaves through.
    pub side: Option<Side>,
}

/// A movement that actually happened, kept for client interpolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemMove {
    pub from: TileKey,
    pub to: TileKey,
    pub item: ItemKind,
}

#[derive(Debug, Clone, Default)]
pub struct PushReport {
    pub moves: Vec<ItemMove>,
    /// Sources that pushed from an output slot this tick, kept for the
    /// post-effects pass.
    pub output_pushes: Vec<(TileKey, ItemKind)>,
}

/// Output-slot pushes awaiting the post-effects pass, carried between the
/// push and post-effects systems. Overwritten every tick.
#[derive(Resource, Debug, Clone, Default)]
pub struct PendingPostEffects {
    pub pushes: Vec<(TileKey, ItemKind)>,
}

/// Destination tile for a push leaving `src` toward `dir`. A
/// Teleport-Output tile throws the item one tile further.
fn push_target(
    src: TileKey,
    dir: Direction,
    altered: Option<AlteredItem>,
    n: u16,
) -> Option<TileKey> {
    let first = neighbor(src, dir, n).tile()?;
    if altered == Some(AlteredItem::TeleportOutput) {
        neighbor(first, dir, n).tile()
    } else {
        Some(first)
    }
}

/// Generate this tick's intents in stable source-key order.
pub fn generate_intents(store: &SpatialStore) -> Vec<PushIntent> {
    let n = store.subdivisions();
    let mut intents = Vec::new();
    for src in store.building_keys_sorted() {
        let Some(building) = store.get_building(src) else {
            continue;
        };
        if !building.is_built() {
            continue;
        }
        let dir = building.orientation;
        let altered = building.altered;
        let mut push = |dst: Option<TileKey>, item, slot, side| {
            if let Some(dst) = dst {
                intents.push(PushIntent {
                    src,
                    dst,
                    item,
                    slot,
                    side,
                });
            }
        };
        match &building.state {
            BuildingState::Conveyor { item: Some(item) }
            | BuildingState::ConveyorMk2 {
                item: Some(item), ..
            }
            | BuildingState::ConveyorMk3 {
                item: Some(item), ..
            }
            | BuildingState::Converger { item: Some(item) }
            | BuildingState::SubsurfaceLink {
                item: Some(item), ..
            } => {
                // A link's forward push is how teleported items rejoin the
                // surface line; the underground hop itself happens in the
                // conduit pass.
                push(push_target(src, dir, altered, n), *item, SourceSlot::Front, None);
            }
            BuildingState::Extractor {
                output_buffer: Some(item),
                ..
            }
            | BuildingState::ProducerSingle {
                output_buffer: Some(item),
                ..
            }
            | BuildingState::ProducerDual {
                output_buffer: Some(item),
                ..
            }
            | BuildingState::ProducerTriple {
                output_buffer: Some(item),
                ..
            }
            | BuildingState::DefenseTurret {
                output_buffer: Some(item),
                ..
            } => {
                push(push_target(src, dir, altered, n), *item, SourceSlot::Output, None);
            }
            BuildingState::Distributor {
                item: Some(item),
                next_output,
            } => {
                let out_dir = side_direction(dir, *next_output);
                push(
                    push_target(src, out_dir, altered, n),
                    *item,
                    SourceSlot::Front,
                    Some(*next_output),
                );
            }
            BuildingState::LoadEqualizer {
                item: Some(item),
                last_output,
            } => {
                let side = equalizer_side(store, src, dir, *last_output, n);
                let out_dir = side_direction(dir, side);
                push(
                    push_target(src, out_dir, altered, n),
                    *item,
                    SourceSlot::Front,
                    Some(side),
                );
            }
            BuildingState::TransitInterchange {
                horizontal,
                vertical,
                h_dir,
                v_dir,
            } => {
                if let Some(item) = horizontal {
                    push(
                        push_target(src, *h_dir, altered, n),
                        *item,
                        SourceSlot::Horizontal,
                        None,
                    );
                }
                if let Some(item) = vertical {
                    push(
                        push_target(src, *v_dir, altered, n),
                        *item,
                        SourceSlot::Vertical,
                        None,
                    );
                }
            }
            BuildingState::ContainmentVault {
                item_type: Some(item),
                count,
                ..
            } if *count > 0 => {
                push(push_target(src, dir, altered, n), *item, SourceSlot::Vault, None);
            }
            _ => {}
        }
    }
    intents
}

fn side_direction(orientation: Direction, side: Side) -> Direction {
    match side {
        Side::Left => orientation.left(),
        Side::Right => orientation.right(),
    }
}

/// The equalizer sends toward the side destination with more free entry
/// capacity; ties alternate away from the last used side.
fn equalizer_side(
    store: &SpatialStore,
    src: TileKey,
    orientation: Direction,
    last_output: Side,
    n: u16,
) -> Side {
    let capacity = |side: Side| {
        neighbor(src, side_direction(orientation, side), n)
            .tile()
            .and_then(|key| store.get_building(key))
            .map_or(0, entry_capacity)
    };
    let left = capacity(Side::Left);
    let right = capacity(Side::Right);
    if left > right {
        Side::Left
    } else if right > left {
        Side::Right
    } else {
        last_output.flipped()
    }
}

/// How many more items the building's entry slots could take right now.
fn entry_capacity(building: &Building) -> u32 {
    match &building.state {
        BuildingState::Conveyor { item } => u32::from(item.is_none()),
        BuildingState::ConveyorMk2 { item, buffer } => {
            u32::from(item.is_none()) + u32::from(buffer.is_none())
        }
        BuildingState::ConveyorMk3 {
            item,
            buffer1,
            buffer2,
        } => {
            u32::from(item.is_none())
                + u32::from(buffer1.is_none())
                + u32::from(buffer2.is_none())
        }
        BuildingState::Distributor { item, .. }
        | BuildingState::LoadEqualizer { item, .. }
        | BuildingState::Converger { item }
        | BuildingState::SubsurfaceLink { item, .. } => u32::from(item.is_none()),
        BuildingState::ProducerSingle { input_buffer, .. }
        | BuildingState::SubmissionTerminal { input_buffer, .. }
        | BuildingState::TradeTerminal { input_buffer, .. }
        | BuildingState::BioGenerator { input_buffer, .. } => u32::from(input_buffer.is_none()),
        BuildingState::ContainmentVault {
            count, capacity, ..
        } => capacity.saturating_sub(*count),
        _ => 0,
    }
}

/// Direction from `dst` to `src` when they are adjacent.
fn arrival_side(dst: TileKey, src: TileKey, n: u16) -> Option<Direction> {
    DIRECTIONS
        .into_iter()
        .find(|dir| neighbor(dst, *dir, n) == Neighbor::Tile(src))
}

fn is_rear(dst: TileKey, orientation: Direction, src: TileKey, n: u16) -> bool {
    neighbor(dst, orientation.opposite(), n) == Neighbor::Tile(src)
}

/// The destination's acceptance predicate, evaluated against
/// start-of-phase state.
fn accepts(store: &SpatialStore, intent: &PushIntent, n: u16) -> bool {
    let Some(dst) = store.get_building(intent.dst) else {
        return false;
    };
    if !dst.is_built() {
        // Construction sites take any still-needed item from any side.
        return dst
            .construction
            .as_ref()
            .is_some_and(|site| site.needs(intent.item));
    }
    let orientation = dst.orientation;
    match &dst.state {
        BuildingState::Conveyor { item } => item.is_none(),
        BuildingState::ConveyorMk2 { item, buffer } => item.is_none() || buffer.is_none(),
        BuildingState::ConveyorMk3 {
            item,
            buffer1,
            buffer2,
        } => item.is_none() || buffer1.is_none() || buffer2.is_none(),
        BuildingState::ProducerSingle { input_buffer, .. } => {
            input_buffer.is_none() && is_rear(intent.dst, orientation, intent.src, n)
        }
        BuildingState::ProducerDual { input_a, input_b, .. } => {
            is_rear(intent.dst, orientation, intent.src, n)
                && multi_slot_accepts(
                    dst.building_type,
                    &[*input_a, *input_b],
                    intent.item,
                )
        }
        BuildingState::ProducerTriple {
            input_a,
            input_b,
            input_c,
            ..
        } => {
            is_rear(intent.dst, orientation, intent.src, n)
                && multi_slot_accepts(
                    dst.building_type,
                    &[*input_a, *input_b, *input_c],
                    intent.item,
                )
        }
        BuildingState::Distributor { item, .. } | BuildingState::LoadEqualizer { item, .. } => {
            item.is_none() && is_rear(intent.dst, orientation, intent.src, n)
        }
        BuildingState::Converger { item } => {
            item.is_none()
                && (neighbor(intent.dst, orientation.left(), n) == Neighbor::Tile(intent.src)
                    || neighbor(intent.dst, orientation.right(), n)
                        == Neighbor::Tile(intent.src))
        }
        BuildingState::TransitInterchange {
            horizontal,
            vertical,
            ..
        } => match arrival_side(intent.dst, intent.src, n) {
            Some(dir) if dir.is_horizontal() => horizontal.is_none(),
            Some(_) => vertical.is_none(),
            None => false,
        },
        BuildingState::ContainmentVault {
            item_type,
            count,
            capacity,
        } => {
            is_rear(intent.dst, orientation, intent.src, n)
                && item_type.map_or(true, |kind| kind == intent.item)
                && count < capacity
        }
        BuildingState::SubmissionTerminal { input_buffer, .. }
        | BuildingState::TradeTerminal { input_buffer, .. } => {
            input_buffer.is_none() && is_rear(intent.dst, orientation, intent.src, n)
        }
        BuildingState::SubsurfaceLink { item, .. } => {
            item.is_none() && is_rear(intent.dst, orientation, intent.src, n)
        }
        BuildingState::BioGenerator { input_buffer, .. } => {
            input_buffer.is_none()
                && is_rear(intent.dst, orientation, intent.src, n)
                && intent.item.is_fuel()
        }
        _ => false,
    }
}

/// Does the recipe route `item` to a slot that still has room?
fn multi_slot_accepts(building_type: BuildingType, counts: &[u32], item: ItemKind) -> bool {
    let Some(recipe) = fixed_recipe(building_type) else {
        return false;
    };
    recipe
        .inputs
        .iter()
        .position(|kind| *kind == item)
        .is_some_and(|slot| counts.get(slot).is_some_and(|count| *count < INPUT_SLOT_CAP))
}

/// Run the push phase proper: arbitration and slot mutation. Returns the
/// movements that happened; the duplication/output-boost post-effects run
/// in a later pass, after the conduit hop.
pub fn resolve_push(store: &mut SpatialStore) -> PushReport {
    let n = store.subdivisions();
    let intents = generate_intents(store);

    // Group by destination; generation order keeps each group sorted by
    // source key, which is the authoritative tie-break.
    let mut by_dst: BTreeMap<TileKey, Vec<PushIntent>> = BTreeMap::new();
    for intent in intents {
        by_dst.entry(intent.dst).or_default().push(intent);
    }

    let mut accepted = Vec::new();
    for (_, group) in by_dst {
        if let Some(intent) = group.into_iter().find(|intent| accepts(store, intent, n)) {
            accepted.push(intent);
        }
    }

    // Apply against a buffer so arbitration never observes partial writes.
    let mut buffer: HashMap<TileKey, Building> = HashMap::new();
    let mut report = PushReport::default();
    for intent in &accepted {
        let mut src = buffer.get(&intent.src).cloned().unwrap_or_else(|| {
            store
                .get_building(intent.src)
                .cloned()
                .expect("accepted push from a tile without a building")
        });
        clear_source(&mut src, intent);
        buffer.insert(intent.src, src);

        let mut dst = buffer.get(&intent.dst).cloned().unwrap_or_else(|| {
            store
                .get_building(intent.dst)
                .cloned()
                .expect("accepted push into a tile without a building")
        });
        fill_destination(&mut dst, intent, n);
        buffer.insert(intent.dst, dst);

        report.moves.push(ItemMove {
            from: intent.src,
            to: intent.dst,
            item: intent.item,
        });
        if intent.slot == SourceSlot::Output {
            report.output_pushes.push((intent.src, intent.item));
        }
    }

    for (key, building) in buffer {
        store.put_building(key, building);
    }
    report
}

/// Post-effects pass, run after the conduit hop: Duplication tiles and
/// output-boost creatures may refill an output slot that a push just
/// emptied.
pub fn apply_post_effects(
    store: &mut SpatialStore,
    ledger: &CreatureLedger,
    modifiers: &PlayerModifiers,
    config: &SimulationConfig,
    tick: u64,
    pushes: &[(TileKey, ItemKind)],
) {
    let mut rng = purpose_rng(config.world_seed, tick, nonce::PUSH_EFFECTS);
    for &(key, item) in pushes {
        let Some(building) = store.get_building(key) else {
            continue;
        };
        let output_empty = matches!(
            building.state,
            BuildingState::Extractor {
                output_buffer: None,
                ..
            } | BuildingState::ProducerSingle {
                output_buffer: None,
                ..
            } | BuildingState::ProducerDual {
                output_buffer: None,
                ..
            } | BuildingState::ProducerTriple {
                output_buffer: None,
                ..
            }
        );
        if !output_empty {
            continue;
        }
        let mut refill = building.altered == Some(AlteredItem::Duplication)
            && roll(&mut rng, Scalar::from_f32(DUPLICATION_CHANCE));
        if !refill {
            let chance = output_double_chance(ledger.boost_for(key), building.owner, modifiers);
            refill = roll(&mut rng, chance);
        }
        if refill {
            store.update_building(key, |b| {
                if let BuildingState::Extractor { output_buffer, .. }
                | BuildingState::ProducerSingle { output_buffer, .. }
                | BuildingState::ProducerDual { output_buffer, .. }
                | BuildingState::ProducerTriple { output_buffer, .. } = &mut b.state
                {
                    *output_buffer = Some(item);
                }
            });
        }
    }
}

fn roll(rng: &mut SmallRng, chance: Scalar) -> bool {
    chance > Scalar::zero() && rng.gen_range(0..Scalar::SCALE) < chance.raw()
}

fn clear_source(src: &mut Building, intent: &PushIntent) {
    match (&mut src.state, intent.slot) {
        (BuildingState::Conveyor { item }, SourceSlot::Front)
        | (BuildingState::ConveyorMk2 { item, .. }, SourceSlot::Front)
        | (BuildingState::ConveyorMk3 { item, .. }, SourceSlot::Front)
        | (BuildingState::Converger { item }, SourceSlot::Front)
        | (BuildingState::SubsurfaceLink { item, .. }, SourceSlot::Front) => {
            *item = None;
        }
        (
            BuildingState::Distributor { item, next_output },
            SourceSlot::Front,
        ) => {
            *item = None;
            if let Some(side) = intent.side {
                *next_output = side.flipped();
            }
        }
        (
            BuildingState::LoadEqualizer { item, last_output },
            SourceSlot::Front,
        ) => {
            *item = None;
            if let Some(side) = intent.side {
                *last_output = side;
            }
        }
        (
            BuildingState::Extractor {
                output_buffer,
                output_remaining,
                ..
            },
            SourceSlot::Output,
        )
        | (
            BuildingState::ProducerSingle {
                output_buffer,
                output_remaining,
                ..
            },
            SourceSlot::Output,
        )
        | (
            BuildingState::ProducerDual {
                output_buffer,
                output_remaining,
                ..
            },
            SourceSlot::Output,
        )
        | (
            BuildingState::ProducerTriple {
                output_buffer,
                output_remaining,
                ..
            },
            SourceSlot::Output,
        ) => {
            // The multi-output stash keeps the slot occupied until empty.
            if *output_remaining > 0 {
                *output_remaining -= 1;
            } else {
                *output_buffer = None;
            }
        }
        (BuildingState::DefenseTurret { output_buffer, .. }, SourceSlot::Output) => {
            *output_buffer = None;
        }
        (
            BuildingState::ContainmentVault {
                item_type, count, ..
            },
            SourceSlot::Vault,
        ) => {
            *count = count.saturating_sub(1);
            if *count == 0 {
                *item_type = None;
            }
        }
        (BuildingState::TransitInterchange { horizontal, .. }, SourceSlot::Horizontal) => {
            *horizontal = None;
        }
        (BuildingState::TransitInterchange { vertical, .. }, SourceSlot::Vertical) => {
            *vertical = None;
        }
        _ => {}
    }
}

fn fill_destination(dst: &mut Building, intent: &PushIntent, n: u16) {
    if !dst.is_built() {
        if let Some(site) = dst.construction.as_mut() {
            site.deliver(intent.item);
        }
        return;
    }
    let item = intent.item;
    match &mut dst.state {
        BuildingState::Conveyor { item: slot } => *slot = Some(item),
        BuildingState::ConveyorMk2 {
            item: front,
            buffer,
        } => {
            // FIFO: arrivals take the rearmost empty slot; the advance
            // phase moves them forward.
            if buffer.is_none() {
                *buffer = Some(item);
            } else if front.is_none() {
                *front = Some(item);
            }
        }
        BuildingState::ConveyorMk3 {
            item: front,
            buffer1,
            buffer2,
        } => {
            if buffer2.is_none() {
                *buffer2 = Some(item);
            } else if buffer1.is_none() {
                *buffer1 = Some(item);
            } else if front.is_none() {
                *front = Some(item);
            }
        }
        BuildingState::ProducerSingle { input_buffer, .. }
        | BuildingState::SubmissionTerminal { input_buffer, .. }
        | BuildingState::TradeTerminal { input_buffer, .. }
        | BuildingState::BioGenerator { input_buffer, .. } => {
            *input_buffer = Some(item);
        }
        BuildingState::ProducerDual { input_a, input_b, .. } => {
            route_multi_slot(dst.building_type, &mut [input_a, input_b], item);
        }
        BuildingState::ProducerTriple {
            input_a,
            input_b,
            input_c,
            ..
        } => {
            route_multi_slot(dst.building_type, &mut [input_a, input_b, input_c], item);
        }
        BuildingState::Distributor { item: slot, .. }
        | BuildingState::LoadEqualizer { item: slot, .. }
        | BuildingState::Converger { item: slot }
        | BuildingState::SubsurfaceLink { item: slot, .. } => {
            *slot = Some(item);
        }
        BuildingState::TransitInterchange {
            horizontal,
            vertical,
            h_dir,
            v_dir,
        } => {
            if let Some(arrival) = arrival_side(intent.dst, intent.src, n) {
                // The exit continues straight through the crossing.
                if arrival.is_horizontal() {
                    *horizontal = Some(item);
                    *h_dir = arrival.opposite();
                } else {
                    *vertical = Some(item);
                    *v_dir = arrival.opposite();
                }
            }
        }
        BuildingState::ContainmentVault {
            item_type, count, ..
        } => {
            if item_type.is_none() {
                *item_type = Some(item);
            }
            *count += 1;
        }
        _ => {}
    }
}

fn route_multi_slot(building_type: BuildingType, counts: &mut [&mut u32], item: ItemKind) {
    if let Some(recipe) = fixed_recipe(building_type) {
        if let Some(slot) = recipe.inputs.iter().position(|kind| *kind == item) {
            if let Some(count) = counts.get_mut(slot) {
                **count += 1;
            }
        }
    }
}

/// Conduit teleport pass: items jump from a Subsurface Link to its paired
/// partner when the partner's slot is free. Planned against a snapshot so
/// a moved item never cascades within the same tick.
pub fn conduit_pass(store: &mut SpatialStore) -> Vec<ItemMove> {
    let mut planned: Vec<(TileKey, TileKey, ItemKind)> = Vec::new();
    let mut snapshot: BTreeMap<TileKey, (Option<ItemKind>, Option<TileKey>)> = BTreeMap::new();
    for key in store.building_keys_sorted() {
        if let Some(building) = store.get_building(key) {
            if let BuildingState::SubsurfaceLink { item, linked_to } = building.state {
                if building.is_built() {
                    snapshot.insert(key, (item, linked_to));
                }
            }
        }
    }

    for (key, (item, linked_to)) in &snapshot {
        let Some(item) = item else {
            continue;
        };
        let Some(partner_key) = linked_to else {
            continue;
        };
        let Some((partner_item, partner_back)) = snapshot.get(partner_key) else {
            // One-sided pairing means the store is corrupt; halting beats
            // silently dropping items.
            panic!(
                "subsurface link {key:?} points at {partner_key:?} which is not a paired link"
            );
        };
        assert_eq!(
            *partner_back,
            Some(*key),
            "subsurface pairing is not symmetric at {key:?}"
        );
        if partner_item.is_none() {
            planned.push((*key, *partner_key, *item));
        }
    }

    let mut moves = Vec::new();
    for (from, to, item) in planned {
        store.update_building(from, |b| {
            if let BuildingState::SubsurfaceLink { item, .. } = &mut b.state {
                *item = None;
            }
        });
        store.update_building(to, |b| {
            if let BuildingState::SubsurfaceLink { item: slot, .. } = &mut b.state {
                *slot = Some(item);
            }
        });
        moves.push(ItemMove { from, to, item });
    }
    moves
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terrain::generate_tiles;

    fn harness(n: u16) -> SpatialStore {
        SpatialStore::from_tiles(n, generate_tiles(4, n))
    }

    fn conveyor(orientation: Direction, item: Option<ItemKind>) -> Building {
        let mut building = Building::prebuilt(BuildingType::Conveyor, orientation, None, None);
        building.state = BuildingState::Conveyor { item };
        building
    }

    #[test]
    fn destination_accepts_one_intent_with_stable_tie_break() {
        let mut store = harness(16);
        let target = TileKey::new(0, 5, 5);
        let north_src = TileKey::new(0, 4, 5);
        let west_src = TileKey::new(0, 5, 4);
        store.put_building(target, conveyor(Direction::East, None));
        store.put_building(north_src, conveyor(Direction::South, Some(ItemKind::Coal)));
        store.put_building(west_src, conveyor(Direction::East, Some(ItemKind::Stone)));

        let report = resolve_push(&mut store);
        let into_target: Vec<_> = report
            .moves
            .iter()
            .filter(|m| m.to == target)
            .collect();
        assert_eq!(into_target.len(), 1, "one acceptance per destination");
        // (0,4,5) sorts before (0,5,4): the lower source key wins.
        assert_eq!(into_target[0].from, north_src);
        assert_eq!(into_target[0].item, ItemKind::Coal);
        // The loser keeps its item for the next tick.
        assert!(matches!(
            store.get_building(west_src).unwrap().state,
            BuildingState::Conveyor {
                item: Some(ItemKind::Stone)
            }
        ));
    }

    #[test]
    fn converger_takes_side_entries_only() {
        let mut store = harness(16);
        let converger_key = TileKey::new(0, 5, 5);
        let mut converger =
            Building::prebuilt(BuildingType::Converger, Direction::North, None, None);
        converger.state = BuildingState::Converger { item: None };
        store.put_building(converger_key, converger);
        // Rear feed: rejected. Side feed: accepted.
        store.put_building(
            TileKey::new(0, 6, 5),
            conveyor(Direction::North, Some(ItemKind::Coal)),
        );
        store.put_building(
            TileKey::new(0, 5, 4),
            conveyor(Direction::East, Some(ItemKind::Stone)),
        );

        let report = resolve_push(&mut store);
        let into_converger: Vec<_> = report
            .moves
            .iter()
            .filter(|m| m.to == converger_key)
            .collect();
        assert_eq!(into_converger.len(), 1);
        assert_eq!(into_converger[0].item, ItemKind::Stone);
    }

    #[test]
    fn producers_only_accept_from_behind() {
        let mut store = harness(16);
        let producer_key = TileKey::new(0, 5, 5);
        store.put_building(
            producer_key,
            Building::prebuilt(BuildingType::Processor, Direction::East, None, None),
        );
        // Side feed: the processor faces east, so only (0,5,4) is rear.
        store.put_building(
            TileKey::new(0, 4, 5),
            conveyor(Direction::South, Some(ItemKind::IronOre)),
        );
        let report = resolve_push(&mut store);
        assert!(report.moves.iter().all(|m| m.to != producer_key));

        store.put_building(
            TileKey::new(0, 5, 4),
            conveyor(Direction::East, Some(ItemKind::IronOre)),
        );
        let report = resolve_push(&mut store);
        assert!(report.moves.iter().any(|m| m.to == producer_key));
    }

    #[test]
    fn equalizer_prefers_the_emptier_side() {
        let mut store = harness(16);
        let equalizer_key = TileKey::new(0, 5, 5);
        let mut equalizer =
            Building::prebuilt(BuildingType::LoadEqualizer, Direction::North, None, None);
        equalizer.state = BuildingState::LoadEqualizer {
            item: Some(ItemKind::Coal),
            last_output: Side::Left,
        };
        store.put_building(equalizer_key, equalizer);
        // West side blocked, east side free.
        store.put_building(
            TileKey::new(0, 5, 4),
            conveyor(Direction::West, Some(ItemKind::Stone)),
        );
        store.put_building(TileKey::new(0, 5, 6), conveyor(Direction::East, None));

        let report = resolve_push(&mut store);
        assert!(report
            .moves
            .iter()
            .any(|m| m.from == equalizer_key && m.to == TileKey::new(0, 5, 6)));
    }

    #[test]
    fn teleport_output_throws_one_tile_further() {
        let mut store = harness(16);
        let src = TileKey::new(0, 5, 5);
        let mut source = Building::prebuilt(
            BuildingType::Conveyor,
            Direction::East,
            None,
            Some(crate::terrain::AlteredItem::TeleportOutput),
        );
        source.state = BuildingState::Conveyor {
            item: Some(ItemKind::Coal),
        };
        store.put_building(src, source);
        store.put_building(TileKey::new(0, 5, 6), conveyor(Direction::East, None));
        store.put_building(TileKey::new(0, 5, 7), conveyor(Direction::East, None));

        let report = resolve_push(&mut store);
        assert!(report
            .moves
            .iter()
            .any(|m| m.from == src && m.to == TileKey::new(0, 5, 7)));
    }
}
