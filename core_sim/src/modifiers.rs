//! Player-scoped and world-scoped modifier state: objects of power,
//! research unlocks, starter kits, the shift cycle, and world events.
//! The rate pipeline that folds all of them into an effective production
//! rate lives here too.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use bevy::prelude::Resource;
use serde::{Deserialize, Serialize};

use crate::buildings::{BuildingTags, BuildingType, PlayerId};
use crate::creatures::{BoostKind, CapturedCreature};
use crate::hashing::StateHasher;
use crate::scalar::Scalar;
use crate::terrain::{AlteredItem, Terrain};

/// Objects of Power: player-scoped modifiers unlocked by progression.
#[repr(u8)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Trinket {
    ProductionSurge = 0,
    EntityCommunion = 1,
    LogisticsMastery = 2,
    AlteredResonance = 3,
}

/// Per-player progression state consulted by placement validation and the
/// rate pipeline. Passed into kernels explicitly, never ambient.
#[derive(Resource, Debug, Clone, Default)]
pub struct PlayerModifiers {
    trinkets: HashMap<PlayerId, BTreeSet<Trinket>>,
    unlocked: HashMap<PlayerId, BTreeSet<BuildingType>>,
    starter_kits: HashMap<PlayerId, BTreeMap<BuildingType, u32>>,
}

impl PlayerModifiers {
    pub fn grant_trinket(&mut self, player: PlayerId, trinket: Trinket) {
        self.trinkets.entry(player).or_default().insert(trinket);
    }

    pub fn has_trinket(&self, player: Option<PlayerId>, trinket: Trinket) -> bool {
        player
            .and_then(|id| self.trinkets.get(&id))
            .is_some_and(|set| set.contains(&trinket))
    }

    pub fn unlock(&mut self, player: PlayerId, building_type: BuildingType) {
        self.unlocked.entry(player).or_default().insert(building_type);
    }

    /// Tier 0 and 1 classes are open to everyone; higher tiers require a
    /// research unlock. Server-side placements carry no owner and bypass
    /// the gate.
    pub fn is_unlocked(&self, player: Option<PlayerId>, building_type: BuildingType) -> bool {
        if building_type.tier() <= 1 {
            return true;
        }
        let Some(player) = player else {
            return true;
        };
        self.unlocked
            .get(&player)
            .is_some_and(|set| set.contains(&building_type))
    }

    pub fn grant_starter_kit(&mut self, player: PlayerId, building_type: BuildingType, count: u32) {
        *self
            .starter_kits
            .entry(player)
            .or_default()
            .entry(building_type)
            .or_insert(0) += count;
    }

    /// Consume one starter-kit credit if the player holds one; a consumed
    /// credit means the building is placed prebuilt, skipping construction.
    pub fn take_starter_kit(
        &mut self,
        player: Option<PlayerId>,
        building_type: BuildingType,
    ) -> bool {
        let Some(player) = player else {
            return false;
        };
        let Some(kits) = self.starter_kits.get_mut(&player) else {
            return false;
        };
        match kits.get_mut(&building_type) {
            Some(count) if *count > 0 => {
                *count -= 1;
                true
            }
            _ => false,
        }
    }
}

/// Rotating shift phases; each phase biases extractor rates per biome.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShiftPhase {
    Dawn = 0,
    Zenith = 1,
    Umbral = 2,
}

pub const SHIFT_PHASE_TICKS: u64 = 3_000;

#[derive(Resource, Debug, Clone)]
pub struct ShiftCycle {
    pub phase: ShiftPhase,
}

impl Default for ShiftCycle {
    fn default() -> Self {
        Self {
            phase: ShiftPhase::Dawn,
        }
    }
}

impl ShiftCycle {
    pub fn phase_for_tick(tick: u64) -> ShiftPhase {
        match (tick / SHIFT_PHASE_TICKS) % 3 {
            0 => ShiftPhase::Dawn,
            1 => ShiftPhase::Zenith,
            _ => ShiftPhase::Umbral,
        }
    }

    /// Extractor rate multiplier for the current phase on a biome. Values
    /// below one speed the cycle up.
    pub fn extractor_modifier(phase: ShiftPhase, terrain: Terrain) -> Scalar {
        let value = match (phase, terrain) {
            (ShiftPhase::Dawn, Terrain::Grassland | Terrain::Forest) => 0.9,
            (ShiftPhase::Dawn, Terrain::Tundra) => 1.1,
            (ShiftPhase::Zenith, Terrain::Desert | Terrain::Volcanic) => 0.85,
            (ShiftPhase::Zenith, Terrain::Tundra) => 1.2,
            (ShiftPhase::Umbral, Terrain::Volcanic) => 0.9,
            (ShiftPhase::Umbral, Terrain::Desert) => 1.15,
            _ => 1.0,
        };
        Scalar::from_f32(value)
    }
}

/// Kinds of timed world events.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorldEventKind {
    ResonanceCascade = 0,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveEvent {
    pub kind: WorldEventKind,
    pub ends_at_tick: u64,
}

/// Currently running world events. Mutated only by the world-event phase.
#[derive(Resource, Debug, Clone, Default)]
pub struct WorldEvents {
    pub active: Vec<ActiveEvent>,
}

impl WorldEvents {
    pub fn is_active(&self, kind: WorldEventKind) -> bool {
        self.active.iter().any(|event| event.kind == kind)
    }

    pub fn start(&mut self, kind: WorldEventKind, ends_at_tick: u64) {
        if !self.is_active(kind) {
            self.active.push(ActiveEvent { kind, ends_at_tick });
        }
    }

    /// Remove expired events, returning the kinds that just ended.
    pub fn expire(&mut self, tick: u64) -> Vec<WorldEventKind> {
        let mut ended = Vec::new();
        self.active.retain(|event| {
            if event.ends_at_tick <= tick {
                ended.push(event.kind);
                false
            } else {
                true
            }
        });
        ended
    }

    pub fn fold_hash(&self, hasher: &mut StateHasher) {
        for event in &self.active {
            hasher.write_u32(event.kind as u32);
            hasher.write_u64(event.ends_at_tick);
        }
    }
}

/// Inputs to the rate pipeline for one building on one tick.
#[derive(Debug, Clone, Copy)]
pub struct RateContext<'a> {
    pub building_type: BuildingType,
    pub base_rate: u32,
    pub altered: Option<AlteredItem>,
    pub owner: Option<PlayerId>,
    pub terrain: Terrain,
    pub assigned: Option<&'a CapturedCreature>,
    pub shift: ShiftPhase,
    /// `Some(ratio)` when the building's network is browning out
    /// (`load / capacity`, above one); `None` when supply covers demand.
    pub brownout: Option<Scalar>,
    /// Whether the building belongs to any power network this resolve
    /// window.
    pub in_network: bool,
}

/// Fold every modifier into the effective ticks-per-cycle for this tick.
/// Multiplicative, floored at one tick.
pub fn effective_rate(ctx: &RateContext<'_>, modifiers: &PlayerModifiers) -> u32 {
    let mut rate = Scalar::from_u32(ctx.base_rate);

    if let Some(creature) = ctx.assigned {
        if creature.creature_type.boost() == BoostKind::Speed {
            let mut factor = Scalar::from_f32(0.5);
            if creature.evolved {
                factor = factor * Scalar::from_f32(0.5);
            }
            if modifiers.has_trinket(ctx.owner, Trinket::EntityCommunion) {
                factor = factor / Scalar::from_f32(1.5);
            }
            rate = rate * factor;
        }
    }

    if ctx.altered == Some(AlteredItem::Overclock) {
        rate = rate * Scalar::from_f32(0.5);
    }

    if modifiers.has_trinket(ctx.owner, Trinket::ProductionSurge) {
        rate = rate * Scalar::from_f32(0.9);
    }

    if ctx.building_type == BuildingType::Extractor {
        rate = rate * ShiftCycle::extractor_modifier(ctx.shift, ctx.terrain);
    }

    if !ctx.in_network && ctx.building_type.tier() > 0 {
        rate = rate * Scalar::from_u32(ctx.building_type.tier() + 1);
    } else if let Some(ratio) = ctx.brownout {
        // Browning-out networks slow every member: ticks-per-cycle scale
        // by load/capacity.
        rate = rate * ratio;
    }

    if ctx
        .building_type
        .tags()
        .contains(BuildingTags::LOGISTICS)
        && modifiers.has_trinket(ctx.owner, Trinket::LogisticsMastery)
    {
        rate = rate * Scalar::from_f32(0.8);
    }

    rate.to_rate()
}

/// Probability that a completed cycle skips input consumption, from an
/// assigned efficiency creature.
pub fn efficiency_skip_chance(
    assigned: Option<&CapturedCreature>,
    owner: Option<PlayerId>,
    modifiers: &PlayerModifiers,
) -> Scalar {
    boost_chance(assigned, owner, modifiers, BoostKind::Efficiency)
}

/// Probability that a completed cycle doubles its yield, from an assigned
/// output creature.
pub fn output_double_chance(
    assigned: Option<&CapturedCreature>,
    owner: Option<PlayerId>,
    modifiers: &PlayerModifiers,
) -> Scalar {
    boost_chance(assigned, owner, modifiers, BoostKind::Output)
}

fn boost_chance(
    assigned: Option<&CapturedCreature>,
    owner: Option<PlayerId>,
    modifiers: &PlayerModifiers,
    kind: BoostKind,
) -> Scalar {
    let Some(creature) = assigned else {
        return Scalar::zero();
    };
    if creature.creature_type.boost() != kind {
        return Scalar::zero();
    }
    let mut chance = creature.creature_type.boost_strength();
    if creature.evolved {
        chance = chance * Scalar::from_u32(2);
    }
    if modifiers.has_trinket(owner, Trinket::EntityCommunion) {
        chance = chance * Scalar::from_f32(1.5);
    }
    chance.clamp(Scalar::zero(), Scalar::one())
}
