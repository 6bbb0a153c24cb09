//! Purpose-seeded RNG construction.
//!
//! Every per-tick random decision draws from a generator reseeded from
//! `(world_seed, tick, purpose)`. No generator state survives between
//! phases, so reordering unrelated subsystems can never shift another
//! subsystem's rolls.

use rand::{rngs::SmallRng, SeedableRng};

use crate::hashing::mix_seed;

/// Purpose nonces, one per randomized subsystem.
pub mod nonce {
    pub const CREATURE_SPAWN: u64 = 0x01;
    pub const CREATURE_MOVE: u64 = 0x02;
    pub const CORRUPTION_SEED: u64 = 0x03;
    pub const CORRUPTION_SPREAD: u64 = 0x04;
    pub const PRODUCTION_BOOST: u64 = 0x05;
    pub const PUSH_EFFECTS: u64 = 0x06;
    pub const WORLD_EVENTS: u64 = 0x07;
}

pub fn purpose_rng(world_seed: u64, tick: u64, purpose: u64) -> SmallRng {
    SmallRng::seed_from_u64(mix_seed(world_seed, tick, purpose))
}
