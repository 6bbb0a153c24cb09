//! Tile-level world description and seeded terrain generation.
//!
//! Terrain is immutable after generation. Deposits are drawn down by
//! extractor kernels through the spatial store; altered items are immutable
//! tile modifiers copied onto buildings at placement.

use std::collections::HashMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::geom::{TileKey, FACE_COUNT};
use crate::items::ItemKind;

#[repr(u8)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Terrain {
    Grassland = 0,
    Desert = 1,
    Tundra = 2,
    Forest = 3,
    Volcanic = 4,
}

/// Immutable tile modifier altering the behavior of whatever is built on
/// top of it.
#[repr(u8)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum AlteredItem {
    Overclock = 0,
    Duplication = 1,
    PurifiedSmelting = 2,
    TrapRadius = 3,
    TeleportOutput = 4,
}

/// A finite raw-resource pocket under a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub kind: ItemKind,
    pub amount: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    pub terrain: Terrain,
    pub deposit: Option<Deposit>,
    pub altered: Option<AlteredItem>,
}

impl Tile {
    pub fn has_resource(&self) -> bool {
        self.deposit.is_some()
    }
}

impl Default for Tile {
    fn default() -> Self {
        Self {
            terrain: Terrain::Grassland,
            deposit: None,
            altered: None,
        }
    }
}

fn ring_palette(ring: u16) -> &'static [Terrain] {
    match ring {
        0 | 5 => &[Terrain::Tundra, Terrain::Tundra, Terrain::Forest],
        1 | 4 => &[Terrain::Grassland, Terrain::Forest, Terrain::Tundra],
        _ => &[Terrain::Grassland, Terrain::Desert, Terrain::Volcanic],
    }
}

fn deposit_kinds(terrain: Terrain) -> &'static [ItemKind] {
    match terrain {
        Terrain::Volcanic => &[
            ItemKind::Stone,
            ItemKind::IronOre,
            ItemKind::Uranium,
            ItemKind::CrystalShard,
        ],
        Terrain::Desert => &[ItemKind::Stone, ItemKind::CopperOre, ItemKind::Coal],
        Terrain::Tundra => &[ItemKind::IronOre, ItemKind::Coal, ItemKind::CrystalShard],
        Terrain::Forest => &[ItemKind::Stone, ItemKind::Coal],
        Terrain::Grassland => &[ItemKind::IronOre, ItemKind::CopperOre, ItemKind::Stone],
    }
}

const ALTERED_KINDS: [AlteredItem; 5] = [
    AlteredItem::Overclock,
    AlteredItem::Duplication,
    AlteredItem::PurifiedSmelting,
    AlteredItem::TrapRadius,
    AlteredItem::TeleportOutput,
];

/// Generate the full face-major tile buffer for a world seed. The same
/// `(seed, n)` pair always yields the same world.
pub fn generate_tiles(seed: u64, n: u16) -> Vec<Tile> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let per_face = usize::from(n) * usize::from(n);
    let mut tiles = Vec::with_capacity(usize::from(FACE_COUNT) * per_face);

    for face in 0..FACE_COUNT {
        let palette = ring_palette(u16::from(face) / 5);
        let base = palette[rng.gen_range(0..palette.len())];
        let patch = palette[rng.gen_range(0..palette.len())];

        let mut deposits: HashMap<(u16, u16), Deposit> = HashMap::new();
        let cluster_count = rng.gen_range(4..=7);
        for _ in 0..cluster_count {
            let kinds = deposit_kinds(base);
            let kind = kinds[rng.gen_range(0..kinds.len())];
            let center_row = rng.gen_range(0..n);
            let center_col = rng.gen_range(0..n);
            let radius = rng.gen_range(1..=2i32);
            for dr in -radius..=radius {
                for dc in -radius..=radius {
                    let row = i32::from(center_row) + dr;
                    let col = i32::from(center_col) + dc;
                    if row < 0 || col < 0 || row >= i32::from(n) || col >= i32::from(n) {
                        continue;
                    }
                    if rng.gen_bool(0.65) {
                        deposits.insert(
                            (row as u16, col as u16),
                            Deposit {
                                kind,
                                amount: rng.gen_range(50..=200),
                            },
                        );
                    }
                }
            }
        }

        let altered_count = rng.gen_range(0..=2);
        let mut altered: HashMap<(u16, u16), AlteredItem> = HashMap::new();
        for _ in 0..altered_count {
            let row = rng.gen_range(0..n);
            let col = rng.gen_range(0..n);
            if deposits.contains_key(&(row, col)) {
                continue;
            }
            let kind = ALTERED_KINDS[rng.gen_range(0..ALTERED_KINDS.len())];
            altered.insert((row, col), kind);
        }

        for row in 0..n {
            for col in 0..n {
                let terrain = if rng.gen_bool(0.15) { patch } else { base };
                tiles.push(Tile {
                    terrain,
                    deposit: deposits.get(&(row, col)).copied(),
                    altered: altered.get(&(row, col)).copied(),
                });
            }
        }
    }

    tiles
}

/// Convenience for tests and the persistence overlay: locate the first
/// tile on a face holding a deposit of `kind`.
pub fn find_deposit(tiles: &[Tile], n: u16, kind: ItemKind) -> Option<TileKey> {
    tiles.iter().enumerate().find_map(|(index, tile)| {
        match tile.deposit {
            Some(deposit) if deposit.kind == kind => Some(TileKey::from_flat_index(index, n)),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_is_deterministic() {
        let a = generate_tiles(42, 16);
        let b = generate_tiles(42, 16);
        assert_eq!(a, b);
    }

    #[test]
    fn different_seeds_differ() {
        let a = generate_tiles(42, 16);
        let b = generate_tiles(43, 16);
        assert_ne!(a, b);
    }

    #[test]
    fn buffer_covers_every_face() {
        let n = 8u16;
        let tiles = generate_tiles(7, n);
        assert_eq!(tiles.len(), 30 * usize::from(n) * usize::from(n));
    }

    #[test]
    fn deposits_only_hold_raw_kinds() {
        for tile in generate_tiles(123, 16) {
            if let Some(deposit) = tile.deposit {
                assert!(deposit.kind.is_raw_resource());
                assert!(deposit.amount > 0);
            }
        }
    }
}
