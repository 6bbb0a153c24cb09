//! Sphere geometry primitive: 30 quadrilateral faces, each subdivided into
//! an N×N grid.
//!
//! Faces are arranged in six rings of five. East/west edges wrap within a
//! ring, north/south edges step between rings, and the outermost ring edges
//! are boundaries. Power, traps, turrets, and beacons never cross faces, so
//! the cross-face rules only matter to item pushes and roaming entities.

use serde::{Deserialize, Serialize};

use crate::scalar::Scalar;

pub const FACE_COUNT: u8 = 30;
const FACE_RINGS: u16 = 6;
const FACES_PER_RING: u16 = 5;

/// Ticks for one full sun revolution around the equator.
pub const SUN_CYCLE_TICKS: u64 = 18_000;

/// Identity of one grid cell: face-major, row-major ordering.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TileKey {
    pub face: u8,
    pub row: u16,
    pub col: u16,
}

impl TileKey {
    pub fn new(face: u8, row: u16, col: u16) -> Self {
        Self { face, row, col }
    }

    /// Flat index into a face-major, row-major tile buffer.
    pub fn flat_index(self, n: u16) -> usize {
        let per_face = usize::from(n) * usize::from(n);
        usize::from(self.face) * per_face
            + usize::from(self.row) * usize::from(n)
            + usize::from(self.col)
    }

    pub fn from_flat_index(index: usize, n: u16) -> Self {
        let per_face = usize::from(n) * usize::from(n);
        let face = (index / per_face) as u8;
        let rem = index % per_face;
        Self {
            face,
            row: (rem / usize::from(n)) as u16,
            col: (rem % usize::from(n)) as u16,
        }
    }
}

/// Cardinal direction, also used as building orientation.
#[repr(u8)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Direction {
    North = 0,
    East = 1,
    South = 2,
    West = 3,
}

pub const DIRECTIONS: [Direction; 4] = [
    Direction::North,
    Direction::East,
    Direction::South,
    Direction::West,
];

impl Direction {
    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn from_index(value: u8) -> Option<Self> {
        match value {
            0 => Some(Direction::North),
            1 => Some(Direction::East),
            2 => Some(Direction::South),
            3 => Some(Direction::West),
            _ => None,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::North => Direction::South,
            Direction::East => Direction::West,
            Direction::South => Direction::North,
            Direction::West => Direction::East,
        }
    }

    pub fn left(self) -> Self {
        match self {
            Direction::North => Direction::West,
            Direction::East => Direction::North,
            Direction::South => Direction::East,
            Direction::West => Direction::South,
        }
    }

    pub fn right(self) -> Self {
        self.left().opposite()
    }

    pub fn is_horizontal(self) -> bool {
        matches!(self, Direction::East | Direction::West)
    }
}

/// Result of stepping off a tile: another tile, or an unpaired face edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Neighbor {
    Tile(TileKey),
    Boundary,
}

impl Neighbor {
    pub fn tile(self) -> Option<TileKey> {
        match self {
            Neighbor::Tile(key) => Some(key),
            Neighbor::Boundary => None,
        }
    }
}

fn ring(face: u8) -> u16 {
    u16::from(face) / FACES_PER_RING
}

fn slot(face: u8) -> u16 {
    u16::from(face) % FACES_PER_RING
}

fn face_of(ring: u16, slot: u16) -> u8 {
    (ring * FACES_PER_RING + slot % FACES_PER_RING) as u8
}

/// Step one tile in `dir`. Interior steps stay on the face; edge crossings
/// enter the adjacent face through the matching edge with the position along
/// the shared edge preserved.
pub fn neighbor(key: TileKey, dir: Direction, n: u16) -> Neighbor {
    let TileKey { face, row, col } = key;
    let r = ring(face);
    let s = slot(face);
    match dir {
        Direction::North => {
            if row > 0 {
                Neighbor::Tile(TileKey::new(face, row - 1, col))
            } else if r == 0 {
                Neighbor::Boundary
            } else {
                Neighbor::Tile(TileKey::new(face_of(r - 1, s), n - 1, col))
            }
        }
        Direction::South => {
            if row + 1 < n {
                Neighbor::Tile(TileKey::new(face, row + 1, col))
            } else if r + 1 == FACE_RINGS {
                Neighbor::Boundary
            } else {
                Neighbor::Tile(TileKey::new(face_of(r + 1, s), 0, col))
            }
        }
        Direction::East => {
            if col + 1 < n {
                Neighbor::Tile(TileKey::new(face, row, col + 1))
            } else {
                Neighbor::Tile(TileKey::new(face_of(r, s + 1), row, 0))
            }
        }
        Direction::West => {
            if col > 0 {
                Neighbor::Tile(TileKey::new(face, row, col - 1))
            } else {
                Neighbor::Tile(TileKey::new(
                    face_of(r, s + FACES_PER_RING - 1),
                    row,
                    n - 1,
                ))
            }
        }
    }
}

/// Chebyshev distance between two keys on the same face. Radius-based
/// effects never reach across an edge, so cross-face pairs have no distance.
pub fn chebyshev(a: TileKey, b: TileKey) -> Option<u32> {
    if a.face != b.face {
        return None;
    }
    let dr = u32::from(a.row.abs_diff(b.row));
    let dc = u32::from(a.col.abs_diff(b.col));
    Some(dr.max(dc))
}

/// Same-face tiles within Chebyshev `radius` of `center`, clipped at face
/// edges, in row-major order. Includes the center itself.
pub fn face_disc(center: TileKey, radius: u16, n: u16) -> impl Iterator<Item = TileKey> {
    let row_lo = center.row.saturating_sub(radius);
    let row_hi = (center.row + radius).min(n - 1);
    let col_lo = center.col.saturating_sub(radius);
    let col_hi = (center.col + radius).min(n - 1);
    let face = center.face;
    (row_lo..=row_hi)
        .flat_map(move |row| (col_lo..=col_hi).map(move |col| TileKey::new(face, row, col)))
}

/// Outward unit normal of a face, from its ring latitude and staggered
/// ring longitude.
pub fn face_normal(face: u8) -> [f32; 3] {
    let r = ring(face) as f32;
    let s = slot(face) as f32;
    let lat = (75.0 - 30.0 * r).to_radians();
    let lon = (s * 72.0 + r * 36.0).to_radians();
    [
        lat.cos() * lon.cos(),
        lat.cos() * lon.sin(),
        lat.sin(),
    ]
}

/// Sun azimuth in radians for the given tick. The sun circles the equator
/// once per `SUN_CYCLE_TICKS`.
pub fn sun_azimuth(tick: u64) -> f32 {
    let phase = (tick % SUN_CYCLE_TICKS) as f32 / SUN_CYCLE_TICKS as f32;
    phase * std::f32::consts::TAU
}

/// Face illumination in `[0, 1]`: the clipped dot product of the face
/// normal with the current sun direction.
pub fn illumination(face: u8, tick: u64) -> Scalar {
    let az = sun_azimuth(tick);
    let sun = [az.cos(), az.sin(), 0.0];
    let normal = face_normal(face);
    let dot = normal[0] * sun[0] + normal[1] * sun[1] + normal[2] * sun[2];
    Scalar::from_f32(dot.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    const N: u16 = 8;

    #[test]
    fn interior_steps_stay_on_face() {
        let key = TileKey::new(7, 3, 3);
        assert_eq!(
            neighbor(key, Direction::East, N),
            Neighbor::Tile(TileKey::new(7, 3, 4))
        );
        assert_eq!(
            neighbor(key, Direction::North, N),
            Neighbor::Tile(TileKey::new(7, 2, 3))
        );
    }

    #[test]
    fn east_west_wrap_within_ring() {
        let east_edge = TileKey::new(4, 2, N - 1);
        assert_eq!(
            neighbor(east_edge, Direction::East, N),
            Neighbor::Tile(TileKey::new(0, 2, 0))
        );
        let west_edge = TileKey::new(0, 2, 0);
        assert_eq!(
            neighbor(west_edge, Direction::West, N),
            Neighbor::Tile(TileKey::new(4, 2, N - 1))
        );
    }

    #[test]
    fn polar_edges_are_boundaries() {
        assert_eq!(
            neighbor(TileKey::new(2, 0, 3), Direction::North, N),
            Neighbor::Boundary
        );
        assert_eq!(
            neighbor(TileKey::new(27, N - 1, 3), Direction::South, N),
            Neighbor::Boundary
        );
    }

    #[test]
    fn every_crossing_is_symmetric() {
        for face in 0..FACE_COUNT {
            for row in 0..N {
                for col in 0..N {
                    let key = TileKey::new(face, row, col);
                    for dir in DIRECTIONS {
                        if let Neighbor::Tile(next) = neighbor(key, dir, N) {
                            assert_eq!(
                                neighbor(next, dir.opposite(), N),
                                Neighbor::Tile(key),
                                "asymmetric step {key:?} {dir:?} -> {next:?}"
                            );
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn flat_index_round_trips() {
        let key = TileKey::new(29, N - 1, 0);
        assert_eq!(TileKey::from_flat_index(key.flat_index(N), N), key);
    }

    #[test]
    fn chebyshev_requires_shared_face() {
        let a = TileKey::new(1, 0, 0);
        assert_eq!(chebyshev(a, TileKey::new(1, 3, 2)), Some(3));
        assert_eq!(chebyshev(a, TileKey::new(2, 0, 0)), None);
    }

    #[test]
    fn disc_is_clipped_at_edges() {
        let tiles: Vec<_> = face_disc(TileKey::new(0, 0, 0), 2, N).collect();
        assert_eq!(tiles.len(), 9);
        assert!(tiles.iter().all(|t| t.row <= 2 && t.col <= 2));
    }

    #[test]
    fn illumination_is_clipped_to_unit_interval() {
        for face in 0..FACE_COUNT {
            for tick in [0u64, 4_500, 9_000, 13_500] {
                let level = illumination(face, tick);
                assert!(level >= Scalar::zero() && level <= Scalar::one());
            }
        }
    }
}
