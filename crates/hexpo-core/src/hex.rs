//! Hex coordinate system using axial coordinates (q, r).
//!
//! This module provides the coordinate types for the shared territory grid:
//! - `HexCoord`: identifies an individual hex tile
//! - `Direction`: the six canonical neighbor offsets
//! - `BoardShape`: the fixed set of tiles a game is played on
//!
//! Axial coordinates make neighbor and distance calculations trivial. Boards
//! described as a rectangle of columns and rows use the "odd-q" offset layout
//! (flat-top hexes, odd columns shoved down) and are converted to axial once,
//! at board construction.

use crate::error::GameError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Largest number of tiles a board shape may describe
pub const MAX_BOARD_TILES: u64 = 1 << 20;

/// Direction of a neighbor relative to a hex (flat-top orientation)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    North,
    NorthEast,
    SouthEast,
    South,
    SouthWest,
    NorthWest,
}

impl Direction {
    /// All directions in clockwise order starting from North
    pub const ALL: [Direction; 6] = [
        Direction::North,
        Direction::NorthEast,
        Direction::SouthEast,
        Direction::South,
        Direction::SouthWest,
        Direction::NorthWest,
    ];

    /// Axial offset (dq, dr) for this direction
    pub const fn offset(self) -> (i32, i32) {
        match self {
            Direction::North => (0, -1),
            Direction::NorthEast => (1, -1),
            Direction::SouthEast => (1, 0),
            Direction::South => (0, 1),
            Direction::SouthWest => (-1, 1),
            Direction::NorthWest => (-1, 0),
        }
    }

    /// The direction pointing the other way
    pub const fn opposite(self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::NorthEast => Direction::SouthWest,
            Direction::SouthEast => Direction::NorthWest,
            Direction::South => Direction::North,
            Direction::SouthWest => Direction::NorthEast,
            Direction::NorthWest => Direction::SouthEast,
        }
    }
}

/// Axial coordinate for hex grid.
///
/// In axial coordinates:
/// - `q` increases going east (one column to the right)
/// - `r` increases going south
/// - The third coordinate `s` (not stored) satisfies: q + r + s = 0
///
/// Ordering is lexicographic on `(q, r)`; resolution relies on it to visit
/// contested tiles in a reproducible order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct HexCoord {
    /// Column (increases going east)
    pub q: i32,
    /// Row (increases going south)
    pub r: i32,
}

impl HexCoord {
    /// Create a new hex coordinate
    pub const fn new(q: i32, r: i32) -> Self {
        Self { q, r }
    }

    /// The implicit third coordinate (s = -q - r)
    pub const fn s(&self) -> i32 {
        -self.q - self.r
    }

    /// The six neighboring hexes in clockwise order starting from North.
    ///
    /// These are unbounded: the board filters out the ones it does not contain.
    pub fn neighbors(&self) -> [HexCoord; 6] {
        Direction::ALL.map(|dir| self.neighbor(dir))
    }

    /// Get the neighbor in a specific direction
    pub fn neighbor(&self, direction: Direction) -> HexCoord {
        let (dq, dr) = direction.offset();
        HexCoord::new(self.q + dq, self.r + dr)
    }

    /// Whether `other` is one of the six neighbors of this hex
    pub fn is_adjacent(&self, other: &HexCoord) -> bool {
        self.distance_to(other) == 1
    }

    /// Distance to another hex (in hex steps)
    pub fn distance_to(&self, other: &HexCoord) -> u32 {
        let dq = (self.q - other.q).unsigned_abs();
        let dr = (self.r - other.r).unsigned_abs();
        let ds = (self.s() - other.s()).unsigned_abs();
        (dq + dr + ds) / 2
    }

    /// Convert from "odd-q" offset coordinates (column, row)
    pub const fn from_offset(col: i32, row: i32) -> Self {
        let q = col;
        let r = row - (col - (col & 1)) / 2;
        Self::new(q, r)
    }

    /// Convert to "odd-q" offset coordinates (column, row)
    pub const fn to_offset(&self) -> (i32, i32) {
        let col = self.q;
        let row = self.r + (self.q - (self.q & 1)) / 2;
        (col, row)
    }

    /// All hexes at exactly `radius` steps from this one, in ring order
    pub fn ring(&self, radius: u32) -> Vec<HexCoord> {
        if radius == 0 {
            return vec![*self];
        }
        let mut results = Vec::with_capacity(6 * radius as usize);
        let mut hex = *self;
        for _ in 0..radius {
            hex = hex.neighbor(Direction::SouthWest);
        }
        // Walking the six sides of the ring, starting from the south-west corner
        for direction in [
            Direction::SouthEast,
            Direction::NorthEast,
            Direction::North,
            Direction::NorthWest,
            Direction::SouthWest,
            Direction::South,
        ] {
            for _ in 0..radius {
                results.push(hex);
                hex = hex.neighbor(direction);
            }
        }
        results
    }

    /// All hexes within `radius` steps of this one, center first
    pub fn spiral(&self, radius: u32) -> Vec<HexCoord> {
        (0..=radius).flat_map(|k| self.ring(k)).collect()
    }
}

impl fmt::Display for HexCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.q, self.r)
    }
}

/// Shape of the playable board, fixed for the lifetime of a game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BoardShape {
    /// Hexagon of the given radius around (0, 0): 3r(r+1)+1 tiles
    Hexagon { radius: u32 },
    /// `cols` x `rows` rectangle in odd-q offset layout
    Rectangle { cols: u32, rows: u32 },
    /// Explicit list of tiles (duplicates collapse)
    Custom { tiles: Vec<HexCoord> },
}

impl Default for BoardShape {
    fn default() -> Self {
        BoardShape::Rectangle { cols: 30, rows: 20 }
    }
}

impl BoardShape {
    /// Number of tiles the shape describes, counted without enumerating them
    /// (duplicates of a custom list included)
    pub fn size(&self) -> u64 {
        match self {
            BoardShape::Hexagon { radius } => {
                let r = u64::from(*radius);
                r.saturating_mul(r + 1).saturating_mul(3).saturating_add(1)
            }
            BoardShape::Rectangle { cols, rows } => u64::from(*cols) * u64::from(*rows),
            BoardShape::Custom { tiles } => u64::try_from(tiles.len()).unwrap_or(u64::MAX),
        }
    }

    /// Enumerate the tiles of this shape, ordered and deduplicated.
    ///
    /// Fails with `InvalidBoard` when the shape exceeds `MAX_BOARD_TILES`.
    pub fn coords(&self) -> Result<BTreeSet<HexCoord>, GameError> {
        let size = self.size();
        if size > MAX_BOARD_TILES {
            return Err(GameError::InvalidBoard {
                reason: format!("board has {size} tiles, the limit is {MAX_BOARD_TILES}"),
            });
        }
        let coords = match self {
            BoardShape::Hexagon { radius } => {
                HexCoord::default().spiral(*radius).into_iter().collect()
            }
            BoardShape::Rectangle { cols, rows } => {
                if size == 0 {
                    return Ok(BTreeSet::new());
                }
                let (cols, rows) = (side(*cols)?, side(*rows)?);
                (0..cols)
                    .flat_map(|col| (0..rows).map(move |row| HexCoord::from_offset(col, row)))
                    .collect()
            }
            BoardShape::Custom { tiles } => tiles.iter().copied().collect(),
        };
        Ok(coords)
    }
}

fn side(len: u32) -> Result<i32, GameError> {
    i32::try_from(len).map_err(|_| GameError::InvalidBoard {
        reason: format!("board side of {len} tiles is too long"),
    })
}
