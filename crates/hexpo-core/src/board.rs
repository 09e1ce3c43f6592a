//! Game board: the fixed set of hex tiles and who owns each one.
//!
//! This module contains:
//! - `Tile`, a read-only view of one cell and its owner
//! - `Board`, the ownership map with per-player tile counts
//! - Invariant checks run by the resolution engine before committing a turn
//!
//! The tile set is established once from a `BoardShape` and never grows or
//! shrinks. Only ownership changes, and only through `set_owner`, which is
//! crate-private so the resolution engine is its only caller.

use crate::error::GameError;
use crate::hex::{BoardShape, HexCoord};
use crate::player::PlayerId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// A single hex tile on the board
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    /// Position on the hex grid
    pub coord: HexCoord,
    /// Owning player, if claimed
    pub owner: Option<PlayerId>,
}

/// A failed sanity check on board or registry state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invariant violation: {message}")]
pub struct InvariantViolation {
    /// Description of the violated invariant.
    pub message: String,
}

impl InvariantViolation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The territory grid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    /// Every playable tile, ordered by coordinate
    tiles: BTreeMap<HexCoord, Option<PlayerId>>,
    /// Number of tiles owned by each player (players with zero are absent)
    counts: HashMap<PlayerId, usize>,
}

impl Board {
    /// Build an empty board of the given shape.
    ///
    /// Fails with `InvalidBoard` when the shape has no tiles or too many.
    pub fn new(shape: &BoardShape) -> Result<Self, GameError> {
        Self::from_coords(shape.coords()?)
    }

    /// Build an empty board from an explicit tile list (duplicates collapse)
    pub fn from_coords(coords: impl IntoIterator<Item = HexCoord>) -> Result<Self, GameError> {
        let tiles: BTreeMap<HexCoord, Option<PlayerId>> =
            coords.into_iter().map(|coord| (coord, None)).collect();
        if tiles.is_empty() {
            return Err(GameError::InvalidBoard {
                reason: "board has no tiles".to_string(),
            });
        }
        Ok(Self {
            tiles,
            counts: HashMap::new(),
        })
    }

    /// Total number of tiles on the board
    pub fn total_tiles(&self) -> usize {
        self.tiles.len()
    }

    /// Whether the coordinate is part of the board
    pub fn contains(&self, coord: &HexCoord) -> bool {
        self.tiles.contains_key(coord)
    }

    /// Owner of a tile (None if unclaimed or off the board)
    pub fn owner_of(&self, coord: &HexCoord) -> Option<&PlayerId> {
        self.tiles.get(coord).and_then(Option::as_ref)
    }

    /// Get a tile view
    pub fn tile(&self, coord: &HexCoord) -> Option<Tile> {
        self.tiles.get(coord).map(|owner| Tile {
            coord: *coord,
            owner: owner.clone(),
        })
    }

    /// Iterate over all tiles in coordinate order
    pub fn tiles(&self) -> impl Iterator<Item = Tile> + '_ {
        self.tiles.iter().map(|(coord, owner)| Tile {
            coord: *coord,
            owner: owner.clone(),
        })
    }

    /// Neighbors of a tile that are on the board (fewer than 6 at the edges)
    pub fn neighbors(&self, coord: &HexCoord) -> Vec<HexCoord> {
        coord
            .neighbors()
            .into_iter()
            .filter(|neighbor| self.contains(neighbor))
            .collect()
    }

    /// Whether the tile itself or any of its neighbors is owned by `player`
    pub fn is_adjacent_to_player(&self, coord: &HexCoord, player: &PlayerId) -> bool {
        self.owner_of(coord) == Some(player)
            || self
                .neighbors(coord)
                .iter()
                .any(|neighbor| self.owner_of(neighbor) == Some(player))
    }

    /// Number of tiles owned by a player
    pub fn tile_count(&self, player: &PlayerId) -> usize {
        self.counts.get(player).copied().unwrap_or(0)
    }

    /// Number of tiles nobody owns
    pub fn unclaimed_count(&self) -> usize {
        self.tiles.values().filter(|owner| owner.is_none()).count()
    }

    /// Tiles owned by a player, in coordinate order
    pub fn owned_by(&self, player: &PlayerId) -> Vec<HexCoord> {
        self.tiles
            .iter()
            .filter(|(_, owner)| owner.as_ref() == Some(player))
            .map(|(coord, _)| *coord)
            .collect()
    }

    /// Unclaimed tiles, in coordinate order
    pub fn unclaimed(&self) -> Vec<HexCoord> {
        self.tiles
            .iter()
            .filter(|(_, owner)| owner.is_none())
            .map(|(coord, _)| *coord)
            .collect()
    }

    /// Change the owner of a tile, returning the previous owner.
    pub(crate) fn set_owner(
        &mut self,
        coord: HexCoord,
        owner: Option<PlayerId>,
    ) -> Result<Option<PlayerId>, InvariantViolation> {
        let slot = self
            .tiles
            .get_mut(&coord)
            .ok_or_else(|| InvariantViolation::new(format!("tile {coord} is not on the board")))?;
        let previous = std::mem::replace(slot, owner.clone());

        if let Some(prev) = &previous {
            if let Some(count) = self.counts.get_mut(prev) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.counts.remove(prev);
                }
            }
        }
        if let Some(new) = owner {
            *self.counts.entry(new).or_insert(0) += 1;
        }
        Ok(previous)
    }

    /// Check all board invariants.
    ///
    /// Returns a list of violations found, or empty if all invariants hold.
    #[must_use]
    pub fn check_invariants(&self) -> Vec<InvariantViolation> {
        let mut violations = Vec::new();

        let mut recount: HashMap<&PlayerId, usize> = HashMap::new();
        for owner in self.tiles.values().flatten() {
            *recount.entry(owner).or_insert(0) += 1;
        }

        for (player, count) in &recount {
            let cached = self.tile_count(player);
            if cached != *count {
                violations.push(InvariantViolation::new(format!(
                    "player {player} owns {count} tiles but cached count is {cached}"
                )));
            }
        }
        for (player, cached) in &self.counts {
            if !recount.contains_key(player) {
                violations.push(InvariantViolation::new(format!(
                    "player {player} owns no tiles but cached count is {cached}"
                )));
            }
        }

        // Conservation: owned + unclaimed covers the board exactly once
        let owned: usize = recount.values().sum();
        let unclaimed = self.unclaimed_count();
        if owned + unclaimed != self.total_tiles() {
            violations.push(InvariantViolation::new(format!(
                "owned ({owned}) + unclaimed ({unclaimed}) != total ({})",
                self.total_tiles()
            )));
        }

        violations
    }

    /// Fail with the first violated invariant, if any
    pub fn verify(&self) -> Result<(), InvariantViolation> {
        match self.check_invariants().into_iter().next() {
            Some(violation) => Err(violation),
            None => Ok(()),
        }
    }
}
