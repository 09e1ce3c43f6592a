//! Player state and per-turn resources.
//!
//! This module contains:
//! - `PlayerId`, the external identifier of a viewer (e.g. a stream user id)
//! - `Player`, with actions, protection window and elimination record
//! - `PlayerRegistry`, owning every player that ever joined the game
//! - Standings (leaderboard) computation
//!
//! Players are never removed. Elimination only flips a flag so the final
//! standings can still list everyone.

use crate::board::{Board, InvariantViolation};
use crate::error::GameError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Player identifier, provided by the caller.
///
/// Ordering is plain string ordering; resolution uses it as the last tie-breaker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Player color for the external renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Color {
    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }

    /// Get hex color code for rendering
    pub fn hex_code(&self) -> u32 {
        (u32::from(self.red) << 16) | (u32::from(self.green) << 8) | u32::from(self.blue)
    }

    /// `#RRGGBB` form
    pub fn as_hex(&self) -> String {
        format!("#{:06X}", self.hex_code())
    }

    /// A random color
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        Self::new(rng.gen(), rng.gen(), rng.gen())
    }
}

/// Colors handed out in order before falling back to random ones
pub const PALETTE: [Color; 12] = [
    Color::new(0xE7, 0x4C, 0x3C),
    Color::new(0x34, 0x98, 0xDB),
    Color::new(0xE6, 0x7E, 0x22),
    Color::new(0x2E, 0xCC, 0x71),
    Color::new(0x9B, 0x59, 0xB6),
    Color::new(0xF1, 0xC4, 0x0F),
    Color::new(0x1A, 0xBC, 0x9C),
    Color::new(0xEC, 0x40, 0x7A),
    Color::new(0x79, 0x55, 0x48),
    Color::new(0x60, 0x7D, 0x8B),
    Color::new(0xCD, 0xDC, 0x39),
    Color::new(0x00, 0xBC, 0xD4),
];

/// Display metadata supplied on join
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerMetadata {
    /// Display name
    pub name: String,
}

impl PlayerMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A single player's state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    /// Display name
    pub name: String,
    pub color: Color,
    /// Level, an input of the effective strength in contested claims
    pub level: u32,
    /// Actions remaining this turn
    pub actions_left: u32,
    /// Tiles cannot be captured while the current turn is <= this (0 = unprotected)
    pub protected_until_turn: u32,
    /// Same as `protected_until_turn`, granted by the first claim and capped in tiles
    #[serde(default)]
    pub spawn_protected_until_turn: u32,
    pub eliminated: bool,
    /// Turn the player joined on
    pub joined_turn: u32,
    /// Whether the player ever owned a tile (elimination only applies after that)
    pub has_owned_tiles: bool,
    pub eliminated_turn: Option<u32>,
    /// Player who took the last tile
    pub eliminated_by: Option<PlayerId>,
    /// Number of players this one eliminated
    pub kills: u32,
}

impl Player {
    fn new(
        id: PlayerId,
        metadata: PlayerMetadata,
        color: Color,
        level: u32,
        actions: u32,
        turn: u32,
    ) -> Self {
        Self {
            id,
            name: metadata.name,
            color,
            level,
            actions_left: actions,
            protected_until_turn: 0,
            spawn_protected_until_turn: 0,
            eliminated: false,
            joined_turn: turn,
            has_owned_tiles: false,
            eliminated_turn: None,
            eliminated_by: None,
            kills: 0,
        }
    }

    /// Whether this player may submit an action
    pub fn can_play(&self) -> bool {
        self.actions_left > 0 && !self.eliminated
    }

    /// Whether this player's tiles are immune to capture during `turn`
    pub fn is_protected(&self, turn: u32) -> bool {
        covers(self.protected_until_turn, turn) || covers(self.spawn_protected_until_turn, turn)
    }

    /// Like `is_protected`, but spawn protection lapses once the player holds
    /// more than `spawn_max_tiles` tiles
    pub fn is_protected_holding(
        &self,
        turn: u32,
        tiles: usize,
        spawn_max_tiles: Option<usize>,
    ) -> bool {
        let spawn = covers(self.spawn_protected_until_turn, turn)
            && spawn_max_tiles.map_or(true, |max| tiles <= max);
        covers(self.protected_until_turn, turn) || spawn
    }
}

fn covers(until_turn: u32, turn: u32) -> bool {
    until_turn != 0 && until_turn >= turn
}

/// One row of the leaderboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standing {
    /// 1-based rank
    pub rank: usize,
    pub player: PlayerId,
    pub name: String,
    pub tiles: usize,
    pub kills: u32,
    pub eliminated_turn: Option<u32>,
}

/// All players that ever joined the game
#[derive(Debug, Clone)]
pub struct PlayerRegistry {
    players: BTreeMap<PlayerId, Player>,
    /// Refill cap for `actions_left`
    actions_per_turn: u32,
    start_level: u32,
    max_players: Option<usize>,
    rng: StdRng,
}

impl PlayerRegistry {
    /// Create an empty registry
    pub fn new(
        actions_per_turn: u32,
        start_level: u32,
        max_players: Option<usize>,
        seed: u64,
    ) -> Self {
        Self {
            players: BTreeMap::new(),
            actions_per_turn,
            start_level,
            max_players,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// The configured per-turn action cap
    pub fn actions_per_turn(&self) -> u32 {
        self.actions_per_turn
    }

    /// Number of players, eliminated included
    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Get a player by ID
    pub fn get(&self, id: &PlayerId) -> Option<&Player> {
        self.players.get(id)
    }

    fn get_mut(&mut self, id: &PlayerId) -> Result<&mut Player, GameError> {
        self.players.get_mut(id).ok_or(GameError::PlayerIneligible)
    }

    /// Iterate over every player in id order
    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    /// Players that are still in the game
    pub fn alive(&self) -> impl Iterator<Item = &Player> {
        self.players.values().filter(|p| !p.eliminated)
    }

    /// Players allowed to submit an action right now
    pub fn eligible(&self) -> impl Iterator<Item = &Player> {
        self.players.values().filter(|p| p.can_play())
    }

    /// Register a new player with a full action allowance, unprotected.
    pub fn join(
        &mut self,
        id: PlayerId,
        metadata: PlayerMetadata,
        current_turn: u32,
    ) -> Result<&Player, GameError> {
        if self.players.contains_key(&id) {
            return Err(GameError::AlreadyJoined);
        }
        if self.max_players.is_some_and(|max| self.players.len() >= max) {
            return Err(GameError::GameFull);
        }

        let color = self.free_color();
        let player = Player::new(
            id.clone(),
            metadata,
            color,
            self.start_level,
            self.actions_per_turn,
            current_turn,
        );
        Ok(self.players.entry(id).or_insert(player))
    }

    /// First palette color not held by a live player, or a random one
    fn free_color(&mut self) -> Color {
        let taken: Vec<Color> = self.alive().map(|p| p.color).collect();
        match PALETTE.iter().find(|c| !taken.contains(c)) {
            Some(color) => *color,
            None => Color::random(&mut self.rng),
        }
    }

    /// Reset `actions_left` to the per-turn cap
    pub fn refill_actions(&mut self, id: &PlayerId) -> Result<(), GameError> {
        let cap = self.actions_per_turn;
        self.get_mut(id)?.actions_left = cap;
        Ok(())
    }

    /// Refill every live player at the start of a collection phase
    pub fn refill_all(&mut self) {
        let cap = self.actions_per_turn;
        for player in self.players.values_mut().filter(|p| !p.eliminated) {
            player.actions_left = cap;
        }
    }

    /// Spend one action
    pub fn consume_action(&mut self, id: &PlayerId) -> Result<(), GameError> {
        let player = self.get_mut(id)?;
        player.actions_left = player
            .actions_left
            .checked_sub(1)
            .ok_or(GameError::NoActionsLeft)?;
        Ok(())
    }

    /// Set or extend protection; never shortens an existing window
    pub fn apply_protection(&mut self, id: &PlayerId, until_turn: u32) -> Result<(), GameError> {
        let player = self.get_mut(id)?;
        player.protected_until_turn = player.protected_until_turn.max(until_turn);
        Ok(())
    }

    /// Grant first-claim protection; never shortens an existing window
    pub fn apply_spawn_protection(
        &mut self,
        id: &PlayerId,
        until_turn: u32,
    ) -> Result<(), GameError> {
        let player = self.get_mut(id)?;
        player.spawn_protected_until_turn = player.spawn_protected_until_turn.max(until_turn);
        Ok(())
    }

    /// Drop every protection window
    pub fn clear_protection(&mut self, id: &PlayerId) -> Result<(), GameError> {
        let player = self.get_mut(id)?;
        player.protected_until_turn = 0;
        player.spawn_protected_until_turn = 0;
        Ok(())
    }

    /// Change a player's level
    pub fn set_level(&mut self, id: &PlayerId, level: u32) -> Result<(), GameError> {
        self.get_mut(id)?.level = level;
        Ok(())
    }

    /// Remember that the player now owns territory
    pub(crate) fn mark_owned_tiles(&mut self, id: &PlayerId) -> Result<(), GameError> {
        self.get_mut(id)?.has_owned_tiles = true;
        Ok(())
    }

    /// Mark a player as out of the game, crediting the killer if known
    pub fn mark_eliminated(
        &mut self,
        id: &PlayerId,
        turn: u32,
        by: Option<PlayerId>,
    ) -> Result<(), GameError> {
        let player = self.get_mut(id)?;
        if player.eliminated {
            return Ok(());
        }
        player.eliminated = true;
        player.actions_left = 0;
        player.protected_until_turn = 0;
        player.spawn_protected_until_turn = 0;
        player.eliminated_turn = Some(turn);
        player.eliminated_by = by.clone();

        if let Some(killer) = by {
            if let Some(killer) = self.players.get_mut(&killer) {
                killer.kills += 1;
            }
        }
        Ok(())
    }

    /// Check registry invariants against the board.
    #[must_use]
    pub fn check_invariants(&self, board: &Board) -> Vec<InvariantViolation> {
        let mut violations = Vec::new();
        for player in self.players.values() {
            if player.actions_left > self.actions_per_turn {
                violations.push(InvariantViolation::new(format!(
                    "player {} has {} actions, above the cap of {}",
                    player.id, player.actions_left, self.actions_per_turn
                )));
            }
            if player.eliminated && board.tile_count(&player.id) > 0 {
                violations.push(InvariantViolation::new(format!(
                    "eliminated player {} still owns tiles",
                    player.id
                )));
            }
        }
        for tile in board.tiles() {
            if let Some(owner) = tile.owner {
                if !self.players.contains_key(&owner) {
                    violations.push(InvariantViolation::new(format!(
                        "tile {} owned by unknown player {owner}",
                        tile.coord
                    )));
                }
            }
        }
        violations
    }

    /// Leaderboard: most tiles first, then live players, then latest eliminated
    pub fn standings(&self, board: &Board) -> Vec<Standing> {
        let mut rows: Vec<Standing> = self
            .players
            .values()
            .map(|p| Standing {
                rank: 0,
                player: p.id.clone(),
                name: p.name.clone(),
                tiles: board.tile_count(&p.id),
                kills: p.kills,
                eliminated_turn: p.eliminated_turn,
            })
            .collect();

        rows.sort_by(|a, b| {
            b.tiles
                .cmp(&a.tiles)
                .then_with(|| match (a.eliminated_turn, b.eliminated_turn) {
                    (None, None) => std::cmp::Ordering::Equal,
                    (None, Some(_)) => std::cmp::Ordering::Less,
                    (Some(_), None) => std::cmp::Ordering::Greater,
                    (Some(x), Some(y)) => y.cmp(&x),
                })
                .then_with(|| a.player.cmp(&b.player))
        });
        for (idx, row) in rows.iter_mut().enumerate() {
            row.rank = idx + 1;
        }
        rows
    }
}
