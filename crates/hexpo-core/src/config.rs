//! Game configuration.
//!
//! Every field has a default, so a JSON config only needs the keys it
//! overrides. Balance constants that the rules leave open (strength weights,
//! protection windows) live here rather than in code.

use crate::error::GameError;
use crate::hex::BoardShape;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Weights of the effective strength used to settle contested claims.
///
/// `strength = level * level_weight + owned_tiles * tiles_weight`, computed
/// from the state before the turn is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrengthWeights {
    pub level: u32,
    pub tiles: u32,
}

impl Default for StrengthWeights {
    fn default() -> Self {
        Self { level: 1, tiles: 0 }
    }
}

impl StrengthWeights {
    pub fn strength(&self, level: u32, tiles: usize) -> u64 {
        let tiles = u64::try_from(tiles).unwrap_or(u64::MAX);
        u64::from(level)
            .saturating_mul(u64::from(self.level))
            .saturating_add(tiles.saturating_mul(u64::from(self.tiles)))
    }
}

/// Configuration of one game instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Shape of the board
    pub board: BoardShape,
    /// Actions refilled at the start of every collection phase
    pub actions_per_turn: u32,
    pub player_start_level: u32,
    /// Join is refused once this many players joined
    pub max_players: Option<usize>,
    /// The game ends after this turn is broadcast
    pub max_turns: Option<u32>,
    /// "Last player standing" only ends the game once this many players joined
    pub min_players_for_last_standing: usize,
    pub collect_duration_ms: u64,
    pub broadcast_duration_ms: u64,
    /// Turns of protection granted by a successful defend
    pub defend_protection_turns: u32,
    /// Turns of protection granted by a player's first claimed tile
    pub spawn_protection_turns: u32,
    /// Spawn protection ends early once the player owns more tiles than this
    pub spawn_protection_max_tiles: Option<usize>,
    pub strength: StrengthWeights,
    /// Growing requires a tile next to the player's territory
    pub grow_requires_adjacency: bool,
    /// Display time-to-live attached to transient events
    pub event_ttl_ms: Option<u64>,
    /// Seed of the engine RNG
    pub seed: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            board: BoardShape::default(),
            actions_per_turn: 1,
            player_start_level: 1,
            max_players: None,
            max_turns: None,
            min_players_for_last_standing: 2,
            collect_duration_ms: 30_000,
            broadcast_duration_ms: 5_000,
            defend_protection_turns: 1,
            spawn_protection_turns: 2,
            spawn_protection_max_tiles: None,
            strength: StrengthWeights::default(),
            grow_requires_adjacency: true,
            event_ttl_ms: Some(10_000),
            seed: 0,
        }
    }
}

impl GameConfig {
    /// Parse a JSON configuration
    pub fn from_json_str(json: &str) -> Result<Self, GameError> {
        let config: Self = serde_json::from_str(json).map_err(|e| GameError::InvalidConfig {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, GameError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| GameError::InvalidConfig {
            reason: format!("{}: {e}", path.display()),
        })?;
        Self::from_json_str(&json)
    }

    /// Reject configurations a game cannot start with
    pub fn validate(&self) -> Result<(), GameError> {
        if self.board.coords()?.is_empty() {
            return Err(GameError::InvalidBoard {
                reason: "board has no tiles".to_string(),
            });
        }
        if self.collect_duration_ms == 0 {
            return Err(GameError::InvalidConfig {
                reason: "collect_duration_ms must be positive".to_string(),
            });
        }
        if self.broadcast_duration_ms == 0 {
            return Err(GameError::InvalidConfig {
                reason: "broadcast_duration_ms must be positive".to_string(),
            });
        }
        if self.actions_per_turn == 0 {
            return Err(GameError::InvalidConfig {
                reason: "actions_per_turn must be positive".to_string(),
            });
        }
        if self.min_players_for_last_standing == 0 {
            return Err(GameError::InvalidConfig {
                reason: "min_players_for_last_standing must be positive".to_string(),
            });
        }
        if self.max_turns == Some(0) {
            return Err(GameError::InvalidConfig {
                reason: "max_turns must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn collect_duration(&self) -> Duration {
        Duration::from_millis(self.collect_duration_ms)
    }

    pub fn broadcast_duration(&self) -> Duration {
        Duration::from_millis(self.broadcast_duration_ms)
    }

    pub fn event_ttl(&self) -> Option<Duration> {
        self.event_ttl_ms.map(Duration::from_millis)
    }
}
