//! Player actions and the per-turn action queue.
//!
//! This module defines the three actions a player can take and the queue
//! that collects them during the collection phase. The queue keeps at most
//! one pending action per player: a later submission replaces the earlier
//! one. Submissions from many callers serialize on a single mutex that is
//! only held for the validation and the map insert.

use crate::board::Board;
use crate::clock::Timestamp;
use crate::config::GameConfig;
use crate::error::GameError;
use crate::hex::HexCoord;
use crate::player::{Player, PlayerId, PlayerRegistry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// What a player wants to do with the targeted tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Claim an unclaimed tile next to your territory (or anywhere, for your first tile)
    Grow,
    /// Take a tile from another, unprotected player
    Attack,
    /// Hold one of your own tiles against attacks this turn
    Defend,
}

/// An accepted action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub player: PlayerId,
    pub target: HexCoord,
    pub kind: ActionKind,
    pub submitted_at: Timestamp,
    /// Turn the action was submitted for
    pub turn: u32,
}

/// Board rules an action's target is checked against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetRules {
    /// Growing requires a tile next to the player's territory
    pub grow_requires_adjacency: bool,
    /// Spawn protection no longer shields an owner holding more tiles than this
    pub spawn_protection_max_tiles: Option<usize>,
}

impl From<&GameConfig> for TargetRules {
    fn from(config: &GameConfig) -> Self {
        Self {
            grow_requires_adjacency: config.grow_requires_adjacency,
            spawn_protection_max_tiles: config.spawn_protection_max_tiles,
        }
    }
}

impl Default for TargetRules {
    fn default() -> Self {
        Self::from(&GameConfig::default())
    }
}

/// Check that `kind` may target `target` for `player` given the current state.
///
/// Used on submission and again when the turn is resolved.
pub fn check_target(
    board: &Board,
    turn: u32,
    player: &Player,
    target: &HexCoord,
    kind: ActionKind,
    players: &PlayerRegistry,
    rules: &TargetRules,
) -> Result<(), GameError> {
    if !board.contains(target) {
        return Err(GameError::IllegalTarget);
    }
    let owner = board.owner_of(target);
    let owns_territory = board.tile_count(&player.id) > 0;

    match kind {
        ActionKind::Grow => {
            if owner.is_some() {
                return Err(GameError::IllegalTarget);
            }
            // The first tile can be anywhere
            if owns_territory
                && rules.grow_requires_adjacency
                && !board.is_adjacent_to_player(target, &player.id)
            {
                return Err(GameError::IllegalTarget);
            }
        }
        ActionKind::Attack => {
            let owner = match owner {
                Some(owner) if *owner != player.id => owner,
                _ => return Err(GameError::IllegalTarget),
            };
            if !owns_territory || !board.is_adjacent_to_player(target, &player.id) {
                return Err(GameError::IllegalTarget);
            }
            let tiles = board.tile_count(owner);
            let protected = players.get(owner).is_some_and(|p| {
                p.is_protected_holding(turn, tiles, rules.spawn_protection_max_tiles)
            });
            if protected {
                return Err(GameError::TargetProtected);
            }
        }
        ActionKind::Defend => {
            if owner != Some(&player.id) {
                return Err(GameError::IllegalTarget);
            }
        }
    }
    Ok(())
}

/// Everything a submission is validated against
#[derive(Debug, Clone, Copy)]
pub struct Intake<'a> {
    pub turn: u32,
    pub board: &'a Board,
    pub players: &'a PlayerRegistry,
    pub rules: TargetRules,
}

#[derive(Debug)]
struct QueueState {
    turn: u32,
    sealed: bool,
    pending: BTreeMap<PlayerId, Action>,
}

/// Pending actions of the current turn, at most one per player
#[derive(Debug)]
pub struct ActionQueue {
    state: Mutex<QueueState>,
}

impl ActionQueue {
    /// Create an open, empty queue for `turn`
    pub fn new(turn: u32) -> Self {
        Self {
            state: Mutex::new(QueueState {
                turn,
                sealed: false,
                pending: BTreeMap::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate and store an action, replacing the player's previous one.
    ///
    /// On any error nothing changes.
    pub fn submit(
        &self,
        intake: &Intake<'_>,
        player_id: PlayerId,
        target: HexCoord,
        kind: ActionKind,
        submitted_at: Timestamp,
    ) -> Result<Action, GameError> {
        let player = match intake.players.get(&player_id) {
            Some(player) if !player.eliminated => player,
            _ => return Err(GameError::PlayerIneligible),
        };
        if player.actions_left == 0 {
            return Err(GameError::NoActionsLeft);
        }
        check_target(
            intake.board,
            intake.turn,
            player,
            &target,
            kind,
            intake.players,
            &intake.rules,
        )?;

        let mut state = self.lock();
        if state.sealed || state.turn != intake.turn {
            return Err(GameError::NotYourTurnPhase);
        }
        let action = Action {
            player: player_id.clone(),
            target,
            kind,
            submitted_at,
            turn: intake.turn,
        };
        state.pending.insert(player_id, action.clone());
        Ok(action)
    }

    /// Stop accepting submissions and hand out the accepted actions
    pub fn seal(&self) -> Vec<Action> {
        let mut state = self.lock();
        state.sealed = true;
        state.pending.values().cloned().collect()
    }

    /// Drop all pending actions and reopen for `turn`
    pub fn open(&self, turn: u32) {
        let mut state = self.lock();
        state.turn = turn;
        state.sealed = false;
        state.pending.clear();
    }

    pub fn is_sealed(&self) -> bool {
        self.lock().sealed
    }

    /// Turn the queue currently collects for
    pub fn turn(&self) -> u32 {
        self.lock().turn
    }

    /// Read-only copy of the accepted actions, ordered by player
    pub fn snapshot(&self) -> Vec<Action> {
        self.lock().pending.values().cloned().collect()
    }

    /// The pending action of a player
    pub fn pending_for(&self, player: &PlayerId) -> Option<Action> {
        self.lock().pending.get(player).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }

    /// Whether every player in `eligible` has a pending action (and there is at least one)
    pub fn covers<'a>(&self, mut eligible: impl Iterator<Item = &'a PlayerId>) -> bool {
        let state = self.lock();
        let mut any = false;
        let all = eligible.all(|id| {
            any = true;
            state.pending.contains_key(id)
        });
        any && all
    }
}
