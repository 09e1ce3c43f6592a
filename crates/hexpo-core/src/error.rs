//! Error types surfaced by the engine.
//!
//! `GameError` is what callers at the boundary see: a typed rejection with a
//! stable code. `ResolutionError` never leaves the engine as an `Err`; the
//! scheduler turns it into a `resolution_failed` event and retries the turn.

use crate::board::InvariantViolation;
use crate::player::PlayerId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned synchronously by the public engine operations
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum GameError {
    #[error("Player already joined")]
    AlreadyJoined,

    #[error("Game is full")]
    GameFull,

    #[error("Actions are not being collected right now")]
    NotYourTurnPhase,

    #[error("Player cannot play")]
    PlayerIneligible,

    #[error("Illegal target for this action")]
    IllegalTarget,

    #[error("Target is protected")]
    TargetProtected,

    #[error("No actions left this turn")]
    NoActionsLeft,

    #[error("Phase is closed")]
    PhaseClosed,

    #[error("Invalid board: {reason}")]
    InvalidBoard { reason: String },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl GameError {
    /// Stable machine-readable code for external layers
    pub fn code(&self) -> &'static str {
        match self {
            GameError::AlreadyJoined => "already_joined",
            GameError::GameFull => "game_full",
            GameError::NotYourTurnPhase => "not_your_turn_phase",
            GameError::PlayerIneligible => "player_ineligible",
            GameError::IllegalTarget => "illegal_target",
            GameError::TargetProtected => "target_protected",
            GameError::NoActionsLeft => "no_actions_left",
            GameError::PhaseClosed => "phase_closed",
            GameError::InvalidBoard { .. } => "invalid_board",
            GameError::InvalidConfig { .. } => "invalid_config",
        }
    }
}

/// Integrity failures detected while resolving a turn
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("Resolution already ran for turn {0}")]
    AlreadyResolved(u32),

    #[error("Action from unknown player {0}")]
    UnknownPlayer(PlayerId),

    #[error("Action targets a tile outside the board: {0}")]
    OffBoard(crate::hex::HexCoord),

    #[error("Player {0} has no actions left to consume")]
    ActionsUnderflow(PlayerId),

    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
}
