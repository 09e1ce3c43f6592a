//! WebSocket protocol messages for Hexpo viewers and display layers.

use hexpo_core::{Action, ActionKind, Event, HexCoord, Player, Standing, StepInfo, Tile};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientMessage {
    /// Join the game as `player_id` and bind this connection to it
    Join { player_id: String, name: String },

    /// Submit (or replace) this turn's action
    Submit { target: HexCoord, kind: ActionKind },

    /// Request the committed board
    Snapshot,

    /// Request the current turn and step
    CurrentStep,

    /// Stream events starting at `from_seq` (inclusive)
    Subscribe { from_seq: u64 },

    /// Request the leaderboard
    Standings,

    /// Ping for keepalive
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    /// Welcome message with the connection ID
    Welcome { connection_id: Uuid },

    /// Joined the game
    Joined { player: Player },

    /// Action queued for the current turn
    Accepted { action: Action },

    /// Request refused; `code` is stable for programmatic handling
    Rejected { code: String, message: String },

    /// Committed board
    Snapshot { turn: u32, tiles: Vec<Tile> },

    /// Current step, with a display countdown
    Step {
        info: StepInfo,
        time_left: Option<String>,
    },

    /// One entry of the event log
    Event { event: Event },

    /// Leaderboard
    Standings { standings: Vec<Standing> },

    /// Malformed request
    Error { message: String },

    /// Pong response
    Pong,
}
