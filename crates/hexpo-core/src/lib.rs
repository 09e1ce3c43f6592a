//! Hexpo - a turn-based territory conquest engine on a hex grid
//!
//! This crate provides the core game logic for Hexpo, including:
//! - Hex coordinate system and board shapes
//! - Board ownership with conservation checks
//! - Player state, actions and protection windows
//! - Deterministic simultaneous-turn resolution
//! - Turn scheduling and an ordered event log for display layers
//!
//! # Architecture
//!
//! The engine is transport-agnostic. Many viewers submit actions at once
//! through a shared [`Game`]; a single driver calls [`Game::tick`] on a timer.
//! Rendering, chat parsing and persistence live outside this crate and only
//! talk to it through the public operations and the event log.
//!
//! # Modules
//!
//! - [`hex`]: Axial coordinates, offset conversion and board shapes
//! - [`board`]: Tile ownership and invariant checks
//! - [`player`]: Players, colors and standings
//! - [`actions`]: Action types and the per-turn queue
//! - [`resolve`]: Resolution of a sealed turn
//! - [`scheduler`]: Turn phase state machine
//! - [`events`]: Append-only event log
//! - [`game`]: The game instance wiring everything together

pub mod actions;
pub mod board;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod game;
pub mod hex;
pub mod player;
pub mod resolve;
pub mod scheduler;

// Re-export commonly used types
pub use actions::{Action, ActionKind, ActionQueue, TargetRules};
pub use board::{Board, InvariantViolation, Tile};
pub use clock::{format_time_left, Clock, ManualClock, SystemClock, Timestamp};
pub use config::{GameConfig, StrengthWeights};
pub use error::{GameError, ResolutionError};
pub use events::{Event, EventBus, EventCursor, EventKind, TileChange};
pub use game::Game;
pub use hex::{BoardShape, Direction, HexCoord, MAX_BOARD_TILES};
pub use player::{Color, Player, PlayerId, PlayerMetadata, PlayerRegistry, Standing};
pub use resolve::{ActionOutcome, ActionReport, Elimination, ResolutionEngine, ResolutionRules};
pub use scheduler::{Step, StepInfo, TurnScheduler};
