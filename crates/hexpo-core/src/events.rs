//! Ordered event log consumed by external display layers.
//!
//! Events are appended, never retracted, and numbered from 1 with no gaps.
//! A consumer remembers the last sequence number it processed and resumes
//! from there after a disconnect; duplicates are possible, so consumers
//! must ignore sequence numbers they already handled.

use crate::clock::Timestamp;
use crate::hex::HexCoord;
use crate::player::{PlayerId, Standing};
use crate::resolve::ActionReport;
use crate::scheduler::Step;
use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

/// One ownership change on the board
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileChange {
    pub coord: HexCoord,
    pub from: Option<PlayerId>,
    pub to: Option<PlayerId>,
}

/// What happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// A new turn started
    TurnChanged { turn: u32 },

    /// The scheduler entered a new step
    StepChanged {
        turn: u32,
        step: Step,
        deadline: Option<Timestamp>,
    },

    /// A player joined the game
    PlayerJoined { player: PlayerId, name: String },

    /// Outcome of every action processed this turn
    ActionsResolved {
        turn: u32,
        reports: Vec<ActionReport>,
    },

    /// Ownership changes applied by one resolution
    TileChanged { turn: u32, changes: Vec<TileChange> },

    /// A player lost their last tile
    PlayerEliminated {
        turn: u32,
        player: PlayerId,
        by: Option<PlayerId>,
    },

    /// Resolution aborted, the turn will be replayed
    ResolutionFailed { turn: u32, reason: String },

    /// The game ended
    GameOver {
        turn: u32,
        winner: Option<PlayerId>,
        standings: Vec<Standing>,
    },
}

impl EventKind {
    /// Short name of the event kind
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::TurnChanged { .. } => "turn_changed",
            EventKind::StepChanged { .. } => "step_changed",
            EventKind::PlayerJoined { .. } => "player_joined",
            EventKind::ActionsResolved { .. } => "actions_resolved",
            EventKind::TileChanged { .. } => "tile_changed",
            EventKind::PlayerEliminated { .. } => "player_eliminated",
            EventKind::ResolutionFailed { .. } => "resolution_failed",
            EventKind::GameOver { .. } => "game_over",
        }
    }
}

/// An entry of the event log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Position in the log, starting at 1
    pub seq: u64,
    pub emitted_at: Timestamp,
    /// How long a display layer should keep showing it
    pub ttl_ms: Option<u64>,
    pub kind: EventKind,
}

/// Append-only event log
#[derive(Debug, Default)]
pub struct EventBus {
    log: RwLock<Vec<Event>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one event, returning its sequence number
    pub fn publish(&self, kind: EventKind, at: Timestamp, ttl: Option<Duration>) -> u64 {
        self.publish_batch(vec![(kind, ttl)], at)
            .last()
            .copied()
            .unwrap_or_default()
    }

    /// Append events with contiguous sequence numbers, in order.
    ///
    /// No other publish can interleave with the batch.
    pub fn publish_batch(
        &self,
        events: Vec<(EventKind, Option<Duration>)>,
        at: Timestamp,
    ) -> Vec<u64> {
        let mut log = self.log.write().unwrap_or_else(PoisonError::into_inner);
        let mut seqs = Vec::with_capacity(events.len());
        for (kind, ttl) in events {
            let seq = log.len() as u64 + 1;
            log.push(Event {
                seq,
                emitted_at: at,
                ttl_ms: ttl.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
                kind,
            });
            seqs.push(seq);
        }
        seqs
    }

    /// Sequence number of the newest event (0 when empty)
    pub fn last_seq(&self) -> u64 {
        self.log.read().unwrap_or_else(PoisonError::into_inner).len() as u64
    }

    /// Event with the given sequence number
    pub fn get(&self, seq: u64) -> Option<Event> {
        let index = usize::try_from(seq.checked_sub(1)?).ok()?;
        self.log
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index)
            .cloned()
    }

    /// Every event with `seq >= from_seq` currently in the log
    pub fn since(&self, from_seq: u64) -> Vec<Event> {
        let start = usize::try_from(from_seq.saturating_sub(1)).unwrap_or(usize::MAX);
        let log = self.log.read().unwrap_or_else(PoisonError::into_inner);
        log.get(start..).map(<[Event]>::to_vec).unwrap_or_default()
    }

    /// Lazy cursor over the log starting at `from_seq`
    pub fn subscribe(&self, from_seq: u64) -> EventCursor<'_> {
        EventCursor {
            bus: self,
            next: from_seq.max(1),
        }
    }
}

/// Reads the log one event at a time.
///
/// `next()` returns `None` when caught up; calling it again later picks up
/// whatever was published in between.
#[derive(Debug)]
pub struct EventCursor<'a> {
    bus: &'a EventBus,
    next: u64,
}

impl EventCursor<'_> {
    /// Sequence number the cursor will read next
    pub fn position(&self) -> u64 {
        self.next
    }
}

impl Iterator for EventCursor<'_> {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        let event = self.bus.get(self.next)?;
        self.next += 1;
        Some(event)
    }
}
