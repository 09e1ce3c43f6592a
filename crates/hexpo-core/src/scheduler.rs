//! Turn phase state machine.
//!
//! ```text
//! CollectingActions --deadline/quorum--> Resolving --ok--> BroadcastingResults
//!        ^                                   |                     |
//!        +------------- failed --------------+                     |
//!        +------------------- next turn ---------------------------+
//!                                                                  v
//!                                                               GameOver
//! ```
//!
//! The scheduler only tracks the current step and its deadline. The `Game`
//! decides when to move and does the work of each step.

use crate::clock::{format_time_left, Timestamp};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Phase of the current turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    CollectingActions,
    Resolving,
    BroadcastingResults,
    GameOver,
}

impl Step {
    /// Whether the state machine may go from `self` to `to`
    pub fn can_transition_to(self, to: Step) -> bool {
        matches!(
            (self, to),
            (Step::CollectingActions, Step::Resolving)
                | (Step::Resolving, Step::BroadcastingResults)
                | (Step::Resolving, Step::CollectingActions)
                | (Step::BroadcastingResults, Step::CollectingActions)
                | (Step::BroadcastingResults, Step::GameOver)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Cannot go from {from:?} to {to:?}")]
pub struct TransitionError {
    pub from: Step,
    pub to: Step,
}

/// Read-only view of where the game is
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepInfo {
    pub turn: u32,
    pub step: Step,
    pub started_at: Timestamp,
    /// When the step ends on its own, if it has a timer
    pub deadline: Option<Timestamp>,
}

impl StepInfo {
    /// Time remaining in the step at `now`
    pub fn time_left(&self, now: Timestamp) -> Option<Duration> {
        self.deadline.map(|deadline| now.duration_until(deadline))
    }

    /// Countdown for display, `None` once the time is up or without a timer
    pub fn time_left_display(&self, now: Timestamp) -> Option<String> {
        self.time_left(now).and_then(format_time_left)
    }
}

/// Current turn and step with their timing
#[derive(Debug, Clone)]
pub struct TurnScheduler {
    info: StepInfo,
    collect: Duration,
    broadcast: Duration,
    stopped: bool,
}

impl TurnScheduler {
    /// Start turn 1 in the collection step
    pub fn new(now: Timestamp, collect: Duration, broadcast: Duration) -> Self {
        Self {
            info: StepInfo {
                turn: 1,
                step: Step::CollectingActions,
                started_at: now,
                deadline: Some(now.saturating_add(collect)),
            },
            collect,
            broadcast,
            stopped: false,
        }
    }

    pub fn info(&self) -> &StepInfo {
        &self.info
    }

    pub fn turn(&self) -> u32 {
        self.info.turn
    }

    pub fn step(&self) -> Step {
        self.info.step
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Whether the game ended or was shut down
    pub fn is_finished(&self) -> bool {
        self.stopped || self.info.step == Step::GameOver
    }

    /// Whether the current step's timer ran out at `now`
    pub fn deadline_passed(&self, now: Timestamp) -> bool {
        self.info.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Move to `to`, starting its timer at `now`
    pub fn transition(&mut self, to: Step, now: Timestamp) -> Result<&StepInfo, TransitionError> {
        let from = self.info.step;
        if self.stopped || !from.can_transition_to(to) {
            return Err(TransitionError { from, to });
        }
        if from == Step::BroadcastingResults && to == Step::CollectingActions {
            self.info.turn += 1;
        }
        self.info.step = to;
        self.info.started_at = now;
        self.info.deadline = match to {
            Step::CollectingActions => Some(now.saturating_add(self.collect)),
            Step::BroadcastingResults => Some(now.saturating_add(self.broadcast)),
            Step::Resolving | Step::GameOver => None,
        };
        Ok(&self.info)
    }

    /// Freeze the scheduler; no further transitions happen
    pub fn stop(&mut self) {
        self.stopped = true;
    }
}
