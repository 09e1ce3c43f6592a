//! Game instance.
//!
//! `Game` owns every component of one running game and sequences them:
//! joins and submissions come in from any thread, `tick()` moves the turn
//! forward when a deadline passes or every eligible player has submitted.
//!
//! Readers never block on resolution. The board and the registry are kept
//! behind an `Arc` that is swapped in one step once a turn resolved, so a
//! snapshot is always a fully committed state.
//!
//! Lock order: scheduler, then state, then queue, then event log.

use crate::actions::{Action, ActionKind, ActionQueue, Intake, TargetRules};
use crate::board::Board;
use crate::clock::{Clock, SystemClock, Timestamp};
use crate::config::GameConfig;
use crate::error::{GameError, ResolutionError};
use crate::events::{Event, EventBus, EventCursor, EventKind};
use crate::hex::HexCoord;
use crate::player::{Player, PlayerId, PlayerMetadata, PlayerRegistry, Standing};
use crate::resolve::{Resolution, ResolutionEngine, ResolutionRules};
use crate::scheduler::{Step, StepInfo, TurnScheduler};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Committed board and players, always swapped together
#[derive(Debug, Clone)]
struct Committed {
    board: Arc<Board>,
    players: Arc<PlayerRegistry>,
}

/// A running game
#[derive(Debug)]
pub struct Game {
    config: GameConfig,
    clock: Arc<dyn Clock>,
    scheduler: RwLock<TurnScheduler>,
    state: RwLock<Committed>,
    queue: ActionQueue,
    engine: Mutex<ResolutionEngine>,
    events: EventBus,
    #[cfg(test)]
    fail_next_resolution: std::sync::atomic::AtomicBool,
}

impl Game {
    /// Create a game running on the wall clock
    pub fn new(config: GameConfig) -> Result<Self, GameError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a game with an injected clock. Turn 1 starts collecting right away.
    pub fn with_clock(config: GameConfig, clock: Arc<dyn Clock>) -> Result<Self, GameError> {
        config.validate()?;
        let board = Board::new(&config.board)?;
        let players = PlayerRegistry::new(
            config.actions_per_turn,
            config.player_start_level,
            config.max_players,
            config.seed,
        );
        let now = clock.now();
        let scheduler =
            TurnScheduler::new(now, config.collect_duration(), config.broadcast_duration());
        let start = scheduler.info().clone();

        info!(
            tiles = board.total_tiles(),
            collect_ms = config.collect_duration_ms,
            broadcast_ms = config.broadcast_duration_ms,
            "Game created"
        );

        let game = Self {
            engine: Mutex::new(ResolutionEngine::new(ResolutionRules::from(&config))),
            config,
            clock,
            scheduler: RwLock::new(scheduler),
            state: RwLock::new(Committed {
                board: Arc::new(board),
                players: Arc::new(players),
            }),
            queue: ActionQueue::new(start.turn),
            events: EventBus::new(),
            #[cfg(test)]
            fail_next_resolution: std::sync::atomic::AtomicBool::new(false),
        };
        game.events.publish_batch(
            vec![
                (EventKind::TurnChanged { turn: start.turn }, None),
                (step_changed(&start), None),
            ],
            now,
        );
        Ok(game)
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// Current time on the game's clock
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Register a player. They can act from the current turn on.
    pub fn join_player(&self, id: PlayerId, metadata: PlayerMetadata) -> Result<Player, GameError> {
        let sched = read(&self.scheduler);
        if sched.is_finished() {
            return Err(GameError::PhaseClosed);
        }
        let turn = sched.turn();

        let player = {
            let mut state = write(&self.state);
            Arc::make_mut(&mut state.players)
                .join(id, metadata, turn)?
                .clone()
        };

        info!(player = %player.id, name = %player.name, turn, "Player joined");
        self.events.publish(
            EventKind::PlayerJoined {
                player: player.id.clone(),
                name: player.name.clone(),
            },
            self.clock.now(),
            self.config.event_ttl(),
        );
        Ok(player)
    }

    /// Change a player's level; takes effect from the next resolution
    pub fn set_player_level(&self, id: &PlayerId, level: u32) -> Result<(), GameError> {
        let _sched = read(&self.scheduler);
        let mut state = write(&self.state);
        Arc::make_mut(&mut state.players).set_level(id, level)?;
        debug!(player = %id, level, "Level changed");
        Ok(())
    }

    /// Queue an action for the current turn, replacing the player's previous one
    pub fn submit_action(
        &self,
        player: PlayerId,
        target: HexCoord,
        kind: ActionKind,
        submitted_at: Timestamp,
    ) -> Result<Action, GameError> {
        let sched = read(&self.scheduler);
        if sched.is_finished() {
            return Err(GameError::PhaseClosed);
        }
        if sched.step() != Step::CollectingActions {
            return Err(GameError::NotYourTurnPhase);
        }
        if sched.deadline_passed(self.clock.now()) {
            return Err(GameError::PhaseClosed);
        }

        let state = read(&self.state).clone();
        let intake = Intake {
            turn: sched.turn(),
            board: &state.board,
            players: &state.players,
            rules: TargetRules::from(&self.config),
        };
        match self.queue.submit(&intake, player.clone(), target, kind, submitted_at) {
            Ok(action) => {
                debug!(player = %player, %target, ?kind, turn = intake.turn, "Action accepted");
                Ok(action)
            }
            Err(err) => {
                debug!(player = %player, %target, ?kind, %err, "Action rejected");
                Err(err)
            }
        }
    }

    /// The last committed board
    pub fn grid_snapshot(&self) -> Arc<Board> {
        read(&self.state).board.clone()
    }

    /// The last committed player registry
    pub fn players(&self) -> Arc<PlayerRegistry> {
        read(&self.state).players.clone()
    }

    pub fn player(&self, id: &PlayerId) -> Option<Player> {
        read(&self.state).players.get(id).cloned()
    }

    /// Current turn, step and deadline
    pub fn current_step(&self) -> StepInfo {
        read(&self.scheduler).info().clone()
    }

    /// Actions accepted so far this turn
    pub fn pending_actions(&self) -> Vec<Action> {
        self.queue.snapshot()
    }

    /// Leaderboard of the committed state
    pub fn standings(&self) -> Vec<Standing> {
        let state = read(&self.state).clone();
        state.players.standings(&state.board)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Lazy cursor over events starting at `from_seq`
    pub fn event_stream(&self, from_seq: u64) -> EventCursor<'_> {
        self.events.subscribe(from_seq)
    }

    /// Every event with `seq >= from_seq`
    pub fn events_since(&self, from_seq: u64) -> Vec<Event> {
        self.events.since(from_seq)
    }

    /// Whether every eligible player has a pending action
    pub fn quorum_reached(&self) -> bool {
        let players = self.players();
        self.queue.covers(players.eligible().map(|p| &p.id))
    }

    pub fn is_over(&self) -> bool {
        read(&self.scheduler).is_finished()
    }

    /// Advance the turn as far as the clock and the submissions allow.
    ///
    /// Call this on every timer expiry and after submissions; it does
    /// nothing when no step is due.
    pub fn tick(&self) -> StepInfo {
        let mut sched = write(&self.scheduler);
        loop {
            if sched.is_finished() {
                break;
            }
            let now = self.clock.now();
            match sched.step() {
                Step::CollectingActions => {
                    if !sched.deadline_passed(now) && !self.quorum_reached() {
                        break;
                    }
                    self.run_resolution(&mut sched, now);
                }
                Step::BroadcastingResults => {
                    if !sched.deadline_passed(now) {
                        break;
                    }
                    self.finish_broadcast(&mut sched, now);
                }
                Step::Resolving | Step::GameOver => break,
            }
        }
        sched.info().clone()
    }

    /// Close the collection phase now, whatever the deadline says
    pub fn resolve_now(&self) -> StepInfo {
        let mut sched = write(&self.scheduler);
        if !sched.is_finished() && sched.step() == Step::CollectingActions {
            let now = self.clock.now();
            self.run_resolution(&mut sched, now);
        }
        sched.info().clone()
    }

    /// Stop the game; later submissions fail with `PhaseClosed`
    pub fn shutdown(&self) {
        let mut sched = write(&self.scheduler);
        if sched.is_stopped() {
            return;
        }
        sched.stop();
        self.queue.seal();
        info!(turn = sched.turn(), "Game shut down");
    }

    fn enter(&self, sched: &mut TurnScheduler, step: Step, now: Timestamp) {
        match sched.transition(step, now) {
            Ok(info) => {
                debug!(turn = info.turn, step = ?info.step, "Step changed");
                self.events.publish(step_changed(info), now, None);
            }
            Err(err) => warn!(%err, "Ignoring step change"),
        }
    }

    fn run_resolution(&self, sched: &mut TurnScheduler, now: Timestamp) {
        let turn = sched.turn();
        let actions = self.queue.seal();
        self.enter(sched, Step::Resolving, now);

        let before = read(&self.state).clone();
        match self.attempt(turn, &actions, &before.board, &before.players) {
            Ok(resolution) => {
                self.commit(resolution, now);
                self.enter(sched, Step::BroadcastingResults, now);
            }
            Err(err) => {
                warn!(turn, %err, "Resolution failed, reopening the turn");
                self.events.publish(
                    EventKind::ResolutionFailed {
                        turn,
                        reason: err.to_string(),
                    },
                    now,
                    None,
                );
                Arc::make_mut(&mut write(&self.state).players).refill_all();
                self.queue.open(turn);
                self.enter(sched, Step::CollectingActions, now);
            }
        }
    }

    fn attempt(
        &self,
        turn: u32,
        actions: &[Action],
        board: &Board,
        players: &PlayerRegistry,
    ) -> Result<Resolution, ResolutionError> {
        #[cfg(test)]
        {
            if self
                .fail_next_resolution
                .swap(false, std::sync::atomic::Ordering::SeqCst)
            {
                return Err(crate::board::InvariantViolation::new("injected failure").into());
            }
        }
        self.engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .resolve(turn, actions, board, players)
    }

    fn commit(&self, resolution: Resolution, now: Timestamp) {
        let Resolution {
            turn,
            board,
            players,
            changes,
            reports,
            eliminated,
        } = resolution;

        *write(&self.state) = Committed {
            board: Arc::new(board),
            players: Arc::new(players),
        };

        let ttl = self.config.event_ttl();
        let mut batch = vec![(EventKind::ActionsResolved { turn, reports }, ttl)];
        if !changes.is_empty() {
            batch.push((EventKind::TileChanged { turn, changes }, ttl));
        }
        for out in eliminated {
            info!(turn, player = %out.player, by = ?out.by, "Player eliminated");
            batch.push((
                EventKind::PlayerEliminated {
                    turn,
                    player: out.player,
                    by: out.by,
                },
                ttl,
            ));
        }
        self.events.publish_batch(batch, now);
    }

    fn finish_broadcast(&self, sched: &mut TurnScheduler, now: Timestamp) {
        let turn = sched.turn();
        let state = read(&self.state).clone();
        let alive = state.players.alive().count();
        let last_standing =
            state.players.len() >= self.config.min_players_for_last_standing && alive <= 1;
        let out_of_turns = self.config.max_turns.is_some_and(|max| turn >= max);

        if last_standing || out_of_turns {
            let standings = state.players.standings(&state.board);
            let winner = winner_of(&state.players, &standings);
            self.enter(sched, Step::GameOver, now);
            self.queue.seal();
            info!(turn, winner = ?winner, "Game over");
            self.events.publish(
                EventKind::GameOver {
                    turn,
                    winner,
                    standings,
                },
                now,
                None,
            );
            return;
        }

        let next = turn + 1;
        Arc::make_mut(&mut write(&self.state).players).refill_all();
        self.queue.open(next);
        info!(turn = next, "Turn started");
        self.events
            .publish(EventKind::TurnChanged { turn: next }, now, None);
        self.enter(sched, Step::CollectingActions, now);
    }
}

fn step_changed(info: &StepInfo) -> EventKind {
    EventKind::StepChanged {
        turn: info.turn,
        step: info.step,
        deadline: info.deadline,
    }
}

/// The last live player, or the unique leader in tiles
fn winner_of(players: &PlayerRegistry, standings: &[Standing]) -> Option<PlayerId> {
    let mut alive = players.alive();
    if let (Some(only), None) = (alive.next(), alive.next()) {
        return Some(only.id.clone());
    }
    match standings {
        [first, second, ..] if first.tiles > second.tiles => Some(first.player.clone()),
        [only] if only.tiles > 0 => Some(only.player.clone()),
        _ => None,
    }
}
