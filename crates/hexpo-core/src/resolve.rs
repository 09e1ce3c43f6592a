//! Turn resolution.
//!
//! Resolution takes the sealed actions of a turn and the state before the
//! turn, and computes the next state. It is a pure function of its inputs:
//! the order actions are handed in does not matter, and the same inputs
//! always produce the same result.
//!
//! Rules, applied per target tile:
//! - A successful defend on the tile repels every attack on it
//! - Otherwise the claimant with the highest strength wins
//! - Ties go to the earliest submission, then to the lowest player id
//!
//! Strength is computed from the pre-turn level and tile count. Nothing is
//! published until the whole batch applied cleanly and every invariant holds.

use crate::actions::{check_target, Action, ActionKind, TargetRules};
use crate::board::Board;
use crate::clock::Timestamp;
use crate::config::{GameConfig, StrengthWeights};
use crate::error::{GameError, ResolutionError};
use crate::events::TileChange;
use crate::hex::HexCoord;
use crate::player::{PlayerId, PlayerRegistry};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// What happened to one action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    /// Grow won the tile
    Claimed,
    /// Attack won the tile
    Captured,
    /// Defend held the tile
    Defended,
    /// Someone stronger (or earlier) took the tile
    LostContest,
    /// The tile was defended
    Repelled,
    /// The target's owner became protected
    BlockedProtected,
    /// The action no longer applies to the board
    Invalid,
}

/// Outcome of one processed action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionReport {
    pub player: PlayerId,
    pub target: HexCoord,
    pub kind: ActionKind,
    pub outcome: ActionOutcome,
}

impl ActionReport {
    fn new(action: &Action, outcome: ActionOutcome) -> Self {
        Self {
            player: action.player.clone(),
            target: action.target,
            kind: action.kind,
            outcome,
        }
    }
}

/// A player knocked out this turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Elimination {
    pub player: PlayerId,
    /// Who took the lowest-coordinate tile of the player's last tiles
    pub by: Option<PlayerId>,
}

/// Balance knobs used by resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionRules {
    pub strength: StrengthWeights,
    pub defend_protection_turns: u32,
    pub spawn_protection_turns: u32,
    pub targets: TargetRules,
}

impl From<&GameConfig> for ResolutionRules {
    fn from(config: &GameConfig) -> Self {
        Self {
            strength: config.strength,
            defend_protection_turns: config.defend_protection_turns,
            spawn_protection_turns: config.spawn_protection_turns,
            targets: TargetRules::from(config),
        }
    }
}

impl Default for ResolutionRules {
    fn default() -> Self {
        Self::from(&GameConfig::default())
    }
}

/// The next state, ready to be committed
#[derive(Debug, Clone)]
pub struct Resolution {
    pub turn: u32,
    pub board: Board,
    pub players: PlayerRegistry,
    /// Ownership changes in coordinate order
    pub changes: Vec<TileChange>,
    /// One report per processed action, ordered by target then player
    pub reports: Vec<ActionReport>,
    pub eliminated: Vec<Elimination>,
}

/// Resolve `actions` against the pre-turn `board` and `players`.
///
/// If a player appears more than once, only its latest action counts; equal
/// timestamps are settled by kind, then target.
pub fn resolve_turn(
    rules: &ResolutionRules,
    turn: u32,
    actions: &[Action],
    board: &Board,
    players: &PlayerRegistry,
) -> Result<Resolution, ResolutionError> {
    let mut latest: BTreeMap<&PlayerId, &Action> = BTreeMap::new();
    for action in actions {
        let newer = latest
            .get(&action.player)
            .map_or(true, |prev| recency(action) > recency(prev));
        if newer {
            latest.insert(&action.player, action);
        }
    }

    let mut reports = Vec::with_capacity(latest.len());
    let mut by_tile: BTreeMap<HexCoord, Vec<&Action>> = BTreeMap::new();
    for action in latest.values().copied() {
        let player = players
            .get(&action.player)
            .ok_or_else(|| ResolutionError::UnknownPlayer(action.player.clone()))?;
        if !board.contains(&action.target) {
            return Err(ResolutionError::OffBoard(action.target));
        }

        let check = if player.eliminated {
            Err(GameError::PlayerIneligible)
        } else {
            check_target(
                board,
                turn,
                player,
                &action.target,
                action.kind,
                players,
                &rules.targets,
            )
        };
        match check {
            Ok(()) => by_tile.entry(action.target).or_default().push(action),
            Err(GameError::TargetProtected) => {
                reports.push(ActionReport::new(action, ActionOutcome::BlockedProtected))
            }
            Err(err) => {
                debug!(
                    player = %action.player,
                    target = %action.target,
                    %err,
                    "Action no longer valid"
                );
                reports.push(ActionReport::new(action, ActionOutcome::Invalid));
            }
        }
    }

    // Pre-turn strength; every player here was looked up above
    let strength = |id: &PlayerId| {
        let level = players.get(id).map_or(0, |p| p.level);
        rules.strength.strength(level, board.tile_count(id))
    };

    let mut changes = Vec::new();
    let mut defenders = BTreeSet::new();
    for (coord, contenders) in &by_tile {
        let (defends, claims): (Vec<&Action>, Vec<&Action>) = contenders
            .iter()
            .copied()
            .partition(|a| a.kind == ActionKind::Defend);

        if !defends.is_empty() {
            for defend in defends {
                defenders.insert(defend.player.clone());
                reports.push(ActionReport::new(defend, ActionOutcome::Defended));
            }
            for claim in claims {
                reports.push(ActionReport::new(claim, ActionOutcome::Repelled));
            }
            continue;
        }

        let winner = claims.iter().copied().min_by(|a, b| {
            strength(&b.player)
                .cmp(&strength(&a.player))
                .then_with(|| a.submitted_at.cmp(&b.submitted_at))
                .then_with(|| a.player.cmp(&b.player))
        });
        let Some(winner) = winner else { continue };

        for claim in &claims {
            let outcome = if claim.player != winner.player {
                ActionOutcome::LostContest
            } else if claim.kind == ActionKind::Attack {
                ActionOutcome::Captured
            } else {
                ActionOutcome::Claimed
            };
            reports.push(ActionReport::new(claim, outcome));
        }
        changes.push(TileChange {
            coord: *coord,
            from: board.owner_of(coord).cloned(),
            to: Some(winner.player.clone()),
        });
    }
    reports.sort_by(|a, b| a.target.cmp(&b.target).then_with(|| a.player.cmp(&b.player)));

    let mut next_board = board.clone();
    let mut next_players = players.clone();
    let unknown = |id: &PlayerId| ResolutionError::UnknownPlayer(id.clone());

    for change in &changes {
        next_board.set_owner(change.coord, change.to.clone())?;
    }

    for id in latest.keys().copied() {
        // Already out, nothing left to spend
        if players.get(id).is_some_and(|p| p.eliminated) {
            continue;
        }
        next_players
            .consume_action(id)
            .map_err(|_| ResolutionError::ActionsUnderflow(id.clone()))?;
    }

    for change in &changes {
        if let Some(victim) = &change.from {
            next_players.clear_protection(victim).map_err(|_| unknown(victim))?;
        }
    }
    for change in &changes {
        let Some(winner) = &change.to else { continue };
        let first_tile = players.get(winner).is_some_and(|p| !p.has_owned_tiles);
        if first_tile && rules.spawn_protection_turns > 0 {
            next_players
                .apply_spawn_protection(winner, turn.saturating_add(rules.spawn_protection_turns))
                .map_err(|_| unknown(winner))?;
        }
        next_players.mark_owned_tiles(winner).map_err(|_| unknown(winner))?;
    }
    if rules.defend_protection_turns > 0 {
        for defender in &defenders {
            next_players
                .apply_protection(defender, turn.saturating_add(rules.defend_protection_turns))
                .map_err(|_| unknown(defender))?;
        }
    }

    let mut eliminated = Vec::new();
    let mut seen = BTreeSet::new();
    for change in &changes {
        let Some(victim) = &change.from else { continue };
        if !seen.insert(victim) || next_board.tile_count(victim) > 0 {
            continue;
        }
        next_players
            .mark_eliminated(victim, turn, change.to.clone())
            .map_err(|_| unknown(victim))?;
        eliminated.push(Elimination {
            player: victim.clone(),
            by: change.to.clone(),
        });
    }

    next_board.verify()?;
    if let Some(violation) = next_players.check_invariants(&next_board).into_iter().next() {
        return Err(violation.into());
    }

    Ok(Resolution {
        turn,
        board: next_board,
        players: next_players,
        changes,
        reports,
        eliminated,
    })
}

/// Ordering key of a player's submissions, latest last
fn recency(action: &Action) -> (Timestamp, ActionKind, HexCoord) {
    (action.submitted_at, action.kind, action.target)
}

/// Resolves each turn at most once
#[derive(Debug, Clone)]
pub struct ResolutionEngine {
    rules: ResolutionRules,
    last_resolved: Option<u32>,
}

impl ResolutionEngine {
    pub fn new(rules: ResolutionRules) -> Self {
        Self {
            rules,
            last_resolved: None,
        }
    }

    pub fn rules(&self) -> &ResolutionRules {
        &self.rules
    }

    /// Last turn that resolved successfully
    pub fn last_resolved(&self) -> Option<u32> {
        self.last_resolved
    }

    /// Resolve `turn`. A failed attempt can be retried; a successful one cannot.
    pub fn resolve(
        &mut self,
        turn: u32,
        actions: &[Action],
        board: &Board,
        players: &PlayerRegistry,
    ) -> Result<Resolution, ResolutionError> {
        if self.last_resolved.is_some_and(|last| turn <= last) {
            return Err(ResolutionError::AlreadyResolved(turn));
        }
        let resolution = resolve_turn(&self.rules, turn, actions, board, players)?;
        self.last_resolved = Some(turn);
        info!(
            turn,
            actions = actions.len(),
            changes = resolution.changes.len(),
            eliminated = resolution.eliminated.len(),
            "Turn resolved"
        );
        Ok(resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Timestamp;
    use crate::hex::BoardShape;
    use crate::player::PlayerMetadata;
    use pretty_assertions::assert_eq;

    fn setup(ids: &[&str]) -> (Board, PlayerRegistry) {
        let board = Board::new(&BoardShape::Hexagon { radius: 3 }).unwrap();
        let mut players = PlayerRegistry::new(1, 1, None, 0);
        for id in ids {
            players.join((*id).into(), PlayerMetadata::new(*id), 1).unwrap();
        }
        (board, players)
    }

    fn claim(board: &mut Board, players: &mut PlayerRegistry, id: &str, q: i32, r: i32) {
        board.set_owner(HexCoord::new(q, r), Some(id.into())).unwrap();
        players.mark_owned_tiles(&id.into()).unwrap();
    }

    fn act(id: &str, q: i32, r: i32, kind: ActionKind, at: u64) -> Action {
        Action {
            player: id.into(),
            target: HexCoord::new(q, r),
            kind,
            submitted_at: Timestamp(at),
            turn: 1,
        }
    }

    fn outcome_of(res: &Resolution, id: &str) -> ActionOutcome {
        res.reports
            .iter()
            .find(|r| r.player.as_str() == id)
            .map(|r| r.outcome)
            .unwrap()
    }

    #[test]
    fn test_stronger_claim_wins_contested_tile() {
        let (board, mut players) = setup(&["a", "b"]);
        players.set_level(&"b".into(), 3).unwrap();

        let actions = vec![
            act("a", 0, 0, ActionKind::Grow, 1),
            act("b", 0, 0, ActionKind::Grow, 2),
        ];
        let res = resolve_turn(&ResolutionRules::default(), 1, &actions, &board, &players).unwrap();

        assert_eq!(res.board.owner_of(&HexCoord::new(0, 0)), Some(&"b".into()));
        assert_eq!(outcome_of(&res, "a"), ActionOutcome::LostContest);
        assert_eq!(outcome_of(&res, "b"), ActionOutcome::Claimed);
        // Losing still costs the action
        assert_eq!(res.players.get(&"a".into()).unwrap().actions_left, 0);
    }

    #[test]
    fn test_tie_goes_to_earliest_then_lowest_id() {
        let (board, players) = setup(&["a", "b", "c"]);

        let actions = vec![
            act("a", 1, 1, ActionKind::Grow, 20),
            act("c", 1, 1, ActionKind::Grow, 10),
            act("b", 2, 0, ActionKind::Grow, 10),
            act("a", 2, 0, ActionKind::Grow, 20),
        ];
        // a's second action replaces its first
        let res = resolve_turn(&ResolutionRules::default(), 1, &actions, &board, &players).unwrap();
        assert_eq!(res.board.owner_of(&HexCoord::new(1, 1)), Some(&"c".into()));
        assert_eq!(res.board.owner_of(&HexCoord::new(2, 0)), Some(&"b".into()));

        let same_time = vec![
            act("b", 0, 0, ActionKind::Grow, 5),
            act("a", 0, 0, ActionKind::Grow, 5),
        ];
        let rules = ResolutionRules::default();
        let res = resolve_turn(&rules, 1, &same_time, &board, &players).unwrap();
        assert_eq!(res.board.owner_of(&HexCoord::new(0, 0)), Some(&"a".into()));
    }

    #[test]
    fn test_defend_repels_attack() {
        let (mut board, mut players) = setup(&["a", "b"]);
        claim(&mut board, &mut players, "a", 0, 0);
        claim(&mut board, &mut players, "b", 1, 0);
        players.set_level(&"b".into(), 10).unwrap();

        let actions = vec![
            act("a", 0, 0, ActionKind::Defend, 1),
            act("b", 0, 0, ActionKind::Attack, 0),
        ];
        let res = resolve_turn(&ResolutionRules::default(), 1, &actions, &board, &players).unwrap();

        assert_eq!(res.board.owner_of(&HexCoord::new(0, 0)), Some(&"a".into()));
        assert_eq!(outcome_of(&res, "a"), ActionOutcome::Defended);
        assert_eq!(outcome_of(&res, "b"), ActionOutcome::Repelled);
        assert!(res.changes.is_empty());
        assert_eq!(res.players.get(&"a".into()).unwrap().protected_until_turn, 2);
    }

    #[test]
    fn test_capturing_last_tile_eliminates() {
        let (mut board, mut players) = setup(&["a", "b"]);
        claim(&mut board, &mut players, "a", 0, 0);
        claim(&mut board, &mut players, "b", 1, 0);

        let actions = vec![act("a", 1, 0, ActionKind::Attack, 1)];
        let res = resolve_turn(&ResolutionRules::default(), 4, &actions, &board, &players).unwrap();

        assert_eq!(
            res.changes,
            vec![TileChange {
                coord: HexCoord::new(1, 0),
                from: Some("b".into()),
                to: Some("a".into()),
            }]
        );
        assert_eq!(
            res.eliminated,
            vec![Elimination {
                player: "b".into(),
                by: Some("a".into()),
            }]
        );
        let b = res.players.get(&"b".into()).unwrap();
        assert!(b.eliminated);
        assert_eq!(b.eliminated_turn, Some(4));
        assert_eq!(res.players.get(&"a".into()).unwrap().kills, 1);
        assert_eq!(res.board.tile_count(&"a".into()), 2);
    }

    #[test]
    fn test_first_claim_grants_spawn_protection() {
        let (board, players) = setup(&["a"]);
        let res = resolve_turn(
            &ResolutionRules::default(),
            3,
            &[act("a", 2, -1, ActionKind::Grow, 0)],
            &board,
            &players,
        )
        .unwrap();
        let a = res.players.get(&"a".into()).unwrap();
        assert!(a.has_owned_tiles);
        assert_eq!(a.spawn_protected_until_turn, 5);
        assert!(a.is_protected(5));
    }

    #[test]
    fn test_spawn_protection_respects_tile_cap() {
        let (mut board, mut players) = setup(&["a", "b"]);
        claim(&mut board, &mut players, "a", 0, 0);
        claim(&mut board, &mut players, "b", 1, 0);
        claim(&mut board, &mut players, "b", 2, 0);
        players.apply_spawn_protection(&"b".into(), 3).unwrap();
        let actions = [act("a", 1, 0, ActionKind::Attack, 0)];

        let mut rules = ResolutionRules::default();
        rules.targets.spawn_protection_max_tiles = Some(2);
        let res = resolve_turn(&rules, 2, &actions, &board, &players).unwrap();
        assert_eq!(outcome_of(&res, "a"), ActionOutcome::BlockedProtected);

        rules.targets.spawn_protection_max_tiles = Some(1);
        let res = resolve_turn(&rules, 2, &actions, &board, &players).unwrap();
        assert_eq!(outcome_of(&res, "a"), ActionOutcome::Captured);
        assert_eq!(res.board.owner_of(&HexCoord::new(1, 0)), Some(&"a".into()));
        assert!(!res.players.get(&"b".into()).unwrap().is_protected(2));
    }

    #[test]
    fn test_stale_protected_attack_is_blocked() {
        let (mut board, mut players) = setup(&["a", "b"]);
        claim(&mut board, &mut players, "a", 0, 0);
        claim(&mut board, &mut players, "b", 1, 0);
        players.apply_protection(&"b".into(), 2).unwrap();

        let res = resolve_turn(
            &ResolutionRules::default(),
            2,
            &[act("a", 1, 0, ActionKind::Attack, 0)],
            &board,
            &players,
        )
        .unwrap();
        assert_eq!(outcome_of(&res, "a"), ActionOutcome::BlockedProtected);
        assert!(res.changes.is_empty());
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let (mut board, mut players) = setup(&["a", "b", "c"]);
        claim(&mut board, &mut players, "a", 0, 0);
        claim(&mut board, &mut players, "b", 1, 0);
        let actions = vec![
            act("a", 1, 0, ActionKind::Attack, 3),
            act("c", 1, 0, ActionKind::Grow, 1),
            act("b", 1, -1, ActionKind::Grow, 2),
        ];
        let mut reversed = actions.clone();
        reversed.reverse();

        let rules = ResolutionRules::default();
        let first = resolve_turn(&rules, 1, &actions, &board, &players).unwrap();
        let second = resolve_turn(&rules, 1, &reversed, &board, &players).unwrap();
        assert_eq!(first.changes, second.changes);
        assert_eq!(first.reports, second.reports);
        assert_eq!(first.board, second.board);
        // c's grow targets an owned tile
        assert_eq!(outcome_of(&first, "c"), ActionOutcome::Invalid);
    }

    #[test]
    fn test_same_time_duplicates_resolve_in_any_order() {
        let (board, players) = setup(&["a"]);
        let actions = vec![
            act("a", 0, 0, ActionKind::Grow, 5),
            act("a", 1, 0, ActionKind::Grow, 5),
        ];
        let mut reversed = actions.clone();
        reversed.reverse();

        let rules = ResolutionRules::default();
        let first = resolve_turn(&rules, 1, &actions, &board, &players).unwrap();
        let second = resolve_turn(&rules, 1, &reversed, &board, &players).unwrap();
        assert_eq!(first.changes, second.changes);
        assert_eq!(first.reports, second.reports);
        assert_eq!(first.changes.len(), 1);
        assert_eq!(first.changes[0].coord, HexCoord::new(1, 0));
    }

    #[test]
    fn test_eliminated_player_action_is_invalid() {
        let (mut board, mut players) = setup(&["a", "b", "c"]);
        claim(&mut board, &mut players, "a", 0, 0);
        claim(&mut board, &mut players, "c", 2, -2);
        players.mark_eliminated(&"b".into(), 1, Some("a".into())).unwrap();

        let actions = [
            act("a", 1, 0, ActionKind::Grow, 0),
            act("b", 1, -1, ActionKind::Grow, 0),
        ];
        let res = resolve_turn(&ResolutionRules::default(), 2, &actions, &board, &players).unwrap();

        assert_eq!(outcome_of(&res, "b"), ActionOutcome::Invalid);
        assert_eq!(outcome_of(&res, "a"), ActionOutcome::Claimed);
        assert_eq!(res.board.owner_of(&HexCoord::new(1, -1)), None);
        assert_eq!(res.players.get(&"b".into()).unwrap().actions_left, 0);
        assert_eq!(res.players.get(&"a".into()).unwrap().actions_left, 0);
    }

    #[test]
    fn test_unknown_player_aborts() {
        let (board, players) = setup(&["a"]);
        let err = resolve_turn(
            &ResolutionRules::default(),
            1,
            &[act("ghost", 0, 0, ActionKind::Grow, 0)],
            &board,
            &players,
        )
        .unwrap_err();
        assert_eq!(err, ResolutionError::UnknownPlayer("ghost".into()));
    }

    #[test]
    fn test_engine_resolves_turn_once() {
        let (board, players) = setup(&["a"]);
        let mut engine = ResolutionEngine::new(ResolutionRules::default());

        engine.resolve(1, &[], &board, &players).unwrap();
        assert_eq!(engine.last_resolved(), Some(1));
        assert_eq!(
            engine.resolve(1, &[], &board, &players).unwrap_err(),
            ResolutionError::AlreadyResolved(1)
        );
        assert!(engine.resolve(2, &[], &board, &players).is_ok());
    }

    #[test]
    fn test_failed_resolution_can_retry() {
        let (board, mut players) = setup(&["a"]);
        players.consume_action(&"a".into()).unwrap();
        let mut engine = ResolutionEngine::new(ResolutionRules::default());
        let actions = [act("a", 0, 0, ActionKind::Grow, 0)];

        assert_eq!(
            engine.resolve(1, &actions, &board, &players).unwrap_err(),
            ResolutionError::ActionsUnderflow("a".into())
        );
        assert_eq!(engine.last_resolved(), None);

        players.refill_actions(&"a".into()).unwrap();
        assert!(engine.resolve(1, &actions, &board, &players).is_ok());
    }
}
