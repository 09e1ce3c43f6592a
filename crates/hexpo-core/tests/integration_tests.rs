//! Integration tests for the Hexpo game engine.
//!
//! These tests drive complete turns through the public `Game` API with a
//! manual clock, from the first claims through to game over.

use hexpo_core::*;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const COLLECT_MS: u64 = 1_000;
const BROADCAST_MS: u64 = 500;

fn config(board: BoardShape) -> GameConfig {
    GameConfig {
        board,
        collect_duration_ms: COLLECT_MS,
        broadcast_duration_ms: BROADCAST_MS,
        ..GameConfig::default()
    }
}

fn start(config: GameConfig, players: &[&str]) -> (Game, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Timestamp(10_000)));
    let game = Game::with_clock(config, clock.clone()).unwrap();
    for id in players {
        game.join_player((*id).into(), PlayerMetadata::new(*id)).unwrap();
    }
    (game, clock)
}

fn submit(game: &Game, clock: &ManualClock, player: &str, q: i32, r: i32, kind: ActionKind) {
    game.submit_action(player.into(), HexCoord::new(q, r), kind, clock.now())
        .unwrap_or_else(|e| panic!("{player} {kind:?} ({q}, {r}) rejected: {e}"));
}

/// Let the collection deadline pass and resolve, leaving the game in broadcast
fn close_collection(game: &Game, clock: &ManualClock) -> StepInfo {
    clock.advance(Duration::from_millis(COLLECT_MS));
    game.tick()
}

/// Let the broadcast deadline pass, starting the next turn (or ending the game)
fn next_turn(game: &Game, clock: &ManualClock) -> StepInfo {
    clock.advance(Duration::from_millis(BROADCAST_MS));
    game.tick()
}

fn event_names(events: &[Event]) -> Vec<&'static str> {
    events.iter().map(|e| e.kind.name()).collect()
}

fn three_tiles() -> BoardShape {
    BoardShape::Custom {
        tiles: vec![HexCoord::new(0, 0), HexCoord::new(1, 0), HexCoord::new(0, 1)],
    }
}

#[test]
fn test_contested_grow_goes_to_higher_level() {
    let (game, clock) = start(config(three_tiles()), &["p1", "p2"]);

    submit(&game, &clock, "p1", 0, 0, ActionKind::Grow);
    submit(&game, &clock, "p2", 1, 0, ActionKind::Grow);
    // Everyone submitted, no need to wait for the deadline
    assert_eq!(game.tick().step, Step::BroadcastingResults);
    assert_eq!(next_turn(&game, &clock).turn, 2);

    game.set_player_level(&"p2".into(), 3).unwrap();
    submit(&game, &clock, "p1", 0, 1, ActionKind::Grow);
    submit(&game, &clock, "p2", 0, 1, ActionKind::Grow);
    game.tick();

    let board = game.grid_snapshot();
    assert_eq!(board.owner_of(&HexCoord::new(0, 1)), Some(&"p2".into()));
    assert_eq!(board.tile_count(&"p1".into()), 1);
    assert_eq!(board.tile_count(&"p2".into()), 2);
    assert_eq!(game.player(&"p1".into()).unwrap().actions_left, 0);
    assert_eq!(game.player(&"p2".into()).unwrap().actions_left, 0);

    let reports = game
        .events_since(1)
        .into_iter()
        .filter_map(|e| match e.kind {
            EventKind::ActionsResolved { turn: 2, reports } => Some(reports),
            _ => None,
        })
        .next()
        .unwrap();
    let outcomes: Vec<(String, ActionOutcome)> = reports
        .into_iter()
        .map(|r| (r.player.to_string(), r.outcome))
        .collect();
    assert_eq!(
        outcomes,
        vec![
            ("p1".to_string(), ActionOutcome::LostContest),
            ("p2".to_string(), ActionOutcome::Claimed),
        ]
    );
}

#[test]
fn test_protected_player_keeps_tile() {
    let (game, clock) = start(config(three_tiles()), &["p1", "p2"]);
    submit(&game, &clock, "p1", 0, 0, ActionKind::Grow);
    submit(&game, &clock, "p2", 1, 0, ActionKind::Grow);
    game.tick();
    next_turn(&game, &clock);

    // First tiles come with spawn protection
    let p2 = game.player(&"p2".into()).unwrap();
    assert!(p2.is_protected(2));

    let err = game
        .submit_action("p1".into(), HexCoord::new(1, 0), ActionKind::Attack, clock.now())
        .unwrap_err();
    assert_eq!(err, GameError::TargetProtected);

    let from = game.events().last_seq() + 1;
    close_collection(&game, &clock);
    assert_eq!(
        game.grid_snapshot().owner_of(&HexCoord::new(1, 0)),
        Some(&"p2".into())
    );
    assert!(!event_names(&game.events_since(from)).contains(&"tile_changed"));
}

#[test]
fn test_last_tile_lost_eliminates_and_ends_game() {
    let config = GameConfig {
        spawn_protection_turns: 0,
        ..config(BoardShape::Hexagon { radius: 1 })
    };
    let (game, clock) = start(config, &["p1", "p2"]);
    submit(&game, &clock, "p1", 0, 0, ActionKind::Grow);
    submit(&game, &clock, "p2", 1, 0, ActionKind::Grow);
    game.tick();
    next_turn(&game, &clock);

    submit(&game, &clock, "p2", 0, 0, ActionKind::Attack);
    let from = game.events().last_seq() + 1;
    let step = close_collection(&game, &clock);
    assert_eq!(step.step, Step::BroadcastingResults);

    let batch = game.events_since(from);
    assert_eq!(
        event_names(&batch),
        vec![
            "step_changed",
            "actions_resolved",
            "tile_changed",
            "player_eliminated",
            "step_changed",
        ]
    );
    // Ownership change and elimination land in the same batch
    assert_eq!(batch[2].emitted_at, batch[3].emitted_at);
    assert_eq!(batch[3].seq, batch[2].seq + 1);
    assert_eq!(
        batch[3].kind,
        EventKind::PlayerEliminated {
            turn: 2,
            player: "p1".into(),
            by: Some("p2".into()),
        }
    );

    let p1 = game.player(&"p1".into()).unwrap();
    assert!(p1.eliminated);
    assert_eq!(p1.eliminated_by, Some("p2".into()));
    assert_eq!(game.player(&"p2".into()).unwrap().kills, 1);

    // One player left: the game ends after the broadcast
    let step = next_turn(&game, &clock);
    assert_eq!(step.step, Step::GameOver);
    assert!(game.is_over());
    let last = game.events().get(game.events().last_seq()).unwrap();
    match last.kind {
        EventKind::GameOver {
            winner, standings, ..
        } => {
            assert_eq!(winner, Some("p2".into()));
            assert_eq!(standings[0].player, "p2".into());
            assert_eq!(standings[1].eliminated_turn, Some(2));
        }
        other => panic!("expected game over, got {other:?}"),
    }

    let err = game
        .submit_action("p2".into(), HexCoord::new(0, 1), ActionKind::Grow, clock.now())
        .unwrap_err();
    assert_eq!(err, GameError::PhaseClosed);
    // Nothing moves any more
    clock.advance(Duration::from_secs(60));
    assert_eq!(game.tick().step, Step::GameOver);
}

#[test]
fn test_defend_holds_tile_and_protects() {
    let config = GameConfig {
        spawn_protection_turns: 0,
        ..config(BoardShape::Hexagon { radius: 1 })
    };
    let (game, clock) = start(config, &["p1", "p2"]);
    submit(&game, &clock, "p1", 0, 0, ActionKind::Grow);
    submit(&game, &clock, "p2", 1, 0, ActionKind::Grow);
    game.tick();
    next_turn(&game, &clock);

    submit(&game, &clock, "p1", 0, 0, ActionKind::Defend);
    submit(&game, &clock, "p2", 0, 0, ActionKind::Attack);
    game.tick();
    assert_eq!(
        game.grid_snapshot().owner_of(&HexCoord::new(0, 0)),
        Some(&"p1".into())
    );
    next_turn(&game, &clock);

    // Protected during turn 3
    let err = game
        .submit_action("p2".into(), HexCoord::new(0, 0), ActionKind::Attack, clock.now())
        .unwrap_err();
    assert_eq!(err, GameError::TargetProtected);
}

#[test]
fn test_turn_lifecycle_events() {
    let (game, clock) = start(config(BoardShape::Hexagon { radius: 2 }), &["p1", "p2"]);

    // Nobody submits: the deadline alone closes the phase
    assert_eq!(game.tick().step, Step::CollectingActions);
    let step = close_collection(&game, &clock);
    assert_eq!(step.step, Step::BroadcastingResults);
    assert_eq!(step.deadline, Some(Timestamp(11_500)));
    let step = next_turn(&game, &clock);
    assert_eq!(step.turn, 2);
    assert_eq!(step.step, Step::CollectingActions);
    assert_eq!(step.deadline, Some(Timestamp(12_500)));

    let events = game.events_since(0);
    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, (1..=events.len() as u64).collect::<Vec<_>>());
    assert_eq!(
        event_names(&events),
        vec![
            "turn_changed",
            "step_changed",
            "player_joined",
            "player_joined",
            "step_changed",
            "actions_resolved",
            "step_changed",
            "turn_changed",
            "step_changed",
        ]
    );
}

#[test]
fn test_max_turns_ends_game_with_leader() {
    let config = GameConfig {
        max_turns: Some(2),
        ..config(BoardShape::Hexagon { radius: 2 })
    };
    let (game, clock) = start(config, &["p1", "p2"]);
    submit(&game, &clock, "p1", 0, 0, ActionKind::Grow);
    submit(&game, &clock, "p2", 2, 0, ActionKind::Grow);
    game.tick();
    next_turn(&game, &clock);

    submit(&game, &clock, "p1", 0, 1, ActionKind::Grow);
    close_collection(&game, &clock);
    let step = next_turn(&game, &clock);
    assert_eq!(step.step, Step::GameOver);
    assert_eq!(step.turn, 2);

    let standings = game.standings();
    assert_eq!(standings[0].player, "p1".into());
    assert_eq!(standings[0].tiles, 2);
    let winner = game.events_since(1).into_iter().find_map(|e| match e.kind {
        EventKind::GameOver { winner, .. } => Some(winner),
        _ => None,
    });
    assert_eq!(winner, Some(Some("p1".into())));
}

#[test]
fn test_actions_refill_each_turn() {
    let (game, clock) = start(config(BoardShape::Hexagon { radius: 2 }), &["p1"]);
    submit(&game, &clock, "p1", 0, 0, ActionKind::Grow);
    game.tick();
    assert_eq!(game.player(&"p1".into()).unwrap().actions_left, 0);

    next_turn(&game, &clock);
    assert_eq!(game.player(&"p1".into()).unwrap().actions_left, 1);
    submit(&game, &clock, "p1", 1, 0, ActionKind::Grow);
    assert_eq!(game.pending_actions().len(), 1);
}

#[test]
fn test_single_player_below_minimum_keeps_playing() {
    let (game, clock) = start(config(BoardShape::Hexagon { radius: 1 }), &["solo"]);
    submit(&game, &clock, "solo", 0, 0, ActionKind::Grow);
    game.tick();
    let step = next_turn(&game, &clock);
    assert_eq!(step.step, Step::CollectingActions);
    assert_eq!(step.turn, 2);
}

#[test]
fn test_join_errors() {
    let config = GameConfig {
        max_players: Some(2),
        ..config(BoardShape::Hexagon { radius: 1 })
    };
    let (game, _clock) = start(config, &["p1"]);
    assert_eq!(
        game.join_player("p1".into(), PlayerMetadata::default()).unwrap_err(),
        GameError::AlreadyJoined
    );
    game.join_player("p2".into(), PlayerMetadata::default()).unwrap();
    assert_eq!(
        game.join_player("p3".into(), PlayerMetadata::default()).unwrap_err(),
        GameError::GameFull
    );
}

#[test]
fn test_concurrent_submissions() {
    let (game, clock) = start(config(BoardShape::Hexagon { radius: 3 }), &[]);
    let game = Arc::new(game);
    let targets = HexCoord::new(0, 0).ring(3);

    let handles: Vec<_> = targets
        .iter()
        .enumerate()
        .map(|(i, coord)| {
            let game = Arc::clone(&game);
            let coord = *coord;
            let at = clock.now();
            thread::spawn(move || {
                let id = PlayerId::new(format!("viewer{i:02}"));
                game.join_player(id.clone(), PlayerMetadata::default()).unwrap();
                // Change of mind: only the last submission counts
                game.submit_action(id.clone(), HexCoord::new(0, 0), ActionKind::Grow, at)
                    .unwrap();
                game.submit_action(id, coord, ActionKind::Grow, at).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(game.pending_actions().len(), targets.len());
    assert!(game.quorum_reached());
    game.tick();

    let board = game.grid_snapshot();
    assert_eq!(board.unclaimed_count(), board.total_tiles() - targets.len());
    assert_eq!(board.owner_of(&HexCoord::new(0, 0)), None);
    for player in game.players().iter() {
        assert_eq!(board.tile_count(&player.id), 1);
    }
}

#[test]
fn test_event_stream_resumes() {
    let (game, clock) = start(config(BoardShape::Hexagon { radius: 1 }), &["p1"]);
    let mut cursor = game.event_stream(1);
    let seen: Vec<u64> = cursor.by_ref().map(|e| e.seq).collect();
    assert_eq!(seen, vec![1, 2, 3]);

    submit(&game, &clock, "p1", 0, 0, ActionKind::Grow);
    game.tick();
    let next = cursor.next().unwrap();
    assert_eq!(next.seq, 4);

    // A consumer reconnecting from its last processed seq sees the rest again
    let replay = game.events_since(next.seq);
    assert_eq!(replay[0], next);
}
