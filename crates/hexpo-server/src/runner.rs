//! Timer loop driving the game's turn phases.

use crate::server::ServerState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Upper bound on a single wait, so a stalled step is re-checked
const MAX_WAIT: Duration = Duration::from_secs(1);

/// Tick the game whenever a deadline passes or a quorum is reached.
pub async fn run_scheduler(state: Arc<ServerState>, mut shutdown: watch::Receiver<bool>) {
    loop {
        let info = state.game.tick();
        state.notify_events();
        if state.game.is_over() {
            info!(turn = info.turn, "Scheduler stopped");
            break;
        }

        let wait = info
            .time_left(state.game.now())
            .map_or(MAX_WAIT, |left| left.min(MAX_WAIT));
        debug!(turn = info.turn, step = ?info.step, wait_ms = wait.as_millis() as u64, "Waiting");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = state.quorum.notified() => {
                debug!(turn = info.turn, "Quorum reached");
            }
            _ = shutdown.changed() => {
                state.game.shutdown();
                state.notify_events();
                info!("Scheduler shut down");
                break;
            }
        }
    }
}
