use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use scribble_common::phase::{Phase, PhaseTimings};

use super::Room;

/// Countdown task for one timed phase. Dropping or cancelling it stops all
/// further ticks and the expiry transition.
pub struct PhaseTimer {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl PhaseTimer {
    pub fn start(
        room: Weak<Room>,
        phase: Phase,
        duration: Duration,
        timings: &PhaseTimings,
    ) -> Self {
        let token = CancellationToken::new();
        let ticks = timings.ticks(duration);
        let task = tokio::spawn(run(room, token.clone(), phase, duration, ticks, timings.tick));
        Self { token, task }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PhaseTimer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run(
    room: Weak<Room>,
    token: CancellationToken,
    phase: Phase,
    duration: Duration,
    ticks: u32,
    tick: Duration,
) {
    let mut remaining = duration;

    for i in 0..ticks {
        let Some(room) = room.upgrade() else {
            return;
        };
        if !room.emit_tick(&token, i == 0, remaining).await {
            return;
        }
        drop(room);

        remaining = remaining.saturating_sub(tick);
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(tick) => {}
        }
    }

    if let Some(room) = room.upgrade() {
        tracing::trace!("Timer for {:?} in room '{}' expired", phase, room.name());
        room.expire_timer(&token).await;
    }
}
