use std::time::Duration;

use serde::{Deserialize, Serialize};

// -- Round State Machine --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    WaitingForPlayers,
    WaitingForStart,
    NewRound,
    GameRunning,
    ShowWord,
}

impl Phase {
    /// The phase entered when this phase's timer runs out.
    pub fn after_timer(self) -> Phase {
        match self {
            Phase::WaitingForStart => Phase::NewRound,
            Phase::NewRound => Phase::GameRunning,
            Phase::GameRunning => Phase::ShowWord,
            Phase::ShowWord => Phase::NewRound,
            Phase::WaitingForPlayers => Phase::WaitingForPlayers,
        }
    }
}

// -- Timings --

pub const UPDATE_TIME_FREQUENCY: Duration = Duration::from_millis(1000);

pub const DELAY_WAITING_FOR_START_TO_NEW_ROUND: Duration = Duration::from_secs(10);
pub const DELAY_NEW_ROUND_TO_GAME_RUNNING: Duration = Duration::from_secs(20);
pub const DELAY_GAME_RUNNING_TO_SHOW_WORD: Duration = Duration::from_secs(60);
pub const DELAY_SHOW_WORD_TO_NEW_ROUND: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTimings {
    pub tick: Duration,
    pub waiting_for_start: Duration,
    pub new_round: Duration,
    pub game_running: Duration,
    pub show_word: Duration,
}

impl PhaseTimings {
    /// Total timer length for a phase. `None` means the phase is not timed.
    pub fn duration(&self, phase: Phase) -> Option<Duration> {
        match phase {
            Phase::WaitingForPlayers => None,
            Phase::WaitingForStart => Some(self.waiting_for_start),
            Phase::NewRound => Some(self.new_round),
            Phase::GameRunning => Some(self.game_running),
            Phase::ShowWord => Some(self.show_word),
        }
    }

    /// Number of tick broadcasts a timed phase emits before expiring.
    pub fn ticks(&self, duration: Duration) -> u32 {
        match self.tick.as_millis() {
            0 => 0,
            tick => (duration.as_millis() / tick) as u32,
        }
    }
}

impl Default for PhaseTimings {
    fn default() -> Self {
        Self {
            tick: UPDATE_TIME_FREQUENCY,
            waiting_for_start: DELAY_WAITING_FOR_START_TO_NEW_ROUND,
            new_round: DELAY_NEW_ROUND_TO_GAME_RUNNING,
            game_running: DELAY_GAME_RUNNING_TO_SHOW_WORD,
            show_word: DELAY_SHOW_WORD_TO_NEW_ROUND,
        }
    }
}
