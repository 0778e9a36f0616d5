use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::time::Instant;

use scribble_common::phase::{Phase, PhaseTimings};
use scribble_common::protocol::{
    Announcement, AnnouncementType, ChatMessage, ChosenWord, Envelope, GameState, NewWords,
    PhaseChange,
};
use scribble_common::words::{mask_word, matches_word, WordSource};

use crate::player::Player;
#[cfg(test)]
use crate::player::PlayerView;

pub const NEW_WORDS_COUNT: usize = 3;

/// Taken from the drawer when a round ends without a single correct guess.
pub const PENALTY_NOBODY_GUESSED_IT: i32 = 50;
pub const GUESS_SCORE_DEFAULT: f64 = 50.0;
pub const GUESS_SCORE_PERCENTAGE_MULTIPLIER: f64 = 50.0;
pub const GUESS_SCORE_FOR_DRAWING_PLAYER: i32 = 50;

// -- Effects --

/// Who a queued envelope goes to, by client id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    All,
    AllExcept(String),
    Only(String),
}

impl Recipient {
    pub fn includes(&self, client_id: &str) -> bool {
        match self {
            Recipient::All => true,
            Recipient::AllExcept(excluded) => excluded != client_id,
            Recipient::Only(target) => target == client_id,
        }
    }
}

/// Side effects of a state change. The owning room runs them after the
/// mutation that produced them, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Send { to: Recipient, envelope: Envelope },
    /// Replaces any running timer.
    StartTimer { phase: Phase, duration: Duration },
    CancelTimer,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("username '{0}' is already taken in this room")]
    UsernameTaken(String),
    #[error("client '{0}' is already in this room")]
    ClientAlreadyJoined(String),
    #[error("room is full")]
    RoomFull,
}

#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub name: String,
    pub max_players: u8,
    pub phase: Phase,
    pub players: Vec<PlayerView>,
    pub drawing_player: Option<String>,
    pub drawing_player_index: usize,
    pub word: Option<String>,
}

// -- Room State Machine --

pub struct RoomState {
    name: String,
    max_players: u8,
    timings: PhaseTimings,
    words: Arc<dyn WordSource>,
    phase: Phase,
    players: Vec<Player>,
    word: Option<String>,
    cur_words: Vec<String>,
    drawing_player_index: usize,
    /// Client id of the current drawer.
    drawing_player: Option<String>,
    /// Usernames credited this round.
    winning_players: HashSet<String>,
    start_time: Instant,
}

impl RoomState {
    pub fn new(
        name: String,
        max_players: u8,
        timings: PhaseTimings,
        words: Arc<dyn WordSource>,
    ) -> Self {
        Self {
            name,
            max_players,
            timings,
            words,
            phase: Phase::WaitingForPlayers,
            players: Vec::new(),
            word: None,
            cur_words: Vec::new(),
            drawing_player_index: 0,
            drawing_player: None,
            winning_players: HashSet::new(),
            start_time: Instant::now(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn timings(&self) -> &PhaseTimings {
        &self.timings
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn drawing_player(&self) -> Option<&Player> {
        let id = self.drawing_player.as_deref()?;
        self.players.iter().find(|p| p.client_id == id)
    }

    fn drawing_player_mut(&mut self) -> Option<&mut Player> {
        let id = self.drawing_player.as_deref()?;
        self.players.iter_mut().find(|p| p.client_id == id)
    }

    pub fn contains_player(&self, username: &str) -> bool {
        self.players.iter().any(|p| p.username == username)
    }

    // -- Membership --

    pub fn join(&mut self, player: Player) -> Result<Vec<Effect>, JoinError> {
        if self.contains_player(&player.username) {
            return Err(JoinError::UsernameTaken(player.username));
        }
        if self.players.iter().any(|p| p.client_id == player.client_id) {
            return Err(JoinError::ClientAlreadyJoined(player.client_id));
        }
        if self.players.len() >= self.max_players as usize {
            return Err(JoinError::RoomFull);
        }

        let username = player.username.clone();
        self.players.push(player);

        let mut effects = Vec::new();
        if self.players.len() == 1 {
            effects.extend(self.set_phase(Phase::WaitingForPlayers));
        } else if self.players.len() == 2 && self.phase == Phase::WaitingForPlayers {
            // the shuffled order is the drawing order
            self.players.shuffle(&mut rand::thread_rng());
            effects.extend(self.set_phase(Phase::WaitingForStart));
        }
        if self.phase == Phase::WaitingForStart && self.players.len() == self.max_players as usize
        {
            self.players.shuffle(&mut rand::thread_rng());
            effects.extend(self.set_phase(Phase::NewRound));
        }

        effects.push(Effect::Send {
            to: Recipient::All,
            envelope: Envelope::Announcement(Announcement::now(
                format!("{} joined the party!", username),
                AnnouncementType::PlayerJoined,
            )),
        });
        Ok(effects)
    }

    pub fn leave(&mut self, client_id: &str) -> (Option<Player>, Vec<Effect>) {
        let Some(pos) = self.players.iter().position(|p| p.client_id == client_id) else {
            return (None, Vec::new());
        };
        let player = self.players.remove(pos);
        self.winning_players.remove(&player.username);
        self.drawing_player_index = self
            .drawing_player_index
            .min(self.players.len().saturating_sub(1));

        let was_drawing = self.drawing_player.as_deref() == Some(client_id);
        if was_drawing {
            self.drawing_player = None;
        }

        let effects = if self.players.len() < 2 {
            if self.phase == Phase::WaitingForPlayers {
                Vec::new()
            } else {
                self.set_phase(Phase::WaitingForPlayers)
            }
        } else if was_drawing && matches!(self.phase, Phase::NewRound | Phase::GameRunning) {
            self.set_phase(Phase::NewRound)
        } else if self.phase == Phase::GameRunning && self.everybody_guessed() {
            self.finish_round()
        } else {
            Vec::new()
        };
        (Some(player), effects)
    }

    // -- Phase transitions --

    /// The only place the phase changes. Runs the entry action of `phase`.
    pub fn set_phase(&mut self, phase: Phase) -> Vec<Effect> {
        self.phase = phase;
        tracing::debug!("Room '{}' entered {:?}", self.name, phase);
        match phase {
            Phase::WaitingForPlayers => self.waiting_for_players(),
            Phase::WaitingForStart => self.timer_for(phase).into_iter().collect(),
            Phase::NewRound => self.new_round(),
            Phase::GameRunning => self.game_running(),
            Phase::ShowWord => self.show_word(),
        }
    }

    /// Transition taken when the current phase's timer runs out.
    pub fn expire(&mut self) -> Vec<Effect> {
        let next = self.phase.after_timer();
        self.set_phase(next)
    }

    fn timer_for(&self, phase: Phase) -> Option<Effect> {
        self.timings
            .duration(phase)
            .map(|duration| Effect::StartTimer { phase, duration })
    }

    fn waiting_for_players(&mut self) -> Vec<Effect> {
        if let Some(drawer) = self.drawing_player_mut() {
            drawer.is_drawing = false;
        }
        self.drawing_player = None;
        vec![
            Effect::CancelTimer,
            Effect::Send {
                to: Recipient::All,
                envelope: Envelope::PhaseChange(PhaseChange {
                    phase: Some(Phase::WaitingForPlayers),
                    time: 0,
                    drawing_player: None,
                }),
            },
        ]
    }

    fn new_round(&mut self) -> Vec<Effect> {
        self.word = None;
        self.cur_words = self.words.random_words(NEW_WORDS_COUNT);
        self.next_drawing_player();

        let mut effects = Vec::new();
        if let Some(drawer) = &self.drawing_player {
            effects.push(Effect::Send {
                to: Recipient::Only(drawer.clone()),
                envelope: Envelope::NewWords(NewWords {
                    new_words: self.cur_words.clone(),
                }),
            });
        }
        effects.extend(self.timer_for(Phase::NewRound));
        effects
    }

    fn game_running(&mut self) -> Vec<Effect> {
        self.winning_players.clear();
        let word = match self.word.take() {
            Some(word) => word,
            None => match self.cur_words.choose(&mut rand::thread_rng()) {
                Some(word) => word.clone(),
                None => self.words.random_word(),
            },
        };
        self.word = Some(word.clone());
        self.start_time = Instant::now();

        let drawer = self
            .drawing_player()
            .map(|p| (p.client_id.clone(), p.username.clone()));
        let drawing_username = drawer
            .as_ref()
            .map(|(_, username)| username.clone())
            .unwrap_or_default();
        let masked = Envelope::GameState(GameState {
            drawing_player: drawing_username.clone(),
            word: mask_word(&word),
        });

        let mut effects = Vec::new();
        match drawer {
            Some((client_id, _)) => {
                effects.push(Effect::Send {
                    to: Recipient::AllExcept(client_id.clone()),
                    envelope: masked,
                });
                effects.push(Effect::Send {
                    to: Recipient::Only(client_id),
                    envelope: Envelope::GameState(GameState {
                        drawing_player: drawing_username,
                        word,
                    }),
                });
            }
            None => effects.push(Effect::Send {
                to: Recipient::All,
                envelope: masked,
            }),
        }
        effects.extend(self.timer_for(Phase::GameRunning));

        tracing::info!(
            "Drawing phase in room '{}' started. It'll last {}s",
            self.name,
            self.timings.game_running.as_secs()
        );
        effects
    }

    fn show_word(&mut self) -> Vec<Effect> {
        if self.winning_players.is_empty() {
            if let Some(drawer) = self.drawing_player_mut() {
                drawer.score -= PENALTY_NOBODY_GUESSED_IT;
            }
        }

        let mut effects = Vec::new();
        if let Some(word) = &self.word {
            effects.push(Effect::Send {
                to: Recipient::All,
                envelope: Envelope::ChosenWord(ChosenWord {
                    chosen_word: word.clone(),
                    room_name: self.name.clone(),
                }),
            });
        }
        effects.extend(self.timer_for(Phase::ShowWord));
        effects
    }

    // -- Drawer rotation --

    pub fn next_drawing_player(&mut self) {
        if let Some(previous) = self.drawing_player_mut() {
            previous.is_drawing = false;
        }
        if self.players.is_empty() {
            return;
        }

        let last = self.players.len() - 1;
        let drawer = &mut self.players[self.drawing_player_index.min(last)];
        drawer.is_drawing = true;
        self.drawing_player = Some(drawer.client_id.clone());

        self.drawing_player_index = if self.drawing_player_index < last {
            self.drawing_player_index + 1
        } else {
            0
        };
    }

    // -- Guessing --

    /// Drawer's choice among the offered words. Only accepted from the
    /// current drawer while the round is counting down.
    pub fn choose_word(&mut self, client_id: &str, word: &str) -> Option<Vec<Effect>> {
        if self.phase != Phase::NewRound || self.drawing_player.as_deref() != Some(client_id) {
            return None;
        }
        let word = word.trim();
        if word.is_empty() {
            return None;
        }
        self.word = Some(word.to_string());
        Some(self.set_phase(Phase::GameRunning))
    }

    pub fn is_guess_correct(&self, guess: &ChatMessage) -> bool {
        let Some(word) = self.word.as_deref() else {
            return false;
        };
        self.phase == Phase::GameRunning
            && matches_word(&guess.message, word)
            && self.contains_player(&guess.from)
            && self.drawing_player().map(|p| p.username.as_str()) != Some(guess.from.as_str())
            && !self.winning_players.contains(&guess.from)
    }

    /// Credits a correct guess made at `now`. Returns `None` when the guess
    /// is wrong or not eligible.
    pub fn check_guess(&mut self, guess: &ChatMessage, now: Instant) -> Option<Vec<Effect>> {
        if !self.is_guess_correct(guess) {
            return None;
        }

        let guessing_time = now.saturating_duration_since(self.start_time).as_secs_f64();
        let time_percentage_left = 1.0 - guessing_time / self.timings.game_running.as_secs_f64();
        let score =
            (GUESS_SCORE_DEFAULT + GUESS_SCORE_PERCENTAGE_MULTIPLIER * time_percentage_left).floor();
        let player_count = self.players.len() as i32;

        if let Some(player) = self.players.iter_mut().find(|p| p.username == guess.from) {
            player.score += score as i32;
        }
        if let Some(drawer) = self.drawing_player_mut() {
            drawer.score += GUESS_SCORE_FOR_DRAWING_PLAYER / player_count;
        }

        let mut effects = vec![Effect::Send {
            to: Recipient::All,
            envelope: Envelope::Announcement(Announcement::now(
                format!("{} has guessed it!", guess.from),
                AnnouncementType::PlayerGuessed,
            )),
        }];
        self.winning_players.insert(guess.from.clone());
        if self.everybody_guessed() {
            effects.extend(self.finish_round());
        }
        Some(effects)
    }

    fn everybody_guessed(&self) -> bool {
        self.players.len() >= 2 && self.winning_players.len() == self.players.len() - 1
    }

    fn finish_round(&mut self) -> Vec<Effect> {
        let mut effects = vec![Effect::Send {
            to: Recipient::All,
            envelope: Envelope::Announcement(Announcement::now(
                "Everybody guessed it! New round is starting...",
                AnnouncementType::EverybodyGuessed,
            )),
        }];
        effects.extend(self.set_phase(Phase::NewRound));
        effects
    }

    // -- Ticks --

    /// Countdown broadcast for the running timer. The phase is only named on
    /// the first tick.
    pub fn tick(&self, first: bool, remaining: Duration) -> Envelope {
        Envelope::PhaseChange(PhaseChange {
            phase: first.then_some(self.phase),
            time: remaining.as_millis() as u64,
            drawing_player: self.drawing_player().map(|p| p.username.clone()),
        })
    }
}

/// Inspection helpers for tests.
#[cfg(test)]
impl RoomState {
    pub fn word(&self) -> Option<&str> {
        self.word.as_deref()
    }

    pub fn cur_words(&self) -> &[String] {
        &self.cur_words
    }

    pub fn drawing_player_index(&self) -> usize {
        self.drawing_player_index
    }

    pub fn round_started_at(&self) -> Instant {
        self.start_time
    }

    pub fn has_guessed(&self, username: &str) -> bool {
        self.winning_players.contains(username)
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            name: self.name.clone(),
            max_players: self.max_players,
            phase: self.phase,
            players: self.players.iter().map(PlayerView::from).collect(),
            drawing_player: self.drawing_player().map(|p| p.username.clone()),
            drawing_player_index: self.drawing_player_index,
            word: self.word.clone(),
        }
    }
}
