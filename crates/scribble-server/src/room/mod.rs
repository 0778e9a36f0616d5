mod state;
mod timer;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use scribble_common::phase::{Phase, PhaseTimings};
use scribble_common::protocol::{self, ChatMessage, Envelope, RoomResponse};
use scribble_common::words::WordSource;

use crate::player::Player;

pub use state::JoinError;
#[cfg(test)]
pub use state::RoomSnapshot;
use state::{Effect, Recipient, RoomState};
use timer::PhaseTimer;

/// One game room. All mutation goes through `inner`, so joins, guesses and
/// the phase timer observe a single order of changes.
pub struct Room {
    name: String,
    max_players: u8,
    inner: Mutex<RoomInner>,
}

struct RoomInner {
    state: RoomState,
    timer: Option<PhaseTimer>,
}

impl Room {
    pub fn new(
        name: String,
        max_players: u8,
        timings: PhaseTimings,
        words: Arc<dyn WordSource>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.clone(),
            max_players,
            inner: Mutex::new(RoomInner {
                state: RoomState::new(name, max_players, timings, words),
                timer: None,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn username_of(&self, client_id: &str) -> Option<String> {
        let inner = self.inner.lock().await;
        inner
            .state
            .players()
            .iter()
            .find(|p| p.client_id == client_id)
            .map(|p| p.username.clone())
    }

    pub async fn info(&self) -> RoomResponse {
        let player_count = self.inner.lock().await.state.players().len();
        RoomResponse {
            name: self.name.clone(),
            max_players: self.max_players,
            player_count,
        }
    }

    pub async fn add_player(self: &Arc<Self>, player: Player) -> Result<(), JoinError> {
        let mut inner = self.inner.lock().await;
        let username = player.username.clone();
        let effects = inner.state.join(player)?;
        tracing::info!(
            "'{}' joined room '{}' ({}/{})",
            username,
            self.name,
            inner.state.players().len(),
            self.max_players
        );
        self.apply(&mut inner, effects);
        Ok(())
    }

    pub async fn remove_player(self: &Arc<Self>, client_id: &str) -> Option<Player> {
        let mut inner = self.inner.lock().await;
        let (player, effects) = inner.state.leave(client_id);
        if let Some(player) = &player {
            tracing::info!("'{}' left room '{}'", player.username, self.name);
        }
        self.apply(&mut inner, effects);
        player
    }

    /// Sets the round's word from the drawer and starts drawing right away.
    pub async fn choose_word(self: &Arc<Self>, client_id: &str, word: &str) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.state.choose_word(client_id, word) {
            Some(effects) => {
                self.apply(&mut inner, effects);
                true
            }
            None => false,
        }
    }

    /// Scores `guess` if it is correct. Returns whether it was credited.
    pub async fn check_guess(self: &Arc<Self>, guess: &ChatMessage) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.state.check_guess(guess, Instant::now()) {
            Some(effects) => {
                self.apply(&mut inner, effects);
                true
            }
            None => false,
        }
    }

    /// Forwards an already-encoded frame to every member, optionally
    /// skipping one client.
    pub async fn broadcast_frame(&self, frame: Bytes, except: Option<&str>) {
        let inner = self.inner.lock().await;
        let to = match except {
            Some(client_id) => Recipient::AllExcept(client_id.to_string()),
            None => Recipient::All,
        };
        deliver(inner.state.players(), &to, &frame);
    }

    /// Relays stroke data to everyone but the sender while a drawing round
    /// is running. Returns whether it was relayed.
    pub async fn relay_draw_data(&self, sender: &str, frame: Bytes) -> bool {
        let inner = self.inner.lock().await;
        if inner.state.phase() != Phase::GameRunning {
            return false;
        }
        deliver(
            inner.state.players(),
            &Recipient::AllExcept(sender.to_string()),
            &frame,
        );
        true
    }

    pub(crate) async fn emit_tick(
        &self,
        token: &CancellationToken,
        first: bool,
        remaining: Duration,
    ) -> bool {
        let inner = self.inner.lock().await;
        if token.is_cancelled() {
            return false;
        }
        let tick = inner.state.tick(first, remaining);
        send(inner.state.players(), &Recipient::All, &tick);
        true
    }

    pub(crate) async fn expire_timer(self: &Arc<Self>, token: &CancellationToken) {
        let mut inner = self.inner.lock().await;
        if token.is_cancelled() {
            return;
        }
        let effects = inner.state.expire();
        self.apply(&mut inner, effects);
    }

    /// Runs effects while the caller still holds the room lock. Sends only
    /// enqueue onto connection channels; socket writes happen elsewhere.
    fn apply(self: &Arc<Self>, inner: &mut RoomInner, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Send { to, envelope } => send(inner.state.players(), &to, &envelope),
                Effect::StartTimer { phase, duration } => {
                    if let Some(previous) = inner.timer.take() {
                        if !previous.is_finished() {
                            tracing::trace!("Replacing running timer in room '{}'", self.name);
                        }
                        previous.cancel();
                    }
                    inner.timer = Some(PhaseTimer::start(
                        Arc::downgrade(self),
                        phase,
                        duration,
                        inner.state.timings(),
                    ));
                }
                Effect::CancelTimer => {
                    if let Some(previous) = inner.timer.take() {
                        previous.cancel();
                    }
                }
            }
        }
    }
}

#[cfg(test)]
impl Room {
    pub fn max_players(&self) -> u8 {
        self.max_players
    }

    pub async fn phase(&self) -> Phase {
        self.inner.lock().await.state.phase()
    }

    pub async fn contains_player(&self, username: &str) -> bool {
        self.inner.lock().await.state.contains_player(username)
    }

    pub async fn snapshot(&self) -> RoomSnapshot {
        self.inner.lock().await.state.snapshot()
    }

    async fn timer_running(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.timer.as_ref().is_some_and(|t| !t.is_finished())
    }
}

fn send(players: &[Player], to: &Recipient, envelope: &Envelope) {
    match protocol::encode(envelope) {
        Ok(frame) => deliver(players, to, &frame),
        Err(e) => tracing::error!("Failed to serialize message: {}", e),
    }
}

/// Best effort per recipient: inactive or failing sinks are skipped.
fn deliver(players: &[Player], to: &Recipient, frame: &Bytes) {
    for player in players.iter().filter(|p| to.includes(&p.client_id)) {
        if !player.sink.is_active() {
            continue;
        }
        if let Err(e) = player.sink.send(frame.clone()) {
            tracing::debug!("Skipping '{}': {}", player.username, e);
        }
    }
}
