use bytes::Bytes;
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("connection closed")]
    Closed,
    #[error("outbound queue full")]
    Full,
}

/// Outbound half of a connection. Frames are queued for the connection's
/// writer task; a full or closed queue drops the frame.
#[derive(Debug, Clone)]
pub struct PlayerSink {
    tx: mpsc::Sender<Bytes>,
}

impl PlayerSink {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }

    pub fn send(&self, frame: Bytes) -> Result<(), SinkError> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }

    pub fn is_active(&self) -> bool {
        !self.tx.is_closed()
    }
}

#[derive(Debug)]
pub struct Player {
    pub client_id: String,
    pub username: String,
    pub score: i32,
    pub is_drawing: bool,
    pub sink: PlayerSink,
}

impl Player {
    pub fn new(client_id: String, username: String, sink: PlayerSink) -> Self {
        Self {
            client_id,
            username,
            score: 0,
            is_drawing: false,
            sink,
        }
    }
}

/// Read-only copy of a player for snapshots.
#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerView {
    pub client_id: String,
    pub username: String,
    pub score: i32,
    pub is_drawing: bool,
}

#[cfg(test)]
impl From<&Player> for PlayerView {
    fn from(player: &Player) -> Self {
        Self {
            client_id: player.client_id.clone(),
            username: player.username.clone(),
            score: player.score,
            is_drawing: player.is_drawing,
        }
    }
}
