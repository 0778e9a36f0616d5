use uuid::Uuid;

use scribble_common::protocol::{Disconnect, Envelope, Hello, Inbound, Welcome, POLICY_VIOLATION};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("first frame was not a hello")]
    MissingHello,
    #[error("empty client id")]
    EmptyClientId,
}

impl SessionError {
    /// Frame sent before closing a connection that never established a
    /// session.
    pub fn close_frame(&self) -> Envelope {
        Envelope::Disconnect(Disconnect {
            code: POLICY_VIOLATION,
            reason: "No session.".into(),
        })
    }
}

/// Identity of one connection. `client_id` is chosen by the client and keys
/// its player in a room; `session_id` is issued here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub client_id: String,
    pub session_id: Uuid,
}

impl Session {
    pub fn establish(first: Inbound) -> Result<Self, SessionError> {
        match first {
            Inbound::Known(Envelope::Hello(Hello { client_id })) => {
                let client_id = client_id.trim().to_string();
                if client_id.is_empty() {
                    return Err(SessionError::EmptyClientId);
                }
                Ok(Self {
                    client_id,
                    session_id: Uuid::new_v4(),
                })
            }
            _ => Err(SessionError::MissingHello),
        }
    }

    pub fn welcome(&self) -> Envelope {
        Envelope::Welcome(Welcome {
            client_id: self.client_id.clone(),
            session_id: self.session_id,
        })
    }
}
