use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use uuid::Uuid;

use crate::phase::Phase;

// -- Framing --

pub type Transport = Framed<TcpStream, LengthDelimitedCodec>;

pub fn framed_transport(stream: TcpStream) -> Transport {
    LengthDelimitedCodec::builder()
        .max_frame_length(64 * 1024)
        .new_framed(stream)
}

/// Close code sent when a connection has no valid session.
pub const POLICY_VIOLATION: u16 = 1008;

// -- Envelope --

/// Every frame on the wire is one of these, tagged by its `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    // Session
    #[serde(rename = "TYPE_HELLO")]
    Hello(Hello),
    #[serde(rename = "TYPE_WELCOME")]
    Welcome(Welcome),
    #[serde(rename = "TYPE_DISCONNECT")]
    Disconnect(Disconnect),

    // Room directory
    #[serde(rename = "TYPE_CREATE_ROOM")]
    CreateRoom(CreateRoom),
    #[serde(rename = "TYPE_GET_ROOMS")]
    GetRooms(GetRooms),
    #[serde(rename = "TYPE_ROOM_LIST")]
    RoomList(RoomList),
    #[serde(rename = "TYPE_BASIC_API_RESPONSE")]
    BasicApiResponse(BasicApiResponse),

    // Game
    #[serde(rename = "TYPE_CHAT_MESSAGE")]
    ChatMessage(ChatMessage),
    #[serde(rename = "TYPE_DRAW_DATA")]
    DrawData(DrawData),
    #[serde(rename = "TYPE_ANNOUNCEMENT")]
    Announcement(Announcement),
    #[serde(rename = "TYPE_JOIN_ROOM_HANDSHAKE")]
    JoinRoomHandshake(JoinRoomHandshake),
    #[serde(rename = "TYPE_PHASE_CHANGE")]
    PhaseChange(PhaseChange),
    #[serde(rename = "TYPE_CHOSEN_WORD")]
    ChosenWord(ChosenWord),
    #[serde(rename = "TYPE_GAME_STATE")]
    GameState(GameState),
    #[serde(rename = "TYPE_NEW_WORDS")]
    NewWords(NewWords),
    #[serde(rename = "TYPE_GAME_ERROR")]
    GameError(GameError),

    #[serde(other)]
    Unknown,
}

/// The part every envelope shares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseModel {
    #[serde(rename = "type")]
    pub kind: String,
}

/// A decoded inbound frame. Unrecognized tags keep only the base fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Known(Envelope),
    Unknown(BaseModel),
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

// -- Session --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    pub client_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    pub client_id: String,
    pub session_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disconnect {
    pub code: u16,
    pub reason: String,
}

// -- Room directory --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoom {
    pub name: String,
    pub max_players: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetRooms {
    #[serde(default)]
    pub search_query: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomResponse {
    pub name: String,
    pub max_players: u8,
    pub player_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomList {
    pub rooms: Vec<RoomResponse>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicApiResponse {
    pub successful: bool,
    pub message: Option<String>,
}

// -- Game --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub from: String,
    pub room_name: String,
    pub message: String,
    #[serde(default)]
    pub timestamp: i64,
}

/// Stroke payload. Everything besides the room name is opaque to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawData {
    pub room_name: String,
    #[serde(flatten)]
    pub stroke_data: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnnouncementType {
    PlayerJoined,
    PlayerGuessed,
    EverybodyGuessed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    pub message: String,
    pub timestamp: i64,
    pub announcement_type: AnnouncementType,
}

impl Announcement {
    pub fn now(message: impl Into<String>, announcement_type: AnnouncementType) -> Self {
        Self {
            message: message.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            announcement_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomHandshake {
    pub username: String,
    pub room_name: String,
}

/// `phase` is only set on the first tick of a phase; later ticks only
/// update the remaining time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseChange {
    pub phase: Option<Phase>,
    pub time: u64,
    pub drawing_player: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChosenWord {
    pub chosen_word: String,
    pub room_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub drawing_player: String,
    pub word: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWords {
    pub new_words: Vec<String>,
}

/// Sent as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ErrorCode {
    RoomNotFound,
}

pub const ERROR_ROOM_NOT_FOUND: u8 = 0;

impl From<ErrorCode> for u8 {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::RoomNotFound => ERROR_ROOM_NOT_FOUND,
        }
    }
}

impl TryFrom<u8> for ErrorCode {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            ERROR_ROOM_NOT_FOUND => Ok(ErrorCode::RoomNotFound),
            other => Err(format!("unknown error code {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameError {
    pub error_type: ErrorCode,
}

// -- Serialization helpers --

pub fn encode(envelope: &Envelope) -> Result<Bytes, serde_json::Error> {
    let json = serde_json::to_vec(envelope)?;
    Ok(Bytes::from(json))
}

/// Reads the `type` tag first, then decodes the whole body into the
/// matching payload. Unknown tags never fail on their own.
pub fn decode(data: &[u8]) -> Result<Inbound, ProtocolError> {
    let value: Value = serde_json::from_slice(data)?;
    let base = BaseModel::deserialize(&value)?;
    match Envelope::deserialize(value)? {
        Envelope::Unknown => Ok(Inbound::Unknown(base)),
        envelope => Ok(Inbound::Known(envelope)),
    }
}

// -- Transport helpers --

pub async fn send_message(transport: &mut Transport, envelope: &Envelope) -> anyhow::Result<()> {
    let bytes = encode(envelope).map_err(|e| anyhow::anyhow!("serialize error: {}", e))?;
    transport
        .send(bytes)
        .await
        .map_err(|e| anyhow::anyhow!("send error: {}", e))
}

pub async fn recv_message(transport: &mut Transport) -> anyhow::Result<Option<Inbound>> {
    match transport.next().await {
        Some(Ok(frame)) => {
            let msg = decode(&frame).map_err(|e| anyhow::anyhow!("deserialize error: {}", e))?;
            Ok(Some(msg))
        }
        Some(Err(e)) => Err(anyhow::anyhow!("recv error: {}", e)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_str(text: &str) -> Inbound {
        decode(text.as_bytes()).unwrap()
    }

    #[test]
    fn test_decode_join_handshake() {
        let inbound = decode_str(
            r#"{"type":"TYPE_JOIN_ROOM_HANDSHAKE","username":"alice","roomName":"r1","clientId":"c1"}"#,
        );
        assert_eq!(
            inbound,
            Inbound::Known(Envelope::JoinRoomHandshake(JoinRoomHandshake {
                username: "alice".into(),
                room_name: "r1".into(),
            }))
        );
    }

    #[test]
    fn test_decode_unknown_tag() {
        let inbound = decode_str(r#"{"type":"TYPE_SOMETHING_NEW","payload":[1,2,3]}"#);
        assert_eq!(
            inbound,
            Inbound::Unknown(BaseModel {
                kind: "TYPE_SOMETHING_NEW".into()
            })
        );
    }

    #[test]
    fn test_decode_rejects_missing_type() {
        assert!(decode(br#"{"message":"hi"}"#).is_err());
        assert!(decode(b"not json").is_err());
    }

    #[test]
    fn test_decode_rejects_bad_body_for_known_tag() {
        assert!(decode(br#"{"type":"TYPE_CHOSEN_WORD","roomName":"r1"}"#).is_err());
    }

    #[test]
    fn test_draw_data_keeps_stroke_fields() {
        let inbound = decode_str(
            r#"{"type":"TYPE_DRAW_DATA","roomName":"r1","fromX":1.5,"toY":2.0,"color":-16777216}"#,
        );
        match inbound {
            Inbound::Known(Envelope::DrawData(data)) => {
                assert_eq!(data.room_name, "r1");
                assert_eq!(data.stroke_data.get("fromX"), Some(&Value::from(1.5)));
                assert_eq!(data.stroke_data.get("color"), Some(&Value::from(-16777216)));
            }
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_phase_change_wire_shape() {
        let bytes = encode(&Envelope::PhaseChange(PhaseChange {
            phase: None,
            time: 59000,
            drawing_player: Some("bob".into()),
        }))
        .unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["type"], "TYPE_PHASE_CHANGE");
        assert_eq!(value["phase"], Value::Null);
        assert_eq!(value["time"], 59000);
        assert_eq!(value["drawingPlayer"], "bob");
    }

    #[test]
    fn test_announcement_wire_shape() {
        let bytes = encode(&Envelope::Announcement(Announcement {
            message: "alice has guessed it!".into(),
            timestamp: 1,
            announcement_type: AnnouncementType::PlayerGuessed,
        }))
        .unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["type"], "TYPE_ANNOUNCEMENT");
        assert_eq!(value["announcementType"], "player-guessed");
    }

    #[test]
    fn test_chosen_word_and_error_wire_shape() {
        let bytes = encode(&Envelope::ChosenWord(ChosenWord {
            chosen_word: "banana".into(),
            room_name: "r1".into(),
        }))
        .unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["chosenWord"], "banana");
        assert_eq!(value["roomName"], "r1");

        let bytes = encode(&Envelope::GameError(GameError {
            error_type: ErrorCode::RoomNotFound,
        }))
        .unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["type"], "TYPE_GAME_ERROR");
        assert_eq!(value["errorType"], 0);
    }

    #[test]
    fn test_game_error_code_is_numeric() {
        let inbound = decode_str(r#"{"type":"TYPE_GAME_ERROR","errorType":0}"#);
        assert_eq!(
            inbound,
            Inbound::Known(Envelope::GameError(GameError {
                error_type: ErrorCode::RoomNotFound,
            }))
        );
        assert!(decode(br#"{"type":"TYPE_GAME_ERROR","errorType":7}"#).is_err());
        assert!(decode(br#"{"type":"TYPE_GAME_ERROR","errorType":"room-not-found"}"#).is_err());
    }

    #[test]
    fn test_chat_message_timestamp_optional() {
        let inbound =
            decode_str(r#"{"type":"TYPE_CHAT_MESSAGE","from":"a","roomName":"r1","message":"hi"}"#);
        match inbound {
            Inbound::Known(Envelope::ChatMessage(msg)) => {
                assert_eq!(msg.message, "hi");
                assert_eq!(msg.timestamp, 0);
            }
            other => panic!("wrong variant: {:?}", other),
        }
    }
}
