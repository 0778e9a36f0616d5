use std::sync::Arc;

use bytes::Bytes;

use scribble_common::protocol::{
    self, BasicApiResponse, ChatMessage, ChosenWord, CreateRoom, DrawData, Envelope, ErrorCode,
    GameError, GetRooms, Inbound, JoinRoomHandshake, RoomList,
};

use crate::player::{Player, PlayerSink};
use crate::room::{JoinError, Room};
use crate::server::SharedState;
use crate::session::Session;

/// Dispatches one decoded frame. `frame` is the raw body, kept for
/// messages that are relayed verbatim.
pub async fn handle_message(
    session: &Session,
    frame: Bytes,
    inbound: Inbound,
    state: &SharedState,
) -> anyhow::Result<()> {
    let envelope = match inbound {
        Inbound::Known(envelope) => envelope,
        Inbound::Unknown(base) => {
            tracing::debug!(
                "Ignoring unknown message type '{}' from '{}'",
                base.kind,
                session.client_id
            );
            return Ok(());
        }
    };

    match envelope {
        Envelope::JoinRoomHandshake(handshake) => handle_join(session, handshake, state).await?,
        Envelope::DrawData(DrawData { room_name, .. }) => {
            if let Some(room) = joined_room(session, &room_name, state).await {
                if !room.relay_draw_data(&session.client_id, frame).await {
                    tracing::trace!("Dropped draw data outside of drawing in '{}'", room_name);
                }
            }
        }
        Envelope::ChosenWord(ChosenWord {
            chosen_word,
            room_name,
        }) => {
            if let Some(room) = joined_room(session, &room_name, state).await {
                if !room.choose_word(&session.client_id, &chosen_word).await {
                    tracing::debug!(
                        "Ignored chosen word from '{}' in '{}'",
                        session.client_id,
                        room_name
                    );
                }
            }
        }
        Envelope::ChatMessage(message) => handle_chat(session, frame, message, state).await,
        Envelope::CreateRoom(CreateRoom { name, max_players }) => {
            let reply = match state.directory.create_room(&name, max_players).await {
                Ok(_) => BasicApiResponse {
                    successful: true,
                    message: None,
                },
                Err(e) => BasicApiResponse {
                    successful: false,
                    message: Some(e.to_string()),
                },
            };
            send_to_connection(session, &Envelope::BasicApiResponse(reply), state).await?;
        }
        Envelope::GetRooms(GetRooms { search_query }) => {
            let rooms = state.directory.search_rooms(&search_query).await;
            send_to_connection(session, &Envelope::RoomList(RoomList { rooms }), state).await?;
        }
        other => {
            tracing::debug!(
                "No handler for message from '{}': {:?}",
                session.client_id,
                other
            );
        }
    }
    Ok(())
}

async fn handle_join(
    session: &Session,
    handshake: JoinRoomHandshake,
    state: &SharedState,
) -> anyhow::Result<()> {
    let JoinRoomHandshake {
        username,
        room_name,
    } = handshake;

    let Some(room) = state.directory.get_room(&room_name).await else {
        let error = Envelope::GameError(GameError {
            error_type: ErrorCode::RoomNotFound,
        });
        return send_to_connection(session, &error, state).await;
    };

    let (tx, previous) = {
        let conns = state.connections.read().await;
        let Some(conn) = conns.get(&session.session_id) else {
            return Ok(());
        };
        (conn.tx.clone(), conn.room_name.clone())
    };
    if previous.as_deref() == Some(room_name.as_str()) {
        tracing::debug!("'{}' is already in room '{}'", session.client_id, room_name);
        return Ok(());
    }

    let player = Player::new(session.client_id.clone(), username, PlayerSink::new(tx));
    match room.add_player(player).await {
        Ok(()) => {}
        Err(JoinError::UsernameTaken(username)) => {
            tracing::debug!("Ignoring join of '{}' to '{}': name taken", username, room_name);
            return Ok(());
        }
        Err(e) => {
            tracing::debug!("Join to '{}' refused: {}", room_name, e);
            return Ok(());
        }
    }

    if let Some(previous) = previous {
        leave_room(session, &previous, state).await;
    }
    if let Some(conn) = state.connections.write().await.get_mut(&session.session_id) {
        conn.room_name = Some(room_name);
    }
    Ok(())
}

/// Chat is relayed to the whole room as-is and then checked as a guess.
/// Messages claiming another member's name are dropped.
async fn handle_chat(session: &Session, frame: Bytes, message: ChatMessage, state: &SharedState) {
    let Some(room) = joined_room(session, &message.room_name, state).await else {
        return;
    };
    match room.username_of(&session.client_id).await {
        Some(username) if username == message.from => {}
        _ => {
            tracing::debug!(
                "Dropping chat from '{}' sent as '{}'",
                session.client_id,
                message.from
            );
            return;
        }
    }

    room.broadcast_frame(frame, None).await;
    if room.check_guess(&message).await {
        tracing::debug!("'{}' guessed the word in '{}'", message.from, room.name());
    }
}

/// The named room, if this connection has joined it.
async fn joined_room(session: &Session, room_name: &str, state: &SharedState) -> Option<Arc<Room>> {
    let joined = state
        .connections
        .read()
        .await
        .get(&session.session_id)
        .is_some_and(|conn| conn.room_name.as_deref() == Some(room_name));
    if !joined {
        tracing::debug!("'{}' is not in room '{}'", session.client_id, room_name);
        return None;
    }
    state.directory.get_room(room_name).await
}

async fn leave_room(session: &Session, room_name: &str, state: &SharedState) {
    if let Some(room) = state.directory.get_room(room_name).await {
        room.remove_player(&session.client_id).await;
    }
}

pub async fn handle_disconnect(session: &Session, state: &SharedState) {
    let handle = state.connections.write().await.remove(&session.session_id);
    if let Some(room_name) = handle.and_then(|h| h.room_name) {
        leave_room(session, &room_name, state).await;
    }
}

async fn send_to_connection(
    session: &Session,
    envelope: &Envelope,
    state: &SharedState,
) -> anyhow::Result<()> {
    let frame = protocol::encode(envelope)?;
    let conns = state.connections.read().await;
    if let Some(conn) = conns.get(&session.session_id) {
        if let Err(e) = conn.tx.try_send(frame) {
            tracing::debug!("Reply to '{}' dropped: {}", session.client_id, e);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionHandle;
    use crate::directory::RoomDirectory;
    use crate::server::ServerState;
    use scribble_common::phase::{Phase, PhaseTimings};
    use scribble_common::protocol::{AnnouncementType, BaseModel};
    use scribble_common::words::WordSource;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    struct FixedWords;

    impl WordSource for FixedWords {
        fn random_words(&self, n: usize) -> Vec<String> {
            ["banana", "apple", "cherry"]
                .iter()
                .take(n)
                .map(|w| w.to_string())
                .collect()
        }

        fn random_word(&self) -> String {
            "banana".into()
        }
    }

    fn make_state() -> SharedState {
        ServerState::new(
            RoomDirectory::new(PhaseTimings::default(), Arc::new(FixedWords)),
            100,
        )
    }

    async fn connect(state: &SharedState, client_id: &str) -> (Session, mpsc::Receiver<Bytes>) {
        let session = Session {
            client_id: client_id.into(),
            session_id: Uuid::new_v4(),
        };
        let (tx, rx) = mpsc::channel(256);
        state.connections.write().await.insert(
            session.session_id,
            ConnectionHandle {
                session: session.clone(),
                tx,
                room_name: None,
            },
        );
        (session, rx)
    }

    async fn dispatch(session: &Session, envelope: Envelope, state: &SharedState) {
        let frame = protocol::encode(&envelope).unwrap();
        handle_message(session, frame, Inbound::Known(envelope), state)
            .await
            .unwrap();
    }

    fn drain(rx: &mut mpsc::Receiver<Bytes>) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let Inbound::Known(envelope) = protocol::decode(&frame).unwrap() {
                out.push(envelope);
            }
        }
        out
    }

    fn join_msg(username: &str, room_name: &str) -> Envelope {
        Envelope::JoinRoomHandshake(JoinRoomHandshake {
            username: username.into(),
            room_name: room_name.into(),
        })
    }

    fn chat(from: &str, message: &str) -> Envelope {
        Envelope::ChatMessage(ChatMessage {
            from: from.into(),
            room_name: "r1".into(),
            message: message.into(),
            timestamp: 0,
        })
    }

    async fn room_name_of(session: &Session, state: &SharedState) -> Option<String> {
        state
            .connections
            .read()
            .await
            .get(&session.session_id)
            .and_then(|c| c.room_name.clone())
    }

    #[tokio::test]
    async fn test_create_room_replies() {
        let state = make_state();
        let (alice, mut rx) = connect(&state, "c1").await;

        let create = |max_players| {
            Envelope::CreateRoom(CreateRoom {
                name: "r1".into(),
                max_players,
            })
        };
        dispatch(&alice, create(4), &state).await;
        dispatch(&alice, create(4), &state).await;
        dispatch(&alice, create(1), &state).await;

        let replies: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                Envelope::BasicApiResponse(r) => Some(r),
                _ => None,
            })
            .collect();
        assert_eq!(replies.len(), 3);
        assert!(replies[0].successful);
        assert!(!replies[1].successful);
        assert_eq!(replies[1].message.as_deref(), Some("Room already exists."));
        assert!(!replies[2].successful);
    }

    #[tokio::test]
    async fn test_get_rooms_lists_matches() {
        let state = make_state();
        state.directory.create_room("Doodles", 4).await.unwrap();
        state.directory.create_room("sketch", 2).await.unwrap();
        let (alice, mut rx) = connect(&state, "c1").await;

        dispatch(
            &alice,
            Envelope::GetRooms(GetRooms {
                search_query: "doo".into(),
            }),
            &state,
        )
        .await;

        match drain(&mut rx).pop() {
            Some(Envelope::RoomList(list)) => {
                assert_eq!(list.rooms.len(), 1);
                assert_eq!(list.rooms[0].name, "Doodles");
                assert_eq!(list.rooms[0].max_players, 4);
            }
            other => panic!("expected room list, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_join_missing_room_replies_error() {
        let state = make_state();
        let (alice, mut rx) = connect(&state, "c1").await;

        dispatch(&alice, join_msg("alice", "nowhere"), &state).await;

        let replies = drain(&mut rx);
        assert_eq!(
            replies,
            vec![Envelope::GameError(GameError {
                error_type: ErrorCode::RoomNotFound
            })]
        );
        assert_eq!(room_name_of(&alice, &state).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_registers_player() {
        let state = make_state();
        let room = state.directory.create_room("r1", 4).await.unwrap();
        let (alice, mut rx) = connect(&state, "c1").await;

        dispatch(&alice, join_msg("alice", "r1"), &state).await;

        assert!(room.contains_player("alice").await);
        assert_eq!(room_name_of(&alice, &state).await.as_deref(), Some("r1"));
        let announced = drain(&mut rx).into_iter().any(|e| {
            matches!(e, Envelope::Announcement(a)
                if a.announcement_type == AnnouncementType::PlayerJoined
                    && a.message == "alice joined the party!")
        });
        assert!(announced);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_username_join_ignored() {
        let state = make_state();
        let room = state.directory.create_room("r1", 4).await.unwrap();
        let (alice, _rx_a) = connect(&state, "c1").await;
        let (impostor, _rx_i) = connect(&state, "c2").await;

        dispatch(&alice, join_msg("alice", "r1"), &state).await;
        dispatch(&impostor, join_msg("alice", "r1"), &state).await;

        assert_eq!(room.snapshot().await.players.len(), 1);
        assert_eq!(room_name_of(&impostor, &state).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reused_client_id_join_ignored() {
        let state = make_state();
        let room = state.directory.create_room("r1", 4).await.unwrap();
        let (alice, _rx_a) = connect(&state, "shared").await;
        let (bob, _rx_b) = connect(&state, "shared").await;

        dispatch(&alice, join_msg("alice", "r1"), &state).await;
        dispatch(&bob, join_msg("bob", "r1"), &state).await;

        let snapshot = room.snapshot().await;
        assert_eq!(snapshot.players.len(), 1);
        assert_eq!(snapshot.players[0].username, "alice");
        assert_eq!(room_name_of(&bob, &state).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_joining_another_room_leaves_previous() {
        let state = make_state();
        let first = state.directory.create_room("r1", 4).await.unwrap();
        let second = state.directory.create_room("r2", 4).await.unwrap();
        let (alice, _rx) = connect(&state, "c1").await;

        dispatch(&alice, join_msg("alice", "r1"), &state).await;
        dispatch(&alice, join_msg("alice", "r2"), &state).await;

        assert!(!first.contains_player("alice").await);
        assert!(second.contains_player("alice").await);
        assert_eq!(room_name_of(&alice, &state).await.as_deref(), Some("r2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_removes_player() {
        let state = make_state();
        let room = state.directory.create_room("r1", 4).await.unwrap();
        let (alice, _rx) = connect(&state, "c1").await;
        dispatch(&alice, join_msg("alice", "r1"), &state).await;

        handle_disconnect(&alice, &state).await;

        assert!(!room.contains_player("alice").await);
        assert!(state.connections.read().await.is_empty());
        assert!(state.directory.get_room("r1").await.is_some());
    }

    /// Two players in a running round of "banana". Returns the drawer first.
    async fn running_round(
        state: &SharedState,
    ) -> (
        (Session, mpsc::Receiver<Bytes>),
        (Session, mpsc::Receiver<Bytes>),
        Arc<Room>,
    ) {
        let room = state.directory.create_room("r1", 2).await.unwrap();
        let alice = connect(state, "alice-id").await;
        let bob = connect(state, "bob-id").await;
        dispatch(&alice.0, join_msg("alice", "r1"), state).await;
        dispatch(&bob.0, join_msg("bob", "r1"), state).await;
        assert_eq!(room.phase().await, Phase::NewRound);

        let (drawer, guesser) = if room.snapshot().await.drawing_player.as_deref() == Some("alice") {
            (alice, bob)
        } else {
            (bob, alice)
        };
        dispatch(
            &drawer.0,
            Envelope::ChosenWord(ChosenWord {
                chosen_word: "banana".into(),
                room_name: "r1".into(),
            }),
            state,
        )
        .await;
        assert_eq!(room.phase().await, Phase::GameRunning);
        (drawer, guesser, room)
    }

    fn username(session: &Session) -> &str {
        session.client_id.trim_end_matches("-id")
    }

    #[tokio::test(start_paused = true)]
    async fn test_chat_is_relayed_and_scored() {
        let state = make_state();
        let ((drawer, mut drawer_rx), (guesser, mut guesser_rx), room) =
            running_round(&state).await;
        drain(&mut drawer_rx);
        drain(&mut guesser_rx);

        dispatch(&guesser, chat(username(&guesser), " BANANA "), &state).await;

        let seen_by_drawer = drain(&mut drawer_rx);
        assert!(seen_by_drawer
            .iter()
            .any(|e| matches!(e, Envelope::ChatMessage(m) if m.message == " BANANA ")));
        assert!(seen_by_drawer.iter().any(|e| matches!(e,
            Envelope::Announcement(a) if a.announcement_type == AnnouncementType::PlayerGuessed)));

        let snapshot = room.snapshot().await;
        let guesser_score = snapshot
            .players
            .iter()
            .find(|p| p.client_id == guesser.client_id)
            .unwrap()
            .score;
        assert_eq!(guesser_score, 100);
        assert_eq!(room.phase().await, Phase::NewRound);
        assert!(snapshot.players.iter().any(|p| p.client_id == drawer.client_id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_chat_under_another_name_dropped() {
        let state = make_state();
        let ((drawer, mut drawer_rx), (guesser, _guesser_rx), room) = running_round(&state).await;
        drain(&mut drawer_rx);

        dispatch(&guesser, chat(username(&drawer), "banana"), &state).await;

        assert!(drain(&mut drawer_rx).is_empty());
        assert_eq!(room.phase().await, Phase::GameRunning);
    }

    #[tokio::test(start_paused = true)]
    async fn test_draw_data_relayed_to_others() {
        let state = make_state();
        let ((drawer, mut drawer_rx), (_guesser, mut guesser_rx), _room) =
            running_round(&state).await;
        drain(&mut drawer_rx);
        drain(&mut guesser_rx);

        let stroke = protocol::decode(
            br#"{"type":"TYPE_DRAW_DATA","roomName":"r1","fromX":0.1,"toX":0.4,"color":-1}"#,
        )
        .unwrap();
        let Inbound::Known(envelope) = stroke else {
            panic!("draw data should decode");
        };
        dispatch(&drawer, envelope, &state).await;

        assert!(drain(&mut guesser_rx)
            .iter()
            .any(|e| matches!(e, Envelope::DrawData(d) if d.stroke_data.contains_key("fromX"))));
        assert!(!drain(&mut drawer_rx)
            .iter()
            .any(|e| matches!(e, Envelope::DrawData(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_for_unjoined_room_ignored() {
        let state = make_state();
        let room = state.directory.create_room("r1", 2).await.unwrap();
        let (outsider, mut rx) = connect(&state, "c9").await;

        dispatch(
            &outsider,
            Envelope::ChosenWord(ChosenWord {
                chosen_word: "banana".into(),
                room_name: "r1".into(),
            }),
            &state,
        )
        .await;
        dispatch(&outsider, chat("c9", "hi"), &state).await;

        assert!(drain(&mut rx).is_empty());
        assert_eq!(room.phase().await, Phase::WaitingForPlayers);
    }

    #[tokio::test]
    async fn test_unknown_message_tolerated() {
        let state = make_state();
        let (alice, mut rx) = connect(&state, "c1").await;

        let unknown = Inbound::Unknown(BaseModel {
            kind: "TYPE_PING".into(),
        });
        handle_message(&alice, Bytes::from_static(b"{}"), unknown, &state)
            .await
            .unwrap();

        assert!(drain(&mut rx).is_empty());
    }
}
