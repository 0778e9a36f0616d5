use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use scribble_common::protocol::{self, framed_transport};

use crate::handler;
use crate::server::SharedState;
use crate::session::{Session, SessionError};

const OUTBOUND_QUEUE: usize = 256;

pub struct ConnectionHandle {
    pub session: Session,
    pub tx: mpsc::Sender<Bytes>,
    pub room_name: Option<String>,
}

pub async fn handle_connection(stream: TcpStream, state: SharedState) -> anyhow::Result<()> {
    let mut transport = framed_transport(stream);

    // Step 1: Handshake -- expect Hello
    let first = match transport.next().await {
        Some(Ok(frame)) => protocol::decode(&frame).ok(),
        Some(Err(e)) => return Err(anyhow::anyhow!("recv error: {}", e)),
        None => return Ok(()),
    };
    let session = match first
        .ok_or(SessionError::MissingHello)
        .and_then(Session::establish)
    {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!("Closing connection without session: {}", e);
            protocol::send_message(&mut transport, &e.close_frame()).await?;
            return Ok(());
        }
    };
    protocol::send_message(&mut transport, &session.welcome()).await?;
    tracing::info!(
        "Client '{}' connected (session {})",
        session.client_id,
        session.session_id
    );

    // Step 2: Outbound channel, shared with the player once it joins a room
    let (tx, mut rx) = mpsc::channel::<Bytes>(OUTBOUND_QUEUE);
    state.connections.write().await.insert(
        session.session_id,
        ConnectionHandle {
            session: session.clone(),
            tx,
            room_name: None,
        },
    );

    // Step 3: Split transport for independent read/write
    let (mut sink, mut stream) = transport.split();

    let write_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(frame).await.is_err() {
                break;
            }
        }
    });

    // Step 4: Reader loop
    loop {
        match stream.next().await {
            Some(Ok(frame)) => match protocol::decode(&frame) {
                Ok(inbound) => {
                    if let Err(e) =
                        handler::handle_message(&session, frame.freeze(), inbound, &state).await
                    {
                        tracing::error!("Handler error for '{}': {}", session.client_id, e);
                    }
                }
                Err(e) => {
                    tracing::warn!("Dropping frame from '{}': {}", session.client_id, e);
                }
            },
            Some(Err(e)) => {
                tracing::warn!("Read error from '{}': {}", session.client_id, e);
                break;
            }
            None => {
                tracing::info!("Client '{}' disconnected", session.client_id);
                break;
            }
        }
    }

    // Cleanup
    handler::handle_disconnect(&session, &state).await;
    write_task.abort();
    Ok(())
}
