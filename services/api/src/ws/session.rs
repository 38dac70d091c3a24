//! Manages the WebSocket connection lifecycle for an interview session.

use super::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;
use anyhow::Result;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use levelcheck_core::{
    InterviewSession, PendingRequest,
    runner::{SessionSignal, pump_request},
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Instrument, error, info, instrument, warn};

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Main handler for an individual WebSocket connection.
///
/// Sends the initial snapshot and then runs the session loop until the client leaves.
#[instrument(name = "ws_session", skip_all, fields(session_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let temp_id: u32 = rand::random();
    tracing::Span::current().record("session_id", temp_id.to_string());
    info!("New WebSocket connection.");

    let (mut socket_tx, socket_rx) = socket.split();
    let mut session = InterviewSession::new(state.config.total_questions);

    if send_msg(
        &mut socket_tx,
        ServerMessage::Snapshot {
            view: session.view(),
        },
    )
    .await
    .is_err()
    {
        error!("Failed to send initial snapshot to client.");
        return;
    }

    if let Err(e) = run_interview_session(state, socket_tx, socket_rx, &mut session)
        .in_current_span()
        .await
    {
        error!(error = ?e, "Interview session terminated with error.");
    }
    info!("Interview session finished.");
}

fn dispatch(
    state: &Arc<AppState>,
    request: PendingRequest,
    signal_tx: &mpsc::Sender<SessionSignal>,
) {
    tokio::spawn(
        pump_request(state.backend.clone(), request, signal_tx.clone()).in_current_span(),
    );
}

/// Applies one client message and returns the reply for the client.
fn handle_client_message(
    state: &Arc<AppState>,
    session: &mut InterviewSession,
    msg: ClientMessage,
    signal_tx: &mpsc::Sender<SessionSignal>,
) -> ServerMessage {
    match msg {
        ClientMessage::UserMessage { text } => match session.send_turn(&text) {
            Ok(request) => dispatch(state, request, signal_tx),
            Err(e) => {
                return ServerMessage::Rejected {
                    reason: e.to_string(),
                };
            }
        },
        ClientMessage::SubmitAnswer {
            question_id,
            option_id,
        } => {
            if let Some(request) = session.submit_answer(&question_id, &option_id) {
                dispatch(state, request, signal_tx);
            }
        }
        ClientMessage::Restart => session.restart(),
    }
    ServerMessage::Snapshot {
        view: session.view(),
    }
}

/// The main event loop for an active WebSocket session.
///
/// Client messages and backend signals are both applied here, so the session is only
/// ever touched from this task. However the loop ends, the in-flight request is
/// cancelled before returning.
async fn run_interview_session<S, R>(
    state: Arc<AppState>,
    mut socket_tx: S,
    mut socket_rx: R,
    session: &mut InterviewSession,
) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let (signal_tx, mut signal_rx) = mpsc::channel::<SessionSignal>(64);

    let result: Result<()> = async {
        loop {
            tokio::select! {
                // Handle messages from the client WebSocket.
                msg = socket_rx.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(msg) => handle_client_message(&state, session, msg, &signal_tx),
                            Err(e) => {
                                warn!(error = %e, "Ignoring malformed client message.");
                                ServerMessage::Error { message: format!("Invalid message: {e}") }
                            }
                        };
                        send_msg(&mut socket_tx, reply).await?;
                    }
                    Some(Ok(Message::Binary(_))) => warn!("Ignoring unexpected binary message."),
                    Some(Ok(Message::Close(_))) => {
                        info!("Client sent close frame. Shutting down session.");
                        break;
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Err(e)) => {
                        error!("Error receiving from client WebSocket: {:?}", e);
                        break;
                    }
                    None => {
                        info!("Client stream ended. Shutting down session.");
                        break;
                    }
                },
                // Handle events from the in-flight backend request.
                Some(signal) = signal_rx.recv() => {
                    if signal.apply_to(session) {
                        send_msg(&mut socket_tx, ServerMessage::Snapshot { view: session.view() }).await?;
                    }
                },
            }
        }
        Ok(())
    }
    .await;

    session.cancel();
    info!("WebSocket connection closed.");
    result
}

/// A helper function to serialize and send a `ServerMessage` to the client.
pub(crate) async fn send_msg<S>(socket_tx: &mut S, msg: ServerMessage) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
