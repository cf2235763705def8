use actix_web::{web, Error, HttpRequest, Responder};
use actix_ws::{self, Message};
use futures_util::StreamExt;
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::interval;

use crate::api::feed::PacketRow;
use crate::api::state::AppState;
use crate::capture::controller::SessionInfo;
use crate::models::session::{SessionEvent, SessionState};

// How often heartbeat pings are sent
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// WebSocket message types that can be sent to clients
#[derive(Serialize)]
#[serde(tag = "type")]
enum WsOutMessage {
    #[serde(rename = "packets")]
    Packets { packets: Vec<PacketRow> },

    #[serde(rename = "session")]
    Session { event: SessionEvent },

    #[serde(rename = "status")]
    Status {
        state: SessionState,
        session: Option<SessionInfo>,
        queued: usize,
        delivered: usize,
    },

    #[serde(rename = "ping")]
    Ping { timestamp: i64 },
}

async fn send(session: &mut actix_ws::Session, msg: &WsOutMessage) -> Result<(), actix_ws::Closed> {
    match serde_json::to_string(msg) {
        Ok(json) => session.text(json).await,
        Err(e) => {
            warn!("Failed to serialize WebSocket message: {}", e);
            Ok(())
        }
    }
}

fn status(state: &AppState) -> WsOutMessage {
    WsOutMessage::Status {
        state: state.controller.state(),
        session: state.controller.current_session(),
        queued: state.controller.queue().len(),
        delivered: state.store.read().len(),
    }
}

/// Handle WebSocket connections
pub async fn ws_index(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<AppState>,
) -> Result<impl Responder, Error> {
    let addr = req
        .peer_addr()
        .map(|peer| peer.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    info!("WebSocket connection from: {}", addr);

    let (response, session, mut msg_stream) = actix_ws::handle(&req, body)?;

    let state = state.into_inner();
    let mut batches = state.batches.subscribe();
    let mut events = state.controller.subscribe();

    actix_web::rt::spawn(async move {
        let last_seen = Arc::new(AtomicI64::new(chrono::Utc::now().timestamp()));
        let last_seen_for_handler = last_seen.clone();

        let mut session_for_handler = session.clone();
        if send(&mut session_for_handler, &status(&state)).await.is_err() {
            warn!("Failed to send initial status");
            return;
        }

        // Client messages: pings, pongs, "status" requests and close
        let ws_msg_task = {
            let mut session = session_for_handler;
            let state = state.clone();

            async move {
                while let Some(Ok(msg)) = msg_stream.next().await {
                    last_seen_for_handler.store(chrono::Utc::now().timestamp(), Ordering::SeqCst);
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Text(text) => {
                            debug!("Received text message: {}", text);
                            if text.trim() == "status" && send(&mut session, &status(&state)).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => {
                            info!("Client requested close");
                            break;
                        }
                        _ => {}
                    }
                }
            }
        };

        // Drained batches and session events
        let updates_task = {
            let mut session = session.clone();

            async move {
                loop {
                    let msg = tokio::select! {
                        batch = batches.recv() => match batch {
                            Ok(batch) => WsOutMessage::Packets { packets: batch.rows() },
                            Err(RecvError::Lagged(skipped)) => {
                                warn!("WebSocket client lagging, skipped {} batches", skipped);
                                continue;
                            }
                            Err(RecvError::Closed) => break,
                        },
                        event = events.recv() => match event {
                            Ok(event) => WsOutMessage::Session { event },
                            Err(RecvError::Lagged(_)) => continue,
                            Err(RecvError::Closed) => break,
                        },
                    };

                    if send(&mut session, &msg).await.is_err() {
                        break;
                    }
                }
            }
        };

        let heartbeat_task = {
            let mut session = session.clone();

            async move {
                let mut heartbeat = interval(HEARTBEAT_INTERVAL);
                loop {
                    heartbeat.tick().await;

                    let now = chrono::Utc::now().timestamp();
                    let last = last_seen.load(Ordering::SeqCst);
                    if now - last > HEARTBEAT_INTERVAL.as_secs() as i64 * 3 {
                        warn!("WebSocket client heartbeat timed out");
                        let _ = session.close(None).await;
                        break;
                    }

                    if send(&mut session, &WsOutMessage::Ping { timestamp: now }).await.is_err() {
                        break;
                    }
                    if session.ping(b"").await.is_err() {
                        break;
                    }
                }
            }
        };

        tokio::select! {
            _ = ws_msg_task => {},
            _ = updates_task => {},
            _ = heartbeat_task => {},
        }

        info!("WebSocket connection from {} closed", addr);
    });

    Ok(response)
}
