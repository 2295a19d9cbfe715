//! WebSocket termination for `/live-trade` and `/notifications`
//!
//! Each connection gets a bounded outbound queue bound in a
//! [`ConnectionManager`], a writer task draining that queue into the socket
//! and a reader loop decoding frames and dispatching them to the engine.
//! Handlers hold no business state.

use axum::{
    extract::{
        Query, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    http::HeaderMap,
    response::Response,
};
use barterbay_common::Participant;
use futures_util::{
    sink::SinkExt,
    stream::{SplitSink, StreamExt},
};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::auth::{AuthError, AuthVerifier};
use crate::config::RateLimitConfig;
use crate::connections::{CloseReason, Outbound};
use crate::engine::TradeEngine;
use crate::error::TradeError;
use crate::middleware::{bearer_token, unauthorized};
use crate::models::{ClientMessage, ServerEvent};
use crate::notifications::NotificationHub;
use crate::rate_limiter::MessageRateLimiter;

/// Shared state for the WebSocket routes
#[derive(Clone)]
pub struct GatewayState {
    pub engine: Arc<TradeEngine>,
    pub notifications: Arc<NotificationHub>,
    pub verifier: Arc<dyn AuthVerifier>,
    pub rate_limiting: RateLimitConfig,
    pub outbound_buffer: usize,
}

/// Handshake query string
#[derive(Debug, Default, Deserialize)]
pub struct HandshakeQuery {
    pub token: Option<String>,
}

/// Resolve the caller from `?token=` or a bearer header
pub fn authenticate(
    verifier: &dyn AuthVerifier,
    query: &HandshakeQuery,
    headers: &HeaderMap,
) -> Result<Participant, AuthError> {
    let token = query
        .token
        .as_deref()
        .filter(|token| !token.is_empty())
        .or_else(|| bearer_token(headers))
        .ok_or(AuthError::MissingToken)?;

    verifier.verify_token(token)
}

fn reject(err: &AuthError) -> Response {
    warn!(error = %err, "WebSocket handshake rejected");
    #[cfg(feature = "monitoring")]
    crate::metrics::get_metrics().record_auth_failure();
    unauthorized(err)
}

/// `GET /live-trade`
pub async fn live_trade_handler(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
    Query(query): Query<HandshakeQuery>,
    headers: HeaderMap,
) -> Response {
    match authenticate(state.verifier.as_ref(), &query, &headers) {
        Ok(user) => ws.on_upgrade(move |socket| handle_trade_socket(state, user, socket)),
        Err(err) => reject(&err),
    }
}

/// `GET /notifications`
pub async fn notifications_handler(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
    Query(query): Query<HandshakeQuery>,
    headers: HeaderMap,
) -> Response {
    match authenticate(state.verifier.as_ref(), &query, &headers) {
        Ok(user) => ws.on_upgrade(move |socket| handle_notification_socket(state, user, socket)),
        Err(err) => reject(&err),
    }
}

/// Decode and dispatch one text frame; returns the direct reply, if any
pub async fn handle_client_text(
    engine: &TradeEngine,
    user: &Participant,
    text: &str,
) -> Option<ServerEvent> {
    let result = match ClientMessage::decode(text) {
        Ok(ClientMessage::Ping) => return Some(ServerEvent::Pong),
        Ok(message) => {
            #[cfg(feature = "monitoring")]
            crate::metrics::get_metrics().record_message_received(message.message_type());
            engine.handle_message(user, message).await
        }
        Err(err) => Err(err),
    };

    result.err().map(|err| rejected(user, &err))
}

fn rejected(user: &Participant, err: &TradeError) -> ServerEvent {
    debug!(user = %user, code = err.code(), error = %err, "Client message rejected");
    #[cfg(feature = "monitoring")]
    crate::metrics::get_metrics().record_message_rejected(err.code());
    ServerEvent::error(err)
}

async fn handle_trade_socket(state: GatewayState, user: Participant, socket: WebSocket) {
    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::channel(state.outbound_buffer);

    let connections = Arc::clone(state.engine.connections());
    let connection_id = connections.bind(user.id, tx.clone());
    info!(user = %user, connection_id, "Live-trade connection established");

    let superseded = serde_json::to_string(&ServerEvent::error(&TradeError::ConnectionSuperseded))
        .ok();
    let mut writer = spawn_writer(sink, rx, superseded);
    let limiter = MessageRateLimiter::new(&state.rate_limiting);

    loop {
        tokio::select! {
            frame = stream.next() => {
                let reply = match frame {
                    Some(Ok(Message::Text(text))) => {
                        if limiter.check() {
                            handle_client_text(&state.engine, &user, &text).await
                        } else {
                            Some(rejected(&user, &TradeError::RateLimited))
                        }
                    }
                    Some(Ok(Message::Binary(_))) => Some(rejected(
                        &user,
                        &TradeError::MalformedMessage {
                            reason: "binary frames are not supported".to_string(),
                        },
                    )),
                    // Pings are answered by the transport
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => None,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        debug!(user = %user, error = %err, "WebSocket read failed");
                        break;
                    }
                };

                // Direct replies go to this socket even if it was superseded
                if let Some(reply) = reply {
                    let _ = tx.try_send(Outbound::Event(reply));
                }
            }
            _ = &mut writer => break,
        }
    }

    writer.abort();
    // A superseded connection does not count as a disconnect
    connections.unbind(user.id, connection_id);
    info!(user = %user, connection_id, "Live-trade connection closed");
}

async fn handle_notification_socket(state: GatewayState, user: Participant, socket: WebSocket) {
    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::channel(state.outbound_buffer);

    let connection_id = state.notifications.connect(user.id, tx);
    debug!(user = %user, connection_id, "Notification connection established");

    let mut writer = spawn_writer(sink, rx, None);

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                // Inbound frames carry no meaning on this channel
                Some(Ok(_)) => {}
            },
            _ = &mut writer => break,
        }
    }

    writer.abort();
    state.notifications.disconnect(user.id, connection_id);
    debug!(user = %user, connection_id, "Notification connection closed");
}

/// Drain an outbound queue into the socket until closed
fn spawn_writer<E>(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound<E>>,
    superseded_notice: Option<String>,
) -> JoinHandle<()>
where
    E: Serialize + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Event(event) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(err) => {
                            error!(error = %err, "Failed to serialize outbound event");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Outbound::Close(reason) => {
                    if reason == CloseReason::Superseded
                        && let Some(notice) = &superseded_notice
                    {
                        let _ = sink.send(Message::Text(notice.clone())).await;
                    }
                    let frame = CloseFrame {
                        code: reason.close_code(),
                        reason: Cow::Borrowed(match reason {
                            CloseReason::Superseded => "superseded by a newer connection",
                            CloseReason::Shutdown => "server shutting down",
                        }),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    break;
                }
            }
        }
    })
}
