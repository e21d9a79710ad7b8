//! One browser client connection
//!
//! The socket is split: a writer task drains the client's broadcast queue into
//! the socket while the reader loop parses client messages. Each connection
//! remembers the device its last successful connect attached to, and routes
//! upgrade and refresh commands there.

use crate::broadcast::{Broadcaster, ClientId};
use crate::client_span;
use crate::error::RelayError;
use crate::protocol::{ClientMessage, DeviceId, ServerEvent};
use crate::session::SessionManager;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};
use warp::ws::{Message, WebSocket};

/// Per-connection message handling
pub struct ClientSession {
    id: ClientId,
    sessions: Arc<SessionManager>,
    attached: Option<DeviceId>,
}

impl ClientSession {
    pub fn new(id: ClientId, sessions: Arc<SessionManager>) -> Self {
        Self {
            id,
            sessions,
            attached: None,
        }
    }

    pub fn attached(&self) -> Option<&DeviceId> {
        self.attached.as_ref()
    }

    /// Handle one text frame; returns the events meant for this client only
    pub async fn handle_text(&mut self, text: &str) -> Vec<ServerEvent> {
        let message = match ClientMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(client_id = %self.id, error = %e, "Unrecognized client message");
                return vec![ServerEvent::ValidationFailed {
                    fields: Vec::new(),
                    message: format!("Unrecognized client message: {e}"),
                }];
            }
        };
        debug!(client_id = %self.id, kind = message.kind(), "Client message received");

        let result = match message {
            ClientMessage::Connect(request) => match self.sessions.connect(&request).await {
                Ok(outcome) => {
                    info!(client_id = %self.id, device_id = %outcome.device_id, "Client attached to device");
                    self.attached = Some(outcome.device_id);
                    return outcome
                        .warnings
                        .iter()
                        .filter_map(RelayError::to_client_event)
                        .collect();
                }
                Err(e) => Err(e),
            },
            ClientMessage::ShouldUpgrade(entry) => match &self.attached {
                Some(device_id) => self.sessions.apply_upgrade(device_id, entry).await,
                None => Err(RelayError::NoActiveLink { device_id: None }),
            },
            ClientMessage::Refresh {} => match &self.attached {
                Some(device_id) => self.sessions.probe(device_id).await,
                None => Err(RelayError::NoActiveLink { device_id: None }),
            },
        };

        match result {
            Ok(()) => Vec::new(),
            Err(e) => {
                warn!(client_id = %self.id, error = %e, "Client request failed");
                e.to_client_event().into_iter().collect()
            }
        }
    }
}

/// Serve one upgraded WebSocket until either side closes it
pub async fn handle_socket(socket: WebSocket, sessions: Arc<SessionManager>) {
    let broadcaster: Arc<Broadcaster> = sessions.broadcaster().clone();
    let (client_id, mut outbound) = broadcaster.register().await;
    let span = client_span!(client_id);

    async move {
        info!("WebSocket connection established");
        let (mut ws_tx, mut ws_rx) = socket.split();

        let writer = tokio::spawn(
            async move {
                while let Some(payload) = outbound.recv().await {
                    if let Err(e) = ws_tx.send(Message::text(payload.to_string())).await {
                        debug!(error = %e, "Socket write failed");
                        break;
                    }
                }
                let _ = ws_tx.close().await;
            }
            .in_current_span(),
        );

        let mut session = ClientSession::new(client_id, sessions);
        while let Some(frame) = ws_rx.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    debug!(error = %e, "Socket read failed");
                    break;
                }
            };
            if frame.is_close() {
                break;
            }
            let Ok(text) = frame.to_str() else {
                continue;
            };

            for event in session.handle_text(text).await {
                broadcaster.send_to(client_id, &event).await;
            }
        }

        broadcaster.unregister(client_id).await;
        writer.abort();
        info!("WebSocket connection closed");
    }
    .instrument(span)
    .await
}
