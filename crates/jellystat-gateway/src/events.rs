//! WebSocket UI events for real-time updates.
//!
//! Background jobs publish through an [`EventBroadcaster`]; every connected
//! `/ws` client receives each envelope as a JSON text frame. The endpoint is
//! not behind the guard chain.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use jellystat_core::JobRunOutcome;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// UI event types that can be broadcast to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    /// A job pass started.
    JobStarted {
        /// Job name.
        job: String,
    },

    /// A job pass finished.
    JobFinished {
        /// Job name.
        job: String,
        /// How the pass ended.
        outcome: JobRunOutcome,
        /// Pass duration in milliseconds.
        duration_ms: u64,
        /// Summary or error text.
        message: Option<String>,
    },

    /// Heartbeat event.
    Heartbeat {
        /// Timestamp.
        timestamp: DateTime<Utc>,
    },
}

/// A wrapper for UI events with metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiEventEnvelope {
    /// Event ID.
    pub id: String,
    /// Timestamp.
    pub timestamp: DateTime<Utc>,
    /// The event payload.
    pub event: UiEvent,
}

impl UiEventEnvelope {
    /// Create a new event envelope.
    #[must_use]
    pub fn new(event: UiEvent) -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut bytes);

        Self {
            id: hex::encode(bytes),
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Default channel capacity for event broadcasts.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Event broadcaster for distributing UI events to subscribers.
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<UiEventEnvelope>,
}

impl EventBroadcaster {
    /// Create a new event broadcaster.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event broadcaster with custom capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Broadcast an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event.
    #[allow(clippy::must_use_candidate)]
    pub fn broadcast(&self, event: UiEvent) -> usize {
        // No subscribers is not an error
        self.sender.send(UiEventEnvelope::new(event)).unwrap_or(0)
    }

    /// Subscribe to receive events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<UiEventEnvelope> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBroadcaster")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Upgrade handler for `/ws`.
pub async fn ws_handler(
    State(events): State<EventBroadcaster>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, events))
}

async fn handle_socket(socket: WebSocket, events: EventBroadcaster) {
    let (mut sender, mut receiver) = socket.split();
    let mut event_rx = events.subscribe();

    tracing::debug!("WebSocket client connected");

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    // Clients only listen; anything they send is ignored
                    Some(Ok(_)) => {}
                }
            }
            event = event_rx.recv() => {
                match event {
                    Ok(envelope) => {
                        let text = match serde_json::to_string(&envelope) {
                            Ok(text) => text,
                            Err(e) => {
                                tracing::warn!("Failed to encode event: {}", e);
                                continue;
                            }
                        };
                        if sender.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Event listener lagged, missed {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    tracing::debug!("WebSocket client disconnected");
}
