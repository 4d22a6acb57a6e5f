//! Per-connection server state.
//!
//! A session moves `Accepted → Handshaking → Serving → Closed`. The event
//! stream owns the transition to `Closed`: when it is dropped, results of
//! anything still running for that session have nowhere to go.

mod store;

pub use store::{spawn_cleanup_task, InMemorySessionStore, Session, SessionStats, SessionStore};

use axum::response::sse::Event;
use serde::Serialize;
use std::time::Instant;
use tokio::sync::mpsc;

use crate::types::protocol::Implementation;

pub type SseSender = mpsc::Sender<Result<Event, axum::Error>>;

pub type SessionRef<'a> = dashmap::mapref::one::Ref<'a, String, Session>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    /// Known id, no event stream yet.
    Accepted,
    /// Event stream open, waiting for `initialize`.
    Handshaking,
    Serving,
    /// Event stream gone.
    Closed,
}

impl Session {
    pub fn new(id: String) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_seen: now,
            phase: ConnectionPhase::Accepted,
            client_info: None,
            tx: None,
            channel_generation: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.tx.as_ref().map(|tx| !tx.is_closed()).unwrap_or(false)
    }

    pub fn idle_duration(&self) -> std::time::Duration {
        self.last_seen.elapsed()
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Attach a fresh event stream. Returns the generation that identifies it,
    /// so a stale stream closing later cannot close its replacement.
    pub fn open_channel(&mut self, tx: SseSender) -> u64 {
        self.tx = Some(tx);
        self.channel_generation += 1;
        self.phase = ConnectionPhase::Handshaking;
        self.touch();
        self.channel_generation
    }

    pub fn mark_serving(&mut self, client_info: Implementation) {
        self.client_info = Some(client_info);
        if self.phase != ConnectionPhase::Closed {
            self.phase = ConnectionPhase::Serving;
        }
        self.touch();
    }

    /// Returns false when `generation` no longer names the current stream.
    pub fn close_channel(&mut self, generation: u64) -> bool {
        if generation != self.channel_generation {
            return false;
        }
        self.tx = None;
        self.phase = ConnectionPhase::Closed;
        true
    }

    pub fn sender(&self) -> Option<SseSender> {
        match self.phase {
            ConnectionPhase::Closed => None,
            _ => self.tx.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    NotConnected,
    ChannelClosed,
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendError::NotConnected => write!(f, "session has no event stream"),
            SendError::ChannelClosed => write!(f, "event stream is closed"),
        }
    }
}

impl std::error::Error for SendError {}

/// Push one event down a stream.
pub async fn send_event(tx: Option<&SseSender>, event: Event) -> Result<(), SendError> {
    match tx {
        Some(tx) => tx.send(Ok(event)).await.map_err(|_| SendError::ChannelClosed),
        None => Err(SendError::NotConnected),
    }
}
