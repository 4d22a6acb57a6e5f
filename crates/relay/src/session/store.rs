//! Session storage.
//!
//! Lifecycle spans:
//! - `relay.session.create` - new or resumed session id
//! - `relay.session.closed` - event stream dropped
//! - `relay.session.expire` - reaped by the cleanup task

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::{ConnectionPhase, SessionRef, SseSender};
use crate::types::protocol::Implementation;

#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub created_at: Instant,
    pub last_seen: Instant,
    pub phase: ConnectionPhase,
    /// Set by `initialize`.
    pub client_info: Option<Implementation>,
    pub tx: Option<SseSender>,
    pub channel_generation: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub total: usize,
    pub connected: usize,
    pub disconnected: usize,
    pub serving: usize,
}

pub trait SessionStore: Send + Sync {
    /// Existing session for `id_hint`, a new one under that id, or a new one
    /// under a generated id when there is no hint.
    fn get_or_create(&self, id_hint: Option<&str>) -> String;

    fn get(&self, id: &str) -> Option<SessionRef<'_>>;

    fn touch(&self, id: &str);

    fn phase(&self, id: &str) -> Option<ConnectionPhase>;

    /// Event stream sender, if the session still has one.
    fn sender(&self, id: &str) -> Option<SseSender>;

    /// Attach an event stream; the session enters `Handshaking`.
    fn open_channel(&self, id: &str, tx: SseSender) -> Option<u64>;

    fn set_serving(&self, id: &str, client_info: Implementation);

    /// Detach the stream identified by `generation`; the session enters `Closed`.
    fn close_channel(&self, id: &str, generation: u64);

    /// Remove sessions idle past `max_idle` (closed ones sooner).
    /// Returns the number removed.
    fn cleanup(&self, max_idle: Duration) -> usize;

    fn remove(&self, id: &str);

    fn stats(&self) -> SessionStats;
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, Session>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl SessionStore for InMemorySessionStore {
    fn get_or_create(&self, id_hint: Option<&str>) -> String {
        let id = id_hint
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let is_new = !self.sessions.contains_key(&id);

        self.sessions
            .entry(id.clone())
            .or_insert_with(|| Session::new(id.clone()));

        let _span = tracing::info_span!(
            "relay.session.create",
            relay.session_id = %id,
            relay.session.is_new = is_new,
        )
        .entered();

        if is_new {
            tracing::info!("Created new session");
        } else {
            tracing::debug!("Resumed existing session");
        }

        id
    }

    fn get(&self, id: &str) -> Option<SessionRef<'_>> {
        self.sessions.get(id)
    }

    fn touch(&self, id: &str) {
        if let Some(mut session) = self.sessions.get_mut(id) {
            session.touch();
        }
    }

    fn phase(&self, id: &str) -> Option<ConnectionPhase> {
        self.sessions.get(id).map(|s| s.phase)
    }

    fn sender(&self, id: &str) -> Option<SseSender> {
        self.sessions.get(id).and_then(|s| s.sender())
    }

    fn open_channel(&self, id: &str, tx: SseSender) -> Option<u64> {
        let mut session = self.sessions.get_mut(id)?;
        let generation = session.open_channel(tx);
        tracing::info!(session_id = %id, generation, "Opened event stream");
        Some(generation)
    }

    fn set_serving(&self, id: &str, client_info: Implementation) {
        if let Some(mut session) = self.sessions.get_mut(id) {
            tracing::info!(
                session_id = %id,
                client_name = %client_info.name,
                client_version = %client_info.version,
                "Session initialized"
            );
            session.mark_serving(client_info);
        }
    }

    fn close_channel(&self, id: &str, generation: u64) {
        if let Some(mut session) = self.sessions.get_mut(id) {
            if session.close_channel(generation) {
                let _span =
                    tracing::info_span!("relay.session.closed", relay.session_id = %id).entered();
                tracing::info!("Event stream closed");
            }
        }
    }

    fn cleanup(&self, max_idle: Duration) -> usize {
        let mut to_remove = Vec::new();

        for entry in self.sessions.iter() {
            let session = entry.value();
            let effective_ttl = if session.is_connected() {
                max_idle
            } else {
                max_idle / 6
            };

            if session.idle_duration() > effective_ttl {
                to_remove.push(entry.key().clone());
            }
        }

        let removed = to_remove.len();
        for id in to_remove {
            if self.sessions.remove(&id).is_some() {
                let _span =
                    tracing::info_span!("relay.session.expire", relay.session_id = %id).entered();
                tracing::info!("Removed stale session");
            }
        }

        if removed > 0 {
            tracing::info!(
                removed = removed,
                remaining = self.sessions.len(),
                "Session cleanup completed"
            );
        }

        removed
    }

    fn remove(&self, id: &str) {
        if self.sessions.remove(id).is_some() {
            tracing::info!(session_id = %id, "Session removed");
        }
    }

    fn stats(&self) -> SessionStats {
        let mut stats = SessionStats {
            total: self.sessions.len(),
            ..Default::default()
        };

        for entry in self.sessions.iter() {
            if entry.value().is_connected() {
                stats.connected += 1;
            } else {
                stats.disconnected += 1;
            }
            if entry.value().phase == ConnectionPhase::Serving {
                stats.serving += 1;
            }
        }

        stats
    }
}

/// Periodically reap stale sessions until `cancel` fires.
pub fn spawn_cleanup_task(
    store: Arc<dyn SessionStore>,
    interval: Duration,
    max_idle: Duration,
    cancel: tokio_util::sync::CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Session cleanup task shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    store.cleanup(max_idle);
                }
            }
        }
    })
}
