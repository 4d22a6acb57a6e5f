use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::dispatch::DispatchEngine;
use crate::types::{ConversationTurn, SessionId};

/// One conversation. Owns its history; nothing is shared between sessions.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    turns: Vec<ConversationTurn>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: SessionId::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            turns: Vec::new(),
        }
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn record(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
        self.updated_at = Utc::now();
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.updated_at = Utc::now();
    }

    /// Run one turn and append it to the history.
    #[tracing::instrument(skip(self, engine, utterance), fields(session.id = %self.id))]
    pub async fn ask(&mut self, engine: &DispatchEngine, utterance: &str) -> &ConversationTurn {
        let turn = engine.handle_turn(utterance, &self.turns).await;
        self.record(turn);
        &self.turns[self.turns.len() - 1]
    }

    /// A cancelled turn leaves the history untouched.
    #[tracing::instrument(skip(self, engine, utterance, cancel), fields(session.id = %self.id))]
    pub async fn ask_cancellable(
        &mut self,
        engine: &DispatchEngine,
        utterance: &str,
        cancel: &CancellationToken,
    ) -> Option<&ConversationTurn> {
        let turn = engine
            .handle_turn_cancellable(utterance, &self.turns, cancel)
            .await?;
        self.record(turn);
        self.turns.last()
    }
}
