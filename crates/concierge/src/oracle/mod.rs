//! The model that decides which tool, if any, answers an utterance.

mod openai;

pub use openai::{OpenAiOracle, DEFAULT_SYSTEM_PROMPT};

use async_trait::async_trait;
use relay::ToolDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::ConversationTurn;

/// Everything the oracle sees for one decision.
#[derive(Debug, Clone, Copy)]
pub struct OracleRequest<'a> {
    pub utterance: &'a str,
    pub history: &'a [ConversationTurn],
    /// Corrections from an earlier attempt in the same turn.
    pub hints: &'a [String],
    pub tools: &'a [ToolDescriptor],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolProposal {
    pub tool: String,
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl ToolProposal {
    pub fn new(tool: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool: tool.into(),
            arguments,
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OracleReply {
    /// No tool needed; this is the answer.
    Direct { text: String },
    Proposals {
        proposals: Vec<ToolProposal>,
        /// Reply text the model wrote alongside its tool calls.
        text: Option<String>,
        rationale: Option<String>,
    },
}

impl OracleReply {
    pub fn direct(text: impl Into<String>) -> Self {
        OracleReply::Direct { text: text.into() }
    }

    pub fn propose(tool: impl Into<String>, arguments: Value) -> Self {
        OracleReply::Proposals {
            proposals: vec![ToolProposal::new(tool, arguments)],
            text: None,
            rationale: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("Oracle API error: {0}")]
    Api(String),

    #[error("Oracle did not answer within {0:?}")]
    Timeout(std::time::Duration),

    #[error("Malformed oracle reply: {0}")]
    Malformed(String),

    #[error("Oracle is not configured: {0}")]
    NotConfigured(String),
}

#[async_trait]
pub trait Oracle: Send + Sync {
    async fn decide(&self, request: OracleRequest<'_>) -> Result<OracleReply, OracleError>;

    /// Phrase a tool result for the user. `None` falls back to a template.
    async fn summarize(
        &self,
        _utterance: &str,
        _tool: &ToolDescriptor,
        _payload: &Value,
    ) -> Result<Option<String>, OracleError> {
        Ok(None)
    }
}
