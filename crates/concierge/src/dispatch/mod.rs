//! Tool dispatch: one utterance in, one [`ConversationTurn`] out.
//!
//! The oracle proposes a tool (or answers directly), arguments are repaired
//! and validated against the tool's descriptor, the call is routed to the
//! local tool set or a remote service, and the outcome is rendered for the
//! user. A schema problem gets exactly one retry with a hint to the oracle.

mod catalog;
mod normalize;
mod render;

pub use catalog::{Catalog, CatalogError, RemoteService, Route};
pub use normalize::normalize_arguments;
pub use render::{attachment_for, failure_text, template_summary};

use std::sync::Arc;
use std::time::Duration;

use conciergeconf::ConciergeConfig;
use relay::client::RemoteTools;
use relay::{FailureKind, ToolDescriptor, ToolInvocationResult};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::field::Empty;

use crate::oracle::{Oracle, OracleError, OracleReply, OracleRequest, ToolProposal};
use crate::tools::LocalToolSet;
use crate::types::{ConversationTurn, DispatchDecision};

/// Oracle rounds per turn: the first attempt plus one retry.
const MAX_ROUNDS: usize = 2;

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub oracle_timeout: Duration,
    pub tool_timeout: Duration,
    /// Most recent turns handed to the oracle.
    pub history_turns: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            oracle_timeout: Duration::from_secs(60),
            tool_timeout: Duration::from_secs(30),
            history_turns: 20,
        }
    }
}

impl DispatchSettings {
    pub fn from_config(config: &ConciergeConfig) -> Self {
        Self {
            oracle_timeout: config.oracle.timeout(),
            tool_timeout: config.dispatch.tool_timeout(),
            history_turns: config.dispatch.history_turns,
        }
    }
}

/// Result of one oracle round.
enum Round {
    Done(ConversationTurn),
    Retry(String),
}

pub struct DispatchEngine {
    oracle: Arc<dyn Oracle>,
    catalog: Catalog,
    settings: DispatchSettings,
}

impl std::fmt::Debug for DispatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchEngine")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl DispatchEngine {
    /// Discovers remote tools. Fails if two sources offer the same tool name.
    pub async fn build(
        oracle: Arc<dyn Oracle>,
        local: LocalToolSet,
        remotes: Vec<RemoteService>,
        settings: DispatchSettings,
    ) -> Result<Self, CatalogError> {
        let catalog = Catalog::build(Arc::new(local), remotes).await?;
        Ok(Self {
            oracle,
            catalog,
            settings,
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    pub async fn tools(&self) -> Vec<ToolDescriptor> {
        self.catalog.descriptors().await
    }

    /// Like [`handle_turn`](Self::handle_turn), but gives up when `cancel`
    /// fires. An in-flight remote call is abandoned; its late result is
    /// dropped by the client.
    pub async fn handle_turn_cancellable(
        &self,
        utterance: &str,
        history: &[ConversationTurn],
        cancel: &CancellationToken,
    ) -> Option<ConversationTurn> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("turn cancelled");
                None
            }
            turn = self.handle_turn(utterance, history) => Some(turn),
        }
    }

    #[tracing::instrument(
        name = "dispatch.turn",
        skip_all,
        fields(tool = Empty, failure = Empty, rounds = Empty)
    )]
    pub async fn handle_turn(&self, utterance: &str, history: &[ConversationTurn]) -> ConversationTurn {
        self.catalog.refresh_missing().await;
        let tools = self.catalog.descriptors().await;
        let history = &history[history.len().saturating_sub(self.settings.history_turns)..];

        let mut hints: Vec<String> = Vec::new();
        let mut turn = None;
        for round in 1..=MAX_ROUNDS {
            tracing::Span::current().record("rounds", round);
            let last = round == MAX_ROUNDS;
            match self.round(utterance, history, &hints, &tools, last).await {
                Round::Done(done) => {
                    turn = Some(done);
                    break;
                }
                Round::Retry(hint) => {
                    tracing::info!(hint = %hint, "retrying with hint");
                    hints.push(hint);
                }
            }
        }

        // The last round never asks for a retry.
        let turn = turn.unwrap_or_else(|| {
            ConversationTurn::reply(utterance, render::oracle_apology()).with_failure(FailureKind::Internal)
        });

        let span = tracing::Span::current();
        if let Some(tool) = &turn.tool {
            span.record("tool", tool.as_str());
        }
        if let Some(kind) = turn.failure {
            span.record("failure", kind.as_str());
        }
        turn
    }

    async fn round(
        &self,
        utterance: &str,
        history: &[ConversationTurn],
        hints: &[String],
        tools: &[ToolDescriptor],
        last: bool,
    ) -> Round {
        let request = OracleRequest {
            utterance,
            history,
            hints,
            tools,
        };
        let reply = match self.consult(request).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "oracle failed");
                return Round::Done(
                    ConversationTurn::reply(utterance, render::oracle_apology())
                        .with_failure(FailureKind::OracleError),
                );
            }
        };

        let (proposals, text, rationale) = match reply {
            OracleReply::Direct { text } => {
                log_decision(&DispatchDecision::none(None));
                return Round::Done(ConversationTurn::reply(utterance, text));
            }
            OracleReply::Proposals {
                proposals,
                text,
                rationale,
            } => (proposals, text, rationale),
        };

        let Some((proposal, descriptor)) = select_proposal(proposals, tools) else {
            log_decision(&DispatchDecision::none(rationale));
            let reply = text.unwrap_or_else(render::no_tool_reply);
            return Round::Done(ConversationTurn::reply(utterance, reply));
        };

        let arguments = normalize_arguments(descriptor, proposal.arguments);
        log_decision(&DispatchDecision {
            tool: Some(descriptor.name.clone()),
            arguments: arguments.clone(),
            rationale,
        });

        if let Err(violation) = descriptor.validate(&arguments) {
            tracing::warn!(tool = %descriptor.name, %violation, "proposed arguments rejected");
            if !last {
                return Round::Retry(format!(
                    "The arguments for {} were rejected: {}. Call it again with corrected arguments, or answer directly.",
                    descriptor.name, violation
                ));
            }
            return Round::Done(
                ConversationTurn::reply(
                    utterance,
                    failure_text(descriptor.label(), FailureKind::SchemaMismatch),
                )
                .with_failure(FailureKind::SchemaMismatch),
            );
        }

        let result = self.invoke(descriptor, arguments).await;
        match result {
            ToolInvocationResult::Success { payload } => {
                let attachment = attachment_for(&descriptor.name, &payload);
                let summary = match text {
                    Some(text) => text,
                    None => self
                        .summarize(utterance, descriptor, &payload)
                        .await
                        .unwrap_or_else(|| template_summary(descriptor, &attachment)),
                };
                Round::Done(
                    ConversationTurn::reply(utterance, summary)
                        .with_tool(descriptor.name.as_str())
                        .with_attachment(attachment),
                )
            }
            ToolInvocationResult::Failure { kind, message } => {
                tracing::warn!(tool = %descriptor.name, kind = %kind, message = %message, "tool call failed");
                let retryable = matches!(kind, FailureKind::UnknownTool | FailureKind::SchemaMismatch);
                if retryable && !last {
                    return Round::Retry(format!(
                        "Calling {} failed ({}): {}. Adjust the call, or answer directly.",
                        descriptor.name, kind, message
                    ));
                }
                Round::Done(
                    ConversationTurn::reply(utterance, failure_text(descriptor.label(), kind))
                        .with_tool(descriptor.name.as_str())
                        .with_failure(kind),
                )
            }
        }
    }

    async fn consult(&self, request: OracleRequest<'_>) -> Result<OracleReply, OracleError> {
        tokio::time::timeout(self.settings.oracle_timeout, self.oracle.decide(request))
            .await
            .map_err(|_| OracleError::Timeout(self.settings.oracle_timeout))?
    }

    /// Oracle-written summary, or `None` to use the template.
    async fn summarize(&self, utterance: &str, descriptor: &ToolDescriptor, payload: &Value) -> Option<String> {
        let summary = tokio::time::timeout(
            self.settings.oracle_timeout,
            self.oracle.summarize(utterance, descriptor, payload),
        )
        .await;
        match summary {
            Ok(Ok(summary)) => summary,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "summary failed; using template");
                None
            }
            Err(_) => {
                tracing::warn!("summary timed out; using template");
                None
            }
        }
    }

    #[tracing::instrument(name = "dispatch.invoke", skip(self, descriptor, arguments), fields(tool = %descriptor.name, route = Empty))]
    async fn invoke(&self, descriptor: &ToolDescriptor, arguments: Value) -> ToolInvocationResult {
        let timeout = self.settings.tool_timeout;
        match self.catalog.route(&descriptor.name).await {
            Some(Route::Local) => {
                tracing::Span::current().record("route", "local");
                let timeout = self
                    .catalog
                    .local()
                    .timeout_for(&descriptor.name)
                    .map_or(timeout, |own| own.max(timeout));
                match tokio::time::timeout(timeout, self.catalog.local().invoke(&descriptor.name, arguments)).await {
                    Ok(result) => result,
                    Err(_) => ToolInvocationResult::failure(
                        FailureKind::Timeout,
                        format!("{} did not finish within {:?}", descriptor.name, timeout),
                    ),
                }
            }
            Some(Route::Remote(remote)) => {
                tracing::Span::current().record("route", remote.endpoint());
                remote.call_tool(&descriptor.name, arguments, timeout).await
            }
            None => ToolInvocationResult::failure(
                FailureKind::UnknownTool,
                format!("no route for '{}'", descriptor.name),
            ),
        }
    }
}

fn log_decision(decision: &DispatchDecision) {
    tracing::info!(
        tool = decision.tool.as_deref().unwrap_or("none"),
        arguments = %decision.arguments,
        rationale = decision.rationale.as_deref().unwrap_or(""),
        "dispatch decision"
    );
}

/// Best proposal naming a catalogued tool: highest confidence, then fewest
/// missing required arguments, then the oracle's own order.
fn select_proposal(
    proposals: Vec<ToolProposal>,
    tools: &[ToolDescriptor],
) -> Option<(ToolProposal, &ToolDescriptor)> {
    let mut candidates: Vec<(usize, ToolProposal, &ToolDescriptor)> = Vec::new();
    for (index, proposal) in proposals.into_iter().enumerate() {
        match tools.iter().find(|t| t.name == proposal.tool) {
            Some(descriptor) => candidates.push((index, proposal, descriptor)),
            None => tracing::warn!(tool = %proposal.tool, "oracle proposed a tool that is not in the catalogue"),
        }
    }

    candidates.sort_by(|(ia, a, da), (ib, b, db)| {
        let confidence_a = a.confidence.unwrap_or(0.0);
        let confidence_b = b.confidence.unwrap_or(0.0);
        confidence_b
            .total_cmp(&confidence_a)
            .then_with(|| da.missing_required(&a.arguments).cmp(&db.missing_required(&b.arguments)))
            .then_with(|| ia.cmp(ib))
    });

    candidates
        .into_iter()
        .next()
        .map(|(_, proposal, descriptor)| (proposal, descriptor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay::{ParamType, ToolParam};
    use serde_json::json;

    fn tools() -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor::new("query_current_weather", "")
                .with_param(ToolParam::required("city", ParamType::String)),
            ToolDescriptor::new("query_weather_forecast", "")
                .with_param(ToolParam::required("city", ParamType::String))
                .with_param(ToolParam::optional("filter_indices", ParamType::String)),
        ]
    }

    #[test]
    fn test_tie_prefers_fewer_missing_arguments() {
        let tools = tools();
        let proposals = vec![
            ToolProposal::new("query_current_weather", json!({})),
            ToolProposal::new("query_weather_forecast", json!({ "city": "Beijing" })),
        ];
        let (chosen, _) = select_proposal(proposals, &tools).unwrap();
        assert_eq!(chosen.tool, "query_weather_forecast");
    }

    #[test]
    fn test_confidence_wins_then_order() {
        let tools = tools();
        let proposals = vec![
            ToolProposal::new("query_current_weather", json!({ "city": "Beijing" })),
            ToolProposal::new("query_weather_forecast", json!({ "city": "Beijing" })).with_confidence(0.9),
        ];
        let (chosen, _) = select_proposal(proposals, &tools).unwrap();
        assert_eq!(chosen.tool, "query_weather_forecast");

        let proposals = vec![
            ToolProposal::new("query_current_weather", json!({ "city": "Beijing" })),
            ToolProposal::new("query_weather_forecast", json!({ "city": "Beijing" })),
        ];
        let (chosen, _) = select_proposal(proposals, &tools).unwrap();
        assert_eq!(chosen.tool, "query_current_weather");
    }

    #[test]
    fn test_unknown_proposals_are_skipped() {
        let tools = tools();
        assert!(select_proposal(vec![ToolProposal::new("launch_rocket", json!({}))], &tools).is_none());

        let proposals = vec![
            ToolProposal::new("launch_rocket", json!({})).with_confidence(1.0),
            ToolProposal::new("query_current_weather", json!({ "city": "Beijing" })),
        ];
        let (chosen, _) = select_proposal(proposals, &tools).unwrap();
        assert_eq!(chosen.tool, "query_current_weather");
    }
}
