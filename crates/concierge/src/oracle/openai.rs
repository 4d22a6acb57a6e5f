use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionTool, ChatCompletionToolArgs,
    ChatCompletionToolType, CreateChatCompletionRequestArgs, FunctionObjectArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use conciergeconf::OracleConfig;
use relay::ToolDescriptor;
use serde_json::Value;

use super::{Oracle, OracleError, OracleReply, OracleRequest, ToolProposal};

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a helpful assistant. You can hold an ordinary conversation and you can \
also call tools.

Answer programming, knowledge, and writing questions directly. Use a tool only \
when the request needs one:
- schedule_lookup for questions about employee schedules or work plans. \
Departments are engineering, marketing, hr, finance, or all.
- generate_image when the user asks you to draw or create a picture. Keep your \
reply short after calling it.
- query_current_weather for current conditions in a city.
- query_weather_forecast for the coming days. Pass filter_indices as \
comma-separated day indices starting at 0 (\"next three days\" is \"0,1,2\", \
\"the day after tomorrow\" is \"1\") and describe exactly those days in your reply.

If you are unsure whether a tool applies, answer directly.";

const SUMMARY_PROMPT: &str = "\
Answer the user's request in two or three sentences using only the tool result \
below. Do not repeat raw JSON.";

/// Oracle over any OpenAI-compatible chat completions API.
pub struct OpenAiOracle {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    system_prompt: String,
}

impl std::fmt::Debug for OpenAiOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiOracle")
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl OpenAiOracle {
    pub fn from_config(config: &OracleConfig) -> Result<Self, OracleError> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| OracleError::NotConfigured("oracle.api_key is not set".to_string()))?;

        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(config.base_url.trim_end_matches('/'));

        Ok(Self {
            client: Client::with_config(openai_config),
            model: config.model.clone(),
            temperature: config.temperature,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        })
    }

    fn messages(&self, request: &OracleRequest<'_>) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
        let mut messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(self.system_prompt.as_str())
                .build()?
                .into(),
        ];

        for turn in request.history {
            messages.push(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(turn.user.as_str())
                    .build()?
                    .into(),
            );
            messages.push(
                ChatCompletionRequestAssistantMessageArgs::default()
                    .content(turn.assistant.as_str())
                    .build()?
                    .into(),
            );
        }

        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(request.utterance)
                .build()?
                .into(),
        );

        for hint in request.hints {
            messages.push(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(hint.as_str())
                    .build()?
                    .into(),
            );
        }

        Ok(messages)
    }
}

fn function_tool(descriptor: &ToolDescriptor) -> Result<ChatCompletionTool, OracleError> {
    let parameters = serde_json::to_value(descriptor.to_tool().input_schema)
        .map_err(|e| OracleError::Malformed(format!("schema for {}: {}", descriptor.name, e)))?;

    let function = FunctionObjectArgs::default()
        .name(descriptor.name.as_str())
        .description(descriptor.description.as_str())
        .parameters(parameters)
        .build()
        .map_err(api_error)?;

    ChatCompletionToolArgs::default()
        .r#type(ChatCompletionToolType::Function)
        .function(function)
        .build()
        .map_err(api_error)
}

fn api_error(e: OpenAIError) -> OracleError {
    OracleError::Api(e.to_string())
}

/// Unparsable arguments are passed through as a raw string so validation
/// rejects them with a hint instead of failing the turn here.
fn proposal_from_call(call: ChatCompletionMessageToolCall) -> ToolProposal {
    let arguments = match serde_json::from_str::<Value>(&call.function.arguments) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(tool = %call.function.name, error = %e, "unparsable tool arguments");
            Value::String(call.function.arguments)
        }
    };
    ToolProposal::new(call.function.name, arguments)
}

#[async_trait]
impl Oracle for OpenAiOracle {
    #[tracing::instrument(
        name = "oracle.decide",
        skip(self, request),
        fields(oracle.model = %self.model, tools = request.tools.len(), hints = request.hints.len())
    )]
    async fn decide(&self, request: OracleRequest<'_>) -> Result<OracleReply, OracleError> {
        let messages = self.messages(&request).map_err(api_error)?;
        let tools = request
            .tools
            .iter()
            .map(function_tool)
            .collect::<Result<Vec<_>, _>>()?;

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(self.model.as_str())
            .temperature(self.temperature)
            .messages(messages);
        if !tools.is_empty() {
            builder.tools(tools);
        }
        let chat_request = builder.build().map_err(api_error)?;

        let response = self.client.chat().create(chat_request).await.map_err(api_error)?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| OracleError::Malformed("response has no choices".to_string()))?;

        let text = choice.message.content.filter(|t| !t.trim().is_empty());
        let calls = choice.message.tool_calls.unwrap_or_default();

        if calls.is_empty() {
            let text = text.ok_or_else(|| {
                OracleError::Malformed("response has neither content nor tool calls".to_string())
            })?;
            return Ok(OracleReply::Direct { text });
        }

        let proposals: Vec<ToolProposal> = calls.into_iter().map(proposal_from_call).collect();
        tracing::debug!(
            proposed = ?proposals.iter().map(|p| p.tool.as_str()).collect::<Vec<_>>(),
            "oracle proposed tools"
        );
        Ok(OracleReply::Proposals {
            proposals,
            text,
            rationale: None,
        })
    }

    async fn summarize(
        &self,
        utterance: &str,
        tool: &ToolDescriptor,
        payload: &Value,
    ) -> Result<Option<String>, OracleError> {
        let result = format!("Result of the {}:\n{}", tool.label(), payload);
        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(SUMMARY_PROMPT)
                .build()
                .map_err(api_error)?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(utterance)
                .build()
                .map_err(api_error)?
                .into(),
            ChatCompletionRequestSystemMessageArgs::default()
                .content(result)
                .build()
                .map_err(api_error)?
                .into(),
        ];

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(self.model.as_str())
            .temperature(self.temperature)
            .messages(messages)
            .build()
            .map_err(api_error)?;

        let response = self.client.chat().create(chat_request).await.map_err(api_error)?;
        Ok(response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|t| !t.trim().is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConversationTurn;
    use relay::{ParamType, ToolParam};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn completion(message: Value) -> Value {
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1_700_000_000u32,
            "model": "deepseek-chat",
            "choices": [{
                "index": 0,
                "message": message,
                "finish_reason": "stop"
            }]
        })
    }

    fn oracle(base_url: String) -> OpenAiOracle {
        OpenAiOracle::from_config(&OracleConfig {
            api_key: Some("sk-test".to_string()),
            base_url,
            ..Default::default()
        })
        .unwrap()
    }

    fn weather_tool() -> ToolDescriptor {
        ToolDescriptor::new("query_current_weather", "Current weather for a city")
            .with_title("weather lookup")
            .with_param(ToolParam::required("city", ParamType::String))
    }

    #[test]
    fn test_missing_key_is_not_configured() {
        let err = OpenAiOracle::from_config(&OracleConfig::default()).unwrap_err();
        assert!(matches!(err, OracleError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_tool_call_becomes_proposal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({ "model": "deepseek-chat" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(json!({
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {
                        "name": "query_current_weather",
                        "arguments": "{\"city\":\"Beijing\"}"
                    }
                }]
            }))))
            .expect(1)
            .mount(&server)
            .await;

        let oracle = oracle(server.uri());
        let history = vec![ConversationTurn::reply("hello", "hi there")];
        let tools = vec![weather_tool()];
        let reply = oracle
            .decide(OracleRequest {
                utterance: "weather in Beijing?",
                history: &history,
                hints: &[],
                tools: &tools,
            })
            .await
            .unwrap();

        assert_eq!(reply, OracleReply::propose("query_current_weather", json!({ "city": "Beijing" })));
    }

    #[tokio::test]
    async fn test_plain_content_is_direct() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(json!({
                "role": "assistant",
                "content": "Rust ownership means each value has one owner."
            }))))
            .mount(&server)
            .await;

        let reply = oracle(server.uri())
            .decide(OracleRequest {
                utterance: "explain ownership",
                history: &[],
                hints: &[],
                tools: &[weather_tool()],
            })
            .await
            .unwrap();

        assert!(matches!(reply, OracleReply::Direct { ref text } if text.starts_with("Rust ownership")));
    }

    #[tokio::test]
    async fn test_unparsable_arguments_pass_through_raw() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(json!({
                "role": "assistant",
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": { "name": "query_current_weather", "arguments": "{city: Beijing" }
                }]
            }))))
            .mount(&server)
            .await;

        let reply = oracle(server.uri())
            .decide(OracleRequest {
                utterance: "weather?",
                history: &[],
                hints: &[],
                tools: &[weather_tool()],
            })
            .await
            .unwrap();

        match reply {
            OracleReply::Proposals { proposals, .. } => {
                assert_eq!(proposals[0].arguments, Value::String("{city: Beijing".to_string()));
            }
            other => panic!("expected proposals, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_api_failure_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": { "message": "bad key", "type": "invalid_request_error", "param": null, "code": null }
            })))
            .mount(&server)
            .await;

        let err = oracle(server.uri())
            .decide(OracleRequest {
                utterance: "hi",
                history: &[],
                hints: &[],
                tools: &[],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OracleError::Api(_)));
    }
}
