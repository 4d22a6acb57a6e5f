use relay::FailureKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One exchange: what the user said and what came back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub user: String,
    pub assistant: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,

    /// Tool that produced this turn, if one ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl ConversationTurn {
    pub fn reply(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
            attachments: Vec::new(),
            tool: None,
            failure: None,
        }
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn with_failure(mut self, kind: FailureKind) -> Self {
        self.failure = Some(kind);
        self
    }

    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }
}

/// Structured output shown alongside the assistant text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Attachment {
    Schedule {
        department: String,
        rows: Vec<ScheduleRow>,
    },
    Image {
        image_id: String,
        filename: String,
        url: String,
        prompt: String,
    },
    Weather(WeatherCard),
    Data {
        tool: String,
        payload: Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRow {
    pub department: String,
    pub employee_name: String,
    pub position: String,
    pub date: String,
    pub task: String,
    pub status: String,
    pub priority: String,
}

/// Weather payloads as the weather service returns them. Upstream values are
/// strings and are kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WeatherCard {
    Current {
        city: String,
        weather: String,
        temperature: String,
        #[serde(default)]
        winddirection: String,
        #[serde(default)]
        windpower: String,
        #[serde(default)]
        humidity: String,
        #[serde(default)]
        reporttime: String,
    },
    Forecast {
        city: String,
        forecasts: Vec<ForecastDay>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filtered: Option<bool>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastDay {
    pub date: String,
    pub week: String,
    pub dayweather: String,
    pub nightweather: String,
    pub daytemp: String,
    pub nighttemp: String,
    #[serde(default)]
    pub daywind: String,
    #[serde(default)]
    pub nightwind: String,
}

/// What one oracle round settled on. Logged, never stored.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchDecision {
    pub tool: Option<String>,
    pub arguments: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl DispatchDecision {
    pub fn none(rationale: Option<String>) -> Self {
        Self {
            tool: None,
            arguments: Value::Null,
            rationale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_weather_card_from_service_payload() {
        let payload = json!({
            "success": true,
            "type": "current",
            "city": "Beijing",
            "weather": "Sunny",
            "temperature": "21",
            "winddirection": "NE",
            "windpower": "≤3",
            "humidity": "30",
            "reporttime": "2025-06-01 10:00:00"
        });
        let card: WeatherCard = serde_json::from_value(payload).unwrap();
        assert!(matches!(card, WeatherCard::Current { ref temperature, .. } if temperature == "21"));
    }

    #[test]
    fn test_turn_serialization_skips_empty() {
        let turn = ConversationTurn::reply("hi", "hello");
        let value = serde_json::to_value(&turn).unwrap();
        assert_eq!(value, json!({ "user": "hi", "assistant": "hello" }));

        let failed = ConversationTurn::reply("weather?", "unavailable")
            .with_tool("query_current_weather")
            .with_failure(FailureKind::ConnectionUnavailable);
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["failure"], "connection_unavailable");
    }
}
