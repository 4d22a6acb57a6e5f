//! Turning tool outcomes into what the user sees.

use relay::{FailureKind, ToolDescriptor};
use serde_json::Value;

use crate::types::{Attachment, ScheduleRow, WeatherCard};

/// Pick an attachment by payload shape.
pub fn attachment_for(tool: &str, payload: &Value) -> Attachment {
    if let Some(schedules) = payload.get("schedules") {
        if let Ok(rows) = serde_json::from_value::<Vec<ScheduleRow>>(schedules.clone()) {
            let department = payload
                .get("query_department")
                .and_then(Value::as_str)
                .unwrap_or("all")
                .to_string();
            return Attachment::Schedule { department, rows };
        }
    }

    if payload.get("image_id").is_some() {
        let field = |name: &str| {
            payload
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        return Attachment::Image {
            image_id: field("image_id"),
            filename: field("filename"),
            url: field("url"),
            prompt: field("prompt"),
        };
    }

    if matches!(
        payload.get("type").and_then(Value::as_str),
        Some("current" | "forecast")
    ) {
        if let Ok(card) = serde_json::from_value::<WeatherCard>(payload.clone()) {
            return Attachment::Weather(card);
        }
    }

    Attachment::Data {
        tool: tool.to_string(),
        payload: payload.clone(),
    }
}

/// Summary used when the oracle does not write one.
pub fn template_summary(descriptor: &ToolDescriptor, attachment: &Attachment) -> String {
    match attachment {
        Attachment::Schedule { department, rows } if department == "all" => {
            format!("Found {} schedule entries across all departments.", rows.len())
        }
        Attachment::Schedule { department, rows } => {
            format!("Found {} schedule entries for {}.", rows.len(), department)
        }
        Attachment::Image { prompt, .. } => {
            format!("Here is the image I generated for \"{}\".", prompt)
        }
        Attachment::Weather(WeatherCard::Current {
            city,
            weather,
            temperature,
            ..
        }) => format!("It is currently {} and {}°C in {}.", weather, temperature, city),
        Attachment::Weather(WeatherCard::Forecast { city, forecasts, .. }) => match forecasts.len() {
            0 => format!("I couldn't find forecast days matching that request for {}.", city),
            1 => format!("Here is the forecast for {} on {}.", city, forecasts[0].date),
            n => format!("Here is the {}-day forecast for {}.", n, city),
        },
        Attachment::Data { .. } => format!("Here is the result from the {}.", descriptor.label()),
    }
}

/// What the user is told when a tool call fails. Never includes the
/// underlying error message.
pub fn failure_text(label: &str, kind: FailureKind) -> String {
    match kind {
        FailureKind::ConnectionUnavailable | FailureKind::ConnectionLost => format!(
            "The {} is temporarily unavailable. Please try again in a moment.",
            label
        ),
        FailureKind::Timeout => format!(
            "The {} took too long to respond. Please try again in a moment.",
            label
        ),
        FailureKind::UnknownTool | FailureKind::SchemaMismatch => format!(
            "Sorry, I couldn't work out how to use the {} for that request. Could you rephrase it?",
            label
        ),
        FailureKind::UpstreamError => format!(
            "The {} couldn't get an answer from its data provider. Please try again later.",
            label
        ),
        FailureKind::OracleError => oracle_apology(),
        FailureKind::Internal => format!("Something went wrong while running the {}.", label),
    }
}

pub fn oracle_apology() -> String {
    "Sorry, I can't process requests right now. Please try again in a moment.".to_string()
}

/// The oracle picked a tool that does not exist and offered no text.
pub fn no_tool_reply() -> String {
    "Sorry, I don't have a tool that can help with that.".to_string()
}
