//! The weather tools and their registry.

use std::sync::Arc;

use relay::{params_for, typed, RegistryError, ToolDescriptor, ToolError, ToolRegistry};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::amap::{AmapClient, Cast, WeatherError};

pub const CURRENT_TOOL: &str = "query_current_weather";
pub const FORECAST_TOOL: &str = "query_weather_forecast";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CurrentArgs {
    /// City name, e.g. "Beijing" or "Shanghai"
    pub city: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ForecastArgs {
    /// City name, e.g. "Beijing" or "Shanghai"
    pub city: String,
    /// Comma-separated day indices to keep, counting today as 0
    /// (e.g. "0,1,2" for the next three days)
    pub filter_indices: Option<String>,
}

impl From<WeatherError> for ToolError {
    fn from(err: WeatherError) -> Self {
        ToolError::upstream(err.to_string())
    }
}

pub fn current_descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        CURRENT_TOOL,
        "Current weather for a city: conditions, temperature, wind and humidity.",
    )
    .with_title("weather lookup")
    .with_params(params_for::<CurrentArgs>())
}

pub fn forecast_descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        FORECAST_TOOL,
        "Multi-day weather forecast for a city. Use filter_indices to keep only the days the user asked about.",
    )
    .with_title("weather forecast")
    .with_params(params_for::<ForecastArgs>())
}

pub async fn current_weather(amap: &AmapClient, args: CurrentArgs) -> Result<Value, ToolError> {
    info!(city = %args.city, "current weather requested");
    let live = amap.current(&args.city).await?;
    Ok(json!({
        "success": true,
        "type": "current",
        "city": live.city,
        "weather": live.weather,
        "temperature": live.temperature,
        "winddirection": live.winddirection,
        "windpower": live.windpower,
        "humidity": live.humidity,
        "reporttime": live.reporttime,
    }))
}

pub async fn weather_forecast(amap: &AmapClient, args: ForecastArgs) -> Result<Value, ToolError> {
    info!(city = %args.city, filter = ?args.filter_indices, "forecast requested");
    let forecast = amap.forecast(&args.city).await?;
    let days = forecast.casts.len();

    let mut result = json!({
        "success": true,
        "type": "forecast",
        "city": forecast.city,
        "forecasts": [],
        "days": days,
    });
    let casts = match args.filter_indices.as_deref() {
        Some(filter) if !filter.trim().is_empty() => match parse_indices(filter) {
            Some(indices) => {
                result["filtered"] = Value::Bool(true);
                select_days(forecast.casts, &indices)
            }
            None => {
                warn!(filter, "unparsable filter_indices; returning every day");
                forecast.casts
            }
        },
        _ => forecast.casts,
    };
    result["forecasts"] = serde_json::to_value(casts).map_err(|e| ToolError::internal(e.to_string()))?;
    Ok(result)
}

/// `None` if any entry is not a day index.
pub fn parse_indices(filter: &str) -> Option<Vec<usize>> {
    filter
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().ok())
        .collect()
}

/// Days in the order requested; indices past the end are skipped.
pub fn select_days(casts: Vec<Cast>, indices: &[usize]) -> Vec<Cast> {
    indices.iter().filter_map(|&i| casts.get(i).cloned()).collect()
}

/// Both weather tools over one shared AMap client.
pub fn registry(amap: AmapClient) -> Result<ToolRegistry, RegistryError> {
    let amap = Arc::new(amap);
    let current = Arc::clone(&amap);
    let forecast = amap;

    let mut registry = ToolRegistry::new();
    registry.register(
        current_descriptor(),
        typed(move |args: CurrentArgs| {
            let amap = Arc::clone(&current);
            async move { current_weather(&amap, args).await }
        }),
    )?;
    registry.register(
        forecast_descriptor(),
        typed(move |args: ForecastArgs| {
            let amap = Arc::clone(&forecast);
            async move { weather_forecast(&amap, args).await }
        }),
    )?;
    Ok(registry)
}
