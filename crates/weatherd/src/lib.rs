//! Weather lookup service.
//!
//! Serves `query_current_weather` and `query_weather_forecast` over the relay
//! protocol, answering from the AMap weather API.

pub mod amap;
pub mod telemetry;
pub mod tools;

use std::sync::Arc;

use relay::{Implementation, RegistryError, RelayState};

pub use amap::{AmapClient, WeatherError};

const INSTRUCTIONS: &str = "Weather lookups by city name. Use query_current_weather for \
conditions right now and query_weather_forecast for the coming days.";

/// Relay state with both weather tools registered.
pub fn relay_state(amap: AmapClient) -> Result<Arc<RelayState>, RegistryError> {
    let registry = tools::registry(amap)?;
    let state = RelayState::new(
        registry,
        Implementation::new("weatherd", env!("CARGO_PKG_VERSION")),
    )
    .with_instructions(INSTRUCTIONS);
    Ok(Arc::new(state))
}
