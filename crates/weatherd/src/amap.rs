//! AMap weather API client.
//!
//! A lookup is two requests: the district search resolves a city name to an
//! adcode, then the weather endpoint is queried by adcode. Every AMap reply
//! carries `status: "1"` on success; anything else is an upstream failure.

use std::time::Duration;

use conciergeconf::WeatherConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    #[error("weather API key is not configured (set AMAP_API_KEY or weather.api_key)")]
    NotConfigured,

    #[error("request to AMap failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("AMap returned HTTP {0}")]
    Http(u16),

    #[error("AMap reply could not be read: {0}")]
    Malformed(String),

    #[error("AMap rejected the request: {0}")]
    Rejected(String),

    #[error("no city found for '{0}'")]
    UnknownCity(String),

    #[error("AMap returned no weather data for '{0}'")]
    NoData(String),
}

/// AMap sends empty fields as `[]` rather than `""`.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    #[serde(default)]
    info: String,
    #[serde(flatten)]
    body: T,
}

#[derive(Debug, Default, Deserialize)]
struct DistrictBody {
    #[serde(default)]
    districts: Vec<District>,
}

#[derive(Debug, Deserialize)]
struct District {
    #[serde(deserialize_with = "lenient_string")]
    adcode: String,
}

#[derive(Debug, Default, Deserialize)]
struct LiveBody {
    #[serde(default)]
    lives: Vec<Live>,
}

#[derive(Debug, Default, Deserialize)]
struct ForecastBody {
    #[serde(default)]
    forecasts: Vec<ForecastEntry>,
}

#[derive(Debug, Deserialize)]
struct ForecastEntry {
    #[serde(default, deserialize_with = "lenient_string")]
    city: String,
    #[serde(default)]
    casts: Vec<Cast>,
}

/// Observed conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Live {
    #[serde(default, deserialize_with = "lenient_string")]
    pub city: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub weather: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub temperature: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub winddirection: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub windpower: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub humidity: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub reporttime: String,
}

/// One forecast day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cast {
    #[serde(default, deserialize_with = "lenient_string")]
    pub date: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub week: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub dayweather: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub nightweather: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub daytemp: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub nighttemp: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub daywind: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub nightwind: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Forecast {
    pub city: String,
    pub casts: Vec<Cast>,
}

#[derive(Debug, Clone)]
pub struct AmapClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl AmapClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, WeatherError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url: String = base_url.into();
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    pub fn from_config(config: &WeatherConfig) -> Result<Self, WeatherError> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(WeatherError::NotConfigured)?;
        Self::new(&config.base_url, api_key, config.request_timeout())
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, WeatherError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .query(&[("key", self.api_key.as_str())])
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(WeatherError::Http(status.as_u16()));
        }

        let text = response.text().await?;
        let envelope: Envelope<T> =
            serde_json::from_str(&text).map_err(|e| WeatherError::Malformed(e.to_string()))?;
        if envelope.status != "1" {
            return Err(WeatherError::Rejected(if envelope.info.is_empty() {
                format!("status {}", envelope.status)
            } else {
                envelope.info
            }));
        }
        Ok(envelope.body)
    }

    /// Resolve a city name to its AMap adcode.
    #[instrument(skip(self))]
    pub async fn city_code(&self, city: &str) -> Result<String, WeatherError> {
        let body: DistrictBody = self
            .get(
                "/v3/config/district",
                &[("keywords", city), ("subdistrict", "0")],
            )
            .await?;
        let adcode = body
            .districts
            .into_iter()
            .map(|d| d.adcode)
            .find(|code| !code.is_empty())
            .ok_or_else(|| WeatherError::UnknownCity(city.to_string()))?;
        debug!(city, adcode = %adcode, "resolved city");
        Ok(adcode)
    }

    #[instrument(skip(self))]
    pub async fn current(&self, city: &str) -> Result<Live, WeatherError> {
        let adcode = self.city_code(city).await?;
        let body: LiveBody = self
            .get(
                "/v3/weather/weatherInfo",
                &[("city", adcode.as_str()), ("extensions", "base")],
            )
            .await?;
        body.lives
            .into_iter()
            .next()
            .ok_or_else(|| WeatherError::NoData(city.to_string()))
    }

    #[instrument(skip(self))]
    pub async fn forecast(&self, city: &str) -> Result<Forecast, WeatherError> {
        let adcode = self.city_code(city).await?;
        let body: ForecastBody = self
            .get(
                "/v3/weather/weatherInfo",
                &[("city", adcode.as_str()), ("extensions", "all")],
            )
            .await?;
        let entry = body
            .forecasts
            .into_iter()
            .next()
            .ok_or_else(|| WeatherError::NoData(city.to_string()))?;
        if entry.casts.is_empty() {
            return Err(WeatherError::NoData(city.to_string()));
        }
        Ok(Forecast {
            city: entry.city,
            casts: entry.casts,
        })
    }
}
