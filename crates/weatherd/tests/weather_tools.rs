//! The weather tools served over a real relay connection, with AMap mocked.

use std::time::Duration;

use relay::client::{ClientOptions, SseClient};
use relay::FailureKind;
use serde_json::json;
use weatherd::{relay_state, AmapClient};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TIMEOUT: Duration = Duration::from_secs(5);

async fn mock_amap() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/config/district"))
        .and(query_param("keywords", "Beijing"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "1",
            "districts": [{ "adcode": "110000" }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v3/config/district"))
        .and(query_param("keywords", "Atlantis"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "1",
            "districts": []
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v3/weather/weatherInfo"))
        .and(query_param("extensions", "base"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "1",
            "lives": [{
                "city": "Beijing",
                "weather": "Sunny",
                "temperature": "25",
                "winddirection": "NE",
                "windpower": "3",
                "humidity": "40",
                "reporttime": "2025-06-01 10:00:00"
            }]
        })))
        .mount(&server)
        .await;
    let casts: Vec<_> = (0..4)
        .map(|i| {
            json!({
                "date": format!("2025-06-0{}", i + 1),
                "week": (i + 1).to_string(),
                "dayweather": "Cloudy",
                "nightweather": "Clear",
                "daytemp": "28",
                "nighttemp": "18",
                "daywind": "N",
                "nightwind": "N"
            })
        })
        .collect();
    Mock::given(method("GET"))
        .and(path("/v3/weather/weatherInfo"))
        .and(query_param("extensions", "all"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "1",
            "forecasts": [{ "city": "Beijing", "casts": casts }]
        })))
        .mount(&server)
        .await;
    server
}

async fn serve(amap: &MockServer) -> SseClient {
    let client = AmapClient::new(amap.uri(), "test-key", Duration::from_secs(2)).unwrap();
    let app = relay::router(relay_state(client).unwrap());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    SseClient::new(
        format!("http://{}", addr),
        ClientOptions::with_name("weatherd-test", "0.0.1"),
    )
}

#[tokio::test]
async fn test_lists_both_tools() {
    let amap = mock_amap().await;
    let client = serve(&amap).await;

    let tools = client.list_tools().await.unwrap();
    let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["query_current_weather", "query_weather_forecast"]);
    assert_eq!(tools[0].label(), "weather lookup");
    assert!(tools[1].param("filter_indices").is_some_and(|p| !p.required));
}

#[tokio::test]
async fn test_current_weather() {
    let amap = mock_amap().await;
    let client = serve(&amap).await;

    let result = client
        .call_tool("query_current_weather", json!({ "city": "Beijing" }), TIMEOUT)
        .await;
    let payload = result.payload().cloned().unwrap();
    assert_eq!(payload["type"], "current");
    assert_eq!(payload["city"], "Beijing");
    assert_eq!(payload["temperature"], "25");
    assert_eq!(payload["success"], true);
}

#[tokio::test]
async fn test_forecast_filtered_and_unfiltered() {
    let amap = mock_amap().await;
    let client = serve(&amap).await;

    let full = client
        .call_tool("query_weather_forecast", json!({ "city": "Beijing" }), TIMEOUT)
        .await;
    let full = full.payload().cloned().unwrap();
    assert_eq!(full["days"], 4);
    assert_eq!(full["forecasts"].as_array().unwrap().len(), 4);
    assert!(full.get("filtered").is_none());

    let filtered = client
        .call_tool(
            "query_weather_forecast",
            json!({ "city": "Beijing", "filter_indices": "1,2,7" }),
            TIMEOUT,
        )
        .await;
    let filtered = filtered.payload().cloned().unwrap();
    assert_eq!(filtered["filtered"], true);
    let dates: Vec<_> = filtered["forecasts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["date"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(dates, vec!["2025-06-02", "2025-06-03"]);

    let garbled = client
        .call_tool(
            "query_weather_forecast",
            json!({ "city": "Beijing", "filter_indices": "tomorrow" }),
            TIMEOUT,
        )
        .await;
    let garbled = garbled.payload().cloned().unwrap();
    assert_eq!(garbled["forecasts"].as_array().unwrap().len(), 4);
    assert!(garbled.get("filtered").is_none());
}

#[tokio::test]
async fn test_unknown_city_is_upstream_error() {
    let amap = mock_amap().await;
    let client = serve(&amap).await;

    let result = client
        .call_tool("query_current_weather", json!({ "city": "Atlantis" }), TIMEOUT)
        .await;
    assert_eq!(result.failure_kind(), Some(FailureKind::UpstreamError));
}

#[tokio::test]
async fn test_missing_city_is_schema_mismatch() {
    let amap = mock_amap().await;
    let client = serve(&amap).await;

    let result = client
        .call_tool("query_current_weather", json!({}), TIMEOUT)
        .await;
    assert_eq!(result.failure_kind(), Some(FailureKind::SchemaMismatch));
}
