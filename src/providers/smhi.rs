//! Outdoor temperature from the SMHI point forecast API.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Local};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::WeatherProvider;
use crate::domain::WeatherReading;

pub struct SmhiWeatherProvider {
    client: Client,
    base_url: String,
    latitude: f64,
    longitude: f64,
}

impl SmhiWeatherProvider {
    pub fn new(base_url: String, latitude: f64, longitude: f64, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url,
            latitude,
            longitude,
        })
    }

    fn url(&self) -> String {
        format!(
            "{}/category/pmp3g/version/2/geotype/point/lon/{:.6}/lat/{:.6}/data.json",
            self.base_url.trim_end_matches('/'),
            self.longitude,
            self.latitude
        )
    }

    /// Temperature of the forecast step closest to `now`
    pub async fn reading_at(&self, now: DateTime<FixedOffset>) -> Result<WeatherReading> {
        let url = self.url();
        debug!(%url, "fetching SMHI forecast");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send request to SMHI API")?;
        if !response.status().is_success() {
            anyhow::bail!("SMHI API error: {}", response.status());
        }
        let forecast: SmhiResponse = response.json().await.context("Failed to parse SMHI response")?;

        let outdoor_c = forecast
            .time_series
            .iter()
            .filter_map(|ts| ts.temperature().map(|t| (ts.valid_time, t)))
            .min_by_key(|(time, _)| (*time - now).num_seconds().abs())
            .map(|(_, t)| t)
            .context("SMHI forecast has no temperature values")?;

        Ok(WeatherReading { outdoor_c })
    }
}

#[async_trait]
impl WeatherProvider for SmhiWeatherProvider {
    async fn current(&self) -> Result<WeatherReading> {
        self.reading_at(Local::now().fixed_offset()).await
    }
}

#[derive(Debug, Deserialize)]
struct SmhiResponse {
    #[serde(rename = "timeSeries")]
    time_series: Vec<SmhiTimeSeries>,
}

#[derive(Debug, Deserialize)]
struct SmhiTimeSeries {
    #[serde(rename = "validTime")]
    valid_time: DateTime<FixedOffset>,
    parameters: Vec<SmhiParameter>,
}

impl SmhiTimeSeries {
    fn temperature(&self) -> Option<f64> {
        self.parameters
            .iter()
            .find(|p| p.name == "t")
            .and_then(|p| p.values.first().copied())
            .filter(|t| t.is_finite())
    }
}

#[derive(Debug, Deserialize)]
struct SmhiParameter {
    name: String,
    values: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn body() -> serde_json::Value {
        serde_json::json!({
            "approvedTime": "2024-01-15T09:00:00Z",
            "timeSeries": [
                { "validTime": "2024-01-15T10:00:00Z", "parameters": [
                    { "name": "ws", "values": [3.1] },
                    { "name": "t", "values": [-4.2] } ] },
                { "validTime": "2024-01-15T11:00:00Z", "parameters": [
                    { "name": "t", "values": [-3.5] } ] },
                { "validTime": "2024-01-15T12:00:00Z", "parameters": [
                    { "name": "ws", "values": [2.0] } ] }
            ]
        })
    }

    #[tokio::test]
    async fn test_picks_closest_forecast_step() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/category/pmp3g/version/2/geotype/point/lon/18\.068600/lat/59\.329300/data\.json$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body()))
            .mount(&server)
            .await;

        let provider = SmhiWeatherProvider::new(server.uri(), 59.3293, 18.0686, Duration::from_secs(5)).unwrap();
        let now = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 15, 11, 50, 0)
            .unwrap();
        // 12:00 has no temperature, so 11:00 is the closest usable step
        let reading = provider.reading_at(now).await.unwrap();
        assert_eq!(reading.outdoor_c, -3.5);
    }

    #[tokio::test]
    async fn test_http_error_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let provider = SmhiWeatherProvider::new(server.uri(), 59.0, 18.0, Duration::from_secs(5)).unwrap();
        assert!(provider.current().await.is_err());
    }
}
