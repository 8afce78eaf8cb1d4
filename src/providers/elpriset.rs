use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Days, FixedOffset, Local, NaiveDate, Timelike};
use std::collections::BTreeMap;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::PriceProvider;
use crate::domain::{PriceArea, PricePoint};

struct CachedPrices {
    fetched_at: DateTime<FixedOffset>,
    date: NaiveDate,
    area: PriceArea,
    points: Vec<PricePoint>,
}

/// Day-ahead prices from elprisetjustnu.se (Swedish zones only).
///
/// Fetches today and, once published, tomorrow. Responses are cached per
/// area and day for `ttl`. Days published in 15-minute periods are
/// averaged into hourly points, so the series always has one entry per
/// hour.
pub struct ElprisetPriceProvider {
    base_url: String,
    client: reqwest::Client,
    cache: RwLock<Option<CachedPrices>>,
    ttl: Duration,
}

impl ElprisetPriceProvider {
    pub fn new(base_url: String, timeout: Duration, ttl: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("smart-heating-controller/", env!("CARGO_PKG_VERSION"))),
        );
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            base_url,
            client,
            cache: RwLock::new(None),
            ttl,
        })
    }

    fn url_for(&self, date: NaiveDate, area: PriceArea) -> String {
        format!(
            "{}/api/v1/prices/{:04}/{:02}-{:02}_{}.json",
            self.base_url.trim_end_matches('/'),
            date.year(),
            date.month(),
            date.day(),
            area
        )
    }

    /// Prices for `date`, `None` if the day is not published yet
    async fn fetch_day(&self, date: NaiveDate, area: PriceArea) -> Result<Option<Vec<PricePoint>>> {
        let url = self.url_for(date, area);
        debug!(%url, "fetching day-ahead prices");
        let resp = self.client.get(&url).send().await.context("price GET failed")?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = resp.text().await.context("price read failed")?;
        if !status.is_success() {
            anyhow::bail!("price API error: HTTP {status}: {body}");
        }

        let raw: Vec<RawPrice> = serde_json::from_str(&body).context("price JSON parse failed")?;
        Ok(Some(hourly(raw)))
    }

    /// Prices for `date` and the following day if available
    pub async fn prices_for(&self, area: PriceArea, date: NaiveDate) -> Result<Vec<PricePoint>> {
        if !area.is_swedish() {
            anyhow::bail!("price area {area} is not served by elprisetjustnu.se");
        }

        let now = Local::now().fixed_offset();
        {
            let cache = self.cache.read().await;
            if let Some(c) = &*cache {
                if c.area == area
                    && c.date == date
                    && (now - c.fetched_at).num_seconds() < self.ttl.as_secs() as i64
                {
                    return Ok(c.points.clone());
                }
            }
        }

        let mut points = self
            .fetch_day(date, area)
            .await?
            .with_context(|| format!("no prices published for {date} in {area}"))?;

        if let Some(next) = date.checked_add_days(Days::new(1)) {
            match self.fetch_day(next, area).await {
                Ok(Some(more)) => points.extend(more),
                Ok(None) => debug!(date = %next, "next-day prices not published yet"),
                Err(e) => warn!(error = %e, date = %next, "next-day price fetch failed"),
            }
        }
        points.sort_by_key(|p| p.time);

        *self.cache.write().await = Some(CachedPrices {
            fetched_at: now,
            date,
            area,
            points: points.clone(),
        });
        Ok(points)
    }
}

#[async_trait]
impl PriceProvider for ElprisetPriceProvider {
    async fn prices(&self, area: PriceArea) -> Result<Vec<PricePoint>> {
        self.prices_for(area, Local::now().date_naive()).await
    }
}

#[derive(Debug, Deserialize)]
struct RawPrice {
    #[serde(rename = "SEK_per_kWh")]
    sek_per_kwh: f64,
    time_start: DateTime<FixedOffset>,
}

/// Mean price per clock hour, ordered by time
fn hourly(raw: Vec<RawPrice>) -> Vec<PricePoint> {
    let mut hours: BTreeMap<DateTime<FixedOffset>, (f64, u32)> = BTreeMap::new();
    for r in raw {
        let hour = r
            .time_start
            .with_minute(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0));
        let Some(hour) = hour else {
            continue;
        };
        let entry = hours.entry(hour).or_insert((0.0, 0));
        entry.0 += r.sek_per_kwh;
        entry.1 += 1;
    }
    hours
        .into_iter()
        .map(|(time, (sum, n))| PricePoint::new(time, sum / f64::from(n)))
        .collect()
}
