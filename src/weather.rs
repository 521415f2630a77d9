//! Weather cache
//!
//! Keeps the latest raw weather report and forecast text per station,
//! refreshed from two gzip-compressed XML documents at most every ten
//! minutes. Refresh failures keep the previous maps: stale-but-available
//! beats empty. The cycle never waits on a refresh; the aggregator reads a
//! cloned snapshot after the swap.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use flate2::read::GzDecoder;
use quick_xml::events::Event;
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn, Instrument};

/// Minimum spacing between refresh attempts
const REFRESH_INTERVAL_MIN: i64 = 10;

/// Station → raw text maps, cloned out to readers
#[derive(Debug, Clone, Default)]
pub struct WeatherSnapshot {
    pub reports: HashMap<String, String>,
    pub forecasts: HashMap<String, String>,
}

impl WeatherSnapshot {
    pub fn report_for(&self, station: &str) -> Option<&str> {
        self.reports.get(station).map(String::as_str)
    }

    pub fn forecast_for(&self, station: &str) -> Option<&str> {
        self.forecasts.get(station).map(String::as_str)
    }
}

struct CacheState {
    snapshot: WeatherSnapshot,
    last_attempt: Option<DateTime<Utc>>,
}

pub struct WeatherCache {
    client: reqwest::Client,
    reports_url: String,
    forecasts_url: String,
    state: RwLock<CacheState>,
}

/// Pull every `<raw_text>` out of a report/forecast document, keyed by the
/// record's `<station_id>`. The documents list newest first; the first
/// text per station wins.
fn parse_station_texts(xml: &str) -> Result<HashMap<String, String>> {
    let mut reader = quick_xml::Reader::from_str(xml);

    #[derive(Clone, Copy)]
    enum Field {
        RawText,
        StationId,
    }

    let mut stations = HashMap::new();
    let mut field: Option<Field> = None;
    let mut raw_text: Option<String> = None;
    let mut station_id: Option<String> = None;

    loop {
        match reader.read_event().context("Malformed weather XML")? {
            Event::Start(e) => match e.name().as_ref() {
                b"raw_text" => field = Some(Field::RawText),
                b"station_id" => field = Some(Field::StationId),
                _ => {}
            },
            Event::Text(e) => {
                let text = e.unescape().context("Bad text node in weather XML")?;
                match field {
                    Some(Field::RawText) => raw_text = Some(text.into_owned()),
                    Some(Field::StationId) => station_id = Some(text.into_owned()),
                    None => {}
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"raw_text" | b"station_id" => field = None,
                b"METAR" | b"TAF" => {
                    if let (Some(station), Some(text)) = (station_id.take(), raw_text.take()) {
                        stations.entry(station).or_insert(text);
                    }
                    raw_text = None;
                    station_id = None;
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(stations)
}

impl WeatherCache {
    pub fn new(client: reqwest::Client, reports_url: String, forecasts_url: String) -> Self {
        Self {
            client,
            reports_url,
            forecasts_url,
            state: RwLock::new(CacheState {
                snapshot: WeatherSnapshot::default(),
                last_attempt: None,
            }),
        }
    }

    /// Consistent view of the current maps
    pub async fn snapshot(&self) -> WeatherSnapshot {
        self.state.read().await.snapshot.clone()
    }

    async fn fetch_document(&self, url: &str) -> Result<HashMap<String, String>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch weather document {}", url))?
            .error_for_status()
            .context("Weather endpoint returned an error status")?;

        let compressed = response
            .bytes()
            .await
            .context("Failed to read weather document body")?;

        let mut xml = String::new();
        GzDecoder::new(compressed.as_ref())
            .read_to_string(&mut xml)
            .context("Failed to decompress weather document")?;

        parse_station_texts(&xml)
    }

    /// Refresh both documents if the interval has elapsed. Attempts are
    /// rate-limited, not successes: a failed attempt also waits out the
    /// interval rather than hammering a broken upstream every cycle.
    pub async fn refresh_if_due(&self, now: DateTime<Utc>) -> bool {
        {
            let state = self.state.read().await;
            if let Some(last) = state.last_attempt {
                if now - last < Duration::minutes(REFRESH_INTERVAL_MIN) {
                    return false;
                }
            }
        }
        self.state.write().await.last_attempt = Some(now);

        let (reports, forecasts) = futures_util::join!(
            self.fetch_document(&self.reports_url),
            self.fetch_document(&self.forecasts_url)
        );

        // Each map swaps independently; a failed half keeps its old data
        let mut refreshed = false;
        match reports {
            Ok(reports) => {
                let mut state = self.state.write().await;
                metrics::gauge!("stratus.weather.reports").set(reports.len() as f64);
                state.snapshot.reports = reports;
                refreshed = true;
            }
            Err(e) => {
                metrics::counter!("stratus.weather.refresh_failures").increment(1);
                warn!("Weather report refresh failed, keeping previous cache: {e:#}");
            }
        }
        match forecasts {
            Ok(forecasts) => {
                let mut state = self.state.write().await;
                metrics::gauge!("stratus.weather.forecasts").set(forecasts.len() as f64);
                state.snapshot.forecasts = forecasts;
                refreshed = true;
            }
            Err(e) => {
                metrics::counter!("stratus.weather.refresh_failures").increment(1);
                warn!("Weather forecast refresh failed, keeping previous cache: {e:#}");
            }
        }

        if refreshed {
            info!("Weather cache refreshed");
        }
        refreshed
    }

    /// Background refresh loop, independent of the fusion cycle
    pub fn start_refresh_task(self: &Arc<Self>, check_interval_secs: u64) {
        let cache = Arc::clone(self);
        tokio::spawn(
            async move {
                let mut interval =
                    tokio::time::interval(std::time::Duration::from_secs(check_interval_secs));
                loop {
                    interval.tick().await;
                    cache.refresh_if_due(Utc::now()).await;
                }
            }
            .instrument(tracing::info_span!("weather_refresh")),
        );
        info!(
            "Started weather refresh task (checking every {} seconds)",
            check_interval_secs
        );
    }
}
