//! Feed intake for the network data snapshot
//!
//! This module provides a trait-based abstraction over the periodic
//! full-snapshot feed so that:
//! - Production: HTTP pull of the JSON datafeed + transceiver endpoint
//! - Testing: replaying canned snapshots from memory
//!
//! The wire structs deliberately ignore unknown fields; the feed format is
//! owned by the network operator and grows without notice.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;

/// Feed-wide metadata block
#[derive(Debug, Clone, Deserialize)]
pub struct FeedGeneral {
    pub update_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub connected_clients: u32,
    #[serde(default)]
    pub unique_users: u32,
}

/// A pilot's filed flight plan as it appears on the wire
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedFlightPlan {
    #[serde(default)]
    pub flight_rules: String,
    #[serde(default)]
    pub aircraft_short: String,
    #[serde(default)]
    pub departure: String,
    #[serde(default)]
    pub arrival: String,
    #[serde(default)]
    pub alternate: String,
    #[serde(default)]
    pub cruise_tas: String,
    #[serde(default)]
    pub altitude: String,
    /// Filed departure time, "HHMM" UTC
    #[serde(default)]
    pub deptime: String,
    /// Planned enroute duration, "HHMM"
    #[serde(default)]
    pub enroute_time: String,
    #[serde(default)]
    pub route: String,
    #[serde(default)]
    pub remarks: String,
}

/// One connected pilot in the snapshot
#[derive(Debug, Clone, Deserialize)]
pub struct FeedPilot {
    pub cid: u32,
    pub callsign: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub pilot_rating: i32,
    #[serde(default)]
    pub military_rating: i32,
    pub latitude: f64,
    pub longitude: f64,
    /// Pressure altitude above mean sea level, feet
    #[serde(default)]
    pub altitude: i32,
    /// Height above ground as reported by the client, feet. Not all
    /// clients send it; fusion falls back to the MSL value.
    #[serde(default)]
    pub altitude_agl: Option<i32>,
    #[serde(default)]
    pub groundspeed: i32,
    #[serde(default)]
    pub transponder: String,
    #[serde(default)]
    pub heading: i32,
    #[serde(default)]
    pub frequency: String,
    #[serde(default)]
    pub qnh_i_hg: f64,
    pub flight_plan: Option<FeedFlightPlan>,
    pub logon_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// One controller or ATIS session in the snapshot
#[derive(Debug, Clone, Deserialize)]
pub struct FeedController {
    pub cid: u32,
    pub callsign: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub frequency: String,
    /// Raw facility code: 0 observer, 1 FSS, 2 delivery, 3 ground,
    /// 4 tower, 5 approach/TRACON, 6 center/FIR
    #[serde(default)]
    pub facility: i32,
    #[serde(default)]
    pub rating: i32,
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub text_atis: Option<Vec<String>>,
    #[serde(default)]
    pub atis_code: Option<String>,
    pub logon_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Full snapshot document
#[derive(Debug, Clone, Deserialize)]
pub struct FeedSnapshot {
    pub general: FeedGeneral,
    #[serde(default)]
    pub pilots: Vec<FeedPilot>,
    #[serde(default)]
    pub controllers: Vec<FeedController>,
    #[serde(default)]
    pub atis: Vec<FeedController>,
}

/// A single radio transmitter position reported for a callsign
#[derive(Debug, Clone, Deserialize)]
pub struct Transceiver {
    #[serde(rename = "frequency")]
    pub frequency_hz: u64,
    #[serde(rename = "latDeg")]
    pub latitude: f64,
    #[serde(rename = "lonDeg")]
    pub longitude: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransceiverEntry {
    pub callsign: String,
    #[serde(default)]
    pub transceivers: Vec<Transceiver>,
}

/// Transceiver positions keyed by session callsign
pub type TransceiverMap = HashMap<String, Vec<Transceiver>>;

/// Source of feed snapshots, one per cycle
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_snapshot(&self) -> Result<FeedSnapshot>;
    async fn fetch_transceivers(&self) -> Result<TransceiverMap>;
}

/// Production feed source pulling JSON over HTTP
pub struct HttpFeedSource {
    client: reqwest::Client,
    feed_url: String,
    transceivers_url: String,
}

impl HttpFeedSource {
    pub fn new(client: reqwest::Client, feed_url: String, transceivers_url: String) -> Self {
        Self {
            client,
            feed_url,
            transceivers_url,
        }
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch_snapshot(&self) -> Result<FeedSnapshot> {
        let response = self
            .client
            .get(&self.feed_url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch feed snapshot from {}", self.feed_url))?
            .error_for_status()
            .context("Feed endpoint returned an error status")?;

        let snapshot: FeedSnapshot = response
            .json()
            .await
            .context("Failed to decode feed snapshot JSON")?;

        metrics::counter!("stratus.feed.snapshots_fetched").increment(1);
        metrics::gauge!("stratus.feed.pilots").set(snapshot.pilots.len() as f64);
        metrics::gauge!("stratus.feed.controllers").set(snapshot.controllers.len() as f64);

        Ok(snapshot)
    }

    async fn fetch_transceivers(&self) -> Result<TransceiverMap> {
        let response = self
            .client
            .get(&self.transceivers_url)
            .send()
            .await
            .with_context(|| {
                format!("Failed to fetch transceivers from {}", self.transceivers_url)
            })?
            .error_for_status()
            .context("Transceiver endpoint returned an error status")?;

        let entries: Vec<TransceiverEntry> = response
            .json()
            .await
            .context("Failed to decode transceiver JSON")?;

        let mut map = TransceiverMap::with_capacity(entries.len());
        for entry in entries {
            map.insert(entry.callsign, entry.transceivers);
        }
        Ok(map)
    }
}

/// In-memory feed source for tests: returns pre-built snapshots in order,
/// repeating the last one once the script runs out.
pub struct StaticFeedSource {
    snapshots: std::sync::Mutex<Vec<FeedSnapshot>>,
    transceivers: TransceiverMap,
}

impl StaticFeedSource {
    pub fn new(mut snapshots: Vec<FeedSnapshot>, transceivers: TransceiverMap) -> Self {
        // Stored in reverse so fetch can pop from the back
        snapshots.reverse();
        Self {
            snapshots: std::sync::Mutex::new(snapshots),
            transceivers,
        }
    }
}

#[async_trait]
impl FeedSource for StaticFeedSource {
    async fn fetch_snapshot(&self) -> Result<FeedSnapshot> {
        let mut snapshots = self.snapshots.lock().unwrap();
        match snapshots.len() {
            0 => anyhow::bail!("static feed source has no snapshots"),
            1 => Ok(snapshots[0].clone()),
            _ => Ok(snapshots.pop().unwrap()),
        }
    }

    async fn fetch_transceivers(&self) -> Result<TransceiverMap> {
        Ok(self.transceivers.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_parsing() {
        let json = r#"{
            "general": {"update_timestamp": "2025-06-01T12:00:00Z", "connected_clients": 2},
            "pilots": [{
                "cid": 1000001, "callsign": "DLH123", "name": "Some Pilot",
                "server": "GERMANY", "pilot_rating": 1, "military_rating": 0,
                "latitude": 50.03, "longitude": 8.57, "altitude": 350,
                "groundspeed": 0, "transponder": "2000", "heading": 250,
                "qnh_i_hg": 29.92,
                "flight_plan": {
                    "flight_rules": "I", "aircraft_short": "A20N",
                    "departure": "EDDF", "arrival": "EDDM", "alternate": "EDDN",
                    "cruise_tas": "450", "altitude": "36000",
                    "deptime": "1230", "enroute_time": "0100",
                    "route": "ANEKI Y101 OSBIT", "remarks": "REG/DAINA"
                },
                "logon_time": "2025-06-01T11:45:00Z",
                "last_updated": "2025-06-01T11:59:55Z"
            }],
            "controllers": [{
                "cid": 1000002, "callsign": "EDDF_TWR", "name": "Some Controller",
                "frequency": "119.900", "facility": 4, "rating": 5,
                "server": "GERMANY", "text_atis": ["Frankfurt Tower"],
                "logon_time": "2025-06-01T11:00:00Z",
                "last_updated": "2025-06-01T11:59:58Z"
            }],
            "atis": []
        }"#;

        let snapshot: FeedSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.pilots.len(), 1);
        assert_eq!(snapshot.controllers.len(), 1);

        let pilot = &snapshot.pilots[0];
        assert_eq!(pilot.callsign, "DLH123");
        assert_eq!(pilot.altitude_agl, None);
        assert_eq!(pilot.flight_plan.as_ref().unwrap().departure, "EDDF");

        let controller = &snapshot.controllers[0];
        assert_eq!(controller.facility, 4);
        assert_eq!(
            controller.text_atis.as_deref().unwrap(),
            &["Frankfurt Tower".to_string()]
        );
    }

    #[test]
    fn test_snapshot_parsing_ignores_unknown_fields() {
        let json = r#"{
            "general": {"update_timestamp": "2025-06-01T12:00:00Z", "something_new": 42},
            "pilots": [], "controllers": [], "atis": [],
            "servers": [{"ident": "GERMANY"}]
        }"#;
        let snapshot: FeedSnapshot = serde_json::from_str(json).unwrap();
        assert!(snapshot.pilots.is_empty());
    }

    #[test]
    fn test_transceiver_parsing() {
        let json = r#"[
            {"callsign": "EDDF_TWR", "transceivers": [
                {"id": 0, "frequency": 119900000, "latDeg": 50.03, "lonDeg": 8.57,
                 "heightMslM": 150.0, "heightAglM": 30.0}
            ]},
            {"callsign": "EDGG_CTR", "transceivers": []}
        ]"#;
        let entries: Vec<TransceiverEntry> = serde_json::from_str(json).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].transceivers[0].frequency_hz, 119_900_000);
        assert!((entries[0].transceivers[0].latitude - 50.03).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_static_feed_source_repeats_last_snapshot() {
        let make = |ts: &str| FeedSnapshot {
            general: FeedGeneral {
                update_timestamp: ts.parse().unwrap(),
                connected_clients: 0,
                unique_users: 0,
            },
            pilots: vec![],
            controllers: vec![],
            atis: vec![],
        };
        let source = StaticFeedSource::new(
            vec![make("2025-06-01T12:00:00Z"), make("2025-06-01T12:00:15Z")],
            TransceiverMap::new(),
        );

        let first = source.fetch_snapshot().await.unwrap();
        let second = source.fetch_snapshot().await.unwrap();
        let third = source.fetch_snapshot().await.unwrap();
        assert!(first.general.update_timestamp < second.general.update_timestamp);
        assert_eq!(
            second.general.update_timestamp,
            third.general.update_timestamp
        );
    }
}
