//! Airport traffic aggregation
//!
//! One record per airport touched as a departure or arrival by the fused
//! pilot set, rebuilt from scratch every cycle. Carries movement counts,
//! delay statistics, route statistics and whatever weather text is
//! currently cached for the field.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::delta::Snapshot;
use crate::pilot::PilotRecord;
use crate::weather::WeatherSnapshot;

/// Delays are clamped to this many minutes; beyond that the schedule is
/// fiction, not signal.
const DELAY_CLAMP_MIN: i64 = 120;

/// Movement statistics for one direction (departures or arrivals)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrafficBlock {
    pub count: u32,
    pub delayed: u32,
    /// Rolling average over the delayed movements, minutes
    pub avg_delay_min: f64,
    pub busiest_route: Option<String>,
    pub unique_routes: u32,
}

impl TrafficBlock {
    /// Fold one movement in. Zero delay means "not delayed (yet)" and
    /// leaves the average untouched.
    fn add_movement(&mut self, delay_min: i64) {
        self.count += 1;
        if delay_min > 0 {
            self.delayed += 1;
            let n = f64::from(self.delayed);
            self.avg_delay_min = (self.avg_delay_min * (n - 1.0) + delay_min as f64) / n;
        }
    }
}

/// One airport's cycle aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirportRecord {
    pub icao: String,
    pub departures: TrafficBlock,
    pub arrivals: TrafficBlock,
    pub report: Option<String>,
    pub forecast: Option<String>,
}

/// Shallow airport patch
#[derive(Debug, Clone, Default, Serialize)]
pub struct AirportPatch {
    pub icao: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub departures: Option<TrafficBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arrivals: Option<TrafficBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forecast: Option<Option<String>>,
}

impl AirportRecord {
    fn new(icao: &str) -> Self {
        Self {
            icao: icao.to_string(),
            departures: TrafficBlock::default(),
            arrivals: TrafficBlock::default(),
            report: None,
            forecast: None,
        }
    }
}

impl Snapshot for AirportRecord {
    type Patch = AirportPatch;

    fn key(&self) -> &str {
        &self.icao
    }

    fn diff(&self, previous: &Self) -> Option<AirportPatch> {
        let mut patch = AirportPatch {
            icao: self.icao.clone(),
            ..Default::default()
        };
        let mut changed = false;

        if self.departures != previous.departures {
            patch.departures = Some(self.departures.clone());
            changed = true;
        }
        if self.arrivals != previous.arrivals {
            patch.arrivals = Some(self.arrivals.clone());
            changed = true;
        }
        if self.report != previous.report {
            patch.report = Some(self.report.clone());
            changed = true;
        }
        if self.forecast != previous.forecast {
            patch.forecast = Some(self.forecast.clone());
            changed = true;
        }

        changed.then_some(patch)
    }
}

/// Departure delay in minutes: actual vs scheduled off-block, clamped.
/// Zero until the aircraft has actually gone off blocks.
fn departure_delay_min(pilot: &PilotRecord) -> i64 {
    let Some(times) = &pilot.times else { return 0 };
    if !times.off_block_actual {
        return 0;
    }
    match (times.off_block, times.sched_off_block) {
        (Some(actual), Some(sched)) => (actual - sched).num_minutes().clamp(0, DELAY_CLAMP_MIN),
        _ => 0,
    }
}

/// Arrival delay in minutes: actual vs scheduled on-block, clamped
fn arrival_delay_min(pilot: &PilotRecord) -> i64 {
    let Some(times) = &pilot.times else { return 0 };
    if !times.on_block_actual {
        return 0;
    }
    match (times.on_block, times.sched_on_block) {
        (Some(actual), Some(sched)) => (actual - sched).num_minutes().clamp(0, DELAY_CLAMP_MIN),
        _ => 0,
    }
}

/// Build the cycle's airport collection from the fused pilot set
pub fn aggregate_airports(
    pilots: &HashMap<String, PilotRecord>,
    weather: &WeatherSnapshot,
) -> HashMap<String, AirportRecord> {
    let mut records: HashMap<String, AirportRecord> = HashMap::new();
    // (icao, is_departure) → route → movements
    let mut routes: HashMap<(String, bool), HashMap<String, u32>> = HashMap::new();

    for pilot in pilots.values() {
        let Some(plan) = &pilot.flight_plan else { continue };
        let route_key = plan.route_key();

        if !plan.departure.is_empty() {
            records
                .entry(plan.departure.clone())
                .or_insert_with(|| AirportRecord::new(&plan.departure))
                .departures
                .add_movement(departure_delay_min(pilot));
            if let Some(route) = &route_key {
                *routes
                    .entry((plan.departure.clone(), true))
                    .or_default()
                    .entry(route.clone())
                    .or_insert(0) += 1;
            }
        }

        if !plan.arrival.is_empty() {
            records
                .entry(plan.arrival.clone())
                .or_insert_with(|| AirportRecord::new(&plan.arrival))
                .arrivals
                .add_movement(arrival_delay_min(pilot));
            if let Some(route) = &route_key {
                *routes
                    .entry((plan.arrival.clone(), false))
                    .or_default()
                    .entry(route.clone())
                    .or_insert(0) += 1;
            }
        }
    }

    for ((icao, is_departure), route_counts) in routes {
        let Some(record) = records.get_mut(&icao) else { continue };
        let block = if is_departure {
            &mut record.departures
        } else {
            &mut record.arrivals
        };
        block.unique_routes = route_counts.len() as u32;
        // Max by count; route string breaks ties so the winner is stable
        block.busiest_route = route_counts
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
            .map(|(route, _)| route);
    }

    for record in records.values_mut() {
        record.report = weather.report_for(&record.icao).map(str::to_string);
        record.forecast = weather.forecast_for(&record.icao).map(str::to_string);
    }

    metrics::gauge!("stratus.airports.active").set(records.len() as f64);
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FeedFlightPlan, FeedPilot};
    use crate::phase::{FlightPhase, TimesBlock};
    use chrono::{Duration, TimeZone, Utc};

    fn pilot(cid: u32, dep: &str, arr: &str) -> PilotRecord {
        PilotRecord::from_feed(&FeedPilot {
            cid,
            callsign: format!("TST{}", cid),
            name: String::new(),
            server: String::new(),
            pilot_rating: 0,
            military_rating: 0,
            latitude: 50.0,
            longitude: 8.5,
            altitude: 350,
            altitude_agl: Some(0),
            groundspeed: 0,
            transponder: "2000".to_string(),
            heading: 0,
            frequency: String::new(),
            qnh_i_hg: 29.92,
            flight_plan: Some(FeedFlightPlan {
                departure: dep.to_string(),
                arrival: arr.to_string(),
                ..Default::default()
            }),
            logon_time: Utc.with_ymd_and_hms(2025, 6, 1, 11, 45, 0).unwrap(),
            last_updated: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        })
    }

    fn with_departure_delay(mut pilot: PilotRecord, delay_min: i64) -> PilotRecord {
        let sched = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        pilot.times = Some(TimesBlock {
            sched_off_block: Some(sched),
            sched_on_block: None,
            off_block: Some(sched + Duration::minutes(delay_min)),
            lift_off: None,
            touch_down: None,
            on_block: None,
            off_block_actual: true,
            on_block_actual: false,
            phase: FlightPhase::TaxiOut,
            stop_counter: 0,
        });
        pilot
    }

    fn as_map(pilots: Vec<PilotRecord>) -> HashMap<String, PilotRecord> {
        pilots.into_iter().map(|p| (p.id.clone(), p)).collect()
    }

    #[test]
    fn test_counts_per_direction() {
        let pilots = as_map(vec![
            pilot(1, "EDDF", "EDDM"),
            pilot(2, "EDDF", "EDDM"),
            pilot(3, "EDDM", "EDDF"),
        ]);
        let records = aggregate_airports(&pilots, &WeatherSnapshot::default());

        assert_eq!(records["EDDF"].departures.count, 2);
        assert_eq!(records["EDDF"].arrivals.count, 1);
        assert_eq!(records["EDDM"].departures.count, 1);
        assert_eq!(records["EDDM"].arrivals.count, 2);
    }

    #[test]
    fn test_delay_clamped_and_averaged() {
        let pilots = as_map(vec![
            with_departure_delay(pilot(1, "EDDF", "EDDM"), 30),
            with_departure_delay(pilot(2, "EDDF", "EDDM"), 500), // clamps to 120
            pilot(3, "EDDF", "EDDM"),                            // no actual off-block: delay 0
        ]);
        let records = aggregate_airports(&pilots, &WeatherSnapshot::default());

        let departures = &records["EDDF"].departures;
        assert_eq!(departures.count, 3);
        assert_eq!(departures.delayed, 2);
        assert!((departures.avg_delay_min - 75.0).abs() < 1e-9); // (30 + 120) / 2
    }

    #[test]
    fn test_delay_never_negative() {
        // Departed ahead of schedule: clamp floor is zero, not counted
        let pilots = as_map(vec![with_departure_delay(pilot(1, "EDDF", "EDDM"), -10)]);
        let records = aggregate_airports(&pilots, &WeatherSnapshot::default());
        assert_eq!(records["EDDF"].departures.delayed, 0);
        assert_eq!(records["EDDF"].departures.avg_delay_min, 0.0);
    }

    #[test]
    fn test_busiest_and_unique_routes() {
        let pilots = as_map(vec![
            pilot(1, "EDDF", "EDDM"),
            pilot(2, "EDDF", "EDDM"),
            pilot(3, "EDDF", "EDDH"),
        ]);
        let records = aggregate_airports(&pilots, &WeatherSnapshot::default());

        let departures = &records["EDDF"].departures;
        assert_eq!(departures.unique_routes, 2);
        assert_eq!(departures.busiest_route.as_deref(), Some("EDDF-EDDM"));
    }

    #[test]
    fn test_weather_attached_and_miss_is_none() {
        let mut weather = WeatherSnapshot::default();
        weather
            .reports
            .insert("EDDF".to_string(), "EDDF 011250Z 25008KT".to_string());

        let pilots = as_map(vec![pilot(1, "EDDF", "EDDM")]);
        let records = aggregate_airports(&pilots, &weather);

        assert_eq!(
            records["EDDF"].report.as_deref(),
            Some("EDDF 011250Z 25008KT")
        );
        assert_eq!(records["EDDF"].forecast, None);
        assert_eq!(records["EDDM"].report, None);
    }

    #[test]
    fn test_pilot_without_plan_is_ignored() {
        let mut lone = pilot(1, "EDDF", "EDDM");
        lone.flight_plan = None;
        let records = aggregate_airports(&as_map(vec![lone]), &WeatherSnapshot::default());
        assert!(records.is_empty());
    }

    #[test]
    fn test_airport_diff_scenario() {
        // Previous cycle: EDDF with 10 departures. Current: EDDF grew,
        // EDDH appeared.
        let previous_record = AirportRecord {
            icao: "EDDF".to_string(),
            departures: TrafficBlock {
                count: 10,
                ..Default::default()
            },
            arrivals: TrafficBlock::default(),
            report: None,
            forecast: None,
        };
        let mut current_record = previous_record.clone();
        current_record.departures.count = 12;

        let previous: HashMap<_, _> =
            vec![("EDDF".to_string(), previous_record)].into_iter().collect();
        let current: HashMap<_, _> = vec![
            ("EDDF".to_string(), current_record),
            (
                "EDDH".to_string(),
                AirportRecord {
                    icao: "EDDH".to_string(),
                    departures: TrafficBlock {
                        count: 3,
                        ..Default::default()
                    },
                    arrivals: TrafficBlock::default(),
                    report: None,
                    forecast: None,
                },
            ),
        ]
        .into_iter()
        .collect();

        let delta = crate::delta::compute_delta(&previous, &current);
        assert_eq!(delta.added.len(), 1);
        assert_eq!(delta.added[0].icao, "EDDH");
        assert_eq!(delta.deleted.len(), 0);
        assert_eq!(delta.updated.len(), 1);
        let patch = &delta.updated[0];
        assert_eq!(patch.icao, "EDDF");
        assert_eq!(patch.departures.as_ref().unwrap().count, 12);
        assert!(patch.arrivals.is_none());
    }
}
