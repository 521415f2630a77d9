//! Pilot long records
//!
//! The fully-populated per-connection pilot entity held in the fusion cache.
//! Identity is `cid + callsign + logon_time`: the same person reconnecting
//! under the same callsign is a new entity. Merging a feed refresh over a
//! cached record is an explicit field-by-field operation so the preserved
//! vs overwritten set is part of the type contract, not spread semantics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::delta::Snapshot;
use crate::feed::{FeedFlightPlan, FeedPilot};
use crate::phase::{self, RouteGeo, Sample, TimesBlock};

/// Aircraft type used when the feed value is absent or unrecognized
pub const DEFAULT_AIRCRAFT: &str = "A320";

/// Short pilot-rating code for a raw feed rating value
fn pilot_rating_code(rating: i32) -> &'static str {
    match rating {
        1 => "PPL",
        3 => "IR",
        7 => "CMEL",
        15 => "ATPL",
        31 => "FI",
        63 => "FE",
        // 0 and anything unrecognized
        _ => "NEW",
    }
}

/// Short military-rating code for a raw feed rating value
fn military_rating_code(rating: i32) -> &'static str {
    match rating {
        1 => "M1",
        3 => "M2",
        7 => "M3",
        15 => "M4",
        _ => "M0",
    }
}

/// Filed flight plan with lazily-resolved airport coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightPlan {
    pub flight_rules: String,
    pub aircraft: String,
    /// Registration normalized via the fleet registry, from remarks
    pub registration: Option<String>,
    pub departure: String,
    pub arrival: String,
    pub alternate: String,
    /// Resolved by the batched catalog lookup; absent until then
    pub departure_coords: Option<(f64, f64)>,
    pub arrival_coords: Option<(f64, f64)>,
    pub alternate_coords: Option<(f64, f64)>,
    pub cruise_tas: String,
    pub filed_altitude: String,
    pub deptime: String,
    pub enroute_time: String,
    pub route: String,
    pub remarks: String,
}

impl FlightPlan {
    pub fn from_feed(plan: &FeedFlightPlan) -> Self {
        let aircraft = if plan.aircraft_short.trim().is_empty() {
            DEFAULT_AIRCRAFT.to_string()
        } else {
            plan.aircraft_short.trim().to_uppercase()
        };

        Self {
            flight_rules: plan.flight_rules.clone(),
            aircraft,
            registration: None,
            departure: plan.departure.trim().to_uppercase(),
            arrival: plan.arrival.trim().to_uppercase(),
            alternate: plan.alternate.trim().to_uppercase(),
            departure_coords: None,
            arrival_coords: None,
            alternate_coords: None,
            cruise_tas: plan.cruise_tas.clone(),
            filed_altitude: plan.altitude.clone(),
            deptime: plan.deptime.clone(),
            enroute_time: plan.enroute_time.clone(),
            route: plan.route.clone(),
            remarks: plan.remarks.clone(),
        }
    }

    /// Route key for traffic statistics, e.g. `"EDDF-EDDM"`
    pub fn route_key(&self) -> Option<String> {
        if self.departure.is_empty() || self.arrival.is_empty() {
            return None;
        }
        Some(format!("{}-{}", self.departure, self.arrival))
    }
}

/// One pilot connection, fully populated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PilotRecord {
    /// Canonical identity `"{cid}:{callsign}:{logon unix seconds}"`
    pub id: String,
    pub cid: u32,
    pub callsign: String,
    pub name: String,
    pub server: String,
    pub pilot_rating: String,
    pub military_rating: String,

    pub latitude: f64,
    pub longitude: f64,
    pub altitude_msl_ft: i32,
    pub altitude_agl_ft: i32,
    pub groundspeed_kt: i32,
    /// Derived from consecutive altitude samples, never feed-provided
    pub vertical_speed_fpm: i32,
    pub heading_deg: i32,
    pub transponder: String,
    pub frequency: String,
    pub qnh_in_hg: f64,

    pub logon_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,

    pub flight_plan: Option<FlightPlan>,
    pub times: Option<TimesBlock>,
}

/// Canonical identity string for a feed pilot
pub fn pilot_identity(cid: u32, callsign: &str, logon_time: DateTime<Utc>) -> String {
    format!("{}:{}:{}", cid, callsign, logon_time.timestamp())
}

impl PilotRecord {
    /// Construct a fresh record for an identity first seen this cycle.
    /// The times block is created later, once coordinates have had their
    /// chance to resolve.
    pub fn from_feed(pilot: &FeedPilot) -> Self {
        Self {
            id: pilot_identity(pilot.cid, &pilot.callsign, pilot.logon_time),
            cid: pilot.cid,
            callsign: pilot.callsign.clone(),
            name: pilot.name.clone(),
            server: pilot.server.clone(),
            pilot_rating: pilot_rating_code(pilot.pilot_rating).to_string(),
            military_rating: military_rating_code(pilot.military_rating).to_string(),
            latitude: pilot.latitude,
            longitude: pilot.longitude,
            altitude_msl_ft: pilot.altitude,
            altitude_agl_ft: pilot.altitude_agl.unwrap_or(pilot.altitude),
            groundspeed_kt: pilot.groundspeed,
            vertical_speed_fpm: 0,
            heading_deg: pilot.heading,
            transponder: pilot.transponder.clone(),
            frequency: pilot.frequency.clone(),
            qnh_in_hg: pilot.qnh_i_hg,
            logon_time: pilot.logon_time,
            last_updated: pilot.last_updated,
            flight_plan: pilot.flight_plan.as_ref().map(FlightPlan::from_feed),
            times: None,
        }
    }

    /// Refresh a cached record from a feed entry of the same identity.
    ///
    /// Overwrites: position, altitudes, groundspeed, heading, transponder,
    /// frequency, QNH, server, last_updated. Recomputes: vertical speed
    /// (from the previous altitude/timestamp pair). Preserves: name,
    /// ratings, flight plan (with its resolved coordinates and normalized
    /// registration) and the times block — the caller re-evaluates times
    /// afterwards. A plan filed after connect is adopted.
    pub fn merge_feed(&mut self, pilot: &FeedPilot) {
        debug_assert_eq!(self.id, pilot_identity(pilot.cid, &pilot.callsign, pilot.logon_time));

        self.vertical_speed_fpm = phase::compute_vertical_speed(
            self.altitude_msl_ft,
            pilot.altitude,
            self.last_updated,
            pilot.last_updated,
        );

        self.latitude = pilot.latitude;
        self.longitude = pilot.longitude;
        self.altitude_msl_ft = pilot.altitude;
        self.altitude_agl_ft = pilot.altitude_agl.unwrap_or(pilot.altitude);
        self.groundspeed_kt = pilot.groundspeed;
        self.heading_deg = pilot.heading;
        self.transponder = pilot.transponder.clone();
        self.frequency = pilot.frequency.clone();
        self.qnh_in_hg = pilot.qnh_i_hg;
        self.server = pilot.server.clone();
        self.last_updated = pilot.last_updated;

        if self.flight_plan.is_none() {
            self.flight_plan = pilot.flight_plan.as_ref().map(FlightPlan::from_feed);
        }
    }

    /// Kinematic slice for the phase engine
    pub fn sample(&self) -> Sample {
        Sample {
            latitude: self.latitude,
            longitude: self.longitude,
            altitude_agl_ft: self.altitude_agl_ft,
            groundspeed_kt: self.groundspeed_kt,
            vertical_speed_fpm: self.vertical_speed_fpm,
        }
    }

    /// Resolved route geometry, when the catalog lookup has delivered
    pub fn route_geo(&self) -> RouteGeo {
        match &self.flight_plan {
            Some(plan) => RouteGeo {
                departure: plan.departure_coords,
                arrival: plan.arrival_coords,
            },
            None => RouteGeo::default(),
        }
    }

    /// Current phase, when a times block exists
    pub fn phase(&self) -> Option<crate::phase::FlightPhase> {
        self.times.as_ref().map(|t| t.phase)
    }
}

/// Shallow pilot patch; only changed fields are present
#[derive(Debug, Clone, Default, Serialize)]
pub struct PilotPatch {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pilot_rating: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub military_rating: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude_msl_ft: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude_agl_ft: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groundspeed_kt: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertical_speed_fpm: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading_deg: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transponder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qnh_in_hg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flight_plan: Option<FlightPlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub times: Option<TimesBlock>,
}

macro_rules! diff_field {
    ($patch:ident, $changed:ident, $new:ident, $prev:ident, $field:ident) => {
        if $new.$field != $prev.$field {
            $patch.$field = Some($new.$field.clone());
            $changed = true;
        }
    };
}

impl Snapshot for PilotRecord {
    type Patch = PilotPatch;

    fn key(&self) -> &str {
        &self.id
    }

    fn diff(&self, previous: &Self) -> Option<PilotPatch> {
        let mut patch = PilotPatch {
            id: self.id.clone(),
            ..Default::default()
        };
        let mut changed = false;

        diff_field!(patch, changed, self, previous, name);
        diff_field!(patch, changed, self, previous, server);
        diff_field!(patch, changed, self, previous, pilot_rating);
        diff_field!(patch, changed, self, previous, military_rating);
        diff_field!(patch, changed, self, previous, latitude);
        diff_field!(patch, changed, self, previous, longitude);
        diff_field!(patch, changed, self, previous, altitude_msl_ft);
        diff_field!(patch, changed, self, previous, altitude_agl_ft);
        diff_field!(patch, changed, self, previous, groundspeed_kt);
        diff_field!(patch, changed, self, previous, vertical_speed_fpm);
        diff_field!(patch, changed, self, previous, heading_deg);
        diff_field!(patch, changed, self, previous, transponder);
        diff_field!(patch, changed, self, previous, frequency);
        diff_field!(patch, changed, self, previous, qnh_in_hg);
        diff_field!(patch, changed, self, previous, last_updated);

        // Nested blocks are compared deeply and patched whole
        if self.flight_plan != previous.flight_plan {
            patch.flight_plan = self.flight_plan.clone();
            changed = true;
        }
        if self.times != previous.times {
            patch.times = self.times.clone();
            changed = true;
        }

        changed.then_some(patch)
    }
}
