//! Flight-phase state machine
//!
//! Maps raw pilot kinematics to a flight phase and a set of block/flight
//! time estimates, one evaluation per cycle. Phases only ever move forward:
//! `Boarding → TaxiOut → Climb → Cruise → Descent → TaxiIn → OnBlock`,
//! with at most one transition per cycle. A pilot first seen mid-flight gets
//! its phase estimated from kinematics and position relative to the filed
//! departure/arrival airports.

use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::geo::haversine_nm;

/// Vertical speed above which a brand-new pilot is estimated to be climbing.
/// Intentionally not the same number as [`CLIMB_TRIGGER_FPM`]; the looser
/// in-flight trigger debounces noisy climb-out data.
const CLIMB_ESTIMATE_FPM: i32 = 500;
/// Vertical speed that promotes a taxiing aircraft to Climb.
const CLIMB_TRIGGER_FPM: i32 = 100;
/// Band treated as level flight by the initial estimator.
const LEVEL_BAND_FPM: i32 = 100;
/// Vertical speed below which Climb settles into Cruise.
const CRUISE_SETTLE_FPM: i32 = 500;
/// Vertical speed that tips Cruise into Descent.
const DESCENT_TRIGGER_FPM: i32 = -500;
/// Vertical speed above which a low Descent counts as landed.
const LEVEL_OFF_FPM: i32 = -100;
/// Height above ground below which a levelled-off descent is a rollout.
const ROLLOUT_AGL_FT: i32 = 200;
/// Consecutive stationary cycles before Taxi In becomes On Block.
const STOP_CYCLES_ON_BLOCK: u8 = 5;
/// Minutes added per cycle while a boarding aircraft sits past schedule.
const BOARDING_PUSH_MIN: i64 = 5;
/// Flat taxi allowance folded into on-block estimates.
const TAXI_MIN: i64 = 5;
/// Great-circle routes are inflated by 10% for non-direct routing.
const ROUTE_INFLATION: f64 = 1.1;
/// Deceleration heuristic: one knot per second down to this floor.
const DECEL_FLOOR_KT: i32 = 100;
/// Descent heuristic: feet per second the aircraft can shed.
const DESCENT_RATE_FT_S: f64 = 25.0;

/// Phases in strict forward order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlightPhase {
    Boarding,
    TaxiOut,
    Climb,
    Cruise,
    Descent,
    TaxiIn,
    OnBlock,
}

/// The kinematic slice of a pilot record the engine looks at
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_agl_ft: i32,
    pub groundspeed_kt: i32,
    pub vertical_speed_fpm: i32,
}

/// Resolved departure/arrival coordinates, when known
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteGeo {
    pub departure: Option<(f64, f64)>,
    pub arrival: Option<(f64, f64)>,
}

/// Block and flight time state for one pilot
///
/// `sched_*` fields are derived once from the filed departure time and
/// planned enroute duration and never change afterwards. The remaining
/// times are estimates until the matching `*_actual` flag flips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimesBlock {
    pub sched_off_block: Option<DateTime<Utc>>,
    pub sched_on_block: Option<DateTime<Utc>>,
    pub off_block: Option<DateTime<Utc>>,
    pub lift_off: Option<DateTime<Utc>>,
    pub touch_down: Option<DateTime<Utc>>,
    pub on_block: Option<DateTime<Utc>>,
    pub off_block_actual: bool,
    pub on_block_actual: bool,
    pub phase: FlightPhase,
    #[serde(default)]
    pub stop_counter: u8,
}

/// Round to the nearest 5-minute boundary
fn round_to_five_minutes(t: DateTime<Utc>) -> DateTime<Utc> {
    let minute = t.minute() as i64;
    let second = t.second() as i64;
    let total = minute * 60 + second;
    let rounded = ((total as f64 / 300.0).round() as i64) * 300;
    t - Duration::seconds(total - rounded)
}

/// Parse an "HHMM" string into minutes past midnight
fn parse_hhmm(s: &str) -> Option<u32> {
    if s.len() != 4 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: u32 = s[..2].parse().ok()?;
    let minutes: u32 = s[2..].parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    Some(hours * 60 + minutes)
}

/// Scheduled off/on-block pair from a filed departure time and enroute
/// duration, anchored to the date of `now` and rounded to 5 minutes.
pub fn schedule_blocks(
    deptime: &str,
    enroute: &str,
    now: DateTime<Utc>,
) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let dep_minutes = match parse_hhmm(deptime) {
        Some(m) => m,
        None => return (None, None),
    };
    let midnight = now.date_naive().and_time(NaiveTime::MIN).and_utc();
    let off = round_to_five_minutes(midnight + Duration::minutes(dep_minutes as i64));
    let on = parse_hhmm(enroute)
        .map(|enroute_min| round_to_five_minutes(off + Duration::minutes(enroute_min as i64)));
    (Some(off), on)
}

/// Planned enroute duration in minutes, if filed
pub fn enroute_minutes(enroute: &str) -> Option<i64> {
    parse_hhmm(enroute).map(|m| m as i64)
}

/// Estimate a phase for a pilot with no cached record
pub fn initial_phase(sample: &Sample, route: &RouteGeo) -> FlightPhase {
    let (dep, arr) = match (route.departure, route.arrival) {
        (Some(dep), Some(arr)) => (dep, arr),
        // No geometry to reason about: assume enroute
        _ => return FlightPhase::Cruise,
    };

    let to_dep = haversine_nm(sample.latitude, sample.longitude, dep.0, dep.1);
    let to_arr = haversine_nm(sample.latitude, sample.longitude, arr.0, arr.1);
    let closer_to_departure = to_dep <= to_arr;
    let on_ground = sample.altitude_agl_ft < ROLLOUT_AGL_FT;

    if on_ground && sample.groundspeed_kt == 0 && closer_to_departure {
        FlightPhase::Boarding
    } else if on_ground && sample.groundspeed_kt > 0 {
        if closer_to_departure {
            FlightPhase::TaxiOut
        } else {
            FlightPhase::TaxiIn
        }
    } else if sample.vertical_speed_fpm > CLIMB_ESTIMATE_FPM {
        FlightPhase::Climb
    } else if sample.vertical_speed_fpm < DESCENT_TRIGGER_FPM {
        FlightPhase::Descent
    } else if sample.vertical_speed_fpm.abs() < LEVEL_BAND_FPM {
        FlightPhase::Cruise
    } else {
        // Leftover band (gentle climb or descent): also treated as enroute
        FlightPhase::Cruise
    }
}

/// Estimated touchdown time
///
/// Two competing estimates; the larger remaining time wins:
/// 1. remaining great-circle distance (total inflated 10%) over groundspeed
/// 2. max of a 1 kt/s deceleration to 100 kt and an AGL / 25 ft/s descent
pub fn estimate_touch_down(
    now: DateTime<Utc>,
    sample: &Sample,
    route: &RouteGeo,
) -> Option<DateTime<Utc>> {
    let dep = route.departure?;
    let arr = route.arrival?;

    let total_nm = haversine_nm(dep.0, dep.1, arr.0, arr.1) * ROUTE_INFLATION;
    let flown_nm = haversine_nm(dep.0, dep.1, sample.latitude, sample.longitude);
    let remaining_nm = (total_nm - flown_nm).max(0.0);
    let groundspeed = f64::from(sample.groundspeed_kt.max(1));
    let great_circle_secs = remaining_nm / groundspeed * 3600.0;

    let decel_secs = f64::from((sample.groundspeed_kt - DECEL_FLOOR_KT).max(0));
    let descent_secs = f64::from(sample.altitude_agl_ft.max(0)) / DESCENT_RATE_FT_S;
    let energy_secs = decel_secs.max(descent_secs);

    let remaining_secs = great_circle_secs.max(energy_secs);
    Some(now + Duration::seconds(remaining_secs.round() as i64))
}

impl TimesBlock {
    /// Build the block for a pilot first seen this cycle
    pub fn new(
        now: DateTime<Utc>,
        deptime: &str,
        enroute: &str,
        sample: &Sample,
        route: &RouteGeo,
    ) -> Self {
        let (sched_off_block, sched_on_block) = schedule_blocks(deptime, enroute, now);
        let phase = initial_phase(sample, route);
        let enroute_min = enroute_minutes(enroute).unwrap_or(0);

        let mut block = Self {
            sched_off_block,
            sched_on_block,
            off_block: sched_off_block,
            lift_off: None,
            touch_down: None,
            on_block: sched_on_block,
            off_block_actual: false,
            on_block_actual: false,
            phase,
            stop_counter: 0,
        };

        match phase {
            FlightPhase::Boarding => {}
            FlightPhase::TaxiOut => {
                block.off_block = Some(now);
                block.off_block_actual = true;
                block.on_block = Some(now + Duration::minutes(enroute_min + TAXI_MIN));
            }
            FlightPhase::Climb | FlightPhase::Cruise | FlightPhase::Descent => {
                if let Some(touch_down) = estimate_touch_down(now, sample, route) {
                    block.touch_down = Some(touch_down);
                    block.on_block = Some(touch_down + Duration::minutes(TAXI_MIN));
                }
            }
            FlightPhase::TaxiIn => {
                block.touch_down = Some(now);
                block.on_block = Some(now + Duration::minutes(TAXI_MIN));
            }
            FlightPhase::OnBlock => {}
        }

        block
    }

    /// Evaluate the transition table once
    ///
    /// Each arm is conditioned on the current phase, so at most one
    /// transition fires per cycle. Returns the new phase when one does.
    pub fn step(
        &mut self,
        now: DateTime<Utc>,
        sample: &Sample,
        route: &RouteGeo,
        enroute_min: i64,
    ) -> Option<FlightPhase> {
        let from = self.phase;
        let taxi = Duration::minutes(TAXI_MIN);

        let to = match self.phase {
            FlightPhase::Boarding => {
                if sample.groundspeed_kt > 0 {
                    self.off_block = Some(now);
                    self.off_block_actual = true;
                    self.on_block = Some(now + Duration::minutes(enroute_min) + taxi);
                    Some(FlightPhase::TaxiOut)
                } else {
                    if self.sched_off_block.is_some_and(|sched| now > sched) {
                        // Still parked past schedule: slide the estimates
                        let pushed = now + Duration::minutes(BOARDING_PUSH_MIN);
                        self.off_block = Some(pushed);
                        self.on_block = Some(pushed + Duration::minutes(enroute_min) + taxi);
                    }
                    None
                }
            }
            FlightPhase::TaxiOut => {
                if sample.vertical_speed_fpm > CLIMB_TRIGGER_FPM {
                    self.lift_off = Some(now);
                    self.on_block = Some(now + Duration::minutes(enroute_min) + taxi);
                    Some(FlightPhase::Climb)
                } else {
                    None
                }
            }
            FlightPhase::Climb => {
                if sample.vertical_speed_fpm < CRUISE_SETTLE_FPM {
                    if let Some(touch_down) = estimate_touch_down(now, sample, route) {
                        self.touch_down = Some(touch_down);
                        self.on_block = Some(touch_down + taxi);
                    }
                    Some(FlightPhase::Cruise)
                } else {
                    None
                }
            }
            FlightPhase::Cruise => {
                if sample.vertical_speed_fpm < DESCENT_TRIGGER_FPM {
                    if let Some(touch_down) = estimate_touch_down(now, sample, route) {
                        self.touch_down = Some(touch_down);
                        self.on_block = Some(touch_down + taxi);
                    }
                    Some(FlightPhase::Descent)
                } else {
                    None
                }
            }
            FlightPhase::Descent => {
                if sample.vertical_speed_fpm > LEVEL_OFF_FPM
                    && sample.altitude_agl_ft < ROLLOUT_AGL_FT
                {
                    self.touch_down = Some(now);
                    self.on_block = Some(now + taxi);
                    Some(FlightPhase::TaxiIn)
                } else {
                    None
                }
            }
            FlightPhase::TaxiIn => {
                if sample.groundspeed_kt > 0 {
                    self.stop_counter = 0;
                    None
                } else if self.stop_counter > STOP_CYCLES_ON_BLOCK {
                    self.on_block = Some(now);
                    self.on_block_actual = true;
                    Some(FlightPhase::OnBlock)
                } else {
                    self.stop_counter += 1;
                    None
                }
            }
            FlightPhase::OnBlock => None,
        };

        if let Some(to) = to {
            trace!("phase transition {:?} -> {:?}", from, to);
            self.phase = to;
        }
        to
    }
}

/// Vertical speed in ft/min from two consecutive altitude samples.
/// Exactly 0 when the samples are less than a second apart; a near-zero
/// divisor turns feed jitter into five-digit spikes otherwise.
pub fn compute_vertical_speed(
    prev_altitude_ft: i32,
    altitude_ft: i32,
    prev_at: DateTime<Utc>,
    at: DateTime<Utc>,
) -> i32 {
    let elapsed = (at - prev_at).num_milliseconds();
    if elapsed < 1000 {
        return 0;
    }
    let delta_ft = f64::from(altitude_ft - prev_altitude_ft);
    (delta_ft / (elapsed as f64 / 1000.0) * 60.0).round() as i32
}
